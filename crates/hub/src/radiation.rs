//! Integrates hourly sun position and cloud cover into daily radiation totals.

use time::Date;

use crate::cloud::{self, HOURS_PER_DAY};
use crate::config::Location;
use crate::solar;
use crate::weather::HourlyObservation;

/// Hours with less cover than this count as sunny.
const SUNNY_COVER_LIMIT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRadiation {
    /// MJ/m²/day, the ET estimator's radiation input.
    pub radiation_at_surface: f64,
    /// Wh/m²/day reaching the ground after cloud attenuation.
    pub total_solar_radiation: f64,
    /// Wh/m²/day under a clear sky.
    pub total_clear_sky_insolation: f64,
    pub sunny_hours: u32,
}

/// Ground radiation for a clear-sky value attenuated by `cover` (0..=1).
pub fn attenuate(clear_sky: f64, cover: f64) -> f64 {
    clear_sky * (1.0 - 0.75 * cover.powf(3.4))
}

pub fn aggregate_day(date: Date, observations: &[HourlyObservation], location: &Location) -> DailyRadiation {
    aggregate_covers(date, &cloud::resolve_day(observations), location)
}

/// Sum over hours with a resolved cover; unresolved hours contribute nothing.
pub fn aggregate_covers(
    date: Date,
    covers: &[Option<f64>; HOURS_PER_DAY],
    location: &Location,
) -> DailyRadiation {
    let mut total_solar_radiation = 0.0;
    let mut total_clear_sky_insolation = 0.0;
    let mut sunny_hours = 0;

    for (hour, cover) in (0u8..).zip(covers.iter()) {
        let Some(cover) = *cover else {
            continue;
        };

        let sun = solar::sun_at(date, hour, location);
        if cover < SUNNY_COVER_LIMIT && sun.clear_sky_insolation > 0.0 {
            sunny_hours += 1;
        }

        let clear_sky = sun.clamped_insolation();
        total_solar_radiation += attenuate(clear_sky, cover);
        total_clear_sky_insolation += clear_sky;
    }

    DailyRadiation {
        radiation_at_surface: total_solar_radiation * 3600.0 / 1_000_000.0,
        total_solar_radiation,
        total_clear_sky_insolation,
        sunny_hours,
    }
}
