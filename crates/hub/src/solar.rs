//! Hourly sun position and clear-sky insolation for the configured site.
//!
//! Declination and the time correction come from a truncated Fourier series
//! in the fractional day angle. The coefficients are the published
//! approximation and must not be rounded.

use time::Date;

use crate::config::Location;

/// Clear-sky insolation model: `990 * sin(elevation) - 30` W/m².
const INSOLATION_SCALE: f64 = 990.0;
const INSOLATION_OFFSET: f64 = 30.0;

/// Hours added to the hour-midpoint UTC time before computing the hour angle.
const HOUR_ANGLE_LAG: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunSample {
    /// Degrees above the horizon, negative at night.
    pub elevation_deg: f64,
    /// W/m², not clamped. Negative when the sun is low or below the horizon.
    pub clear_sky_insolation: f64,
}

impl SunSample {
    /// Insolation usable in the radiation sum.
    pub fn clamped_insolation(&self) -> f64 {
        self.clear_sky_insolation.max(0.0)
    }
}

/// Sun position for local `hour` (0..=23) on `date`.
///
/// The day angle is taken at the hour midpoint, the hour angle half an hour
/// later.
pub fn sun_at(date: Date, hour: u8, location: &Location) -> SunSample {
    let utc_hour = f64::from(hour) - location.utc_offset_hours + 0.5;
    let day_angle =
        ((360.0 / 365.25) * (f64::from(date.ordinal()) + utc_hour / 24.0)).to_radians();

    let declination = declination_deg(day_angle);
    let hour_angle = normalize_hour_angle(
        (utc_hour + HOUR_ANGLE_LAG - 12.0) * 15.0 + location.longitude + time_correction(day_angle),
    );

    let lat = location.latitude.to_radians();
    let dec = declination.to_radians();
    let solar_factor = lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.to_radians().cos();

    let elevation_deg = solar_factor.clamp(-1.0, 1.0).asin().to_degrees();
    let clear_sky_insolation =
        INSOLATION_SCALE * elevation_deg.to_radians().sin() - INSOLATION_OFFSET;

    SunSample {
        elevation_deg,
        clear_sky_insolation,
    }
}

fn declination_deg(f: f64) -> f64 {
    0.396372 - 22.91327 * f.cos() + 4.02543 * f.sin() - 0.387205 * (2.0 * f).cos()
        + 0.051967 * (2.0 * f).sin()
        - 0.154527 * (3.0 * f).cos()
        + 0.084798 * (3.0 * f).sin()
}

fn time_correction(f: f64) -> f64 {
    0.004297 + 0.107029 * f.cos() - 1.837877 * f.sin() - 0.837378 * (2.0 * f).cos()
        - 2.340475 * (2.0 * f).sin()
}

/// Wrap into (-180, 180].
fn normalize_hour_angle(deg: f64) -> f64 {
    let wrapped = (deg + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}
