//! Sky-condition label → cloud cover fraction, with hour-to-hour carry-forward.

use crate::weather::HourlyObservation;

pub const HOURS_PER_DAY: usize = 24;

/// Cloud cover score (0 = clear, 10 = overcast) per reported condition.
const CONDITIONS: &[(&str, u8)] = &[
    ("Blowing Snow", 8),
    ("Clear", 0),
    ("Fog", 5),
    ("Haze", 2),
    ("Heavy Blowing Snow", 9),
    ("Heavy Fog", 9),
    ("Heavy Low Drifting Snow", 10),
    ("Heavy Rain", 10),
    ("Heavy Rain Showers", 10),
    ("Heavy Thunderstorms and Rain", 10),
    ("Light Drizzle", 10),
    ("Light Freezing Rain", 10),
    ("Light Ice Pellets", 10),
    ("Light Rain", 10),
    ("Light Rain Showers", 10),
    ("Light Snow", 10),
    ("Light Snow Grains", 10),
    ("Light Snow Showers", 10),
    ("Light Thunderstorms and Rain", 10),
    ("Low Drifting Snow", 10),
    ("Mist", 3),
    ("Mostly Cloudy", 8),
    ("Overcast", 10),
    ("Partial Fog", 2),
    ("Partly Cloudy", 5),
    ("Patches of Fog", 2),
    ("Rain", 10),
    ("Rain Showers", 10),
    ("Scattered Clouds", 4),
    ("Shallow Fog", 3),
    ("Snow", 10),
    ("Snow Showers", 10),
    ("Thunderstorm", 10),
    ("Thunderstorms and Rain", 10),
    ("Unknown", 5),
];

/// Fractional cover for a known label, `None` otherwise.
pub fn cover_for(label: &str) -> Option<f64> {
    CONDITIONS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, score)| f64::from(*score) / 10.0)
}

/// Resolve cloud cover for every hour of a day.
///
/// The first labelled observation inside an hour decides it. Hours without a
/// usable label take the previous hour's value; leading hours with nothing to
/// carry stay `None`.
pub fn resolve_day(observations: &[HourlyObservation]) -> [Option<f64>; HOURS_PER_DAY] {
    let mut resolved = [None; HOURS_PER_DAY];
    let mut previous: Option<f64> = None;

    for (hour, slot) in resolved.iter_mut().enumerate() {
        let observed = observations
            .iter()
            .filter(|o| usize::from(o.hour) == hour)
            .find_map(|o| o.condition.as_deref().filter(|c| !c.is_empty()))
            .and_then(|label| {
                let cover = cover_for(label);
                if cover.is_none() {
                    tracing::debug!(hour, label, "unrecognised sky condition, carrying forward");
                }
                cover
            });

        let cover = observed.or(previous);
        *slot = cover;
        previous = cover;
    }

    resolved
}
