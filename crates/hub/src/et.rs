//! Reference evapotranspiration (FAO Penman-Monteith form) from daily
//! radiation and station statistics.

use crate::weather::DailySummary;

/// Station wind (km/h at ~10 m) to m/s at 2 m.
const WIND_TO_2M_FACTOR: f64 = 0.748;

/// Inputs in SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtInputs {
    /// MJ/m²/day.
    pub radiation: f64,
    pub temp_mean_c: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub humidity_max_pct: f64,
    pub humidity_min_pct: f64,
    /// m/s at 2 m.
    pub wind_2m: f64,
    /// kPa.
    pub pressure_kpa: f64,
}

impl EtInputs {
    pub fn from_summary(summary: &DailySummary, radiation: f64) -> Self {
        Self {
            radiation,
            temp_mean_c: summary.temp_mean_c,
            temp_min_c: summary.temp_min_c,
            temp_max_c: summary.temp_max_c,
            humidity_max_pct: summary.humidity_max_pct,
            humidity_min_pct: summary.humidity_min_pct,
            wind_2m: summary.wind_mean_kph * 1000.0 / 3600.0 * WIND_TO_2M_FACTOR,
            pressure_kpa: summary.pressure_mean_hpa / 10.0,
        }
    }
}

/// ETo plus the intermediate terms, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtResult {
    /// mm/day. Not clamped.
    pub eto: f64,
    /// Slope of the saturation vapour pressure curve, kPa/°C.
    pub slope: f64,
    /// Psychrometric constant, kPa/°C.
    pub psychrometric: f64,
    pub es: f64,
    pub ea: f64,
    pub vapour_pressure_deficit: f64,
}

/// kPa at `t` °C.
pub fn saturation_vapour_pressure(t: f64) -> f64 {
    0.6108 * ((17.27 * t) / (t + 237.3)).exp()
}

pub fn estimate(inputs: &EtInputs) -> EtResult {
    let t = inputs.temp_mean_c;
    let u2 = inputs.wind_2m;

    let slope = 4098.0 * saturation_vapour_pressure(t) / (t + 237.3).powi(2);
    let psychrometric = 0.665e-3 * inputs.pressure_kpa;

    let svp_min = saturation_vapour_pressure(inputs.temp_min_c);
    let svp_max = saturation_vapour_pressure(inputs.temp_max_c);
    let es = (svp_min + svp_max) / 2.0;
    let ea = svp_min * inputs.humidity_max_pct / 200.0 + svp_max * inputs.humidity_min_pct / 200.0;
    let vapour_pressure_deficit = es - ea;

    let eto = (0.408 * slope * inputs.radiation
        + psychrometric * 900.0 * u2 * vapour_pressure_deficit / (t + 273.0))
        / (slope + psychrometric * (1.0 + 0.34 * u2));

    EtResult {
        eto,
        slope,
        psychrometric,
        es,
        ea,
        vapour_pressure_deficit,
    }
}
