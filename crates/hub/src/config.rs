//! TOML config file loading and validation: site location, balance
//! parameters, rain-block threshold, weather provider and actuator.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use time::{Date, OffsetDateTime, UtcOffset};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub location: Location,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub rain_block: RainBlockConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    /// Diagnostic detail, 0..=3. No effect on results.
    #[serde(default)]
    pub verbosity: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Local time = UTC + offset, e.g. -5 for US Central daylight time.
    pub utc_offset_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceConfig {
    /// Average daily ET during the watering season, mm.
    #[serde(default = "default_norm_et")]
    pub norm_et_mm: f64,
    /// Days reprocessed before today.
    #[serde(default = "default_window")]
    pub window_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RainBlockConfig {
    #[serde(default = "default_pop_threshold")]
    pub probability_threshold_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Station query, e.g. "KS/Shawnee_Mission".
    pub query: String,
    /// Pause between consecutive network history fetches.
    #[serde(default = "default_fetch_pause")]
    pub fetch_pause_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_norm_et() -> f64 {
    6.0
}
fn default_window() -> u32 {
    5
}
fn default_pop_threshold() -> f64 {
    40.0
}
fn default_base_url() -> String {
    "http://api.wunderground.com".to_string()
}
fn default_fetch_pause() -> u64 {
    10
}
fn default_topic_prefix() -> String {
    "irrigation/et".to_string()
}
fn default_client_id() -> String {
    "irrigation-et-hub".to_string()
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            norm_et_mm: default_norm_et(),
            window_days: default_window(),
        }
    }
}

impl Default for RainBlockConfig {
    fn default() -> Self {
        Self {
            probability_threshold_pct: default_pop_threshold(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic_prefix: default_topic_prefix(),
            client_id: default_client_id(),
        }
    }
}

impl Location {
    pub fn utc_offset(&self) -> Result<UtcOffset> {
        UtcOffset::from_whole_seconds((self.utc_offset_hours * 3600.0).round() as i32)
            .with_context(|| format!("utc_offset_hours {} out of range", self.utc_offset_hours))
    }

    /// Current calendar date at the site.
    pub fn today(&self) -> Result<Date> {
        Ok(OffsetDateTime::now_utc().to_offset(self.utc_offset()?).date())
    }
}

/// Longest window accepted; older deficits carry no useful signal.
const MAX_WINDOW_DAYS: u32 = 30;
const MAX_VERBOSITY: u8 = 3;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_location(&mut errors);
        self.validate_balance(&mut errors);
        self.validate_provider(&mut errors);

        let pct = self.rain_block.probability_threshold_pct;
        if !(0.0..=100.0).contains(&pct) {
            errors.push(format!(
                "rain_block: probability_threshold_pct {pct} out of range [0, 100]"
            ));
        }

        if self.actuator.enabled && self.actuator.topic_prefix.trim_matches('/').trim().is_empty() {
            errors.push("actuator: topic_prefix is empty".to_string());
        }

        if self.verbosity > MAX_VERBOSITY {
            errors.push(format!(
                "verbosity {} out of range [0, {MAX_VERBOSITY}]",
                self.verbosity
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_location(&self, errors: &mut Vec<String>) {
        let l = &self.location;
        if !(-90.0..=90.0).contains(&l.latitude) {
            errors.push(format!("location: latitude {} out of range [-90, 90]", l.latitude));
        }
        if !(-180.0..=180.0).contains(&l.longitude) {
            errors.push(format!(
                "location: longitude {} out of range [-180, 180]",
                l.longitude
            ));
        }
        if !(-12.0..=14.0).contains(&l.utc_offset_hours) {
            errors.push(format!(
                "location: utc_offset_hours {} out of range [-12, 14]",
                l.utc_offset_hours
            ));
        }
    }

    fn validate_balance(&self, errors: &mut Vec<String>) {
        let b = &self.balance;
        if !(b.norm_et_mm.is_finite() && b.norm_et_mm > 0.0) {
            errors.push(format!(
                "balance: norm_et_mm must be positive, got {}",
                b.norm_et_mm
            ));
        }
        // The newest day needs a completed predecessor inside the window.
        if b.window_days < 1 || b.window_days > MAX_WINDOW_DAYS {
            errors.push(format!(
                "balance: window_days {} out of range [1, {MAX_WINDOW_DAYS}]",
                b.window_days
            ));
        }
    }

    fn validate_provider(&self, errors: &mut Vec<String>) {
        let p = &self.provider;
        if !(p.base_url.starts_with("http://") || p.base_url.starts_with("https://")) {
            errors.push(format!(
                "provider: base_url '{}' must start with http:// or https://",
                p.base_url
            ));
        }
        if p.query.trim().is_empty() {
            errors.push("provider: query is empty".to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
