//! Weather data provider: daily history (hourly sky conditions + summary
//! statistics) and the short-range precipitation forecast.
//!
//! `WundergroundClient` speaks the Weather Underground v1 JSON API.
//! `CachedProvider` wraps any provider with a lookaside cache in the hub
//! database for completed days; today's history and the forecast always go
//! to the network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::db::Db;
use crate::error::EtError;

// ---------------------------------------------------------------------------
// Provider-neutral records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyObservation {
    pub hour: u8,
    pub condition: Option<String>,
}

/// Station statistics for one calendar day, in the provider's units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: Date,
    pub temp_mean_c: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub humidity_max_pct: f64,
    pub humidity_min_pct: f64,
    /// km/h at station height.
    pub wind_mean_kph: f64,
    /// hPa.
    pub pressure_mean_hpa: f64,
    pub precipitation_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHistory {
    pub hourly: Vec<HourlyObservation>,
    pub summary: DailySummary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSample {
    pub pop_today_pct: f64,
    pub pop_tomorrow_pct: f64,
    pub rainfall_tomorrow_mm: f64,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch_daily_history(&self, date: Date) -> Result<DailyHistory, EtError>;
    async fn fetch_forecast(&self) -> Result<ForecastSample, EtError>;
}

// ---------------------------------------------------------------------------
// Weather Underground wire format
// ---------------------------------------------------------------------------

/// Numeric fields arrive as JSON numbers or as strings depending on endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumOrText {
    Num(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: WuHistory,
}

#[derive(Debug, Deserialize)]
struct WuHistory {
    #[serde(default)]
    dailysummary: Vec<WuDailySummary>,
    #[serde(default)]
    observations: Vec<WuObservation>,
}

#[derive(Debug, Deserialize)]
struct WuDailySummary {
    meantempm: Option<NumOrText>,
    mintempm: Option<NumOrText>,
    maxtempm: Option<NumOrText>,
    maxhumidity: Option<NumOrText>,
    minhumidity: Option<NumOrText>,
    meanwindspdm: Option<NumOrText>,
    meanpressurem: Option<NumOrText>,
    precipm: Option<NumOrText>,
}

#[derive(Debug, Deserialize)]
struct WuObservation {
    date: WuObservationDate,
    #[serde(default)]
    conds: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WuObservationDate {
    hour: NumOrText,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    forecast: WuForecast,
}

#[derive(Debug, Deserialize)]
struct WuForecast {
    simpleforecast: WuSimpleForecast,
}

#[derive(Debug, Deserialize)]
struct WuSimpleForecast {
    #[serde(default)]
    forecastday: Vec<WuForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WuForecastDay {
    pop: Option<NumOrText>,
    qpf_allday: Option<WuAmount>,
}

#[derive(Debug, Deserialize)]
struct WuAmount {
    mm: Option<NumOrText>,
}

/// Reads a numeric field. Blank strings and the -999/-9999 sentinels count
/// as missing; "T" (trace) reads as zero where `trace_is_zero` is set.
fn number(field: &str, value: Option<&NumOrText>, trace_is_zero: bool) -> Result<f64, String> {
    let parsed = match value {
        None => None,
        Some(NumOrText::Num(n)) => Some(*n),
        Some(NumOrText::Text(s)) => {
            let s = s.trim();
            if trace_is_zero && s.eq_ignore_ascii_case("T") {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
    };
    match parsed {
        Some(v) if v.is_finite() && v > -999.0 => Ok(v),
        _ => Err(format!("missing or invalid {field}")),
    }
}

impl HistoryResponse {
    fn into_history(self, date: Date) -> Result<DailyHistory, EtError> {
        let fail = |reason: String| EtError::data_unavailable(date, reason);

        let s = self
            .history
            .dailysummary
            .first()
            .ok_or_else(|| fail("no daily summary".into()))?;

        let summary = DailySummary {
            date,
            temp_mean_c: number("meantempm", s.meantempm.as_ref(), false).map_err(fail)?,
            temp_min_c: number("mintempm", s.mintempm.as_ref(), false).map_err(fail)?,
            temp_max_c: number("maxtempm", s.maxtempm.as_ref(), false).map_err(fail)?,
            humidity_max_pct: number("maxhumidity", s.maxhumidity.as_ref(), false).map_err(fail)?,
            humidity_min_pct: number("minhumidity", s.minhumidity.as_ref(), false).map_err(fail)?,
            wind_mean_kph: number("meanwindspdm", s.meanwindspdm.as_ref(), false).map_err(fail)?,
            pressure_mean_hpa: number("meanpressurem", s.meanpressurem.as_ref(), false)
                .map_err(fail)?,
            precipitation_mm: number("precipm", s.precipm.as_ref(), true).map_err(fail)?,
        };

        let hourly: Vec<HourlyObservation> = self
            .history
            .observations
            .into_iter()
            .filter_map(|o| {
                let hour = number("hour", Some(&o.date.hour), false).ok()?;
                (0.0..24.0).contains(&hour).then(|| HourlyObservation {
                    hour: hour as u8,
                    condition: o.conds.filter(|c| !c.trim().is_empty()),
                })
            })
            .collect();

        if hourly.is_empty() {
            return Err(fail("no hourly observations".into()));
        }

        Ok(DailyHistory { hourly, summary })
    }
}

impl ForecastResponse {
    fn into_sample(self) -> Result<ForecastSample, EtError> {
        let days = &self.forecast.simpleforecast.forecastday;
        let (today, tomorrow) = match (days.first(), days.get(1)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(EtError::ForecastUnavailable(format!(
                    "expected at least 2 forecast days, got {}",
                    days.len()
                )))
            }
        };

        let pop_today_pct =
            number("pop[0]", today.pop.as_ref(), false).map_err(EtError::ForecastUnavailable)?;
        let pop_tomorrow_pct =
            number("pop[1]", tomorrow.pop.as_ref(), false).map_err(EtError::ForecastUnavailable)?;
        let rainfall_tomorrow_mm = number(
            "qpf_allday[1].mm",
            tomorrow.qpf_allday.as_ref().and_then(|q| q.mm.as_ref()),
            true,
        )
        .map_err(EtError::ForecastUnavailable)?;

        Ok(ForecastSample {
            pop_today_pct,
            pop_tomorrow_pct,
            rainfall_tomorrow_mm,
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct WundergroundClient {
    client: Client,
    base_url: String,
    api_key: String,
    query: String,
}

impl WundergroundClient {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build weather http client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            query: cfg.query.clone(),
        })
    }

    fn history_url(&self, date: Date) -> Result<String, String> {
        let stamp = date
            .format(format_description!("[year][month][day]"))
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "{}/api/{}/history_{stamp}/q/{}.json",
            self.base_url, self.api_key, self.query
        ))
    }

    fn forecast_url(&self) -> String {
        format!("{}/api/{}/forecast/q/{}.json", self.base_url, self.api_key, self.query)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("provider returned {}", response.status()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| format!("unreadable response: {e}"))
    }
}

#[async_trait]
impl WeatherProvider for WundergroundClient {
    async fn fetch_daily_history(&self, date: Date) -> Result<DailyHistory, EtError> {
        let url = self
            .history_url(date)
            .map_err(|e| EtError::data_unavailable(date, e))?;
        debug!(%date, query = %self.query, "fetching daily history");

        let response: HistoryResponse = self
            .get_json(&url)
            .await
            .map_err(|e| EtError::data_unavailable(date, e))?;
        response.into_history(date)
    }

    async fn fetch_forecast(&self) -> Result<ForecastSample, EtError> {
        debug!(query = %self.query, "fetching forecast");
        let response: ForecastResponse = self
            .get_json(&self.forecast_url())
            .await
            .map_err(EtError::ForecastUnavailable)?;
        response.into_sample()
    }
}

// ---------------------------------------------------------------------------
// Cache lookaside
// ---------------------------------------------------------------------------

pub struct CachedProvider<P> {
    inner: P,
    db: Db,
    today: Date,
    fetch_pause: Duration,
    network_fetches: AtomicU32,
}

impl<P: WeatherProvider> CachedProvider<P> {
    pub fn new(inner: P, db: Db, today: Date, fetch_pause: Duration) -> Self {
        Self {
            inner,
            db,
            today,
            fetch_pause,
            network_fetches: AtomicU32::new(0),
        }
    }

    pub fn network_fetches(&self) -> u32 {
        self.network_fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<P: WeatherProvider> WeatherProvider for CachedProvider<P> {
    async fn fetch_daily_history(&self, date: Date) -> Result<DailyHistory, EtError> {
        let complete = date < self.today;

        if complete {
            match self.db.get_cached_history(date).await {
                Ok(Some(history)) => {
                    debug!(%date, "daily history served from cache");
                    return Ok(history);
                }
                Ok(None) => {}
                Err(e) => warn!(%date, "weather cache read failed: {e:#}"),
            }
        }

        // Rate-limit courtesy between consecutive network fetches.
        if self.network_fetches() > 0 && !self.fetch_pause.is_zero() {
            tokio::time::sleep(self.fetch_pause).await;
        }

        let history = self.inner.fetch_daily_history(date).await?;
        self.network_fetches.fetch_add(1, Ordering::Relaxed);

        if complete {
            if let Err(e) = self.db.put_cached_history(date, &history).await {
                warn!(%date, "weather cache write failed: {e:#}");
            } else {
                info!(%date, observations = history.hourly.len(), "daily history cached");
            }
        }

        Ok(history)
    }

    async fn fetch_forecast(&self) -> Result<ForecastSample, EtError> {
        self.inner.fetch_forecast().await
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
