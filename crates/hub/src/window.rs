//! Window driver: recomputes the water balance for the lookback window and
//! derives the actuator recommendation.
//!
//! Every run replays `today - window_days ..= today`, oldest first. Past days
//! are recomputed because the provider keeps revising recent observations,
//! and today's entry is provisional until tomorrow's run settles it.
//!
//! ## Per-day pipeline
//!
//! ```text
//! fetch history ──▶ resolve cover ──▶ radiation ──▶ ETo
//!                                                    │
//!  predecessor (bootstrap | ledger[d-1]) ──▶ transition ──▶ ledger[d]
//! ```
//!
//! After the newest day: forecast ──▶ rain-block, and the entry that fell
//! out of the window (`today - window_days - 1`) is dropped.

use anyhow::Result;
use time::{Date, Duration};
use tracing::{debug, info, warn};

use crate::balance;
use crate::config::Config;
use crate::db::{Db, LedgerEntry};
use crate::error::EtError;
use crate::et::{self, EtInputs};
use crate::radiation;
use crate::state::{DayReport, RunContext};
use crate::weather::{ForecastSample, WeatherProvider};

/// What the controller is told for today.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recommendation {
    pub date: Date,
    /// Yesterday's ET, the last fully observed day, mm.
    pub et_mm: f64,
    /// Yesterday's solar radiation, Wh/m²/day.
    pub solar_radiation: f64,
    /// Yesterday's ET relative to the seasonal norm.
    pub ratio: f64,
    pub irrigation_mm: f64,
    pub rain_block: bool,
    pub forecast: ForecastSample,
}

/// Rain is likely enough, or there is nothing to water.
pub fn rain_block(forecast: &ForecastSample, irrigation_mm: f64, threshold_pct: f64) -> bool {
    forecast.pop_today_pct > threshold_pct
        || forecast.pop_tomorrow_pct > threshold_pct
        || irrigation_mm == 0.0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the whole window for `ctx.today` and persist every processed day.
pub async fn run_window<P>(
    cfg: &Config,
    provider: &P,
    db: &Db,
    ctx: &mut RunContext,
) -> Result<Recommendation>
where
    P: WeatherProvider + ?Sized,
{
    let today = ctx.today;
    let oldest = today - Duration::days(i64::from(cfg.balance.window_days));

    info!(
        %oldest,
        %today,
        window_days = cfg.balance.window_days,
        location = %cfg.location.name,
        "window: starting run"
    );
    ctx.record_system(format!("run started for {oldest}..={today}"));

    let mut yesterday = balance::bootstrap();
    let mut newest = balance::bootstrap();

    let mut date = oldest;
    while date <= today {
        let (prev, report) = match settle_day(cfg, provider, db, date, oldest).await {
            Ok(settled) => settled,
            Err(e) => {
                ctx.record_error(format!("{date}: {e:#}"));
                return Err(e);
            }
        };
        ctx.record_day(report);

        yesterday = prev;
        newest = report.entry;
        date += Duration::days(1);
    }

    let forecast = match provider.fetch_forecast().await {
        Ok(f) => f,
        Err(e) => {
            ctx.record_error(e.to_string());
            return Err(e.into());
        }
    };
    ctx.forecast = Some(forecast);

    let blocked = rain_block(
        &forecast,
        newest.irrigation,
        cfg.rain_block.probability_threshold_pct,
    );

    drop_trailing_entry(db, oldest - Duration::days(1), ctx).await;

    Ok(Recommendation {
        date: today,
        et_mm: yesterday.et,
        solar_radiation: yesterday.solar_radiation,
        ratio: newest.ratio,
        irrigation_mm: newest.irrigation,
        rain_block: blocked,
        forecast,
    })
}

// ---------------------------------------------------------------------------
// Per-day step
// ---------------------------------------------------------------------------

/// Compute and store the ledger entry for `date`. Returns the predecessor
/// used along with the day's report. Nothing is written unless every input
/// resolved.
pub(crate) async fn settle_day<P>(
    cfg: &Config,
    provider: &P,
    db: &Db,
    date: Date,
    oldest: Date,
) -> Result<(LedgerEntry, DayReport)>
where
    P: WeatherProvider + ?Sized,
{
    let prev = if date == oldest {
        balance::bootstrap()
    } else {
        let prev_date = date - Duration::days(1);
        db.get_ledger(prev_date)
            .await?
            .ok_or(EtError::LedgerMissing { date: prev_date })?
    };

    let history = provider.fetch_daily_history(date).await?;
    let summary = &history.summary;

    let sun = radiation::aggregate_day(date, &history.hourly, &cfg.location);
    let inputs = EtInputs::from_summary(summary, sun.radiation_at_surface);
    let estimate = et::estimate(&inputs);

    let entry = balance::transition(
        &prev,
        summary.precipitation_mm,
        estimate.eto,
        sun.total_solar_radiation,
        cfg.balance.norm_et_mm,
    );

    if cfg.verbosity >= 3 {
        info!(
            %date,
            slope = format!("{:.4}", estimate.slope),
            psychrometric = format!("{:.4}", estimate.psychrometric),
            es = format!("{:.3}", estimate.es),
            ea = format!("{:.3}", estimate.ea),
            vpd = format!("{:.3}", estimate.vapour_pressure_deficit),
            wind_2m = format!("{:.2}", inputs.wind_2m),
            pressure_kpa = format!("{:.2}", inputs.pressure_kpa),
            "window: psychrometrics"
        );
    }
    if cfg.verbosity >= 2 {
        info!(
            %date,
            temp_mean = summary.temp_mean_c,
            temp_min = summary.temp_min_c,
            temp_max = summary.temp_max_c,
            humidity_max = summary.humidity_max_pct,
            humidity_min = summary.humidity_min_pct,
            wind_kph = summary.wind_mean_kph,
            pressure_hpa = summary.pressure_mean_hpa,
            sunny_hours = sun.sunny_hours,
            clear_sky_wh = format!("{:.0}", sun.total_clear_sky_insolation),
            solar_wh = format!("{:.0}", sun.total_solar_radiation),
            "window: daily statistics"
        );
    }
    if cfg.verbosity >= 1 {
        info!(
            %date,
            rain_mm = summary.precipitation_mm,
            et_mm = format!("{:.2}", entry.et),
            begin = format!("{:.2}", entry.begin_balance),
            ratio = format!("{:.2}", entry.ratio),
            irrigation_mm = format!("{:.2}", entry.irrigation),
            end = format!("{:.2}", entry.end_balance),
            "window: balance"
        );
    }

    db.put_ledger(date, &entry).await?;

    Ok((
        prev,
        DayReport {
            date,
            rainfall_mm: summary.precipitation_mm,
            radiation_mj: sun.radiation_at_surface,
            sunny_hours: sun.sunny_hours,
            entry,
        },
    ))
}

/// Best-effort: a leftover entry never affects later runs.
async fn drop_trailing_entry(db: &Db, date: Date, ctx: &mut RunContext) {
    match db.delete_ledger(date).await {
        Ok(true) => debug!(%date, "window: dropped entry outside window"),
        Ok(false) => {}
        Err(e) => {
            warn!(%date, "window: failed to drop old entry: {e:#}");
            ctx.record_error(format!("drop {date}: {e:#}"));
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EventKind;
    use crate::weather::testing::{history, ScriptedProvider};
    use time::macros::date;

    const TODAY: Date = date!(2024 - 06 - 12);

    fn test_config(window_days: u32) -> Config {
        let mut cfg: Config = toml::from_str(
            r#"
[location]
name = "Shawnee Mission"
latitude = 39.08
longitude = -94.58
utc_offset_hours = -5

[provider]
query = "KS/Shawnee_Mission"
"#,
        )
        .unwrap();
        cfg.balance.window_days = window_days;
        cfg
    }

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn dry_forecast() -> ForecastSample {
        ForecastSample {
            pop_today_pct: 10.0,
            pop_tomorrow_pct: 10.0,
            rainfall_tomorrow_mm: 0.0,
        }
    }

    /// Clear, dry days for every date of the window ending at TODAY.
    fn clear_window(window_days: i64) -> ScriptedProvider {
        (0..=window_days).fold(
            ScriptedProvider::default().with_forecast(dry_forecast()),
            |p, back| p.with_day(history(TODAY - Duration::days(back), "Clear", 0.0)),
        )
    }

    // -- rain_block -----------------------------------------------------------

    #[test]
    fn rain_block_when_today_likely_wet() {
        let f = ForecastSample {
            pop_today_pct: 45.0,
            pop_tomorrow_pct: 10.0,
            rainfall_tomorrow_mm: 0.0,
        };
        assert!(rain_block(&f, 5.0, 40.0));
    }

    #[test]
    fn rain_block_when_tomorrow_likely_wet() {
        let f = ForecastSample {
            pop_today_pct: 10.0,
            pop_tomorrow_pct: 60.0,
            rainfall_tomorrow_mm: 4.0,
        };
        assert!(rain_block(&f, 5.0, 40.0));
    }

    #[test]
    fn rain_block_when_nothing_to_water() {
        assert!(rain_block(&dry_forecast(), 0.0, 40.0));
    }

    #[test]
    fn no_rain_block_when_dry_and_thirsty() {
        assert!(!rain_block(&dry_forecast(), 5.0, 40.0));
    }

    #[test]
    fn rain_block_threshold_is_exclusive() {
        let f = ForecastSample {
            pop_today_pct: 40.0,
            pop_tomorrow_pct: 40.0,
            rainfall_tomorrow_mm: 0.0,
        };
        assert!(!rain_block(&f, 5.0, 40.0));
    }

    // -- run_window -----------------------------------------------------------

    #[tokio::test]
    async fn days_are_processed_oldest_first_and_all_persisted() {
        let cfg = test_config(2);
        let db = test_db().await;
        let provider = clear_window(2);
        let mut ctx = RunContext::new(TODAY);

        run_window(&cfg, &provider, &db, &mut ctx).await.unwrap();

        assert_eq!(
            provider.calls(),
            vec![date!(2024 - 06 - 10), date!(2024 - 06 - 11), TODAY]
        );
        for d in provider.calls() {
            assert!(db.get_ledger(d).await.unwrap().is_some(), "no entry for {d}");
        }
        assert_eq!(ctx.days.len(), 3);
        assert_eq!(ctx.events_of(EventKind::Day).count(), 3);
        assert_eq!(ctx.forecast, Some(dry_forecast()));
    }

    #[tokio::test]
    async fn oldest_day_is_settled_against_zero_predecessor() {
        let cfg = test_config(2);
        let db = test_db().await;
        let mut ctx = RunContext::new(TODAY);

        run_window(&cfg, &clear_window(2), &db, &mut ctx).await.unwrap();

        let oldest = db.get_ledger(date!(2024 - 06 - 10)).await.unwrap().unwrap();
        assert_eq!(oldest.begin_balance, 0.0);
        assert_eq!(oldest.ratio, 0.0);
        assert_eq!(oldest.irrigation, 0.0);
        assert_eq!(oldest.end_balance, 0.0);
        assert!(oldest.et > 0.0);
    }

    #[tokio::test]
    async fn rain_on_oldest_day_becomes_opening_balance() {
        let cfg = test_config(1);
        let db = test_db().await;
        let provider = ScriptedProvider::default()
            .with_forecast(dry_forecast())
            .with_day(history(date!(2024 - 06 - 11), "Light Rain", 3.0))
            .with_day(history(TODAY, "Clear", 0.0));
        let mut ctx = RunContext::new(TODAY);

        run_window(&cfg, &provider, &db, &mut ctx).await.unwrap();

        let oldest = db.get_ledger(date!(2024 - 06 - 11)).await.unwrap().unwrap();
        assert_eq!(oldest.begin_balance, 0.0);
        assert_eq!(oldest.irrigation, 0.0);
        assert_eq!(oldest.end_balance, 3.0);

        let today = db.get_ledger(TODAY).await.unwrap().unwrap();
        assert_eq!(today.begin_balance, 3.0);
        assert_eq!(today.irrigation, (oldest.et - 3.0).max(0.0));
    }

    #[tokio::test]
    async fn recommendation_reports_yesterday_et_and_today_irrigation() {
        let cfg = test_config(2);
        let db = test_db().await;
        let mut ctx = RunContext::new(TODAY);

        let rec = run_window(&cfg, &clear_window(2), &db, &mut ctx).await.unwrap();

        let yesterday = db.get_ledger(date!(2024 - 06 - 11)).await.unwrap().unwrap();
        let today = db.get_ledger(TODAY).await.unwrap().unwrap();

        assert_eq!(rec.date, TODAY);
        assert_eq!(rec.et_mm, yesterday.et);
        assert_eq!(rec.solar_radiation, yesterday.solar_radiation);
        assert_eq!(rec.ratio, yesterday.et / cfg.balance.norm_et_mm);
        assert_eq!(rec.ratio, today.ratio);
        assert_eq!(rec.irrigation_mm, today.irrigation);
        // Dry days in a row: today owes yesterday's ET plus the carried deficit.
        assert!((today.irrigation - (yesterday.et - yesterday.end_balance)).abs() < 1e-9);
        assert!(!rec.rain_block);
    }

    #[tokio::test]
    async fn interior_days_chain_through_the_ledger() {
        let cfg = test_config(3);
        let db = test_db().await;
        let mut ctx = RunContext::new(TODAY);

        run_window(&cfg, &clear_window(3), &db, &mut ctx).await.unwrap();

        for pair in ctx.days.windows(2) {
            let (prev, cur) = (pair[0].entry, pair[1].entry);
            assert_eq!(cur.begin_balance, prev.end_balance);
            assert_eq!(
                cur.irrigation,
                balance::irrigation_need(cur.begin_balance, pair[1].rainfall_mm, prev.et)
            );
        }
    }

    #[tokio::test]
    async fn heavy_rain_today_blocks_watering() {
        let cfg = test_config(1);
        let db = test_db().await;
        let provider = ScriptedProvider::default()
            .with_forecast(dry_forecast())
            .with_day(history(date!(2024 - 06 - 11), "Clear", 0.0))
            .with_day(history(TODAY, "Rain", 50.0));
        let mut ctx = RunContext::new(TODAY);

        let rec = run_window(&cfg, &provider, &db, &mut ctx).await.unwrap();

        assert_eq!(rec.irrigation_mm, 0.0);
        assert!(rec.rain_block);
    }

    #[tokio::test]
    async fn failed_day_writes_nothing_and_aborts() {
        let cfg = test_config(2);
        let db = test_db().await;
        let provider = ScriptedProvider::default()
            .with_forecast(dry_forecast())
            .with_day(history(date!(2024 - 06 - 10), "Clear", 0.0))
            .with_day(history(TODAY, "Clear", 0.0));
        let mut ctx = RunContext::new(TODAY);

        let err = run_window(&cfg, &provider, &db, &mut ctx).await.unwrap_err();

        match err.downcast_ref::<EtError>() {
            Some(EtError::DataUnavailable { date, .. }) => {
                assert_eq!(*date, date!(2024 - 06 - 11))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(db.get_ledger(date!(2024 - 06 - 10)).await.unwrap().is_some());
        assert!(db.get_ledger(date!(2024 - 06 - 11)).await.unwrap().is_none());
        assert!(db.get_ledger(TODAY).await.unwrap().is_none());
        assert_eq!(ctx.events_of(EventKind::Error).count(), 1);
    }

    #[tokio::test]
    async fn interior_gap_is_ledger_missing() {
        let cfg = test_config(2);
        let db = test_db().await;
        let provider = clear_window(2);

        let err = settle_day(&cfg, &provider, &db, date!(2024 - 06 - 11), date!(2024 - 06 - 10))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EtError>(),
            Some(EtError::LedgerMissing { date }) if *date == date!(2024 - 06 - 10)
        ));
        // The predecessor check runs before any fetch.
        assert!(provider.calls().is_empty());
        assert!(db.get_ledger(date!(2024 - 06 - 11)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forecast_failure_is_fatal_after_days_are_stored() {
        let cfg = test_config(1);
        let db = test_db().await;
        let provider = ScriptedProvider::default()
            .with_day(history(date!(2024 - 06 - 11), "Clear", 0.0))
            .with_day(history(TODAY, "Clear", 0.0));
        let mut ctx = RunContext::new(TODAY);

        let err = run_window(&cfg, &provider, &db, &mut ctx).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EtError>(),
            Some(EtError::ForecastUnavailable(_))
        ));
        assert!(db.get_ledger(TODAY).await.unwrap().is_some());
        assert!(ctx.forecast.is_none());
    }

    #[tokio::test]
    async fn entry_leaving_the_window_is_dropped() {
        let cfg = test_config(2);
        let db = test_db().await;
        let stale = LedgerEntry {
            et: 9.0,
            ..LedgerEntry::default()
        };
        db.put_ledger(date!(2024 - 06 - 09), &stale).await.unwrap();
        db.put_ledger(date!(2024 - 06 - 08), &stale).await.unwrap();
        let mut ctx = RunContext::new(TODAY);

        run_window(&cfg, &clear_window(2), &db, &mut ctx).await.unwrap();

        assert!(db.get_ledger(date!(2024 - 06 - 09)).await.unwrap().is_none());
        // Only the single day that just left the window is removed.
        assert!(db.get_ledger(date!(2024 - 06 - 08)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_entries_inside_window_are_overwritten() {
        let cfg = test_config(2);
        let db = test_db().await;
        let stale = LedgerEntry {
            et: 42.0,
            end_balance: -99.0,
            ..LedgerEntry::default()
        };
        db.put_ledger(date!(2024 - 06 - 10), &stale).await.unwrap();
        let mut ctx = RunContext::new(TODAY);

        run_window(&cfg, &clear_window(2), &db, &mut ctx).await.unwrap();

        let oldest = db.get_ledger(date!(2024 - 06 - 10)).await.unwrap().unwrap();
        assert_eq!(oldest.end_balance, 0.0);
        assert_ne!(oldest.et, 42.0);
    }

    #[tokio::test]
    async fn rerun_with_same_weather_is_idempotent() {
        let cfg = test_config(2);
        let db = test_db().await;
        let provider = clear_window(2);

        let mut first_ctx = RunContext::new(TODAY);
        let first = run_window(&cfg, &provider, &db, &mut first_ctx).await.unwrap();
        let first_today = db.get_ledger(TODAY).await.unwrap();

        let mut second_ctx = RunContext::new(TODAY);
        let second = run_window(&cfg, &provider, &db, &mut second_ctx).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(db.get_ledger(TODAY).await.unwrap(), first_today);
    }
}
