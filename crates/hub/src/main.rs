mod actuator;
mod balance;
mod cloud;
mod config;
mod db;
mod error;
mod et;
mod mqtt;
mod radiation;
mod solar;
mod state;
mod weather;
mod window;

use anyhow::Result;
use std::{env, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use actuator::{push_outputs, LogActuator, MqttActuator};
use db::Db;
use state::{EventKind, RunContext};
use weather::{CachedProvider, WundergroundClient};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:et-hub.db".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Config file ─────────────────────────────────────────────────
    let mut cfg = config::load(&config_path)?;
    if let Ok(key) = env::var("WU_API_KEY") {
        cfg.provider.api_key = key;
    }
    if cfg.provider.api_key.is_empty() {
        warn!("no weather api key configured (set provider.api_key or WU_API_KEY)");
    }

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Run ─────────────────────────────────────────────────────────
    let today = cfg.location.today()?;
    let mut ctx = RunContext::new(today);

    let provider = CachedProvider::new(
        WundergroundClient::new(&cfg.provider)?,
        db.clone(),
        today,
        Duration::from_secs(cfg.provider.fetch_pause_sec),
    );

    let rec = match window::run_window(&cfg, &provider, &db, &mut ctx).await {
        Ok(rec) => rec,
        Err(e) => {
            error!("run failed: {e:#}");
            return Err(e);
        }
    };

    info!(
        %today,
        pop_today = rec.forecast.pop_today_pct,
        pop_tomorrow = rec.forecast.pop_tomorrow_pct,
        rain_tomorrow_mm = rec.forecast.rainfall_tomorrow_mm,
        "forecast"
    );
    info!(
        yesterday_et_mm = format!("{:.2}", rec.et_mm),
        yesterday_solar_wh = format!("{:.0}", rec.solar_radiation),
        ratio = format!("{:.2}", rec.ratio),
        irrigation_mm = format!("{:.2}", rec.irrigation_mm),
        rain_block = rec.rain_block,
        network_fetches = provider.network_fetches(),
        "recommendation"
    );

    if let Some(d) = ctx.day(today) {
        info!(
            rain_mm = d.rainfall_mm,
            radiation_mj = format!("{:.1}", d.radiation_mj),
            sunny_hours = d.sunny_hours,
            "today so far (provisional)"
        );
    }

    // ── Actuator ────────────────────────────────────────────────────
    let failures = if cfg.actuator.enabled {
        let client = MqttActuator::connect(&cfg.actuator, &broker, port);
        let failures = push_outputs(&client, &rec, &mut ctx).await;
        match client.close().await {
            Ok(()) => failures,
            Err(e) => {
                error!("actuator: {e}");
                ctx.record_error(e.to_string());
                failures + 1
            }
        }
    } else {
        push_outputs(&LogActuator, &rec, &mut ctx).await
    };

    let elapsed = time::OffsetDateTime::now_utc() - ctx.started_at;
    info!(
        days = ctx.days.len(),
        actuator_failures = failures,
        errors = ctx.events_of(EventKind::Error).count(),
        elapsed_ms = elapsed.whole_milliseconds() as i64,
        "run complete"
    );

    Ok(())
}
