use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::{Date, OffsetDateTime};

use crate::weather::DailyHistory;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One day of the water balance. Amounts in mm, radiation in Wh/m²/day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub begin_balance: f64,
    pub solar_radiation: f64,
    /// The day's own ET, settled by the following day.
    pub et: f64,
    pub ratio: f64,
    pub irrigation: f64,
    pub end_balance: f64,
}

/// Storage key for a calendar day: "YYYY-MM-DD".
pub fn day_key(date: Date) -> String {
    date.to_string()
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/irrigation/et.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        // Every in-memory connection is its own database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Ledger
    // ----------------------------

    pub async fn get_ledger(&self, date: Date) -> Result<Option<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT begin_balance, solar_radiation, et, ratio, irrigation, end_balance
            FROM ledger
            WHERE day = ?
            "#,
        )
        .bind(day_key(date))
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("get_ledger failed for {date}"))
    }

    /// Insert or overwrite the entry for `date`.
    pub async fn put_ledger(&self, date: Date, e: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger (
              day, begin_balance, solar_radiation, et, ratio, irrigation, end_balance, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(day) DO UPDATE SET
              begin_balance=excluded.begin_balance,
              solar_radiation=excluded.solar_radiation,
              et=excluded.et,
              ratio=excluded.ratio,
              irrigation=excluded.irrigation,
              end_balance=excluded.end_balance,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(day_key(date))
        .bind(e.begin_balance)
        .bind(e.solar_radiation)
        .bind(e.et)
        .bind(e.ratio)
        .bind(e.irrigation)
        .bind(e.end_balance)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .with_context(|| format!("put_ledger failed for {date}"))?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub async fn delete_ledger(&self, date: Date) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ledger WHERE day = ?")
            .bind(day_key(date))
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete_ledger failed for {date}"))?;
        Ok(result.rows_affected() > 0)
    }

    // ----------------------------
    // Weather cache
    // ----------------------------

    pub async fn get_cached_history(&self, date: Date) -> Result<Option<DailyHistory>> {
        let payload: Option<String> =
            sqlx::query_scalar::<_, String>("SELECT payload FROM weather_cache WHERE day = ?")
                .bind(day_key(date))
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("get_cached_history failed for {date}"))?;

        payload
            .map(|p| {
                serde_json::from_str(&p)
                    .with_context(|| format!("corrupt weather cache entry for {date}"))
            })
            .transpose()
    }

    pub async fn put_cached_history(&self, date: Date, history: &DailyHistory) -> Result<()> {
        let payload = serde_json::to_string(history).context("serialize weather history")?;
        sqlx::query(
            r#"
            INSERT INTO weather_cache (day, payload, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(day) DO UPDATE SET
              payload=excluded.payload,
              fetched_at=excluded.fetched_at
            "#,
        )
        .bind(day_key(date))
        .bind(payload)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .with_context(|| format!("put_cached_history failed for {date}"))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
