use thiserror::Error;
use time::Date;

/// Domain failures of a run. Store and configuration failures travel as plain
/// `anyhow` errors; these are the ones callers need to tell apart.
#[derive(Debug, Error)]
pub enum EtError {
    #[error("weather data unavailable for {date}: {reason}")]
    DataUnavailable { date: Date, reason: String },

    #[error("forecast unavailable: {0}")]
    ForecastUnavailable(String),

    #[error("no ledger entry for {date}; the balance window has a gap")]
    LedgerMissing { date: Date },

    #[error("actuator unreachable: {0}")]
    ActuatorUnreachable(String),

    #[error("actuator value rejected: {0}")]
    ActuatorRejected(String),
}

impl EtError {
    pub fn data_unavailable(date: Date, reason: impl Into<String>) -> Self {
        EtError::DataUnavailable {
            date,
            reason: reason.into(),
        }
    }
}
