use std::collections::VecDeque;
use time::{Date, OffsetDateTime};

use crate::db::LedgerEntry;
use crate::weather::ForecastSample;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Mutable state of one run, owned by the window driver.
pub struct RunContext {
    pub started_at: OffsetDateTime,
    pub today: Date,
    pub forecast: Option<ForecastSample>,
    pub days: Vec<DayReport>,
    pub events: VecDeque<RunEvent>,
}

/// What the driver computed for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayReport {
    pub date: Date,
    pub rainfall_mm: f64,
    /// MJ/m²/day.
    pub radiation_mj: f64,
    pub sunny_hours: u32,
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone)]
pub struct RunEvent {
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Day,
    Actuator,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl RunContext {
    pub fn new(today: Date) -> Self {
        Self {
            started_at: OffsetDateTime::now_utc(),
            today,
            forecast: None,
            days: Vec::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a processed day.
    pub fn record_day(&mut self, report: DayReport) {
        let e = &report.entry;
        let detail = format!(
            "{}: rain {:.1} mm, et {:.2} mm, irrigation {:.2} mm, balance {:.2} -> {:.2}",
            report.date, report.rainfall_mm, e.et, e.irrigation, e.begin_balance, e.end_balance
        );
        self.days.push(report);
        self.push_event(EventKind::Day, detail);
    }

    /// Record an actuator write, successful or not.
    pub fn record_actuator(&mut self, detail: String) {
        self.push_event(EventKind::Actuator, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn day(&self, date: Date) -> Option<&DayReport> {
        self.days.iter().find(|d| d.date == date)
    }

    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &RunEvent> {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(RunEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}
