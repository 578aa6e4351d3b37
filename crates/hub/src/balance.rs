//! Day-over-day water balance.
//!
//! Each day settles yesterday's ET against today's rainfall and the running
//! balance; the irrigation amount is whatever is still missing. All amounts
//! are mm.
//!
//! ```text
//! begin      = prev.end_balance
//! ratio      = prev.et / norm_et
//! irrigation = max(0, -begin - rainfall + prev.et)
//! end        = begin - prev.et + rainfall - irrigation
//! ```

use crate::db::LedgerEntry;

/// Predecessor of the oldest day in the window: nothing owed, nothing stored.
pub fn bootstrap() -> LedgerEntry {
    LedgerEntry::default()
}

pub fn irrigation_need(begin_balance: f64, rainfall_mm: f64, prev_et: f64) -> f64 {
    (-begin_balance - rainfall_mm + prev_et).max(0.0)
}

/// Ledger entry for a day, given the previous day's entry.
///
/// `et` and `solar_radiation` are the day's own values; they are stored so
/// the following day can settle them.
pub fn transition(
    prev: &LedgerEntry,
    rainfall_mm: f64,
    et: f64,
    solar_radiation: f64,
    norm_et: f64,
) -> LedgerEntry {
    let begin_balance = prev.end_balance;
    let irrigation = irrigation_need(begin_balance, rainfall_mm, prev.et);

    LedgerEntry {
        begin_balance,
        solar_radiation,
        et,
        ratio: prev.et / norm_et,
        irrigation,
        end_balance: begin_balance - prev.et + rainfall_mm - irrigation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NORM_ET: f64 = 6.0;

    /// (rainfall, et) per day, oldest first.
    fn replay(days: &[(f64, f64)]) -> Vec<LedgerEntry> {
        let mut prev = bootstrap();
        let mut out = Vec::with_capacity(days.len());
        for &(rainfall, et) in days {
            let entry = transition(&prev, rainfall, et, 0.0, NORM_ET);
            out.push(entry);
            prev = entry;
        }
        out
    }

    #[test]
    fn oldest_day_settles_against_zero_predecessor() {
        let e = transition(&bootstrap(), 0.0, 5.0, 7000.0, NORM_ET);
        assert_eq!(e.begin_balance, 0.0);
        assert_eq!(e.ratio, 0.0);
        assert_eq!(e.irrigation, 0.0);
        assert_eq!(e.end_balance, 0.0);
        assert_eq!(e.et, 5.0);
        assert_eq!(e.solar_radiation, 7000.0);
    }

    #[test]
    fn rain_on_oldest_day_is_carried_as_balance() {
        let oldest = transition(&bootstrap(), 3.0, 5.0, 7000.0, NORM_ET);
        assert_eq!(oldest.begin_balance, 0.0);
        assert_eq!(oldest.irrigation, 0.0);
        assert_eq!(oldest.end_balance, 3.0);

        let next = transition(&oldest, 0.0, 5.0, 7000.0, NORM_ET);
        assert_eq!(next.begin_balance, 3.0);
        assert_eq!(next.irrigation, 2.0);
        assert_eq!(next.end_balance, -4.0);
    }

    #[test]
    fn three_day_window_arithmetic() {
        // window = 2: day-2 bootstraps, day-1 dry, day-0 with 2 mm of rain.
        let days = replay(&[(0.0, 5.0), (0.0, 5.0), (2.0, 5.0)]);

        assert_eq!(days[0].begin_balance, 0.0);
        assert_eq!(days[0].end_balance, 0.0);

        assert_eq!(days[1].begin_balance, 0.0);
        assert_eq!(days[1].irrigation, 5.0);
        assert_eq!(days[1].end_balance, -10.0);

        assert_eq!(days[2].begin_balance, -10.0);
        assert!((days[2].ratio - 5.0 / 6.0).abs() < 1e-12);
        assert_eq!(days[2].irrigation, 13.0);
        assert_eq!(days[2].end_balance, -26.0);
    }

    #[test]
    fn surplus_rain_means_no_irrigation() {
        let prev = LedgerEntry {
            et: 4.0,
            end_balance: 1.0,
            ..bootstrap()
        };
        let e = transition(&prev, 20.0, 3.0, 0.0, NORM_ET);
        assert_eq!(e.irrigation, 0.0);
        assert_eq!(e.end_balance, 1.0 - 4.0 + 20.0);
    }

    #[test]
    fn rain_partially_covers_need() {
        let prev = LedgerEntry {
            et: 6.0,
            ..bootstrap()
        };
        let e = transition(&prev, 2.5, 6.0, 0.0, NORM_ET);
        assert_eq!(e.irrigation, 3.5);
        assert_eq!(e.ratio, 1.0);
    }

    #[test]
    fn replay_is_a_pure_function_of_history() {
        let history = [(0.0, 4.2), (12.0, 3.1), (0.0, 6.6), (1.5, 5.0), (0.0, 7.3)];
        assert_eq!(replay(&history), replay(&history));
    }

    proptest! {
        #[test]
        fn irrigation_is_never_negative(
            begin in -100.0f64..100.0,
            rainfall in 0.0f64..100.0,
            et in -5.0f64..20.0,
        ) {
            prop_assert!(irrigation_need(begin, rainfall, et) >= 0.0);
        }

        #[test]
        fn ledger_conserves_water(
            prev_end in -50.0f64..50.0,
            prev_et in -2.0f64..15.0,
            rainfall in 0.0f64..60.0,
            et in -2.0f64..15.0,
        ) {
            let prev = LedgerEntry { et: prev_et, end_balance: prev_end, ..bootstrap() };
            let e = transition(&prev, rainfall, et, 0.0, NORM_ET);
            let lhs = e.end_balance + e.irrigation + prev_et;
            let rhs = e.begin_balance + rainfall;
            prop_assert!((lhs - rhs).abs() < 1e-9, "lhs {} rhs {}", lhs, rhs);
            prop_assert!(e.irrigation >= 0.0);
        }
    }
}
