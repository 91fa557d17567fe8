//! Slot scheduling for notification pushes
//!
//! Notifications are pushed twice a day, at 08:00 and 16:00 local time.
//! This module holds the time math; the aggregator owns the timers.
//! - Next slot boundary via a cron schedule in the configured timezone
//! - Per-day slot keys for sent-notification dedup
//! - The 08:00-16:00 window for ambient change toasts

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::NotifyError;
use crate::types::Slot;

/// 5-field cron for the two daily push slots
const SLOT_CRON: &str = "0 8,16 * * *";

/// Ambient toasts are only shown between these local hours (end exclusive)
const AMBIENT_WINDOW_START_HOUR: u32 = 8;
const AMBIENT_WINDOW_END_HOUR: u32 = 16;

/// Source of "now". Injected so the time math is testable without real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The next scheduled push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub at: DateTime<Utc>,
    pub slot: Slot,
}

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, NotifyError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field format
    let full_expr = format!("0 {}", expr);

    full_expr.parse::<Schedule>().map_err(|e| {
        NotifyError::Configuration(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

/// Next 08:00 or 16:00 boundary strictly after `now`, in `tz`.
///
/// Before 08:00 this is today's 08:00, before 16:00 today's 16:00,
/// otherwise tomorrow's 08:00.
pub fn next_trigger(now: DateTime<Utc>, tz: Tz) -> Option<Trigger> {
    let schedule = match parse_cron(SLOT_CRON) {
        Ok(schedule) => schedule,
        Err(e) => {
            log::error!("Slot schedule unavailable: {}", e);
            return None;
        }
    };

    let now_local = now.with_timezone(&tz);
    let next_local = schedule.after(&now_local).next()?;
    let slot = Slot::from_hour(next_local.hour())?;

    Some(Trigger {
        at: next_local.with_timezone(&Utc),
        slot,
    })
}

/// Local calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// `"<yyyy-mm-dd>:<08|16>"`
pub fn slot_key(date: NaiveDate, slot: Slot) -> String {
    format!("{}:{}", date.format("%Y-%m-%d"), slot.as_str())
}

/// Whether `now` falls in the daily window for ambient change toasts.
pub fn in_ambient_window(now: DateTime<Utc>, tz: Tz) -> bool {
    let hour = now.with_timezone(&tz).hour();
    (AMBIENT_WINDOW_START_HOUR..AMBIENT_WINDOW_END_HOUR).contains(&hour)
}

/// Time left until `at`, zero when already due.
pub fn duration_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn new(now: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.now.lock() = now;
        }

        pub fn advance(&self, by: chrono::Duration) {
            let mut guard = self.now.lock();
            *guard += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BOGOTA: Tz = chrono_tz::America::Bogota;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        BOGOTA
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_cron_slots() {
        assert!(parse_cron(SLOT_CRON).is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn test_next_trigger_before_morning() {
        let trigger = next_trigger(local(2026, 10, 16, 6, 30), BOGOTA).unwrap();
        assert_eq!(trigger.slot, Slot::Morning);
        assert_eq!(trigger.at, local(2026, 10, 16, 8, 0));
    }

    #[test]
    fn test_next_trigger_midday() {
        let trigger = next_trigger(local(2026, 10, 16, 8, 0), BOGOTA).unwrap();
        assert_eq!(trigger.slot, Slot::Afternoon);
        assert_eq!(trigger.at, local(2026, 10, 16, 16, 0));
    }

    #[test]
    fn test_next_trigger_evening_rolls_to_tomorrow() {
        let trigger = next_trigger(local(2026, 10, 16, 17, 45), BOGOTA).unwrap();
        assert_eq!(trigger.slot, Slot::Morning);
        assert_eq!(trigger.at, local(2026, 10, 17, 8, 0));
    }

    #[test]
    fn test_next_trigger_month_end() {
        let trigger = next_trigger(local(2026, 12, 31, 23, 59), BOGOTA).unwrap();
        assert_eq!(trigger.at, local(2027, 1, 1, 8, 0));
    }

    #[test]
    fn test_slot_key_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(slot_key(date, Slot::Morning), "2026-03-05:08");
        assert_eq!(slot_key(date, Slot::Afternoon), "2026-03-05:16");
    }

    #[test]
    fn test_local_date_uses_timezone() {
        // 02:00 UTC on the 17th is still the 16th in Bogota (UTC-5)
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 2, 0, 0).unwrap();
        assert_eq!(local_date(now, BOGOTA), NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
    }

    #[test]
    fn test_ambient_window_bounds() {
        assert!(!in_ambient_window(local(2026, 10, 16, 7, 59), BOGOTA));
        assert!(in_ambient_window(local(2026, 10, 16, 8, 0), BOGOTA));
        assert!(in_ambient_window(local(2026, 10, 16, 15, 59), BOGOTA));
        assert!(!in_ambient_window(local(2026, 10, 16, 16, 0), BOGOTA));
    }

    #[test]
    fn test_duration_until_past_is_zero() {
        let now = local(2026, 10, 16, 9, 0);
        assert_eq!(duration_until(now - chrono::Duration::minutes(1), now), Duration::ZERO);
        assert_eq!(
            duration_until(now + chrono::Duration::seconds(90), now),
            Duration::from_secs(90)
        );
    }
}
