use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeDelta, Timelike, Utc};

use crate::model::Ms;

/// Default operating timezone: fixed UTC-3, no daylight saving.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -3;

pub fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or(Utc.fix())
}

/// Single source of "now" in the operating timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn now_ms(&self) -> Ms {
        self.now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn now_local(&self) -> LocalNow {
        LocalNow::from(self.now())
    }
}

/// Wall clock viewed at a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(offset_from_hours(DEFAULT_UTC_OFFSET_HOURS))
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// `hour:minute` local time on `date` at the given offset.
    pub fn at_local(date: NaiveDate, hour: u8, minute: u8, offset: FixedOffset) -> Self {
        Self::new(slot_start(date, hour, offset) + TimeDelta::minutes(i64::from(minute)))
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNow {
    pub date: NaiveDate,
    pub hour: u8,
    pub minute: u8,
}

impl From<DateTime<FixedOffset>> for LocalNow {
    fn from(now: DateTime<FixedOffset>) -> Self {
        Self {
            date: now.date_naive(),
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }
}

// ── Cutoff predicates ────────────────────────────────────────────

/// Start instant of the slot `hour` on `date`, in `offset`.
pub fn slot_start(date: NaiveDate, hour: u8, offset: FixedOffset) -> DateTime<FixedOffset> {
    let local = date.and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(hour));
    let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Time left until the slot starts (negative once it has started).
pub fn time_until(date: NaiveDate, hour: u8, now: &DateTime<FixedOffset>) -> TimeDelta {
    slot_start(date, hour, *now.offset()).signed_duration_since(*now)
}

/// A slot is past once its start time is now or earlier.
pub fn is_past_slot(date: NaiveDate, hour: u8, now: &DateTime<FixedOffset>) -> bool {
    time_until(date, hour, now) <= TimeDelta::zero()
}

/// Too late once fewer than `cutoff_minutes` remain before the start.
pub fn is_too_late_to_cancel(
    date: NaiveDate,
    hour: u8,
    now: &DateTime<FixedOffset>,
    cutoff_minutes: i64,
) -> bool {
    time_until(date, hour, now) < TimeDelta::minutes(cutoff_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc_minus_3() -> FixedOffset {
        offset_from_hours(-3)
    }

    #[test]
    fn slot_start_is_local_time() {
        let start = slot_start(date(2024, 3, 4), 18, utc_minus_3());
        assert_eq!(start.to_rfc3339(), "2024-03-04T18:00:00-03:00");
        assert_eq!(start.with_timezone(&Utc).to_rfc3339(), "2024-03-04T21:00:00+00:00");
    }

    #[test]
    fn late_evening_slot_crosses_utc_midnight() {
        let start = slot_start(date(2024, 3, 4), 23, utc_minus_3());
        assert_eq!(start.with_timezone(&Utc).date_naive(), date(2024, 3, 5));
    }

    #[test]
    fn slot_starting_now_is_past() {
        let now = slot_start(date(2024, 3, 4), 18, utc_minus_3());
        assert!(is_past_slot(date(2024, 3, 4), 18, &now));
        assert!(!is_past_slot(date(2024, 3, 4), 19, &now));
    }

    #[test]
    fn slot_one_second_ahead_is_not_past() {
        let now = slot_start(date(2024, 3, 4), 18, utc_minus_3()) - TimeDelta::seconds(1);
        assert!(!is_past_slot(date(2024, 3, 4), 18, &now));
    }

    #[test]
    fn cancel_cutoff_boundaries() {
        let d = date(2024, 3, 4);
        let start = slot_start(d, 18, utc_minus_3());
        let at = |mins: i64| start - TimeDelta::minutes(mins);
        assert!(is_too_late_to_cancel(d, 18, &at(59), 60));
        assert!(!is_too_late_to_cancel(d, 18, &at(60), 60));
        assert!(!is_too_late_to_cancel(d, 18, &at(61), 60));
        assert!(is_too_late_to_cancel(d, 18, &at(0), 60));
        assert!(is_too_late_to_cancel(d, 18, &(start + TimeDelta::hours(1)), 60));
    }

    #[test]
    fn fixed_clock_reports_local_parts() {
        let clock = FixedClock::at_local(date(2024, 3, 4), 10, 30, utc_minus_3());
        assert_eq!(
            clock.now_local(),
            LocalNow { date: date(2024, 3, 4), hour: 10, minute: 30 }
        );
        assert_eq!(clock.today(), date(2024, 3, 4));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::at_local(date(2024, 3, 4), 23, 30, utc_minus_3());
        clock.advance(TimeDelta::hours(1));
        assert_eq!(clock.today(), date(2024, 3, 5));
        assert_eq!(clock.now_local().hour, 0);
    }

    #[test]
    fn system_clock_uses_configured_offset() {
        let clock = SystemClock::new(utc_minus_3());
        assert_eq!(clock.now().offset().local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        assert_eq!(offset_from_hours(30).local_minus_utc(), 0);
    }
}
