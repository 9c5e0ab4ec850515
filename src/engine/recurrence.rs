use chrono::{NaiveDate, TimeDelta};
use futures::future::join_all;
use tracing::debug;

use crate::clock::is_past_slot;
use crate::model::*;
use crate::observability::OCCURRENCES_MATERIALIZED_TOTAL;

use super::{Engine, EngineError};

/// First date on or after `from` that falls on `weekday` (0 = Sunday).
pub fn next_on_or_after(from: NaiveDate, weekday: WeekdayIndex) -> NaiveDate {
    let ahead = (i64::from(weekday) - i64::from(weekday_index(from))).rem_euclid(7);
    from + TimeDelta::days(ahead)
}

/// Candidate dates for the next `weeks` weeks starting at `today`, clipped to
/// the fixed booking's start and end dates.
pub fn occurrence_dates(fixed: &FixedBooking, today: NaiveDate, weeks: u32) -> Vec<NaiveDate> {
    (0..weeks)
        .map(|week| next_on_or_after(today + TimeDelta::weeks(i64::from(week)), fixed.weekday))
        .filter(|d| *d >= fixed.start_date)
        .filter(|d| fixed.end_date.is_none_or(|end| *d <= end))
        .collect()
}

impl Engine {
    /// Make sure every upcoming occurrence of an active fixed booking exists.
    ///
    /// Each occurrence is its own reservation, run concurrently. A slot
    /// someone else holds is skipped, whoever holds it. Returns the bookings
    /// created by this call; running it twice creates nothing the second time.
    pub async fn ensure_occurrences(
        &self,
        fixed: &FixedBooking,
        weeks: u32,
    ) -> Result<Vec<Booking>, EngineError> {
        if fixed.status != FixedStatus::Active {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut keys = Vec::new();
        for date in occurrence_dates(fixed, now.date_naive(), weeks) {
            if is_past_slot(date, fixed.hour, &now) {
                continue;
            }
            let key = SlotKey::new(date, fixed.resource_id.as_str(), fixed.hour);
            if self.get_booking(&key).await.is_none() {
                keys.push(key);
            }
        }

        let attempts = keys
            .into_iter()
            .map(|key| self.reserve(key, fixed.owner(), Origin::Fixed(fixed.id)));
        let mut created = Vec::new();
        for result in join_all(attempts).await {
            match result {
                Ok(booking) => created.push(booking),
                Err(EngineError::SlotTaken(key)) => {
                    debug!(fixed = %fixed.id, key = %key, "occurrence slot already taken");
                }
                Err(e) => return Err(e),
            }
        }

        if !created.is_empty() {
            metrics::counter!(OCCURRENCES_MATERIALIZED_TOTAL).increment(created.len() as u64);
            debug!(fixed = %fixed.id, created = created.len(), "occurrences materialized");
        }
        Ok(created)
    }

    /// Roll every active fixed booking's window forward. Returns how many
    /// bookings were created.
    pub async fn ensure_all_occurrences(&self, weeks: u32) -> Result<usize, EngineError> {
        let mut active = Vec::new();
        for shared in self.fixed_handles() {
            let fixed = shared.read().await;
            if fixed.status == FixedStatus::Active {
                active.push(fixed.clone());
            }
        }

        let mut created = 0;
        for fixed in &active {
            created += self.ensure_occurrences(fixed, weeks).await?.len();
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tuesday_eight_pm() -> FixedBooking {
        FixedBooking {
            id: Ulid::new(),
            user_id: "u1".into(),
            name: "Ana Paz".into(),
            phone: "1".into(),
            resource_id: "B".into(),
            weekday: 2,
            hour: 20,
            status: FixedStatus::Active,
            start_date: date(2024, 1, 1),
            end_date: None,
            cancelled_by: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn next_weekday_includes_today() {
        let monday = date(2024, 3, 4);
        assert_eq!(next_on_or_after(monday, 1), monday);
        assert_eq!(next_on_or_after(monday, 2), date(2024, 3, 5));
        assert_eq!(next_on_or_after(monday, 0), date(2024, 3, 10));
        assert_eq!(next_on_or_after(date(2024, 3, 9), 0), date(2024, 3, 10));
    }

    #[test]
    fn four_weeks_of_tuesdays() {
        let dates = occurrence_dates(&tuesday_eight_pm(), date(2024, 3, 4), 4);
        assert_eq!(
            dates,
            vec![date(2024, 3, 5), date(2024, 3, 12), date(2024, 3, 19), date(2024, 3, 26)]
        );
    }

    #[test]
    fn window_clipped_by_start_and_end() {
        let mut fixed = tuesday_eight_pm();
        fixed.start_date = date(2024, 3, 12);
        fixed.end_date = Some(date(2024, 3, 19));
        let dates = occurrence_dates(&fixed, date(2024, 3, 4), 4);
        assert_eq!(dates, vec![date(2024, 3, 12), date(2024, 3, 19)]);
    }

    #[test]
    fn zero_weeks_is_empty() {
        assert!(occurrence_dates(&tuesday_eight_pm(), date(2024, 3, 4), 0).is_empty());
    }
}
