use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::schedule::DayHours;

use super::availability::day_availability;
use super::Engine;

impl Engine {
    pub async fn get_booking(&self, key: &SlotKey) -> Option<Booking> {
        let day = self.get_day(key.date)?;
        let state = day.read().await;
        state.get(key).cloned()
    }

    /// All bookings on `date`, ordered by resource then hour.
    pub async fn bookings_on(&self, date: NaiveDate) -> Vec<Booking> {
        let Some(day) = self.get_day(date) else {
            return Vec::new();
        };
        let state = day.read().await;
        state.bookings().cloned().collect()
    }

    /// Every booking held by `user_id`, in key order.
    pub async fn bookings_for_owner(&self, user_id: &str) -> Vec<Booking> {
        let keys: Vec<SlotKey> = match self.owner_index.get(user_id) {
            Some(keys) => keys.iter().cloned().collect(),
            None => return Vec::new(),
        };
        let mut out = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(b) = self.get_booking(key).await {
                out.push(b);
            }
        }
        out
    }

    pub async fn booking_count(&self) -> usize {
        let mut total = 0;
        for day in self.day_handles() {
            total += day.read().await.len();
        }
        total
    }

    pub async fn get_fixed(&self, id: &Ulid) -> Option<FixedBooking> {
        let shared = self.get_fixed_shared(id)?;
        let fixed = shared.read().await;
        Some(fixed.clone())
    }

    /// Every fixed booking, cancelled ones included, by weekday, hour and
    /// resource.
    pub async fn fixed_bookings(&self) -> Vec<FixedBooking> {
        let mut out = Vec::new();
        for shared in self.fixed_handles() {
            out.push(shared.read().await.clone());
        }
        out.sort_by(|a, b| {
            (a.weekday, a.hour, &a.resource_id, a.id).cmp(&(b.weekday, b.hour, &b.resource_id, b.id))
        });
        out
    }

    pub async fn fixed_for_owner(&self, user_id: &str) -> Vec<FixedBooking> {
        let mut out = self.fixed_bookings().await;
        out.retain(|f| f.user_id == user_id);
        out
    }

    /// The owner's non-cancelled fixed booking on that weekly slot, if any.
    pub async fn find_live_fixed(
        &self,
        user_id: &str,
        resource_id: &str,
        weekday: WeekdayIndex,
        hour: u8,
    ) -> Option<FixedBooking> {
        for shared in self.fixed_handles() {
            let fixed = shared.read().await;
            if fixed.occupies(user_id, resource_id, weekday, hour) {
                return Some(fixed.clone());
            }
        }
        None
    }

    /// Hour grid for `date` over the given resources and their hours that day.
    pub async fn compute_availability(
        &self,
        date: NaiveDate,
        resources: &[(String, DayHours)],
        closed: bool,
    ) -> Vec<ResourceAvailability> {
        let now = self.clock.now();
        match self.get_day(date) {
            Some(day) => {
                let state = day.read().await;
                day_availability(date, resources, closed, &state, &now)
            }
            None => day_availability(date, resources, closed, &DayState::new(date), &now),
        }
    }
}
