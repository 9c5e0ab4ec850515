mod error;

pub use error::BookingError;

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::{is_past_slot, is_too_late_to_cancel};
use crate::config::{Config, DEFAULT_CANCEL_CUTOFF_MINUTES, DEFAULT_WEEKS_AHEAD};
use crate::engine::{Engine, EngineError, Response};
use crate::link::{confirmation_link, parse_confirmation_link};
use crate::model::*;
use crate::observability::BOOKING_REJECTIONS_TOTAL;
use crate::profile::{Profile, ProfileStore};
use crate::schedule::ScheduleStore;

// Refusals raised by guards that run under the engine's day lock.
const ONE_PER_DAY: &str = "one booking per day";
const NOT_OWNER: &str = "booking belongs to someone else";
const TOO_LATE: &str = "past the cancellation cutoff";

fn rule_error(e: EngineError) -> BookingError {
    match e {
        EngineError::Rejected(ONE_PER_DAY) => BookingError::OneBookingPerDay,
        EngineError::Rejected(NOT_OWNER) => BookingError::NotOwner,
        EngineError::Rejected(TOO_LATE) => BookingError::TooLateToCancel,
        other => other.into(),
    }
}

/// Policy knobs the coordinator applies on top of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub weeks_ahead: u32,
    pub cancel_cutoff_minutes: i64,
    pub public_origin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            weeks_ahead: DEFAULT_WEEKS_AHEAD,
            cancel_cutoff_minutes: DEFAULT_CANCEL_CUTOFF_MINUTES,
            public_origin: Config::default().public_origin,
        }
    }
}

impl From<&Config> for Settings {
    fn from(cfg: &Config) -> Self {
        Self {
            weeks_ahead: cfg.weeks_ahead,
            cancel_cutoff_minutes: cfg.cancel_cutoff_minutes,
            public_origin: cfg.public_origin.clone(),
        }
    }
}

/// Contact details for a booking entered by an administrator on behalf of
/// someone without an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkIn {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// A new fixed booking and the occurrences created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub fixed: FixedBooking,
    pub materialized: Vec<Booking>,
}

/// Applies the booking rules (profiles, schedule, cutoffs, roles) and drives
/// the engine. Every mutation attempt refreshes the cached availability of
/// the dates it touched, whether it succeeded or not.
pub struct Coordinator {
    engine: Arc<Engine>,
    profiles: Arc<dyn ProfileStore>,
    schedules: Arc<dyn ScheduleStore>,
    settings: Settings,
    cache: DashMap<NaiveDate, Vec<ResourceAvailability>>,
}

impl Coordinator {
    pub fn new(
        engine: Arc<Engine>,
        profiles: Arc<dyn ProfileStore>,
        schedules: Arc<dyn ScheduleStore>,
        settings: Settings,
    ) -> Self {
        Self {
            engine,
            profiles,
            schedules,
            settings,
            cache: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Patron operations ────────────────────────────────────────

    pub async fn book(
        &self,
        user_id: &str,
        date: NaiveDate,
        resource_id: &str,
        hour: u8,
    ) -> Result<Booking, BookingError> {
        let result = self.try_book(user_id, SlotKey::new(date, resource_id, hour)).await;
        self.refresh(date).await;
        self.finish("book", result)
    }

    async fn try_book(&self, user_id: &str, key: SlotKey) -> Result<Booking, BookingError> {
        let profile = self.bookable_profile(user_id).await?;
        self.check_slot_open(&key).await?;

        let owner = Owner {
            user_id: Some(user_id.to_string()),
            name: profile.display_name(),
            phone: profile.phone.trim().to_string(),
        };
        let uid = user_id.to_string();
        let one_per_day = move |day: &DayState| {
            if day.owned_by(&uid).next().is_some() {
                Err(EngineError::Rejected(ONE_PER_DAY))
            } else {
                Ok(())
            }
        };
        self.engine
            .reserve_guarded(key, owner, Origin::Direct, one_per_day)
            .await
            .map_err(rule_error)
    }

    pub async fn cancel(&self, user_id: &str, key: &SlotKey) -> Result<Booking, BookingError> {
        let result = self.try_cancel(user_id, key).await;
        self.refresh(key.date).await;
        self.finish("cancel", result)
    }

    async fn try_cancel(&self, user_id: &str, key: &SlotKey) -> Result<Booking, BookingError> {
        let uid = user_id.to_string();
        let clock = self.engine.clock().clone();
        let cutoff = self.settings.cancel_cutoff_minutes;
        let may_cancel = move |booking: &Booking| {
            if !booking.is_owned_by(&uid) {
                return Err(EngineError::Rejected(NOT_OWNER));
            }
            let key = &booking.key;
            if is_too_late_to_cancel(key.date, key.hour, &clock.now(), cutoff) {
                return Err(EngineError::Rejected(TOO_LATE));
            }
            Ok(())
        };

        // Fail fast without the write lock; the engine checks again under it,
        // since the slot may change hands in between.
        let booking = self.engine.get_booking(key).await.ok_or(BookingError::NotFound)?;
        may_cancel.clone()(&booking).map_err(rule_error)?;
        self.engine.release_guarded(key, may_cancel).await.map_err(rule_error)
    }

    /// Turn one of the user's bookings into a weekly fixed booking and
    /// materialize its upcoming weeks.
    pub async fn promote_to_fixed(
        &self,
        user_id: &str,
        key: &SlotKey,
    ) -> Result<Promotion, BookingError> {
        let result = self.try_promote(user_id, key).await;
        self.refresh(key.date).await;
        if let Ok(promotion) = &result {
            self.refresh_all(promotion.materialized.iter().map(|b| b.key.date)).await;
        }
        self.finish("promote", result)
    }

    async fn try_promote(&self, user_id: &str, key: &SlotKey) -> Result<Promotion, BookingError> {
        let uid = user_id.to_string();
        let owns = move |booking: &Booking| {
            if booking.is_owned_by(&uid) { Ok(()) } else { Err(EngineError::Rejected(NOT_OWNER)) }
        };
        let booking = self.engine.get_booking(key).await.ok_or(BookingError::NotFound)?;
        owns.clone()(&booking).map_err(rule_error)?;
        let fixed = self.engine.promote_guarded(key, owns).await.map_err(rule_error)?;
        let materialized = self.materialize(&fixed).await;
        Ok(Promotion { fixed, materialized })
    }

    /// Pause, resume or cancel a fixed booking, as its owner or an admin.
    pub async fn set_fixed_status(
        &self,
        actor_id: &str,
        fixed_id: Ulid,
        status: FixedStatus,
    ) -> Result<FixedBooking, BookingError> {
        let result = self.try_set_fixed_status(actor_id, fixed_id, status).await;
        self.finish("set_fixed_status", result)
    }

    pub async fn cancel_fixed(
        &self,
        actor_id: &str,
        fixed_id: Ulid,
    ) -> Result<FixedBooking, BookingError> {
        self.set_fixed_status(actor_id, fixed_id, FixedStatus::Cancelled).await
    }

    async fn try_set_fixed_status(
        &self,
        actor_id: &str,
        fixed_id: Ulid,
        status: FixedStatus,
    ) -> Result<FixedBooking, BookingError> {
        let fixed = self.engine.get_fixed(&fixed_id).await.ok_or(BookingError::NotFound)?;
        let role = if fixed.user_id == actor_id {
            ActorRole::Owner
        } else if self.is_admin(actor_id).await {
            ActorRole::Admin
        } else {
            return Err(BookingError::NotOwner);
        };

        let updated = self.engine.set_fixed_status(fixed_id, status, role).await?;
        if updated.status == FixedStatus::Active {
            let created = self.materialize(&updated).await;
            self.refresh_all(created.iter().map(|b| b.key.date)).await;
        }
        Ok(updated)
    }

    // ── Administrative operations ────────────────────────────────

    pub async fn admin_move(
        &self,
        admin_id: &str,
        from: &SlotKey,
        to: SlotKey,
    ) -> Result<Booking, BookingError> {
        let to_date = to.date;
        let result = self.try_admin_move(admin_id, from, to).await;
        self.refresh(from.date).await;
        if to_date != from.date {
            self.refresh(to_date).await;
        }
        self.finish("admin_move", result)
    }

    async fn try_admin_move(
        &self,
        admin_id: &str,
        from: &SlotKey,
        to: SlotKey,
    ) -> Result<Booking, BookingError> {
        self.require_admin(admin_id).await?;
        Ok(self.engine.move_booking(from, to).await?)
    }

    /// Book a slot for someone without an account.
    pub async fn admin_manual_create(
        &self,
        admin_id: &str,
        date: NaiveDate,
        resource_id: &str,
        hour: u8,
        walk_in: WalkIn,
    ) -> Result<Booking, BookingError> {
        let key = SlotKey::new(date, resource_id, hour);
        let result = self.try_manual_create(admin_id, key, walk_in).await;
        self.refresh(date).await;
        self.finish("admin_manual_create", result)
    }

    async fn try_manual_create(
        &self,
        admin_id: &str,
        key: SlotKey,
        walk_in: WalkIn,
    ) -> Result<Booking, BookingError> {
        self.require_admin(admin_id).await?;
        let first = walk_in.first_name.trim();
        let last = walk_in.last_name.trim();
        let phone = walk_in.phone.trim();
        if first.is_empty() || last.is_empty() || phone.is_empty() {
            return Err(BookingError::InvalidInput("first name, last name and phone are required"));
        }
        self.check_slot_open(&key).await?;

        let owner = Owner {
            user_id: None,
            name: format!("{first} {last}"),
            phone: phone.to_string(),
        };
        Ok(self.engine.reserve(key, owner, Origin::AdminManual).await?)
    }

    pub async fn admin_cancel(&self, admin_id: &str, key: &SlotKey) -> Result<Booking, BookingError> {
        let result = self.try_admin_cancel(admin_id, key).await;
        self.refresh(key.date).await;
        self.finish("admin_cancel", result)
    }

    async fn try_admin_cancel(&self, admin_id: &str, key: &SlotKey) -> Result<Booking, BookingError> {
        self.require_admin(admin_id).await?;
        Ok(self.engine.release(key).await?)
    }

    // ── Attendance confirmation ──────────────────────────────────

    pub fn confirmation_link(&self, booking: &Booking) -> Result<String, BookingError> {
        confirmation_link(&self.settings.public_origin, booking)
            .map_err(|_| BookingError::InvalidInput("public origin is not a valid URL"))
    }

    pub async fn respond_confirmation(
        &self,
        key: &SlotKey,
        token: &str,
        will_attend: bool,
    ) -> Result<Response, BookingError> {
        let result = self.engine.respond(key, token, will_attend).await.map_err(Into::into);
        self.refresh(key.date).await;
        self.finish("respond", result)
    }

    pub async fn respond_to_link(&self, link: &str, will_attend: bool) -> Result<Response, BookingError> {
        let Some(pending) = parse_confirmation_link(link) else {
            return self.finish("respond", Err(BookingError::InvalidInput("malformed confirmation link")));
        };
        self.respond_confirmation(&pending.key, &pending.token, will_attend).await
    }

    // ── Queries ──────────────────────────────────────────────────

    /// The hour grid for `date` across every resource, computed now.
    pub async fn availability(&self, date: NaiveDate) -> Vec<ResourceAvailability> {
        let closed = self.schedules.holidays().await.contains(&date);
        let mut resources = Vec::new();
        for id in self.schedules.resources().await {
            if let Some(weekly) = self.schedules.weekly_schedule(&id).await {
                resources.push((id, weekly.for_date(date)));
            }
        }
        self.engine.compute_availability(date, &resources, closed).await
    }

    /// Recompute the grid for `date` and cache it.
    pub async fn refresh(&self, date: NaiveDate) -> Vec<ResourceAvailability> {
        let grid = self.availability(date).await;
        self.cache.insert(date, grid.clone());
        grid
    }

    async fn refresh_all(&self, dates: impl Iterator<Item = NaiveDate>) {
        let mut dates: Vec<NaiveDate> = dates.collect();
        dates.sort();
        dates.dedup();
        for date in dates {
            self.refresh(date).await;
        }
    }

    /// The grid as of the last mutation attempt on `date`, if any.
    pub fn cached_availability(&self, date: NaiveDate) -> Option<Vec<ResourceAvailability>> {
        self.cache.get(&date).map(|e| e.value().clone())
    }

    /// The user's bookings that have not started yet.
    pub async fn my_bookings(&self, user_id: &str) -> Vec<Booking> {
        let now = self.engine.clock().now();
        let mut bookings = self.engine.bookings_for_owner(user_id).await;
        bookings.retain(|b| !is_past_slot(b.key.date, b.key.hour, &now));
        bookings
    }

    /// Live fixed bookings: all of them for an admin, otherwise the actor's own.
    pub async fn fixed_bookings_for(&self, actor_id: &str) -> Vec<FixedBooking> {
        let mut fixed = if self.is_admin(actor_id).await {
            self.engine.fixed_bookings().await
        } else {
            self.engine.fixed_for_owner(actor_id).await
        };
        fixed.retain(|f| f.status != FixedStatus::Cancelled);
        fixed
    }

    /// Roll every active fixed booking forward and drop stale cached grids,
    /// including those for days already gone.
    pub async fn materialize_all(&self) -> Result<usize, BookingError> {
        let created = self.engine.ensure_all_occurrences(self.settings.weeks_ahead).await?;
        if created > 0 {
            self.cache.clear();
        } else {
            let today = self.engine.clock().today();
            self.cache.retain(|date, _| *date >= today);
        }
        Ok(created)
    }

    // ── Helpers ──────────────────────────────────────────────────

    async fn materialize(&self, fixed: &FixedBooking) -> Vec<Booking> {
        match self.engine.ensure_occurrences(fixed, self.settings.weeks_ahead).await {
            Ok(created) => created,
            Err(e) => {
                // The fixed booking itself is durable; the next sweep retries.
                warn!(fixed = %fixed.id, "materialization failed: {e}");
                Vec::new()
            }
        }
    }

    async fn bookable_profile(&self, user_id: &str) -> Result<Profile, BookingError> {
        let profile = self
            .profiles
            .get_profile(user_id)
            .await
            .ok_or(BookingError::ProfileIncomplete)?;
        if profile.is_blocked {
            return Err(BookingError::UserBlocked);
        }
        if !profile.is_complete() {
            return Err(BookingError::ProfileIncomplete);
        }
        Ok(profile)
    }

    async fn check_slot_open(&self, key: &SlotKey) -> Result<(), BookingError> {
        let now = self.engine.clock().now();
        if is_past_slot(key.date, key.hour, &now) {
            return Err(BookingError::SlotInPast);
        }
        if !self.schedules.is_open(key.date, &key.resource_id, key.hour).await {
            return Err(BookingError::SlotClosed);
        }
        Ok(())
    }

    async fn is_admin(&self, user_id: &str) -> bool {
        self.profiles
            .get_profile(user_id)
            .await
            .is_some_and(|p| p.is_admin && !p.is_blocked)
    }

    async fn require_admin(&self, user_id: &str) -> Result<(), BookingError> {
        if self.is_admin(user_id).await {
            Ok(())
        } else {
            Err(BookingError::NotAdmin)
        }
    }

    fn finish<T>(&self, op: &'static str, result: Result<T, BookingError>) -> Result<T, BookingError> {
        match &result {
            Ok(_) => info!(op, "ok"),
            Err(e) if e.is_business_rule() => {
                metrics::counter!(BOOKING_REJECTIONS_TOTAL, "reason" => e.label()).increment(1);
                info!(op, reason = e.label(), "refused");
            }
            Err(e) => warn!(op, "failed: {e}"),
        }
        result
    }
}
