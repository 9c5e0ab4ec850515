use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{RESERVATIONS_TOTAL, SLOT_CONFLICTS_TOTAL};

use super::{apply_to_day, apply_to_fixed, Engine, EngineError, WalCommand};

pub(super) fn new_token() -> String {
    Ulid::new().to_string()
}

pub(super) fn validate_key(key: &SlotKey) -> Result<(), EngineError> {
    if key.hour > MAX_HOUR {
        return Err(EngineError::LimitExceeded("hour out of range"));
    }
    if key.resource_id.is_empty() || key.resource_id.len() > MAX_RESOURCE_ID_LEN {
        return Err(EngineError::LimitExceeded("resource id length"));
    }
    Ok(())
}

fn validate_owner(owner: &Owner) -> Result<(), EngineError> {
    if owner.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    if owner.phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone too long"));
    }
    if let Some(user) = &owner.user_id
        && (user.is_empty() || user.len() > MAX_USER_ID_LEN)
    {
        return Err(EngineError::LimitExceeded("user id length"));
    }
    Ok(())
}

impl Engine {
    /// Create a booking at `key` if nobody holds it. First commit wins.
    pub async fn reserve(
        &self,
        key: SlotKey,
        owner: Owner,
        origin: Origin,
    ) -> Result<Booking, EngineError> {
        self.reserve_guarded(key, owner, origin, |_| Ok(())).await
    }

    /// Like [`Engine::reserve`], with `guard` evaluated against the day's
    /// bookings under the same write lock as the insert.
    pub async fn reserve_guarded<G>(
        &self,
        key: SlotKey,
        owner: Owner,
        origin: Origin,
        guard: G,
    ) -> Result<Booking, EngineError>
    where
        G: FnOnce(&DayState) -> Result<(), EngineError> + Send,
    {
        validate_key(&key)?;
        validate_owner(&owner)?;

        let _gate = self.gate.read().await;
        let day = self.day(key.date);
        let mut state = day.write().await;

        guard(&state)?;
        if state.contains(&key) {
            metrics::counter!(SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken(key));
        }

        let booking = Booking {
            key,
            owner,
            status: BookingStatus::Reserved,
            confirmation_token: Some(new_token()),
            created_at: self.clock.now_ms(),
            updated_at: None,
            confirmed_at: None,
            origin,
        };
        let event = Event::BookingReserved { booking: booking.clone() };
        self.persist_and_apply(&mut state, &event).await?;

        metrics::counter!(RESERVATIONS_TOTAL, "origin" => origin.label()).increment(1);
        debug!(key = %booking.key, origin = origin.label(), "reserved");
        Ok(booking)
    }

    /// Move a booking to another slot, keeping everything but its key.
    /// Both days are locked (in date order) and the move is one journal
    /// record, so it is never observed half-done.
    pub async fn move_booking(&self, from: &SlotKey, to: SlotKey) -> Result<Booking, EngineError> {
        validate_key(&to)?;
        let _gate = self.gate.read().await;
        let now = self.clock.now_ms();

        if from.date == to.date {
            let day = self.get_day(from.date).ok_or_else(|| EngineError::NotFound(from.clone()))?;
            let mut state = day.write().await;
            let current = state.get(from).cloned().ok_or_else(|| EngineError::NotFound(from.clone()))?;
            if *from != to && state.contains(&to) {
                metrics::counter!(SLOT_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::SlotTaken(to));
            }
            let moved = Booking { key: to, updated_at: Some(now), ..current };
            let event = Event::BookingMoved { from: from.clone(), booking: moved.clone() };
            self.persist_and_apply(&mut state, &event).await?;
            info!(from = %from, to = %moved.key, "booking moved");
            return Ok(moved);
        }

        let source = self.get_day(from.date).ok_or_else(|| EngineError::NotFound(from.clone()))?;
        // Checked again under the write lock; this only keeps a failed move
        // from leaving an empty target day behind.
        if !source.read().await.contains(from) {
            return Err(EngineError::NotFound(from.clone()));
        }
        let target = self.day(to.date);
        let (mut src, mut dst) = if from.date < to.date {
            let src = source.write_owned().await;
            (src, target.write_owned().await)
        } else {
            let dst = target.write_owned().await;
            (source.write_owned().await, dst)
        };

        let current = src.get(from).cloned().ok_or_else(|| EngineError::NotFound(from.clone()))?;
        if dst.contains(&to) {
            metrics::counter!(SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken(to));
        }

        let moved = Booking { key: to, updated_at: Some(now), ..current };
        let event = Event::BookingMoved { from: from.clone(), booking: moved.clone() };
        self.wal_append(&event).await?;
        apply_to_day(&mut src, &event, &self.owner_index);
        apply_to_day(&mut dst, &event, &self.owner_index);

        info!(from = %from, to = %moved.key, "booking moved");
        Ok(moved)
    }

    /// Delete the booking at `key`, returning what was removed.
    pub async fn release(&self, key: &SlotKey) -> Result<Booking, EngineError> {
        self.release_guarded(key, |_| Ok(())).await
    }

    /// Like [`Engine::release`], with `guard` run against the booking under
    /// the day's write lock. A rejecting guard leaves the booking in place.
    pub async fn release_guarded<G>(&self, key: &SlotKey, guard: G) -> Result<Booking, EngineError>
    where
        G: FnOnce(&Booking) -> Result<(), EngineError> + Send,
    {
        let _gate = self.gate.read().await;
        let day = self.get_day(key.date).ok_or_else(|| EngineError::NotFound(key.clone()))?;
        let mut state = day.write().await;
        let current = state.get(key).ok_or_else(|| EngineError::NotFound(key.clone()))?;
        guard(current)?;
        self.release_locked(&mut state, key).await
    }

    pub(super) async fn release_locked(
        &self,
        state: &mut DayState,
        key: &SlotKey,
    ) -> Result<Booking, EngineError> {
        let removed = state.get(key).cloned().ok_or_else(|| EngineError::NotFound(key.clone()))?;
        let event = Event::BookingReleased { key: key.clone() };
        self.persist_and_apply(state, &event).await?;
        debug!(key = %key, "released");
        Ok(removed)
    }

    /// Turn the booking at `key` into a weekly fixed booking starting on its
    /// date, and link the booking to it. Occurrences are not materialized here.
    pub async fn promote_to_fixed(&self, key: &SlotKey) -> Result<FixedBooking, EngineError> {
        self.promote_guarded(key, |_| Ok(())).await
    }

    /// Like [`Engine::promote_to_fixed`], with `guard` run against the
    /// booking under the day's write lock before anything else is checked.
    pub async fn promote_guarded<G>(&self, key: &SlotKey, guard: G) -> Result<FixedBooking, EngineError>
    where
        G: FnOnce(&Booking) -> Result<(), EngineError> + Send,
    {
        let _gate = self.gate.read().await;
        let _serial = self.promote_lock.lock().await;

        let day = self.get_day(key.date).ok_or_else(|| EngineError::NotFound(key.clone()))?;
        let mut state = day.write().await;
        let booking = state.get(key).cloned().ok_or_else(|| EngineError::NotFound(key.clone()))?;
        guard(&booking)?;

        if booking.linked_fixed_id().is_some() {
            return Err(EngineError::AlreadyFixed(key.clone()));
        }
        let Some(user_id) = booking.owner.user_id.clone() else {
            return Err(EngineError::Rejected("walk-in bookings cannot become fixed"));
        };
        let weekday = weekday_index(key.date);
        if let Some(existing) =
            self.find_live_fixed(&user_id, &key.resource_id, weekday, key.hour).await
        {
            return Err(EngineError::DuplicateFixed(existing.id));
        }

        let now = self.clock.now_ms();
        let fixed = FixedBooking {
            id: Ulid::new(),
            user_id,
            name: booking.owner.name.clone(),
            phone: booking.owner.phone.clone(),
            resource_id: key.resource_id.clone(),
            weekday,
            hour: key.hour,
            status: FixedStatus::Active,
            start_date: key.date,
            end_date: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::FixedPromoted { fixed: fixed.clone(), from: key.clone() };
        self.persist_and_apply(&mut state, &event).await?;
        self.fixed.insert(fixed.id, Arc::new(RwLock::new(fixed.clone())));

        info!(fixed = %fixed.id, from = %key, "promoted to fixed booking");
        Ok(fixed)
    }

    /// Change a fixed booking's status. Cancelled is terminal. Existing
    /// bookings are left alone whatever the new status.
    pub async fn set_fixed_status(
        &self,
        id: Ulid,
        status: FixedStatus,
        by: ActorRole,
    ) -> Result<FixedBooking, EngineError> {
        let _gate = self.gate.read().await;
        let shared = self.get_fixed_shared(&id).ok_or(EngineError::FixedNotFound(id))?;
        let mut record = shared.write().await;

        if record.status == FixedStatus::Cancelled {
            return Err(EngineError::FixedCancelled(id));
        }
        if record.status == status {
            return Ok(record.clone());
        }

        let cancelled_by = (status == FixedStatus::Cancelled).then_some(by);
        let event = Event::FixedStatusChanged {
            id,
            status,
            cancelled_by,
            at: self.clock.now_ms(),
        };
        self.wal_append(&event).await?;
        apply_to_fixed(&mut record, &event);

        info!(fixed = %id, status = status.label(), "fixed booking status changed");
        Ok(record.clone())
    }

    /// Rewrite the journal as one record per live booking and fixed booking.
    /// Mutations are held off until the new journal is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;

        let mut events = Vec::new();
        for shared in self.fixed_handles() {
            let fixed = shared.read().await;
            events.push(Event::FixedRestored { fixed: fixed.clone() });
        }
        for shared in self.day_handles() {
            let day = shared.read().await;
            for booking in day.bookings() {
                events.push(Event::BookingReserved { booking: booking.clone() });
            }
        }
        let records = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        // No mutation is in flight, so an empty day can only be refilled
        // through `day()`, which recreates it.
        let before = self.days.len();
        self.days
            .retain(|_, day| day.try_read().map(|state| !state.is_empty()).unwrap_or(true));
        let pruned = before.saturating_sub(self.days.len());

        info!(records, pruned, "journal compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
