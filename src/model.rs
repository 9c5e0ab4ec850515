use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, always server-assigned.
pub type Ms = i64;

/// Day of week, 0 = Sunday .. 6 = Saturday.
pub type WeekdayIndex = u8;

pub fn weekday_index(date: NaiveDate) -> WeekdayIndex {
    date.weekday().num_days_from_sunday() as WeekdayIndex
}

// ── Slot identity ────────────────────────────────────────────────

/// One hour of one resource on one calendar date, and the identity of the
/// booking that occupies it. Rendered as `YYYY-MM-DD_<resource>_<hour>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub resource_id: String,
    pub hour: u8,
}

impl SlotKey {
    pub fn new(date: NaiveDate, resource_id: impl Into<String>, hour: u8) -> Self {
        Self {
            date,
            resource_id: resource_id.into(),
            hour,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.date.format("%Y-%m-%d"), self.resource_id, self.hour)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSlotKey(pub String);

impl fmt::Display for InvalidSlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid slot key: {}", self.0)
    }
}

impl std::error::Error for InvalidSlotKey {}

impl FromStr for SlotKey {
    type Err = InvalidSlotKey;

    /// The date never contains `_` and the hour is the last segment, so the
    /// resource id in between may contain underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSlotKey(s.to_string());
        let (date, rest) = s.split_once('_').ok_or_else(invalid)?;
        let (resource_id, hour) = rest.rsplit_once('_').ok_or_else(invalid)?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        if resource_id.is_empty() || hour > 23 {
            return Err(invalid());
        }
        Ok(Self::new(date, resource_id, hour))
    }
}

// ── Bookings ─────────────────────────────────────────────────────

/// Who a booking or fixed booking is held for. `user_id` is `None` for
/// walk-ins entered by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: Option<String>,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Reserved,
    Confirmed,
}

/// How a booking came to exist. A fixed-origin booking always carries the id
/// of the fixed booking it was materialized from (or promoted into).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Direct,
    Fixed(Ulid),
    AdminManual,
}

impl Origin {
    pub fn label(&self) -> &'static str {
        match self {
            Origin::Direct => "direct",
            Origin::Fixed(_) => "fixed",
            Origin::AdminManual => "admin_manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub key: SlotKey,
    pub owner: Owner,
    pub status: BookingStatus,
    /// `None` only on records written before tokens existed.
    pub confirmation_token: Option<String>,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
    pub confirmed_at: Option<Ms>,
    pub origin: Origin,
}

impl Booking {
    pub fn linked_fixed_id(&self) -> Option<Ulid> {
        match self.origin {
            Origin::Fixed(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner.user_id.as_deref() == Some(user_id)
    }

    /// The token a confirmation link must carry. Legacy records without a
    /// stored token fall back to the booking's own key.
    pub fn expected_token(&self) -> String {
        match &self.confirmation_token {
            Some(token) => token.clone(),
            None => self.key.to_string(),
        }
    }

    pub fn accepts_token(&self, supplied: &str) -> bool {
        match &self.confirmation_token {
            Some(token) => token == supplied,
            None => self.key.to_string() == supplied,
        }
    }
}

// ── Fixed (weekly) bookings ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixedStatus {
    Active,
    Paused,
    Cancelled,
}

impl FixedStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FixedStatus::Active => "active",
            FixedStatus::Paused => "paused",
            FixedStatus::Cancelled => "cancelled",
        }
    }
}

/// Whether a fixed-booking change was made by its owner or an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRole {
    Owner,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBooking {
    pub id: Ulid,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub resource_id: String,
    pub weekday: WeekdayIndex,
    pub hour: u8,
    pub status: FixedStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub cancelled_by: Option<ActorRole>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl FixedBooking {
    pub fn owner(&self) -> Owner {
        Owner {
            user_id: Some(self.user_id.clone()),
            name: self.name.clone(),
            phone: self.phone.clone(),
        }
    }

    /// Same user, same weekly slot, and still counts (not cancelled).
    pub fn occupies(&self, user_id: &str, resource_id: &str, weekday: WeekdayIndex, hour: u8) -> bool {
        self.status != FixedStatus::Cancelled
            && self.user_id == user_id
            && self.resource_id == resource_id
            && self.weekday == weekday
            && self.hour == hour
    }
}

/// A confirmation request parsed from an inbound link. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub key: SlotKey,
    pub token: String,
}

// ── Per-day state ────────────────────────────────────────────────

/// All bookings on one calendar date. A day is the unit of locking: every
/// check-and-write against a slot happens under the day's write lock.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    slots: BTreeMap<SlotKey, Booking>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            slots: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &SlotKey) -> Option<&Booking> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: &SlotKey) -> Option<&mut Booking> {
        self.slots.get_mut(key)
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn insert(&mut self, booking: Booking) -> Option<Booking> {
        debug_assert_eq!(booking.key.date, self.date, "booking filed under the wrong day");
        self.slots.insert(booking.key.clone(), booking)
    }

    pub fn remove(&mut self, key: &SlotKey) -> Option<Booking> {
        self.slots.remove(key)
    }

    /// Bookings in key order (resource, then hour).
    pub fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.slots.values()
    }

    pub fn owned_by<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a Booking> {
        self.slots.values().filter(move |b| b.is_owned_by(user_id))
    }

    pub fn on_resource<'a>(&'a self, resource_id: &'a str) -> impl Iterator<Item = &'a Booking> {
        self.slots.values().filter(move |b| b.key.resource_id == resource_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The journal record format. Each record is applied atomically, so a
/// multi-step change (a move, a promotion) is always a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingReserved {
        booking: Booking,
    },
    /// `booking` is the full record at its new key; `from` is removed.
    BookingMoved {
        from: SlotKey,
        booking: Booking,
    },
    BookingConfirmed {
        key: SlotKey,
        at: Ms,
    },
    BookingReleased {
        key: SlotKey,
    },
    /// Creates `fixed` and stamps the booking at `from` with its id.
    FixedPromoted {
        fixed: FixedBooking,
        from: SlotKey,
    },
    /// Snapshot form of a fixed booking, written only by compaction.
    FixedRestored {
        fixed: FixedBooking,
    },
    FixedStatusChanged {
        id: Ulid,
        status: FixedStatus,
        cancelled_by: Option<ActorRole>,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub hour: u8,
    /// Start time is at or before now in the operating timezone.
    pub past: bool,
    pub booking: Option<Booking>,
}

impl SlotView {
    pub fn is_free(&self) -> bool {
        !self.past && self.booking.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAvailability {
    pub resource_id: String,
    pub slots: Vec<SlotView>,
}

impl ResourceAvailability {
    pub fn free_hours(&self) -> Vec<u8> {
        self.slots.iter().filter(|s| s.is_free()).map(|s| s.hour).collect()
    }

    pub fn slot(&self, hour: u8) -> Option<&SlotView> {
        self.slots.iter().find(|s| s.hour == hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn booking(key: SlotKey, user: Option<&str>) -> Booking {
        Booking {
            key,
            owner: Owner {
                user_id: user.map(str::to_string),
                name: "Ana Paz".into(),
                phone: "+54 11 5555".into(),
            },
            status: BookingStatus::Reserved,
            confirmation_token: Some("tok".into()),
            created_at: 0,
            updated_at: None,
            confirmed_at: None,
            origin: Origin::Direct,
        }
    }

    #[test]
    fn slot_key_renders_canonically() {
        let key = SlotKey::new(date(2024, 3, 5), "B", 20);
        assert_eq!(key.to_string(), "2024-03-05_B_20");
    }

    #[test]
    fn slot_key_parses_back() {
        let key: SlotKey = "2024-03-05_B_20".parse().unwrap();
        assert_eq!(key, SlotKey::new(date(2024, 3, 5), "B", 20));
    }

    #[test]
    fn slot_key_resource_may_contain_underscores() {
        let key: SlotKey = "2024-03-05_court_north_9".parse().unwrap();
        assert_eq!(key.resource_id, "court_north");
        assert_eq!(key.hour, 9);
        assert_eq!(key.to_string(), "2024-03-05_court_north_9");
    }

    #[test]
    fn slot_key_rejects_garbage() {
        assert!("".parse::<SlotKey>().is_err());
        assert!("2024-03-05".parse::<SlotKey>().is_err());
        assert!("2024-03-05_B".parse::<SlotKey>().is_err());
        assert!("2024-03-05__20".parse::<SlotKey>().is_err());
        assert!("2024-13-05_B_20".parse::<SlotKey>().is_err());
        assert!("2024-03-05_B_24".parse::<SlotKey>().is_err());
        assert!("2024-03-05_B_x".parse::<SlotKey>().is_err());
    }

    #[test]
    fn weekday_index_starts_on_sunday() {
        assert_eq!(weekday_index(date(2024, 3, 3)), 0); // Sunday
        assert_eq!(weekday_index(date(2024, 3, 4)), 1); // Monday
        assert_eq!(weekday_index(date(2024, 3, 9)), 6); // Saturday
    }

    #[test]
    fn token_check_uses_stored_token() {
        let b = booking(SlotKey::new(date(2024, 3, 5), "A", 18), Some("u1"));
        assert!(b.accepts_token("tok"));
        assert!(!b.accepts_token("2024-03-05_A_18"));
        assert_eq!(b.expected_token(), "tok");
    }

    #[test]
    fn legacy_booking_accepts_its_key_as_token() {
        let mut b = booking(SlotKey::new(date(2024, 3, 5), "A", 18), Some("u1"));
        b.confirmation_token = None;
        assert!(b.accepts_token("2024-03-05_A_18"));
        assert!(!b.accepts_token("tok"));
        assert_eq!(b.expected_token(), "2024-03-05_A_18");
    }

    #[test]
    fn linked_fixed_id_follows_origin() {
        let mut b = booking(SlotKey::new(date(2024, 3, 5), "A", 18), Some("u1"));
        assert_eq!(b.linked_fixed_id(), None);
        let id = Ulid::new();
        b.origin = Origin::Fixed(id);
        assert_eq!(b.linked_fixed_id(), Some(id));
    }

    #[test]
    fn day_state_filters_by_owner_and_resource() {
        let d = date(2024, 3, 5);
        let mut day = DayState::new(d);
        day.insert(booking(SlotKey::new(d, "A", 18), Some("u1")));
        day.insert(booking(SlotKey::new(d, "B", 19), Some("u2")));
        day.insert(booking(SlotKey::new(d, "A", 20), None));

        assert_eq!(day.len(), 3);
        assert_eq!(day.owned_by("u1").count(), 1);
        assert_eq!(day.owned_by("nobody").count(), 0);
        let hours: Vec<u8> = day.on_resource("A").map(|b| b.key.hour).collect();
        assert_eq!(hours, vec![18, 20]);
    }
}
