use crate::engine::EngineError;
use crate::model::SlotKey;

/// Why a booking request did not go through. `Display` gives the message
/// shown to the person who asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    SlotTaken(SlotKey),
    NotFound,
    InvalidToken,
    OneBookingPerDay,
    TooLateToCancel,
    AlreadyFixed,
    DuplicateFixed,
    SlotInPast,
    ProfileIncomplete,
    UserBlocked,
    NotOwner,
    NotAdmin,
    SlotClosed,
    FixedCancelled,
    InvalidInput(&'static str),
    /// The journal could not be written.
    Store(String),
}

impl BookingError {
    /// A refusal under the booking rules, as opposed to a fault.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, BookingError::Store(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingError::SlotTaken(_) => "slot_taken",
            BookingError::NotFound => "not_found",
            BookingError::InvalidToken => "invalid_token",
            BookingError::OneBookingPerDay => "one_booking_per_day",
            BookingError::TooLateToCancel => "too_late_to_cancel",
            BookingError::AlreadyFixed => "already_fixed",
            BookingError::DuplicateFixed => "duplicate_fixed",
            BookingError::SlotInPast => "slot_in_past",
            BookingError::ProfileIncomplete => "profile_incomplete",
            BookingError::UserBlocked => "user_blocked",
            BookingError::NotOwner => "not_owner",
            BookingError::NotAdmin => "not_admin",
            BookingError::SlotClosed => "slot_closed",
            BookingError::FixedCancelled => "fixed_cancelled",
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::SlotTaken(_) => {
                write!(f, "someone else just took this slot, please pick another one")
            }
            BookingError::NotFound => write!(f, "booking not found"),
            BookingError::InvalidToken => write!(f, "this confirmation link is not valid"),
            BookingError::OneBookingPerDay => write!(f, "you already have a booking on this day"),
            BookingError::TooLateToCancel => {
                write!(f, "it is too late to cancel this booking")
            }
            BookingError::AlreadyFixed => write!(f, "this booking is already a fixed booking"),
            BookingError::DuplicateFixed => {
                write!(f, "you already have a fixed booking at this day and time")
            }
            BookingError::SlotInPast => write!(f, "this slot has already started"),
            BookingError::ProfileIncomplete => {
                write!(f, "complete your name and phone number before booking")
            }
            BookingError::UserBlocked => write!(f, "your account cannot make bookings"),
            BookingError::NotOwner => write!(f, "this booking belongs to someone else"),
            BookingError::NotAdmin => write!(f, "only administrators can do this"),
            BookingError::SlotClosed => write!(f, "the court is closed at this time"),
            BookingError::FixedCancelled => write!(f, "this fixed booking was cancelled"),
            BookingError::InvalidInput(why) => write!(f, "invalid request: {why}"),
            BookingError::Store(e) => write!(f, "booking store unavailable: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<EngineError> for BookingError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::SlotTaken(key) => BookingError::SlotTaken(key),
            EngineError::NotFound(_) | EngineError::FixedNotFound(_) => BookingError::NotFound,
            EngineError::InvalidToken(_) => BookingError::InvalidToken,
            EngineError::AlreadyFixed(_) => BookingError::AlreadyFixed,
            EngineError::DuplicateFixed(_) => BookingError::DuplicateFixed,
            EngineError::FixedCancelled(_) => BookingError::FixedCancelled,
            EngineError::Rejected(why) | EngineError::LimitExceeded(why) => {
                BookingError::InvalidInput(why)
            }
            EngineError::WalError(e) => BookingError::Store(e),
        }
    }
}
