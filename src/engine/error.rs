use ulid::Ulid;

use crate::model::SlotKey;

#[derive(Debug)]
pub enum EngineError {
    SlotTaken(SlotKey),
    NotFound(SlotKey),
    FixedNotFound(Ulid),
    InvalidToken(SlotKey),
    /// The booking is already linked to a fixed booking.
    AlreadyFixed(SlotKey),
    /// The owner already holds a live fixed booking on that weekly slot.
    DuplicateFixed(Ulid),
    FixedCancelled(Ulid),
    /// A caller-supplied guard refused the write.
    Rejected(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotTaken(key) => write!(f, "slot already taken: {key}"),
            EngineError::NotFound(key) => write!(f, "no booking at {key}"),
            EngineError::FixedNotFound(id) => write!(f, "fixed booking not found: {id}"),
            EngineError::InvalidToken(key) => write!(f, "invalid confirmation token for {key}"),
            EngineError::AlreadyFixed(key) => {
                write!(f, "booking {key} is already part of a fixed booking")
            }
            EngineError::DuplicateFixed(id) => {
                write!(f, "an equivalent fixed booking already exists: {id}")
            }
            EngineError::FixedCancelled(id) => write!(f, "fixed booking {id} is cancelled"),
            EngineError::Rejected(why) => write!(f, "rejected: {why}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
