use tracing::{info, warn};

use crate::model::*;
use crate::observability::{CONFIRMATIONS_TOTAL, INVALID_TOKENS_TOTAL};

use super::{Engine, EngineError};

/// What an attendance response did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The booking is now confirmed.
    Confirmed(Booking),
    /// It was confirmed already; nothing was written.
    AlreadyConfirmed(Booking),
    /// Declined: the booking was released.
    Released(Booking),
    /// Declined, but the booking was already gone.
    AlreadyHandled,
}

impl Response {
    pub fn label(&self) -> &'static str {
        match self {
            Response::Confirmed(_) => "confirmed",
            Response::AlreadyConfirmed(_) => "already_confirmed",
            Response::Released(_) => "released",
            Response::AlreadyHandled => "already_handled",
        }
    }
}

impl Engine {
    /// Answer an attendance request for `key`. The token check and the
    /// resulting write happen under one day lock, so a wrong token never
    /// changes anything and two answers cannot interleave.
    pub async fn respond(
        &self,
        key: &SlotKey,
        token: &str,
        will_attend: bool,
    ) -> Result<Response, EngineError> {
        let _gate = self.gate.read().await;
        let missing = || {
            if will_attend {
                Err(EngineError::NotFound(key.clone()))
            } else {
                Ok(self.record(Response::AlreadyHandled))
            }
        };
        let Some(day) = self.get_day(key.date) else {
            return missing();
        };
        let mut state = day.write().await;

        let Some(booking) = state.get(key).cloned() else {
            return missing();
        };

        if !booking.accepts_token(token) {
            warn!(key = %key, "confirmation token mismatch");
            metrics::counter!(INVALID_TOKENS_TOTAL).increment(1);
            return Err(EngineError::InvalidToken(key.clone()));
        }

        if !will_attend {
            let removed = self.release_locked(&mut state, key).await?;
            info!(key = %key, "booking declined");
            return Ok(self.record(Response::Released(removed)));
        }

        if booking.status == BookingStatus::Confirmed {
            return Ok(self.record(Response::AlreadyConfirmed(booking)));
        }

        let event = Event::BookingConfirmed {
            key: key.clone(),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut state, &event).await?;
        let confirmed = state
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(key.clone()))?;
        info!(key = %key, "booking confirmed");
        Ok(self.record(Response::Confirmed(confirmed)))
    }

    fn record(&self, response: Response) -> Response {
        metrics::counter!(CONFIRMATIONS_TOTAL, "outcome" => response.label()).increment(1);
        response
    }
}
