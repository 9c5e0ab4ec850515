use url::Url;

use crate::model::{Booking, PendingConfirmation, SlotKey};

const KEY_PARAM: &str = "confirmBooking";
const TOKEN_PARAM: &str = "token";

/// Attendance link for `booking`: `origin?confirmBooking=<key>&token=<token>`.
/// Any query already on `origin` is replaced.
pub fn confirmation_link(origin: &str, booking: &Booking) -> Result<String, url::ParseError> {
    let mut url = Url::parse(origin)?;
    url.query_pairs_mut()
        .clear()
        .append_pair(KEY_PARAM, &booking.key.to_string())
        .append_pair(TOKEN_PARAM, &booking.expected_token());
    Ok(url.into())
}

/// Pull the key and token out of an attendance link. Both must be present
/// and the key well-formed.
pub fn parse_confirmation_link(link: &str) -> Option<PendingConfirmation> {
    let url = Url::parse(link).ok()?;
    let mut key = None;
    let mut token = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            KEY_PARAM => key = Some(value.into_owned()),
            TOKEN_PARAM => token = Some(value.into_owned()),
            _ => {}
        }
    }
    let key: SlotKey = key?.parse().ok()?;
    let token = token.filter(|t| !t.is_empty())?;
    Some(PendingConfirmation { key, token })
}
