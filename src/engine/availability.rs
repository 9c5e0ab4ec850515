use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::clock::is_past_slot;
use crate::model::*;
use crate::schedule::DayHours;

// ── Availability grid ────────────────────────────────────────────

/// Build the hour grid for one date.
///
/// Each resource gets its opening hours for that weekday (none when `closed`,
/// i.e. a holiday), plus any hour that holds a booking outside those hours
/// so nothing booked is hidden. Hours are ascending; each carries the booking
/// at that key, if any, and whether its start time has passed.
pub fn day_availability(
    date: NaiveDate,
    resources: &[(String, DayHours)],
    closed: bool,
    day: &DayState,
    now: &DateTime<FixedOffset>,
) -> Vec<ResourceAvailability> {
    resources
        .iter()
        .map(|(resource_id, hours)| {
            let mut grid: BTreeSet<u8> = if closed {
                BTreeSet::new()
            } else {
                hours.hours().collect()
            };
            grid.extend(day.on_resource(resource_id).map(|b| b.key.hour));

            let slots = grid
                .into_iter()
                .map(|hour| SlotView {
                    hour,
                    past: is_past_slot(date, hour, now),
                    booking: day.get(&SlotKey::new(date, resource_id.as_str(), hour)).cloned(),
                })
                .collect();

            ResourceAvailability {
                resource_id: resource_id.clone(),
                slots,
            }
        })
        .collect()
}
