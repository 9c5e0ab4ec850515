/// Last bookable hour of a day (slots are `hour:00`..`hour+1:00`).
pub const MAX_HOUR: u8 = 23;

pub const MAX_RESOURCE_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_USER_ID_LEN: usize = 128;

/// Upper bound on the fixed-booking materialization window.
pub const MAX_WEEKS_AHEAD: u32 = 52;

/// Journal frames larger than this are treated as corruption on replay.
pub const MAX_JOURNAL_RECORD_LEN: usize = 1 << 20;
