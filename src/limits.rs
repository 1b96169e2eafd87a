use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 512;
pub const MAX_DESCRIPTION_LEN: usize = 4000;
pub const MAX_COMMENT_LEN: usize = 4000;
pub const MAX_SEARCH_LEN: usize = 255;

pub const MAX_PAGE_SIZE: usize = 1000;
pub const MAX_SORT_KEYS: usize = 8;

pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
