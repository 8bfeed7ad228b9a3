//! Time aliases used by entities and domain models

use chrono::{DateTime as ChronoDateTime, Utc};

/// Datetime stored in `TIMESTAMPTZ` columns.
pub type DBDateTime = ChronoDateTime<Utc>;

/// Datetime used by domain models and scheduling arithmetic.
pub type UtcDateTime = ChronoDateTime<Utc>;

/// Current time as [`UtcDateTime`].
pub fn now() -> UtcDateTime {
    Utc::now()
}
