//! UUID v7 helpers.
//!
//! Links and jobs use UUIDv7 ids so id order follows creation order, which
//! keeps the `(created_at, id)` keyset tiebreak meaningful.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
