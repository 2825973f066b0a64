//! UUIDv7 utilities for time-ordered identifiers.
//!
//! Job ids are UUIDv7, so ordering by id is ordering by creation time. The
//! job store relies on this to break `updated_at` ties deterministically.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use assetreg_core::uuid_utils::new_v7;
///
/// let id = new_v7();
/// assert_eq!(id.get_version_num(), 7);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
