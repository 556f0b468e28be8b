//! Consumer group partitioning.
//!
//! A stream belongs to exactly one member of a consumer group, chosen by
//! hashing its cardinal id. The arithmetic is the same as Message DB's
//! `hash_64` so that in-memory and Postgres reads partition identically:
//! the first 8 bytes of the MD5 digest are read as a big-endian `i64` and the
//! member is the absolute value of the remainder.

use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::stream_name;

/// Hash an id to a signed 64-bit value
pub fn hash_64(id: &str) -> i64 {
    let digest = Md5::digest(id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

/// Assign an id to a member in `[0, size)`.
///
/// # Examples
///
/// ```
/// use message_store::partition::assign_id_to_member;
///
/// assert_eq!(assign_id_to_member("A", 2).unwrap(), 0);
/// assert_eq!(assign_id_to_member("C", 2).unwrap(), 1);
/// ```
pub fn assign_id_to_member(id: &str, size: i64) -> Result<i64> {
    if size <= 0 {
        return Err(Error::assertion(format!(
            "consumer group size must be positive, got {}",
            size
        )));
    }
    // Truncated remainder keeps the sign of the hash; abs folds it back
    // without shifting any member.
    Ok((hash_64(id) % size).abs())
}

/// Member owning a stream, or `None` when the stream name has no id.
pub fn get_consumer_group_member(stream_name: &str, size: i64) -> Result<Option<i64>> {
    match stream_name::get_cardinal_id(stream_name) {
        Some(cardinal_id) => assign_id_to_member(cardinal_id, size).map(Some),
        None => Ok(None),
    }
}
