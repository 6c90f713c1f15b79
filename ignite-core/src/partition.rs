//! Partition reduction matching the server's rendezvous affinity function.
//!
//! A key's hash code is reduced to a partition index in `0..partitions`:
//!
//! ```
//! use ignite_core::partition::partition_for_hash;
//!
//! // "test".hashCode() with the default 1024 partitions
//! assert_eq!(partition_for_hash(3556498, 1024).unwrap(), 164);
//! ```

use crate::error::{IgniteError, Result};

/// Partition count used by caches that do not override it.
pub const DEFAULT_PARTITION_COUNT: usize = 1024;

/// Largest partition count a cache can be configured with.
pub const MAX_PARTITION_COUNT: usize = 65_536;

/// Maps a hash code to a partition index.
///
/// Power-of-two partition counts mix the high half into the low bits and mask;
/// other counts take the absolute remainder.
pub fn partition_for_hash(hash: i32, partitions: usize) -> Result<usize> {
    let parts = i32::try_from(partitions)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| {
            IgniteError::Usage(format!("invalid partition count {}", partitions))
        })?;

    let partition = if parts & (parts - 1) == 0 {
        (hash ^ ((hash as u32) >> 16) as i32) & (parts - 1)
    } else {
        safe_abs(hash % parts)
    };
    Ok(partition as usize)
}

fn safe_abs(value: i32) -> i32 {
    let abs = value.wrapping_abs();
    if abs < 0 {
        0
    } else {
        abs
    }
}
