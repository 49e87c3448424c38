//! Unique database identifier generator.
//!
//! An id is a positive 63-bit integer laid out, after the zero sign bit, as
//! 46 bits of milliseconds since a configured epoch, a 10-bit rolling
//! offset and a 7-bit shard id. Successive calls in one millisecond stay
//! distinct until the 1024 offsets are exhausted; a wrap inside a single
//! millisecond is tolerated, not detected.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use crate::error::{OperationError, Result};

const MAX_OFFSET: u32 = 0x3FF;
pub const MAX_SHARD_ID: u8 = 127;

pub struct UniqueIdGenerator {
    epoch_ms: i64,
    shard_id: u8,
    offset: AtomicU32,
}

impl UniqueIdGenerator {
    /// `epoch_ms` must be non-negative and `shard_id` within [0, 127].
    pub fn new(epoch_ms: i64, shard_id: u8) -> Result<Self> {
        if epoch_ms < 0 {
            return Err(OperationError::invalid_conf(format!("negative epoch {epoch_ms}")));
        }
        if shard_id > MAX_SHARD_ID {
            return Err(OperationError::invalid_conf(format!("shardId {shard_id} out of [0,127]")));
        }
        Ok(Self { epoch_ms, shard_id, offset: AtomicU32::new(0) })
    }

    pub fn shard_id(&self) -> u8 {
        self.shard_id
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut id = now - self.epoch_ms;
        id <<= 10;
        let offset = self
            .offset
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(if v >= MAX_OFFSET { 0 } else { v + 1 })
            })
            .unwrap_or(0);
        id += offset as i64;
        id <<= 7;
        id += self.shard_id as i64;
        id
    }
}
