//! Downlink-frame log shared with the uploader.
//!
//! Newest entries sit at the head, so age grows monotonically toward the
//! tail and the pruner can drop everything past the first stale entry. The
//! log is the only structure crossing a thread boundary besides the address
//! cache; the pruner takes the lock non-blockingly and skips its tick on
//! contention so it can never stall the hot path.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::{ModesMessage, LONG_MSG_BYTES};

/// One accepted frame, carrying the aircraft's address as the key rather
/// than a reference to the track record, which may be pruned independently.
#[derive(Debug, Clone)]
pub struct FrameLogEntry {
    /// Wall time of receipt, UNIX seconds.
    pub seen: f64,
    /// Device-domain reception timestamp.
    pub timestamp: u64,
    pub addr: u32,
    pub msg: [u8; LONG_MSG_BYTES],
}

#[derive(Debug, Default)]
pub struct FrameLog {
    entries: Mutex<VecDeque<FrameLogEntry>>,
}

impl FrameLog {
    pub fn new() -> Self {
        FrameLog::default()
    }

    /// Record an accepted frame at the head of the log.
    pub fn record(&self, mm: &ModesMessage, now: f64) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.push_front(FrameLogEntry {
            seen: now,
            timestamp: mm.timestamp_msg,
            addr: mm.addr,
            msg: mm.msg,
        });
    }

    /// Most recent entry for an address, if any.
    pub fn find(&self, addr: u32) -> Option<FrameLogEntry> {
        let entries = self.entries.lock().ok()?;
        entries.iter().find(|e| e.addr == addr).cloned()
    }

    /// Drop entries older than `ttl` seconds.
    ///
    /// Entries age head-to-tail, so everything from the first stale entry
    /// onward goes. Skips the sweep entirely if the lock is contended.
    pub fn prune(&self, now: f64, ttl: f64) {
        let Ok(mut entries) = self.entries.try_lock() else {
            return;
        };
        if let Some(first_stale) = entries.iter().position(|e| now - e.seen > ttl) {
            entries.truncate(first_stale);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
