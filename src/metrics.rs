//! Shared progress counters for one job run
//!
//! A [`MetricStore`] maps counter names to atomic integers. Workers increment
//! it concurrently while the reporter reads it; neither side ever blocks the
//! other for longer than a map lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Counter incremented by the declared size of every download that needs a transfer
pub const BYTES_TO_DOWNLOAD: &str = "bytes_to_download";

/// Counter incremented by every chunk written to disk
pub const BYTES_DOWNLOADED: &str = "bytes_downloaded";

/// Named atomic counters shared by all workers and the reporter of a job run
#[derive(Debug, Default)]
pub struct MetricStore {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

/// Point-in-time progress reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricSnapshot {
    /// Value of [`BYTES_DOWNLOADED`]
    pub bytes_downloaded: u64,
    /// Value of [`BYTES_TO_DOWNLOAD`]
    pub bytes_to_download: u64,
}

impl MetricStore {
    /// Create a store with the two progress counters registered at zero
    pub fn new() -> Self {
        let store = Self::default();
        store.counter(BYTES_TO_DOWNLOAD);
        store.counter(BYTES_DOWNLOADED);
        store
    }

    /// Atomically add `delta` to the counter `name`, creating it on first use
    pub fn increment(&self, name: &str, delta: u64) {
        self.counter(name).fetch_add(delta, Ordering::SeqCst);
    }

    /// Current value of `name` (0 for counters never incremented)
    pub fn get(&self, name: &str) -> u64 {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters
            .get(name)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Read both progress counters
    ///
    /// `bytes_downloaded` is loaded before `bytes_to_download`. Writers always
    /// raise `bytes_to_download` before the matching bytes are counted, so a
    /// snapshot never shows more downloaded than scheduled.
    pub fn snapshot(&self) -> MetricSnapshot {
        let bytes_downloaded = self.get(BYTES_DOWNLOADED);
        let bytes_to_download = self.get(BYTES_TO_DOWNLOAD);
        MetricSnapshot {
            bytes_downloaded,
            bytes_to_download,
        }
    }

    fn counter(&self, name: &str) -> Arc<AtomicU64> {
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(name) {
                return Arc::clone(counter);
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(counters.entry(name.to_string()).or_default())
    }
}
