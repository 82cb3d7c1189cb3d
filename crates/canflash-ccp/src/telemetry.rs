//! Live measurement values
//!
//! The DAQ receive loop is the only writer of a [`TelemetryQueue`]. The queue
//! holds one slot per item, so a newer sample replaces an unread older one and
//! pushing never blocks. A refresh task drains it on a fixed tick into
//! [`CurrentValues`], which the display reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// One decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: String,
    pub pid: u8,
    pub received: Instant,
}

/// Latest-value-wins queue keyed by selection index
#[derive(Debug, Default)]
pub struct TelemetryQueue {
    slots: Mutex<HashMap<usize, Sample>>,
    pushed: AtomicU64,
    overwritten: AtomicU64,
}

impl TelemetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sample, replacing any unread one for the same item
    pub fn push(&self, index: usize, sample: Sample) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        if self.slots.lock().insert(index, sample).is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every pending sample, ordered by index
    pub fn drain(&self) -> Vec<(usize, Sample)> {
        let mut samples: Vec<_> = self.slots.lock().drain().collect();
        samples.sort_by_key(|(index, _)| *index);
        samples
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Samples pushed since creation
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Samples replaced before anyone read them
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Values currently shown, one entry per registered item
#[derive(Debug, Default)]
pub struct CurrentValues {
    values: RwLock<BTreeMap<usize, Option<String>>>,
}

impl CurrentValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start displaying an item
    pub fn register(&self, index: usize) {
        self.values.write().entry(index).or_insert(None);
    }

    /// Stop displaying an item; later samples for it are ignored
    pub fn unregister(&self, index: usize) {
        self.values.write().remove(&index);
    }

    /// Apply drained samples, skipping items that are not registered.
    /// Returns how many values changed.
    pub fn apply(&self, samples: Vec<(usize, Sample)>) -> usize {
        let mut values = self.values.write();
        let mut updated = 0;
        for (index, sample) in samples {
            if let Some(slot) = values.get_mut(&index) {
                *slot = Some(sample.value);
                updated += 1;
            }
        }
        updated
    }

    pub fn get(&self, index: usize) -> Option<String> {
        self.values.read().get(&index).cloned().flatten()
    }

    /// Every registered item with its value, if one arrived yet
    pub fn snapshot(&self) -> Vec<(usize, Option<String>)> {
        self.values
            .read()
            .iter()
            .map(|(index, value)| (*index, value.clone()))
            .collect()
    }
}

/// Periodic queue-to-display copy; aborted when dropped
pub struct RefreshTask {
    handle: Option<JoinHandle<()>>,
}

impl RefreshTask {
    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Drain `queue` into `values` every `period`
pub fn spawn_refresh(
    queue: Arc<TelemetryQueue>,
    values: Arc<CurrentValues>,
    period: Duration,
) -> RefreshTask {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(period_ms = period.as_millis() as u64, "Display refresh started");
        loop {
            ticker.tick().await;
            let samples = queue.drain();
            if samples.is_empty() {
                continue;
            }
            let updated = values.apply(samples);
            trace!(updated, "Display values refreshed");
        }
    });
    RefreshTask {
        handle: Some(handle),
    }
}
