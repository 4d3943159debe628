use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::{HistoryRetention, VaultDb};

#[derive(Debug, Clone, PartialEq)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    /// Threads for the blocking pool that runs entry resolution
    pub blocking_threads: usize,
    pub strict_durability: bool, // true = fsync every append
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // CASE 1: Single core. Resolution shares the only core with I/O
        if cores <= 1 {
            warn!(cores, "single core detected, relaxing durability");
            Self {
                logical_cores: cores,
                worker_threads: 2,
                blocking_threads: 2,
                strict_durability: false,
            }
        }
        // CASE 2: Desktop / Laptop
        else if cores < 6 {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                blocking_threads: cores * 2,
                strict_durability: true,
            }
        }
        // CASE 3: Server
        else {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                blocking_threads: cores * 4,
                strict_durability: true,
            }
        }
    }
}

/// Starts the background history pruning thread.
/// Every `interval` it compacts each record's history down to `retention`.
pub fn start_compaction_thread(db: Arc<VaultDb>, retention: HistoryRetention, interval: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!(
            max_items = retention.max_items,
            max_size = retention.max_size,
            interval_secs = interval.as_secs(),
            "history compaction thread started"
        );
        loop {
            thread::sleep(interval);

            if let Err(e) = db.compact(retention) {
                warn!(error = %e, "history compaction failed");
            }
        }
    })
}
