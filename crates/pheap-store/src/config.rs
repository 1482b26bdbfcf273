use serde::{Deserialize, Serialize};

use crate::memory::DEFAULT_CAPACITY;

/// Flush/sync strategy for the write-ahead log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// `fsync` after every flush (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for the write-ahead log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Sync/flush strategy.
    pub sync_mode: SyncMode,
}

/// Configuration for a [`DurableHeap`](crate::DurableHeap).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Maximum bytes of live regions (default: 64 MiB).
    pub capacity: u64,
    /// Write-ahead log settings.
    pub wal: WalConfig,
    /// Log file name inside the heap directory.
    pub wal_file: String,
    /// Snapshot file name inside the heap directory.
    pub snapshot_file: String,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            wal: WalConfig::default(),
            wal_file: "heap.wal".into(),
            snapshot_file: "heap.snapshot".into(),
        }
    }
}

impl HeapConfig {
    /// Default settings with `fsync` on every flush.
    pub fn synchronous() -> Self {
        Self {
            wal: WalConfig {
                sync_mode: SyncMode::EveryWrite,
            },
            ..Default::default()
        }
    }
}
