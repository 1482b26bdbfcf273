//! Region allocator and durability engine for pheap.
//!
//! A heap hands out fixed-layout regions (header, slot table, immutable
//! payload) and applies groups of slot writes atomically. The object layer
//! in `pheap-object` never touches bytes directly; it goes through the
//! [`Heap`] trait.
//!
//! # Backends
//!
//! - [`InMemoryHeap`] -- volatile, capacity-bounded; for tests and embedding
//! - [`DurableHeap`] -- snapshot plus redo [`WriteAheadLog`]; survives crashes
//!
//! # Design Rules
//!
//! 1. A region's layout is fixed at allocation; its payload never changes.
//! 2. Write-ahead: a group is logged (body, flush, commit record, flush)
//!    before it touches the live image.
//! 3. Recovery applies only groups whose commit record reached the log and
//!    cuts the log back to the last one.
//! 4. Handles are bump-allocated and never reissued.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod config;
pub mod durable;
pub mod error;
pub mod layout;
pub mod memory;
pub mod region;
pub mod traits;
pub mod wal;

pub use config::{HeapConfig, SyncMode, WalConfig};
pub use durable::{DurableHeap, RecoveryReport};
pub use error::{StoreError, StoreResult};
pub use layout::{RegionLayout, HEADER_SIZE};
pub use memory::InMemoryHeap;
pub use traits::{Heap, HeapStats, SlotWrite, WriteBatch};
pub use wal::{CommittedGroup, LogRecord, LogRecovery, WriteAheadLog};
