use std::sync::RwLock;

use tracing::debug;

use pheap_types::{Handle, HeapId, Slot};

use crate::error::StoreResult;
use crate::layout::RegionLayout;
use crate::region::RegionTable;
use crate::traits::{Heap, HeapStats, WriteBatch};

/// Default capacity of an in-memory heap: 64 MiB.
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Volatile, capacity-bounded heap.
///
/// Intended for tests and embedding. Regions live behind an `RwLock`: slot
/// reads share the lock, allocation and commits take it exclusively, so a
/// batch is never observed half-applied. Nothing survives the process.
pub struct InMemoryHeap {
    id: HeapId,
    table: RwLock<RegionTable>,
}

impl InMemoryHeap {
    /// Create an empty heap with [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty heap that hands out at most `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            id: HeapId::next(),
            table: RwLock::new(RegionTable::new(capacity)),
        }
    }

    /// Number of live regions.
    pub fn len(&self) -> usize {
        self.table.read().expect("lock poisoned").stats().regions
    }

    /// Returns `true` if no region is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap for InMemoryHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&self, layout: &RegionLayout, payload: &[u8]) -> StoreResult<Handle> {
        let mut table = self.table.write().expect("lock poisoned");
        let handle = table.reserve(layout, payload)?;
        debug!(heap = %self.id, %handle, size = layout.size(), "region allocated");
        Ok(handle)
    }

    fn resolve(&self, handle: Handle) -> StoreResult<RegionLayout> {
        self.table.read().expect("lock poisoned").layout(handle)
    }

    fn deallocate(&self, handle: Handle) -> StoreResult<bool> {
        let freed = self.table.write().expect("lock poisoned").free(handle);
        debug!(heap = %self.id, %handle, freed, "region released");
        Ok(freed)
    }

    fn read_slot(&self, handle: Handle, slot: u32) -> StoreResult<Slot> {
        self.table.read().expect("lock poisoned").read_slot(handle, slot)
    }

    fn read_slots(&self, handle: Handle) -> StoreResult<Vec<Slot>> {
        self.table.read().expect("lock poisoned").read_slots(handle)
    }

    fn read_payload(&self, handle: Handle) -> StoreResult<Vec<u8>> {
        self.table.read().expect("lock poisoned").read_payload(handle)
    }

    fn commit(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut table = self.table.write().expect("lock poisoned");
        table.validate(batch)?;
        table.apply(batch)?;
        debug!(heap = %self.id, writes = batch.len(), "batch committed");
        Ok(())
    }

    fn root(&self) -> StoreResult<Option<Handle>> {
        Ok(self.table.read().expect("lock poisoned").root())
    }

    fn set_root(&self, root: Option<Handle>) -> StoreResult<()> {
        self.table.write().expect("lock poisoned").set_root(root)?;
        debug!(heap = %self.id, root = ?root, "root set");
        Ok(())
    }

    fn stats(&self) -> HeapStats {
        self.table.read().expect("lock poisoned").stats()
    }
}

impl std::fmt::Debug for InMemoryHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("InMemoryHeap")
            .field("id", &self.id)
            .field("regions", &stats.regions)
            .field("used_bytes", &stats.used_bytes)
            .finish()
    }
}
