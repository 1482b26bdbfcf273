use serde::{Deserialize, Serialize};

use pheap_types::{Handle, HeapId, Slot};

use crate::error::{StoreError, StoreResult};
use crate::layout::RegionLayout;

/// One slot assignment inside a [`WriteBatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWrite {
    pub handle: Handle,
    pub slot: u32,
    pub value: Slot,
}

/// An ordered group of slot writes committed all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<SlotWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch holding a single write.
    pub fn single(handle: Handle, slot: u32, value: Slot) -> Self {
        let mut batch = Self::new();
        batch.push(handle, slot, value);
        batch
    }

    pub fn push(&mut self, handle: Handle, slot: u32, value: Slot) {
        self.writes.push(SlotWrite {
            handle,
            slot,
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotWrite> {
        self.writes.iter()
    }
}

impl FromIterator<SlotWrite> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = SlotWrite>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}

/// Occupancy figures for a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live regions.
    pub regions: usize,
    /// Bytes held by live regions (aligned sizes).
    pub used_bytes: u64,
    /// Maximum bytes the heap will hand out.
    pub capacity: u64,
}

/// Region allocator and durability boundary of a persistent heap.
///
/// All implementations must satisfy these invariants:
/// - Handles are never null and never reused while the heap is open.
/// - Fresh regions read as all-absent slots.
/// - A slot read never observes a partially written cell.
/// - [`commit`](Heap::commit) applies every write of the batch or none;
///   durable implementations make the whole group crash-atomic.
/// - A committed reference slot names a live region carrying the slot's tag.
/// - All I/O errors are propagated, never silently ignored.
pub trait Heap: Send + Sync {
    /// Identity of this open heap.
    fn id(&self) -> HeapId;

    /// Reserve a zeroed region for `layout` and write its immutable payload.
    ///
    /// Fails with [`StoreError::OutOfSpace`] when the heap is exhausted.
    fn allocate(&self, layout: &RegionLayout, payload: &[u8]) -> StoreResult<Handle>;

    /// Decode the header of a live region.
    ///
    /// Fails with [`StoreError::DanglingHandle`] if the region does not exist.
    fn resolve(&self, handle: Handle) -> StoreResult<RegionLayout>;

    /// Release a region. Returns `true` if the region existed.
    fn deallocate(&self, handle: Handle) -> StoreResult<bool>;

    /// Read one slot of a live region.
    fn read_slot(&self, handle: Handle, slot: u32) -> StoreResult<Slot>;

    /// Read every slot of a live region as one consistent snapshot.
    fn read_slots(&self, handle: Handle) -> StoreResult<Vec<Slot>>;

    /// Copy out the immutable payload of a live region.
    fn read_payload(&self, handle: Handle) -> StoreResult<Vec<u8>>;

    /// Apply a group of slot writes atomically.
    fn commit(&self, batch: &WriteBatch) -> StoreResult<()>;

    /// The heap's root region, if one is set and still live.
    fn root(&self) -> StoreResult<Option<Handle>>;

    /// Replace the root. `Some` must name a live region; `None` clears it.
    ///
    /// Durable implementations make the change crash-atomic. Releasing the
    /// root region clears the root.
    fn set_root(&self, root: Option<Handle>) -> StoreResult<()>;

    /// Current occupancy.
    fn stats(&self) -> HeapStats;

    /// Check whether a handle names a live region.
    ///
    /// Default implementation resolves the handle and maps a dangling
    /// handle to `false`.
    fn exists(&self, handle: Handle) -> StoreResult<bool> {
        match self.resolve(handle) {
            Ok(_) => Ok(true),
            Err(StoreError::DanglingHandle(_)) | Err(StoreError::NullHandle) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
