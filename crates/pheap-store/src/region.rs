//! The live region image shared by every heap backend.
//!
//! `RegionTable` owns the bytes of all live regions and the bump pointer that
//! issues handles. It performs no locking and no logging; backends wrap it in
//! an `RwLock` and decide what to make durable before mutating it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use pheap_types::{Handle, Slot, SLOT_SIZE};

use crate::error::{StoreError, StoreResult};
use crate::layout::{RegionLayout, HEADER_SIZE};
use crate::traits::{HeapStats, SlotWrite, WriteBatch};

/// Offset of the first region handed out. Offsets below it are never valid
/// handles.
pub const BASE_OFFSET: u64 = 64;

/// The raw bytes of one region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    bytes: Vec<u8>,
}

impl Region {
    fn new(layout: &RegionLayout, payload: &[u8]) -> Self {
        let mut bytes = vec![0u8; layout.size() as usize];
        bytes[..HEADER_SIZE].copy_from_slice(&layout.encode_header());
        bytes[layout.payload_offset()..].copy_from_slice(payload);
        Self { bytes }
    }

    pub fn layout(&self, handle: Handle) -> StoreResult<RegionLayout> {
        let header: [u8; HEADER_SIZE] = self
            .bytes
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| StoreError::CorruptRegion {
                handle,
                reason: format!("region shorter than header ({} bytes)", self.bytes.len()),
            })?;
        let layout = RegionLayout::decode_header(&header).ok_or_else(|| {
            StoreError::CorruptRegion {
                handle,
                reason: "reserved type tag in header".into(),
            }
        })?;
        if layout.size() != self.bytes.len() as u64 {
            return Err(StoreError::CorruptRegion {
                handle,
                reason: format!(
                    "header declares {} bytes, region holds {}",
                    layout.size(),
                    self.bytes.len()
                ),
            });
        }
        Ok(layout)
    }

    fn slot(&self, handle: Handle, index: u32) -> StoreResult<Slot> {
        let layout = self.layout(handle)?;
        if index >= layout.slots {
            return Err(StoreError::SlotOutOfRange {
                handle,
                slot: index,
                slots: layout.slots,
            });
        }
        let start = layout.slot_offset(index);
        Ok(Slot::decode(&self.bytes[start..start + SLOT_SIZE])?)
    }

    fn set_slot(&mut self, layout: &RegionLayout, index: u32, value: &Slot) {
        let start = layout.slot_offset(index);
        self.bytes[start..start + SLOT_SIZE].copy_from_slice(&value.encode());
    }

    fn payload(&self, handle: Handle) -> StoreResult<Vec<u8>> {
        let layout = self.layout(handle)?;
        Ok(self.bytes[layout.payload_offset()..].to_vec())
    }
}

/// Live regions keyed by handle, plus the allocation cursor and the root.
#[derive(Debug)]
pub struct RegionTable {
    regions: BTreeMap<Handle, Region>,
    root: Option<Handle>,
    next_offset: u64,
    used: u64,
    capacity: u64,
}

impl RegionTable {
    pub fn new(capacity: u64) -> Self {
        Self {
            regions: BTreeMap::new(),
            root: None,
            next_offset: BASE_OFFSET,
            used: 0,
            capacity,
        }
    }

    /// Rebuild a table from a snapshot image.
    pub fn from_image(capacity: u64, image: RegionImage) -> StoreResult<Self> {
        let mut table = Self::new(capacity);
        table.next_offset = image.next_offset.max(BASE_OFFSET);
        for (handle, region) in image.regions {
            let layout = region.layout(handle)?;
            table.used += layout.aligned_size();
            table.regions.insert(handle, region);
        }
        table.root = image.root.filter(|root| table.regions.contains_key(root));
        Ok(table)
    }

    /// Copy the table out for a snapshot.
    pub fn image(&self) -> RegionImage {
        RegionImage {
            next_offset: self.next_offset,
            root: self.root,
            regions: self
                .regions
                .iter()
                .map(|(h, r)| (*h, r.clone()))
                .collect(),
        }
    }

    /// Check capacity and payload length, then carve out a new region.
    pub fn reserve(&mut self, layout: &RegionLayout, payload: &[u8]) -> StoreResult<Handle> {
        check_payload(layout, payload)?;
        let requested = layout.aligned_size();
        let available = self.capacity.saturating_sub(self.used);
        if requested > available {
            return Err(StoreError::OutOfSpace {
                requested,
                available,
            });
        }
        let handle = Handle::from_offset(self.next_offset);
        self.insert_at(handle, layout, payload)?;
        Ok(handle)
    }

    /// Place a region at a known handle. Used when replaying the log, so the
    /// capacity check is skipped: the region was admitted when first logged.
    pub fn insert_at(
        &mut self,
        handle: Handle,
        layout: &RegionLayout,
        payload: &[u8],
    ) -> StoreResult<()> {
        if handle.is_null() {
            return Err(StoreError::NullHandle);
        }
        check_payload(layout, payload)?;
        let size = layout.aligned_size();
        if let Some(old) = self.regions.insert(handle, Region::new(layout, payload)) {
            warn!(%handle, "region replaced at existing handle");
            self.used -= old.layout(handle).map(|l| l.aligned_size()).unwrap_or(0);
        }
        self.used += size;
        self.next_offset = self.next_offset.max(handle.offset() + size);
        Ok(())
    }

    /// Release a region. Clears the root if it named this region.
    pub fn free(&mut self, handle: Handle) -> bool {
        match self.regions.remove(&handle) {
            Some(region) => {
                if self.root == Some(handle) {
                    self.root = None;
                }
                self.used -= region.layout(handle).map(|l| l.aligned_size()).unwrap_or(0);
                true
            }
            None => false,
        }
    }

    pub fn root(&self) -> Option<Handle> {
        self.root
    }

    /// Check that `root` names a live region. Nothing is modified.
    pub fn check_root(&self, root: Option<Handle>) -> StoreResult<()> {
        if let Some(handle) = root {
            self.region(handle)?;
        }
        Ok(())
    }

    pub fn set_root(&mut self, root: Option<Handle>) -> StoreResult<()> {
        self.check_root(root)?;
        self.root = root;
        Ok(())
    }

    pub fn region(&self, handle: Handle) -> StoreResult<&Region> {
        if handle.is_null() {
            return Err(StoreError::NullHandle);
        }
        self.regions
            .get(&handle)
            .ok_or(StoreError::DanglingHandle(handle))
    }

    pub fn layout(&self, handle: Handle) -> StoreResult<RegionLayout> {
        self.region(handle)?.layout(handle)
    }

    pub fn read_slot(&self, handle: Handle, index: u32) -> StoreResult<Slot> {
        self.region(handle)?.slot(handle, index)
    }

    pub fn read_slots(&self, handle: Handle) -> StoreResult<Vec<Slot>> {
        let region = self.region(handle)?;
        let layout = region.layout(handle)?;
        (0..layout.slots).map(|i| region.slot(handle, i)).collect()
    }

    pub fn read_payload(&self, handle: Handle) -> StoreResult<Vec<u8>> {
        self.region(handle)?.payload(handle)
    }

    /// Verify every write of a batch targets a live region and an in-range
    /// slot, and that every reference it stores names a live region of the
    /// tagged type. Nothing is modified.
    pub fn validate(&self, batch: &WriteBatch) -> StoreResult<()> {
        for write in batch.iter() {
            self.check_write(write)?;
        }
        Ok(())
    }

    /// Apply a batch that already passed [`validate`](Self::validate).
    pub fn apply(&mut self, batch: &WriteBatch) -> StoreResult<()> {
        for write in batch.iter() {
            self.apply_write(write)?;
        }
        Ok(())
    }

    /// Apply one write, re-checking its target.
    pub fn apply_write(&mut self, write: &SlotWrite) -> StoreResult<()> {
        let layout = self.check_write(write)?;
        let region = self
            .regions
            .get_mut(&write.handle)
            .ok_or(StoreError::DanglingHandle(write.handle))?;
        region.set_slot(&layout, write.slot, &write.value);
        Ok(())
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            regions: self.regions.len(),
            used_bytes: self.used,
            capacity: self.capacity,
        }
    }

    fn check_write(&self, write: &SlotWrite) -> StoreResult<RegionLayout> {
        let layout = self.layout(write.handle)?;
        if write.slot >= layout.slots {
            return Err(StoreError::SlotOutOfRange {
                handle: write.handle,
                slot: write.slot,
                slots: layout.slots,
            });
        }
        if let Slot::Ref { tag, handle } = write.value {
            let target = self.layout(handle)?;
            if target.type_tag != tag {
                return Err(StoreError::TagMismatch {
                    handle,
                    expected: tag,
                    found: target.type_tag,
                });
            }
        }
        Ok(layout)
    }
}

/// Serializable copy of a [`RegionTable`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionImage {
    pub next_offset: u64,
    #[serde(default)]
    pub root: Option<Handle>,
    pub regions: Vec<(Handle, Region)>,
}

fn check_payload(layout: &RegionLayout, payload: &[u8]) -> StoreResult<()> {
    if payload.len() != layout.payload_len as usize {
        return Err(StoreError::PayloadLength {
            expected: layout.payload_len,
            actual: payload.len(),
        });
    }
    Ok(())
}
