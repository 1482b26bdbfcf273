use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Stable reference to an allocated heap region.
///
/// A `Handle` is the region's offset in the heap's address space. It survives
/// process restart: storing a handle and resolving it against the reopened
/// heap yields the same region. Offset `0` is the null handle and is never
/// issued by an allocator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a raw region offset.
    pub const fn from_offset(offset: u64) -> Self {
        Self(offset)
    }

    /// The null handle. Represents "no region".
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns `true` if this is the null handle.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw region offset.
    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Big-endian hex encoding (16 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from a 16-character hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 8,
                actual: bytes.len(),
            })?;
        Ok(Self(u64::from_be_bytes(arr)))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one open heap instance.
///
/// Two accessors refer to the same storage only if both their heap ids and
/// their handles match. Ids are not persisted; reopening a durable heap
/// yields a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(u64);

impl HeapId {
    /// Issue the next unused id.
    pub fn next() -> Self {
        Self(NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}
