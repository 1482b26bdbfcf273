use std::io;

use pheap_types::{Handle, TypeError, TypeTag};

/// Errors from heap and durability operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The heap cannot fit the requested region.
    #[error("out of space: requested {requested} bytes, {available} available")]
    OutOfSpace { requested: u64, available: u64 },

    /// The handle does not name a live region.
    #[error("dangling handle: {0}")]
    DanglingHandle(Handle),

    /// The null handle was passed where a region was required.
    #[error("null handle")]
    NullHandle,

    /// Slot index past the end of the region's slot table.
    #[error("slot {slot} out of range for region {handle} with {slots} slots")]
    SlotOutOfRange { handle: Handle, slot: u32, slots: u32 },

    /// A reference slot names a region of a different type.
    #[error("reference to {handle} tagged {expected}, region holds {found}")]
    TagMismatch {
        handle: Handle,
        expected: TypeTag,
        found: TypeTag,
    },

    /// Initial payload does not match the layout's declared length.
    #[error("payload length mismatch: layout declares {expected}, got {actual}")]
    PayloadLength { expected: u32, actual: usize },

    /// Region bytes could not be decoded.
    #[error("corrupt region {handle}: {reason}")]
    CorruptRegion { handle: Handle, reason: String },

    /// Slot or handle encoding failure.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// I/O error from the log or snapshot files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
