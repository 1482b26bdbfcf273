use pheap_store::StoreError;
use pheap_types::{Handle, HeapId};
use thiserror::Error;

use crate::registry;

/// Malformed type descriptor construction or lookup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("type {type_name} declares no fields")]
    Empty { type_name: String },

    #[error("type {type_name} lists field {field} more than once")]
    DuplicateField { type_name: String, field: String },

    #[error("type {0} is already registered")]
    DuplicateType(String),

    #[error("field {field} is not part of type {type_name}")]
    UnknownField { type_name: String, field: String },

    /// User types may not claim the built-in `pheap::` namespace.
    #[error("type name {0} is reserved for built-in types")]
    ReservedName(String),
}

/// Errors produced by persistent objects and transactions.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Storage exhausted or the allocator failed.
    #[error("allocation failed: {0}")]
    Allocation(#[source] StoreError),

    /// Rehydration target no longer exists.
    #[error("dangling handle: {0}")]
    DanglingHandle(Handle),

    /// A stored value does not satisfy the declared type of its field.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// A value from one heap was stored into an object of another.
    #[error("value lives in {found}, object lives in {expected}")]
    ForeignHeap { expected: HeapId, found: HeapId },

    /// The enclosing transaction was rolled back.
    #[error("transaction aborted: {reason}")]
    TransactionAbort {
        reason: String,
        #[source]
        source: Option<Box<ObjectError>>,
    },

    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl ObjectError {
    pub(crate) fn abort(reason: impl Into<String>) -> Self {
        Self::TransactionAbort {
            reason: reason.into(),
            source: None,
        }
    }
}

impl From<StoreError> for ObjectError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DanglingHandle(handle) => Self::DanglingHandle(handle),
            StoreError::NullHandle => Self::DanglingHandle(Handle::null()),
            StoreError::OutOfSpace { .. } => Self::Allocation(e),
            StoreError::TagMismatch {
                handle,
                expected,
                found,
            } => Self::TypeMismatch {
                context: format!("reference to {handle}"),
                expected: registry::describe(expected),
                found: registry::describe(found),
            },
            other => Self::Store(other),
        }
    }
}

/// Result alias for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
