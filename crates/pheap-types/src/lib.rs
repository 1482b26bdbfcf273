//! Foundation types for pheap, a persistent heap of typed objects.
//!
//! Every other pheap crate depends on `pheap-types`. Nothing here touches
//! storage; these are the identifiers and encodings the heap and the object
//! layer agree on.
//!
//! # Key Types
//!
//! - [`Handle`] -- Stable reference to an allocated heap region
//! - [`HeapId`] -- Process-unique identity of one open heap
//! - [`TypeTag`] -- Stable type identity stored in every region header
//! - [`Slot`] -- The fixed-width cell backing one object field

pub mod error;
pub mod handle;
pub mod slot;
pub mod tag;

pub use error::TypeError;
pub use handle::{Handle, HeapId};
pub use slot::{Slot, SLOT_SIZE};
pub use tag::TypeTag;
