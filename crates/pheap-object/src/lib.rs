//! Typed persistent objects and fixed-arity tuples for pheap.
//!
//! A type is declared once as an ordered list of [`FieldDescriptor`]s and
//! registered as a [`TypeDescriptor`]. Instances are [`PersistentObject`]s:
//! accessors over a region of a [`Heap`](pheap_store::Heap) whose field
//! values live in the heap, not in memory. [`Transaction::run`] groups field
//! writes so they become durable together or not at all.
//!
//! The [`tuple`] module builds `Tuple1`..`Tuple11` on top of this, with
//! structural equality, hashing and rendering over their fields.
//!
//! # Design Rules
//!
//! 1. A type descriptor is immutable and registered once per process.
//! 2. All field access through one accessor is serialized by its monitor.
//! 3. Field reads are checked: a stored reference is verified against the
//!    requested type before it is bound.
//! 4. Outside a transaction each field write is its own durable group.
//! 5. Inside a transaction nothing is visible to other threads until the
//!    outermost commit; regions it allocated are released if it aborts.
//! 6. A stored reference always names a live region of its tagged type.
//! 7. Names under `pheap::` belong to the built-in types.
//!
//! Objects stay findable across restarts through the heap root: see
//! [`set_root`] and [`load_root`].

#[macro_use]
mod macros;

pub mod error;
pub mod field;
pub mod layout;
pub mod object;
pub mod registry;
pub mod root;
pub mod tuple;
pub mod tx;
pub mod value;

pub use error::{LayoutError, ObjectError, ObjectResult};
pub use field::{FieldDescriptor, FieldId, FieldKind};
pub use layout::{TypeDescriptor, RESERVED_PREFIX};
pub use object::{Persistent, PersistentObject, PersistentType, SharedHeap};
pub use tuple::{
    Tuple1, Tuple10, Tuple11, Tuple2, Tuple3, Tuple4, Tuple5, Tuple6, Tuple7, Tuple8, Tuple9,
};
pub use root::{load_root, set_root};
pub use tx::Transaction;
pub use value::{AnyObject, PersistentLong, PersistentString};
