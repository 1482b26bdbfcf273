use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use pheap_store::{Heap, WriteBatch};
use pheap_types::{Handle, HeapId, Slot, TypeTag};
use tracing::debug;

use crate::error::{ObjectError, ObjectResult};
use crate::field::{FieldDescriptor, FieldKind};
use crate::layout::TypeDescriptor;
use crate::registry;
use crate::tx;

/// A heap shared between every object allocated in it.
pub type SharedHeap = Arc<dyn Heap>;

struct ObjectInner {
    heap: SharedHeap,
    handle: Handle,
    ty: &'static TypeDescriptor,
    /// Serializes every field access made through this accessor.
    monitor: Mutex<()>,
}

/// Accessor for one region of a persistent heap, typed by a
/// [`TypeDescriptor`].
///
/// The accessor holds no field values; every read and write goes to the
/// heap. All field access through one accessor is serialized by its
/// monitor, so a read never observes a torn slot and two writers to the same
/// instance never interleave. Clones share the monitor. Separate
/// [`reconstitute`](Self::reconstitute) calls for the same handle produce
/// accessors with independent monitors that observe the same storage.
#[derive(Clone)]
pub struct PersistentObject {
    inner: Arc<ObjectInner>,
}

impl PersistentObject {
    /// Allocate a fresh region for `ty`. All fields start absent.
    pub fn construct(heap: &SharedHeap, ty: &'static TypeDescriptor) -> ObjectResult<Self> {
        Self::construct_with_payload(heap, ty, &[])
    }

    /// Allocate a fresh region for `ty` with an immutable trailing payload.
    ///
    /// Inside a transaction on `heap`, the region is released again if the
    /// transaction does not commit.
    pub fn construct_with_payload(
        heap: &SharedHeap,
        ty: &'static TypeDescriptor,
        payload: &[u8],
    ) -> ObjectResult<Self> {
        let layout = ty.layout(payload.len())?;
        let transactional = tx::enlist(heap.id())?;
        let handle = heap
            .allocate(&layout, payload)
            .map_err(ObjectError::Allocation)?;
        if transactional {
            tx::track_allocation(heap.id(), handle);
        }
        debug!(type_name = ty.name(), %handle, heap = %heap.id(), "object constructed");
        Ok(Self::bind(heap, handle, ty))
    }

    /// Bind to an existing region without allocating or initialising it.
    ///
    /// The object's type is read from the region header and looked up in
    /// the registry.
    pub fn reconstitute(heap: &SharedHeap, handle: Handle) -> ObjectResult<Self> {
        let layout = heap.resolve(handle)?;
        let ty = registry::lookup(layout.type_tag).ok_or_else(|| ObjectError::TypeMismatch {
            context: format!("region {handle}"),
            expected: "a registered type".into(),
            found: registry::describe(layout.type_tag),
        })?;
        if layout.slots as usize != ty.len() {
            return Err(ObjectError::TypeMismatch {
                context: format!("region {handle}"),
                expected: format!("{} with {} slots", ty.name(), ty.len()),
                found: format!("{} slots", layout.slots),
            });
        }
        Ok(Self::bind(heap, handle, ty))
    }

    /// Like [`reconstitute`](Self::reconstitute), but the region must hold
    /// an instance of `ty`.
    pub fn reconstitute_as(
        heap: &SharedHeap,
        handle: Handle,
        ty: &'static TypeDescriptor,
    ) -> ObjectResult<Self> {
        let object = Self::reconstitute(heap, handle)?;
        if object.inner.ty.tag() != ty.tag() {
            return Err(ObjectError::TypeMismatch {
                context: format!("region {handle}"),
                expected: ty.name().to_string(),
                found: object.inner.ty.name().to_string(),
            });
        }
        Ok(object)
    }

    fn bind(heap: &SharedHeap, handle: Handle, ty: &'static TypeDescriptor) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                heap: Arc::clone(heap),
                handle,
                ty,
                monitor: Mutex::new(()),
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn type_descriptor(&self) -> &'static TypeDescriptor {
        self.inner.ty
    }

    pub fn heap(&self) -> &SharedHeap {
        &self.inner.heap
    }

    pub fn heap_id(&self) -> HeapId {
        self.inner.heap.id()
    }

    /// Returns `true` if both accessors are bound to the same region.
    pub fn same_storage(&self, other: &PersistentObject) -> bool {
        self.heap_id() == other.heap_id() && self.handle() == other.handle()
    }

    /// Read the raw slot for `field`.
    pub fn get_slot(&self, field: &FieldDescriptor) -> ObjectResult<Slot> {
        let slot = self.inner.ty.slot_of(field)?;
        let _guard = self.lock();
        if let Some(pending) = tx::pending_write(self.heap_id(), self.handle(), slot) {
            return Ok(pending);
        }
        Ok(self.inner.heap.read_slot(self.handle(), slot)?)
    }

    /// Write the raw slot for `field`.
    ///
    /// Object fields take references or absent, scalar fields take scalars
    /// or absent. A reference must name a live region in this heap whose
    /// header carries the reference's tag. Outside a transaction the write
    /// is committed on its own; inside one it is buffered until the
    /// outermost commit.
    pub fn set_slot(&self, field: &FieldDescriptor, value: Slot) -> ObjectResult<()> {
        let slot = self.inner.ty.slot_of(field)?;
        match (field.kind(), value) {
            (_, Slot::Absent)
            | (FieldKind::Object, Slot::Ref { .. })
            | (FieldKind::Scalar, Slot::Scalar(_)) => {}
            (kind, found) => {
                return Err(ObjectError::TypeMismatch {
                    context: self.field_context(field),
                    expected: match kind {
                        FieldKind::Object => "an object reference".into(),
                        FieldKind::Scalar => "a scalar".into(),
                    },
                    found: describe_slot(found),
                })
            }
        }

        if let Slot::Ref { tag, handle } = value {
            self.check_target(field, tag, handle)?;
        }

        let _guard = self.lock();
        if !tx::buffer_write(self.heap_id(), self.handle(), slot, value)? {
            self.inner
                .heap
                .commit(&WriteBatch::single(self.handle(), slot, value))?;
        }
        Ok(())
    }

    /// Read an object field as `T`.
    ///
    /// The stored reference is checked against `T` before it is bound:
    /// a reference to a type `T` does not accept, or a scalar, fails with
    /// [`ObjectError::TypeMismatch`].
    pub fn get_field<T: Persistent>(&self, field: &FieldDescriptor) -> ObjectResult<Option<T>> {
        let slot = self.get_slot(field)?;
        self.resolve_slot(field, slot)
    }

    /// Store a reference to `value` (or clear the field with `None`).
    ///
    /// `value` must live in the same heap as this object.
    pub fn set_field<T: Persistent>(
        &self,
        field: &FieldDescriptor,
        value: Option<&T>,
    ) -> ObjectResult<()> {
        let slot = match value {
            None => Slot::Absent,
            Some(value) => {
                let target = value.object();
                if target.heap_id() != self.heap_id() {
                    return Err(ObjectError::ForeignHeap {
                        expected: self.heap_id(),
                        found: target.heap_id(),
                    });
                }
                Slot::reference(target.type_descriptor().tag(), target.handle())
            }
        };
        self.set_slot(field, slot)
    }

    /// Read a scalar field. Absent reads as `0`.
    pub fn get_scalar(&self, field: &FieldDescriptor) -> ObjectResult<i64> {
        match self.get_slot(field)? {
            Slot::Absent => Ok(0),
            Slot::Scalar(value) => Ok(value),
            other => Err(ObjectError::TypeMismatch {
                context: self.field_context(field),
                expected: "a scalar".into(),
                found: describe_slot(other),
            }),
        }
    }

    pub fn set_scalar(&self, field: &FieldDescriptor, value: i64) -> ObjectResult<()> {
        self.set_slot(field, Slot::Scalar(value))
    }

    /// All slots, read under one acquisition of the monitor.
    pub fn snapshot(&self) -> ObjectResult<Vec<Slot>> {
        let _guard = self.lock();
        let mut slots = self.inner.heap.read_slots(self.handle())?;
        tx::overlay_pending(self.heap_id(), self.handle(), &mut slots);
        Ok(slots)
    }

    /// The immutable payload written at construction.
    pub fn payload(&self) -> ObjectResult<Vec<u8>> {
        Ok(self.inner.heap.read_payload(self.handle())?)
    }

    /// Turn a slot previously read from `field` into a checked `T`.
    pub fn resolve_slot<T: Persistent>(
        &self,
        field: &FieldDescriptor,
        slot: Slot,
    ) -> ObjectResult<Option<T>> {
        match slot {
            Slot::Absent => Ok(None),
            Slot::Ref { tag, handle } if T::accepts(tag) => {
                let object = PersistentObject::reconstitute(&self.inner.heap, handle)?;
                T::from_object(object).map(Some)
            }
            other => Err(ObjectError::TypeMismatch {
                context: self.field_context(field),
                expected: std::any::type_name::<T>().to_string(),
                found: describe_slot(other),
            }),
        }
    }

    fn check_target(
        &self,
        field: &FieldDescriptor,
        tag: TypeTag,
        target: Handle,
    ) -> ObjectResult<()> {
        let layout = self.inner.heap.resolve(target)?;
        if layout.type_tag != tag {
            return Err(ObjectError::TypeMismatch {
                context: self.field_context(field),
                expected: format!("{} at {target}", registry::describe(tag)),
                found: registry::describe(layout.type_tag),
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.monitor.lock().expect("object monitor poisoned")
    }

    fn field_context(&self, field: &FieldDescriptor) -> String {
        format!("{}.{}", self.inner.ty.name(), field.name())
    }
}

fn describe_slot(slot: Slot) -> String {
    match slot {
        Slot::Absent => "absent".into(),
        Slot::Scalar(value) => format!("scalar {value}"),
        Slot::Ref { tag, .. } => registry::describe(tag),
    }
}

impl fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentObject")
            .field("type", &self.inner.ty.name())
            .field("handle", &self.inner.handle)
            .field("heap", &self.heap_id())
            .finish()
    }
}

/// A value that can be stored in an object field.
///
/// Implementors are thin typed views over a [`PersistentObject`]. The
/// structural operations are fallible because they read the heap; the
/// standard `PartialEq`/`Hash`/`Display` impls on the provided types
/// delegate to them.
pub trait Persistent: Sized {
    /// Returns `true` if a reference tagged `tag` may be read as `Self`.
    fn accepts(tag: TypeTag) -> bool;

    /// Wrap an accessor already known to hold an accepted type.
    fn from_object(object: PersistentObject) -> ObjectResult<Self>;

    /// The accessor backing this value.
    fn object(&self) -> &PersistentObject;

    /// Structural equality.
    fn try_eq(&self, other: &Self) -> ObjectResult<bool>;

    /// Structural hash, consistent with [`try_eq`](Self::try_eq).
    fn try_hash(&self) -> ObjectResult<u64>;

    /// Human-readable rendering.
    fn try_render(&self) -> ObjectResult<String>;

    /// Stable reference for rehydration.
    fn handle(&self) -> Handle {
        self.object().handle()
    }
}

/// A [`Persistent`] value with one fixed layout.
pub trait PersistentType: Persistent {
    fn type_descriptor() -> &'static TypeDescriptor;

    /// Bind to an existing instance of this type.
    fn reconstitute(heap: &SharedHeap, handle: Handle) -> ObjectResult<Self> {
        Self::from_object(PersistentObject::reconstitute_as(
            heap,
            handle,
            Self::type_descriptor(),
        )?)
    }
}
