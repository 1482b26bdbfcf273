//! The heap's root: the one object a process can find without already
//! holding a handle.
//!
//! Anything reachable from the root survives as long as the root does.
//! Changing the root is its own durable group and cannot be part of a
//! transaction.

use pheap_types::Handle;
use tracing::debug;

use crate::error::{ObjectError, ObjectResult};
use crate::object::{Persistent, PersistentObject, SharedHeap};
use crate::registry;
use crate::tx::Transaction;

/// Make `value` the root of `heap`, or clear the root with `None`.
///
/// `value` must live in `heap`. Fails with
/// [`ObjectError::TransactionAbort`] while this thread has a transaction
/// open.
pub fn set_root<T: Persistent>(heap: &SharedHeap, value: Option<&T>) -> ObjectResult<()> {
    if Transaction::is_active() {
        return Err(ObjectError::abort(
            "the root cannot change inside a transaction",
        ));
    }
    let handle = match value {
        None => None,
        Some(value) => {
            let object = value.object();
            if object.heap_id() != heap.id() {
                return Err(ObjectError::ForeignHeap {
                    expected: heap.id(),
                    found: object.heap_id(),
                });
            }
            Some(object.handle())
        }
    };
    heap.set_root(handle)?;
    debug!(heap = %heap.id(), root = ?handle, "root replaced");
    Ok(())
}

/// Read the root of `heap` as `T`. `None` if no root is set.
///
/// The root region's type is checked before it is bound.
pub fn load_root<T: Persistent>(heap: &SharedHeap) -> ObjectResult<Option<T>> {
    let Some(handle) = heap.root()? else {
        return Ok(None);
    };
    bind_root(heap, handle).map(Some)
}

fn bind_root<T: Persistent>(heap: &SharedHeap, handle: Handle) -> ObjectResult<T> {
    let object = PersistentObject::reconstitute(heap, handle)?;
    let tag = object.type_descriptor().tag();
    if !T::accepts(tag) {
        return Err(ObjectError::TypeMismatch {
            context: "heap root".into(),
            expected: std::any::type_name::<T>().to_string(),
            found: registry::describe(tag),
        });
    }
    T::from_object(object)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pheap_store::{DurableHeap, HeapConfig, InMemoryHeap};

    use super::*;
    use crate::object::PersistentType;
    use crate::tuple::Tuple2;
    use crate::value::{PersistentLong, PersistentString};

    fn heap() -> SharedHeap {
        Arc::new(InMemoryHeap::new())
    }

    #[test]
    fn fresh_heap_has_no_root() {
        let heap = heap();
        assert!(load_root::<PersistentLong>(&heap).unwrap().is_none());
    }

    #[test]
    fn root_is_read_back_checked() {
        let heap = heap();
        let value = PersistentLong::new(&heap, 41).unwrap();
        set_root(&heap, Some(&value)).unwrap();

        let back: PersistentLong = load_root(&heap).unwrap().unwrap();
        assert_eq!(back, value);
        assert!(matches!(
            load_root::<PersistentString>(&heap),
            Err(ObjectError::TypeMismatch { .. })
        ));

        set_root::<PersistentLong>(&heap, None).unwrap();
        assert!(load_root::<PersistentLong>(&heap).unwrap().is_none());
    }

    #[test]
    fn root_from_other_heap_is_refused() {
        let heap = heap();
        let other = self::heap();
        let value = PersistentLong::new(&other, 1).unwrap();
        assert!(matches!(
            set_root(&heap, Some(&value)),
            Err(ObjectError::ForeignHeap { .. })
        ));
    }

    #[test]
    fn root_cannot_change_inside_transaction() {
        let heap = heap();
        let value = PersistentLong::new(&heap, 1).unwrap();
        let result = Transaction::run(&heap, || set_root(&heap, Some(&value)));
        assert!(matches!(result, Err(ObjectError::TransactionAbort { .. })));
        assert!(heap.root().unwrap().is_none());
    }

    #[test]
    fn root_graph_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let heap: SharedHeap =
                Arc::new(DurableHeap::open(dir.path(), HeapConfig::default()).unwrap());
            let pair = Tuple2::with_values(
                &heap,
                &PersistentLong::new(&heap, 7).unwrap(),
                &PersistentString::new(&heap, "seven").unwrap(),
            )
            .unwrap();
            set_root(&heap, Some(&pair)).unwrap();
        }

        let heap: SharedHeap = Arc::new(DurableHeap::open(dir.path(), HeapConfig::default()).unwrap());
        let pair: Tuple2<PersistentLong, PersistentString> = load_root(&heap).unwrap().unwrap();
        assert_eq!(pair.to_string(), "Tuple2(7, seven)");
        assert_eq!(
            pair.object().type_descriptor().tag(),
            Tuple2::<PersistentLong, PersistentString>::type_descriptor().tag()
        );
    }
}
