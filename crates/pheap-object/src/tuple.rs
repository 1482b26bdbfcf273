//! Fixed-arity persistent tuples.
//!
//! `Tuple1` through `Tuple11` are generated by one macro and share a single
//! contract: field `k` is read and written by `get_k`/`set_k`, equality and
//! hashing are structural over the fields, and a tuple built with
//! [`with_values`](Tuple2::with_values) is initialised in one transaction,
//! so no reader ever sees some of its fields set and others not.
//!
//! A tuple's hash is the wrapping sum of its fields' hashes and changes
//! whenever a field does. Do not mutate a tuple while it is a key in a
//! hashed collection.

use std::marker::PhantomData;
use std::sync::OnceLock;

use pheap_types::{Slot, TypeTag};
use tracing::debug;

use crate::error::{ObjectError, ObjectResult};
use crate::field::FieldDescriptor;
use crate::layout::TypeDescriptor;
use crate::object::{Persistent, PersistentObject, PersistentType, SharedHeap};
use crate::tx::Transaction;

fn field_eq<T: Persistent>(
    left: &PersistentObject,
    right: &PersistentObject,
    field: &FieldDescriptor,
    a: Slot,
    b: Slot,
) -> ObjectResult<bool> {
    if a == b && left.heap_id() == right.heap_id() {
        return Ok(true);
    }
    match (
        left.resolve_slot::<T>(field, a)?,
        right.resolve_slot::<T>(field, b)?,
    ) {
        (None, None) => Ok(true),
        (Some(x), Some(y)) => x.try_eq(&y),
        _ => Ok(false),
    }
}

fn field_hash<T: Persistent>(
    object: &PersistentObject,
    field: &FieldDescriptor,
    slot: Slot,
) -> ObjectResult<u64> {
    match object.resolve_slot::<T>(field, slot)? {
        Some(value) => value.try_hash(),
        None => Ok(0),
    }
}

fn field_render<T: Persistent>(
    object: &PersistentObject,
    field: &FieldDescriptor,
    slot: Slot,
) -> ObjectResult<String> {
    match object.resolve_slot::<T>(field, slot)? {
        Some(value) => value.try_render(),
        None => Ok("null".to_string()),
    }
}

fn slot_at(object: &PersistentObject, slots: &[Slot], index: usize) -> ObjectResult<Slot> {
    slots
        .get(index)
        .copied()
        .ok_or_else(|| ObjectError::TypeMismatch {
            context: format!("region {}", object.handle()),
            expected: format!("at least {} slots", index + 1),
            found: format!("{} slots", slots.len()),
        })
}

macro_rules! persistent_tuple {
    (
        $name:ident, $arity:literal, $type_name:literal;
        $( $idx:tt => $t:ident, $v:ident, $get:ident, $set:ident, $field:literal );+ $(;)?
    ) => {
        #[doc = concat!("A persistent tuple of ", $arity, " object fields.")]
        pub struct $name<$($t),+> {
            object: PersistentObject,
            _fields: PhantomData<fn() -> ($($t,)+)>,
        }

        impl<$($t),+> Clone for $name<$($t),+> {
            fn clone(&self) -> Self {
                Self {
                    object: self.object.clone(),
                    _fields: PhantomData,
                }
            }
        }

        impl<$($t: Persistent),+> $name<$($t),+> {
            /// Number of fields.
            pub const ARITY: usize = $arity;

            /// Allocate a tuple with every field absent.
            pub fn new(heap: &SharedHeap) -> ObjectResult<Self> {
                let object = PersistentObject::construct(heap, Self::type_descriptor())?;
                Ok(Self::wrap(object))
            }

            /// Allocate a tuple and set every field in one transaction.
            ///
            /// On failure the fresh region is released again.
            pub fn with_values(heap: &SharedHeap, $($v: &$t),+) -> ObjectResult<Self> {
                let tuple = Transaction::run(heap, || -> ObjectResult<Self> {
                    let tuple = Self::new(heap)?;
                    $( tuple.$set(Some($v))?; )+
                    Ok(tuple)
                })?;
                debug!(
                    type_name = $type_name,
                    handle = %tuple.object.handle(),
                    "tuple initialised"
                );
                Ok(tuple)
            }

            $(
                pub fn $get(&self) -> ObjectResult<Option<$t>> {
                    self.object.get_field(&Self::type_descriptor().fields()[$idx])
                }

                pub fn $set(&self, value: Option<&$t>) -> ObjectResult<()> {
                    self.object.set_field(&Self::type_descriptor().fields()[$idx], value)
                }
            )+

            fn wrap(object: PersistentObject) -> Self {
                Self {
                    object,
                    _fields: PhantomData,
                }
            }
        }

        impl<$($t: Persistent),+> Persistent for $name<$($t),+> {
            fn accepts(tag: TypeTag) -> bool {
                tag == Self::type_descriptor().tag()
            }

            fn from_object(object: PersistentObject) -> ObjectResult<Self> {
                let ty = Self::type_descriptor();
                if object.type_descriptor().tag() != ty.tag() {
                    return Err(ObjectError::TypeMismatch {
                        context: format!("region {}", object.handle()),
                        expected: ty.name().to_string(),
                        found: object.type_descriptor().name().to_string(),
                    });
                }
                Ok(Self::wrap(object))
            }

            fn object(&self) -> &PersistentObject {
                &self.object
            }

            fn try_eq(&self, other: &Self) -> ObjectResult<bool> {
                if self.object.same_storage(&other.object) {
                    return Ok(true);
                }
                let fields = Self::type_descriptor().fields();
                let left = self.object.snapshot()?;
                let right = other.object.snapshot()?;
                $(
                    if !field_eq::<$t>(
                        &self.object,
                        &other.object,
                        &fields[$idx],
                        slot_at(&self.object, &left, $idx)?,
                        slot_at(&other.object, &right, $idx)?,
                    )? {
                        return Ok(false);
                    }
                )+
                Ok(true)
            }

            fn try_hash(&self) -> ObjectResult<u64> {
                let fields = Self::type_descriptor().fields();
                let slots = self.object.snapshot()?;
                let mut hash = 0u64;
                $(
                    hash = hash.wrapping_add(field_hash::<$t>(
                        &self.object,
                        &fields[$idx],
                        slot_at(&self.object, &slots, $idx)?,
                    )?);
                )+
                Ok(hash)
            }

            fn try_render(&self) -> ObjectResult<String> {
                let fields = Self::type_descriptor().fields();
                let slots = self.object.snapshot()?;
                let parts = [
                    $(
                        field_render::<$t>(
                            &self.object,
                            &fields[$idx],
                            slot_at(&self.object, &slots, $idx)?,
                        )?,
                    )+
                ];
                Ok(format!("{}({})", stringify!($name), parts.join(", ")))
            }
        }

        impl<$($t: Persistent),+> PersistentType for $name<$($t),+> {
            fn type_descriptor() -> &'static TypeDescriptor {
                static TYPE: OnceLock<&'static TypeDescriptor> = OnceLock::new();
                TYPE.get_or_init(|| {
                    TypeDescriptor::builtin(
                        $type_name,
                        vec![$(FieldDescriptor::object($field)),+],
                    )
                })
            }
        }

        structural_traits!([$($t),+] $name<$($t),+>);
    };
}

persistent_tuple!(Tuple1, 1, "pheap::Tuple1";
    0 => T1, v1, get_1, set_1, "_1");
persistent_tuple!(Tuple2, 2, "pheap::Tuple2";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2");
persistent_tuple!(Tuple3, 3, "pheap::Tuple3";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3");
persistent_tuple!(Tuple4, 4, "pheap::Tuple4";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4");
persistent_tuple!(Tuple5, 5, "pheap::Tuple5";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5");
persistent_tuple!(Tuple6, 6, "pheap::Tuple6";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5";
    5 => T6, v6, get_6, set_6, "_6");
persistent_tuple!(Tuple7, 7, "pheap::Tuple7";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5";
    5 => T6, v6, get_6, set_6, "_6";
    6 => T7, v7, get_7, set_7, "_7");
persistent_tuple!(Tuple8, 8, "pheap::Tuple8";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5";
    5 => T6, v6, get_6, set_6, "_6";
    6 => T7, v7, get_7, set_7, "_7";
    7 => T8, v8, get_8, set_8, "_8");
persistent_tuple!(Tuple9, 9, "pheap::Tuple9";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5";
    5 => T6, v6, get_6, set_6, "_6";
    6 => T7, v7, get_7, set_7, "_7";
    7 => T8, v8, get_8, set_8, "_8";
    8 => T9, v9, get_9, set_9, "_9");
persistent_tuple!(Tuple10, 10, "pheap::Tuple10";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5";
    5 => T6, v6, get_6, set_6, "_6";
    6 => T7, v7, get_7, set_7, "_7";
    7 => T8, v8, get_8, set_8, "_8";
    8 => T9, v9, get_9, set_9, "_9";
    9 => T10, v10, get_10, set_10, "_10");
persistent_tuple!(Tuple11, 11, "pheap::Tuple11";
    0 => T1, v1, get_1, set_1, "_1";
    1 => T2, v2, get_2, set_2, "_2";
    2 => T3, v3, get_3, set_3, "_3";
    3 => T4, v4, get_4, set_4, "_4";
    4 => T5, v5, get_5, set_5, "_5";
    5 => T6, v6, get_6, set_6, "_6";
    6 => T7, v7, get_7, set_7, "_7";
    7 => T8, v8, get_8, set_8, "_8";
    8 => T9, v9, get_9, set_9, "_9";
    9 => T10, v10, get_10, set_10, "_10";
    10 => T11, v11, get_11, set_11, "_11");

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;
    use std::hash::{Hash, Hasher};
    use std::path::Path;
    use std::sync::Arc;

    use pheap_store::{DurableHeap, HeapConfig, InMemoryHeap, LogRecord, SlotWrite};
    use pheap_types::Handle;
    use proptest::prelude::*;

    use super::*;
    use crate::error::LayoutError;
    use crate::value::{AnyObject, PersistentLong, PersistentString};

    fn heap() -> SharedHeap {
        Arc::new(InMemoryHeap::new())
    }

    fn long(heap: &SharedHeap, v: i64) -> PersistentLong {
        PersistentLong::new(heap, v).unwrap()
    }

    fn text(heap: &SharedHeap, s: &str) -> PersistentString {
        PersistentString::new(heap, s).unwrap()
    }

    fn std_hash<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    // ---- construction & access ----

    #[test]
    fn arity_matches_type() {
        assert_eq!(Tuple1::<PersistentLong>::ARITY, 1);
        assert_eq!(Tuple3::<PersistentLong, PersistentLong, PersistentLong>::ARITY, 3);
        assert_eq!(
            <Tuple4<AnyObject, AnyObject, AnyObject, AnyObject>>::type_descriptor().len(),
            4
        );
    }

    #[test]
    fn new_tuple_has_all_fields_absent() {
        let heap = heap();
        let t = Tuple3::<PersistentLong, PersistentString, AnyObject>::new(&heap).unwrap();
        assert!(t.get_1().unwrap().is_none());
        assert!(t.get_2().unwrap().is_none());
        assert!(t.get_3().unwrap().is_none());
        assert_eq!(t.to_string(), "Tuple3(null, null, null)");
    }

    #[test]
    fn with_values_sets_every_field_in_order() {
        let heap = heap();
        let (a, b, c) = (long(&heap, 1), text(&heap, "two"), long(&heap, 3));
        let t = Tuple3::with_values(&heap, &a, &b, &c).unwrap();
        assert_eq!(t.get_1().unwrap().unwrap().value().unwrap(), 1);
        assert_eq!(t.get_2().unwrap().unwrap().as_string().unwrap(), "two");
        assert_eq!(t.get_3().unwrap().unwrap().value().unwrap(), 3);
        assert_eq!(t.to_string(), "Tuple3(1, two, 3)");
    }

    #[test]
    fn largest_arity_round_trips() {
        let heap = heap();
        let v: Vec<PersistentLong> = (1..=11).map(|i| long(&heap, i)).collect();
        let t = Tuple11::with_values(
            &heap, &v[0], &v[1], &v[2], &v[3], &v[4], &v[5], &v[6], &v[7], &v[8], &v[9], &v[10],
        )
        .unwrap();
        assert_eq!(t.get_1().unwrap().unwrap().value().unwrap(), 1);
        assert_eq!(t.get_11().unwrap().unwrap().value().unwrap(), 11);
        assert_eq!(t.try_hash().unwrap(), (1..=11).sum::<i64>() as u64);
    }

    #[test]
    fn setting_a_field_replaces_only_that_field() {
        let heap = heap();
        let (a, b, b2, c) = (long(&heap, 1), long(&heap, 2), long(&heap, 20), long(&heap, 3));
        let t = Tuple3::with_values(&heap, &a, &b, &c).unwrap();
        t.set_2(Some(&b2)).unwrap();

        let expected = Tuple3::with_values(&heap, &a, &b2, &c).unwrap();
        assert_eq!(t, expected);
        assert_eq!(t.try_hash().unwrap(), expected.try_hash().unwrap());
        assert_eq!(std_hash(&t), std_hash(&expected));

        t.set_2(None).unwrap();
        assert!(t.get_2().unwrap().is_none());
        assert_eq!(t.to_string(), "Tuple3(1, null, 3)");
    }

    #[test]
    fn nested_tuples_compare_structurally() {
        let heap = heap();
        let inner1 = Tuple1::with_values(&heap, &text(&heap, "x")).unwrap();
        let inner2 = Tuple1::with_values(&heap, &text(&heap, "x")).unwrap();
        let a = Tuple2::with_values(&heap, &long(&heap, 5), &inner1).unwrap();
        let b = Tuple2::with_values(&heap, &long(&heap, 5), &inner2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Tuple2(5, Tuple1(x))");
        let back: Tuple1<PersistentString> = a.get_2().unwrap().unwrap();
        assert_eq!(back, inner1);
    }

    #[test]
    fn reading_a_field_as_the_wrong_type_fails() {
        let heap = heap();
        let t = Tuple1::with_values(&heap, &text(&heap, "s")).unwrap();
        let view = Tuple1::<PersistentLong>::reconstitute(&heap, t.handle()).unwrap();
        assert!(matches!(
            view.get_1(),
            Err(ObjectError::TypeMismatch { .. })
        ));
        // AnyObject accepts everything registered.
        let any = Tuple1::<AnyObject>::reconstitute(&heap, t.handle()).unwrap();
        assert!(any.get_1().unwrap().is_some());
    }

    #[test]
    fn reconstitute_rejects_other_arity() {
        let heap = heap();
        let t = Tuple2::with_values(&heap, &long(&heap, 1), &long(&heap, 2)).unwrap();
        assert!(matches!(
            Tuple3::<PersistentLong, PersistentLong, PersistentLong>::reconstitute(&heap, t.handle()),
            Err(ObjectError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn dangling_tuple_handle_is_reported() {
        let heap = heap();
        let t = Tuple1::<PersistentLong>::new(&heap).unwrap();
        heap.deallocate(t.handle()).unwrap();
        assert!(matches!(
            Tuple1::<PersistentLong>::reconstitute(&heap, t.handle()),
            Err(ObjectError::DanglingHandle(_))
        ));
    }

    #[test]
    fn rehydrated_accessor_sees_same_values() {
        let heap = heap();
        let t = Tuple2::with_values(&heap, &long(&heap, 8), &text(&heap, "nine")).unwrap();
        let again = Tuple2::<PersistentLong, PersistentString>::reconstitute(&heap, t.handle()).unwrap();
        assert_eq!(again.get_1().unwrap().unwrap().value().unwrap(), 8);
        assert_eq!(again.get_2().unwrap().unwrap().as_string().unwrap(), "nine");
        assert_eq!(again, t);
    }

    #[test]
    fn tuples_work_as_set_keys() {
        let heap = heap();
        let mut set = HashSet::new();
        set.insert(Tuple2::with_values(&heap, &long(&heap, 1), &long(&heap, 2)).unwrap());
        let key = Tuple2::with_values(&heap, &long(&heap, 1), &long(&heap, 2)).unwrap();
        assert!(set.contains(&key));
    }

    #[test]
    fn user_type_cannot_claim_builtin_tuple_name() {
        let err = TypeDescriptor::from_fields("pheap::Tuple9", vec![FieldDescriptor::object("_1")])
            .unwrap_err();
        assert_eq!(err, LayoutError::ReservedName("pheap::Tuple9".into()));

        let heap = heap();
        type Nine = Tuple9<
            PersistentLong,
            PersistentLong,
            PersistentLong,
            PersistentLong,
            PersistentLong,
            PersistentLong,
            PersistentLong,
            PersistentLong,
            PersistentLong,
        >;
        let t = Nine::new(&heap).unwrap();
        assert_eq!(t.object().type_descriptor().name(), "pheap::Tuple9");
        assert_eq!(Nine::type_descriptor().len(), 9);
    }

    #[test]
    fn failed_with_values_releases_the_tuple() {
        let heap = heap();
        let elsewhere: SharedHeap = Arc::new(InMemoryHeap::new());
        let local = long(&heap, 1);
        let foreign = long(&elsewhere, 2);
        let before = heap.stats().regions;

        assert!(matches!(
            Tuple2::with_values(&heap, &local, &foreign),
            Err(ObjectError::ForeignHeap { .. })
        ));
        assert_eq!(heap.stats().regions, before);
    }

    #[test]
    fn aborted_outer_transaction_releases_every_allocation() {
        let heap = heap();
        let before = heap.stats().regions;
        let result = Transaction::run(&heap, || -> ObjectResult<()> {
            let a = PersistentLong::new(&heap, 1)?;
            let b = PersistentLong::new(&heap, 2)?;
            Tuple2::with_values(&heap, &a, &b)?;
            Tuple1::with_values(&heap, &text(&heap, "gone"))?;
            Err(ObjectError::abort("caller gave up"))
        });
        assert!(result.is_err());
        assert_eq!(heap.stats().regions, before);
    }

    #[test]
    fn different_arities_never_accept_each_other() {
        assert!(!Tuple1::<AnyObject>::accepts(
            Tuple2::<AnyObject, AnyObject>::type_descriptor().tag()
        ));
    }

    // ---- durability ----

    fn open(dir: &Path) -> SharedHeap {
        Arc::new(DurableHeap::open(dir, HeapConfig::default()).unwrap())
    }

    #[test]
    fn tuple_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let handle = {
            let heap = open(dir.path());
            let t = Tuple2::with_values(&heap, &long(&heap, 4), &text(&heap, "four")).unwrap();
            t.handle()
        };
        let heap = open(dir.path());
        let t = Tuple2::<PersistentLong, PersistentString>::reconstitute(&heap, handle).unwrap();
        assert_eq!(t.to_string(), "Tuple2(4, four)");
    }

    #[test]
    fn crash_during_construction_leaves_no_partial_tuple() {
        let dir = tempfile::tempdir().unwrap();
        let handle: Handle = {
            let durable = Arc::new(DurableHeap::open(dir.path(), HeapConfig::default()).unwrap());
            let heap: SharedHeap = durable.clone();
            let t = Tuple2::<PersistentLong, PersistentLong>::new(&heap).unwrap();
            let a = long(&heap, 1);
            // The first write of the initialising group reached the log;
            // the process died before the rest and the commit record.
            durable
                .wal()
                .append(&LogRecord::Write {
                    txn: 1_000_000,
                    write: SlotWrite {
                        handle: t.handle(),
                        slot: 0,
                        value: Slot::reference(PersistentLong::type_descriptor().tag(), a.handle()),
                    },
                })
                .unwrap();
            t.handle()
        };

        let durable = DurableHeap::open(dir.path(), HeapConfig::default()).unwrap();
        assert_eq!(durable.recovery().groups_discarded, 1);
        let heap: SharedHeap = Arc::new(durable);
        let t = Tuple2::<PersistentLong, PersistentLong>::reconstitute(&heap, handle).unwrap();
        assert!(t.get_1().unwrap().is_none());
        assert!(t.get_2().unwrap().is_none());
    }

    #[test]
    fn crash_mid_update_keeps_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let handle = {
            let durable = Arc::new(DurableHeap::open(dir.path(), HeapConfig::default()).unwrap());
            let heap: SharedHeap = durable.clone();
            let t = Tuple2::with_values(&heap, &long(&heap, 1), &long(&heap, 2)).unwrap();
            let replacement = long(&heap, 99);
            durable
                .wal()
                .append(&LogRecord::Write {
                    txn: 1_000_000,
                    write: SlotWrite {
                        handle: t.handle(),
                        slot: 1,
                        value: Slot::reference(
                            PersistentLong::type_descriptor().tag(),
                            replacement.handle(),
                        ),
                    },
                })
                .unwrap();
            t.handle()
        };

        let heap = open(dir.path());
        let t = Tuple2::<PersistentLong, PersistentLong>::reconstitute(&heap, handle).unwrap();
        assert_eq!(t.get_1().unwrap().unwrap().value().unwrap(), 1);
        assert_eq!(t.get_2().unwrap().unwrap().value().unwrap(), 2);
    }

    #[test]
    fn crash_between_long_allocation_and_value_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let handle = {
            let durable = Arc::new(DurableHeap::open(dir.path(), HeapConfig::default()).unwrap());
            let heap: SharedHeap = durable.clone();
            // The allocation group committed; the value group did not.
            let object =
                PersistentObject::construct(&heap, PersistentLong::type_descriptor()).unwrap();
            durable
                .wal()
                .append(&LogRecord::Write {
                    txn: 1_000_000,
                    write: SlotWrite {
                        handle: object.handle(),
                        slot: 0,
                        value: Slot::Scalar(7),
                    },
                })
                .unwrap();
            object.handle()
        };

        let heap = open(dir.path());
        let value = PersistentLong::reconstitute(&heap, handle).unwrap();
        assert_eq!(value.value().unwrap(), 0);
    }

    // ---- concurrency ----

    #[test]
    fn concurrent_set_and_get_never_tear() {
        let heap = heap();
        let pool: Vec<PersistentLong> = (0..4).map(|i| long(&heap, i)).collect();
        let t = Tuple1::with_values(&heap, &pool[0]).unwrap();

        let writers: Vec<_> = pool
            .iter()
            .cloned()
            .map(|v| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.set_1(Some(&v)).unwrap();
                    }
                })
            })
            .collect();
        let handles: Vec<Handle> = pool.iter().map(|v| v.handle()).collect();
        let reader = {
            let t = Tuple1::<PersistentLong>::reconstitute(&heap, t.handle()).unwrap();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let current = t.get_1().unwrap().unwrap();
                    assert!(handles.contains(&current.handle()));
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
    }

    // ---- properties ----

    proptest! {
        #[test]
        fn hash_is_sum_of_field_hashes(a in any::<i64>(), b in any::<i64>(), c in any::<i64>()) {
            let heap = heap();
            let t = Tuple3::with_values(&heap, &long(&heap, a), &long(&heap, b), &long(&heap, c)).unwrap();
            let expected = (a as u64).wrapping_add(b as u64).wrapping_add(c as u64);
            prop_assert_eq!(t.try_hash().unwrap(), expected);
        }

        #[test]
        fn equality_is_structural(a in any::<i64>(), b in any::<i64>(), x in any::<i64>(), y in any::<i64>()) {
            let heap = heap();
            let left = Tuple2::with_values(&heap, &long(&heap, a), &long(&heap, b)).unwrap();
            let right = Tuple2::with_values(&heap, &long(&heap, x), &long(&heap, y)).unwrap();
            prop_assert_eq!(left == right, a == x && b == y);
            prop_assert_eq!(left == right, right == left);
            prop_assert!(left == left.clone());
            if left == right {
                prop_assert_eq!(std_hash(&left), std_hash(&right));
            }
        }

        #[test]
        fn equality_is_transitive(a in 0i64..3, b in 0i64..3, c in 0i64..3) {
            let heap = heap();
            let x = Tuple1::with_values(&heap, &long(&heap, a)).unwrap();
            let y = Tuple1::with_values(&heap, &long(&heap, b)).unwrap();
            let z = Tuple1::with_values(&heap, &long(&heap, c)).unwrap();
            if x == y && y == z {
                prop_assert!(x == z);
            }
            prop_assert_eq!(x == z, a == c);
        }
    }
}
