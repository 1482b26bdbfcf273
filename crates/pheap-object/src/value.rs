//! Leaf values that tuples and other objects can reference.

use std::sync::OnceLock;

use pheap_types::TypeTag;

use crate::error::{ObjectError, ObjectResult};
use crate::field::FieldDescriptor;
use crate::layout::TypeDescriptor;
use crate::object::{Persistent, PersistentObject, PersistentType, SharedHeap};
use crate::registry;
use crate::tx::Transaction;

fn check_tag<T: Persistent>(object: &PersistentObject) -> ObjectResult<()> {
    let ty = object.type_descriptor();
    if T::accepts(ty.tag()) {
        Ok(())
    } else {
        Err(ObjectError::TypeMismatch {
            context: format!("region {}", object.handle()),
            expected: std::any::type_name::<T>().to_string(),
            found: ty.name().to_string(),
        })
    }
}

// ---- PersistentLong ----

/// An immutable persistent `i64`.
#[derive(Clone)]
pub struct PersistentLong {
    object: PersistentObject,
}

impl PersistentLong {
    /// Allocate and initialise in one transaction.
    pub fn new(heap: &SharedHeap, value: i64) -> ObjectResult<Self> {
        Transaction::run(heap, || -> ObjectResult<Self> {
            let object = PersistentObject::construct(heap, Self::type_descriptor())?;
            object.set_scalar(Self::value_field(), value)?;
            Ok(Self { object })
        })
    }

    pub fn value(&self) -> ObjectResult<i64> {
        self.object.get_scalar(Self::value_field())
    }

    fn value_field() -> &'static FieldDescriptor {
        &Self::type_descriptor().fields()[0]
    }
}

impl Persistent for PersistentLong {
    fn accepts(tag: TypeTag) -> bool {
        tag == Self::type_descriptor().tag()
    }

    fn from_object(object: PersistentObject) -> ObjectResult<Self> {
        check_tag::<Self>(&object)?;
        Ok(Self { object })
    }

    fn object(&self) -> &PersistentObject {
        &self.object
    }

    fn try_eq(&self, other: &Self) -> ObjectResult<bool> {
        Ok(self.object.same_storage(&other.object) || self.value()? == other.value()?)
    }

    fn try_hash(&self) -> ObjectResult<u64> {
        Ok(self.value()? as u64)
    }

    fn try_render(&self) -> ObjectResult<String> {
        Ok(self.value()?.to_string())
    }
}

impl PersistentType for PersistentLong {
    fn type_descriptor() -> &'static TypeDescriptor {
        static TYPE: OnceLock<&'static TypeDescriptor> = OnceLock::new();
        TYPE.get_or_init(|| {
            TypeDescriptor::builtin("pheap::Long", vec![FieldDescriptor::scalar("value")])
        })
    }
}

structural_traits!([] PersistentLong);

// ---- PersistentString ----

/// An immutable persistent UTF-8 string, stored as the region payload.
#[derive(Clone)]
pub struct PersistentString {
    object: PersistentObject,
}

impl PersistentString {
    pub fn new(heap: &SharedHeap, text: &str) -> ObjectResult<Self> {
        let object =
            PersistentObject::construct_with_payload(heap, Self::type_descriptor(), text.as_bytes())?;
        Ok(Self { object })
    }

    pub fn as_string(&self) -> ObjectResult<String> {
        String::from_utf8(self.object.payload()?).map_err(|e| ObjectError::TypeMismatch {
            context: format!("region {}", self.object.handle()),
            expected: "UTF-8 text".into(),
            found: format!("invalid byte at {}", e.utf8_error().valid_up_to()),
        })
    }
}

/// Content hash of string bytes: the first eight bytes of a
/// domain-separated BLAKE3 digest, little-endian.
fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"pheap-string-v1:");
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

impl Persistent for PersistentString {
    fn accepts(tag: TypeTag) -> bool {
        tag == Self::type_descriptor().tag()
    }

    fn from_object(object: PersistentObject) -> ObjectResult<Self> {
        check_tag::<Self>(&object)?;
        Ok(Self { object })
    }

    fn object(&self) -> &PersistentObject {
        &self.object
    }

    fn try_eq(&self, other: &Self) -> ObjectResult<bool> {
        Ok(self.object.same_storage(&other.object)
            || self.object.payload()? == other.object.payload()?)
    }

    fn try_hash(&self) -> ObjectResult<u64> {
        Ok(content_hash(&self.object.payload()?))
    }

    fn try_render(&self) -> ObjectResult<String> {
        self.as_string()
    }
}

impl PersistentType for PersistentString {
    fn type_descriptor() -> &'static TypeDescriptor {
        static TYPE: OnceLock<&'static TypeDescriptor> = OnceLock::new();
        TYPE.get_or_init(|| TypeDescriptor::builtin("pheap::String", Vec::new()))
    }
}

structural_traits!([] PersistentString);

// ---- AnyObject ----

/// An untyped reference to an object of any registered type.
///
/// Equality is identity: two `AnyObject`s are equal when they name the same
/// region of the same heap.
#[derive(Clone)]
pub struct AnyObject {
    object: PersistentObject,
}

impl AnyObject {
    /// Recover the concrete type, checking the region's tag first.
    pub fn downcast<T: PersistentType>(&self) -> ObjectResult<T> {
        check_tag::<T>(&self.object)?;
        T::from_object(self.object.clone())
    }
}

impl Persistent for AnyObject {
    fn accepts(tag: TypeTag) -> bool {
        registry::lookup(tag).is_some()
    }

    fn from_object(object: PersistentObject) -> ObjectResult<Self> {
        Ok(Self { object })
    }

    fn object(&self) -> &PersistentObject {
        &self.object
    }

    fn try_eq(&self, other: &Self) -> ObjectResult<bool> {
        Ok(self.object.same_storage(&other.object))
    }

    fn try_hash(&self) -> ObjectResult<u64> {
        Ok(self.object.handle().offset())
    }

    fn try_render(&self) -> ObjectResult<String> {
        Ok(format!(
            "{}@{}",
            self.object.type_descriptor().name(),
            self.object.handle()
        ))
    }
}

structural_traits!([] AnyObject);
