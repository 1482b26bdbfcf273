use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FIELD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`FieldDescriptor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u64);

impl FieldId {
    fn next() -> Self {
        Self(NEXT_FIELD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// What a field may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A reference to another persistent object, or absent.
    Object,
    /// A plain `i64`.
    Scalar,
}

/// Identity token naming one slot in an object layout.
///
/// A descriptor carries no value; it selects a slot. Equality and hashing
/// are by identity only: two descriptors with the same name and kind are
/// still distinct fields. Clones share the identity.
#[derive(Clone)]
pub struct FieldDescriptor {
    id: FieldId,
    name: String,
    kind: FieldKind,
}

impl FieldDescriptor {
    /// A field holding references to persistent objects.
    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Object)
    }

    /// A field holding an `i64`.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar)
    }

    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: FieldId::next(),
            name: name.into(),
            kind,
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FieldDescriptor {}

impl Hash for FieldDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({}#{}, {:?})", self.name, self.id.0, self.kind)
    }
}
