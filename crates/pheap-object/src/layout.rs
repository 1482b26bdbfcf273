use std::collections::HashSet;
use std::fmt;

use pheap_store::{RegionLayout, StoreError};
use pheap_types::TypeTag;

use crate::error::{LayoutError, ObjectError, ObjectResult};
use crate::field::FieldDescriptor;
use crate::registry;

/// Type-name prefix reserved for the library's own types.
pub const RESERVED_PREFIX: &str = "pheap::";

/// Ordered, immutable list of field descriptors defining one object type.
///
/// Field order is slot order: field `k` lives in slot `k` of every region of
/// this type. Descriptors are created once per type, registered process-wide
/// under their [`TypeTag`], and shared read-only by every instance.
pub struct TypeDescriptor {
    name: String,
    tag: TypeTag,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Validate `fields`, freeze their order, and register the type.
    ///
    /// Fails with [`LayoutError::ReservedName`] for a name under
    /// [`RESERVED_PREFIX`], [`LayoutError::Empty`] for an empty list,
    /// [`LayoutError::DuplicateField`] when a descriptor repeats, and
    /// [`LayoutError::DuplicateType`] when `name` is already registered. On
    /// failure nothing is registered.
    pub fn from_fields(
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Result<&'static TypeDescriptor, LayoutError> {
        let name = name.into();
        check_name(&name)?;
        if fields.is_empty() {
            return Err(LayoutError::Empty { type_name: name });
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.id()) {
                return Err(LayoutError::DuplicateField {
                    type_name: name,
                    field: field.name().to_string(),
                });
            }
        }
        registry::register(Self::new(name, fields))
    }

    /// Register a type with no slots whose whole state is the immutable
    /// region payload.
    pub fn opaque(name: impl Into<String>) -> Result<&'static TypeDescriptor, LayoutError> {
        let name = name.into();
        check_name(&name)?;
        registry::register(Self::new(name, Vec::new()))
    }

    /// Register one of the library's own types under [`RESERVED_PREFIX`].
    pub(crate) fn builtin(name: &'static str, fields: Vec<FieldDescriptor>) -> &'static Self {
        registry::register_builtin(Self::new(name.to_string(), fields))
    }

    fn new(name: String, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            tag: TypeTag::derive(&name),
            name,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Number of fields (slots).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// Slot index of `field` in this type.
    pub fn slot_of(&self, field: &FieldDescriptor) -> Result<u32, LayoutError> {
        self.fields
            .iter()
            .position(|f| f == field)
            .map(|i| i as u32)
            .ok_or_else(|| LayoutError::UnknownField {
                type_name: self.name.clone(),
                field: field.name().to_string(),
            })
    }

    /// Region layout for an instance carrying `payload_len` payload bytes.
    pub fn layout(&self, payload_len: usize) -> ObjectResult<RegionLayout> {
        let payload_len = u32::try_from(payload_len).map_err(|_| {
            ObjectError::Allocation(StoreError::OutOfSpace {
                requested: payload_len as u64,
                available: u32::MAX as u64,
            })
        })?;
        Ok(RegionLayout::new(self.tag, self.fields.len() as u32, payload_len))
    }
}

fn check_name(name: &str) -> Result<(), LayoutError> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(LayoutError::ReservedName(name.to_string()));
    }
    Ok(())
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("fields", &self.fields)
            .finish()
    }
}
