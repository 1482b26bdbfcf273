//! Process-wide table of registered type descriptors.
//!
//! The table is created on first use and lives until process exit; there is
//! no teardown. Entries are leaked to `'static` on registration and never
//! removed or replaced, so a `&'static TypeDescriptor` stays valid for every
//! object that captured it.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use pheap_types::TypeTag;
use tracing::{debug, error};

use crate::error::LayoutError;
use crate::layout::TypeDescriptor;

static REGISTRY: OnceLock<RwLock<HashMap<TypeTag, &'static TypeDescriptor>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<TypeTag, &'static TypeDescriptor>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Insert a validated descriptor. Fails without side effects if its tag is
/// already taken.
pub(crate) fn register(descriptor: TypeDescriptor) -> Result<&'static TypeDescriptor, LayoutError> {
    let mut table = registry().write().expect("registry lock poisoned");
    if table.contains_key(&descriptor.tag()) {
        return Err(LayoutError::DuplicateType(descriptor.name().to_string()));
    }
    Ok(insert(&mut table, descriptor))
}

/// Insert a built-in descriptor, or return the one already registered under
/// the same name.
pub(crate) fn register_builtin(descriptor: TypeDescriptor) -> &'static TypeDescriptor {
    let mut table = registry().write().expect("registry lock poisoned");
    match table.get(&descriptor.tag()).copied() {
        Some(existing) if existing.name() == descriptor.name() => existing,
        Some(existing) => {
            error!(
                name = descriptor.name(),
                holder = existing.name(),
                tag = %descriptor.tag(),
                "built-in type tag already taken; instances will not reconstitute"
            );
            Box::leak(Box::new(descriptor))
        }
        None => insert(&mut table, descriptor),
    }
}

fn insert(
    table: &mut HashMap<TypeTag, &'static TypeDescriptor>,
    descriptor: TypeDescriptor,
) -> &'static TypeDescriptor {
    let descriptor: &'static TypeDescriptor = Box::leak(Box::new(descriptor));
    table.insert(descriptor.tag(), descriptor);
    debug!(
        name = descriptor.name(),
        tag = %descriptor.tag(),
        fields = descriptor.len(),
        "type registered"
    );
    descriptor
}

/// Find the descriptor registered under `tag`.
pub fn lookup(tag: TypeTag) -> Option<&'static TypeDescriptor> {
    registry()
        .read()
        .expect("registry lock poisoned")
        .get(&tag)
        .copied()
}

/// Sorted names of every registered type.
pub fn registered_types() -> Vec<String> {
    let table = registry().read().expect("registry lock poisoned");
    let mut names: Vec<String> = table.values().map(|d| d.name().to_string()).collect();
    names.sort();
    names
}

/// Display name for a tag: the registered type name, or the raw tag.
pub(crate) fn describe(tag: TypeTag) -> String {
    lookup(tag)
        .map(|d| d.name().to_string())
        .unwrap_or_else(|| format!("unregistered type {tag}"))
}
