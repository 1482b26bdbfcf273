use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable type identity written into every region header and every
/// reference slot.
///
/// A `TypeTag` is derived deterministically from the type name with
/// domain-separated BLAKE3, so the same name maps to the same tag in every
/// process that opens the heap. Two values are reserved: `0` marks an absent
/// slot and `u64::MAX` marks a scalar slot; derivation never produces them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(u64);

impl TypeTag {
    /// Raw value reserved for absent slots.
    pub const ABSENT: u64 = 0;
    /// Raw value reserved for scalar slots.
    pub const SCALAR: u64 = u64::MAX;

    /// Derive the tag for a type name.
    pub fn derive(type_name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"pheap-type-v1:");
        hasher.update(type_name.as_bytes());
        let hash = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        Self::from_derived(u64::from_le_bytes(word))
    }

    /// Rebuild a tag read back from storage. Returns `None` for the reserved
    /// values.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            Self::ABSENT | Self::SCALAR => None,
            raw => Some(Self(raw)),
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    fn from_derived(raw: u64) -> Self {
        match raw {
            Self::ABSENT => Self(1),
            Self::SCALAR => Self(u64::MAX - 1),
            raw => Self(raw),
        }
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({:#018x})", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
