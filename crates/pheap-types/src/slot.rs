use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::handle::Handle;
use crate::tag::TypeTag;

/// Width in bytes of one encoded slot.
pub const SLOT_SIZE: usize = 16;

/// The value held by one object field.
///
/// On storage a slot is a fixed 16-byte cell:
/// ```text
/// [8 bytes: tag (little-endian u64)]
/// [8 bytes: value (little-endian u64)]
/// ```
/// A zero tag is an absent field, `u64::MAX` a scalar, and any other tag a
/// reference to a region of that type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// No value. Freshly allocated slots read as absent.
    #[default]
    Absent,
    /// A plain signed integer.
    Scalar(i64),
    /// A reference to another persistent object.
    Ref { tag: TypeTag, handle: Handle },
}

impl Slot {
    /// Reference slot for `handle` of type `tag`.
    pub fn reference(tag: TypeTag, handle: Handle) -> Self {
        Self::Ref { tag, handle }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The referenced handle, if this is a reference slot.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Ref { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Encode into the fixed on-storage cell.
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let (tag, value) = match self {
            Self::Absent => (TypeTag::ABSENT, 0),
            Self::Scalar(v) => (TypeTag::SCALAR, *v as u64),
            Self::Ref { tag, handle } => (tag.as_u64(), handle.offset()),
        };
        let mut cell = [0u8; SLOT_SIZE];
        cell[..8].copy_from_slice(&tag.to_le_bytes());
        cell[8..].copy_from_slice(&value.to_le_bytes());
        cell
    }

    /// Decode a cell read back from storage.
    pub fn decode(cell: &[u8]) -> Result<Self, TypeError> {
        if cell.len() != SLOT_SIZE {
            return Err(TypeError::InvalidLength {
                expected: SLOT_SIZE,
                actual: cell.len(),
            });
        }
        let mut tag = [0u8; 8];
        let mut value = [0u8; 8];
        tag.copy_from_slice(&cell[..8]);
        value.copy_from_slice(&cell[8..]);
        let tag = u64::from_le_bytes(tag);
        let value = u64::from_le_bytes(value);

        match tag {
            TypeTag::ABSENT => Ok(Self::Absent),
            TypeTag::SCALAR => Ok(Self::Scalar(value as i64)),
            raw => {
                if value == 0 {
                    return Err(TypeError::NullReference { tag: raw });
                }
                let tag = TypeTag::from_raw(raw).ok_or(TypeError::NullReference { tag: raw })?;
                Ok(Self::Ref {
                    tag,
                    handle: Handle::from_offset(value),
                })
            }
        }
    }
}
