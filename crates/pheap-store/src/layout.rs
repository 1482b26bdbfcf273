use serde::{Deserialize, Serialize};

use pheap_types::{TypeTag, SLOT_SIZE};

/// Bytes reserved at the start of every region for its header.
pub const HEADER_SIZE: usize = 16;

/// Region sizes are rounded up to this boundary so handles stay aligned.
pub const REGION_ALIGN: u64 = 16;

/// Byte layout of one heap region.
///
/// ```text
/// [8 bytes: type tag (little-endian u64)]
/// [4 bytes: slot count (little-endian u32)]
/// [4 bytes: payload length (little-endian u32)]
/// [slot count * 16 bytes: slots]
/// [payload length bytes: immutable payload]
/// ```
///
/// The header doubles as the layout record: resolving a handle decodes the
/// header back into a `RegionLayout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionLayout {
    pub type_tag: TypeTag,
    pub slots: u32,
    pub payload_len: u32,
}

impl RegionLayout {
    pub fn new(type_tag: TypeTag, slots: u32, payload_len: u32) -> Self {
        Self {
            type_tag,
            slots,
            payload_len,
        }
    }

    /// Total region size in bytes, header included.
    pub fn size(&self) -> u64 {
        HEADER_SIZE as u64 + self.slots as u64 * SLOT_SIZE as u64 + self.payload_len as u64
    }

    /// Size rounded up to [`REGION_ALIGN`].
    pub fn aligned_size(&self) -> u64 {
        self.size().div_ceil(REGION_ALIGN) * REGION_ALIGN
    }

    /// Byte offset of slot `index` within the region.
    pub fn slot_offset(&self, index: u32) -> usize {
        HEADER_SIZE + index as usize * SLOT_SIZE
    }

    /// Byte offset of the payload within the region.
    pub fn payload_offset(&self) -> usize {
        HEADER_SIZE + self.slots as usize * SLOT_SIZE
    }

    pub fn encode_header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[..8].copy_from_slice(&self.type_tag.as_u64().to_le_bytes());
        header[8..12].copy_from_slice(&self.slots.to_le_bytes());
        header[12..].copy_from_slice(&self.payload_len.to_le_bytes());
        header
    }

    /// Decode a header. Returns `None` if the tag is one of the reserved
    /// values, which no allocated region carries.
    pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Option<Self> {
        let tag = u64::from_le_bytes(header[..8].try_into().ok()?);
        let slots = u32::from_le_bytes(header[8..12].try_into().ok()?);
        let payload_len = u32::from_le_bytes(header[12..].try_into().ok()?);
        Some(Self {
            type_tag: TypeTag::from_raw(tag)?,
            slots,
            payload_len,
        })
    }
}
