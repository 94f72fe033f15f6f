//! OTA file header decoding.
//!
//! All multi-byte fields are little endian. The fixed part of the header is
//! 56 bytes long; optional fields may follow and are skipped using the
//! `header length` field.
//!
//! ```text
//! offset  size  field
//!      0     4  magic (0x0BEEF11E)
//!      4     2  header version
//!      6     2  header length
//!      8     2  field control
//!     10     2  manufacturer code
//!     12     2  image type
//!     14     4  file version
//!     18     2  stack version
//!     20    32  header string
//!     52     4  total image size
//! ```

use std::fmt;

use serde::Deserialize;

use super::OtaError;

/// Magic number at the very start of every OTA file.
pub const HEADER_MAGIC: u32 = 0x0BEE_F11E;
/// Length of the mandatory part of the header.
pub const MIN_HEADER_LENGTH: u16 = 56;

/// Identifies one container among the stored ones.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ImageId {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
}
impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}-{:04X}-{:08X}",
            self.manufacturer_code, self.image_type, self.file_version
        )
    }
}

/// The decoded header of an OTA file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtaHeader {
    pub header_version: u16,
    pub header_length: u16,
    pub field_control: u16,
    pub image_id: ImageId,
    pub stack_version: u16,
    /// Free text, trailing NUL bytes stripped.
    pub header_string: String,
    /// Size of the whole file, header included.
    pub total_image_size: u32,
}
impl OtaHeader {
    /// Decode the fixed part of a header from the first bytes of a file.
    pub fn parse(bytes: &[u8]) -> Result<Self, OtaError> {
        if bytes.len() < MIN_HEADER_LENGTH as usize {
            return Err(OtaError::Truncated("header"));
        }

        let raw: RawHeader = bincode::deserialize(bytes)?;
        if raw.magic != HEADER_MAGIC {
            return Err(OtaError::BadMagic(raw.magic));
        }
        if raw.header_length < MIN_HEADER_LENGTH {
            return Err(OtaError::BadHeaderLength(raw.header_length));
        }
        if raw.total_image_size < u32::from(raw.header_length) {
            return Err(OtaError::Truncated("total image size shorter than header"));
        }

        Ok(OtaHeader {
            header_version: raw.header_version,
            header_length: raw.header_length,
            field_control: raw.field_control,
            image_id: ImageId {
                manufacturer_code: raw.manufacturer_code,
                image_type: raw.image_type,
                file_version: raw.file_version,
            },
            stack_version: raw.stack_version,
            header_string: String::from_utf8_lossy(&raw.header_string)
                .trim_end_matches('\0')
                .to_owned(),
            total_image_size: raw.total_image_size,
        })
    }
}

/// The fixed part of the header as laid out on disk. Bincode's default
/// encoding is little endian with fixed-width integers, which is exactly the
/// OTA layout.
#[derive(Deserialize, Debug)]
struct RawHeader {
    magic: u32,
    header_version: u16,
    header_length: u16,
    field_control: u16,
    manufacturer_code: u16,
    image_type: u16,
    file_version: u32,
    stack_version: u16,
    header_string: [u8; 32],
    total_image_size: u32,
}

/// The `tag id` + `length` prefix of every sub-element.
#[derive(Deserialize, Debug)]
pub(crate) struct TagPrefix {
    pub tag_id: u16,
    pub length: u32,
}

// =============================================================================
// Unit Tests
// =============================================================================
