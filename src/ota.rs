//! Tag lookup inside OTA container files.
//!
//! An OTA file is a header followed by a sequence of tagged sub-elements,
//! one of which is the boot-loader image pushed to the NCP. Only the header
//! fields needed to identify the image and to find the tags are decoded here;
//! everything else in the container is opaque.
//!
//! **Example** - Locating the upgrade image in a file:
//! ```no_run
//! use std::fs::File;
//! use ncpboot::ota::{ImageStorage, OtaFile, UPGRADE_IMAGE_TAG};
//!
//! let mut ota = OtaFile::new(File::open("ncp.ota").unwrap()).unwrap();
//! let id = ota.image_id();
//! let tag = ota.locate(&id, UPGRADE_IMAGE_TAG).unwrap();
//! println!("image at {:#x}, {} bytes", tag.offset, tag.size);
//! ```

mod file;
mod header;

use std::io;

use thiserror::Error;

pub use file::OtaFile;
pub use header::{ImageId, OtaHeader, HEADER_MAGIC, MIN_HEADER_LENGTH};

#[cfg(test)]
pub(crate) use file::tests::container;
#[cfg(test)]
pub(crate) use header::tests::ID as TEST_IMAGE_ID;

/// Tag of the image to be handed to the boot-loader.
pub const UPGRADE_IMAGE_TAG: u16 = 0x0000;
/// Tag of the ECDSA signature sub-element.
pub const ECDSA_SIGNATURE_TAG: u16 = 0x0001;
/// Tag of the ECDSA signing certificate sub-element.
pub const ECDSA_CERTIFICATE_TAG: u16 = 0x0002;

/// Size of the `tag id` + `length` prefix of every sub-element.
pub const TAG_OVERHEAD: u32 = 6;

/// Where a tagged sub-element lives inside its container. `offset` is the
/// position of the first data byte, past the tag prefix.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TagRecord {
    pub tag_id: u16,
    pub offset: u32,
    pub size: u32,
}
impl TagRecord {
    /// One past the last data byte, `None` when the range does not fit the
    /// 32-bit container address space.
    pub fn end(&self) -> Option<u32> {
        self.offset.checked_add(self.size)
    }
}

/// Errors raised while decoding a container or looking up a tag in it.
#[derive(Error, Debug)]
pub enum OtaError {
    #[error("failed to read the container: {0}")]
    Io(#[from] io::Error),
    #[error("not an OTA file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("invalid header length {0}")]
    BadHeaderLength(u16),
    #[error("malformed container: {0}")]
    Decode(#[from] bincode::Error),
    #[error("container truncated: {0}")]
    Truncated(&'static str),
    #[error("no image {0} in this storage")]
    UnknownImage(ImageId),
    #[error("tag {0:#06x} not found")]
    TagNotFound(u16),
    #[error("tag {0:#06x} appears more than once")]
    AmbiguousTag(u16),
    #[error("tag range {offset:#x}+{size} overflows the container address space")]
    BadRange { offset: u32, size: u32 },
}

/// Access to stored OTA containers, keyed by their [`ImageId`].
///
/// The transfer only needs two things from the storage: where a tag lives,
/// and the bytes of a range of the container.
pub trait ImageStorage {
    /// Find the single sub-element with `tag_id` in the container `id`.
    fn locate(&mut self, id: &ImageId, tag_id: u16) -> Result<TagRecord, OtaError>;

    /// Read `length` bytes starting at `offset` in the container `id`. A
    /// range running past the end of the container is an error.
    fn read_range(&mut self, id: &ImageId, offset: u32, length: u32) -> io::Result<Vec<u8>>;
}

/// Pick the single record with `tag_id` out of a tag index.
pub(crate) fn find_tag(tags: &[TagRecord], tag_id: u16) -> Result<TagRecord, OtaError> {
    let mut found = tags.iter().filter(|t| t.tag_id == tag_id);
    match (found.next(), found.next()) {
        (Some(tag), None) => Ok(*tag),
        (Some(_), Some(_)) => Err(OtaError::AmbiguousTag(tag_id)),
        (None, _) => Err(OtaError::TagNotFound(tag_id)),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn find_single_tag() {
    let tags = [
        TagRecord {
            tag_id: UPGRADE_IMAGE_TAG,
            offset: 62,
            size: 10,
        },
        TagRecord {
            tag_id: ECDSA_SIGNATURE_TAG,
            offset: 78,
            size: 4,
        },
    ];
    let tag = find_tag(&tags, ECDSA_SIGNATURE_TAG).unwrap();
    assert_eq!(tag.offset, 78);
    assert_eq!(tag.end(), Some(82));
}

#[test]
fn find_missing_or_duplicated_tag() {
    let tag = TagRecord {
        tag_id: 0x0100,
        offset: 0,
        size: 1,
    };
    assert!(matches!(
        find_tag(&[tag], 0x0200),
        Err(OtaError::TagNotFound(0x0200))
    ));
    assert!(matches!(
        find_tag(&[tag, tag], 0x0100),
        Err(OtaError::AmbiguousTag(0x0100))
    ));
}

#[test]
fn tag_end_does_not_wrap() {
    let tag = TagRecord {
        tag_id: UPGRADE_IMAGE_TAG,
        offset: 0xFFFF_FF00,
        size: 0xFF,
    };
    assert_eq!(tag.end(), Some(u32::MAX));
    let tag = TagRecord { size: 0x200, ..tag };
    assert_eq!(tag.end(), None);
}
