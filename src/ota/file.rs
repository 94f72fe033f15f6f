//! A single OTA container read through any seekable reader.

use std::io::{self, Read, Seek, SeekFrom};

use log::{debug, trace};

use super::header::TagPrefix;
use super::{find_tag, ImageId, ImageStorage, OtaError, OtaHeader, TagRecord, TAG_OVERHEAD};
use crate::ota::MIN_HEADER_LENGTH;

/// An OTA container backed by a file, or anything else that can `Read` and
/// `Seek`. The header and the tag index are decoded once, when the container
/// is opened; sub-element data is only read on demand.
#[derive(Debug)]
pub struct OtaFile<R> {
    reader: R,
    header: OtaHeader,
    tags: Vec<TagRecord>,
}

impl<R: Read + Seek> OtaFile<R> {
    pub fn new(mut reader: R) -> Result<Self, OtaError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut fixed = vec![0u8; MIN_HEADER_LENGTH as usize];
        read_exact_or(&mut reader, &mut fixed, "header")?;
        let header = OtaHeader::parse(&fixed)?;
        debug!(
            "OTA image {} v{:#06x}, {} bytes, `{}`",
            header.image_id, header.header_version, header.total_image_size, header.header_string
        );

        let tags = read_tag_index(&mut reader, &header)?;
        Ok(OtaFile {
            reader,
            header,
            tags,
        })
    }

    pub fn header(&self) -> &OtaHeader {
        &self.header
    }

    pub fn image_id(&self) -> ImageId {
        self.header.image_id
    }

    /// All the tags in the container, in file order.
    pub fn tags(&self) -> &[TagRecord] {
        &self.tags
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> ImageStorage for OtaFile<R> {
    fn locate(&mut self, id: &ImageId, tag_id: u16) -> Result<TagRecord, OtaError> {
        if *id != self.header.image_id {
            return Err(OtaError::UnknownImage(*id));
        }
        find_tag(&self.tags, tag_id)
    }

    fn read_range(&mut self, id: &ImageId, offset: u32, length: u32) -> io::Result<Vec<u8>> {
        if *id != self.header.image_id {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no image {} in this storage", id),
            ));
        }
        if u64::from(offset) + u64::from(length) > u64::from(self.header.total_image_size) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {:#x}+{} is past the end of the image ({} bytes)",
                    offset, length, self.header.total_image_size
                ),
            ));
        }

        trace!("read {} bytes at {:#x}", length, offset);
        self.reader.seek(SeekFrom::Start(offset.into()))?;
        let mut data = vec![0u8; length as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn read_tag_index<R: Read + Seek>(
    reader: &mut R,
    header: &OtaHeader,
) -> Result<Vec<TagRecord>, OtaError> {
    let total = u64::from(header.total_image_size);
    let mut position = u64::from(header.header_length);
    let mut tags = vec![];

    reader.seek(SeekFrom::Start(position))?;
    while position < total {
        if position + u64::from(TAG_OVERHEAD) > total {
            return Err(OtaError::Truncated("tag header"));
        }
        let mut prefix = [0u8; TAG_OVERHEAD as usize];
        read_exact_or(reader, &mut prefix, "tag header")?;

        let TagPrefix {
            tag_id,
            length: size,
        } = bincode::deserialize(&prefix)?;
        let offset = position + u64::from(TAG_OVERHEAD);
        if offset + u64::from(size) > total {
            return Err(OtaError::Truncated("tag data"));
        }
        trace!("tag {:#06x} at {:#x}, {} bytes", tag_id, offset, size);

        // `offset + size <= total`, which is a `u32`.
        tags.push(TagRecord {
            tag_id,
            offset: offset as u32,
            size,
        });
        position = offset + u64::from(size);
        reader.seek(SeekFrom::Start(position))?;
    }
    Ok(tags)
}

fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), OtaError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(OtaError::Truncated(what)),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
