//! The 128-byte staging buffer and block framing.

use super::crc::crc16;
use super::{BLOCK_SIZE, FRAME_LEN, SOH};

/// Accumulates caller data until a whole block is available. Where a byte
/// lands only depends on how many bytes came before it, never on how the
/// caller chunked them.
#[derive(Debug, Clone)]
pub(crate) struct BlockBuffer {
    data: [u8; BLOCK_SIZE],
    len: usize,
}
impl BlockBuffer {
    pub(crate) fn new() -> Self {
        BlockBuffer {
            data: [0; BLOCK_SIZE],
            len: 0,
        }
    }

    /// Copy as much of `bytes` as fits, returning how many were taken.
    pub(crate) fn fill(&mut self, bytes: &[u8]) -> usize {
        let taken = bytes.len().min(BLOCK_SIZE - self.len);
        self.data[self.len..self.len + taken].copy_from_slice(&bytes[..taken]);
        self.len += taken;
        taken
    }

    /// Complete a partial block with `byte`.
    pub(crate) fn pad(&mut self, byte: u8) {
        for b in self.data[self.len..].iter_mut() {
            *b = byte;
        }
        self.len = BLOCK_SIZE;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == BLOCK_SIZE
    }

    pub(crate) fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }
}

/// Frame one block for the wire:
///
/// ```text
/// SOH | number | !number | 128 data bytes | CRC high | CRC low
/// ```
pub fn frame_block(number: u8, data: &[u8; BLOCK_SIZE]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = SOH;
    frame[1] = number;
    frame[2] = !number;
    frame[3..3 + BLOCK_SIZE].copy_from_slice(data);
    let crc = crc16(data).to_be_bytes();
    frame[3 + BLOCK_SIZE..].copy_from_slice(&crc);
    frame
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_up_to_a_block() {
        let mut buffer = BlockBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.fill(&[1; 100]), 100);
        assert_eq!(buffer.fill(&[2; 100]), 28);
        assert!(buffer.is_full());
        assert_eq!(buffer.fill(&[3; 10]), 0);
        assert_eq!(buffer.data()[99], 1);
        assert_eq!(buffer.data()[100], 2);

        buffer.clear();
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn pad_partial_block() {
        let mut buffer = BlockBuffer::new();
        buffer.fill(&[0x55, 0xAA]);
        buffer.pad(0xFF);
        assert!(buffer.is_full());
        assert_eq!(&buffer.data()[..3], &[0x55, 0xAA, 0xFF]);
        assert!(buffer.data()[2..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn frame_layout() {
        let data = [0u8; BLOCK_SIZE];
        let frame = frame_block(1, &data);
        assert_eq!(frame.len(), 133);
        assert_eq!(&frame[..3], &[SOH, 0x01, 0xFE]);
        assert_eq!(&frame[3..131], &data[..]);
        // CRC of all zeroes is zero.
        assert_eq!(&frame[131..], &[0, 0]);

        let data = [0xFF; BLOCK_SIZE];
        let frame = frame_block(0, &data);
        assert_eq!(&frame[..3], &[SOH, 0x00, 0xFF]);
        let crc = crc16(&data);
        assert_eq!(frame[131], (crc >> 8) as u8);
        assert_eq!(frame[132], (crc & 0xff) as u8);
    }
}
