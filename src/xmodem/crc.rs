//! CRC-16/XMODEM: polynomial `0x1021`, initial value `0`, no reflection, no
//! final xor. The CRC trailer of each block is computed over its 128 data
//! bytes only.

use crc::{Crc, CRC_16_XMODEM};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute the CRC of `data`, in transmission order.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Straight bit-by-bit rendition of the polynomial division.
    fn reference_crc(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for byte in data {
            for bit in (0..8).rev() {
                let input = (byte >> bit) & 1 == 1;
                let top = crc & 0x8000 != 0;
                crc <<= 1;
                if input ^ top {
                    crc ^= 0x1021;
                }
            }
        }
        crc
    }

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn matches_reference_on_blocks() {
        let patterns: Vec<[u8; 128]> = vec![
            [0x00; 128],
            [0xFF; 128],
            {
                let mut block = [0u8; 128];
                block.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
                block
            },
            {
                // Cheap pseudo-random fill.
                let mut block = [0u8; 128];
                let mut seed: u32 = 0x1234_5678;
                for b in block.iter_mut() {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    *b = (seed >> 16) as u8;
                }
                block
            },
        ];
        for block in patterns.iter() {
            assert_eq!(crc16(block), reference_crc(block));
        }
    }
}
