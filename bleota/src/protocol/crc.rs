//! CRC-16/CCITT checksum engine.
//!
//! Polynomial 0x1021, MSB-first, no reflection, no final XOR. With an initial
//! value of zero this is the variant commonly called CRC-16/XMODEM.
//!
//! The initial value is supplied by the caller so a checksum can be carried
//! across several calls:
//!
//! ```rust
//! use bleota::protocol::crc::crc16;
//!
//! let running = crc16(crc16(0, b"1234"), b"56789");
//! assert_eq!(running, crc16(0, b"123456789"));
//! assert_eq!(running, 0x31C3);
//! ```

/// CRC-16/CCITT generator polynomial.
pub const POLYNOMIAL: u16 = 0x1021;

/// Fold `data` into the running checksum `init`.
#[must_use]
pub fn crc16(init: u16, data: &[u8]) -> u16 {
    data.iter().fold(init, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Checksum of `data` with a zero seed.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    crc16(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_vector() {
        assert_eq!(crc16(0, b"123456789"), 0x31C3);
    }

    #[test]
    fn test_empty_input_returns_seed() {
        assert_eq!(crc16(0, &[]), 0);
        assert_eq!(crc16(0xBEEF, &[]), 0xBEEF);
    }

    #[test]
    fn test_running_equals_single_shot_for_every_split() {
        let data: Vec<u8> = (0..=255u8).cycle().take(600).map(|b| b.wrapping_mul(31)).collect();
        let whole = checksum(&data);
        for split in 0..=data.len() {
            let (head, tail) = data.split_at(split);
            assert_eq!(crc16(crc16(0, head), tail), whole, "split at {split}");
        }
    }

    #[test]
    fn test_running_over_many_chunks() {
        let data = vec![0xA5u8; 4096];
        let chunked = data.chunks(507).fold(0, crc16);
        assert_eq!(chunked, checksum(&data));
    }

    #[test]
    fn test_single_bit_change_changes_crc() {
        let mut data = *b"firmware";
        let before = checksum(&data);
        data[3] ^= 0x01;
        assert_ne!(before, checksum(&data));
    }
}
