//! CRC-8 used as the frame trailer.
//!
//! Polynomial `0x85`, initial value `0`, no reflection, no final XOR.
//! Appending `crc8(data)` to `data` and recomputing yields zero, which is how
//! received frames are verified.

use ::crc::{Algorithm, Crc};

/// Generator polynomial (x^8 + x^7 + x^2 + 1, high bit implicit).
pub const CRC8_POLYNOMIAL: u8 = 0x85;

/// Parameters of the frame checksum in `crc` catalog form.
pub const CRC_8_BTWATTCH2: Algorithm<u8> = Algorithm {
    width: 8,
    poly: CRC8_POLYNOMIAL,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0x2A,
    residue: 0x00,
};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_BTWATTCH2);

/// Compute the CRC-8 of `data`.
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn test_catalog_check_value() {
        assert_eq!(crc8(b"123456789"), CRC_8_BTWATTCH2.check);
    }

    #[test]
    fn test_golden_vectors() {
        assert_eq!(crc8(&[0x08]), 0xB3);
        assert_eq!(crc8(&[0xA7, 0x01]), 0x59);
        assert_eq!(crc8(&[0xA7, 0x00]), 0xDC);
    }

    #[test]
    fn test_self_check() {
        let payloads: [&[u8]; 5] = [
            b"",
            &[0x00],
            &[0x08],
            &[0x01, 56, 34, 12, 15, 2, 124, 4],
            b"arbitrary payload bytes 0123456789",
        ];

        for payload in payloads {
            let mut extended = payload.to_vec();
            extended.push(crc8(payload));
            assert_eq!(crc8(&extended), 0, "self-check failed for {:02X?}", payload);
        }
    }

    #[test]
    fn test_detects_single_bit_errors() {
        let mut data = vec![0x08, 0x00, 0x12, 0x34, 0x56];
        data.push(crc8(&data));

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(crc8(&corrupted), 0, "missed flip at byte {byte} bit {bit}");
            }
        }
    }
}
