//! CRC-A checksum as defined for ISO/IEC 14443 Type A.
//!
//! NFC Forum Type 2 Tags append this checksum to READ, READ_SIG and GET_VERSION
//! answers when the reader passes frames through untouched.

const POLYNOMIAL: u16 = 0x1021;
const INITIAL: u16 = 0xC6C6;

/// Calculates the CRC-A of the data, low byte first.
pub fn calculate(data: &[u8]) -> [u8; 2] {
    let mut crc = INITIAL;

    for &byte in data {
        crc ^= (byte.reverse_bits() as u16) << 8;
        for _ in 0..8 {
            crc = match crc & 0x8000 {
                0 => crc << 1,
                _ => (crc << 1) ^ POLYNOMIAL,
            };
        }
    }

    crc.reverse_bits().to_le_bytes()
}

/// Verifies the data against the received CRC-A.
pub fn verify(data: &[u8], crc: &[u8]) -> bool {
    calculate(data).as_slice() == crc
}
