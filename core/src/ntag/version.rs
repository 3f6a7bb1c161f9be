use std::fmt::{Display, Formatter};

use crate::crc;
use crate::format::humanize_bytes;
use crate::ntag::Error;

const VERSION_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VendorId(pub u8);

impl Display for VendorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            0x04 => f.write_str("NXP Semiconductors"),
            id => write!(f, "unknown vendor id (0x{:02X})", id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProductType(pub u8);

impl Display for ProductType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            0x04 => f.write_str("NXP NTAG"),
            t => write!(f, "unknown product type (0x{:02X})", t),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProductSubtype(pub u8);

impl Display for ProductSubtype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            0x02 => f.write_str("50 pF"),
            t => write!(f, "unknown product subtype (0x{:02X})", t),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProtocolType(pub u8);

impl Display for ProtocolType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            0x01 => f.write_str("ISO/IEC 14443 Type A"),
            0x02 => f.write_str("ISO/IEC 14443 Type B"),
            0x03 => f.write_str("ISO/IEC 14443-3 compliant"),
            t => write!(f, "unknown protocol type (0x{:02X})", t),
        }
    }
}

/// User memory size announced by GET_VERSION.
///
/// The seven most significant bits hold `n`. When the least significant bit is clear the
/// size is exactly `2^n`, otherwise it lies between `2^n` and `2^(n+1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StorageSize {
    pub byte: u8,
    pub size: u64,
}

impl From<u8> for StorageSize {
    fn from(byte: u8) -> Self {
        let n = (byte >> 1) as u32;
        let base = 1u64.checked_shl(n).unwrap_or(u64::MAX);

        let size = match byte {
            b if b & 1 == 0 => base,
            0x0F => 144, // NTAG213
            0x11 => 504, // NTAG215
            0x13 => 888, // NTAG216
            _ => base.saturating_add(base.saturating_mul(2)) / 2,
        };

        Self { byte, size }
    }
}

impl Display for StorageSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&humanize_bytes(self.size))
    }
}

/// Product version information returned by GET_VERSION.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Version {
    pub vendor_id: VendorId,
    pub product_type: ProductType,
    pub product_subtype: ProductSubtype,
    pub major_version: u8,
    pub minor_version: u8,
    pub storage_size: StorageSize,
    pub protocol_type: ProtocolType,
    /// Whether a CRC-A followed the version bytes and matched them.
    pub valid: bool,
}

impl Version {
    /// Parses 8 bytes of version information, optionally followed by their CRC-A.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        if payload.len() < VERSION_LEN {
            return Err(Error::InvalidLength {
                expected: VERSION_LEN,
                actual: payload.len(),
            });
        }

        let (data, rest) = payload.split_at(VERSION_LEN);
        let valid = rest.len() >= 2 && crc::verify(data, &rest[..2]);

        Ok(Self {
            vendor_id: VendorId(data[1]),
            product_type: ProductType(data[2]),
            product_subtype: ProductSubtype(data[3]),
            major_version: data[4],
            minor_version: data[5],
            storage_size: StorageSize::from(data[6]),
            protocol_type: ProtocolType(data[7]),
            valid,
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}) v{}.{}, {}, {}",
            self.vendor_id,
            self.product_type,
            self.product_subtype,
            self.major_version,
            self.minor_version,
            self.storage_size,
            self.protocol_type,
        )
    }
}
