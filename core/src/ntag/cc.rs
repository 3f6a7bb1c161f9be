use std::fmt::{Display, Formatter};

use crate::crc;
use crate::format::{format_bytes, humanize_bytes};
use crate::ntag::Error;

const CC_LEN: usize = 4;
const BLOCK_LEN: usize = 16;
const READ_ONLY: u8 = 0x40;

/// Magic number in the first byte of the capability container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TagType(pub u8);

impl Display for TagType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            0xE1 => f.write_str("NFC Forum Type 2 Tag"),
            _ => f.write_str("Unknown"),
        }
    }
}

/// Mapping version of the Type 2 Tag, major and minor in the high and low nibbles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TagVersion(pub u8);

impl TagVersion {
    pub fn major(&self) -> u8 {
        self.0 >> 4
    }

    pub fn minor(&self) -> u8 {
        self.0 & 0x0F
    }
}

impl Display for TagVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Size of the data area available for NDEF messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemorySize(pub u8);

impl MemorySize {
    /// Whether the code belongs to a member of the NTAG21x family.
    pub fn is_known(&self) -> bool {
        matches!(self.0, 0x12 | 0x3E | 0x6D)
    }

    pub fn size(&self) -> u64 {
        match self.0 {
            0x12 => 144, // NTAG213
            0x3E => 496, // NTAG215
            0x6D => 872, // NTAG216
            code => code as u64 * 8,
        }
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.is_known() {
            true => f.write_str(&humanize_bytes(self.size())),
            _ => write!(
                f,
                "unknown (0x{:02X}) {}",
                self.0,
                humanize_bytes(self.size())
            ),
        }
    }
}

/// Capability container stored on page 3 of a Type 2 Tag.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CapabilityContainer {
    pub tag_type: TagType,
    pub version: TagVersion,
    pub memory_size: MemorySize,
    pub read_only: bool,
    pub access_control: u8,
}

impl CapabilityContainer {
    /// Parses the 16-byte block read from page 3 followed by its CRC-A.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < BLOCK_LEN + 2 {
            return Err(Error::ShortResponse {
                expected: BLOCK_LEN + 2,
                actual: data.len(),
            });
        }

        let (block, crc) = data[..BLOCK_LEN + 2].split_at(BLOCK_LEN);
        if !crc::verify(block, crc) {
            return Err(Error::CrcMismatch("Capability Container (CC bytes)"));
        }

        Self::decode(block)
    }

    /// Decodes the capability container bytes without any CRC.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < CC_LEN {
            return Err(Error::InvalidLength {
                expected: CC_LEN,
                actual: data.len(),
            });
        }

        Ok(Self {
            tag_type: TagType(data[0]),
            version: TagVersion(data[1]),
            memory_size: MemorySize(data[2]),
            read_only: data[3] & READ_ONLY != 0,
            access_control: data[3],
        })
    }

    pub fn bytes(&self) -> [u8; CC_LEN] {
        [
            self.tag_type.0,
            self.version.0,
            self.memory_size.0,
            self.access_control,
        ]
    }
}

impl Display for CapabilityContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_bytes(&self.bytes()))
    }
}
