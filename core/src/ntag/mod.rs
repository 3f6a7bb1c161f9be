//! Support for NFC Forum Type 2 Tags of the NXP NTAG21x family (NTAG213, NTAG215, NTAG216).
//!
//! Most NTAG instructions do not follow the CLA/INS/P1/P2 layout, so they are built as custom
//! commands and passed through the reader untouched. Answers that carry a CRC-A are verified
//! before they reach the caller.
//!
//! ```rust,no_run
//! use nfcsdk::ntag::{self, Tag};
//! # fn f<M: nfcsdk::scard::ResourceManager>(card: &nfcsdk::Card<M>) -> nfcsdk::Result<()> {
//! let uid = card.transmit(&ntag::get_uid())?;
//! let version = card.version()?;
//! # Ok(())
//! # }
//! ```

mod cc;
mod commands;
mod version;

pub use self::cc::{CapabilityContainer, MemorySize, TagType, TagVersion};
pub use self::commands::*;
pub use self::version::{ProductSubtype, ProductType, ProtocolType, StorageSize, VendorId, Version};

use crate::card::Card;
use crate::scard::ResourceManager;

/// Size of a memory page.
pub const PAGE_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("expected {expected} bytes response with CRC, got {actual} bytes")]
    ShortResponse { expected: usize, actual: usize },

    #[error("{0} CRC check failed")]
    CrcMismatch(&'static str),

    #[error("invalid data length: expected at least {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// High-level NTAG operations on a connected card.
pub trait Tag {
    /// Reads the 7-byte UID.
    fn uid(&self) -> crate::Result<Vec<u8>>;

    /// Reads and decodes the product version.
    fn version(&self) -> crate::Result<Version>;

    /// Reads and decodes the capability container from page 3.
    fn capability_container(&self) -> crate::Result<CapabilityContainer>;

    /// Reads four pages starting at `page`.
    fn read_pages(&self, page: u8) -> crate::Result<Vec<u8>>;

    /// Reads the 32-byte originality signature.
    fn signature(&self) -> crate::Result<Vec<u8>>;
}

impl<M: ResourceManager> Tag for Card<M> {
    fn uid(&self) -> crate::Result<Vec<u8>> {
        self.transmit(&get_uid()).map(|r| r.into_payload())
    }

    fn version(&self) -> crate::Result<Version> {
        let response = self.transmit(&get_version())?;

        Ok(Version::parse(response.payload())?)
    }

    fn capability_container(&self) -> crate::Result<CapabilityContainer> {
        let response = self.transmit(&read_cc())?;

        Ok(CapabilityContainer::decode(response.payload())?)
    }

    fn read_pages(&self, page: u8) -> crate::Result<Vec<u8>> {
        self.transmit(&read(page)).map(|r| r.into_payload())
    }

    fn signature(&self) -> crate::Result<Vec<u8>> {
        self.transmit(&read_sig()).map(|r| r.into_payload())
    }
}
