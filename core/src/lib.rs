//! A crate to detect NFC tags on PC/SC readers and talk to NXP NTAG21x tags.
//!
//! The engine watches the enabled readers on a dedicated thread and hands every card that
//! enters one of them to the application as a [`Card`] session. Commands are built with
//! [`Command`] or taken from the [`ntag`] catalog, and answers come back as [`CardResponse`].

#[cfg(feature = "pcsc")]
pub mod pcsc;

pub mod card;
pub mod command;
pub mod crc;
pub mod error;
pub mod format;
pub mod ntag;
pub mod response;
pub mod scard;
pub mod sdk;
pub mod signal;

pub use card::Card;
pub use command::Command;
pub use error::{BoxError, Error, Result};
pub use response::{CardResponse, StatusWord};
pub use sdk::{Reader, Sdk};
pub use signal::CancellationToken;
