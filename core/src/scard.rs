//! Vocabulary of the smart card resource manager (PC/SC).
//!
//! The engine never talks to the platform library directly. Everything it needs is expressed
//! by the [`ResourceManager`] trait: establishing a context, enumerating readers, waiting for
//! reader state changes, connecting to cards and exchanging raw frames. The PC/SC adapter in
//! [`crate::pcsc`] implements it on top of the platform library, and tests implement it with
//! scripted stubs.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use once_cell::sync::Lazy;

/// Maximum size of an extended APDU exchange, including the status word.
pub const MAX_BUFFER_SIZE_EXTENDED: usize = 4 + 3 + (1 << 16) + 3 + 2;

/// Maximum size of an ATR.
pub const MAX_ATR_SIZE: usize = 33;

macro_rules! flags {
    (
        $(#[$meta: meta])*
        $name: ident, empty = $empty: expr;
        $($(#[$fmeta: meta])* $flag: ident = $value: expr => $label: expr,)*
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($value);)*

            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Whether any of the bits in `other` are set.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Whether all of the bits in `other` are set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                let labels = [$((Self::$flag, $label)),*]
                    .into_iter()
                    .filter(|(flag, _)| self.intersects(*flag))
                    .map(|(_, label)| label)
                    .collect::<Vec<_>>();

                match labels.is_empty() {
                    true => write!(f, "{}", $empty(self.0)),
                    _ => write!(f, "{}", labels.join(", ")),
                }
            }
        }
    };
}

flags! {
    /// State of a reader as reported by a status change wait.
    ReaderStateFlags, empty = |_| "Unaware";
    UNAWARE = 0x0000 => "Unaware",
    IGNORE = 0x0001 => "Ignore",
    CHANGED = 0x0002 => "Changed",
    UNKNOWN = 0x0004 => "Unknown",
    UNAVAILABLE = 0x0008 => "Unavailable",
    EMPTY = 0x0010 => "Empty",
    PRESENT = 0x0020 => "Present",
    ATR_MATCH = 0x0040 => "AtrMatch",
    EXCLUSIVE = 0x0080 => "Exclusive",
    IN_USE = 0x0100 => "InUse",
    MUTE = 0x0200 => "Mute",
    UNPOWERED = 0x0400 => "Unpowered",
}

flags! {
    /// State of a connected card as reported by the status call.
    CardState, empty = |bits| format!("Unknown CardState (0x{:X})", bits);
    UNKNOWN = 0x0001 => "Unknown",
    ABSENT = 0x0002 => "Absent",
    PRESENT = 0x0004 => "Present",
    SWALLOWED = 0x0008 => "Swallowed",
    POWERED = 0x0010 => "Powered",
    NEGOTIABLE = 0x0020 => "Negotiable",
    SPECIFIC = 0x0040 => "Specific",
}

flags! {
    /// Transmission protocol, or a mask of acceptable protocols.
    Protocol, empty = |_| "No Protocol";
    UNDEFINED = 0x0000 => "Undefined",
    T0 = 0x0001 => "T0",
    T1 = 0x0002 => "T1",
    RAW = 0x0004 => "Raw",
    T15 = 0x0008 => "T15",
}

impl Protocol {
    /// Lets the resource manager negotiate T=0 or T=1.
    pub const ANY: Self = Self(Self::T0.0 | Self::T1.0);
}

/// Scope of a resource manager context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Scope {
    User = 0x0,
    Terminal = 0x1,
    System = 0x2,
    Global = 0x3,
}

/// How a connection shares the card with other applications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ShareMode {
    Exclusive = 0x1,
    Shared = 0x2,
    Direct = 0x3,
}

/// What to do with the card when a connection or a transaction ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Disposition {
    Leave = 0x0,
    Reset = 0x1,
    Unpower = 0x2,
    Eject = 0x3,
}

/// Opaque handle of an established resource manager context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque handle of a connected card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CardHandle(pub u64);

/// A reader observed by a status change wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderState {
    pub reader_name: String,
    pub current_state: ReaderStateFlags,
    pub event_state: ReaderStateFlags,
    pub atr: Vec<u8>,
}

impl ReaderState {
    /// Creates a state the resource manager knows nothing about yet.
    pub fn new(reader_name: impl Into<String>) -> Self {
        Self {
            reader_name: reader_name.into(),
            current_state: ReaderStateFlags::UNAWARE,
            event_state: ReaderStateFlags::UNAWARE,
            atr: Vec::new(),
        }
    }

    /// Acknowledges the last event, returning the state it replaced.
    pub fn sync_current_state(&mut self) -> ReaderStateFlags {
        std::mem::replace(&mut self.current_state, self.event_state)
    }
}

/// Snapshot of a connected card.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CardStatus {
    pub reader: String,
    pub state: CardState,
    pub protocol: Protocol,
    pub atr: Vec<u8>,
}

/// A known return value of the resource manager.
#[derive(Debug, PartialEq, Eq)]
pub struct ReturnCode {
    pub code: u32,
    pub name: &'static str,
    pub description: &'static str,
}

macro_rules! return_codes {
    ($($konst: ident = $code: literal, $name: literal, $description: literal;)*) => {
        /// Raw return values of the resource manager.
        pub mod codes {
            $(pub const $konst: u32 = $code;)*
        }

        static RETURN_CODES: &[ReturnCode] = &[
            $(ReturnCode { code: $code, name: $name, description: $description },)*
        ];
    };
}

return_codes! {
    SUCCESS = 0x00000000, "SCARD_S_SUCCESS", "no error encountered";
    INTERNAL_ERROR = 0x80100001, "SCARD_F_INTERNAL_ERROR", "internal consistency check failed";
    CANCELLED = 0x80100002, "SCARD_E_CANCELLED", "action cancelled by SCardCancel request";
    INVALID_HANDLE = 0x80100003, "SCARD_E_INVALID_HANDLE", "supplied handle was invalid";
    INVALID_PARAMETER = 0x80100004, "SCARD_E_INVALID_PARAMETER", "parameters could not be properly interpreted";
    INVALID_TARGET = 0x80100005, "SCARD_E_INVALID_TARGET", "registry startup information is missing or invalid";
    NO_MEMORY = 0x80100006, "SCARD_E_NO_MEMORY", "not enough memory available to complete command";
    WAITED_TOO_LONG = 0x80100007, "SCARD_F_WAITED_TOO_LONG", "internal consistency timer expired";
    INSUFFICIENT_BUFFER = 0x80100008, "SCARD_E_INSUFFICIENT_BUFFER", "data buffer too small for returned data";
    UNKNOWN_READER = 0x80100009, "SCARD_E_UNKNOWN_READER", "specified reader name not recognized";
    TIMEOUT = 0x8010000A, "SCARD_E_TIMEOUT", "user-specified timeout expired";
    SHARING_VIOLATION = 0x8010000B, "SCARD_E_SHARING_VIOLATION", "smart card cannot be accessed due to other connections";
    NO_SMARTCARD = 0x8010000C, "SCARD_E_NO_SMARTCARD", "operation requires a smart card, but none is in the device";
    UNKNOWN_CARD = 0x8010000D, "SCARD_E_UNKNOWN_CARD", "specified smart card name not recognized";
    CANT_DISPOSE = 0x8010000E, "SCARD_E_CANT_DISPOSE", "system could not dispose of the media as requested";
    PROTO_MISMATCH = 0x8010000F, "SCARD_E_PROTO_MISMATCH", "requested protocols incompatible with card's protocols";
    NOT_READY = 0x80100010, "SCARD_E_NOT_READY", "reader or smart card not ready to accept commands";
    INVALID_VALUE = 0x80100011, "SCARD_E_INVALID_VALUE", "one or more supplied parameter values could not be interpreted";
    SYSTEM_CANCELLED = 0x80100012, "SCARD_E_SYSTEM_CANCELLED", "action cancelled by the system";
    COMM_ERROR = 0x80100013, "SCARD_F_COMM_ERROR", "internal communications error detected";
    UNKNOWN_ERROR = 0x80100014, "SCARD_F_UNKNOWN_ERROR", "internal error detected, but source unknown";
    INVALID_ATR = 0x80100015, "SCARD_E_INVALID_ATR", "ATR from registry is not a valid ATR string";
    NOT_TRANSACTED = 0x80100016, "SCARD_E_NOT_TRANSACTED", "attempt made to end a non-existent transaction";
    READER_UNAVAILABLE = 0x80100017, "SCARD_E_READER_UNAVAILABLE", "specified reader not currently available";
    SHUTDOWN = 0x80100018, "SCARD_P_SHUTDOWN", "operation aborted to allow server application to exit";
    PCI_TOO_SMALL = 0x80100019, "SCARD_E_PCI_TOO_SMALL", "PCI receive buffer was too small";
    READER_UNSUPPORTED = 0x8010001A, "SCARD_E_READER_UNSUPPORTED", "reader driver does not meet minimal requirements";
    DUPLICATE_READER = 0x8010001B, "SCARD_E_DUPLICATE_READER", "reader driver did not produce a unique reader name";
    CARD_UNSUPPORTED = 0x8010001C, "SCARD_E_CARD_UNSUPPORTED", "smart card does not meet minimal requirements";
    NO_SERVICE = 0x8010001D, "SCARD_E_NO_SERVICE", "smart card resource manager is not running";
    SERVICE_STOPPED = 0x8010001E, "SCARD_E_SERVICE_STOPPED", "smart card resource manager has shut down";
    UNEXPECTED = 0x8010001F, "SCARD_E_UNEXPECTED", "unexpected card error occurred";
    ICC_INSTALLATION = 0x80100020, "SCARD_E_ICC_INSTALLATION", "no primary provider can be found for the smart card";
    ICC_CREATEORDER = 0x80100021, "SCARD_E_ICC_CREATEORDER", "requested order of object creation not supported";
    UNSUPPORTED_FEATURE = 0x80100022, "SCARD_E_UNSUPPORTED_FEATURE", "this smart card does not support the requested feature";
    DIR_NOT_FOUND = 0x80100023, "SCARD_E_DIR_NOT_FOUND", "identified directory does not exist on the smart card";
    FILE_NOT_FOUND = 0x80100024, "SCARD_E_FILE_NOT_FOUND", "identified file does not exist on the smart card";
    NO_DIR = 0x80100025, "SCARD_E_NO_DIR", "supplied path does not represent a smart card directory";
    NO_FILE = 0x80100026, "SCARD_E_NO_FILE", "supplied path does not represent a smart card file";
    NO_ACCESS = 0x80100027, "SCARD_E_NO_ACCESS", "access denied to this file";
    WRITE_TOO_MANY = 0x80100028, "SCARD_E_WRITE_TOO_MANY", "smart card does not have enough memory to store information";
    BAD_SEEK = 0x80100029, "SCARD_E_BAD_SEEK", "error trying to set smart card file object pointer";
    INVALID_CHV = 0x8010002A, "SCARD_E_INVALID_CHV", "supplied PIN is incorrect";
    UNKNOWN_RES_MNG = 0x8010002B, "SCARD_E_UNKNOWN_RES_MNG", "unrecognized error code from a layered component";
    NO_SUCH_CERTIFICATE = 0x8010002C, "SCARD_E_NO_SUCH_CERTIFICATE", "requested certificate does not exist";
    CERTIFICATE_UNAVAILABLE = 0x8010002D, "SCARD_E_CERTIFICATE_UNAVAILABLE", "requested certificate could not be obtained";
    NO_READERS_AVAILABLE = 0x8010002E, "SCARD_E_NO_READERS_AVAILABLE", "cannot find a smart card reader";
    COMM_DATA_LOST = 0x8010002F, "SCARD_E_COMM_DATA_LOST", "communications error with smart card detected";
    NO_KEY_CONTAINER = 0x80100030, "SCARD_E_NO_KEY_CONTAINER", "requested key container does not exist on the smart card";
    SERVER_TOO_BUSY = 0x80100031, "SCARD_E_SERVER_TOO_BUSY", "smart card resource manager too busy to complete operation";
    UNSUPPORTED_CARD = 0x80100065, "SCARD_W_UNSUPPORTED_CARD", "reader cannot communicate with card due to ATR configuration conflicts";
    UNRESPONSIVE_CARD = 0x80100066, "SCARD_W_UNRESPONSIVE_CARD", "smart card is not responding to a reset";
    UNPOWERED_CARD = 0x80100067, "SCARD_W_UNPOWERED_CARD", "power has been removed from the smart card";
    RESET_CARD = 0x80100068, "SCARD_W_RESET_CARD", "smart card has been reset";
    REMOVED_CARD = 0x80100069, "SCARD_W_REMOVED_CARD", "smart card has been removed";
    SECURITY_VIOLATION = 0x8010006A, "SCARD_W_SECURITY_VIOLATION", "access denied due to a security violation";
    WRONG_CHV = 0x8010006B, "SCARD_W_WRONG_CHV", "wrong PIN presented to the smart card";
    CHV_BLOCKED = 0x8010006C, "SCARD_W_CHV_BLOCKED", "maximum number of PIN entry attempts reached";
    EOF = 0x8010006D, "SCARD_W_EOF", "end of the smart card file reached";
    CANCELLED_BY_USER = 0x8010006E, "SCARD_W_CANCELLED_BY_USER", "user cancelled the Smart Card Selection Dialog";
    CARD_NOT_AUTHENTICATED = 0x8010006F, "SCARD_W_CARD_NOT_AUTHENTICATED", "no PIN was presented to the smart card";
}

static BY_CODE: Lazy<HashMap<u32, &'static ReturnCode>> =
    Lazy::new(|| RETURN_CODES.iter().map(|rc| (rc.code, rc)).collect());

/// Failure reported by the resource manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScardError {
    #[error("{}: {}", .0.name, .0.description)]
    Native(&'static ReturnCode),

    #[error("SCARD_F_UNKNOWN_ERROR: unknown return value {0:#010X}")]
    Unknown(u32),
}

impl ScardError {
    /// Looks up a failing return value.
    /// Values missing from the table are kept as [`ScardError::Unknown`].
    pub fn new(code: u32) -> Self {
        match BY_CODE.get(&code) {
            Some(rc) => Self::Native(rc),
            None => Self::Unknown(code),
        }
    }

    /// The raw return value.
    pub fn code(&self) -> u32 {
        match self {
            Self::Native(rc) => rc.code,
            Self::Unknown(code) => *code,
        }
    }

    /// Whether the call was interrupted by a cancel request.
    pub fn is_cancelled(&self) -> bool {
        self.code() == codes::CANCELLED
    }
}

/// Converts a raw return value into a result.
pub fn check(code: u32) -> Result<(), ScardError> {
    match code {
        codes::SUCCESS => Ok(()),
        _ => Err(ScardError::new(code)),
    }
}

/// The primitive operations of a smart card resource manager.
///
/// Implementations must be safe to call from the poller thread and from the thread that
/// shuts the engine down at the same time: [`ResourceManager::cancel`] is expected to
/// interrupt a pending [`ResourceManager::get_status_change`] on the same context.
pub trait ResourceManager: Send + Sync + 'static {
    fn establish_context(&self, scope: Scope) -> Result<ContextHandle, ScardError>;

    fn release_context(&self, ctx: ContextHandle) -> Result<(), ScardError>;

    fn is_valid_context(&self, ctx: ContextHandle) -> Result<(), ScardError>;

    fn list_readers(&self, ctx: ContextHandle) -> Result<Vec<String>, ScardError>;

    /// Blocks until the state of any reader differs from its `current_state`,
    /// then updates `event_state` and `atr` in place. `None` waits forever.
    fn get_status_change(
        &self,
        ctx: ContextHandle,
        states: &mut [ReaderState],
        timeout: Option<Duration>,
    ) -> Result<(), ScardError>;

    fn cancel(&self, ctx: ContextHandle) -> Result<(), ScardError>;

    /// Connects to the card in the reader, returning the handle and the negotiated protocol.
    fn connect(
        &self,
        ctx: ContextHandle,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocol,
    ) -> Result<(CardHandle, Protocol), ScardError>;

    fn disconnect(&self, card: CardHandle, disposition: Disposition) -> Result<(), ScardError>;

    fn status(&self, card: CardHandle) -> Result<CardStatus, ScardError>;

    fn begin_transaction(&self, card: CardHandle) -> Result<(), ScardError>;

    fn end_transaction(&self, card: CardHandle, disposition: Disposition)
        -> Result<(), ScardError>;

    /// Sends the frame and writes the answer into `response`, returning its length.
    fn transmit(
        &self,
        card: CardHandle,
        protocol: Protocol,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ScardError>;
}
