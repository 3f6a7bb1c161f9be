//! Command frames to be transmitted to the card.

use std::fmt::{Debug, Display, Formatter};

use crate::error::{BoxError, Error, Result};
use crate::format::format_bytes;
use crate::scard::MAX_BUFFER_SIZE_EXTENDED;

/// Transforms the payload of a response before the status word is examined.
pub type PostProcess = Box<dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync>;

/// A mistake made while building a command. Reported when the command is transmitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("(Le) invalid length {len} [{prefix}...]")]
    LeTooLong { len: usize, prefix: String },

    #[error("post-process function can only be set once for a command")]
    PostProcessAlreadySet,

    #[error("invalid Le field")]
    InvalidLe,

    #[error("invalid Le field length")]
    InvalidLeLength,

    #[error("invalid page range {start:02X}..{end:02X}")]
    InvalidPageRange { start: u8, end: u8 },
}

/// A command to be transmitted to the card.
///
/// Setters never fail on the spot. Problems are collected and surface from
/// [`Command::check`], which the card session calls right before transmitting.
pub struct Command {
    name: String,
    custom: bool,
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    lc: Option<Vec<u8>>,
    le: Option<Vec<u8>>,
    payload: Vec<u8>,
    post_process: Option<PostProcess>,
    errors: Vec<CommandError>,
}

impl Command {
    /// Constructs a command with CLA, INS, P1, and P2.
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            name: "RAW".to_owned(),
            custom: false,
            cla,
            ins,
            p1,
            p2,
            lc: None,
            le: None,
            payload: Vec::new(),
            post_process: None,
            errors: Vec::new(),
        }
    }

    /// Constructs a command transmitted as-is, for tag instructions
    /// that do not follow the CLA/INS/P1/P2 layout.
    pub fn custom(frame: &[u8]) -> Self {
        Self {
            name: "CUSTOM".to_owned(),
            custom: true,
            payload: frame.to_vec(),
            ..Self::new(0x00, 0x00, 0x00, 0x00)
        }
    }

    /// Names the command in logs and error messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches the command data, encoding Lc in the short or the extended form.
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();

        let len = self.payload.len();
        self.lc = Some(match len {
            0..=0xFF => vec![len as u8],
            _ => {
                let [hi, lo] = (len.min(0xFFFF) as u16).to_be_bytes();
                vec![0x00, hi, lo]
            }
        });

        self
    }

    /// Sets the expected response length (Le), up to 3 octets.
    /// For custom commands Le only sizes the response buffer.
    pub fn with_le(mut self, le: &[u8]) -> Self {
        match le.len() {
            0..=3 => self.le = Some(le.to_vec()),
            len => self.errors.push(CommandError::LeTooLong {
                len,
                prefix: format_bytes(&le[..3]),
            }),
        }

        self
    }

    /// Sets the function applied to the response payload. Can be set only once.
    pub fn with_post_process<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    {
        match self.post_process {
            Some(_) => self.errors.push(CommandError::PostProcessAlreadySet),
            None => self.post_process = Some(Box::new(f)),
        }

        self
    }

    /// Name given with [`Command::with_name`], or `RAW`/`CUSTOM`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected response length as set with [`Command::with_le`].
    pub fn le(&self) -> Option<&[u8]> {
        self.le.as_deref()
    }

    /// Records a mistake found by a command constructor.
    pub(crate) fn with_error(mut self, error: CommandError) -> Self {
        self.errors.push(error);
        self
    }

    pub(crate) fn post_process(&self) -> Option<&PostProcess> {
        self.post_process.as_ref()
    }

    /// Surfaces every error recorded while the command was built.
    pub fn check(&self) -> Result<()> {
        match self.errors.is_empty() {
            true => Ok(()),
            _ => Err(Error::Construction {
                command: self.name.clone(),
                errors: self.errors.clone(),
            }),
        }
    }

    /// Converts the command into octets.
    pub fn bytes(&self) -> Vec<u8> {
        if self.custom {
            return self.payload.clone();
        }

        let mut buffer = vec![self.cla, self.ins, self.p1, self.p2];
        if let Some(lc) = &self.lc {
            if !self.payload.is_empty() {
                buffer.extend_from_slice(lc);
                buffer.extend_from_slice(&self.payload);
            }
        }

        match &self.le {
            Some(le) => buffer.extend_from_slice(le),
            None => buffer.push(0x00),
        }

        buffer
    }

    /// Allocates a buffer large enough for the expected response and the status word.
    pub fn response_buffer(&self) -> Result<Vec<u8>> {
        let ne = match self.le.as_deref() {
            None => return Ok(vec![0u8; MAX_BUFFER_SIZE_EXTENDED]),
            Some([]) => 0,
            Some([0x00]) => 256,
            Some([le]) => *le as usize,
            Some([0x00, 0x00]) => 65536,
            Some([hi, lo]) => u16::from_be_bytes([*hi, *lo]) as usize,
            Some([0x00, hi, lo]) => u16::from_be_bytes([*hi, *lo]) as usize,
            Some([_, _, _]) => return Err(self.construction_error(CommandError::InvalidLe)),
            Some(_) => return Err(self.construction_error(CommandError::InvalidLeLength)),
        };

        Ok(vec![0u8; ne + 2])
    }

    fn construction_error(&self, error: CommandError) -> Error {
        Error::Construction {
            command: self.name.clone(),
            errors: vec![error],
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bytes = self.bytes();
        match bytes.len() {
            0..=9 => write!(f, "{} [{}]", self.name, format_bytes(&bytes)),
            _ => write!(f, "{} [{}...]", self.name, format_bytes(&bytes[..10])),
        }
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("bytes", &format_bytes(&self.bytes()))
            .field("le", &self.le)
            .field("post_process", &self.post_process.is_some())
            .field("errors", &self.errors)
            .finish()
    }
}
