//! Responses received from the card and their status words.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use once_cell::sync::Lazy;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::format::format_bytes;

/// The trailer of every response (SW1, SW2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    pub const SUCCESS: Self = Self::new(0x90, 0x00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Determines whether the status word indicates success.
    /// `9F XX` announces more data for GET RESPONSE and is treated as success.
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS || self.sw1 == 0x9F
    }

    /// Human-readable meaning of the status word.
    pub fn description(&self) -> String {
        if let Some(description) = DESCRIPTIONS.get(&(self.sw1, self.sw2)) {
            return (*description).to_owned();
        }

        let sw2 = self.sw2;
        match self.sw1 {
            0x61 => format!("({}) response bytes still available", sw2),
            0x63 => format!("command response code({})", sw2),
            0x67 => format!("incorrect parameter P3 (ISO code) {}", sw2),
            0x6C => format!("incorrect P3 length ({}) or response buffer to small", sw2),
            0x92 => format!("memory error {}", sw2),
            0x94 => format!("file error {}", sw2),
            0x98 => format!("security error {}", sw2),
            0x9F => format!(
                "success {} bytes of data available to be read via Get_Response",
                sw2
            ),
            sw1 => format!("unknown response status: {:X} {:X}", sw1, sw2),
        }
    }
}

impl From<[u8; 2]> for StatusWord {
    fn from([sw1, sw2]: [u8; 2]) -> Self {
        Self { sw1, sw2 }
    }
}

impl Display for StatusWord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

static DESCRIPTIONS: Lazy<HashMap<(u8, u8), &'static str>> = Lazy::new(|| {
    HashMap::from([
        ((0x90, 0x00), "success"),
        ((0x62, 0x00), "no information given"),
        ((0x62, 0x81), "returned data may be corrupted"),
        ((0x62, 0x82), "the end of the file has been reached before the end of reading"),
        ((0x62, 0x83), "invalid DF"),
        ((0x62, 0x84), "selected file is not valid - file descriptor error"),
        ((0x63, 0x00), "authentification failed - invalid secret code or forbidden value"),
        ((0x63, 0x81), "file filled up by the last write"),
        ((0x65, 0x03), "memory failure: EEPROM read/write or hardware problem"),
        ((0x65, 0x81), "write problem / memory failure / unknown mode"),
        ((0x67, 0x00), "incorrect length or address range"),
        ((0x68, 0x00), "the request function is not supported by the card"),
        ((0x68, 0x81), "logical channel not supported"),
        ((0x68, 0x82), "secure messaging not supported"),
        ((0x69, 0x00), "no successful transaction executed during session"),
        ((0x69, 0x81), "cannot select indicated file, command not compatible with file organization"),
        ((0x69, 0x82), "access conditions not fulfilled"),
        ((0x69, 0x83), "secret code locked"),
        ((0x69, 0x84), "referenced data invalidated"),
        ((0x69, 0x85), "no currently selected EF, no command to monitor / no Transaction Manager File"),
        ((0x69, 0x86), "command not allowed (no current EF)"),
        ((0x69, 0x87), "expected SM data objects missing"),
        ((0x69, 0x88), "SM data objects incorrect"),
        ((0x6A, 0x00), "bytes P1 and/or P2 are incorrect"),
        ((0x6A, 0x80), "the parameters in the data field are incorrect"),
        ((0x6A, 0x81), "card is blocked or command not supported"),
        ((0x6A, 0x82), "file not found"),
        ((0x6A, 0x83), "record not found"),
        ((0x6A, 0x84), "there is insufficient memory space in record or file"),
        ((0x6A, 0x85), "Lc inconsistent with TLV structure"),
        ((0x6A, 0x86), "incorrect parameters P1-P2"),
        ((0x6A, 0x87), "the P3 value is not consistent with the P1 and P2 values"),
        ((0x6A, 0x88), "referenced data not found"),
        ((0x6B, 0x00), "incorrect reference; illegal address; invalid P1 or P2 parameter"),
        ((0x6D, 0x00), "command not allowed. invalid instruction byte (INS)"),
        ((0x6E, 0x00), "incorrect application (CLA parameter of a command)"),
        ((0x6F, 0x00), "checking error"),
        ((0x91, 0x00), "purse balance error cannot perform transaction"),
        ((0x91, 0x02), "purse balance error"),
        ((0x92, 0x02), "write problem / memory failure"),
        ((0x92, 0x40), "error, memory problem"),
        ((0x94, 0x00), "security warning"),
        ((0x94, 0x04), "purse selection error or invalid purse"),
        ((0x94, 0x06), "invalid purse detected during the replacement debit step"),
        ((0x94, 0x08), "key file selection error"),
        ((0x94, 0x20), "no temporary transaction key established"),
        ((0x94, 0x34), "update SSD order sequence not respected"),
    ])
});

/// A successful response received from the card.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardResponse {
    status: StatusWord,
    payload: Vec<u8>,
}

impl CardResponse {
    /// Splits the raw answer into payload and status word, runs the post-process function
    /// of the command on the payload, then rejects the answer unless the status word
    /// indicates success.
    pub fn decode(command: &Command, mut raw: Vec<u8>) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::MissingStatusWord {
                command: command.name().to_owned(),
            });
        }

        let trailer = raw.split_off(raw.len() - 2);
        let status = StatusWord::new(trailer[0], trailer[1]);

        let payload = match command.post_process() {
            Some(f) => f(&raw).map_err(|source| Error::PostProcess {
                command: command.name().to_owned(),
                source,
            })?,
            None => raw,
        };

        if !status.is_success() {
            return Err(Error::Status {
                command: command.name().to_owned(),
                status,
            });
        }

        Ok(Self { status, payload })
    }

    pub fn status(&self) -> StatusWord {
        self.status
    }

    pub fn sw1(&self) -> u8 {
        self.status.sw1
    }

    pub fn sw2(&self) -> u8 {
        self.status.sw2
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl Display for CardResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_bytes(&self.payload))
    }
}
