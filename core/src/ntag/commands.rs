use std::fmt::{Display, Formatter};

use crate::command::{Command, CommandError};
use crate::crc;
use crate::error::BoxError;
use crate::ntag::{Error, PAGE_SIZE};

/// Instructions understood by NTAG21x tags.
///
/// | Instruction        | ISO/IEC 14443     | NFC Forum   | Code    |
/// |--------------------|-------------------|-------------|---------|
/// | `Request`          | REQA              | SENS_REQ    | 26h     |
/// | `Wakeup`           | WUPA              | ALL_REQ     | 52h     |
/// | `Anticollision1`   | Anticollision CL1 | SDD_REQ CL1 | 93h 20h |
/// | `Select1`          | Select CL1        | SEL_REQ CL1 | 93h 70h |
/// | `Anticollision2`   | Anticollision CL2 | SDD_REQ CL2 | 95h 20h |
/// | `Select2`          | Select CL2        | SEL_REQ CL2 | 95h 70h |
/// | `Halt`             | HLTA              | SLP_REQ     | 50h 00h |
/// | `GetVersion`       | -                 | -           | 60h     |
/// | `Read`             | -                 | READ        | 30h     |
/// | `FastRead`         | -                 | -           | 3Ah     |
/// | `Write`            | -                 | WRITE       | A2h     |
/// | `CompWrite`        | -                 | -           | A0h     |
/// | `ReadCnt`          | -                 | -           | 39h     |
/// | `PwdAuth`          | -                 | -           | 1Bh     |
/// | `ReadSig`          | -                 | -           | 3Ch     |
/// | `GetUid`           | -                 | -           | FFh CAh (reader pseudo-APDU) |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Instruction {
    Request,
    Wakeup,
    Anticollision1,
    Anticollision2,
    Select1,
    Select2,
    Halt,
    GetVersion,
    Read,
    FastRead,
    Write,
    CompWrite,
    ReadCnt,
    PwdAuth,
    ReadSig,
    GetUid,
}

static INSTRUCTIONS: [(Instruction, &str, [u8; 2]); 16] = [
    (Instruction::Request, "REQA, SENS_REQ", [0x26, 0x00]),
    (Instruction::Wakeup, "WUPA, ALL_REQ", [0x52, 0x00]),
    (Instruction::Anticollision1, "Anticollision CL1, SDD_REQ CL1", [0x93, 0x20]),
    (Instruction::Anticollision2, "Anticollision CL2, SDD_REQ CL2", [0x95, 0x20]),
    (Instruction::Select1, "Select CL1, SEL_REQ CL1", [0x93, 0x70]),
    (Instruction::Select2, "Select CL2, SEL_REQ CL2", [0x95, 0x70]),
    (Instruction::Halt, "HLTA, SLP_REQ", [0x50, 0x00]),
    (Instruction::GetVersion, "GET_VERSION", [0x60, 0x00]),
    (Instruction::Read, "READ", [0x30, 0x00]),
    (Instruction::FastRead, "FAST_READ", [0x3A, 0x00]),
    (Instruction::Write, "WRITE", [0xA2, 0x00]),
    (Instruction::CompWrite, "COMP_WRITE", [0xA0, 0x00]),
    (Instruction::ReadCnt, "READ_CNT", [0x39, 0x00]),
    (Instruction::PwdAuth, "PWD_AUTH", [0x1B, 0x00]),
    (Instruction::ReadSig, "READ_SIG", [0x3C, 0x00]),
    (Instruction::GetUid, "GET_UID", [0xFF, 0xCA]),
];

impl Instruction {
    fn entry(self) -> &'static (Instruction, &'static str, [u8; 2]) {
        // Every variant has exactly one row.
        &INSTRUCTIONS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// The code of the instruction, padded with 00h for single byte codes.
    pub fn bytes(self) -> [u8; 2] {
        self.entry().2
    }

    /// Resolves the instruction whose code is `[cla, ins]`.
    pub fn lookup(cla: u8, ins: u8) -> Option<Self> {
        INSTRUCTIONS
            .iter()
            .find(|(_, _, bytes)| *bytes == [cla, ins])
            .map(|(instruction, _, _)| *instruction)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Instruction> for Command {
    fn from(instruction: Instruction) -> Self {
        let [cla, ins] = instruction.bytes();

        Command::new(cla, ins, 0x00, 0x00).with_name(instruction.name())
    }
}

/// Builds a post-process function that checks the CRC-A trailing `len` data bytes
/// and yields the data without it.
fn verify_crc(len: usize, block: &'static str) -> impl Fn(&[u8]) -> Result<Vec<u8>, BoxError> {
    move |data: &[u8]| {
        if data.len() < len + 2 {
            return Err(Error::ShortResponse {
                expected: len + 2,
                actual: data.len(),
            }
            .into());
        }

        let (payload, crc) = data[..len + 2].split_at(len);
        match crc::verify(payload, crc) {
            true => Ok(payload.to_vec()),
            _ => Err(Error::CrcMismatch(block).into()),
        }
    }
}

/// Reads the 7-byte UID through the reader's GET DATA pseudo-APDU.
pub fn get_uid() -> Command {
    let [cla, ins] = Instruction::GetUid.bytes();

    Command::new(cla, ins, 0x00, 0x00)
        .with_le(&[7])
        .with_name(Instruction::GetUid.name())
}

/// Reads the product version: 8 bytes of version information and 2 bytes of CRC.
/// The CRC is left in place for [`crate::ntag::Version::parse`].
pub fn get_version() -> Command {
    Command::custom(&[0x60])
        .with_le(&[10])
        .with_name(Instruction::GetVersion.name())
}

/// Reads the capability container from page 3: 4 pages plus CRC, yielding the 16 data bytes.
pub fn read_cc() -> Command {
    Command::custom(&[0x30, 0x03])
        .with_le(&[18])
        .with_name("GET_COMPATIBILITY")
        .with_post_process(verify_crc(16, "Capability Container (CC bytes)"))
}

/// Reads 4 pages starting at `page`.
pub fn read(page: u8) -> Command {
    Command::custom(&[0x30, page])
        .with_le(&[18])
        .with_name(Instruction::Read.name())
        .with_post_process(verify_crc(4 * PAGE_SIZE, "READ"))
}

/// Reads the pages from `start` to `end`, both inclusive.
///
/// A range with `end` before `start` is reported when the command is transmitted.
pub fn fast_read(start: u8, end: u8) -> Command {
    let command = Command::custom(&[0x3A, start, end]).with_name(Instruction::FastRead.name());
    if end < start {
        return command.with_error(CommandError::InvalidPageRange { start, end });
    }

    let len = (end - start) as usize * PAGE_SIZE + PAGE_SIZE;
    let le = match len + 2 {
        n @ 0..=0xFF => vec![n as u8],
        n => (n as u16).to_be_bytes().to_vec(),
    };

    command
        .with_le(&le)
        .with_post_process(verify_crc(len, "FAST_READ"))
}

/// Writes one page.
pub fn write(page: u8, data: [u8; PAGE_SIZE]) -> Command {
    let mut frame = vec![0xA2, page];
    frame.extend_from_slice(&data);

    Command::custom(&frame)
        .with_le(&[])
        .with_name(Instruction::Write.name())
}

/// Writes one page using the MIFARE Ultralight compatible 16-byte frame.
/// Only the first 4 bytes are stored.
pub fn comp_write(page: u8, data: [u8; 16]) -> Command {
    let mut frame = vec![0xA0, page];
    frame.extend_from_slice(&data);

    Command::custom(&frame)
        .with_le(&[])
        .with_name(Instruction::CompWrite.name())
}

/// Reads the 24-bit NFC counter.
pub fn read_cnt(counter: u8) -> Command {
    Command::custom(&[0x39, counter])
        .with_le(&[5])
        .with_name(Instruction::ReadCnt.name())
        .with_post_process(verify_crc(3, "NFC counter"))
}

/// Authenticates with the 32-bit password, yielding the 2-byte password acknowledge.
pub fn pwd_auth(password: [u8; 4]) -> Command {
    let mut frame = vec![0x1B];
    frame.extend_from_slice(&password);

    Command::custom(&frame)
        .with_le(&[4])
        .with_name(Instruction::PwdAuth.name())
        .with_post_process(verify_crc(2, "PACK"))
}

/// Reads the 32-byte ECC originality signature.
pub fn read_sig() -> Command {
    Command::custom(&[0x3C, 0x00])
        .with_le(&[34])
        .with_name(Instruction::ReadSig.name())
        .with_post_process(verify_crc(32, "Signature"))
}
