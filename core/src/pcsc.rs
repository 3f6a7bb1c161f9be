//! PC/SC support for nfcsdk.
//! Can be enabled by turning `pcsc` feature on.
//!
//! ## What is PC/SC?
//! PC/SC (Personal Computer/Smart Card) is an abstraction layer for communicating with Smart Cards
//! from Windows. Using this layer, applications can connect to any devices that supports PC/SC,
//! without depending on their driver implementation. Windows and macOS supports PC/SC by themselves,
//! Linux also supports by installing pcsc-lite shared library.
//!
//! ## Supported platform
//! Linux, Windows and macOS are supported by pcsc-sys, the raw bindings backing this adapter.
//! The adapter calls the native functions one by one so that transactions, cancellation and
//! status change waits are all under the control of the engine.
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nfcsdk::pcsc::PcscManager;
//! use nfcsdk::{CancellationToken, Sdk};
//!
//! let sdk = Sdk::new(Arc::new(PcscManager), CancellationToken::new(), None).unwrap();
//! for reader in sdk.readers() {
//!     println!("{}: {}", reader.id(), reader.name());
//! }
//! ```

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr::{null, null_mut};
use std::time::Duration;

use pcsc_sys as ffi;
use tracing::debug;

use crate::scard::{
    check, codes, CardHandle, CardState, CardStatus, ContextHandle, Disposition, Protocol,
    ReaderState, ReaderStateFlags, ResourceManager, ScardError, Scope, ShareMode,
};

const MAX_READER_NAME: usize = 1024;

fn call(rv: ffi::LONG) -> Result<(), ScardError> {
    check(rv as u32)
}

fn context(ctx: ContextHandle) -> ffi::SCARDCONTEXT {
    ctx.0 as ffi::SCARDCONTEXT
}

fn card(card: CardHandle) -> ffi::SCARDHANDLE {
    card.0 as ffi::SCARDHANDLE
}

fn c_string(s: &str) -> Result<CString, ScardError> {
    CString::new(s).map_err(|_| ScardError::new(codes::INVALID_VALUE))
}

/// The resource manager of the platform.
#[derive(Clone, Copy, Debug, Default)]
pub struct PcscManager;

impl ResourceManager for PcscManager {
    fn establish_context(&self, scope: Scope) -> Result<ContextHandle, ScardError> {
        let mut ctx: ffi::SCARDCONTEXT = 0;
        call(unsafe {
            ffi::SCardEstablishContext(scope as u32 as ffi::DWORD, null(), null(), &mut ctx)
        })?;

        Ok(ContextHandle(ctx as u64))
    }

    fn release_context(&self, ctx: ContextHandle) -> Result<(), ScardError> {
        call(unsafe { ffi::SCardReleaseContext(context(ctx)) })
    }

    fn is_valid_context(&self, ctx: ContextHandle) -> Result<(), ScardError> {
        call(unsafe { ffi::SCardIsValidContext(context(ctx)) })
    }

    fn list_readers(&self, ctx: ContextHandle) -> Result<Vec<String>, ScardError> {
        let mut len: ffi::DWORD = 0;
        let rv = unsafe { ffi::SCardListReaders(context(ctx), null(), null_mut(), &mut len) };
        if rv as u32 == codes::NO_READERS_AVAILABLE {
            return Ok(Vec::new());
        }
        call(rv)?;

        let mut buf = vec![0u8; len as usize];
        let rv = unsafe {
            ffi::SCardListReaders(
                context(ctx),
                null(),
                buf.as_mut_ptr() as *mut c_char,
                &mut len,
            )
        };
        if rv as u32 == codes::NO_READERS_AVAILABLE {
            return Ok(Vec::new());
        }
        call(rv)?;
        buf.truncate(len as usize);

        Ok(buf
            .split(|b| *b == 0)
            .filter(|name| !name.is_empty())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect())
    }

    fn get_status_change(
        &self,
        ctx: ContextHandle,
        states: &mut [ReaderState],
        timeout: Option<Duration>,
    ) -> Result<(), ScardError> {
        let names = states
            .iter()
            .map(|state| c_string(&state.reader_name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut raw = states
            .iter()
            .zip(&names)
            .map(|(state, name)| ffi::SCARD_READERSTATE {
                szReader: name.as_ptr(),
                pvUserData: null_mut(),
                dwCurrentState: state.current_state.bits() as ffi::DWORD,
                dwEventState: 0,
                cbAtr: 0,
                rgbAtr: [0; ffi::ATR_BUFFER_SIZE],
            })
            .collect::<Vec<_>>();

        let timeout = match timeout {
            Some(timeout) => timeout.as_millis().min(ffi::INFINITE as u128 - 1) as ffi::DWORD,
            None => ffi::INFINITE,
        };

        call(unsafe {
            ffi::SCardGetStatusChange(
                context(ctx),
                timeout,
                raw.as_mut_ptr(),
                raw.len() as ffi::DWORD,
            )
        })?;

        for (state, raw) in states.iter_mut().zip(&raw) {
            let atr_len = (raw.cbAtr as usize).min(raw.rgbAtr.len());

            state.event_state = ReaderStateFlags::from_bits(raw.dwEventState as u32);
            state.atr = raw.rgbAtr[..atr_len].to_vec();
        }

        Ok(())
    }

    fn cancel(&self, ctx: ContextHandle) -> Result<(), ScardError> {
        call(unsafe { ffi::SCardCancel(context(ctx)) })
    }

    fn connect(
        &self,
        ctx: ContextHandle,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocol,
    ) -> Result<(CardHandle, Protocol), ScardError> {
        let name = c_string(reader)?;
        let mut handle: ffi::SCARDHANDLE = 0;
        let mut protocol: ffi::DWORD = 0;

        call(unsafe {
            ffi::SCardConnect(
                context(ctx),
                name.as_ptr(),
                share_mode as u32 as ffi::DWORD,
                protocols.bits() as ffi::DWORD,
                &mut handle,
                &mut protocol,
            )
        })?;
        debug!("Connected to {}", reader);

        Ok((
            CardHandle(handle as u64),
            Protocol::from_bits(protocol as u32),
        ))
    }

    fn disconnect(&self, handle: CardHandle, disposition: Disposition) -> Result<(), ScardError> {
        call(unsafe { ffi::SCardDisconnect(card(handle), disposition as u32 as ffi::DWORD) })
    }

    fn status(&self, handle: CardHandle) -> Result<CardStatus, ScardError> {
        let mut name = [0 as c_char; MAX_READER_NAME];
        let mut name_len = name.len() as ffi::DWORD;
        let mut state: ffi::DWORD = 0;
        let mut protocol: ffi::DWORD = 0;
        let mut atr = [0u8; ffi::ATR_BUFFER_SIZE];
        let mut atr_len = atr.len() as ffi::DWORD;

        call(unsafe {
            ffi::SCardStatus(
                card(handle),
                name.as_mut_ptr(),
                &mut name_len,
                &mut state,
                &mut protocol,
                atr.as_mut_ptr(),
                &mut atr_len,
            )
        })?;

        let reader = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Ok(CardStatus {
            reader,
            state: CardState::from_bits(state as u32),
            protocol: Protocol::from_bits(protocol as u32),
            atr: atr[..(atr_len as usize).min(atr.len())].to_vec(),
        })
    }

    fn begin_transaction(&self, handle: CardHandle) -> Result<(), ScardError> {
        call(unsafe { ffi::SCardBeginTransaction(card(handle)) })
    }

    fn end_transaction(
        &self,
        handle: CardHandle,
        disposition: Disposition,
    ) -> Result<(), ScardError> {
        call(unsafe { ffi::SCardEndTransaction(card(handle), disposition as u32 as ffi::DWORD) })
    }

    fn transmit(
        &self,
        handle: CardHandle,
        protocol: Protocol,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ScardError> {
        debug!("TX: {}", hex::encode(command));

        let pci = ffi::SCARD_IO_REQUEST {
            dwProtocol: protocol.bits() as ffi::DWORD,
            cbPciLength: std::mem::size_of::<ffi::SCARD_IO_REQUEST>() as ffi::DWORD,
        };
        let mut len = response.len() as ffi::DWORD;

        call(unsafe {
            ffi::SCardTransmit(
                card(handle),
                &pci,
                command.as_ptr(),
                command.len() as ffi::DWORD,
                null_mut(),
                response.as_mut_ptr(),
                &mut len,
            )
        })?;

        let len = (len as usize).min(response.len());
        debug!("RX: {}", hex::encode(&response[..len]));

        Ok(len)
    }
}
