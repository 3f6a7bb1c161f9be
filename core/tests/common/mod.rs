// Scripted resource manager shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use nfcsdk::scard::{
    codes, CardHandle, CardState, CardStatus, ContextHandle, Disposition, Protocol, ReaderState,
    ReaderStateFlags, ResourceManager, ScardError, Scope, ShareMode,
};
use nfcsdk::CancellationToken;

pub const CONTEXT: ContextHandle = ContextHandle(0x0100);

/// What the next status change wait does.
pub enum Step {
    /// Sets the event state of the waited readers, by position.
    Events(Vec<ReaderStateFlags>),
    /// Fails the wait with the return value.
    Fail(u32),
    /// Returns without a change and invalidates the context.
    Invalidate,
}

#[derive(Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub releases: AtomicUsize,
    pub cancels: AtomicUsize,
    pub transmits: AtomicUsize,
}

impl Counters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

pub struct Stub {
    readers: Vec<String>,
    script: Mutex<VecDeque<Step>>,
    answers: Mutex<VecDeque<Vec<u8>>>,
    exhausted: Option<CancellationToken>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    valid: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_disconnect: AtomicBool,
    /// Number of upcoming native cancels that fail.
    pub failing_cancels: AtomicUsize,
    pub counters: Counters,
    pub waited_on: Mutex<Vec<Vec<String>>>,
    pub dispositions: Mutex<Vec<Disposition>>,
}

impl Stub {
    pub fn new(readers: &[&str]) -> Self {
        let (cancel_tx, cancel_rx) = crossbeam_channel::unbounded();

        Self {
            readers: readers.iter().map(|r| r.to_string()).collect(),
            script: Mutex::new(VecDeque::new()),
            answers: Mutex::new(VecDeque::new()),
            exhausted: None,
            cancel_tx,
            cancel_rx,
            valid: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            failing_cancels: AtomicUsize::new(0),
            counters: Counters::default(),
            waited_on: Mutex::new(Vec::new()),
            dispositions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, steps: Vec<Step>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    /// Queues raw answers (payload and status word) for transmitted frames.
    pub fn with_answers(self, answers: Vec<Vec<u8>>) -> Self {
        self.answers.lock().extend(answers);
        self
    }

    /// Cancels the token once the script has been played entirely.
    pub fn cancel_when_exhausted(mut self, token: &CancellationToken) -> Self {
        self.exhausted = Some(token.clone());
        self
    }
}

pub fn present() -> ReaderStateFlags {
    ReaderStateFlags::CHANGED | ReaderStateFlags::PRESENT
}

pub fn empty() -> ReaderStateFlags {
    ReaderStateFlags::CHANGED | ReaderStateFlags::EMPTY
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl ResourceManager for Stub {
    fn establish_context(&self, scope: Scope) -> Result<ContextHandle, ScardError> {
        assert_eq!(Scope::System, scope);
        Ok(CONTEXT)
    }

    fn release_context(&self, ctx: ContextHandle) -> Result<(), ScardError> {
        assert_eq!(CONTEXT, ctx);
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_valid_context(&self, _: ContextHandle) -> Result<(), ScardError> {
        match self.valid.load(Ordering::SeqCst) {
            true => Ok(()),
            _ => Err(ScardError::new(codes::INVALID_HANDLE)),
        }
    }

    fn list_readers(&self, _: ContextHandle) -> Result<Vec<String>, ScardError> {
        Ok(self.readers.clone())
    }

    fn get_status_change(
        &self,
        _: ContextHandle,
        states: &mut [ReaderState],
        _: Option<Duration>,
    ) -> Result<(), ScardError> {
        self.waited_on
            .lock()
            .push(states.iter().map(|s| s.reader_name.clone()).collect());

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Events(events)) => {
                for (state, event) in states.iter_mut().zip(events) {
                    state.event_state = event;
                }
                Ok(())
            }
            Some(Step::Fail(code)) => Err(ScardError::new(code)),
            Some(Step::Invalidate) => {
                self.valid.store(false, Ordering::SeqCst);
                Ok(())
            }
            None => {
                if let Some(token) = &self.exhausted {
                    token.cancel();
                }
                // Blocks like an infinite wait until the native cancel arrives.
                let _ = self.cancel_rx.recv();
                Err(ScardError::new(codes::CANCELLED))
            }
        }
    }

    fn cancel(&self, _: ContextHandle) -> Result<(), ScardError> {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_cancels
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ScardError::new(codes::NO_SERVICE));
        }

        let _ = self.cancel_tx.send(());
        Ok(())
    }

    fn connect(
        &self,
        _: ContextHandle,
        _: &str,
        share_mode: ShareMode,
        protocols: Protocol,
    ) -> Result<(CardHandle, Protocol), ScardError> {
        assert_eq!(ShareMode::Exclusive, share_mode);
        assert_eq!(Protocol::ANY, protocols);

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ScardError::new(codes::NO_SMARTCARD));
        }

        let n = self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok((CardHandle(n as u64 + 1), Protocol::T1))
    }

    fn disconnect(&self, _: CardHandle, disposition: Disposition) -> Result<(), ScardError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.dispositions.lock().push(disposition);

        match self.fail_disconnect.load(Ordering::SeqCst) {
            true => Err(ScardError::new(codes::REMOVED_CARD)),
            _ => Ok(()),
        }
    }

    fn status(&self, _: CardHandle) -> Result<CardStatus, ScardError> {
        Ok(CardStatus {
            reader: self.readers.first().cloned().unwrap_or_default(),
            state: CardState::PRESENT | CardState::POWERED | CardState::SPECIFIC,
            protocol: Protocol::T1,
            atr: vec![
                0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03,
                0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x68,
            ],
        })
    }

    fn begin_transaction(&self, _: CardHandle) -> Result<(), ScardError> {
        Ok(())
    }

    fn end_transaction(&self, _: CardHandle, _: Disposition) -> Result<(), ScardError> {
        Ok(())
    }

    fn transmit(
        &self,
        _: CardHandle,
        _: Protocol,
        _: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ScardError> {
        self.counters.transmits.fetch_add(1, Ordering::SeqCst);

        match self.answers.lock().pop_front() {
            Some(answer) => {
                response[..answer.len()].copy_from_slice(&answer);
                Ok(answer.len())
            }
            None => Err(ScardError::new(codes::NOT_TRANSACTED)),
        }
    }
}
