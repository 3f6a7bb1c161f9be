//! Reader registry, presence poller and the lifecycle around them.
//!
//! [`Sdk::new`] establishes a resource manager context and enumerates the readers.
//! [`Sdk::run`] applies the reader selection policy, spawns the `nfc-poller` thread that
//! waits for cards, and blocks until the [`CancellationToken`] fires. Every time a card
//! enters an enabled reader, the poller connects to it exclusively, invokes the card handler
//! on the poller thread, and resets the card afterwards.
//!
//! ```rust,no_run
//! # #[cfg(feature = "pcsc")]
//! # fn main() -> nfcsdk::Result<()> {
//! use std::sync::Arc;
//!
//! use nfcsdk::ntag::Tag;
//! use nfcsdk::pcsc::PcscManager;
//! use nfcsdk::{CancellationToken, Sdk};
//!
//! let token = CancellationToken::new();
//! let sdk = Sdk::new(Arc::new(PcscManager), token.clone(), None)?;
//!
//! sdk.on_card_present(move |card| {
//!     println!("{:?}", card.uid()?);
//!     token.cancel();
//!     Ok(())
//! });
//! sdk.run()
//! # }
//! # #[cfg(not(feature = "pcsc"))]
//! # fn main() {}
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn, Span};

use crate::card::Card;
use crate::error::{BoxError, Error, Result};
use crate::format::format_bytes;
use crate::scard::{
    ContextHandle, Disposition, Protocol, ReaderState, ReaderStateFlags, ResourceManager, Scope,
    ShareMode,
};
use crate::signal::CancellationToken;

/// Interval between native cancel requests while waiting for the poller to exit.
const CANCEL_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Decides which readers listen for cards by setting [`Reader::in_use`].
pub type ReaderSelectFn =
    Box<dyn FnOnce(Vec<Reader>) -> std::result::Result<Vec<Reader>, BoxError> + Send + Sync>;

/// Invoked on the poller thread for every card that enters an enabled reader.
pub type CardHandler<M> = Box<dyn FnMut(&Card<M>) -> std::result::Result<(), BoxError> + Send>;

/// A reader known to the resource manager.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Reader {
    id: usize,
    name: String,
    /// Whether the reader listens for cards.
    pub in_use: bool,
}

impl Reader {
    /// Position of the reader in the enumeration, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Name reported by the resource manager.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Registry {
    readers: Vec<Reader>,
    select: Option<ReaderSelectFn>,
    disposed: bool,
}

pub struct Sdk<M: ResourceManager> {
    manager: Arc<M>,
    context: ContextHandle,
    token: CancellationToken,
    span: Span,
    registry: RwLock<Registry>,
    handler: Mutex<Option<CardHandler<M>>>,
}

impl<M: ResourceManager> Sdk<M> {
    /// Establishes a system scope context and enumerates the readers.
    ///
    /// Log events are recorded inside `span`, or inside an `nfc` span when none is given.
    pub fn new(manager: Arc<M>, token: CancellationToken, span: Option<Span>) -> Result<Self> {
        let span = span.unwrap_or_else(|| tracing::info_span!("nfc"));
        let entered = span.enter();

        let context = manager.establish_context(Scope::System).map_err(|e| {
            error!("{}", e);
            Error::from(e)
        })?;
        debug!("scard context established");

        let names = match manager.list_readers(context) {
            Ok(names) if names.is_empty() => Err(Error::NoReaders),
            Ok(names) => Ok(names),
            Err(e) => Err(e.into()),
        };
        let names = match names {
            Ok(names) => names,
            Err(e) => {
                error!("{}", e);
                if let Err(e) = manager.release_context(context) {
                    error!("{}", e);
                }
                debug!("sdk disposed");
                return Err(e);
            }
        };

        let readers = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                debug!(id = i + 1, name = %name, "found reader");
                Reader {
                    id: i + 1,
                    name,
                    in_use: false,
                }
            })
            .collect();

        drop(entered);

        Ok(Self {
            manager,
            context,
            token,
            span,
            registry: RwLock::new(Registry {
                readers,
                select: None,
                disposed: false,
            }),
            handler: Mutex::new(None),
        })
    }

    /// Sets the reader selection policy. Without one only the first reader is used.
    /// The policy can be set only once.
    pub fn select_reader<F>(&self, policy: F)
    where
        F: FnOnce(Vec<Reader>) -> std::result::Result<Vec<Reader>, BoxError> + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        if registry.select.is_some() {
            let _entered = self.span.enter();
            warn!("reader select callback can only be attached once");
            return;
        }

        registry.select = Some(Box::new(policy));
    }

    /// Sets the card handler. The handler can be set only once.
    pub fn on_card_present<F>(&self, handler: F)
    where
        F: FnMut(&Card<M>) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            let _entered = self.span.enter();
            warn!("card handler can only be attached once");
            return;
        }

        *slot = Some(Box::new(handler));
    }

    /// Snapshot of the known readers and whether each one is in use.
    pub fn readers(&self) -> Vec<Reader> {
        self.registry.read().readers.clone()
    }

    /// Whether the context has been released.
    pub fn disposed(&self) -> bool {
        self.registry.read().disposed
    }

    /// Polls the enabled readers until the cancellation token fires, then releases the context.
    ///
    /// Returns the fatal poller failure and shutdown failures, joined, if any.
    pub fn run(&self) -> Result<()> {
        let _entered = self.span.enter();

        let states = match self.prepare() {
            Ok(states) => states,
            Err(e) => {
                error!("{}", e);
                self.token.cancel();

                return match Error::join_all(self.dispose(None)) {
                    Some(other) => Err(e.join(other)),
                    None => Err(e),
                };
            }
        };
        info!(readers = states.len(), "started");

        let poller = Poller {
            manager: Arc::clone(&self.manager),
            context: self.context,
            token: self.token.clone(),
            handler: self.handler.lock().take(),
            states,
        };
        let (exited_tx, exited_rx) = crossbeam_channel::bounded(0);
        let guard = ExitGuard {
            token: self.token.clone(),
            _exited: exited_tx,
        };
        let span = self.span.clone();

        let spawned = thread::Builder::new()
            .name("nfc-poller".to_owned())
            .spawn(move || {
                let _guard = guard;
                let _entered = span.enter();

                poller.run()
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let e = Error::Spawn(e);
                error!("{}", e);
                self.token.cancel();

                return match Error::join_all(self.dispose(None)) {
                    Some(other) => Err(e.join(other)),
                    None => Err(e),
                };
            }
        };

        self.token.wait();
        debug!("exiting");

        match Error::join_all(self.dispose(Some((handle, exited_rx)))) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn prepare(&self) -> Result<Vec<ReaderState>> {
        if self.disposed() {
            return Err(Error::Disposed);
        }
        self.manager.is_valid_context(self.context)?;

        let (readers, select) = {
            let mut registry = self.registry.write();
            if registry.readers.is_empty() {
                return Err(Error::NoReaders);
            }

            (registry.readers.clone(), registry.select.take())
        };

        let readers = match select {
            Some(select) => select(readers).map_err(Error::ReaderSelect)?,
            None => {
                let mut readers = readers;
                readers[0].in_use = true;
                readers
            }
        };

        let states = readers
            .iter()
            .filter(|reader| reader.in_use)
            .map(|reader| {
                debug!(id = reader.id, name = %reader.name, "using reader");
                ReaderState::new(reader.name.as_str())
            })
            .collect::<Vec<_>>();
        self.registry.write().readers = readers;

        match states.is_empty() {
            true => Err(Error::NoReadersEnabled),
            _ => Ok(states),
        }
    }

    /// Interrupts the poller, waits for it to exit and releases the context.
    /// Only the first call has any effect.
    fn dispose(&self, poller: Option<(JoinHandle<Result<()>>, Receiver<()>)>) -> Vec<Error> {
        {
            let mut registry = self.registry.write();
            if registry.disposed {
                warn!("sdk already disposed");
                return Vec::new();
            }
            registry.disposed = true;
        }
        debug!("disposing...");

        let mut errors = Vec::new();

        if let Some((handle, exited)) = poller {
            debug!("cancel pending actions");
            let mut cancel_failure = None;
            loop {
                // A failed cancel is retried like one that arrived too early.
                if let Err(e) = self.manager.cancel(self.context) {
                    if cancel_failure.is_none() {
                        error!("{}", e);
                        cancel_failure = Some(Error::from(e));
                    }
                }

                match exited.recv_timeout(CANCEL_RETRY_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            errors.extend(cancel_failure);

            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.insert(0, e),
                Err(_) => {
                    error!("poller thread panicked");
                    errors.push(Error::PollerPanicked);
                }
            }
        }

        match self.manager.release_context(self.context) {
            Ok(()) => debug!("released scard context"),
            Err(e) => {
                error!("{}", e);
                errors.push(e.into());
            }
        }

        debug!("sdk disposed");
        errors
    }
}

impl<M: ResourceManager> Drop for Sdk<M> {
    fn drop(&mut self) {
        if !self.disposed() {
            let _entered = self.span.enter();
            self.dispose(None);
        }
    }
}

/// Wakes up [`Sdk::run`] when the poller thread ends, even by unwinding.
struct ExitGuard {
    token: CancellationToken,
    _exited: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Poller<M: ResourceManager> {
    manager: Arc<M>,
    context: ContextHandle,
    token: CancellationToken,
    handler: Option<CardHandler<M>>,
    states: Vec<ReaderState>,
}

impl<M: ResourceManager> Poller<M> {
    fn run(mut self) -> Result<()> {
        let result = self.poll();
        if let Err(e) = &result {
            error!("{}", e);
            self.token.cancel();
        }

        result
    }

    fn poll(&mut self) -> Result<()> {
        while !self.token.is_cancelled() {
            self.manager.is_valid_context(self.context)?;

            if let Err(e) = self
                .manager
                .get_status_change(self.context, &mut self.states, None)
            {
                if self.token.is_cancelled() {
                    debug!("status change wait interrupted: {}", e);
                    break;
                }

                return Err(e.into());
            }

            for i in 0..self.states.len() {
                let previous = self.states[i].sync_current_state();
                let state = &self.states[i];

                if !state.event_state.intersects(ReaderStateFlags::PRESENT) {
                    debug!(reader = %state.reader_name, "no card present, waiting...");
                    continue;
                }
                if previous.intersects(ReaderStateFlags::PRESENT) {
                    continue;
                }

                debug!(reader = %state.reader_name, "card is present");
                let reader = state.reader_name.clone();

                self.manager.is_valid_context(self.context)?;
                if let Err(e) = self.handle_card(&reader) {
                    error!("{}", e);
                }
            }
        }

        Ok(())
    }

    /// Runs one card session. Failures are only reported to the caller for logging.
    fn handle_card(&mut self, reader: &str) -> Result<()> {
        let card = Card::connect(
            Arc::clone(&self.manager),
            self.context,
            reader,
            ShareMode::Exclusive,
            Protocol::ANY,
        )?;

        let status = card.refresh_status()?;
        info!(
            state = %status.state,
            protocol = %status.protocol,
            reader = %status.reader,
            atr = %format_bytes(&status.atr),
            "connected card status"
        );

        let handled = match (self.token.is_cancelled(), self.handler.as_mut()) {
            (true, _) => {
                debug!("cancelled before the card handler was invoked");
                Ok(())
            }
            (_, Some(handler)) => handler(&card).map_err(Error::Handler),
            (_, None) => {
                info!("no card handler defined");
                Ok(())
            }
        };

        let disconnected = card.disconnect(Disposition::Reset);
        if disconnected.is_ok() {
            info!("card disconnected");
        }

        settle(handled, disconnected)
    }
}

/// Combines the handler outcome with the disconnect outcome, keeping both failures.
fn settle(handled: Result<()>, disconnected: Result<()>) -> Result<()> {
    match (handled, disconnected) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(e), Err(other)) => Err(e.join(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scard::{codes, ScardError};

    #[test]
    fn test_settle() {
        assert!(settle(Ok(()), Ok(())).is_ok());
        assert!(matches!(
            settle(Ok(()), Err(ScardError::new(codes::REMOVED_CARD).into())),
            Err(Error::Scard(_)),
        ));

        let err = settle(
            Err(Error::Handler("unsupported tag".into())),
            Err(ScardError::new(codes::REMOVED_CARD).into()),
        )
        .unwrap_err();

        match &err {
            Error::Aggregate(errors) => {
                assert_eq!(2, errors.len());
                assert!(matches!(errors[0], Error::Handler(_)));
                assert!(matches!(errors[1], Error::Scard(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.to_string().starts_with("card handler failed: unsupported tag; "));
    }
}
