//! Cooperative cancellation shared between the application and the presence poller.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

/// A token that is cancelled at most once and can be observed from any thread.
///
/// Cancelling drops the only sender, which disconnects every receiver at once.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    done: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);

        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            done: rx,
        }
    }

    /// Cancels the token. Later calls have no effect.
    pub fn cancel(&self) {
        if self.trigger.lock().take().is_some() {
            tracing::debug!("cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) {
        // Nothing is ever sent, so this only returns on disconnection.
        let _ = self.done.recv();
    }

    /// Receiver that becomes disconnected on cancellation, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.done
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
