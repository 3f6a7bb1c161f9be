use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::response::CardResponse;
use crate::scard::{
    CardHandle, CardStatus, ContextHandle, Disposition, Protocol, ResourceManager, ShareMode,
};

/// A connection to a card present in a reader.
///
/// The connection is released exactly once: either by [`Card::disconnect`], or with
/// [`Disposition::Reset`] when the value is dropped.
pub struct Card<M: ResourceManager> {
    manager: Arc<M>,
    handle: CardHandle,
    protocol: Protocol,
    status: Mutex<CardStatus>,
    connected: bool,
}

impl<M: ResourceManager> Card<M> {
    /// Connects to the card in `reader` with the given share mode,
    /// letting the resource manager negotiate one of `protocols`.
    pub fn connect(
        manager: Arc<M>,
        context: ContextHandle,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocol,
    ) -> Result<Self> {
        let (handle, protocol) = manager.connect(context, reader, share_mode, protocols)?;
        debug!(reader, %protocol, "connected to card");

        Ok(Self {
            manager,
            handle,
            protocol,
            status: Mutex::new(CardStatus {
                reader: reader.to_owned(),
                protocol,
                ..CardStatus::default()
            }),
            connected: true,
        })
    }

    /// Protocol negotiated on connection.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Last status fetched by [`Card::refresh_status`].
    pub fn current_status(&self) -> CardStatus {
        self.status.lock().clone()
    }

    /// Fetches the status from the resource manager and stores it.
    pub fn refresh_status(&self) -> Result<CardStatus> {
        let status = self.manager.status(self.handle)?;
        *self.status.lock() = status.clone();

        Ok(status)
    }

    /// Transmits the command, then decodes the answer.
    pub fn transmit(&self, command: &Command) -> Result<CardResponse> {
        command.check()?;

        let mut buffer = command.response_buffer()?;
        debug!("{}", command);

        let len = self
            .manager
            .transmit(self.handle, self.protocol, &command.bytes(), &mut buffer)
            .map_err(|source| Error::Transmit {
                command: command.name().to_owned(),
                source,
            })?;
        buffer.truncate(len);

        CardResponse::decode(command, buffer)
    }

    /// Gains exclusive access to the card for a sequence of commands.
    pub fn begin_transaction(&self) -> Result<()> {
        Ok(self.manager.begin_transaction(self.handle)?)
    }

    /// Releases the access gained by [`Card::begin_transaction`].
    pub fn end_transaction(&self, disposition: Disposition) -> Result<()> {
        Ok(self.manager.end_transaction(self.handle, disposition)?)
    }

    /// Ends the connection, leaving the card as `disposition` says.
    pub fn disconnect(mut self, disposition: Disposition) -> Result<()> {
        self.connected = false;

        Ok(self.manager.disconnect(self.handle, disposition)?)
    }
}

impl<M: ResourceManager> Drop for Card<M> {
    fn drop(&mut self) {
        if self.connected {
            if let Err(e) = self.manager.disconnect(self.handle, Disposition::Reset) {
                warn!("failed to disconnect from card: {}", e);
            }
        }
    }
}
