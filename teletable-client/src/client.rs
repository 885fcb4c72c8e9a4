//! High-level client API.

use crate::config::ClientConfig;
use crate::conn::{Command, ConnectionRuntime, Shared};
use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::session::ConnectionState;
use crate::table::Entry;
use std::sync::Arc;
use teletable_protocol::{EntryFlags, EntryValue};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to a table client.
///
/// `connect` spawns a background runtime that owns the connection; the
/// handle is cheap to clone and all clones observe the same session.
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl Client {
    /// Spawns the connection runtime and returns a handle to it.
    ///
    /// The runtime dials immediately and keeps reconnecting per the
    /// configured backoff until [`Client::close`] or a protocol-version
    /// rejection.
    pub fn connect(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared::new(events));
        let (commands, command_rx) = mpsc::channel(config.outbound_queue.max(1));
        let runtime = ConnectionRuntime::new(config, shared.clone());
        tokio::spawn(runtime.run(command_rx));
        Self { commands, shared }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the handshake has completed on the current connection.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Subscribes to session events. A slow subscriber that falls more
    /// than the channel capacity behind starts losing the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of a single entry by name.
    pub fn entry(&self, name: &str) -> Option<Entry> {
        self.shared.table.read().get(name).cloned()
    }

    /// Snapshot of the whole table, name-ordered.
    pub fn entries(&self) -> Vec<Entry> {
        self.shared.table.read().snapshot()
    }

    // =========================================================================
    // Entry operations
    // =========================================================================

    /// Assigns the entry under `name`, or updates it if already known.
    /// Blocks while the outbound queue is full.
    pub async fn assign(
        &self,
        name: impl Into<String>,
        value: EntryValue,
        flags: EntryFlags,
    ) -> Result<(), ClientError> {
        self.submit(Command::Set {
            name: name.into(),
            value,
            flags,
        })
        .await
    }

    /// [`Client::assign`] with default flags.
    pub async fn update(
        &self,
        name: impl Into<String>,
        value: EntryValue,
    ) -> Result<(), ClientError> {
        self.assign(name, value, EntryFlags::new()).await
    }

    /// Fail-fast [`Client::assign`]: `Backpressure` when the outbound
    /// queue is full.
    pub fn try_assign(
        &self,
        name: impl Into<String>,
        value: EntryValue,
        flags: EntryFlags,
    ) -> Result<(), ClientError> {
        self.try_submit(Command::Set {
            name: name.into(),
            value,
            flags,
        })
    }

    /// Fail-fast [`Client::update`].
    pub fn try_update(
        &self,
        name: impl Into<String>,
        value: EntryValue,
    ) -> Result<(), ClientError> {
        self.try_assign(name, value, EntryFlags::new())
    }

    /// Replaces the flags of a known entry.
    pub async fn set_flags(
        &self,
        name: impl Into<String>,
        flags: EntryFlags,
    ) -> Result<(), ClientError> {
        self.submit(Command::SetFlags {
            name: name.into(),
            flags,
        })
        .await
    }

    /// Deletes the entry under `name`.
    pub async fn delete(&self, name: impl Into<String>) -> Result<(), ClientError> {
        self.submit(Command::Delete { name: name.into() }).await
    }

    /// Deletes every entry in the namespace.
    pub async fn clear_all(&self) -> Result<(), ClientError> {
        self.submit(Command::ClearAll).await
    }

    // =========================================================================
    // RPC
    // =========================================================================

    /// Invokes the procedure stored under `definition_id` and awaits its
    /// typed results. Fails with `TimedOut` after the configured RPC
    /// timeout and with `Cancelled` if the session drops first.
    pub async fn call_rpc(
        &self,
        definition_id: u16,
        parameters: Vec<EntryValue>,
    ) -> Result<Vec<EntryValue>, ClientError> {
        let (reply, response) = oneshot::channel();
        self.submit(Command::CallRpc {
            definition_id,
            parameters,
            reply,
        })
        .await?;
        response.await.map_err(|_| ClientError::Cancelled)?
    }

    /// Closes the connection and stops the runtime; no reconnect.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    async fn submit(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::TransportClosed)
    }

    fn try_submit(&self, command: Command) -> Result<(), ClientError> {
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => ClientError::Backpressure,
            TrySendError::Closed(_) => ClientError::TransportClosed,
        })
    }
}
