//! Connection runtime: transport glue and the session event loop.
//!
//! One task per client owns the socket, the framing buffer, the session
//! state machine and the RPC registry. The entry table sits behind a
//! `parking_lot` lock so embedders can read it without crossing the
//! loop; every mutation still happens here. API calls arrive over a
//! bounded command channel, which doubles as the outbound queue.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::registry::RpcRegistry;
use crate::session::{ConnectionState, Session};
use crate::table::EntryTable;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use teletable_protocol::{Decoder, Encoder, EntryFlags, EntryValue, Message, RpcDefinitions, WireError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};

/// Read buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Submissions posted from the embedder API to the event loop.
pub(crate) enum Command {
    /// Assign the entry under `name`, or update it if already known.
    Set {
        name: String,
        value: EntryValue,
        flags: EntryFlags,
    },
    SetFlags {
        name: String,
        flags: EntryFlags,
    },
    Delete {
        name: String,
    },
    ClearAll,
    CallRpc {
        definition_id: u16,
        parameters: Vec<EntryValue>,
        reply: oneshot::Sender<Result<Vec<EntryValue>, ClientError>>,
    },
    Close,
}

/// State shared between the runtime task and `Client` handles.
pub(crate) struct Shared {
    pub table: RwLock<EntryTable>,
    state: Mutex<ConnectionState>,
    pub events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            table: RwLock::new(EntryTable::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut guard = self.state.lock();
            let changed = *guard != state;
            *guard = state;
            changed
        };
        if changed {
            tracing::debug!(?state, "connection state changed");
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
    }
}

/// Drives the connection lifecycle for one client.
pub(crate) struct ConnectionRuntime {
    config: ClientConfig,
    shared: Arc<Shared>,
}

impl ConnectionRuntime {
    pub fn new(config: ClientConfig, shared: Arc<Shared>) -> Self {
        Self { config, shared }
    }

    /// Runs until `Close` or a permanent failure.
    pub async fn run(self, mut commands: mpsc::Receiver<Command>) {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        'reconnect: loop {
            self.shared.set_state(ConnectionState::Connecting);
            let address = (self.config.server_host.as_str(), self.config.server_port);
            match timeout(self.config.connect_timeout, TcpStream::connect(address)).await {
                Ok(Ok(stream)) => {
                    backoff.reset();
                    match self.run_session(stream, &mut commands).await {
                        Ok(()) => break 'reconnect,
                        Err(err) => {
                            tracing::warn!(%err, "session ended");
                            if !err.is_retryable() {
                                break 'reconnect;
                            }
                        }
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(host = %self.config.server_host, %err, "connect failed");
                }
                Err(_) => {
                    tracing::warn!(host = %self.config.server_host, "connect timed out");
                }
            }
            self.shared.set_state(ConnectionState::Disconnected);
            if !self.config.reconnect {
                break;
            }

            let delay = backoff.next_delay();
            tracing::debug!(?delay, "waiting before reconnect");
            let wait = sleep(delay);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    command = commands.recv() => match command {
                        Some(Command::Close) | None => break 'reconnect,
                        Some(command) => fail_disconnected(command),
                    },
                }
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// One session: handshake, steady state, teardown. `Ok(())` means an
    /// orderly close; any error means the transport or protocol failed.
    async fn run_session(
        &self,
        stream: TcpStream,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Result<(), ClientError> {
        stream.set_nodelay(true).ok();
        let (mut reader, mut writer) = stream.into_split();

        let mut session = Session::new(&self.config.client_ident);
        let mut registry = RpcRegistry::new();
        let mut decoder = Decoder::new();
        let mut held_back: Vec<Command> = Vec::new();
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut last_write = Instant::now();
        let mut keep_alive = interval(self.config.keep_alive_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.shared.set_state(ConnectionState::AwaitingServerHello);
        write_message(&mut writer, &session.hello(), &mut last_write).await?;

        let result = loop {
            tokio::select! {
                read = reader.read(&mut read_buf) => {
                    let n = match read {
                        Ok(n) => n,
                        Err(err) => break Err(ClientError::Io(err)),
                    };
                    if n == 0 {
                        break Err(ClientError::TransportClosed);
                    }
                    decoder.extend(&read_buf[..n]);
                    if let Err(err) = self
                        .drain_inbound(
                            &mut decoder,
                            &mut session,
                            &mut registry,
                            &mut writer,
                            &mut held_back,
                            &mut last_write,
                        )
                        .await
                    {
                        break Err(err);
                    }
                }
                command = commands.recv() => match command {
                    None => break Ok(()),
                    Some(Command::Close) => {
                        self.shared.set_state(ConnectionState::Disconnecting);
                        let _ = writer.shutdown().await;
                        break Ok(());
                    }
                    Some(command) if !session.is_ready() => held_back.push(command),
                    Some(command) => {
                        if let Err(err) = self
                            .apply_command(command, &mut registry, &mut writer, &mut last_write)
                            .await
                        {
                            break Err(err);
                        }
                    }
                },
                _ = keep_alive.tick() => {
                    let expired = registry.expire(Instant::now());
                    if expired > 0 {
                        tracing::debug!(expired, "RPC calls timed out");
                    }
                    if last_write.elapsed() >= self.config.keep_alive_interval {
                        if let Err(err) =
                            write_message(&mut writer, &Message::KeepAlive, &mut last_write).await
                        {
                            break Err(err);
                        }
                    }
                }
            }
        };

        // Nothing outlives the session: pending calls cancel, held-back
        // submissions fail, and the mirror empties until the next
        // initial-assignment burst rebuilds it.
        registry.cancel_all();
        for command in held_back {
            fail_disconnected(command);
        }
        let cleared = {
            let mut table = self.shared.table.write();
            let cleared = !table.is_empty();
            table.apply_clear_all();
            cleared
        };
        if cleared {
            let _ = self.shared.events.send(SessionEvent::EntriesCleared);
        }
        result
    }

    /// Decodes and dispatches every whole message sitting in the buffer.
    async fn drain_inbound(
        &self,
        decoder: &mut Decoder,
        session: &mut Session,
        registry: &mut RpcRegistry,
        writer: &mut OwnedWriteHalf,
        held_back: &mut Vec<Command>,
        last_write: &mut Instant,
    ) -> Result<(), ClientError> {
        loop {
            let message = {
                let table = self.shared.table.read();
                decoder.decode_message(&*table)?
            };
            let Some(message) = message else {
                return Ok(());
            };

            let output = {
                let mut table = self.shared.table.write();
                session.handle_message(message, &mut table)?
            };
            for event in output.events {
                if let SessionEvent::RpcResponse {
                    definition_id,
                    unique_id,
                    results,
                } = &event
                {
                    if !registry.complete(*definition_id, *unique_id, results.clone()) {
                        tracing::debug!(
                            definition_id,
                            unique_id,
                            "response without a pending call"
                        );
                        continue;
                    }
                }
                let _ = self.shared.events.send(event);
            }
            for reply in output.replies {
                write_message(writer, &reply, last_write).await?;
            }
            self.shared.set_state(session.state());

            if session.is_ready() && !held_back.is_empty() {
                for command in held_back.drain(..) {
                    self.apply_command(command, registry, writer, last_write)
                        .await?;
                }
            }
        }
    }

    /// Executes one embedder submission against the table and the wire.
    async fn apply_command(
        &self,
        command: Command,
        registry: &mut RpcRegistry,
        writer: &mut OwnedWriteHalf,
        last_write: &mut Instant,
    ) -> Result<(), ClientError> {
        let message = match command {
            Command::Set { name, value, flags } => {
                self.shared.table.write().begin_set(&name, value, flags)
            }
            Command::SetFlags { name, flags } => {
                self.shared.table.write().begin_flags_update(&name, flags)
            }
            Command::Delete { name } => self.shared.table.write().begin_delete(&name),
            Command::ClearAll => Some(self.shared.table.write().begin_clear()),
            Command::CallRpc {
                definition_id,
                parameters,
                reply,
            } => self.stage_rpc_call(definition_id, parameters, reply, registry),
            Command::Close => None,
        };
        if let Some(message) = message {
            write_message(writer, &message, last_write).await?;
        }
        Ok(())
    }

    /// Validates a call against the stored definition and registers its
    /// completion slot; returns the RPC_EXECUTE to send.
    fn stage_rpc_call(
        &self,
        definition_id: u16,
        parameters: Vec<EntryValue>,
        reply: oneshot::Sender<Result<Vec<EntryValue>, ClientError>>,
        registry: &mut RpcRegistry,
    ) -> Option<Message> {
        let arity_check = {
            let table = self.shared.table.read();
            match table.rpc_definition(definition_id) {
                None => Err(WireError::UnknownRpcDefinition(definition_id)),
                Some(definition) => {
                    let expected = definition.parameters.len();
                    if expected != parameters.len() {
                        Err(WireError::RpcArityMismatch {
                            definition: definition_id,
                            expected,
                            actual: parameters.len(),
                        })
                    } else {
                        definition
                            .parameters
                            .iter()
                            .zip(&parameters)
                            .find(|(declared, value)| value.entry_type() != declared.param_type)
                            .map_or(Ok(()), |(declared, _)| {
                                Err(WireError::TypeMismatch {
                                    expected: declared.param_type,
                                })
                            })
                    }
                }
            }
        };
        if let Err(err) = arity_check {
            let _ = reply.send(Err(ClientError::Wire(err)));
            return None;
        }

        let unique_id = registry.allocate_unique_id(definition_id);
        registry.register(
            definition_id,
            unique_id,
            reply,
            Instant::now() + self.config.rpc_timeout,
        );
        Some(Message::RpcExecute {
            definition_id,
            unique_id,
            parameters,
        })
    }
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    message: &Message,
    last_write: &mut Instant,
) -> Result<(), ClientError> {
    let encoded = Encoder::encode(message)?;
    writer.write_all(&encoded).await?;
    *last_write = Instant::now();
    Ok(())
}

/// Fails or drops a submission that cannot reach the server.
fn fail_disconnected(command: Command) {
    match command {
        Command::CallRpc { reply, .. } => {
            let _ = reply.send(Err(ClientError::NotConnected));
        }
        _ => tracing::debug!("dropping submission made while disconnected"),
    }
}
