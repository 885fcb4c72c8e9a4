//! Session state machine.
//!
//! `Session` is a pure consumer of decoded messages: it owns no I/O and
//! no timers, which keeps the handshake and steady-state transitions
//! testable without a socket. The connection runtime feeds it inbound
//! messages and writes out whatever it returns.

use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::table::EntryTable;
use teletable_protocol::{Message, WireError, UNASSIGNED_ID};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingServerHello,
    ReceivingInitialAssignments,
    Ready,
    Disconnecting,
}

/// What the state machine wants done after consuming a message.
#[derive(Debug, Default)]
pub(crate) struct SessionOutput {
    /// Messages to write back to the server, in order.
    pub replies: Vec<Message>,
    /// Events to surface to the embedder.
    pub events: Vec<SessionEvent>,
}

/// Protocol session from CLIENT_HELLO to disconnect.
pub(crate) struct Session {
    state: ConnectionState,
    client_ident: String,
    server_identity: Option<String>,
    previously_seen: bool,
}

impl Session {
    /// A session whose transport just came up; the caller sends
    /// [`Session::hello`] next.
    pub fn new(client_ident: &str) -> Self {
        Self {
            state: ConnectionState::AwaitingServerHello,
            client_ident: client_ident.to_owned(),
            server_identity: None,
            previously_seen: false,
        }
    }

    /// The CLIENT_HELLO that opens the session.
    pub fn hello(&self) -> Message {
        Message::client_hello(self.client_ident.clone())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Identity string from SERVER_HELLO, once received.
    pub fn server_identity(&self) -> Option<&str> {
        self.server_identity.as_deref()
    }

    /// Whether the server remembered this client from a prior session.
    pub fn previously_seen(&self) -> bool {
        self.previously_seen
    }

    /// Consumes one inbound message, updating the table and producing
    /// replies and events. An error ends the session.
    pub fn handle_message(
        &mut self,
        message: Message,
        table: &mut EntryTable,
    ) -> Result<SessionOutput, ClientError> {
        let mut output = SessionOutput::default();
        match (self.state, message) {
            // Receipt resets the peer's idle clock; nothing else to do.
            (_, Message::KeepAlive) => {}
            (
                ConnectionState::AwaitingServerHello,
                Message::ServerHello {
                    previously_seen,
                    identity,
                },
            ) => {
                tracing::debug!(server = %identity, previously_seen, "server hello");
                self.previously_seen = previously_seen;
                self.server_identity = Some(identity);
                self.state = ConnectionState::ReceivingInitialAssignments;
            }
            (
                ConnectionState::AwaitingServerHello,
                Message::ProtoVersionUnsupported { major, minor },
            ) => {
                return Err(ClientError::UnsupportedProtocolVersion { major, minor });
            }
            (ConnectionState::ReceivingInitialAssignments, Message::ServerHelloComplete) => {
                output.replies.push(Message::ClientHelloComplete);
                self.state = ConnectionState::Ready;
                tracing::info!(
                    server = self.server_identity.as_deref().unwrap_or(""),
                    "session ready"
                );
            }
            (
                ConnectionState::ReceivingInitialAssignments | ConnectionState::Ready,
                message,
            ) => {
                self.handle_entry_message(message, table, &mut output)?;
            }
            (state, message) => {
                tracing::warn!(
                    ?state,
                    message_type = message.type_byte(),
                    "message not valid in this session phase"
                );
                return Err(ClientError::Wire(WireError::Malformed(
                    "message out of session phase",
                )));
            }
        }
        Ok(output)
    }

    fn handle_entry_message(
        &mut self,
        message: Message,
        table: &mut EntryTable,
        output: &mut SessionOutput,
    ) -> Result<(), ClientError> {
        match message {
            Message::EntryAssignment {
                name,
                entry_type,
                id,
                seq,
                flags,
                value,
            } => {
                if id == UNASSIGNED_ID {
                    // Only clients propose with the sentinel; a server
                    // must never hand it back.
                    return Err(ClientError::Wire(WireError::Malformed(
                        "server assignment with unassigned id",
                    )));
                }
                output
                    .events
                    .push(table.apply_assignment(name, entry_type, id, seq, flags, value));
            }
            Message::EntryUpdate {
                id,
                seq,
                entry_type,
                value,
            } => {
                if let Some(event) = table.apply_update(id, seq, entry_type, value) {
                    output.events.push(event);
                }
            }
            Message::EntryFlagsUpdate { id, flags } => {
                if let Some(event) = table.apply_flags_update(id, flags) {
                    output.events.push(event);
                }
            }
            Message::EntryDelete { id } => {
                if let Some(event) = table.apply_delete(id) {
                    output.events.push(event);
                }
            }
            Message::ClearAllEntries => output.events.push(table.apply_clear_all()),
            Message::RpcResponse {
                definition_id,
                unique_id,
                results,
            } => {
                output.events.push(SessionEvent::RpcResponse {
                    definition_id,
                    unique_id,
                    results,
                });
            }
            Message::RpcExecute { definition_id, .. } => {
                // This client defines no procedures, so there is nothing
                // to run.
                tracing::warn!(definition_id, "ignoring inbound RPC execution");
            }
            other => {
                tracing::warn!(
                    message_type = other.type_byte(),
                    "message not valid in this session phase"
                );
                return Err(ClientError::Wire(WireError::Malformed(
                    "message out of session phase",
                )));
            }
        }
        Ok(())
    }
}
