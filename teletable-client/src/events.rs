//! Session events exposed to the embedder.

use crate::session::ConnectionState;
use crate::table::Entry;
use teletable_protocol::EntryValue;

/// Observable changes broadcast by the connection runtime.
///
/// Entry events describe server-origin changes; writes made through the
/// [`crate::Client`] API mirror locally without echoing an event back to
/// their originator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(ConnectionState),
    /// An entry was introduced or re-introduced by the server.
    EntryAssigned(Entry),
    /// An entry's value changed.
    EntryUpdated {
        entry: Entry,
        previous: EntryValue,
    },
    /// An entry's flags changed.
    EntryFlagsUpdated(Entry),
    /// An entry was removed.
    EntryDeleted { id: u16, name: String },
    /// The whole table was wiped.
    EntriesCleared,
    /// A procedure call completed on the server.
    RpcResponse {
        definition_id: u16,
        unique_id: u16,
        results: Vec<EntryValue>,
    },
}
