//! Client-local mirror of the server's entry table.
//!
//! Entries are keyed by name; an id index covers server-assigned ids.
//! Client proposals sit in the name map under `UNASSIGNED_ID` until the
//! server echoes an authoritative assignment for the same name.

use crate::events::SessionEvent;
use std::collections::HashMap;
use teletable_protocol::{
    EntryFlags, EntryType, EntryValue, Message, RpcDefinition, RpcDefinitions, UNASSIGNED_ID,
};

/// A named, typed, versioned value in the shared namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub entry_type: EntryType,
    /// Server-assigned id, or `UNASSIGNED_ID` while a proposal is in flight.
    pub id: u16,
    pub seq: u16,
    pub flags: EntryFlags,
    pub value: EntryValue,
}

impl Entry {
    /// Whether this entry still awaits its server-assigned id.
    pub fn is_pending(&self) -> bool {
        self.id == UNASSIGNED_ID
    }
}

/// Returns whether `incoming` supersedes `stored` under 16-bit
/// wrap-around comparison.
///
/// The acceptance window is `[1, 0x8000]` steps ahead: it tolerates lost
/// and reordered updates within half the sequence space without ever
/// re-accepting data from the distant past.
pub fn seq_newer(stored: u16, incoming: u16) -> bool {
    let diff = incoming.wrapping_sub(stored);
    diff != 0 && diff <= 0x8000
}

/// Client-local mirror of the server's namespace.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: HashMap<String, Entry>,
    ids: HashMap<u16, String>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by name.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Entry by server-assigned id.
    pub fn get_by_id(&self, id: u16) -> Option<&Entry> {
        self.ids.get(&id).and_then(|name| self.entries.get(name))
    }

    /// Snapshot of all entries (pending proposals included), name-ordered.
    pub fn snapshot(&self) -> Vec<Entry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    // =========================================================================
    // Server-origin application
    // =========================================================================

    /// Applies a server ENTRY_ASSIGNMENT.
    ///
    /// Replaces any entry already stored under the id. If the name was
    /// previously bound to a different id, the stale binding is dropped:
    /// the server's assignment always wins.
    pub fn apply_assignment(
        &mut self,
        name: String,
        entry_type: EntryType,
        id: u16,
        seq: u16,
        flags: EntryFlags,
        value: EntryValue,
    ) -> SessionEvent {
        if let Some(previous) = self.entries.get(&name) {
            if previous.id != id && previous.id != UNASSIGNED_ID {
                self.ids.remove(&previous.id);
            }
        }
        if let Some(old_name) = self.ids.insert(id, name.clone()) {
            if old_name != name {
                self.entries.remove(&old_name);
            }
        }
        let entry = Entry {
            name: name.clone(),
            entry_type,
            id,
            seq,
            flags,
            value,
        };
        self.entries.insert(name, entry.clone());
        SessionEvent::EntryAssigned(entry)
    }

    /// Applies a server ENTRY_UPDATE.
    ///
    /// Returns `None` when the id is unknown (updates race deletes) or
    /// the sequence number is stale.
    pub fn apply_update(
        &mut self,
        id: u16,
        seq: u16,
        entry_type: EntryType,
        value: EntryValue,
    ) -> Option<SessionEvent> {
        let name = self.ids.get(&id)?;
        let entry = self.entries.get_mut(name)?;
        if !seq_newer(entry.seq, seq) {
            return None;
        }
        let previous = std::mem::replace(&mut entry.value, value);
        entry.entry_type = entry_type;
        entry.seq = seq;
        Some(SessionEvent::EntryUpdated {
            entry: entry.clone(),
            previous,
        })
    }

    /// Applies a server ENTRY_FLAGS_UPDATE; ignored for unknown ids.
    pub fn apply_flags_update(&mut self, id: u16, flags: EntryFlags) -> Option<SessionEvent> {
        let name = self.ids.get(&id)?;
        let entry = self.entries.get_mut(name)?;
        entry.flags = flags;
        Some(SessionEvent::EntryFlagsUpdated(entry.clone()))
    }

    /// Applies a server ENTRY_DELETE; ignored for unknown ids.
    pub fn apply_delete(&mut self, id: u16) -> Option<SessionEvent> {
        let name = self.ids.remove(&id)?;
        self.entries.remove(&name);
        Some(SessionEvent::EntryDeleted { id, name })
    }

    /// Wipes the table, pending proposals included.
    pub fn apply_clear_all(&mut self) -> SessionEvent {
        self.entries.clear();
        self.ids.clear();
        SessionEvent::EntriesCleared
    }

    // =========================================================================
    // Client-origin staging
    // =========================================================================

    /// Stages a client-origin write and returns the message to send.
    ///
    /// An unknown name becomes a proposal: the entry is mirrored under
    /// `UNASSIGNED_ID` and an assignment with the conventional initial
    /// sequence number goes out; the server's echo later installs the
    /// authoritative id. A known name becomes an update with a bumped
    /// sequence number, mirrored immediately. Writes to an entry whose
    /// proposal is still in flight only touch the mirror, since there is
    /// no id to address an update to yet.
    pub fn begin_set(
        &mut self,
        name: &str,
        value: EntryValue,
        flags: EntryFlags,
    ) -> Option<Message> {
        if name.is_empty() {
            return None;
        }
        let entry_type = value.entry_type();
        match self.entries.get_mut(name) {
            None => {
                let entry = Entry {
                    name: name.to_owned(),
                    entry_type,
                    id: UNASSIGNED_ID,
                    seq: 1,
                    flags,
                    value: value.clone(),
                };
                self.entries.insert(name.to_owned(), entry);
                Some(Message::EntryAssignment {
                    name: name.to_owned(),
                    entry_type,
                    id: UNASSIGNED_ID,
                    seq: 1,
                    flags,
                    value,
                })
            }
            Some(entry) if entry.is_pending() => {
                entry.entry_type = entry_type;
                entry.value = value;
                None
            }
            Some(entry) => {
                entry.seq = entry.seq.wrapping_add(1);
                entry.entry_type = entry_type;
                entry.value = value.clone();
                Some(Message::EntryUpdate {
                    id: entry.id,
                    seq: entry.seq,
                    entry_type,
                    value,
                })
            }
        }
    }

    /// Stages a client-origin flags change; `None` when the name is
    /// unknown or the entry has no server id yet.
    pub fn begin_flags_update(&mut self, name: &str, flags: EntryFlags) -> Option<Message> {
        let entry = self.entries.get_mut(name)?;
        entry.flags = flags;
        if entry.is_pending() {
            return None;
        }
        Some(Message::EntryFlagsUpdate {
            id: entry.id,
            flags,
        })
    }

    /// Stages a client-origin delete; `None` when nothing goes on the
    /// wire (unknown name, or a proposal the server never saw).
    pub fn begin_delete(&mut self, name: &str) -> Option<Message> {
        let entry = self.entries.remove(name)?;
        if entry.is_pending() {
            return None;
        }
        self.ids.remove(&entry.id);
        Some(Message::EntryDelete { id: entry.id })
    }

    /// Stages a client-origin clear of the whole namespace.
    pub fn begin_clear(&mut self) -> Message {
        self.apply_clear_all();
        Message::ClearAllEntries
    }
}

impl RpcDefinitions for EntryTable {
    fn rpc_definition(&self, id: u16) -> Option<&RpcDefinition> {
        match self.get_by_id(id) {
            Some(Entry {
                value: EntryValue::Rpc(definition),
                ..
            }) => Some(definition),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teletable_protocol::{RpcParameter, RpcResult};

    fn boolean_assignment(table: &mut EntryTable, name: &str, id: u16, seq: u16, value: bool) {
        table.apply_assignment(
            name.into(),
            EntryType::Boolean,
            id,
            seq,
            EntryFlags::new(),
            EntryValue::Boolean(value),
        );
    }

    #[test]
    fn test_seq_window() {
        assert!(seq_newer(65535, 0), "wrap-around step is newer");
        assert!(!seq_newer(0, 65535), "one step back is stale");
        assert!(!seq_newer(100, 100), "equal is stale");
        assert!(seq_newer(100, 32868), "half-range boundary is accepted");
        assert!(!seq_newer(100, 32869), "past half-range is stale");
        assert!(seq_newer(100, 101));
    }

    #[test]
    fn test_assignment_inserts_and_indexes() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 1, 1, true);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a").unwrap().id, 1);
        assert_eq!(table.get_by_id(1).unwrap().name, "a");
    }

    #[test]
    fn test_assignment_replaces_in_place() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 1, 1, true);
        table.apply_assignment(
            "a".into(),
            EntryType::Double,
            1,
            5,
            EntryFlags::persistent(),
            EntryValue::Double(3.5),
        );
        let entry = table.get("a").unwrap();
        assert_eq!(entry.entry_type, EntryType::Double);
        assert_eq!(entry.seq, 5);
        assert!(entry.flags.is_persistent());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_assignment_rebinds_name_to_new_id() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 1, 1, true);
        // Server re-introduces "a" under id 2; the old id unbinds.
        boolean_assignment(&mut table, "a", 2, 1, false);
        assert_eq!(table.get("a").unwrap().id, 2);
        assert!(table.get_by_id(1).is_none());
        assert_eq!(table.get_by_id(2).unwrap().name, "a");
    }

    #[test]
    fn test_assignment_reuses_id_for_new_name() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 1, 1, true);
        boolean_assignment(&mut table, "b", 1, 1, false);
        assert!(table.get("a").is_none());
        assert_eq!(table.get_by_id(1).unwrap().name, "b");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_update_applies_and_reports_previous() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 1000, true);
        let event = table
            .apply_update(7, 1001, EntryType::Boolean, EntryValue::Boolean(false))
            .unwrap();
        match event {
            SessionEvent::EntryUpdated { entry, previous } => {
                assert_eq!(entry.value, EntryValue::Boolean(false));
                assert_eq!(entry.seq, 1001);
                assert_eq!(previous, EntryValue::Boolean(true));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_stale_update_rejected() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 1000, true);
        assert!(table
            .apply_update(7, 500, EntryType::Boolean, EntryValue::Boolean(false))
            .is_none());
        assert_eq!(table.get("a").unwrap().value, EntryValue::Boolean(true));
        assert_eq!(table.get("a").unwrap().seq, 1000);
    }

    #[test]
    fn test_update_for_unknown_id_ignored() {
        let mut table = EntryTable::new();
        assert!(table
            .apply_update(9, 1, EntryType::Boolean, EntryValue::Boolean(true))
            .is_none());
    }

    #[test]
    fn test_update_may_change_type() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 1, true);
        table
            .apply_update(7, 2, EntryType::Double, EntryValue::Double(1.25))
            .unwrap();
        let entry = table.get("a").unwrap();
        assert_eq!(entry.entry_type, EntryType::Double);
        assert_eq!(entry.value, EntryValue::Double(1.25));
    }

    #[test]
    fn test_flags_update_leaves_seq_alone() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 41, true);
        table.apply_flags_update(7, EntryFlags::persistent()).unwrap();
        let entry = table.get("a").unwrap();
        assert!(entry.flags.is_persistent());
        assert_eq!(entry.seq, 41);
        assert!(table.apply_flags_update(99, EntryFlags::new()).is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 1, true);
        assert!(table.apply_delete(7).is_some());
        assert!(table.apply_delete(7).is_none());
        assert!(table.is_empty());
        assert!(table.get_by_id(7).is_none());
    }

    #[test]
    fn test_clear_all_discards_pending_proposals() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 1, 1, true);
        table.begin_set("pending", EntryValue::Double(1.0), EntryFlags::new());
        assert_eq!(table.len(), 2);
        table.apply_clear_all();
        assert!(table.is_empty());
    }

    #[test]
    fn test_begin_set_proposes_unknown_name() {
        let mut table = EntryTable::new();
        let message = table
            .begin_set("new", EntryValue::Double(2.0), EntryFlags::new())
            .unwrap();
        assert_eq!(
            message,
            Message::EntryAssignment {
                name: "new".into(),
                entry_type: EntryType::Double,
                id: UNASSIGNED_ID,
                seq: 1,
                flags: EntryFlags::new(),
                value: EntryValue::Double(2.0),
            }
        );
        assert!(table.get("new").unwrap().is_pending());
    }

    #[test]
    fn test_begin_set_rejects_empty_name() {
        let mut table = EntryTable::new();
        assert!(table
            .begin_set("", EntryValue::Boolean(true), EntryFlags::new())
            .is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_proposal_replaced_by_server_echo() {
        let mut table = EntryTable::new();
        table.begin_set("new", EntryValue::Double(2.0), EntryFlags::new());
        table.apply_assignment(
            "new".into(),
            EntryType::Double,
            30,
            1,
            EntryFlags::new(),
            EntryValue::Double(2.0),
        );
        let entry = table.get("new").unwrap();
        assert_eq!(entry.id, 30);
        assert!(!entry.is_pending());
        assert_eq!(table.get_by_id(30).unwrap().name, "new");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_begin_set_updates_known_name() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 10, true);
        let message = table
            .begin_set("a", EntryValue::Boolean(false), EntryFlags::new())
            .unwrap();
        assert_eq!(
            message,
            Message::EntryUpdate {
                id: 7,
                seq: 11,
                entry_type: EntryType::Boolean,
                value: EntryValue::Boolean(false),
            }
        );
        assert_eq!(table.get("a").unwrap().seq, 11);
    }

    #[test]
    fn test_begin_set_on_pending_entry_stays_local() {
        let mut table = EntryTable::new();
        table.begin_set("p", EntryValue::Double(1.0), EntryFlags::new());
        assert!(table
            .begin_set("p", EntryValue::Double(2.0), EntryFlags::new())
            .is_none());
        assert_eq!(table.get("p").unwrap().value, EntryValue::Double(2.0));
    }

    #[test]
    fn test_begin_delete() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 1, true);
        assert_eq!(
            table.begin_delete("a"),
            Some(Message::EntryDelete { id: 7 })
        );
        assert!(table.begin_delete("a").is_none());

        table.begin_set("p", EntryValue::Double(1.0), EntryFlags::new());
        // A proposal the server never saw produces no wire traffic.
        assert!(table.begin_delete("p").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_begin_clear_empties_and_emits_sentinel_message() {
        let mut table = EntryTable::new();
        boolean_assignment(&mut table, "a", 7, 1, true);
        assert_eq!(table.begin_clear(), Message::ClearAllEntries);
        assert!(table.is_empty());
    }

    #[test]
    fn test_rpc_definition_lookup() {
        let definition = RpcDefinition {
            name: "arm/move".into(),
            parameters: vec![RpcParameter {
                param_type: EntryType::Double,
                name: "angle".into(),
                default: EntryValue::Double(0.0),
            }],
            results: vec![RpcResult {
                result_type: EntryType::Boolean,
                name: "ok".into(),
            }],
        };
        let mut table = EntryTable::new();
        table.apply_assignment(
            "rpc/arm".into(),
            EntryType::Rpc,
            40,
            1,
            EntryFlags::new(),
            EntryValue::Rpc(Box::new(definition.clone())),
        );
        assert_eq!(table.rpc_definition(40), Some(&definition));
        assert_eq!(table.rpc_definition(41), None);
        boolean_assignment(&mut table, "plain", 41, 1, true);
        // A non-RPC entry is not a definition.
        assert_eq!(table.rpc_definition(41), None);
    }
}
