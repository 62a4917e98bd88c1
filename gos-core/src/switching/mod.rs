/*!
# Label switching and session table

Every label switching node keeps one [`SwitchingTable`]. The table maps
what comes in (`incoming_port`, `label_or_fec`, [`EntryKind`]) to what
goes out and holds the state of the label distribution session that set
the entry up (see [`LabelState`]).

Lookups are linear scans in insertion order. The table does not enforce
unique keys: inserting twice the same key is a mistake of the caller and
lookups then return the first entry inserted.

```
# use gos_core::{EntryKind, LabelStackOperation, LabelState, PortId, SwitchingEntry, SwitchingTable};
# use std::net::Ipv4Addr;
let table = SwitchingTable::new();

let label = table.allocate_label().unwrap();
assert_eq!(label.into_u32(), 16);

let entry = SwitchingEntry::builder()
    .incoming_port(PortId::new(1))
    .label_or_fec(label.into_u32(), EntryKind::Label)
    .outgoing_port(PortId::new(2))
    .label(LabelState::Assigned(label))
    .operation(LabelStackOperation::Swap)
    .tail_end(Ipv4Addr::new(10, 0, 0, 9))
    .local_session(table.new_session_id())
    .build()
    .unwrap();
table.insert(entry);

// the next label skips the one held by the entry
assert_eq!(table.allocate_label().unwrap().into_u32(), 17);
```
*/

mod entry;
mod label;

pub use self::{
    entry::{
        EntryError, EntryKind, FailoverError, LabelStackOperation, SessionId, SwitchingEntry,
        SwitchingEntryBuilder,
    },
    label::{Label, LabelEvent, LabelSpaceExhausted, LabelState, TransitionError},
};
use crate::{
    port::PortId,
    stats::SwitchingStats,
};
use std::{
    collections::BTreeSet,
    net::Ipv4Addr,
    ops::RangeInclusive,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, trace};

/// The switching/session table of a node, see the
/// [module documentation](self).
#[derive(Debug)]
pub struct SwitchingTable {
    state: Mutex<State>,
    labels: RangeInclusive<Label>,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<SwitchingEntry>,
    last_session: u64,
}

impl Default for SwitchingTable {
    fn default() -> Self {
        Self::with_label_range(Label::MIN..=Label::MAX)
    }
}

impl SwitchingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// a table handing out only the labels of `labels`
    pub fn with_label_range(labels: RangeInclusive<Label>) -> Self {
        Self {
            state: Mutex::default(),
            labels,
        }
    }

    pub fn label_range(&self) -> RangeInclusive<Label> {
        self.labels.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// a session identifier never returned before by this table (until
    /// [`SwitchingTable::reset`])
    pub fn new_session_id(&self) -> SessionId {
        let mut state = self.state();
        state.last_session += 1;
        SessionId::new(state.last_session)
    }

    pub fn insert(&self, entry: SwitchingEntry) {
        trace!(
            port = %entry.incoming_port(),
            label_or_fec = entry.label_or_fec(),
            kind = ?entry.kind(),
            session = %entry.local_session(),
            "switching entry inserted"
        );
        self.state().entries.push(entry);
    }

    /// remove the first entry matching the key
    pub fn remove_by(
        &self,
        port: PortId,
        label_or_fec: u32,
        kind: EntryKind,
    ) -> Option<SwitchingEntry> {
        self.state()
            .remove_first(|entry| entry.matches(port, label_or_fec, kind))
    }

    /// remove the first entry of the local session `id` on incoming `port`
    pub fn remove_by_local_session(&self, id: SessionId, port: PortId) -> Option<SwitchingEntry> {
        self.state().remove_first(|entry| {
            entry.local_session() == id && entry.incoming_port() == port
        })
    }

    pub fn lookup_by(
        &self,
        port: PortId,
        label_or_fec: u32,
        kind: EntryKind,
    ) -> Option<SwitchingEntry> {
        self.state()
            .find(|entry| entry.matches(port, label_or_fec, kind))
            .cloned()
    }

    pub fn lookup_by_local_session(&self, id: SessionId) -> Option<SwitchingEntry> {
        self.state()
            .find(|entry| entry.local_session() == id)
            .cloned()
    }

    /// the entry set up on behalf of the upstream session `id` received
    /// on `incoming_port`
    pub fn lookup_by_upstream_session(
        &self,
        id: SessionId,
        incoming_port: PortId,
    ) -> Option<SwitchingEntry> {
        self.state()
            .find(|entry| {
                entry.upstream_session() == Some(id) && entry.incoming_port() == incoming_port
            })
            .cloned()
    }

    /// the first entry switching traffic for `tail_end` that comes in on
    /// `incoming_port`
    pub fn lookup_by_tail_end(
        &self,
        incoming_port: PortId,
        tail_end: Ipv4Addr,
    ) -> Option<SwitchingEntry> {
        self.state()
            .find(|entry| entry.incoming_port() == incoming_port && entry.tail_end() == tail_end)
            .cloned()
    }

    /// run `f` on the first entry matching the key, within the table's lock
    pub fn modify_by<F, R>(&self, port: PortId, label_or_fec: u32, kind: EntryKind, f: F) -> Option<R>
    where
        F: FnOnce(&mut SwitchingEntry) -> R,
    {
        let mut state = self.state();
        state
            .find_mut(|entry| entry.matches(port, label_or_fec, kind))
            .map(f)
    }

    /// run `f` on the entry of the local session `id`, within the
    /// table's lock
    pub fn modify_by_local_session<F, R>(&self, id: SessionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut SwitchingEntry) -> R,
    {
        let mut state = self.state();
        state.find_mut(|entry| entry.local_session() == id).map(f)
    }

    /// The lowest label not held by any [`EntryKind::Label`] entry.
    ///
    /// An entry holds the label it is keyed with and its primary and
    /// backup labels, whether assigned or being removed. The label is not
    /// reserved: two calls without inserting (or updating) an entry in
    /// between return the same label.
    pub fn allocate_label(&self) -> Result<Label, LabelSpaceExhausted> {
        let held: BTreeSet<u32> = self
            .state()
            .entries
            .iter()
            .filter(|entry| entry.kind() == EntryKind::Label)
            .flat_map(SwitchingEntry::held_labels)
            .map(Label::into_u32)
            .collect();

        let range = self.labels.start().into_u32()..=self.labels.end().into_u32();
        let label = lowest_free(&held, range)
            .and_then(Label::new)
            .ok_or(LabelSpaceExhausted)?;

        trace!(%label, held = held.len(), "label allocated");
        Ok(label)
    }

    /// let `delta` time units elapse for every session
    pub fn decrease_timeouts(&self, delta: u64) {
        self.state()
            .entries
            .iter_mut()
            .for_each(|entry| entry.decrease_timeout(delta));
    }

    /// the entries whose pending request or withdrawal must be resent
    pub fn sessions_to_retry(&self) -> Vec<SwitchingEntry> {
        self.state()
            .entries
            .iter()
            .filter(|entry| entry.should_retry())
            .cloned()
            .collect()
    }

    /// spend one attempt on every session due for a retry, returns how
    /// many were re-armed
    pub fn reset_timeouts(&self) -> usize {
        let mut state = self.state();
        let mut count = 0;
        for entry in state.entries.iter_mut() {
            if entry.reset_timeout() {
                debug!(
                    session = %entry.local_session(),
                    attempts = entry.remaining_attempts(),
                    "session retried"
                );
                count += 1;
            }
        }
        count
    }

    /// the entries whose session exhausted its retries
    pub fn failed_sessions(&self) -> Vec<SwitchingEntry> {
        self.state()
            .entries
            .iter()
            .filter(|entry| entry.retry_exhausted())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// a copy of every entry, in insertion order
    pub fn entries(&self) -> Vec<SwitchingEntry> {
        self.state().entries.clone()
    }

    /// remove every entry and restart the session identifiers
    pub fn reset(&self) {
        *self.state() = State::default();
        debug!("switching table reset");
    }

    pub fn stats(&self) -> SwitchingStats {
        let state = self.state();

        state
            .entries
            .iter()
            .fold(SwitchingStats::default(), |mut stats, entry| {
                stats.entries += 1;
                if entry.label().is_assigned() {
                    stats.established += 1;
                }
                if entry.backup_label().is_assigned() {
                    stats.protected += 1;
                }
                if entry.is_pending() {
                    stats.pending += 1;
                }
                if entry.retry_exhausted() {
                    stats.failed += 1;
                }
                stats
            })
    }
}

impl State {
    fn find<F>(&self, predicate: F) -> Option<&SwitchingEntry>
    where
        F: Fn(&SwitchingEntry) -> bool,
    {
        self.entries.iter().find(|entry| predicate(entry))
    }

    fn find_mut<F>(&mut self, predicate: F) -> Option<&mut SwitchingEntry>
    where
        F: Fn(&SwitchingEntry) -> bool,
    {
        self.entries.iter_mut().find(|entry| predicate(entry))
    }

    fn remove_first<F>(&mut self, predicate: F) -> Option<SwitchingEntry>
    where
        F: Fn(&SwitchingEntry) -> bool,
    {
        let index = self.entries.iter().position(predicate)?;
        Some(self.entries.remove(index))
    }
}

/// the lowest value of `range` not in `held`
fn lowest_free(held: &BTreeSet<u32>, range: RangeInclusive<u32>) -> Option<u32> {
    let mut candidate = *range.start();

    for &label in held.range(range.clone()) {
        match label.cmp(&candidate) {
            std::cmp::Ordering::Less => {}
            std::cmp::Ordering::Equal => candidate = candidate.checked_add(1)?,
            std::cmp::Ordering::Greater => break,
        }
    }

    range.contains(&candidate).then_some(candidate)
}
