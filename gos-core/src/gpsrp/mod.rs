/*!
# GoS Packet Support Retransmission Protocol ledger

When an active node notices a GoS packet went missing it cannot simply
ask its neighbour: the neighbour may not be an active node, or may have
evicted the packet already. Instead the node remembers which active
nodes the packet crossed (the packet carries that trail) and asks them
one after the other, nearest first, until one of them answers with the
packet.

The [`RequestLedger`] tracks these requests. Nothing is sent from here:
the node logic calls [`RequestLedger::next_candidate`] to know whom to
ask, [`RequestLedger::tick`] to let time pass and
[`RequestLedger::sweep`] to retire requests that cannot succeed anymore.

```
# use gos_core::{GosLevel, Packet, PacketIdGenerator, PortId, RequestKey, RequestLedger, Synthetic};
# use std::net::Ipv4Addr;
let n1 = Ipv4Addr::new(192, 168, 0, 1);
let n2 = Ipv4Addr::new(192, 168, 0, 2);

let generator = PacketIdGenerator::new();
let mut packet = Packet::builder(&generator)
    .source(Ipv4Addr::new(10, 0, 0, 1))
    .destination(Ipv4Addr::new(10, 0, 0, 9))
    .level(GosLevel::LEVEL_3)
    .data(Synthetic(64))
    .build()
    .unwrap();
packet.record_crossing(n2);
packet.record_crossing(n1);

let ledger = RequestLedger::new();
assert!(ledger.open(&packet, PortId::new(1)));

let key = RequestKey::new(packet.flow(), packet.id());
assert_eq!(ledger.next_candidate(key.flow, key.packet), Some(n1));
assert_eq!(ledger.next_candidate(key.flow, key.packet), Some(n2));
assert_eq!(ledger.next_candidate(key.flow, key.packet), None);
assert!(ledger.is_purgeable(key.flow, key.packet));
```
*/

mod entry;

pub use self::entry::{RequestEntry, RequestKey};
use crate::{
    flow::FlowId,
    packet::{GosPacket, PacketId},
    port::PortId,
    retry::RetryTimer,
    stats::LedgerStats,
};
use std::{
    net::Ipv4Addr,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::debug;

/// The retransmission requests of a node, see the
/// [module documentation](self).
#[derive(Debug)]
pub struct RequestLedger {
    timer: RetryTimer,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    /// in arrival order
    entries: Vec<RequestEntry>,
    next_arrival: u64,
}

impl RequestLedger {
    /// a ledger with the [`RetryTimer::request`] timeout and attempts
    pub fn new() -> Self {
        Self::with_timer(RetryTimer::request())
    }

    /// a ledger whose requests start with `timer`
    pub fn with_timer(timer: RetryTimer) -> Self {
        Self {
            timer,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a request for `packet`, lost after it came in on
    /// `incoming_port`.
    ///
    /// Returns `false` (and leaves the pending request untouched) if a
    /// request is already open for the packet.
    pub fn open<P: GosPacket>(&self, packet: &P, incoming_port: PortId) -> bool {
        let key = RequestKey::of(packet);
        let mut state = self.state();

        if state.position(key).is_some() {
            return false;
        }

        let arrival = state.next_arrival;
        state.next_arrival += 1;
        let entry = RequestEntry::new(packet, incoming_port, self.timer, arrival);

        debug!(
            request = %key,
            port = %incoming_port,
            candidates = entry.candidates_remaining(),
            "retransmission request opened"
        );

        state.entries.push(entry);
        true
    }

    /// pop the nearest candidate not asked yet
    pub fn next_candidate(&self, flow: FlowId, packet: PacketId) -> Option<Ipv4Addr> {
        self.state()
            .get_mut(RequestKey::new(flow, packet))?
            .next_candidate()
    }

    /// let `delta` time units elapse for every request
    pub fn tick(&self, delta: u64) {
        self.state()
            .entries
            .iter_mut()
            .for_each(|entry| entry.decrease(delta));
    }

    /// Retire purgeable requests and re-arm the expired ones.
    ///
    /// Returns the keys of the retired requests, in arrival order.
    pub fn sweep(&self) -> Vec<RequestKey> {
        let mut state = self.state();
        let mut purged = Vec::new();

        state.entries.retain_mut(|entry| {
            if entry.is_purgeable() {
                debug!(
                    request = %entry.key(),
                    candidates = entry.candidates_remaining(),
                    attempts = entry.remaining_attempts(),
                    "retransmission request purged"
                );
                purged.push(entry.key());
                return false;
            }

            if entry.is_expired() {
                entry.rearm();
            }
            true
        });

        purged
    }

    pub fn is_retryable(&self, flow: FlowId, packet: PacketId) -> bool {
        self.lookup(flow, packet)
            .is_some_and(|entry| entry.is_retryable())
    }

    pub fn is_purgeable(&self, flow: FlowId, packet: PacketId) -> bool {
        self.lookup(flow, packet)
            .is_some_and(|entry| entry.is_purgeable())
    }

    /// the requests to send to their next candidate, in arrival order
    pub fn retryable(&self) -> Vec<RequestKey> {
        self.state()
            .entries
            .iter()
            .filter(|entry| entry.is_retryable())
            .map(RequestEntry::key)
            .collect()
    }

    /// the packet was received: the request is closed
    pub fn resolve(&self, flow: FlowId, packet: PacketId) -> Option<RequestEntry> {
        let mut state = self.state();
        let index = state.position(RequestKey::new(flow, packet))?;
        let entry = state.entries.remove(index);

        debug!(request = %entry.key(), "retransmission request resolved");
        Some(entry)
    }

    pub fn lookup(&self, flow: FlowId, packet: PacketId) -> Option<RequestEntry> {
        let state = self.state();
        let index = state.position(RequestKey::new(flow, packet))?;
        state.entries.get(index).cloned()
    }

    /// move every request replying on `old` to `new`, returns how many
    pub fn rebind_port(&self, old: PortId, new: PortId) -> usize {
        let mut state = self.state();
        let mut count = 0;
        for entry in state
            .entries
            .iter_mut()
            .filter(|entry| entry.outgoing_port() == old)
        {
            entry.set_outgoing_port(new);
            count += 1;
        }
        count
    }

    /// drop every request replying on `port`, returns how many
    pub fn purge_by_port(&self, port: PortId) -> usize {
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|entry| entry.outgoing_port() != port);
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn reset(&self) {
        *self.state() = State::default();
        debug!("retransmission ledger reset");
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.state();

        LedgerStats {
            pending: state.entries.len(),
            retryable: state.entries.iter().filter(|e| e.is_retryable()).count(),
            purgeable: state.entries.iter().filter(|e| e.is_purgeable()).count(),
        }
    }
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn position(&self, key: RequestKey) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key() == key)
    }

    fn get_mut(&mut self, key: RequestKey) -> Option<&mut RequestEntry> {
        self.entries.iter_mut().find(|entry| entry.key() == key)
    }
}
