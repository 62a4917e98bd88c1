use crate::{
    flow::FlowId,
    packet::{GosPacket, PacketId},
    port::PortId,
    retry::RetryTimer,
};
use std::{collections::VecDeque, fmt, net::Ipv4Addr};

/// The packet a retransmission request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub flow: FlowId,
    pub packet: PacketId,
}

/// One outstanding retransmission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEntry {
    key: RequestKey,
    outgoing_port: PortId,
    /// nearest active node first
    candidates: VecDeque<Ipv4Addr>,
    timer: RetryTimer,
    arrival: u64,
}

impl RequestKey {
    pub const fn new(flow: FlowId, packet: PacketId) -> Self {
        Self { flow, packet }
    }

    pub fn of<P: GosPacket>(packet: &P) -> Self {
        Self::new(packet.flow_id(), packet.packet_id())
    }
}

impl RequestEntry {
    /// The request for `packet`, lost after it came in on `incoming_port`.
    ///
    /// The packet's trail is in crossing order, the candidates are
    /// therefore the trail reversed: the last active node crossed is the
    /// nearest one and is asked first.
    pub(crate) fn new<P: GosPacket>(
        packet: &P,
        incoming_port: PortId,
        timer: RetryTimer,
        arrival: u64,
    ) -> Self {
        let candidates = packet.crossed_nodes().iter().rev().copied().collect();

        Self {
            key: RequestKey::of(packet),
            outgoing_port: incoming_port,
            candidates,
            timer,
            arrival,
        }
    }

    #[inline]
    pub fn key(&self) -> RequestKey {
        self.key
    }

    /// where the retransmitted packet is sent once recovered
    #[inline]
    pub fn outgoing_port(&self) -> PortId {
        self.outgoing_port
    }

    /// the candidates not yet asked, nearest first
    pub fn candidates(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.candidates.iter().copied()
    }

    #[inline]
    pub fn candidates_remaining(&self) -> usize {
        self.candidates.len()
    }

    #[inline]
    pub fn timeout_credit(&self) -> u64 {
        self.timer.timeout_credit()
    }

    #[inline]
    pub fn remaining_attempts(&self) -> u8 {
        self.timer.remaining_attempts()
    }

    #[inline]
    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    /// the request timed out and can be sent to the next candidate
    pub fn is_retryable(&self) -> bool {
        self.timer.is_due() && !self.candidates.is_empty()
    }

    /// nobody is left to ask, or the last attempt timed out
    pub fn is_purgeable(&self) -> bool {
        self.candidates.is_empty() || self.timer.is_exhausted()
    }

    pub(crate) fn next_candidate(&mut self) -> Option<Ipv4Addr> {
        self.candidates.pop_front()
    }

    pub(crate) fn decrease(&mut self, delta: u64) {
        self.timer.decrease(delta);
    }

    pub(crate) fn rearm(&mut self) -> bool {
        self.timer.rearm()
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.timer.is_expired()
    }

    pub(crate) fn set_outgoing_port(&mut self, port: PortId) {
        self.outgoing_port = port;
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow, self.packet)
    }
}
