//! What active nodes exchange.
//!
//! Nothing here is encoded on a wire: the simulation moves these values
//! between nodes as they are.

use gos_core::{Label, Packet, PortId, RequestKey, SessionId};
use std::net::Ipv4Addr;

/// A GoS packet on the data plane, with the label it is switched with.
///
/// Traffic entering the LSP at the ingress has no label yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<T> {
    pub label: Option<Label>,
    pub packet: Packet<T>,
}

/// Label distribution signaling, exchanged hop by hop.
///
/// A session is always named after the sender's point of view: a request
/// carries the sender's local session, the answers carry the session of
/// the node they are sent to (its local session, our upstream session).
///
/// Whether an answer is about the primary or the backup LSP is told by the
/// port it arrives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// ask the downstream node for a label to reach `fec`
    LabelRequest { fec: Ipv4Addr, session: SessionId },
    LabelMapping { session: SessionId, label: Label },
    /// there is no label or no path downstream
    PathUnavailable { session: SessionId },
    /// the upstream node tears the LSP down
    LabelWithdraw { session: SessionId },
    /// the downstream node released its part of the LSP
    LabelRelease { session: SessionId },
}

/// GPSRP: "resend me this packet", sent to a candidate active node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmissionRequest {
    pub key: RequestKey,
    /// where to send the packet back
    pub requester: Ipv4Addr,
}

/// What a node asks its environment to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction<T> {
    /// send the frame to the neighbour on `port`
    Forward { port: PortId, frame: Frame<T> },
    /// the packet leaves the LSP and reaches its destination
    Deliver(Packet<T>),
    Signal { port: PortId, signal: Signal },
    Request {
        to: Ipv4Addr,
        request: RetransmissionRequest,
    },
    Reply { to: Ipv4Addr, packet: Packet<T> },
    /// the node gave up recovering the packet
    Unrecoverable(RequestKey),
}
