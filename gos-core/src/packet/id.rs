use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// # [`Packet`] Identifier
///
/// Together with the [`FlowId`] it uniquely identifies a GoS packet: a
/// retransmission request names the `(flow, packet)` pair it wants back.
///
/// [`Packet`]: crate::packet::Packet
/// [`FlowId`]: crate::flow::FlowId
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u64);

/// a generator for monotonically increasing [`PacketId`]s
///
/// Every traffic source owns its own generator, so identifiers are only
/// unique within a flow. That is all the cache and the ledger need as they
/// always key packets by `(flow, packet)`.
#[derive(Debug)]
pub struct PacketIdGenerator(AtomicU64);

impl PacketId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// generate the next identifier
    pub fn generate(&self) -> PacketId {
        let id = self.0.fetch_add(1, Ordering::SeqCst);

        debug_assert!(
            id != 0,
            "The generator wrapped around after issuing `u64::MAX` identifiers"
        );

        PacketId(id)
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
