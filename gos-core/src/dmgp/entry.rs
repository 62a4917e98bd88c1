use crate::{
    flow::FlowId,
    packet::{GosPacket, PacketId},
};

/// one buffered packet of a [`FlowPartition`]
///
/// `arrival` only orders entries for eviction, it never leaves the crate.
///
/// [`FlowPartition`]: super::FlowPartition
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<P> {
    packet: P,
    flow: FlowId,
    packet_id: PacketId,
    size: u64,
    arrival: u64,
}

impl<P> CacheEntry<P>
where
    P: GosPacket,
{
    /// take ownership of the clone to buffer
    pub(crate) fn new(packet: P, arrival: u64) -> Self {
        Self {
            flow: packet.flow_id(),
            packet_id: packet.packet_id(),
            size: packet.bytes_size(),
            packet,
            arrival,
        }
    }

    #[inline]
    pub(crate) fn flow(&self) -> FlowId {
        self.flow
    }

    #[inline]
    pub(crate) fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// size charged against the partition when the entry was created
    #[inline]
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub(crate) fn arrival(&self) -> u64 {
        self.arrival
    }

    #[inline]
    pub(crate) fn packet(&self) -> &P {
        &self.packet
    }
}
