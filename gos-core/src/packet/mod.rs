mod id;
mod level;

pub use self::{
    id::{PacketId, PacketIdGenerator},
    level::GosLevel,
};
use crate::{
    data::Data,
    defaults::{CROSSED_NODE_SIZE, GOS_OPTION_SIZE, IPV4_HEADER_SIZE},
    flow::FlowId,
};
use anyhow::{Result, bail};
use std::{fmt, net::Ipv4Addr};

/// What the core needs to know about a GoS packet.
///
/// The retransmission cache and the request ledger never look at concrete
/// packet types: anything that can tell its flow, identifier, size, GoS
/// level and the trail of active nodes it crossed can be cached and
/// recovered.
///
/// Packets are stored by value: the cache keeps a [`Clone`] of what it
/// is given, so the forwarding path and the cache never alias the same
/// packet.
pub trait GosPacket: Clone + Send + 'static {
    fn flow_id(&self) -> FlowId;

    fn packet_id(&self) -> PacketId;

    /// size of the whole packet in bytes (headers included)
    fn bytes_size(&self) -> u64;

    fn gos_level(&self) -> GosLevel;

    /// the active nodes this packet crossed, in crossing order (the first
    /// address is the first active node the packet went through)
    fn crossed_nodes(&self) -> &[Ipv4Addr];
}

/// # A GoS tagged IPv4 packet
///
/// The packet keeps the GoS option the active technique relies on: its
/// [`GosLevel`], its [`PacketId`] and the trail of active nodes it
/// crossed. The payload `T` only contributes its size.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet<T> {
    id: PacketId,
    flow: FlowId,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    level: GosLevel,
    crossed: Vec<Ipv4Addr>,
    data: T,
}

pub struct PacketBuilder<'a, T> {
    generator: &'a PacketIdGenerator,
    source: Option<Ipv4Addr>,
    destination: Option<Ipv4Addr>,
    level: GosLevel,
    data: Option<T>,
}

impl<'a, T> PacketBuilder<'a, T>
where
    T: Data,
{
    pub fn new(generator: &'a PacketIdGenerator) -> Self {
        Self {
            generator,
            source: None,
            destination: None,
            level: GosLevel::LEVEL_0,
            data: None,
        }
    }

    pub fn source(mut self, source: Ipv4Addr) -> Self {
        self.source = Some(source);
        self
    }

    pub fn destination(mut self, destination: Ipv4Addr) -> Self {
        self.destination = Some(destination);
        self
    }

    /// set the GoS level, defaults to [`GosLevel::LEVEL_0`]
    pub fn level(mut self, level: GosLevel) -> Self {
        self.level = level;
        self
    }

    pub fn data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn build(self) -> Result<Packet<T>> {
        let Some(source) = self.source else {
            bail!("Missing source address (`source')")
        };
        let Some(destination) = self.destination else {
            bail!("Missing destination address (`destination')")
        };
        let Some(data) = self.data else {
            bail!("Missing packet content (`data')")
        };

        Ok(Packet {
            id: self.generator.generate(),
            flow: FlowId::from_source(source),
            source,
            destination,
            level: self.level,
            crossed: Vec::new(),
            data,
        })
    }
}

impl<T> Packet<T>
where
    T: Data,
{
    pub fn builder(generator: &PacketIdGenerator) -> PacketBuilder<'_, T> {
        PacketBuilder::new(generator)
    }
}

impl<T> Packet<T> {
    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn source(&self) -> Ipv4Addr {
        self.source
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn level(&self) -> GosLevel {
        self.level
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// append an active node to the packet's trail
    ///
    /// Called by every active node the packet goes through so a node
    /// further down the path knows whom to ask for a retransmission.
    pub fn record_crossing(&mut self, node: Ipv4Addr) {
        self.crossed.push(node);
    }

    /// consume the packet and get the inner `T`.
    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T> GosPacket for Packet<T>
where
    T: Data + Clone,
{
    fn flow_id(&self) -> FlowId {
        self.flow
    }

    fn packet_id(&self) -> PacketId {
        self.id
    }

    fn bytes_size(&self) -> u64 {
        IPV4_HEADER_SIZE
            + GOS_OPTION_SIZE
            + CROSSED_NODE_SIZE * self.crossed.len() as u64
            + self.data.bytes_size()
    }

    fn gos_level(&self) -> GosLevel {
        self.level
    }

    fn crossed_nodes(&self) -> &[Ipv4Addr] {
        &self.crossed
    }
}

impl<T> fmt::Debug for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&format!("Packet<{}>", std::any::type_name::<T>()))
            .field("id", &self.id)
            .field("flow", &self.flow)
            .field("level", &self.level)
            .field("crossed", &self.crossed)
            .finish_non_exhaustive()
    }
}
