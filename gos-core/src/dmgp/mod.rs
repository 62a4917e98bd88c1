/*!
# Dynamic Memory for GoS Packets

The retransmission cache of an active node. Every GoS packet crossing
the node is offered to the cache ([`Dmgp::admit`]); the first packet of a
flow decides how much of the cache the flow gets, based on its
[`GosLevel`]. Subsequent packets of the flow are kept within that quota,
the oldest ones being evicted to make room for the newest.

Partitions are never shrunk nor reclaimed. Once the whole cache has been
handed out new flows get nothing and their packets are silently dropped
(see [`DropReason::NoPartition`]).

```
use gos_core::{CacheCapacity, Dmgp, DropReason, GosLevel, Packet, PacketIdGenerator, StoreOutcome, Synthetic};
use std::net::Ipv4Addr;

let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
let generator = PacketIdGenerator::new();

let packet = Packet::builder(&generator)
    .source(Ipv4Addr::new(10, 0, 0, 1))
    .destination(Ipv4Addr::new(10, 0, 0, 9))
    .level(GosLevel::LEVEL_3)
    .data(Synthetic(172))
    .build()
    .unwrap();

// 12% of 1024 bytes: 122 bytes, the 200 bytes packet does not fit
assert_eq!(
    dmgp.admit(&packet),
    StoreOutcome::Dropped(DropReason::ExceedsQuota)
);
assert_eq!(dmgp.total_available_percentage(), 88);
```
*/

mod entry;
mod partition;

pub use self::partition::FlowPartition;
use crate::{
    capacity::CacheCapacity,
    defaults::DMGP_TOTAL_PERCENTAGE,
    flow::FlowId,
    packet::{GosPacket, PacketId},
    stats::{DmgpStats, FlowStats},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// what happened to a packet offered to the [`Dmgp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOutcome {
    /// a clone of the packet is now cached, `evicted` older packets of
    /// the same flow made room for it
    Stored { evicted: usize },
    /// the packet was not cached
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// the flow has no partition and none could be created, the cache is
    /// fully assigned
    NoPartition,
    /// the packet does not fit the flow's partition
    ExceedsQuota,
}

impl StoreOutcome {
    #[inline]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// The retransmission cache, see the [module documentation](self).
///
/// The [`Dmgp`] can be shared between threads: the partition table is
/// behind one lock and each partition has its own, so two flows can be
/// cached concurrently once their partitions exist.
#[derive(Debug)]
pub struct Dmgp<P> {
    state: Mutex<State<P>>,
}

#[derive(Debug)]
struct State<P> {
    capacity: CacheCapacity,
    total_assigned_octets: u64,
    total_available_percentage: u8,

    /// in creation order
    flows: Vec<Arc<FlowPartition<P>>>,
}

impl<P> Dmgp<P>
where
    P: GosPacket,
{
    pub fn new(capacity: CacheCapacity) -> Self {
        Self {
            state: Mutex::new(State::new(capacity)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a packet to the cache.
    ///
    /// If the packet's flow has no partition yet, one is created from the
    /// packet's GoS level. A clone of the packet is then stored in the
    /// flow's partition (FIFO eviction applies). The caller keeps its own
    /// packet.
    pub fn admit(&self, packet: &P) -> StoreOutcome {
        let flow = packet.flow_id();

        let partition = {
            let mut state = self.state();

            let partition = match state.partition(flow) {
                Some(partition) => partition,
                None => match state.create_flow(packet) {
                    Some(partition) => partition,
                    None => {
                        trace!(
                            %flow,
                            packet = %packet.packet_id(),
                            "packet dropped, no partition left for the flow"
                        );
                        return StoreOutcome::Dropped(DropReason::NoPartition);
                    }
                },
            };

            partition
        };

        partition.store(packet.clone())
    }

    /// Create the partition of `packet`'s flow without caching the packet.
    ///
    /// Returns the partition of the flow, freshly created or not, or
    /// `None` if the cache has nothing left to assign.
    pub fn create_flow(&self, packet: &P) -> Option<FlowStats> {
        let mut state = self.state();

        let partition = match state.partition(packet.flow_id()) {
            Some(partition) => partition,
            None => state.create_flow(packet)?,
        };

        Some(partition.stats())
    }

    /// a clone of the cached packet, if the cache still holds it
    pub fn get(&self, flow: FlowId, packet: PacketId) -> Option<P> {
        let partition = self.state().partition(flow)?;
        partition.get(packet)
    }

    pub fn contains(&self, flow: FlowId, packet: PacketId) -> bool {
        self.get(flow, packet).is_some()
    }

    /// drop every partition and cached packet, the capacity is kept
    pub fn reset(&self) {
        let mut state = self.state();
        let capacity = state.capacity;
        *state = State::new(capacity);

        debug!(%capacity, "retransmission cache reset");
    }

    /// Change the capacity of the cache.
    ///
    /// Existing partitions are dropped (as with [`Dmgp::reset`]): their
    /// quotas were computed from the previous capacity.
    pub fn set_capacity(&self, capacity: CacheCapacity) {
        let mut state = self.state();
        *state = State::new(capacity);

        debug!(%capacity, "retransmission cache resized");
    }

    pub fn capacity(&self) -> CacheCapacity {
        self.state().capacity
    }

    pub fn total_assigned_octets(&self) -> u64 {
        self.state().total_assigned_octets
    }

    pub fn total_available_percentage(&self) -> u8 {
        self.state().total_available_percentage
    }

    /// number of flows with a partition
    pub fn flows(&self) -> usize {
        self.state().flows.len()
    }

    pub fn flow_stats(&self, flow: FlowId) -> Option<FlowStats> {
        self.state().partition(flow).map(|partition| partition.stats())
    }

    pub fn stats(&self) -> DmgpStats {
        let state = self.state();

        DmgpStats {
            capacity: state.capacity,
            total_assigned_octets: state.total_assigned_octets,
            total_available_percentage: state.total_available_percentage,
            flows: state.flows.iter().map(|partition| partition.stats()).collect(),
        }
    }
}

impl<P> Default for Dmgp<P>
where
    P: GosPacket,
{
    fn default() -> Self {
        Self::new(CacheCapacity::default())
    }
}

impl<P> State<P>
where
    P: GosPacket,
{
    fn new(capacity: CacheCapacity) -> Self {
        Self {
            capacity,
            total_assigned_octets: 0,
            total_available_percentage: DMGP_TOTAL_PERCENTAGE,
            flows: Vec::new(),
        }
    }

    fn partition(&self, flow: FlowId) -> Option<Arc<FlowPartition<P>>> {
        self.flows
            .iter()
            .find(|partition| partition.flow() == flow)
            .cloned()
    }

    /// Assign a share of the cache to the packet's flow.
    ///
    /// The flow gets the percentage its GoS level asks for if it is still
    /// available. Otherwise it gets whatever bytes are left.
    fn create_flow(&mut self, packet: &P) -> Option<Arc<FlowPartition<P>>> {
        let capacity = self.capacity.bytes();

        if self.total_assigned_octets >= capacity || self.total_available_percentage == 0 {
            return None;
        }

        let requested = packet.gos_level().dmgp_percentage();
        let (percentage, octets) = if requested <= self.total_available_percentage {
            (requested, share_of(capacity, requested))
        } else {
            (
                self.total_available_percentage,
                capacity - self.total_assigned_octets,
            )
        };

        self.total_available_percentage -= percentage;
        self.total_assigned_octets += octets;

        debug_assert!(self.total_assigned_octets <= capacity);

        let flow = packet.flow_id();
        debug!(
            %flow,
            level = %packet.gos_level(),
            percentage,
            octets,
            available = self.total_available_percentage,
            "flow partition created"
        );

        let partition = Arc::new(FlowPartition::new(flow, percentage, octets));
        self.flows.push(Arc::clone(&partition));
        Some(partition)
    }
}

/// `percentage`% of `capacity`, rounded down
fn share_of(capacity: u64, percentage: u8) -> u64 {
    (capacity as u128 * percentage as u128 / DMGP_TOTAL_PERCENTAGE as u128) as u64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packet::GosLevel;
    use std::net::Ipv4Addr;

    /// a packet with a fixed size, for tests of the cache
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct TestPacket {
        flow: FlowId,
        id: PacketId,
        size: u64,
        level: GosLevel,
    }

    impl TestPacket {
        pub(crate) fn new(flow: FlowId, id: u64, size: u64, level: GosLevel) -> Self {
            Self {
                flow,
                id: PacketId::new(id),
                size,
                level,
            }
        }
    }

    impl GosPacket for TestPacket {
        fn flow_id(&self) -> FlowId {
            self.flow
        }

        fn packet_id(&self) -> PacketId {
            self.id
        }

        fn bytes_size(&self) -> u64 {
            self.size
        }

        fn gos_level(&self) -> GosLevel {
            self.level
        }

        fn crossed_nodes(&self) -> &[Ipv4Addr] {
            &[]
        }
    }

    fn flow(n: u32) -> FlowId {
        FlowId::from_raw(n)
    }

    #[test]
    fn first_packet_of_level_3_flow() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        let packet = TestPacket::new(flow(1), 1, 100, GosLevel::LEVEL_3);

        assert_eq!(dmgp.admit(&packet), StoreOutcome::Stored { evicted: 0 });

        let stats = dmgp.flow_stats(flow(1)).unwrap();
        assert_eq!(stats.assigned_percentage, 12);
        assert_eq!(stats.assigned_octets, 122);
        assert_eq!(stats.used_octets, 100);
        assert_eq!(dmgp.total_available_percentage(), 88);
        assert_eq!(dmgp.total_assigned_octets(), 122);
    }

    #[test]
    fn three_flows_then_an_oversized_packet() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));

        for n in 1..=2 {
            let packet = TestPacket::new(flow(n), n as u64, 50, GosLevel::LEVEL_3);
            assert!(dmgp.admit(&packet).is_stored());
        }
        let packet = TestPacket::new(flow(3), 3, 200, GosLevel::LEVEL_3);

        assert_eq!(
            dmgp.admit(&packet),
            StoreOutcome::Dropped(DropReason::ExceedsQuota)
        );
        // the partition exists even though its first packet was dropped
        assert_eq!(dmgp.flows(), 3);
        assert_eq!(dmgp.total_available_percentage(), 64);
        assert_eq!(dmgp.flow_stats(flow(3)).unwrap().used_octets, 0);
    }

    #[test]
    fn oversized_packet_of_an_existing_flow() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        let a = flow(1);
        let b = flow(2);

        assert!(
            dmgp.admit(&TestPacket::new(a, 1, 50, GosLevel::LEVEL_3))
                .is_stored()
        );
        assert!(
            dmgp.admit(&TestPacket::new(b, 1, 50, GosLevel::LEVEL_3))
                .is_stored()
        );
        assert_eq!(dmgp.total_available_percentage(), 76);

        assert_eq!(
            dmgp.admit(&TestPacket::new(a, 2, 200, GosLevel::LEVEL_3)),
            StoreOutcome::Dropped(DropReason::ExceedsQuota)
        );
        // nothing was evicted to try and make room
        let stats = dmgp.flow_stats(a).unwrap();
        assert_eq!(stats.used_octets, 50);
        assert_eq!(stats.packets, 1);
        assert_eq!(dmgp.flows(), 2);
        assert_eq!(dmgp.total_available_percentage(), 76);
    }

    #[test]
    fn partition_is_decided_by_the_first_packet() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));

        dmgp.admit(&TestPacket::new(flow(1), 1, 10, GosLevel::LEVEL_1));
        dmgp.admit(&TestPacket::new(flow(1), 2, 10, GosLevel::LEVEL_3));

        let stats = dmgp.flow_stats(flow(1)).unwrap();
        assert_eq!(stats.assigned_percentage, 4);
        assert_eq!(stats.assigned_octets, 40);
        assert_eq!(dmgp.total_available_percentage(), 96);
    }

    #[test]
    fn level_0_flow_gets_an_empty_partition() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        let packet = TestPacket::new(flow(1), 1, 1, GosLevel::LEVEL_0);

        assert_eq!(
            dmgp.admit(&packet),
            StoreOutcome::Dropped(DropReason::ExceedsQuota)
        );
        assert_eq!(dmgp.flow_stats(flow(1)).unwrap().assigned_octets, 0);
        assert_eq!(dmgp.total_available_percentage(), 100);
    }

    #[test]
    fn remainder_goes_to_the_last_flow() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));

        // 8 flows at 12% leave 4%
        for n in 0..8 {
            dmgp.admit(&TestPacket::new(flow(n), n as u64, 1, GosLevel::LEVEL_3));
        }
        assert_eq!(dmgp.total_available_percentage(), 4);
        assert_eq!(dmgp.total_assigned_octets(), 8 * 122);

        dmgp.admit(&TestPacket::new(flow(8), 8, 1, GosLevel::LEVEL_3));
        let stats = dmgp.flow_stats(flow(8)).unwrap();
        assert_eq!(stats.assigned_percentage, 4);
        assert_eq!(stats.assigned_octets, 1024 - 8 * 122);
        assert_eq!(dmgp.total_available_percentage(), 0);
        assert_eq!(dmgp.total_assigned_octets(), 1024);

        assert_eq!(
            dmgp.admit(&TestPacket::new(flow(9), 9, 1, GosLevel::LEVEL_1)),
            StoreOutcome::Dropped(DropReason::NoPartition)
        );
        assert_eq!(dmgp.flows(), 9);
    }

    #[test]
    fn percentage_and_octets_are_conserved() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(3));
        let levels = [
            GosLevel::LEVEL_0,
            GosLevel::LEVEL_1,
            GosLevel::LEVEL_2,
            GosLevel::LEVEL_3,
        ];

        for n in 0..64u32 {
            let level = levels[n as usize % levels.len()];
            dmgp.admit(&TestPacket::new(flow(n), n as u64, 5, level));

            let stats = dmgp.stats();
            let assigned_percentage: u32 = stats
                .flows
                .iter()
                .map(|flow| flow.assigned_percentage as u32)
                .sum();
            let assigned_octets: u64 = stats.flows.iter().map(|flow| flow.assigned_octets).sum();

            assert_eq!(
                stats.total_available_percentage as u32 + assigned_percentage,
                100
            );
            assert_eq!(stats.total_assigned_octets, assigned_octets);
            assert!(stats.total_assigned_octets <= stats.capacity.bytes());
        }
    }

    #[test]
    fn get_returns_an_equal_clone() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        let packet = TestPacket::new(flow(1), 42, 30, GosLevel::LEVEL_2);

        dmgp.admit(&packet);

        assert_eq!(dmgp.get(flow(1), PacketId::new(42)), Some(packet));
        assert!(dmgp.get(flow(1), PacketId::new(43)).is_none());
        assert!(dmgp.get(flow(2), PacketId::new(42)).is_none());
    }

    #[test]
    fn evicted_packets_are_gone() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));

        // 81 bytes quota
        dmgp.admit(&TestPacket::new(flow(1), 1, 40, GosLevel::LEVEL_2));
        dmgp.admit(&TestPacket::new(flow(1), 2, 40, GosLevel::LEVEL_2));
        assert_eq!(
            dmgp.admit(&TestPacket::new(flow(1), 3, 40, GosLevel::LEVEL_2)),
            StoreOutcome::Stored { evicted: 1 }
        );

        assert!(!dmgp.contains(flow(1), PacketId::new(1)));
        assert!(dmgp.contains(flow(1), PacketId::new(2)));
        assert!(dmgp.contains(flow(1), PacketId::new(3)));
    }

    #[test]
    fn reset_restores_the_whole_cache() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        dmgp.admit(&TestPacket::new(flow(1), 1, 40, GosLevel::LEVEL_3));

        dmgp.reset();

        assert_eq!(dmgp.flows(), 0);
        assert_eq!(dmgp.total_assigned_octets(), 0);
        assert_eq!(dmgp.total_available_percentage(), 100);
        assert_eq!(dmgp.capacity(), CacheCapacity::from_kb(1));
        assert!(dmgp.get(flow(1), PacketId::new(1)).is_none());
    }

    #[test]
    fn set_capacity_recomputes_quotas() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        dmgp.admit(&TestPacket::new(flow(1), 1, 40, GosLevel::LEVEL_3));

        dmgp.set_capacity(CacheCapacity::from_kb(10));
        dmgp.admit(&TestPacket::new(flow(1), 2, 40, GosLevel::LEVEL_3));

        assert_eq!(dmgp.capacity(), CacheCapacity::from_kb(10));
        assert_eq!(dmgp.flow_stats(flow(1)).unwrap().assigned_octets, 1228);
        assert!(dmgp.get(flow(1), PacketId::new(1)).is_none());
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let dmgp = Dmgp::new(CacheCapacity::ZERO);

        assert_eq!(
            dmgp.admit(&TestPacket::new(flow(1), 1, 1, GosLevel::LEVEL_3)),
            StoreOutcome::Dropped(DropReason::NoPartition)
        );
        assert_eq!(dmgp.flows(), 0);
    }

    #[test]
    fn create_flow_is_idempotent() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
        let packet = TestPacket::new(flow(1), 1, 1, GosLevel::LEVEL_2);

        let first = dmgp.create_flow(&packet).unwrap();
        let second = dmgp.create_flow(&packet).unwrap();

        assert_eq!(first, second);
        assert_eq!(dmgp.total_available_percentage(), 92);
        assert_eq!(first.packets, 0);
    }

    #[test]
    fn concurrent_flows() {
        let dmgp = Dmgp::new(CacheCapacity::from_mb(1));

        std::thread::scope(|scope| {
            for n in 0..4u32 {
                let dmgp = &dmgp;
                scope.spawn(move || {
                    for id in 0..1_000 {
                        let packet = TestPacket::new(flow(n), id, 64, GosLevel::LEVEL_1);
                        assert!(dmgp.admit(&packet).is_stored());
                    }
                });
            }
        });

        let stats = dmgp.stats();
        assert_eq!(stats.flows.len(), 4);
        assert_eq!(stats.total_available_percentage, 84);
        for flow in stats.flows {
            assert!(flow.used_octets <= flow.assigned_octets);
        }
    }

    #[test]
    fn concurrent_admissions_to_one_flow_keep_arrival_order() {
        let dmgp = Dmgp::new(CacheCapacity::from_kb(64));

        std::thread::scope(|scope| {
            for n in 0..8u64 {
                let dmgp = &dmgp;
                scope.spawn(move || {
                    for id in 0..500 {
                        let packet =
                            TestPacket::new(flow(1), n * 1_000 + id, 64, GosLevel::LEVEL_3);
                        assert!(dmgp.admit(&packet).is_stored());
                    }
                });
            }
        });

        let partition = dmgp.state().partition(flow(1)).unwrap();
        let arrivals = partition.arrivals();
        assert!(!arrivals.is_empty());
        assert!(arrivals.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(partition.used_octets() <= partition.assigned_octets());
    }
}
