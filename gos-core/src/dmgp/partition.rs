use super::{DropReason, StoreOutcome, entry::CacheEntry};
use crate::{
    flow::FlowId,
    packet::{GosPacket, PacketId},
    stats::FlowStats,
};
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::trace;

/// The share of a [`Dmgp`] reserved to one flow.
///
/// The percentage and byte quota are fixed when the partition is created
/// and never change afterwards: the cache does not take back what it
/// handed out, even if the flow goes idle.
///
/// The buffered packets live behind the partition's own lock so that
/// storing a packet of one flow does not hold up the other flows.
///
/// [`Dmgp`]: super::Dmgp
#[derive(Debug)]
pub struct FlowPartition<P> {
    flow: FlowId,
    assigned_percentage: u8,
    assigned_octets: u64,

    slots: Mutex<Slots<P>>,
}

#[derive(Debug)]
struct Slots<P> {
    /// always sorted by arrival, oldest first
    entries: VecDeque<CacheEntry<P>>,
    used_octets: u64,
    next_arrival: u64,
}

impl<P> FlowPartition<P>
where
    P: GosPacket,
{
    pub(crate) fn new(flow: FlowId, assigned_percentage: u8, assigned_octets: u64) -> Self {
        Self {
            flow,
            assigned_percentage,
            assigned_octets,
            slots: Mutex::new(Slots {
                entries: VecDeque::new(),
                used_octets: 0,
                next_arrival: 0,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<P>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn flow(&self) -> FlowId {
        self.flow
    }

    #[inline]
    pub fn assigned_percentage(&self) -> u8 {
        self.assigned_percentage
    }

    #[inline]
    pub fn assigned_octets(&self) -> u64 {
        self.assigned_octets
    }

    pub fn used_octets(&self) -> u64 {
        self.slots().used_octets
    }

    /// number of buffered packets
    pub fn len(&self) -> usize {
        self.slots().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer `packet` (already a clone owned by the cache).
    ///
    /// The arrival order is taken under the partition's lock, so
    /// concurrent stores of one flow are queued in the order they get it.
    ///
    /// * if the free part of the quota fits the packet, it is inserted;
    /// * else if the buffered packets weigh at least the packet's size,
    ///   the oldest ones are evicted until the packet fits;
    /// * else the packet is dropped: this flow cannot cache it.
    pub(crate) fn store(&self, packet: P) -> StoreOutcome {
        let mut slots = self.slots();
        let entry = CacheEntry::new(packet, slots.next_arrival);
        let size = entry.size();
        let free = self.assigned_octets.saturating_sub(slots.used_octets);

        let evicted = if free >= size {
            0
        } else if slots.used_octets >= size {
            slots.evict_until_free(self.assigned_octets, size)
        } else {
            trace!(
                flow = %self.flow,
                packet = %entry.packet_id(),
                size,
                assigned = self.assigned_octets,
                "packet dropped, it does not fit the flow's quota"
            );
            return StoreOutcome::Dropped(DropReason::ExceedsQuota);
        };

        debug_assert!(
            slots
                .entries
                .back()
                .is_none_or(|last| last.arrival() < entry.arrival()),
            "entries are expected in arrival order"
        );

        trace!(
            flow = %self.flow,
            packet = %entry.packet_id(),
            size,
            evicted,
            "packet cached"
        );

        slots.used_octets += size;
        slots.next_arrival += 1;
        slots.entries.push_back(entry);

        debug_assert!(slots.used_octets <= self.assigned_octets);

        StoreOutcome::Stored { evicted }
    }

    #[cfg(test)]
    pub(crate) fn arrivals(&self) -> Vec<u64> {
        self.slots().entries.iter().map(CacheEntry::arrival).collect()
    }

    /// a clone of the buffered packet `packet_id`, if still there
    pub fn get(&self, packet_id: PacketId) -> Option<P> {
        self.slots()
            .entries
            .iter()
            .find(|entry| entry.packet_id() == packet_id)
            .map(|entry| entry.packet().clone())
    }

    pub fn stats(&self) -> FlowStats {
        let slots = self.slots();
        FlowStats {
            flow: self.flow,
            assigned_percentage: self.assigned_percentage,
            assigned_octets: self.assigned_octets,
            used_octets: slots.used_octets,
            packets: slots.entries.len(),
        }
    }
}

impl<P> Slots<P>
where
    P: GosPacket,
{
    /// evict the oldest entries until `size` bytes are free in `assigned`
    fn evict_until_free(&mut self, assigned: u64, size: u64) -> usize {
        let mut evicted = 0;
        while assigned.saturating_sub(self.used_octets) < size {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            trace!(
                flow = %oldest.flow(),
                packet = %oldest.packet_id(),
                size = oldest.size(),
                "packet evicted"
            );
            self.used_octets -= oldest.size();
            evicted += 1;
        }
        evicted
    }
}
