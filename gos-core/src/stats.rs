//! Point-in-time snapshots of the per-node tables.
//!
//! [`DmgpStats`] is obtained via [`Dmgp::stats`](crate::dmgp::Dmgp::stats),
//! [`LedgerStats`] via [`RequestLedger::stats`](crate::gpsrp::RequestLedger::stats)
//! and [`SwitchingStats`] via
//! [`SwitchingTable::stats`](crate::switching::SwitchingTable::stats).

use crate::{capacity::CacheCapacity, flow::FlowId};

/// Snapshot of one flow's partition of the retransmission cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowStats {
    /// The flow the partition belongs to.
    pub flow: FlowId,
    /// Share of the cache granted to the flow, in percent.
    pub assigned_percentage: u8,
    /// Bytes granted to the flow.
    pub assigned_octets: u64,
    /// Bytes currently used by cached packets.
    pub used_octets: u64,
    /// Number of cached packets.
    pub packets: usize,
}

/// Snapshot of a whole retransmission cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmgpStats {
    pub capacity: CacheCapacity,
    /// Bytes handed out to flows so far.
    pub total_assigned_octets: u64,
    /// Percentage of the cache not yet handed out.
    pub total_available_percentage: u8,
    /// Per-flow statistics, in creation order.
    pub flows: Vec<FlowStats>,
}

/// Snapshot of a retransmission-request ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerStats {
    /// Outstanding requests.
    pub pending: usize,
    /// Requests whose timer expired and that may be re-issued.
    pub retryable: usize,
    /// Requests that will be dropped on the next sweep.
    pub purgeable: usize,
}

/// Snapshot of a switching table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchingStats {
    pub entries: usize,
    /// Entries whose primary label is assigned.
    pub established: usize,
    /// Entries with a backup label assigned.
    pub protected: usize,
    /// Entries waiting for a label mapping or a withdrawal acknowledgment.
    pub pending: usize,
    /// Sessions whose retry budget ran out.
    pub failed: usize,
}
