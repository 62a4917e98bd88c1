/*!
# GoS over MPLS: active-node resilience primitives

`gos_core` holds the three per-node structures that let a GoS-capable
(Guarantee of Service) MPLS node take part in the *Active Technique*
recovery protocol:

* [`Dmgp`]: the retransmission cache. It decides, per GoS packet, whether
  the packet's flow deserves buffer space and how much, then keeps a clone
  of the packet around in case a downstream node asks for it again.
* [`SwitchingTable`]: the label switching/session table. Every
  [`SwitchingEntry`] drives a label distribution session (primary and,
  optionally, backup LSP) with its own timeout and retry budget.
* [`RequestLedger`]: the GPSRP table of outstanding "please resend packet
  `P` of flow `F`" requests, each with the ordered list of upstream active
  nodes still worth asking.

None of these structures block or perform I/O. Time only moves when the
caller says so (`tick`/`decrease_timeout` with a number of elapsed
simulation time units) which keeps every simulation deterministic.

```
use gos_core::{CacheCapacity, Dmgp, GosLevel, Packet, PacketIdGenerator, Synthetic};
use std::net::Ipv4Addr;

let dmgp = Dmgp::new(CacheCapacity::from_kb(1));
let generator = PacketIdGenerator::new();

let packet = Packet::builder(&generator)
    .source(Ipv4Addr::new(10, 0, 0, 1))
    .destination(Ipv4Addr::new(10, 0, 0, 9))
    .level(GosLevel::LEVEL_3)
    .data(Synthetic(64))
    .build()
    .unwrap();

assert!(dmgp.admit(&packet).is_stored());
assert_eq!(dmgp.get(packet.flow(), packet.id()), Some(packet));
```
*/

pub mod capacity;
pub mod data;
pub mod defaults;
pub mod dmgp;
pub mod flow;
pub mod gpsrp;
pub mod packet;
pub mod port;
pub mod retry;
pub mod stats;
pub mod switching;

pub use self::{
    capacity::CacheCapacity,
    data::{Data, Synthetic},
    dmgp::{DropReason, Dmgp, FlowPartition, StoreOutcome},
    flow::FlowId,
    gpsrp::{RequestEntry, RequestKey, RequestLedger},
    packet::{GosLevel, GosPacket, Packet, PacketBuilder, PacketId, PacketIdGenerator},
    port::PortId,
    retry::RetryTimer,
    stats::{DmgpStats, FlowStats, LedgerStats, SwitchingStats},
    switching::{
        EntryError, EntryKind, FailoverError, Label, LabelEvent, LabelSpaceExhausted,
        LabelStackOperation, LabelState, SessionId, SwitchingEntry, SwitchingEntryBuilder,
        SwitchingTable, TransitionError,
    },
};
