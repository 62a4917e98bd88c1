/*!
# Chain simulation

A [`Simulation`] lines up active nodes on a path: node `i` forwards on
its downstream port to the upstream port of node `i + 1`. The first node
is the ingress of a single LSP, the last node its egress.

Time moves by steps. At every step each node handles what it received
during the previous step, then lets one tick elapse, on its own thread.
What the nodes ask for is carried out afterwards in node order, so a run
only depends on its configuration and its seed.

Only GoS data frames are subject to [`LinkLoss`]. Retransmission
requests and replies are exchanged directly between the nodes involved.

```
use gos::SimulationBuilder;
use gos_core::GosLevel;

let report = SimulationBuilder::new()
    .set_nodes(3)
    .set_gos_level(GosLevel::LEVEL_3)
    .build()
    .unwrap()
    .run(10)
    .unwrap();

assert_eq!(report.delivered, 10);
assert_eq!(report.requests, 0);
```
*/

use crate::{
    loss::LinkLoss,
    message::{Frame, NodeAction, RetransmissionRequest, Signal},
    node::{ActiveNode, ActiveNodeBuilder},
};
use anyhow::{Result, bail, ensure};
use gos_core::{
    CacheCapacity, DmgpStats, FlowId, GosLevel, Packet, PacketId, PacketIdGenerator, PortId,
    Synthetic,
    defaults::{REQUEST_ATTEMPTS, REQUEST_TIMEOUT, SESSION_ATTEMPTS, SESSION_TIMEOUT},
};
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng as _;
use std::{
    collections::{HashMap, HashSet},
    fmt, mem,
    net::Ipv4Addr,
    thread,
};
use tracing::{debug, info, trace, warn};

const UPSTREAM: PortId = PortId::new(1);
const DOWNSTREAM: PortId = PortId::new(2);

/// the forwarding equivalence class of the simulated LSP
const FEC: Ipv4Addr = Ipv4Addr::new(10, 255, 255, 254);

const DEFAULT_NODES: usize = 4;
const DEFAULT_TICK: u64 = 1_000;
const DEFAULT_PAYLOAD: u64 = 64;

pub struct SimulationBuilder {
    nodes: usize,
    cache_capacity: CacheCapacity,
    level: GosLevel,
    link_loss: LinkLoss,
    seed: u64,
    tick: u64,
    flows: usize,
    payload: u64,
}

pub struct Simulation {
    nodes: Vec<ActiveNode<Synthetic>>,
    addresses: HashMap<Ipv4Addr, usize>,
    inboxes: Vec<Vec<Inbound>>,
    flows: Vec<Source>,

    rng: ChaChaRng,
    link_loss: LinkLoss,
    level: GosLevel,
    tick: u64,
    payload: u64,

    delivered: HashSet<(FlowId, PacketId)>,
    lost: HashSet<(FlowId, PacketId)>,
    report: SimReport,
}

/// What happened during a [`Simulation::run`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimReport {
    /// packets sent into the LSP
    pub injected: usize,
    /// distinct packets that reached the egress
    pub delivered: usize,
    /// packets that reached the egress more than once
    pub duplicates: usize,
    /// frames dropped by the links
    pub link_drops: usize,
    /// distinct packets dropped at least once by a link
    pub lost: usize,
    /// lost packets that still reached the egress
    pub recovered: usize,
    /// retransmission requests nodes gave up on
    pub unrecoverable: usize,
    pub requests: usize,
    pub replies: usize,
    pub steps: usize,
    /// state of every node's cache at the end of the run
    pub caches: Vec<(Ipv4Addr, DmgpStats)>,
}

/// a traffic source and the identifiers of its flow
struct Source {
    address: Ipv4Addr,
    ids: PacketIdGenerator,
}

/// what a node finds in its inbox at the next step
enum Inbound {
    Frame { port: PortId, frame: Frame<Synthetic> },
    Signal { port: PortId, signal: Signal },
    Request(RetransmissionRequest),
    Reply(Packet<Synthetic>),
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self {
            nodes: DEFAULT_NODES,
            cache_capacity: CacheCapacity::default(),
            level: GosLevel::LEVEL_3,
            link_loss: LinkLoss::NONE,
            seed: 0,
            tick: DEFAULT_TICK,
            flows: 1,
            payload: DEFAULT_PAYLOAD,
        }
    }

    /// number of active nodes on the path, ingress and egress included
    pub fn set_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    /// cache capacity of every node
    pub fn set_cache_capacity(mut self, capacity: CacheCapacity) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// level of every injected packet
    pub fn set_gos_level(mut self, level: GosLevel) -> Self {
        self.level = level;
        self
    }

    /// loss rate of every link of the path
    pub fn set_link_loss(mut self, loss: LinkLoss) -> Self {
        self.link_loss = loss;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// time units elapsing at every step
    pub fn set_tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// number of flows sharing the LSP, packets are injected round robin
    pub fn set_flows(mut self, flows: usize) -> Self {
        self.flows = flows;
        self
    }

    /// payload size of every injected packet, in bytes
    pub fn set_payload(mut self, payload: u64) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Result<Simulation> {
        ensure!(
            (2..=254).contains(&self.nodes),
            "A path needs between 2 and 254 nodes, got {}",
            self.nodes
        );
        ensure!(
            (1..=254).contains(&self.flows),
            "Expecting between 1 and 254 flows, got {}",
            self.flows
        );
        ensure!(self.tick > 0, "The tick must let some time elapse");

        let mut nodes = Vec::with_capacity(self.nodes);
        let mut addresses = HashMap::with_capacity(self.nodes);
        for index in 0..self.nodes {
            let address = node_address(index);
            let node = ActiveNodeBuilder::new()
                .set_address(address)
                .set_upstream(UPSTREAM)
                .set_downstream(DOWNSTREAM)
                .set_egress(index + 1 == self.nodes)
                .set_cache_capacity(self.cache_capacity)
                .build::<Synthetic>()?;
            nodes.push(node);
            addresses.insert(address, index);
        }

        let flows = (0..self.flows)
            .map(|index| Source {
                address: Ipv4Addr::new(10, 0, index as u8 + 1, 1),
                ids: PacketIdGenerator::new(),
            })
            .collect();

        Ok(Simulation {
            inboxes: (0..self.nodes).map(|_| Vec::new()).collect(),
            nodes,
            addresses,
            flows,
            rng: ChaChaRng::seed_from_u64(self.seed),
            link_loss: self.link_loss,
            level: self.level,
            tick: self.tick,
            payload: self.payload,
            delivered: HashSet::new(),
            lost: HashSet::new(),
            report: SimReport::default(),
        })
    }
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Set the LSP up, inject `packets` packets and let the nodes recover
    /// what they can.
    pub fn run(mut self, packets: usize) -> Result<SimReport> {
        info!(
            nodes = self.nodes.len(),
            flows = self.flows.len(),
            level = %self.level,
            loss = %self.link_loss,
            "simulation started"
        );

        self.establish()?;

        for index in 0..packets {
            self.inject(index)?;
            self.step()?;
        }

        self.drain()?;

        self.report.lost = self.lost.len();
        self.report.recovered = self.lost.intersection(&self.delivered).count();
        self.report.caches = self
            .nodes
            .iter()
            .map(|node| (node.address(), node.dmgp().stats()))
            .collect();

        info!(
            steps = self.report.steps,
            delivered = self.report.delivered,
            injected = self.report.injected,
            recovered = self.report.recovered,
            "simulation finished"
        );
        Ok(self.report)
    }

    fn establish(&mut self) -> Result<()> {
        let actions = self.nodes[0].establish_session(FEC, false)?;
        self.dispatch(0, actions);

        let limit = steps_for(SESSION_TIMEOUT, SESSION_ATTEMPTS, self.tick) + 2 * self.nodes.len();
        for _ in 0..limit {
            if self.nodes[0].is_established(FEC) {
                info!(fec = %FEC, steps = self.report.steps, "LSP established");
                return Ok(());
            }
            if self.nodes[0].is_unreachable(FEC) {
                break;
            }
            self.step()?;
        }

        bail!("The LSP towards {FEC} could not be established")
    }

    fn inject(&mut self, index: usize) -> Result<()> {
        let source = &self.flows[index % self.flows.len()];
        let packet = Packet::builder(&source.ids)
            .source(source.address)
            .destination(FEC)
            .level(self.level)
            .data(Synthetic(self.payload))
            .build()?;

        trace!(flow = %packet.flow(), packet = %packet.id(), "packet injected");
        self.report.injected += 1;
        self.inboxes[0].push(Inbound::Frame {
            port: UPSTREAM,
            frame: Frame {
                label: None,
                packet,
            },
        });
        Ok(())
    }

    /// keep stepping until nothing is in flight or pending
    fn drain(&mut self) -> Result<()> {
        let limit = steps_for(REQUEST_TIMEOUT, REQUEST_ATTEMPTS, self.tick) + 2 * self.nodes.len();

        for _ in 0..limit {
            let idle = self.inboxes.iter().all(Vec::is_empty)
                && self.nodes.iter().all(|node| node.ledger().is_empty());
            if idle {
                return Ok(());
            }
            self.step()?;
        }

        warn!(steps = limit, "simulation stopped with requests still pending");
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        let tick = self.tick;
        let inboxes = mem::replace(
            &mut self.inboxes,
            (0..self.nodes.len()).map(|_| Vec::new()).collect(),
        );

        let results: Vec<Result<Vec<NodeAction<Synthetic>>>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .nodes
                .iter_mut()
                .zip(inboxes)
                .map(|(node, inbox)| scope.spawn(move || process(node, inbox, tick)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        });

        for (index, actions) in results.into_iter().enumerate() {
            self.dispatch(index, actions?);
        }
        self.report.steps += 1;

        Ok(())
    }

    fn dispatch(&mut self, from: usize, actions: Vec<NodeAction<Synthetic>>) {
        for action in actions {
            match action {
                NodeAction::Forward { port, frame } => {
                    let Some((to, port)) = self.neighbour(from, port) else {
                        debug!(node = from, %port, "frame sent to no neighbour");
                        continue;
                    };
                    if self.link_loss.should_drop(&mut self.rng) {
                        let packet = &frame.packet;
                        trace!(flow = %packet.flow(), packet = %packet.id(), from, to, "frame lost");
                        self.report.link_drops += 1;
                        self.lost.insert((packet.flow(), packet.id()));
                        continue;
                    }
                    self.inboxes[to].push(Inbound::Frame { port, frame });
                }
                NodeAction::Deliver(packet) => {
                    let key = (packet.flow(), packet.id());
                    if !self.delivered.insert(key) {
                        self.report.duplicates += 1;
                        continue;
                    }
                    self.report.delivered += 1;
                }
                NodeAction::Signal { port, signal } => {
                    let Some((to, port)) = self.neighbour(from, port) else {
                        debug!(node = from, %port, ?signal, "signal sent to no neighbour");
                        continue;
                    };
                    self.inboxes[to].push(Inbound::Signal { port, signal });
                }
                NodeAction::Request { to, request } => {
                    self.report.requests += 1;
                    if let Some(&to) = self.addresses.get(&to) {
                        self.inboxes[to].push(Inbound::Request(request));
                    }
                }
                NodeAction::Reply { to, packet } => {
                    self.report.replies += 1;
                    if let Some(&to) = self.addresses.get(&to) {
                        self.inboxes[to].push(Inbound::Reply(packet));
                    }
                }
                NodeAction::Unrecoverable(key) => {
                    warn!(node = from, request = %key, "packet lost for good");
                    self.report.unrecoverable += 1;
                }
            }
        }
    }

    /// the node and its port at the other end of `port` of node `from`
    fn neighbour(&self, from: usize, port: PortId) -> Option<(usize, PortId)> {
        if port == DOWNSTREAM && from + 1 < self.nodes.len() {
            Some((from + 1, UPSTREAM))
        } else if port == UPSTREAM && from > 0 {
            Some((from - 1, DOWNSTREAM))
        } else {
            None
        }
    }
}

/// one step of one node: handle its inbox, then let `tick` elapse
fn process(
    node: &mut ActiveNode<Synthetic>,
    inbox: Vec<Inbound>,
    tick: u64,
) -> Result<Vec<NodeAction<Synthetic>>> {
    let mut actions = Vec::new();

    for message in inbox {
        match message {
            Inbound::Frame { port, frame } => actions.extend(node.on_gos_packet(frame, port)),
            Inbound::Signal { port, signal } => actions.extend(match signal {
                Signal::LabelRequest { fec, session } => node.on_label_request(port, fec, session)?,
                Signal::LabelMapping { session, label } => {
                    node.on_label_mapping(port, session, label)
                }
                Signal::PathUnavailable { session } => node.on_path_unavailable(port, session),
                Signal::LabelWithdraw { session } => node.on_withdraw(port, session),
                Signal::LabelRelease { session } => node.on_release(port, session),
            }),
            Inbound::Request(request) => actions.extend(node.on_request(request)),
            Inbound::Reply(packet) => actions.extend(node.on_reply(packet)),
        }
    }

    actions.extend(node.advance(tick));
    Ok(actions)
}

fn node_address(index: usize) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 0, index as u8 + 1)
}

/// steps for a timer to run through all its attempts
fn steps_for(timeout: u64, attempts: u8, tick: u64) -> usize {
    let per_attempt = timeout.div_ceil(tick);
    (per_attempt * (u64::from(attempts) + 2)) as usize
}

impl SimReport {
    /// share of the injected packets that reached the egress
    pub fn delivery_ratio(&self) -> f64 {
        if self.injected == 0 {
            return 1.0;
        }
        self.delivered as f64 / self.injected as f64
    }
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "delivered {}/{} packets ({:.2}%) in {} steps",
            self.delivered,
            self.injected,
            self.delivery_ratio() * 100.0,
            self.steps
        )?;
        writeln!(
            f,
            "lost {} packets ({} frame drops), recovered {}, {} duplicates",
            self.lost, self.link_drops, self.recovered, self.duplicates
        )?;
        writeln!(
            f,
            "{} requests, {} replies, {} given up",
            self.requests, self.replies, self.unrecoverable
        )?;
        for (address, cache) in &self.caches {
            writeln!(
                f,
                "  {address}: {} flows, {} of {} assigned, {}% left",
                cache.flows.len(),
                cache.total_assigned_octets,
                cache.capacity.bytes(),
                cache.total_available_percentage
            )?;
        }
        Ok(())
    }
}
