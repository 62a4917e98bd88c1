use crate::message::{Frame, NodeAction, RetransmissionRequest, Signal};
use anyhow::{Context as _, Result, bail, ensure};
use gos_core::{
    CacheCapacity, Data, Dmgp, EntryKind, FlowId, GosLevel, GosPacket, Label, LabelEvent,
    LabelStackOperation, LabelState, Packet, PacketId, PortId, RequestKey, RequestLedger,
    RetryTimer, SessionId, SwitchingEntry, SwitchingTable, defaults::MAX_REQUESTS_PER_GAP,
};
use std::{collections::HashMap, net::Ipv4Addr, ops::RangeInclusive};
use tracing::{debug, info, trace, warn};

/// A GoS capable MPLS node running the Active Technique.
///
/// The node owns the three per-node tables of `gos_core` and reacts to
/// what it receives: label distribution signaling, GoS frames,
/// retransmission requests and replies. It never sends anything itself,
/// every handler returns the [`NodeAction`]s for the environment to carry
/// out.
///
/// The node sits on a path: it receives traffic on its `upstream` port
/// and forwards it on its `downstream` port. An egress node ends the LSP
/// and delivers the traffic on its downstream port.
pub struct ActiveNode<T> {
    address: Ipv4Addr,
    upstream: PortId,
    downstream: PortId,
    backup: Option<PortId>,
    egress: bool,
    session_timer: RetryTimer,

    dmgp: Dmgp<Packet<T>>,
    table: SwitchingTable,
    ledger: RequestLedger,

    /// highest packet identifier seen per flow
    highest: HashMap<FlowId, u64>,
}

pub struct ActiveNodeBuilder {
    address: Option<Ipv4Addr>,
    upstream: PortId,
    downstream: PortId,
    backup: Option<PortId>,
    egress: bool,
    cache_capacity: CacheCapacity,
    session_timer: RetryTimer,
    request_timer: RetryTimer,
    labels: RangeInclusive<Label>,
}

/// The packet a loss was detected for, as far as the request ledger is
/// concerned: the packet itself never made it, its trail is the one of
/// the packet that revealed the loss.
#[derive(Debug, Clone)]
struct Missing {
    flow: FlowId,
    id: PacketId,
    level: GosLevel,
    trail: Vec<Ipv4Addr>,
}

impl ActiveNodeBuilder {
    pub fn new() -> Self {
        Self {
            address: None,
            upstream: PortId::new(1),
            downstream: PortId::new(2),
            backup: None,
            egress: false,
            cache_capacity: CacheCapacity::default(),
            session_timer: RetryTimer::session(),
            request_timer: RetryTimer::request(),
            labels: Label::MIN..=Label::MAX,
        }
    }

    pub fn set_address(mut self, address: Ipv4Addr) -> Self {
        self.address = Some(address);
        self
    }

    /// port the traffic comes in on, defaults to `port#1`
    pub fn set_upstream(mut self, port: PortId) -> Self {
        self.upstream = port;
        self
    }

    /// port the traffic goes out on, defaults to `port#2`
    pub fn set_downstream(mut self, port: PortId) -> Self {
        self.downstream = port;
        self
    }

    /// port of the backup path, if any
    pub fn set_backup(mut self, port: PortId) -> Self {
        self.backup = Some(port);
        self
    }

    pub fn set_egress(mut self, egress: bool) -> Self {
        self.egress = egress;
        self
    }

    pub fn set_cache_capacity(mut self, capacity: CacheCapacity) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn set_session_timer(mut self, timer: RetryTimer) -> Self {
        self.session_timer = timer;
        self
    }

    pub fn set_request_timer(mut self, timer: RetryTimer) -> Self {
        self.request_timer = timer;
        self
    }

    /// labels the node hands out, defaults to the whole label space
    pub fn set_label_range(mut self, labels: RangeInclusive<Label>) -> Self {
        self.labels = labels;
        self
    }

    pub fn build<T>(self) -> Result<ActiveNode<T>>
    where
        T: Data + Clone,
    {
        let Some(address) = self.address else {
            bail!("Missing node address (`address')")
        };
        ensure!(
            self.upstream != self.downstream,
            "Upstream and downstream ports must differ ({})",
            self.upstream
        );
        ensure!(
            !self.labels.is_empty(),
            "Empty label range {}..={}",
            self.labels.start(),
            self.labels.end()
        );
        if let Some(backup) = self.backup {
            ensure!(
                backup != self.upstream && backup != self.downstream,
                "Backup port {backup} is already in use"
            );
        }

        Ok(ActiveNode {
            address,
            upstream: self.upstream,
            downstream: self.downstream,
            backup: self.backup,
            egress: self.egress,
            session_timer: self.session_timer,
            dmgp: Dmgp::new(self.cache_capacity),
            table: SwitchingTable::with_label_range(self.labels),
            ledger: RequestLedger::with_timer(self.request_timer),
            highest: HashMap::new(),
        })
    }
}

impl Default for ActiveNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ActiveNode<T>
where
    T: Data + Clone,
{
    #[inline]
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    #[inline]
    pub fn is_egress(&self) -> bool {
        self.egress
    }

    pub fn dmgp(&self) -> &Dmgp<Packet<T>> {
        &self.dmgp
    }

    pub fn table(&self) -> &SwitchingTable {
        &self.table
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    /// the ingress LSP towards `fec` has its label
    pub fn is_established(&self, fec: Ipv4Addr) -> bool {
        self.table
            .lookup_by(self.upstream, u32::from(fec), EntryKind::Fec)
            .is_some_and(|entry| entry.label().is_assigned())
    }

    /// the ingress LSP towards `fec` could not be set up
    pub fn is_unreachable(&self, fec: Ipv4Addr) -> bool {
        self.table
            .lookup_by(self.upstream, u32::from(fec), EntryKind::Fec)
            .is_none_or(|entry| entry.label().is_failed())
    }

    /// Forget every LSP, cached packet, pending request and the packet
    /// identifiers seen so far. The configuration is kept.
    pub fn reset(&mut self) {
        self.dmgp.reset();
        self.table.reset();
        self.ledger.reset();
        self.highest.clear();
        info!(node = %self.address, "node reset");
    }

    // ---------------------------------------------------------------------
    // label distribution

    /// Set up the LSP towards `fec`, this node being the ingress.
    ///
    /// With `backup`, a backup LSP is requested on the backup port too.
    pub fn establish_session(&mut self, fec: Ipv4Addr, backup: bool) -> Result<Vec<NodeAction<T>>> {
        let session = self.table.new_session_id();
        let mut builder = SwitchingEntry::builder()
            .incoming_port(self.upstream)
            .label_or_fec(u32::from(fec), EntryKind::Fec)
            .outgoing_port(self.downstream)
            .label(LabelState::Requested)
            .operation(LabelStackOperation::Push)
            .tail_end(fec)
            .local_session(session)
            .timer(self.session_timer)
            .request_backup(backup);
        if let Some(port) = self.backup {
            builder = builder.backup_outgoing_port(port);
        }
        let mut entry = builder
            .build()
            .context("Failed to create the ingress switching entry")?;

        let mut actions = vec![NodeAction::Signal {
            port: self.downstream,
            signal: Signal::LabelRequest { fec, session },
        }];

        if backup {
            entry.on_backup_label_event(LabelEvent::Request)?;
            match self.backup {
                Some(port) => actions.push(NodeAction::Signal {
                    port,
                    signal: Signal::LabelRequest { fec, session },
                }),
                None => {
                    entry.on_backup_label_event(LabelEvent::PathUnavailable)?;
                    debug!(node = %self.address, %fec, "no backup path");
                }
            }
        }

        info!(node = %self.address, %fec, %session, backup, "label request sent");
        self.table.insert(entry);

        Ok(actions)
    }

    /// A label request for `fec` from the upstream `session` came in on
    /// `incoming_port`.
    ///
    /// The egress answers right away. Any other node allocates the label
    /// it will advertise and asks its own downstream node first.
    pub fn on_label_request(
        &mut self,
        incoming_port: PortId,
        fec: Ipv4Addr,
        session: SessionId,
    ) -> Result<Vec<NodeAction<T>>> {
        if let Some(entry) = self.table.lookup_by_upstream_session(session, incoming_port) {
            // a retry from upstream, answer again if there is an answer
            return Ok(self.mapping_for(&entry).into_iter().collect());
        }

        let label = match self.table.allocate_label() {
            Ok(label) => label,
            Err(error) => {
                warn!(node = %self.address, %fec, %session, %error, "label request denied");
                return Ok(vec![NodeAction::Signal {
                    port: incoming_port,
                    signal: Signal::PathUnavailable { session },
                }]);
            }
        };

        let local_session = self.table.new_session_id();
        let builder = SwitchingEntry::builder()
            .incoming_port(incoming_port)
            .label_or_fec(label.into_u32(), EntryKind::Label)
            .outgoing_port(self.downstream)
            .tail_end(fec)
            .local_session(local_session)
            .upstream_session(session)
            .timer(self.session_timer);

        if self.egress {
            let entry = builder
                .operation(LabelStackOperation::Pop)
                .build()
                .context("Failed to create the egress switching entry")?;
            self.table.insert(entry);

            debug!(node = %self.address, %fec, %label, "label mapped at egress");
            Ok(vec![NodeAction::Signal {
                port: incoming_port,
                signal: Signal::LabelMapping { session, label },
            }])
        } else {
            let entry = builder
                .label(LabelState::Requested)
                .operation(LabelStackOperation::Swap)
                .build()
                .context("Failed to create the transit switching entry")?;
            self.table.insert(entry);

            debug!(node = %self.address, %fec, %label, "label request forwarded");
            Ok(vec![NodeAction::Signal {
                port: self.downstream,
                signal: Signal::LabelRequest {
                    fec,
                    session: local_session,
                },
            }])
        }
    }

    /// The downstream node on `incoming_port` mapped `label` for our
    /// local `session`.
    pub fn on_label_mapping(
        &mut self,
        incoming_port: PortId,
        session: SessionId,
        label: Label,
    ) -> Vec<NodeAction<T>> {
        let Some(result) = self.table.modify_by_local_session(session, |entry| {
            if is_backup_port(entry, incoming_port) {
                entry.on_backup_label_event(LabelEvent::Mapping(label))?;
            } else {
                entry.on_label_event(LabelEvent::Mapping(label))?;
            }
            Ok::<_, gos_core::TransitionError>(entry.clone())
        }) else {
            debug!(node = %self.address, %session, "label mapping for an unknown session");
            return Vec::new();
        };

        let entry = match result {
            Ok(entry) => entry,
            Err(error) => {
                warn!(node = %self.address, %session, %error, "unexpected label mapping");
                return Vec::new();
            }
        };

        if entry.upstream_session().is_none() {
            info!(
                node = %self.address,
                fec = %entry.tail_end(),
                %label,
                backup = is_backup_port(&entry, incoming_port),
                "LSP established"
            );
        }

        self.mapping_for(&entry).into_iter().collect()
    }

    /// The downstream node on `incoming_port` has no label or no path for
    /// our local `session`.
    pub fn on_path_unavailable(
        &mut self,
        incoming_port: PortId,
        session: SessionId,
    ) -> Vec<NodeAction<T>> {
        let Some(result) = self.table.modify_by_local_session(session, |entry| {
            if is_backup_port(entry, incoming_port) {
                entry.on_backup_label_event(LabelEvent::PathUnavailable)?;
            } else {
                entry.on_label_event(LabelEvent::PathUnavailable)?;
            }
            Ok::<_, gos_core::TransitionError>(entry.clone())
        }) else {
            return Vec::new();
        };

        let entry = match result {
            Ok(entry) => entry,
            Err(error) => {
                warn!(node = %self.address, %session, %error, "unexpected path unavailable");
                return Vec::new();
            }
        };

        if is_backup_port(&entry, incoming_port) {
            debug!(node = %self.address, %session, "no backup path");
            return Vec::new();
        }

        match entry.upstream_session() {
            None => {
                warn!(node = %self.address, fec = %entry.tail_end(), "no path to the tail end");
                Vec::new()
            }
            Some(upstream) => {
                self.table
                    .remove_by_local_session(session, entry.incoming_port());
                vec![NodeAction::Signal {
                    port: entry.incoming_port(),
                    signal: Signal::PathUnavailable { session: upstream },
                }]
            }
        }
    }

    /// Tear down the LSP towards `fec`, this node being the ingress.
    pub fn withdraw(&mut self, fec: Ipv4Addr) -> Vec<NodeAction<T>> {
        let Some(result) = self.table.modify_by(
            self.upstream,
            u32::from(fec),
            EntryKind::Fec,
            |entry| {
                entry.on_label_event(LabelEvent::Withdraw)?;
                if entry.backup_label().is_assigned() {
                    entry.on_backup_label_event(LabelEvent::Withdraw)?;
                }
                Ok::<_, gos_core::TransitionError>(entry.clone())
            },
        ) else {
            return Vec::new();
        };

        match result {
            Ok(entry) => withdrawals(&entry),
            Err(error) => {
                warn!(node = %self.address, %fec, %error, "cannot withdraw the LSP");
                Vec::new()
            }
        }
    }

    /// The upstream node on `incoming_port` tears down its `session`.
    pub fn on_withdraw(&mut self, incoming_port: PortId, session: SessionId) -> Vec<NodeAction<T>> {
        let release = NodeAction::Signal {
            port: incoming_port,
            signal: Signal::LabelRelease { session },
        };

        let Some(entry) = self.table.lookup_by_upstream_session(session, incoming_port) else {
            // already gone, the upstream node only waits for the release
            return vec![release];
        };

        if !entry.label().is_assigned() {
            // egress, or a transit node still waiting for its own label
            self.table
                .remove_by_local_session(entry.local_session(), incoming_port);
            debug!(node = %self.address, %session, "LSP released");
            return vec![release];
        }

        let result = self
            .table
            .modify_by_local_session(entry.local_session(), |entry| {
                entry.on_label_event(LabelEvent::Withdraw)?;
                Ok::<_, gos_core::TransitionError>(entry.clone())
            });

        match result {
            Some(Ok(entry)) => withdrawals(&entry),
            Some(Err(error)) => {
                warn!(node = %self.address, %session, %error, "unexpected label withdraw");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// The downstream node on `incoming_port` released our `session`.
    pub fn on_release(&mut self, incoming_port: PortId, session: SessionId) -> Vec<NodeAction<T>> {
        let Some(result) = self.table.modify_by_local_session(session, |entry| {
            if is_backup_port(entry, incoming_port) {
                entry.on_backup_label_event(LabelEvent::Release)?;
            } else {
                entry.on_label_event(LabelEvent::Release)?;
            }
            Ok::<_, gos_core::TransitionError>(entry.clone())
        }) else {
            return Vec::new();
        };

        let entry = match result {
            Ok(entry) => entry,
            Err(error) => {
                warn!(node = %self.address, %session, %error, "unexpected label release");
                return Vec::new();
            }
        };

        if entry.is_pending() {
            return Vec::new();
        }

        self.table
            .remove_by_local_session(session, entry.incoming_port());

        match entry.upstream_session() {
            None => {
                info!(node = %self.address, fec = %entry.tail_end(), "LSP torn down");
                Vec::new()
            }
            Some(upstream) => vec![NodeAction::Signal {
                port: entry.incoming_port(),
                signal: Signal::LabelRelease { session: upstream },
            }],
        }
    }

    /// the mapping to send upstream for `entry`, once it has one
    fn mapping_for(&self, entry: &SwitchingEntry) -> Option<NodeAction<T>> {
        let upstream = entry.upstream_session()?;
        if !self.egress && !entry.label().is_assigned() {
            return None;
        }

        let label = Label::new(entry.label_or_fec())?;
        Some(NodeAction::Signal {
            port: entry.incoming_port(),
            signal: Signal::LabelMapping {
                session: upstream,
                label,
            },
        })
    }

    /// Switch to the backup path every LSP leaving on `port`.
    ///
    /// Requests whose replies were to go out on `port` are dropped.
    /// Returns how many LSPs switched.
    pub fn on_link_failure(&mut self, port: PortId) -> usize {
        let mut switched = 0;

        for entry in self
            .table
            .entries()
            .into_iter()
            .filter(|entry| entry.outgoing_port() == port)
        {
            let session = entry.local_session();
            match self
                .table
                .modify_by_local_session(session, SwitchingEntry::switch_to_backup)
            {
                Some(Ok(())) => {
                    info!(node = %self.address, %session, %port, "switched to the backup LSP");
                    switched += 1;
                }
                Some(Err(error)) => {
                    warn!(node = %self.address, %session, %port, %error, "LSP lost");
                }
                None => {}
            }
        }

        let purged = self.ledger.purge_by_port(port);
        if purged > 0 {
            debug!(node = %self.address, %port, purged, "retransmission requests dropped");
        }

        switched
    }

    // ---------------------------------------------------------------------
    // data plane

    /// A GoS frame came in on `incoming_port`.
    ///
    /// Gaps in the identifiers of a guaranteed flow are losses: a
    /// retransmission request is opened for each missing packet and sent
    /// to the nearest active node the packet crossed. The frame is then
    /// cached and switched.
    pub fn on_gos_packet(&mut self, frame: Frame<T>, incoming_port: PortId) -> Vec<NodeAction<T>> {
        let Frame { label, packet } = frame;

        let entry = match label {
            None => self.table.lookup_by(
                incoming_port,
                u32::from(packet.destination()),
                EntryKind::Fec,
            ),
            Some(label) => self
                .table
                .lookup_by(incoming_port, label.into_u32(), EntryKind::Label),
        };
        let Some(entry) = entry else {
            debug!(
                node = %self.address,
                packet = %packet.id(),
                port = %incoming_port,
                "no LSP for the packet, dropped"
            );
            return Vec::new();
        };

        let mut actions = self.detect_losses(&packet, incoming_port);
        actions.extend(self.switch(&entry, packet));
        actions
    }

    /// A candidate asked for a packet we may have cached.
    pub fn on_request(&self, request: RetransmissionRequest) -> Vec<NodeAction<T>> {
        let RetransmissionRequest { key, requester } = request;

        match self.dmgp.get(key.flow, key.packet) {
            Some(packet) => {
                debug!(node = %self.address, request = %key, %requester, "packet retransmitted");
                vec![NodeAction::Reply {
                    to: requester,
                    packet,
                }]
            }
            None => {
                trace!(node = %self.address, request = %key, "requested packet not cached");
                Vec::new()
            }
        }
    }

    /// A candidate sent back a packet we asked for.
    pub fn on_reply(&mut self, packet: Packet<T>) -> Vec<NodeAction<T>> {
        let Some(request) = self.ledger.resolve(packet.flow(), packet.id()) else {
            trace!(node = %self.address, packet = %packet.id(), "late retransmission ignored");
            return Vec::new();
        };

        let Some(entry) = self
            .table
            .lookup_by_tail_end(request.outgoing_port(), packet.destination())
        else {
            debug!(node = %self.address, request = %request.key(), "LSP gone, retransmission dropped");
            return Vec::new();
        };

        debug!(node = %self.address, request = %request.key(), "packet recovered");
        self.switch(&entry, packet).into_iter().collect()
    }

    /// Track the identifiers of `packet`'s flow and open a request for the
    /// guaranteed packets it reveals as lost. A gap larger than
    /// [`MAX_REQUESTS_PER_GAP`] only has its most recent identifiers
    /// requested.
    fn detect_losses(&mut self, packet: &Packet<T>, incoming_port: PortId) -> Vec<NodeAction<T>> {
        let flow = packet.flow();
        let id = packet.id().into_u64();
        let highest = self.highest.entry(flow).or_default();

        if id <= *highest {
            if self.ledger.resolve(flow, packet.id()).is_some() {
                debug!(node = %self.address, %flow, packet = %packet.id(), "packet recovered upstream");
            }
            return Vec::new();
        }

        let first_missing = *highest + 1;
        *highest = id;

        if !packet.level().is_guaranteed() {
            return Vec::new();
        }

        let requested = id.saturating_sub(MAX_REQUESTS_PER_GAP).max(first_missing);
        if requested > first_missing {
            warn!(
                node = %self.address,
                %flow,
                from = first_missing,
                to = requested - 1,
                "gap too large, oldest losses not requested"
            );
        }

        let mut actions = Vec::new();
        for lost in requested..id {
            let lost = Missing {
                flow,
                id: PacketId::new(lost),
                level: packet.level(),
                trail: packet.crossed_nodes().to_vec(),
            };
            if self.ledger.open(&lost, incoming_port) {
                debug!(node = %self.address, %flow, packet = %lost.id, "loss detected");
                actions.extend(self.ask(RequestKey::of(&lost)));
            }
        }
        actions
    }

    /// a request to the candidate currently in charge of `key`
    fn ask(&self, key: RequestKey) -> Option<NodeAction<T>> {
        let candidate = self
            .ledger
            .lookup(key.flow, key.packet)?
            .candidates()
            .next()?;

        Some(NodeAction::Request {
            to: candidate,
            request: RetransmissionRequest {
                key,
                requester: self.address,
            },
        })
    }

    fn switch(&self, entry: &SwitchingEntry, mut packet: Packet<T>) -> Option<NodeAction<T>> {
        match entry.operation() {
            LabelStackOperation::Pop => Some(NodeAction::Deliver(packet)),
            LabelStackOperation::Push | LabelStackOperation::Swap | LabelStackOperation::Noop => {
                let LabelState::Assigned(label) = entry.label() else {
                    debug!(node = %self.address, packet = %packet.id(), "LSP not established, dropped");
                    return None;
                };

                packet.record_crossing(self.address);
                let outcome = self.dmgp.admit(&packet);
                trace!(node = %self.address, packet = %packet.id(), ?outcome, "packet offered to the cache");

                Some(NodeAction::Forward {
                    port: entry.outgoing_port(),
                    frame: Frame {
                        label: Some(label),
                        packet,
                    },
                })
            }
            LabelStackOperation::Undefined => None,
        }
    }

    // ---------------------------------------------------------------------
    // time

    /// Let `delta` time units elapse.
    ///
    /// Pending label requests and withdrawals are resent once they time
    /// out, failed sessions are given up. Retransmission requests that
    /// timed out are sent to the next candidate, the ones nobody can
    /// answer are given up.
    pub fn advance(&mut self, delta: u64) -> Vec<NodeAction<T>> {
        let mut actions = self.advance_sessions(delta);

        self.ledger.tick(delta);
        for key in self.ledger.retryable() {
            // the candidate in charge did not answer in time
            self.ledger.next_candidate(key.flow, key.packet);
            actions.extend(self.ask(key));
        }
        for key in self.ledger.sweep() {
            debug!(node = %self.address, request = %key, "packet could not be recovered");
            actions.push(NodeAction::Unrecoverable(key));
        }

        actions
    }

    fn advance_sessions(&mut self, delta: u64) -> Vec<NodeAction<T>> {
        let mut actions = Vec::new();

        self.table.decrease_timeouts(delta);
        for entry in self.table.sessions_to_retry() {
            if entry.label().is_pending() {
                actions.extend(resend(&entry, entry.outgoing_port(), entry.label()));
            }
            if let Some(port) = entry.backup_outgoing_port()
                && entry.backup_requested()
                && entry.backup_label().is_pending()
            {
                actions.extend(resend(&entry, port, entry.backup_label()));
            }
        }
        self.table.reset_timeouts();

        for entry in self.table.failed_sessions() {
            warn!(
                node = %self.address,
                session = %entry.local_session(),
                fec = %entry.tail_end(),
                label = %entry.label(),
                "label distribution session failed"
            );
            self.table
                .remove_by_local_session(entry.local_session(), entry.incoming_port());

            let Some(upstream) = entry.upstream_session() else {
                continue;
            };
            let signal = match entry.label() {
                LabelState::Removing(_) => Signal::LabelRelease { session: upstream },
                _ => Signal::PathUnavailable { session: upstream },
            };
            actions.push(NodeAction::Signal {
                port: entry.incoming_port(),
                signal,
            });
        }

        actions
    }
}

fn is_backup_port(entry: &SwitchingEntry, port: PortId) -> bool {
    entry.backup_outgoing_port() == Some(port) && entry.outgoing_port() != port
}

/// the withdrawals to send downstream for an entry being removed
fn withdrawals<T>(entry: &SwitchingEntry) -> Vec<NodeAction<T>> {
    let session = entry.local_session();
    let mut actions = vec![NodeAction::Signal {
        port: entry.outgoing_port(),
        signal: Signal::LabelWithdraw { session },
    }];
    if let (Some(port), LabelState::Removing(_)) =
        (entry.backup_outgoing_port(), entry.backup_label())
    {
        actions.push(NodeAction::Signal {
            port,
            signal: Signal::LabelWithdraw { session },
        });
    }
    actions
}

/// the signal to resend for a pending `state` of `entry`
fn resend<T>(entry: &SwitchingEntry, port: PortId, state: LabelState) -> Option<NodeAction<T>> {
    let session = entry.local_session();
    let signal = match state {
        LabelState::Requested => Signal::LabelRequest {
            fec: entry.tail_end(),
            session,
        },
        LabelState::Removing(_) => Signal::LabelWithdraw { session },
        _ => return None,
    };
    Some(NodeAction::Signal { port, signal })
}

impl GosPacket for Missing {
    fn flow_id(&self) -> FlowId {
        self.flow
    }

    fn packet_id(&self) -> PacketId {
        self.id
    }

    fn bytes_size(&self) -> u64 {
        0
    }

    fn gos_level(&self) -> GosLevel {
        self.level
    }

    fn crossed_nodes(&self) -> &[Ipv4Addr] {
        &self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gos_core::{PacketIdGenerator, Synthetic};

    const UP: PortId = PortId::new(1);
    const DOWN: PortId = PortId::new(2);
    const BACKUP: PortId = PortId::new(3);
    const FEC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);
    const SOURCE: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);

    fn address(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 0, n)
    }

    fn node(n: u8) -> ActiveNode<Synthetic> {
        ActiveNodeBuilder::new().set_address(address(n)).build().unwrap()
    }

    fn egress(n: u8) -> ActiveNode<Synthetic> {
        ActiveNodeBuilder::new()
            .set_address(address(n))
            .set_egress(true)
            .build()
            .unwrap()
    }

    fn signals(actions: &[NodeAction<Synthetic>]) -> Vec<(PortId, Signal)> {
        actions
            .iter()
            .filter_map(|action| match action {
                NodeAction::Signal { port, signal } => Some((*port, *signal)),
                _ => None,
            })
            .collect()
    }

    fn packet(generator: &PacketIdGenerator, level: GosLevel) -> Packet<Synthetic> {
        Packet::builder(generator)
            .source(SOURCE)
            .destination(FEC)
            .level(level)
            .data(Synthetic(64))
            .build()
            .unwrap()
    }

    /// an established transit node: label 16 in, label 40 out
    fn transit() -> ActiveNode<Synthetic> {
        let mut node = node(2);
        node.on_label_request(UP, FEC, SessionId::new(1)).unwrap();
        node.on_label_mapping(DOWN, SessionId::new(1), Label::new(40).unwrap());
        node
    }

    fn frame(packet: Packet<Synthetic>) -> Frame<Synthetic> {
        Frame {
            label: Label::new(16),
            packet,
        }
    }

    // ---------------------------------------------------------------------
    // builder

    #[test]
    fn builder_missing_address() {
        let Err(error) = ActiveNodeBuilder::new().build::<Synthetic>() else {
            panic!("Expecting an error because missing the `address'")
        };

        assert_eq!(error.to_string(), "Missing node address (`address')");
    }

    #[test]
    fn builder_ports_must_differ() {
        assert!(
            ActiveNodeBuilder::new()
                .set_address(address(1))
                .set_downstream(UP)
                .build::<Synthetic>()
                .is_err()
        );
        assert!(
            ActiveNodeBuilder::new()
                .set_address(address(1))
                .set_backup(DOWN)
                .build::<Synthetic>()
                .is_err()
        );
    }

    #[test]
    fn builder_empty_label_range() {
        let Err(error) = ActiveNodeBuilder::new()
            .set_address(address(1))
            .set_label_range(Label::new(17).unwrap()..=Label::MIN)
            .build::<Synthetic>()
        else {
            panic!("Expecting an error because the label range is empty")
        };

        assert_eq!(error.to_string(), "Empty label range label#17..=label#16");
    }

    // ---------------------------------------------------------------------
    // label distribution

    #[test]
    fn ingress_requests_a_label() {
        let mut ingress = node(1);

        let actions = ingress.establish_session(FEC, false).unwrap();

        assert_eq!(
            signals(&actions),
            vec![(
                DOWN,
                Signal::LabelRequest {
                    fec: FEC,
                    session: SessionId::new(1)
                }
            )]
        );
        assert!(!ingress.is_established(FEC));
        assert!(!ingress.is_unreachable(FEC));
    }

    #[test]
    fn egress_maps_right_away() {
        let mut egress = egress(3);

        let actions = egress
            .on_label_request(UP, FEC, SessionId::new(7))
            .unwrap();

        assert_eq!(
            signals(&actions),
            vec![(
                UP,
                Signal::LabelMapping {
                    session: SessionId::new(7),
                    label: Label::MIN
                }
            )]
        );
        let entry = egress.table().lookup_by(UP, 16, EntryKind::Label).unwrap();
        assert_eq!(entry.operation(), LabelStackOperation::Pop);

        // a retried request gets the same answer, no new label
        let again = egress
            .on_label_request(UP, FEC, SessionId::new(7))
            .unwrap();
        assert_eq!(signals(&again), signals(&actions));
        assert_eq!(egress.table().len(), 1);
    }

    #[test]
    fn transit_waits_for_downstream() {
        let mut transit = node(2);

        let actions = transit
            .on_label_request(UP, FEC, SessionId::new(7))
            .unwrap();
        assert_eq!(
            signals(&actions),
            vec![(
                DOWN,
                Signal::LabelRequest {
                    fec: FEC,
                    session: SessionId::new(1)
                }
            )]
        );

        let actions = transit.on_label_mapping(DOWN, SessionId::new(1), Label::new(99).unwrap());
        assert_eq!(
            signals(&actions),
            vec![(
                UP,
                Signal::LabelMapping {
                    session: SessionId::new(7),
                    label: Label::MIN
                }
            )]
        );
    }

    #[test]
    fn three_nodes_lsp() {
        let mut ingress = node(1);
        let mut transit = node(2);
        let mut egress = egress(3);

        let request = signals(&ingress.establish_session(FEC, false).unwrap());
        let Signal::LabelRequest { session, .. } = request[0].1 else {
            panic!("expecting a label request")
        };
        let request = signals(&transit.on_label_request(UP, FEC, session).unwrap());
        let Signal::LabelRequest { session, .. } = request[0].1 else {
            panic!("expecting a label request")
        };
        let mapping = signals(&egress.on_label_request(UP, FEC, session).unwrap());
        let Signal::LabelMapping { session, label } = mapping[0].1 else {
            panic!("expecting a label mapping")
        };
        let mapping = signals(&transit.on_label_mapping(DOWN, session, label));
        let Signal::LabelMapping { session, label } = mapping[0].1 else {
            panic!("expecting a label mapping")
        };
        assert!(ingress.on_label_mapping(DOWN, session, label).is_empty());

        assert!(ingress.is_established(FEC));
    }

    #[test]
    fn path_unavailable_travels_upstream() {
        let mut ingress = node(1);
        let mut transit = node(2);
        ingress.establish_session(FEC, false).unwrap();
        transit
            .on_label_request(UP, FEC, SessionId::new(1))
            .unwrap();

        let actions = transit.on_path_unavailable(DOWN, SessionId::new(1));
        assert_eq!(
            signals(&actions),
            vec![(
                UP,
                Signal::PathUnavailable {
                    session: SessionId::new(1)
                }
            )]
        );
        assert!(transit.table().is_empty());

        ingress.on_path_unavailable(DOWN, SessionId::new(1));
        assert!(ingress.is_unreachable(FEC));
    }

    #[test]
    fn exhausted_label_space_answers_path_unavailable() {
        let mut egress = ActiveNodeBuilder::new()
            .set_address(address(3))
            .set_egress(true)
            .set_label_range(Label::MIN..=Label::MIN)
            .build::<Synthetic>()
            .unwrap();
        egress
            .on_label_request(UP, FEC, SessionId::new(7))
            .unwrap();

        let actions = egress
            .on_label_request(UP, FEC, SessionId::new(8))
            .unwrap();

        assert_eq!(
            signals(&actions),
            vec![(
                UP,
                Signal::PathUnavailable {
                    session: SessionId::new(8)
                }
            )]
        );
        assert_eq!(egress.table().len(), 1);
    }

    #[test]
    fn unexpected_mapping_is_ignored() {
        let mut transit = transit();
        let before = transit.table().entries();

        let actions = transit.on_label_mapping(DOWN, SessionId::new(1), Label::new(41).unwrap());

        assert!(actions.is_empty());
        assert_eq!(transit.table().entries(), before);
        assert!(
            transit
                .on_label_mapping(DOWN, SessionId::new(9), Label::MIN)
                .is_empty()
        );
    }

    #[test]
    fn label_request_is_retried_then_given_up() {
        let mut transit = ActiveNodeBuilder::new()
            .set_address(address(2))
            .set_session_timer(RetryTimer::new(100, 2))
            .build::<Synthetic>()
            .unwrap();
        transit
            .on_label_request(UP, FEC, SessionId::new(7))
            .unwrap();

        let mut resent = 0;
        let mut failure = None;
        for _ in 0..5 {
            for (port, signal) in signals(&transit.advance(100)) {
                match signal {
                    Signal::LabelRequest { .. } => {
                        assert_eq!(port, DOWN);
                        resent += 1;
                    }
                    other => failure = Some((port, other)),
                }
            }
        }

        assert_eq!(resent, 2);
        assert_eq!(
            failure,
            Some((
                UP,
                Signal::PathUnavailable {
                    session: SessionId::new(7)
                }
            ))
        );
        assert!(transit.table().is_empty());
    }

    #[test]
    fn teardown() {
        let mut ingress = node(1);
        let mut egress = egress(3);
        ingress.establish_session(FEC, false).unwrap();
        egress.on_label_request(UP, FEC, SessionId::new(1)).unwrap();
        ingress.on_label_mapping(DOWN, SessionId::new(1), Label::MIN);

        let withdraw = signals(&ingress.withdraw(FEC));
        assert_eq!(
            withdraw,
            vec![(
                DOWN,
                Signal::LabelWithdraw {
                    session: SessionId::new(1)
                }
            )]
        );

        let release = signals(&egress.on_withdraw(UP, SessionId::new(1)));
        assert_eq!(
            release,
            vec![(
                UP,
                Signal::LabelRelease {
                    session: SessionId::new(1)
                }
            )]
        );
        assert!(egress.table().is_empty());

        assert!(ingress.on_release(DOWN, SessionId::new(1)).is_empty());
        assert!(ingress.table().is_empty());
    }

    #[test]
    fn backup_lsp_and_failover() {
        let mut ingress = ActiveNodeBuilder::new()
            .set_address(address(1))
            .set_backup(BACKUP)
            .build::<Synthetic>()
            .unwrap();

        let requests = signals(&ingress.establish_session(FEC, true).unwrap());
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].0, BACKUP);

        ingress.on_label_mapping(DOWN, SessionId::new(1), Label::new(20).unwrap());
        ingress.on_label_mapping(BACKUP, SessionId::new(1), Label::new(30).unwrap());

        let entry = ingress.table().lookup_by_local_session(SessionId::new(1)).unwrap();
        assert_eq!(entry.label(), LabelState::Assigned(Label::new(20).unwrap()));
        assert_eq!(
            entry.backup_label(),
            LabelState::Assigned(Label::new(30).unwrap())
        );

        assert_eq!(ingress.on_link_failure(DOWN), 1);

        let entry = ingress.table().lookup_by_local_session(SessionId::new(1)).unwrap();
        assert_eq!(entry.outgoing_port(), BACKUP);
        assert_eq!(entry.label(), LabelState::Assigned(Label::new(30).unwrap()));
        assert!(ingress.is_established(FEC));
    }

    #[test]
    fn no_backup_port_means_no_backup_path() {
        let mut ingress = node(1);

        let requests = signals(&ingress.establish_session(FEC, true).unwrap());
        assert_eq!(requests.len(), 1);

        let entry = ingress.table().lookup_by_local_session(SessionId::new(1)).unwrap();
        assert_eq!(entry.backup_label(), LabelState::PathUnavailable);
        assert_eq!(ingress.on_link_failure(DOWN), 0);
    }

    // ---------------------------------------------------------------------
    // data plane

    #[test]
    fn swap_records_crossing_and_caches() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let packet = packet(&generator, GosLevel::LEVEL_3);
        let (flow, id) = (packet.flow(), packet.id());

        let actions = transit.on_gos_packet(frame(packet), UP);

        let [NodeAction::Forward { port, frame }] = actions.as_slice() else {
            panic!("expecting a single forward, got {actions:?}")
        };
        assert_eq!(*port, DOWN);
        assert_eq!(frame.label, Label::new(40));
        assert_eq!(frame.packet.crossed_nodes(), &[address(2)]);
        assert_eq!(transit.dmgp().get(flow, id), Some(frame.packet.clone()));
    }

    #[test]
    fn unknown_label_is_dropped() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let packet = packet(&generator, GosLevel::LEVEL_3);

        let actions = transit.on_gos_packet(
            Frame {
                label: Label::new(17),
                packet,
            },
            UP,
        );

        assert!(actions.is_empty());
    }

    #[test]
    fn gap_opens_a_request_to_the_nearest_node() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let mut first = packet(&generator, GosLevel::LEVEL_2);
        let lost = packet(&generator, GosLevel::LEVEL_2);
        let mut third = packet(&generator, GosLevel::LEVEL_2);
        for p in [&mut first, &mut third] {
            p.record_crossing(address(9));
            p.record_crossing(address(1));
        }

        transit.on_gos_packet(frame(first), UP);
        let actions = transit.on_gos_packet(frame(third), UP);

        let expected = NodeAction::Request {
            to: address(1),
            request: RetransmissionRequest {
                key: RequestKey::of(&lost),
                requester: address(2),
            },
        };
        assert_eq!(actions[0], expected);
        assert!(matches!(actions[1], NodeAction::Forward { .. }));
        assert_eq!(transit.ledger().len(), 1);
    }

    #[test]
    fn best_effort_losses_are_not_recovered() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let first = packet(&generator, GosLevel::LEVEL_0);
        let _lost = packet(&generator, GosLevel::LEVEL_0);
        let third = packet(&generator, GosLevel::LEVEL_0);

        transit.on_gos_packet(frame(first), UP);
        let actions = transit.on_gos_packet(frame(third), UP);

        assert_eq!(actions.len(), 1);
        assert!(transit.ledger().is_empty());
    }

    #[test]
    fn best_effort_packets_fill_the_gaps_of_a_guaranteed_flow() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let mut first = packet(&generator, GosLevel::LEVEL_3);
        let mut best_effort = packet(&generator, GosLevel::LEVEL_0);
        let mut third = packet(&generator, GosLevel::LEVEL_3);
        for p in [&mut first, &mut best_effort, &mut third] {
            p.record_crossing(address(1));
        }

        let mut actions = transit.on_gos_packet(frame(first), UP);
        actions.extend(transit.on_gos_packet(frame(best_effort), UP));
        actions.extend(transit.on_gos_packet(frame(third), UP));

        assert_eq!(actions.len(), 3);
        assert!(
            actions
                .iter()
                .all(|action| matches!(action, NodeAction::Forward { .. }))
        );
        assert!(transit.ledger().is_empty());
    }

    #[test]
    fn large_gap_only_requests_the_most_recent_losses() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let first = packet(&generator, GosLevel::LEVEL_3);
        for _ in 0..20_000 {
            generator.generate();
        }
        let mut last = packet(&generator, GosLevel::LEVEL_3);
        last.record_crossing(address(1));
        let last_id = last.id().into_u64();

        transit.on_gos_packet(frame(first), UP);
        let actions = transit.on_gos_packet(frame(last), UP);

        let requested: Vec<u64> = actions
            .iter()
            .filter_map(|action| match action {
                NodeAction::Request { request, .. } => Some(request.key.packet.into_u64()),
                _ => None,
            })
            .collect();
        let expected: Vec<u64> = (last_id - MAX_REQUESTS_PER_GAP..last_id).collect();
        assert_eq!(requested, expected);
        assert_eq!(transit.ledger().len() as u64, MAX_REQUESTS_PER_GAP);
    }

    #[test]
    fn reset_forgets_the_identifiers_seen() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let first = packet(&generator, GosLevel::LEVEL_3);
        for _ in 0..100 {
            generator.generate();
        }
        let mut last = packet(&generator, GosLevel::LEVEL_3);
        last.record_crossing(address(1));
        transit.on_gos_packet(frame(first), UP);
        transit.on_gos_packet(frame(last), UP);
        assert!(!transit.ledger().is_empty());

        transit.reset();

        assert!(transit.table().is_empty());
        assert!(transit.ledger().is_empty());
        assert_eq!(transit.dmgp().flows(), 0);

        // same LSP again, the source restarted its identifiers
        transit
            .on_label_request(UP, FEC, SessionId::new(1))
            .unwrap();
        transit.on_label_mapping(DOWN, SessionId::new(1), Label::new(40).unwrap());
        let generator = PacketIdGenerator::new();
        let mut first = packet(&generator, GosLevel::LEVEL_3);
        let lost = packet(&generator, GosLevel::LEVEL_3);
        let mut third = packet(&generator, GosLevel::LEVEL_3);
        for p in [&mut first, &mut third] {
            p.record_crossing(address(1));
        }

        transit.on_gos_packet(frame(first), UP);
        let actions = transit.on_gos_packet(frame(third), UP);

        assert_eq!(
            actions[0],
            NodeAction::Request {
                to: address(1),
                request: RetransmissionRequest {
                    key: RequestKey::of(&lost),
                    requester: address(2),
                },
            }
        );
        assert_eq!(transit.ledger().len(), 1);
    }

    #[test]
    fn request_served_from_the_cache() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let packet = packet(&generator, GosLevel::LEVEL_3);
        let key = RequestKey::of(&packet);
        transit.on_gos_packet(frame(packet), UP);

        let actions = transit.on_request(RetransmissionRequest {
            key,
            requester: address(5),
        });
        let [NodeAction::Reply { to, packet }] = actions.as_slice() else {
            panic!("expecting a reply, got {actions:?}")
        };
        assert_eq!(*to, address(5));
        assert_eq!(RequestKey::of(packet), key);

        let missing = RequestKey::new(key.flow, PacketId::new(99));
        assert!(
            transit
                .on_request(RetransmissionRequest {
                    key: missing,
                    requester: address(5),
                })
                .is_empty()
        );
    }

    #[test]
    fn reply_is_switched_once() {
        let mut transit = transit();
        let generator = PacketIdGenerator::new();
        let mut first = packet(&generator, GosLevel::LEVEL_3);
        let mut lost = packet(&generator, GosLevel::LEVEL_3);
        let mut third = packet(&generator, GosLevel::LEVEL_3);
        for p in [&mut first, &mut lost, &mut third] {
            p.record_crossing(address(1));
        }
        transit.on_gos_packet(frame(first), UP);
        transit.on_gos_packet(frame(third), UP);

        let actions = transit.on_reply(lost.clone());
        let [NodeAction::Forward { port, frame }] = actions.as_slice() else {
            panic!("expecting a forward, got {actions:?}")
        };
        assert_eq!(*port, DOWN);
        assert_eq!(frame.packet.id(), lost.id());
        assert!(transit.ledger().is_empty());

        // a second reply for the same packet is ignored
        assert!(transit.on_reply(lost).is_empty());
    }

    #[test]
    fn request_moves_to_the_next_candidate_then_gives_up() {
        let mut transit = ActiveNodeBuilder::new()
            .set_address(address(3))
            .set_request_timer(RetryTimer::new(100, 8))
            .build::<Synthetic>()
            .unwrap();
        transit.on_label_request(UP, FEC, SessionId::new(1)).unwrap();
        transit.on_label_mapping(DOWN, SessionId::new(1), Label::new(40).unwrap());

        let generator = PacketIdGenerator::new();
        let mut first = packet(&generator, GosLevel::LEVEL_3);
        let lost = packet(&generator, GosLevel::LEVEL_3);
        let mut third = packet(&generator, GosLevel::LEVEL_3);
        for p in [&mut first, &mut third] {
            p.record_crossing(address(1));
            p.record_crossing(address(2));
        }
        transit.on_gos_packet(frame(first), UP);
        transit.on_gos_packet(frame(third), UP);

        let actions = transit.advance(100);
        let [NodeAction::Request { to, .. }] = actions.as_slice() else {
            panic!("expecting a request to the next candidate, got {actions:?}")
        };
        assert_eq!(*to, address(1));

        let actions = transit.advance(100);
        assert_eq!(actions, vec![NodeAction::Unrecoverable(RequestKey::of(&lost))]);
        assert!(transit.ledger().is_empty());
    }
}
