use super::label::{LabelEvent, LabelState, TransitionError};
use crate::{port::PortId, retry::RetryTimer};
use std::{fmt, net::Ipv4Addr};
use thiserror::Error;

/// Signaling session identifier, see [`SwitchingTable::new_session_id`].
///
/// [`SwitchingTable::new_session_id`]: super::SwitchingTable::new_session_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

/// What the `label_or_fec` key of a [`SwitchingEntry`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// an incoming label, used by transit and egress nodes
    Label,
    /// a forwarding equivalence class, used by ingress nodes to classify
    /// unlabeled traffic
    Fec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelStackOperation {
    #[default]
    Undefined,
    Push,
    Pop,
    Swap,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("Missing incoming port (`incoming_port')")]
    MissingIncomingPort,
    #[error("Missing label or FEC (`label_or_fec')")]
    MissingLabelOrFec,
    #[error("Missing outgoing port (`outgoing_port')")]
    MissingOutgoingPort,
    #[error("Missing local session identifier (`local_session')")]
    MissingLocalSession,
    #[error("Missing tail end address (`tail_end')")]
    MissingTailEnd,
    #[error("Label stack operation {operation:?} is not consistent with a label {label}")]
    InconsistentOperation {
        operation: LabelStackOperation,
        label: LabelState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FailoverError {
    #[error("No backup outgoing port to switch to")]
    NoBackupPort,
    #[error("The backup label is not assigned ({0})")]
    BackupNotAssigned(LabelState),
}

/// One row of the [`SwitchingTable`]: how to switch what comes in on
/// `incoming_port` with `label_or_fec`, and the state of the label
/// distribution session that set it up.
///
/// An entry can only be obtained from [`SwitchingEntryBuilder::build`]
/// and is therefore always valid.
///
/// [`SwitchingTable`]: super::SwitchingTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchingEntry {
    incoming_port: PortId,
    label_or_fec: u32,
    kind: EntryKind,
    outgoing_port: PortId,
    backup_outgoing_port: Option<PortId>,
    label: LabelState,
    backup_label: LabelState,
    operation: LabelStackOperation,
    tail_end: Ipv4Addr,
    local_session: SessionId,
    upstream_session: Option<SessionId>,
    timer: RetryTimer,
    backup_requested: bool,
}

/// Build a [`SwitchingEntry`].
///
/// ```
/// # use gos_core::{EntryKind, LabelStackOperation, PortId, SessionId, SwitchingEntry};
/// # use std::net::Ipv4Addr;
/// let entry = SwitchingEntry::builder()
///     .incoming_port(PortId::new(1))
///     .label_or_fec(0x0a00_0001, EntryKind::Fec)
///     .outgoing_port(PortId::new(2))
///     .operation(LabelStackOperation::Noop)
///     .tail_end(Ipv4Addr::new(10, 0, 0, 9))
///     .local_session(SessionId::new(1))
///     .build()
///     .unwrap();
///
/// assert_eq!(entry.remaining_attempts(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SwitchingEntryBuilder {
    incoming_port: Option<PortId>,
    label_or_fec: Option<(u32, EntryKind)>,
    outgoing_port: Option<PortId>,
    backup_outgoing_port: Option<PortId>,
    label: LabelState,
    operation: LabelStackOperation,
    tail_end: Option<Ipv4Addr>,
    local_session: Option<SessionId>,
    upstream_session: Option<SessionId>,
    timer: Option<RetryTimer>,
    backup_requested: bool,
}

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl LabelStackOperation {
    /// whether the operation makes sense with the entry's label
    pub fn is_consistent_with(&self, label: &LabelState) -> bool {
        match self {
            Self::Undefined => false,
            Self::Push | Self::Swap => *label != LabelState::Unset,
            Self::Pop | Self::Noop => true,
        }
    }
}

impl SwitchingEntryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incoming_port(mut self, port: PortId) -> Self {
        self.incoming_port = Some(port);
        self
    }

    pub fn label_or_fec(mut self, label_or_fec: u32, kind: EntryKind) -> Self {
        self.label_or_fec = Some((label_or_fec, kind));
        self
    }

    pub fn outgoing_port(mut self, port: PortId) -> Self {
        self.outgoing_port = Some(port);
        self
    }

    pub fn backup_outgoing_port(mut self, port: PortId) -> Self {
        self.backup_outgoing_port = Some(port);
        self
    }

    /// initial state of the primary label, defaults to [`LabelState::Unset`]
    pub fn label(mut self, label: LabelState) -> Self {
        self.label = label;
        self
    }

    pub fn operation(mut self, operation: LabelStackOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn tail_end(mut self, tail_end: Ipv4Addr) -> Self {
        self.tail_end = Some(tail_end);
        self
    }

    pub fn local_session(mut self, session: SessionId) -> Self {
        self.local_session = Some(session);
        self
    }

    pub fn upstream_session(mut self, session: SessionId) -> Self {
        self.upstream_session = Some(session);
        self
    }

    /// defaults to [`RetryTimer::session`]
    pub fn timer(mut self, timer: RetryTimer) -> Self {
        self.timer = Some(timer);
        self
    }

    /// ask for a backup LSP alongside the primary one
    pub fn request_backup(mut self, backup: bool) -> Self {
        self.backup_requested = backup;
        self
    }

    pub fn build(self) -> Result<SwitchingEntry, EntryError> {
        let incoming_port = self.incoming_port.ok_or(EntryError::MissingIncomingPort)?;
        let (label_or_fec, kind) = self.label_or_fec.ok_or(EntryError::MissingLabelOrFec)?;
        let outgoing_port = self.outgoing_port.ok_or(EntryError::MissingOutgoingPort)?;
        let local_session = self.local_session.ok_or(EntryError::MissingLocalSession)?;
        let tail_end = self.tail_end.ok_or(EntryError::MissingTailEnd)?;

        if !self.operation.is_consistent_with(&self.label) {
            return Err(EntryError::InconsistentOperation {
                operation: self.operation,
                label: self.label,
            });
        }

        Ok(SwitchingEntry {
            incoming_port,
            label_or_fec,
            kind,
            outgoing_port,
            backup_outgoing_port: self.backup_outgoing_port,
            label: self.label,
            backup_label: LabelState::Unset,
            operation: self.operation,
            tail_end,
            local_session,
            upstream_session: self.upstream_session,
            timer: self.timer.unwrap_or_else(RetryTimer::session),
            backup_requested: self.backup_requested,
        })
    }
}

impl SwitchingEntry {
    pub fn builder() -> SwitchingEntryBuilder {
        SwitchingEntryBuilder::new()
    }

    #[inline]
    pub fn incoming_port(&self) -> PortId {
        self.incoming_port
    }

    #[inline]
    pub fn label_or_fec(&self) -> u32 {
        self.label_or_fec
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[inline]
    pub fn outgoing_port(&self) -> PortId {
        self.outgoing_port
    }

    #[inline]
    pub fn backup_outgoing_port(&self) -> Option<PortId> {
        self.backup_outgoing_port
    }

    #[inline]
    pub fn label(&self) -> LabelState {
        self.label
    }

    #[inline]
    pub fn backup_label(&self) -> LabelState {
        self.backup_label
    }

    #[inline]
    pub fn operation(&self) -> LabelStackOperation {
        self.operation
    }

    #[inline]
    pub fn tail_end(&self) -> Ipv4Addr {
        self.tail_end
    }

    #[inline]
    pub fn local_session(&self) -> SessionId {
        self.local_session
    }

    #[inline]
    pub fn upstream_session(&self) -> Option<SessionId> {
        self.upstream_session
    }

    #[inline]
    pub fn backup_requested(&self) -> bool {
        self.backup_requested
    }

    #[inline]
    pub fn timeout_credit(&self) -> u64 {
        self.timer.timeout_credit()
    }

    #[inline]
    pub fn remaining_attempts(&self) -> u8 {
        self.timer.remaining_attempts()
    }

    pub fn set_outgoing_port(&mut self, port: PortId) {
        self.outgoing_port = port;
    }

    pub fn set_backup_outgoing_port(&mut self, port: Option<PortId>) {
        self.backup_outgoing_port = port;
    }

    pub fn set_upstream_session(&mut self, session: SessionId) {
        self.upstream_session = Some(session);
    }

    pub fn set_operation(&mut self, operation: LabelStackOperation) {
        self.operation = operation;
    }

    /// drive the primary label, the entry is left untouched on error
    ///
    /// A request or a withdrawal starts a new exchange: the timeout
    /// credit is restored (the retry budget is not).
    pub fn on_label_event(&mut self, event: LabelEvent) -> Result<LabelState, TransitionError> {
        self.label = self.label.on(event)?;
        if self.label.is_pending() {
            self.timer.restart();
        }
        Ok(self.label)
    }

    /// drive the backup label, only once a backup LSP was requested
    pub fn on_backup_label_event(
        &mut self,
        event: LabelEvent,
    ) -> Result<LabelState, TransitionError> {
        if !self.backup_requested {
            return Err(TransitionError::BackupNotRequested);
        }
        self.backup_label = self.backup_label.on(event)?;
        if self.backup_label.is_pending() {
            self.timer.restart();
        }
        Ok(self.backup_label)
    }

    pub fn request_backup(&mut self) {
        self.backup_requested = true;
    }

    /// Promote the backup LSP to primary.
    ///
    /// The backup port and label replace the primary ones and the backup
    /// slot is cleared, so a second failover fails until a new backup is
    /// set up.
    pub fn switch_to_backup(&mut self) -> Result<(), FailoverError> {
        let Some(port) = self.backup_outgoing_port else {
            return Err(FailoverError::NoBackupPort);
        };
        if !self.backup_label.is_assigned() {
            return Err(FailoverError::BackupNotAssigned(self.backup_label));
        }

        self.outgoing_port = port;
        self.label = self.backup_label;
        self.backup_outgoing_port = None;
        self.backup_label = LabelState::Unset;
        self.backup_requested = false;

        Ok(())
    }

    /// a label request or withdrawal of this entry waits for an answer
    pub fn is_pending(&self) -> bool {
        self.label.is_pending() || (self.backup_requested && self.backup_label.is_pending())
    }

    pub fn decrease_timeout(&mut self, delta: u64) {
        self.timer.decrease(delta);
    }

    /// the pending exchange timed out and may be resent
    pub fn should_retry(&self) -> bool {
        self.timer.is_due() && self.is_pending()
    }

    /// Spend one attempt to resend the pending exchange.
    ///
    /// Only effective while [`SwitchingEntry::should_retry`]; returns
    /// whether the timer was reset.
    pub fn reset_timeout(&mut self) -> bool {
        self.should_retry() && self.timer.rearm()
    }

    /// the pending exchange timed out with no attempt left: the session
    /// failed and the entry must be withdrawn
    pub fn retry_exhausted(&self) -> bool {
        self.timer.is_exhausted() && self.is_pending()
    }

    /// the labels this entry keeps from being handed out again
    pub(crate) fn held_labels(&self) -> impl Iterator<Item = super::Label> {
        let key = match self.kind {
            EntryKind::Label => super::Label::new(self.label_or_fec),
            EntryKind::Fec => None,
        };
        key.into_iter()
            .chain(self.label.label())
            .chain(self.backup_label.label())
    }

    pub(crate) fn matches(&self, port: PortId, label_or_fec: u32, kind: EntryKind) -> bool {
        self.incoming_port == port && self.label_or_fec == label_or_fec && self.kind == kind
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}
