use crate::defaults::{MAX_LABEL, MIN_LABEL};
use std::fmt;
use thiserror::Error;

/// An MPLS label, always within `[16, 1_048_575]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(u32);

/// State of the label (primary or backup) of a [`SwitchingEntry`].
///
/// ```text
///            Request            Mapping(l)              Withdraw               Release
///   Unset ────────────► Requested ─────────► Assigned(l) ─────────► Removing(l) ────────► Withdrawn
///                           │
///                           ├── Unavailable ─────► Unavailable
///                           └── PathUnavailable ─► PathUnavailable
/// ```
///
/// [`SwitchingEntry`]: super::SwitchingEntry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelState {
    /// nothing was asked for yet
    #[default]
    Unset,
    /// a label request was sent downstream, waiting for the mapping
    Requested,
    Assigned(Label),
    /// downstream has no label to give
    Unavailable,
    /// there is no path to the tail end
    PathUnavailable,
    /// a withdrawal was sent, waiting for the release
    Removing(Label),
    Withdrawn,
}

/// Signaling events driving a [`LabelState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelEvent {
    Request,
    Mapping(Label),
    Unavailable,
    PathUnavailable,
    Withdraw,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid label transition: {event} while {from}")]
    Invalid { from: LabelState, event: LabelEvent },
    #[error("No backup LSP was requested for this entry")]
    BackupNotRequested,
}

/// Every label of the table's range is held by its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Label space exhausted")]
pub struct LabelSpaceExhausted;

impl Label {
    pub const MIN: Self = Self(MIN_LABEL);
    pub const MAX: Self = Self(MAX_LABEL);

    /// `None` if `label` is reserved or out of the 20 bits label space
    pub const fn new(label: u32) -> Option<Self> {
        if label < MIN_LABEL || label > MAX_LABEL {
            None
        } else {
            Some(Self(label))
        }
    }

    #[inline(always)]
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

impl LabelState {
    /// the label this state holds on to, if any
    ///
    /// A label being removed is still held: it is not handed out again
    /// until the release is received.
    pub fn label(&self) -> Option<Label> {
        match self {
            Self::Assigned(label) | Self::Removing(label) => Some(*label),
            _ => None,
        }
    }

    #[inline]
    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }

    /// a request or a withdrawal is waiting for an answer
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Requested | Self::Removing(_))
    }

    /// the LSP could not be set up
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Unavailable | Self::PathUnavailable)
    }

    pub fn on(self, event: LabelEvent) -> Result<Self, TransitionError> {
        use LabelEvent as E;

        match (self, event) {
            (Self::Unset, E::Request) => Ok(Self::Requested),
            (Self::Requested, E::Mapping(label)) => Ok(Self::Assigned(label)),
            (Self::Requested, E::Unavailable) => Ok(Self::Unavailable),
            (Self::Requested, E::PathUnavailable) => Ok(Self::PathUnavailable),
            (Self::Assigned(label), E::Withdraw) => Ok(Self::Removing(label)),
            (Self::Removing(_), E::Release) => Ok(Self::Withdrawn),
            (from, event) => Err(TransitionError::Invalid { from, event }),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label#{}", self.0)
    }
}

impl fmt::Display for LabelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("unset"),
            Self::Requested => f.write_str("requested"),
            Self::Assigned(label) => write!(f, "assigned({label})"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::PathUnavailable => f.write_str("path unavailable"),
            Self::Removing(label) => write!(f, "removing({label})"),
            Self::Withdrawn => f.write_str("withdrawn"),
        }
    }
}

impl fmt::Display for LabelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("label request"),
            Self::Mapping(label) => write!(f, "label mapping ({label})"),
            Self::Unavailable => f.write_str("label unavailable"),
            Self::PathUnavailable => f.write_str("path unavailable"),
            Self::Withdraw => f.write_str("label withdraw"),
            Self::Release => f.write_str("label release"),
        }
    }
}
