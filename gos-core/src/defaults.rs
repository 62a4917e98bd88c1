use crate::capacity::CacheCapacity;

/// Default size of a node's retransmission cache ([`Dmgp`]).
///
/// ```
/// # use gos_core::defaults::*;
/// assert_eq!(DEFAULT_CACHE_CAPACITY.to_string(), "1KB");
/// ```
///
/// [`Dmgp`]: crate::dmgp::Dmgp
pub const DEFAULT_CACHE_CAPACITY: CacheCapacity = CacheCapacity::from_kb(1);

/// Share of the cache, in percent, a flow asks for depending on its
/// GoS level (index `0` is level 0, index `3` is level 3).
///
/// The backup flag of a [`GosLevel`] has no influence on the share.
///
/// [`GosLevel`]: crate::packet::GosLevel
pub const DMGP_PERCENTAGE_BY_LEVEL: [u8; 4] = [0, 4, 8, 12];

/// The whole percentage budget of a [`Dmgp`].
///
/// [`Dmgp`]: crate::dmgp::Dmgp
pub const DMGP_TOTAL_PERCENTAGE: u8 = 100;

/// Time units a label distribution session waits for an answer before
/// the request (or withdrawal) is resent.
pub const SESSION_TIMEOUT: u64 = 50_000;

/// Number of times a label request or withdrawal is resent before the
/// session is given up.
pub const SESSION_ATTEMPTS: u8 = 3;

/// Time units a GPSRP retransmission request waits for an answer from the
/// candidate it was sent to.
pub const REQUEST_TIMEOUT: u64 = 50_000;

/// Number of times a GPSRP retransmission request is re-issued.
pub const REQUEST_ATTEMPTS: u8 = 8;

/// Size of the fixed IPv4 header carried by every GoS packet.
pub const IPV4_HEADER_SIZE: u64 = 20;

/// Size of the GoS option (level and packet identifier) in the IPv4
/// options field.
pub const GOS_OPTION_SIZE: u64 = 8;

/// Size of each crossed active-node address recorded in the IPv4 options
/// field.
pub const CROSSED_NODE_SIZE: u64 = 4;

/// Lowest label a switching table hands out (0 to 15 are reserved).
pub const MIN_LABEL: u32 = 16;

/// Highest label a switching table hands out (20 bits label space).
pub const MAX_LABEL: u32 = 1_048_575;

/// Most retransmission requests a node opens for a single gap in a flow's
/// packet identifiers. Only the identifiers closest to the packet that
/// revealed the gap are requested.
pub const MAX_REQUESTS_PER_GAP: u64 = 64;
