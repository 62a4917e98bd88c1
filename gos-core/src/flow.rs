use std::{fmt, net::Ipv4Addr};

/// Identifier of a traffic aggregate.
///
/// All the packets emitted from the same IPv4 source belong to the same
/// flow. The identifier is a 32-bit FNV-1a hash of the source address
/// octets: it is stable across runs and platforms, which keeps cache
/// partitions (and therefore simulations) reproducible.
///
/// ```
/// # use gos_core::FlowId;
/// # use std::net::Ipv4Addr;
/// let a = FlowId::from_source(Ipv4Addr::new(10, 0, 0, 1));
/// let b = FlowId::from_source(Ipv4Addr::new(10, 0, 0, 1));
/// let c = FlowId::from_source(Ipv4Addr::new(10, 0, 0, 2));
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(u32);

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

impl FlowId {
    /// derive the flow identifier from the packet's origin address
    pub fn from_source(source: Ipv4Addr) -> Self {
        let hash = source
            .octets()
            .iter()
            .fold(FNV_OFFSET_BASIS, |hash, octet| {
                (hash ^ u32::from(*octet)).wrapping_mul(FNV_PRIME)
            });
        Self(hash)
    }

    /// build a flow identifier from an already computed hash
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

impl From<Ipv4Addr> for FlowId {
    fn from(source: Ipv4Addr) -> Self {
        Self::from_source(source)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
