use anyhow::anyhow;
use std::{fmt, str};

/// A port of a topology node.
///
/// Ports are local to the node: port `0` on one node has nothing to do
/// with port `0` on its neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(u16);

impl PortId {
    pub const ZERO: Self = PortId::new(0);
    pub const ONE: Self = PortId::new(1);

    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    #[inline]
    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl str::FromStr for PortId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(Self)
            .map_err(|error| anyhow!("Invalid port `{s}': {error}"))
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}
