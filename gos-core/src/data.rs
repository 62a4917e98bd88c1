/// Payload carried by a [`Packet`].
///
/// Payloads are never encoded. What the simulation needs is how many
/// bytes the payload weighs so the packet can be charged against its
/// flow's cache quota.
///
/// [`Packet`]: crate::packet::Packet
pub trait Data: Send + 'static {
    /// the payload size in bytes
    ///
    /// A payload of `0` bytes is valid: the packet still weighs its
    /// headers.
    fn bytes_size(&self) -> u64;
}

/// A payload that only declares its size.
///
/// Traffic generators do not care about the payload content, only about
/// how much room it takes in the caches it crosses.
///
/// ```
/// # use gos_core::{Data, Synthetic};
/// assert_eq!(Synthetic(1_500).bytes_size(), 1_500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Synthetic(pub u64);

impl Data for Synthetic {
    fn bytes_size(&self) -> u64 {
        self.0
    }
}

impl Data for () {
    fn bytes_size(&self) -> u64 {
        0
    }
}
impl<const S: usize> Data for [u8; S] {
    fn bytes_size(&self) -> u64 {
        S as u64
    }
}
impl Data for Box<[u8]> {
    fn bytes_size(&self) -> u64 {
        self.len() as u64
    }
}
impl Data for Vec<u8> {
    fn bytes_size(&self) -> u64 {
        self.len() as u64
    }
}
impl Data for &'static str {
    fn bytes_size(&self) -> u64 {
        self.len() as u64
    }
}
impl Data for String {
    fn bytes_size(&self) -> u64 {
        self.len() as u64
    }
}
