use anyhow::{bail, ensure};
use logos::{Lexer, Logos};
use std::{fmt, str::FromStr};

/// Size of a retransmission cache, in KiB.
///
/// The percentage shares handed out to flows are computed against
/// [`CacheCapacity::bytes`], i.e. `kb × 1024`.
///
/// # Parsing
///
/// The unit is case insensitive and defaults to kilobytes:
///
/// ```
/// # use gos_core::CacheCapacity;
/// let capacity: CacheCapacity = "64KB".parse().unwrap();
/// assert_eq!(capacity.kb(), 64);
///
/// let capacity: CacheCapacity = "2 mb".parse().unwrap();
/// assert_eq!(capacity.kb(), 2_048);
/// assert_eq!(capacity.to_string(), "2MB");
///
/// let capacity: CacheCapacity = "16".parse().unwrap();
/// assert_eq!(capacity.bytes(), 16 * 1_024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheCapacity(u64);

const K: u64 = 1_024;

impl CacheCapacity {
    /// A cache that cannot hold anything.
    pub const ZERO: Self = Self::from_kb(0);

    #[inline(always)]
    pub const fn from_kb(kb: u64) -> Self {
        Self(kb)
    }

    #[inline(always)]
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb.saturating_mul(K))
    }

    /// the capacity in KiB
    #[inline(always)]
    pub const fn kb(self) -> u64 {
        self.0
    }

    /// the capacity in bytes (`kb × 1024`)
    #[inline(always)]
    pub const fn bytes(self) -> u64 {
        self.0.saturating_mul(K)
    }
}

impl Default for CacheCapacity {
    fn default() -> Self {
        crate::defaults::DEFAULT_CACHE_CAPACITY
    }
}

impl fmt::Display for CacheCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0 && self.0 % K == 0 {
            write!(f, "{}MB", self.0 / K)
        } else {
            write!(f, "{}KB", self.0)
        }
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")] // Ignore this regex pattern between tokens
enum CapacityToken {
    #[regex("[kK][bB]|[kK][iI][bB]")]
    KiloBytes,
    #[regex("[mM][bB]|[mM][iI][bB]")]
    MegaBytes,

    #[regex("[0-9]+")]
    Value,
}

impl FromStr for CacheCapacity {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, CapacityToken>::new(s);

        let Some(Ok(CapacityToken::Value)) = lex.next() else {
            bail!("Expecting cache capacity to start with a number: `{s}'")
        };
        let value: u64 = lex.slice().parse()?;

        let capacity = match lex.next() {
            None | Some(Ok(CapacityToken::KiloBytes)) => Self::from_kb(value),
            Some(Ok(CapacityToken::MegaBytes)) => Self::from_mb(value),
            Some(Ok(CapacityToken::Value)) | Some(Err(())) => {
                bail!("Expecting a unit (KB or MB), failed to parse: `{s}'")
            }
        };

        ensure!(
            lex.next().is_none(),
            "Unexpected trailing input in cache capacity `{s}'"
        );

        Ok(capacity)
    }
}
