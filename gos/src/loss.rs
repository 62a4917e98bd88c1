use logos::{Lexer, Logos};
use rand_core::Rng;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Probability for a packet to be lost on a link of the simulation.
///
/// Only GoS data packets are subject to loss: the signaling and the
/// retransmission protocol itself are assumed reliable.
///
/// ```
/// use gos::LinkLoss;
///
/// let loss: LinkLoss = "5%".parse().unwrap();
/// assert_eq!(loss, LinkLoss::new(0.05).unwrap());
/// assert_eq!(loss.to_string(), "5%");
///
/// assert_eq!("0%".parse::<LinkLoss>().unwrap(), LinkLoss::NONE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct LinkLoss(f64);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkLossError {
    #[error("link loss must be in [0%, 100%], got {0}")]
    OutOfRange(f64),
    #[error("expecting a percentage (e.g. `5%'), failed to parse `{0}'")]
    InvalidPercentage(String),
}

impl LinkLoss {
    pub const NONE: Self = Self(0.0);

    /// a loss rate in `[0.0, 1.0]`, NaN is rejected
    pub fn new(rate: f64) -> Result<Self, LinkLossError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(LinkLossError::OutOfRange(rate * 100.0));
        }
        Ok(Self(rate))
    }

    #[inline]
    pub fn rate(self) -> f64 {
        self.0
    }

    /// Draw whether the next packet is lost.
    ///
    /// The caller owns the generator so the whole simulation draws from
    /// one seeded source and is reproducible.
    pub fn should_drop<R: Rng>(&self, rng: &mut R) -> bool {
        if self.0 == 0.0 {
            return false;
        }
        let sample = (rng.next_u64() as f64) * (1.0 / (u64::MAX as f64 + 1.0));
        sample < self.0
    }
}

impl fmt::Display for LinkLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent = self.0 * 100.0;
        if percent.fract() == 0.0 {
            write!(f, "{}%", percent as u64)
        } else {
            write!(f, "{percent:.2}%")
        }
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")]
enum LossToken {
    #[token("%")]
    Percent,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Value,
}

impl FromStr for LinkLoss {
    type Err = LinkLossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkLossError::InvalidPercentage(s.to_owned());
        let mut lex = Lexer::<'_, LossToken>::new(s);

        let Some(Ok(LossToken::Value)) = lex.next() else {
            return Err(invalid());
        };
        let percent: f64 = lex.slice().parse().map_err(|_| invalid())?;

        let Some(Ok(LossToken::Percent)) = lex.next() else {
            return Err(invalid());
        };
        if lex.next().is_some() {
            return Err(invalid());
        }

        Self::new(percent / 100.0)
    }
}
