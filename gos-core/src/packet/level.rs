use crate::defaults::DMGP_PERCENTAGE_BY_LEVEL;
use anyhow::{bail, ensure};
use logos::{Lexer, Logos};
use std::{fmt, str::FromStr};

/// The GoS level a packet is tagged with.
///
/// There are 8 encoded values: the four levels `0..=3`, each with or
/// without a request for a backup LSP. The wire code is
/// `level + 4 × with_backup`.
///
/// Only the level matters to the retransmission cache; the backup flag is
/// consumed by the label distribution logic.
///
/// ```
/// # use gos_core::GosLevel;
/// let level: GosLevel = "2+backup".parse().unwrap();
///
/// assert_eq!(level.level(), 2);
/// assert!(level.requests_backup());
/// assert_eq!(level.code(), 6);
/// assert_eq!(level.dmgp_percentage(), 8);
/// assert_eq!(level.to_string(), "2+backup");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GosLevel(u8);

const BACKUP_FLAG: u8 = 4;
const MAX_LEVEL: u8 = 3;

impl GosLevel {
    /// best effort, no GoS treatment
    pub const LEVEL_0: Self = Self(0);
    pub const LEVEL_1: Self = Self(1);
    pub const LEVEL_2: Self = Self(2);
    /// highest guarantee of service
    pub const LEVEL_3: Self = Self(3);

    /// build a level, returns `None` if `level` is above `3`
    pub const fn new(level: u8, with_backup: bool) -> Option<Self> {
        if level > MAX_LEVEL {
            return None;
        }
        if with_backup {
            Some(Self(level + BACKUP_FLAG))
        } else {
            Some(Self(level))
        }
    }

    /// decode a wire code, returns `None` for codes outside `0..=7`
    pub const fn from_code(code: u8) -> Option<Self> {
        if code > MAX_LEVEL + BACKUP_FLAG {
            None
        } else {
            Some(Self(code))
        }
    }

    #[inline]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// the level, from `0` (best effort) to `3`
    #[inline]
    pub const fn level(self) -> u8 {
        self.0 % BACKUP_FLAG
    }

    #[inline]
    pub const fn requests_backup(self) -> bool {
        self.0 >= BACKUP_FLAG
    }

    /// the same level, asking for a backup LSP
    #[must_use = "function does not modify the current value"]
    pub const fn with_backup(self) -> Self {
        Self(self.level() + BACKUP_FLAG)
    }

    /// whether packets of this level are worth caching at all
    #[inline]
    pub const fn is_guaranteed(self) -> bool {
        self.level() > 0
    }

    /// share of the retransmission cache requested by a flow of this level
    pub const fn dmgp_percentage(self) -> u8 {
        DMGP_PERCENTAGE_BY_LEVEL[self.level() as usize]
    }
}

impl fmt::Display for GosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requests_backup() {
            write!(f, "{}+backup", self.level())
        } else {
            write!(f, "{}", self.level())
        }
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")] // Ignore this regex pattern between tokens
enum LevelToken {
    #[token("+")]
    Plus,
    #[regex("[bB][aA][cC][kK][uU][pP]")]
    Backup,

    #[regex("[0-9]+")]
    Value,
}

impl FromStr for GosLevel {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, LevelToken>::new(s);

        let Some(Ok(LevelToken::Value)) = lex.next() else {
            bail!("Expecting GoS level to start with a number: `{s}'")
        };
        let level: u8 = lex.slice().parse()?;

        let with_backup = match lex.next() {
            None => false,
            Some(Ok(LevelToken::Plus)) => {
                let Some(Ok(LevelToken::Backup)) = lex.next() else {
                    bail!("Expecting `backup' after `+' in GoS level `{s}'")
                };
                true
            }
            Some(_) => bail!("Failed to parse GoS level `{s}'"),
        };

        ensure!(
            lex.next().is_none(),
            "Unexpected trailing input in GoS level `{s}'"
        );

        let Some(gos) = Self::new(level, with_backup) else {
            bail!("GoS level must be between 0 and 3, got {level}")
        };
        Ok(gos)
    }
}
