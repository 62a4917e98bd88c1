use crate::defaults::{REQUEST_ATTEMPTS, REQUEST_TIMEOUT, SESSION_ATTEMPTS, SESSION_TIMEOUT};

/// Timeout credit and retry budget of a signaling exchange.
///
/// Waiting is never a blocking call: the owner of the timer calls
/// [`RetryTimer::decrease`] with the simulated time elapsed since the
/// previous tick, and the credit runs down to zero. Once expired the
/// exchange may be retried ([`RetryTimer::is_due`]) as long as there are
/// attempts left. Re-arming consumes one attempt.
///
/// ```
/// # use gos_core::RetryTimer;
/// let mut timer = RetryTimer::new(100, 1);
///
/// timer.decrease(60);
/// assert!(!timer.is_due());
/// timer.decrease(60);
/// assert!(timer.is_due());
///
/// assert!(timer.rearm());
/// assert_eq!(timer.timeout_credit(), 100);
/// assert_eq!(timer.remaining_attempts(), 0);
///
/// timer.decrease(100);
/// assert!(timer.is_exhausted());
/// assert!(!timer.rearm());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryTimer {
    timeout: u64,
    timeout_credit: u64,
    remaining_attempts: u8,
}

impl RetryTimer {
    pub const fn new(timeout: u64, attempts: u8) -> Self {
        Self {
            timeout,
            timeout_credit: timeout,
            remaining_attempts: attempts,
        }
    }

    /// the budget of a label distribution session
    pub const fn session() -> Self {
        Self::new(SESSION_TIMEOUT, SESSION_ATTEMPTS)
    }

    /// the budget of a GPSRP retransmission request
    pub const fn request() -> Self {
        Self::new(REQUEST_TIMEOUT, REQUEST_ATTEMPTS)
    }

    #[inline]
    pub fn timeout_credit(&self) -> u64 {
        self.timeout_credit
    }

    #[inline]
    pub fn remaining_attempts(&self) -> u8 {
        self.remaining_attempts
    }

    /// consume `delta` time units of credit, floored at zero
    pub fn decrease(&mut self, delta: u64) {
        self.timeout_credit = self.timeout_credit.saturating_sub(delta);
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.timeout_credit == 0
    }

    #[inline]
    pub fn has_attempts(&self) -> bool {
        self.remaining_attempts > 0
    }

    /// the timer expired and there is an attempt left to spend
    #[inline]
    pub fn is_due(&self) -> bool {
        self.has_attempts() && self.is_expired()
    }

    /// the timer expired and there is no attempt left: terminal
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        !self.has_attempts() && self.is_expired()
    }

    /// restore the timeout credit and spend one attempt
    ///
    /// Only effective while [`RetryTimer::is_due`]; returns whether the
    /// timer was re-armed.
    pub fn rearm(&mut self) -> bool {
        if !self.is_due() {
            return false;
        }
        self.timeout_credit = self.timeout;
        self.remaining_attempts -= 1;
        true
    }

    /// restore the timeout credit without spending an attempt
    ///
    /// Used when a new exchange starts (e.g. a label request after a
    /// mapping), not when an exchange is retried.
    pub fn restart(&mut self) {
        self.timeout_credit = self.timeout;
    }
}

impl Default for RetryTimer {
    fn default() -> Self {
        Self::session()
    }
}
