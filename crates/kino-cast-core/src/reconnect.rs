//! Reconnection policy
//!
//! A bounded, linear fallback chain. Each restart re-surfaces a platform
//! picker the user has to answer, so there is no backoff schedule: the
//! attempt ceiling is what bounds the prompts.

use crate::types::Protocol;
use serde::{Deserialize, Serialize};

/// Protocols tried on reconnect, in order
pub const FALLBACK_CHAIN: [Protocol; 2] = [Protocol::Chromecast, Protocol::RemotePlayback];

/// Attempt counter for the reconnection chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    /// Claim an attempt; `false` once the ceiling is reached
    ///
    /// The counter never moves past the ceiling.
    pub fn try_begin(&mut self) -> bool {
        if self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Any success clears the counter
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_attempts() {
        let mut policy = ReconnectPolicy::default();
        assert!(policy.try_begin());
        assert!(policy.try_begin());
        assert!(policy.try_begin());
        assert!(policy.is_exhausted());

        assert!(!policy.try_begin());
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn test_reset_on_success() {
        let mut policy = ReconnectPolicy::new(2);
        assert!(policy.try_begin());
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(policy.try_begin());
        assert!(policy.try_begin());
        assert!(!policy.try_begin());
    }

    #[test]
    fn test_zero_ceiling_never_attempts() {
        let mut policy = ReconnectPolicy::new(0);
        assert!(!policy.try_begin());
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_chain_order() {
        assert_eq!(FALLBACK_CHAIN[0], Protocol::Chromecast);
        assert_eq!(FALLBACK_CHAIN[1], Protocol::RemotePlayback);
    }
}
