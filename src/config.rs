//! Game configuration shared by both peers.
//!
//! The parent parses the command line into a [`GameConfig`] and the child
//! receives the very same arguments, so both sides derive identical settings.
//! Only the initial role and the random seeds depend on the [`Side`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::message::Role;
use crate::policy::PolicyKind;
use crate::session::SessionConfig;
use crate::transport::Side;

/// Rounds per session when not configured.
pub const DEFAULT_CYCLES: u32 = 10;
/// Answered guesses per round before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
/// Directory holding the FIFO pair.
pub const DEFAULT_FIFO_DIR: &str = "/tmp";

/// Mixed into the child's seed so the two peers draw different sequences.
const CHILD_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Channel used between the two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Two named pipes carrying text frames.
    Fifo,
    /// POSIX real-time signals carrying one word each (Linux only).
    Signal,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Fifo => write!(f, "fifo"),
            TransportKind::Signal => write!(f, "signal"),
        }
    }
}

/// Rejected configuration values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("upper bound N must be a positive integer")]
    ZeroUpper,
    #[error("cycle count must be at least 1")]
    ZeroCycles,
    #[error("attempt cap must be at least 1")]
    ZeroAttempts,
    #[error("peer timeout must be longer than zero")]
    ZeroTimeout,
    #[error("the {0} transport is not available on this platform")]
    UnsupportedTransport(TransportKind),
}

/// Everything a peer needs to play, before the side is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConfig {
    pub upper: u32,
    pub cycles: u32,
    pub max_attempts: u32,
    pub transport: TransportKind,
    pub fifo_dir: PathBuf,
    pub policy: PolicyKind,
    pub seed: Option<u64>,
    /// Role the parent plays in the first round.
    pub first: Role,
    pub peer_timeout: Option<Duration>,
}

impl GameConfig {
    /// Defaults for everything but the range bound.
    pub fn new(upper: u32) -> Self {
        Self {
            upper,
            cycles: DEFAULT_CYCLES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            transport: TransportKind::Fifo,
            fifo_dir: PathBuf::from(DEFAULT_FIFO_DIR),
            policy: PolicyKind::Random,
            seed: None,
            first: Role::Thinker,
            peer_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upper == 0 {
            return Err(ConfigError::ZeroUpper);
        }
        if self.cycles == 0 {
            return Err(ConfigError::ZeroCycles);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.peer_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.transport == TransportKind::Signal && !cfg!(target_os = "linux") {
            return Err(ConfigError::UnsupportedTransport(self.transport));
        }
        Ok(())
    }

    /// Session parameters for `side`; the child starts in the other role.
    pub fn session_config(&self, side: Side) -> SessionConfig {
        SessionConfig {
            upper: self.upper,
            cycles: self.cycles,
            max_attempts: self.max_attempts,
            initial_role: match side {
                Side::Parent => self.first,
                Side::Child => self.first.flipped(),
            },
        }
    }

    /// Seeds for `(oracle, policy)` on `side`, if runs are reproducible.
    pub fn seeds(&self, side: Side) -> (Option<u64>, Option<u64>) {
        let base = self.seed.map(|seed| match side {
            Side::Parent => seed,
            Side::Child => seed ^ CHILD_SEED_SALT,
        });
        (base, base.map(|seed| seed.wrapping_add(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_rejected() {
        assert_eq!(GameConfig::new(0).validate(), Err(ConfigError::ZeroUpper));

        let mut config = GameConfig::new(10);
        assert_eq!(config.validate(), Ok(()));
        config.cycles = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCycles));

        let mut config = GameConfig::new(10);
        config.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroAttempts));

        let mut config = GameConfig::new(10);
        config.peer_timeout = Some(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn sides_start_in_complementary_roles() {
        let mut config = GameConfig::new(5);
        for first in [Role::Thinker, Role::Guesser] {
            config.first = first;
            let parent = config.session_config(Side::Parent);
            let child = config.session_config(Side::Child);
            assert_eq!(parent.initial_role, first);
            assert_eq!(child.initial_role, first.flipped());
            assert_eq!(parent.cycles, child.cycles);
            assert_eq!(parent.upper, child.upper);
        }
    }

    #[test]
    fn seeds_differ_per_side_and_purpose() {
        let mut config = GameConfig::new(5);
        assert_eq!(config.seeds(Side::Parent), (None, None));

        config.seed = Some(1);
        let (parent_oracle, parent_policy) = config.seeds(Side::Parent);
        let (child_oracle, child_policy) = config.seeds(Side::Child);
        assert_eq!(parent_oracle, Some(1));
        assert_eq!(parent_policy, Some(2));
        assert_ne!(parent_oracle, child_oracle);
        assert_ne!(child_oracle, child_policy);
    }
}
