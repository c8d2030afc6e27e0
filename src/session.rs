//! Session controller: a fixed number of rounds with alternating roles.
//!
//! Before round `i` (0-based) a peer's role is derived from its initial role
//! and the parity of `i`, so two peers constructed with complementary
//! initial roles stay complementary for the whole session without
//! exchanging role information.
//!
//! The session ends early on cancellation, attempt exhaustion, END from the
//! partner or a transport failure. However it ends, the peer sends END
//! (unless the partner already did) and closes its transport, so the partner
//! never waits for a round that will not come.
//!
//! A shutdown request reaches both processes at once, and the partner that
//! notices it first sends END and closes. A session given the shutdown token
//! waits [`SHUTDOWN_GRACE`] after losing its partner and reports `Cancelled`
//! if the token trips meanwhile.

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::message::{Message, Role};
use crate::policy::{GuessPolicy, SecretOracle};
use crate::round::{RoundConfig, RoundEngine, RoundError};
use crate::transport::{Transport, TransportError};

/// How long a session that lost its partner waits for its own shutdown
/// request before calling the loss a failure.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Parameters of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub upper: u32,
    pub cycles: u32,
    pub max_attempts: u32,
    /// Role played in the first round; the partner must start with the other.
    pub initial_role: Role,
}

impl SessionConfig {
    fn round_config(&self) -> RoundConfig {
        RoundConfig {
            upper: self.upper,
            max_attempts: self.max_attempts,
        }
    }
}

/// One completed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRecord {
    /// 1-based round number.
    pub index: u32,
    pub role: Role,
    pub attempts: u32,
}

/// Why the session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every configured round completed.
    Completed,
    /// Cancellation was requested.
    Cancelled,
    /// Round `round` (1-based) hit the attempt cap.
    AttemptsExhausted { round: u32, attempts: u32 },
    /// The partner sent END before the last round.
    PeerEnded,
    /// The transport failed or the partner broke the protocol.
    Failed(String),
}

impl SessionOutcome {
    fn from_round_error(err: RoundError, round: u32) -> Self {
        match err {
            RoundError::AttemptsExhausted(attempts) => {
                SessionOutcome::AttemptsExhausted { round, attempts }
            }
            RoundError::PeerEnded => SessionOutcome::PeerEnded,
            RoundError::Transport(TransportError::Cancelled) => SessionOutcome::Cancelled,
            other => SessionOutcome::Failed(other.to_string()),
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Cancelled => write!(f, "cancelled"),
            SessionOutcome::AttemptsExhausted { round, attempts } => {
                write!(f, "round {round} exhausted after {attempts} attempts")
            }
            SessionOutcome::PeerEnded => write!(f, "partner ended the session"),
            SessionOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Rounds played and how the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub rounds: Vec<RoundRecord>,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    pub fn completed_rounds(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn total_attempts(&self) -> u32 {
        self.rounds.iter().map(|r| r.attempts).sum()
    }

    /// Number of completed rounds played as `role`.
    pub fn rounds_as(&self, role: Role) -> usize {
        self.rounds.iter().filter(|r| r.role == role).count()
    }

    /// `true` when the session should end the process with a failure status.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Failed(_))
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Game finished after {} rounds", self.completed_rounds())?;
        for r in &self.rounds {
            writeln!(f, "  round {:>3}: {:<7}  {} attempt(s)", r.index, r.role, r.attempts)?;
        }
        if self.outcome != SessionOutcome::Completed {
            writeln!(f, "  stopped early: {}", self.outcome)?;
        }
        Ok(())
    }
}

/// One peer's side of a session.
pub struct Session<T, O, P> {
    config: SessionConfig,
    transport: T,
    oracle: O,
    policy: P,
    shutdown: Option<CancellationToken>,
}

impl<T, O, P> Session<T, O, P>
where
    T: Transport,
    O: SecretOracle,
    P: GuessPolicy,
{
    pub fn new(config: SessionConfig, transport: T, oracle: O, policy: P) -> Self {
        Self {
            config,
            transport,
            oracle,
            policy,
            shutdown: None,
        }
    }

    /// Attach the token that signals a requested shutdown of this process.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Play until every round completes or the session ends early, then
    /// notify the partner and release the transport.
    pub async fn run(mut self) -> SessionReport {
        let pid = std::process::id();
        let mut rounds = Vec::new();
        let outcome = self.play_rounds(&mut rounds).await;
        let peer_ended = outcome == SessionOutcome::PeerEnded;
        let outcome = settle(self.shutdown.as_ref(), outcome).await;

        match &outcome {
            SessionOutcome::Completed => {
                log::info!("[{pid}] all {} rounds complete", rounds.len())
            }
            SessionOutcome::Cancelled => log::info!("[{pid}] cancelled, shutting down"),
            other => log::warn!("[{pid}] session stopped: {other}"),
        }

        if !peer_ended {
            if let Err(e) = self.transport.send(&Message::End).await {
                log::debug!("[{}] END not delivered: {e}", self.transport.name());
            }
        }
        if let Err(e) = self.transport.close().await {
            log::warn!("[{}] close failed: {e}", self.transport.name());
        }

        SessionReport { rounds, outcome }
    }

    async fn play_rounds(&mut self, rounds: &mut Vec<RoundRecord>) -> SessionOutcome {
        let pid = std::process::id();
        let SessionConfig {
            cycles,
            initial_role,
            ..
        } = self.config;
        let mut engine = RoundEngine::new(&mut self.transport, self.config.round_config());

        for i in 0..cycles {
            let role = Role::for_round(initial_role, i);
            let index = i + 1;
            log::info!("[{pid}] round {index}/{cycles}: playing {role}");

            match engine.play(role, &mut self.oracle, &mut self.policy).await {
                Ok(outcome) => {
                    debug_assert!(engine.state().is_terminal());
                    rounds.push(RoundRecord {
                        index,
                        role,
                        attempts: outcome.attempts,
                    });
                }
                Err(e) => return SessionOutcome::from_round_error(e, index),
            }
            if index < cycles {
                log::info!("[{pid}] switching to {}", role.flipped());
            }
        }
        SessionOutcome::Completed
    }
}

/// A partner lost while this process is shutting down too is part of the
/// same cancellation.
async fn settle(shutdown: Option<&CancellationToken>, outcome: SessionOutcome) -> SessionOutcome {
    let Some(shutdown) = shutdown else {
        return outcome;
    };
    if !matches!(outcome, SessionOutcome::PeerEnded | SessionOutcome::Failed(_)) {
        return outcome;
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, shutdown.cancelled()).await {
        Ok(()) => {
            log::debug!("[{}] partner left during shutdown: {outcome}", std::process::id());
            SessionOutcome::Cancelled
        }
        Err(_) => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u32, role: Role, attempts: u32) -> RoundRecord {
        RoundRecord {
            index,
            role,
            attempts,
        }
    }

    #[test]
    fn report_aggregates_rounds() {
        let report = SessionReport {
            rounds: vec![
                record(1, Role::Thinker, 4),
                record(2, Role::Guesser, 1),
                record(3, Role::Thinker, 9),
            ],
            outcome: SessionOutcome::Completed,
        };
        assert_eq!(report.completed_rounds(), 3);
        assert_eq!(report.total_attempts(), 14);
        assert_eq!(report.rounds_as(Role::Thinker), 2);
        assert!(!report.is_failure());
        assert!(SessionReport {
            rounds: Vec::new(),
            outcome: SessionOutcome::Failed("partner is gone".into()),
        }
        .is_failure());

        let text = report.to_string();
        assert!(text.starts_with("Game finished after 3 rounds\n"));
        assert!(!text.contains("stopped early"));
    }

    #[test]
    fn early_stop_is_reported() {
        let report = SessionReport {
            rounds: vec![record(1, Role::Guesser, 2)],
            outcome: SessionOutcome::AttemptsExhausted {
                round: 2,
                attempts: 100,
            },
        };
        let text = report.to_string();
        assert!(text.contains("Game finished after 1 rounds"));
        assert!(text.contains("stopped early: round 2 exhausted after 100 attempts"));
    }

    #[test]
    fn round_errors_map_to_outcomes() {
        assert_eq!(
            SessionOutcome::from_round_error(RoundError::Transport(TransportError::Cancelled), 1),
            SessionOutcome::Cancelled
        );
        assert_eq!(
            SessionOutcome::from_round_error(RoundError::PeerEnded, 4),
            SessionOutcome::PeerEnded
        );
        assert!(matches!(
            SessionOutcome::from_round_error(RoundError::Transport(TransportError::PeerGone), 2),
            SessionOutcome::Failed(_)
        ));
        assert!(matches!(
            SessionOutcome::from_round_error(RoundError::BoundMismatch { local: 1, remote: 2 }, 1),
            SessionOutcome::Failed(_)
        ));
    }
}
