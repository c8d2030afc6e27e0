//! Round engine: one secret-commit-then-search cycle over a [`Transport`].
//!
//! Both peers run the same engine with complementary roles. Every transition
//! performs at most one send and at most one blocking receive, so the two
//! engines advance in strict alternation:
//!
//! ```text
//!   thinker                                          guesser
//!   AwaitingSecret ── pick secret                    AwaitingThink
//!        │ send THINK <N> ───────────────────────────────▶ │
//!   AwaitingGuess                                    Proposing ── policy
//!        │ ◀─────────────────────────────── send GUESS <g> │
//!   Evaluating                                       AwaitingResult
//!        │ send RESULT WRONG ────────────────────────────▶ │ (back to Proposing)
//!        │ send RESULT CORRECT <k> ──────────────────────▶ │
//!   RoundComplete                                    RoundComplete
//! ```
//!
//! Both sides count one attempt per answered guess, so when the cap is
//! reached they agree on it without exchanging anything further and both end
//! in `Exhausted`.
//!
//! Messages that do not fit the current state (a stray THINK mid-round, a
//! GUESS while awaiting a verdict) are logged and ignored. END from the
//! partner ends the round with [`RoundError::PeerEnded`].

use thiserror::Error;

use crate::message::{Message, Role, Verdict};
use crate::policy::{GuessPolicy, SecretOracle};
use crate::state::{GuesserState, RoundState, ThinkerState};
use crate::transport::{Transport, TransportError};

/// Parameters shared by both peers for every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundConfig {
    /// Secrets and guesses lie in `[1, upper]`.
    pub upper: u32,
    /// Answered guesses allowed before the round is abandoned.
    pub max_attempts: u32,
}

/// A round that ended with a correct guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Role this peer played.
    pub role: Role,
    /// Attempts counted by the thinker, including the correct one.
    pub attempts: u32,
}

/// Ways a round can end without a correct guess.
#[derive(Error, Debug)]
pub enum RoundError {
    #[error("no correct guess within {0} attempts")]
    AttemptsExhausted(u32),
    #[error("partner ended the session")]
    PeerEnded,
    #[error("the range [1, 0] is empty")]
    EmptyRange,
    #[error("partner plays the range [1, {remote}] but this peer uses [1, {local}]")]
    BoundMismatch { local: u32, remote: u32 },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Drives rounds over a borrowed transport.
pub struct RoundEngine<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    config: RoundConfig,
    state: RoundState,
    pid: u32,
}

impl<'a, T: Transport + ?Sized> RoundEngine<'a, T> {
    pub fn new(transport: &'a mut T, config: RoundConfig) -> Self {
        Self {
            transport,
            config,
            state: RoundState::Thinker(ThinkerState::AwaitingSecret),
            pid: std::process::id(),
        }
    }

    /// State reached by the last round played.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Play one round in `role`.
    ///
    /// The oracle is consulted only as thinker and the policy only as
    /// guesser. A config with `upper == 0` fails with
    /// [`RoundError::EmptyRange`] before anything is sent.
    pub async fn play<O, P>(
        &mut self,
        role: Role,
        oracle: &mut O,
        policy: &mut P,
    ) -> Result<RoundOutcome, RoundError>
    where
        O: SecretOracle + ?Sized,
        P: GuessPolicy + ?Sized,
    {
        if self.config.upper == 0 {
            return Err(RoundError::EmptyRange);
        }
        let attempts = match role {
            Role::Thinker => self.think(oracle).await?,
            Role::Guesser => self.guess(policy).await?,
        };
        Ok(RoundOutcome { role, attempts })
    }

    fn enter(&mut self, next: RoundState) {
        log::debug!("[round] {} → {}", self.state, next);
        self.state = next;
    }

    // -----------------------------------------------------------------------
    // Thinker
    // -----------------------------------------------------------------------

    async fn think<O: SecretOracle + ?Sized>(&mut self, oracle: &mut O) -> Result<u32, RoundError> {
        self.state = RoundState::Thinker(ThinkerState::AwaitingSecret);
        let RoundConfig { upper, max_attempts } = self.config;

        let secret = oracle.pick(upper).clamp(1, upper);
        log::info!("[{}] thinking of a number in [1, {upper}]", self.pid);
        log::debug!("[round] secret is {secret}");
        self.transport.send(&Message::Think { upper }).await?;
        self.enter(RoundState::Thinker(ThinkerState::AwaitingGuess));

        let mut attempts = 0;
        loop {
            let value = match self.transport.receive().await? {
                Message::Guess { value } => value,
                Message::End => return Err(RoundError::PeerEnded),
                other => {
                    log::warn!("[round] thinker ignoring unexpected {other}");
                    continue;
                }
            };
            attempts += 1;
            self.enter(RoundState::Thinker(ThinkerState::Evaluating));

            if value == secret {
                self.transport
                    .send(&Message::Result(Verdict::Correct { attempts }))
                    .await?;
                self.enter(RoundState::Thinker(ThinkerState::RoundComplete));
                log::info!(
                    "[{}] partner guessed {value} correctly after {attempts} attempt(s)",
                    self.pid
                );
                return Ok(attempts);
            }

            self.transport.send(&Message::Result(Verdict::Wrong)).await?;
            log::info!(
                "[{}] partner guessed {value}: wrong ({attempts}/{max_attempts})",
                self.pid
            );
            if attempts >= max_attempts {
                self.enter(RoundState::Thinker(ThinkerState::Exhausted));
                return Err(RoundError::AttemptsExhausted(attempts));
            }
            self.enter(RoundState::Thinker(ThinkerState::AwaitingGuess));
        }
    }

    // -----------------------------------------------------------------------
    // Guesser
    // -----------------------------------------------------------------------

    async fn guess<P: GuessPolicy + ?Sized>(&mut self, policy: &mut P) -> Result<u32, RoundError> {
        self.state = RoundState::Guesser(GuesserState::AwaitingThink);
        let RoundConfig { upper, max_attempts } = self.config;

        loop {
            match self.transport.receive().await? {
                Message::Think { upper: remote } if remote == upper => break,
                Message::Think { upper: remote } => {
                    return Err(RoundError::BoundMismatch {
                        local: upper,
                        remote,
                    })
                }
                Message::End => return Err(RoundError::PeerEnded),
                other => log::warn!("[round] guesser ignoring {other} before THINK"),
            }
        }
        policy.begin_round(upper);

        let mut attempts = 0;
        loop {
            self.enter(RoundState::Guesser(GuesserState::Proposing));
            let value = policy.next_guess(upper, attempts).clamp(1, upper);
            self.transport.send(&Message::Guess { value }).await?;
            attempts += 1;
            self.enter(RoundState::Guesser(GuesserState::AwaitingResult));

            let verdict = loop {
                match self.transport.receive().await? {
                    Message::Result(verdict) => break verdict,
                    Message::End => return Err(RoundError::PeerEnded),
                    other => log::warn!("[round] guesser ignoring unexpected {other}"),
                }
            };

            match verdict {
                Verdict::Correct { attempts: counted } => {
                    if counted != attempts {
                        log::warn!(
                            "[round] thinker counted {counted} attempts, this peer counted {attempts}"
                        );
                    }
                    self.enter(RoundState::Guesser(GuesserState::RoundComplete));
                    log::info!(
                        "[{}] guessed {value} correctly after {counted} attempt(s)",
                        self.pid
                    );
                    return Ok(counted);
                }
                Verdict::Wrong => {
                    log::info!(
                        "[{}] guessed {value}: wrong ({attempts}/{max_attempts}, policy {})",
                        self.pid,
                        policy.name()
                    );
                    if attempts >= max_attempts {
                        self.enter(RoundState::Guesser(GuesserState::Exhausted));
                        return Err(RoundError::AttemptsExhausted(attempts));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::loopback::Loopback;
    use crate::policy::{FixedGuess, FixedSecret, LinearScan};

    fn config(upper: u32, max_attempts: u32) -> RoundConfig {
        RoundConfig { upper, max_attempts }
    }

    /// Play one round between two engines; `a` thinks, `b` guesses.
    async fn play_pair(
        cfg: RoundConfig,
        secret: u32,
        policy: &mut dyn GuessPolicy,
    ) -> (Result<RoundOutcome, RoundError>, Result<RoundOutcome, RoundError>) {
        let cancel = CancellationToken::new();
        let (mut a, mut b) = Loopback::pair(&cancel);
        let mut thinker = RoundEngine::new(&mut a, cfg);
        let mut guesser = RoundEngine::new(&mut b, cfg);
        let (mut oracle, mut unused_policy, mut unused_oracle) =
            (FixedSecret(secret), LinearScan, FixedSecret(1));
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                thinker.play(Role::Thinker, &mut oracle, &mut unused_policy),
                guesser.play(Role::Guesser, &mut unused_oracle, policy),
            )
        })
        .await
        .expect("round did not finish")
    }

    #[tokio::test]
    async fn immediate_correct_guess_takes_one_attempt() {
        let (t, g) = play_pair(config(10, 100), 7, &mut FixedGuess(7)).await;
        let t = t.unwrap();
        let g = g.unwrap();
        assert_eq!(t, RoundOutcome { role: Role::Thinker, attempts: 1 });
        assert_eq!(g, RoundOutcome { role: Role::Guesser, attempts: 1 });
    }

    #[tokio::test]
    async fn thinker_answers_correct_with_attempt_count() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);

        let peer_side = async {
            assert_eq!(peer.receive().await.unwrap(), Message::Think { upper: 10 });
            peer.send(&Message::Guess { value: 7 }).await.unwrap();
            peer.receive().await.unwrap()
        };
        let mut engine = RoundEngine::new(&mut engine_end, config(10, 100));
        let (mut oracle, mut policy) = (FixedSecret(7), LinearScan);
        let (outcome, reply) = tokio::join!(
            engine.play(Role::Thinker, &mut oracle, &mut policy),
            peer_side
        );

        assert_eq!(outcome.unwrap().attempts, 1);
        assert_eq!(reply, Message::Result(Verdict::Correct { attempts: 1 }));
        assert_eq!(
            engine.state(),
            RoundState::Thinker(ThinkerState::RoundComplete)
        );
    }

    #[tokio::test]
    async fn range_of_one_completes_in_one_attempt() {
        for mut policy in [
            Box::new(FixedGuess(99)) as Box<dyn GuessPolicy>,
            Box::new(LinearScan),
            Box::new(crate::policy::UniformRandom::new(None)),
        ] {
            let (t, g) = play_pair(config(1, 100), 1, &mut policy).await;
            assert_eq!(t.unwrap().attempts, 1);
            assert_eq!(g.unwrap().attempts, 1);
        }
    }

    #[tokio::test]
    async fn wrong_fixed_guess_exhausts_after_cap() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);

        let peer_side = async {
            let mut replies = Vec::new();
            assert!(matches!(peer.receive().await.unwrap(), Message::Think { .. }));
            for _ in 0..3 {
                peer.send(&Message::Guess { value: 2 }).await.unwrap();
                replies.push(peer.receive().await.unwrap());
            }
            replies
        };
        let thinking = async {
            let mut engine = RoundEngine::new(&mut engine_end, config(10, 3));
            let outcome = engine
                .play(Role::Thinker, &mut FixedSecret(7), &mut LinearScan)
                .await;
            (outcome, engine.state())
        };
        let ((outcome, state), replies) = tokio::join!(thinking, peer_side);

        assert!(matches!(outcome, Err(RoundError::AttemptsExhausted(3))));
        assert_eq!(state, RoundState::Thinker(ThinkerState::Exhausted));
        assert_eq!(replies, vec![Message::Result(Verdict::Wrong); 3]);
        drop(engine_end);
        // Nothing else was sent: the channel just closes.
        assert!(matches!(peer.receive().await, Err(TransportError::PeerGone)));
    }

    #[tokio::test]
    async fn both_sides_agree_on_exhaustion() {
        let (t, g) = play_pair(config(10, 3), 7, &mut FixedGuess(2)).await;
        assert!(matches!(t, Err(RoundError::AttemptsExhausted(3))));
        assert!(matches!(g, Err(RoundError::AttemptsExhausted(3))));
    }

    #[tokio::test]
    async fn every_round_ends_correct_xor_exhausted() {
        // Linear scan hits secret s on attempt s.
        for upper in 1..=6 {
            for cap in 1..=4 {
                for secret in 1..=upper {
                    let (t, g) = play_pair(config(upper, cap), secret, &mut LinearScan).await;
                    if secret <= cap {
                        assert_eq!(t.unwrap().attempts, secret);
                        assert_eq!(g.unwrap().attempts, secret);
                    } else {
                        assert!(matches!(t, Err(RoundError::AttemptsExhausted(n)) if n == cap));
                        assert!(matches!(g, Err(RoundError::AttemptsExhausted(n)) if n == cap));
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn malformed_and_stray_frames_do_not_count_as_attempts() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);
        let injector = peer.partner_injector();

        let peer_side = async {
            peer.receive().await.unwrap();
            assert!(injector.inject("GUESS seven"));
            assert!(injector.inject("BOGUS"));
            peer.send(&Message::Think { upper: 3 }).await.unwrap();
            peer.send(&Message::Guess { value: 7 }).await.unwrap();
            peer.receive().await.unwrap()
        };
        let mut engine = RoundEngine::new(&mut engine_end, config(10, 100));
        let (mut oracle, mut policy) = (FixedSecret(7), LinearScan);
        let (outcome, reply) = tokio::join!(
            engine.play(Role::Thinker, &mut oracle, &mut policy),
            peer_side
        );

        assert_eq!(outcome.unwrap().attempts, 1);
        assert_eq!(reply, Message::Result(Verdict::Correct { attempts: 1 }));
    }

    #[tokio::test]
    async fn guesser_stops_on_end() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);
        peer.send(&Message::End).await.unwrap();

        let mut engine = RoundEngine::new(&mut engine_end, config(10, 100));
        let outcome = engine
            .play(Role::Guesser, &mut FixedSecret(1), &mut LinearScan)
            .await;
        assert!(matches!(outcome, Err(RoundError::PeerEnded)));
    }

    #[tokio::test]
    async fn guesser_rejects_foreign_range() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);
        peer.send(&Message::Think { upper: 20 }).await.unwrap();

        let mut engine = RoundEngine::new(&mut engine_end, config(10, 100));
        let outcome = engine
            .play(Role::Guesser, &mut FixedSecret(1), &mut LinearScan)
            .await;
        assert!(matches!(
            outcome,
            Err(RoundError::BoundMismatch { local: 10, remote: 20 })
        ));
    }

    #[tokio::test]
    async fn empty_range_is_rejected_without_sending() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);

        let mut engine = RoundEngine::new(&mut engine_end, config(0, 5));
        for role in [Role::Thinker, Role::Guesser] {
            let outcome = engine.play(role, &mut FixedSecret(3), &mut FixedGuess(3)).await;
            assert!(matches!(outcome, Err(RoundError::EmptyRange)));
        }
        drop(engine_end);
        assert!(matches!(peer.receive().await, Err(TransportError::PeerGone)));
    }

    #[tokio::test]
    async fn guesser_clamps_out_of_range_policy() {
        let cancel = CancellationToken::new();
        let (mut engine_end, mut peer) = Loopback::pair(&cancel);

        let peer_side = async {
            peer.send(&Message::Think { upper: 5 }).await.unwrap();
            let guess = peer.receive().await.unwrap();
            peer.send(&Message::Result(Verdict::Correct { attempts: 1 }))
                .await
                .unwrap();
            guess
        };
        let mut engine = RoundEngine::new(&mut engine_end, config(5, 100));
        let (mut oracle, mut policy) = (FixedSecret(1), FixedGuess(40));
        let (outcome, guess) = tokio::join!(
            engine.play(Role::Guesser, &mut oracle, &mut policy),
            peer_side
        );
        assert_eq!(guess, Message::Guess { value: 5 });
        assert_eq!(outcome.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn cancellation_unblocks_waiting_guesser() {
        let cancel = CancellationToken::new();
        let (mut engine_end, _peer) = Loopback::pair(&cancel);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut engine = RoundEngine::new(&mut engine_end, config(10, 100));
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            engine.play(Role::Guesser, &mut FixedSecret(1), &mut LinearScan),
        )
        .await
        .expect("guesser did not observe cancellation");
        assert!(matches!(
            outcome,
            Err(RoundError::Transport(TransportError::Cancelled))
        ));
    }
}
