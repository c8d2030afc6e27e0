//! Round finite-state machine (FSM) types.
//!
//! Each peer occupies one of two symmetric state sets depending on its role in
//! the current round. Transitions are driven by [`crate::round::RoundEngine`];
//! this module only names the states so the engine can log and assert them.

/// States of the peer holding the secret.
///
/// ```text
///  AwaitingSecret ──commit, THINK──▶ AwaitingGuess ──GUESS──▶ Evaluating
///                                         ▲                      │
///                                         └──── RESULT WRONG ────┤
///                                                                │ RESULT CORRECT
///                                   Exhausted ◀── cap reached ───┤
///                                                                ▼
///                                                          RoundComplete
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkerState {
    /// No secret committed yet.
    AwaitingSecret,
    /// Secret committed; blocked on the next GUESS.
    AwaitingGuess,
    /// Comparing the latest guess against the secret.
    Evaluating,
    /// RESULT CORRECT sent.
    RoundComplete,
    /// The attempt cap was reached without a match.
    Exhausted,
}

/// States of the peer searching for the secret.
///
/// ```text
///  AwaitingThink ──THINK──▶ Proposing ──GUESS──▶ AwaitingResult
///                              ▲                      │
///                              └──── RESULT WRONG ────┤
///                                                     ├── RESULT CORRECT ──▶ RoundComplete
///                                                     └── cap reached ─────▶ Exhausted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuesserState {
    /// Blocked until the thinker commits.
    AwaitingThink,
    /// Choosing the next candidate.
    Proposing,
    /// GUESS sent; blocked on the verdict.
    AwaitingResult,
    /// RESULT CORRECT received.
    RoundComplete,
    /// The attempt cap was reached without a match.
    Exhausted,
}

/// Current state of a peer's round, whichever role it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Thinker(ThinkerState),
    Guesser(GuesserState),
}

impl RoundState {
    /// `true` once the round can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RoundState::Thinker(ThinkerState::RoundComplete | ThinkerState::Exhausted)
                | RoundState::Guesser(GuesserState::RoundComplete | GuesserState::Exhausted)
        )
    }
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundState::Thinker(s) => write!(f, "{s:?}"),
            RoundState::Guesser(s) => write!(f, "{s:?}"),
        }
    }
}
