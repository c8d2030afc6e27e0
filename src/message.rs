//! Protocol vocabulary: peer roles and the messages exchanged between peers.
//!
//! No I/O happens here. [`crate::codec`] turns a [`Message`] into a
//! transport's native unit and back.
//!
//! # Message flow within one round
//!
//! ```text
//!   THINKER                                GUESSER
//!      │ ─────────── THINK <n> ───────────▶  │   secret committed, range is [1, n]
//!      │ ◀────────── GUESS <g> ────────────  │
//!      │ ─────────── RESULT WRONG ────────▶  │   (repeat GUESS / RESULT WRONG)
//!      │ ◀────────── GUESS <g> ────────────  │
//!      │ ─────────── RESULT CORRECT <k> ──▶  │   round over, roles swap
//! ```
//!
//! `END` is sent once by a peer leaving the session, whatever the reason.

use std::fmt;

/// Which side of the game a peer plays during one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Role {
    /// Holds the secret and judges guesses.
    Thinker,
    /// Searches for the secret.
    Guesser,
}

impl Role {
    /// The complementary role.
    pub fn flipped(self) -> Self {
        match self {
            Role::Thinker => Role::Guesser,
            Role::Guesser => Role::Thinker,
        }
    }

    /// Role played in round `round` (0-based) by a peer that started as `initial`.
    ///
    /// Roles flip after every completed round.
    pub fn for_round(initial: Role, round: u32) -> Role {
        if round % 2 == 0 {
            initial
        } else {
            initial.flipped()
        }
    }

    /// The full role sequence for a session of `rounds` rounds.
    pub fn schedule(initial: Role, rounds: u32) -> Vec<Role> {
        (0..rounds).map(|i| Role::for_round(initial, i)).collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Role::Thinker => "thinker",
            Role::Guesser => "guesser",
        })
    }
}

/// The thinker's judgement of one guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The guess matched; `attempts` is the thinker's count for the round.
    Correct { attempts: u32 },
    /// The guess did not match. No direction hint is given.
    Wrong,
}

/// One protocol message.
///
/// Messages carry no round number: a message always belongs to the round
/// both peers are currently in, because every send is answered before the
/// next one is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Thinker has committed to a secret in `[1, upper]`.
    ///
    /// The secret itself never leaves the thinker; the bound lets the
    /// guesser confirm both peers play the same range.
    Think { upper: u32 },
    /// Guesser proposes `value`.
    Guess { value: u32 },
    /// Thinker answers the latest guess.
    Result(Verdict),
    /// Sender is leaving the session.
    End,
}

/// Renders the text-frame form, without the delimiter.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Think { upper } => write!(f, "THINK {upper}"),
            Message::Guess { value } => write!(f, "GUESS {value}"),
            Message::Result(Verdict::Correct { attempts }) => write!(f, "RESULT CORRECT {attempts}"),
            Message::Result(Verdict::Wrong) => write!(f, "RESULT WRONG"),
            Message::End => write!(f, "END"),
        }
    }
}
