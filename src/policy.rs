//! Secret selection and guess policies.
//!
//! Feedback in this protocol is binary: a guess is either CORRECT or WRONG,
//! with no "too high / too low" hint. Bisection is therefore unsound, and
//! the policies here only use the range bound and the attempt index:
//!
//! | Policy            | Guess for attempt `k` (0-based)  | Worst case            |
//! |-------------------|----------------------------------|-----------------------|
//! | [`UniformRandom`] | uniform in `[1, N]`, resampled   | unbounded (geometric) |
//! | [`LinearScan`]    | `k mod N + 1`                    | `N` attempts          |
//! | [`FixedGuess`]    | always the same value            | never, if wrong       |

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chooses the next candidate for the guesser.
pub trait GuessPolicy: Send {
    /// Called once when a round starts with range `[1, upper]`.
    fn begin_round(&mut self, _upper: u32) {}

    /// Candidate for attempt `attempt` (0-based). Values outside `[1, upper]`
    /// are clamped by the caller.
    fn next_guess(&mut self, upper: u32, attempt: u32) -> u32;

    fn name(&self) -> &'static str;
}

impl<P: GuessPolicy + ?Sized> GuessPolicy for Box<P> {
    fn begin_round(&mut self, upper: u32) {
        (**self).begin_round(upper)
    }

    fn next_guess(&mut self, upper: u32, attempt: u32) -> u32 {
        (**self).next_guess(upper, attempt)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Picks the thinker's secret.
pub trait SecretOracle: Send {
    /// A secret in `[1, upper]`.
    fn pick(&mut self, upper: u32) -> u32;
}

impl<O: SecretOracle + ?Sized> SecretOracle for Box<O> {
    fn pick(&mut self, upper: u32) -> u32 {
        (**self).pick(upper)
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

// ---------------------------------------------------------------------------
// Guess policies
// ---------------------------------------------------------------------------

/// Independent uniform sample over the whole range on every attempt.
#[derive(Debug, Clone)]
pub struct UniformRandom {
    rng: StdRng,
}

impl UniformRandom {
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: rng_from(seed) }
    }
}

impl GuessPolicy for UniformRandom {
    fn next_guess(&mut self, upper: u32, _attempt: u32) -> u32 {
        self.rng.random_range(1..=upper.max(1))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Walks `1, 2, ..., N` and wraps around.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl GuessPolicy for LinearScan {
    fn next_guess(&mut self, upper: u32, attempt: u32) -> u32 {
        attempt % upper.max(1) + 1
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

/// Always proposes the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedGuess(pub u32);

impl GuessPolicy for FixedGuess {
    fn next_guess(&mut self, _upper: u32, _attempt: u32) -> u32 {
        self.0
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Guess policies selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyKind {
    /// Uniform resampling over `[1, N]`.
    Random,
    /// `1, 2, ..., N` in order; always finishes within `N` attempts.
    Linear,
}

impl PolicyKind {
    pub fn build(self, seed: Option<u64>) -> Box<dyn GuessPolicy> {
        match self {
            PolicyKind::Random => Box::new(UniformRandom::new(seed)),
            PolicyKind::Linear => Box::new(LinearScan),
        }
    }
}

// ---------------------------------------------------------------------------
// Secret oracles
// ---------------------------------------------------------------------------

/// Uniform secret in `[1, N]`.
#[derive(Debug, Clone)]
pub struct RandomOracle {
    rng: StdRng,
}

impl RandomOracle {
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: rng_from(seed) }
    }
}

impl SecretOracle for RandomOracle {
    fn pick(&mut self, upper: u32) -> u32 {
        self.rng.random_range(1..=upper.max(1))
    }
}

/// The same secret every round, clamped into range.
#[derive(Debug, Clone, Copy)]
pub struct FixedSecret(pub u32);

impl SecretOracle for FixedSecret {
    fn pick(&mut self, upper: u32) -> u32 {
        self.0.clamp(1, upper.max(1))
    }
}
