//! `guess-duet` — two processes taking turns at a number-guessing game over
//! Unix FIFOs or POSIX real-time signals.
//!
//! The game is the vehicle; the point is the turn protocol that keeps two
//! independent processes in lock-step over either channel and shuts both
//! down cleanly on cancellation.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────────┐                     ┌─────────────────────┐
//!  │  Session (parent)   │                     │  Session (child)    │
//!  │  rounds, role flips │                     │  rounds, role flips │
//!  └────┬────────────────┘                     └────────────────┬────┘
//!       │                                                       │
//!  ┌────▼────────────────┐                     ┌────────────────▼────┐
//!  │  RoundEngine        │                     │  RoundEngine        │
//!  │  thinker / guesser  │                     │  guesser / thinker  │
//!  └────┬────────────────┘                     └────────────────┬────┘
//!       │ Message                                       Message │
//!  ┌────▼────────────────┐  frames or signals  ┌────────────────▼────┐
//!  │  Transport + codec  │◀───────────────────▶│  Transport + codec  │
//!  └─────────────────────┘                     └─────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]    roles and the protocol messages
//! - [`codec`]      text frames and signal units
//! - [`transport`]  transport trait, errors, cancellable waits
//! - [`fifo`]       stream transport over two named pipes
//! - [`signals`]    out-of-band transport over real-time signals (Linux)
//! - [`loopback`]   in-process transport for tests
//! - [`state`]      round finite-state-machine types
//! - [`policy`]     secret oracle and guess policies
//! - [`round`]      one round between thinker and guesser
//! - [`session`]    a fixed number of rounds and the final report
//! - [`config`]     settings shared by both peers
//! - [`peer`]       child spawning, termination signals, reaping

pub mod codec;
pub mod config;
pub mod fifo;
pub mod loopback;
pub mod message;
pub mod peer;
pub mod policy;
pub mod round;
pub mod session;
#[cfg(target_os = "linux")]
pub mod signals;
pub mod state;
pub mod transport;
