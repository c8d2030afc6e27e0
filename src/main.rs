//! Entry point for `guess-duet`.
//!
//! Parses CLI arguments and runs one peer. Started by a user it is the
//! parent and spawns its own child; the hidden `--partner-pid` flag marks
//! the child. All protocol work is delegated to library modules; `main.rs`
//! owns only process setup (logging, signal masks, FIFO files, runtime).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;

use guess_duet::config::{
    GameConfig, TransportKind, DEFAULT_CYCLES, DEFAULT_FIFO_DIR, DEFAULT_MAX_ATTEMPTS,
};
use guess_duet::fifo::{FifoArtifacts, FifoPaths};
use guess_duet::message::Role;
use guess_duet::peer::{self, CHILD_GRACE};
use guess_duet::policy::PolicyKind;
use guess_duet::session::{SessionOutcome, SessionReport};
use guess_duet::transport::Side;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Two processes take turns thinking of and guessing a number in [1, N].
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Upper bound N of the secret's range [1, N].
    #[arg(value_name = "N")]
    upper: u32,

    /// Number of rounds to play.
    #[arg(short, long, default_value_t = DEFAULT_CYCLES)]
    cycles: u32,

    /// Guesses allowed per round before the session is abandoned.
    #[arg(short = 'a', long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Channel between the two processes.
    #[arg(short, long, value_enum, default_value_t = TransportKind::Fifo)]
    transport: TransportKind,

    /// Directory for the FIFO pair.
    #[arg(long, default_value = DEFAULT_FIFO_DIR)]
    fifo_dir: PathBuf,

    /// How the guesser picks candidates.
    #[arg(short, long, value_enum, default_value_t = PolicyKind::Random)]
    policy: PolicyKind,

    /// Seed for reproducible secrets and guesses.
    #[arg(long)]
    seed: Option<u64>,

    /// Role the parent plays in the first round.
    #[arg(long, value_enum, default_value_t = Role::Thinker)]
    first: Role,

    /// Give up when the partner stays silent this many seconds.
    #[arg(long, value_name = "SECS")]
    peer_timeout: Option<u64>,

    #[arg(long, hide = true)]
    partner_pid: Option<i32>,
}

impl Cli {
    fn game_config(&self) -> GameConfig {
        GameConfig {
            upper: self.upper,
            cycles: self.cycles,
            max_attempts: self.max_attempts,
            transport: self.transport,
            fifo_dir: self.fifo_dir.clone(),
            policy: self.policy,
            seed: self.seed,
            first: self.first,
            peer_timeout: self.peer_timeout.map(Duration::from_secs),
        }
    }
}

fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.game_config();
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return ExitCode::from(EXIT_USAGE);
    }

    match run(&config, cli.partner_pid.map(Pid::from_raw)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("[{}] {e:#}", std::process::id());
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(config: &GameConfig, parent: Option<Pid>) -> anyhow::Result<u8> {
    let side = match parent {
        Some(_) => Side::Child,
        None => Side::Parent,
    };

    // Before any thread exists, so the runtime and watcher threads inherit it.
    block_signals_if_needed(config)?;

    // The parent creates the FIFOs; both peers remove them on the way out.
    let _artifacts = match config.transport {
        TransportKind::Fifo => {
            let paths = FifoPaths::in_dir(&config.fifo_dir);
            if side == Side::Parent {
                paths.create()?;
            }
            Some(FifoArtifacts::new(paths))
        }
        TransportKind::Signal => None,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        peer::watch_termination(cancel.clone()).context("installing termination handlers")?;

        let (partner, mut child) = match parent {
            Some(parent) => (parent, None),
            None => {
                let args: Vec<_> = std::env::args_os().skip(1).collect();
                let child = peer::spawn_child(&args, nix::unistd::getpid())
                    .context("spawning child peer")?;
                (Pid::from_raw(child.id() as i32), Some(child))
            }
        };

        let result = peer::run_peer(config, side, partner, cancel).await;

        let mut child_status = None;
        if let Some(child) = child.as_mut() {
            match peer::reap_child(child, CHILD_GRACE).await {
                Ok(status) => {
                    log::info!("[peer] child {} exited: {status}", child.id());
                    child_status = Some(status);
                }
                Err(e) => log::warn!("[peer] could not reap child {}: {e}", child.id()),
            }
        }

        match result {
            Ok(report) => {
                let code = finish(side, &report);
                // The child may have failed after telling us it was leaving.
                let child_code = match report.outcome {
                    SessionOutcome::PeerEnded => child_status.and_then(peer::child_failure),
                    _ => None,
                };
                Ok(child_code.unwrap_or(code))
            }
            Err(e) if !e.is_fatal() => Ok(EXIT_CANCELLED),
            Err(e) => Err(anyhow::Error::new(e).context(format!("{side} could not connect"))),
        }
    })
}

#[cfg(target_os = "linux")]
fn block_signals_if_needed(config: &GameConfig) -> anyhow::Result<()> {
    if config.transport == TransportKind::Signal {
        guess_duet::signals::block_protocol_signals().context("blocking protocol signals")?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn block_signals_if_needed(_config: &GameConfig) -> anyhow::Result<()> {
    Ok(())
}

fn finish(side: Side, report: &SessionReport) -> u8 {
    print!("[{side} {}] {report}", std::process::id());
    if report.is_failure() {
        EXIT_FAILURE
    } else if report.outcome == SessionOutcome::Cancelled {
        EXIT_CANCELLED
    } else {
        0
    }
}
