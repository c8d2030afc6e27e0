//! Process plumbing around a session.
//!
//! ```text
//!  parent                                        child
//!  ──────                                        ─────
//!  block protocol signals (signal transport)
//!  create FIFOs (fifo transport)
//!  spawn_child ─── same argv + --partner-pid ──▶ block protocol signals
//!  run_peer                                      run_peer
//!   └ connect ◀──────── handshake / open ──────▶  └ connect
//!   └ Session::run ◀──── rounds, END ──────────▶  └ Session::run
//!  reap_child ◀──────────── exit ─────────────── remove FIFOs, exit
//!  remove FIFOs
//! ```
//!
//! SIGINT and SIGTERM trip a [`CancellationToken`] that every transport wait
//! observes, so a peer blocked on its partner still shuts down promptly.

use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{GameConfig, TransportKind};
use crate::fifo::{FifoPaths, FifoTransport};
use crate::policy::RandomOracle;
use crate::session::{Session, SessionReport};
use crate::transport::{Side, Transport, TransportError};

/// Hidden flag that marks a process as the child and names its parent.
pub const PARTNER_PID_FLAG: &str = "--partner-pid";

/// How long the parent waits for the child to exit before sending SIGTERM.
pub const CHILD_GRACE: Duration = Duration::from_secs(5);

const REAP_POLL: Duration = Duration::from_millis(50);

/// Connect to the partner and play a full session.
///
/// Fails only if the transport cannot be set up; everything after that is
/// reported through the returned [`SessionReport`].
pub async fn run_peer(
    config: &GameConfig,
    side: Side,
    partner: Pid,
    cancel: CancellationToken,
) -> Result<SessionReport, TransportError> {
    let session_config = config.session_config(side);
    let (oracle_seed, policy_seed) = config.seeds(side);

    let transport = connect(config, side, partner, cancel.clone()).await?;
    log::info!(
        "[{}] {side} connected to {partner} over {}, first round as {}",
        std::process::id(),
        transport.name(),
        session_config.initial_role
    );

    let session = Session::new(
        session_config,
        transport,
        RandomOracle::new(oracle_seed),
        config.policy.build(policy_seed),
    )
    .with_shutdown(cancel);
    Ok(session.run().await)
}

async fn connect(
    config: &GameConfig,
    side: Side,
    partner: Pid,
    cancel: CancellationToken,
) -> Result<Box<dyn Transport>, TransportError> {
    match config.transport {
        TransportKind::Fifo => {
            let paths = FifoPaths::in_dir(&config.fifo_dir);
            let transport = FifoTransport::connect(&paths, side, cancel, config.peer_timeout).await?;
            Ok(Box::new(transport))
        }
        #[cfg(target_os = "linux")]
        TransportKind::Signal => {
            let transport = crate::signals::SignalTransport::connect(
                partner,
                side,
                cancel,
                config.peer_timeout,
            )
            .await?;
            Ok(Box::new(transport))
        }
        #[cfg(not(target_os = "linux"))]
        TransportKind::Signal => {
            let _ = partner;
            Err(TransportError::Setup(
                "the signal transport requires Linux".into(),
            ))
        }
    }
}

/// Cancel `cancel` on the first SIGINT or SIGTERM.
///
/// Must be called from within a tokio runtime.
pub fn watch_termination(cancel: CancellationToken) -> io::Result<JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("[{}] interrupted", std::process::id()),
            _ = terminate.recv() => log::info!("[{}] terminated", std::process::id()),
            () = cancel.cancelled() => return,
        }
        cancel.cancel();
    }))
}

/// Re-execute this binary as the child peer.
///
/// `args` are the parent's own arguments (without the program name), so
/// both peers parse the same configuration.
pub fn spawn_child(args: &[OsString], parent: Pid) -> io::Result<Child> {
    let exe = std::env::current_exe()?;
    let child = Command::new(exe)
        .args(args)
        .arg(PARTNER_PID_FLAG)
        .arg(parent.to_string())
        .stdin(Stdio::null())
        .spawn()?;
    log::debug!("[peer] spawned child {}", child.id());
    Ok(child)
}

/// Wait for the child to exit, sending SIGTERM once `grace` passes and
/// SIGKILL after a second `grace`.
pub async fn reap_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = wait_until(child, grace).await? {
        return Ok(status);
    }

    let pid = Pid::from_raw(child.id() as i32);
    log::warn!("[peer] child {pid} still running after {grace:?}, sending SIGTERM");
    match kill(pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(status) = wait_until(child, grace).await? {
        return Ok(status);
    }

    log::warn!("[peer] child {pid} ignored SIGTERM, killing");
    child.kill()?;
    child.wait()
}

/// Exit code to report for a child that did not succeed, or `None` if it did.
///
/// A child killed by a signal maps to `128 + signal`, as a shell would.
pub fn child_failure(status: ExitStatus) -> Option<u8> {
    if status.success() {
        return None;
    }
    match (status.code(), status.signal()) {
        (Some(code), _) => Some(u8::try_from(code).unwrap_or(1)),
        (None, Some(signal)) => Some(u8::try_from(128 + signal).unwrap_or(1)),
        (None, None) => Some(1),
    }
}

async fn wait_until(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(REAP_POLL).await;
    }
}
