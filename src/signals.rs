//! Out-of-band transport over POSIX real-time signals.
//!
//! Every message is one `sigqueue(2)` call: the signal number names the kind
//! and the `sigval` word carries the argument (see [`SignalCodec`]).
//!
//! ```text
//!   peer process                                   partner process
//!  ┌──────────────────────────────┐              ┌─────────────────┐
//!  │ RoundEngine                  │  sigqueue    │                 │
//!  │   send() ────────────────────┼─────────────▶│ watcher thread  │
//!  │   receive() ◀── mpsc ◀──┐    │              │       ...       │
//!  │                         │    │◀─────────────┼──── sigqueue    │
//!  │ watcher thread ─────────┘    │              │                 │
//!  │   sigtimedwait(protocol set) │              │                 │
//!  └──────────────────────────────┘              └─────────────────┘
//! ```
//!
//! No signal handler is installed. The protocol signals stay blocked in every
//! thread ([`block_protocol_signals`] must run before the tokio runtime or any
//! other thread starts) and a dedicated watcher thread collects them
//! synchronously with `sigtimedwait`, decoding each into an immutable
//! [`Message`] handed to the async side over a channel.
//!
//! The watcher wakes every [`WAIT_TICK`] even without a signal. Those wakes,
//! and signals from any pid other than the partner, are spurious: it probes
//! the partner's liveness and goes back to waiting.
//!
//! # Handshake
//!
//! The child sends HELLO once its own signals are blocked; the parent sends
//! nothing before HELLO arrives, so no protocol signal can hit the child
//! while its default disposition (terminate) is still in force.

use std::collections::VecDeque;
use std::io;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use nix::unistd::Pid;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{SignalCodec, SignalUnit, WireCodec};
use crate::message::Message;
use crate::transport::{interruptible, Side, Transport, TransportError};

/// Longest the watcher blocks before re-checking liveness and shutdown.
pub const WAIT_TICK: Duration = Duration::from_millis(100);

/// Longest the parent waits for the child's HELLO.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Signal masks
// ---------------------------------------------------------------------------

/// The protocol's signal numbers as a raw `sigset_t`.
struct ProtocolSigSet(libc::sigset_t);

impl ProtocolSigSet {
    fn new(codec: &SignalCodec) -> Self {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: sigemptyset initialises the set before it is read.
        let mut set = unsafe {
            libc::sigemptyset(set.as_mut_ptr());
            set.assume_init()
        };
        for signo in codec.signals() {
            // SAFETY: `set` is initialised and signo is a valid real-time signal.
            unsafe { libc::sigaddset(&mut set, signo) };
        }
        Self(set)
    }
}

/// Block the protocol signals in the calling thread.
///
/// Threads inherit the mask, so calling this first thing in `main` covers the
/// runtime and the watcher thread.
pub fn block_protocol_signals() -> Result<(), TransportError> {
    let set = ProtocolSigSet::new(&SignalCodec::realtime());
    // SAFETY: `set` is a valid sigset_t; the old mask is not requested.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set.0, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(TransportError::Setup(format!(
            "pthread_sigmask: {}",
            io::Error::from_raw_os_error(rc)
        )));
    }
    Ok(())
}

/// `true` when every protocol signal is blocked in the calling thread.
pub fn protocol_signals_blocked() -> bool {
    let codec = SignalCodec::realtime();
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: a null `set` only queries the current mask into `current`.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        return false;
    }
    // SAFETY: pthread_sigmask succeeded and filled `current`.
    let current = unsafe { current.assume_init() };
    codec
        .signals()
        // SAFETY: `current` is initialised.
        .all(|signo| unsafe { libc::sigismember(&current, signo) } == 1)
}

// ---------------------------------------------------------------------------
// Watcher thread
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Delivery {
    Message(Message),
    Hello,
    PartnerGone,
    Failed(io::Error),
}

fn watch(
    codec: SignalCodec,
    partner: Pid,
    side: Side,
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Delivery>,
) {
    let set = ProtocolSigSet::new(&codec);
    let tick = libc::timespec {
        tv_sec: 0,
        tv_nsec: WAIT_TICK.as_nanos() as libc::c_long,
    };

    while !stop.load(Ordering::Acquire) {
        let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
        // SAFETY: all pointers are valid for the duration of the call.
        let signo = unsafe { libc::sigtimedwait(&set.0, info.as_mut_ptr(), &tick) };

        if signo < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => {
                    if !partner_alive(partner, side) {
                        log::debug!("[signal] partner {partner} is gone");
                        let _ = tx.send(Delivery::PartnerGone);
                        return;
                    }
                }
                Some(libc::EINTR) => {}
                _ => {
                    let _ = tx.send(Delivery::Failed(err));
                    return;
                }
            }
            continue;
        }

        // SAFETY: sigtimedwait returned a signal, so `info` was filled in.
        let info = unsafe { info.assume_init() };
        // SAFETY: queued signals carry a sender pid.
        let sender = unsafe { info.si_pid() };
        if sender != partner.as_raw() {
            log::debug!("[signal] ignoring signal {signo} from pid {sender}");
            continue;
        }

        let delivery = if codec.is_hello(signo) {
            Delivery::Hello
        } else {
            // SAFETY: sigqueue'd signals carry a sigval.
            let payload = unsafe { info.si_value() }.sival_ptr as usize;
            match codec.decode(SignalUnit { signo, payload }) {
                Ok(msg) => Delivery::Message(msg),
                Err(e) => {
                    log::warn!("[signal] discarding signal {signo}: {e}");
                    continue;
                }
            }
        };

        if tx.send(delivery).is_err() {
            return;
        }
    }
}

fn partner_alive(partner: Pid, side: Side) -> bool {
    match side {
        // The child is reaped only after the session, so an exited child is
        // still a zombie: look without reaping.
        Side::Parent => child_running(partner),
        // Orphaned children are re-parented.
        Side::Child => nix::unistd::getppid() == partner,
    }
}

fn child_running(child: Pid) -> bool {
    let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
    // SAFETY: `info` is valid for writes; WNOWAIT leaves the child waitable.
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            child.as_raw() as libc::id_t,
            info.as_mut_ptr(),
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        // Not our child: fall back to an existence probe.
        return nix::sys::signal::kill(child, None).is_ok();
    }
    // SAFETY: waitid succeeded; si_pid stays zero while the child runs.
    unsafe { info.assume_init().si_pid() == 0 }
}

// ---------------------------------------------------------------------------
// SignalTransport
// ---------------------------------------------------------------------------

/// A connected signal channel to one partner process.
#[derive(Debug)]
pub struct SignalTransport {
    codec: SignalCodec,
    partner: Pid,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    /// Messages that overtook HELLO during the handshake.
    pending: VecDeque<Message>,
    stop: Arc<AtomicBool>,
    watcher: Option<thread::JoinHandle<()>>,
    cancel: CancellationToken,
    peer_timeout: Option<Duration>,
    closed: bool,
}

impl SignalTransport {
    /// Start the watcher thread and complete the HELLO handshake.
    ///
    /// Fails with [`TransportError::Setup`] unless [`block_protocol_signals`]
    /// already ran in this thread.
    pub async fn connect(
        partner: Pid,
        side: Side,
        cancel: CancellationToken,
        peer_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        if !protocol_signals_blocked() {
            return Err(TransportError::Setup(
                "protocol signals are not blocked; call block_protocol_signals() first".into(),
            ));
        }

        let codec = SignalCodec::realtime();
        let (tx, inbox) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let watcher = thread::Builder::new()
            .name("signal-watch".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || watch(codec, partner, side, stop, tx)
            })
            .map_err(|e| TransportError::Setup(format!("spawn signal watcher: {e}")))?;

        let mut transport = Self {
            codec,
            partner,
            inbox,
            pending: VecDeque::new(),
            stop,
            watcher: Some(watcher),
            cancel,
            peer_timeout,
            closed: false,
        };

        match side {
            Side::Child => {
                transport.raise(transport.codec.hello())?;
                log::debug!("[signal] → HELLO to {partner}");
            }
            Side::Parent => {
                transport.await_hello().await?;
                log::debug!("[signal] ← HELLO from {partner}");
            }
        }
        Ok(transport)
    }

    fn raise(&self, unit: SignalUnit) -> Result<(), TransportError> {
        let value = libc::sigval {
            sival_ptr: unit.payload as *mut libc::c_void,
        };
        // SAFETY: plain syscall wrapper; arguments are passed by value.
        let rc = unsafe { libc::sigqueue(self.partner.as_raw(), unit.signo, value) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(TransportError::PeerGone),
            _ => Err(TransportError::Io(err)),
        }
    }

    async fn await_hello(&mut self) -> Result<(), TransportError> {
        let inbox = &mut self.inbox;
        let pending = &mut self.pending;
        let result = interruptible(&self.cancel, Some(HANDSHAKE_TIMEOUT), async move {
            loop {
                match inbox.recv().await {
                    Some(Delivery::Hello) => return Ok(()),
                    Some(Delivery::Message(msg)) => pending.push_back(msg),
                    Some(Delivery::Failed(e)) => return Err(TransportError::Io(e)),
                    Some(Delivery::PartnerGone) | None => return Err(TransportError::PeerGone),
                }
            }
        })
        .await;

        match result {
            Err(TransportError::Timeout(_)) => Err(TransportError::Setup(
                "partner never completed the signal handshake".into(),
            )),
            other => other,
        }
    }
}

#[async_trait]
impl Transport for SignalTransport {
    async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::PeerGone);
        }
        self.raise(self.codec.encode(msg))?;
        log::debug!("[signal] → {msg}");
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        loop {
            let inbox = &mut self.inbox;
            let delivery = interruptible(&self.cancel, self.peer_timeout, async move {
                inbox.recv().await.ok_or(TransportError::PeerGone)
            })
            .await?;

            match delivery {
                Delivery::Message(msg) => {
                    log::debug!("[signal] ← {msg}");
                    return Ok(msg);
                }
                Delivery::Hello => log::debug!("[signal] ignoring repeated HELLO"),
                Delivery::PartnerGone => return Err(TransportError::PeerGone),
                Delivery::Failed(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.stop.store(true, Ordering::Release);
        if let Some(watcher) = self.watcher.take() {
            let _ = tokio::task::spawn_blocking(move || watcher.join()).await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "signal"
    }
}

impl Drop for SignalTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
