//! Stream transport over a pair of named pipes.
//!
//! ```text
//!   parent                                   child
//!   ┌──────────┐   <dir>/guess_fifo_1   ┌──────────┐
//!   │  writer  │───────────────────────▶│  reader  │
//!   │  reader  │◀───────────────────────│  writer  │
//!   └──────────┘   <dir>/guess_fifo_2   └──────────┘
//! ```
//!
//! Each direction carries `\n`-delimited text frames ([`FrameCodec`]). Reads
//! accumulate until a delimiter arrives, so a frame split across writes is
//! never returned early. End of stream on the read side means the partner
//! closed its writer, which surfaces as [`TransportError::PeerGone`].
//!
//! # Opening
//!
//! Opening the write end of a FIFO fails with `ENXIO` while nobody has the
//! read end open. Both sides therefore open their read end first, then retry
//! the write end with doubling back-off until the partner's reader exists or
//! [`CONNECT_TIMEOUT`] passes.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nix::sys::stat::Mode;
use tokio::net::unix::pipe;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::FrameCodec;
use crate::message::Message;
use crate::transport::{interruptible, Side, Transport, TransportError};

/// File name of the parent → child pipe.
pub const FIFO_NAME_1: &str = "guess_fifo_1";
/// File name of the child → parent pipe.
pub const FIFO_NAME_2: &str = "guess_fifo_2";

/// Longest time to wait for the partner to open its read end.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const OPEN_RETRY_INITIAL: Duration = Duration::from_millis(5);
const OPEN_RETRY_MAX: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Filesystem artifacts
// ---------------------------------------------------------------------------

/// Locations of the two pipes forming one duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPaths {
    pub to_child: PathBuf,
    pub to_parent: PathBuf,
}

impl FifoPaths {
    /// The conventional pipe names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            to_child: dir.join(FIFO_NAME_1),
            to_parent: dir.join(FIFO_NAME_2),
        }
    }

    /// `(read, write)` paths as seen from `side`.
    pub fn for_side(&self, side: Side) -> (&Path, &Path) {
        match side {
            Side::Parent => (&self.to_parent, &self.to_child),
            Side::Child => (&self.to_child, &self.to_parent),
        }
    }

    /// Create both pipes with mode `0600`.
    ///
    /// A pipe left behind by an earlier run is reused; any other file at
    /// either path is an error.
    pub fn create(&self) -> Result<(), TransportError> {
        for path in [&self.to_child, &self.to_parent] {
            match nix::unistd::mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR) {
                Ok(()) => log::debug!("[fifo] created {}", path.display()),
                Err(nix::errno::Errno::EEXIST) => {
                    let meta = std::fs::metadata(path).map_err(|e| {
                        TransportError::Setup(format!("cannot stat {}: {e}", path.display()))
                    })?;
                    if !meta.file_type().is_fifo() {
                        return Err(TransportError::Setup(format!(
                            "{} exists and is not a FIFO",
                            path.display()
                        )));
                    }
                    log::debug!("[fifo] reusing {}", path.display());
                }
                Err(e) => {
                    return Err(TransportError::Setup(format!(
                        "mkfifo {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Remove both pipes. Already-absent pipes are not an error.
    pub fn remove(&self) -> io::Result<()> {
        for path in [&self.to_child, &self.to_parent] {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("[fifo] removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Removes the pipes when dropped.
#[derive(Debug)]
pub struct FifoArtifacts {
    paths: FifoPaths,
}

impl FifoArtifacts {
    pub fn new(paths: FifoPaths) -> Self {
        Self { paths }
    }
}

impl Drop for FifoArtifacts {
    fn drop(&mut self) {
        if let Err(e) = self.paths.remove() {
            log::warn!("[fifo] cleanup failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// FifoTransport
// ---------------------------------------------------------------------------

/// A connected duplex channel over two FIFOs.
#[derive(Debug)]
pub struct FifoTransport {
    reader: FramedRead<pipe::Receiver, FrameCodec>,
    writer: FramedWrite<pipe::Sender, FrameCodec>,
    cancel: CancellationToken,
    peer_timeout: Option<Duration>,
    closed: bool,
}

impl FifoTransport {
    /// Open this side's read end, then its write end once the partner's
    /// reader exists.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(
        paths: &FifoPaths,
        side: Side,
        cancel: CancellationToken,
        peer_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let (read_path, write_path) = paths.for_side(side);

        let receiver = pipe::OpenOptions::new()
            .open_receiver(read_path)
            .map_err(|e| TransportError::Setup(format!("open {}: {e}", read_path.display())))?;
        let sender = open_sender_when_ready(write_path, &cancel).await?;
        log::debug!(
            "[fifo] {side} connected: reading {}, writing {}",
            read_path.display(),
            write_path.display()
        );

        Ok(Self {
            reader: FramedRead::new(receiver, FrameCodec::new()),
            writer: FramedWrite::new(sender, FrameCodec::new()),
            cancel,
            peer_timeout,
            closed: false,
        })
    }
}

async fn open_sender_when_ready(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<pipe::Sender, TransportError> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    let mut delay = OPEN_RETRY_INITIAL;

    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                if Instant::now() >= deadline {
                    return Err(TransportError::Setup(format!(
                        "partner never opened {} for reading",
                        path.display()
                    )));
                }
                interruptible(cancel, None, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
                delay = (delay * 2).min(OPEN_RETRY_MAX);
            }
            Err(e) => {
                return Err(TransportError::Setup(format!(
                    "open {}: {e}",
                    path.display()
                )))
            }
        }
    }
}

#[async_trait]
impl Transport for FifoTransport {
    async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::PeerGone);
        }
        self.writer.send(*msg).await.map_err(TransportError::from_io)?;
        log::debug!("[fifo] → {msg}");
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            let reader = &mut self.reader;
            let next = interruptible(&self.cancel, self.peer_timeout, async move {
                Ok(reader.next().await)
            })
            .await?;

            match next {
                None => return Err(TransportError::PeerGone),
                Some(Err(e)) => return Err(TransportError::from_io(e)),
                Some(Ok(Err(e))) => log::warn!("[fifo] discarding frame: {e}"),
                Some(Ok(Ok(msg))) => {
                    log::debug!("[fifo] ← {msg}");
                    return Ok(msg);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.writer.close().await {
            Ok(()) => Ok(()),
            Err(e) => match TransportError::from_io(e) {
                TransportError::PeerGone => Ok(()),
                other => Err(other),
            },
        }
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}
