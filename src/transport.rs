//! Transport abstraction shared by every channel between the two peers.
//!
//! A [`Transport`] moves whole [`Message`]s. It owns the encoding (see
//! [`crate::codec`]) and the byte or signal I/O; protocol logic lives in
//! [`crate::round`] and [`crate::session`].
//!
//! # Receive contract
//!
//! `receive` suspends until one complete message is available. The wait is
//! raced against the process-wide [`CancellationToken`]: once it fires, the
//! pending or next `receive` returns [`TransportError::Cancelled`] instead of
//! blocking. Frames that fail to decode are logged and skipped inside the
//! transport; they never reach the caller.
//!
//! # Send contract
//!
//! `send` never waits for the partner to read. Strict turn alternation means
//! at most one message is outstanding in each direction, which is what the
//! single-slot signal channel requires.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Which process of the pair this endpoint lives in.
///
/// The parent creates the channel artifacts and spawns the child; the side
/// decides FIFO direction and who starts the signal handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Parent => write!(f, "parent"),
            Side::Child => write!(f, "child"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Channel could not be created or opened.
    #[error("transport setup failed: {0}")]
    Setup(String),
    /// Cancellation was requested while waiting.
    #[error("cancelled")]
    Cancelled,
    /// Partner closed its end or its process no longer exists.
    #[error("partner is gone")]
    PeerGone,
    /// Nothing arrived within the configured peer timeout.
    #[error("no message from partner within {0:?}")]
    Timeout(Duration),
    /// Underlying I/O error from the OS.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// `true` for errors that end the session with a failure status.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Cancelled)
    }

    /// Classify an I/O error, treating a closed partner end as [`PeerGone`].
    ///
    /// [`PeerGone`]: TransportError::PeerGone
    pub fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => TransportError::PeerGone,
            _ => TransportError::Io(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A connected, bidirectional message channel to the partner peer.
#[async_trait]
pub trait Transport: Send {
    /// Deliver `msg` to the partner.
    async fn send(&mut self, msg: &Message) -> Result<(), TransportError>;

    /// Wait for the next complete message from the partner.
    async fn receive(&mut self) -> Result<Message, TransportError>;

    /// Release channel handles. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Short name used as the log prefix.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        (**self).send(msg).await
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        (**self).receive().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Run a blocking wait so that cancellation and the optional peer timeout
/// can cut it short.
///
/// Cancellation wins over a ready result, so a cancelled peer stops at the
/// next observation point even if a message is already queued.
pub async fn interruptible<F, T>(
    cancel: &CancellationToken,
    limit: Option<Duration>,
    wait: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    let bounded = async {
        match limit {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_elapsed| TransportError::Timeout(limit))?,
            None => wait.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransportError::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interruptible_returns_cancelled_when_token_fires() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), _> =
            interruptible(&cancel, None, std::future::pending()).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn interruptible_prefers_cancellation_over_ready_value() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = interruptible(&cancel, None, async { Ok(5) }).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn interruptible_times_out() {
        let cancel = CancellationToken::new();
        let limit = Duration::from_millis(10);
        let result: Result<(), _> =
            interruptible(&cancel, Some(limit), std::future::pending()).await;
        assert!(matches!(result, Err(TransportError::Timeout(d)) if d == limit));
    }

    #[test]
    fn broken_pipe_means_peer_gone() {
        let e = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(TransportError::from_io(e), TransportError::PeerGone));
        let e = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(TransportError::from_io(e), TransportError::Io(_)));
        assert!(!TransportError::Cancelled.is_fatal());
        assert!(TransportError::PeerGone.is_fatal());
    }
}
