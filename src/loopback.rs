//! In-process transport for exercising the protocol without two processes.
//!
//! [`Loopback::pair`] returns two connected endpoints backed by unbounded
//! tokio channels. Messages travel as text frames through [`TextCodec`], so
//! the decode path is the same one a FIFO uses. A [`FrameInjector`] pushes
//! raw frames into the partner's inbox to exercise the malformed-frame path:
//!
//! | Fault            | How                                              |
//! |------------------|--------------------------------------------------|
//! | Malformed frame  | `injector.inject("GUESS x")`                     |
//! | Stray message    | `injector.inject("THINK 3")` mid-round           |
//! | Partner vanished | drop the other endpoint                          |

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{TextCodec, WireCodec};
use crate::message::Message;
use crate::transport::{interruptible, Transport, TransportError};

/// One end of an in-process channel pair.
#[derive(Debug)]
pub struct Loopback {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    closed: bool,
}

/// Handle that writes raw frames into an endpoint's inbox.
///
/// The endpoint only reports its partner gone once every injector for its
/// inbox has been dropped as well.
#[derive(Debug, Clone)]
pub struct FrameInjector {
    inbox: mpsc::UnboundedSender<String>,
}

impl FrameInjector {
    /// Queue `frame` as if the partner had sent it. Returns `false` when the
    /// endpoint is gone.
    pub fn inject(&self, frame: &str) -> bool {
        self.inbox.send(frame.to_string()).is_ok()
    }
}

impl Loopback {
    /// Two connected endpoints sharing one cancellation token.
    pub fn pair(cancel: &CancellationToken) -> (Self, Self) {
        Self::pair_with(cancel.clone(), cancel.clone())
    }

    /// Two connected endpoints, each observing its own cancellation token.
    pub fn pair_with(cancel_a: CancellationToken, cancel_b: CancellationToken) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self {
            tx: a_tx,
            rx: a_rx,
            cancel: cancel_a,
            closed: false,
        };
        let b = Self {
            tx: b_tx,
            rx: b_rx,
            cancel: cancel_b,
            closed: false,
        };
        (a, b)
    }

    /// Injector feeding the partner's inbox, as if this endpoint had sent
    /// the raw frames.
    pub fn partner_injector(&self) -> FrameInjector {
        FrameInjector {
            inbox: self.tx.clone(),
        }
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::PeerGone);
        }
        log::debug!("[loopback] → {msg}");
        self.tx
            .send(TextCodec.encode(msg))
            .map_err(|_| TransportError::PeerGone)
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            let rx = &mut self.rx;
            let frame = interruptible(&self.cancel, None, async move {
                rx.recv().await.ok_or(TransportError::PeerGone)
            })
            .await?;

            match TextCodec.decode(frame) {
                Ok(msg) => {
                    log::debug!("[loopback] ← {msg}");
                    return Ok(msg);
                }
                Err(e) => log::warn!("[loopback] discarding frame: {e}"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.rx.close();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::Verdict;

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let cancel = CancellationToken::new();
        let (mut a, mut b) = Loopback::pair(&cancel);

        a.send(&Message::Think { upper: 3 }).await.unwrap();
        a.send(&Message::Result(Verdict::Wrong)).await.unwrap();

        assert_eq!(b.receive().await.unwrap(), Message::Think { upper: 3 });
        assert_eq!(b.receive().await.unwrap(), Message::Result(Verdict::Wrong));
    }

    #[tokio::test]
    async fn malformed_injected_frames_are_skipped() {
        let cancel = CancellationToken::new();
        let (mut a, b) = Loopback::pair(&cancel);
        let injector = b.partner_injector();

        assert!(injector.inject("GUESS seven"));
        assert!(injector.inject("HELLO"));
        assert!(injector.inject("GUESS 7"));
        drop(b);
        drop(injector);

        assert_eq!(a.receive().await.unwrap(), Message::Guess { value: 7 });
        assert!(matches!(a.receive().await, Err(TransportError::PeerGone)));
    }

    #[tokio::test]
    async fn dropped_partner_is_peer_gone() {
        let cancel = CancellationToken::new();
        let (mut a, b) = Loopback::pair(&cancel);
        drop(b);
        assert!(matches!(
            a.send(&Message::End).await,
            Err(TransportError::PeerGone)
        ));
        assert!(matches!(a.receive().await, Err(TransportError::PeerGone)));
    }

    #[tokio::test]
    async fn receive_unblocks_on_cancel() {
        let cancel = CancellationToken::new();
        let (mut a, _b) = Loopback::pair(&cancel);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), a.receive())
            .await
            .expect("receive did not observe cancellation");
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
