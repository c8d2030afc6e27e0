//! Message codecs for both transports.
//!
//! A [`WireCodec`] maps a [`Message`] to a transport's native unit and back:
//!
//! | Codec           | Native unit      | Used by                          |
//! |-----------------|------------------|----------------------------------|
//! | [`TextCodec`]   | `String` frame   | FIFOs, in-process loopback       |
//! | [`SignalCodec`] | [`SignalUnit`]   | real-time signals                |
//!
//! [`FrameCodec`] adapts [`TextCodec`] to `tokio_util`'s framing so a byte
//! stream can be read and written as `\n`-delimited frames.
//!
//! Decoding failures are [`DecodeError`]s. They are per-frame and recoverable:
//! transports log and discard the frame, then keep waiting.
//!
//! # Text frames
//!
//! ```text
//! THINK <n>\n
//! GUESS <n>\n
//! RESULT CORRECT <n>\n
//! RESULT WRONG\n
//! END\n
//! ```
//!
//! # Signal units
//!
//! Each kind has its own signal number, offset from a base (normally
//! `SIGRTMIN`); the payload word carries the integer argument.
//!
//! ```text
//! base + 0   THINK    payload = n
//! base + 1   GUESS    payload = n
//! base + 2   RESULT   payload = attempts << 1 | correct
//! base + 3   END      payload = 0
//! base + 4   HELLO    transport handshake, never a Message
//! ```

use std::io;

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::message::{Message, Verdict};

/// Longest accepted text frame in bytes, delimiter excluded.
pub const MAX_FRAME_LEN: usize = 128;

/// Errors from decoding a single frame or signal unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("missing {0} argument")]
    MissingArgument(&'static str),
    #[error("malformed integer `{0}`")]
    InvalidInteger(String),
    #[error("unexpected trailing input `{0}`")]
    TrailingInput(String),
    #[error("frame longer than {MAX_FRAME_LEN} bytes")]
    Oversized,
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("signal {0} is not a protocol message")]
    UnknownSignal(i32),
    #[error("payload {payload:#x} out of range for {kind}")]
    PayloadOutOfRange { kind: &'static str, payload: usize },
}

/// Conversion between [`Message`] and a transport's native unit.
pub trait WireCodec {
    type Unit;

    fn encode(&self, msg: &Message) -> Self::Unit;

    fn decode(&self, unit: Self::Unit) -> Result<Message, DecodeError>;
}

// ---------------------------------------------------------------------------
// Text frames
// ---------------------------------------------------------------------------

/// `<KIND> <int-args...>` text frames, without the delimiter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl WireCodec for TextCodec {
    type Unit = String;

    fn encode(&self, msg: &Message) -> String {
        msg.to_string()
    }

    fn decode(&self, frame: String) -> Result<Message, DecodeError> {
        parse_frame(&frame)
    }
}

fn parse_frame(frame: &str) -> Result<Message, DecodeError> {
    let mut tokens = frame.split_whitespace();
    let kind = tokens.next().ok_or(DecodeError::Empty)?;

    let msg = match kind {
        "THINK" => Message::Think {
            upper: int_arg(tokens.next(), "THINK")?,
        },
        "GUESS" => Message::Guess {
            value: int_arg(tokens.next(), "GUESS")?,
        },
        "RESULT" => match tokens.next() {
            Some("CORRECT") => Message::Result(Verdict::Correct {
                attempts: int_arg(tokens.next(), "RESULT CORRECT")?,
            }),
            Some("WRONG") => Message::Result(Verdict::Wrong),
            Some(other) => return Err(DecodeError::UnknownKind(format!("RESULT {other}"))),
            None => return Err(DecodeError::MissingArgument("RESULT")),
        },
        "END" => Message::End,
        other => return Err(DecodeError::UnknownKind(other.to_string())),
    };

    match tokens.next() {
        Some(extra) => Err(DecodeError::TrailingInput(extra.to_string())),
        None => Ok(msg),
    }
}

fn int_arg(token: Option<&str>, kind: &'static str) -> Result<u32, DecodeError> {
    let token = token.ok_or(DecodeError::MissingArgument(kind))?;
    token
        .parse()
        .map_err(|_| DecodeError::InvalidInteger(token.to_string()))
}

// ---------------------------------------------------------------------------
// Stream framing
// ---------------------------------------------------------------------------

/// `\n`-delimited framing of [`Message`]s over a byte stream.
///
/// Yields `Ok(Some(Err(_)))` for a frame that arrived whole but did not
/// decode, so a bad frame never terminates the stream. Only I/O failures are
/// stream errors. Bytes left without a delimiter at end of stream are a
/// partial frame and are dropped.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_FRAME_LEN),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Message, DecodeError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src) {
            Ok(Some(line)) => Ok(Some(TextCodec.decode(line))),
            Ok(None) => Ok(None),
            // LinesCodec skips ahead to the next delimiter on its own.
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(DecodeError::Oversized))),
            // The offending line is already consumed; only UTF-8 failures surface here.
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(DecodeError::NotUtf8)))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !buf.is_empty() {
                    log::warn!("[codec] dropping {} byte partial frame at end of stream", buf.len());
                    buf.clear();
                    self.inner = LinesCodec::new_with_max_length(MAX_FRAME_LEN);
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner
            .encode(TextCodec.encode(&msg), dst)
            .map_err(|e| match e {
                LinesCodecError::Io(e) => e,
                other => io::Error::new(io::ErrorKind::InvalidData, other),
            })
    }
}

// ---------------------------------------------------------------------------
// Signal units
// ---------------------------------------------------------------------------

/// Offsets of each signal above the codec's base signal number.
pub mod signal_offsets {
    pub const THINK: i32 = 0;
    pub const GUESS: i32 = 1;
    pub const RESULT: i32 = 2;
    pub const END: i32 = 3;
    pub const HELLO: i32 = 4;
    /// Number of consecutive signals the protocol occupies.
    pub const COUNT: i32 = 5;
}

/// One signal: its number and its single payload word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalUnit {
    pub signo: i32,
    pub payload: usize,
}

/// Maps messages onto consecutive signal numbers starting at `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalCodec {
    base: i32,
}

impl SignalCodec {
    pub fn new(base: i32) -> Self {
        Self { base }
    }

    /// Codec over the real-time signal range, `SIGRTMIN` upwards.
    #[cfg(target_os = "linux")]
    pub fn realtime() -> Self {
        Self::new(libc::SIGRTMIN())
    }

    /// Every signal number the protocol uses, HELLO included.
    pub fn signals(&self) -> impl Iterator<Item = i32> {
        let base = self.base;
        (0..signal_offsets::COUNT).map(move |off| base + off)
    }

    pub fn hello(&self) -> SignalUnit {
        SignalUnit {
            signo: self.base + signal_offsets::HELLO,
            payload: 0,
        }
    }

    pub fn is_hello(&self, signo: i32) -> bool {
        signo == self.base + signal_offsets::HELLO
    }
}

impl WireCodec for SignalCodec {
    type Unit = SignalUnit;

    fn encode(&self, msg: &Message) -> SignalUnit {
        let (offset, payload) = match *msg {
            Message::Think { upper } => (signal_offsets::THINK, upper as usize),
            Message::Guess { value } => (signal_offsets::GUESS, value as usize),
            Message::Result(Verdict::Correct { attempts }) => {
                (signal_offsets::RESULT, ((attempts as usize) << 1) | 1)
            }
            Message::Result(Verdict::Wrong) => (signal_offsets::RESULT, 0),
            Message::End => (signal_offsets::END, 0),
        };
        SignalUnit {
            signo: self.base + offset,
            payload,
        }
    }

    fn decode(&self, unit: SignalUnit) -> Result<Message, DecodeError> {
        let word = |kind: &'static str, value: usize| {
            u32::try_from(value).map_err(|_| DecodeError::PayloadOutOfRange {
                kind,
                payload: unit.payload,
            })
        };

        match unit.signo - self.base {
            signal_offsets::THINK => Ok(Message::Think {
                upper: word("THINK", unit.payload)?,
            }),
            signal_offsets::GUESS => Ok(Message::Guess {
                value: word("GUESS", unit.payload)?,
            }),
            signal_offsets::RESULT if unit.payload & 1 == 1 => {
                Ok(Message::Result(Verdict::Correct {
                    attempts: word("RESULT", unit.payload >> 1)?,
                }))
            }
            signal_offsets::RESULT if unit.payload == 0 => Ok(Message::Result(Verdict::Wrong)),
            signal_offsets::RESULT => Err(DecodeError::PayloadOutOfRange {
                kind: "RESULT",
                payload: unit.payload,
            }),
            signal_offsets::END => Ok(Message::End),
            _ => Err(DecodeError::UnknownSignal(unit.signo)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_kind() -> Vec<Message> {
        vec![
            Message::Think { upper: 1 },
            Message::Think { upper: u32::MAX },
            Message::Guess { value: 0 },
            Message::Guess { value: 7 },
            Message::Result(Verdict::Correct { attempts: 1 }),
            Message::Result(Verdict::Correct { attempts: 100 }),
            Message::Result(Verdict::Wrong),
            Message::End,
        ]
    }

    #[test]
    fn text_roundtrip() {
        for msg in every_kind() {
            assert_eq!(TextCodec.decode(TextCodec.encode(&msg)), Ok(msg));
        }
    }

    #[test]
    fn signal_roundtrip() {
        let codec = SignalCodec::new(34);
        for msg in every_kind() {
            assert_eq!(codec.decode(codec.encode(&msg)), Ok(msg));
        }
    }

    #[test]
    fn text_rejects_unknown_kind() {
        assert_eq!(
            TextCodec.decode("GUES 3".into()),
            Err(DecodeError::UnknownKind("GUES".into()))
        );
        assert_eq!(
            TextCodec.decode("RESULT MAYBE".into()),
            Err(DecodeError::UnknownKind("RESULT MAYBE".into()))
        );
        assert_eq!(
            TextCodec.decode("think 3".into()),
            Err(DecodeError::UnknownKind("think".into()))
        );
    }

    #[test]
    fn text_rejects_bad_arguments() {
        assert_eq!(
            TextCodec.decode("GUESS".into()),
            Err(DecodeError::MissingArgument("GUESS"))
        );
        assert_eq!(
            TextCodec.decode("GUESS -4".into()),
            Err(DecodeError::InvalidInteger("-4".into()))
        );
        assert_eq!(
            TextCodec.decode("THINK 12abc".into()),
            Err(DecodeError::InvalidInteger("12abc".into()))
        );
        assert_eq!(
            TextCodec.decode("RESULT WRONG 3".into()),
            Err(DecodeError::TrailingInput("3".into()))
        );
        assert_eq!(TextCodec.decode("   ".into()), Err(DecodeError::Empty));
    }

    #[test]
    fn signal_rejects_foreign_signals_and_payloads() {
        let codec = SignalCodec::new(34);
        assert_eq!(
            codec.decode(SignalUnit { signo: 10, payload: 1 }),
            Err(DecodeError::UnknownSignal(10))
        );
        // HELLO belongs to the transport, not the message set.
        assert!(codec.decode(codec.hello()).is_err());
        assert!(codec.is_hello(34 + signal_offsets::HELLO));
        assert!(matches!(
            codec.decode(SignalUnit { signo: 36, payload: 4 }),
            Err(DecodeError::PayloadOutOfRange { kind: "RESULT", .. })
        ));
    }

    #[test]
    fn result_payload_packs_flag_in_low_bit() {
        let codec = SignalCodec::new(40);
        let unit = codec.encode(&Message::Result(Verdict::Correct { attempts: 5 }));
        assert_eq!(unit.signo, 40 + signal_offsets::RESULT);
        assert_eq!(unit.payload, 0b1011);
        assert_eq!(codec.encode(&Message::Result(Verdict::Wrong)).payload, 0);
    }

    #[test]
    fn frame_codec_waits_for_delimiter() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("GUESS 4");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"2\nRESULT WRONG\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::Guess { value: 42 }))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::Result(Verdict::Wrong)))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn frame_codec_surfaces_bad_frame_and_continues() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("HELLO 1\nEND\n");
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::UnknownKind(_)))
        ));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Ok(Message::End)));
    }

    #[test]
    fn frame_codec_skips_oversized_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'9'; MAX_FRAME_LEN + 10]);
        buf.extend_from_slice(b"\nGUESS 3\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Err(DecodeError::Oversized)));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::Guess { value: 3 }))
        );
    }

    #[test]
    fn frame_codec_reports_invalid_utf8_as_bad_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"GUESS \xff\xfe\nEND\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Err(DecodeError::NotUtf8)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Ok(Message::End)));
    }

    #[test]
    fn frame_codec_drops_partial_frame_at_eof() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("END\nGUESS 1");
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Ok(Message::End)));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_encodes_with_newline() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Message::Result(Verdict::Correct { attempts: 3 }), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], b"RESULT CORRECT 3\n");
    }
}
