//! Wire framing shared by server, client, and tests
//!
//! Every message travels as one frame: tag word, length word (payload words),
//! the payload words themselves, then a checksum word. All words are
//! big-endian u32. The checksum is an order-sensitive rotate-and-xor fold;
//! it catches corruption and truncation, it is not an authentication code.
//!
//! This module is the only place that touches byte order. Everything above
//! it works in terms of [`Frame`] and the typed messages built on top.

use crate::MAX_PAYLOAD_WORDS;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Fold seed; any fixed odd constant works, this one mixes well.
const CHECKSUM_SEED: u32 = 0x9E37_79B9;

/// Bytes occupied by the tag and length words.
pub const HEADER_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("payload length {words} exceeds the {} word limit", MAX_PAYLOAD_WORDS)]
    PayloadTooLarge { words: usize },

    #[error("truncated frame: have {have} bytes, need {need}")]
    Truncated { have: usize, need: usize },

    #[error("unknown message tag {tag}")]
    UnknownTag { tag: u32 },

    #[error("malformed payload for tag {tag}: {words} words")]
    BadPayload { tag: u32, words: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors produced by the framing layer itself, as opposed to
    /// transport failures underneath it.
    pub fn is_framing(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}

/// One decoded frame: a tag and its payload words, byte order already handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u32,
    pub payload: Vec<u32>,
}

/// Order-sensitive fold over tag, length, and payload words.
pub fn checksum(tag: u32, payload: &[u32]) -> u32 {
    let mut acc = fold(CHECKSUM_SEED, tag);
    acc = fold(acc, payload.len() as u32);
    for &word in payload {
        acc = fold(acc, word);
    }
    acc
}

fn fold(acc: u32, word: u32) -> u32 {
    acc.rotate_left(7) ^ word
}

fn read_word(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl Frame {
    pub fn new(tag: u32, payload: Vec<u32>) -> Self {
        Self { tag, payload }
    }

    /// Total encoded size in bytes, including header and checksum.
    pub fn encoded_len(&self) -> usize {
        HEADER_BYTES + self.payload.len() * 4 + 4
    }

    /// Serializes the frame, rejecting oversized payloads before any bytes
    /// are produced.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_WORDS as usize {
            return Err(ProtocolError::PayloadTooLarge {
                words: self.payload.len(),
            });
        }

        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&self.tag.to_be_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        for word in &self.payload {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(&checksum(self.tag, &self.payload).to_be_bytes());
        Ok(bytes)
    }

    /// Decodes one frame from the front of `bytes`, returning the frame and
    /// the number of bytes consumed. Used by tests and anywhere frames are
    /// already buffered in memory.
    pub fn decode(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
        if bytes.len() < HEADER_BYTES {
            return Err(ProtocolError::Truncated {
                have: bytes.len(),
                need: HEADER_BYTES,
            });
        }

        let tag = read_word(bytes, 0);
        let words = read_word(bytes, 4);
        if words > MAX_PAYLOAD_WORDS {
            return Err(ProtocolError::PayloadTooLarge {
                words: words as usize,
            });
        }

        let total = HEADER_BYTES + words as usize * 4 + 4;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                have: bytes.len(),
                need: total,
            });
        }

        let mut payload = Vec::with_capacity(words as usize);
        for i in 0..words as usize {
            payload.push(read_word(bytes, HEADER_BYTES + i * 4));
        }

        let found = read_word(bytes, HEADER_BYTES + words as usize * 4);
        let expected = checksum(tag, &payload);
        if found != expected {
            return Err(ProtocolError::ChecksumMismatch { expected, found });
        }

        Ok((Frame { tag, payload }, total))
    }

    /// Reads exactly one frame from an async stream. A connection closed
    /// mid-frame surfaces as [`ProtocolError::Io`].
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
        let tag = reader.read_u32().await?;
        let words = reader.read_u32().await?;
        if words > MAX_PAYLOAD_WORDS {
            return Err(ProtocolError::PayloadTooLarge {
                words: words as usize,
            });
        }

        let mut payload = Vec::with_capacity(words as usize);
        for _ in 0..words {
            payload.push(reader.read_u32().await?);
        }

        let found = reader.read_u32().await?;
        let expected = checksum(tag, &payload);
        if found != expected {
            return Err(ProtocolError::ChecksumMismatch { expected, found });
        }

        Ok(Frame { tag, payload })
    }
}
