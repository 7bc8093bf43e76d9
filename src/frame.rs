//! Length-prefixed framing for applications layered on the engine.
//!
//! A frame is a 5-byte header followed by its body:
//!
//! ```text
//! +-----------------------------+-----------+-----------+
//! | length (24 bit, big endian) | type (8)  | flags (8) |
//! +-----------------------------+-----------+-----------+
//! | body (length bytes)                                 |
//! +-----------------------------------------------------+
//! ```
//!
//! Every frame must carry [`Flags::ACK`]; a header without it is invalid and
//! the connection should be closed.
//!
//! The engine hands `data` whatever one read produced, so a frame may arrive
//! split across calls or several frames may arrive in one. [`FrameReader`]
//! keeps the unconsumed tail between calls:
//!
//! ```
//! use gothic::frame::{encode_data, FrameReader};
//!
//! let frame = encode_data(b"hello").unwrap();
//! let mut reader = FrameReader::new();
//! let mut bodies = Vec::new();
//!
//! assert_eq!(reader.feed(&frame[..3], |f| bodies.push(f.payload.to_vec())).unwrap(), 0);
//! assert_eq!(reader.feed(&frame[3..], |f| bodies.push(f.payload.to_vec())).unwrap(), 1);
//! assert_eq!(bodies, vec![b"hello".to_vec()]);
//! assert_eq!(reader.buffered(), 0);
//! ```

use std::fmt;

pub const FRAME_HEADER_LEN: usize = 5;
pub const MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Settings,
    Ping,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0x0 => FrameType::Data,
            0x1 => FrameType::Settings,
            0x2 => FrameType::Ping,
            other => FrameType::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(kind: FrameType) -> Self {
        match kind {
            FrameType::Data => 0x0,
            FrameType::Settings => 0x1,
            FrameType::Ping => 0x2,
            FrameType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Data => f.write_str("DATA"),
            FrameType::Settings => f.write_str("SETTINGS"),
            FrameType::Ping => f.write_str("PING"),
            FrameType::Unknown(t) => write!(f, "UNKNOWN_FRAME_TYPE_{t}"),
        }
    }
}

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// Required on every frame.
    pub const ACK: Flags = Flags(0x10);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Body longer than `MAX_FRAME_SIZE`.
    TooLarge(usize),
    /// The ack flag is missing from the header.
    MissingAck(Flags),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLarge(len) => write!(f, "frame too large: {len} bytes"),
            FrameError::MissingAck(flags) => {
                write!(f, "frame flags error: {:#04x} lacks ack", flags.bits())
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Body length, not including the header.
    pub length: u32,
    pub kind: FrameType,
    pub flags: Flags,
}

impl FrameHeader {
    /// Parse and validate a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` while fewer than [`FRAME_HEADER_LEN`] bytes are
    /// available.
    pub fn parse(buf: &[u8]) -> Result<Option<FrameHeader>, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader {
            length: u32::from(buf[0]) << 16 | u32::from(buf[1]) << 8 | u32::from(buf[2]),
            kind: FrameType::from(buf[3]),
            flags: Flags::from_bits(buf[4]),
        };
        header.validate()?;
        Ok(Some(header))
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(self.length as usize));
        }
        if !self.flags.contains(Flags::ACK) {
            return Err(FrameError::MissingAck(self.flags));
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let len = self.length.to_be_bytes();
        [len[1], len[2], len[3], self.kind.into(), self.flags.bits()]
    }
}

/// A complete frame borrowed from the reader's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

/// Encode `body` as a DATA frame with the ack flag set.
pub fn encode_data(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(FrameError::TooLarge(body.len()));
    }
    let header = FrameHeader {
        length: body.len() as u32,
        kind: FrameType::Data,
        flags: Flags::ACK,
    };
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Reassembles frames from arbitrarily split input.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `input` to the retained bytes and hand every complete frame to
    /// `on_frame`. Returns the number of frames delivered.
    ///
    /// On an invalid header the retained bytes are discarded; the stream
    /// cannot be resynchronized.
    pub fn feed<F>(&mut self, input: &[u8], mut on_frame: F) -> Result<usize, FrameError>
    where
        F: FnMut(Frame<'_>),
    {
        self.buf.extend_from_slice(input);

        let mut consumed = 0;
        let mut delivered = 0;
        let result = loop {
            let rest = &self.buf[consumed..];
            let header = match FrameHeader::parse(rest) {
                Ok(Some(header)) => header,
                Ok(None) => break Ok(delivered),
                Err(e) => break Err(e),
            };
            let end = FRAME_HEADER_LEN + header.length as usize;
            if rest.len() < end {
                break Ok(delivered);
            }
            on_frame(Frame {
                header,
                payload: &rest[FRAME_HEADER_LEN..end],
            });
            consumed += end;
            delivered += 1;
        };

        match result {
            Ok(_) => {
                self.buf.drain(..consumed);
            }
            Err(_) => self.buf.clear(),
        }
        result
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
