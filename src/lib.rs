#![no_std]
//! # ayab_link
//!
//! ## Features
//!
//! This crate drives the serial link to a knitting machine controller. Every
//! message in either direction is a SLIP frame: the payload is wrapped in END
//! (0xC0) bytes, and END or ESC (0xDB) bytes inside the payload are escaped
//! as ESC ESC_END (0xDB 0xDC) or ESC ESC_ESC (0xDB 0xDD).
//!
//! The host sends four commands, the first byte of the payload says which:
//! 0x01 - START, followed by start needle, stop needle and a continuous reporting flag
//! 0x03 - INFO request
//! 0x04 - TEST request
//! 0x42 - LINE, followed by line number, the needle bits, a flags byte and a CRC-8
//!
//! The controller answers with frames whose first byte is a token:
//! 0xC1 - start confirmed
//! 0xC3 - info confirmed
//! 0x82 - line requested
//! 0xC4 - test confirmed
//! 0x84 - state indication
//!
//! An example LINE command for line 5, needle bytes 0xff 0x00 and flags 0x01:
//! payload: 0x42 0x05 0xff 0x00 0x01 0x67
//! the last byte is the Maxim/Dallas CRC-8 of the bytes before it.
//!
//! This crate defines a `FrameCodec` which turns payloads into frames and
//! reassembles frames from arbitrarily split reads, a byte at a time, with a
//! state machine implemented with the `machine` crate. The `ProtocolDriver`
//! sits on top of any `Transport` and is polled by the application.

#[macro_use]
extern crate machine;

extern crate alloc;

// pull in library
pub mod checksum;
mod driver;
mod hal_02;
mod parser;
mod transport;

pub use crate::driver::{
    Diagnostics, DriverConfig, Incoming, LinkState, LogDiagnostics, ProtocolDriver,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_CHUNK, DEFAULT_READ_TIMEOUT,
};
pub use crate::hal_02::{HalSerial, HalSerialError, BAUD_RATE};
pub use crate::parser::{END, ESC, ESC_END, ESC_ESC};
pub use crate::transport::Transport;

/// Longest payload the decoder buffers before giving up on a frame
pub const DEFAULT_MAX_FRAME: usize = 256;

use crate::parser::SlipParser;
use alloc::vec::Vec;
use log::*;

/// Errors that can be encountered in this crate
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Transport could not be opened
    Connection,
    /// Read or write failed on an open transport
    Io,
    /// Write attempted while the link is not open
    NotOpen,
    /// ESC followed by a byte other than ESC_END or ESC_ESC
    InvalidEscape(u8),
    /// Line data does not match the configured needle row width
    LineLength { expected: usize, actual: usize },
    /// Incoming frame grew past the decoder limit without an END
    FrameTooLong(usize),
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkError::Connection => write!(f, "could not open serial port"),
            LinkError::Io => write!(f, "serial i/o failed"),
            LinkError::NotOpen => write!(f, "serial port is not open"),
            LinkError::InvalidEscape(byte) => write!(f, "invalid escape 0x{:02x}", byte),
            LinkError::LineLength { expected, actual } => {
                write!(f, "line data is {} bytes, expected {}", actual, expected)
            }
            LinkError::FrameTooLong(max) => write!(f, "frame longer than {} bytes", max),
        }
    }
}

/// Kind of message received from the controller
///
/// The discriminant is the token byte for the five controller messages.
/// `None` and `Unknown` are sentinels outside the byte range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i16)]
pub enum MessageToken {
    /// leading byte matched no known token
    Unknown = -2,
    /// no message available
    None = -1,
    ConfirmStart = 0xC1,
    ConfirmInfo = 0xC3,
    RequestLine = 0x82,
    ConfirmTest = 0xC4,
    IndicateState = 0x84,
}

impl MessageToken {
    /// Token for a leading payload byte
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0xC1 => MessageToken::ConfirmStart,
            0xC3 => MessageToken::ConfirmInfo,
            0x82 => MessageToken::RequestLine,
            0xC4 => MessageToken::ConfirmTest,
            0x84 => MessageToken::IndicateState,
            _ => MessageToken::Unknown,
        }
    }

    /// Get the raw value of the token
    pub const fn code(&self) -> i16 {
        *self as i16
    }

    /// Classify a payload
    ///
    /// Returns the token and the byte following it, or 0 when there is no
    /// second byte. An absent or empty payload is `None`, an unrecognized
    /// leading byte is `Unknown` with auxiliary 0. Never fails.
    pub fn classify(payload: Option<&[u8]>) -> (MessageToken, u8) {
        match payload {
            Some([first, rest @ ..]) => match MessageToken::from_byte(*first) {
                MessageToken::Unknown => (MessageToken::Unknown, 0),
                token => (token, rest.first().copied().unwrap_or(0)),
            },
            _ => (MessageToken::None, 0),
        }
    }
}

impl From<u8> for MessageToken {
    fn from(byte: u8) -> Self {
        MessageToken::from_byte(byte)
    }
}

/// Encodes payloads as SLIP frames and decodes a stream of bytes into payloads
#[derive(Debug)]
pub struct FrameCodec {
    parser: SlipParser,
    frame_buffer: Vec<u8>,
    max_frame: usize,
}

impl FrameCodec {
    /// Create a new codec buffering at most `DEFAULT_MAX_FRAME` bytes per frame
    pub fn new() -> Self {
        FrameCodec::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// Create a new codec buffering at most `max_frame` bytes per frame
    pub fn with_max_frame(max_frame: usize) -> Self {
        let max_frame = max_frame.max(1);
        FrameCodec {
            parser: SlipParser::new(),
            frame_buffer: Vec::with_capacity(max_frame.min(DEFAULT_MAX_FRAME)),
            max_frame,
        }
    }

    /// Get the frame length limit
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Wrap `payload` in a frame
    ///
    /// The frame starts with END as well as ending with it, so line noise
    /// ahead of it is flushed into a separate, discarded frame.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(payload.len() + 2);
        encoded.push(END);
        for &byte in payload {
            match byte {
                END => encoded.extend_from_slice(&[ESC, ESC_END]),
                ESC => encoded.extend_from_slice(&[ESC, ESC_ESC]),
                _ => encoded.push(byte),
            }
        }
        encoded.push(END);
        encoded
    }

    /// decoder that works incrementally
    ///
    /// Returns every payload whose END arrived in this chunk, in order.
    /// Trailing bytes without an END are kept for the next call. Empty
    /// frames are dropped, malformed frames are logged and dropped. A frame
    /// longer than `max_frame` is dropped up to its END.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.decode_reporting(chunk, &mut LogDiagnostics)
    }

    /// Same as `decode`, malformed frames are reported to `diagnostics`
    pub fn decode_reporting<D: Diagnostics>(
        &mut self,
        chunk: &[u8],
        diagnostics: &mut D,
    ) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in chunk {
            match self
                .parser
                .clone()
                .parse_received_byte(byte, &mut self.frame_buffer)
            {
                Ok(parser) => {
                    self.parser = parser;
                    if self.frame_buffer.len() > self.max_frame {
                        diagnostics.malformed_frame(
                            &LinkError::FrameTooLong(self.max_frame),
                            &self.frame_buffer[..self.max_frame],
                        );
                        self.frame_buffer.clear();
                        self.parser = SlipParser::discarding();
                    } else if self.parser.have_complete_frame().is_some() {
                        // parser found frame end
                        let frame = core::mem::take(&mut self.frame_buffer);
                        if !frame.is_empty() {
                            debug!("decoded frame of {} bytes", frame.len());
                            frames.push(frame);
                        }
                    }
                }
                Err(e) => {
                    diagnostics.malformed_frame(&e, &self.frame_buffer);
                    self.frame_buffer.clear();
                    // END still closes the frame, the next one starts fresh
                    self.parser = if byte == END {
                        SlipParser::have_frame()
                    } else {
                        SlipParser::discarding()
                    };
                }
            }
        }
        frames
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        self.parser = SlipParser::new();
        self.frame_buffer.clear();
    }

    /// True when no partial frame is buffered
    pub fn is_idle(&self) -> bool {
        self.frame_buffer.is_empty()
            && self.parser.is_escaped().is_none()
            && self.parser.is_discarding().is_none()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new()
    }
}
