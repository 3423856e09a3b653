//! MLLP frame decoder and encoder

use std::fmt;
use thiserror::Error;

/// Start of block
pub const START_BLOCK: u8 = 0x0b;
/// End of block
pub const END_BLOCK: u8 = 0x1c;
/// Terminator that must immediately follow `END_BLOCK`
pub const CARRIAGE_RETURN: u8 = 0x0d;

/// Upper bound for a single frame body unless configured otherwise
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// What the decoder was waiting for when it saw an illegal byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameExpectation {
    StartBlock,
    BodyOrEndBlock,
    Terminator,
}

impl fmt::Display for FrameExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameExpectation::StartBlock => write!(f, "start block 0x0b"),
            FrameExpectation::BodyOrEndBlock => write!(f, "body byte or end block 0x1c"),
            FrameExpectation::Terminator => write!(f, "carriage return 0x0d"),
        }
    }
}

/// Protocol format errors. All of them are fatal for the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad MLLP encoding at offset {offset}: want {expected}, found 0x{found:02x}")]
    UnexpectedByte {
        expected: FrameExpectation,
        found: u8,
        offset: usize,
    },

    #[error("MLLP frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("decoder already failed on this connection")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitStart,
    InBody,
    AwaitTerminator,
}

/// Resumable position of a scan over a growing buffer
#[derive(Debug, Clone, Copy)]
struct Scanner {
    state: DecodeState,
    /// Next byte to examine
    position: usize,
    /// First body byte of the frame being scanned
    body_start: usize,
    /// Length of the prefix made of complete frames
    consumed: usize,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: DecodeState::AwaitStart,
            position: 0,
            body_start: 0,
            consumed: 0,
        }
    }

    /// Examine `buf[self.position..]`, pushing every completed payload
    fn scan(
        &mut self,
        buf: &[u8],
        max_payload_len: usize,
        payloads: &mut Vec<Vec<u8>>,
    ) -> Result<(), FrameError> {
        while self.position < buf.len() {
            let offset = self.position;
            let byte = buf[offset];

            match self.state {
                DecodeState::AwaitStart => {
                    if byte != START_BLOCK {
                        return Err(FrameError::UnexpectedByte {
                            expected: FrameExpectation::StartBlock,
                            found: byte,
                            offset,
                        });
                    }
                    self.body_start = offset + 1;
                    self.state = DecodeState::InBody;
                }
                DecodeState::InBody => match byte {
                    END_BLOCK => self.state = DecodeState::AwaitTerminator,
                    START_BLOCK => {
                        return Err(FrameError::UnexpectedByte {
                            expected: FrameExpectation::BodyOrEndBlock,
                            found: byte,
                            offset,
                        });
                    }
                    _ => {
                        if offset + 1 - self.body_start > max_payload_len {
                            return Err(FrameError::FrameTooLarge {
                                limit: max_payload_len,
                            });
                        }
                    }
                },
                DecodeState::AwaitTerminator => {
                    if byte != CARRIAGE_RETURN {
                        return Err(FrameError::UnexpectedByte {
                            expected: FrameExpectation::Terminator,
                            found: byte,
                            offset,
                        });
                    }
                    // offset - 1 is the end block
                    payloads.push(buf[self.body_start..offset - 1].to_vec());
                    self.consumed = offset + 1;
                    self.state = DecodeState::AwaitStart;
                }
            }

            self.position += 1;
        }

        Ok(())
    }

    /// Shift every offset after the first `consumed` bytes were dropped
    fn rebase(&mut self) {
        let consumed = self.consumed;
        self.position -= consumed;
        self.body_start = self.body_start.saturating_sub(consumed);
        self.consumed = 0;
    }
}

/// Scan `buf` for complete frames.
///
/// Returns the payloads (markers stripped) in stream order and the number of
/// leading bytes they occupy. Bytes past that count belong to an incomplete
/// frame and must be kept for the next scan.
pub fn parse_frames(
    buf: &[u8],
    max_payload_len: usize,
) -> Result<(Vec<Vec<u8>>, usize), FrameError> {
    let mut scanner = Scanner::new();
    let mut payloads = Vec::new();
    scanner.scan(buf, max_payload_len, &mut payloads)?;
    Ok((payloads, scanner.consumed))
}

/// Wrap a payload in MLLP markers
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(START_BLOCK);
    frame.extend_from_slice(payload);
    frame.push(END_BLOCK);
    frame.push(CARRIAGE_RETURN);
    frame
}

/// Incremental decoder for one connection
///
/// Keeps the unconsumed tail between calls, so a frame split across any number
/// of reads decodes the same as one delivered whole. Each byte is examined
/// once; a later call resumes where the previous scan stopped. After the first
/// error the decoder refuses further input: there is no resynchronisation.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanner: Scanner,
    max_payload_len: usize,
    poisoned: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            scanner: Scanner::new(),
            max_payload_len,
            poisoned: false,
        }
    }

    /// Append `bytes` and return every payload completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }

        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        if let Err(e) = self
            .scanner
            .scan(&self.buffer, self.max_payload_len, &mut payloads)
        {
            self.poisoned = true;
            return Err(e);
        }

        self.buffer.drain(..self.scanner.consumed);
        self.scanner.rebase();
        Ok(payloads)
    }

    /// Bytes received but not yet part of a complete frame
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
