//! MLLP transport framing
//!
//! HL7 messages travel over TCP wrapped in a minimal lower-layer protocol:
//!
//! ```text
//! 0x0B | payload (segments separated by 0x0D) | 0x1C | 0x0D
//! ```
//!
//! The decoder here only deals with the byte framing; turning a payload into
//! an event is the job of `crate::hl7`.

pub mod codec;

pub use codec::{
    encode_frame, parse_frames, FrameDecoder, FrameError, FrameExpectation, CARRIAGE_RETURN,
    DEFAULT_MAX_PAYLOAD_BYTES, END_BLOCK, START_BLOCK,
};
