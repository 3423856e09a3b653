//! HL7 v2 message handling
//!
//! Only the handful of segments the pipeline consumes are understood:
//! `MSH` (timestamp + type), `PID` (MRN, demographics), `OBR` (order time)
//! and `OBX` (result). Everything else in a payload is ignored.

pub mod ack;
pub mod classifier;

pub use ack::{ack_payload, build_ack, ACK_ACCEPT};
pub use classifier::{
    classify, MessageType, ParseError, ParsedEvent, Sex, FIELD_SEPARATOR, SEGMENT_SEPARATOR,
    TIMESTAMP_FORMAT,
};
