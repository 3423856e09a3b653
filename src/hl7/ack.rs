//! Acknowledgment frames
//!
//! Every decoded payload gets exactly one `ACK` carrying `MSA|AA`, whether or
//! not it could be classified. There is no negative acknowledgment.

use super::classifier::TIMESTAMP_FORMAT;
use crate::mllp::encode_frame;
use chrono::NaiveDateTime;

/// MSA-1 application accept
pub const ACK_ACCEPT: &str = "AA";

/// Unframed acknowledgment message
pub fn ack_payload(now: NaiveDateTime) -> String {
    format!(
        "MSH|^~\\&|||||{}||ACK|||2.5\rMSA|{}\r",
        now.format(TIMESTAMP_FORMAT),
        ACK_ACCEPT
    )
}

/// Acknowledgment ready to write to the socket
pub fn build_ack(now: NaiveDateTime) -> Vec<u8> {
    encode_frame(ack_payload(now).as_bytes())
}
