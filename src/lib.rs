//! HL7-over-MLLP listener that keeps per-patient creatinine histories and
//! scores each new result for acute kidney injury.

pub mod hl7;
pub mod listener;
pub mod mllp;
pub mod persistence;
pub mod pipeline;
