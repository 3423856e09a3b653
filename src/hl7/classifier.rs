//! Payload classification into admission / discharge / observation events

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SEGMENT_SEPARATOR: char = '\r';
pub const FIELD_SEPARATOR: char = '|';

/// `YYYYMMDDHHMMSS`, used by MSH-7 and OBR-7
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

// Field positions after splitting a segment on '|' (index 0 is the segment name)
const MSH_TIMESTAMP: usize = 6;
const MSH_TYPE_SEARCH_FROM: usize = 7;
const MSH_TYPE: usize = 8;
const PID_MRN: usize = 3;
const PID_NAME: usize = 5;
const PID_DOB: usize = 7;
const PID_SEX: usize = 8;
const OBR_TIMESTAMP: usize = 7;
const OBX_KIND: usize = 3;
const OBX_VALUE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Sex {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// ADT^A01
    Admission,
    /// ADT^A03
    Discharge,
    /// ORU^R01
    Observation,
}

impl MessageType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ADT^A01" => Some(MessageType::Admission),
            "ADT^A03" => Some(MessageType::Discharge),
            "ORU^R01" => Some(MessageType::Observation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Admission => "ADT^A01",
            MessageType::Discharge => "ADT^A03",
            MessageType::Observation => "ORU^R01",
        }
    }
}

/// One decoded clinical event
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Admission {
        mrn: String,
        dob: NaiveDate,
        sex: Sex,
        time: NaiveDateTime,
    },
    AdminUpdate {
        mrn: String,
        time: NaiveDateTime,
    },
    /// `time` is the result-order timestamp from OBR, not the message time
    Observation {
        mrn: String,
        time: NaiveDateTime,
        kind: String,
        value: f64,
    },
}

impl ParsedEvent {
    pub fn mrn(&self) -> &str {
        match self {
            ParsedEvent::Admission { mrn, .. }
            | ParsedEvent::AdminUpdate { mrn, .. }
            | ParsedEvent::Observation { mrn, .. } => mrn,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ParsedEvent::Admission { .. } => MessageType::Admission,
            ParsedEvent::AdminUpdate { .. } => MessageType::Discharge,
            ParsedEvent::Observation { .. } => MessageType::Observation,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    InvalidEncoding,

    #[error("missing {0} segment")]
    MissingSegment(&'static str),

    #[error("{segment}-{index} is missing")]
    MissingField { segment: &'static str, index: usize },

    #[error("{segment}-{index} is malformed: {value:?}")]
    MalformedField {
        segment: &'static str,
        index: usize,
        value: String,
    },

    #[error("unrecognised message type {0:?}")]
    UnknownMessageType(String),
}

struct Segment<'a> {
    name: &'static str,
    fields: Vec<&'a str>,
}

impl<'a> Segment<'a> {
    /// Non-empty field at `index`
    fn field(&self, index: usize) -> Result<&'a str, ParseError> {
        match self.fields.get(index) {
            Some(&value) if !value.is_empty() => Ok(value),
            _ => Err(ParseError::MissingField {
                segment: self.name,
                index,
            }),
        }
    }

    fn malformed(&self, index: usize, value: &str) -> ParseError {
        ParseError::MalformedField {
            segment: self.name,
            index,
            value: value.to_string(),
        }
    }

    fn timestamp(&self, index: usize) -> Result<NaiveDateTime, ParseError> {
        let raw = self.field(index)?;
        if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.malformed(index, raw));
        }
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|_| self.malformed(index, raw))
    }
}

/// Find the first segment called `name`
fn find_segment<'a>(message: &'a str, name: &'static str) -> Result<Segment<'a>, ParseError> {
    message
        .split(SEGMENT_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(|s| s.split(FIELD_SEPARATOR).collect::<Vec<_>>())
        .find(|fields| fields.first() == Some(&name))
        .map(|fields| Segment { name, fields })
        .ok_or(ParseError::MissingSegment(name))
}

/// Classify a decoded MLLP payload
pub fn classify(payload: &[u8]) -> Result<ParsedEvent, ParseError> {
    let message = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidEncoding)?;

    let msh = find_segment(message, "MSH")?;
    let time = msh.timestamp(MSH_TIMESTAMP)?;
    let message_type = msh
        .fields
        .iter()
        .skip(MSH_TYPE_SEARCH_FROM)
        .find_map(|f| MessageType::from_code(f))
        .ok_or_else(|| {
            ParseError::UnknownMessageType(msh.fields.get(MSH_TYPE).unwrap_or(&"").to_string())
        })?;

    let pid = find_segment(message, "PID")?;
    let mrn = parse_mrn(&pid)?;

    match message_type {
        MessageType::Admission => {
            pid.field(PID_NAME)?;
            let raw_dob = pid.field(PID_DOB)?;
            if raw_dob.len() != 8 {
                return Err(pid.malformed(PID_DOB, raw_dob));
            }
            let dob = NaiveDate::parse_from_str(raw_dob, DATE_FORMAT)
                .map_err(|_| pid.malformed(PID_DOB, raw_dob))?;
            let raw_sex = pid.field(PID_SEX)?;
            let sex = Sex::from_code(raw_sex).ok_or_else(|| pid.malformed(PID_SEX, raw_sex))?;

            Ok(ParsedEvent::Admission {
                mrn,
                dob,
                sex,
                time,
            })
        }
        MessageType::Discharge => Ok(ParsedEvent::AdminUpdate { mrn, time }),
        MessageType::Observation => {
            let obr = find_segment(message, "OBR")?;
            let result_time = obr.timestamp(OBR_TIMESTAMP)?;

            let obx = find_segment(message, "OBX")?;
            let kind = obx.field(OBX_KIND)?.to_string();
            let raw_value = obx.field(OBX_VALUE)?;
            let value = parse_decimal(raw_value).ok_or_else(|| obx.malformed(OBX_VALUE, raw_value))?;

            Ok(ParsedEvent::Observation {
                mrn,
                time: result_time,
                kind,
                value,
            })
        }
    }
}

fn parse_mrn(pid: &Segment<'_>) -> Result<String, ParseError> {
    let raw = pid.field(PID_MRN)?;
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(pid.malformed(PID_MRN, raw));
    }
    Ok(raw.to_string())
}

/// `-?digits(.digits)?`
fn parse_decimal(raw: &str) -> Option<f64> {
    let unsigned = raw.strip_prefix('-').unwrap_or(raw);
    let mut parts = unsigned.splitn(2, '.');
    let integer = parts.next()?;
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if !is_digits(integer) {
        return None;
    }
    if let Some(fraction) = parts.next() {
        if !is_digits(fraction) {
            return None;
        }
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT_A01: &[u8] = b"MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240102135300||ADT^A01|||2.5\rPID|1||497030||ROSCOE DOHERTY||19870515|M\r";
    const ADT_A03: &[u8] = b"MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240607141100||ADT^A03|||2.5\rPID|1||411749\r";
    const ORU_R01: &[u8] = b"MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240617120600||ORU^R01|||2.5\rPID|1||837440\rOBR|1||||||20240617115900\rOBX|1|SN|CREATININE||100.46338429249316\r";

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn test_classify_admission() {
        let event = classify(ADT_A01).unwrap();

        assert_eq!(
            event,
            ParsedEvent::Admission {
                mrn: "497030".to_string(),
                dob: NaiveDate::from_ymd_opt(1987, 5, 15).unwrap(),
                sex: Sex::Male,
                time: ts("20240102135300"),
            }
        );
        assert_eq!(event.message_type(), MessageType::Admission);
    }

    #[test]
    fn test_classify_discharge() {
        let event = classify(ADT_A03).unwrap();

        assert_eq!(
            event,
            ParsedEvent::AdminUpdate {
                mrn: "411749".to_string(),
                time: ts("20240607141100"),
            }
        );
    }

    #[test]
    fn test_classify_observation_uses_order_time() {
        let event = classify(ORU_R01).unwrap();

        match event {
            ParsedEvent::Observation {
                mrn,
                time,
                kind,
                value,
            } => {
                assert_eq!(mrn, "837440");
                assert_eq!(time, ts("20240617115900"));
                assert_eq!(kind, "CREATININE");
                assert!((value - 100.46338429249316).abs() < 1e-12);
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_value_accepted() {
        let payload = b"MSH|^~\\&|A|B|||20240617120600||ORU^R01|||2.5\rPID|1||1\rOBR|1||||||20240617120600\rOBX|1|SN|CREATININE||-2.5\r";
        match classify(payload).unwrap() {
            ParsedEvent::Observation { value, .. } => assert_eq!(value, -2.5),
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_error() {
        let payload = b"MSH|^~\\&|A|B|||20240617120600||ADT^A08|||2.5\rPID|1||1\r";
        assert_eq!(
            classify(payload),
            Err(ParseError::UnknownMessageType("ADT^A08".to_string()))
        );
    }

    #[test]
    fn test_missing_header_is_error() {
        assert_eq!(
            classify(b"PID|1||497030\r"),
            Err(ParseError::MissingSegment("MSH"))
        );
    }

    #[test]
    fn test_short_header_timestamp_is_error() {
        let payload = b"MSH|^~\\&|A|B|||202406171206||ADT^A03|||2.5\rPID|1||1\r";
        assert!(matches!(
            classify(payload),
            Err(ParseError::MalformedField {
                segment: "MSH",
                index: 6,
                ..
            })
        ));
    }

    #[test]
    fn test_admission_without_sex_is_error() {
        let payload = b"MSH|^~\\&|A|B|||20240102135300||ADT^A01|||2.5\rPID|1||497030||ROSCOE DOHERTY||19870515\r";
        assert_eq!(
            classify(payload),
            Err(ParseError::MissingField {
                segment: "PID",
                index: 8
            })
        );
    }

    #[test]
    fn test_admission_with_bad_dob_is_error() {
        let payload = b"MSH|^~\\&|A|B|||20240102135300||ADT^A01|||2.5\rPID|1||497030||ROSCOE DOHERTY||19871345|M\r";
        assert!(matches!(
            classify(payload),
            Err(ParseError::MalformedField {
                segment: "PID",
                index: 7,
                ..
            })
        ));
    }

    #[test]
    fn test_observation_without_result_is_error() {
        let payload = b"MSH|^~\\&|A|B|||20240617120600||ORU^R01|||2.5\rPID|1||837440\rOBR|1||||||20240617120600\r";
        assert_eq!(classify(payload), Err(ParseError::MissingSegment("OBX")));
    }

    #[test]
    fn test_observation_with_text_value_is_error() {
        let payload = b"MSH|^~\\&|A|B|||20240617120600||ORU^R01|||2.5\rPID|1||837440\rOBR|1||||||20240617120600\rOBX|1|SN|CREATININE||high\r";
        assert!(matches!(
            classify(payload),
            Err(ParseError::MalformedField {
                segment: "OBX",
                index: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        assert_eq!(classify(&[0xff, 0xfe]), Err(ParseError::InvalidEncoding));
    }

    #[test]
    fn test_parse_decimal_forms() {
        assert_eq!(parse_decimal("12"), Some(12.0));
        assert_eq!(parse_decimal("1.25"), Some(1.25));
        assert_eq!(parse_decimal("-0.5"), Some(-0.5));
        assert_eq!(parse_decimal(".5"), None);
        assert_eq!(parse_decimal("5."), None);
        assert_eq!(parse_decimal("1e3"), None);
        assert_eq!(parse_decimal("-"), None);
    }
}
