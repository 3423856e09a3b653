//! Feature window builder
//!
//! Projects a patient record into the fixed layout the classifier was trained
//! on:
//!
//! ```text
//! [age, sex, value_0, dt_0, value_1, dt_1, ..., value_4, dt_4]
//! ```
//!
//! Pair 0 is the most recent observation and its time field is always 0.
//! Pair i holds the gap in seconds between observation i and the next more
//! recent one, so the vector does not depend on calendar time.

use super::store::PatientRecord;
use crate::hl7::Sex;
use chrono::NaiveDateTime;

/// Number of (value, time-delta) pairs in a vector
pub const WINDOW_PAIRS: usize = 5;
/// age + sex + pairs
pub const FEATURE_LEN: usize = 2 + 2 * WINDOW_PAIRS;
/// Marker for absent values, understood by the model as missing
pub const MISSING: f64 = f64::NAN;

#[derive(Debug, Clone, Copy)]
pub struct FeatureVector {
    values: [f64; FEATURE_LEN],
}

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn age(&self) -> f64 {
        self.values[0]
    }

    pub fn sex(&self) -> f64 {
        self.values[1]
    }

    /// `(value, seconds)` for pair `index`, 0 being the most recent
    pub fn pair(&self, index: usize) -> (f64, f64) {
        let offset = 2 + 2 * index;
        (self.values[offset], self.values[offset + 1])
    }

    /// Values of the filled pairs, most recent first
    pub fn recent_values(&self) -> impl Iterator<Item = f64> + '_ {
        (0..WINDOW_PAIRS)
            .map(move |i| self.pair(i).0)
            .take_while(|v| !v.is_nan())
    }
}

fn sex_code(sex: Option<Sex>) -> f64 {
    match sex {
        Some(Sex::Male) => 0.0,
        Some(Sex::Female) => 1.0,
        None => MISSING,
    }
}

/// Build the feature vector for `record`.
///
/// The second element is the absolute time of the most recent observation,
/// kept out of the vector for alerting and audit.
pub fn build(record: &PatientRecord) -> (FeatureVector, Option<NaiveDateTime>) {
    let mut values = [MISSING; FEATURE_LEN];
    values[0] = record.age.map(f64::from).unwrap_or(MISSING);
    values[1] = sex_code(record.sex);

    let recent: Vec<_> = record.observations().rev().take(WINDOW_PAIRS).collect();

    for (i, slot) in recent.iter().enumerate() {
        let offset = 2 + 2 * i;
        values[offset] = slot.value;
        values[offset + 1] = if i == 0 {
            0.0
        } else {
            (recent[i - 1].time - slot.time).num_seconds().abs() as f64
        };
    }

    let reference_time = recent.first().map(|slot| slot.time);
    (FeatureVector { values }, reference_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::store::{PatientStore, StorePolicy};
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_record_is_all_missing() {
        let mut store = PatientStore::new(StorePolicy::default());
        let record = store.get_or_create("1");

        let (features, reference) = build(record);
        assert!(features.as_slice().iter().all(|v| v.is_nan()));
        assert_eq!(features.as_slice().len(), FEATURE_LEN);
        assert!(reference.is_none());
    }

    #[test]
    fn test_demographics_encoding() {
        let mut store = PatientStore::new(StorePolicy::default());
        store.apply_admission("1", Some(61), Sex::Female);
        store.apply_admission("2", None, Sex::Male);

        let (female, _) = build(store.get("1").unwrap());
        assert_eq!(female.age(), 61.0);
        assert_eq!(female.sex(), 1.0);

        let (male, _) = build(store.get("2").unwrap());
        assert!(male.age().is_nan());
        assert_eq!(male.sex(), 0.0);
    }

    #[test]
    fn test_most_recent_first_with_gaps() {
        let mut store = PatientStore::new(StorePolicy::default());
        // chronological v1..v3 at t0, t0+1h, t0+3h
        store.append_observation("1", t0(), 1.0);
        store.append_observation("1", t0() + Duration::hours(1), 2.0);
        store.append_observation("1", t0() + Duration::hours(3), 3.0);

        let (features, reference) = build(store.get("1").unwrap());

        assert_eq!(features.pair(0), (3.0, 0.0));
        assert_eq!(features.pair(1), (2.0, 7200.0));
        assert_eq!(features.pair(2), (1.0, 3600.0));
        for i in 3..WINDOW_PAIRS {
            let (value, dt) = features.pair(i);
            assert!(value.is_nan() && dt.is_nan());
        }
        assert_eq!(reference, Some(t0() + Duration::hours(3)));
        assert_eq!(features.recent_values().collect::<Vec<_>>(), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_truncates_to_five_pairs() {
        let mut store = PatientStore::new(StorePolicy::default());
        for i in 0..8 {
            store.append_observation("1", t0() + Duration::minutes(10 * i), i as f64);
        }

        let (features, _) = build(store.get("1").unwrap());
        let values: Vec<f64> = (0..WINDOW_PAIRS).map(|i| features.pair(i).0).collect();
        assert_eq!(values, vec![7.0, 6.0, 5.0, 4.0, 3.0]);
        for i in 1..WINDOW_PAIRS {
            assert_eq!(features.pair(i).1, 600.0);
        }
    }
}
