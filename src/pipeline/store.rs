//! Patient history store
//!
//! A keyed, rectangular table: every record exposes the same number of
//! (timestamp, value) slots. Slots fill strictly left to right, so for any
//! record index 0 is the oldest observation and the highest filled index the
//! most recent. When a record runs out of slots the shared width grows by one
//! and every other record gets a new unset slot in the same call, before the
//! store can be read again.

use crate::hl7::Sex;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One stored observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub time: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientRecord {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    slots: Vec<Option<Slot>>,
}

impl PatientRecord {
    fn with_width(width: usize) -> Self {
        Self {
            age: None,
            sex: None,
            slots: vec![None; width],
        }
    }

    /// All slots, including unset tail slots
    pub fn slots(&self) -> &[Option<Slot>] {
        &self.slots
    }

    /// Filled slots in chronological order (oldest first)
    pub fn observations(&self) -> impl DoubleEndedIterator<Item = &Slot> {
        self.slots.iter().flatten()
    }

    pub fn observation_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn first_unset(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }
}

/// Behaviour switches that differ between deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePolicy {
    /// Whether a read-only lookup of an unseen MRN creates an empty record
    pub auto_create_on_read: bool,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            auto_create_on_read: true,
        }
    }
}

/// Whole-table export used for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub width: usize,
    pub saved_at: i64,
    pub patients: Vec<PatientRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRow {
    pub mrn: String,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    pub slots: Vec<Option<Slot>>,
}

#[derive(Debug, Default)]
pub struct PatientStore {
    records: HashMap<String, PatientRecord>,
    width: usize,
    policy: StorePolicy,
}

impl PatientStore {
    pub fn new(policy: StorePolicy) -> Self {
        Self {
            records: HashMap::new(),
            width: 0,
            policy,
        }
    }

    /// Rebuild a store from a snapshot.
    ///
    /// Rows are restored verbatim. The width becomes the larger of the
    /// declared width and the longest row, and shorter rows are padded.
    pub fn from_snapshot(snapshot: StoreSnapshot, policy: StorePolicy) -> Self {
        let width = snapshot
            .patients
            .iter()
            .map(|row| row.slots.len())
            .fold(snapshot.width, usize::max);

        if width != snapshot.width {
            log::warn!(
                "Snapshot declares width {} but holds rows of width {}, padding",
                snapshot.width,
                width
            );
        }

        let records = snapshot
            .patients
            .into_iter()
            .map(|mut row| {
                row.slots.resize(width, None);
                let record = PatientRecord {
                    age: row.age,
                    sex: row.sex,
                    slots: row.slots,
                };
                (row.mrn, record)
            })
            .collect();

        Self {
            records,
            width,
            policy,
        }
    }

    /// Export every record padded to the current width, ordered by MRN
    pub fn to_snapshot(&self, saved_at: i64) -> StoreSnapshot {
        let mut patients: Vec<PatientRow> = self
            .records
            .iter()
            .map(|(mrn, record)| PatientRow {
                mrn: mrn.clone(),
                age: record.age,
                sex: record.sex,
                slots: record.slots.clone(),
            })
            .collect();
        patients.sort_by(|a, b| a.mrn.cmp(&b.mrn));

        StoreSnapshot {
            width: self.width,
            saved_at,
            patients,
        }
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    /// Number of slot pairs every record exposes
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatientRecord)> {
        self.records.iter()
    }

    /// Lookup that never creates
    pub fn get(&self, mrn: &str) -> Option<&PatientRecord> {
        self.records.get(mrn)
    }

    /// Existing record, or a fresh one with every field unset
    pub fn get_or_create(&mut self, mrn: &str) -> &mut PatientRecord {
        let width = self.width;
        self.records
            .entry(mrn.to_string())
            .or_insert_with(|| PatientRecord::with_width(width))
    }

    /// Read-only lookup honouring `StorePolicy::auto_create_on_read`
    pub fn read(&mut self, mrn: &str) -> Option<&PatientRecord> {
        if self.policy.auto_create_on_read {
            Some(&*self.get_or_create(mrn))
        } else {
            self.records.get(mrn)
        }
    }

    /// Overwrite demographics, last write wins
    pub fn apply_admission(&mut self, mrn: &str, age: Option<u32>, sex: Sex) {
        let record = self.get_or_create(mrn);
        record.age = age;
        record.sex = Some(sex);
    }

    /// Store an observation in the first unset slot and return its index
    pub fn append_observation(&mut self, mrn: &str, time: NaiveDateTime, value: f64) -> usize {
        let index = match self.get_or_create(mrn).first_unset() {
            Some(index) => index,
            None => {
                self.widen();
                self.width - 1
            }
        };

        self.get_or_create(mrn).slots[index] = Some(Slot { time, value });
        index
    }

    fn widen(&mut self) {
        self.width += 1;
        let width = self.width;
        for record in self.records.values_mut() {
            record.slots.resize(width, None);
        }
        log::debug!("Store width grown to {} slot pairs", width);
    }
}

/// Whole years between `dob` and `on`, counting a birthday only once reached
pub fn age_on(dob: NaiveDate, on: NaiveDate) -> Option<u32> {
    let mut years = on.year() - dob.year();
    if (on.month(), on.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_fresh_record_fills_slots_left_to_right() {
        let mut store = PatientStore::new(StorePolicy::default());

        for i in 0..4 {
            let index = store.append_observation("1001", t0() + Duration::hours(i), i as f64);
            assert_eq!(index, i as usize);
        }

        let record = store.get("1001").unwrap();
        let values: Vec<f64> = record.observations().map(|s| s.value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(store.width(), 4);
    }

    #[test]
    fn test_widening_backfills_every_record() {
        let mut store = PatientStore::new(StorePolicy::default());
        store.append_observation("a", t0(), 1.0);
        store.apply_admission("b", Some(40), Sex::Female);

        store.append_observation("a", t0() + Duration::hours(1), 2.0);

        assert_eq!(store.width(), 2);
        for (_, record) in store.iter() {
            assert_eq!(record.slots().len(), 2);
        }
        assert_eq!(store.get("b").unwrap().observation_count(), 0);
    }

    #[test]
    fn test_other_records_reuse_existing_width() {
        let mut store = PatientStore::new(StorePolicy::default());
        for i in 0..3 {
            store.append_observation("a", t0() + Duration::hours(i), 1.0);
        }

        assert_eq!(store.append_observation("b", t0(), 5.0), 0);
        assert_eq!(store.width(), 3);
        assert_eq!(store.get("b").unwrap().slots().len(), 3);
    }

    #[test]
    fn test_filled_slots_never_overwritten() {
        let mut store = PatientStore::new(StorePolicy::default());
        store.append_observation("a", t0(), 1.0);
        store.append_observation("a", t0() + Duration::hours(1), 2.0);

        let before: Vec<Slot> = store.get("a").unwrap().observations().copied().collect();
        store.append_observation("a", t0() + Duration::hours(2), 3.0);
        let after: Vec<Slot> = store.get("a").unwrap().observations().copied().collect();

        assert_eq!(&after[..2], &before[..]);
        assert_eq!(after[2].value, 3.0);
    }

    #[test]
    fn test_admission_keeps_observations() {
        let mut store = PatientStore::new(StorePolicy::default());
        store.append_observation("a", t0(), 1.0);
        store.apply_admission("a", Some(33), Sex::Male);
        store.apply_admission("a", Some(34), Sex::Female);

        let record = store.get("a").unwrap();
        assert_eq!(record.age, Some(34));
        assert_eq!(record.sex, Some(Sex::Female));
        assert_eq!(record.observation_count(), 1);
    }

    #[test]
    fn test_read_policy() {
        let mut creating = PatientStore::new(StorePolicy {
            auto_create_on_read: true,
        });
        assert!(creating.read("x").is_some());
        assert_eq!(creating.len(), 1);

        let mut strict = PatientStore::new(StorePolicy {
            auto_create_on_read: false,
        });
        assert!(strict.read("x").is_none());
        assert!(strict.is_empty());
    }

    #[test]
    fn test_snapshot_restore_reconciles_width() {
        let slot = Some(Slot {
            time: t0(),
            value: 1.5,
        });
        let snapshot = StoreSnapshot {
            width: 1,
            saved_at: 0,
            patients: vec![
                PatientRow {
                    mrn: "a".to_string(),
                    age: Some(50),
                    sex: Some(Sex::Male),
                    slots: vec![slot, slot, slot],
                },
                PatientRow {
                    mrn: "b".to_string(),
                    age: None,
                    sex: None,
                    slots: vec![],
                },
            ],
        };

        let mut store = PatientStore::from_snapshot(snapshot, StorePolicy::default());
        assert_eq!(store.width(), 3);
        assert_eq!(store.get("b").unwrap().slots().len(), 3);
        assert_eq!(store.append_observation("b", t0(), 2.0), 0);
        assert_eq!(store.append_observation("a", t0(), 2.0), 3);
        assert_eq!(store.get("b").unwrap().slots().len(), 4);
    }

    #[test]
    fn test_snapshot_round_trip_is_sorted() {
        let mut store = PatientStore::new(StorePolicy::default());
        store.append_observation("b", t0(), 1.0);
        store.apply_admission("a", Some(20), Sex::Female);

        let snapshot = store.to_snapshot(99);
        assert_eq!(snapshot.width, 1);
        assert_eq!(snapshot.saved_at, 99);
        let mrns: Vec<&str> = snapshot.patients.iter().map(|p| p.mrn.as_str()).collect();
        assert_eq!(mrns, vec!["a", "b"]);

        let restored = PatientStore::from_snapshot(snapshot, StorePolicy::default());
        assert_eq!(restored.get("b"), store.get("b"));
        assert_eq!(restored.get("a"), store.get("a"));
    }

    #[test]
    fn test_age_counts_birthday_only_once_reached() {
        let dob = NaiveDate::from_ymd_opt(1990, 1, 20).unwrap();

        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()), Some(33));
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()), Some(34));
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()), Some(34));
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(1989, 1, 1).unwrap()), None);
    }
}
