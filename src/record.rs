//! Record Module
//!
//! Immutable domain records with a validity window, and the ordered
//! [`RecordSet`] the cache owns for one key.

use std::fmt::Debug;

use chrono::NaiveDateTime;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

// == Validity ==
/// Validity window of a record.
///
/// `create_date..expire_date` is always populated. `effective_date` and
/// `discontinue_date` narrow the window further when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validity {
    pub create_date: NaiveDateTime,
    pub expire_date: NaiveDateTime,
    pub effective_date: Option<NaiveDateTime>,
    pub discontinue_date: Option<NaiveDateTime>,
}

impl Validity {
    pub fn new(create_date: NaiveDateTime, expire_date: NaiveDateTime) -> Self {
        Self {
            create_date,
            expire_date,
            effective_date: None,
            discontinue_date: None,
        }
    }

    pub fn with_effective(
        mut self,
        effective_date: NaiveDateTime,
        discontinue_date: NaiveDateTime,
    ) -> Self {
        self.effective_date = Some(effective_date);
        self.discontinue_date = Some(discontinue_date);
        self
    }

    // == Currency Predicate ==
    /// Returns true if the window contains `as_of`.
    ///
    /// `create_date <= as_of < expire_date`, and when populated,
    /// `effective_date <= as_of` and `as_of < discontinue_date`.
    pub fn contains(&self, as_of: NaiveDateTime) -> bool {
        if as_of < self.create_date || as_of >= self.expire_date {
            return false;
        }
        if matches!(self.effective_date, Some(eff) if as_of < eff) {
            return false;
        }
        if matches!(self.discontinue_date, Some(disc) if as_of >= disc) {
            return false;
        }
        true
    }
}

// == Record Trait ==
/// A cached domain value. Constructed by a loader and never mutated afterwards.
pub trait Record:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn validity(&self) -> Validity;

    /// Approximate resident size in bytes, used for the hot-byte budget.
    fn memory_estimate(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn is_current(&self, as_of: NaiveDateTime) -> bool {
        self.validity().contains(as_of)
    }
}

// == Record Set ==
/// Ordered collection of records materialized for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct RecordSet<R> {
    records: Vec<R>,
}

impl<R> Default for RecordSet<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R> From<Vec<R>> for RecordSet<R> {
    fn from(records: Vec<R>) -> Self {
        Self { records }
    }
}

impl<R> FromIterator<R> for RecordSet<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<R> RecordSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[R] {
        &self.records
    }

    pub fn into_inner(self) -> Vec<R> {
        self.records
    }
}

impl<R: Record> RecordSet<R> {
    /// Sum of per-record estimates plus the container itself.
    pub fn memory_estimate(&self) -> usize {
        std::mem::size_of::<Self>() + self.records.iter().map(Record::memory_estimate).sum::<usize>()
    }

    /// Indices of the records current as of `as_of`, in set order.
    pub fn current_indices(&self, as_of: NaiveDateTime) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_current(as_of))
            .map(|(i, _)| i)
            .collect()
    }
}

impl<'a, R> IntoIterator for &'a RecordSet<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_create_expire_window_is_half_open() {
        let v = Validity::new(at(2024, 1, 1), at(2024, 2, 1));
        assert!(v.contains(at(2024, 1, 1)));
        assert!(v.contains(at(2024, 1, 31)));
        assert!(!v.contains(at(2024, 2, 1)));
        assert!(!v.contains(at(2023, 12, 31)));
    }

    #[test]
    fn test_effective_window_narrows() {
        let v = Validity::new(at(2024, 1, 1), at(2025, 1, 1))
            .with_effective(at(2024, 3, 1), at(2024, 4, 1));
        assert!(!v.contains(at(2024, 2, 15)));
        assert!(v.contains(at(2024, 3, 1)));
        assert!(!v.contains(at(2024, 4, 1)));
    }

    #[test]
    fn test_only_effective_populated() {
        let mut v = Validity::new(at(2024, 1, 1), at(2025, 1, 1));
        v.effective_date = Some(at(2024, 6, 1));
        assert!(!v.contains(at(2024, 5, 31)));
        assert!(v.contains(at(2024, 12, 31)));
    }
}
