//! Key Module
//!
//! Composite cache keys, the name/value [`ObjectKey`] used by change
//! notifications, and the historical key flavor carrying a date bucket.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::historical::DateRange;

/// Column name carrying the start of a historical bucket.
pub const START_DATE_FIELD: &str = "STARTDATE";
/// Column name carrying the end of a historical bucket.
pub const END_DATE_FIELD: &str = "ENDDATE";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// == Cache Key Trait ==
/// Identifier for one cached record set.
///
/// Equality and hashing come from the derived impls on the business columns,
/// so they never depend on how a key was assembled. Keys are serializable so
/// a [`BlobStore`](crate::blob_store::BlobStore) can persist them.
pub trait CacheKey:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Business columns as `(COLUMN, value)` pairs.
    fn fields(&self) -> Vec<(&'static str, String)>;

    /// True when every column named by `object_key` is present with an equal value.
    fn matches(&self, object_key: &ObjectKey) -> bool {
        let fields = self.fields();
        object_key.fields.iter().all(|(name, value)| {
            fields
                .iter()
                .any(|(column, own)| *column == name.as_str() && own == value)
        })
    }

    /// Pipe-joined column values, used in logs and diagnostics.
    fn flat(&self) -> String {
        self.fields()
            .into_iter()
            .map(|(_, value)| value)
            .collect::<Vec<_>>()
            .join("|")
    }
}

// == Object Key ==
/// Name/value description of a changed row, as carried by cache notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub entity: String,
    pub fields: BTreeMap<String, String>,
}

impl ObjectKey {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.entity)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "]")
    }
}

// == Historical Key ==
/// Business key plus the date bucket produced by a
/// [`HistoricalBucketer`](crate::historical::HistoricalBucketer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoricalKey<K> {
    pub key: K,
    pub bucket: DateRange,
}

impl<K> HistoricalKey<K> {
    pub fn new(key: K, bucket: DateRange) -> Self {
        Self { key, bucket }
    }
}

impl<K: CacheKey> CacheKey for HistoricalKey<K> {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = self.key.fields();
        fields.push((START_DATE_FIELD, self.bucket.start.format(DATE_FORMAT).to_string()));
        fields.push((END_DATE_FIELD, self.bucket.end.format(DATE_FORMAT).to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    struct NationKey {
        nation: String,
        tag: char,
    }

    impl CacheKey for NationKey {
        fn fields(&self) -> Vec<(&'static str, String)> {
            vec![("NATION", self.nation.clone()), ("TAXPOINTTAG", self.tag.to_string())]
        }
    }

    fn key() -> NationKey {
        NationKey {
            nation: "US".into(),
            tag: 'D',
        }
    }

    #[test]
    fn test_object_key_order_independent() {
        let a = ObjectKey::new("TaxRulesRecord")
            .with("NATION", "US")
            .with("TAXPOINTTAG", "D");
        let b = ObjectKey::new("TaxRulesRecord")
            .with("TAXPOINTTAG", "D")
            .with("NATION", "US");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_matches_subset_of_fields() {
        let k = key();
        assert!(k.matches(&ObjectKey::new("T").with("NATION", "US")));
        assert!(!k.matches(&ObjectKey::new("T").with("NATION", "CA")));
        assert!(!k.matches(&ObjectKey::new("T").with("CARRIER", "AA")));
        assert!(k.matches(&ObjectKey::new("T")));
    }

    #[test]
    fn test_historical_key_adds_bucket_columns() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let hk = HistoricalKey::new(key(), DateRange::new(start, end));

        assert_eq!(hk.flat(), "US|D|2024-03-01 00:00:00|2024-04-01 00:00:00");
        // a notification without dates hits every bucket
        assert!(hk.matches(&ObjectKey::new("T").with("NATION", "US")));
        assert!(!hk.matches(
            &ObjectKey::new("T").with(START_DATE_FIELD, "2024-04-01 00:00:00")
        ));
    }
}
