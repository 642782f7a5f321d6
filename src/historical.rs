//! Historical Module
//!
//! Date buckets for time-varying tables. A historical lookup keys its record
//! set by the bucket containing the lookup date, so every date inside one
//! bucket shares a single fetch and a single cached set. A lookup spanning two
//! buckets is two lookups.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::cache::{Cache, RequestScope};
use crate::error::Result;
use crate::key::{CacheKey, HistoricalKey};
use crate::loader::Loader;
use crate::record::Validity;

// == Date Range ==
/// Half-open range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::new(NaiveDateTime::MIN, NaiveDateTime::MAX)
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at < self.end
    }

    /// True when some instant of the record's validity window falls in range.
    pub fn overlaps(&self, validity: &Validity) -> bool {
        let from = validity
            .effective_date
            .map_or(validity.create_date, |eff| eff.max(validity.create_date));
        let to = validity
            .discontinue_date
            .map_or(validity.expire_date, |disc| disc.min(validity.expire_date));
        from < to && from < self.end && self.start < to
    }
}

// == Bucket Width ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketWidth {
    Day,
    /// Monday to Monday
    Week,
    /// 1st-15th and 16th-end of month
    HalfMonth,
    Month,
    Year,
    /// One bucket covering all dates
    Unbounded,
}

/// Width shared by every historical table of the binary.
pub const DEFAULT_BUCKET_WIDTH: BucketWidth = BucketWidth::Month;

// == Bucketer ==
/// Maps a lookup date to the bucket containing it.
///
/// Must be pure and total: equal buckets for dates inside one bucket, a
/// different bucket across every boundary.
pub trait HistoricalBucketer: Send + Sync + 'static {
    fn bucket(&self, at: NaiveDateTime) -> DateRange;
}

/// Fixed-width calendar buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarBucketer {
    width: BucketWidth,
}

impl CalendarBucketer {
    pub fn new(width: BucketWidth) -> Self {
        Self { width }
    }

    pub fn width(&self) -> BucketWidth {
        self.width
    }
}

impl Default for CalendarBucketer {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_WIDTH)
    }
}

impl HistoricalBucketer for CalendarBucketer {
    fn bucket(&self, at: NaiveDateTime) -> DateRange {
        let day = at.date();
        let (start, end) = match self.width {
            BucketWidth::Day => (Some(day), day.succ_opt()),
            BucketWidth::Week => {
                let monday = day
                    .checked_sub_signed(Duration::days(day.weekday().num_days_from_monday() as i64));
                let next = monday.and_then(|m| m.checked_add_signed(Duration::days(7)));
                (monday, next)
            }
            BucketWidth::HalfMonth => {
                if day.day() <= 15 {
                    (day.with_day(1), day.with_day(16))
                } else {
                    (day.with_day(16), first_of_next_month(day))
                }
            }
            BucketWidth::Month => (day.with_day(1), first_of_next_month(day)),
            BucketWidth::Year => (
                NaiveDate::from_ymd_opt(day.year(), 1, 1),
                NaiveDate::from_ymd_opt(day.year() + 1, 1, 1),
            ),
            BucketWidth::Unbounded => return DateRange::unbounded(),
        };

        // dates at the edge of the calendar fall back to the open end
        DateRange::new(
            start.map_or(NaiveDateTime::MIN, midnight),
            end.map_or(NaiveDateTime::MAX, midnight),
        )
    }
}

fn midnight(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

fn first_of_next_month(day: NaiveDate) -> Option<NaiveDate> {
    if day.month() == 12 {
        NaiveDate::from_ymd_opt(day.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(day.year(), day.month() + 1, 1)
    }
}

// == Historical Cache ==
/// Cache front end that buckets the lookup date into the key.
///
/// The loader fetches every row overlapping the bucket; the currency filter
/// still runs per lookup date, so rows outside the requested date stay in the
/// shared set and are never returned.
pub struct HistoricalCache<L: Loader, B = CalendarBucketer> {
    cache: Arc<Cache<L>>,
    bucketer: B,
}

impl<K, L, B> HistoricalCache<L, B>
where
    K: CacheKey,
    L: Loader<Key = HistoricalKey<K>>,
    B: HistoricalBucketer,
{
    pub fn new(cache: Arc<Cache<L>>, bucketer: B) -> Self {
        Self { cache, bucketer }
    }

    pub fn key_for(&self, key: &K, as_of: NaiveDateTime) -> HistoricalKey<K> {
        HistoricalKey::new(key.clone(), self.bucketer.bucket(as_of))
    }

    pub fn get(&self, key: &K, as_of: NaiveDateTime) -> Result<RequestScope<L::Record>> {
        self.cache.get(&self.key_for(key, as_of), as_of)
    }

    /// The underlying keyed cache, e.g. for registration.
    pub fn cache(&self) -> &Arc<Cache<L>> {
        &self.cache
    }

    pub fn bucketer(&self) -> &B {
        &self.bucketer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::record::Record;
    use crate::tables::{sample_tax_rules, tax_rules_historical_loader, TaxRulesKey};

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_month_bucket() {
        let b = CalendarBucketer::new(BucketWidth::Month);
        let march = DateRange::new(at(2024, 3, 1), at(2024, 4, 1));
        assert_eq!(b.bucket(at(2024, 3, 4)), march);
        assert_eq!(b.bucket(at(2024, 3, 31) + Duration::hours(23)), march);
        assert_ne!(b.bucket(at(2024, 4, 1)), march);
        assert_eq!(
            b.bucket(at(2024, 12, 24)),
            DateRange::new(at(2024, 12, 1), at(2025, 1, 1))
        );
    }

    #[test]
    fn test_week_bucket_starts_monday() {
        let b = CalendarBucketer::new(BucketWidth::Week);
        // 2024-03-06 is a Wednesday
        let range = b.bucket(at(2024, 3, 6));
        assert_eq!(range, DateRange::new(at(2024, 3, 4), at(2024, 3, 11)));
        assert_eq!(b.bucket(at(2024, 3, 10)), range);
        assert_ne!(b.bucket(at(2024, 3, 11)), range);
    }

    #[test]
    fn test_half_month_bucket() {
        let b = CalendarBucketer::new(BucketWidth::HalfMonth);
        assert_eq!(
            b.bucket(at(2024, 2, 15)),
            DateRange::new(at(2024, 2, 1), at(2024, 2, 16))
        );
        assert_eq!(
            b.bucket(at(2024, 2, 29)),
            DateRange::new(at(2024, 2, 16), at(2024, 3, 1))
        );
    }

    #[test]
    fn test_day_and_year_buckets() {
        let day = CalendarBucketer::new(BucketWidth::Day).bucket(at(2024, 3, 4) + Duration::hours(13));
        assert_eq!(day, DateRange::new(at(2024, 3, 4), at(2024, 3, 5)));

        let year = CalendarBucketer::new(BucketWidth::Year).bucket(at(2024, 7, 4));
        assert_eq!(year, DateRange::new(at(2024, 1, 1), at(2025, 1, 1)));
    }

    #[test]
    fn test_bucketing_is_total_at_calendar_edges() {
        let b = CalendarBucketer::new(BucketWidth::Month);
        let range = b.bucket(NaiveDateTime::MAX);
        assert!(range.contains(NaiveDateTime::MAX - Duration::days(1)) || range.end == NaiveDateTime::MAX);
        assert_eq!(
            CalendarBucketer::new(BucketWidth::Unbounded).bucket(at(2024, 3, 4)),
            DateRange::unbounded()
        );
    }

    #[test]
    fn test_bucket_contains_its_date() {
        for width in [
            BucketWidth::Day,
            BucketWidth::Week,
            BucketWidth::HalfMonth,
            BucketWidth::Month,
            BucketWidth::Year,
        ] {
            let b = CalendarBucketer::new(width);
            for d in [at(2024, 1, 1), at(2024, 2, 29), at(2023, 12, 31)] {
                assert!(b.bucket(d).contains(d), "{:?} {}", width, d);
            }
        }
    }

    #[test]
    fn test_overlaps_respects_effective_window() {
        let march = DateRange::new(at(2024, 3, 1), at(2024, 4, 1));
        let v = Validity::new(at(2023, 1, 1), at(2025, 1, 1));
        assert!(march.overlaps(&v));
        assert!(!march.overlaps(&v.with_effective(at(2024, 4, 1), at(2024, 5, 1))));
        assert!(!march.overlaps(&Validity::new(at(2024, 1, 1), at(2024, 3, 1))));
    }

    #[test]
    fn test_historical_lookups_share_bucket() {
        let loader = Arc::new(tax_rules_historical_loader(sample_tax_rules(at(2024, 3, 1))));
        let cache = Arc::new(Cache::new(loader.clone(), CacheSettings::unbounded()));
        let historical = HistoricalCache::new(cache, CalendarBucketer::default());
        let key = TaxRulesKey::new("US", 'D');

        let early = historical.get(&key, at(2024, 3, 4)).unwrap();
        let late = historical.get(&key, at(2024, 3, 20)).unwrap();
        assert_eq!(loader.create_calls(), 1);
        assert!(early.iter().all(|r| r.is_current(at(2024, 3, 4))));
        assert!(late.iter().all(|r| r.is_current(at(2024, 3, 20))));

        historical.get(&key, at(2024, 4, 1)).unwrap();
        assert_eq!(loader.create_calls(), 2);
        assert_eq!(historical.cache().keys().len(), 2);
    }
}
