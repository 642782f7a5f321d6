//! Request Scope Module
//!
//! Shared, reference-counted record sets handed out by the cache, and the
//! per-call [`RequestScope`] that borrows them.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::record::{Record, RecordSet};

type Release<R> = Box<dyn FnOnce(RecordSet<R>) + Send + Sync>;

// == Shared Records ==
/// A materialized record set shared between the cache and outstanding scopes.
///
/// The release hook (the loader's `destroy`) runs exactly once, when the last
/// reference is dropped, so a view taken before a demotion or eviction stays
/// valid until the view itself goes away.
pub struct SharedRecords<R> {
    records: RecordSet<R>,
    release: Option<Release<R>>,
}

impl<R> SharedRecords<R> {
    pub(crate) fn with_release(
        records: RecordSet<R>,
        release: impl FnOnce(RecordSet<R>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            records,
            release: Some(Box::new(release)),
        }
    }

    /// Wraps a set that has no owner to notify on drop.
    pub fn detached(records: RecordSet<R>) -> Self {
        Self {
            records,
            release: None,
        }
    }

    pub fn records(&self) -> &RecordSet<R> {
        &self.records
    }
}

impl<R> Deref for SharedRecords<R> {
    type Target = RecordSet<R>;

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

impl<R> Drop for SharedRecords<R> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(std::mem::take(&mut self.records));
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for SharedRecords<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRecords")
            .field("records", &self.records)
            .field("owned_by_loader", &self.release.is_some())
            .finish()
    }
}

// == View ==
enum View<R> {
    /// Every record of the shared set is visible
    Whole,
    /// Positions of the visible records in the shared set
    Subset(Vec<usize>),
    /// Records synthesized for this call only
    Owned(Vec<R>),
}

// == Request Scope ==
/// Result list for one lookup.
///
/// Borrows long-lived cache data and owns only what was synthesized for the
/// call. It can be moved to another thread but never shared between threads.
pub struct RequestScope<R> {
    source: Option<Arc<SharedRecords<R>>>,
    view: View<R>,
    _local: PhantomData<Cell<()>>,
}

impl<R: Record> RequestScope<R> {
    /// Restricts a shared set to the records current as of `as_of`.
    ///
    /// No index list is built when every record passes.
    pub fn current(source: Arc<SharedRecords<R>>, as_of: NaiveDateTime) -> Self {
        let indices = source.current_indices(as_of);
        let view = if indices.len() == source.len() {
            View::Whole
        } else {
            View::Subset(indices)
        };
        Self {
            source: Some(source),
            view,
            _local: PhantomData,
        }
    }
}

impl<R> RequestScope<R> {
    /// Scope over records synthesized for this call; dropping it drops them.
    pub fn owned(records: Vec<R>) -> Self {
        Self {
            source: None,
            view: View::Owned(records),
            _local: PhantomData,
        }
    }

    /// Narrows the visible records further.
    pub fn retain(&mut self, mut keep: impl FnMut(&R) -> bool) {
        if let View::Owned(records) = &mut self.view {
            records.retain(|r| keep(r));
            return;
        }
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let records = source.as_slice();
        let indices: Vec<usize> = match &self.view {
            View::Subset(indices) => indices.iter().copied().filter(|&i| keep(&records[i])).collect(),
            _ => (0..records.len()).filter(|&i| keep(&records[i])).collect(),
        };
        self.view = View::Subset(indices);
    }

    pub fn len(&self) -> usize {
        match &self.view {
            View::Whole => self.source.as_ref().map_or(0, |s| s.len()),
            View::Subset(indices) => indices.len(),
            View::Owned(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        match &self.view {
            View::Whole => self.source.as_ref()?.as_slice().get(index),
            View::Subset(indices) => {
                let position = *indices.get(index)?;
                self.source.as_ref()?.as_slice().get(position)
            }
            View::Owned(records) => records.get(index),
        }
    }

    pub fn iter(&self) -> ScopeIter<'_, R> {
        ScopeIter {
            scope: self,
            next: 0,
        }
    }

    /// True when the visible records live in a cache-owned set.
    pub fn is_borrowed(&self) -> bool {
        self.source.is_some()
    }

    /// True when the currency filter or [`retain`](Self::retain) hid some records.
    pub fn is_filtered(&self) -> bool {
        matches!(self.view, View::Subset(_))
    }

    /// The shared set backing this scope, if any.
    pub fn shared(&self) -> Option<&Arc<SharedRecords<R>>> {
        self.source.as_ref()
    }
}

impl<R: Clone> RequestScope<R> {
    pub fn to_vec(&self) -> Vec<R> {
        self.iter().cloned().collect()
    }
}

impl<R: fmt::Debug> fmt::Debug for RequestScope<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, R> IntoIterator for &'a RequestScope<R> {
    type Item = &'a R;
    type IntoIter = ScopeIter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// == Scope Iterator ==
pub struct ScopeIter<'a, R> {
    scope: &'a RequestScope<R>,
    next: usize,
}

impl<'a, R> Iterator for ScopeIter<'a, R> {
    type Item = &'a R;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.scope.get(self.next)?;
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.scope.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{sample_tax_rules, TaxRulesRecord};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn set() -> RecordSet<TaxRulesRecord> {
        sample_tax_rules(at(2024, 3, 1))
            .into_iter()
            .filter(|r| r.nation == "US" && r.tax_point_tag == 'D')
            .collect()
    }

    #[test]
    fn test_release_runs_once_after_last_reference() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let shared = Arc::new(SharedRecords::with_release(set(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let scope = RequestScope::current(shared.clone(), at(2024, 3, 10));
        drop(shared);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(scope.is_borrowed());

        drop(scope);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_current_filters_by_date() {
        let shared = Arc::new(SharedRecords::detached(set()));
        let scope = RequestScope::current(shared.clone(), at(2024, 3, 10));

        assert!(scope.iter().all(|r| r.is_current(at(2024, 3, 10))));
        let expected = shared.iter().filter(|r| r.is_current(at(2024, 3, 10))).count();
        assert_eq!(scope.len(), expected);
        assert_eq!(scope.iter().size_hint(), (expected, Some(expected)));
    }

    #[test]
    fn test_date_outside_every_window_is_empty() {
        let shared = Arc::new(SharedRecords::detached(set()));
        let scope = RequestScope::current(shared, at(1990, 1, 1));
        assert!(scope.is_empty());
        assert!(scope.get(0).is_none());
    }

    #[test]
    fn test_retain_narrows_whole_view() {
        let shared = Arc::new(SharedRecords::detached(set()));
        let total = shared.len();
        let mut scope = RequestScope::current(shared, at(2024, 3, 10));
        scope.retain(|_| true);
        assert!(scope.len() <= total);

        scope.retain(|r| r.seq_no % 2 == 0);
        assert!(scope.iter().all(|r| r.seq_no % 2 == 0));
        assert!(scope.is_filtered());
    }

    #[test]
    fn test_owned_scope() {
        let records: Vec<TaxRulesRecord> = set().into_inner();
        let n = records.len();
        let mut scope = RequestScope::owned(records);
        assert!(!scope.is_borrowed());
        assert_eq!(scope.len(), n);
        scope.retain(|_| false);
        assert!(scope.is_empty());
    }
}
