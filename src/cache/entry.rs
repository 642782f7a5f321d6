//! Cache Entry Module
//!
//! Per-key state machine: `Loading`, `Hot`, `Cold`, `Invalidated`.
//! Absence is implicit (no entry in the map).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;

use crate::cache::codec::CompressedBlob;
use crate::cache::scope::SharedRecords;
use crate::error::CacheError;

// == Entry State ==
pub(crate) enum EntryState<R> {
    /// A thread is inside `Loader::create` for this key
    Loading,
    /// Decompressed set resident; `charged` bytes count against the hot budget
    Hot {
        records: Arc<SharedRecords<R>>,
        charged: usize,
    },
    /// Only the compressed form is resident
    Cold(CompressedBlob),
    /// The load this entry stood for failed; only its waiters ever see this
    Failed(CacheError),
    /// Tombstone; the next lookup treats it as a miss
    Invalidated,
}

// == Entry Status ==
/// Externally visible state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Loading,
    Hot,
    Cold,
    Invalidated,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EntryStatus::Loading => "LOADING",
            EntryStatus::Hot => "HOT",
            EntryStatus::Cold => "COLD",
            EntryStatus::Invalidated => "INVALIDATED",
        };
        f.write_str(label)
    }
}

impl<R> EntryState<R> {
    pub(crate) fn status(&self) -> EntryStatus {
        match self {
            EntryState::Loading => EntryStatus::Loading,
            EntryState::Hot { .. } => EntryStatus::Hot,
            EntryState::Cold(_) => EntryStatus::Cold,
            EntryState::Failed(_) | EntryState::Invalidated => EntryStatus::Invalidated,
        }
    }

    pub(crate) fn record_count(&self) -> usize {
        match self {
            EntryState::Hot { records, .. } => records.len(),
            EntryState::Cold(blob) => blob.record_count,
            _ => 0,
        }
    }
}

// == Cache Entry ==
/// The cache's state for one key.
///
/// State changes happen under the entry's own mutex, so unrelated keys never
/// contend. Waiters on an in-flight load park on `ready`.
pub(crate) struct CacheEntry<R> {
    state: Mutex<EntryState<R>>,
    ready: Condvar,
    last_access: AtomicU64,
    /// Set when the entry was invalidated while its load was in flight
    discarded: AtomicBool,
}

impl<R> CacheEntry<R> {
    // == Constructors ==
    pub(crate) fn loading(tick: u64) -> Self {
        Self::with_state(EntryState::Loading, tick)
    }

    pub(crate) fn hot(records: Arc<SharedRecords<R>>, charged: usize, tick: u64) -> Self {
        Self::with_state(EntryState::Hot { records, charged }, tick)
    }

    pub(crate) fn cold(blob: CompressedBlob, tick: u64) -> Self {
        Self::with_state(EntryState::Cold(blob), tick)
    }

    fn with_state(state: EntryState<R>, tick: u64) -> Self {
        Self {
            state: Mutex::new(state),
            ready: Condvar::new(),
            last_access: AtomicU64::new(tick),
            discarded: AtomicBool::new(false),
        }
    }

    // == Locking ==
    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState<R>> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, EntryState<R>>> {
        self.state.try_lock()
    }

    /// Blocks while another thread's load for this key is outstanding.
    pub(crate) fn wait_ready(&self) -> MutexGuard<'_, EntryState<R>> {
        let mut state = self.state.lock();
        while matches!(*state, EntryState::Loading) {
            self.ready.wait(&mut state);
        }
        state
    }

    /// Replaces the state, wakes every waiter and hands back the old state so
    /// the caller can drop it outside the lock.
    pub(crate) fn publish(&self, next: EntryState<R>) -> EntryState<R> {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, next)
        };
        self.ready.notify_all();
        previous
    }

    pub(crate) fn notify_waiters(&self) {
        self.ready.notify_all();
    }

    // == Access Tracking ==
    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    // == Discard Flag ==
    pub(crate) fn discard(&self) {
        self.discarded.store(true, Ordering::Release);
    }

    pub(crate) fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    // == Queries ==
    pub(crate) fn status(&self) -> EntryStatus {
        self.state.lock().status()
    }

    /// An invalidated or failed entry may be replaced by a fresh load.
    pub(crate) fn is_replaceable(&self) -> bool {
        matches!(
            *self.state.lock(),
            EntryState::Invalidated | EntryState::Failed(_)
        )
    }
}
