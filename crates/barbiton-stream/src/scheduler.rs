#![forbid(unsafe_code)]

//! Read-ahead fetch policy.
//!
//! Pure decision logic: the scheduler never touches the network. The asset
//! run-loop asks it what to dispatch and reports dispatches and completions.

use barbiton_storage::{ChunkIdx, ChunkStore};

use crate::config::{DEFAULT_FETCH_AHEAD, DEFAULT_MAX_CONCURRENT_FETCHES};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerParams {
    pub fetch_ahead: u32,
    pub max_concurrent_fetches: usize,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            fetch_ahead: DEFAULT_FETCH_AHEAD,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// A fetch the run-loop should start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub idx: ChunkIdx,
    /// Distance from the chunk being read; 0 means a reader needs it now.
    pub ahead: u32,
}

impl Dispatch {
    #[must_use]
    pub fn is_read_ahead(&self) -> bool {
        self.ahead > 0
    }
}

#[derive(Debug, Default)]
pub struct FetchScheduler {
    params: SchedulerParams,
    in_flight: usize,
}

impl FetchScheduler {
    #[must_use]
    pub fn new(params: SchedulerParams) -> Self {
        Self {
            params,
            in_flight: 0,
        }
    }

    #[must_use]
    pub fn params(&self) -> SchedulerParams {
        self.params
    }

    /// Fetches dispatched and not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Next chunk to fetch for a reader positioned in `need`.
    ///
    /// Scans `need ..= need + fetch_ahead`, stopping past `final_chunk`. The
    /// first index absent from the store is the candidate. Chunks already
    /// present are skipped whatever their status, so nothing is fetched twice.
    /// The needed chunk itself is always dispatched; a read-ahead candidate
    /// only while the concurrency cap allows.
    #[must_use]
    pub fn plan(&self, store: &ChunkStore, need: ChunkIdx, final_chunk: ChunkIdx) -> Option<Dispatch> {
        for ahead in 0..=self.params.fetch_ahead {
            let idx = need.ahead(ahead);
            if idx > final_chunk {
                break;
            }
            if store.contains(idx) {
                continue;
            }
            if ahead == 0 || self.in_flight < self.params.max_concurrent_fetches {
                return Some(Dispatch { idx, ahead });
            }
            return None;
        }
        None
    }

    pub fn on_dispatch(&mut self) {
        self.in_flight += 1;
    }

    pub fn on_complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}
