//! Crawl-wide duplicate suppression and saved-record accounting.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::models::{Fingerprint, FingerprintMode, ReviewRecord};

#[derive(Debug, Default)]
struct LedgerState {
    seen: HashSet<Fingerprint>,
    saved: u64,
}

/// Single owner of the seen-fingerprint set and the saved counter.
///
/// Both live behind one lock, so checking a fingerprint, recording it and
/// bumping the counter happen as one step for every record.
#[derive(Debug)]
pub struct DedupLedger {
    mode: FingerprintMode,
    results_wanted: u64,
    state: Mutex<LedgerState>,
}

impl DedupLedger {
    pub fn new(mode: FingerprintMode, results_wanted: u32) -> Self {
        Self {
            mode,
            results_wanted: u64::from(results_wanted.max(1)),
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A panic while holding the lock cannot leave the set and counter
        // disagreeing, so the poisoned state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit one record if its fingerprint is new. Returns `true` when accepted.
    pub fn try_admit(&self, record: &ReviewRecord) -> bool {
        let fingerprint = self.mode.fingerprint(record);
        let mut state = self.lock();
        Self::admit_locked(&mut state, fingerprint)
    }

    fn admit_locked(state: &mut LedgerState, fingerprint: Fingerprint) -> bool {
        if state.seen.insert(fingerprint) {
            state.saved += 1;
            true
        } else {
            false
        }
    }

    /// Admit a page's candidates in order, stopping once the goal is met.
    ///
    /// Candidates after the cutoff are not examined at all, so their
    /// fingerprints are not recorded.
    pub fn admit_page(&self, records: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
        let mut state = self.lock();
        let mut accepted = Vec::new();

        for record in records {
            if state.saved >= self.results_wanted {
                break;
            }
            let fingerprint = self.mode.fingerprint(&record);
            if Self::admit_locked(&mut state, fingerprint) {
                accepted.push(record);
            }
        }

        accepted
    }

    pub fn saved_count(&self) -> u64 {
        self.lock().saved
    }

    pub fn goal_reached(&self) -> bool {
        self.saved_count() >= self.results_wanted
    }
}
