use std::sync::Arc;

use tracing::debug;

use super::{
    bls::TrustedSyncCommittee, constants::MAX_STORED_SYNC_COMMITTEES, types::BeaconBlockHeader,
    update::{is_better_update, UpdateSummary},
};

/// Map keyed by sync committee period, bounded by evicting the oldest inserted entries.
///
/// Overwriting a period keeps its original insertion position.
#[derive(Debug, Clone)]
pub struct BoundedPeriodMap<V> {
    capacity: usize,
    entries: Vec<(u64, V)>,
}

impl<V> BoundedPeriodMap<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn get(&self, period: u64) -> Option<&V> {
        self.entries
            .iter()
            .find(|(key, _)| *key == period)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, period: u64) -> bool {
        self.get(period).is_some()
    }

    /// Insert or overwrite `period`, returning the periods evicted to stay within capacity.
    pub fn insert(&mut self, period: u64, value: V) -> Vec<u64> {
        match self.entries.iter_mut().find(|(key, _)| *key == period) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((period, value)),
        }

        let excess = self.entries.len().saturating_sub(self.capacity);
        self.entries
            .drain(..excess)
            .map(|(key, _)| key)
            .collect()
    }

    /// Periods in insertion order.
    pub fn periods(&self) -> Vec<u64> {
        self.entries.iter().map(|(key, _)| *key).collect()
    }

}

/// Trusted light client state: the two tracked headers, the committees known per period
/// and the best update seen for each period.
#[derive(Debug, Clone)]
pub struct SyncStore {
    optimistic_header: BeaconBlockHeader,
    finalized_header: BeaconBlockHeader,
    sync_committees: BoundedPeriodMap<Arc<TrustedSyncCommittee>>,
    best_updates: BoundedPeriodMap<UpdateSummary>,
}

impl SyncStore {
    /// Store seeded from a validated bootstrap. The bootstrap header is both the optimistic
    /// and the finalized header.
    pub fn new(header: BeaconBlockHeader, period: u64, committee: TrustedSyncCommittee) -> Self {
        let mut sync_committees = BoundedPeriodMap::new(MAX_STORED_SYNC_COMMITTEES);
        sync_committees.insert(period, Arc::new(committee));

        Self {
            optimistic_header: header.clone(),
            finalized_header: header,
            sync_committees,
            best_updates: BoundedPeriodMap::new(MAX_STORED_SYNC_COMMITTEES),
        }
    }

    pub fn optimistic_header(&self) -> &BeaconBlockHeader {
        &self.optimistic_header
    }

    pub fn finalized_header(&self) -> &BeaconBlockHeader {
        &self.finalized_header
    }

    pub fn sync_committee(&self, period: u64) -> Option<Arc<TrustedSyncCommittee>> {
        self.sync_committees.get(period).cloned()
    }

    pub fn has_sync_committee(&self, period: u64) -> bool {
        self.sync_committees.contains(period)
    }

    /// Periods with a known committee, oldest inserted first.
    pub fn sync_committee_periods(&self) -> Vec<u64> {
        self.sync_committees.periods()
    }

    /// Whether `candidate` would replace the best update recorded for `period`.
    pub fn is_best_update(
        &self,
        period: u64,
        candidate: &UpdateSummary,
        committee_size: u64,
    ) -> bool {
        match self.best_updates.get(period) {
            Some(best) => is_better_update(best, candidate, committee_size),
            None => true,
        }
    }

    /// Record `summary` as the best update of `period` and trust `next_committee` for the
    /// following period, unless a better update is already recorded. Returns whether it was
    /// stored.
    pub fn store_best_update(
        &mut self,
        period: u64,
        summary: UpdateSummary,
        committee_size: u64,
        next_committee: TrustedSyncCommittee,
    ) -> bool {
        if !self.is_best_update(period, &summary, committee_size) {
            return false;
        }
        self.best_updates.insert(period, summary);
        let evicted = self
            .sync_committees
            .insert(period + 1, Arc::new(next_committee));
        if !evicted.is_empty() {
            debug!(?evicted, "Evicted sync committees");
        }
        true
    }

    /// Overwrites the optimistic header regardless of slot.
    pub fn set_optimistic_header(&mut self, header: BeaconBlockHeader) {
        self.optimistic_header = header;
    }

    pub fn set_finalized_header(&mut self, header: BeaconBlockHeader) {
        self.finalized_header = header;
    }

    /// Moves the optimistic header forward if `header` is newer. Returns whether it moved.
    pub fn advance_optimistic_header(&mut self, header: &BeaconBlockHeader) -> bool {
        if header.slot > self.optimistic_header.slot {
            self.optimistic_header = header.clone();
            return true;
        }
        false
    }

    /// Moves the finalized header forward if `header` is newer. Returns whether it moved.
    pub fn advance_finalized_header(&mut self, header: &BeaconBlockHeader) -> bool {
        if header.slot > self.finalized_header.slot {
            self.finalized_header = header.clone();
            return true;
        }
        false
    }
}
