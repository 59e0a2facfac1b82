use std::ops::RangeInclusive;

use super::{clock::Clock, types::GenericUpdate};

/// The parts of an update the comparator looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    pub participation: u64,
    pub is_finalized: bool,
    pub slot: u64,
}

impl UpdateSummary {
    pub fn from_update(update: &GenericUpdate) -> Self {
        Self {
            participation: update.sync_aggregate.participation(),
            is_finalized: update.finalized_header().is_some(),
            slot: update.attested_header.slot,
        }
    }
}

/// Returns true if `next` should replace `prev` as the best update of a period.
///
/// A finalized update with a supermajority beats a non finalized one. Otherwise more
/// participation wins, and on a tie the older update is kept.
pub fn is_better_update(prev: &UpdateSummary, next: &UpdateSummary, committee_size: u64) -> bool {
    if !prev.is_finalized && next.is_finalized && next.participation * 3 > committee_size * 2 {
        return true;
    }

    if next.participation != prev.participation {
        return next.participation > prev.participation;
    }

    prev.slot > next.slot
}

/// Split `from..=to` into ordered, contiguous chunks of at most `max_len` periods.
pub fn chunkify_range(from: u64, to: u64, max_len: u64) -> Vec<RangeInclusive<u64>> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut start = from;

    while start <= to {
        let end = start.saturating_add(max_len - 1).min(to);
        chunks.push(start..=end);
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Period an update belongs to, from its attested header.
pub fn update_period(clock: &Clock, update: &GenericUpdate) -> u64 {
    clock.period_at_slot(update.attested_header.slot)
}
