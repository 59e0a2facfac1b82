//! Light client protocol constants.
//!
//! Generalized indices are the Electra ones from:
//! https://github.com/ethereum/consensus-specs/blob/dev/specs/electra/light-client/sync-protocol.md

use std::time::Duration;

use alloy::primitives::{fixed_bytes, FixedBytes};

/// Number of members of a sync committee.
pub const SYNC_COMMITTEE_SIZE: usize = 512;

/// `get_generalized_index(BeaconState, 'finalized_checkpoint', 'root')`
pub const FINALIZED_ROOT_INDEX: u64 = 169;
pub const FINALIZED_ROOT_DEPTH: usize = 7;

/// `get_generalized_index(BeaconState, 'next_sync_committee')`
pub const NEXT_SYNC_COMMITTEE_INDEX: u64 = 87;
pub const NEXT_SYNC_COMMITTEE_DEPTH: usize = 6;

/// `get_generalized_index(BeaconState, 'current_sync_committee')`
pub const CURRENT_SYNC_COMMITTEE_INDEX: u64 = 86;
pub const CURRENT_SYNC_COMMITTEE_DEPTH: usize = 6;

pub const DOMAIN_SYNC_COMMITTEE: FixedBytes<4> = fixed_bytes!("0x07000000");

/// Default floor on the signers of an accepted update. A lone signature proves close to
/// nothing about the committee.
pub const MIN_SYNC_COMMITTEE_PARTICIPANTS: u64 = 2;

/// Tolerance for signed headers slightly ahead of the local clock.
pub const MAX_CLOCK_DISPARITY: Duration = Duration::from_secs(10);

/// Request size ceiling for `get_updates`, keeps responses from being truncated.
pub const MAX_PERIODS_PER_REQUEST: u64 = 32;

/// Upper bound of epochs before the end of a period to start polling for the next committee.
pub const MAX_LOOKAHEAD_EPOCHS_COMMITTEE_SYNC: u64 = 8;

/// Delay before retrying a failed catch-up sync.
pub const ON_ERROR_RETRY: Duration = Duration::from_millis(1000);

/// The sync store holds committees for the current and next period only.
pub const MAX_STORED_SYNC_COMMITTEES: usize = 2;
