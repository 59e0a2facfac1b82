use alloy::primitives::{FixedBytes, B256};
use serde::{Deserialize, Serialize};

use crate::consensus::{constants::MIN_SYNC_COMMITTEE_PARTICIPANTS, types::GenesisData};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub genesis_time: u64,
    pub genesis_root: B256,
    #[serde(default = "default_seconds_per_slot")]
    pub seconds_per_slot: u64,
    #[serde(default = "default_slots_per_epoch")]
    pub slots_per_epoch: u64,
    #[serde(default = "default_epochs_per_sync_committee_period")]
    pub epochs_per_sync_committee_period: u64,
    /// Updates signed by fewer committee members are rejected.
    #[serde(default = "default_min_sync_committee_participants")]
    pub min_sync_committee_participants: u64,
}

fn default_seconds_per_slot() -> u64 {
    12
}

fn default_slots_per_epoch() -> u64 {
    32
}

fn default_epochs_per_sync_committee_period() -> u64 {
    256
}

fn default_min_sync_committee_participants() -> u64 {
    MIN_SYNC_COMMITTEE_PARTICIPANTS
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            genesis_time: 0,
            genesis_root: B256::ZERO,
            seconds_per_slot: default_seconds_per_slot(),
            slots_per_epoch: default_slots_per_epoch(),
            epochs_per_sync_committee_period: default_epochs_per_sync_committee_period(),
            min_sync_committee_participants: default_min_sync_committee_participants(),
        }
    }
}

impl ChainConfig {
    pub fn genesis_data(&self) -> GenesisData {
        GenesisData {
            genesis_time: self.genesis_time,
            genesis_validators_root: self.genesis_root,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Forks {
    pub genesis: Fork,
    pub altair: Fork,
    pub bellatrix: Fork,
    pub capella: Fork,
    pub deneb: Fork,
    pub electra: Fork,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Fork {
    pub epoch: u64,
    pub fork_version: FixedBytes<4>,
}
