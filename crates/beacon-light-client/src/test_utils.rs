//! Deterministic committees, signed updates and consistent state proofs for tests.

use alloy::primitives::B256;
use milagro_bls::{AggregateSignature, PublicKey, SecretKey, Signature};
use ssz_types::{BitVector, FixedVector};
use tree_hash::TreeHash;

use crate::{
    config::{client_config::Config, networks::Network, ChainConfig},
    consensus::{
        clock::Clock,
        constants::{
            CURRENT_SYNC_COMMITTEE_INDEX, FINALIZED_ROOT_DEPTH, FINALIZED_ROOT_INDEX,
            NEXT_SYNC_COMMITTEE_INDEX, SYNC_COMMITTEE_SIZE,
        },
        merkle::hash_pair,
        types::{
            BeaconBlockHeader, BlsSignature, LightClientBootstrap, LightClientFinalityUpdate,
            LightClientHeader, LightClientOptimisticUpdate, LightClientUpdate, PubKey,
            SyncAggregate, SyncCommittee,
        },
        validation::sync_committee_signing_root,
    },
};

/// Distinct keys per committee, repeated across all committee positions.
pub const UNIQUE_KEYS: usize = 4;

/// Depth of the fake beacon state tree, deep enough for the finalized root.
const STATE_TREE_DEPTH: u32 = FINALIZED_ROOT_DEPTH as u32;

/// Mainnet config with a custom genesis time.
pub fn test_config(genesis_time: u64) -> Config {
    let base = Network::Mainnet.to_base_config();
    Config {
        consensus_rpc: String::new(),
        default_checkpoint: base.default_checkpoint,
        chain: ChainConfig {
            genesis_time,
            ..base.chain
        },
        forks: base.forks,
        max_checkpoint_age: base.max_checkpoint_age,
        ..Default::default()
    }
}

/// Genesis time that puts the wall clock at the start of `current_slot`.
pub fn genesis_time_at_slot(current_slot: u64) -> u64 {
    let now = Clock::now()
        .expect("system clock is after the unix epoch")
        .as_secs();
    now - current_slot * 12
}

/// A sync committee made of [`UNIQUE_KEYS`] keys derived from `seed`.
pub struct TestCommittee {
    pub secret_keys: Vec<SecretKey>,
    pub public_keys: Vec<PublicKey>,
    pub committee: SyncCommittee,
}

impl TestCommittee {
    pub fn new(seed: u8) -> Self {
        let secret_keys: Vec<SecretKey> = (0..UNIQUE_KEYS)
            .map(|index| {
                let mut bytes = [0u8; 32];
                bytes[30] = seed;
                bytes[31] = index as u8 + 1;
                SecretKey::from_bytes(&bytes).expect("small scalars are valid secret keys")
            })
            .collect();
        let public_keys: Vec<PublicKey> =
            secret_keys.iter().map(PublicKey::from_secret_key).collect();

        let pubkeys: Vec<PubKey> = (0..SYNC_COMMITTEE_SIZE)
            .map(|position| PubKey::from_bytes(&public_keys[position % UNIQUE_KEYS].as_bytes()))
            .collect();
        let committee = SyncCommittee {
            pubkeys: FixedVector::from(pubkeys),
            aggregate_pubkey: PubKey::from_bytes(&public_keys[0].as_bytes()),
        };

        Self {
            secret_keys,
            public_keys,
            committee,
        }
    }

    /// Aggregate signature over `message` by the first `participants` committee positions.
    pub fn sign(&self, message: B256, participants: usize) -> BlsSignature {
        let signatures: Vec<Signature> = self
            .secret_keys
            .iter()
            .map(|secret_key| Signature::new(message.as_slice(), secret_key))
            .collect();

        let mut aggregate = AggregateSignature::new();
        for position in 0..participants.min(SYNC_COMMITTEE_SIZE) {
            aggregate.add(&signatures[position % UNIQUE_KEYS]);
        }
        BlsSignature {
            signature: aggregate.as_bytes(),
        }
    }

    pub fn sync_aggregate(&self, message: B256, participants: usize) -> SyncAggregate {
        let mut sync_committee_bits = BitVector::new();
        for position in 0..participants.min(SYNC_COMMITTEE_SIZE) {
            sync_committee_bits
                .set(position, true)
                .expect("position is within the committee");
        }
        SyncAggregate {
            sync_committee_bits,
            sync_committee_signature: self.sign(message, participants),
        }
    }
}

/// Sparse binary tree over generalized indices. Nodes without a leaf at the bottom level
/// get a filler derived from their index.
struct StateTree {
    leaves: Vec<(u64, B256)>,
}

impl StateTree {
    fn new(leaves: Vec<(u64, B256)>) -> Self {
        Self { leaves }
    }

    fn node(&self, gindex: u64) -> B256 {
        if let Some((_, leaf)) = self.leaves.iter().find(|(index, _)| *index == gindex) {
            return *leaf;
        }
        if gindex >= 1 << STATE_TREE_DEPTH {
            return B256::left_padding_from(&gindex.to_be_bytes());
        }
        hash_pair(&self.node(gindex * 2), &self.node(gindex * 2 + 1))
    }

    fn root(&self) -> B256 {
        self.node(1)
    }

    fn branch(&self, gindex: u64) -> Vec<B256> {
        let mut branch = Vec::new();
        let mut index = gindex;
        while index > 1 {
            branch.push(self.node(index ^ 1));
            index >>= 1;
        }
        branch
    }
}

/// Builds bootstraps and signed updates for a chain where period `p` is signed by
/// `committee(p)`.
pub struct TestChain {
    pub config: Config,
}

impl TestChain {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn clock(&self) -> Clock {
        Clock::from_chain_config(&self.config.chain)
    }

    pub fn committee(&self, period: u64) -> TestCommittee {
        TestCommittee::new(period as u8 + 1)
    }

    pub fn header(&self, slot: u64, state_root: B256) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot,
            proposer_index: slot % 1024,
            parent_root: B256::left_padding_from(&slot.to_be_bytes()),
            state_root,
            body_root: B256::repeat_byte(0x42),
        }
    }

    fn finalized_header(&self, slot: u64) -> BeaconBlockHeader {
        self.header(slot, B256::repeat_byte(0x24))
    }

    /// Bootstrap at `slot` and its block root.
    pub fn bootstrap(&self, slot: u64) -> (B256, LightClientBootstrap) {
        let period = self.clock().period_at_slot(slot);
        let committee = self.committee(period).committee;
        let tree = StateTree::new(vec![(
            CURRENT_SYNC_COMMITTEE_INDEX,
            committee.tree_hash_root(),
        )]);
        let header = self.header(slot, tree.root());

        let bootstrap = LightClientBootstrap {
            header: LightClientHeader {
                beacon: header.clone(),
            },
            current_sync_committee: committee,
            current_sync_committee_branch: FixedVector::from(
                tree.branch(CURRENT_SYNC_COMMITTEE_INDEX),
            ),
        };
        (header.tree_hash_root(), bootstrap)
    }

    /// Full update attested at `attested_slot` carrying the next period's committee.
    pub fn update(
        &self,
        attested_slot: u64,
        finalized_slot: Option<u64>,
        participants: usize,
    ) -> LightClientUpdate {
        let next_period = self.clock().period_at_slot(attested_slot) + 1;
        let next_committee = self.committee(next_period).committee;
        self.update_with_next_committee(attested_slot, finalized_slot, participants, next_committee)
    }

    pub fn update_with_next_committee(
        &self,
        attested_slot: u64,
        finalized_slot: Option<u64>,
        participants: usize,
        next_sync_committee: SyncCommittee,
    ) -> LightClientUpdate {
        let finalized_header = finalized_slot
            .map(|slot| self.finalized_header(slot))
            .unwrap_or_default();

        let mut leaves = vec![(NEXT_SYNC_COMMITTEE_INDEX, next_sync_committee.tree_hash_root())];
        if finalized_slot.is_some() {
            leaves.push((FINALIZED_ROOT_INDEX, finalized_header.tree_hash_root()));
        }
        let tree = StateTree::new(leaves);
        let attested_header = self.header(attested_slot, tree.root());

        let finality_branch = match finalized_slot {
            Some(_) => tree.branch(FINALIZED_ROOT_INDEX),
            None => vec![B256::ZERO; FINALIZED_ROOT_DEPTH],
        };

        LightClientUpdate {
            sync_aggregate: self.sign_header(&attested_header, participants),
            attested_header: LightClientHeader {
                beacon: attested_header,
            },
            next_sync_committee,
            next_sync_committee_branch: FixedVector::from(tree.branch(NEXT_SYNC_COMMITTEE_INDEX)),
            finalized_header: LightClientHeader {
                beacon: finalized_header,
            },
            finality_branch: FixedVector::from(finality_branch),
            signature_slot: attested_slot + 1,
        }
    }

    pub fn finality_update(
        &self,
        attested_slot: u64,
        finalized_slot: Option<u64>,
        participants: usize,
    ) -> LightClientFinalityUpdate {
        let update = self.update(attested_slot, finalized_slot, participants);
        LightClientFinalityUpdate {
            attested_header: update.attested_header,
            finalized_header: update.finalized_header,
            finality_branch: update.finality_branch,
            sync_aggregate: update.sync_aggregate,
            signature_slot: update.signature_slot,
        }
    }

    pub fn optimistic_update(
        &self,
        attested_slot: u64,
        participants: usize,
    ) -> LightClientOptimisticUpdate {
        let attested_header = self.header(attested_slot, B256::repeat_byte(0x33));
        LightClientOptimisticUpdate {
            sync_aggregate: self.sign_header(&attested_header, participants),
            attested_header: LightClientHeader {
                beacon: attested_header,
            },
            signature_slot: attested_slot + 1,
        }
    }

    fn sign_header(&self, header: &BeaconBlockHeader, participants: usize) -> SyncAggregate {
        let period = self.clock().period_at_slot(header.slot);
        let signing_root = sync_committee_signing_root(&self.config, header);
        self.committee(period)
            .sync_aggregate(signing_root, participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::merkle::{
        is_current_committee_proof_valid, is_finality_proof_valid, is_next_committee_proof_valid,
    };

    #[test]
    fn generated_proofs_verify() {
        let chain = TestChain::new(test_config(0));

        let (root, bootstrap) = chain.bootstrap(64);
        assert_eq!(root, bootstrap.header.beacon.tree_hash_root());
        assert!(is_current_committee_proof_valid(
            &bootstrap.header.beacon,
            &bootstrap.current_sync_committee,
            &bootstrap.current_sync_committee_branch,
        )
        .unwrap());

        let update = chain.update(200, Some(100), 10);
        assert!(is_finality_proof_valid(
            &update.attested_header.beacon,
            &update.finalized_header.beacon,
            &update.finality_branch,
        )
        .unwrap());
        assert!(is_next_committee_proof_valid(
            &update.attested_header.beacon,
            &update.next_sync_committee,
            &update.next_sync_committee_branch,
        )
        .unwrap());
    }

    #[test]
    fn committees_differ_by_seed() {
        assert_ne!(TestCommittee::new(1).committee, TestCommittee::new(2).committee);
        assert_eq!(TestCommittee::new(3).committee, TestCommittee::new(3).committee);
    }
}
