use alloy::primitives::B256;
use milagro_bls::PublicKey;
use ssz_types::{typenum::Unsigned, BitVector};
use tree_hash::TreeHash;

use super::{
    bls::{verify_aggregate, TrustedSyncCommittee},
    clock::Clock,
    constants::{DOMAIN_SYNC_COMMITTEE, FINALIZED_ROOT_DEPTH},
    errors::{ProofError, StructuralError, ValidationError},
    merkle::{assert_zero_branch, is_finality_proof_valid, is_next_committee_proof_valid},
    types::{BeaconBlockHeader, GenericUpdate, SyncAggregate, SyncCommitteeSize},
};
use crate::{
    config::client_config::Config,
    utils::{compute_domain, compute_signing_root},
};

/// Signing root a sync committee signs for `header`.
///
/// The signature commits to the block root at `slot - 1`, so the fork version is the one
/// active at the epoch of the previous slot.
pub fn sync_committee_signing_root(config: &Config, header: &BeaconBlockHeader) -> B256 {
    let clock = Clock::from_chain_config(&config.chain);
    let previous_slot = header.slot.saturating_sub(1);
    let fork_version = config.fork_version(clock.epoch_at_slot(previous_slot));
    let genesis = config.chain.genesis_data();
    let domain = compute_domain(
        DOMAIN_SYNC_COMMITTEE,
        fork_version,
        genesis.genesis_validators_root,
    );
    compute_signing_root(header.tree_hash_root(), domain)
}

/// Checks an update against the committee trusted for its period.
///
/// Cheap structural and proof checks run first, the aggregate signature last. Any failure
/// rejects the whole update.
pub fn assert_valid_update(
    config: &Config,
    sync_committee: &TrustedSyncCommittee,
    update: &GenericUpdate,
) -> Result<(), ValidationError> {
    let clock = Clock::from_chain_config(&config.chain);

    if let Some((finalized_header, finality_branch)) = update.finality {
        if finalized_header.is_empty() {
            assert_zero_branch(finality_branch, FINALIZED_ROOT_DEPTH, "finality_branch")?;
        } else {
            assert_valid_finality_proof(
                &clock,
                update.attested_header,
                finalized_header,
                finality_branch,
            )?;
        }
    }

    // Checked even when the update does not advance the period, a same period update may
    // still be kept as the best one and used later.
    if let Some((next_sync_committee, next_sync_committee_branch)) = update.next_sync_committee {
        if !is_next_committee_proof_valid(
            update.attested_header,
            next_sync_committee,
            next_sync_committee_branch,
        )? {
            return Err(ProofError::InvalidNextSyncCommitteeProof.into());
        }
    }

    assert_valid_signed_header(
        config,
        sync_committee,
        update.sync_aggregate,
        update.attested_header,
    )
}

fn assert_valid_finality_proof(
    clock: &Clock,
    attested_header: &BeaconBlockHeader,
    finalized_header: &BeaconBlockHeader,
    finality_branch: &[B256],
) -> Result<(), ValidationError> {
    if !is_finality_proof_valid(attested_header, finalized_header, finality_branch)? {
        return Err(ProofError::InvalidFinalityProof.into());
    }

    let attested = clock.period_at_slot(attested_header.slot);
    let finalized = clock.period_at_slot(finalized_header.slot);
    if finalized != attested {
        return Err(ProofError::FinalityPeriodMismatch {
            finalized,
            attested,
        }
        .into());
    }
    Ok(())
}

/// Verify the sync aggregate over `attested_header` with the trusted committee.
pub fn assert_valid_signed_header(
    config: &Config,
    sync_committee: &TrustedSyncCommittee,
    sync_aggregate: &SyncAggregate,
    attested_header: &BeaconBlockHeader,
) -> Result<(), ValidationError> {
    let participants =
        get_participating_keys(sync_committee, &sync_aggregate.sync_committee_bits)?;

    // Aggregates included in blocks may have no participants at all, those are useless here.
    let minimum = config.chain.min_sync_committee_participants;
    if (participants.len() as u64) < minimum {
        return Err(ValidationError::InsufficientParticipation {
            participants: participants.len() as u64,
            minimum,
        });
    }

    let signing_root = sync_committee_signing_root(config, attested_header);
    verify_aggregate(
        &participants,
        signing_root.as_slice(),
        &sync_aggregate.sync_committee_signature,
    )?;
    Ok(())
}

/// Public keys of the committee members whose bit is set. The bitfield must cover the
/// committee exactly.
pub fn get_participating_keys<'a>(
    committee: &'a TrustedSyncCommittee,
    bitfield: &BitVector<SyncCommitteeSize>,
) -> Result<Vec<&'a PublicKey>, StructuralError> {
    let expected = committee.len();
    let actual = SyncCommitteeSize::to_usize();
    if expected != actual {
        return Err(StructuralError::BitfieldLength { expected, actual });
    }

    Ok(bitfield
        .iter()
        .zip(committee.pubkeys.iter())
        .filter_map(|(bit, pubkey)| bit.then_some(pubkey))
        .collect())
}
