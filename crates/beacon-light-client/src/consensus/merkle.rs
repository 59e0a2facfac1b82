use alloy::primitives::B256;
use tree_hash::{merkle_root, TreeHash};

use super::{
    constants::{
        CURRENT_SYNC_COMMITTEE_DEPTH, CURRENT_SYNC_COMMITTEE_INDEX, FINALIZED_ROOT_DEPTH,
        FINALIZED_ROOT_INDEX, NEXT_SYNC_COMMITTEE_DEPTH, NEXT_SYNC_COMMITTEE_INDEX,
    },
    errors::StructuralError,
    types::{BeaconBlockHeader, SyncCommittee},
};

/// Hash of two sibling nodes.
pub fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut node = [0u8; 64];
    node[..32].copy_from_slice(left.as_slice());
    node[32..].copy_from_slice(right.as_slice());
    merkle_root(&node, 2)
}

/// Verify that `leaf` is included under `root` at the position encoded by the generalized
/// `index`, walking `depth` levels of `proof`.
///
/// A proof whose length differs from `depth` is a structural error rather than a failed
/// verification.
pub fn is_valid_merkle_branch(
    leaf: B256,
    proof: &[B256],
    depth: usize,
    index: u64,
    root: B256,
) -> Result<bool, StructuralError> {
    if proof.len() != depth {
        return Err(StructuralError::BranchLength {
            expected: depth,
            actual: proof.len(),
        });
    }

    let value = proof
        .iter()
        .enumerate()
        .fold(leaf, |value, (level, sibling)| {
            if (index >> level) & 1 == 1 {
                hash_pair(sibling, &value)
            } else {
                hash_pair(&value, sibling)
            }
        });

    Ok(value == root)
}

/// Require an absent proof component to be encoded as an all-zero branch of `expected_len`.
pub fn assert_zero_branch(
    branch: &[B256],
    expected_len: usize,
    name: &'static str,
) -> Result<(), StructuralError> {
    if branch.len() != expected_len {
        return Err(StructuralError::BranchLength {
            expected: expected_len,
            actual: branch.len(),
        });
    }
    if branch.iter().any(|node| !node.is_zero()) {
        return Err(StructuralError::NonZeroBranch(name));
    }
    Ok(())
}

pub fn is_finality_proof_valid(
    attested_header: &BeaconBlockHeader,
    finalized_header: &BeaconBlockHeader,
    finality_branch: &[B256],
) -> Result<bool, StructuralError> {
    is_valid_merkle_branch(
        finalized_header.tree_hash_root(),
        finality_branch,
        FINALIZED_ROOT_DEPTH,
        FINALIZED_ROOT_INDEX,
        attested_header.state_root,
    )
}

pub fn is_next_committee_proof_valid(
    attested_header: &BeaconBlockHeader,
    next_committee: &SyncCommittee,
    next_committee_branch: &[B256],
) -> Result<bool, StructuralError> {
    is_valid_merkle_branch(
        next_committee.tree_hash_root(),
        next_committee_branch,
        NEXT_SYNC_COMMITTEE_DEPTH,
        NEXT_SYNC_COMMITTEE_INDEX,
        attested_header.state_root,
    )
}

pub fn is_current_committee_proof_valid(
    header: &BeaconBlockHeader,
    current_committee: &SyncCommittee,
    current_committee_branch: &[B256],
) -> Result<bool, StructuralError> {
    is_valid_merkle_branch(
        current_committee.tree_hash_root(),
        current_committee_branch,
        CURRENT_SYNC_COMMITTEE_DEPTH,
        CURRENT_SYNC_COMMITTEE_INDEX,
        header.state_root,
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    /// Hash `leaf` up to the root along the path of `index`, using arbitrary siblings.
    fn build_proof(leaf: B256, depth: usize, index: u64) -> (Vec<B256>, B256) {
        let proof: Vec<B256> = (0..depth)
            .map(|level| B256::repeat_byte(level as u8 + 0x10))
            .collect();
        let mut value = leaf;
        for (level, sibling) in proof.iter().enumerate() {
            value = if (index >> level) & 1 == 1 {
                hash_pair(sibling, &value)
            } else {
                hash_pair(&value, sibling)
            };
        }
        (proof, value)
    }

    #[rstest]
    #[case::finalized_root(FINALIZED_ROOT_DEPTH, FINALIZED_ROOT_INDEX)]
    #[case::next_committee(NEXT_SYNC_COMMITTEE_DEPTH, NEXT_SYNC_COMMITTEE_INDEX)]
    #[case::current_committee(CURRENT_SYNC_COMMITTEE_DEPTH, CURRENT_SYNC_COMMITTEE_INDEX)]
    #[case::shallow(1, 3)]
    fn accepts_generated_proof(#[case] depth: usize, #[case] index: u64) {
        let leaf = B256::repeat_byte(0xab);
        let (proof, root) = build_proof(leaf, depth, index);
        assert!(is_valid_merkle_branch(leaf, &proof, depth, index, root).unwrap());
    }

    #[test]
    fn rejects_any_flipped_byte() {
        let leaf = B256::repeat_byte(0xab);
        let (proof, root) = build_proof(leaf, FINALIZED_ROOT_DEPTH, FINALIZED_ROOT_INDEX);

        for level in 0..proof.len() {
            for byte in 0..32 {
                let mut tampered = proof.clone();
                tampered[level][byte] ^= 0x01;
                assert!(!is_valid_merkle_branch(
                    leaf,
                    &tampered,
                    FINALIZED_ROOT_DEPTH,
                    FINALIZED_ROOT_INDEX,
                    root
                )
                .unwrap());
            }
        }
    }

    #[test]
    fn rejects_wrong_index() {
        let leaf = B256::repeat_byte(0xab);
        let (proof, root) = build_proof(leaf, NEXT_SYNC_COMMITTEE_DEPTH, NEXT_SYNC_COMMITTEE_INDEX);
        assert!(!is_valid_merkle_branch(
            leaf,
            &proof,
            CURRENT_SYNC_COMMITTEE_DEPTH,
            CURRENT_SYNC_COMMITTEE_INDEX,
            root
        )
        .unwrap());
    }

    #[test]
    fn short_proof_is_a_structural_error() {
        let leaf = B256::repeat_byte(0xab);
        let (mut proof, root) = build_proof(leaf, 6, 87);
        proof.pop();
        assert_eq!(
            is_valid_merkle_branch(leaf, &proof, 6, 87, root),
            Err(StructuralError::BranchLength {
                expected: 6,
                actual: 5
            })
        );
    }

    #[test]
    fn zero_branch_checks() {
        let zero = vec![B256::ZERO; FINALIZED_ROOT_DEPTH];
        assert!(assert_zero_branch(&zero, FINALIZED_ROOT_DEPTH, "finality_branch").is_ok());

        let mut dirty = zero.clone();
        dirty[3][31] = 1;
        assert_eq!(
            assert_zero_branch(&dirty, FINALIZED_ROOT_DEPTH, "finality_branch"),
            Err(StructuralError::NonZeroBranch("finality_branch"))
        );

        assert!(matches!(
            assert_zero_branch(&zero[1..], FINALIZED_ROOT_DEPTH, "finality_branch"),
            Err(StructuralError::BranchLength { .. })
        ));
    }
}
