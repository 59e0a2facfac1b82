use alloy::primitives::{FixedBytes, B256};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// Encode bytes as a `0x` prefixed hex string.
pub fn hex_encode<T: AsRef<[u8]>>(data: T) -> String {
    format!("0x{}", hex::encode(data))
}

/// Decode a hex string, with or without the `0x` prefix.
pub fn hex_decode(data: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(data.strip_prefix("0x").unwrap_or(data))
}

#[derive(Default, Debug, TreeHash)]
struct ForkData {
    current_version: FixedBytes<4>,
    genesis_validators_root: B256,
}

#[derive(Default, Debug, TreeHash)]
struct SigningData {
    object_root: B256,
    domain: B256,
}

pub fn compute_fork_data_root(
    current_version: FixedBytes<4>,
    genesis_validators_root: B256,
) -> B256 {
    let fork_data = ForkData {
        current_version,
        genesis_validators_root,
    };
    fork_data.tree_hash_root()
}

/// `domain_type ‖ fork_data_root[..28]`
pub fn compute_domain(
    domain_type: FixedBytes<4>,
    fork_version: FixedBytes<4>,
    genesis_validators_root: B256,
) -> B256 {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);
    let mut domain = B256::ZERO;
    domain[..4].copy_from_slice(domain_type.as_slice());
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

pub fn compute_signing_root(object_root: B256, domain: B256) -> B256 {
    SigningData {
        object_root,
        domain,
    }
    .tree_hash_root()
}
