use std::{collections::HashMap, sync::OnceLock};

use alloy::primitives::B256;
use milagro_bls::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use tracing::debug;

use super::{
    errors::{ConsensusError, SignatureError},
    types::{BlsSignature, SyncCommittee},
};

static BLS_READY: OnceLock<Result<(), String>> = OnceLock::new();

/// One-time initialisation of the BLS backend.
///
/// Runs a sign/verify self test on first call and caches the outcome, so repeated calls are
/// free. Called by the bootstrap path before any update is verified.
pub fn init() -> Result<(), ConsensusError> {
    BLS_READY
        .get_or_init(|| {
            let result = self_test();
            debug!(ok = result.is_ok(), "BLS backend initialised");
            result
        })
        .clone()
        .map_err(ConsensusError::Bls)
}

fn self_test() -> Result<(), String> {
    let mut secret = [0u8; 32];
    secret[31] = 1;
    let secret_key = SecretKey::from_bytes(&secret).map_err(|err| format!("{err:?}"))?;
    let public_key = PublicKey::from_secret_key(&secret_key);
    let message = B256::repeat_byte(0x42);

    let mut signature = AggregateSignature::new();
    signature.add(&Signature::new(message.as_slice(), &secret_key));
    if !signature.fast_aggregate_verify(message.as_slice(), &[&public_key]) {
        return Err("self test signature did not verify".to_string());
    }
    Ok(())
}

/// Deserialized public keys of a sync committee, built once per period.
#[derive(Debug, Clone)]
pub struct TrustedSyncCommittee {
    pub pubkeys: Vec<PublicKey>,
    pub aggregate_pubkey: PublicKey,
}

impl TrustedSyncCommittee {
    /// Decompress every committee key. Validators may sit in a committee more than once, so
    /// each distinct key is only decompressed once.
    pub fn from_committee(committee: &SyncCommittee) -> Result<Self, ConsensusError> {
        let mut decompressed: HashMap<&[u8], PublicKey> = HashMap::new();
        let mut pubkeys = Vec::with_capacity(committee.pubkeys.len());

        for (index, pubkey) in committee.pubkeys.iter().enumerate() {
            let bytes = &pubkey.inner[..];
            let key = match decompressed.get(bytes) {
                Some(key) => key.clone(),
                None => {
                    let key = PublicKey::from_bytes_unchecked(bytes).map_err(|err| {
                        ConsensusError::InvalidPublicKey {
                            index,
                            reason: format!("{err:?}"),
                        }
                    })?;
                    decompressed.insert(bytes, key.clone());
                    key
                }
            };
            pubkeys.push(key);
        }

        let aggregate_pubkey = PublicKey::from_bytes_unchecked(&committee.aggregate_pubkey[..])
            .map_err(|err| ConsensusError::InvalidPublicKey {
                index: committee.pubkeys.len(),
                reason: format!("{err:?}"),
            })?;

        Ok(Self {
            pubkeys,
            aggregate_pubkey,
        })
    }

    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }
}

/// Same as `fast_aggregate_verify` but reports which step failed.
pub fn verify_aggregate(
    public_keys: &[&PublicKey],
    message: &[u8],
    signature: &BlsSignature,
) -> Result<(), SignatureError> {
    let aggregate_pubkey = AggregatePublicKey::aggregate(public_keys)
        .map_err(|err| SignatureError::Aggregation(format!("{err:?}")))?;
    let signature = AggregateSignature::from_bytes(&signature.signature)
        .map_err(|err| SignatureError::Deserialization(format!("{err:?}")))?;

    if signature.fast_aggregate_verify_pre_aggregated(message, &aggregate_pubkey) {
        Ok(())
    } else {
        Err(SignatureError::Verification)
    }
}
