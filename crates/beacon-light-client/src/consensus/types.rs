use std::ops::Deref;

use alloy::primitives::B256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_this_or_that::as_u64;
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use ssz_types::{
    typenum::{U48, U512, U6, U7},
    BitVector, FixedVector,
};
use tree_hash::{merkle_root, Hash256, PackedEncoding, TreeHash, TreeHashType};
use tree_hash_derive::TreeHash;

use crate::utils::{hex_decode, hex_encode};

pub type SyncCommitteeSize = U512;
pub type FinalizedRootProofLen = U7;
pub type SyncCommitteeProofLen = U6;

pub type FinalityBranch = FixedVector<B256, FinalizedRootProofLen>;
pub type SyncCommitteeBranch = FixedVector<B256, SyncCommitteeProofLen>;

/// Genesis parameters every signing domain is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenesisData {
    pub genesis_time: u64,
    pub genesis_validators_root: B256,
}

/// Types based off specs @
/// https://github.com/ethereum/consensus-specs/blob/5970ae56a1cd50ea06049d8aad6bed74093d49d3/specs/phase0/beacon-chain.md
#[derive(
    Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct BeaconBlockHeader {
    #[serde(deserialize_with = "as_u64")]
    pub slot: u64,
    #[serde(deserialize_with = "as_u64")]
    pub proposer_index: u64,
    pub parent_root: B256,
    pub state_root: B256,
    pub body_root: B256,
}

impl BeaconBlockHeader {
    /// An all-default header stands for "nothing finalized yet".
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, PartialEq, Clone, TreeHash)]
pub struct PubKey {
    pub inner: FixedVector<u8, U48>,
}

impl PubKey {
    pub fn from_bytes(bytes: &[u8; 48]) -> Self {
        Self {
            inner: FixedVector::from(bytes.to_vec()),
        }
    }
}

impl Default for PubKey {
    fn default() -> Self {
        Self {
            inner: FixedVector::from_elem(0),
        }
    }
}

impl Deref for PubKey {
    type Target = FixedVector<u8, U48>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Decode for PubKey {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        48
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, ssz::DecodeError> {
        if bytes.len() != 48 {
            return Err(ssz::DecodeError::InvalidByteLength {
                len: bytes.len(),
                expected: 48,
            });
        }
        Ok(Self {
            inner: FixedVector::from(bytes.to_vec()),
        })
    }
}

impl Encode for PubKey {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        48
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.inner);
    }

    fn ssz_bytes_len(&self) -> usize {
        self.inner.len()
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let result: String = Deserialize::deserialize(deserializer)?;
        let result = hex_decode(&result).map_err(serde::de::Error::custom)?;
        let inner = FixedVector::new(result)
            .map_err(|err| serde::de::Error::custom(format!("invalid pubkey length: {err:?}")))?;
        Ok(Self { inner })
    }
}

impl Serialize for PubKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex_encode(&self.inner[..]))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BlsSignature {
    pub signature: [u8; 96],
}

impl Default for BlsSignature {
    fn default() -> Self {
        Self {
            signature: [0u8; 96],
        }
    }
}

impl Decode for BlsSignature {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        96
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, ssz::DecodeError> {
        let signature = bytes
            .try_into()
            .map_err(|_| ssz::DecodeError::InvalidByteLength {
                len: bytes.len(),
                expected: 96,
            })?;
        Ok(Self { signature })
    }
}

impl Encode for BlsSignature {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        96
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.signature);
    }

    fn ssz_bytes_len(&self) -> usize {
        96
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let result: String = Deserialize::deserialize(deserializer)?;
        let result = hex_decode(&result).map_err(serde::de::Error::custom)?;
        let signature = result.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!("invalid signature length: {}", result.len()))
        })?;
        Ok(Self { signature })
    }
}

impl Serialize for BlsSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex_encode(self.signature))
    }
}

impl TreeHash for BlsSignature {
    fn tree_hash_type() -> TreeHashType {
        TreeHashType::Vector
    }

    fn tree_hash_packed_encoding(&self) -> PackedEncoding {
        PackedEncoding::from_vec(self.signature.to_vec())
    }

    fn tree_hash_packing_factor() -> usize {
        1
    }

    fn tree_hash_root(&self) -> Hash256 {
        merkle_root(&self.signature, 1)
    }
}

/// https://github.com/ethereum/consensus-specs/blob/dev/specs/altair/beacon-chain.md#synccommittee
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct SyncCommittee {
    pub pubkeys: FixedVector<PubKey, SyncCommitteeSize>,
    pub aggregate_pubkey: PubKey,
}

impl Default for SyncCommittee {
    fn default() -> Self {
        Self {
            pubkeys: FixedVector::from_elem(PubKey::default()),
            aggregate_pubkey: PubKey::default(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct SyncAggregate {
    pub sync_committee_bits: BitVector<SyncCommitteeSize>,
    pub sync_committee_signature: BlsSignature,
}

impl SyncAggregate {
    /// Number of committee members that took part in the aggregate.
    pub fn participation(&self) -> u64 {
        self.sync_committee_bits.num_set_bits() as u64
    }
}

/// Light client header. Execution payload fields introduced by later forks are
/// accepted on the wire and ignored.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize, Encode, Decode)]
pub struct LightClientHeader {
    pub beacon: BeaconBlockHeader,
}

/// `LightClientBootstrap` object for the configured trusted block root.
/// The bootstrap object is used to generate a local `SyncStore`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct LightClientBootstrap {
    /// Header matching the requested beacon block root
    pub header: LightClientHeader,
    /// Current sync committee corresponding to `header.beacon.state_root`
    pub current_sync_committee: SyncCommittee,
    pub current_sync_committee_branch: SyncCommitteeBranch,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct LightClientUpdate {
    /// The last `LightClientHeader` from the last attested block by the sync committee.
    pub attested_header: LightClientHeader,
    /// Next sync committee corresponding to `attested_header.beacon.state_root`
    pub next_sync_committee: SyncCommittee,
    pub next_sync_committee_branch: SyncCommitteeBranch,
    /// Finalized header corresponding to `attested_header.beacon.state_root`
    pub finalized_header: LightClientHeader,
    pub finality_branch: FinalityBranch,
    /// Sync committee aggregate signature
    pub sync_aggregate: SyncAggregate,
    /// Slot at which the aggregate signature was created (untrusted)
    #[serde(deserialize_with = "as_u64")]
    pub signature_slot: u64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct LightClientFinalityUpdate {
    pub attested_header: LightClientHeader,
    pub finalized_header: LightClientHeader,
    pub finality_branch: FinalityBranch,
    pub sync_aggregate: SyncAggregate,
    #[serde(deserialize_with = "as_u64")]
    pub signature_slot: u64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct LightClientOptimisticUpdate {
    pub attested_header: LightClientHeader,
    pub sync_aggregate: SyncAggregate,
    #[serde(deserialize_with = "as_u64")]
    pub signature_slot: u64,
}

/// Borrowed view over the three update shapes, consumed by the validator.
#[derive(Debug, Clone, Copy)]
pub struct GenericUpdate<'a> {
    pub attested_header: &'a BeaconBlockHeader,
    pub sync_aggregate: &'a SyncAggregate,
    pub signature_slot: u64,
    pub next_sync_committee: Option<(&'a SyncCommittee, &'a SyncCommitteeBranch)>,
    pub finality: Option<(&'a BeaconBlockHeader, &'a FinalityBranch)>,
}

impl<'a> GenericUpdate<'a> {
    pub fn finalized_header(&self) -> Option<&'a BeaconBlockHeader> {
        self.finality
            .map(|(header, _)| header)
            .filter(|header| !header.is_empty())
    }
}

impl<'a> From<&'a LightClientUpdate> for GenericUpdate<'a> {
    fn from(update: &'a LightClientUpdate) -> Self {
        Self {
            attested_header: &update.attested_header.beacon,
            sync_aggregate: &update.sync_aggregate,
            signature_slot: update.signature_slot,
            next_sync_committee: Some((
                &update.next_sync_committee,
                &update.next_sync_committee_branch,
            )),
            finality: Some((&update.finalized_header.beacon, &update.finality_branch)),
        }
    }
}

impl<'a> From<&'a LightClientFinalityUpdate> for GenericUpdate<'a> {
    fn from(update: &'a LightClientFinalityUpdate) -> Self {
        Self {
            attested_header: &update.attested_header.beacon,
            sync_aggregate: &update.sync_aggregate,
            signature_slot: update.signature_slot,
            next_sync_committee: None,
            finality: Some((&update.finalized_header.beacon, &update.finality_branch)),
        }
    }
}

impl<'a> From<&'a LightClientOptimisticUpdate> for GenericUpdate<'a> {
    fn from(update: &'a LightClientOptimisticUpdate) -> Self {
        Self {
            attested_header: &update.attested_header.beacon,
            sync_aggregate: &update.sync_aggregate,
            signature_slot: update.signature_slot,
            next_sync_committee: None,
            finality: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::b256;

    use super::*;

    #[test]
    fn header_deserializes_quoted_integers() {
        let json = r#"{
            "slot": "7358726",
            "proposer_index": "1044",
            "parent_root": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "state_root": "0x0000000000000000000000000000000000000000000000000000000000000002",
            "body_root": "0x0000000000000000000000000000000000000000000000000000000000000003"
        }"#;
        let header: BeaconBlockHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.slot, 7358726);
        assert_eq!(header.proposer_index, 1044);
        assert_eq!(
            header.body_root,
            b256!("0x0000000000000000000000000000000000000000000000000000000000000003")
        );
        assert!(!header.is_empty());
        assert!(BeaconBlockHeader::default().is_empty());
    }

    #[test]
    fn light_client_header_ignores_execution_fields() {
        let json = r#"{
            "beacon": {
                "slot": "1",
                "proposer_index": "2",
                "parent_root": "0x0000000000000000000000000000000000000000000000000000000000000000",
                "state_root": "0x0000000000000000000000000000000000000000000000000000000000000000",
                "body_root": "0x0000000000000000000000000000000000000000000000000000000000000000"
            },
            "execution": { "block_number": "100" },
            "execution_branch": []
        }"#;
        let header: LightClientHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.beacon.slot, 1);
    }

    #[test]
    fn pubkey_rejects_wrong_length() {
        let err = serde_json::from_str::<PubKey>("\"0x0102\"").unwrap_err();
        assert!(err.to_string().contains("invalid pubkey length"));
    }

    #[test]
    fn empty_finalized_header_is_not_exposed() {
        let update = LightClientFinalityUpdate {
            attested_header: LightClientHeader::default(),
            finalized_header: LightClientHeader::default(),
            finality_branch: FixedVector::default(),
            sync_aggregate: SyncAggregate::default(),
            signature_slot: 1,
        };
        assert!(GenericUpdate::from(&update).finalized_header().is_none());
    }
}
