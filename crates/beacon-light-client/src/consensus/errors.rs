use alloy::primitives::B256;
use thiserror::Error;

/// Malformed input: wrong lengths or a non-zero "absent" branch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("merkle branch has length {actual}, expected {expected}")]
    BranchLength { expected: usize, actual: usize },

    #[error("{0} must be all zero when the component is absent")]
    NonZeroBranch(&'static str),

    #[error("sync committee bits have length {actual}, committee has {expected} members")]
    BitfieldLength { expected: usize, actual: usize },
}

/// A well formed proof that does not hold.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("invalid finality header merkle branch")]
    InvalidFinalityProof,

    #[error("finalized header period {finalized} != attested header period {attested}")]
    FinalityPeriodMismatch { finalized: u64, attested: u64 },

    #[error("invalid next sync committee merkle branch")]
    InvalidNextSyncCommitteeProof,
}

/// Failures of the aggregate signature check, by the step that failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("error aggregating pubkeys: {0}")]
    Aggregation(String),

    #[error("error deserializing signature: {0}")]
    Deserialization(String),

    #[error("invalid aggregate signature")]
    Verification,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("sync committee has not sufficient participants: {participants} < {minimum}")]
    InsufficientParticipation { participants: u64, minimum: u64 },

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("update rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("no sync committee for period {0}")]
    MissingSyncCommittee(u64),

    #[error("update slot {slot} is ahead of the current slot {current_slot}")]
    UpdateFromFuture { slot: u64, current_slot: i64 },

    #[error("invalid header hash found: expected {expected}, found {found}")]
    InvalidHeaderHash { expected: B256, found: B256 },

    #[error("invalid current sync committee proof")]
    InvalidCurrentSyncCommitteeProof,

    #[error("checkpoint is too old")]
    CheckpointTooOld,

    #[error("rpc is for the incorrect network: expected chain id {expected}, found {found}")]
    IncorrectRpcNetwork { expected: u64, found: u64 },

    #[error("invalid sync committee public key at index {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },

    #[error("bls backend unavailable: {0}")]
    Bls(String),

    #[error("clock error: {0}")]
    Clock(String),

    #[error("transport error: {0}")]
    Transport(anyhow::Error),
}
