use anyhow::Error as AnyhowError;
use thiserror::Error;

use crate::consensus::errors::ConsensusError;

#[derive(Debug, Error)]
#[error("rpc error on method: {method}, message: {error}")]
pub struct RpcError<E: ToString> {
    method: String,
    error: E,
}

impl<E: ToString> RpcError<E> {
    pub fn new(method: &str, err: E) -> Self {
        Self {
            method: method.to_string(),
            error: err,
        }
    }
}

/// Errors that can occur during Node calls
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("consensus client creation error: {0}")]
    ConsensusClientCreationError(ConsensusError),

    #[error("consensus sync error: {0}")]
    ConsensusSyncError(ConsensusError),

    #[error("database error: {0}")]
    DatabaseError(AnyhowError),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("client is not running")]
    NotStarted,

    #[error("run loop task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
