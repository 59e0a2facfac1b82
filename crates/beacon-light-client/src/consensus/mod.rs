pub mod bls;
pub mod clock;
pub mod constants;
pub mod errors;
pub mod merkle;
pub mod rpc;
pub mod store;
pub mod types;
pub mod update;
pub mod validation;

mod consensus_client;
pub use crate::consensus::consensus_client::*;
