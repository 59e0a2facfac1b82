pub mod base;
pub mod client_config;
pub mod networks;
pub mod types;

pub use base::BaseConfig;
pub use client_config::Config;
pub use networks::Network;
pub use types::{ChainConfig, Fork, Forks};
