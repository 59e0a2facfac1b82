use std::path::{Path, PathBuf};

use alloy::primitives::{FixedBytes, B256};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::config::{BaseConfig, ChainConfig, Forks, Network};

/// Environment variables with this prefix override file values, nested keys are separated
/// with `__` (e.g. `LIGHT_CLIENT_CHAIN__GENESIS_TIME`).
pub const ENV_PREFIX: &str = "LIGHT_CLIENT_";

pub const DEFAULT_CONFIG_FILE: &str = "light-client.toml";

/// Which network profile to load and from which file, read from `LIGHT_CLIENT_NETWORK` and
/// `LIGHT_CLIENT_CONFIG`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigSelection {
    #[serde(default)]
    pub network: Network,
    #[serde(default = "default_config_file")]
    pub config: PathBuf,
}

fn default_config_file() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

impl ConfigSelection {
    pub fn from_env() -> Result<Self, figment::Error> {
        Self::extract(&Figment::from(
            Env::prefixed(ENV_PREFIX).only(&["network", "config"]),
        ))
    }

    fn extract(figment: &Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }

    pub fn load(&self) -> Result<Config, figment::Error> {
        Config::from_file(&self.config, self.network)
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Config {
    pub consensus_rpc: String,
    pub default_checkpoint: B256,
    #[serde(default)]
    pub checkpoint: Option<B256>,
    pub data_dir: Option<PathBuf>,
    pub chain: ChainConfig,
    pub forks: Forks,
    pub max_checkpoint_age: u64,
    #[serde(default)]
    pub strict_checkpoint_age: bool,
}

impl Config {
    /// Layers the network defaults, the `[<network>]` table of the TOML file at
    /// `config_path` and the environment, in increasing priority.
    pub fn from_file(config_path: &Path, network: Network) -> Result<Self, figment::Error> {
        let profile = network.to_string();

        Figment::new()
            .merge(Serialized::from(network.to_base_config(), profile.as_str()))
            .merge(Toml::file(config_path).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__").profile(profile.as_str()))
            .select(profile.as_str())
            .extract()
    }

    /// Fork version active at `epoch`.
    pub fn fork_version(&self, epoch: u64) -> FixedBytes<4> {
        if epoch >= self.forks.electra.epoch {
            self.forks.electra.fork_version
        } else if epoch >= self.forks.deneb.epoch {
            self.forks.deneb.fork_version
        } else if epoch >= self.forks.capella.epoch {
            self.forks.capella.fork_version
        } else if epoch >= self.forks.bellatrix.epoch {
            self.forks.bellatrix.fork_version
        } else if epoch >= self.forks.altair.epoch {
            self.forks.altair.fork_version
        } else {
            self.forks.genesis.fork_version
        }
    }

    pub fn to_base_config(&self) -> BaseConfig {
        BaseConfig {
            consensus_rpc: Some(self.consensus_rpc.clone()),
            default_checkpoint: self.default_checkpoint,
            chain: self.chain.clone(),
            forks: self.forks.clone(),
            max_checkpoint_age: self.max_checkpoint_age,
        }
    }
}

impl From<BaseConfig> for Config {
    fn from(base: BaseConfig) -> Self {
        Self {
            consensus_rpc: base.consensus_rpc.unwrap_or_default(),
            default_checkpoint: base.default_checkpoint,
            chain: base.chain,
            forks: base.forks,
            max_checkpoint_age: base.max_checkpoint_age,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use alloy::primitives::{b256, fixed_bytes};
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::config::networks;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("light-client.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn file_overrides_network_defaults() {
        let (_dir, path) = write_config(
            r#"
            [mainnet]
            consensus_rpc = "http://localhost:5052"
            checkpoint = "0x9c30624f15e4df4e8f819f89db8b930f36b561b7f70905688ea208d22fb0b822"
            strict_checkpoint_age = true

            [mainnet.chain]
            chain_id = 1
            genesis_time = 1606824023
            genesis_root = "0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95"
            min_sync_committee_participants = 64
            "#,
        );

        let config = Config::from_file(&path, Network::Mainnet).unwrap();
        assert_eq!(config.consensus_rpc, "http://localhost:5052");
        assert_eq!(
            config.checkpoint,
            Some(b256!(
                "0x9c30624f15e4df4e8f819f89db8b930f36b561b7f70905688ea208d22fb0b822"
            ))
        );
        assert!(config.strict_checkpoint_age);
        assert_eq!(config.chain.min_sync_committee_participants, 64);
        assert_eq!(config.chain.slots_per_epoch, 32);
        assert_eq!(config.forks, networks::mainnet().forks);
    }

    #[test]
    fn missing_file_uses_network_defaults() {
        let dir = TempDir::new().unwrap();
        let config =
            Config::from_file(&dir.path().join("absent.toml"), Network::Mainnet).unwrap();
        assert_eq!(config.chain, networks::mainnet().chain);
        assert_eq!(config.max_checkpoint_age, 1_209_600);
        assert_eq!(config.checkpoint, None);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        // Sepolia ships without a default consensus rpc.
        let dir = TempDir::new().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml"), Network::Sepolia)
            .unwrap_err();
        assert!(err.to_string().contains("consensus_rpc"), "{err}");
    }

    #[test]
    fn selection_defaults_to_mainnet() {
        let selection = ConfigSelection::extract(&Figment::new()).unwrap();
        assert_eq!(selection.network, Network::Mainnet);
        assert_eq!(selection.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn selection_loads_chosen_profile() {
        let (_dir, path) = write_config(
            r#"
            [sepolia]
            consensus_rpc = "http://localhost:5052"
            "#,
        );
        let figment = Figment::from(Toml::string(&format!(
            "network = \"sepolia\"\nconfig = {:?}",
            path.display().to_string()
        )));

        let selection = ConfigSelection::extract(&figment).unwrap();
        assert_eq!(selection.network, Network::Sepolia);

        let config = selection.load().unwrap();
        assert_eq!(config.consensus_rpc, "http://localhost:5052");
        assert_eq!(config.chain, networks::sepolia().chain);
    }

    #[rstest]
    #[case(0, fixed_bytes!("0x00000000"))]
    #[case(74239, fixed_bytes!("0x00000000"))]
    #[case(74240, fixed_bytes!("0x01000000"))]
    #[case(269568, fixed_bytes!("0x04000000"))]
    #[case(364032, fixed_bytes!("0x05000000"))]
    #[case(u64::MAX, fixed_bytes!("0x05000000"))]
    fn fork_version_by_epoch(#[case] epoch: u64, #[case] expected: FixedBytes<4>) {
        let config = Config::from(networks::mainnet());
        assert_eq!(config.fork_version(epoch), expected);
    }
}
