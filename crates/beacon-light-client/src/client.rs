use std::{path::PathBuf, sync::Arc};

use alloy::primitives::B256;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    config::{client_config::Config, networks::Network},
    consensus::{
        errors::ConsensusError, rpc::ConsensusRpc, types::BeaconBlockHeader, ConsensusLightClient,
        SyncStatus,
    },
    database::Database,
    errors::NodeError,
    watch::HeadWatchReceivers,
};

#[derive(Default)]
pub struct ClientBuilder {
    network: Option<Network>,
    consensus_rpc: Option<String>,
    checkpoint: Option<B256>,
    data_dir: Option<PathBuf>,
    config: Option<Config>,
    max_checkpoint_age: Option<u64>,
    strict_checkpoint_age: bool,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn consensus_rpc(mut self, consensus_rpc: &str) -> Self {
        self.consensus_rpc = Some(consensus_rpc.to_string());
        self
    }

    pub fn checkpoint(mut self, checkpoint: B256) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    /// Start from a full config instead of the network defaults. Values set on the builder
    /// still take precedence.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn max_checkpoint_age(mut self, max_checkpoint_age: u64) -> Self {
        self.max_checkpoint_age = Some(max_checkpoint_age);
        self
    }

    pub fn strict_checkpoint_age(mut self) -> Self {
        self.strict_checkpoint_age = true;
        self
    }

    fn build_config(self) -> Result<Config, NodeError> {
        let mut config = match (self.config, self.network) {
            (Some(config), _) => config,
            (None, Some(network)) => Config::from(network.to_base_config()),
            (None, None) => {
                return Err(NodeError::ConfigError(
                    "either a network or a config is required".to_string(),
                ))
            }
        };

        if let Some(consensus_rpc) = self.consensus_rpc {
            config.consensus_rpc = consensus_rpc;
        }
        if self.checkpoint.is_some() {
            config.checkpoint = self.checkpoint;
        }
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        if let Some(max_checkpoint_age) = self.max_checkpoint_age {
            config.max_checkpoint_age = max_checkpoint_age;
        }
        config.strict_checkpoint_age |= self.strict_checkpoint_age;

        if config.consensus_rpc.is_empty() {
            return Err(NodeError::ConfigError("missing consensus rpc".to_string()));
        }
        Ok(config)
    }

    pub fn build<DB: Database, R: ConsensusRpc>(self) -> Result<Client<DB, R>, NodeError> {
        let config = self.build_config()?;
        let rpc = R::new(&config.consensus_rpc);
        Client::new(config, rpc)
    }

    /// Build with an already constructed transport, `consensus_rpc` is not required.
    pub fn build_with_rpc<DB: Database, R: ConsensusRpc>(
        mut self,
        rpc: R,
    ) -> Result<Client<DB, R>, NodeError> {
        if self.consensus_rpc.is_none() {
            self.consensus_rpc = Some(rpc.name());
        }
        let config = self.build_config()?;
        Client::new(config, rpc)
    }
}

/// Light client with persistence. Bootstraps on [`Client::start`] and saves the finalized
/// header on [`Client::shutdown`].
pub struct Client<DB: Database, R: ConsensusRpc> {
    config: Arc<Config>,
    db: DB,
    rpc: Option<R>,
    consensus: Option<ConsensusLightClient<R>>,
    run_loop: Option<JoinHandle<Result<(), ConsensusError>>>,
}

impl<DB: Database, R: ConsensusRpc> Client<DB, R> {
    fn new(config: Config, rpc: R) -> Result<Self, NodeError> {
        let db = DB::new(&config).map_err(NodeError::DatabaseError)?;
        Ok(Client {
            config: Arc::new(config),
            db,
            rpc: Some(rpc),
            consensus: None,
            run_loop: None,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Bootstrap from the checkpoint and spawn the run loop.
    ///
    /// An explicit checkpoint in the config wins over the one in the database.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let Some(rpc) = self.rpc.take() else {
            return Ok(());
        };

        let checkpoint = match self.config.checkpoint {
            Some(checkpoint) => checkpoint,
            None => self
                .db
                .load_checkpoint()
                .map_err(NodeError::DatabaseError)?,
        };
        info!(%checkpoint, rpc = rpc.name(), "Starting light client");

        let consensus = ConsensusLightClient::initialize_from_checkpoint_root(
            rpc,
            self.config.clone(),
            checkpoint,
        )
        .await
        .map_err(NodeError::ConsensusClientCreationError)?;

        self.run_loop = Some(consensus.start());
        self.consensus = Some(consensus);
        Ok(())
    }

    /// Stop the run loop, wait for it and persist the finalized header.
    pub async fn shutdown(&mut self) -> Result<(), NodeError> {
        let consensus = self.consensus()?.clone();
        consensus.stop();

        if let Some(run_loop) = self.run_loop.take() {
            if !run_loop.is_finished() {
                // A loop still syncing never observes `stop`.
                run_loop.abort();
            }
            match run_loop.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, "Run loop exited with an error"),
                Err(err) if err.is_cancelled() => {}
                Err(err) => return Err(NodeError::Join(err)),
            }
            consensus.stop();
        }

        let finalized_header = consensus.get_finalized_header();
        self.db
            .save_finalized_header(&finalized_header)
            .map_err(NodeError::DatabaseError)?;
        info!(slot = finalized_header.slot, "Light client shut down");
        Ok(())
    }

    pub fn consensus(&self) -> Result<&ConsensusLightClient<R>, NodeError> {
        self.consensus.as_ref().ok_or(NodeError::NotStarted)
    }

    pub fn status(&self) -> SyncStatus {
        self.consensus
            .as_ref()
            .map_or(SyncStatus::Stopped, ConsensusLightClient::status)
    }

    pub fn get_header(&self) -> Result<BeaconBlockHeader, NodeError> {
        Ok(self.consensus()?.get_header())
    }

    pub fn get_finalized_header(&self) -> Result<BeaconBlockHeader, NodeError> {
        Ok(self.consensus()?.get_finalized_header())
    }

    pub fn subscribe_heads(&self) -> Result<HeadWatchReceivers, NodeError> {
        Ok(self.consensus()?.subscribe_heads())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_log::test;

    use super::*;
    use crate::{
        consensus::rpc::mock_rpc::MockRpc,
        database::{ConfigDB, FileDB},
        test_utils::{genesis_time_at_slot, test_config, TestChain},
    };

    #[test]
    fn builder_requires_network_or_config() {
        let err = ClientBuilder::new()
            .consensus_rpc("http://localhost:5052")
            .build::<ConfigDB, MockRpc>()
            .err()
            .unwrap();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    #[test]
    fn builder_requires_consensus_rpc() {
        let err = ClientBuilder::new()
            .network(Network::Mainnet)
            .build::<ConfigDB, MockRpc>()
            .err()
            .unwrap();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    #[test]
    fn builder_overrides_config() {
        let client = ClientBuilder::new()
            .network(Network::Sepolia)
            .consensus_rpc("http://localhost:5052")
            .checkpoint(B256::repeat_byte(1))
            .max_checkpoint_age(10)
            .strict_checkpoint_age()
            .build::<ConfigDB, MockRpc>()
            .unwrap();

        let config = client.config();
        assert_eq!(config.chain.chain_id, 11155111);
        assert_eq!(config.checkpoint, Some(B256::repeat_byte(1)));
        assert_eq!(config.max_checkpoint_age, 10);
        assert!(config.strict_checkpoint_age);
        assert_eq!(client.status(), SyncStatus::Stopped);
        assert!(matches!(client.get_header(), Err(NodeError::NotStarted)));
    }

    #[test]
    fn file_db_needs_data_dir() {
        let err = ClientBuilder::new()
            .network(Network::Mainnet)
            .build_with_rpc::<FileDB, MockRpc>(MockRpc::default())
            .err()
            .unwrap();
        assert!(matches!(err, NodeError::DatabaseError(_)));
    }

    #[test(tokio::test)]
    async fn start_then_shutdown_persists_finalized_header() {
        let chain = TestChain::new(test_config(genesis_time_at_slot(100)));
        let (root, bootstrap) = chain.bootstrap(64);
        let rpc = MockRpc::default();
        rpc.set_bootstrap(bootstrap.clone());

        let temp_dir = tempfile::tempdir().unwrap();
        let mut client = ClientBuilder::new()
            .config(chain.config.clone())
            .checkpoint(root)
            .data_dir(temp_dir.path().to_path_buf())
            .build_with_rpc::<FileDB, MockRpc>(rpc)
            .unwrap();

        client.start().await.unwrap();
        assert_eq!(client.get_header().unwrap().slot, 64);
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.status() != SyncStatus::Started {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        client.shutdown().await.unwrap();
        assert_eq!(client.status(), SyncStatus::Stopped);

        let db = FileDB::new(client.config()).unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), root);
    }
}
