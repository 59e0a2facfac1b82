use std::path::PathBuf;

use anyhow::Result;
use beacon_light_client::{
    config::client_config::ConfigSelection, consensus::rpc::nimbus_rpc::NimbusRpc,
    database::FileDB, Client, ClientBuilder,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DATA_DIR: &str = "/tmp/beacon-light-client";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let selection = ConfigSelection::from_env()?;
    let mut config = selection.load()?;
    config
        .data_dir
        .get_or_insert_with(|| PathBuf::from(DATA_DIR));

    let mut client: Client<FileDB, NimbusRpc> = ClientBuilder::new().config(config).build()?;

    info!(
        network = %selection.network,
        config = %selection.config.display(),
        "Starting consensus light client..."
    );
    client.start().await?;
    client.consensus()?.check_rpc().await?;

    let mut heads = client.subscribe_heads()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = heads.optimistic_header.changed() => {
                if changed.is_err() {
                    break;
                }
                let slot = heads.optimistic_header.borrow_and_update().slot;
                info!(slot, status = %client.status(), "New head");
            }
        }
    }

    client.shutdown().await?;
    Ok(())
}
