use std::{cmp, future::Future, time::Duration};

use alloy::primitives::B256;
use anyhow::Result;
use async_trait::async_trait;
use serde_this_or_that::as_u64;
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tracing::{debug, warn};

use super::ConsensusRpc;
use crate::{
    consensus::{
        constants::MAX_PERIODS_PER_REQUEST,
        types::{
            LightClientBootstrap, LightClientFinalityUpdate, LightClientOptimisticUpdate,
            LightClientUpdate,
        },
    },
    errors::RpcError,
};

/// Interval between polls of the latest optimistic and finality updates.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(12);

/// Beacon API light client endpoints over HTTP. Push subscriptions are served by polling.
#[derive(Clone, Debug)]
pub struct NimbusRpc {
    rpc: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl NimbusRpc {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        // A zero period would make `tokio::time::interval` panic.
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, method: &str, path: &str) -> Result<T> {
        let req = format!("{}{}", self.rpc, path);
        let res = self
            .client
            .get(req)
            .send()
            .await
            .map_err(|err| RpcError::new(method, err))?
            .error_for_status()
            .map_err(|err| RpcError::new(method, err))?
            .json::<T>()
            .await
            .map_err(|err| RpcError::new(method, err))?;
        Ok(res)
    }
}

/// Polls `fetch` every `interval` and sends what it returns whenever the attested slot
/// changes. Stops once the receiver is dropped.
fn spawn_poller<T, F, Fut>(
    name: &'static str,
    interval: Duration,
    sender: UnboundedSender<T>,
    fetch: F,
    slot_of: fn(&T) -> u64,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send,
{
    tokio::spawn(async move {
        let mut last_slot = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sender.closed() => break,
                _ = ticker.tick() => {}
            }

            match fetch().await {
                Ok(update) => {
                    let slot = slot_of(&update);
                    if last_slot == Some(slot) {
                        continue;
                    }
                    last_slot = Some(slot);
                    if sender.send(update).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%err, name, "Polling for update failed"),
            }
        }
        debug!(name, "Update subscription closed");
    })
}

#[async_trait]
impl ConsensusRpc for NimbusRpc {
    fn new(rpc: &str) -> Self {
        NimbusRpc {
            rpc: rpc.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    async fn get_bootstrap(&self, block_root: B256) -> Result<LightClientBootstrap> {
        let res: BootstrapResponse = self
            .get(
                "bootstrap",
                &format!("/eth/v1/beacon/light_client/bootstrap/{block_root}"),
            )
            .await?;
        Ok(res.data)
    }

    async fn get_updates(&self, period: u64, count: u8) -> Result<Vec<LightClientUpdate>> {
        let count = cmp::min(count as u64, MAX_PERIODS_PER_REQUEST);
        let res: UpdateResponse = self
            .get(
                "updates",
                &format!(
                    "/eth/v1/beacon/light_client/updates?start_period={period}&count={count}"
                ),
            )
            .await?;
        Ok(res.into_iter().map(|d| d.data).collect())
    }

    async fn get_finality_update(&self) -> Result<LightClientFinalityUpdate> {
        let res: FinalityUpdateResponse = self
            .get(
                "finality_update",
                "/eth/v1/beacon/light_client/finality_update",
            )
            .await?;
        Ok(res.data)
    }

    async fn get_optimistic_update(&self) -> Result<LightClientOptimisticUpdate> {
        let res: OptimisticUpdateResponse = self
            .get(
                "optimistic_update",
                "/eth/v1/beacon/light_client/optimistic_update",
            )
            .await?;
        Ok(res.data)
    }

    fn on_optimistic_update(&self, sender: UnboundedSender<LightClientOptimisticUpdate>) {
        let rpc = self.clone();
        spawn_poller(
            "optimistic_update",
            self.poll_interval,
            sender,
            move || {
                let rpc = rpc.clone();
                async move { rpc.get_optimistic_update().await }
            },
            |update| update.attested_header.beacon.slot,
        );
    }

    fn on_finality_update(&self, sender: UnboundedSender<LightClientFinalityUpdate>) {
        let rpc = self.clone();
        spawn_poller(
            "finality_update",
            self.poll_interval,
            sender,
            move || {
                let rpc = rpc.clone();
                async move { rpc.get_finality_update().await }
            },
            |update| update.attested_header.beacon.slot,
        );
    }

    async fn chain_id(&self) -> Result<u64> {
        let res: SpecResponse = self.get("spec", "/eth/v1/config/spec").await?;
        Ok(res.data.chain_id)
    }

    fn name(&self) -> String {
        "nimbus".to_string()
    }
}

type UpdateResponse = Vec<UpdateData>;

#[derive(serde::Deserialize, Debug)]
struct UpdateData {
    data: LightClientUpdate,
}

#[derive(serde::Deserialize, Debug)]
struct FinalityUpdateResponse {
    data: LightClientFinalityUpdate,
}

#[derive(serde::Deserialize, Debug)]
struct OptimisticUpdateResponse {
    data: LightClientOptimisticUpdate,
}

#[derive(serde::Deserialize, Debug)]
struct BootstrapResponse {
    data: LightClientBootstrap,
}

#[derive(serde::Deserialize, Debug)]
struct SpecResponse {
    data: Spec,
}

#[derive(serde::Deserialize, Debug)]
struct Spec {
    #[serde(rename = "DEPOSIT_NETWORK_ID", deserialize_with = "as_u64")]
    chain_id: u64,
}
