use std::sync::Arc;

use alloy::primitives::B256;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use super::ConsensusRpc;
use crate::consensus::types::{
    LightClientBootstrap, LightClientFinalityUpdate, LightClientOptimisticUpdate,
    LightClientUpdate,
};

/// In-memory transport. Clones share state, so a test can keep one handle to feed data
/// and push updates while the light client owns another.
#[derive(Clone, Debug, Default)]
pub struct MockRpc {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    bootstrap: Option<LightClientBootstrap>,
    updates: Vec<(u64, LightClientUpdate)>,
    finality_update: Option<LightClientFinalityUpdate>,
    optimistic_update: Option<LightClientOptimisticUpdate>,
    optimistic_subscribers: Vec<UnboundedSender<LightClientOptimisticUpdate>>,
    finality_subscribers: Vec<UnboundedSender<LightClientFinalityUpdate>>,
    update_requests: Vec<(u64, u8)>,
    failing_update_requests: usize,
    chain_id: Option<u64>,
}

impl MockRpc {
    pub fn set_bootstrap(&self, bootstrap: LightClientBootstrap) {
        self.state.lock().bootstrap = Some(bootstrap);
    }

    /// Serve `update` for requests covering `period`, after the updates added before it.
    pub fn add_update(&self, period: u64, update: LightClientUpdate) {
        self.state.lock().updates.push((period, update));
    }

    pub fn set_finality_update(&self, update: LightClientFinalityUpdate) {
        self.state.lock().finality_update = Some(update);
    }

    pub fn set_optimistic_update(&self, update: LightClientOptimisticUpdate) {
        self.state.lock().optimistic_update = Some(update);
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = Some(chain_id);
    }

    /// Fail the next `count` calls to `get_updates`.
    pub fn fail_update_requests(&self, count: usize) {
        self.state.lock().failing_update_requests = count;
    }

    /// `(period, count)` of every `get_updates` call so far.
    pub fn update_requests(&self) -> Vec<(u64, u8)> {
        self.state.lock().update_requests.clone()
    }

    /// Open optimistic update subscriptions.
    pub fn optimistic_subscribers(&self) -> usize {
        let mut state = self.state.lock();
        state
            .optimistic_subscribers
            .retain(|sender| !sender.is_closed());
        state.optimistic_subscribers.len()
    }

    /// Push to every open subscription. Returns how many received it.
    pub fn publish_optimistic_update(&self, update: LightClientOptimisticUpdate) -> usize {
        let mut state = self.state.lock();
        state
            .optimistic_subscribers
            .retain(|sender| sender.send(update.clone()).is_ok());
        state.optimistic_subscribers.len()
    }

    pub fn publish_finality_update(&self, update: LightClientFinalityUpdate) -> usize {
        let mut state = self.state.lock();
        state
            .finality_subscribers
            .retain(|sender| sender.send(update.clone()).is_ok());
        state.finality_subscribers.len()
    }
}

#[async_trait]
impl ConsensusRpc for MockRpc {
    fn new(_path: &str) -> Self {
        Self::default()
    }

    async fn get_bootstrap(&self, block_root: B256) -> Result<LightClientBootstrap> {
        self.state
            .lock()
            .bootstrap
            .clone()
            .ok_or_else(|| anyhow!("no bootstrap for {block_root}"))
    }

    async fn get_updates(&self, period: u64, count: u8) -> Result<Vec<LightClientUpdate>> {
        let mut state = self.state.lock();
        state.update_requests.push((period, count));
        if state.failing_update_requests > 0 {
            state.failing_update_requests -= 1;
            anyhow::bail!("updates unavailable");
        }

        let end = period + count as u64;
        Ok(state
            .updates
            .iter()
            .filter(|(update_period, _)| (period..end).contains(update_period))
            .map(|(_, update)| update.clone())
            .collect())
    }

    async fn get_finality_update(&self) -> Result<LightClientFinalityUpdate> {
        self.state
            .lock()
            .finality_update
            .clone()
            .ok_or_else(|| anyhow!("no finality update"))
    }

    async fn get_optimistic_update(&self) -> Result<LightClientOptimisticUpdate> {
        self.state
            .lock()
            .optimistic_update
            .clone()
            .ok_or_else(|| anyhow!("no optimistic update"))
    }

    fn on_optimistic_update(&self, sender: UnboundedSender<LightClientOptimisticUpdate>) {
        self.state.lock().optimistic_subscribers.push(sender);
    }

    fn on_finality_update(&self, sender: UnboundedSender<LightClientFinalityUpdate>) {
        self.state.lock().finality_subscribers.push(sender);
    }

    async fn chain_id(&self) -> Result<u64> {
        self.state
            .lock()
            .chain_id
            .ok_or_else(|| anyhow!("no chain id"))
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}
