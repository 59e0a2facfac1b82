use std::{fmt, sync::Arc};

use alloy::primitives::B256;
use parking_lot::{Mutex, RwLock};
use strum::Display;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tree_hash::TreeHash;

use super::{
    bls::{self, TrustedSyncCommittee},
    clock::Clock,
    constants::{
        MAX_CLOCK_DISPARITY, MAX_LOOKAHEAD_EPOCHS_COMMITTEE_SYNC, MAX_PERIODS_PER_REQUEST,
        ON_ERROR_RETRY, SYNC_COMMITTEE_SIZE,
    },
    errors::{ConsensusError, ValidationError},
    merkle::is_current_committee_proof_valid,
    rpc::ConsensusRpc,
    store::SyncStore,
    types::{
        BeaconBlockHeader, GenericUpdate, LightClientBootstrap, LightClientFinalityUpdate,
        LightClientOptimisticUpdate, LightClientUpdate,
    },
    update::{chunkify_range, update_period, UpdateSummary},
    validation::assert_valid_update,
};
use crate::{
    config::client_config::Config,
    events::{LightClientEmitter, LightClientEvent, LightClientEventKind},
    watch::{head_watch_channels, HeadWatchReceivers},
};

// https://github.com/ethereum/consensus-specs/blob/dev/specs/altair/light-client/sync-protocol.md
// does not implement force updates

#[derive(Debug, Clone)]
enum RunStatus {
    Stopped,
    Syncing,
    Started { token: CancellationToken },
}

/// Externally visible state of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyncStatus {
    Stopped,
    Syncing,
    Started,
}

impl From<&RunStatus> for SyncStatus {
    fn from(status: &RunStatus) -> Self {
        match status {
            RunStatus::Stopped => Self::Stopped,
            RunStatus::Syncing => Self::Syncing,
            RunStatus::Started { .. } => Self::Started,
        }
    }
}

/// Sync committee light client.
///
/// Cheap to clone, clones share the same store. All store mutations happen in
/// [`ConsensusLightClient::process_update`] and the push handlers, which take the store lock
/// for the duration of the change and emit events after releasing it.
pub struct ConsensusLightClient<R: ConsensusRpc> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    rpc: R,
    config: Arc<Config>,
    clock: Clock,
    store: RwLock<SyncStore>,
    status: Mutex<RunStatus>,
    emitter: LightClientEmitter,
}

impl<R: ConsensusRpc> Clone for ConsensusLightClient<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: ConsensusRpc> fmt::Debug for ConsensusLightClient<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.inner.store.read();
        f.debug_struct("ConsensusLightClient")
            .field("rpc", &self.inner.rpc.name())
            .field("status", &self.status())
            .field("optimistic_slot", &store.optimistic_header().slot)
            .field("finalized_slot", &store.finalized_header().slot)
            .field("sync_committees", &store.sync_committee_periods())
            .field(
                "head_subscribers",
                &self
                    .inner
                    .emitter
                    .handler_count(LightClientEventKind::OptimisticHeader),
            )
            .finish()
    }
}

impl<R: ConsensusRpc> ConsensusLightClient<R> {
    /// Fetch the bootstrap for `checkpoint_root` and build a client from it.
    pub async fn initialize_from_checkpoint_root(
        rpc: R,
        config: Arc<Config>,
        checkpoint_root: B256,
    ) -> Result<Self, ConsensusError> {
        bls::init()?;

        let bootstrap = rpc
            .get_bootstrap(checkpoint_root)
            .await
            .map_err(ConsensusError::Transport)?;

        Self::new(rpc, config, checkpoint_root, bootstrap)
    }

    /// Build a client from a bootstrap. The bootstrap is validated against `checkpoint_root`
    /// before anything in it is trusted.
    pub fn new(
        rpc: R,
        config: Arc<Config>,
        checkpoint_root: B256,
        bootstrap: LightClientBootstrap,
    ) -> Result<Self, ConsensusError> {
        let clock = Clock::from_chain_config(&config.chain);
        validate_bootstrap(&config, &clock, checkpoint_root, &bootstrap)?;

        let committee = TrustedSyncCommittee::from_committee(&bootstrap.current_sync_committee)?;
        let header = bootstrap.header.beacon;
        let period = clock.period_at_slot(header.slot);
        info!(
            slot = header.slot,
            period,
            checkpoint = %checkpoint_root,
            "Light client bootstrapped"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                rpc,
                config,
                clock,
                store: RwLock::new(SyncStore::new(header, period, committee)),
                status: Mutex::new(RunStatus::Stopped),
                emitter: LightClientEmitter::new(),
            }),
        })
    }

    pub async fn check_rpc(&self) -> Result<(), ConsensusError> {
        let found = self
            .inner
            .rpc
            .chain_id()
            .await
            .map_err(ConsensusError::Transport)?;
        let expected = self.inner.config.chain.chain_id;

        if found != expected {
            return Err(ConsensusError::IncorrectRpcNetwork { expected, found });
        }
        Ok(())
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    pub fn rpc(&self) -> &R {
        &self.inner.rpc
    }

    pub fn emitter(&self) -> &LightClientEmitter {
        &self.inner.emitter
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::from(&*self.inner.status.lock())
    }

    pub fn get_header(&self) -> BeaconBlockHeader {
        self.inner.store.read().optimistic_header().clone()
    }

    pub fn get_finalized_header(&self) -> BeaconBlockHeader {
        self.inner.store.read().finalized_header().clone()
    }

    pub fn sync_committee(&self, period: u64) -> Option<Arc<TrustedSyncCommittee>> {
        self.inner.store.read().sync_committee(period)
    }

    /// Periods with a known sync committee, oldest inserted first.
    pub fn sync_committee_periods(&self) -> Vec<u64> {
        self.inner.store.read().sync_committee_periods()
    }

    /// Watch channels following the optimistic and finalized headers. The forwarding handlers
    /// are removed on the first header event after the receivers are dropped.
    pub fn subscribe_heads(&self) -> HeadWatchReceivers {
        // Holding the store lock keeps the snapshot and the subscription consistent.
        let store = self.inner.store.read();
        let (senders, receivers) = head_watch_channels(
            store.optimistic_header().clone(),
            store.finalized_header().clone(),
        );
        senders.forward_from(&self.inner.emitter);
        receivers
    }

    /// Spawn the run loop. The task ends with `Ok` once [`Self::stop`] is called, or with the
    /// error that stopped it.
    pub fn start(&self) -> JoinHandle<Result<(), ConsensusError>> {
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.run_loop().await;
            if let Err(err) = &result {
                error!(%err, "Light client run loop failed");
            }
            result
        })
    }

    /// Stop head tracking. Only has an effect while started.
    pub fn stop(&self) {
        let mut status = self.inner.status.lock();
        if let RunStatus::Started { token } = &*status {
            token.cancel();
            *status = RunStatus::Stopped;
            info!("Light client stopped");
        }
    }

    async fn run_loop(&self) -> Result<(), ConsensusError> {
        let clock = self.inner.clock;
        let mut optimistic_updates: Option<UnboundedReceiver<LightClientOptimisticUpdate>> = None;
        let mut finality_updates: Option<UnboundedReceiver<LightClientFinalityUpdate>> = None;

        loop {
            let current_slot = clock.current_slot(Clock::now()?).max(0) as u64;
            let current_period = clock.period_at_slot(current_slot);

            let has_committee = self.inner.store.read().has_sync_committee(current_period);
            if !has_committee {
                self.set_syncing();
                optimistic_updates = None;
                finality_updates = None;

                let head_period = clock.period_at_slot(self.get_header().slot);
                debug!(head_period, current_period, "Syncing sync committee periods");

                if let Err(err) = self.sync(head_period, current_period).await {
                    warn!(%err, head_period, current_period, "Error syncing, retrying");
                    tokio::time::sleep(ON_ERROR_RETRY).await;
                    continue;
                }

                // Closes the gap until the first pushed update arrives.
                if let Err(err) = self.update_optimistic_from_rpc().await {
                    debug!(%err, "Error fetching optimistic update");
                }
            }

            if self.begin_tracking() {
                let (sender, receiver) = mpsc::unbounded_channel();
                self.inner.rpc.on_optimistic_update(sender);
                optimistic_updates = Some(receiver);

                let (sender, receiver) = mpsc::unbounded_channel();
                self.inner.rpc.on_finality_update(sender);
                finality_updates = Some(receiver);

                info!(current_period, "Tracking head");
            }

            // Near the end of the period, poll for the next committee in case a better update
            // for the current period shows up.
            let epochs_per_period = clock.epochs_per_sync_committee_period();
            let epochs_into_period = clock.epoch_at_slot(current_slot) % epochs_per_period;
            let lookahead = MAX_LOOKAHEAD_EPOCHS_COMMITTEE_SYNC.min(epochs_per_period.div_ceil(2));
            if epochs_per_period - epochs_into_period <= lookahead {
                if let Err(err) = self.sync(current_period, current_period).await {
                    debug!(%err, current_period, "Error fetching next sync committee");
                }
            }

            let Some(token) = self.active_token() else {
                return Ok(());
            };
            let deadline = Instant::now() + clock.time_until_next_epoch(Clock::now()?);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Run loop cancelled");
                        return Ok(());
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                    update = next_pushed(&mut optimistic_updates) => match update {
                        Some(update) => {
                            if let Err(err) = self.process_optimistic_update(&update) {
                                warn!(%err, "Rejected optimistic update");
                            }
                        }
                        None => optimistic_updates = None,
                    },
                    update = next_pushed(&mut finality_updates) => match update {
                        Some(update) => {
                            if let Err(err) = self.process_finality_update(&update) {
                                warn!(%err, "Rejected finality update");
                            }
                        }
                        None => finality_updates = None,
                    },
                }
            }
        }
    }

    fn set_syncing(&self) {
        let mut status = self.inner.status.lock();
        if let RunStatus::Started { token } = &*status {
            token.cancel();
        }
        *status = RunStatus::Syncing;
    }

    /// Move to `Started` unless already there. Returns whether the state changed.
    fn begin_tracking(&self) -> bool {
        let mut status = self.inner.status.lock();
        if matches!(*status, RunStatus::Started { .. }) {
            return false;
        }
        *status = RunStatus::Started {
            token: CancellationToken::new(),
        };
        true
    }

    fn active_token(&self) -> Option<CancellationToken> {
        match &*self.inner.status.lock() {
            RunStatus::Started { token } => Some(token.clone()),
            _ => None,
        }
    }

    /// Fetch, validate and apply the updates of every period in `from_period..=to_period`, in
    /// order. The first rejected update aborts the sync.
    pub async fn sync(&self, from_period: u64, to_period: u64) -> Result<(), ConsensusError> {
        for chunk in chunkify_range(from_period, to_period, MAX_PERIODS_PER_REQUEST) {
            let (start, end) = chunk.into_inner();
            let count = (end - start + 1) as u8;

            let updates = self
                .inner
                .rpc
                .get_updates(start, count)
                .await
                .map_err(ConsensusError::Transport)?;
            debug!(start, count, received = updates.len(), "Fetched updates");

            for update in &updates {
                self.process_update(update)?;
                // Verification is expensive, let other tasks run between updates.
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    async fn update_optimistic_from_rpc(&self) -> Result<(), ConsensusError> {
        let update = self
            .inner
            .rpc
            .get_optimistic_update()
            .await
            .map_err(ConsensusError::Transport)?;
        self.process_optimistic_update(&update)
    }

    /// Validate a full update and merge it.
    ///
    /// The committee for the next period is replaced only if this is the best update seen for
    /// its period. Headers only move forward.
    pub fn process_update(&self, update: &LightClientUpdate) -> Result<(), ConsensusError> {
        let update = GenericUpdate::from(update);
        let (period, committee) = self.validate(&update)?;

        let summary = UpdateSummary::from_update(&update);
        let committee_size = committee.len() as u64;
        let is_best = self
            .inner
            .store
            .read()
            .is_best_update(period, &summary, committee_size);

        let next_committee = match (is_best, update.next_sync_committee) {
            (true, Some((next_committee, _))) => {
                Some(TrustedSyncCommittee::from_committee(next_committee)?)
            }
            _ => None,
        };

        let mut events = Vec::new();
        {
            let mut store = self.inner.store.write();
            // Another caller may have stored a better update since the read above.
            if let Some(next_committee) = next_committee {
                if store.store_best_update(period, summary, committee_size, next_committee) {
                    events.push(LightClientEvent::SyncCommittee { period: period + 1 });
                }
            }
            if store.advance_optimistic_header(update.attested_header) {
                events.push(LightClientEvent::OptimisticHeader(
                    update.attested_header.clone(),
                ));
            }
            if let Some(finalized_header) = update.finalized_header() {
                if store.advance_finalized_header(finalized_header) {
                    events.push(LightClientEvent::FinalizedHeader(finalized_header.clone()));
                }
            }
        }

        self.emit(events, summary.participation);
        Ok(())
    }

    /// Validate a pushed optimistic update and make its header the optimistic header.
    pub fn process_optimistic_update(
        &self,
        update: &LightClientOptimisticUpdate,
    ) -> Result<(), ConsensusError> {
        let update = GenericUpdate::from(update);
        self.validate(&update)?;

        // Pushed updates are not compared against the current head.
        self.inner
            .store
            .write()
            .set_optimistic_header(update.attested_header.clone());

        self.emit(
            vec![LightClientEvent::OptimisticHeader(
                update.attested_header.clone(),
            )],
            update.sync_aggregate.participation(),
        );
        Ok(())
    }

    /// Validate a pushed finality update. Sets the optimistic header, and the finalized header
    /// when the update carries one.
    pub fn process_finality_update(
        &self,
        update: &LightClientFinalityUpdate,
    ) -> Result<(), ConsensusError> {
        let update = GenericUpdate::from(update);
        self.validate(&update)?;

        let mut events = vec![LightClientEvent::OptimisticHeader(
            update.attested_header.clone(),
        )];
        {
            let mut store = self.inner.store.write();
            store.set_optimistic_header(update.attested_header.clone());
            if let Some(finalized_header) = update.finalized_header() {
                store.set_finalized_header(finalized_header.clone());
                events.push(LightClientEvent::FinalizedHeader(finalized_header.clone()));
            }
        }

        self.emit(events, update.sync_aggregate.participation());
        Ok(())
    }

    /// Checks shared by every update shape. Returns the attested period and its committee.
    fn validate(
        &self,
        update: &GenericUpdate,
    ) -> Result<(u64, Arc<TrustedSyncCommittee>), ConsensusError> {
        let slot = update.attested_header.slot;
        let current_slot = self
            .inner
            .clock
            .slot_with_tolerance(Clock::now()?, MAX_CLOCK_DISPARITY);
        if slot as i64 > current_slot {
            return Err(ConsensusError::UpdateFromFuture { slot, current_slot });
        }

        let period = update_period(&self.inner.clock, update);
        let committee = self
            .sync_committee(period)
            .ok_or(ConsensusError::MissingSyncCommittee(period))?;

        assert_valid_update(&self.inner.config, &committee, update)?;
        Ok((period, committee))
    }

    fn emit(&self, events: Vec<LightClientEvent>, participation: u64) {
        for event in &events {
            self.log_event(event, participation);
            self.inner.emitter.emit(event);
        }
    }

    fn log_event(&self, event: &LightClientEvent, participation: u64) {
        let confidence = participation as f32 / SYNC_COMMITTEE_SIZE as f32 * 100f32;
        match event {
            LightClientEvent::OptimisticHeader(header) => info!(
                slot = header.slot,
                confidence = format!("{confidence:.2}%"),
                age = self.age(header.slot),
                "Updated head"
            ),
            LightClientEvent::FinalizedHeader(header) => info!(
                slot = header.slot,
                confidence = format!("{confidence:.2}%"),
                age = self.age(header.slot),
                "Finalized slot"
            ),
            LightClientEvent::SyncCommittee { period } => {
                info!(period, "Sync committee updated")
            }
        }
    }

    /// Time since `slot` started, as `dd:hh:mm:ss`.
    fn age(&self, slot: u64) -> String {
        let now = Clock::now().map(|now| now.as_secs()).unwrap_or_default();
        let age = chrono::Duration::seconds(
            now as i64 - self.inner.clock.slot_timestamp(slot) as i64,
        );
        format!(
            "{:02}:{:02}:{:02}:{:02}",
            age.num_days(),
            age.num_hours() % 24,
            age.num_minutes() % 60,
            age.num_seconds() % 60,
        )
    }
}

/// Check a bootstrap against the trusted checkpoint root.
fn validate_bootstrap(
    config: &Config,
    clock: &Clock,
    checkpoint_root: B256,
    bootstrap: &LightClientBootstrap,
) -> Result<(), ConsensusError> {
    let header = &bootstrap.header.beacon;
    let header_root = header.tree_hash_root();
    if header_root != checkpoint_root {
        return Err(ConsensusError::InvalidHeaderHash {
            expected: checkpoint_root,
            found: header_root,
        });
    }

    let committee_valid = is_current_committee_proof_valid(
        header,
        &bootstrap.current_sync_committee,
        &bootstrap.current_sync_committee_branch,
    )
    .map_err(ValidationError::from)?;
    if !committee_valid {
        return Err(ConsensusError::InvalidCurrentSyncCommitteeProof);
    }

    let age = Clock::now()?
        .as_secs()
        .saturating_sub(clock.slot_timestamp(header.slot));
    if age > config.max_checkpoint_age {
        if config.strict_checkpoint_age {
            return Err(ConsensusError::CheckpointTooOld);
        }
        warn!(age, "checkpoint too old, consider using a more recent block");
    }
    Ok(())
}

async fn next_pushed<T>(receiver: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
