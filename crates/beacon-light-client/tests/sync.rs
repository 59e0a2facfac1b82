use std::{sync::Arc, time::Duration};

use beacon_light_client::{
    config::client_config::Config,
    consensus::{
        errors::{ConsensusError, ValidationError},
        rpc::mock_rpc::MockRpc,
        ConsensusLightClient, SyncStatus,
    },
    test_utils::{genesis_time_at_slot, test_config, TestChain, TestCommittee},
};

const BOOTSTRAP_SLOT: u64 = 100;

/// Chain whose wall clock is at `current_slot`, with a transport serving the bootstrap and
/// updates for periods 0 and 1.
fn setup(current_slot: u64) -> (TestChain, MockRpc) {
    let chain = TestChain::new(test_config(genesis_time_at_slot(current_slot)));
    let rpc = MockRpc::default();

    // Served first, a weaker update carrying the wrong next committee.
    rpc.add_update(
        0,
        chain.update_with_next_committee(4000, Some(3900), 300, TestCommittee::new(200).committee),
    );
    rpc.add_update(0, chain.update(5000, Some(4900), 400));
    rpc.add_update(1, chain.update(9000, Some(8900), 400));

    (chain, rpc)
}

fn client(chain: &TestChain, config: Config, rpc: MockRpc) -> ConsensusLightClient<MockRpc> {
    let (root, bootstrap) = chain.bootstrap(BOOTSTRAP_SLOT);
    ConsensusLightClient::new(rpc, Arc::new(config), root, bootstrap).unwrap()
}

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[test_log::test(tokio::test)]
async fn test_sync() {
    let (chain, rpc) = setup(10_240);
    let client = client(&chain, chain.config.clone(), rpc);

    client.sync(0, 0).await.unwrap();
    assert_eq!(client.sync_committee_periods(), vec![0, 1]);
    assert_eq!(client.get_header().slot, 5000);
    assert_eq!(client.get_finalized_header().slot, 4900);

    // The better update replaced the committee stored from the decoy.
    let committee = client.sync_committee(1).unwrap();
    assert_eq!(
        committee.aggregate_pubkey.as_bytes(),
        chain.committee(1).public_keys[0].as_bytes()
    );

    client.sync(1, 1).await.unwrap();
    assert_eq!(client.sync_committee_periods(), vec![1, 2]);
    assert_eq!(client.get_header().slot, 9000);
    assert_eq!(client.get_finalized_header().slot, 8900);
}

#[test_log::test(tokio::test)]
async fn test_minimum_participation() {
    // Network defaults, the minimum is not overridden.
    let (chain, rpc) = setup(10_240);
    let client = client(&chain, chain.config.clone(), rpc);

    let err = client
        .process_update(&chain.update(5000, Some(4900), 1))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::Validation(ValidationError::InsufficientParticipation {
            participants: 1,
            minimum: 2
        })
    ));

    client
        .process_update(&chain.update(5000, Some(4900), 2))
        .unwrap();
    assert_eq!(client.sync_committee_periods(), vec![0, 1]);
}

#[test_log::test(tokio::test)]
async fn test_run_loop_tracks_head() {
    let (chain, rpc) = setup(10_240);
    rpc.set_optimistic_update(chain.optimistic_update(10_200, 400));
    let client = client(&chain, chain.config.clone(), rpc.clone());

    let handle = client.start();
    wait_for(|| client.status() == SyncStatus::Started).await;
    assert_eq!(client.sync_committee_periods(), vec![1, 2]);
    assert_eq!(client.get_header().slot, 10_200);
    assert_eq!(client.get_finalized_header().slot, 8900);

    let mut heads = client.subscribe_heads();
    wait_for(|| rpc.optimistic_subscribers() == 1).await;
    assert_eq!(rpc.publish_optimistic_update(chain.optimistic_update(10_230, 400)), 1);

    tokio::time::timeout(Duration::from_secs(10), heads.optimistic_header.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(heads.optimistic_header.borrow().slot, 10_230);
    assert_eq!(client.get_header().slot, 10_230);

    client.stop();
    assert_eq!(client.status(), SyncStatus::Stopped);
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(rpc.optimistic_subscribers(), 0);
}

#[test_log::test(tokio::test)]
async fn test_run_loop_retries_failed_sync() {
    let (chain, rpc) = setup(10_240);
    rpc.fail_update_requests(1);
    let client = client(&chain, chain.config.clone(), rpc.clone());

    let handle = client.start();
    wait_for(|| client.status() == SyncStatus::Started).await;
    assert_eq!(&rpc.update_requests()[..2], &[(0, 2), (0, 2)]);
    assert_eq!(client.sync_committee_periods(), vec![1, 2]);

    client.stop();
    handle.await.unwrap().unwrap();
}

#[test_log::test(tokio::test)]
async fn test_run_loop_fetches_next_committee_early() {
    // Four epochs before the end of period 1.
    let (chain, rpc) = setup(16_256);
    let client = client(&chain, chain.config.clone(), rpc.clone());

    let handle = client.start();
    wait_for(|| rpc.update_requests().len() >= 2).await;
    assert_eq!(&rpc.update_requests()[..2], &[(0, 2), (1, 1)]);
    assert_eq!(client.sync_committee_periods(), vec![1, 2]);

    wait_for(|| client.status() == SyncStatus::Started).await;
    client.stop();
    handle.await.unwrap().unwrap();
}
