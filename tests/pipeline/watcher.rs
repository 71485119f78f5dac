use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_for, ContractLogFinalizer},
    mock_near::{chunk_hash, MockNear, MockNearServer, MockTx},
};
use anyhow::Result;
use nearwatch::{NearRpcClient, Network, Runner, Watcher, WatcherConfig};
use tokio::sync::mpsc;
use tokio::time::timeout;

const CONTRACT: &str = "wormhole_crypto.testnet";

fn config(url: &str) -> Result<WatcherConfig> {
    WatcherConfig::builder()
        .network(Network::Testnet)
        .rpc_url(url)
        .poll_interval(Duration::from_millis(20))
        .initial_tx_delay(Duration::from_millis(50))
        .tx_retry_limit(3)
        .chunk_workers(2)
        .tx_workers(2)
        .queue_capacity(64)
        .tx_poll_interval(Duration::from_millis(5))
        .metrics_interval(Duration::from_millis(100))
        .rpc_timeout(Duration::from_secs(2))
        .build()
}

fn tx(hash: &str, signer: &str, receiver: &str) -> MockTx {
    MockTx {
        hash: hash.to_string(),
        signer_id: signer.to_string(),
        receiver_id: receiver.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watcher_forwards_message_after_one_retry() -> Result<()> {
    init_tracing();
    let chain = MockNear::new(20, 2);
    let server = MockNearServer::start(chain.clone()).await?;
    let config = config(server.url())?;
    assert_eq!(config.contract_account(), CONTRACT);

    let client = Arc::new(NearRpcClient::from_config(&config)?);
    let finalizer = Arc::new(ContractLogFinalizer::new(client.clone(), CONTRACT));
    let (msg_tx, mut msg_rx) = mpsc::channel(16);
    let (_obsv_tx, obsv_rx) = mpsc::channel(16);
    let mut watcher = Watcher::new(config, client, finalizer, msg_tx, obsv_rx);

    watcher.start().await?;
    assert!(watcher.health().is_ready());

    let watched = tx("T-watched", "alice.testnet", CONTRACT);
    let unrelated = tx("T-other", "bob.testnet", "token.testnet");
    chain.set_tx_status(&watched, 1, vec!["hello from near".to_string()], 23);
    chain.set_tx_status(&unrelated, 0, Vec::new(), 23);

    chain.extend_to(21, 2);
    chain.set_chunk_transactions(&chunk_hash(22, 1), vec![watched.clone(), unrelated.clone()]);
    chain.extend_to(23, 2);

    let message = timeout(Duration::from_secs(10), msg_rx.recv())
        .await?
        .expect("message channel closed");
    assert_eq!(message.tx_hash, "T-watched");
    assert_eq!(message.block_height, 23);
    assert_eq!(message.payload, b"hello from near".to_vec());

    assert_eq!(chain.tx_checks("T-watched"), 2);
    assert_eq!(chain.tx_checks("T-other"), 0);

    let telemetry = watcher.telemetry();
    wait_for(
        || telemetry.snapshot().last_processed_height == 23,
        Duration::from_secs(5),
        "processed height",
    )
    .await?;
    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.observations_forwarded, 1);
    assert_eq!(snapshot.tx_retries, 1);
    assert!(snapshot.chunks_emitted >= 6);

    watcher.stop().await?;
    assert!(!watcher.health().is_ready());
    assert!(msg_rx.try_recv().is_err());

    drop(watcher);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunk_failures_are_counted_and_not_fatal() -> Result<()> {
    init_tracing();
    let chain = MockNear::new(10, 1);
    let server = MockNearServer::start(chain.clone()).await?;
    let config = config(server.url())?;
    let client = Arc::new(NearRpcClient::from_config(&config)?);
    let finalizer = Arc::new(ContractLogFinalizer::new(client.clone(), CONTRACT));
    let (msg_tx, _msg_rx) = mpsc::channel(4);
    let (_obsv_tx, obsv_rx) = mpsc::channel(4);
    let mut watcher = Watcher::new(config, client, finalizer, msg_tx, obsv_rx);

    chain.fail_chunk(&chunk_hash(11, 0));
    watcher.start().await?;
    chain.extend_to(12, 1);

    let telemetry = watcher.telemetry();
    wait_for(
        || telemetry.snapshot().chunk_fetch_errors >= 1,
        Duration::from_secs(5),
        "chunk fetch error",
    )
    .await?;
    assert!(watcher.is_running());
    assert!(watcher.fatal_error().is_none());

    watcher.stop().await?;
    drop(watcher);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_node_fails_startup() -> Result<()> {
    init_tracing();
    let server = MockNearServer::start(MockNear::new(1, 1)).await?;
    let url = server.url().to_string();
    server.shutdown().await;

    let config = config(&url)?;
    let client = Arc::new(NearRpcClient::from_config(&config)?);
    let finalizer = Arc::new(ContractLogFinalizer::new(client.clone(), CONTRACT));
    let (msg_tx, _msg_rx) = mpsc::channel(4);
    let (_obsv_tx, obsv_rx) = mpsc::channel(4);
    let mut watcher = Watcher::new(config, client, finalizer, msg_tx, obsv_rx);

    let err = watcher
        .start()
        .await
        .expect_err("startup must fail without a final block");
    assert!(format!("{err:#}").contains("watcher startup failed"));
    assert!(!watcher.is_running());
    assert!(!watcher.health().is_ready());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_stops_on_cancellation() -> Result<()> {
    init_tracing();
    let chain = MockNear::new(8, 1);
    let server = MockNearServer::start(chain.clone()).await?;
    let config = config(server.url())?;
    let client = Arc::new(NearRpcClient::from_config(&config)?);
    let finalizer = Arc::new(ContractLogFinalizer::new(client.clone(), CONTRACT));
    let (msg_tx, _msg_rx) = mpsc::channel(4);
    let (_obsv_tx, obsv_rx) = mpsc::channel(4);
    let mut runner = Runner::new(config, client, finalizer, msg_tx, obsv_rx);

    let token = runner.cancellation_token();
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    timeout(Duration::from_secs(5), runner.run_until_ctrl_c()).await??;
    cancel.await?;
    assert!(!runner.watcher().is_running());
    assert!(chain.request_count() >= 1);

    drop(runner);
    server.shutdown().await;
    Ok(())
}
