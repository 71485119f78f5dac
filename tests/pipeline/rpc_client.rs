use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::init_tracing,
    mock_near::{block_hash, chunk_hash, MockNear, MockNearServer, MockTx},
};
use anyhow::Result;
use nearwatch::{
    ChainApi, CircuitState, NearRpcClient, RpcCircuitBreaker, RpcClientOptions, RpcError,
};

fn contract_tx(hash: &str) -> MockTx {
    MockTx {
        hash: hash.to_string(),
        signer_id: "alice.near".to_string(),
        receiver_id: "contract.wormhole_crypto.near".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_reads_blocks_and_chunks() -> Result<()> {
    init_tracing();
    let chain = MockNear::new(12, 2);
    chain.set_chunk_transactions(&chunk_hash(12, 1), vec![contract_tx("T1")]);
    let server = MockNearServer::start(chain.clone()).await?;
    let client = NearRpcClient::new(server.url())?;

    let final_block = client.final_block().await?;
    assert_eq!(final_block.header.height, 12);
    assert_eq!(final_block.header.prev_hash, block_hash(11));
    assert_eq!(final_block.chunks.len(), 2);

    let parent = client.block_by_hash(&final_block.header.prev_hash).await?;
    assert_eq!(parent.header.height, 11);
    let by_height = client.block_by_height(7).await?;
    assert_eq!(by_height.header.hash, block_hash(7));

    let summary = ChainApi::chunk(&client, &chunk_hash(12, 1)).await?;
    assert_eq!(summary.transactions.len(), 1);
    assert_eq!(summary.transactions[0].hash, "T1");
    assert_eq!(summary.transactions[0].signer_id, "alice.near");

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 4);
    assert_eq!(metrics.total_errors, 0);
    assert_eq!(metrics.breaker_state, CircuitState::Closed);

    drop(client);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tx_status_turns_final_after_scripted_checks() -> Result<()> {
    init_tracing();
    let chain = MockNear::new(5, 1);
    let tx = contract_tx("T2");
    chain.set_tx_status(&tx, 1, vec!["payload".to_string()], 5);
    let server = MockNearServer::start(chain.clone()).await?;
    let client = NearRpcClient::new(server.url())?;

    let first = client.tx_status("T2", "alice.near").await?;
    assert!(!first.is_final());
    assert_eq!(first.logs_of("contract.wormhole_crypto.near").count(), 0);

    let second = client.tx_status("T2", "alice.near").await?;
    assert!(second.is_final());
    let logs: Vec<_> = second.logs_of("contract.wormhole_crypto.near").collect();
    assert_eq!(logs, vec!["payload"]);
    assert_eq!(chain.tx_checks("T2"), 2);

    drop(client);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn application_errors_keep_the_breaker_closed() -> Result<()> {
    init_tracing();
    let chain = MockNear::new(3, 1);
    let server = MockNearServer::start(chain).await?;
    let breaker = Arc::new(RpcCircuitBreaker::new(1, Duration::from_secs(60), 1));
    let client = NearRpcClient::with_options_and_breaker(
        server.url(),
        RpcClientOptions::default(),
        breaker.clone(),
    )?;

    let err = client
        .tx_status("missing", "alice.near")
        .await
        .expect_err("unknown transaction should fail");
    match err.downcast_ref::<RpcError>() {
        Some(RpcError::Call { method, code, .. }) => {
            assert_eq!(*method, "tx");
            assert_eq!(*code, -32000);
        }
        other => panic!("expected call error, got {other:?}"),
    }
    assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    assert!(client.final_block().await.is_ok());

    drop(client);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_node_opens_the_breaker() -> Result<()> {
    init_tracing();
    let server = MockNearServer::start(MockNear::new(1, 1)).await?;
    let url = server.url().to_string();
    server.shutdown().await;

    let breaker = Arc::new(RpcCircuitBreaker::new(1, Duration::from_secs(60), 1));
    let options = RpcClientOptions {
        request_timeout: Duration::from_secs(2),
        ..RpcClientOptions::default()
    };
    let client = NearRpcClient::with_options_and_breaker(url, options, breaker.clone())?;

    assert!(client.final_block().await.is_err());
    assert_eq!(breaker.snapshot().state, CircuitState::Open);

    let err = client
        .final_block()
        .await
        .expect_err("open breaker must reject the call");
    assert!(matches!(
        err.downcast_ref::<RpcError>(),
        Some(RpcError::CircuitOpen)
    ));
    assert_eq!(client.metrics().total_rejected, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_shutdown_is_bounded_with_live_keep_alive_client() -> Result<()> {
    init_tracing();
    let server = MockNearServer::start(MockNear::new(2, 1)).await?;
    let client = NearRpcClient::new(server.url())?;
    assert_eq!(client.final_block().await?.header.height, 2);

    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown must not wait on idle keep-alive connections");
    assert!(client.final_block().await.is_err());
    Ok(())
}
