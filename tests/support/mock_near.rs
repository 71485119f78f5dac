use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Clone)]
struct BlockData {
    height: u64,
    hash: String,
    prev_hash: String,
    chunks: Vec<ChunkData>,
}

#[derive(Clone)]
struct ChunkData {
    hash: String,
    shard_id: u64,
    height_included: u64,
}

#[derive(Clone)]
pub struct MockTx {
    pub hash: String,
    pub signer_id: String,
    pub receiver_id: String,
}

#[derive(Clone)]
struct TxStatus {
    signer_id: String,
    receiver_id: String,
    checks_until_final: u64,
    logs: Vec<String>,
    log_block_hash: String,
}

#[derive(Default)]
struct MockNearInner {
    by_height: HashMap<u64, BlockData>,
    by_hash: HashMap<String, BlockData>,
    chunks: HashMap<String, Vec<MockTx>>,
    statuses: HashMap<String, TxStatus>,
    tx_checks: HashMap<String, u64>,
    failing_chunks: HashSet<String>,
    tip: u64,
}

/// In-memory NEAR chain served over JSON-RPC by [`MockNearServer`].
#[derive(Clone, Default)]
pub struct MockNear {
    inner: Arc<RwLock<MockNearInner>>,
    requests: Arc<AtomicU64>,
}

pub fn block_hash(height: u64) -> String {
    format!("B{height}")
}

pub fn chunk_hash(height: u64, shard: u64) -> String {
    format!("C{height}-{shard}")
}

impl MockNear {
    /// Builds a chain of consecutive blocks `1..=length`, each with `shards` fresh chunks.
    pub fn new(length: u64, shards: u64) -> Self {
        let chain = Self::default();
        chain.extend_to(length, shards);
        chain
    }

    pub fn tip(&self) -> u64 {
        self.inner.read().expect("mock chain poisoned").tip
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn extend_to(&self, height: u64, shards: u64) {
        let mut inner = self.inner.write().expect("mock chain poisoned");
        let start = inner.tip.saturating_add(1);
        for h in start..=height {
            let chunks = (0..shards)
                .map(|shard| ChunkData {
                    hash: chunk_hash(h, shard),
                    shard_id: shard,
                    height_included: h,
                })
                .collect();
            let data = BlockData {
                height: h,
                hash: block_hash(h),
                prev_hash: block_hash(h - 1),
                chunks,
            };
            inner.by_hash.insert(data.hash.clone(), data.clone());
            inner.by_height.insert(h, data);
            inner.tip = h;
        }
    }

    pub fn set_chunk_transactions(&self, chunk: &str, txs: Vec<MockTx>) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .chunks
            .insert(chunk.to_string(), txs);
    }

    pub fn fail_chunk(&self, chunk: &str) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .failing_chunks
            .insert(chunk.to_string());
    }

    /// Registers the status of `tx`: the first `checks_until_final` queries report an
    /// optimistic status, later ones report `FINAL` with `logs` on the receiver.
    pub fn set_tx_status(
        &self,
        tx: &MockTx,
        checks_until_final: u64,
        logs: Vec<String>,
        log_height: u64,
    ) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .statuses
            .insert(
                tx.hash.clone(),
                TxStatus {
                    signer_id: tx.signer_id.clone(),
                    receiver_id: tx.receiver_id.clone(),
                    checks_until_final,
                    logs,
                    log_block_hash: block_hash(log_height),
                },
            );
    }

    pub fn tx_checks(&self, tx_hash: &str) -> u64 {
        self.inner
            .read()
            .expect("mock chain poisoned")
            .tx_checks
            .get(tx_hash)
            .copied()
            .unwrap_or(0)
    }

    fn block_view(data: &BlockData) -> Value {
        let chunks: Vec<Value> = data
            .chunks
            .iter()
            .map(|chunk| {
                json!({
                    "chunk_hash": chunk.hash,
                    "shard_id": chunk.shard_id,
                    "height_included": chunk.height_included,
                    "height_created": chunk.height_included,
                })
            })
            .collect();
        json!({
            "author": "mock.near",
            "header": {
                "height": data.height,
                "hash": data.hash,
                "prev_hash": data.prev_hash,
                "timestamp": 1_700_000_000_000_000_000u64 + data.height,
            },
            "chunks": chunks,
        })
    }

    fn block(&self, params: &Value) -> Option<Value> {
        let inner = self.inner.read().expect("mock chain poisoned");
        let data = if params.get("finality").is_some() {
            inner.by_height.get(&inner.tip)
        } else {
            match params.get("block_id") {
                Some(Value::String(hash)) => inner.by_hash.get(hash),
                Some(Value::Number(height)) => {
                    height.as_u64().and_then(|h| inner.by_height.get(&h))
                }
                _ => None,
            }
        };
        data.map(Self::block_view)
    }

    fn chunk(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let hash = params
            .get("chunk_id")
            .and_then(Value::as_str)
            .ok_or((-32602, "missing chunk_id".to_string()))?;
        let inner = self.inner.read().expect("mock chain poisoned");
        if inner.failing_chunks.contains(hash) {
            return Err((-32000, format!("chunk {hash} unavailable")));
        }
        let txs: Vec<Value> = inner
            .chunks
            .get(hash)
            .map(|txs| {
                txs.iter()
                    .map(|tx| {
                        json!({
                            "hash": tx.hash,
                            "signer_id": tx.signer_id,
                            "receiver_id": tx.receiver_id,
                            "nonce": 1,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({
            "author": "mock.near",
            "header": { "chunk_hash": hash, "shard_id": 0, "height_included": 0 },
            "transactions": txs,
            "receipts": [],
        }))
    }

    fn tx(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let hash = params
            .get("tx_hash")
            .and_then(Value::as_str)
            .ok_or((-32602, "missing tx_hash".to_string()))?;
        let mut inner = self.inner.write().expect("mock chain poisoned");
        let status = inner
            .statuses
            .get(hash)
            .cloned()
            .ok_or((-32000, format!("transaction {hash} doesn't exist")))?;
        let checks = inner.tx_checks.entry(hash.to_string()).or_insert(0);
        *checks += 1;
        let is_final = *checks > status.checks_until_final;

        let (execution_status, receipts) = if is_final {
            (
                "FINAL",
                json!([{
                    "id": format!("R-{hash}"),
                    "block_hash": status.log_block_hash,
                    "outcome": {
                        "logs": status.logs,
                        "receipt_ids": [],
                        "executor_id": status.receiver_id,
                        "status": { "SuccessValue": "" },
                    },
                }]),
            )
        } else {
            ("EXECUTED_OPTIMISTIC", json!([]))
        };

        Ok(json!({
            "final_execution_status": execution_status,
            "status": { "SuccessValue": "" },
            "transaction": {
                "hash": hash,
                "signer_id": status.signer_id,
                "receiver_id": status.receiver_id,
                "nonce": 1,
            },
            "transaction_outcome": {
                "id": hash,
                "block_hash": status.log_block_hash,
                "outcome": {
                    "logs": [],
                    "receipt_ids": [format!("R-{hash}")],
                    "executor_id": status.signer_id,
                    "status": {},
                },
            },
            "receipts_outcome": receipts,
        }))
    }
}

/// Grace period for in-flight keep-alive connections before the server task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// HTTP front of a [`MockNear`] chain on an ephemeral localhost port.
pub struct MockNearServer {
    url: String,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MockNearServer {
    pub async fn start(chain: MockNear) -> Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::try_bind(&addr)
            .context("failed to bind mock NEAR node")?
            .serve(make_service);
        let url = format!("http://{}", server.local_addr());

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(err) = graceful.await {
                eprintln!("mock NEAR node stopped: {err}");
            }
        });

        Ok(Self {
            url,
            stop: Some(stop),
            task: Some(task),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stops accepting connections and waits for open ones to drain. Clients that keep
    /// a connection alive past [`SHUTDOWN_GRACE`] get the server task aborted under them.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(mut task) = self.task.take() {
            if timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl Drop for MockNearServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve_request(chain: MockNear, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    chain.requests.fetch_add(1, Ordering::SeqCst);
    let response_value = handle_call(&chain, payload);

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockNear, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method.as_str() {
        "block" => chain
            .block(&params)
            .ok_or((-32000, "UNKNOWN_BLOCK".to_string())),
        "chunk" => chain.chunk(&params),
        "tx" => chain.tx(&params),
        _ => Err((-32601, format!("unknown method {method}"))),
    };

    match outcome {
        Ok(result) => success(id, result),
        Err((code, message)) => error(id, code, message),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
