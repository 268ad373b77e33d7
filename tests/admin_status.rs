//! Test the status endpoints of both roles
use reqwest::Client;
use serde_json::Value;
use shardkv::common::{LogEntry, Operation};
use shardkv::coordination::{register_data_node, Coordination, CoordinationTree};
use shardkv::datanode::{sequence_path, BackupTracker, DataNodeEngine};
use shardkv::master::Router;
use shardkv::transport::{KvService, LocalTransport};
use std::sync::Arc;
use std::time::Duration;

const ROOT: &str = "/shardkv";

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn get_json(url: &str) -> Value {
    let resp = Client::new().get(url).send().await.unwrap();
    assert!(resp.status().is_success(), "{url} failed");
    let text = resp.text().await.unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_datanode_status() {
    let tree = Arc::new(CoordinationTree::new(Duration::from_secs(10)));
    let transport = Arc::new(LocalTransport::new());
    let coord: Arc<dyn Coordination> = Arc::new(tree.connect());
    let tracker = Arc::new(BackupTracker::new(coord.clone(), ROOT, "data1", "n1:1"));
    let engine = Arc::new(DataNodeEngine::new(
        tracker,
        coord,
        sequence_path(ROOT),
        transport,
        Default::default(),
    ));
    engine.request(Operation::put("a", "1")).await.unwrap();

    let base = serve(shardkv::datanode::http::create_router(
        shardkv::datanode::http::DataNodeState {
            engine: engine.clone(),
        },
    ))
    .await;

    let health = get_json(&format!("{}/health", base)).await;
    assert_eq!(health["role"], "datanode");
    assert_eq!(health["shard"], "data1");

    let status = get_json(&format!("{}/admin/status", base)).await;
    assert_eq!(status["shard"], "data1");
    assert_eq!(status["addr"], "n1:1");
    assert_eq!(status["keys"], 1);
    assert_eq!(status["log_len"], 2);
    assert!(status.get("last_index").is_some());
    assert!(status.get("backups").is_some());
    assert!(status.get("replication").is_some());
}

#[tokio::test]
async fn test_master_status() {
    let tree = Arc::new(CoordinationTree::new(Duration::from_secs(10)));
    let transport = Arc::new(LocalTransport::new());

    let node_coord: Arc<dyn Coordination> = Arc::new(tree.connect());
    register_data_node(node_coord.as_ref(), ROOT, 1, "n1:1")
        .await
        .unwrap();
    let tracker = Arc::new(BackupTracker::new(node_coord.clone(), ROOT, "data1", "n1:1"));
    let engine = Arc::new(DataNodeEngine::new(
        tracker,
        node_coord.clone(),
        sequence_path(ROOT),
        transport.clone(),
        Default::default(),
    ));
    transport.attach("n1:1", engine.clone());
    assert!(engine.sync(LogEntry::placeholder(7)).await.is_success());

    let coord: Arc<dyn Coordination> = Arc::new(tree.connect());
    let router = Arc::new(Router::new(coord, transport, ROOT, None));
    router.rebuild().await.unwrap();

    let base = serve(shardkv::master::http::create_router(
        shardkv::master::http::MasterState { router },
    ))
    .await;

    let health = get_json(&format!("{}/health", base)).await;
    assert_eq!(health["role"], "master");
    assert_eq!(health["shards"], 1);

    let status = get_json(&format!("{}/admin/status", base)).await;
    assert_eq!(status["nb_members"], 1);
    assert_eq!(status["shard_count"], 1);
    assert!(status.get("primaries").is_some());
}
