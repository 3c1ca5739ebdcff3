//! HTTP control plane, exercised through the router without a socket.


use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use polaris::api::{router, ApiState};
use polaris::audit::WorkLog;
use polaris::cluster::{Cluster, MemoryNetwork, NodeAddress};
use polaris::coordinator::{Coordinator, CoordinatorHandle, NodeRole};
use polaris::store::{MemoryStore, Store};
use test_harness::{fast_job_config, test_registry, wait_for};

struct TestApi {
    app: Router,
    leader: CoordinatorHandle,
    shutdown: CancellationToken,
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Two coordinators on a memory network; the API is served by the leader.
async fn create_test_api() -> TestApi {
    let network = MemoryNetwork::new();
    let registry = test_registry(&WorkLog::new());
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let shutdown = CancellationToken::new();

    let mut nodes = Vec::new();
    for name in ["node-1", "node-2"] {
        let (cluster, events) = network.join(NodeAddress::new(name)).await;
        let cluster: Arc<dyn Cluster> = Arc::new(cluster);
        let (coordinator, commands) =
            Coordinator::new(fast_job_config(), registry.clone(), cluster.clone(), store.clone());
        let handle = coordinator.handle();
        tokio::spawn(coordinator.run(commands, events, shutdown.clone()));
        nodes.push((handle, cluster));
    }
    network.elect(&NodeAddress::new("node-1")).await.unwrap();

    let (leader, cluster) = nodes.remove(0);
    let ready = wait_for(
        || {
            let leader = leader.clone();
            async move { leader.role().await == NodeRole::Leader }
        },
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await;
    assert!(ready, "node-1 should lead");

    let app = router(ApiState {
        handle: leader.clone(),
        cluster,
    });
    TestApi {
        app,
        leader,
        shutdown,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_list_jobs_empty() {
    let api = create_test_api().await;
    let (status, body) = send(&api.app, "GET", "/api/v1/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_create_get_and_cancel_job() {
    let api = create_test_api().await;

    let (status, body) = send(
        &api.app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"name": "test", "start": 0, "end": 1_000_000, "ensure": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Job started.");
    let job_id = body["jobId"].as_str().expect("job id returned").to_string();

    let (status, body) = send(&api.app, "GET", "/api/v1/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "id": job_id }]));

    let (status, body) = send(&api.app, "GET", &format!("/api/v1/jobs/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let ranges = body.as_array().expect("ranges array");
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0]["node"], "node-2");
    assert_eq!(ranges[0]["start"], 0);
    assert_eq!(ranges[0]["end"], 1_000_000);

    let (status, body) = send(&api.app, "DELETE", &format!("/api/v1/jobs/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Job cancelled.");

    let id = job_id.parse().unwrap();
    let leader = api.leader.clone();
    let finished = wait_for(
        || {
            let leader = leader.clone();
            async move { leader.is_finished(id).await }
        },
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await;
    assert!(finished);

    let (_, body) = send(&api.app, "GET", &format!("/api/v1/jobs/{}", job_id), None).await;
    assert_eq!(body[0]["status"], "ABORTED");
}

#[tokio::test]
async fn test_create_rejects_bad_requests() {
    let api = create_test_api().await;

    let (status, body) = send(
        &api.app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"name": "nope", "start": 0, "end": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("nope"));

    let (status, _) = send(
        &api.app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"name": "test", "start": 10, "end": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let api = create_test_api().await;
    let id = uuid::Uuid::new_v4();

    let (status, body) = send(&api.app, "GET", &format!("/api/v1/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Job not found.");

    let (status, _) = send(&api.app, "DELETE", &format!("/api/v1/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cluster_status() {
    let api = create_test_api().await;
    let (status, body) = send(&api.app, "GET", "/api/v1/cluster", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "node": "node-1",
            "role": "leader",
            "leader": "node-1",
            "workers": ["node-2"],
        })
    );
}
