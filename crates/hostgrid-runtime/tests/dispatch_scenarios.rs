use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hostgrid_runtime::{
    ComputeRepository, Credits, DispatchOutcome, DispatchRequest, DispatchSummary, Dispatcher,
    ExecutionStatus, HostRegistry, HttpInvoker, HttpProtocolDetector, InMemoryComputeRepository,
    InvokerConfig, NewHost, NewServer, PaymentStatus, ProtocolDetector, ProtocolType,
    ServerCatalog,
};
use serde_json::{json, Value};

#[derive(Clone, Copy)]
enum Behavior {
    Ok,
    Fail,
    /// Fail when the request parameters carry `"fail": true`.
    FailOnFlag,
    Slow(Duration),
}

#[derive(Clone)]
struct MockHost {
    behavior: Behavior,
    received: Arc<Mutex<Vec<Value>>>,
}

async fn execute(State(mock): State<MockHost>, Json(body): Json<Value>) -> Response {
    mock.received.lock().unwrap().push(body.clone());
    match mock.behavior {
        Behavior::Ok => Json(json!({"result": "ok"})).into_response(),
        Behavior::Fail => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        Behavior::FailOnFlag => {
            if body["parameters"]["fail"] == json!(true) {
                (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
            } else {
                Json(json!({"result": "ok"})).into_response()
            }
        }
        Behavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            Json(json!({"result": "late"})).into_response()
        }
    }
}

async fn info() -> Json<Value> {
    Json(json!({"name": "mock", "protocolVersion": "2024-11-05"}))
}

/// Serve a mock compute host on an ephemeral loopback port.
async fn spawn_mock_host(behavior: Behavior) -> (String, Arc<Mutex<Vec<Value>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/execute", post(execute))
        .route("/info", get(info))
        .with_state(MockHost {
            behavior,
            received: received.clone(),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), received)
}

fn register_host<R: ComputeRepository + Clone>(
    repo: &R,
    endpoint: &str,
    protocols: Vec<ProtocolType>,
) -> String {
    HostRegistry::new(repo.clone())
        .register_host(NewHost {
            owner_id: "operator-1".into(),
            name: "host A".into(),
            endpoint: endpoint.into(),
            capabilities: vec!["cpu".into()],
            primary_protocol: protocols.first().copied(),
            compatible_protocols: protocols,
            profit_share_percentage: Some(70),
            ..Default::default()
        })
        .unwrap()
        .host_id
}

fn mcp_request(cost: i64) -> DispatchRequest {
    DispatchRequest::new("requester-1", "X", "run", Credits::from_whole(cost))
        .with_protocol(ProtocolType::Mcp)
        .with_parameters(json!({"city": "Oslo"}))
}

fn executed(outcome: DispatchOutcome) -> DispatchSummary {
    match outcome {
        DispatchOutcome::Executed(summary) => summary,
        DispatchOutcome::NoHostAvailable => panic!("expected an execution"),
    }
}

#[tokio::test]
async fn successful_host_completes_with_seventy_thirty_split() {
    let (endpoint, received) = spawn_mock_host(Behavior::Ok).await;
    let repo = InMemoryComputeRepository::new();
    let host_id = register_host(&repo, &endpoint, vec![ProtocolType::Mcp]);
    let dispatcher = Dispatcher::new(repo.clone(), HttpInvoker::new().unwrap());

    let summary = executed(dispatcher.dispatch(mcp_request(10)).await.unwrap());
    assert!(summary.success);
    assert_eq!(summary.host_id, host_id);
    assert_eq!(summary.result, Some(json!({"result": "ok"})));
    assert_eq!(summary.host_earnings, Credits::from_whole(7));
    assert_eq!(summary.platform_earnings, Credits::from_whole(3));

    let record = repo.get_execution(&summary.execution_id).unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.host_earnings, Some(Credits::from_whole(7)));
    assert_eq!(record.platform_earnings, Some(Credits::from_whole(3)));

    let host = repo.get_host(&host_id).unwrap().unwrap();
    assert_eq!(host.total_executions, 1);
    assert_eq!(host.successful_executions, 1);
    assert_eq!(host.total_earnings, Credits::from_whole(7));

    let payments = repo.list_payments_for_host(&host_id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, Credits::from_whole(7));
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert_eq!(payments[0].execution_id, summary.execution_id);

    let bodies = received.lock().unwrap().clone();
    assert_eq!(
        bodies,
        vec![json!({
            "server": "X",
            "server_type": "mcp",
            "function": "run",
            "parameters": {"city": "Oslo"}
        })]
    );
}

#[tokio::test]
async fn failing_host_records_failed_execution_without_payment() {
    let (endpoint, _) = spawn_mock_host(Behavior::Fail).await;
    let repo = InMemoryComputeRepository::new();
    let host_id = register_host(&repo, &endpoint, vec![ProtocolType::Mcp]);
    let dispatcher = Dispatcher::new(repo.clone(), HttpInvoker::new().unwrap());

    let summary = executed(dispatcher.dispatch(mcp_request(10)).await.unwrap());
    assert!(!summary.success);
    assert_eq!(summary.error.as_deref(), Some("Host returned 500: boom"));

    let record = repo.get_execution(&summary.execution_id).unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("Host returned 500: boom"));
    assert!(record.completed_at.is_some());

    let host = repo.get_host(&host_id).unwrap().unwrap();
    assert_eq!(host.total_executions, 1);
    assert_eq!(host.successful_executions, 0);
    assert_eq!(host.total_earnings, Credits::ZERO);
    assert!(repo.list_payments_for_host(&host_id).unwrap().is_empty());
}

#[tokio::test]
async fn missing_a2a_host_is_unavailable_and_creates_nothing() {
    let (endpoint, received) = spawn_mock_host(Behavior::Ok).await;
    let repo = InMemoryComputeRepository::new();
    register_host(&repo, &endpoint, vec![ProtocolType::Mcp]);
    let dispatcher = Dispatcher::new(repo.clone(), HttpInvoker::new().unwrap());

    let request = DispatchRequest::new("requester-1", "X", "run", Credits::from_whole(10))
        .with_protocol(ProtocolType::A2a);
    assert_eq!(
        dispatcher.dispatch(request).await.unwrap(),
        DispatchOutcome::NoHostAvailable
    );
    assert!(repo.list_recent_executions(None, 100).unwrap().is_empty());
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stalled_host_is_cut_off_by_the_invoke_timeout() {
    let (endpoint, _) = spawn_mock_host(Behavior::Slow(Duration::from_secs(5))).await;
    let repo = InMemoryComputeRepository::new();
    let host_id = register_host(&repo, &endpoint, vec![ProtocolType::Mcp]);
    let invoker = HttpInvoker::with_config(
        InvokerConfig::default().with_timeout(Duration::from_millis(200)),
    )
    .unwrap();
    let dispatcher = Dispatcher::new(repo.clone(), invoker);

    let summary = executed(dispatcher.dispatch(mcp_request(10)).await.unwrap());
    assert!(!summary.success);
    assert!(summary
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("Host request timed out"));
    assert!(summary.execution_time_ms < 5_000);
    assert_eq!(repo.get_host(&host_id).unwrap().unwrap().total_executions, 1);
}

#[tokio::test]
async fn unreachable_host_fails_the_execution() {
    let repo = InMemoryComputeRepository::new();
    let host_id = register_host(&repo, "http://127.0.0.1:9", vec![ProtocolType::Mcp]);
    let invoker = HttpInvoker::with_config(
        InvokerConfig::default().with_connect_timeout(Duration::from_millis(500)),
    )
    .unwrap();
    let dispatcher = Dispatcher::new(repo.clone(), invoker);

    let summary = executed(dispatcher.dispatch(mcp_request(10)).await.unwrap());
    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert!(summary.error.is_some());
    let host = repo.get_host(&host_id).unwrap().unwrap();
    assert_eq!(host.total_executions, 1);
    assert_eq!(host.successful_executions, 0);
}

async fn assert_concurrent_counters<R>(repo: R)
where
    R: ComputeRepository + Clone + 'static,
{
    let (endpoint, _) = spawn_mock_host(Behavior::FailOnFlag).await;
    let host_id = register_host(&repo, &endpoint, vec![ProtocolType::Mcp]);
    let dispatcher = Dispatcher::new(repo.clone(), HttpInvoker::new().unwrap());

    let total = 24;
    let mut handles = Vec::new();
    for i in 0..total {
        let dispatcher = dispatcher.clone();
        let request = mcp_request(10).with_parameters(json!({"fail": i % 3 == 0}));
        handles.push(tokio::spawn(async move { dispatcher.dispatch(request).await }));
    }
    let mut successes = 0u64;
    for handle in handles {
        let summary = executed(handle.await.unwrap().unwrap());
        let record = repo.get_execution(&summary.execution_id).unwrap().unwrap();
        assert_eq!(
            record.host_earnings.unwrap() + record.platform_earnings.unwrap(),
            record.cost
        );
        if summary.success {
            successes += 1;
        }
    }
    assert_eq!(successes, 16);

    let host = repo.get_host(&host_id).unwrap().unwrap();
    assert_eq!(host.total_executions, total);
    assert_eq!(host.successful_executions, successes);
    assert_eq!(host.total_earnings, Credits::from_whole(7 * successes as i64));
    assert_eq!(
        repo.list_payments_for_host(&host_id).unwrap().len() as u64,
        successes
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_lose_no_updates_in_memory() {
    assert_concurrent_counters(InMemoryComputeRepository::new()).await;
}

#[cfg(feature = "sqlite-persistence")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_lose_no_updates_in_sqlite() {
    let path = std::env::temp_dir().join(format!("hostgrid-dispatch-{}.db", uuid::Uuid::new_v4()));
    let repo = hostgrid_runtime::SqliteComputeRepository::new(path.to_str().unwrap()).unwrap();
    assert_concurrent_counters(repo).await;
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn registered_server_protocol_is_detected_and_drives_selection() {
    let (endpoint, _) = spawn_mock_host(Behavior::Ok).await;
    let repo = InMemoryComputeRepository::new();
    let detector = HttpProtocolDetector::new(Duration::from_secs(2)).unwrap();
    assert_eq!(detector.detect(&endpoint).await.unwrap(), ProtocolType::Mcp);

    let catalog = ServerCatalog::new(repo.clone(), detector);
    let server = catalog
        .register_server(NewServer {
            owner_id: "requester-1".into(),
            name: "weather".into(),
            endpoint: endpoint.clone(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(server.protocol_type, ProtocolType::Mcp);

    let host_id = register_host(&repo, &endpoint, vec![ProtocolType::Mcp]);
    register_host(&repo, &endpoint, vec![ProtocolType::A2a]);
    let dispatcher = Dispatcher::new(repo.clone(), HttpInvoker::new().unwrap());
    let request = DispatchRequest::new("requester-1", "weather", "forecast", Credits::from_whole(4));
    let summary = executed(dispatcher.dispatch(request).await.unwrap());
    let record = repo.get_execution(&summary.execution_id).unwrap().unwrap();
    assert_eq!(record.protocol_type, ProtocolType::Mcp);
    assert_eq!(summary.host_id, host_id);
}
