use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use vdb_client::{
    ClientError, EventOutcome, RunOrchestrator, ServiceClient, TransportError,
    DEFAULT_REQUEST_TIMEOUT,
};
use vdb_core::{replay, CaptureRequest, CaptureState, CreateRunRequest, RunMode, RunStatus};

fn optimize_frames() -> Vec<Value> {
    vec![
        json!({"phase": "compile", "action": "compile", "reasoning": "Compilation successful",
               "code": "module top; endmodule", "lut_history": [], "iteration": 0, "done": false}),
        json!({"phase": "optimize", "action": "synthesize", "reasoning": "Synthesis: 140 LUTs",
               "result": {"success": true, "luts": 140}, "lut_history": [140], "iteration": 0, "done": false}),
        json!({"phase": "optimize", "action": "edit", "reasoning": "Pipelined the adder tree",
               "code": "module top; /* rev1 */ endmodule", "lut_history": [140], "iteration": 1,
               "edit_applied": {"edit_type": "replace", "line_start": 3, "line_end": 5}, "done": false}),
        json!({"phase": "optimize", "action": "synthesize", "lut_history": [140, 120], "iteration": 1, "done": false}),
        json!({"phase": "optimize", "action": "synthesize", "lut_history": [140, 120], "iteration": 1, "done": false}),
        json!({"phase": "done", "reasoning": "Optimization complete", "lut_history": [140, 120, 96],
               "iteration": 2, "done": true}),
        json!({"done": true, "status": "completed"}),
    ]
}

async fn play(mut socket: WebSocket, frames: Vec<Value>, close: bool) {
    for frame in frames {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    if close {
        let _ = socket.send(Message::Close(None)).await;
    }
}

async fn start(Json(body): Json<Value>) -> impl IntoResponse {
    let design = body["design_code"].as_str().unwrap_or_default();
    if design.contains("reject") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "LLM backend unavailable"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"run_id": "ab12cd34", "message": "Optimization started"})),
    )
}

async fn testgen_start(Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({"run_id": "tg000001", "message": "Test generation started"}))
}

async fn stream(ws: WebSocketUpgrade, Path(_run_id): Path<String>) -> impl IntoResponse {
    ws.on_upgrade(|socket| play(socket, optimize_frames(), false))
}

async fn testgen_stream(ws: WebSocketUpgrade, Path(_run_id): Path<String>) -> impl IntoResponse {
    let frames = vec![json!({"phase": "analyze", "reasoning": "Found 3 inputs", "iteration": 0})];
    ws.on_upgrade(|socket| play(socket, frames, true))
}

async fn status(Path(run_id): Path<String>) -> impl IntoResponse {
    if run_id != "ab12cd34" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Run not found"})),
        );
    }
    let history = optimize_frames();
    (
        StatusCode::OK,
        Json(json!({
            "run_id": run_id,
            "status": "completed",
            "latest": history[history.len() - 2],
            "history": history
        })),
    )
}

async fn capture(Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({
        "success": true,
        "passed": true,
        "vcd_path": "/tmp/fpga-agent/dump.vcd",
        "signals": [
            {"name": "clk", "width": 1, "values": [{"time": 0, "value": 0}, {"time": 5, "value": 1}, {"time": 10, "value": 0}]},
            {"name": "sum", "width": 9, "values": [{"time": 0, "value": "000000000"}, {"time": 5, "value": "100000001"}]}
        ]
    }))
}

async fn spawn_service() -> String {
    let app = Router::new()
        .route("/start", post(start))
        .route("/testgen/start", post(testgen_start))
        .route("/stream/:run_id", get(stream))
        .route("/testgen/stream/:run_id", get(testgen_stream))
        .route("/status/:run_id", get(status))
        .route("/debug/vcd", post(capture))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn client(base: &str) -> ServiceClient {
    ServiceClient::new(base, DEFAULT_REQUEST_TIMEOUT).expect("client")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimize_run_streams_to_completion() {
    let base = spawn_service().await;
    let mut orchestrator = RunOrchestrator::new(client(&base));
    let mut snapshots = orchestrator.subscribe();

    let request = CreateRunRequest::optimize("module top; endmodule", "module tb; endmodule", 5);
    orchestrator.start(request).await.expect("stream opened");
    let outcome = orchestrator.run_to_completion().await;

    assert_eq!(outcome, EventOutcome::Finished(RunStatus::Completed));
    let record = orchestrator.record();
    assert_eq!(record.run_id.as_deref(), Some("ab12cd34"));
    assert_eq!(record.series, vec![140.0, 120.0, 96.0]);
    assert_eq!(record.iteration, 2);
    assert_eq!(record.code.as_deref(), Some("module top; /* rev1 */ endmodule"));
    assert_eq!(record.narrative.as_deref(), Some("Optimization complete"));
    assert_eq!(
        record.last_edit.as_ref().and_then(|edit| edit.line_start),
        Some(3)
    );

    let mut last = None;
    while let Ok(snapshot) = snapshots.try_recv() {
        last = Some(snapshot);
    }
    let last = last.expect("snapshots published");
    assert_eq!(last.record.status, RunStatus::Completed);
    let reduction = last.metrics.reduction_percent.expect("reduction");
    assert!((reduction - 31.428).abs() < 0.01);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_close_is_a_transport_failure() {
    let base = spawn_service().await;
    let mut orchestrator = RunOrchestrator::new(client(&base));
    let mut errors = orchestrator.subscribe_errors();

    orchestrator
        .start(CreateRunRequest::testgen("module adder; endmodule", 3))
        .await
        .expect("stream opened");
    let outcome = orchestrator.run_to_completion().await;

    assert_eq!(outcome, EventOutcome::TransportFailed);
    assert_eq!(orchestrator.record().status, RunStatus::Running);
    assert_eq!(orchestrator.record().mode, RunMode::Testgen);
    assert_eq!(orchestrator.record().phase.as_deref(), Some("analyze"));
    assert_eq!(errors.recv().await, Some(TransportError::ClosedEarly));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_create_surfaces_the_detail() {
    let base = spawn_service().await;
    let mut orchestrator = RunOrchestrator::new(client(&base));
    let request = CreateRunRequest::optimize("// reject me", "module tb; endmodule", 5);
    assert!(orchestrator.start(request).await.is_none());
    assert_eq!(orchestrator.record().status, RunStatus::Failed);
    assert_eq!(
        orchestrator.record().error.as_deref(),
        Some("LLM backend unavailable")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_history_replays_like_the_stream() {
    let base = spawn_service().await;
    let client = client(&base);

    let response = client.status("ab12cd34").await.expect("status");
    assert_eq!(response.status_kind(), Some(RunStatus::Completed));
    let record = replay(RunMode::Optimize, &response.run_id, &response.history);
    assert_eq!(record.series, vec![140.0, 120.0, 96.0]);
    assert_eq!(record.status, RunStatus::Completed);

    match client.status("missing").await {
        Err(ClientError::Rejected { status, detail }) => {
            assert_eq!(status, 404);
            assert_eq!(detail, "Run not found");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_and_health_round_trip() {
    let base = spawn_service().await;
    let client = client(&base);
    assert!(client.health().await.expect("health").is_ok());

    let response = client
        .capture(&CaptureRequest {
            design_code: "module adder; endmodule".to_string(),
            testbench_code: "module tb; endmodule".to_string(),
        })
        .await
        .expect("capture");
    let mut state = CaptureState::new();
    state.populate(response);
    assert_eq!(state.max_time(), 11);
    state.set_cursor(7);
    let values = state.values_at_cursor();
    assert_eq!(values[0].display, "1");
    assert_eq!(values[1].display, "101");
}
