use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use divergent::config::EngineConfiguration;
use divergent::dispatch::{
    DispatchError, Dispatcher, EndpointClient, EndpointResponse, HttpEndpointClient, Side,
};
use divergent::models::{ErrorKind, ExecutionOutcome, RawDifferenceType, RequestPairUnit, UnitPayload};
use divergent::output::progress::ProgressReporter;

/// In-process endpoint pair answering from a table
#[derive(Default)]
struct FakeEndpoints {
    table: HashMap<(String, Side), Result<(u16, &'static str), DispatchError>>,
}

impl FakeEndpoints {
    fn both(mut self, id: &str, a: (u16, &'static str), b: (u16, &'static str)) -> Self {
        self.table.insert((id.to_string(), Side::A), Ok(a));
        self.table.insert((id.to_string(), Side::B), Ok(b));
        self
    }

    fn failing(mut self, id: &str, a: DispatchError, b: DispatchError) -> Self {
        self.table.insert((id.to_string(), Side::A), Err(a));
        self.table.insert((id.to_string(), Side::B), Err(b));
        self
    }
}

impl EndpointClient for FakeEndpoints {
    async fn send(&self, side: Side, unit: &RequestPairUnit) -> Result<EndpointResponse, DispatchError> {
        match self.table.get(&(unit.relative_id.clone(), side)) {
            Some(Ok((status, body))) => Ok(EndpointResponse {
                status: *status,
                body: Arc::from(body.as_bytes()),
                elapsed: Duration::from_millis(2),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(DispatchError::Request(format!("unexpected unit {}", unit.relative_id))),
        }
    }
}

fn unit(id: &str) -> RequestPairUnit {
    RequestPairUnit {
        relative_id: id.to_string(),
        body: Arc::from(&br#"{"query":1}"#[..]),
        headers_a: Vec::new(),
        headers_b: Vec::new(),
        content_type: "application/json".to_string(),
    }
}

fn service() -> divergent::batch::ComparisonService {
    let mut config = EngineConfiguration::default();
    config.pipeline.decode_max_workers = 2;
    config.pipeline.compare_max_workers = 2;
    config.pipeline.adaptive = false;
    config.build_service().unwrap()
}

#[tokio::test]
async fn test_status_mismatch_falls_back_to_raw_text() {
    let endpoints = FakeEndpoints::default().both(
        "mismatch.json",
        (200, "{\"total\": 10}\n{\"items\": 2}"),
        (500, "Internal Server Error\nstack trace"),
    );
    let dispatcher = Dispatcher::new(endpoints, 4);

    let report = service()
        .run_request_batch(
            vec![unit("mismatch.json")],
            &dispatcher,
            Arc::new(AtomicBool::new(false)),
            &ProgressReporter::disabled(),
        )
        .await;

    let record = &report.results[0];
    assert_eq!(record.outcome, Some(ExecutionOutcome::StatusCodeMismatch));
    assert_eq!(record.status_a, Some(200));
    assert_eq!(record.status_b, Some(500));
    match &record.payload {
        UnitPayload::RawText { comparison } => {
            assert_eq!(comparison.differences[0].kind, RawDifferenceType::StatusCodeDifference);
            assert!(comparison.differences[1..]
                .iter()
                .any(|d| d.kind != RawDifferenceType::StatusCodeDifference));
        }
        other => panic!("expected raw-text comparison, got {:?}", other),
    }
}

#[tokio::test]
async fn test_both_endpoints_failing_yields_error_without_comparison() {
    let endpoints = FakeEndpoints::default().failing(
        "down.json",
        DispatchError::Connect("dns error: no such host".to_string()),
        DispatchError::Timeout(Duration::from_millis(500)),
    );
    let dispatcher = Dispatcher::new(endpoints, 4);
    let service = service();

    let report = service
        .run_request_batch(
            vec![unit("down.json")],
            &dispatcher,
            Arc::new(AtomicBool::new(false)),
            &ProgressReporter::disabled(),
        )
        .await;

    let record = &report.results[0];
    assert_eq!(record.outcome, Some(ExecutionOutcome::OneOrBothFailed));
    match &record.payload {
        UnitPayload::Error { error } => {
            assert_eq!(error.kind, ErrorKind::Dispatch);
            assert!(error.message.contains("dns error: no such host"));
            assert!(error.message.contains("timed out after 500ms"));
        }
        other => panic!("expected error record, got {:?}", other),
    }
    assert_eq!(service.stats().documents.entries, 0);
    assert_eq!(service.stats().results.entries, 0);
}

#[tokio::test]
async fn test_batch_of_five_with_malformed_third_unit() {
    let endpoints = FakeEndpoints::default()
        .both("1", (200, r#"{"a":1}"#), (200, r#"{"a":1}"#))
        .both("2", (200, r#"{"a":1}"#), (200, r#"{"a":2}"#))
        .both("3", (200, r#"{"a":1}"#), (200, "<html>oops</html>"))
        .both("4", (200, r#"{"b":[1,2]}"#), (200, r#"{"b":[1,2,3]}"#))
        .both("5", (201, r#"{"c":null}"#), (200, r#"{"c":"set"}"#));
    let dispatcher = Dispatcher::new(endpoints, 2);

    let report = service()
        .run_request_batch(
            ["1", "2", "3", "4", "5"].iter().map(|id| unit(id)).collect(),
            &dispatcher,
            Arc::new(AtomicBool::new(false)),
            &ProgressReporter::disabled(),
        )
        .await;

    assert_eq!(report.results.len(), 5);
    assert_eq!(report.summary.both_success, 5);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.equal, 1);
    assert_eq!(report.summary.different, 3);
    match &report.results[2].payload {
        UnitPayload::Error { error } => assert_eq!(error.kind, ErrorKind::Decode),
        other => panic!("unit 3 should fail to decode, got {:?}", other),
    }
}

/// Minimal HTTP/1.1 server: `/ok` echoes the body, `/fail` answers 503, `/slow` stalls,
/// `/big` and `/bigfail` answer 64 KiB with 200 and 500
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 1024];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
                let length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                while buffer.len() < header_end + length {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                }
                let body = buffer[header_end..].to_vec();

                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, reply) = match path.as_str() {
                    "/ok" => ("200 OK", body),
                    "/slow" => {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        ("200 OK", body)
                    }
                    "/big" => ("200 OK", vec![b'x'; 64 * 1024]),
                    "/bigfail" => ("500 Internal Server Error", vec![b'e'; 64 * 1024]),
                    _ => ("503 Service Unavailable", b"maintenance".to_vec()),
                };
                let header = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    reply.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_client_against_local_server() {
    let base = spawn_server().await;
    let client = HttpEndpointClient::new(
        format!("{}/ok", base),
        format!("{}/fail", base),
        Duration::from_secs(5),
    )
    .unwrap();
    let dispatcher = Dispatcher::new(client, 2);

    let pair = dispatcher.dispatch_one(&unit("r1")).await;
    assert_eq!(pair.outcome, ExecutionOutcome::StatusCodeMismatch);
    let a = pair.side_a.unwrap();
    assert_eq!(a.status, 200);
    assert_eq!(&*a.body, br#"{"query":1}"#);
    assert_eq!(pair.side_b.unwrap().status, 503);
}

#[tokio::test]
async fn test_http_timeout_marks_side_failed() {
    let base = spawn_server().await;
    let client = HttpEndpointClient::new(
        format!("{}/slow", base),
        format!("{}/ok", base),
        Duration::from_millis(200),
    )
    .unwrap();
    let dispatcher = Dispatcher::new(client, 1);

    let pair = dispatcher.dispatch_one(&unit("r1")).await;
    assert_eq!(pair.outcome, ExecutionOutcome::OneOrBothFailed);
    assert!(matches!(pair.side_a, Err(DispatchError::Timeout(_))));
    assert_eq!(pair.side_b.unwrap().status, 200);
}

#[tokio::test]
async fn test_http_body_ceilings() {
    let base = spawn_server().await;
    let client = HttpEndpointClient::new(
        format!("{}/big", base),
        format!("{}/bigfail", base),
        Duration::from_secs(5),
    )
    .unwrap()
    .with_body_limits(16 * 1024, 1024);
    let dispatcher = Dispatcher::new(client, 1);

    let pair = dispatcher.dispatch_one(&unit("r1")).await;
    assert_eq!(pair.side_a, Err(DispatchError::BodyTooLarge(16 * 1024)));
    let b = pair.side_b.unwrap();
    assert_eq!(b.status, 500);
    assert_eq!(b.body.len(), 1025);
}
