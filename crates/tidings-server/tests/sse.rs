//! End-to-end tests against a real listener, reading SSE with reqwest and
//! eventsource-stream.

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::sync::Notify;
use tokio::time::timeout;

use tidings_core::errors::PipelineError;
use tidings_core::events::EventKind;
use tidings_core::ids::Topic;
use tidings_engine::{ScriptedEngine, ScriptedRun, Step};
use tidings_server::{start, ServerConfig, ServerHandle};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    event: String,
    data: String,
    id: Option<u64>,
}

impl Frame {
    fn ends_stream(&self) -> bool {
        matches!(self.event.as_str(), "finish" | "error" | "close")
    }
}

type SseEvents = BoxStream<'static, Result<Event, EventStreamError<reqwest::Error>>>;

struct SseReader {
    headers: HeaderMap,
    events: SseEvents,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            headers: response.headers().clone(),
            events: response.bytes_stream().eventsource().boxed(),
        }
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Next event frame. Keep-alive comments never surface. `None` at end of
    /// body.
    async fn next_frame(&mut self) -> Option<Frame> {
        let event = self.events.next().await?.ok()?;
        Some(Frame {
            event: event.event,
            data: event.data,
            id: event.id.parse().ok(),
        })
    }

    async fn expect_frame(&mut self) -> Frame {
        timeout(TIMEOUT, self.next_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended early")
    }

    /// Frames up to and including the one that ends the stream.
    async fn until_end(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.expect_frame().await;
            let done = frame.ends_stream();
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

struct TestServer {
    handle: ServerHandle,
    engine: Arc<ScriptedEngine>,
    client: reqwest::Client,
}

impl TestServer {
    async fn boot(runs: Vec<ScriptedRun>) -> Self {
        Self::boot_with(runs, ServerConfig::default(), None).await
    }

    async fn boot_with(
        runs: Vec<ScriptedRun>,
        config: ServerConfig,
        prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
    ) -> Self {
        let engine = Arc::new(ScriptedEngine::new(runs));
        let handle = start(config, engine.clone(), prometheus).await.unwrap();
        Self {
            handle,
            engine,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.handle.local_addr(), path)
    }

    async fn chat(&self, request_id: &str, input: &str) -> SseReader {
        let resp = self
            .client
            .get(self.url("/v1/chat"))
            .query(&[("input", input), ("requestId", request_id)])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        SseReader::new(resp)
    }

    async fn resume(&self, request_id: &str, last_event_id: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(self.url(&format!("/v1/chat/{request_id}/events")));
        if let Some(id) = last_event_id {
            req = req.header("Last-Event-ID", id);
        }
        req.send().await.unwrap()
    }

    async fn wait_run_released(&self, request_id: &str) {
        let topic = Topic::new(request_id);
        timeout(TIMEOUT, async {
            while self.handle.runs().is_running(&topic) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run was never released");
    }
}

fn events_and_data(frames: &[Frame]) -> Vec<(&str, &str)> {
    frames.iter().map(|f| (f.event.as_str(), f.data.as_str())).collect()
}

fn assert_increasing_ids(frames: &[Frame]) {
    let ids: Vec<u64> = frames.iter().map(|f| f.id.expect("frame without id")).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {ids:?}");
}

#[tokio::test]
async fn answer_streams_deltas_then_finish() {
    let server = TestServer::boot(vec![ScriptedRun::answer(["He", "llo"])]).await;
    let mut sse = server.chat("req_hello", "hi").await;
    assert_eq!(sse.header("x-request-id").as_deref(), Some("req_hello"));

    let frames = sse.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![("answer-delta", "He"), ("answer-delta", "llo"), ("finish", "finish")]
    );
    assert_increasing_ids(&frames);
    assert!(timeout(TIMEOUT, sse.next_frame()).await.unwrap().is_none());

    let requests = server.engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].input, "hi");
    assert_eq!(requests[0].request_id.as_str(), "req_hello");
}

#[tokio::test]
async fn inner_error_after_one_delta() {
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![Step::BrokenAnswer {
        deltas: vec!["He".into()],
        error: PipelineError::StreamInterrupted("upstream reset".into()),
    }])])
    .await;

    let frames = server.chat("req_broken", "hi").await.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![("answer-delta", "He"), ("error", "chat failed")]
    );
}

#[tokio::test]
async fn outer_error_is_chat_failed() {
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![Step::Fail(PipelineError::Model(
        "down".into(),
    ))])])
    .await;

    let frames = server.chat("req_outer", "hi").await.until_end().await;
    assert_eq!(events_and_data(&frames), vec![("error", "chat failed")]);
}

#[tokio::test]
async fn unhandled_event_kinds_are_skipped() {
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![
        Step::Event(EventKind::Knowledge),
        Step::Event(EventKind::FuncCall),
        Step::answer(["ok"]),
        Step::Event(EventKind::Suggest),
    ])])
    .await;

    let frames = server.chat("req_kinds", "hi").await.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![("answer-delta", "ok"), ("finish", "finish")]
    );
}

#[tokio::test]
async fn generated_request_id_is_returned() {
    let server = TestServer::boot(vec![ScriptedRun::answer(["x"])]).await;
    let resp = server
        .client
        .get(server.url("/v1/chat"))
        .query(&[("input", "hi")])
        .send()
        .await
        .unwrap();
    let mut sse = SseReader::new(resp);
    let id = sse.header("x-request-id").unwrap();
    assert!(id.starts_with("req_"), "got {id}");
    let _ = sse.until_end().await;
}

#[tokio::test]
async fn engine_start_failure_is_500_json() {
    let server = TestServer::boot(vec![ScriptedRun::Error(PipelineError::Model("no model".into()))]).await;
    let resp = server
        .client
        .get(server.url("/v1/chat"))
        .query(&[("input", "hi"), ("requestId", "req_fail")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "model");
}

#[tokio::test]
async fn resume_replays_missed_tail_then_goes_live() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![Step::GatedAnswer {
        before: vec!["a".into(), "b".into()],
        gate: Arc::clone(&gate),
        after: vec!["c".into()],
    }])])
    .await;

    let mut first = server.chat("req_resume", "hi").await;
    let a = first.expect_frame().await;
    let b = first.expect_frame().await;
    assert_eq!((a.data.as_str(), b.data.as_str()), ("a", "b"));

    // A second tab keeps the run alive while the first reconnects.
    let mut keeper = SseReader::new(server.resume("req_resume", None).await);
    drop(first);

    let last_seen = a.id.unwrap().to_string();
    let resp = server.resume("req_resume", Some(&last_seen)).await;
    assert_eq!(resp.status(), 200);
    let mut resumed = SseReader::new(resp);

    gate.notify_one();

    let frames = resumed.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![("answer-delta", "b"), ("answer-delta", "c"), ("finish", "finish")]
    );
    assert_increasing_ids(&frames);
    assert!(frames.iter().all(|f| f.id.unwrap() > a.id.unwrap()));

    let live = keeper.until_end().await;
    assert_eq!(
        events_and_data(&live),
        vec![("answer-delta", "c"), ("finish", "finish")]
    );
}

#[tokio::test]
async fn second_chat_for_same_request_attaches() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![Step::GatedAnswer {
        before: vec!["a".into()],
        gate: Arc::clone(&gate),
        after: vec!["z".into()],
    }])])
    .await;

    let mut first = server.chat("req_attach", "hi").await;
    let _ = first.expect_frame().await;
    let mut second = server.chat("req_attach", "hi again").await;
    assert_eq!(server.engine.call_count(), 1);

    gate.notify_one();
    let from_first = first.until_end().await;
    let from_second = second.until_end().await;
    assert_eq!(from_first.last().unwrap().event, "finish");
    assert_eq!(
        events_and_data(&from_second),
        vec![("answer-delta", "z"), ("finish", "finish")]
    );
}

#[tokio::test]
async fn remaining_subscriber_gets_full_sequence_after_other_disconnects() {
    let gate = Arc::new(Notify::new());
    let config = ServerConfig {
        keep_alive: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let server = TestServer::boot_with(
        vec![ScriptedRun::Steps(vec![Step::GatedAnswer {
            before: vec!["He".into()],
            gate: Arc::clone(&gate),
            after: vec!["l".into(), "lo".into()],
        }])],
        config,
        None,
    )
    .await;

    let mut leaving = server.chat("req_pair", "hi").await;
    let first = leaving.expect_frame().await;
    assert_eq!(first.data, "He");

    let resp = server.resume("req_pair", Some("0")).await;
    assert_eq!(resp.status(), 200);
    let mut staying = SseReader::new(resp);

    drop(leaving);
    // Let a keep-alive write notice the closed socket.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.handle.runs().is_running(&Topic::new("req_pair")));
    gate.notify_one();

    let frames = staying.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![
            ("answer-delta", "He"),
            ("answer-delta", "l"),
            ("answer-delta", "lo"),
            ("finish", "finish"),
        ]
    );
    assert_increasing_ids(&frames);
    server.wait_run_released("req_pair").await;
}

#[tokio::test]
async fn multibyte_deltas_arrive_intact() {
    let server = TestServer::boot(vec![ScriptedRun::answer(["é", "🌤 clear", "ß"])]).await;
    let frames = server.chat("req_utf8", "hi").await.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![
            ("answer-delta", "é"),
            ("answer-delta", "🌤 clear"),
            ("answer-delta", "ß"),
            ("finish", "finish"),
        ]
    );
}

#[tokio::test]
async fn last_disconnect_cancels_run() {
    let gate = Arc::new(Notify::new());
    let config = ServerConfig {
        keep_alive: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let server = TestServer::boot_with(
        vec![ScriptedRun::Steps(vec![Step::GatedAnswer {
            before: vec!["a".into()],
            gate,
            after: vec!["never".into()],
        }])],
        config,
        None,
    )
    .await;

    let mut only = server.chat("req_gone", "hi").await;
    let a = only.expect_frame().await;
    drop(only);

    server.wait_run_released("req_gone").await;

    let resp = server.resume("req_gone", Some(&a.id.unwrap().to_string())).await;
    assert_eq!(resp.status(), 200);
    let frames = SseReader::new(resp).until_end().await;
    assert_eq!(events_and_data(&frames), vec![("error", "chat cancelled")]);
}

#[tokio::test]
async fn garbage_last_event_id_means_live_only() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![Step::GatedAnswer {
        before: vec!["a".into()],
        gate: Arc::clone(&gate),
        after: vec!["b".into()],
    }])])
    .await;

    let mut first = server.chat("req_garbage", "hi").await;
    let _ = first.expect_frame().await;

    let resp = server.resume("req_garbage", Some("not-a-number")).await;
    assert_eq!(resp.status(), 200);
    let mut live = SseReader::new(resp);
    gate.notify_one();

    let frames = live.until_end().await;
    assert_eq!(
        events_and_data(&frames),
        vec![("answer-delta", "b"), ("finish", "finish")]
    );
}

#[tokio::test]
async fn resume_unknown_request_is_404() {
    let server = TestServer::boot(vec![]).await;
    let resp = server.resume("req_unknown", Some("3")).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn shutdown_closes_open_streams() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::boot(vec![ScriptedRun::Steps(vec![Step::GatedAnswer {
        before: vec!["a".into()],
        gate,
        after: vec!["never".into()],
    }])])
    .await;

    let mut sse = server.chat("req_shutdown", "hi").await;
    let _ = sse.expect_frame().await;

    timeout(TIMEOUT, server.handle.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();

    let rest = sse.until_end().await;
    let last = rest.last().unwrap();
    assert!(
        last.event == "close" || (last.event == "error" && last.data == "chat cancelled"),
        "unexpected last frame {last:?}"
    );
    assert!(timeout(TIMEOUT, sse.next_frame()).await.unwrap().is_none());

    assert!(server.client.get(server.url("/v1/healthz")).send().await.is_err());
    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn healthz_and_metrics() {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let server = TestServer::boot_with(vec![], ServerConfig::default(), Some(recorder.handle())).await;

    let health = server.client.get(server.url("/v1/healthz")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "healthz");

    let metrics = server.client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
}
