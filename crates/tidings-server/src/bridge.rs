//! Stream bridge: drains one run's nested event stream into wire messages
//! published on the run's topic.

use std::fmt;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidings_broadcast::{BroadcastError, Publisher};
use tidings_core::events::{ChatEvent, DeltaStream, EventStream};
use tidings_core::ids::Topic;
use tidings_core::wire::WireMessage;
use tidings_telemetry::metric_names as m;

/// Reason published when a run is cancelled before it ends on its own.
pub const CHAT_CANCELLED: &str = "chat cancelled";

/// How a bridge run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Outer stream ended; `finish` published.
    Finished,
    /// Outer or inner stream failed; `error` published.
    Failed,
    /// Cancellation token fired; `error` published.
    Cancelled,
    /// The broadcast server is closed; nothing more could be published.
    HubClosed,
}

impl BridgeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::HubClosed => "hub_closed",
        }
    }
}

impl fmt::Display for BridgeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishes every delta of every model answer in order, then exactly one
/// terminal message (`finish` or `error`), unless the hub closes first.
pub struct StreamBridge<P> {
    publisher: P,
    topics: Vec<Topic>,
}

impl<P: Publisher> StreamBridge<P> {
    pub fn new(publisher: P, topic: Topic) -> Self {
        Self {
            publisher,
            topics: vec![topic],
        }
    }

    #[tracing::instrument(skip_all, name = "stream_bridge", fields(topic = %self.topics[0]))]
    pub async fn run(self, events: EventStream, cancel: CancellationToken) -> BridgeOutcome {
        metrics::gauge!(m::BRIDGE_RUNS_ACTIVE).increment(1.0);
        let outcome = self.drain(events, &cancel).await;
        metrics::gauge!(m::BRIDGE_RUNS_ACTIVE).decrement(1.0);
        metrics::counter!(m::BRIDGE_RUNS_TOTAL, "outcome" => outcome.as_str()).increment(1);
        info!(%outcome, "bridge run ended");
        outcome
    }

    async fn drain(&self, mut events: EventStream, cancel: &CancellationToken) -> BridgeOutcome {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.terminal(WireMessage::error(CHAT_CANCELLED), BridgeOutcome::Cancelled),
                next = events.next() => next,
            };

            let event = match next {
                None => return self.terminal(WireMessage::finish(), BridgeOutcome::Finished),
                Some(Err(e)) => {
                    warn!(error = %e, kind = e.error_kind(), "event stream failed");
                    return self.terminal(WireMessage::chat_failed(), BridgeOutcome::Failed);
                }
                Some(Ok(event)) => event,
            };

            match event {
                ChatEvent::ModelAnswer(deltas) => {
                    if let Some(outcome) = self.forward_answer(deltas, cancel).await {
                        return outcome;
                    }
                }
                ChatEvent::ToolsAsModelAnswer { .. }
                | ChatEvent::ToolMidAnswer { .. }
                | ChatEvent::ToolsMessage { .. }
                | ChatEvent::FuncCall { .. }
                | ChatEvent::Suggest { .. }
                | ChatEvent::Knowledge { .. }
                | ChatEvent::Interrupt { .. } => {
                    warn!(kind = event.kind().as_str(), "unhandled event kind, skipping");
                }
            }
        }
    }

    /// Drain one answer completely. `Some` means the run is over.
    async fn forward_answer(
        &self,
        mut deltas: DeltaStream,
        cancel: &CancellationToken,
    ) -> Option<BridgeOutcome> {
        let mut forwarded = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Some(self.terminal(WireMessage::error(CHAT_CANCELLED), BridgeOutcome::Cancelled));
                }
                next = deltas.next() => next,
            };

            match next {
                None => {
                    debug!(forwarded, "model answer complete");
                    return None;
                }
                Some(Ok(delta)) => {
                    if let Err(e) = self.publish(WireMessage::answer_delta(delta.text)) {
                        return Some(closed(e));
                    }
                    forwarded += 1;
                }
                Some(Err(e)) => {
                    warn!(error = %e, forwarded, "answer stream failed");
                    return Some(self.terminal(WireMessage::chat_failed(), BridgeOutcome::Failed));
                }
            }
        }
    }

    fn terminal(&self, message: WireMessage, outcome: BridgeOutcome) -> BridgeOutcome {
        match self.publish(message) {
            Ok(()) => outcome,
            Err(e) => closed(e),
        }
    }

    fn publish(&self, message: WireMessage) -> Result<(), BroadcastError> {
        self.publisher.publish(message, &self.topics).map(|_| ())
    }
}

fn closed(error: BroadcastError) -> BridgeOutcome {
    debug!(%error, "publish rejected, stopping bridge");
    BridgeOutcome::HubClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::stream;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use tidings_core::errors::PipelineError;
    use tidings_core::events::Delta;
    use tidings_core::ids::MessageId;
    use tidings_core::wire::WireType;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<WireMessage>>,
        closed_after: Option<usize>,
    }

    impl Recorder {
        fn closing_after(n: usize) -> Self {
            Self {
                closed_after: Some(n),
                ..Self::default()
            }
        }

        fn kinds_and_data(&self) -> Vec<(WireType, String)> {
            self.messages.lock().iter().map(|m| (m.kind, m.data.clone())).collect()
        }
    }

    impl Publisher for Recorder {
        fn publish(&self, message: WireMessage, _topics: &[Topic]) -> Result<MessageId, BroadcastError> {
            let mut messages = self.messages.lock();
            if self.closed_after.is_some_and(|n| messages.len() >= n) {
                return Err(BroadcastError::Closed);
            }
            messages.push(message);
            Ok(MessageId::new(messages.len() as u64))
        }
    }

    fn bridge(recorder: &Arc<Recorder>) -> StreamBridge<Arc<Recorder>> {
        StreamBridge::new(Arc::clone(recorder), Topic::new("req_t"))
    }

    fn events(items: Vec<Result<ChatEvent, PipelineError>>) -> EventStream {
        Box::pin(stream::iter(items))
    }

    fn delta(kind: WireType, data: &str) -> (WireType, String) {
        (kind, data.to_string())
    }

    #[tokio::test]
    async fn answer_then_finish() {
        let recorder = Arc::new(Recorder::default());
        let outcome = bridge(&recorder)
            .run(events(vec![Ok(ChatEvent::answer_from(["He", "llo"]))]), CancellationToken::new())
            .await;

        assert_eq!(outcome, BridgeOutcome::Finished);
        assert_eq!(
            recorder.kinds_and_data(),
            vec![
                delta(WireType::AnswerDelta, "He"),
                delta(WireType::AnswerDelta, "llo"),
                delta(WireType::Finish, "finish"),
            ]
        );
    }

    #[tokio::test]
    async fn inner_error_is_terminal() {
        let recorder = Arc::new(Recorder::default());
        let answer: DeltaStream = Box::pin(stream::iter(vec![
            Ok(Delta::new("He")),
            Err(PipelineError::StreamInterrupted("eof".into())),
            Ok(Delta::new("never")),
        ]));
        let outcome = bridge(&recorder)
            .run(
                events(vec![
                    Ok(ChatEvent::ModelAnswer(answer)),
                    Ok(ChatEvent::answer_from(["also never"])),
                ]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, BridgeOutcome::Failed);
        assert_eq!(
            recorder.kinds_and_data(),
            vec![delta(WireType::AnswerDelta, "He"), delta(WireType::Error, "chat failed")]
        );
    }

    #[tokio::test]
    async fn outer_error_is_terminal() {
        let recorder = Arc::new(Recorder::default());
        let outcome = bridge(&recorder)
            .run(
                events(vec![
                    Err(PipelineError::Model("down".into())),
                    Ok(ChatEvent::answer_from(["never"])),
                ]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, BridgeOutcome::Failed);
        assert_eq!(recorder.kinds_and_data(), vec![delta(WireType::Error, "chat failed")]);
    }

    #[tokio::test]
    async fn empty_run_still_finishes() {
        let recorder = Arc::new(Recorder::default());
        let outcome = bridge(&recorder).run(events(vec![]), CancellationToken::new()).await;

        assert_eq!(outcome, BridgeOutcome::Finished);
        assert_eq!(recorder.kinds_and_data(), vec![delta(WireType::Finish, "finish")]);
    }

    #[tokio::test]
    async fn empty_answer_publishes_no_deltas() {
        let recorder = Arc::new(Recorder::default());
        let outcome = bridge(&recorder)
            .run(
                events(vec![Ok(ChatEvent::answer_from(Vec::<&str>::new()))]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, BridgeOutcome::Finished);
        assert_eq!(recorder.kinds_and_data(), vec![delta(WireType::Finish, "finish")]);
    }

    #[tokio::test]
    async fn unhandled_kinds_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let outcome = bridge(&recorder)
            .run(
                events(vec![
                    Ok(ChatEvent::Knowledge { documents: vec!["d".into()] }),
                    Ok(ChatEvent::answer_from(["ok"])),
                    Ok(ChatEvent::Suggest { suggestions: vec![] }),
                ]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, BridgeOutcome::Finished);
        assert_eq!(
            recorder.kinds_and_data(),
            vec![delta(WireType::AnswerDelta, "ok"), delta(WireType::Finish, "finish")]
        );
    }

    #[tokio::test]
    async fn several_answers_keep_order() {
        let recorder = Arc::new(Recorder::default());
        let _ = bridge(&recorder)
            .run(
                events(vec![
                    Ok(ChatEvent::answer_from(["a", "b"])),
                    Ok(ChatEvent::answer_from(["c"])),
                ]),
                CancellationToken::new(),
            )
            .await;

        let data: Vec<String> = recorder.kinds_and_data().into_iter().map(|(_, d)| d).collect();
        assert_eq!(data, vec!["a", "b", "c", "finish"]);
    }

    #[tokio::test]
    async fn cancellation_mid_answer_publishes_one_error() {
        let recorder = Arc::new(Recorder::default());
        let gate = Arc::new(Notify::new());
        let held = {
            let gate = Arc::clone(&gate);
            stream::once(async { Ok::<_, PipelineError>(Delta::new("first")) }).chain(stream::once(async move {
                gate.notified().await;
                Ok::<_, PipelineError>(Delta::new("late"))
            }))
        };
        let cancel = CancellationToken::new();
        let run = tokio::spawn(
            bridge(&recorder).run(events(vec![Ok(ChatEvent::ModelAnswer(Box::pin(held)))]), cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(run.await.unwrap(), BridgeOutcome::Cancelled);
        assert_eq!(
            recorder.kinds_and_data(),
            vec![delta(WireType::AnswerDelta, "first"), delta(WireType::Error, CHAT_CANCELLED)]
        );
    }

    #[tokio::test]
    async fn closed_hub_stops_without_terminal() {
        let recorder = Arc::new(Recorder::closing_after(1));
        let outcome = bridge(&recorder)
            .run(events(vec![Ok(ChatEvent::answer_from(["a", "b", "c"]))]), CancellationToken::new())
            .await;

        assert_eq!(outcome, BridgeOutcome::HubClosed);
        assert_eq!(recorder.kinds_and_data(), vec![delta(WireType::AnswerDelta, "a")]);
    }
}
