use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tidings_core::engine::{ChatRequest, ExecutionEngine};
use tidings_core::errors::PipelineError;
use tidings_core::events::{ChatEvent, Delta, EventKind, EventStream};

use crate::pipe::{delta_pipe, event_pipe};

/// One step of a scripted run, played in order on the outer stream.
#[derive(Clone, Debug)]
pub enum Step {
    /// A model answer whose deltas all arrive, then end cleanly.
    Answer(Vec<String>),
    /// A model answer that yields `deltas` and then fails.
    BrokenAnswer {
        deltas: Vec<String>,
        error: PipelineError,
    },
    /// A model answer that yields `before`, waits for `gate`, then yields `after`.
    GatedAnswer {
        before: Vec<String>,
        gate: Arc<Notify>,
        after: Vec<String>,
    },
    /// A non-answer event of the given kind.
    Event(EventKind),
    /// Fail the outer stream.
    Fail(PipelineError),
    /// Wait for `gate` before the next step.
    Wait(Arc<Notify>),
    /// Sleep before the next step.
    Pause(Duration),
}

impl Step {
    pub fn answer<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Answer(chunks.into_iter().map(Into::into).collect())
    }
}

/// Pre-programmed outcome of one `execute` call.
#[derive(Clone, Debug)]
pub enum ScriptedRun {
    /// Play these steps, then end the outer stream.
    Steps(Vec<Step>),
    /// Fail `execute` itself.
    Error(PipelineError),
    /// Wait, then resolve the inner run.
    Delay(Duration, Box<ScriptedRun>),
}

impl ScriptedRun {
    /// Convenience: a single answer followed by end-of-stream.
    pub fn answer<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Steps(vec![Step::answer(chunks)])
    }
}

/// Execution engine returning pre-programmed runs in sequence, for
/// deterministic tests without a model.
pub struct ScriptedEngine {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
    buffer: usize,
}

impl ScriptedEngine {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            buffer: 10,
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: ChatRequest) -> Result<EventStream, PipelineError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request);

        let Some(mut run) = self.runs.lock().pop_front() else {
            return Err(PipelineError::InvalidRequest(format!(
                "ScriptedEngine: no run configured for call {idx}"
            )));
        };

        // Unroll nested delays iteratively.
        loop {
            match run {
                ScriptedRun::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    run = *inner;
                }
                ScriptedRun::Error(e) => return Err(e),
                ScriptedRun::Steps(steps) => return Ok(self.play(steps)),
            }
        }
    }
}

impl ScriptedEngine {
    fn play(&self, steps: Vec<Step>) -> EventStream {
        let (tx, events) = event_pipe(self.buffer);
        let buffer = self.buffer;

        tokio::spawn(async move {
            for step in steps {
                let sent = match step {
                    Step::Answer(deltas) => {
                        tx.send(ChatEvent::answer_from(deltas)).await
                    }
                    Step::BrokenAnswer { deltas, error } => {
                        let mut items: Vec<Result<Delta, PipelineError>> =
                            deltas.into_iter().map(|d| Ok(Delta::new(d))).collect();
                        items.push(Err(error));
                        tx.send(ChatEvent::ModelAnswer(Box::pin(futures::stream::iter(items))))
                            .await
                    }
                    Step::GatedAnswer { before, gate, after } => {
                        let (dtx, deltas) = delta_pipe(buffer);
                        let _ = tokio::spawn(async move {
                            for d in before {
                                if !dtx.send(Delta::new(d)).await {
                                    return;
                                }
                            }
                            gate.notified().await;
                            for d in after {
                                if !dtx.send(Delta::new(d)).await {
                                    return;
                                }
                            }
                        });
                        tx.send(ChatEvent::ModelAnswer(deltas)).await
                    }
                    Step::Event(kind) => tx.send(placeholder_event(kind)).await,
                    Step::Fail(e) => {
                        let _ = tx.fail(e).await;
                        return;
                    }
                    Step::Wait(gate) => {
                        gate.notified().await;
                        true
                    }
                    Step::Pause(d) => {
                        tokio::time::sleep(d).await;
                        true
                    }
                };
                if !sent {
                    return;
                }
            }
        });

        events
    }
}

fn placeholder_event(kind: EventKind) -> ChatEvent {
    match kind {
        EventKind::ModelAnswer => ChatEvent::answer_from(Vec::<String>::new()),
        EventKind::ToolsAsModelAnswer => ChatEvent::ToolsAsModelAnswer {
            tool_name: "search".into(),
        },
        EventKind::ToolMidAnswer => ChatEvent::ToolMidAnswer {
            tool_name: "search".into(),
            text: "searching".into(),
        },
        EventKind::ToolsMessage => ChatEvent::ToolsMessage {
            content: "{}".into(),
        },
        EventKind::FuncCall => ChatEvent::FuncCall {
            name: "lookup".into(),
            arguments: "{}".into(),
        },
        EventKind::Suggest => ChatEvent::Suggest {
            suggestions: vec!["tell me more".into()],
        },
        EventKind::Knowledge => ChatEvent::Knowledge {
            documents: vec!["doc".into()],
        },
        EventKind::Interrupt => ChatEvent::Interrupt {
            reason: "needs input".into(),
        },
    }
}
