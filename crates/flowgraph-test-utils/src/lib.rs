//! Test doubles shared by the flowgraph crates.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::json;

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::event::{EventBus, WorkflowEvent};
use flowgraph_core::traits::{LlmClient, Tool, ToolContext};
use flowgraph_core::types::{
    Completion, CompletionRequest, ToolCall, ToolErrorPolicy, ToolResult,
};

/// One scripted LLM reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Calls(Vec<ToolCall>),
    Fail(String),
}

/// LLM that replays a fixed script and records every request.
///
/// When the script runs out it repeats `fallback` if one is set, otherwise
/// it fails with `LlmRequest`.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    fallback: Option<String>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script of plain text replies.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::new();
        for t in texts {
            llm.push(Reply::Text(t.into()));
        }
        llm
    }

    /// Reply with `text` once the script is exhausted.
    pub fn repeating(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Reply::Text(text.into()));
        self
    }

    pub fn then_call(self, name: &str, arguments: serde_json::Value) -> Self {
        let id = format!("call_{}", self.remaining() + self.call_count() + 1);
        self.push(Reply::Calls(vec![ToolCall::new(id, name, arguments)]));
        self
    }

    pub fn then_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Reply::Calls(calls));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Reply::Fail(message.into()));
        self
    }

    pub fn push(&self, reply: Reply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of completions requested so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }

    pub fn into_arc(self) -> Arc<dyn LlmClient> {
        Arc::new(self)
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>> {
        Box::pin(async move {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
            match next {
                Some(Reply::Text(text)) => Ok(Completion::text(text)),
                Some(Reply::Calls(calls)) => Ok(Completion::tool_calls(calls)),
                Some(Reply::Fail(message)) => Err(FlowError::LlmRequest(message)),
                None => match &self.fallback {
                    Some(text) => Ok(Completion::text(text.clone())),
                    None => Err(FlowError::LlmRequest("script exhausted".into())),
                },
            }
        })
    }
}

/// Tool that returns its `text` argument and counts invocations.
#[derive(Clone, Default)]
pub struct EchoTool {
    calls: Arc<AtomicUsize>,
}

impl EchoTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        _ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = input["text"].as_str().unwrap_or_default();
            Ok(ToolResult::success(text))
        })
    }
}

/// Tool that always fails with the configured policy.
pub struct FailingTool {
    name: String,
    policy: ToolErrorPolicy,
}

impl FailingTool {
    pub fn new(name: impl Into<String>, policy: ToolErrorPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    fn execute<'a>(
        &'a self,
        _input: serde_json::Value,
        _ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            Err(FlowError::ToolExecution {
                tool: self.name.clone(),
                message: "backend unavailable".into(),
            })
        })
    }

    fn error_policy(&self) -> ToolErrorPolicy {
        self.policy
    }
}

/// Drain every event currently buffered on `rx`.
pub fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<WorkflowEvent>,
) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Event bus with a subscriber attached.
pub fn bus_with_receiver() -> (
    Arc<EventBus>,
    tokio::sync::broadcast::Receiver<WorkflowEvent>,
) {
    let bus = Arc::new(EventBus::new(1024));
    let rx = bus.subscribe();
    (bus, rx)
}

/// Write `content` to a temporary file with the given suffix.
pub fn temp_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    file
}
