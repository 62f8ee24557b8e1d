//! Shared conversation state for one graph run.
//!
//! `Memory` is an append-only log. Nodes push entries; nothing rewrites or
//! reorders them. Routers that need positional state (reflection cursor,
//! plan progress) derive it by scanning the log or reading the plan carried
//! alongside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::ExecutionPlan;
use crate::types::{Message, Role, ToolCall, Usage};

/// What produced an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Caller-supplied input.
    Input,
    /// Final output of a node.
    Output,
    /// A completion that requested tool calls.
    ToolRequest,
    /// Result of one tool call.
    ToolResult,
    /// Feedback injected into an agent's loop.
    Observation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    /// Node that produced the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Step-by-step reasoning preceding a chain-of-thought answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EntryMetadata {
    pub fn new(kind: EntryKind, node: Option<String>) -> Self {
        Self {
            kind,
            node,
            tool_calls: vec![],
            tool_call_id: None,
            tool_name: None,
            is_error: false,
            usage: None,
            reasoning: None,
            timestamp: Utc::now(),
        }
    }
}

/// One entry of the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub role: Role,
    pub content: String,
    pub metadata: EntryMetadata,
}

impl Entry {
    /// Caller input.
    pub fn input(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: EntryMetadata::new(EntryKind::Input, None),
        }
    }

    /// Final output of an agent node.
    pub fn output(node: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            metadata: EntryMetadata::new(EntryKind::Output, Some(node.into())),
        }
    }

    /// Final output of a tool node.
    pub fn tool_output(
        node: impl Into<String>,
        tool: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let mut metadata = EntryMetadata::new(EntryKind::Output, Some(node.into()));
        metadata.tool_name = Some(tool.into());
        metadata.is_error = is_error;
        Self {
            role: Role::Tool,
            content: content.into(),
            metadata,
        }
    }

    /// A completion that asked for tool calls.
    pub fn tool_request(
        node: impl Into<String>,
        content: impl Into<String>,
        calls: Vec<ToolCall>,
        usage: Option<Usage>,
    ) -> Self {
        let mut metadata = EntryMetadata::new(EntryKind::ToolRequest, Some(node.into()));
        metadata.tool_calls = calls;
        metadata.usage = usage;
        Self {
            role: Role::Assistant,
            content: content.into(),
            metadata,
        }
    }

    /// The result of one tool call made inside an agent's loop.
    pub fn tool_result(
        node: impl Into<String>,
        call: &ToolCall,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let mut metadata = EntryMetadata::new(EntryKind::ToolResult, Some(node.into()));
        metadata.tool_call_id = Some(call.id.clone());
        metadata.tool_name = Some(call.name.clone());
        metadata.is_error = is_error;
        Self {
            role: Role::Tool,
            content: content.into(),
            metadata,
        }
    }

    /// Feedback for an agent (for example a rejected answer).
    pub fn observation(node: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: EntryMetadata::new(EntryKind::Observation, Some(node.into())),
        }
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.metadata.usage = usage;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.metadata.reasoning = reasoning;
        self
    }

    pub fn kind(&self) -> EntryKind {
        self.metadata.kind
    }

    pub fn node(&self) -> Option<&str> {
        self.metadata.node.as_deref()
    }

    pub fn is_output(&self) -> bool {
        self.metadata.kind == EntryKind::Output
    }

    /// Convert to an LLM message.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            tool_calls: self.metadata.tool_calls.clone(),
            tool_call_id: self.metadata.tool_call_id.clone(),
        }
    }

    /// One-line rendering used in router prompts.
    pub fn transcript_line(&self) -> String {
        match self.node() {
            Some(node) => format!("[{} · {}] {}", self.role, node, self.content),
            None => format!("[{}] {}", self.role, self.content),
        }
    }
}

/// Append-only conversation log for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plan: Option<ExecutionPlan>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory seeded with one caller input entry.
    pub fn with_input(input: impl Into<String>) -> Self {
        let mut memory = Self::new();
        memory.push(Entry::input(input));
        memory
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Entry::input(content));
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    /// The most recent `n` entries in order.
    pub fn recent(&self, n: usize) -> &[Entry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// All node outputs in order.
    pub fn outputs(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_output())
    }

    /// The caller's most recent request.
    pub fn last_input(&self) -> Option<&Entry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind() == EntryKind::Input)
    }

    pub fn last_output(&self) -> Option<&Entry> {
        self.entries.iter().rev().find(|e| e.is_output())
    }

    pub fn last_output_from(&self, node: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.is_output() && e.node() == Some(node))
    }

    /// Conversation as LLM messages, optionally limited to the last `window`
    /// entries.
    pub fn to_messages(&self, window: Option<usize>) -> Vec<Message> {
        let entries = match window {
            Some(n) => self.recent(n),
            None => &self.entries,
        };
        entries.iter().map(Entry::to_message).collect()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    /// Install the plan for this run. A plan is set once; later plans replace
    /// it only when the previous one has no completed steps.
    pub fn set_plan(&mut self, plan: ExecutionPlan) -> crate::error::Result<()> {
        if let Some(existing) = &self.plan {
            if existing.steps.iter().any(|s| s.done) {
                return Err(crate::error::FlowError::Plan(
                    "a plan with completed steps cannot be replaced".into(),
                ));
            }
        }
        self.plan = Some(plan);
        Ok(())
    }

    pub fn plan_mut(&mut self) -> Option<&mut ExecutionPlan> {
        self.plan.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    #[test]
    fn test_append_and_query() {
        let mut memory = Memory::with_input("hello");
        memory.push(Entry::output("a", "from a"));
        memory.push(Entry::observation("b", "note"));
        memory.push(Entry::output("b", "from b"));

        assert_eq!(memory.len(), 4);
        assert_eq!(memory.outputs().count(), 2);
        assert_eq!(memory.last_output().unwrap().content, "from b");
        assert_eq!(memory.last_output_from("a").unwrap().content, "from a");
        assert!(memory.last_output_from("c").is_none());
        assert_eq!(memory.recent(2).len(), 2);
        assert_eq!(memory.recent(10).len(), 4);
        assert_eq!(memory.last_input().unwrap().content, "hello");

        memory.push_user("follow-up");
        memory.push(Entry::output("a", "again"));
        assert_eq!(memory.last_input().unwrap().content, "follow-up");
        assert!(Memory::new().last_input().is_none());
    }

    #[test]
    fn test_to_messages_window() {
        let mut memory = Memory::with_input("hi");
        memory.push(Entry::output("a", "one"));
        memory.push(Entry::output("a", "two"));

        let all = memory.to_messages(None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].role, Role::User);

        let windowed = memory.to_messages(Some(1));
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].content, "two");
    }

    #[test]
    fn test_tool_result_entry_links_call() {
        let call = ToolCall::new("call_1", "search", serde_json::json!({"q": "rust"}));
        let entry = Entry::tool_result("agent", &call, "3 hits", false);
        let msg = entry.to_message();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(entry.metadata.tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn test_plan_cannot_be_replaced_after_progress() {
        let mut memory = Memory::new();
        let plan = ExecutionPlan {
            title: "t".into(),
            description: String::new(),
            steps: vec![Step::new("s1", "do it", "worker")],
        };
        memory.set_plan(plan.clone()).unwrap();
        memory.set_plan(plan.clone()).unwrap();

        memory.plan_mut().unwrap().mark_done("s1").unwrap();
        assert!(memory.set_plan(plan).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut memory = Memory::with_input("q");
        memory.push(Entry::output("a", "answer"));
        let json = serde_json::to_string(&memory).unwrap();
        let parsed: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.last().unwrap().node(), Some("a"));
    }
}
