use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use flowgraph_core::config::AgentDefaults;
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::event::{EventBus, WorkflowEvent};
use flowgraph_core::memory::{Entry, Memory};
use flowgraph_core::traits::{LlmClient, ToolContext};
use flowgraph_core::types::{CompletionRequest, Message, ToolCall, ToolErrorPolicy};
use flowgraph_tools::{invoke, ToolRegistry};

use crate::output::{Accepted, OutputConstraint};

/// Marker that introduces the answer in a chain-of-thought reply.
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

const COT_INSTRUCTIONS: &str = "Think through the problem step by step before answering. \
     When you are done, write a last line that starts with \"Final Answer:\" \
     followed by your answer.";

/// How an agent turns the conversation into an answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPattern {
    /// A single completion.
    #[default]
    Direct,
    /// A single completion with explicit reasoning before the answer.
    ChainOfThought,
    /// Reason, call tools, observe, repeat.
    React,
}

/// An LLM-backed graph node.
#[derive(Clone)]
pub struct Agent {
    name: String,
    description: String,
    role: String,
    pattern: ReasoningPattern,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    max_retries: u32,
    max_iterations: usize,
    history_window: Option<usize>,
    output: OutputConstraint,
}

/// Why the last DIRECT or CHAIN_OF_THOUGHT attempt failed.
enum Failure {
    Provider(String),
    Invalid(String),
}

impl Agent {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        let defaults = AgentDefaults::default();
        Self {
            name: name.into(),
            description: String::new(),
            role: String::new(),
            pattern: ReasoningPattern::Direct,
            llm,
            tools: Arc::new(ToolRegistry::new()),
            max_retries: defaults.max_retries,
            max_iterations: defaults.max_iterations,
            history_window: defaults.history_window,
            output: OutputConstraint::None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// System role, the job description shown to the model.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_pattern(mut self, pattern: ReasoningPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_tools(mut self, tools: impl Into<Arc<ToolRegistry>>) -> Self {
        self.tools = tools.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_history_window(mut self, window: Option<usize>) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_output(mut self, output: OutputConstraint) -> Self {
        self.output = output;
        self
    }

    /// Apply configured limits.
    pub fn with_defaults(mut self, defaults: &AgentDefaults) -> Self {
        self.max_retries = defaults.max_retries;
        self.max_iterations = defaults.max_iterations.max(1);
        self.history_window = defaults.history_window;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn pattern(&self) -> ReasoningPattern {
        self.pattern
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn output(&self) -> &OutputConstraint {
        &self.output
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the agent against the shared memory and return its answer.
    ///
    /// The answer is appended to `memory` as this agent's output entry.
    pub async fn execute(&self, memory: &mut Memory, events: &EventBus) -> Result<String> {
        info!(agent = %self.name, pattern = ?self.pattern, "Agent started");
        match self.pattern {
            ReasoningPattern::Direct | ReasoningPattern::ChainOfThought => {
                self.answer_with_retries(memory, events).await
            }
            ReasoningPattern::React => self.react(memory, events).await,
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = if self.role.trim().is_empty() {
            let mut base = format!("You are {}.", self.name);
            if !self.description.is_empty() {
                base.push(' ');
                base.push_str(&self.description);
            }
            base
        } else {
            self.role.clone()
        };
        if self.pattern == ReasoningPattern::ChainOfThought {
            prompt.push_str("\n\n");
            prompt.push_str(COT_INSTRUCTIONS);
        }
        if let Some(instructions) = self.output.instructions() {
            prompt.push_str("\n\n");
            prompt.push_str(&instructions);
        }
        prompt
    }

    fn conversation(&self, memory: &Memory) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt())];
        messages.extend(memory.to_messages(self.history_window));
        messages
    }

    async fn answer_with_retries(&self, memory: &mut Memory, events: &EventBus) -> Result<String> {
        let attempts = self.max_retries as usize + 1;
        let mut last = Failure::Provider("no attempt made".into());

        for attempt in 1..=attempts {
            let request = CompletionRequest {
                messages: self.conversation(memory),
                tools: vec![],
                output_schema: self.output.schema(),
            };

            let completion = match self.llm.generate(request).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(agent = %self.name, attempt, error = %e, "Completion failed");
                    self.publish_retry(events, attempt, e.to_string());
                    last = Failure::Provider(e.to_string());
                    continue;
                }
            };

            let (answer, reasoning) = match self.pattern {
                ReasoningPattern::ChainOfThought => match split_final_answer(&completion.text) {
                    Some((reasoning, answer)) => (answer, reasoning),
                    None => {
                        let issue = format!("the reply has no line starting with \"{}\"", FINAL_ANSWER_MARKER);
                        self.reject(memory, &completion.text, &issue);
                        self.publish_retry(events, attempt, issue.clone());
                        last = Failure::Invalid(issue);
                        continue;
                    }
                },
                _ => (completion.text.clone(), None),
            };

            match self.output.check(&answer) {
                Ok(accepted) => {
                    let entry = Entry::output(&self.name, &accepted.text)
                        .with_usage(completion.usage)
                        .with_reasoning(reasoning);
                    return self.accept(memory, accepted, entry);
                }
                Err(issue) => {
                    debug!(agent = %self.name, attempt, issue = %issue, "Answer rejected");
                    self.reject(memory, &completion.text, &issue);
                    self.publish_retry(events, attempt, issue.clone());
                    last = Failure::Invalid(issue);
                }
            }
        }

        error!(agent = %self.name, attempts, "Agent exhausted its retries");
        Err(match last {
            Failure::Invalid(detail) => FlowError::Validation {
                agent: self.name.clone(),
                attempts,
                detail,
            },
            Failure::Provider(detail) => FlowError::ReasoningExhausted {
                agent: self.name.clone(),
                attempts,
                detail,
            },
        })
    }

    /// Record a rejected answer as an observation, so the next attempt sees
    /// both the answer and why it was refused.
    fn reject(&self, memory: &mut Memory, answer: &str, issue: &str) {
        memory.push(Entry::observation(
            &self.name,
            format!(
                "Your answer was rejected: {}. Please answer again.\n\nRejected answer:\n{}",
                issue, answer
            ),
        ));
    }

    async fn react(&self, memory: &mut Memory, events: &EventBus) -> Result<String> {
        let definitions = self.tools.definitions();
        let mut last_detail = String::from("no final answer was produced");

        for iteration in 1..=self.max_iterations {
            debug!(agent = %self.name, iteration, "Starting reasoning iteration");
            let request = CompletionRequest {
                messages: self.conversation(memory),
                tools: definitions.clone(),
                output_schema: self.output.schema(),
            };

            let completion = match self.llm.generate(request).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(agent = %self.name, iteration, error = %e, "Completion failed");
                    self.publish_retry(events, iteration, e.to_string());
                    last_detail = e.to_string();
                    continue;
                }
            };

            if completion.has_tool_calls() {
                memory.push(Entry::tool_request(
                    &self.name,
                    &completion.text,
                    completion.tool_calls.clone(),
                    completion.usage,
                ));
                for call in &completion.tool_calls {
                    if let Some(detail) = self.call_tool(call, memory, events).await? {
                        last_detail = detail;
                    }
                }
                continue;
            }

            match self.output.check(&completion.text) {
                Ok(accepted) => {
                    let entry =
                        Entry::output(&self.name, &accepted.text).with_usage(completion.usage);
                    return self.accept(memory, accepted, entry);
                }
                Err(issue) => {
                    debug!(agent = %self.name, iteration, issue = %issue, "Answer rejected");
                    self.reject(memory, &completion.text, &issue);
                    self.publish_retry(events, iteration, issue.clone());
                    last_detail = issue;
                }
            }
        }

        error!(
            agent = %self.name,
            max_iterations = self.max_iterations,
            "Agent did not reach a final answer"
        );
        Err(FlowError::ReasoningExhausted {
            agent: self.name.clone(),
            attempts: self.max_iterations,
            detail: last_detail,
        })
    }

    /// Execute one requested tool call and record its result.
    ///
    /// Returns the failure detail when the call failed and the failure was
    /// fed back to the model.
    async fn call_tool(
        &self,
        call: &ToolCall,
        memory: &mut Memory,
        events: &EventBus,
    ) -> Result<Option<String>> {
        let (policy, outcome) = match self.tools.get(&call.name) {
            Some(tool) => {
                let ctx = ToolContext::new(&self.name, &mut *memory);
                let outcome = invoke(tool.as_ref(), call.arguments.clone(), ctx).await;
                (tool.error_policy(), outcome)
            }
            None => (
                ToolErrorPolicy::Observe,
                Err(FlowError::ToolNotFound(call.name.clone())),
            ),
        };

        let message = match outcome {
            Ok(result) if !result.is_error => {
                debug!(agent = %self.name, tool = %call.name, "Tool call succeeded");
                memory.push(Entry::tool_result(&self.name, call, result.content, false));
                return Ok(None);
            }
            Ok(result) => result.content,
            Err(e) => e.to_string(),
        };

        let forwarded = policy == ToolErrorPolicy::Observe;
        error!(agent = %self.name, tool = %call.name, error = %message, forwarded, "Tool execution failed");
        events.publish(WorkflowEvent::ToolFailed {
            agent: self.name.clone(),
            tool: call.name.clone(),
            error: message.clone(),
            forwarded,
        });

        if !forwarded {
            return Err(FlowError::Tool {
                agent: self.name.clone(),
                tool: call.name.clone(),
                message,
            });
        }

        memory.push(Entry::tool_result(
            &self.name,
            call,
            format!("Error: {}", message),
            true,
        ));
        Ok(Some(format!("tool '{}' failed: {}", call.name, message)))
    }

    fn accept(&self, memory: &mut Memory, accepted: Accepted, entry: Entry) -> Result<String> {
        if let Some(plan) = accepted.plan {
            info!(agent = %self.name, steps = plan.steps.len(), "Plan installed");
            memory.set_plan(plan)?;
        }
        memory.push(entry);
        info!(agent = %self.name, "Agent finished");
        Ok(accepted.text)
    }

    fn publish_retry(&self, events: &EventBus, attempt: usize, reason: String) {
        events.publish(WorkflowEvent::AgentRetry {
            agent: self.name.clone(),
            attempt,
            reason,
        });
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("tools", &self.tools.list())
            .field("max_retries", &self.max_retries)
            .field("max_iterations", &self.max_iterations)
            .field("output", &self.output)
            .finish()
    }
}

/// Split a chain-of-thought reply into (reasoning, answer). Uses the last
/// marker when the model repeats it.
pub fn split_final_answer(text: &str) -> Option<(Option<String>, String)> {
    let index = text.rfind(FINAL_ANSWER_MARKER)?;
    let reasoning = text[..index].trim();
    let answer = text[index + FINAL_ANSWER_MARKER.len()..].trim();
    let reasoning = (!reasoning.is_empty()).then(|| reasoning.to_string());
    Some((reasoning, answer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::memory::EntryKind;
    use flowgraph_core::types::Role;
    use flowgraph_test_utils::{bus_with_receiver, drain_events, FailingTool, ScriptedLlm};
    use serde_json::json;

    #[test]
    fn test_split_final_answer() {
        let (reasoning, answer) =
            split_final_answer("2 + 2 is 4.\nFinal Answer: 4").unwrap();
        assert_eq!(reasoning.as_deref(), Some("2 + 2 is 4."));
        assert_eq!(answer, "4");
        assert!(split_final_answer("4").is_none());
    }

    #[tokio::test]
    async fn test_direct_appends_output() {
        let llm = ScriptedLlm::texts(["Paris"]);
        let agent = Agent::new("geo", llm.clone().into_arc()).with_role("You answer geography questions.");
        let mut memory = Memory::with_input("Capital of France?");

        let answer = agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        assert_eq!(answer, "Paris");
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.last_output_from("geo").unwrap().content, "Paris");

        let request = llm.last_request().unwrap();
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "You answer geography questions.");
        assert_eq!(request.messages[1].content, "Capital of France?");
    }

    #[tokio::test]
    async fn test_direct_retries_invalid_json_then_succeeds() {
        let llm = ScriptedLlm::texts(["not json", "{\"score\": 3}"]);
        let agent = Agent::new("scorer", llm.clone().into_arc()).with_output(OutputConstraint::Json {
            schema: json!({"type": "object", "required": ["score"]}),
        });
        let (bus, mut rx) = bus_with_receiver();
        let mut memory = Memory::with_input("rate it");

        let answer = agent.execute(&mut memory, &bus).await.unwrap();
        assert_eq!(answer, "{\"score\": 3}");
        // Input, the rejected attempt, then the accepted answer.
        assert_eq!(memory.len(), 3);
        let rejected = &memory.entries()[1];
        assert_eq!(rejected.kind(), EntryKind::Observation);
        assert_eq!(rejected.node(), Some("scorer"));
        assert!(rejected.content.contains("not json"));
        assert_eq!(memory.last_output_from("scorer").unwrap().content, "{\"score\": 3}");

        let second = &llm.requests()[1];
        assert!(second.messages.last().unwrap().content.contains("rejected"));
        assert!(second.output_schema.is_some());

        let events = drain_events(&mut rx);
        assert_eq!(events.iter().filter(|e| e.kind() == "agent_retry").count(), 1);
    }

    #[tokio::test]
    async fn test_direct_validation_exhausted() {
        let llm = ScriptedLlm::new().repeating("nope");
        let agent = Agent::new("scorer", llm.clone().into_arc())
            .with_max_retries(2)
            .with_output(OutputConstraint::Json {
                schema: json!({"type": "object"}),
            });
        let mut memory = Memory::with_input("rate it");

        let err = agent.execute(&mut memory, &EventBus::default()).await.unwrap_err();
        match err {
            FlowError::Validation { agent, attempts, .. } => {
                assert_eq!(agent, "scorer");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Validation, got {:?}", other),
        }
        assert_eq!(llm.call_count(), 3);
        // One observation per rejected completion, no output.
        assert_eq!(memory.len(), 4);
        assert!(memory.last_output().is_none());
    }

    #[tokio::test]
    async fn test_direct_provider_errors_exhaust() {
        let llm = ScriptedLlm::new().then_fail("503").then_fail("503");
        let agent = Agent::new("a", llm.into_arc()).with_max_retries(1);
        let mut memory = Memory::with_input("hi");

        let err = agent.execute(&mut memory, &EventBus::default()).await.unwrap_err();
        assert!(matches!(err, FlowError::ReasoningExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_chain_of_thought_keeps_reasoning() {
        let llm = ScriptedLlm::texts([
            "I think it is 4",
            "Two plus two.\nThat makes four.\nFinal Answer: 4",
        ]);
        let agent = Agent::new("math", llm.clone().into_arc())
            .with_pattern(ReasoningPattern::ChainOfThought);
        let mut memory = Memory::with_input("2+2?");

        let answer = agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        assert_eq!(answer, "4");
        assert_eq!(memory.len(), 3);
        assert_eq!(memory.entries()[1].kind(), EntryKind::Observation);
        let entry = memory.last_output().unwrap();
        assert_eq!(entry.content, "4");
        assert!(entry.metadata.reasoning.as_deref().unwrap().contains("makes four"));
        assert!(llm.requests()[0].messages[0].content.contains("Final Answer:"));
    }

    #[tokio::test]
    async fn test_react_tool_cycle() {
        let llm = ScriptedLlm::new()
            .then_call("echo", json!({"text": "42"}))
            .then_text("The tool said 42");
        let echo = flowgraph_test_utils::EchoTool::new();
        let mut tools = ToolRegistry::new();
        tools.register(echo.clone());
        let agent = Agent::new("r", llm.clone().into_arc())
            .with_pattern(ReasoningPattern::React)
            .with_tools(tools);
        let mut memory = Memory::with_input("ask the tool");

        let answer = agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        assert_eq!(answer, "The tool said 42");
        assert_eq!(echo.calls(), 1);

        let kinds: Vec<EntryKind> = memory.entries().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Input, EntryKind::ToolRequest, EntryKind::ToolResult, EntryKind::Output]
        );
        assert_eq!(llm.requests()[0].tools.len(), 1);
        // The second completion sees the tool result.
        let second = &llm.requests()[1];
        assert_eq!(second.messages.last().unwrap().tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_react_runs_every_call_in_a_completion() {
        let llm = ScriptedLlm::new()
            .then_calls(vec![
                ToolCall::new("a", "echo", json!({"text": "one"})),
                ToolCall::new("b", "echo", json!({"text": "two"})),
            ])
            .then_text("both done");
        let echo = flowgraph_test_utils::EchoTool::new();
        let mut tools = ToolRegistry::new();
        tools.register(echo.clone());
        let agent = Agent::new("r", llm.into_arc())
            .with_pattern(ReasoningPattern::React)
            .with_tools(tools);
        let mut memory = Memory::with_input("go");

        agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        assert_eq!(echo.calls(), 2);
        let results: Vec<&str> = memory
            .entries()
            .iter()
            .filter(|e| e.kind() == EntryKind::ToolResult)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(results, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_react_failing_tool_is_observed_until_exhausted() {
        let llm = ScriptedLlm::new()
            .then_call("flaky", json!({}))
            .then_call("flaky", json!({}))
            .then_call("flaky", json!({}));
        let mut tools = ToolRegistry::new();
        tools.register(FailingTool::new("flaky", ToolErrorPolicy::Observe));
        let agent = Agent::new("r", llm.into_arc())
            .with_pattern(ReasoningPattern::React)
            .with_max_iterations(3)
            .with_tools(tools);
        let (bus, mut rx) = bus_with_receiver();
        let mut memory = Memory::with_input("go");

        let err = agent.execute(&mut memory, &bus).await.unwrap_err();
        match err {
            FlowError::ReasoningExhausted { attempts, detail, .. } => {
                assert_eq!(attempts, 3);
                assert!(detail.contains("flaky"));
            }
            other => panic!("expected ReasoningExhausted, got {:?}", other),
        }

        let failures = memory
            .entries()
            .iter()
            .filter(|e| e.kind() == EntryKind::ToolResult && e.metadata.is_error)
            .count();
        assert_eq!(failures, 3);
        let forwarded = drain_events(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, WorkflowEvent::ToolFailed { forwarded: true, .. }))
            .count();
        assert_eq!(forwarded, 3);
    }

    #[tokio::test]
    async fn test_react_fail_policy_aborts() {
        let llm = ScriptedLlm::new().then_call("strict", json!({}));
        let mut tools = ToolRegistry::new();
        tools.register(FailingTool::new("strict", ToolErrorPolicy::Fail));
        let agent = Agent::new("r", llm.into_arc())
            .with_pattern(ReasoningPattern::React)
            .with_tools(tools);
        let mut memory = Memory::with_input("go");

        let err = agent.execute(&mut memory, &EventBus::default()).await.unwrap_err();
        assert!(matches!(err, FlowError::Tool { ref tool, .. } if tool == "strict"));
    }

    #[tokio::test]
    async fn test_react_unknown_tool_and_bad_arguments_are_observed() {
        let llm = ScriptedLlm::new()
            .then_call("missing", json!({}))
            .then_call("echo", json!({"wrong": 1}))
            .then_text("gave up on tools");
        let mut tools = ToolRegistry::new();
        tools.register(flowgraph_test_utils::EchoTool::new());
        let agent = Agent::new("r", llm.into_arc())
            .with_pattern(ReasoningPattern::React)
            .with_tools(tools);
        let mut memory = Memory::with_input("go");

        let answer = agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        assert_eq!(answer, "gave up on tools");
        let errors: Vec<&str> = memory
            .entries()
            .iter()
            .filter(|e| e.metadata.is_error)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("Tool not found: missing"));
        assert!(errors[1].contains("missing required field(s): text"));
    }

    #[tokio::test]
    async fn test_react_invalid_final_answer_becomes_observation() {
        let llm = ScriptedLlm::texts(["plain words", "{\"ok\": true}"]);
        let agent = Agent::new("r", llm.into_arc())
            .with_pattern(ReasoningPattern::React)
            .with_output(OutputConstraint::Json {
                schema: json!({"type": "object"}),
            });
        let mut memory = Memory::with_input("go");

        agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        let kinds: Vec<EntryKind> = memory.entries().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Input, EntryKind::Observation, EntryKind::Output]
        );
    }

    #[tokio::test]
    async fn test_plan_output_installs_plan() {
        let llm = ScriptedLlm::texts([r#"{"title": "t", "steps": [
            {"id": "s1", "description": "research", "owner_agent": "researcher"}
        ]}"#]);
        let agent = Agent::new("planner", llm.into_arc()).with_output(OutputConstraint::Plan);
        let mut memory = Memory::with_input("write a report");

        agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        let plan = memory.plan().unwrap();
        assert_eq!(plan.steps[0].owner_agent, "researcher");
    }

    #[tokio::test]
    async fn test_history_window_limits_context() {
        let llm = ScriptedLlm::texts(["ok"]);
        let agent = Agent::new("a", llm.clone().into_arc()).with_history_window(Some(1));
        let mut memory = Memory::with_input("first");
        memory.push(Entry::output("x", "second"));

        agent.execute(&mut memory, &EventBus::default()).await.unwrap();
        let request = llm.last_request().unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "second");
    }
}
