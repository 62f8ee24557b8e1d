use std::sync::Arc;

use flowgraph_core::config::RoutingConfig;
use flowgraph_core::event::EventBus;
use flowgraph_core::memory::Memory;
use flowgraph_core::traits::LlmClient;

use super::llm::{
    accept, apply_fallback, consult, describe_options, offered_targets, option_targets,
    parse_choice, render_transcript, RouteOption, RouterSettings,
};
use super::RouteDecision;

const DEFAULT_QUESTION: &str = "Considering where the conversation has been heading, \
     which option should act next?";

/// Routes on the trajectory of the last `depth` entries rather than the
/// latest message alone.
#[derive(Clone)]
pub struct ConversationRouter {
    name: String,
    llm: Arc<dyn LlmClient>,
    options: Vec<RouteOption>,
    depth: usize,
    question: String,
    settings: RouterSettings,
}

impl ConversationRouter {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: name.into(),
            llm,
            options: vec![],
            depth: RoutingConfig::default().conversation_depth,
            question: DEFAULT_QUESTION.to_string(),
            settings: RouterSettings::default(),
        }
    }

    pub fn with_option(mut self, target: impl Into<String>, description: impl Into<String>) -> Self {
        self.options.push(RouteOption::new(target, description));
        self
    }

    pub fn with_options(mut self, options: Vec<RouteOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    /// Question asked about the transcript.
    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn static_targets(&self) -> Option<Vec<String>> {
        option_targets(&self.options)
    }

    pub async fn decide(
        &self,
        memory: &Memory,
        targets: &[String],
        events: &EventBus,
    ) -> RouteDecision {
        let offered = offered_targets(targets, &self.options);
        let prompt = format!(
            "Transcript of the last {} entries:\n{}\n\n{}\n\nOptions:\n{}\n\n\
             Reply with only a JSON object: {{\"choice\": \"<option name>\", \
             \"confidence\": <number between 0 and 1>, \"reason\": \"<one sentence>\"}}",
            self.depth,
            render_transcript(memory.recent(self.depth)),
            self.question,
            describe_options(&offered, &self.options),
        );

        let outcome = match consult(self.llm.as_ref(), prompt).await {
            Ok(reply) => parse_choice(&reply, &offered).and_then(|c| accept(c, &self.settings)),
            Err(reason) => Err(reason),
        };

        match outcome {
            Ok(decision) => decision,
            Err(reason) => apply_fallback(&self.name, self.settings.fallback, &offered, reason, events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::memory::Entry;
    use flowgraph_test_utils::ScriptedLlm;

    #[tokio::test]
    async fn test_prompt_contains_recent_transcript() {
        let llm = ScriptedLlm::texts([r#"{"choice": "escalate", "confidence": 0.7}"#]);
        let router = ConversationRouter::new("mood", llm.clone().into_arc())
            .with_option("continue", "Keep helping")
            .with_option("escalate", "Hand over to a human")
            .with_depth(2);
        let mut memory = Memory::with_input("first message");
        memory.push(Entry::output("helper", "try restarting"));
        memory.push_user("still broken, this is the third time");

        let targets = vec!["continue".to_string(), "escalate".to_string()];
        let decision = router.decide(&memory, &targets, &EventBus::default()).await;
        assert_eq!(decision.target, "escalate");

        let prompt = &llm.last_request().unwrap().messages[1].content;
        assert!(prompt.contains("try restarting"));
        assert!(prompt.contains("third time"));
        assert!(!prompt.contains("first message"));
    }

    #[test]
    fn test_default_depth() {
        let router = ConversationRouter::new("c", ScriptedLlm::new().into_arc());
        assert_eq!(router.depth(), 10);
        assert!(router.static_targets().is_none());
    }
}
