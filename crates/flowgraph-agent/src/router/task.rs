use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flowgraph_core::event::{EventBus, WorkflowEvent};
use flowgraph_core::memory::Memory;
use flowgraph_core::traits::LlmClient;

use super::llm::{accept, apply_fallback, consult, parse_choice, render_transcript, RouterSettings};
use super::RouteDecision;

/// A routing target described for classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCategory {
    pub target: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Example requests that belong to this category.
    #[serde(default)]
    pub examples: Vec<String>,
}

impl TaskCategory {
    pub fn new(target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_examples(mut self, examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Number of keywords found in `text`, case-insensitively.
    pub fn match_score(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
            .count()
    }
}

/// LLM classifier over categories with keywords and examples. When the LLM
/// gives no usable answer, keyword matches decide before the fallback does.
#[derive(Clone)]
pub struct TaskClassifierRouter {
    name: String,
    llm: Arc<dyn LlmClient>,
    categories: Vec<TaskCategory>,
    settings: RouterSettings,
}

impl TaskClassifierRouter {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: name.into(),
            llm,
            categories: vec![],
            settings: RouterSettings::default(),
        }
    }

    pub fn with_category(mut self, category: TaskCategory) -> Self {
        self.categories.push(category);
        self
    }

    pub fn with_categories(mut self, categories: Vec<TaskCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn static_targets(&self) -> Option<Vec<String>> {
        if self.categories.is_empty() {
            return None;
        }
        Some(self.categories.iter().map(|c| c.target.clone()).collect())
    }

    fn offered<'a>(&'a self, targets: &[String]) -> Vec<&'a TaskCategory> {
        self.categories
            .iter()
            .filter(|c| targets.contains(&c.target))
            .collect()
    }

    fn prompt(&self, categories: &[&TaskCategory], memory: &Memory) -> String {
        let mut prompt = String::from("Classify the latest request into one of these categories.\n\n");
        for category in categories {
            prompt.push_str(&format!("## {}\n", category.target));
            if !category.description.is_empty() {
                prompt.push_str(&format!("{}\n", category.description));
            }
            if !category.keywords.is_empty() {
                prompt.push_str(&format!("Keywords: {}\n", category.keywords.join(", ")));
            }
            for example in &category.examples {
                prompt.push_str(&format!("Example: {}\n", example));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Latest request:\n{}\n\n\
             Reply with only a JSON object: {{\"choice\": \"<category>\", \
             \"confidence\": <number between 0 and 1>, \"reason\": \"<one sentence>\"}}",
            render_transcript(memory.recent(self.settings.context_entries))
        ));
        prompt
    }

    /// Category with the most keyword hits in the caller's latest request.
    /// Ties go to the earlier category.
    fn keyword_match(&self, categories: &[&TaskCategory], memory: &Memory) -> Option<(String, usize)> {
        let text = memory.last_input().or_else(|| memory.last())?.content.as_str();
        let mut best: Option<(String, usize)> = None;
        for category in categories {
            let score = category.match_score(text);
            if score > 0 && best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((category.target.clone(), score));
            }
        }
        best
    }

    pub async fn decide(
        &self,
        memory: &Memory,
        targets: &[String],
        events: &EventBus,
    ) -> RouteDecision {
        let categories = self.offered(targets);
        let offered: Vec<String> = if categories.is_empty() {
            targets.to_vec()
        } else {
            categories.iter().map(|c| c.target.clone()).collect()
        };

        let outcome = match consult(self.llm.as_ref(), self.prompt(&categories, memory)).await {
            Ok(reply) => parse_choice(&reply, &offered).and_then(|c| accept(c, &self.settings)),
            Err(reason) => Err(reason),
        };

        let reason = match outcome {
            Ok(decision) => return decision,
            Err(reason) => reason,
        };

        if let Some((target, score)) = self.keyword_match(&categories, memory) {
            debug!(router = %self.name, target = %target, score, "Keyword match");
            let detail = format!("{}; matched {} keyword(s) for '{}'", reason, score, target);
            events.publish(WorkflowEvent::RouterFallback {
                router: self.name.clone(),
                reason: detail.clone(),
                choice: target.clone(),
            });
            return RouteDecision {
                target,
                reason: Some(detail),
                fallback: true,
            };
        }

        apply_fallback(&self.name, self.settings.fallback, &offered, reason, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::memory::Entry;
    use flowgraph_test_utils::ScriptedLlm;

    fn router(llm: &ScriptedLlm) -> TaskClassifierRouter {
        TaskClassifierRouter::new("triage", llm.clone().into_arc())
            .with_category(
                TaskCategory::new("billing", "Money matters")
                    .with_keywords(&["invoice", "refund", "charge"])
                    .with_examples(&["Why was I charged twice?"]),
            )
            .with_category(
                TaskCategory::new("tech", "Product problems")
                    .with_keywords(&["error", "crash"])
                    .with_examples(&["The app crashes on start"]),
            )
    }

    fn targets() -> Vec<String> {
        vec!["billing".into(), "tech".into()]
    }

    #[tokio::test]
    async fn test_prompt_includes_keywords_and_examples() {
        let llm = ScriptedLlm::texts(["tech"]);
        let decision = router(&llm)
            .decide(&Memory::with_input("it shows an error"), &targets(), &EventBus::default())
            .await;
        assert_eq!(decision.target, "tech");

        let prompt = &llm.last_request().unwrap().messages[1].content;
        assert!(prompt.contains("Keywords: invoice, refund, charge"));
        assert!(prompt.contains("Example: The app crashes on start"));
    }

    #[tokio::test]
    async fn test_keywords_decide_when_llm_fails() {
        let llm = ScriptedLlm::new().then_fail("down");
        let memory = Memory::with_input("Please refund the duplicate charge");
        let decision = router(&llm).decide(&memory, &targets(), &EventBus::default()).await;
        assert_eq!(decision.target, "billing");
        assert!(decision.fallback);
        assert!(decision.reason.unwrap().contains("2 keyword(s)"));
    }

    #[tokio::test]
    async fn test_keywords_score_the_request_not_node_output() {
        let llm = ScriptedLlm::new().then_fail("down");
        let mut memory = Memory::with_input("My invoice shows a double charge");
        memory.push(Entry::output("greeter", "Sorry about the error, let me route you."));
        let decision = router(&llm).decide(&memory, &targets(), &EventBus::default()).await;
        assert_eq!(decision.target, "billing");
        assert!(decision.fallback);
    }

    #[tokio::test]
    async fn test_fallback_without_keyword_hits() {
        let llm = ScriptedLlm::texts(["unsure"]);
        let memory = Memory::with_input("hello there");
        let decision = router(&llm).decide(&memory, &targets(), &EventBus::default()).await;
        assert_eq!(decision.target, "billing");
        assert!(decision.fallback);
    }

    #[test]
    fn test_match_score() {
        let category = TaskCategory::new("x", "").with_keywords(&["Refund", "invoice"]);
        assert_eq!(category.match_score("my REFUND for invoice 7"), 2);
        assert_eq!(category.match_score("nothing"), 0);
    }
}
