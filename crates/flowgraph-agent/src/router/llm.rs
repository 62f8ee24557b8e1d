use std::sync::Arc;

use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowgraph_core::config::{Fallback, RoutingConfig};
use flowgraph_core::event::{EventBus, WorkflowEvent};
use flowgraph_core::memory::{Entry, Memory};
use flowgraph_core::traits::LlmClient;
use flowgraph_core::types::{extract_json, CompletionRequest, Message};
use flowgraph_core::END;

use super::RouteDecision;

const ROUTER_SYSTEM: &str = "You are a router in a multi-agent workflow. \
     You never answer the user yourself; you only pick who acts next.";

const REPLY_FORMAT: &str = "Reply with only a JSON object: \
     {\"choice\": \"<option name>\", \"confidence\": <number between 0 and 1>, \
     \"reason\": \"<one sentence>\"}";

/// A target an LLM router may choose, with the description shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOption {
    pub target: String,
    #[serde(default)]
    pub description: String,
}

impl RouteOption {
    pub fn new(target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: description.into(),
        }
    }
}

/// Behaviour shared by the LLM-backed routers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterSettings {
    pub fallback: Fallback,
    /// Latest memory entries included in the prompt.
    pub context_entries: usize,
    /// Choices reported below this confidence are not trusted.
    pub min_confidence: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl From<&RoutingConfig> for RouterSettings {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            fallback: config.fallback,
            context_entries: config.context_entries,
            min_confidence: config.min_confidence,
        }
    }
}

/// Asks an LLM to pick among described targets.
#[derive(Clone)]
pub struct LlmRouter {
    name: String,
    llm: Arc<dyn LlmClient>,
    options: Vec<RouteOption>,
    settings: RouterSettings,
}

impl LlmRouter {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: name.into(),
            llm,
            options: vec![],
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

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.settings.fallback = fallback;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &[RouteOption] {
        &self.options
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
            "Decide which option should handle the conversation next.\n\n\
             Options:\n{}\n\nRecent conversation:\n{}\n\n{}",
            describe_options(&offered, &self.options),
            render_transcript(memory.recent(self.settings.context_entries)),
            REPLY_FORMAT
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

/// A choice parsed out of a router reply.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Choice {
    pub target: String,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouterReply {
    choice: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Send one routing prompt. Errors come back as a fallback reason.
pub(crate) async fn consult(llm: &dyn LlmClient, prompt: String) -> Result<String, String> {
    let request = CompletionRequest::new(vec![Message::system(ROUTER_SYSTEM), Message::user(prompt)]);
    match llm.generate(request).await {
        Ok(completion) => {
            debug!(reply = %completion.text, "Router reply");
            Ok(completion.text)
        }
        Err(e) => Err(format!("LLM call failed: {}", e)),
    }
}

/// Parse a reply as `{"choice", "confidence", "reason"}` JSON or as a bare
/// target name.
pub(crate) fn parse_choice(reply: &str, targets: &[String]) -> Result<Choice, String> {
    if let Ok(parsed) = serde_json::from_str::<RouterReply>(extract_json(reply)) {
        let target = match_target(&parsed.choice, targets)
            .ok_or_else(|| format!("unknown target '{}'", parsed.choice.trim()))?;
        return Ok(Choice {
            target,
            confidence: parsed.confidence,
            reason: parsed.reason,
        });
    }

    if let Some(target) = match_target(reply, targets) {
        return Ok(Choice {
            target,
            confidence: None,
            reason: None,
        });
    }

    let mentioned = mentioned_targets(reply, targets);
    match mentioned.as_slice() {
        [only] => Ok(Choice {
            target: (*only).clone(),
            confidence: None,
            reason: None,
        }),
        [] => Err("reply names no known target".into()),
        many => Err(format!(
            "reply names several targets: {}",
            many.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        )),
    }
}

/// Targets named as whole words in `reply`, in target order. One pattern
/// covers every target.
fn mentioned_targets<'a>(reply: &str, targets: &'a [String]) -> Vec<&'a String> {
    let mut names: Vec<&String> = targets.iter().filter(|t| !t.is_empty()).collect();
    if names.is_empty() {
        return vec![];
    }
    // Longer names first, so a target is not shadowed by its own prefix.
    names.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let alternation = names
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(pattern) = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)) else {
        return vec![];
    };

    let found: Vec<String> = pattern
        .find_iter(reply)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    targets
        .iter()
        .filter(|t| found.contains(&t.to_lowercase()))
        .collect()
}

fn match_target(raw: &str, targets: &[String]) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace());
    targets
        .iter()
        .find(|t| t.as_str() == cleaned)
        .or_else(|| targets.iter().find(|t| t.eq_ignore_ascii_case(cleaned)))
        .cloned()
}

pub(crate) fn accept(choice: Choice, settings: &RouterSettings) -> Result<RouteDecision, String> {
    if let Some(confidence) = choice.confidence {
        if confidence < settings.min_confidence {
            return Err(format!(
                "confidence {:.2} for '{}' is below {:.2}",
                confidence, choice.target, settings.min_confidence
            ));
        }
    }
    Ok(RouteDecision {
        target: choice.target,
        reason: choice.reason,
        fallback: false,
    })
}

/// Pick a target by the configured fallback and report it.
pub(crate) fn apply_fallback(
    router: &str,
    fallback: Fallback,
    targets: &[String],
    reason: String,
    events: &EventBus,
) -> RouteDecision {
    let choice = pick(fallback, targets).unwrap_or_else(|| END.to_string());
    warn!(router, reason = %reason, choice = %choice, "Router fell back");
    events.publish(WorkflowEvent::RouterFallback {
        router: router.to_string(),
        reason: reason.clone(),
        choice: choice.clone(),
    });
    RouteDecision {
        target: choice,
        reason: Some(reason),
        fallback: true,
    }
}

fn pick(fallback: Fallback, targets: &[String]) -> Option<String> {
    match fallback {
        Fallback::First => targets.first().cloned(),
        Fallback::Last => targets.last().cloned(),
        Fallback::Random => targets.choose(&mut rand::thread_rng()).cloned(),
    }
}

pub(crate) fn option_targets(options: &[RouteOption]) -> Option<Vec<String>> {
    if options.is_empty() {
        return None;
    }
    Some(options.iter().map(|o| o.target.clone()).collect())
}

/// Declared targets that have an option, in option order. Without options
/// every declared target is offered.
pub(crate) fn offered_targets(targets: &[String], options: &[RouteOption]) -> Vec<String> {
    let offered: Vec<String> = options
        .iter()
        .filter(|o| targets.contains(&o.target))
        .map(|o| o.target.clone())
        .collect();
    if offered.is_empty() {
        targets.to_vec()
    } else {
        offered
    }
}

pub(crate) fn describe_options(targets: &[String], options: &[RouteOption]) -> String {
    targets
        .iter()
        .map(|target| {
            let description = options
                .iter()
                .find(|o| &o.target == target)
                .map(|o| o.description.as_str())
                .filter(|d| !d.is_empty())
                .unwrap_or(if target == END { "finish the run" } else { "no description" });
            format!("- {}: {}", target, description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn render_transcript(entries: &[Entry]) -> String {
    if entries.is_empty() {
        return "(empty)".into();
    }
    entries
        .iter()
        .map(Entry::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_test_utils::{bus_with_receiver, drain_events, ScriptedLlm};

    fn targets() -> Vec<String> {
        vec!["billing".into(), "tech".into()]
    }

    fn router(llm: &ScriptedLlm) -> LlmRouter {
        LlmRouter::new("support", llm.clone().into_arc())
            .with_option("billing", "Invoices and payments")
            .with_option("tech", "Bugs and outages")
    }

    #[test]
    fn test_parse_json_choice() {
        let choice = parse_choice(
            r#"{"choice": "tech", "confidence": 0.9, "reason": "crash report"}"#,
            &targets(),
        )
        .unwrap();
        assert_eq!(choice.target, "tech");
        assert_eq!(choice.confidence, Some(0.9));
        assert_eq!(choice.reason.as_deref(), Some("crash report"));
    }

    #[test]
    fn test_parse_bare_name() {
        assert_eq!(parse_choice("  Billing. ", &targets()).unwrap().target, "billing");
        assert_eq!(
            parse_choice("I would send this to tech support", &targets()).unwrap().target,
            "tech"
        );
        assert!(parse_choice("billing or tech", &targets()).is_err());
        assert!(parse_choice("no idea", &targets()).is_err());
    }

    #[test]
    fn test_mentions_use_whole_words() {
        let targets = vec!["tech".to_string(), "tech_lead".to_string(), "billing".to_string()];
        assert_eq!(mentioned_targets("Billing, definitely BILLING.", &targets), vec!["billing"]);
        assert_eq!(mentioned_targets("ask the tech_lead", &targets), vec!["tech_lead"]);
        assert_eq!(
            mentioned_targets("tech_lead or tech", &targets),
            vec!["tech", "tech_lead"]
        );
        assert!(mentioned_targets("technical debt", &targets).is_empty());
        assert!(mentioned_targets("anything", &[]).is_empty());
    }

    #[test]
    fn test_parse_unknown_json_choice() {
        let err = parse_choice(r#"{"choice": "sales"}"#, &targets()).unwrap_err();
        assert!(err.contains("unknown target 'sales'"));
    }

    #[tokio::test]
    async fn test_decide_uses_reply() {
        let llm = ScriptedLlm::texts([r#"{"choice": "billing", "confidence": 0.8}"#]);
        let memory = Memory::with_input("I was charged twice");
        let decision = router(&llm).decide(&memory, &targets(), &EventBus::default()).await;
        assert_eq!(decision.target, "billing");
        assert!(!decision.fallback);

        let prompt = &llm.last_request().unwrap().messages[1].content;
        assert!(prompt.contains("- billing: Invoices and payments"));
        assert!(prompt.contains("I was charged twice"));
    }

    #[tokio::test]
    async fn test_low_confidence_falls_back() {
        let llm = ScriptedLlm::texts([r#"{"choice": "billing", "confidence": 0.2}"#]);
        let (bus, mut rx) = bus_with_receiver();
        let decision = router(&llm)
            .with_fallback(Fallback::Last)
            .decide(&Memory::with_input("hm"), &targets(), &bus)
            .await;
        assert_eq!(decision.target, "tech");
        assert!(decision.fallback);
        assert!(decision.reason.unwrap().contains("below"));

        let events = drain_events(&mut rx);
        assert!(matches!(
            &events[0],
            WorkflowEvent::RouterFallback { router, choice, .. } if router == "support" && choice == "tech"
        ));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_first() {
        let llm = ScriptedLlm::new().then_fail("timeout");
        let decision = router(&llm)
            .decide(&Memory::with_input("hm"), &targets(), &EventBus::default())
            .await;
        assert_eq!(decision.target, "billing");
        assert!(decision.reason.unwrap().contains("LLM call failed"));
    }

    #[tokio::test]
    async fn test_random_fallback_stays_in_targets() {
        let llm = ScriptedLlm::new().repeating("gibberish");
        let router = router(&llm).with_fallback(Fallback::Random);
        for _ in 0..10 {
            let decision = router
                .decide(&Memory::new(), &targets(), &EventBus::default())
                .await;
            assert!(targets().contains(&decision.target));
            assert!(decision.fallback);
        }
    }

    #[test]
    fn test_offered_targets_filter_to_declared() {
        let options = vec![RouteOption::new("tech", ""), RouteOption::new("sales", "")];
        assert_eq!(offered_targets(&targets(), &options), vec!["tech".to_string()]);
        assert_eq!(offered_targets(&targets(), &[]), targets());
    }
}
