use flowgraph_core::memory::Memory;
use flowgraph_core::END;

use super::RouteDecision;

pub const DEFAULT_EXIT_PHRASE: &str = "APPROVED";

/// Walks a fixed node pattern such as producer, critic, producer.
///
/// The position in the pattern is the number of outputs pattern nodes have
/// already written to memory, so the router itself holds no run state.
#[derive(Debug, Clone)]
pub struct ReflectionRouter {
    name: String,
    pattern: Vec<String>,
    early_exit: bool,
    critic: Option<String>,
    exit_phrases: Vec<String>,
}

impl ReflectionRouter {
    pub fn new<I, S>(name: impl Into<String>, pattern: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            pattern: pattern.into_iter().map(Into::into).collect(),
            early_exit: false,
            critic: None,
            exit_phrases: vec![DEFAULT_EXIT_PHRASE.to_string()],
        }
    }

    /// End the run as soon as the critic's latest output contains an exit
    /// phrase.
    pub fn with_early_exit(mut self, enabled: bool) -> Self {
        self.early_exit = enabled;
        self
    }

    pub fn with_critic(mut self, critic: impl Into<String>) -> Self {
        self.critic = Some(critic.into());
        self
    }

    pub fn with_exit_phrases(mut self, phrases: Vec<String>) -> Self {
        if !phrases.is_empty() {
            self.exit_phrases = phrases;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &[String] {
        &self.pattern
    }

    /// The critic defaults to the second node of the pattern.
    pub fn critic(&self) -> Option<&str> {
        self.critic
            .as_deref()
            .or_else(|| self.pattern.get(1).map(|s| s.as_str()))
    }

    /// Position in the pattern.
    pub fn cursor(&self, memory: &Memory) -> usize {
        memory
            .outputs()
            .filter(|e| e.node().is_some_and(|n| self.pattern.iter().any(|p| p == n)))
            .count()
    }

    pub fn decide(&self, memory: &Memory) -> RouteDecision {
        if self.early_exit {
            if let (Some(critic), Some(last)) = (self.critic(), memory.last_output()) {
                if last.node() == Some(critic) {
                    let content = last.content.to_lowercase();
                    if let Some(phrase) = self
                        .exit_phrases
                        .iter()
                        .find(|p| content.contains(&p.to_lowercase()))
                    {
                        return RouteDecision::new(END)
                            .with_reason(format!("critic '{}' said '{}'", critic, phrase));
                    }
                }
            }
        }

        let cursor = self.cursor(memory);
        match self.pattern.get(cursor) {
            Some(next) => RouteDecision::new(next.clone())
                .with_reason(format!("pattern position {}", cursor)),
            None => RouteDecision::new(END).with_reason("pattern complete"),
        }
    }

    pub fn targets_from(&self, from: &str) -> Vec<String> {
        reflection_targets(&self.pattern, self.early_exit, self.critic(), from)
    }
}

/// Targets a reflection router can return on the edge leaving `from`: the
/// successors of each occurrence of `from` in the pattern (`end` after the
/// last one), the first pattern node when `from` is outside the pattern,
/// and `end` from the critic when early exit is enabled.
pub fn reflection_targets(
    pattern: &[String],
    early_exit: bool,
    critic: Option<&str>,
    from: &str,
) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let mut push = |t: &str| {
        if !targets.iter().any(|x| x == t) {
            targets.push(t.to_string());
        }
    };

    let positions: Vec<usize> = pattern
        .iter()
        .enumerate()
        .filter(|(_, p)| p.as_str() == from)
        .map(|(i, _)| i)
        .collect();

    if positions.is_empty() {
        push(pattern.first().map(|s| s.as_str()).unwrap_or(END));
    }
    for i in positions {
        push(pattern.get(i + 1).map(|s| s.as_str()).unwrap_or(END));
    }
    if early_exit && critic == Some(from) {
        push(END);
    }
    targets
}
