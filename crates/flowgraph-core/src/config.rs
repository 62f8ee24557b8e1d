use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level flowgraph configuration.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum node executions per run before the runner gives up.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

/// Defaults applied to agents that do not set their own limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Extra attempts after a failed or invalid completion.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Completion cap for the reason-act-observe loop.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Only the last N memory entries are shown to agents (unset = all).
    #[serde(default)]
    pub history_window: Option<usize>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_iterations: default_max_iterations(),
            history_window: None,
        }
    }
}

/// How LLM-backed routers behave when they cannot use the model's answer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Fallback {
    #[default]
    First,
    Last,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub fallback: Fallback,
    /// Entries of recent context shown to LLM routers.
    #[serde(default = "default_context_entries")]
    pub context_entries: usize,
    /// Entries inspected by conversation-analysis routers.
    #[serde(default = "default_conversation_depth")]
    pub conversation_depth: usize,
    /// Replies below this confidence trigger the fallback.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback: Fallback::default(),
            context_entries: default_context_entries(),
            conversation_depth: default_conversation_depth(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer size for the event bus.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_max_steps() -> usize { 100 }
fn default_max_retries() -> u32 { 2 }
fn default_max_iterations() -> usize { 5 }
fn default_context_entries() -> usize { 1 }
fn default_conversation_depth() -> usize { 10 }
fn default_min_confidence() -> f64 { 0.5 }
fn default_event_capacity() -> usize { 256 }

impl FlowConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: FlowConfig =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runner.max_steps == 0 {
            return Err(FlowError::Config("runner.max_steps must be at least 1".into()));
        }
        if self.agent.max_iterations == 0 {
            return Err(FlowError::Config(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.routing.min_confidence) {
            return Err(FlowError::Config(
                "routing.min_confidence must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_FLOWGRAPH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_FLOWGRAPH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_FLOWGRAPH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_FLOWGRAPH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_FLOWGRAPH_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = FlowConfig::from_toml_str("").unwrap();
        assert_eq!(config.runner.max_steps, 100);
        assert_eq!(config.agent.max_retries, 2);
        assert_eq!(config.agent.max_iterations, 5);
        assert!(config.agent.history_window.is_none());
        assert_eq!(config.routing.fallback, Fallback::First);
        assert_eq!(config.routing.context_entries, 1);
        assert_eq!(config.routing.conversation_depth, 10);
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[runner]
max_steps = 12

[routing]
fallback = "random"
min_confidence = 0.8
"#;
        let config = FlowConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.runner.max_steps, 12);
        assert_eq!(config.routing.fallback, Fallback::Random);
        assert!((config.routing.min_confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.agent.max_iterations, 5);
    }

    #[test]
    fn test_rejects_zero_steps() {
        let err = FlowConfig::from_toml_str("[runner]\nmax_steps = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn test_rejects_bad_confidence() {
        assert!(FlowConfig::from_toml_str("[routing]\nmin_confidence = 1.5\n").is_err());
    }
}
