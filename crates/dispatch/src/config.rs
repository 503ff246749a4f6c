use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::limits::Limits;
use crate::safety::SafetyLimits;

const ENV_STRICT: &str = "INTENT_DISPATCH_STRICT";
const ENV_ENGINE: &str = "INTENT_DISPATCH_ENGINE";
const ENV_GROUP_THRESHOLD: &str = "INTENT_DISPATCH_GROUP_THRESHOLD";
const ENV_DEBOUNCE_MS: &str = "INTENT_DISPATCH_DEBOUNCE_MS";

const MAX_GROUP_THRESHOLD: usize = 1_000_000;
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Regex backend used for every compiled matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// `regex` crate: finite automata, matching time linear in input length
    #[default]
    Linear,

    /// `fancy-regex`: adds lookaround and backreferences, backtracks
    Backtracking,
}

impl EngineKind {
    #[must_use]
    pub const fn is_linear(self) -> bool {
        matches!(self, Self::Linear)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "linear" | "regex" => Some(Self::Linear),
            "backtracking" | "fancy" => Some(Self::Backtracking),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Backtracking => write!(f, "backtracking"),
        }
    }
}

/// Built-in intent checked before user commands (welcome, help, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedIntent {
    pub name: String,
    pub phrases: Vec<String>,
}

impl ReservedIntent {
    pub fn new(name: impl Into<String>, phrases: &[&str]) -> Self {
        Self {
            name: name.into(),
            phrases: phrases.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn welcome() -> Self {
        Self::new("welcome", &["привет", "здравствуй", "добрый день", "hello"])
    }

    #[must_use]
    pub fn help() -> Self {
        Self::new("help", &["помощь", "что ты умеешь", "help"])
    }
}

/// Configuration for registration, grouping and resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Drop unsafe triggers (true) or keep them with a warning (false)
    pub strict: bool,

    /// Regex backend
    pub engine: EngineKind,

    /// Compile patterns case-insensitively
    pub case_insensitive: bool,

    /// Pattern-command count at which grouping starts
    pub group_threshold: usize,

    /// Max trigger alternatives per group
    pub group_unit_budget: usize,

    /// Max composed source length (chars) per group
    pub group_source_budget: usize,

    /// Debounce window for group compilation
    pub debounce_ms: u64,

    /// Patterns longer than this are rejected by the analyzer
    pub max_pattern_len: usize,

    /// Group nesting deeper than this is rejected by the analyzer
    pub max_group_depth: usize,

    /// Explicit warm limits; calibrated from system memory when absent
    pub limits: Option<Limits>,

    /// Intents checked after the override hook and before user commands
    pub reserved_intents: Vec<ReservedIntent>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strict: true,
            engine: EngineKind::Linear,
            case_insensitive: true,
            group_threshold: 300,
            group_unit_budget: 60,
            group_source_budget: 850,
            debounce_ms: 100,
            max_pattern_len: 1000,
            max_group_depth: 5,
            limits: None,
            reserved_intents: Vec::new(),
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `INTENT_DISPATCH_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an env-like lookup. Blank or unparsable values keep the current value.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(strict) = lookup(ENV_STRICT).as_deref().and_then(parse_bool) {
            self.strict = strict;
        }
        if let Some(engine) = lookup(ENV_ENGINE).as_deref().and_then(EngineKind::parse) {
            self.engine = engine;
        }
        self.group_threshold = parse_clamped(
            lookup(ENV_GROUP_THRESHOLD).as_deref(),
            self.group_threshold,
            1,
            MAX_GROUP_THRESHOLD,
        );
        self.debounce_ms = parse_clamped(
            lookup(ENV_DEBOUNCE_MS).as_deref(),
            self.debounce_ms,
            0,
            MAX_DEBOUNCE_MS,
        );
        self
    }

    /// Create a lenient config: unsafe triggers are kept and only warned about
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_len: self.max_pattern_len,
            max_depth: self.max_group_depth,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.group_threshold == 0 {
            return Err(DispatchError::invalid_config("group_threshold must be > 0"));
        }
        if self.group_unit_budget == 0 {
            return Err(DispatchError::invalid_config(
                "group_unit_budget must be > 0",
            ));
        }
        if self.group_source_budget < self.group_unit_budget {
            return Err(DispatchError::invalid_config(format!(
                "group_source_budget ({}) cannot be smaller than group_unit_budget ({})",
                self.group_source_budget, self.group_unit_budget
            )));
        }
        if self.max_pattern_len == 0 {
            return Err(DispatchError::invalid_config("max_pattern_len must be > 0"));
        }
        for intent in &self.reserved_intents {
            if intent.name.trim().is_empty() {
                return Err(DispatchError::invalid_config(
                    "reserved intent name must not be empty",
                ));
            }
            if intent.phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(DispatchError::invalid_config(format!(
                    "reserved intent '{}' needs at least one phrase",
                    intent.name
                )));
            }
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "strict" => Some(true),
        "0" | "false" | "no" | "off" | "lenient" => Some(false),
        _ => None,
    }
}

fn parse_clamped<T>(raw: Option<&str>, default_value: T, min: T, max: T) -> T
where
    T: std::str::FromStr + Ord,
{
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default_value)
        .clamp(min, max)
}
