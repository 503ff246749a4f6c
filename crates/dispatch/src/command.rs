use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compiler::MatcherSlot;
use crate::grouping::GroupId;
use crate::safety::SafetyViolation;

/// Reserved name of the no-match handler
pub const FALLBACK_COMMAND: &str = "*";

/// How one trigger is matched against user text, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    /// Case-insensitive substring
    Literal(String),
    /// Regex source
    Pattern(String),
}

impl Trigger {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    pub fn pattern(source: impl Into<String>) -> Self {
        Self::Pattern(source.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(s) | Self::Pattern(s) => s,
        }
    }

    #[must_use]
    pub const fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s:?}"),
            Self::Pattern(s) => write!(f, "/{s}/"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Literal substrings, possibly with embedded pattern triggers
    Literal,
    /// Pattern triggers only; eligible for grouping
    Pattern,
}

/// What a callback sees when its command wins
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub command: &'a str,
    pub text: &'a str,
}

/// Handler attached to a command; returns an optional reply
pub type CommandCallback = Arc<dyn Fn(&CommandContext<'_>) -> Option<String> + Send + Sync>;

/// Wrap a closure as a [`CommandCallback`]
pub fn callback<F>(f: F) -> CommandCallback
where
    F: Fn(&CommandContext<'_>) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Callback that always answers with the same text
pub fn reply(text: impl Into<String>) -> CommandCallback {
    let text = text.into();
    Arc::new(move |_: &CommandContext<'_>| Some(text.clone()))
}

/// Lowercased, trimmed form used for literal comparison
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

pub(crate) enum Matcher {
    Literal {
        needles: Vec<String>,
        patterns: Vec<(String, MatcherSlot)>,
    },
    /// `None` while the command lives in a group
    Pattern(Option<MatcherSlot>),
}

pub(crate) struct Command {
    pub(crate) kind: CommandKind,
    pub(crate) triggers: Vec<Trigger>,
    pub(crate) callback: Option<CommandCallback>,
    pub(crate) group: Option<GroupId>,
    pub(crate) matcher: Matcher,
    /// Number of matchers this command compiled eagerly
    pub(crate) warmed: usize,
}

impl Command {
    pub(crate) fn sources(&self) -> Vec<String> {
        self.triggers
            .iter()
            .filter(|t| t.is_pattern())
            .map(|t| t.as_str().to_string())
            .collect()
    }
}

/// Public snapshot of a registered command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub kind: CommandKind,
    pub triggers: Vec<Trigger>,
    pub group: Option<String>,
    pub has_callback: bool,
}

/// Why a trigger was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TriggerIssue {
    Unsafe { violation: SafetyViolation },
    /// The regex engine refused the source.
    Invalid { error: String },
    Empty,
}

impl fmt::Display for TriggerIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsafe { violation } => write!(f, "unsafe pattern: {violation}"),
            Self::Invalid { error } => write!(f, "invalid pattern: {error}"),
            Self::Empty => write!(f, "empty trigger"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTrigger {
    pub trigger: Trigger,
    pub issue: TriggerIssue,
}

/// Why a whole registration was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptyName,
    /// The fallback matches by absence and cannot carry pattern triggers
    PatternFallback,
    /// Every supplied trigger was dropped
    NoUsableTriggers,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "command name is empty"),
            Self::PatternFallback => write!(f, "fallback command cannot use patterns"),
            Self::NoUsableTriggers => write!(f, "no usable triggers left"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Registered,
    Replaced,
    Rejected { reason: RejectReason },
}

/// Result of one `add_command` call. Every fact here was also logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub name: String,
    pub outcome: Outcome,
    pub dropped: Vec<RejectedTrigger>,
    /// Group the command joined, by group name
    pub group: Option<String>,
}

impl Registration {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        !matches!(self.outcome, Outcome::Rejected { .. })
    }

    pub(crate) fn rejected(name: &str, reason: RejectReason, dropped: Vec<RejectedTrigger>) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Rejected { reason },
            dropped,
            group: None,
        }
    }
}

/// A resolved command plus its callback's reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub command: String,
    pub reply: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_folds_case_and_trims() {
        assert_eq!(normalize("  Привет МИР "), "привет мир");
        assert_eq!(normalize("HELLO"), "hello");
    }

    #[test]
    fn trigger_display_marks_patterns() {
        assert_eq!(Trigger::literal("hi").to_string(), "\"hi\"");
        assert_eq!(Trigger::pattern(r"\d+").to_string(), r"/\d+/");
    }

    #[test]
    fn reply_callback_returns_fixed_text() {
        let cb = reply("hello!");
        let ctx = CommandContext {
            command: "greet",
            text: "hi",
        };
        assert_eq!(cb(&ctx).as_deref(), Some("hello!"));
    }

    #[test]
    fn rejected_registration_is_not_accepted() {
        let reg = Registration::rejected("", RejectReason::EmptyName, Vec::new());
        assert!(!reg.is_accepted());
    }

    proptest! {
        #[test]
        fn proptest_normalize_is_idempotent(text in "\\PC{0,64}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert_eq!(once.trim(), once.as_str());
        }
    }
}
