use serde::Serialize;

use super::Registry;
use crate::command::{CommandKind, Matcher};
use crate::limits::Limits;

/// Snapshot of registry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered commands, fallback excluded
    pub commands: usize,
    pub literal_commands: usize,
    pub pattern_commands: usize,
    /// Pattern commands matched through their own matcher
    pub standalone_matchers: usize,
    pub compiled_standalone: usize,
    pub groups: usize,
    pub grouped_commands: usize,
    pub compiled_groups: usize,
    pub open_group: Option<String>,
    pub pending_compile: Option<String>,
    /// Matchers compiled at registration time
    pub warmed_regex: usize,
    pub has_fallback: bool,
    pub limits: Limits,
}

impl Registry {
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut literal_commands = 0;
        let mut standalone_matchers = 0;
        let mut compiled_standalone = 0;
        for command in self.commands.values() {
            match (&command.kind, &command.matcher) {
                (CommandKind::Literal, _) => literal_commands += 1,
                (CommandKind::Pattern, Matcher::Pattern(Some(slot))) => {
                    standalone_matchers += 1;
                    if slot.is_compiled() {
                        compiled_standalone += 1;
                    }
                }
                (CommandKind::Pattern, _) => {}
            }
        }

        RegistryStats {
            commands: self.commands.len(),
            literal_commands,
            pattern_commands: self.pattern_commands,
            standalone_matchers,
            compiled_standalone,
            groups: self.grouping.len(),
            grouped_commands: self.grouping.member_count(),
            compiled_groups: self.grouping.compiled_count(),
            open_group: self.grouping.open_name().map(str::to_string),
            pending_compile: self.grouping.pending_name().map(str::to_string),
            warmed_regex: self.warmed_regex,
            has_fallback: self.fallback.is_some(),
            limits: self.limits,
        }
    }
}
