use std::collections::HashMap;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::command::{
    normalize, Command, CommandCallback, CommandInfo, CommandKind, Matcher, Outcome,
    RejectReason, RejectedTrigger, Registration, Trigger, TriggerIssue, FALLBACK_COMMAND,
};
use crate::compiler::{MatcherSlot, PatternCompiler};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::grouping::{GroupBudget, GroupId, GroupInfo, Grouping, Removal};
use crate::limits::Limits;
use crate::safety::{check_pattern, SafetyLimits};

mod resolve;
mod stats;

pub use resolve::{resolver, CommandTable, CustomResolver};
pub use stats::RegistryStats;

struct Fallback {
    callback: Option<CommandCallback>,
}

/// Ordered command table plus the groups built from it.
///
/// All state lives here: dropping or clearing the registry leaves no pending
/// compile behind. Mutation needs `&mut self`; resolution only `&self`.
pub struct Registry {
    config: DispatchConfig,
    limits: Limits,
    safety: SafetyLimits,
    compiler: PatternCompiler,
    commands: HashMap<String, Command>,
    order: Vec<String>,
    /// Normalized literal trigger -> first command (in order) that owns it
    exact: HashMap<String, String>,
    reserved: Vec<(String, Vec<String>)>,
    fallback: Option<Fallback>,
    grouping: Grouping,
    pattern_commands: usize,
    warmed_regex: usize,
    resolver: Option<CustomResolver>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::build(DispatchConfig::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("commands", &self.order.len())
            .field("groups", &self.grouping.len())
            .field("has_fallback", &self.fallback.is_some())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Validate `config` and calibrate limits (unless the config pins them).
    pub fn new(config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: DispatchConfig) -> Self {
        let limits = config
            .limits
            .unwrap_or_else(|| Limits::detect(config.engine));
        let compiler = PatternCompiler::new(config.engine, config.case_insensitive);
        let grouping = Grouping::new(
            compiler,
            GroupBudget {
                units: config.group_unit_budget,
                source_chars: config.group_source_budget,
            },
            config.debounce(),
            limits.max_warmed_groups,
        );
        let reserved = config
            .reserved_intents
            .iter()
            .map(|intent| {
                let phrases = intent
                    .phrases
                    .iter()
                    .map(|p| normalize(p))
                    .filter(|p| !p.is_empty())
                    .collect();
                (intent.name.clone(), phrases)
            })
            .collect();

        Self {
            safety: config.safety_limits(),
            config,
            limits,
            compiler,
            commands: HashMap::new(),
            order: Vec::new(),
            exact: HashMap::new(),
            reserved,
            fallback: None,
            grouping,
            pattern_commands: 0,
            warmed_regex: 0,
            resolver: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub const fn limits(&self) -> Limits {
        self.limits
    }

    /// Register `name`. Plain strings become literal triggers, or regex
    /// sources when `is_pattern` is set. Re-registering a name replaces it.
    pub fn add_command<I, S>(
        &mut self,
        name: &str,
        triggers: I,
        callback: Option<CommandCallback>,
        is_pattern: bool,
    ) -> Registration
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let triggers = triggers
            .into_iter()
            .map(|t| {
                if is_pattern {
                    Trigger::Pattern(t.into())
                } else {
                    Trigger::Literal(t.into())
                }
            })
            .collect();
        self.add_triggers(name, triggers, callback)
    }

    /// Register `name` with explicitly typed triggers.
    ///
    /// A list made only of patterns yields a pattern command (groupable);
    /// anything else is a literal command whose pattern elements are
    /// compiled one by one.
    pub fn add_triggers(
        &mut self,
        name: &str,
        triggers: Vec<Trigger>,
        callback: Option<CommandCallback>,
    ) -> Registration {
        if name.trim().is_empty() {
            warn!("ignoring command registration with an empty name");
            return Registration::rejected(name, RejectReason::EmptyName, Vec::new());
        }

        let now = Instant::now();
        self.grouping.run_due(now);

        if name == FALLBACK_COMMAND {
            return self.set_fallback(triggers, callback);
        }

        let supplied = triggers.len();
        let mut kept = Vec::with_capacity(supplied);
        let mut dropped = Vec::new();
        for trigger in triggers {
            match self.screen(name, &trigger) {
                Ok(()) => kept.push(trigger),
                Err(issue) => dropped.push(RejectedTrigger { trigger, issue }),
            }
        }
        if supplied > 0 && kept.is_empty() {
            error!("command '{name}' rejected: none of its {supplied} triggers are usable");
            return Registration::rejected(name, RejectReason::NoUsableTriggers, dropped);
        }

        let kind = if !kept.is_empty() && kept.iter().all(Trigger::is_pattern) {
            CommandKind::Pattern
        } else {
            CommandKind::Literal
        };

        let replaced = self.detach(name, now).is_some();
        let command = match kind {
            CommandKind::Literal => self.build_literal(name, kept, callback),
            CommandKind::Pattern => self.build_pattern(name, kept, callback, now),
        };
        let group = command
            .group
            .and_then(|id| self.grouping.name_of(id))
            .map(str::to_string);
        self.commands.insert(name.to_string(), command);

        if replaced {
            self.rebuild_exact_index();
            debug!("command '{name}' replaced");
        } else {
            self.order.push(name.to_string());
            self.index_literals(name);
            debug!("command '{name}' registered as {kind:?}");
        }

        Registration {
            name: name.to_string(),
            outcome: if replaced {
                Outcome::Replaced
            } else {
                Outcome::Registered
            },
            dropped,
            group,
        }
    }

    fn set_fallback(
        &mut self,
        triggers: Vec<Trigger>,
        callback: Option<CommandCallback>,
    ) -> Registration {
        if triggers.iter().any(Trigger::is_pattern) {
            warn!("fallback command '{FALLBACK_COMMAND}' cannot carry pattern triggers");
            return Registration::rejected(
                FALLBACK_COMMAND,
                RejectReason::PatternFallback,
                Vec::new(),
            );
        }
        if !triggers.is_empty() {
            debug!("fallback command ignores its {} triggers", triggers.len());
        }
        let replaced = self.fallback.replace(Fallback { callback }).is_some();
        Registration {
            name: FALLBACK_COMMAND.to_string(),
            outcome: if replaced {
                Outcome::Replaced
            } else {
                Outcome::Registered
            },
            dropped: Vec::new(),
            group: None,
        }
    }

    fn screen(&self, name: &str, trigger: &Trigger) -> std::result::Result<(), TriggerIssue> {
        match trigger {
            Trigger::Literal(text) => {
                if normalize(text).is_empty() {
                    warn!("command '{name}': dropping empty literal trigger");
                    return Err(TriggerIssue::Empty);
                }
                Ok(())
            }
            Trigger::Pattern(source) => {
                if source.trim().is_empty() {
                    warn!("command '{name}': dropping empty pattern trigger");
                    return Err(TriggerIssue::Empty);
                }
                match check_pattern(source, &self.safety) {
                    Ok(()) => {}
                    Err(violation) if self.config.strict => {
                        error!("command '{name}': dropping unsafe pattern /{source}/: {violation}");
                        return Err(TriggerIssue::Unsafe { violation });
                    }
                    Err(violation) => {
                        warn!("command '{name}': keeping unsafe pattern /{source}/ in lenient mode: {violation}");
                    }
                }
                // Grouping refuses sources that fail alone, so a kept one stays standalone.
                match self.compiler.compile(std::slice::from_ref(source)) {
                    Ok(_) => Ok(()),
                    Err(err) if self.config.strict => {
                        error!("command '{name}': dropping invalid pattern /{source}/: {err}");
                        Err(TriggerIssue::Invalid {
                            error: err.to_string(),
                        })
                    }
                    Err(err) => {
                        warn!("command '{name}': keeping invalid pattern /{source}/ in lenient mode: {err}");
                        Ok(())
                    }
                }
            }
        }
    }

    fn can_warm_regex(&self) -> bool {
        self.warmed_regex < self.limits.max_warmed_regex_commands
    }

    /// New slot for `sources`, compiled now when the warm budget allows.
    fn standalone_slot(&mut self, name: &str, sources: &[String]) -> (MatcherSlot, usize) {
        let slot = MatcherSlot::default();
        if !self.can_warm_regex() {
            debug!("command '{name}' is past the warm limit; compiling on first use");
            return (slot, 0);
        }
        let compiler = self.compiler;
        slot.get_or_compile(name, || compiler.compile(sources));
        self.warmed_regex += 1;
        (slot, 1)
    }

    fn build_literal(
        &mut self,
        name: &str,
        triggers: Vec<Trigger>,
        callback: Option<CommandCallback>,
    ) -> Command {
        let mut needles = Vec::new();
        let mut patterns = Vec::new();
        let mut warmed = 0;
        for trigger in &triggers {
            match trigger {
                Trigger::Literal(text) => needles.push(normalize(text)),
                Trigger::Pattern(source) => {
                    let (slot, count) = self.standalone_slot(name, std::slice::from_ref(source));
                    warmed += count;
                    patterns.push((source.clone(), slot));
                }
            }
        }
        Command {
            kind: CommandKind::Literal,
            triggers,
            callback,
            group: None,
            matcher: Matcher::Literal { needles, patterns },
            warmed,
        }
    }

    fn build_pattern(
        &mut self,
        name: &str,
        triggers: Vec<Trigger>,
        callback: Option<CommandCallback>,
        now: Instant,
    ) -> Command {
        self.pattern_commands += 1;
        let mut command = Command {
            kind: CommandKind::Pattern,
            triggers,
            callback,
            group: None,
            matcher: Matcher::Pattern(None),
            warmed: 0,
        };
        let sources = command.sources();

        if self.pattern_commands >= self.config.group_threshold {
            if let Some(id) = self.grouping.assign(name, &sources, now) {
                command.group = Some(id);
                return command;
            }
        }

        let (slot, warmed) = self.standalone_slot(name, &sources);
        command.matcher = Matcher::Pattern(Some(slot));
        command.warmed = warmed;
        command
    }

    /// Take `name` out of the command map and every structure derived from it.
    /// Its position in `order` is left to the caller.
    fn detach(&mut self, name: &str, now: Instant) -> Option<Command> {
        let command = self.commands.remove(name)?;
        self.warmed_regex = self.warmed_regex.saturating_sub(command.warmed);
        if command.kind == CommandKind::Pattern {
            self.pattern_commands = self.pattern_commands.saturating_sub(1);
        }
        if let Some(id) = command.group {
            self.leave_group(id, name, now);
        }
        Some(command)
    }

    fn leave_group(&mut self, id: GroupId, name: &str, now: Instant) {
        if let Removal::Disbanded {
            survivor: Some(survivor),
        } = self.grouping.remove(id, name, now)
        {
            self.ungroup(&survivor);
        }
    }

    /// Give a former group member its own matcher again.
    fn ungroup(&mut self, name: &str) {
        let Some(sources) = self.commands.get(name).map(Command::sources) else {
            return;
        };
        let (slot, warmed) = self.standalone_slot(name, &sources);
        if let Some(command) = self.commands.get_mut(name) {
            command.group = None;
            command.matcher = Matcher::Pattern(Some(slot));
            command.warmed = warmed;
        }
    }

    fn index_literals(&mut self, name: &str) {
        let Some(Command {
            matcher: Matcher::Literal { needles, .. },
            ..
        }) = self.commands.get(name)
        else {
            return;
        };
        for needle in needles {
            self.exact
                .entry(needle.clone())
                .or_insert_with(|| name.to_string());
        }
    }

    fn rebuild_exact_index(&mut self) {
        self.exact.clear();
        for name in &self.order {
            if let Some(Command {
                matcher: Matcher::Literal { needles, .. },
                ..
            }) = self.commands.get(name)
            {
                for needle in needles {
                    self.exact
                        .entry(needle.clone())
                        .or_insert_with(|| name.clone());
                }
            }
        }
    }

    /// Remove `name` (or the fallback). Returns whether anything was removed.
    pub fn remove_command(&mut self, name: &str) -> bool {
        let now = Instant::now();
        self.grouping.run_due(now);

        if name == FALLBACK_COMMAND {
            return self.fallback.take().is_some();
        }
        let Some(command) = self.detach(name, now) else {
            debug!("remove_command: '{name}' is not registered");
            return false;
        };
        self.order.retain(|n| n != name);
        if command.kind == CommandKind::Literal {
            self.rebuild_exact_index();
        }
        debug!("command '{name}' removed");
        true
    }

    /// Drop every command, group, pending compile and the override resolver.
    pub fn clear_commands(&mut self) {
        self.resolver = None;
        self.commands.clear();
        self.order.clear();
        self.exact.clear();
        self.fallback = None;
        self.grouping.clear();
        self.pattern_commands = 0;
        self.warmed_regex = 0;
        info!("command registry cleared");
    }

    /// Install or remove the override hook consulted before anything else.
    pub fn set_resolver(&mut self, resolver: Option<CustomResolver>) {
        self.resolver = resolver;
    }

    /// When the pending group compile is due, if any.
    #[must_use]
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.grouping.pending_deadline()
    }

    /// Run the pending group compile if its debounce window has passed.
    pub fn run_due(&mut self, now: Instant) -> bool {
        self.grouping.run_due(now)
    }

    /// Run the pending group compile immediately.
    pub fn flush_pending(&mut self) -> bool {
        self.grouping.flush()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty() && self.fallback.is_none()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        if name == FALLBACK_COMMAND {
            return self.fallback.is_some();
        }
        self.commands.contains_key(name)
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<CommandInfo> {
        let command = self.commands.get(name)?;
        Some(CommandInfo {
            name: name.to_string(),
            kind: command.kind,
            triggers: command.triggers.clone(),
            group: command
                .group
                .and_then(|id| self.grouping.name_of(id))
                .map(str::to_string),
            has_callback: command.callback.is_some(),
        })
    }

    /// Registered names in registration order (fallback excluded)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn groups(&self) -> Vec<GroupInfo> {
        self.grouping.infos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::reply;
    use crate::safety::SafetyViolation;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::new(DispatchConfig {
            limits: Some(Limits {
                max_warmed_groups: 100,
                max_warmed_regex_commands: 1_000,
            }),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut reg = registry();
        let result = reg.add_command("  ", ["x"], None, false);
        assert_eq!(
            result.outcome,
            Outcome::Rejected {
                reason: RejectReason::EmptyName
            }
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn strict_mode_drops_unsafe_triggers() {
        let mut reg = registry();
        let result = reg.add_command("mixed", [r"(a+)+", r"\bok\b"], None, true);
        assert_eq!(result.outcome, Outcome::Registered);
        assert_eq!(result.dropped.len(), 1);
        assert!(matches!(
            result.dropped[0].issue,
            TriggerIssue::Unsafe {
                violation: SafetyViolation::NestedQuantifier { .. }
            }
        ));
        assert_eq!(
            reg.command("mixed").unwrap().triggers,
            vec![Trigger::pattern(r"\bok\b")]
        );

        let single = reg.add_command("bad", ["(a|a)+"], None, true);
        assert!(!single.is_accepted());
        assert!(!reg.contains("bad"));
    }

    #[test]
    fn strict_mode_drops_triggers_that_do_not_compile() {
        let mut reg = registry();
        let result = reg.add_command("mixed", ["[z-a]", "^ok$"], None, true);
        assert_eq!(result.outcome, Outcome::Registered);
        assert_eq!(result.dropped.len(), 1);
        assert!(matches!(
            result.dropped[0].issue,
            TriggerIssue::Invalid { .. }
        ));
        assert_eq!(
            reg.command("mixed").unwrap().triggers,
            vec![Trigger::pattern("^ok$")]
        );
        assert_eq!(reg.resolve("ok").as_deref(), Some("mixed"));
    }

    #[test]
    fn lenient_mode_keeps_unsafe_triggers() {
        let mut reg = Registry::new(DispatchConfig {
            strict: false,
            ..DispatchConfig::default()
        })
        .unwrap();
        let result = reg.add_command("risky", ["(a|a)+"], None, true);
        assert!(result.is_accepted());
        assert!(result.dropped.is_empty());
        assert!(reg.contains("risky"));
        let result = reg.add_command("nested", ["(x+)+y"], None, true);
        assert!(result.is_accepted());
        assert!(result.dropped.is_empty());
        assert!(reg.contains("nested"));
    }

    #[test]
    fn readding_replaces_in_place() {
        let mut reg = registry();
        reg.add_command("first", ["one"], None, false);
        reg.add_command("second", ["two"], None, false);
        let again = reg.add_command("first", ["uno"], Some(reply("!")), false);
        assert_eq!(again.outcome, Outcome::Replaced);
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["first", "second"]);
        let info = reg.command("first").unwrap();
        assert_eq!(info.triggers, vec![Trigger::literal("uno")]);
        assert!(info.has_callback);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn fallback_rejects_patterns() {
        let mut reg = registry();
        let result = reg.add_command(FALLBACK_COMMAND, [".*"], None, true);
        assert_eq!(
            result.outcome,
            Outcome::Rejected {
                reason: RejectReason::PatternFallback
            }
        );
        let result = reg.add_command(FALLBACK_COMMAND, Vec::<String>::new(), None, false);
        assert_eq!(result.outcome, Outcome::Registered);
        assert!(reg.contains(FALLBACK_COMMAND));
        assert_eq!(reg.len(), 0);
        assert!(reg.remove_command(FALLBACK_COMMAND));
        assert!(reg.is_empty());
    }

    #[test]
    fn empty_literal_triggers_are_dropped() {
        let mut reg = registry();
        let result = reg.add_command("blank", ["", "  "], None, false);
        assert_eq!(
            result.outcome,
            Outcome::Rejected {
                reason: RejectReason::NoUsableTriggers
            }
        );
        assert_eq!(result.dropped.len(), 2);
    }

    #[test]
    fn warm_limit_defers_standalone_compilation() {
        let mut reg = Registry::new(DispatchConfig {
            limits: Some(Limits {
                max_warmed_groups: 0,
                max_warmed_regex_commands: 2,
            }),
            ..Default::default()
        })
        .unwrap();
        for i in 0..4 {
            reg.add_command(&format!("p{i}"), [format!("^p{i}$")], None, true);
        }
        let stats = reg.stats();
        assert_eq!(stats.standalone_matchers, 4);
        assert_eq!(stats.warmed_regex, 2);
        assert_eq!(stats.compiled_standalone, 2);

        assert_eq!(reg.resolve("p3").as_deref(), Some("p3"));
        assert_eq!(reg.stats().compiled_standalone, 4);

        assert!(reg.remove_command("p0"));
        assert_eq!(reg.stats().warmed_regex, 1);
    }
}
