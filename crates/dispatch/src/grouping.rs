//! Batching of pattern commands into shared alternations.
//!
//! Each member of a group becomes one named alternative `(?P<__idx{i}>...)`,
//! so a single match both decides *whether* any member matched and *which*
//! one did. At most one group is open for new members; it closes once the
//! next member would push it past either budget. Compilation is debounced
//! through a single-slot [`DeferredCompile`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::compiler::{compose_slot, CompiledPattern, MatcherSlot, PatternCompiler};
use crate::deferred::DeferredCompile;
use crate::error::CompileError;

/// Stable identity of a group; its display name follows the first member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupId(u64);

/// Size limits for one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBudget {
    /// Max trigger alternatives across all members
    pub units: usize,
    /// Max composed source length in chars
    pub source_chars: usize,
}

/// Read-only view of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub members: Vec<String>,
    pub aggregate_size: usize,
    pub source_len: usize,
    pub compiled: bool,
    pub open: bool,
}

#[derive(Debug, Clone)]
struct Member {
    command: String,
    sources: Vec<String>,
}

/// A compiled group remembers which command sits behind each slot.
#[derive(Debug, Clone)]
struct GroupMatcher {
    pattern: CompiledPattern,
    commands: Vec<String>,
}

impl GroupMatcher {
    fn build(compiler: PatternCompiler, members: &[Member]) -> Result<Self, CompileError> {
        let pattern = compiler.compile_source(compose_members(members.iter()))?;
        Ok(Self {
            pattern,
            commands: members.iter().map(|m| m.command.clone()).collect(),
        })
    }
}

fn compose_members<'a>(members: impl Iterator<Item = &'a Member>) -> String {
    members
        .enumerate()
        .map(|(i, m)| compose_slot(i, &m.sources))
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug)]
struct Group {
    members: Vec<Member>,
    aggregate_size: usize,
    source_len: usize,
    warm: bool,
    matcher: MatcherSlot<GroupMatcher>,
}

impl Group {
    fn new(warm: bool) -> Self {
        Self {
            members: Vec::new(),
            aggregate_size: 0,
            source_len: 0,
            warm,
            matcher: MatcherSlot::default(),
        }
    }

    fn name(&self) -> &str {
        self.members.first().map_or("", |m| m.command.as_str())
    }

    fn composed_source(&self) -> String {
        compose_members(self.members.iter())
    }

    /// Source length the group would have with `sources` appended.
    fn source_len_with(&self, sources: &[String]) -> usize {
        let separator = usize::from(!self.members.is_empty());
        self.source_len + separator + compose_slot(self.members.len(), sources).chars().count()
    }

    fn fits(&self, sources: &[String], budget: GroupBudget) -> bool {
        self.aggregate_size + sources.len() <= budget.units
            && self.source_len_with(sources) <= budget.source_chars
    }

    fn push(&mut self, member: Member) {
        self.source_len = self.source_len_with(&member.sources);
        self.aggregate_size += member.sources.len();
        self.members.push(member);
        self.matcher.invalidate();
    }

    fn recount(&mut self) {
        self.aggregate_size = self.members.iter().map(|m| m.sources.len()).sum();
        self.source_len = self.composed_source().chars().count();
        self.matcher.invalidate();
    }

    /// Compiled alternation; members that fail to compile alone are left out.
    fn compiled(&self, compiler: PatternCompiler) -> Option<&GroupMatcher> {
        self.matcher.get_or_compile(self.name(), || {
            let err = match GroupMatcher::build(compiler, &self.members) {
                Ok(matcher) => return Ok(matcher),
                Err(err) => err,
            };
            let (healthy, broken): (Vec<Member>, Vec<Member>) = self
                .members
                .iter()
                .cloned()
                .partition(|m| compiler.compile(&m.sources).is_ok());
            if healthy.is_empty() || broken.is_empty() {
                return Err(err);
            }
            for member in &broken {
                warn!(
                    "group '{}': leaving out '{}', its pattern does not compile",
                    self.name(),
                    member.command
                );
            }
            GroupMatcher::build(compiler, &healthy)
        })
    }

    fn has_member(&self, command: &str) -> bool {
        self.members.iter().any(|m| m.command == command)
    }

    fn info(&self, open: bool) -> GroupInfo {
        GroupInfo {
            name: self.name().to_string(),
            members: self.members.iter().map(|m| m.command.clone()).collect(),
            aggregate_size: self.aggregate_size,
            source_len: self.source_len,
            compiled: self.matcher.is_compiled(),
            open,
        }
    }
}

/// What became of a group after one of its members left
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Removal {
    /// Remaining members were recomposed
    Rebuilt,
    /// Fewer than two members remained; the survivor (if any) is ungrouped now
    Disbanded { survivor: Option<String> },
    /// Unknown group or member
    Missing,
}

#[derive(Debug)]
pub(crate) struct Grouping {
    compiler: PatternCompiler,
    budget: GroupBudget,
    max_warmed: usize,
    groups: BTreeMap<GroupId, Group>,
    open: Option<GroupId>,
    next_id: u64,
    deferred: DeferredCompile<GroupId>,
}

impl Grouping {
    pub(crate) fn new(
        compiler: PatternCompiler,
        budget: GroupBudget,
        debounce: Duration,
        max_warmed: usize,
    ) -> Self {
        Self {
            compiler,
            budget,
            max_warmed,
            groups: BTreeMap::new(),
            open: None,
            next_id: 0,
            deferred: DeferredCompile::new(debounce),
        }
    }

    /// Whether `sources` can share an alternation with other commands.
    ///
    /// Named groups would collide across members and numbered backreferences
    /// would shift, so such commands stay standalone, as do commands that
    /// alone exceed a budget or do not compile on their own.
    pub(crate) fn accepts(&self, sources: &[String]) -> bool {
        !sources.is_empty()
            && sources.iter().all(|s| !declares_captures_by_name_or_backref(s))
            && Group::new(false).fits(sources, self.budget)
            && self.compiler.compile(sources).is_ok()
    }

    /// Add a command to the open group (opening a new one when it is full).
    pub(crate) fn assign(&mut self, command: &str, sources: &[String], now: Instant) -> Option<GroupId> {
        if !self.accepts(sources) {
            return None;
        }

        let open = self
            .open
            .filter(|id| self.groups.get(id).is_some_and(|g| g.fits(sources, self.budget)));
        let id = match open {
            Some(id) => id,
            None => {
                if let Some(closed) = self.open.take().and_then(|id| self.groups.get(&id)) {
                    debug!(
                        "group '{}' closed at {} units / {} chars",
                        closed.name(),
                        closed.aggregate_size,
                        closed.source_len
                    );
                }
                self.open_group(command)
            }
        };

        let group = self.groups.get_mut(&id)?;
        group.push(Member {
            command: command.to_string(),
            sources: sources.to_vec(),
        });
        if group.warm {
            self.schedule(id, now);
        }
        Some(id)
    }

    fn open_group(&mut self, first_member: &str) -> GroupId {
        let id = GroupId(self.next_id);
        self.next_id += 1;
        let warm = self.groups.len() < self.max_warmed;
        if !warm {
            debug!("group '{first_member}' exceeds warm limit; compiling on first use");
        }
        self.groups.insert(id, Group::new(warm));
        self.open = Some(id);
        id
    }

    fn schedule(&mut self, id: GroupId, now: Instant) {
        if let Some(displaced) = self.deferred.schedule(id, now) {
            self.compile(displaced);
        }
    }

    fn compile(&self, id: GroupId) {
        if let Some(group) = self.groups.get(&id) {
            if group.compiled(self.compiler).is_some() {
                debug!(
                    "group '{}' compiled with {} members",
                    group.name(),
                    group.members.len()
                );
            }
        }
    }

    /// Drop `command` from group `id`, recomposing or disbanding the group.
    pub(crate) fn remove(&mut self, id: GroupId, command: &str, now: Instant) -> Removal {
        let Some(group) = self.groups.get_mut(&id) else {
            return Removal::Missing;
        };
        let Some(pos) = group.members.iter().position(|m| m.command == command) else {
            return Removal::Missing;
        };
        group.members.remove(pos);

        if group.members.len() >= 2 {
            group.recount();
            if group.warm {
                self.schedule(id, now);
            }
            return Removal::Rebuilt;
        }

        let survivor = self
            .groups
            .remove(&id)
            .and_then(|mut g| g.members.pop())
            .map(|m| m.command);
        self.deferred.cancel_key(id);
        if self.open == Some(id) {
            self.open = None;
        }
        info!(
            "group disbanded after removing '{command}'{}",
            survivor
                .as_deref()
                .map(|s| format!("; '{s}' is standalone again"))
                .unwrap_or_default()
        );
        Removal::Disbanded { survivor }
    }

    /// Name of the first member of group `id`
    pub(crate) fn name_of(&self, id: GroupId) -> Option<&str> {
        self.groups.get(&id).map(Group::name)
    }

    pub(crate) fn clear(&mut self) {
        self.groups.clear();
        self.open = None;
        self.next_id = 0;
        if let Some(id) = self.deferred.cancel() {
            debug!("cancelled pending compile for group {id:?}");
        }
    }

    /// Run the pending compile if its debounce window has elapsed.
    pub(crate) fn run_due(&mut self, now: Instant) -> bool {
        match self.deferred.take_due(now) {
            Some(id) => {
                self.compile(id);
                true
            }
            None => false,
        }
    }

    /// Run the pending compile now.
    pub(crate) fn flush(&mut self) -> bool {
        match self.deferred.flush() {
            Some(id) => {
                self.compile(id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn pending_deadline(&self) -> Option<Instant> {
        self.deferred.deadline()
    }

    pub(crate) fn pending_name(&self) -> Option<&str> {
        self.deferred.pending_key().and_then(|id| self.name_of(id))
    }

    pub(crate) fn open_name(&self) -> Option<&str> {
        self.open.and_then(|id| self.name_of(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn compiled_count(&self) -> usize {
        self.groups
            .values()
            .filter(|g| g.matcher.is_compiled())
            .count()
    }

    pub(crate) fn member_count(&self) -> usize {
        self.groups.values().map(|g| g.members.len()).sum()
    }

    pub(crate) fn infos(&self) -> Vec<GroupInfo> {
        self.groups
            .iter()
            .map(|(id, g)| g.info(self.open == Some(*id)))
            .collect()
    }

    /// First group (in creation order) whose alternation matches, and the member behind it.
    ///
    /// A matcher kept from an earlier build may still name members that have
    /// since left; such hits are ignored.
    pub(crate) fn resolve(&self, text: &str) -> Option<&str> {
        self.groups.values().find_map(|group| {
            let matcher = group.compiled(self.compiler)?;
            let slot = matcher.pattern.matching_slot(text, matcher.commands.len())?;
            let command = matcher.commands.get(slot)?;
            if group.has_member(command) {
                Some(command.as_str())
            } else {
                debug!("group '{}': ignoring stale hit for '{command}'", group.name());
                None
            }
        })
    }
}

/// Detects `(?P<name>`, `(?<name>`, `\1`..`\9`, `\k<name>` and `\g` outside classes.
fn declares_captures_by_name_or_backref(source: &str) -> bool {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut in_class = false;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if !in_class && matches!(chars.get(i + 1), Some('1'..='9' | 'k' | 'g')) {
                    return true;
                }
                i += 2;
                continue;
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '(' if !in_class && chars.get(i + 1) == Some(&'?') => {
                let rest = &chars[i + 2..];
                let named = match rest {
                    ['P', '<', ..] => true,
                    ['<', next, ..] => !matches!(*next, '=' | '!'),
                    _ => false,
                };
                if named {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}
