use std::sync::Arc;

use log::debug;

use super::Registry;
use crate::command::{
    normalize, CommandContext, CommandInfo, CommandKind, Dispatch, Matcher, FALLBACK_COMMAND,
};

/// Override hook consulted before any built-in matching. Returning `Some`
/// short-circuits resolution with that command name.
pub type CustomResolver = Arc<dyn Fn(&str, &CommandTable<'_>) -> Option<String> + Send + Sync>;

/// Wrap a closure as a [`CustomResolver`]
pub fn resolver<F>(f: F) -> CustomResolver
where
    F: Fn(&str, &CommandTable<'_>) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Read-only view of the registered commands handed to a [`CustomResolver`]
#[derive(Clone, Copy)]
pub struct CommandTable<'a> {
    registry: &'a Registry,
}

impl<'a> CommandTable<'a> {
    pub fn names(&self) -> impl Iterator<Item = &'a str> {
        self.registry.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<CommandInfo> {
        self.registry.command(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Registry {
    /// Name of the command `text` resolves to.
    ///
    /// Order: override hook, reserved intents, literal commands (exact
    /// phrase first, then substring in registration order), groups in
    /// creation order, standalone patterns in registration order, then the
    /// fallback when one is registered.
    #[must_use]
    pub fn resolve(&self, text: &str) -> Option<String> {
        if let Some(custom) = &self.resolver {
            if let Some(name) = custom(text, &CommandTable { registry: self }) {
                debug!("override resolver chose '{name}'");
                return Some(name);
            }
        }

        let normalized = normalize(text);
        let found = self
            .match_reserved(&normalized)
            .or_else(|| self.match_literal(text, &normalized))
            .or_else(|| self.grouping.resolve(text))
            .or_else(|| self.match_standalone(text));
        if let Some(name) = found {
            return Some(name.to_string());
        }

        self.fallback
            .as_ref()
            .map(|_| FALLBACK_COMMAND.to_string())
    }

    /// Resolve `text` and run the winning command's callback.
    pub fn dispatch(&self, text: &str) -> Option<Dispatch> {
        let command = self.resolve(text)?;
        let callback = if command == FALLBACK_COMMAND {
            self.fallback.as_ref().and_then(|f| f.callback.as_ref())
        } else {
            self.commands.get(&command).and_then(|c| c.callback.as_ref())
        };
        let reply = callback.and_then(|cb| {
            cb(&CommandContext {
                command: &command,
                text,
            })
        });
        Some(Dispatch { command, reply })
    }

    fn match_reserved(&self, normalized: &str) -> Option<&str> {
        if normalized.is_empty() {
            return None;
        }
        self.reserved
            .iter()
            .find(|(_, phrases)| phrases.iter().any(|p| normalized.contains(p.as_str())))
            .map(|(name, _)| name.as_str())
    }

    fn match_literal(&self, text: &str, normalized: &str) -> Option<&str> {
        if let Some(name) = self.exact.get(normalized) {
            return Some(name.as_str());
        }
        let compiler = self.compiler;
        self.order.iter().map(String::as_str).find(|name| {
            let Some(Matcher::Literal { needles, patterns }) =
                self.commands.get(*name).map(|c| &c.matcher)
            else {
                return false;
            };
            (!normalized.is_empty() && needles.iter().any(|n| normalized.contains(n.as_str())))
                || patterns.iter().any(|(source, slot)| {
                    slot.get_or_compile(name, || compiler.compile(std::slice::from_ref(source)))
                        .is_some_and(|p| p.is_match(text))
                })
        })
    }

    fn match_standalone(&self, text: &str) -> Option<&str> {
        let compiler = self.compiler;
        self.order.iter().map(String::as_str).find(|name| {
            let Some(command) = self.commands.get(*name) else {
                return false;
            };
            if command.kind != CommandKind::Pattern {
                return false;
            }
            let Matcher::Pattern(Some(slot)) = &command.matcher else {
                return false;
            };
            let sources = command.sources();
            slot.get_or_compile(name, || compiler.compile(&sources))
                .is_some_and(|p| p.is_match(text))
        })
    }
}
