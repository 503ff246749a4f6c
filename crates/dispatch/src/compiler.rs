use std::fmt::Write as _;
use std::sync::OnceLock;

use log::{debug, error};

use crate::config::EngineKind;
use crate::error::CompileError;

/// Never matched by real traffic; used to force lazy engine setup at compile time.
const WARMUP_SENTINEL: &str = "\u{1}intent-dispatch-warmup\u{1}";

/// Capture-name prefix for group alternatives. Positional, so names never repeat.
pub(crate) const SLOT_PREFIX: &str = "__idx";

#[derive(Debug, Clone)]
enum Engine {
    Linear(regex::Regex),
    Backtracking(fancy_regex::Regex),
}

/// A compiled (and warmed) alternation of one or more sources
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    engine: Engine,
    source: String,
}

impl CompiledPattern {
    /// Composed source, without case-folding flags
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        match &self.engine {
            Engine::Linear(re) => re.is_match(text),
            Engine::Backtracking(re) => re.is_match(text).unwrap_or_else(|err| {
                debug!("backtracking match aborted for /{}/: {err}", self.source);
                false
            }),
        }
    }

    /// Index of the first named slot (`__idx{i}`) that took part in the match.
    #[must_use]
    pub fn matching_slot(&self, text: &str, slots: usize) -> Option<usize> {
        match &self.engine {
            Engine::Linear(re) => {
                let caps = re.captures(text)?;
                (0..slots).find(|i| caps.name(&slot_name(*i)).is_some())
            }
            Engine::Backtracking(re) => {
                let caps = match re.captures(text) {
                    Ok(caps) => caps?,
                    Err(err) => {
                        debug!("backtracking match aborted for group: {err}");
                        return None;
                    }
                };
                (0..slots).find(|i| caps.name(&slot_name(*i)).is_some())
            }
        }
    }
}

impl AsRef<str> for CompiledPattern {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[must_use]
pub(crate) fn slot_name(index: usize) -> String {
    format!("{SLOT_PREFIX}{index}")
}

/// `(?:a)|(?:b)|...`
#[must_use]
pub fn compose<S: AsRef<str>>(sources: &[S]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        let _ = write!(out, "(?:{})", source.as_ref());
    }
    out
}

/// One named alternative: `(?P<__idx{index}>(?:a)|(?:b))`
#[must_use]
pub fn compose_slot<S: AsRef<str>>(index: usize, sources: &[S]) -> String {
    format!("(?P<{}>{})", slot_name(index), compose(sources))
}

/// Builds matchers for one engine configuration
#[derive(Debug, Clone, Copy)]
pub struct PatternCompiler {
    engine: EngineKind,
    case_insensitive: bool,
}

impl PatternCompiler {
    #[must_use]
    pub const fn new(engine: EngineKind, case_insensitive: bool) -> Self {
        Self {
            engine,
            case_insensitive,
        }
    }

    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Compile sources (raw or already compiled) into one warmed alternation.
    pub fn compile<S: AsRef<str>>(&self, sources: &[S]) -> Result<CompiledPattern, CompileError> {
        if sources.is_empty() {
            return Err(CompileError::Empty);
        }
        if let [single] = sources {
            return self.compile_source(single.as_ref().to_string());
        }
        self.compile_source(compose(sources))
    }

    /// Compile an already composed source verbatim.
    pub fn compile_source(&self, source: String) -> Result<CompiledPattern, CompileError> {
        let flagged = if self.case_insensitive {
            format!("(?i){source}")
        } else {
            source.clone()
        };
        let engine = match self.engine {
            EngineKind::Linear => Engine::Linear(regex::Regex::new(&flagged)?),
            EngineKind::Backtracking => Engine::Backtracking(fancy_regex::Regex::new(&flagged)?),
        };
        let pattern = CompiledPattern { engine, source };
        warm(&pattern);
        Ok(pattern)
    }
}

fn warm(pattern: &CompiledPattern) {
    let _ = pattern.is_match(WARMUP_SENTINEL);
    let _ = pattern.is_match("");
}

/// Lazily filled matcher that falls back to its last good build on failure.
#[derive(Debug)]
pub(crate) struct MatcherSlot<T = CompiledPattern> {
    cell: OnceLock<Option<T>>,
    previous: Option<T>,
}

impl<T> Default for MatcherSlot<T> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
            previous: None,
        }
    }
}

impl<T: Clone> MatcherSlot<T> {
    /// Forget the current build so the next access recompiles.
    pub(crate) fn invalidate(&mut self) {
        if let Some(Some(compiled)) = self.cell.take() {
            self.previous = Some(compiled);
        }
    }

    #[must_use]
    pub(crate) fn is_compiled(&self) -> bool {
        matches!(self.cell.get(), Some(Some(_)))
    }

    pub(crate) fn get_or_compile(
        &self,
        label: &str,
        build: impl FnOnce() -> Result<T, CompileError>,
    ) -> Option<&T> {
        self.cell
            .get_or_init(|| match build() {
                Ok(compiled) => Some(compiled),
                Err(err) => {
                    error!("failed to compile matcher for '{label}': {err}");
                    self.previous.clone()
                }
            })
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_wraps_each_alternative() {
        assert_eq!(compose(&["a+", "b|c"]), "(?:a+)|(?:b|c)");
        assert_eq!(compose_slot(3, &["x"]), "(?P<__idx3>(?:x))");
    }

    #[test]
    fn compile_single_and_many() {
        let compiler = PatternCompiler::new(EngineKind::Linear, true);
        let single = compiler.compile(&[r"\bhello\b"]).unwrap();
        assert_eq!(single.as_str(), r"\bhello\b");
        assert!(single.is_match("Hello there"));

        let many = compiler.compile(&["^yes$", "^да$"]).unwrap();
        assert!(many.is_match("ДА"));
        assert!(!many.is_match("yes please"));
    }

    #[test]
    fn compiled_patterns_can_be_recomposed() {
        let compiler = PatternCompiler::new(EngineKind::Linear, false);
        let first = compiler.compile(&["cat"]).unwrap();
        let second = compiler.compile(&["dog"]).unwrap();
        let joined = compiler.compile(&[first, second]).unwrap();
        assert_eq!(joined.as_str(), "(?:cat)|(?:dog)");
        assert!(joined.is_match("hotdog"));
    }

    #[test]
    fn matching_slot_identifies_alternative() {
        for engine in [EngineKind::Linear, EngineKind::Backtracking] {
            let compiler = PatternCompiler::new(engine, true);
            let source = [compose_slot(0, &["^стоп$"]), compose_slot(1, &["погода", "weather"])]
                .join("|");
            let compiled = compiler.compile_source(source).unwrap();
            assert_eq!(compiled.matching_slot("какая погода", 2), Some(1));
            assert_eq!(compiled.matching_slot("Стоп", 2), Some(0));
            assert_eq!(compiled.matching_slot("nothing", 2), None);
        }
    }

    #[test]
    fn backtracking_engine_supports_lookaround() {
        let linear = PatternCompiler::new(EngineKind::Linear, true);
        assert!(linear.compile(&["foo(?=bar)"]).is_err());

        let fancy = PatternCompiler::new(EngineKind::Backtracking, true);
        let compiled = fancy.compile(&["foo(?=bar)"]).unwrap();
        assert!(compiled.is_match("foobar"));
        assert!(!compiled.is_match("foobaz"));
    }

    #[test]
    fn empty_source_list_is_an_error() {
        let compiler = PatternCompiler::new(EngineKind::Linear, true);
        let empty: [&str; 0] = [];
        assert!(matches!(compiler.compile(&empty), Err(CompileError::Empty)));
    }

    #[test]
    fn slot_keeps_previous_build_on_failure() {
        let compiler = PatternCompiler::new(EngineKind::Linear, true);
        let mut slot: MatcherSlot = MatcherSlot::default();
        assert!(slot.get_or_compile("ok", || compiler.compile(&["abc"])).is_some());
        assert!(slot.is_compiled());

        slot.invalidate();
        assert!(!slot.is_compiled());
        let kept = slot
            .get_or_compile("broken", || compiler.compile(&["(unclosed"]))
            .expect("previous build retained");
        assert_eq!(kept.as_str(), "abc");

        let mut fresh: MatcherSlot = MatcherSlot::default();
        fresh.invalidate();
        assert!(fresh
            .get_or_compile("broken", || compiler.compile(&["(unclosed"]))
            .is_none());
    }
}
