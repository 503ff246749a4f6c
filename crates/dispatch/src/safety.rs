//! Lexical screening for catastrophic-backtracking shapes.
//!
//! These are cheap heuristics over the pattern text, not an NFA analysis: a
//! pattern that passes may still be slow on a backtracking engine, and some
//! harmless patterns are rejected. Evaluation is a single pass over the
//! pattern plus one pass over its tokens.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

/// Bounds applied by [`check_pattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyLimits {
    pub max_len: usize,
    pub max_depth: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_len: 1000,
            max_depth: 5,
        }
    }
}

/// The first rule a pattern tripped. Offsets are char positions in the pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SafetyViolation {
    #[error("pattern is {len} chars long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("nested quantifier at {at}")]
    NestedQuantifier { at: usize },

    #[error("repeated alternation with overlapping branches at {at}")]
    OverlappingAlternation { at: usize },

    #[error("quantified group followed by a bounded repeat at {at}")]
    CompoundingRepetition { at: usize },

    #[error("unbounded wildcard repetition at {at}")]
    UnboundedDot { at: usize },

    #[error("group nesting depth {depth} exceeds {max}")]
    ExcessiveNesting { depth: usize, max: usize },
}

/// `true` when no heuristic fires under the default limits.
#[must_use]
pub fn is_likely_safe(pattern: &str) -> bool {
    check_pattern(pattern, &SafetyLimits::default()).is_ok()
}

/// Run every heuristic and report the first violation found.
pub fn check_pattern(pattern: &str, limits: &SafetyLimits) -> Result<(), SafetyViolation> {
    let len = pattern.chars().count();
    if len > limits.max_len {
        return Err(SafetyViolation::TooLong {
            len,
            max: limits.max_len,
        });
    }
    let tokens = lex(pattern);
    scan(&tokens, limits)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Atom {
    Char(char),
    Escape(char),
    Any,
    /// Bracket class or sub-group: never considered equal to anything.
    Opaque,
}

impl Atom {
    const fn comparable(self) -> bool {
        !matches!(self, Self::Opaque)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quant {
    unbounded: bool,
    braced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Atom(Atom),
    Open,
    Close,
    Alt,
    /// `^` when `start`, otherwise `$`.
    Anchor { start: bool },
    Quant(Quant),
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    at: usize,
}

fn lex(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();
    let mut tokens = Vec::with_capacity(n);
    let mut i = 0;

    while i < n {
        let at = i;
        let kind = match chars[i] {
            '\\' => {
                let kind = chars
                    .get(i + 1)
                    .map_or(Kind::Atom(Atom::Char('\\')), |c| Kind::Atom(Atom::Escape(*c)));
                i += 2;
                kind
            }
            '[' => {
                i = skip_class(&chars, i);
                Kind::Atom(Atom::Opaque)
            }
            '(' => {
                let (next, is_flag_group) = skip_group_header(&chars, i + 1);
                i = next;
                if is_flag_group {
                    continue;
                }
                Kind::Open
            }
            ')' => {
                i += 1;
                Kind::Close
            }
            '|' => {
                i += 1;
                Kind::Alt
            }
            c @ ('^' | '$') => {
                i += 1;
                Kind::Anchor { start: c == '^' }
            }
            '.' => {
                i += 1;
                Kind::Atom(Atom::Any)
            }
            c @ ('*' | '+' | '?') => {
                i = skip_lazy(&chars, i + 1);
                Kind::Quant(Quant {
                    unbounded: c != '?',
                    braced: false,
                })
            }
            '{' => match parse_repeat(&chars, i) {
                Some((end, unbounded)) => {
                    i = skip_lazy(&chars, end);
                    Kind::Quant(Quant {
                        unbounded,
                        braced: true,
                    })
                }
                None => {
                    i += 1;
                    Kind::Atom(Atom::Char('{'))
                }
            },
            c => {
                i += 1;
                Kind::Atom(Atom::Char(c))
            }
        };
        tokens.push(Token { kind, at });
    }

    tokens
}

/// Returns the index just past the closing `]`.
fn skip_class(chars: &[char], start: usize) -> usize {
    let n = chars.len();
    let mut j = start + 1;
    if chars.get(j) == Some(&'^') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    let mut depth = 1usize;
    while j < n {
        match chars[j] {
            '\\' => {
                j += 2;
                continue;
            }
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return j + 1;
                }
            }
            _ => {}
        }
        j += 1;
    }
    n
}

/// Skips `?:`, `?P<name>`, `?<name>`, lookaround markers and inline flags.
/// The flag is set for a bare flag group such as `(?i)`, which opens nothing.
fn skip_group_header(chars: &[char], start: usize) -> (usize, bool) {
    if chars.get(start) != Some(&'?') {
        return (start, false);
    }
    let mut j = start + 1;
    match chars.get(j) {
        Some('=' | '!') => return (j + 1, false),
        Some('<') if matches!(chars.get(j + 1), Some('=' | '!')) => return (j + 2, false),
        Some('P') if chars.get(j + 1) == Some(&'<') => j += 1,
        _ => {}
    }
    if chars.get(j) == Some(&'<') {
        while j < chars.len() && chars[j] != '>' {
            j += 1;
        }
        return ((j + 1).min(chars.len()), false);
    }
    while j < chars.len() {
        match chars[j] {
            ':' => return (j + 1, false),
            ')' => return (j + 1, true),
            _ => j += 1,
        }
    }
    (j, false)
}

fn skip_lazy(chars: &[char], idx: usize) -> usize {
    if chars.get(idx) == Some(&'?') {
        idx + 1
    } else {
        idx
    }
}

/// Parses `{n}`, `{n,}` or `{n,m}` at `start`; returns (index past `}`, unbounded).
fn parse_repeat(chars: &[char], start: usize) -> Option<(usize, bool)> {
    let mut j = start + 1;
    let digits_start = j;
    while chars.get(j).is_some_and(char::is_ascii_digit) {
        j += 1;
    }
    if j == digits_start {
        return None;
    }
    let mut unbounded = false;
    if chars.get(j) == Some(&',') {
        j += 1;
        let max_start = j;
        while chars.get(j).is_some_and(char::is_ascii_digit) {
            j += 1;
        }
        unbounded = j == max_start;
    }
    (chars.get(j) == Some(&'}')).then_some((j + 1, unbounded))
}

#[derive(Default)]
struct Frame {
    has_quant: bool,
    has_unbounded: bool,
    has_alt: bool,
    quant_before_bar: bool,
    last_was_quant: bool,
    overlap: bool,
    current_first: Option<Atom>,
    seen_first: HashSet<Atom>,
    seen_any: bool,
}

impl Frame {
    fn note_atom(&mut self, atom: Atom) {
        if self.current_first.is_none() {
            self.current_first = Some(atom);
        }
        self.last_was_quant = false;
    }

    fn end_alternative(&mut self) {
        let Some(first) = self.current_first.take() else {
            return;
        };
        if first == Atom::Any {
            self.overlap |= !self.seen_first.is_empty() || self.seen_any;
            self.seen_any = true;
        } else if first.comparable() {
            self.overlap |= self.seen_any || !self.seen_first.insert(first);
        }
    }
}

fn quant_at(tokens: &[Token], idx: usize) -> Option<Quant> {
    match tokens.get(idx)?.kind {
        Kind::Quant(q) => Some(q),
        _ => None,
    }
}

fn is_any(tokens: &[Token], idx: usize) -> bool {
    matches!(tokens.get(idx).map(|t| t.kind), Some(Kind::Atom(Atom::Any)))
}

fn anchor_at(tokens: &[Token], idx: usize) -> Option<bool> {
    match tokens.get(idx)?.kind {
        Kind::Anchor { start } => Some(start),
        _ => None,
    }
}

/// A `.` repeat is pinned when `^` directly precedes the dot or `$` directly
/// follows the quantifier.
fn is_pinned_dot(tokens: &[Token], dot: usize, quant: usize) -> bool {
    let after_start = dot
        .checked_sub(1)
        .and_then(|p| anchor_at(tokens, p))
        .is_some_and(|start| start);
    let before_end = anchor_at(tokens, quant + 1).is_some_and(|start| !start);
    after_start || before_end
}

fn scan(tokens: &[Token], limits: &SafetyLimits) -> Result<(), SafetyViolation> {
    let mut stack: Vec<Frame> = vec![Frame::default()];

    for (k, token) in tokens.iter().enumerate() {
        let at = token.at;
        match token.kind {
            Kind::Atom(atom) => {
                if let Some(frame) = stack.last_mut() {
                    frame.note_atom(atom);
                }
            }
            Kind::Anchor { .. } => {
                if let Some(frame) = stack.last_mut() {
                    frame.last_was_quant = false;
                }
            }
            Kind::Alt => {
                if let Some(frame) = stack.last_mut() {
                    frame.quant_before_bar |= frame.last_was_quant;
                    frame.has_alt = true;
                    frame.last_was_quant = false;
                    frame.end_alternative();
                }
            }
            Kind::Quant(q) => {
                let prev = k.checked_sub(1).and_then(|p| quant_at(tokens, p));
                if let Some(prev) = prev {
                    if prev.unbounded && k >= 2 && is_any(tokens, k - 2) {
                        return Err(SafetyViolation::UnboundedDot { at: tokens[k - 2].at });
                    }
                    return Err(SafetyViolation::NestedQuantifier { at });
                }
                if q.unbounded && k >= 1 && is_any(tokens, k - 1) {
                    let doubled = is_any(tokens, k + 1)
                        && quant_at(tokens, k + 2).is_some_and(|next| next.unbounded);
                    if doubled || !is_pinned_dot(tokens, k - 1, k) {
                        return Err(SafetyViolation::UnboundedDot { at: tokens[k - 1].at });
                    }
                }
                if let Some(frame) = stack.last_mut() {
                    frame.has_quant = true;
                    frame.has_unbounded |= q.unbounded;
                    frame.last_was_quant = true;
                }
            }
            Kind::Open => {
                if let Some(frame) = stack.last_mut() {
                    frame.note_atom(Atom::Opaque);
                }
                stack.push(Frame::default());
                let depth = stack.len() - 1;
                if depth > limits.max_depth {
                    return Err(SafetyViolation::ExcessiveNesting {
                        depth,
                        max: limits.max_depth,
                    });
                }
            }
            Kind::Close => {
                if stack.len() < 2 {
                    continue;
                }
                let Some(mut group) = stack.pop() else {
                    continue;
                };
                group.end_alternative();
                let follow = quant_at(tokens, k + 1);

                if let Some(q) = follow {
                    if q.unbounded {
                        if group.has_quant {
                            return Err(SafetyViolation::NestedQuantifier { at });
                        }
                        if group.has_alt && (group.quant_before_bar || group.overlap) {
                            return Err(SafetyViolation::OverlappingAlternation { at });
                        }
                        if quant_at(tokens, k + 2).is_some_and(|next| next.braced) {
                            return Err(SafetyViolation::CompoundingRepetition { at });
                        }
                    } else if q.braced && group.has_unbounded {
                        return Err(SafetyViolation::CompoundingRepetition { at });
                    }
                }

                if let Some(parent) = stack.last_mut() {
                    parent.has_quant |= group.has_quant;
                    parent.has_unbounded |= group.has_unbounded;
                    parent.last_was_quant = false;
                }
            }
        }
    }

    Ok(())
}
