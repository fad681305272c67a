//! Subscription pattern matching over signal names.
//!
//! A filter is one of: an exact name (`"task:complete"`), a glob with a
//! trailing `*` matching any suffix within one segment (`"agent:*"`), a
//! multi-segment wildcard `**` matching any suffix including colons
//! (`"agent:**"`), or an array of any of these (OR). Patterns compile
//! once into a cheap predicate; matching is case-sensitive on the raw
//! name.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled pattern
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    /// Matches everything (`**`).
    Any,
    /// Matches any single-segment name (`*`).
    AnySegment,
    /// Exact raw-name match.
    Exact(String),
    /// `head:*` — head plus exactly one more segment.
    OneSegment(String),
    /// `head:**` — head plus any non-empty suffix.
    Deep(String),
}

impl Pattern {
    fn compile(raw: &str) -> Pattern {
        match raw {
            "**" => Pattern::Any,
            "*" => Pattern::AnySegment,
            _ => {
                if let Some(head) = raw.strip_suffix(":**") {
                    Pattern::Deep(head.to_owned())
                } else if let Some(head) = raw.strip_suffix(":*") {
                    Pattern::OneSegment(head.to_owned())
                } else {
                    Pattern::Exact(raw.to_owned())
                }
            }
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::AnySegment => !name.contains(':'),
            Pattern::Exact(exact) => name == exact,
            Pattern::OneSegment(head) => match name.strip_prefix(head.as_str()) {
                Some(rest) => {
                    let mut chars = rest.chars();
                    chars.next() == Some(':') && {
                        let tail = chars.as_str();
                        !tail.is_empty() && !tail.contains(':')
                    }
                }
                None => false,
            },
            Pattern::Deep(head) => match name.strip_prefix(head.as_str()) {
                Some(rest) => rest.starts_with(':') && rest.len() > 1,
                None => false,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filter — one or more patterns, OR-combined
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A compiled subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    patterns: Vec<Pattern>,
}

impl Filter {
    /// Compile a single pattern string.
    pub fn compile(raw: &str) -> Filter {
        Filter {
            patterns: vec![Pattern::compile(raw)],
        }
    }

    /// Compile an OR of pattern strings.
    pub fn any_of<I, S>(raws: I) -> Filter
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Filter {
            patterns: raws
                .into_iter()
                .map(|raw| Pattern::compile(raw.as_ref()))
                .collect(),
        }
    }

    /// The match-everything filter (an omitted subscription filter).
    pub fn all() -> Filter {
        Filter {
            patterns: vec![Pattern::Any],
        }
    }

    /// Whether the filter matches a raw signal name.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::all()
    }
}

impl From<&str> for Filter {
    fn from(raw: &str) -> Self {
        Filter::compile(raw)
    }
}

impl From<String> for Filter {
    fn from(raw: String) -> Self {
        Filter::compile(&raw)
    }
}

impl From<&[&str]> for Filter {
    fn from(raws: &[&str]) -> Self {
        Filter::any_of(raws.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Filter {
    fn from(raws: [&str; N]) -> Self {
        Filter::any_of(raws)
    }
}

// Wire form: a filter is a string or an array of strings.
impl Serialize for Filter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raws: Vec<String> = self.patterns.iter().map(raw_of).collect();
        if raws.len() == 1 {
            serializer.serialize_str(&raws[0])
        } else {
            raws.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => Filter::compile(&s),
            Raw::Many(v) => Filter::any_of(v),
        })
    }
}

fn raw_of(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Any => "**".to_owned(),
        Pattern::AnySegment => "*".to_owned(),
        Pattern::Exact(s) => s.clone(),
        Pattern::OneSegment(head) => format!("{head}:*"),
        Pattern::Deep(head) => format!("{head}:**"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
