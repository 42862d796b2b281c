//! Text-level handling of `{{#...#}}` tokens.
//!
//! Stored field text embeds references as `{{#nodeId.key#}}`; display text
//! uses the same delimiters around a human label. Everything that needs to
//! look inside free text goes through this module.

use crate::NodeId;
use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    // Lazy up to the first `#}}`, so display labels may contain `#`.
    TOKEN.get_or_init(|| Regex::new(r"\{\{#(.+?)#\}\}").expect("token pattern is valid"))
}

/// Pointer from a field to another node's exported variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableRef {
    pub node_id: NodeId,
    pub key: String,
}

impl VariableRef {
    pub fn new(node_id: impl Into<NodeId>, key: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            key: key.into(),
        }
    }

    /// Parse `nodeId.key`. Node ids never contain a dot; keys may.
    pub fn parse(content: &str) -> Option<Self> {
        let (node_id, key) = content.trim().split_once('.')?;
        if node_id.is_empty() || key.is_empty() || node_id.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(node_id, key))
    }

    /// The stored form, `{{#nodeId.key#}}`.
    pub fn token(&self) -> String {
        wrap(&self.to_string())
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.key)
    }
}

/// One `{{#...#}}` occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSpan<'a> {
    pub range: Range<usize>,
    pub content: &'a str,
}

pub fn wrap(content: &str) -> String {
    format!("{{{{#{}#}}}}", content)
}

pub fn scan(text: &str) -> Vec<TokenSpan<'_>> {
    token_regex()
        .captures_iter(text)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let inner = cap.get(1)?;
            Some(TokenSpan {
                range: whole.range(),
                content: inner.as_str(),
            })
        })
        .collect()
}

/// References embedded in `text`, in order of appearance.
pub fn references(text: &str) -> Vec<VariableRef> {
    scan(text)
        .into_iter()
        .filter_map(|span| VariableRef::parse(span.content))
        .collect()
}

/// Replace tokens. `f` receives the token content and returns the full
/// replacement text, or `None` to keep the token untouched.
pub fn rewrite(text: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in scan(text) {
        out.push_str(&text[last..span.range.start]);
        match f(span.content) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(&text[span.range.clone()]),
        }
        last = span.range.end;
    }
    out.push_str(&text[last..]);
    out
}

/// Point references at different targets, e.g. after nodes were copied.
pub fn rewrite_references(
    text: &str,
    mut f: impl FnMut(&VariableRef) -> Option<VariableRef>,
) -> String {
    rewrite(text, |content| {
        VariableRef::parse(content)
            .and_then(|reference| f(&reference))
            .map(|reference| reference.token())
    })
}

/// Replace every reference with its value; unknown references become empty.
pub fn substitute(text: &str, mut lookup: impl FnMut(&VariableRef) -> Option<String>) -> String {
    rewrite(text, |content| {
        VariableRef::parse(content).map(|reference| lookup(&reference).unwrap_or_default())
    })
}
