//! Fact model.
//!
//! A fact is either a balanced parenthesized predicate instance in the
//! escaped namespace, e.g. `(at report_dot_txt root)`, or a comment sentinel
//! (`;`-prefixed) the kernel feeds back into state after planner or action
//! failures. Predicates are normalized on construction so equal facts compare
//! equal regardless of incidental whitespace.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The active state is an unordered set of facts; `BTreeSet` keeps
/// serialization deterministic.
pub type FactSet = BTreeSet<Fact>;

/// A single normalized fact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fact(String);

impl Fact {
    /// Parse and normalize a fact.
    ///
    /// Comment sentinels pass through trimmed. Predicates must be balanced
    /// parenthesized forms; whitespace is canonicalized to single spaces.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Parse("empty fact".to_string()));
        }
        if trimmed.starts_with(';') {
            return Ok(Self(trimmed.to_string()));
        }
        if !trimmed.starts_with('(') {
            return Err(Error::Parse(format!("fact must be parenthesized: {}", trimmed)));
        }
        if !is_balanced(trimmed) {
            return Err(Error::Parse(format!("unbalanced parentheses in fact: {}", trimmed)));
        }
        Ok(Self(normalize(trimmed)))
    }

    /// Construct from text already known to be normalized (test helper and
    /// internal fast path).
    pub(crate) fn raw(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `;`-prefixed feedback sentinels.
    pub fn is_comment(&self) -> bool {
        self.0.starts_with(';')
    }

    /// True for `(not …)` forms.
    pub fn is_negation(&self) -> bool {
        self.0.starts_with("(not ")
    }

    /// Head symbol of the predicate, if this is a predicate fact.
    pub fn head(&self) -> Option<&str> {
        if self.is_comment() {
            return None;
        }
        self.0
            .trim_start_matches('(')
            .split_whitespace()
            .next()
            .map(|h| h.trim_end_matches(')'))
    }

    /// Positional arguments of a flat predicate fact.
    pub fn args(&self) -> Vec<&str> {
        if self.is_comment() {
            return Vec::new();
        }
        let inner = self.0.trim_start_matches('(').trim_end_matches(')');
        inner.split_whitespace().skip(1).collect()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonicalize whitespace inside a balanced form.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            // No space after '(' or before ')'
            if ch != ')' && !out.ends_with('(') && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

fn is_balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Scan a text for top-level balanced parenthesized forms.
///
/// Handles nested predicates like `(= (total-cost) 0)` by paren counting;
/// returns an error if a form is left open or a stray `)` appears at the top
/// level.
pub fn extract_forms(text: &str) -> Result<Vec<String>> {
    let mut forms = Vec::new();
    let mut depth = 0i32;
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::Parse(format!("stray ')' at byte {}", idx)));
                }
                if depth == 0 {
                    if let Some(s) = start.take() {
                        forms.push(text[s..=idx].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::Parse("unclosed '(' in input".to_string()));
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_whitespace() {
        let fact = Fact::parse("( at   file1    root )").unwrap();
        assert_eq!(fact.as_str(), "(at file1 root)");
    }

    #[test]
    fn test_parse_preserves_nested_forms() {
        let fact = Fact::parse("(= (total-cost) 0)").unwrap();
        assert_eq!(fact.as_str(), "(= (total-cost) 0)");
    }

    #[test]
    fn test_parse_rejects_unbalanced() {
        assert!(Fact::parse("(at file1 root").is_err());
        assert!(Fact::parse("at file1 root)").is_err());
    }

    #[test]
    fn test_parse_roundtrip_is_stable() {
        let once = Fact::parse("(  at  a   b )").unwrap();
        let twice = Fact::parse(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_comment_sentinel() {
        let fact = Fact::parse("; Error: move failed").unwrap();
        assert!(fact.is_comment());
        assert_eq!(fact.head(), None);
    }

    #[test]
    fn test_head_and_args() {
        let fact = Fact::parse("(at file1 root)").unwrap();
        assert_eq!(fact.head(), Some("at"));
        assert_eq!(fact.args(), vec!["file1", "root"]);

        let nullary = Fact::parse("(has_admin_rights)").unwrap();
        assert_eq!(nullary.head(), Some("has_admin_rights"));
        assert!(nullary.args().is_empty());
    }

    #[test]
    fn test_extract_forms_nested() {
        let forms = extract_forms("(at a b) (= (total-cost) 0)").unwrap();
        assert_eq!(forms, vec!["(at a b)", "(= (total-cost) 0)"]);
    }

    #[test]
    fn test_extract_forms_rejects_stray_paren() {
        assert!(extract_forms("(at a b))").is_err());
        assert!(extract_forms("((at a b)").is_err());
    }
}
