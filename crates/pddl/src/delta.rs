//! Delta parsing and application.
//!
//! A delta is the structured result of one skill invocation: facts to add and
//! facts to delete. The textual grammar accepts whitespace-separated forms,
//! a `-` prefix or `(not …)` wrapper marking deletion, and `(and …)`
//! containers distributing those semantics to their children. Parsing is a
//! small recursive-descent pass over balanced forms; a malformed delta is
//! rejected wholesale.

use crate::fact::{extract_forms, Fact, FactSet};
use common::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Add/delete fact sets produced by one skill invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub add: BTreeSet<Fact>,
    pub del: BTreeSet<Fact>,
}

impl Delta {
    /// Parse a delta string.
    ///
    /// Examples of accepted input:
    /// - `(scanned root)`
    /// - `-(at file folder)`
    /// - `(not (at file folder)) (at file backup)`
    /// - `(and (not (at f a)) (at f b))`
    pub fn parse(text: &str) -> Result<Self> {
        let mut delta = Delta::default();
        parse_into(text, false, &mut delta)?;
        Ok(delta)
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.del.is_empty()
    }

    /// Apply this delta to a state: deletions first, then additions, so a
    /// fact present in both sets ends up added.
    pub fn apply(&self, state: &mut FactSet) {
        for fact in &self.del {
            state.remove(fact);
        }
        for fact in &self.add {
            state.insert(fact.clone());
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.del.iter().map(|d| format!("-{}", d)).collect();
        parts.extend(self.add.iter().map(|a| a.to_string()));
        write!(f, "{}", parts.join(" "))
    }
}

fn parse_into(text: &str, negated: bool, delta: &mut Delta) -> Result<()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(());
    }

    // Minus markers are only visible at the top level of a segment; record
    // their byte positions before scanning for balanced forms.
    let forms = extract_forms(trimmed)?;
    if forms.is_empty() {
        return Err(Error::Parse(format!("no parenthesized fact in delta: {}", trimmed)));
    }

    // Walk the original text in step with the extracted forms to recover the
    // `-` prefixes that extract_forms does not see.
    let mut cursor = 0usize;
    for form in forms {
        let at = trimmed[cursor..]
            .find(&form)
            .map(|off| cursor + off)
            .ok_or_else(|| Error::Parse("delta scan desynchronized".to_string()))?;
        let prefix = trimmed[cursor..at].trim();
        let minus = prefix.ends_with('-');
        if !prefix.is_empty() && !prefix.chars().all(|c| c == '-' || c.is_whitespace()) {
            return Err(Error::Parse(format!("unexpected text in delta: {}", prefix)));
        }
        cursor = at + form.len();

        dispatch_form(&form, negated || minus, delta)?;
    }

    let trailing = trimmed[cursor..].trim();
    if !trailing.is_empty() {
        return Err(Error::Parse(format!("trailing text in delta: {}", trailing)));
    }
    Ok(())
}

fn dispatch_form(form: &str, negated: bool, delta: &mut Delta) -> Result<()> {
    let inner = form
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::Parse(format!("not a parenthesized form: {}", form)))?
        .trim();

    if let Some(rest) = inner.strip_prefix("and") {
        if rest.starts_with(char::is_whitespace) || rest.is_empty() {
            return parse_into(rest, negated, delta);
        }
    }
    if let Some(rest) = inner.strip_prefix("not") {
        if rest.starts_with(char::is_whitespace) {
            let inner_forms = extract_forms(rest)?;
            if inner_forms.len() != 1 {
                return Err(Error::Parse(format!("(not …) must wrap one fact: {}", form)));
            }
            // A negated (not X) would be double negation; the grammar does
            // not produce it, treat as deletion either way.
            delta.del.insert(Fact::parse(&inner_forms[0])?);
            return Ok(());
        }
    }

    let fact = Fact::parse(form)?;
    if negated {
        delta.del.insert(fact);
    } else {
        delta.add.insert(fact);
    }
    Ok(())
}
