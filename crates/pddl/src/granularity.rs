//! Granularity translation between physical and logical fact namespaces.
//!
//! The Nerves layer reasons over physical facts (`(at …)`, `(scanned …)`);
//! the Brain layer reasons over logical predicates (`(located …)`,
//! `(known …)`). Translation is pure: it depends only on the input facts,
//! the fixed rewrite tables, and an optional caller-supplied context.

use crate::fact::{Fact, FactSet};
use std::collections::BTreeMap;

/// Caller-supplied context for translation.
///
/// `fresh_objects` maps a source object to the identifier a logical predicate
/// should introduce when embodied (e.g. the archive name for a compressed
/// file); `error_tokens` carries tool-reported error codes for semantic
/// upgrade.
#[derive(Debug, Clone, Default)]
pub struct TranslationContext {
    pub fresh_objects: BTreeMap<String, String>,
    pub error_tokens: Vec<String>,
}

/// Pure rewriter between the two fact granularities.
#[derive(Debug, Clone)]
pub struct GranularityTranslator {
    /// Above this many located-files in one folder, collapse to a single
    /// contains fact.
    cluster_threshold: usize,
}

impl Default for GranularityTranslator {
    fn default() -> Self {
        Self {
            cluster_threshold: 3,
        }
    }
}

impl GranularityTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_threshold(mut self, threshold: usize) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    /// Nerves → Brain: downsample physical facts into logical predicates.
    pub fn downsample(&self, facts: &FactSet, context: Option<&TranslationContext>) -> FactSet {
        let mut logical = FactSet::new();
        for fact in facts {
            if fact.is_comment() {
                continue;
            }
            if let Some(converted) = downsample_fact(fact) {
                logical.insert(converted);
            }
        }

        if let Some(ctx) = context {
            for token in &ctx.error_tokens {
                if let Some(upgraded) = upgrade_error(token) {
                    logical.insert(upgraded);
                }
            }
        }

        self.cluster(logical)
    }

    /// Brain → Nerves: embody logical predicates as physical facts.
    ///
    /// Predicates introducing a fresh object (e.g. `(compressed ?f)` needs an
    /// archive) draw the identifier from the context map, falling back to a
    /// deterministic generated token.
    pub fn embody(&self, facts: &FactSet, context: &TranslationContext) -> FactSet {
        let mut physical = FactSet::new();
        for fact in facts {
            if fact.is_comment() {
                continue;
            }
            if let Some(converted) = embody_fact(fact, context) {
                physical.insert(converted);
            }
        }
        physical
    }

    /// Collapse folders holding more located-files than the threshold into a
    /// single contains fact.
    fn cluster(&self, facts: FactSet) -> FactSet {
        let mut per_folder: BTreeMap<String, Vec<Fact>> = BTreeMap::new();
        let mut rest = FactSet::new();

        for fact in facts {
            if fact.head() == Some("located") && fact.args().len() == 2 {
                let folder = fact.args()[1].to_string();
                per_folder.entry(folder).or_default().push(fact);
            } else {
                rest.insert(fact);
            }
        }

        for (folder, located) in per_folder {
            if located.len() > self.cluster_threshold {
                rest.insert(Fact::raw(format!("(contains {} multiple_files)", folder)));
            } else {
                rest.extend(located);
            }
        }
        rest
    }
}

/// Physical → logical rewrite table.
fn downsample_fact(fact: &Fact) -> Option<Fact> {
    let head = fact.head()?;
    let args = fact.args();
    let rewritten = match (head, args.len()) {
        ("at", 2) => format!("(located {} {})", args[0], args[1]),
        ("scanned", 1) => format!("(known {})", args[0]),
        ("is_created", 1) => format!("(exists {})", args[0]),
        ("is_compressed", 2) => format!("(compressed {})", args[0]),
        ("has_admin_rights", 0) => "(has_permission)".to_string(),
        ("has_name", 2) => format!("(named {} {})", args[0], args[1]),
        ("is_empty", 1) => format!("(empty {})", args[0]),
        ("is_copied", 2) => format!("(copied {} {})", args[0], args[1]),
        // Unknown predicates pass through unchanged.
        _ => return Some(fact.clone()),
    };
    Some(Fact::raw(rewritten))
}

/// Logical → physical rewrite table.
fn embody_fact(fact: &Fact, context: &TranslationContext) -> Option<Fact> {
    let head = fact.head()?;
    let args = fact.args();
    let rewritten = match (head, args.len()) {
        ("located", 2) => format!("(at {} {})", args[0], args[1]),
        ("known", 1) => format!("(scanned {})", args[0]),
        ("exists", 1) => format!("(is_created {})", args[0]),
        ("compressed", 1) => {
            let archive = context
                .fresh_objects
                .get(args[0])
                .cloned()
                .unwrap_or_else(|| format!("archive_{}", args[0]));
            format!("(is_compressed {} {})", args[0], archive)
        }
        ("has_permission", 0) => "(has_admin_rights)".to_string(),
        ("named", 2) => format!("(has_name {} {})", args[0], args[1]),
        ("empty", 1) => format!("(is_empty {})", args[0]),
        ("copied", 2) => format!("(is_copied {} {})", args[0], args[1]),
        ("contains", 2) => return None,
        _ => return Some(fact.clone()),
    };
    Some(Fact::raw(rewritten))
}

/// Map a tool-reported error token to a negated logical predicate.
fn upgrade_error(token: &str) -> Option<Fact> {
    let fact = match token {
        "error_access_denied" => "(not (has_permission))",
        "error_file_not_found" => "(not (exists target))",
        "error_insufficient_space" => "(not (has_space storage))",
        _ => return None,
    };
    Some(Fact::raw(fact))
}
