//! Deterministic problem assembly.
//!
//! After the first kernel iteration the LLM only supplies the goal clause;
//! everything else in a problem file (the `:objects` block, the `:init`
//! block, the cost metric) is composed here from the object-type map and the
//! current fact set. This module also owns the type-inference table used to
//! type objects that first appear in facts or goals.

use crate::fact::{extract_forms, Fact, FactSet};
use common::{escape, Error, Result};
use std::collections::BTreeMap;
use tracing::warn;

/// Object name to declared type. Conflicting re-assignments keep the earlier
/// type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMap {
    entries: BTreeMap<String, String>,
}

impl ObjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a type to an object. The first assignment wins; a differing
    /// later assignment is dropped with a warning.
    pub fn assign(&mut self, name: impl Into<String>, ty: impl Into<String>) {
        let name = name.into();
        let ty = ty.into();
        match self.entries.get(&name) {
            Some(existing) if existing != &ty => {
                warn!(object = %name, existing = %existing, rejected = %ty,
                      "object type conflict, keeping earlier assignment");
            }
            Some(_) => {}
            None => {
                self.entries.insert(name, ty);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Objects of a given type, used for prompt construction.
    pub fn of_type(&self, ty: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, t)| t.as_str() == ty)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Merge entries from another map, earlier assignments winning.
    pub fn merge(&mut self, other: &ObjectMap) {
        for (name, ty) in other.iter() {
            self.assign(name, ty);
        }
    }
}

/// Predicate-to-argument-position type table, configured per domain.
#[derive(Debug, Clone, Default)]
pub struct TypeInference {
    rules: BTreeMap<String, BTreeMap<usize, String>>,
}

impl TypeInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, predicate: &str, positions: &[(usize, &str)]) -> Self {
        let entry = self.rules.entry(predicate.to_string()).or_default();
        for (pos, ty) in positions {
            entry.insert(*pos, ty.to_string());
        }
        self
    }

    /// The file-management domain table.
    pub fn file_management() -> Self {
        Self::new()
            .rule("at", &[(0, "file"), (1, "folder")])
            .rule("connected", &[(0, "folder"), (1, "folder")])
            .rule("scanned", &[(0, "folder")])
            .rule("is_created", &[(0, "file")])
            .rule("is_compressed", &[(0, "file"), (1, "archive")])
            .rule("is_empty", &[(0, "folder")])
    }

    /// Infer object types from positive predicate facts.
    pub fn infer_from_facts(&self, facts: &FactSet, objects: &mut ObjectMap) {
        for fact in facts {
            if fact.is_comment() || fact.is_negation() {
                continue;
            }
            let Some(head) = fact.head() else { continue };
            let Some(mapping) = self.rules.get(head) else { continue };
            for (pos, arg) in fact.args().iter().enumerate() {
                if let Some(ty) = mapping.get(&pos) {
                    if !arg.is_empty() {
                        objects.assign(*arg, ty.clone());
                    }
                }
            }
        }
    }

    /// Infer object types from a goal clause, stripping `(not …)` wrappers.
    pub fn infer_from_goal(&self, goal_clause: &str, objects: &mut ObjectMap) -> Result<()> {
        let goal = extract_goal_predicates(goal_clause)?;
        let all = goal.positive.iter().chain(goal.negative.iter());
        for fact in all {
            let Some(head) = fact.head() else { continue };
            let Some(mapping) = self.rules.get(head) else { continue };
            for (pos, arg) in fact.args().iter().enumerate() {
                if let Some(ty) = mapping.get(&pos) {
                    objects.assign(*arg, ty.clone());
                }
            }
        }
        Ok(())
    }
}

/// Goal predicates split by polarity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalPredicates {
    pub positive: Vec<Fact>,
    pub negative: Vec<Fact>,
}

impl GoalPredicates {
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    /// True when every positive predicate is present and every negated one
    /// absent. This is the kernel's goal-achieved pre-check.
    pub fn satisfied_by(&self, state: &FactSet) -> bool {
        !self.is_empty()
            && self.positive.iter().all(|f| state.contains(f))
            && self.negative.iter().all(|f| !state.contains(f))
    }
}

/// Extract goal predicates from a problem file or a bare goal clause.
///
/// Accepts `(:goal (and p q))`, `(:goal p)`, or a clause without the `:goal`
/// wrapper.
pub fn extract_goal_predicates(text: &str) -> Result<GoalPredicates> {
    let clause = match locate_block(text, "(:goal") {
        Some(block) => inner_of(&block)?.trim_start_matches(":goal").trim().to_string(),
        None => text.trim().to_string(),
    };
    let body = if clause.starts_with("(and") {
        inner_of(&clause)?.trim_start_matches("and").trim().to_string()
    } else {
        clause
    };

    let mut goal = GoalPredicates::default();
    for form in extract_forms(&body)? {
        let fact = Fact::parse(&form)?;
        if fact.is_negation() {
            let inner = inner_of(fact.as_str())?;
            let stripped = inner.trim_start_matches("not").trim();
            for negated in extract_forms(stripped)? {
                goal.negative.push(Fact::parse(&negated)?);
            }
        } else {
            goal.positive.push(fact);
        }
    }
    Ok(goal)
}

/// Extract `obj1 obj2 - type` declarations from a problem's `:objects`
/// block. Groups may share lines or span them.
pub fn extract_objects_block(problem: &str) -> ObjectMap {
    let mut objects = ObjectMap::new();
    let Some(block) = locate_block(problem, "(:objects") else {
        return objects;
    };
    let inner: String = block
        .trim_start_matches("(:objects")
        .trim_end_matches(')')
        .lines()
        .filter(|line| !line.trim_start().starts_with(';'))
        .collect::<Vec<_>>()
        .join(" ");

    let mut pending: Vec<&str> = Vec::new();
    let mut tokens = inner.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token == "-" {
            if let Some(ty) = tokens.next() {
                for name in pending.drain(..) {
                    objects.assign(name, ty);
                }
            }
        } else {
            pending.push(token);
        }
    }
    objects
}

/// Extract the `:init` facts of a problem as the base-init baseline.
pub fn extract_init_block(problem: &str) -> Result<FactSet> {
    let Some(block) = locate_block(problem, "(:init") else {
        return Ok(FactSet::new());
    };
    let inner = inner_of(&block)?.trim_start_matches(":init").to_string();
    let mut facts = FactSet::new();
    for form in extract_forms(&inner)? {
        let fact = Fact::parse(&form)?;
        if !fact.is_comment() {
            facts.insert(fact);
        }
    }
    Ok(facts)
}

/// Render the `:objects` section body, one type group per line.
pub fn build_objects_section(objects: &ObjectMap) -> String {
    let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, ty) in objects.iter() {
        by_type.entry(ty).or_default().push(name);
    }
    by_type
        .into_iter()
        .map(|(ty, names)| format!("{} - {}", names.join(" "), ty))
        .collect::<Vec<_>>()
        .join("\n    ")
}

/// Render the `:init` section body from base-init overlaid with current
/// facts. Comments and negations never appear in init; `(= (total-cost) 0)`
/// is always present.
pub fn build_init_section(facts: &FactSet, base_init: Option<&FactSet>) -> String {
    let mut init = FactSet::new();
    if let Some(base) = base_init {
        for fact in base {
            if !fact.is_comment() && !fact.is_negation() {
                init.insert(fact.clone());
            }
        }
    }
    for fact in facts {
        if !fact.is_comment() && !fact.is_negation() {
            init.insert(fact.clone());
        }
    }
    init.insert(Fact::raw("(= (total-cost) 0)"));
    init.iter()
        .map(Fact::to_string)
        .collect::<Vec<_>>()
        .join("\n    ")
}

/// Escape `.` into `_dot_` inside every identifier of a goal clause.
pub fn escape_goal_identifiers(goal: &str) -> String {
    let mut out = String::with_capacity(goal.len());
    let mut word = String::new();
    for ch in goal.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
            word.push(ch);
        } else {
            flush_word(&mut out, &mut word);
            out.push(ch);
        }
    }
    flush_word(&mut out, &mut word);
    out
}

fn flush_word(out: &mut String, word: &mut String) {
    if !word.is_empty() {
        if word.contains('.') && !escape::is_escaped(word) {
            out.push_str(&escape::escape(word));
        } else {
            out.push_str(word);
        }
        word.clear();
    }
}

/// Wrap a bare clause into `(:goal (and …))` when the LLM omits the wrapper.
pub fn wrap_goal_clause(clause: &str) -> String {
    let trimmed = clause.trim();
    if trimmed.starts_with("(:goal") {
        trimmed.to_string()
    } else {
        format!("(:goal (and {}))", trimmed)
    }
}

/// True when the text introduces an ADL quantifier.
pub fn contains_quantifier(text: &str) -> bool {
    text.contains("(exists") || text.contains("(forall")
}

/// Assemble the final problem file.
pub fn assemble_problem(
    problem_name: &str,
    pddl_domain: &str,
    objects_section: &str,
    init_section: &str,
    goal_clause: &str,
) -> String {
    format!(
        "(define (problem {problem_name})\n  (:domain {pddl_domain})\n  (:objects\n    {objects_section}\n  )\n  (:init\n    {init_section}\n  )\n  {goal_clause}\n  (:metric minimize (total-cost))\n)"
    )
}

/// Locate a balanced block starting at the given opener, e.g. `(:goal`.
fn locate_block(text: &str, opener: &str) -> Option<String> {
    let start = text.find(opener)?;
    let mut depth = 0i32;
    for (idx, ch) in text[start..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + idx + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn inner_of(form: &str) -> Result<String> {
    form.trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::Parse(format!("expected parenthesized form: {}", form)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(items: &[&str]) -> FactSet {
        items.iter().map(|s| Fact::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_object_map_earlier_assignment_wins() {
        let mut objects = ObjectMap::new();
        objects.assign("x", "file");
        objects.assign("x", "folder");
        assert_eq!(objects.get("x"), Some("file"));
    }

    #[test]
    fn test_type_inference_from_facts() {
        let inference = TypeInference::file_management();
        let state = facts(&["(at file1 root)", "(scanned root)", "(has_admin_rights)"]);
        let mut objects = ObjectMap::new();
        inference.infer_from_facts(&state, &mut objects);

        assert_eq!(objects.get("file1"), Some("file"));
        assert_eq!(objects.get("root"), Some("folder"));
    }

    #[test]
    fn test_type_inference_skips_negations_and_comments() {
        let inference = TypeInference::file_management();
        let state = facts(&["(not (at ghost root))", "; Error: failed"]);
        let mut objects = ObjectMap::new();
        inference.infer_from_facts(&state, &mut objects);
        assert!(objects.is_empty());
    }

    #[test]
    fn test_goal_extraction_with_and() {
        let goal =
            extract_goal_predicates("(:goal (and (at file1 backup) (scanned root)))").unwrap();
        assert_eq!(goal.positive.len(), 2);
        assert!(goal.negative.is_empty());
    }

    #[test]
    fn test_goal_extraction_single_predicate() {
        let goal = extract_goal_predicates("(:goal (scanned root))").unwrap();
        assert_eq!(goal.positive.len(), 1);
    }

    #[test]
    fn test_goal_extraction_with_negation() {
        let goal =
            extract_goal_predicates("(:goal (and (at f backup) (not (at f root))))").unwrap();
        assert_eq!(goal.positive.len(), 1);
        assert_eq!(goal.negative.len(), 1);
    }

    #[test]
    fn test_goal_satisfied_by_state() {
        let goal =
            extract_goal_predicates("(:goal (and (at f backup) (not (at f root))))").unwrap();
        let state = facts(&["(at f backup)", "(has_admin_rights)"]);
        assert!(goal.satisfied_by(&state));

        let stale = facts(&["(at f backup)", "(at f root)"]);
        assert!(!goal.satisfied_by(&stale));
    }

    #[test]
    fn test_extract_objects_block() {
        let problem = "(define (problem p)\n  (:domain d)\n  (:objects\n    file1 file2 - file\n    root backup - folder\n  )\n  (:init (at file1 root))\n  (:goal (at file1 backup)))";
        let objects = extract_objects_block(problem);
        assert_eq!(objects.get("file1"), Some("file"));
        assert_eq!(objects.get("backup"), Some("folder"));
        assert_eq!(objects.len(), 4);
    }

    #[test]
    fn test_extract_objects_block_single_line_groups() {
        let problem =
            "(define (problem p) (:domain d) (:objects file1 file2 - file root backup - folder) (:init) (:goal (scanned root)))";
        let objects = extract_objects_block(problem);
        assert_eq!(objects.get("file2"), Some("file"));
        assert_eq!(objects.get("root"), Some("folder"));
        assert_eq!(objects.len(), 4);
    }

    #[test]
    fn test_extract_init_block_keeps_nested_forms() {
        let problem = "(define (problem p) (:domain d) (:objects x - file) (:init (at x root) (= (total-cost) 0)) (:goal (scanned root)))";
        let init = extract_init_block(problem).unwrap();
        assert!(init.contains(&Fact::parse("(at x root)").unwrap()));
        assert!(init.contains(&Fact::parse("(= (total-cost) 0)").unwrap()));
    }

    #[test]
    fn test_build_init_filters_comments_and_negations() {
        let state = facts(&["(at f root)", "; Error: boom", "(not (scanned root))"]);
        let init = build_init_section(&state, None);
        assert!(init.contains("(at f root)"));
        assert!(init.contains("(= (total-cost) 0)"));
        assert!(!init.contains("Error"));
        assert!(!init.contains("(not"));
    }

    #[test]
    fn test_build_init_overlays_base() {
        let base = facts(&["(has_admin_rights)", "(scanned root)"]);
        let state = facts(&["(at f backup)"]);
        let init = build_init_section(&state, Some(&base));
        assert!(init.contains("(has_admin_rights)"));
        assert!(init.contains("(at f backup)"));
    }

    #[test]
    fn test_escape_goal_identifiers() {
        let escaped = escape_goal_identifiers("(:goal (and (at report.txt backup)))");
        assert_eq!(escaped, "(:goal (and (at report_dot_txt backup)))");

        let untouched = escape_goal_identifiers("(:goal (at report_dot_txt backup))");
        assert_eq!(untouched, "(:goal (at report_dot_txt backup))");
    }

    #[test]
    fn test_wrap_goal_clause() {
        assert_eq!(
            wrap_goal_clause("(at f backup)"),
            "(:goal (and (at f backup)))"
        );
        assert_eq!(
            wrap_goal_clause("(:goal (and (at f backup)))"),
            "(:goal (and (at f backup)))"
        );
    }

    #[test]
    fn test_assemble_problem_invariants() {
        let mut objects = ObjectMap::new();
        objects.assign("file1", "file");
        objects.assign("root", "folder");
        let state = facts(&["(at file1 root)"]);

        let problem = assemble_problem(
            "file-management-problem",
            "file-manager",
            &build_objects_section(&objects),
            &build_init_section(&state, None),
            "(:goal (and (scanned root)))",
        );

        assert!(problem.contains("(= (total-cost) 0)"));
        assert!(problem.contains("(:metric minimize (total-cost))"));
        assert!(problem.contains("file1 - file"));
        assert!(!contains_quantifier(&problem));
        // Every goal/init object is declared.
        let parsed = extract_objects_block(&problem);
        assert!(parsed.contains("file1"));
        assert!(parsed.contains("root"));
    }

    #[test]
    fn test_contains_quantifier() {
        assert!(contains_quantifier("(:goal (exists (?f - file) (at ?f root)))"));
        assert!(contains_quantifier("(forall (?f) (at ?f root))"));
        assert!(!contains_quantifier("(:goal (at f root))"));
    }
}
