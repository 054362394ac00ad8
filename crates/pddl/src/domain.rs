//! Domain file patching.
//!
//! Evolution injects LLM-generated `(:action …)` blocks into a sandbox copy
//! of the domain. Insertion goes immediately before the closing paren of the
//! top-level `(define …)` form, behind a marker comment so the last-added
//! action is trivially identifiable for rollback.

use common::{Error, Result};
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

/// Marker comment preceding every injected action block.
pub const GENERATED_ACTION_MARKER: &str = "; -- generated action --";

/// Editor over a domain PDDL file.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainEditor;

impl DomainEditor {
    pub fn new() -> Self {
        Self
    }

    /// Inject an action block before the domain's final closing paren.
    ///
    /// Returns `Ok(false)` without writing when the action already exists;
    /// rejects patches with unbalanced parentheses or no recognizable
    /// action name.
    pub async fn add_action(&self, domain_file: &Path, action_pddl: &str) -> Result<bool> {
        let content = tokio::fs::read_to_string(domain_file).await?;
        let content = content.trim_end();

        let name = action_name_of(action_pddl).ok_or_else(|| {
            Error::Validation("patch does not contain an (:action …) block".to_string())
        })?;
        if content.contains(&format!(":action {}", name)) {
            debug!(action = %name, "action already present, skipping injection");
            return Ok(false);
        }

        let opens = action_pddl.matches('(').count();
        let closes = action_pddl.matches(')').count();
        if opens != closes {
            return Err(Error::Validation(format!(
                "unbalanced parentheses in action patch ({} open / {} close)",
                opens, closes
            )));
        }

        let last = content.rfind(')').ok_or_else(|| {
            Error::Parse("domain file has no closing parenthesis".to_string())
        })?;
        let patched = format!(
            "{}\n{}\n{}\n{}",
            &content[..last],
            GENERATED_ACTION_MARKER,
            action_pddl.trim(),
            &content[last..]
        );

        tokio::fs::write(domain_file, patched).await?;
        debug!(action = %name, file = %domain_file.display(), "injected action");
        Ok(true)
    }

    /// Remove the marker-delimited block declaring the named action.
    pub async fn remove_action(&self, domain_file: &Path, action_name: &str) -> Result<bool> {
        let content = tokio::fs::read_to_string(domain_file).await?;

        let needle = format!(":action {}", action_name);
        let Some(action_at) = content.find(&needle) else {
            warn!(action = %action_name, "action not found for removal");
            return Ok(false);
        };

        // The block starts at the marker written by add_action when present,
        // otherwise at the action's opening paren.
        let block_start = content[..action_at]
            .rfind(GENERATED_ACTION_MARKER)
            .unwrap_or_else(|| content[..action_at].rfind('(').unwrap_or(action_at));

        let open_at = content[block_start..]
            .find("(:action")
            .map(|off| block_start + off)
            .ok_or_else(|| Error::Parse("action block without opening form".to_string()))?;
        let mut depth = 0i32;
        let mut end = None;
        for (idx, ch) in content[open_at..].char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(open_at + idx + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| Error::Parse("unterminated action block".to_string()))?;

        let mut patched = String::with_capacity(content.len());
        patched.push_str(content[..block_start].trim_end());
        patched.push('\n');
        patched.push_str(content[end..].trim_start_matches('\n'));

        tokio::fs::write(domain_file, patched).await?;
        debug!(action = %action_name, "removed action");
        Ok(true)
    }

    /// True when the domain declares the named action.
    pub async fn action_exists(&self, domain_file: &Path, action_name: &str) -> Result<bool> {
        if !domain_file.exists() {
            return Ok(false);
        }
        let content = tokio::fs::read_to_string(domain_file).await?;
        Ok(content.contains(&format!(":action {}", action_name)))
    }
}

/// Extract the action name from an `(:action …)` block.
pub fn action_name_of(action_pddl: &str) -> Option<String> {
    let re = Regex::new(r":action\s+([^\s\n()]+)").expect("static regex");
    re.captures(action_pddl)
        .map(|caps| caps[1].to_string())
}

/// List every action name declared in a domain text.
pub fn list_actions(domain_text: &str) -> Vec<String> {
    let re = Regex::new(r"\(:action\s+([^\s()]+)").expect("static regex");
    re.captures_iter(domain_text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Action name to parameter count, read from each `:parameters` list.
pub fn action_arities(domain_text: &str) -> std::collections::BTreeMap<String, usize> {
    let re = Regex::new(r"\(:action\s+([^\s()]+)[\s\S]*?:parameters\s*\(([^)]*)\)")
        .expect("static regex");
    re.captures_iter(domain_text)
        .map(|caps| {
            let name = caps[1].to_string();
            let arity = caps[2]
                .split_whitespace()
                .filter(|tok| tok.starts_with('?'))
                .count();
            (name, arity)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "(define (domain file-manager)\n  (:requirements :strips :typing :action-costs)\n  (:types file folder archive)\n  (:predicates (at ?f - file ?d - folder) (scanned ?d - folder))\n  (:functions (total-cost))\n  (:action scan\n    :parameters (?d - folder)\n    :precondition (and)\n    :effect (and (scanned ?d)))\n)";

    const PATCH: &str = "(:action compress\n  :parameters (?f - file ?d - folder ?a - file)\n  :precondition (and (at ?f ?d))\n  :effect (and (at ?a ?d) (is_created ?a)))";

    async fn write_domain(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("domain.pddl");
        tokio::fs::write(&path, DOMAIN).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_add_action_before_final_paren() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_domain(&dir).await;

        let editor = DomainEditor::new();
        assert!(editor.add_action(&path, PATCH).await.unwrap());

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains(GENERATED_ACTION_MARKER));
        assert!(content.contains(":action compress"));
        // Domain still closes after the injected block.
        assert!(content.trim_end().ends_with(')'));
        let marker_at = content.find(GENERATED_ACTION_MARKER).unwrap();
        assert!(marker_at > content.find(":action scan").unwrap());
        assert_eq!(
            content.matches('(').count(),
            content.matches(')').count()
        );
    }

    #[tokio::test]
    async fn test_add_action_rejects_unbalanced_patch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_domain(&dir).await;

        let editor = DomainEditor::new();
        let bad = "(:action compress :parameters (?f - file) :effect (and (scanned ?f))";
        assert!(editor.add_action(&path, bad).await.is_err());

        // File untouched on rejection.
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!content.contains("compress"));
    }

    #[tokio::test]
    async fn test_add_action_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_domain(&dir).await;

        let editor = DomainEditor::new();
        let dup = "(:action scan :parameters (?d - folder) :precondition (and) :effect (and (scanned ?d)))";
        assert!(!editor.add_action(&path, dup).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_injected_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_domain(&dir).await;

        let editor = DomainEditor::new();
        editor.add_action(&path, PATCH).await.unwrap();
        assert!(editor.action_exists(&path, "compress").await.unwrap());

        assert!(editor.remove_action(&path, "compress").await.unwrap());
        assert!(!editor.action_exists(&path, "compress").await.unwrap());
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.matches('(').count(), content.matches(')').count());
        assert!(content.contains(":action scan"));
    }

    #[test]
    fn test_action_name_of() {
        assert_eq!(action_name_of(PATCH).as_deref(), Some("compress"));
        assert_eq!(action_name_of("(and (at f d))"), None);
    }

    #[test]
    fn test_list_actions() {
        assert_eq!(list_actions(DOMAIN), vec!["scan"]);
    }

    #[test]
    fn test_action_arities() {
        let arities = action_arities(PATCH);
        assert_eq!(arities.get("compress"), Some(&3));
        let arities = action_arities(DOMAIN);
        assert_eq!(arities.get("scan"), Some(&1));
    }
}
