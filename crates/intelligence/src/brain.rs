//! Brain role: high-level task decomposition.
//!
//! Turns a user goal into an ordered chain of task invocations drawn from the
//! domain's action templates. Output is validated line by line; validation
//! failures feed back into the next attempt as the failure hint.

use crate::gateway::{ChatMessage, LlmGateway};
use crate::DomainProfile;
use common::{Error, Result};
use pddl::fact::extract_forms;
use pddl::problem::ObjectMap;
use pddl::FactSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// High-level task decomposer.
pub struct BrainRole {
    gateway: Arc<dyn LlmGateway>,
    max_retries: u32,
    temperature: f32,
}

impl BrainRole {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            max_retries: 3,
            temperature: 0.1,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Decompose a user goal into a chain of task invocations.
    ///
    /// Retries up to the budget, passing each validation failure back as the
    /// hint for the next attempt; surfaces a validation error when the budget
    /// is exhausted.
    pub async fn decompose_task(
        &self,
        goal: &str,
        current_facts: &FactSet,
        available_actions: &[String],
        profile: &DomainProfile,
        failure_hint: Option<String>,
    ) -> Result<Vec<String>> {
        let heads = template_heads(available_actions);
        let mut hint = failure_hint;

        for attempt in 0..self.max_retries {
            let prompt = self.build_prompt(goal, current_facts, available_actions, profile, hint.as_deref());
            let response = self
                .gateway
                .chat(&[ChatMessage::user(prompt)], self.temperature)
                .await?;

            let chain = parse_invocation_lines(&response);
            match validate_chain(&chain, &heads) {
                Ok(()) if !chain.is_empty() => {
                    debug!(tasks = chain.len(), "brain decomposition accepted");
                    return Ok(chain);
                }
                Ok(()) => {
                    warn!(attempt, "brain produced an empty chain");
                    hint = Some("the previous answer contained no task invocations".to_string());
                }
                Err(reason) => {
                    warn!(attempt, %reason, "brain chain rejected");
                    hint = Some(reason);
                }
            }
        }

        Err(Error::Validation(format!(
            "brain failed to produce a valid task chain within {} attempts",
            self.max_retries
        )))
    }

    fn build_prompt(
        &self,
        goal: &str,
        current_facts: &FactSet,
        available_actions: &[String],
        profile: &DomainProfile,
        failure_hint: Option<&str>,
    ) -> String {
        let mut objects = ObjectMap::new();
        profile.type_inference.infer_from_facts(current_facts, &mut objects);

        let mut lines = vec![
            "You are a task planner. Decompose the goal below into a sequence of task invocations.".to_string(),
            String::new(),
            format!("Goal: \"{}\"", goal),
            String::new(),
            "Current environment facts:".to_string(),
        ];
        for fact in current_facts {
            if !fact.is_comment() {
                lines.push(format!("  {}", fact));
            }
        }

        lines.push(String::new());
        lines.push("Known objects, grouped by type:".to_string());
        let types: BTreeSet<&str> = objects.iter().map(|(_, t)| t).collect();
        for ty in types {
            lines.push(format!("  {}: {}", ty, objects.of_type(ty).join(", ")));
        }

        lines.push(String::new());
        lines.push("Available task templates (substitute each ? placeholder with a concrete object):".to_string());
        for action in available_actions {
            lines.push(format!("  {}", action));
        }

        if let Some(hint) = failure_hint {
            lines.push(String::new());
            lines.push(format!("Previous attempt failed: {}", hint));
        }

        lines.push(String::new());
        lines.push("Rules:".to_string());
        lines.push("1. Use only the templates above with concrete objects substituted.".to_string());
        lines.push("2. One invocation per line, fully parenthesized, e.g. (move file1 root backup).".to_string());
        lines.push("3. No numbering, no prose, no explanations.".to_string());
        lines.push("4. Respect action preconditions (scanning requires admin rights, etc.).".to_string());
        lines.join("\n")
    }
}

/// Head symbols of the provided templates.
pub(crate) fn template_heads(templates: &[String]) -> BTreeSet<String> {
    templates
        .iter()
        .filter_map(|t| {
            t.trim()
                .trim_start_matches('(')
                .split_whitespace()
                .next()
                .map(|h| h.trim_end_matches(')').to_string())
        })
        .collect()
}

/// Extract the first balanced parenthesized form from each response line.
pub(crate) fn parse_invocation_lines(response: &str) -> Vec<String> {
    let mut chain = Vec::new();
    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Ok(forms) = extract_forms(line) {
            if let Some(first) = forms.into_iter().next() {
                chain.push(first);
            }
        }
    }
    chain
}

/// Reject chains whose head symbol is not among the template heads.
pub(crate) fn validate_chain(chain: &[String], heads: &BTreeSet<String>) -> std::result::Result<(), String> {
    for invocation in chain {
        let head = invocation
            .trim_start_matches('(')
            .split_whitespace()
            .next()
            .map(|h| h.trim_end_matches(')'))
            .unwrap_or_default();
        if !heads.contains(head) {
            return Err(format!(
                "invocation '{}' uses '{}', which is not an available action",
                invocation, head
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use pddl::Fact;

    fn facts(items: &[&str]) -> FactSet {
        items.iter().map(|s| Fact::parse(s).unwrap()).collect()
    }

    fn templates() -> Vec<String> {
        vec![
            "(scan ?d)".to_string(),
            "(move ?f ?src ?dst)".to_string(),
            "(get_admin)".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_decompose_accepts_valid_chain() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "(scan root)\n(move file1 root backup)",
        ]));
        let brain = BrainRole::new(gateway);
        let profile = DomainProfile::file_management();

        let chain = brain
            .decompose_task(
                "move file1 to backup",
                &facts(&["(at file1 root)", "(has_admin_rights)"]),
                &templates(),
                &profile,
                None,
            )
            .await
            .unwrap();

        assert_eq!(chain, vec!["(scan root)", "(move file1 root backup)"]);
    }

    #[tokio::test]
    async fn test_decompose_retries_on_unknown_head() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "(teleport file1 root backup)",
            "(move file1 root backup)",
        ]));
        let brain = BrainRole::new(Arc::clone(&gateway) as Arc<dyn LlmGateway>);
        let profile = DomainProfile::file_management();

        let chain = brain
            .decompose_task(
                "move file1",
                &facts(&["(at file1 root)"]),
                &templates(),
                &profile,
                None,
            )
            .await
            .unwrap();
        assert_eq!(chain, vec!["(move file1 root backup)"]);

        // The retry prompt carried the validation failure as the hint.
        let prompts = gateway.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("teleport"));
    }

    #[tokio::test]
    async fn test_decompose_exhausts_retries() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "(bogus a)",
            "(bogus b)",
            "(bogus c)",
        ]));
        let brain = BrainRole::new(gateway);
        let profile = DomainProfile::file_management();

        let result = brain
            .decompose_task("goal", &FactSet::new(), &templates(), &profile, None)
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_parse_invocation_lines_skips_prose() {
        let chain = parse_invocation_lines("Here is the plan:\n(scan root)\n; comment\n(move a b c)");
        assert_eq!(chain, vec!["(scan root)", "(move a b c)"]);
    }

    #[test]
    fn test_template_heads() {
        let heads = template_heads(&templates());
        assert!(heads.contains("scan"));
        assert!(heads.contains("move"));
        assert!(heads.contains("get_admin"));
    }
}
