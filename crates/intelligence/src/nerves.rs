//! Nerves role: atomic action decomposition.
//!
//! Same prompting discipline as the Brain role, scoped to a single parent
//! task and expressed over physical facts. Output may only reference objects
//! that appear in the current facts or fresh identifiers the parent task
//! itself introduces (archive names for compress, new file names for create).

use crate::brain::{parse_invocation_lines, template_heads, validate_chain};
use crate::gateway::{ChatMessage, LlmGateway};
use crate::DomainProfile;
use common::{Error, Result};
use pddl::domain::list_actions;
use pddl::FactSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Atomic action decomposer.
pub struct NervesRole {
    gateway: Arc<dyn LlmGateway>,
    max_retries: u32,
    temperature: f32,
}

impl NervesRole {
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

    /// Decompose one task invocation into a chain of atomic actions.
    pub async fn decompose_action(
        &self,
        task: &str,
        current_facts: &FactSet,
        domain_text: &str,
        profile: &DomainProfile,
        failure_hint: Option<String>,
    ) -> Result<Vec<String>> {
        let action_names: Vec<String> = list_actions(domain_text);
        if action_names.is_empty() {
            return Err(Error::Validation("domain declares no actions".to_string()));
        }
        let heads = template_heads(&action_names.iter().map(|n| format!("({})", n)).collect::<Vec<_>>());
        let known = known_objects(task, current_facts);
        let mut hint = failure_hint;

        for attempt in 0..self.max_retries {
            let prompt =
                self.build_prompt(task, current_facts, &action_names, profile, hint.as_deref());
            let response = self
                .gateway
                .chat(&[ChatMessage::user(prompt)], self.temperature)
                .await?;

            let chain = parse_invocation_lines(&response);
            let verdict = validate_chain(&chain, &heads)
                .and_then(|()| validate_objects(&chain, &known));
            match verdict {
                Ok(()) if !chain.is_empty() => {
                    debug!(actions = chain.len(), "nerves decomposition accepted");
                    return Ok(chain);
                }
                Ok(()) => {
                    warn!(attempt, "nerves produced an empty chain");
                    hint = Some("the previous answer contained no action invocations".to_string());
                }
                Err(reason) => {
                    warn!(attempt, %reason, "nerves chain rejected");
                    hint = Some(reason);
                }
            }
        }

        Err(Error::Validation(format!(
            "nerves failed to produce a valid action chain for '{}' within {} attempts",
            task, self.max_retries
        )))
    }

    fn build_prompt(
        &self,
        task: &str,
        current_facts: &FactSet,
        action_names: &[String],
        profile: &DomainProfile,
        failure_hint: Option<&str>,
    ) -> String {
        let mut lines = vec![
            "You are an atomic action planner. Expand the single task below into the exact action invocations that accomplish it.".to_string(),
            String::new(),
            format!("Task: {}", task),
            String::new(),
            "Current physical facts:".to_string(),
        ];
        for fact in current_facts {
            if !fact.is_comment() {
                lines.push(format!("  {}", fact));
            }
        }

        lines.push(String::new());
        lines.push("Available atomic actions:".to_string());
        for name in action_names {
            lines.push(format!("  ({} …)", name));
        }

        if let Some(hint) = failure_hint {
            lines.push(String::new());
            lines.push(format!("Previous attempt failed: {}", hint));
        }

        lines.push(String::new());
        lines.push("Rules:".to_string());
        lines.push("1. One invocation per line, fully parenthesized.".to_string());
        lines.push(
            "2. Reference only objects present in the facts above or names the task itself introduces."
                .to_string(),
        );
        lines.push(format!(
            "3. Domain constraints: {}",
            profile.rules.join(" ")
        ));
        lines.push("4. No prose.".to_string());
        lines.join("\n")
    }
}

/// Objects an action chain may legally reference: everything named in the
/// facts plus the arguments of the parent task invocation.
fn known_objects(task: &str, facts: &FactSet) -> BTreeSet<String> {
    let mut known = BTreeSet::new();
    for fact in facts {
        for arg in fact.args() {
            known.insert(arg.to_string());
        }
    }
    for token in task
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split_whitespace()
        .skip(1)
    {
        known.insert(token.to_string());
    }
    known
}

fn validate_objects(chain: &[String], known: &BTreeSet<String>) -> std::result::Result<(), String> {
    for invocation in chain {
        for arg in invocation
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_whitespace()
            .skip(1)
        {
            if !known.contains(arg) {
                return Err(format!(
                    "invocation '{}' references unknown object '{}'",
                    invocation, arg
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use pddl::Fact;

    const DOMAIN: &str = "(define (domain file-manager)\n  (:action scan :parameters (?d - folder) :effect (and (scanned ?d)))\n  (:action move :parameters (?f - file ?a - folder ?b - folder) :effect (and))\n  (:action compress :parameters (?f - file ?d - folder ?a - file) :effect (and))\n)";

    fn facts(items: &[&str]) -> FactSet {
        items.iter().map(|s| Fact::parse(s).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_decompose_accepts_known_objects() {
        let gateway = Arc::new(ScriptedGateway::new(vec!["(move file1 root backup)"]));
        let nerves = NervesRole::new(gateway);
        let profile = DomainProfile::file_management();

        let chain = nerves
            .decompose_action(
                "(move file1 root backup)",
                &facts(&["(at file1 root)", "(connected root backup)"]),
                DOMAIN,
                &profile,
                None,
            )
            .await
            .unwrap();
        assert_eq!(chain, vec!["(move file1 root backup)"]);
    }

    #[tokio::test]
    async fn test_decompose_allows_fresh_objects_from_task() {
        // archive1 exists nowhere in the facts; the task itself introduces it.
        let gateway = Arc::new(ScriptedGateway::new(vec!["(compress file1 root archive1)"]));
        let nerves = NervesRole::new(gateway);
        let profile = DomainProfile::file_management();

        let chain = nerves
            .decompose_action(
                "(compress file1 root archive1)",
                &facts(&["(at file1 root)"]),
                DOMAIN,
                &profile,
                None,
            )
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_decompose_rejects_invented_objects() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "(move ghost root backup)",
            "(move file1 root backup)",
        ]));
        let nerves = NervesRole::new(Arc::clone(&gateway) as Arc<dyn LlmGateway>);
        let profile = DomainProfile::file_management();

        let chain = nerves
            .decompose_action(
                "(move file1 root backup)",
                &facts(&["(at file1 root)", "(connected root backup)"]),
                DOMAIN,
                &profile,
                None,
            )
            .await
            .unwrap();
        assert_eq!(chain, vec!["(move file1 root backup)"]);

        let prompts = gateway.prompts();
        assert!(prompts[1].contains("ghost"));
    }

    #[tokio::test]
    async fn test_decompose_fails_without_domain_actions() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let nerves = NervesRole::new(gateway);
        let profile = DomainProfile::file_management();

        let result = nerves
            .decompose_action("(noop)", &FactSet::new(), "(define (domain empty))", &profile, None)
            .await;
        assert!(result.is_err());
    }
}
