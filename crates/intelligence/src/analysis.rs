//! Analysis role: failure diagnosis.
//!
//! Produces free-text repair hints for failed chains and malformed PDDL. The
//! hints are never parsed; they feed back into the corresponding decomposer's
//! next retry and are recorded into the mission's error arrays.

use crate::gateway::{ChatMessage, LlmGateway};
use common::Result;
use pddl::FactSet;
use std::sync::Arc;

/// Failure diagnostician.
pub struct AnalysisRole {
    gateway: Arc<dyn LlmGateway>,
    temperature: f32,
}

impl AnalysisRole {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            temperature: 0.3,
        }
    }

    /// Diagnose a failed high-level task chain.
    pub async fn brain_failure(
        &self,
        user_goal: &str,
        current_facts: Option<&FactSet>,
        chain_of_task: &[String],
        error_location: &str,
        error_message: &str,
    ) -> Result<String> {
        let prompt = format!(
            "A high-level task chain failed. Diagnose the cause and suggest how the chain should change.\n\nGoal: {}\n{}Task chain:\n{}\nFailed at: {}\nError: {}\n\nAnswer with a short actionable diagnosis; no code.",
            user_goal,
            render_facts(current_facts),
            render_chain(chain_of_task),
            error_location,
            error_message,
        );
        self.ask(prompt).await
    }

    /// Diagnose a failed atomic action chain.
    pub async fn nerves_failure(
        &self,
        task: &str,
        current_facts: Option<&FactSet>,
        chain_of_action: &[String],
        error_location: &str,
        error_message: &str,
    ) -> Result<String> {
        let prompt = format!(
            "An atomic action chain failed. Diagnose the cause and suggest how the chain should change.\n\nTask: {}\n{}Action chain:\n{}\nFailed at: {}\nError: {}\n\nAnswer with a short actionable diagnosis; no code.",
            task,
            render_facts(current_facts),
            render_chain(chain_of_action),
            error_location,
            error_message,
        );
        self.ask(prompt).await
    }

    /// Diagnose a PDDL syntax error reported by the planner.
    pub async fn syntax_failure(
        &self,
        pddl_text: &str,
        error_message: &str,
        layer: &str,
    ) -> Result<String> {
        let prompt = format!(
            "The planner rejected PDDL generated by the {} layer.\n\nPDDL:\n{}\n\nPlanner error: {}\n\nExplain the syntax problem and what a corrected version must change.",
            layer, pddl_text, error_message,
        );
        self.ask(prompt).await
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let response = self
            .gateway
            .chat(&[ChatMessage::user(prompt)], self.temperature)
            .await?;
        Ok(response.trim().to_string())
    }
}

fn render_facts(facts: Option<&FactSet>) -> String {
    match facts {
        Some(facts) if !facts.is_empty() => {
            let body = facts
                .iter()
                .map(|f| format!("  {}", f))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Environment facts:\n{}\n", body)
        }
        _ => String::new(),
    }
}

fn render_chain(chain: &[String]) -> String {
    if chain.is_empty() {
        "  (empty)".to_string()
    } else {
        chain
            .iter()
            .map(|s| format!("  {}", s))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;

    #[tokio::test]
    async fn test_brain_failure_returns_trimmed_hint() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "  The scan step is missing admin rights.  ",
        ]));
        let analysis = AnalysisRole::new(Arc::clone(&gateway) as Arc<dyn LlmGateway>);

        let hint = analysis
            .brain_failure(
                "compress root",
                None,
                &["(scan root)".to_string()],
                "(scan root)",
                "permission denied",
            )
            .await
            .unwrap();
        assert_eq!(hint, "The scan step is missing admin rights.");

        let prompts = gateway.prompts();
        assert!(prompts[0].contains("compress root"));
        assert!(prompts[0].contains("permission denied"));
    }

    #[tokio::test]
    async fn test_syntax_failure_mentions_layer() {
        let gateway = Arc::new(ScriptedGateway::new(vec!["fix the parens"]));
        let analysis = AnalysisRole::new(Arc::clone(&gateway) as Arc<dyn LlmGateway>);

        analysis
            .syntax_failure("(:goal (at f", "unbalanced", "Nerves")
            .await
            .unwrap();
        assert!(gateway.prompts()[0].contains("Nerves layer"));
    }
}
