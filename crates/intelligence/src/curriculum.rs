//! Curriculum proposer: LLM-driven next-task generation.
//!
//! Proposes tasks the current skill set cannot solve, seeding the evolution
//! loop. Proposals arrive as JSON and are validated here: setup actions are
//! restricted to file/folder creation so a proposal can never bootstrap the
//! capability it is supposed to teach.

use crate::gateway::{ChatMessage, LlmGateway};
use crate::strip_code_fences;
use common::Result;
use pddl::domain::list_actions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Setup verbs a proposal may use.
const ALLOWED_SETUP_VERBS: &[&str] = &["create_file", "create_folder"];

/// A proposed training task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProposal {
    pub task_name: String,
    pub goal: String,
    pub rationale: String,
    #[serde(default)]
    pub setup_actions: Vec<Vec<String>>,
}

/// LLM-backed task proposer.
pub struct CurriculumProposer {
    gateway: Arc<dyn LlmGateway>,
    max_retries: u32,
}

impl CurriculumProposer {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Propose a task the current domain cannot yet solve.
    pub async fn propose_next(
        &self,
        domain_text: &str,
        env_snapshot: &str,
        available_setup_actions: &[String],
    ) -> Result<Option<TaskProposal>> {
        let learned = list_actions(domain_text);
        let prompt = format!(
            "You are the training instructor for an evolving planning agent.\n\nSkills already mastered (never propose tasks solvable with these): {learned:?}\n\nCurrent sandbox world state:\n{env_snapshot}\n\nCurrent capabilities (PDDL domain):\n{domain_text}\n\nAvailable setup actions: {available_setup_actions:?}\n\nPropose one file-system task the system currently cannot complete.\nRequirements:\n1. The task must require exactly one new capability.\n2. Ground it in directories that exist in the world state.\n3. Escape dots in filenames as _dot_ (test.log becomes test_dot_log).\n4. setup_actions may only use create_file or create_folder; never scan or get_admin.\n\nReply with JSON only:\n{{\"task_name\": \"…\", \"goal\": \"…\", \"rationale\": \"…\", \"setup_actions\": [[\"create_file\", \"a_dot_txt\", \"root\"]]}}",
        );
        self.ask_with_retry(&prompt).await
    }

    /// Propose a task aligned with a user-provided learning goal.
    pub async fn propose_specific(
        &self,
        task_goal: &str,
        domain_text: &str,
        env_snapshot: &str,
        available_setup_actions: &[String],
    ) -> Result<Option<TaskProposal>> {
        let learned = list_actions(domain_text);
        let prompt = format!(
            "You are the training instructor for an evolving planning agent.\n\nUser-specified learning goal: {task_goal}\n\nSkills already mastered: {learned:?}\n\nCurrent sandbox world state:\n{env_snapshot}\n\nCurrent capabilities (PDDL domain):\n{domain_text}\n\nAvailable setup actions: {available_setup_actions:?}\n\nDesign one concrete training task aligned with the learning goal.\nRequirements:\n1. Keep it as simple as possible.\n2. Ground it in directories that exist in the world state.\n3. Escape dots in filenames as _dot_.\n4. setup_actions may only use create_file or create_folder; never scan or get_admin.\n\nReply with JSON only:\n{{\"task_name\": \"…\", \"goal\": \"…\", \"rationale\": \"…\", \"setup_actions\": [[\"create_file\", \"test_dot_txt\", \"root\"]]}}",
        );
        self.ask_with_retry(&prompt).await
    }

    async fn ask_with_retry(&self, prompt: &str) -> Result<Option<TaskProposal>> {
        for attempt in 0..self.max_retries {
            let response = self
                .gateway
                .chat(
                    &[
                        ChatMessage::system("You output only JSON task definitions."),
                        ChatMessage::user(prompt.to_string()),
                    ],
                    0.3,
                )
                .await?;

            match parse_proposal(&response) {
                Ok(proposal) => {
                    debug!(goal = %proposal.goal, "curriculum proposal accepted");
                    return Ok(Some(proposal));
                }
                Err(reason) => {
                    warn!(attempt, %reason, "curriculum proposal rejected");
                }
            }
        }
        Ok(None)
    }
}

fn parse_proposal(response: &str) -> std::result::Result<TaskProposal, String> {
    let payload = strip_code_fences(response);
    let proposal: TaskProposal =
        serde_json::from_str(&payload).map_err(|e| format!("malformed JSON: {}", e))?;

    if proposal.goal.trim().is_empty() {
        return Err("proposal carries an empty goal".to_string());
    }
    for action in &proposal.setup_actions {
        let verb = action.first().map(String::as_str).unwrap_or_default();
        if !ALLOWED_SETUP_VERBS.contains(&verb) {
            return Err(format!("setup action '{}' is not allowed", verb));
        }
    }
    Ok(proposal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;

    const DOMAIN: &str =
        "(define (domain d) (:action scan :parameters (?d) :effect (and)) (:action move :parameters (?f) :effect (and)))";

    #[tokio::test]
    async fn test_propose_next_parses_json() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            r#"{"task_name": "chmod", "goal": "make a_dot_txt read-only", "rationale": "no chmod action exists", "setup_actions": [["create_file", "a_dot_txt", "root"]]}"#,
        ]));
        let proposer = CurriculumProposer::new(gateway);

        let proposal = proposer
            .propose_next(DOMAIN, "- [root] files: []", &["create_file".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proposal.task_name, "chmod");
        assert_eq!(proposal.setup_actions.len(), 1);
    }

    #[tokio::test]
    async fn test_propose_rejects_forbidden_setup_then_retries() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            r#"{"task_name": "bad", "goal": "g", "rationale": "r", "setup_actions": [["scan", "root"]]}"#,
            r#"{"task_name": "ok", "goal": "g", "rationale": "r", "setup_actions": [["create_folder", "docs", "root"]]}"#,
        ]));
        let proposer = CurriculumProposer::new(gateway);

        let proposal = proposer
            .propose_next(DOMAIN, "", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proposal.task_name, "ok");
    }

    #[tokio::test]
    async fn test_propose_specific_carries_user_goal() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            r#"{"task_name": "chmod", "goal": "make a_dot_txt read-only", "rationale": "aligned", "setup_actions": []}"#,
        ]));
        let proposer = CurriculumProposer::new(Arc::clone(&gateway) as Arc<dyn LlmGateway>);

        let proposal = proposer
            .propose_specific("learn permission management", DOMAIN, "", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proposal.task_name, "chmod");
        assert!(gateway.prompts()[0].contains("learn permission management"));
    }

    #[tokio::test]
    async fn test_propose_gives_up_after_retries() {
        let gateway = Arc::new(ScriptedGateway::new(vec!["not json", "still not", "nope"]));
        let proposer = CurriculumProposer::new(gateway);

        let proposal = proposer.propose_next(DOMAIN, "", &[]).await.unwrap();
        assert!(proposal.is_none());
    }

    #[tokio::test]
    async fn test_propose_accepts_fenced_json() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "```json\n{\"task_name\": \"t\", \"goal\": \"g\", \"rationale\": \"r\", \"setup_actions\": []}\n```",
        ]));
        let proposer = CurriculumProposer::new(gateway);

        let proposal = proposer.propose_next(DOMAIN, "", &[]).await.unwrap();
        assert!(proposal.is_some());
    }
}
