//! Evolution loop.
//!
//! When the kernel cannot achieve a goal with the current skill set, the
//! evolution loop asks the LLM for a patch (a new PDDL action plus a
//! generated-skill manifest), injects it into the sandbox domain, and
//! validates the pair by running a fresh kernel against the goal. Acceptance
//! is gated by the anti-false-evolution audit: the new action must actually
//! appear in the execution history slice recorded after the audit baseline.
//! Every rejection rolls the domain back to its snapshot.

use common::{Error, Result};
use intelligence::gateway::{ChatMessage, LlmGateway};
use intelligence::synthesizer::ProblemSynthesizer;
use intelligence::strip_code_fences;
use pddl::domain::DomainEditor;
use pddl::Planner;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tools::registry::SANDBOX_MCP_SKILLS_DIR_ENV;
use tools::{EffectorGateway, SandboxManager, SkillManifest};
use tracing::{info, warn};

use crate::kernel::IterativeKernel;

/// Skills a sandbox reset may use to replay setup actions.
const BASE_SETUP_SKILLS: &[&str] = &[
    "scan",
    "move",
    "get_admin",
    "remove_file",
    "compress",
    "create_file",
    "create_folder",
];

/// Patch returned by the evolution LLM.
#[derive(Debug, Clone, Deserialize)]
struct EvolutionPatch {
    action_name: String,
    pddl_patch: String,
    skill_manifest: serde_json::Value,
    #[serde(default)]
    #[allow(dead_code)]
    test_args: Vec<String>,
}

/// Result of one evolution run.
#[derive(Debug, Clone, Default)]
pub struct EvolutionOutcome {
    pub success: bool,
    pub action_name: Option<String>,
    pub pddl_patch: Option<String>,
    pub skill_file: Option<PathBuf>,
}

/// Sandboxed skill synthesis with audit and rollback.
pub struct EvolutionLoop {
    gateway: Arc<dyn LlmGateway>,
    synthesizer: Arc<ProblemSynthesizer>,
    planner: Arc<dyn Planner>,
    effector: Arc<EffectorGateway>,
    editor: DomainEditor,
    max_retries: u32,
    validation_iterations: u32,
}

impl EvolutionLoop {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        synthesizer: Arc<ProblemSynthesizer>,
        planner: Arc<dyn Planner>,
        effector: Arc<EffectorGateway>,
    ) -> Self {
        Self {
            gateway,
            synthesizer,
            planner,
            effector,
            editor: DomainEditor::new(),
            max_retries: 4,
            validation_iterations: 5,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_validation_iterations(mut self, iterations: u32) -> Self {
        self.validation_iterations = iterations;
        self
    }

    /// Attempt to evolve a new action + skill for the goal inside the
    /// sandbox.
    pub async fn evolve(
        &self,
        goal: &str,
        sandbox: &SandboxManager,
        setup_actions: &[Vec<String>],
    ) -> Result<EvolutionOutcome> {
        info!(goal, "starting evolution");
        let paths = sandbox.paths()?.clone();
        let mut context = String::from(
            "This is the first attempt; create the missing PDDL action and skill manifest for the goal.",
        );
        let mut attempt_errors: Vec<String> = Vec::new();

        for attempt in 1..=self.max_retries {
            info!(attempt, budget = self.max_retries, "evolution attempt");

            if attempt > 1 {
                sandbox.reset_storage().await?;
                self.effector.clear_history();
                self.effector.set_storage_root(paths.storage_root.clone());
                self.apply_setup_actions(setup_actions).await;
            }

            let domain_backup = tokio::fs::read_to_string(&paths.domain_file).await?;

            // 1. Ask for a patch.
            let patch = match self.ask_for_patch(goal, &context, &domain_backup).await {
                Ok(patch) => patch,
                Err(e) => {
                    context = format!(
                        "Attempt {} failed before injection: {}. Reply with valid JSON only.",
                        attempt, e
                    );
                    attempt_errors.push(context.clone());
                    continue;
                }
            };

            // 2. Inject and pre-validate.
            if let Err(e) = self.editor.add_action(&paths.domain_file, &patch.pddl_patch).await {
                context = format!(
                    "PDDL injection rejected: {}. Keep the patch balanced and the action name fresh.",
                    e
                );
                attempt_errors.push(context.clone());
                continue;
            }
            let patched_domain = tokio::fs::read_to_string(&paths.domain_file).await?;
            if let Err(syntax_error) = self.planner.validate(&patched_domain).await? {
                warn!(%syntax_error, "syntax pre-check failed, rolling back");
                tokio::fs::write(&paths.domain_file, &domain_backup).await?;
                context = format!(
                    "PDDL syntax error: {}. Fix it; exists/forall and undefined predicates are forbidden.",
                    syntax_error
                );
                attempt_errors.push(context.clone());
                continue;
            }

            // 3. Deploy the generated skill manifest.
            let skill_file = paths
                .skills_dir
                .join(format!("generated_skill_v{}.json", attempt));
            let manifest_text = serde_json::to_string_pretty(&patch.skill_manifest)?;
            if let Err(e) = SkillManifest::from_json(&manifest_text) {
                tokio::fs::write(&paths.domain_file, &domain_backup).await?;
                context = format!("skill manifest rejected: {}", e);
                attempt_errors.push(context.clone());
                continue;
            }
            tokio::fs::write(&skill_file, &manifest_text).await?;
            // Point the registry's hot-reload pointer at the sandbox pool.
            std::env::set_var(SANDBOX_MCP_SKILLS_DIR_ENV, &paths.skills_dir);
            info!(skill = %skill_file.display(), "deployed generated skill");

            // 4. Full-loop validation against a fresh sandbox kernel.
            self.effector.set_storage_root(paths.storage_root.clone());
            let audit_baseline = self.effector.history_len();

            let mut kernel = IterativeKernel::new(
                Arc::clone(&self.synthesizer),
                Arc::clone(&self.planner),
                Arc::clone(&self.effector),
                paths.domain_file.clone(),
                self.validation_iterations,
            );
            let kernel_success = match kernel.run(goal).await {
                Ok(success) => success,
                Err(e) => {
                    warn!(error = %e, "validation kernel crashed");
                    false
                }
            };

            // 5. Anti-false-evolution audit over the validation slice.
            let target = patch.action_name.to_lowercase();
            let full_history = self.effector.history();
            let validation_history = &full_history[audit_baseline.min(full_history.len())..];
            let has_worked = !validation_history.is_empty();
            let is_genuine = validation_history.iter().any(|h| *h == target);
            info!(%target, ?validation_history, "audit");

            if kernel_success && has_worked && is_genuine {
                info!(action = %target, "evolution accepted");
                return Ok(EvolutionOutcome {
                    success: true,
                    action_name: Some(patch.action_name),
                    pddl_patch: Some(patch.pddl_patch),
                    skill_file: Some(skill_file),
                });
            }

            context = if kernel_success && !is_genuine {
                format!(
                    "Audit rejected: the task succeeded but the new skill '{}' was never invoked; the old skills {:?} were used instead. Lower the new action's (total-cost) or add a precondition that forces the planner to choose it.",
                    target, validation_history
                )
            } else {
                "Validation failed: the goal was not achieved with the new skill, or no action ran at all. In evolution mode the goal must be reached by using the new skill.".to_string()
            };
            warn!(attempt, %context, "evolution attempt rejected");
            attempt_errors.push(context.clone());
            tokio::fs::write(&paths.domain_file, &domain_backup).await?;
        }

        self.report_failure(goal, &attempt_errors);
        Ok(EvolutionOutcome::default())
    }

    /// Replay setup actions, restricted to base skills so a reset can never
    /// bootstrap the capability under evolution.
    async fn apply_setup_actions(&self, setup_actions: &[Vec<String>]) {
        for action in setup_actions {
            let Some(verb) = action.first() else { continue };
            if !BASE_SETUP_SKILLS.contains(&verb.as_str()) {
                warn!(%verb, "setup action outside the base whitelist, skipped");
                continue;
            }
            let invocation = action.join(" ");
            let result = self.effector.execute(&invocation).await;
            if !result.is_success() {
                warn!(%invocation, message = result.message(), "setup action failed");
            }
        }
    }

    async fn ask_for_patch(
        &self,
        goal: &str,
        error_context: &str,
        current_domain: &str,
    ) -> Result<EvolutionPatch> {
        let prompt = format!(
            r#"You are the capability-evolution module of a planning agent.

Goal: {goal}
Previous feedback: {error_context}

Current PDDL domain:
{current_domain}

Produce a JSON object with a new PDDL action and a matching skill manifest.

Core constraints:
1. Conservation: del effects are only allowed for physical disappearance or relocation (remove/move); copy-like operations must keep their source facts.
2. Closure: the action's :effect must exactly match the delta_template of the manifest.
3. The :effect must cover the goal's predicates; producing only (is_created …) is not enough.
4. Parameter types must match the types already declared in the domain; never invent new types.
5. Only an (:action …) block is allowed; never emit :predicates, :types, :functions or other domain-level sections, and use only predicates the domain already declares.
6. The manifest's positional parameters arrive as arg0, arg1, … in the same order as the action's :parameters.
7. Keep every file identifier in the escaped form (dots written as _dot_) in the delta_template.

Manifest format: {{"name", "description", "input_schema", "steps", "message_template", "delta_template"}} where steps is a list of primitive ops ({{"op": "create_file"|"remove_file"|"copy_file"|"move_file"|"create_folder", …}}) and templates substitute {{argN}} placeholders.

Reply with JSON only:
{{
  "action_name": "…",
  "pddl_patch": "(:action … :parameters (…) :precondition (and …) :effect (and …))",
  "skill_manifest": {{ … }},
  "test_args": ["…"]
}}"#
        );

        let response = self
            .gateway
            .chat(
                &[
                    ChatMessage::system("You are a rigorous systems engineer; you output only JSON."),
                    ChatMessage::user(prompt),
                ],
                0.2,
            )
            .await?;
        let payload = strip_code_fences(&response);
        let patch: EvolutionPatch = serde_json::from_str(&payload)
            .map_err(|e| Error::Parse(format!("evolution patch is not valid JSON: {}", e)))?;
        if patch.action_name.trim().is_empty() {
            return Err(Error::Validation("patch has an empty action name".to_string()));
        }
        Ok(patch)
    }

    fn report_failure(&self, goal: &str, errors: &[String]) {
        warn!(goal, attempts = errors.len(), "evolution exhausted its retry budget");
        for (idx, error) in errors.iter().enumerate() {
            warn!(attempt = idx + 1, error = %common::utils::truncate(error, 120), "attempt summary");
        }
    }
}
