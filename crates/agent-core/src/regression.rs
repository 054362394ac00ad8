//! Regression guard.
//!
//! Before an evolved skill is promoted, every historical task in the
//! registry is replayed against the candidate domain and skill in a reset
//! sandbox. The first failure aborts the suite and rejects the candidate;
//! on acceptance the caller appends the candidate's own goal for future
//! regression.

use common::Result;
use intelligence::synthesizer::ProblemSynthesizer;
use pddl::Planner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tools::registry::SANDBOX_MCP_SKILLS_DIR_ENV;
use tools::{EffectorGateway, SandboxManager};
use tracing::{info, warn};

use crate::kernel::IterativeKernel;

/// Setup skills a regression case may replay.
const SETUP_WHITELIST: &[&str] = &[
    "scan",
    "move",
    "get_admin",
    "remove_file",
    "compress",
    "create_file",
    "create_folder",
];

/// One persisted regression case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegressionEntry {
    pub task_name: String,
    pub goal: String,
    #[serde(default)]
    pub setup_actions: Vec<Vec<String>>,
}

/// Replay-based safety gate for evolved skills.
pub struct RegressionGuard {
    registry_path: PathBuf,
    kernel_iterations: u32,
}

impl RegressionGuard {
    pub fn new(registry_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            kernel_iterations: 5,
        }
    }

    /// Load all persisted cases; a missing file is an empty suite.
    pub async fn load(&self) -> Result<Vec<RegressionEntry>> {
        if !self.registry_path.exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&self.registry_path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Append a newly learned task, deduplicating on goal text. Returns
    /// whether the entry was added.
    pub async fn save_entry(&self, entry: RegressionEntry) -> Result<bool> {
        let mut entries = self.load().await?;
        if entries.iter().any(|e| e.goal == entry.goal) {
            info!(goal = %entry.goal, "regression case already present, skipped");
            return Ok(false);
        }
        info!(goal = %entry.goal, "regression case recorded");
        entries.push(entry);
        if let Some(parent) = self.registry_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.registry_path, serde_json::to_string_pretty(&entries)?).await?;
        Ok(true)
    }

    /// Replay the whole suite against a candidate domain + skill.
    ///
    /// Aborts and rejects on the first failing case.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_suite(
        &self,
        candidate_domain: &Path,
        candidate_skill: Option<&Path>,
        sandbox: &SandboxManager,
        synthesizer: Arc<ProblemSynthesizer>,
        planner: Arc<dyn Planner>,
        effector: Arc<EffectorGateway>,
    ) -> Result<bool> {
        let entries = self.load().await?;
        if entries.is_empty() {
            info!("regression suite is empty, nothing to replay");
            return Ok(true);
        }
        info!(cases = entries.len(), "running regression suite");

        let paths = sandbox.paths()?.clone();
        // The candidate domain replaces the sandbox domain for every case.
        tokio::fs::copy(candidate_domain, &paths.domain_file).await?;
        if let Some(skill) = candidate_skill {
            if skill.exists() {
                let target = paths.skills_dir.join(
                    skill
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "candidate_skill.json".to_string()),
                );
                tokio::fs::copy(skill, &target).await?;
                std::env::set_var(SANDBOX_MCP_SKILLS_DIR_ENV, &paths.skills_dir);
            }
        }

        for (index, case) in entries.iter().enumerate() {
            info!(case = index + 1, total = entries.len(), goal = %case.goal, "regression case");

            sandbox.reset_storage().await?;
            effector.clear_history();
            effector.set_storage_root(paths.storage_root.clone());

            for action in &case.setup_actions {
                let Some(verb) = action.first() else { continue };
                if !SETUP_WHITELIST.contains(&verb.as_str()) {
                    warn!(%verb, "setup action outside the whitelist, skipped");
                    continue;
                }
                let invocation = action.join(" ");
                let result = effector.execute(&invocation).await;
                if !result.is_success() {
                    warn!(%invocation, message = result.message(), "setup action failed");
                }
            }

            let mut kernel = IterativeKernel::new(
                Arc::clone(&synthesizer),
                Arc::clone(&planner),
                Arc::clone(&effector),
                paths.domain_file.clone(),
                self.kernel_iterations,
            );

            // Seed the kernel with the scanned initial state.
            let scan = effector.execute("scan root").await;
            if let tools::ExecutionResult::Success { delta, .. } = scan {
                let mut seed = pddl::FactSet::new();
                delta.apply(&mut seed);
                kernel.seed_facts(seed);
            }

            match kernel.run(&case.goal).await {
                Ok(true) => info!("case passed"),
                Ok(false) => {
                    warn!(goal = %case.goal, "regression case failed, rejecting candidate");
                    return Ok(false);
                }
                Err(e) => {
                    warn!(goal = %case.goal, error = %e, "regression case crashed, rejecting candidate");
                    return Ok(false);
                }
            }
        }

        info!("regression suite passed");
        Ok(true)
    }
}
