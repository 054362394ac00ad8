//! Mission orchestration.
//!
//! Drives one user mission end to end and records its Chain-of-Thought
//! trace: the hypothalamus router picks the entry layer, the Brain role
//! decomposes complex goals into task chains, the Nerves role expands each
//! task into atomic actions that are checked against the domain and executed
//! through the effector. Every failure is diagnosed by the Analysis role and
//! recorded; no error escapes the mission boundary, and a failed mission is a
//! data point with non-empty error arrays.

use crate::recorder::CotRecorder;
use common::Result;
use intelligence::{
    AnalysisRole, BrainRole, DomainProfile, LlmGateway, NervesRole, Route, TaskRouter,
};
use pddl::domain::action_arities;
use pddl::granularity::GranularityTranslator;
use pddl::FactSet;
use std::sync::Arc;
use tools::EffectorGateway;
use tracing::{info, warn};

/// Orchestrates one mission at a time over a shared effector.
pub struct MissionRunner {
    router: TaskRouter,
    brain: BrainRole,
    nerves: NervesRole,
    analysis: AnalysisRole,
    translator: GranularityTranslator,
    profile: DomainProfile,
    effector: Arc<EffectorGateway>,
    recorder: CotRecorder,
    facts: FactSet,
    decompose_retries: u32,
}

impl MissionRunner {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        effector: Arc<EffectorGateway>,
        profile: DomainProfile,
        recorder: CotRecorder,
    ) -> Self {
        Self {
            router: TaskRouter::default(),
            brain: BrainRole::new(Arc::clone(&gateway)),
            nerves: NervesRole::new(Arc::clone(&gateway)),
            analysis: AnalysisRole::new(gateway),
            translator: GranularityTranslator::new(),
            profile,
            effector,
            recorder,
            facts: FactSet::new(),
            decompose_retries: 3,
        }
    }

    pub fn with_router(mut self, router: TaskRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_decompose_retries(mut self, retries: u32) -> Self {
        self.decompose_retries = retries;
        self
    }

    /// Seed the mission's physical fact state.
    pub fn seed_facts(&mut self, facts: FactSet) {
        self.facts.extend(facts);
    }

    pub fn facts(&self) -> &FactSet {
        &self.facts
    }

    pub fn recorder(&self) -> &CotRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut CotRecorder {
        &mut self.recorder
    }

    /// Run one mission. A CoT data point is recorded in every case; the
    /// return value is the mission verdict only.
    pub async fn run(&mut self, goal: &str, domain_text: &str) -> Result<bool> {
        self.recorder.start(goal, &self.profile.name);

        let success = match self.router.route(goal) {
            Route::Nerves => {
                info!(goal, "routed directly to Nerves");
                self.run_nerves_task(goal, domain_text).await?
            }
            Route::Brain => {
                info!(goal, "routed to Brain");
                self.run_brain_mission(goal, domain_text).await?
            }
        };

        info!(goal, success, "mission finished");
        Ok(success)
    }

    async fn run_brain_mission(&mut self, goal: &str, domain_text: &str) -> Result<bool> {
        let templates = action_templates(domain_text);
        let logical_env = self.logical_env();

        let chain = match self
            .brain
            .decompose_task(goal, &self.facts, &templates, &self.profile, None)
            .await
        {
            Ok(chain) => chain,
            Err(e) => {
                let hint = self
                    .analysis
                    .brain_failure(goal, Some(&self.facts), &[], "decomposition", &e.to_string())
                    .await
                    .unwrap_or_else(|_| e.to_string());
                self.recorder
                    .record_brain_error(logical_env, Vec::new(), hint)?;
                return Ok(false);
            }
        };

        for (index, task) in chain.iter().enumerate() {
            let env_before = self.logical_env();
            if self.run_nerves_task(task, domain_text).await? {
                self.recorder
                    .record_brain_success(env_before, vec![task.clone()], None)?;
            } else {
                let hint = self
                    .analysis
                    .brain_failure(
                        goal,
                        Some(&self.facts),
                        &chain,
                        task,
                        "subtask failed at the Nerves layer",
                    )
                    .await
                    .unwrap_or_else(|e| e.to_string());
                self.recorder
                    .record_brain_error(env_before, chain[index..].to_vec(), hint)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Expand one task into atomic actions and execute them, retrying the
    /// decomposition with Analysis hints on failure.
    async fn run_nerves_task(&mut self, task: &str, domain_text: &str) -> Result<bool> {
        let arities = action_arities(domain_text);
        let mut hint: Option<String> = None;

        for attempt in 0..self.decompose_retries {
            let chain = match self
                .nerves
                .decompose_action(task, &self.facts, domain_text, &self.profile, hint.clone())
                .await
            {
                Ok(chain) => chain,
                Err(e) => {
                    let diagnosis = self
                        .analysis
                        .nerves_failure(
                            task,
                            Some(&self.facts),
                            &[],
                            "decomposition",
                            &e.to_string(),
                        )
                        .await
                        .unwrap_or_else(|_| e.to_string());
                    self.recorder.record_nerves_error(
                        task,
                        self.physical_env(),
                        Vec::new(),
                        diagnosis,
                    )?;
                    return Ok(false);
                }
            };

            // Static domain check before touching the world: every action
            // must exist with the right arity.
            if let Err(reason) = check_against_domain(&chain, &arities) {
                warn!(attempt, %reason, "chain rejected by domain check");
                hint = Some(reason);
                continue;
            }

            let env_before = self.physical_env();
            match self.execute_chain(&chain).await {
                Ok(()) => {
                    self.recorder
                        .record_nerves_success(task, env_before, chain)?;
                    return Ok(true);
                }
                Err((failed_at, message)) => {
                    let diagnosis = self
                        .analysis
                        .nerves_failure(task, Some(&self.facts), &chain, &failed_at, &message)
                        .await
                        .unwrap_or(message);
                    self.recorder.record_nerves_error(
                        task,
                        env_before,
                        chain,
                        diagnosis.clone(),
                    )?;
                    hint = Some(diagnosis);
                }
            }
        }
        Ok(false)
    }

    /// Execute a chain in order, applying deltas synchronously. Returns the
    /// failing invocation and message on the first failure.
    async fn execute_chain(&mut self, chain: &[String]) -> std::result::Result<(), (String, String)> {
        for invocation in chain {
            let result = self.effector.execute(invocation).await;
            match result {
                tools::ExecutionResult::Success { delta, .. } => {
                    delta.apply(&mut self.facts);
                }
                tools::ExecutionResult::Failure { message } => {
                    return Err((invocation.clone(), message));
                }
            }
        }
        Ok(())
    }

    /// Environment string in the physical (Nerves) namespace.
    fn physical_env(&self) -> String {
        self.facts
            .iter()
            .filter(|f| !f.is_comment())
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Environment string in the logical (Brain) namespace.
    fn logical_env(&self) -> String {
        self.translator
            .downsample(&self.facts, None)
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Render `?`-parameterized templates for every domain action.
fn action_templates(domain_text: &str) -> Vec<String> {
    action_arities(domain_text)
        .into_iter()
        .map(|(name, arity)| {
            let params: Vec<String> = (0..arity).map(|i| format!("?a{}", i)).collect();
            if params.is_empty() {
                format!("({})", name)
            } else {
                format!("({} {})", name, params.join(" "))
            }
        })
        .collect()
}

/// Reject chains referencing unknown actions or wrong arities.
fn check_against_domain(
    chain: &[String],
    arities: &std::collections::BTreeMap<String, usize>,
) -> std::result::Result<(), String> {
    for invocation in chain {
        let inner = invocation
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')');
        let mut parts = inner.split_whitespace();
        let Some(head) = parts.next() else {
            return Err(format!("empty invocation '{}'", invocation));
        };
        let Some(expected) = arities.get(head) else {
            return Err(format!("action '{}' is not declared in the domain", head));
        };
        let got = parts.count();
        if got != *expected {
            return Err(format!(
                "action '{}' takes {} argument(s), got {}",
                head, expected, got
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelligence::ScriptedGateway;
    use pddl::Fact;
    use tools::registry::SkillRegistry;
    use tools::transport::LocalTransport;

    const DOMAIN: &str = "(define (domain file-manager)\n  (:action scan :parameters (?d - folder) :effect (and (scanned ?d)))\n  (:action move :parameters (?f - file ?a - folder ?b - folder) :effect (and))\n  (:action get_admin :parameters () :effect (and (has_admin_rights)))\n)";

    fn facts(items: &[&str]) -> FactSet {
        items.iter().map(|s| Fact::parse(s).unwrap()).collect()
    }

    async fn runner(
        responses: Vec<&str>,
        files: &[&str],
    ) -> (tempfile::TempDir, MissionRunner) {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        tokio::fs::create_dir_all(storage.join("backup")).await.unwrap();
        for file in files {
            tokio::fs::write(storage.join(file), b"x").await.unwrap();
        }

        let registry = Arc::new(SkillRegistry::new());
        let transport = Arc::new(LocalTransport::new(registry, storage));
        let effector = Arc::new(EffectorGateway::new(transport, 5));
        let gateway = Arc::new(ScriptedGateway::new(responses));
        let recorder = CotRecorder::new(dir.path().join("cot"));

        let runner = MissionRunner::new(
            gateway,
            effector,
            DomainProfile::file_management(),
            recorder,
        );
        (dir, runner)
    }

    #[tokio::test]
    async fn test_nerves_direct_mission() {
        // Scenario: whitelist verb, no ambiguity; Nerves emits one action.
        let (_dir, mut runner) = runner(vec!["(move file1 root backup)"], &["file1"]).await;
        runner.seed_facts(facts(&[
            "(has_admin_rights)",
            "(at file1 root)",
            "(connected root backup)",
        ]));

        let success = runner.run("移动 file1 到 backup", DOMAIN).await.unwrap();
        assert!(success);

        let point = runner.recorder().current().unwrap();
        assert_eq!(point.nerves.len(), 1);
        assert_eq!(point.nerves[0].chain_of_action, vec!["(move file1 root backup)"]);
        assert!(point.brain.is_empty());
        assert_eq!(point.error_count(), 0);

        // Delta applied to mission state.
        assert!(runner.facts().contains(&Fact::parse("(at file1 backup)").unwrap()));
        assert!(!runner.facts().contains(&Fact::parse("(at file1 root)").unwrap()));
    }

    #[tokio::test]
    async fn test_brain_routed_two_step_mission() {
        // Scenario: connective forces Brain; two tasks, each expanded by
        // Nerves into a single action.
        let (_dir, mut runner) = runner(
            vec![
                // Brain decomposition
                "(scan root)\n(move file1 root backup)",
                // Nerves expansion of task 1
                "(scan root)",
                // Nerves expansion of task 2
                "(move file1 root backup)",
            ],
            &["file1"],
        )
        .await;
        runner.seed_facts(facts(&[
            "(has_admin_rights)",
            "(at file1 root)",
            "(connected root backup)",
        ]));

        let success = runner
            .run("如果 root 下有文件则移动到 backup", DOMAIN)
            .await
            .unwrap();
        assert!(success);

        let point = runner.recorder().current().unwrap();
        assert_eq!(point.brain.len(), 2);
        assert_eq!(point.nerves.len(), 2);
        assert_eq!(point.error_count(), 0);
        // Brain envs are in the logical namespace.
        assert!(point.brain[0].env.contains("(has_permission)"));
        assert!(point.brain[0].env.contains("(located file1 root)"));
    }

    #[tokio::test]
    async fn test_nerves_failure_is_diagnosed_and_recorded() {
        let (_dir, mut runner) = runner(
            vec![
                // Three decompositions naming a missing file...
                "(move ghost root backup)",
                "the file is missing, scan first",
                "(move ghost root backup)",
                "the file is missing, scan first",
                "(move ghost root backup)",
                "the file is missing, scan first",
            ],
            &[],
        )
        .await;
        runner.seed_facts(facts(&["(at ghost root)", "(connected root backup)"]));

        let success = runner.run("移动 ghost 到 backup", DOMAIN).await.unwrap();
        assert!(!success);

        let point = runner.recorder().current().unwrap();
        assert!(point.nerves.is_empty());
        assert_eq!(point.nerves_errors.len(), 3);
        assert!(point.nerves_errors[0]
            .error_message
            .contains("scan first"));
    }

    #[tokio::test]
    async fn test_missing_capability_yields_diagnosed_brain_error() {
        // The goal needs compress, which the domain lacks; the Brain role
        // exhausts its retries and the Analysis diagnosis lands in the
        // BrainError array.
        let (_dir, mut runner) = runner(
            vec![
                "(compress root)",
                "(compress root)",
                "(compress root)",
                "the domain has no compress capability; a new skill is required",
            ],
            &[],
        )
        .await;
        runner.seed_facts(facts(&["(has_admin_rights)", "(scanned root)"]));

        let success = runner.run("如果可以请压缩 root 目录", DOMAIN).await.unwrap();
        assert!(!success);

        let point = runner.recorder().current().unwrap();
        assert!(point.nerves.is_empty());
        assert_eq!(point.brain_errors.len(), 1);
        assert!(point.brain_errors[0]
            .error_message
            .contains("new skill is required"));
    }

    #[tokio::test]
    async fn test_chain_with_undeclared_action_never_executes() {
        let (_dir, mut runner) = runner(
            vec![
                // compress is not in the domain: rejected before execution,
                // retried with the rejection as hint.
                "(compress file1 root archive1)",
                "(scan root)",
            ],
            &[],
        )
        .await;
        runner.seed_facts(facts(&["(has_admin_rights)", "(at file1 root)"]));

        let success = runner.run("扫描root文件夹", DOMAIN).await.unwrap();
        assert!(success);

        let point = runner.recorder().current().unwrap();
        assert_eq!(point.nerves.len(), 1);
        assert_eq!(point.nerves[0].chain_of_action, vec!["(scan root)"]);
    }

    #[test]
    fn test_check_against_domain_arity() {
        let arities = action_arities(DOMAIN);
        assert!(check_against_domain(&["(scan root)".to_string()], &arities).is_ok());
        assert!(check_against_domain(&["(scan)".to_string()], &arities).is_err());
        assert!(check_against_domain(&["(teleport a b)".to_string()], &arities).is_err());
    }

    #[test]
    fn test_action_templates_render_placeholders() {
        let templates = action_templates(DOMAIN);
        assert!(templates.contains(&"(get_admin)".to_string()));
        assert!(templates.contains(&"(scan ?a0)".to_string()));
        assert!(templates.contains(&"(move ?a0 ?a1 ?a2)".to_string()));
    }
}
