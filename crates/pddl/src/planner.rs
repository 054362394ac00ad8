//! Classical planner adapter.
//!
//! Wraps the external planner binary behind the [`Planner`] trait: domain and
//! problem are spooled to temp files, the subprocess runs under a hard
//! timeout, and the outcome is classified from stdout keywords rather than
//! the exit code (the planner returns non-zero on "no solution").

use common::{async_trait, Error, Result};
use config::PlannerConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One step of a parsed plan: the bare invocation text and its 1-based
/// position in the plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub invocation: String,
    pub step: usize,
}

/// Outcome of one planning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningResult {
    Solved(Vec<PlanStep>),
    Failed(PlanFailure),
}

impl PlanningResult {
    pub fn is_solved(&self) -> bool {
        matches!(self, PlanningResult::Solved(_))
    }
}

/// Failure classification per the planner's stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanFailure {
    /// Search finished without a solution
    GoalUnreachable,
    /// PDDL syntax error, with the extracted message
    Syntax(String),
    /// Undefined predicate or type
    Undefined(String),
    /// Planner exceeded the configured timeout (seconds)
    Timeout(u64),
    /// Anything unrecognized
    Other(String),
}

impl std::fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanFailure::GoalUnreachable => write!(
                f,
                "goal unreachable (missing preconditions or wrong initial state)"
            ),
            PlanFailure::Syntax(msg) => write!(f, "PDDL syntax error: {}", msg),
            PlanFailure::Undefined(msg) => write!(f, "undefined predicate/type: {}", msg),
            PlanFailure::Timeout(secs) => write!(f, "planning timed out after {}s", secs),
            PlanFailure::Other(msg) => write!(f, "planner error: {}", msg),
        }
    }
}

/// Planner seam. The subprocess adapter is the production implementation;
/// tests script outcomes through this trait.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Run the planner over a domain/problem pair.
    async fn plan(&self, domain: &str, problem: &str) -> Result<PlanningResult>;

    /// Syntax pre-check: run the translate phase of the planner over the
    /// candidate domain plus a trivial probe problem. `Ok(Err(msg))` means
    /// the domain was rejected.
    async fn validate(&self, domain: &str) -> Result<std::result::Result<(), String>>;
}

/// Adapter around the planner executable.
pub struct SubprocessPlanner {
    config: PlannerConfig,
}

impl SubprocessPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.config.temp_dir.join(name)
    }

    async fn spool(&self, domain: &str, problem: &str) -> Result<(PathBuf, PathBuf)> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let domain_file = self.temp_path("temp_domain.pddl");
        let problem_file = self.temp_path("temp_problem.pddl");
        tokio::fs::write(&domain_file, domain).await?;
        tokio::fs::write(&problem_file, problem).await?;
        Ok((domain_file, problem_file))
    }

    async fn parse_plan_file(&self, path: &PathBuf) -> Result<Vec<PlanStep>> {
        let mut steps = Vec::new();
        if !path.exists() {
            return Ok(steps);
        }
        let content = tokio::fs::read_to_string(path).await?;
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let invocation = line.replace(['(', ')'], "");
            steps.push(PlanStep {
                invocation: invocation.trim().to_string(),
                step: idx + 1,
            });
        }
        Ok(steps)
    }
}

#[async_trait]
impl Planner for SubprocessPlanner {
    async fn plan(&self, domain: &str, problem: &str) -> Result<PlanningResult> {
        let (domain_file, problem_file) = self.spool(domain, problem).await?;
        let plan_file = self.temp_path("sas_plan");
        if plan_file.exists() {
            tokio::fs::remove_file(&plan_file).await?;
        }

        let mut cmd = tokio::process::Command::new(&self.config.runtime);
        cmd.arg(&self.config.entry)
            .arg(&domain_file)
            .arg(&problem_file)
            .arg("--search")
            .arg(&self.config.search_config)
            .current_dir(&self.config.temp_dir)
            .kill_on_drop(true);

        debug!(entry = %self.config.entry.display(), "invoking planner");
        let output = match tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = self.config.timeout_secs, "planner timed out");
                return Ok(PlanningResult::Failed(PlanFailure::Timeout(
                    self.config.timeout_secs,
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if stdout.contains("Solution found.") {
            let steps = self.parse_plan_file(&plan_file).await?;
            info!(steps = steps.len(), "planner found a solution");
            return Ok(PlanningResult::Solved(steps));
        }
        Ok(PlanningResult::Failed(classify_failure(&stdout, &stderr)))
    }

    async fn validate(&self, domain: &str) -> Result<std::result::Result<(), String>> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let domain_file = self.temp_path("syntax_check_domain.pddl");
        let problem_file = self.temp_path("syntax_check_problem.pddl");
        tokio::fs::write(&domain_file, domain).await?;
        tokio::fs::write(&problem_file, probe_problem()).await?;

        let mut cmd = tokio::process::Command::new(&self.config.runtime);
        cmd.arg(&self.config.entry)
            .arg("--translate")
            .arg(&domain_file)
            .arg(&problem_file)
            .current_dir(&self.config.temp_dir)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Ok(Err(format!(
                    "syntax check timed out after {}s",
                    self.config.timeout_secs
                )))
            }
        };

        if output.status.success() {
            Ok(Ok(()))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let msg = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Ok(Err(msg))
        }
    }
}

/// Trivial problem over the domain's core predicates, used only to drive the
/// translate phase during validation.
fn probe_problem() -> &'static str {
    "(define (problem syntax_check) (:domain file-manager) (:objects x - file root - folder) (:init (at x root) (= (total-cost) 0)) (:goal (not (at x root))))"
}

/// Classify a failed run from its combined output.
pub fn classify_failure(stdout: &str, stderr: &str) -> PlanFailure {
    if stdout.contains("Search stopped without finding a solution") {
        return PlanFailure::GoalUnreachable;
    }

    let combined = format!("{}{}", stderr, stdout);
    let lower = combined.to_lowercase();
    if lower.contains("syntax error") || lower.contains("parse error") {
        let re = Regex::new(r"(?is)((?:syntax|parse) error.*?line \d+)").expect("static regex");
        let detail = re
            .captures(&combined)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| "no line information".to_string());
        return PlanFailure::Syntax(detail);
    }
    if lower.contains("undefined") {
        return PlanFailure::Undefined(
            "check that predicates/types match between domain and problem".to_string(),
        );
    }
    PlanFailure::Other(common::utils::truncate(combined.trim(), 200))
}

/// Scripted planner for hermetic tests: pops pre-programmed results in order.
pub struct ScriptedPlanner {
    results: parking_lot::Mutex<std::collections::VecDeque<PlanningResult>>,
    validate_errors: parking_lot::Mutex<std::collections::VecDeque<Option<String>>>,
}

impl ScriptedPlanner {
    pub fn new(results: Vec<PlanningResult>) -> Self {
        Self {
            results: parking_lot::Mutex::new(results.into()),
            validate_errors: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Queue a validation outcome; `None` means the domain passes.
    pub fn push_validation(&self, error: Option<String>) {
        self.validate_errors.lock().push_back(error);
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _domain: &str, _problem: &str) -> Result<PlanningResult> {
        self.results
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Internal("scripted planner exhausted".to_string()))
    }

    async fn validate(&self, _domain: &str) -> Result<std::result::Result<(), String>> {
        match self.validate_errors.lock().pop_front() {
            Some(Some(err)) => Ok(Err(err)),
            _ => Ok(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_goal_unreachable() {
        let failure = classify_failure(
            "Search stopped without finding a solution.\nExiting.",
            "",
        );
        assert_eq!(failure, PlanFailure::GoalUnreachable);
    }

    #[test]
    fn test_classify_syntax_error_with_line() {
        let failure = classify_failure("", "domain.pddl: syntax error at line 12");
        match failure {
            PlanFailure::Syntax(msg) => assert!(msg.contains("line 12")),
            other => panic!("expected syntax failure, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_undefined() {
        let failure = classify_failure("Undefined predicate: frobnicate", "");
        assert!(matches!(failure, PlanFailure::Undefined(_)));
    }

    #[test]
    fn test_classify_unknown() {
        let failure = classify_failure("something exploded", "");
        assert!(matches!(failure, PlanFailure::Other(_)));
    }

    #[tokio::test]
    async fn test_scripted_planner_pops_in_order() {
        let planner = ScriptedPlanner::new(vec![
            PlanningResult::Solved(vec![PlanStep {
                invocation: "scan root".to_string(),
                step: 1,
            }]),
            PlanningResult::Failed(PlanFailure::GoalUnreachable),
        ]);

        assert!(planner.plan("", "").await.unwrap().is_solved());
        assert!(!planner.plan("", "").await.unwrap().is_solved());
        assert!(planner.plan("", "").await.is_err());
    }

    #[tokio::test]
    async fn test_plan_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PlannerConfig::default();
        config.temp_dir = dir.path().to_path_buf();
        let planner = SubprocessPlanner::new(config);

        let plan_path = dir.path().join("sas_plan");
        tokio::fs::write(&plan_path, "(scan root)\n; cost = 2\n(move file1 root backup)\n")
            .await
            .unwrap();

        let steps = planner.parse_plan_file(&plan_path).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].invocation, "scan root");
        assert_eq!(steps[0].step, 1);
        assert_eq!(steps[1].invocation, "move file1 root backup");
        assert_eq!(steps[1].step, 3);
    }
}
