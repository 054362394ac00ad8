//! Effector gateway.
//!
//! Stateful façade between the kernel and the tool transport: parses planner
//! invocations, maps positional args to named parameters, enforces the
//! per-call timeout, turns structured responses into deltas, and keeps the
//! ordered execution history the evolution audit slices.

use crate::params::ParameterMapper;
use crate::transport::{ConnectionState, ToolTransport};
use common::{async_trait, Module, Result};
use parking_lot::Mutex;
use pddl::Delta;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one action execution.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Success { message: String, delta: Delta },
    Failure { message: String },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ExecutionResult::Success { message, .. } => message,
            ExecutionResult::Failure { message } => message,
        }
    }

    pub fn delta(&self) -> Option<&Delta> {
        match self {
            ExecutionResult::Success { delta, .. } => Some(delta),
            ExecutionResult::Failure { .. } => None,
        }
    }
}

/// Gateway dispatching atomic actions to skills.
pub struct EffectorGateway {
    transport: Arc<dyn ToolTransport>,
    mapper: ParameterMapper,
    call_timeout: Duration,
    history: Mutex<Vec<String>>,
}

impl EffectorGateway {
    pub fn new(transport: Arc<dyn ToolTransport>, call_timeout_secs: u64) -> Self {
        Self {
            transport,
            mapper: ParameterMapper::new(),
            call_timeout: Duration::from_secs(call_timeout_secs),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Execute one action invocation: `name arg1 arg2 …`, outer parens
    /// tolerated. Failures are encoded in the result, never raised.
    pub async fn execute(&self, invocation: &str) -> ExecutionResult {
        let cleaned = invocation
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')');
        let mut parts = cleaned.split_whitespace();
        let Some(name) = parts.next() else {
            return ExecutionResult::Failure {
                message: "empty action invocation".to_string(),
            };
        };
        let name = name.to_lowercase();
        let args: Vec<&str> = parts.collect();

        self.history.lock().push(name.clone());

        if self.transport.state() != ConnectionState::Connected {
            if let Err(e) = self.transport.connect().await {
                return ExecutionResult::Failure {
                    message: format!("tool transport unavailable: {}", e),
                };
            }
        }

        let arguments = self.mapper.map(&name, &args);
        debug!(action = %name, args = ?arguments, "dispatching action");

        let response = match tokio::time::timeout(
            self.call_timeout,
            self.transport.call_tool(&name, &arguments),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(action = %name, error = %e, "tool call failed");
                return ExecutionResult::Failure {
                    message: e.to_string(),
                };
            }
            Err(_) => {
                warn!(action = %name, "tool call timeout");
                return ExecutionResult::Failure {
                    message: format!("timeout executing {}", name),
                };
            }
        };

        if !response.is_success() {
            return ExecutionResult::Failure {
                message: response
                    .metadata
                    .error
                    .unwrap_or_else(|| "skill reported an error".to_string()),
            };
        }

        let delta_text = response.metadata.pddl_delta.unwrap_or_default();
        match Delta::parse(&delta_text) {
            Ok(delta) => ExecutionResult::Success {
                message: response
                    .metadata
                    .message
                    .unwrap_or(response.human_readable),
                delta,
            },
            Err(e) => {
                // Malformed delta rejects the action wholesale; state stays
                // untouched.
                warn!(action = %name, error = %e, "malformed delta rejected");
                ExecutionResult::Failure {
                    message: format!("malformed delta from {}: {}", name, e),
                }
            }
        }
    }

    /// Ordered lower-cased action names executed so far.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// History length, used as the evolution audit baseline.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Immutable snapshot of the history (alias of [`history`] for audit
    /// call sites).
    pub fn snapshot(&self) -> Vec<String> {
        self.history()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Redirect all subsequent skill I/O to a different storage root.
    pub fn set_storage_root(&self, root: PathBuf) {
        self.transport.set_storage_root(root);
    }

    /// Names of the tools currently reachable through the transport.
    pub async fn available_skills(&self) -> Result<Vec<String>> {
        let tools = self.transport.list_tools().await?;
        Ok(tools.into_iter().map(|t| t.name).collect())
    }

    pub fn transport(&self) -> &Arc<dyn ToolTransport> {
        &self.transport
    }
}

#[async_trait]
impl Module for EffectorGateway {
    fn name(&self) -> &str {
        "effector"
    }

    async fn initialize(&mut self) -> Result<()> {
        info!("connecting effector transport");
        self.transport.connect().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("disconnecting effector transport");
        self.transport.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SkillRegistry;
    use crate::transport::LocalTransport;
    use pddl::Fact;

    async fn effector_over(dir: &tempfile::TempDir) -> EffectorGateway {
        let registry = Arc::new(SkillRegistry::new());
        let transport = Arc::new(LocalTransport::new(registry, dir.path().to_path_buf()));
        EffectorGateway::new(transport, 5)
    }

    #[tokio::test]
    async fn test_execute_move_applies_mapping_and_delta() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("file1"), b"x").await.unwrap();
        tokio::fs::create_dir(dir.path().join("backup")).await.unwrap();

        let effector = effector_over(&dir).await;
        let result = effector.execute("(move file1 root backup)").await;

        let ExecutionResult::Success { delta, .. } = result else {
            panic!("move should succeed: {:?}", result.message());
        };
        assert!(delta.del.contains(&Fact::parse("(at file1 root)").unwrap()));
        assert!(delta.add.contains(&Fact::parse("(at file1 backup)").unwrap()));
        assert_eq!(effector.history(), vec!["move"]);
    }

    #[tokio::test]
    async fn test_execute_unknown_skill_fails() {
        let dir = tempfile::tempdir().unwrap();
        let effector = effector_over(&dir).await;

        let result = effector.execute("teleport file1 root backup").await;
        assert!(!result.is_success());
        assert!(result.message().contains("unknown skill"));
        // The attempt is still recorded.
        assert_eq!(effector.history(), vec!["teleport"]);
    }

    #[tokio::test]
    async fn test_history_is_lowercased_and_clearable() {
        let dir = tempfile::tempdir().unwrap();
        let effector = effector_over(&dir).await;

        effector.execute("(GET_ADMIN)").await;
        effector.execute("scan root").await;
        assert_eq!(effector.history(), vec!["get_admin", "scan"]);
        assert_eq!(effector.history_len(), 2);

        effector.clear_history();
        assert!(effector.history().is_empty());
    }

    #[tokio::test]
    async fn test_skill_error_is_failure_without_delta() {
        let dir = tempfile::tempdir().unwrap();
        let effector = effector_over(&dir).await;

        let result = effector.execute("move ghost root backup").await;
        assert!(!result.is_success());
        assert!(result.delta().is_none());
    }

    #[tokio::test]
    async fn test_storage_root_redirect() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        tokio::fs::write(second.path().join("elsewhere.txt"), b"x")
            .await
            .unwrap();

        let effector = effector_over(&first).await;
        effector.set_storage_root(second.path().to_path_buf());

        let result = effector.execute("scan root").await;
        let ExecutionResult::Success { delta, .. } = result else {
            panic!("scan should succeed");
        };
        assert!(delta
            .add
            .contains(&Fact::parse("(at elsewhere_dot_txt root)").unwrap()));
    }
}
