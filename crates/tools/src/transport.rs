//! Tool transport.
//!
//! The effector gateway talks to skills through [`ToolTransport`]:
//! `LocalTransport` executes registry skills in-process and is the default;
//! `StdioTransport` speaks newline-delimited JSON-RPC to a child-process tool
//! server. Both maintain the connection state machine
//! `Disconnected → Connecting → Connected → Error`; disconnect is idempotent
//! and a disconnect timeout forces a state reset without propagating.

use crate::registry::SkillRegistry;
use crate::{SkillResponse, StorageJail};
use common::{async_trait, Error, Result};
use config::TransportConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Description of one callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Transport seam between the effector and the skills.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn state(&self) -> ConnectionState;
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;
    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<SkillResponse>;
    /// Point subsequent calls at a different storage root.
    fn set_storage_root(&self, root: PathBuf);
}

/// In-process transport executing registry skills directly.
pub struct LocalTransport {
    registry: Arc<SkillRegistry>,
    jail: Mutex<StorageJail>,
    state: Mutex<ConnectionState>,
}

impl LocalTransport {
    pub fn new(registry: Arc<SkillRegistry>, storage_root: PathBuf) -> Self {
        Self {
            registry,
            jail: Mutex::new(StorageJail::new(storage_root)),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }
}

#[async_trait]
impl ToolTransport for LocalTransport {
    async fn connect(&self) -> Result<()> {
        *self.state.lock() = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.state.lock() = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        // Listing is the hot-reload observation point.
        self.registry.reload_if_changed();
        Ok(self
            .registry
            .names()
            .into_iter()
            .filter_map(|name| self.registry.get(&name))
            .map(|skill| ToolDescriptor {
                name: skill.name().to_string(),
                description: skill.description().to_string(),
                input_schema: skill.input_schema(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<SkillResponse> {
        self.registry.reload_if_changed();
        let skill = self
            .registry
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("unknown skill: {}", name)))?;
        let jail = self.jail.lock().clone();
        Ok(skill.execute(&jail, args).await)
    }

    fn set_storage_root(&self, root: PathBuf) {
        *self.jail.lock() = StorageJail::new(root);
    }
}

struct StdioSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

/// JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    config: TransportConfig,
    state: Mutex<ConnectionState>,
    session: tokio::sync::Mutex<Option<StdioSession>>,
    storage_root: Mutex<Option<PathBuf>>,
}

impl StdioTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            session: tokio::sync::Mutex::new(None),
            storage_root: Mutex::new(None),
        }
    }

    async fn request(
        &self,
        session: &mut StdioSession,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        session.next_id += 1;
        let id = session.next_id;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let exchange = async {
            session.stdin.write_all(line.as_bytes()).await?;
            session.stdin.flush().await?;

            let mut buf = String::new();
            loop {
                buf.clear();
                let read = session.stdout.read_line(&mut buf).await?;
                if read == 0 {
                    return Err(Error::ExternalService(
                        "tool server closed its stdout".to_string(),
                    ));
                }
                let response: Value = match serde_json::from_str(buf.trim()) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if response.get("id").and_then(Value::as_u64) != Some(id) {
                    continue;
                }
                if let Some(error) = response.get("error") {
                    return Err(Error::ExternalService(format!(
                        "tool server error: {}",
                        error
                    )));
                }
                return Ok(response.get("result").cloned().unwrap_or(Value::Null));
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::Timeout(format!("{} timed out", method)))?
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }
        *self.state.lock() = ConnectionState::Connecting;

        let mut cmd = tokio::process::Command::new(&self.config.server_command);
        cmd.args(&self.config.server_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(root) = self.storage_root.lock().clone() {
            cmd.env("SANDBOX_STORAGE_PATH", root);
        }

        let spawn = async {
            let mut child = cmd
                .spawn()
                .map_err(|e| Error::ExternalService(format!("cannot spawn tool server: {}", e)))?;
            let stdin = child.stdin.take().ok_or_else(|| {
                Error::ExternalService("tool server has no stdin".to_string())
            })?;
            let stdout = child.stdout.take().ok_or_else(|| {
                Error::ExternalService("tool server has no stdout".to_string())
            })?;
            Ok::<_, Error>(StdioSession {
                child,
                stdin,
                stdout: BufReader::new(stdout),
                next_id: 0,
            })
        };

        let mut new_session = match tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            spawn,
        )
        .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                *self.state.lock() = ConnectionState::Error;
                return Err(e);
            }
            Err(_) => {
                *self.state.lock() = ConnectionState::Error;
                return Err(Error::Timeout("tool server connect timed out".to_string()));
            }
        };

        // Session initialization handshake.
        let init = self
            .request(
                &mut new_session,
                "initialize",
                json!({}),
                Duration::from_secs(self.config.session_init_timeout_secs),
            )
            .await;
        if let Err(e) = init {
            *self.state.lock() = ConnectionState::Error;
            let _ = new_session.child.kill().await;
            return Err(e);
        }

        info!("tool server connected");
        *session = Some(new_session);
        *self.state.lock() = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(mut live) = session.take() else {
            // Idempotent: disconnecting while disconnected is a no-op.
            *self.state.lock() = ConnectionState::Disconnected;
            return Ok(());
        };

        let timeout = Duration::from_secs(self.config.disconnect_timeout_secs);
        match tokio::time::timeout(timeout, live.child.kill()).await {
            Ok(Ok(())) => debug!("tool server stopped"),
            Ok(Err(e)) => warn!(error = %e, "tool server kill failed, state reset anyway"),
            Err(_) => warn!("tool server disconnect timed out, state reset anyway"),
        }
        *self.state.lock() = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.connect().await?;
        let mut session = self.session.lock().await;
        let live = session
            .as_mut()
            .ok_or_else(|| Error::Internal("no live tool session".to_string()))?;

        let result = self
            .request(
                live,
                "tools/list",
                json!({}),
                Duration::from_secs(self.config.tool_list_timeout_secs),
            )
            .await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(tools)?)
    }

    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<SkillResponse> {
        self.connect().await?;
        let mut session = self.session.lock().await;
        let live = session
            .as_mut()
            .ok_or_else(|| Error::Internal("no live tool session".to_string()))?;

        let result = self
            .request(
                live,
                "tools/call",
                json!({"name": name, "arguments": args}),
                Duration::from_secs(self.config.tool_call_timeout_secs),
            )
            .await?;

        // Responses arrive as [{type: "text", text: "<json SkillResponse>"}].
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Parse("tool response carried no text content".to_string())
            })?;
        Ok(serde_json::from_str(text)?)
    }

    fn set_storage_root(&self, root: PathBuf) {
        *self.storage_root.lock() = Some(root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_transport_lists_and_calls() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"x").await.unwrap();

        let registry = Arc::new(SkillRegistry::new());
        let transport = LocalTransport::new(registry, dir.path().to_path_buf());

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        transport.connect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);

        let tools = transport.list_tools().await.unwrap();
        assert!(tools.iter().any(|t| t.name == "scan"));

        let mut args = Map::new();
        args.insert("folder".to_string(), json!("root"));
        let response = transport.call_tool("scan", &args).await.unwrap();
        assert!(response.is_success());

        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        // Idempotent disconnect.
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_transport_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::new());
        let transport = LocalTransport::new(registry, dir.path().to_path_buf());

        let result = transport.call_tool("frobnicate", &Map::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_transport_storage_root_switch() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        tokio::fs::write(second.path().join("only_here.txt"), b"x")
            .await
            .unwrap();

        let registry = Arc::new(SkillRegistry::new());
        let transport = LocalTransport::new(registry, first.path().to_path_buf());
        transport.set_storage_root(second.path().to_path_buf());

        let mut args = Map::new();
        args.insert("folder".to_string(), json!("root"));
        let response = transport.call_tool("scan", &args).await.unwrap();
        assert!(response
            .metadata
            .pddl_delta
            .unwrap()
            .contains("only_here_dot_txt"));
    }

    #[tokio::test]
    async fn test_stdio_disconnect_without_connect_is_noop() {
        let transport = StdioTransport::new(TransportConfig::default());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }
}
