//! Effector framework for the CoT agent.
//!
//! This crate provides the skill system the planner's actions execute
//! through: the [`Skill`] trait and its built-in implementations, the
//! discovery registry with its sandbox manifest pool, the tool transport, the
//! effector gateway facade, and the sandbox manager owning per-attempt
//! working directories.

use common::{async_trait, escape, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub mod effector;
pub mod manifest;
pub mod params;
pub mod registry;
pub mod sandbox;
pub mod skills;
pub mod transport;

pub use effector::{EffectorGateway, ExecutionResult};
pub use manifest::{ManifestSkill, SkillManifest};
pub use registry::{SkillRegistry, SANDBOX_MCP_SKILLS_DIR_ENV};
pub use sandbox::{SandboxManager, SandboxPaths};
pub use transport::{ConnectionState, LocalTransport, StdioTransport, ToolDescriptor, ToolTransport};

/// Executable unit bound to an action schema.
///
/// A skill owns no state; its sole authority is to produce a delta string and
/// a human-readable message, expressed over the escaped namespace.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Skill name; matches the PDDL action name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON-Schema for the named arguments.
    fn input_schema(&self) -> Value;

    /// Execute against the storage jail with named arguments.
    async fn execute(
        &self,
        jail: &StorageJail,
        args: &serde_json::Map<String, Value>,
    ) -> SkillResponse;
}

/// Structured skill response, matching the tool-transport wire schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillResponse {
    pub human_readable: String,
    pub metadata: SkillMetadata,
}

/// Response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pddl_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillResponse {
    /// Successful execution with a delta over the escaped namespace.
    pub fn success(message: impl Into<String>, pddl_delta: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            human_readable: message.clone(),
            metadata: SkillMetadata {
                status: "success".to_string(),
                message: Some(message),
                pddl_delta: Some(pddl_delta.into()),
                error: None,
            },
        }
    }

    /// Failed execution.
    pub fn error(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            human_readable: reason.clone(),
            metadata: SkillMetadata {
                status: "error".to_string(),
                message: None,
                pddl_delta: None,
                error: Some(reason),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.metadata.status == "success"
    }
}

/// Escape-aware path resolver confining all skill I/O under one storage root.
///
/// The logical folder `root` is the jail root itself; any other folder is a
/// direct child. Identifiers are unescaped (`_dot_` back to `.`) exactly
/// here, at the file-system boundary.
#[derive(Debug, Clone)]
pub struct StorageJail {
    root: PathBuf,
}

impl StorageJail {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical directory for a logical folder name.
    pub fn folder_path(&self, folder: &str) -> Result<PathBuf> {
        let folder = check_component(folder)?;
        if folder == "root" {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(escape::unescape(&folder)))
        }
    }

    /// Physical path for a logical file inside a logical folder.
    pub fn file_path(&self, folder: &str, name: &str) -> Result<PathBuf> {
        let name = check_component(name)?;
        Ok(self.folder_path(folder)?.join(escape::unescape(&name)))
    }
}

fn check_component(part: &str) -> Result<String> {
    let part = part.trim();
    if part.is_empty() {
        return Err(Error::Validation("empty path component".to_string()));
    }
    if part.contains('/') || part.contains('\\') || part.contains("..") {
        return Err(Error::Validation(format!(
            "path component escapes the storage jail: {}",
            part
        )));
    }
    Ok(part.to_string())
}
