//! Common types and utilities shared across all crates.
//!
//! This crate provides foundational types, error definitions, and the
//! filename escape discipline used throughout the CoT agent system.

use std::fmt;

/// Re-export commonly used external crates
pub use async_trait::async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use tracing;
pub use uuid;

pub mod escape;

/// Common result type used across the codebase
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the CoT agent
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

/// Unique identifier for missions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MissionId(pub uuid::Uuid);

impl MissionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Short prefix used in generated file names
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp type alias for consistency
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current timestamp
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Module trait for components with a connect/teardown lifecycle
#[async_trait]
pub trait Module: Send + Sync {
    /// Module name
    fn name(&self) -> &str;

    /// Initialize the module
    async fn initialize(&mut self) -> Result<()>;

    /// Shutdown the module
    async fn shutdown(&mut self) -> Result<()>;
}

/// Utility functions
pub mod utils {
    /// Truncate a string to a maximum length
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            s.to_string()
        } else {
            format!("{}...", &s[..max_len.saturating_sub(3)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mission_id_generation() {
        let id1 = MissionId::new();
        let id2 = MissionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_mission_id_short() {
        let id = MissionId::new();
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(utils::truncate("hello", 10), "hello");
        assert_eq!(utils::truncate("hello world", 8), "hello...");
    }
}
