//! Configuration management for the CoT agent.
//!
//! This crate handles all configuration aspects including loading from files,
//! environment variables, and providing a unified configuration interface.
//! Every timeout, retry budget, and path root flows from one record loaded
//! once at startup; only the skill registry's hot-reload pointer is read from
//! the environment at call time.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure (sensitive fields are redacted in debug output)
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Classical planner configuration
    pub planner: PlannerConfig,

    /// Tool transport configuration
    pub transport: TransportConfig,

    /// Kernel iteration budgets
    pub kernel: KernelConfig,

    /// Evolution loop budgets
    pub evolution: EvolutionConfig,

    /// Curriculum proposer budgets
    pub curriculum: CurriculumConfig,

    /// Task router thresholds
    pub router: RouterConfig,

    /// Sandbox and storage paths
    pub sandbox: SandboxConfig,

    /// Active planning domain
    pub domain: DomainConfig,
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("llm", &DebugRedactedLlmConfig(&self.llm))
            .field("planner", &self.planner)
            .field("transport", &self.transport)
            .field("kernel", &self.kernel)
            .field("evolution", &self.evolution)
            .field("curriculum", &self.curriculum)
            .field("router", &self.router)
            .field("sandbox", &self.sandbox)
            .field("domain", &self.domain)
            .finish()
    }
}

/// Wrapper to redact the API key in LlmConfig debug output
struct DebugRedactedLlmConfig<'a>(&'a LlmConfig);

impl<'a> std::fmt::Debug for DebugRedactedLlmConfig<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.0.base_url)
            .field("model", &self.0.model)
            .field("temperature", &self.0.temperature)
            .field("max_tokens", &self.0.max_tokens)
            .finish()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            planner: PlannerConfig::default(),
            transport: TransportConfig::default(),
            kernel: KernelConfig::default(),
            evolution: EvolutionConfig::default(),
            curriculum: CurriculumConfig::default(),
            router: RouterConfig::default(),
            sandbox: SandboxConfig::default(),
            domain: DomainConfig::default(),
        }
    }
}

/// LLM provider settings (OpenAI-compatible chat endpoint)
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Classical planner subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Runtime used to launch the planner entry point (e.g. "python3")
    pub runtime: String,
    /// Planner entry script/binary path
    pub entry: PathBuf,
    /// Search configuration passed after `--search`
    pub search_config: String,
    /// Planning timeout in seconds
    pub timeout_secs: u64,
    /// Directory for spooled domain/problem/plan files
    pub temp_dir: PathBuf,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            runtime: "python3".to_string(),
            entry: PathBuf::from("downward/fast-downward.py"),
            search_config: "lazy_greedy([ff(), landmark_sum(lm_factory=lm_rhw())], cost_type=normal)"
                .to_string(),
            timeout_secs: 30,
            temp_dir: PathBuf::from("temp"),
        }
    }
}

/// Tool transport settings (stdio JSON-RPC client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub server_command: String,
    pub server_args: Vec<String>,
    pub connect_timeout_secs: u64,
    pub session_init_timeout_secs: u64,
    pub tool_list_timeout_secs: u64,
    pub tool_call_timeout_secs: u64,
    pub disconnect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_command: "python3".to_string(),
            server_args: vec!["tool_server.py".to_string()],
            connect_timeout_secs: 5,
            session_init_timeout_secs: 5,
            tool_list_timeout_secs: 5,
            tool_call_timeout_secs: 5,
            disconnect_timeout_secs: 2,
        }
    }
}

/// Kernel iteration budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Outer plan-execute-verify iterations per goal
    pub max_iterations: u32,
    /// Internal retries per Brain/Nerves decomposition
    pub decompose_retries: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            decompose_retries: 3,
        }
    }
}

/// Evolution loop budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Patch attempts before the loop gives up
    pub max_retries: u32,
    /// Kernel iteration budget during sandbox validation
    pub validation_iterations: u32,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            validation_iterations: 5,
        }
    }
}

/// Curriculum proposer budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumConfig {
    pub max_retries: u32,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Task router thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Complexity score above which a task is routed to the Brain layer
    pub complexity_threshold: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 25,
        }
    }
}

/// Sandbox and storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Directory receiving timestamped sandbox runs
    pub runs_dir: PathBuf,
    /// Canonical storage tree mirrored into each sandbox
    pub storage_dir: PathBuf,
    /// Directory holding canonical domain PDDL files
    pub domain_dir: PathBuf,
    /// Output directory for CoT data points
    pub output_dir: PathBuf,
    /// Regression test registry file
    pub regression_registry: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("sandbox_runs"),
            storage_dir: PathBuf::from("workspace"),
            domain_dir: PathBuf::from("pddl_configs"),
            output_dir: PathBuf::from("cot_data"),
            regression_registry: PathBuf::from("pddl_configs/regression_registry.json"),
        }
    }
}

/// Active planning domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Logical domain name used for routing and file lookup
    pub name: String,
    /// PDDL domain identifier used inside problem files
    pub pddl_name: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "file_management".to_string(),
            pddl_name: "file-manager".to_string(),
        }
    }
}

/// CLI-level configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub planner_entry: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub max_iterations: Option<u32>,
}

impl AgentConfig {
    /// Load configuration from a file path
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration with hierarchy: default -> file -> env -> cli
    pub async fn load(config_path: Option<PathBuf>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = AgentConfig::default();

        if let Some(path) = config_path {
            if path.exists() {
                config = Self::from_file(path).await?;
            }
        }

        config.apply_env_overrides();
        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: COT_AGENT_<SECTION>_<KEY>
    /// For example:
    /// - COT_AGENT_LLM_API_KEY - Override LLM API key
    /// - COT_AGENT_LLM_BASE_URL - Override LLM base URL
    /// - COT_AGENT_LLM_MODEL - Override LLM model
    /// - COT_AGENT_PLANNER_ENTRY - Override planner entry path
    /// - COT_AGENT_PLANNING_TIMEOUT - Override planning timeout (seconds)
    /// - COT_AGENT_TOOL_CALL_TIMEOUT - Override tool-call timeout (seconds)
    /// - COT_AGENT_MAX_ITERATIONS - Override kernel iteration budget
    /// - COT_AGENT_EVOLUTION_RETRIES - Override evolution retry budget
    fn apply_env_overrides(&mut self) {
        use std::env;

        if let Ok(val) = env::var("COT_AGENT_LLM_API_KEY") {
            self.llm.api_key = val;
        }
        if let Ok(val) = env::var("COT_AGENT_LLM_BASE_URL") {
            self.llm.base_url = val;
        }
        if let Ok(val) = env::var("COT_AGENT_LLM_MODEL") {
            self.llm.model = val;
        }
        if let Ok(val) = env::var("COT_AGENT_PLANNER_ENTRY") {
            self.planner.entry = PathBuf::from(val);
        }
        if let Ok(val) = env::var("COT_AGENT_PLANNING_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.planner.timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("COT_AGENT_TOOL_CALL_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.transport.tool_call_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("COT_AGENT_MAX_ITERATIONS") {
            if let Ok(n) = val.parse() {
                self.kernel.max_iterations = n;
            }
        }
        if let Ok(val) = env::var("COT_AGENT_EVOLUTION_RETRIES") {
            if let Ok(n) = val.parse() {
                self.evolution.max_retries = n;
            }
        }
        if let Ok(val) = env::var("SANDBOX_STORAGE_PATH") {
            self.sandbox.storage_dir = PathBuf::from(val);
        }
    }

    /// Apply CLI overrides
    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(key) = overrides.llm_api_key {
            self.llm.api_key = key;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(entry) = overrides.planner_entry {
            self.planner.entry = entry;
        }
        if let Some(dir) = overrides.storage_dir {
            self.sandbox.storage_dir = dir;
        }
        if let Some(dir) = overrides.output_dir {
            self.sandbox.output_dir = dir;
        }
        if let Some(n) = overrides.max_iterations {
            self.kernel.max_iterations = n;
        }
    }

    /// Validate bootstrap requirements; failures here are fatal
    pub fn validate(&self) -> Result<()> {
        if self.kernel.max_iterations == 0 {
            return Err(Error::Config(
                "kernel.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.evolution.max_retries == 0 {
            return Err(Error::Config(
                "evolution.max_retries must be at least 1".to_string(),
            ));
        }
        if self.domain.name.is_empty() {
            return Err(Error::Config("domain.name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Validate external dependencies (planner entry, API key, domain file).
    ///
    /// Split from [`validate`] so tests with scripted planners/gateways can
    /// construct a config without a live toolchain.
    pub fn validate_runtime(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(Error::Config(
                "LLM API key missing (set COT_AGENT_LLM_API_KEY)".to_string(),
            ));
        }
        if !self.planner.entry.exists() {
            return Err(Error::Config(format!(
                "planner entry not found: {}",
                self.planner.entry.display()
            )));
        }
        let domain_file = self.domain_file_path();
        if !domain_file.exists() {
            return Err(Error::Config(format!(
                "domain file not found: {}",
                domain_file.display()
            )));
        }
        Ok(())
    }

    /// Canonical domain PDDL file for the configured domain
    pub fn domain_file_path(&self) -> PathBuf {
        self.sandbox.domain_dir.join(format!("{}.pddl", self.domain.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let config = AgentConfig::default();
        assert_eq!(config.kernel.max_iterations, 5);
        assert_eq!(config.kernel.decompose_retries, 3);
        assert_eq!(config.evolution.max_retries, 4);
        assert_eq!(config.curriculum.max_retries, 3);
        assert_eq!(config.planner.timeout_secs, 30);
        assert_eq!(config.transport.tool_call_timeout_secs, 5);
        assert_eq!(config.transport.disconnect_timeout_secs, 2);
        assert_eq!(config.router.complexity_threshold, 25);
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut config = AgentConfig::default();
        config.kernel.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut config = AgentConfig::default();
        config.llm.api_key = "sk-secret".to_string();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<REDACTED>"));
    }

    #[tokio::test]
    async fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        let config = AgentConfig::default();
        let text = toml::to_string(&config).unwrap();
        tokio::fs::write(&path, text).await.unwrap();

        let loaded = AgentConfig::from_file(&path).await.unwrap();
        assert_eq!(loaded.kernel.max_iterations, config.kernel.max_iterations);
        assert_eq!(loaded.domain.name, config.domain.name);
    }

    #[test]
    fn test_domain_file_path() {
        let config = AgentConfig::default();
        assert!(config
            .domain_file_path()
            .to_string_lossy()
            .ends_with("file_management.pddl"));
    }
}
