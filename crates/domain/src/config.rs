//! Process configuration.
//!
//! Loaded from a TOML file (see `cli::load_config`) with every field
//! defaulted, so an empty or partial file is always valid. Config values
//! only ever supply *process defaults*; a thread's own `Config` row (see
//! the `db` crate) overrides them per-conversation where the spec allows.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub blobstore: BlobstoreConfig,
    pub artifacts: ArtifactsConfig,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            blobstore: BlobstoreConfig::default(),
            artifacts: ArtifactsConfig::default(),
            agent: AgentConfig::default(),
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Config {
    /// Run startup validation, returning a list of issues. Callers decide
    /// whether to abort (on any `Error` severity) or just log warnings.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.artifacts.secret().is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "{} is not set — download tokens will be signed with an \
                     ephemeral in-process secret and will not validate across restarts",
                    self.artifacts.secret_env
                ),
            });
        }

        if self.blobstore.max_artifact_size_mb == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "blobstore.max_artifact_size_mb must be > 0".into(),
            });
        }

        if self.agent.context_window == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "agent.context_window must be > 0".into(),
            });
        }

        if self.llm.providers.is_empty() && self.llm.startup_policy == LlmStartupPolicy::RequireOne
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "llm.startup_policy = require_one but no providers configured".into(),
            });
        }

        issues
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Env var holding the bearer token required on protected routes.
    /// Unset/empty env var disables auth (dev mode).
    pub api_token_env: String,
    pub cors: CorsConfig,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_api_token_env(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3210
}
fn d_api_token_env() -> String {
    "GATEWAY_API_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:*".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlx` connection URL, e.g. `sqlite://./data/gateway.db`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/gateway.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blob store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobstoreConfig {
    pub dir: PathBuf,
    pub max_artifact_size_mb: u64,
}

impl Default for BlobstoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/blobs"),
            max_artifact_size_mb: 50,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Download tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Env var holding the HMAC secret used to sign download tokens.
    pub secret_env: String,
    pub token_ttl_seconds: u64,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            secret_env: "ARTIFACTS_SECRET".into(),
            token_ttl_seconds: 24 * 3600,
        }
    }
}

impl ArtifactsConfig {
    pub fn secret(&self) -> Option<String> {
        std::env::var(&self.secret_env)
            .ok()
            .filter(|s| !s.is_empty())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub default_model: String,
    pub default_temperature: f32,
    pub context_window: u32,
    /// Process-default system-prompt preamble; a thread's own config may
    /// append to (not replace) this.
    pub system_prompt: String,
    /// Summarization hop kicks in once `token_count >= compaction_threshold
    /// * effective_context_window`.
    pub compaction_threshold: f32,
    /// Number of most-recent messages preserved verbatim across a
    /// summarization hop.
    pub keep_last_messages: usize,
    pub max_tool_loops: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: "openai/gpt-4o-mini".into(),
            default_temperature: 0.2,
            context_window: 30_000,
            system_prompt: "You are a helpful assistant with access to a sandboxed \
                code-execution tool. Use it when asked to compute, analyze data, \
                or produce files."
                .into(),
            compaction_threshold: 0.9,
            keep_last_messages: 4,
            max_tool_loops: 25,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub providers: Vec<ProviderConfig>,
    /// role name -> "<provider_id>/<model>", e.g. `"summarizer" -> "openai/gpt-4o-mini"`.
    pub roles: HashMap<String, RoleConfig>,
    pub startup_policy: LlmStartupPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            roles: HashMap::new(),
            startup_policy: LlmStartupPolicy::AllowNone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    AllowNone,
    RequireOne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "d_provider_timeout")]
    pub timeout_secs: u64,
}

fn d_provider_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    AzureOpenai,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub key: Option<String>,
    pub env: Option<String>,
    pub keys: Vec<String>,
    pub service: Option<String>,
    pub account: Option<String>,
    pub header: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    Direct,
    Env,
    Keychain,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub image: String,
    pub storage: SessionStorage,
    pub tmpfs_size_mb: u64,
    pub network: Option<String>,
    /// Host path bind-mounted read-only at `/heavy_data` inside every
    /// session container (shared dataset directory).
    pub hybrid_local_path: Option<PathBuf>,
    pub exec_timeout_sec: u64,
    pub container_prefix: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "gateway-sandbox:latest".into(),
            storage: SessionStorage::Ephemeral,
            tmpfs_size_mb: 512,
            network: None,
            hybrid_local_path: None,
            exec_timeout_sec: 30,
            container_prefix: "gw-sandbox-".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStorage {
    Ephemeral,
    Persistent,
}
