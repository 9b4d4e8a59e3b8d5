//! Gateway configuration.
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults (the `Default` impls below).
//! 2. TOML file at `CINEGRAPH_CONFIG` (default `config/cinegraph.toml`), if it exists.
//! 3. Flat legacy variables: `NEO4J_URL`, `NEO4J_USER`, `NEO4J_PASSWORD`, `NEO4J_DB`, `CSV_PATH`,
//!    `CHROMA_URL`, and the LLM key from `OPENROUTER_API_KEY` / `LLM_API_KEY`.
//! 4. Environment with prefix `CINEGRAPH` and separator `__`, e.g. `CINEGRAPH__GRAPH__URL`.
//!
//! The process environment is read once, in [`GatewayConfig::load`]; everything below it
//! takes the variables as a map.

use crate::router::{RoutingMode, RoutingPolicy, DEFAULT_MAX_TOOL_CALLS};
use crate::tools::ToolKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "CINEGRAPH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/cinegraph.toml";
pub const ENV_PREFIX: &str = "CINEGRAPH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("config serialisation failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// OpenAI-compatible endpoint (OpenRouter by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` and `/embeddings` are appended.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embeddings_model: String,
    /// 0 leaves the provider default.
    pub max_tokens: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            embeddings_model: "sentence-transformers/all-minilm-l6-v2".to_string(),
            max_tokens: 4096,
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Configured key, trimmed; `None` when unset or blank.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }
}

/// Neo4j HTTP endpoint and graph QA knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
    /// HTTP base URL (`bolt://host:7687` is rewritten to `http://host:7474`).
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub query_timeout_secs: u64,
    /// 0 disables schema caching.
    pub schema_ttl_secs: u64,
    /// Phrase answers from rows with the model instead of returning raw rows.
    pub summarize: bool,
    pub max_context_rows: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:7474".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "moviesdb".to_string(),
            query_timeout_secs: 30,
            schema_ttl_secs: 300,
            summarize: true,
            max_context_rows: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub per_column_cap: usize,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./processed_sentiment/character_sentiment.csv"),
            per_column_cap: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Chroma,
    /// In-process index; starts empty.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: bool,
    pub backend: VectorBackend,
    pub url: String,
    pub collection: String,
    pub top_k: usize,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: VectorBackend::Chroma,
            url: "http://localhost:8001".to_string(),
            collection: "movies".to_string(),
            top_k: 5,
            dimension: crate::retrieval::vector::DEFAULT_DIMENSION,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub routing_mode: RoutingMode,
    /// Tie-break order rendered into the system instruction.
    pub priority: Vec<ToolKind>,
    pub max_tool_calls: usize,
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            routing_mode: RoutingMode::Guarded,
            priority: ToolKind::ALL.to_vec(),
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            temperature: 0.0,
        }
    }
}

impl AgentConfig {
    pub fn policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            mode: self.routing_mode,
            priority: self.priority.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub backend: ConversationBackend,
    /// Sled directory when `backend = "sled"`.
    pub path: PathBuf,
    pub default_thread: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            backend: ConversationBackend::Memory,
            path: PathBuf::from("./data/conversations"),
            default_thread: "default-thread".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub tabular: TabularConfig,
    pub vector: VectorConfig,
    pub agent: AgentConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
}

const LEGACY_VARS: [(&str, &str); 6] = [
    ("NEO4J_URL", "GRAPH__URL"),
    ("NEO4J_USER", "GRAPH__USER"),
    ("NEO4J_PASSWORD", "GRAPH__PASSWORD"),
    ("NEO4J_DB", "GRAPH__DATABASE"),
    ("CSV_PATH", "TABULAR__PATH"),
    ("CHROMA_URL", "VECTOR__URL"),
];

/// Flat variables renamed to nested keys. `OPENROUTER_API_KEY` wins over `LLM_API_KEY`.
fn legacy_overrides(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = LEGACY_VARS
        .iter()
        .filter_map(|(var, key)| {
            env.get(*var)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect();
    let api_key = ["OPENROUTER_API_KEY", "LLM_API_KEY"]
        .iter()
        .filter_map(|var| env.get(*var).map(|v| v.trim()))
        .find(|v| !v.is_empty());
    if let Some(key) = api_key {
        out.insert("LLM__API_KEY".to_string(), key.to_string());
    }
    out
}

/// `bolt://host:7687` / `neo4j://host` -> `http://host:7474`; other URLs unchanged.
fn http_graph_url(url: &str) -> String {
    let rest = ["bolt://", "neo4j://", "bolt+s://", "neo4j+s://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', ':']).next().unwrap_or("localhost");
            format!("http://{}:7474", host)
        }
        None => url.to_string(),
    }
}

impl GatewayConfig {
    /// Loads from `CINEGRAPH_CONFIG` (or `config/cinegraph.toml`) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let path = env
            .get(CONFIG_PATH_ENV)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load_with_env(Path::new(&path), &env)
    }

    /// Loads with `path` as the file layer and the process environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_with_env(path, &env)
    }

    /// Loads with `path` as the file layer (skipped when missing) and `env` as the
    /// variable source for both the legacy and the `CINEGRAPH__` layers.
    pub fn load_with_env(path: &Path, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        }

        let built = builder
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .source(Some(legacy_overrides(env))),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("agent.priority")
                    .source(Some(env.clone())),
            )
            .build()?;

        let mut cfg: GatewayConfig = built.try_deserialize()?;
        cfg.graph.url = http_graph_url(&cfg.graph.url);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_tool_calls == 0 {
            return Err(ConfigError::Invalid("agent.max_tool_calls must be at least 1".into()));
        }
        if self.vector.top_k == 0 {
            return Err(ConfigError::Invalid("vector.top_k must be at least 1".into()));
        }
        for (i, kind) in self.agent.priority.iter().enumerate() {
            if self.agent.priority[..i].contains(kind) {
                return Err(ConfigError::Invalid(format!(
                    "agent.priority lists {} twice",
                    kind
                )));
            }
        }
        Ok(())
    }

    /// TOML rendering with secrets masked (for `--print-config`).
    pub fn to_toml_redacted(&self) -> Result<String, ConfigError> {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some("***".to_string());
        }
        if !copy.graph.password.is_empty() {
            copy.graph.password = "***".to_string();
        }
        Ok(toml::to_string_pretty(&copy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn shipped_config() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/cinegraph.toml")
    }

    #[test]
    fn defaults_match_deployment() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.graph.database, "moviesdb");
        assert_eq!(cfg.vector.collection, "movies");
        assert_eq!(cfg.vector.top_k, 5);
        assert_eq!(cfg.agent.max_tool_calls, 6);
        assert_eq!(cfg.agent.routing_mode, RoutingMode::Guarded);
        assert_eq!(cfg.conversation.default_thread, "default-thread");
        assert_eq!(cfg.llm.max_retries, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bolt_urls_become_http() {
        assert_eq!(http_graph_url("bolt://localhost:7687"), "http://localhost:7474");
        assert_eq!(http_graph_url("neo4j://db.internal"), "http://db.internal:7474");
        assert_eq!(http_graph_url("http://x:7474"), "http://x:7474");
    }

    #[test]
    fn file_then_env_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinegraph.toml");
        std::fs::write(
            &path,
            r#"
[graph]
database = "films"
summarize = false

[agent]
routing_mode = "soft"
priority = ["tabular", "graph"]
max_tool_calls = 3
"#,
        )
        .unwrap();

        let env = vars(&[
            ("CINEGRAPH__AGENT__MAX_TOOL_CALLS", "4"),
            ("CINEGRAPH__VECTOR__COLLECTION", "dialogue"),
        ]);
        let cfg = GatewayConfig::load_with_env(&path, &env).unwrap();

        assert_eq!(cfg.graph.database, "films");
        assert!(!cfg.graph.summarize);
        assert_eq!(cfg.graph.user, "neo4j");
        assert_eq!(cfg.agent.routing_mode, RoutingMode::Soft);
        assert_eq!(cfg.agent.priority, vec![ToolKind::Tabular, ToolKind::Graph]);
        assert_eq!(cfg.agent.max_tool_calls, 4);
        assert_eq!(cfg.vector.collection, "dialogue");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = GatewayConfig::default();
        cfg.agent.priority = vec![ToolKind::Graph, ToolKind::Graph];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        cfg.agent.priority = ToolKind::ALL.to_vec();
        cfg.agent.max_tool_calls = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redacted_toml_hides_secrets() {
        let mut cfg = GatewayConfig::default();
        cfg.llm.api_key = Some("sk-or-secret".into());
        cfg.graph.password = "12345678".into();
        let text = cfg.to_toml_redacted().unwrap();
        assert!(!text.contains("sk-or-secret"));
        assert!(!text.contains("12345678"));
        assert!(text.contains("[agent]"));
    }

    #[test]
    fn legacy_variables_override_the_shipped_file() {
        let path = shipped_config();
        assert!(path.exists());
        let env = vars(&[
            ("CSV_PATH", "/data/custom.csv"),
            ("NEO4J_URL", "bolt://graph.internal:7687"),
            ("NEO4J_DB", "films"),
            ("CHROMA_URL", "http://chroma.internal:8000"),
            ("OPENROUTER_API_KEY", "sk-or-env"),
        ]);
        let cfg = GatewayConfig::load_with_env(&path, &env).unwrap();

        assert_eq!(cfg.tabular.path, PathBuf::from("/data/custom.csv"));
        assert_eq!(cfg.graph.url, "http://graph.internal:7474");
        assert_eq!(cfg.graph.database, "films");
        assert_eq!(cfg.vector.url, "http://chroma.internal:8000");
        assert_eq!(cfg.llm.resolve_api_key().as_deref(), Some("sk-or-env"));
    }

    #[test]
    fn prefixed_variables_outrank_legacy_ones() {
        let env = vars(&[
            ("CSV_PATH", "/data/legacy.csv"),
            ("CINEGRAPH__TABULAR__PATH", "/data/prefixed.csv"),
            ("LLM_API_KEY", "sk-fallback"),
        ]);
        let cfg = GatewayConfig::load_with_env(&shipped_config(), &env).unwrap();
        assert_eq!(cfg.tabular.path, PathBuf::from("/data/prefixed.csv"));
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-fallback"));
    }

    #[test]
    fn shipped_file_without_overrides_matches_defaults() {
        let cfg = GatewayConfig::load_with_env(&shipped_config(), &HashMap::new()).unwrap();
        let defaults = GatewayConfig::default();
        assert_eq!(cfg.tabular.path, defaults.tabular.path);
        assert_eq!(cfg.graph.url, defaults.graph.url);
        assert!(cfg.llm.resolve_api_key().is_none());
    }
}
