use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{require_env, BenchevalError, SecretValue};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "BENCHEVAL_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, BenchevalError> {
        require_env(&self.llm.api_key_env)
    }
}

/// Helper to load configuration with best-practice guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `BENCHEVAL_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, BenchevalError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| BenchevalError::config_io(candidate.clone(), err))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|err| BenchevalError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), BenchevalError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(BenchevalError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }

        // Ensure environment variable exists at load time to discourage inline secrets.
        require_env(&config.llm.api_key_env)?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    pub model: String,
    /// Model used for grading eval responses; defaults to `model`.
    #[serde(default)]
    pub grader_model: Option<String>,
    pub api_key_env: String,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://openrouter.ai/api/v1".to_string()
    }

    pub fn grader_model(&self) -> &str {
        self.grader_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_backend")]
    pub backend: String,
    #[serde(default = "SearchConfig::default_result_limit")]
    pub result_limit: usize,
}

impl SearchConfig {
    fn default_backend() -> String {
        "duckduckgo".to_string()
    }

    const fn default_result_limit() -> usize {
        10
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            result_limit: Self::default_result_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "ExecutorSection::default_image")]
    pub default_image: String,
    #[serde(default = "ExecutorSection::default_shell")]
    pub shell: String,
    #[serde(default = "ExecutorSection::default_idle_budget_secs")]
    pub idle_budget_secs: u64,
    #[serde(default = "ExecutorSection::default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default = "ExecutorSection::default_wait_secs")]
    pub default_wait_secs: u64,
}

impl ExecutorSection {
    fn default_image() -> String {
        "alpine".to_string()
    }

    fn default_shell() -> String {
        "bash".to_string()
    }

    const fn default_idle_budget_secs() -> u64 {
        3600
    }

    const fn default_reap_interval_secs() -> u64 {
        3600
    }

    const fn default_wait_secs() -> u64 {
        3600
    }
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            default_image: Self::default_image(),
            shell: Self::default_shell(),
            idle_budget_secs: Self::default_idle_budget_secs(),
            reap_interval_secs: Self::default_reap_interval_secs(),
            default_wait_secs: Self::default_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}
