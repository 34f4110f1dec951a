//! Configuration system (layered: code > env > `carnet.toml` > defaults).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CarnetError;

const DEFAULT_MAX_ROUNDS: usize = 20;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_TOOL_ERROR_PREFIX: &str = "Erreur: ";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const CONFIG_FILE_NAME: &str = "carnet.toml";

const MAX_ROUNDS_ENV: &str = "CARNET_MAX_ROUNDS";
const TIMEOUT_MS_ENV: &str = "CARNET_TIMEOUT_MS";
const BASE_URL_ENVS: [&str; 2] = ["CARNET_BASE_URL", "OPENAI_BASE_URL"];
const API_KEY_ENVS: [&str; 2] = ["CARNET_API_KEY", "OPENAI_API_KEY"];
const MODEL_ENV: &str = "CARNET_MODEL";

/// Limits and policies for one orchestration session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Tool rounds allowed before the forced no-tools call.
    pub max_rounds: usize,
    /// Wall-clock budget for the whole request.
    pub timeout_ms: u64,
    /// Extra system instruction sent with the forced call only. It is never
    /// appended to the conversation.
    pub finalization_prompt: Option<String>,
    /// Prefix on the content of failed tool results.
    pub tool_error_prefix: String,
    /// Check tool arguments against their schema before dispatch.
    pub validate_arguments: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            finalization_prompt: None,
            tool_error_prefix: DEFAULT_TOOL_ERROR_PREFIX.to_string(),
            validate_arguments: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_finalization_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.finalization_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_error_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_error_prefix = prefix.into();
        self
    }

    pub fn with_validate_arguments(mut self, enabled: bool) -> Self {
        self.validate_arguments = enabled;
        self
    }

    /// Overlay `CARNET_MAX_ROUNDS` / `CARNET_TIMEOUT_MS`. Zero or unparseable
    /// values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(rounds) = lookup(MAX_ROUNDS_ENV).as_deref().and_then(parse_positive_usize) {
            self.max_rounds = rounds;
        }
        if let Some(timeout) = lookup(TIMEOUT_MS_ENV).as_deref().and_then(parse_positive_u64) {
            self.timeout_ms = timeout;
        }
    }
}

/// Connection settings for the OpenAI-compatible backend.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .find(|value| !value.trim().is_empty())
        };
        if let Some(url) = first(&BASE_URL_ENVS) {
            self.base_url = url;
        }
        if let Some(key) = first(&API_KEY_ENVS) {
            self.api_key = Some(key);
        }
        if let Some(model) = first(&[MODEL_ENV]) {
            self.model = model;
        }
    }
}

/// Everything `carnet.toml` can hold.
///
/// ```toml
/// [orchestrator]
/// max_rounds = 8
/// timeout_ms = 30000
///
/// [backend]
/// base_url = "http://localhost:11434/v1"
/// model = "llama3.1"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CarnetConfig {
    pub orchestrator: OrchestratorConfig,
    pub backend: BackendConfig,
}

impl CarnetConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, CarnetError> {
        toml::from_str(raw)
            .map_err(|err| CarnetError::Configuration(format!("invalid carnet.toml: {err}")))
    }

    /// Read a TOML file. A missing explicit path is an I/O error.
    pub fn from_file(path: &Path) -> Result<Self, CarnetError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Resolve the layered configuration.
    ///
    /// With no explicit path, `carnet.toml` in the platform config directory
    /// is used when it exists. Environment variables (after `.env` is loaded)
    /// override file values.
    pub fn load(path: Option<&Path>) -> Result<Self, CarnetError> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment, ignoring any config file.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.orchestrator.apply_env();
        self.backend.apply_env();
    }
}

/// `<config dir>/carnet/carnet.toml`, when a home directory can be resolved.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "carnet")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn parse_positive_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|parsed| *parsed > 0)
}

fn parse_positive_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|parsed| *parsed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_rounds, 20);
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.tool_error_prefix, "Erreur: ");
        assert!(config.validate_arguments);
        assert!(config.finalization_prompt.is_none());
    }

    #[test]
    fn env_overrides_ignore_zero_and_garbage() {
        let mut config = OrchestratorConfig::default();
        config.apply_env_with(env(&[(MAX_ROUNDS_ENV, "0"), (TIMEOUT_MS_ENV, "soon")]));
        assert_eq!(config.max_rounds, 20);
        assert_eq!(config.timeout_ms, 60_000);

        config.apply_env_with(env(&[(MAX_ROUNDS_ENV, " 4 "), (TIMEOUT_MS_ENV, "1500")]));
        assert_eq!(config.max_rounds, 4);
        assert_eq!(config.timeout_ms, 1500);
    }

    #[test]
    fn backend_env_prefers_carnet_variables() {
        let mut backend = BackendConfig::default();
        backend.apply_env_with(env(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("CARNET_API_KEY", "sk-carnet"),
            ("OPENAI_BASE_URL", "http://openai.local"),
            ("CARNET_MODEL", "tiny"),
        ]));
        assert_eq!(backend.api_key.as_deref(), Some("sk-carnet"));
        assert_eq!(backend.base_url, "http://openai.local");
        assert_eq!(backend.model, "tiny");
    }

    #[test]
    fn debug_redacts_api_key() {
        let backend = BackendConfig::default().with_api_key("sk-secret");
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CarnetConfig::from_toml_str(
            "[orchestrator]\nmax_rounds = 3\nfinalization_prompt = \"Answer now.\"\n",
        )
        .unwrap();
        assert_eq!(config.orchestrator.max_rounds, 3);
        assert_eq!(config.orchestrator.timeout_ms, 60_000);
        assert_eq!(
            config.orchestrator.finalization_prompt.as_deref(),
            Some("Answer now.")
        );
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn reads_config_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nbase_url = \"http://localhost:11434/v1\"\nmodel = \"llama3.1\"").unwrap();
        let config = CarnetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend.base_url, "http://localhost:11434/v1");
        assert_eq!(config.backend.model, "llama3.1");
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = CarnetConfig::from_toml_str("[orchestrator\nmax_rounds = ").unwrap_err();
        assert!(matches!(err, CarnetError::Configuration(_)));
    }

    #[test]
    fn missing_explicit_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CarnetConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        match err {
            CarnetError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }
}
