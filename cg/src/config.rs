//! coursegen configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ModelSelector;
use crate::error::CourseError;
use crate::llm::{GenerationParams, Provider};
use crate::planning::PlannerConfig;
use crate::scheduler::SchedulerConfig;

/// Main coursegen configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when `--log-level` is not given
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Shared completion settings
    pub llm: LlmConfig,

    /// Named model entries selectable by id
    pub models: Vec<ModelConfig>,

    /// Backing model for the `free-trial` selector
    #[serde(rename = "free-trial")]
    pub free_trial: FreeTrialConfig,

    /// Course generation limits
    pub generation: GenerationConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Prompt template overrides
    pub prompts: PromptsConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks model entries, chapter limits and the API key of the default
    /// model. Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.models {
            if entry.id.trim().is_empty() {
                return Err(eyre::eyre!("Model entry with empty id"));
            }
            if matches!(entry.id.as_str(), "auto" | "free-trial") {
                return Err(eyre::eyre!("Model id '{}' is reserved", entry.id));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(eyre::eyre!("Duplicate model id '{}'", entry.id));
            }
            if entry.provider == Provider::Custom && entry.base_url.is_none() {
                return Err(eyre::eyre!("Model '{}' uses provider custom but has no base-url", entry.id));
            }
        }

        let g = &self.generation;
        if g.min_chapters == 0 || g.min_chapters > g.max_chapters {
            return Err(eyre::eyre!(
                "Invalid chapter limits: min-chapters {} max-chapters {}",
                g.min_chapters,
                g.max_chapters
            ));
        }
        if !(g.min_chapters..=g.max_chapters).contains(&g.default_chapters) {
            return Err(eyre::eyre!(
                "default-chapters {} is outside {}..={}",
                g.default_chapters,
                g.min_chapters,
                g.max_chapters
            ));
        }

        if let Some(default) = &self.llm.default_model {
            let selector: ModelSelector = default.parse().map_err(|e: String| eyre::eyre!(e))?;
            let api_key_env = match &selector {
                ModelSelector::FreeTrial => &self.free_trial.api_key_env,
                ModelSelector::Auto => return Err(eyre::eyre!("llm.default-model cannot be 'auto'")),
                ModelSelector::Named(id) => {
                    &self
                        .model(id)
                        .ok_or_else(|| eyre::eyre!("llm.default-model '{}' is not a configured model", id))?
                        .api_key_env
                }
            };
            if std::env::var(api_key_env).is_err() {
                return Err(eyre::eyre!(
                    "LLM API key not found. Set the {} environment variable.",
                    api_key_env
                ));
            }
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .coursegen.yml
        let local_config = PathBuf::from(".coursegen.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/coursegen/coursegen.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("coursegen").join("coursegen.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is initialized
    ///
    /// Follows the same search order as [`Config::load`]; failures yield `None`.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".coursegen.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("coursegen").join("coursegen.yml"));
                }
                paths
            }
        };
        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())?
            .log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Look up a named model entry
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Resolve a selector to a concrete endpoint, model and credential
    ///
    /// The API key is read from the environment here, once per request.
    pub fn resolve_model(&self, selector: &ModelSelector) -> Result<ResolvedModel, CourseError> {
        tracing::debug!(%selector, "Config::resolve_model: called");
        match selector {
            ModelSelector::FreeTrial => {
                let trial = &self.free_trial;
                if !trial.enabled {
                    return Err(CourseError::Validation("the free trial is disabled".to_string()));
                }
                self.build_resolved(
                    "free-trial",
                    "free trial".to_string(),
                    trial.provider,
                    &trial.model,
                    &trial.api_key_env,
                    None,
                )
            }
            ModelSelector::Auto => {
                let default = self.llm.default_model.as_deref().ok_or_else(|| {
                    CourseError::Validation("no default model configured (llm.default-model)".to_string())
                })?;
                let selector: ModelSelector = default.parse().map_err(CourseError::Validation)?;
                if selector == ModelSelector::Auto {
                    return Err(CourseError::Validation("llm.default-model cannot be 'auto'".to_string()));
                }
                self.resolve_model(&selector)
            }
            ModelSelector::Named(id) => {
                let entry = self
                    .model(id)
                    .ok_or_else(|| CourseError::Validation(format!("model not found: {}", id)))?;
                self.build_resolved(
                    &entry.id,
                    entry.label(),
                    entry.provider,
                    &entry.model,
                    &entry.api_key_env,
                    entry.base_url.as_deref(),
                )
            }
        }
    }

    fn build_resolved(
        &self,
        id: &str,
        label: String,
        provider: Provider,
        model: &str,
        api_key_env: &str,
        base_url: Option<&str>,
    ) -> Result<ResolvedModel, CourseError> {
        let api_key = std::env::var(api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CourseError::Validation(format!(
                    "API key for model '{}' not found. Set the {} environment variable.",
                    id, api_key_env
                ))
            })?;
        let endpoint = provider
            .endpoint(base_url)
            .map_err(|e| CourseError::Validation(e.to_string()))?;
        Ok(ResolvedModel {
            id: id.to_string(),
            label,
            provider,
            model: model.to_string(),
            api_key,
            endpoint,
            timeout_ms: self.llm.timeout_ms,
        })
    }

    /// Outline planner settings derived from this config
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            max_tokens: self.generation.outline_max_tokens,
            max_history: self.llm.max_history,
            params: self.llm.generation_params(),
            require_assessments: self.generation.require_assessments,
        }
    }

    /// Chapter scheduler settings derived from this config
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            chapter_max_tokens: self.generation.chapter_max_tokens,
            max_history: self.llm.max_history,
            params: self.llm.generation_params(),
        }
    }
}

/// A model selection resolved to everything a client needs
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    /// Model entry id, or `free-trial`
    pub id: String,
    /// Human-readable label, appended to course tags
    pub label: String,
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    /// Full Chat Completions URL
    pub endpoint: String,
    pub timeout_ms: u64,
}

/// Shared completion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Selector used when a request asks for `auto`
    #[serde(rename = "default-model")]
    pub default_model: Option<String>,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Conversation history cap per session
    #[serde(rename = "max-history")]
    pub max_history: usize,

    pub temperature: f32,

    #[serde(rename = "top-p")]
    pub top_p: f32,

    #[serde(rename = "presence-penalty")]
    pub presence_penalty: f32,

    #[serde(rename = "frequency-penalty")]
    pub frequency_penalty: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            timeout_ms: 300_000,
            max_history: crate::session::DEFAULT_MAX_HISTORY,
            temperature: 0.7,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

impl LlmConfig {
    /// Session defaults built from these settings
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            presence_penalty: Some(self.presence_penalty),
            frequency_penalty: Some(self.frequency_penalty),
            ..GenerationParams::session_defaults()
        }
    }
}

/// One named model entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Selector id, e.g. `gpt4o`
    pub id: String,

    pub provider: Provider,

    /// Vendor model name sent in the request body
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Full Chat Completions URL; required for `custom`
    #[serde(rename = "base-url", default)]
    pub base_url: Option<String>,
}

impl ModelConfig {
    pub fn label(&self) -> String {
        format!("{} ({})", self.model, self.provider)
    }
}

/// Backing model for the free trial
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeTrialConfig {
    pub enabled: bool,

    pub provider: Provider,

    pub model: String,

    #[serde(rename = "api-key-env")]
    pub api_key_env: String,
}

impl Default for FreeTrialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: Provider::DeepSeek,
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
        }
    }
}

/// Course generation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Chapter count when the request gives none
    #[serde(rename = "default-chapters")]
    pub default_chapters: u32,

    #[serde(rename = "min-chapters")]
    pub min_chapters: u32,

    #[serde(rename = "max-chapters")]
    pub max_chapters: u32,

    #[serde(rename = "outline-max-tokens")]
    pub outline_max_tokens: u32,

    #[serde(rename = "chapter-max-tokens")]
    pub chapter_max_tokens: u32,

    #[serde(rename = "score-max-tokens")]
    pub score_max_tokens: u32,

    /// Reject outlines without an exercise and an exam
    #[serde(rename = "require-assessments")]
    pub require_assessments: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_chapters: 5,
            min_chapters: 3,
            max_chapters: 20,
            outline_max_tokens: 8000,
            chapter_max_tokens: 8000,
            score_max_tokens: 1000,
            require_assessments: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("coursegen")
                .join("courses.db"),
        }
    }
}

/// Prompt template overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory searched for `<name>.pmt` before the embedded templates
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const YAML: &str = r#"
log-level: debug
llm:
  default-model: gpt
  timeout-ms: 60000
  temperature: 0.2
models:
  - id: gpt
    provider: openai
    model: gpt-4o
    api-key-env: CG_TEST_OPENAI_KEY
  - id: local
    provider: custom
    model: llama3
    api-key-env: CG_TEST_LOCAL_KEY
    base-url: http://localhost:8080/v1/chat/completions
generation:
  max-chapters: 8
"#;

    fn config() -> Config {
        serde_yaml::from_str(YAML).unwrap()
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: env-touching tests are serialized
        unsafe { std::env::set_var(key, value) };
    }

    fn remove_env(key: &str) {
        // SAFETY: env-touching tests are serialized
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.timeout_ms, 300_000);
        assert_eq!(config.llm.max_history, 100);
        assert_eq!(config.generation.default_chapters, 5);
        assert_eq!(config.generation.score_max_tokens, 1000);
        assert!(config.generation.require_assessments);
        assert!(config.free_trial.enabled);
        assert!(config.storage.database.ends_with("coursegen/courses.db"));
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let config = config();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.llm.default_model.as_deref(), Some("gpt"));
        assert_eq!(config.llm.timeout_ms, 60_000);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[1].provider, Provider::Custom);
        assert_eq!(config.generation.max_chapters, 8);
        // Unset keys keep their defaults
        assert_eq!(config.generation.min_chapters, 3);
        assert_eq!(config.llm.max_history, 100);
    }

    #[test]
    fn test_generation_params_from_llm_config() {
        let params = config().llm.generation_params();
        assert_eq!(params.temperature, Some(0.2));
        assert_eq!(params.top_p, Some(1.0));
        assert_eq!(params.n, Some(1));
        assert_eq!(params.max_tokens, None);
        assert_eq!(config().planner_config().max_tokens, 8000);
    }

    #[test]
    #[serial]
    fn test_resolve_named_model() {
        set_env("CG_TEST_OPENAI_KEY", "sk-test");
        let resolved = config()
            .resolve_model(&ModelSelector::Named("gpt".to_string()))
            .unwrap();
        assert_eq!(resolved.endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(resolved.api_key, "sk-test");
        assert_eq!(resolved.label, "gpt-4o (openai)");
        assert_eq!(resolved.timeout_ms, 60_000);
        remove_env("CG_TEST_OPENAI_KEY");
    }

    #[test]
    #[serial]
    fn test_resolve_auto_uses_default_model() {
        set_env("CG_TEST_OPENAI_KEY", "sk-test");
        let resolved = config().resolve_model(&ModelSelector::Auto).unwrap();
        assert_eq!(resolved.id, "gpt");
        remove_env("CG_TEST_OPENAI_KEY");

        let err = Config::default().resolve_model(&ModelSelector::Auto).unwrap_err();
        assert!(matches!(err, CourseError::Validation(_)));
    }

    #[test]
    #[serial]
    fn test_resolve_custom_uses_base_url() {
        set_env("CG_TEST_LOCAL_KEY", "local");
        let resolved = config()
            .resolve_model(&ModelSelector::Named("local".to_string()))
            .unwrap();
        assert_eq!(resolved.endpoint, "http://localhost:8080/v1/chat/completions");
        remove_env("CG_TEST_LOCAL_KEY");
    }

    #[test]
    #[serial]
    fn test_resolve_errors() {
        remove_env("CG_TEST_OPENAI_KEY");
        let config = config();
        match config.resolve_model(&ModelSelector::Named("missing".to_string())) {
            Err(CourseError::Validation(msg)) => assert!(msg.contains("model not found")),
            other => panic!("Expected Validation error, got {other:?}"),
        }
        match config.resolve_model(&ModelSelector::Named("gpt".to_string())) {
            Err(CourseError::Validation(msg)) => assert!(msg.contains("CG_TEST_OPENAI_KEY")),
            other => panic!("Expected Validation error, got {other:?}"),
        }

        let mut disabled = Config::default();
        disabled.free_trial.enabled = false;
        assert!(disabled.resolve_model(&ModelSelector::FreeTrial).is_err());
    }

    #[test]
    #[serial]
    fn test_resolve_free_trial() {
        set_env("CG_TEST_TRIAL_KEY", "trial");
        let mut config = Config::default();
        config.free_trial.api_key_env = "CG_TEST_TRIAL_KEY".to_string();
        let resolved = config.resolve_model(&ModelSelector::FreeTrial).unwrap();
        assert_eq!(resolved.label, "free trial");
        assert_eq!(resolved.model, "deepseek-chat");
        assert_eq!(resolved.endpoint, "https://api.deepseek.com/chat/completions");
        remove_env("CG_TEST_TRIAL_KEY");
    }

    #[test]
    #[serial]
    fn test_validate() {
        remove_env("CG_TEST_OPENAI_KEY");
        assert!(config().validate().is_err());
        set_env("CG_TEST_OPENAI_KEY", "sk-test");
        assert!(config().validate().is_ok());
        remove_env("CG_TEST_OPENAI_KEY");

        assert!(Config::default().validate().is_ok());

        let mut bad = Config::default();
        bad.generation.default_chapters = 50;
        assert!(bad.validate().is_err());

        let mut dup = config();
        dup.models.push(dup.models[0].clone());
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("coursegen.yml");
        std::fs::write(&path, YAML).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("debug"));

        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());
    }
}
