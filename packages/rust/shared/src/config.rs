//! Application configuration for PaperScout.
//!
//! User config lives at `~/.paperscout/paperscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PaperScoutError, Result};
use crate::types::DEFAULT_MIN_SCORE;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperscout";

// ---------------------------------------------------------------------------
// Config structs (matching paperscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Chat-completions endpoint used for evaluation and synthesis.
    #[serde(default)]
    pub llm: LlmConfig,

    /// arXiv search settings.
    #[serde(default)]
    pub search: SearchConfig,
}

/// What to do when the search/evaluation collaborator fails as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchFailurePolicy {
    /// Keep whatever was committed and go on to synthesis.
    #[default]
    Continue,
    /// Fail the run.
    Abort,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory receiving the store, reports and run summary.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Store file name inside `output_dir`.
    #[serde(default = "default_store_file")]
    pub store_file: String,

    /// Minimum relevance score for the synthesis view.
    #[serde(default = "default_min_score")]
    pub min_score: u8,

    /// Character budget for the synthesis view.
    #[serde(default = "default_char_budget")]
    pub char_budget: usize,

    /// Whether to render a Markdown report per relevant paper.
    #[serde(default = "default_true")]
    pub write_reports: bool,

    #[serde(default)]
    pub on_search_failure: SearchFailurePolicy,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            store_file: default_store_file(),
            min_score: default_min_score(),
            char_budget: default_char_budget(),
            write_reports: true,
            on_search_failure: SearchFailurePolicy::default(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_store_file() -> String {
    "research.db".into()
}
fn default_min_score() -> u8 {
    DEFAULT_MIN_SCORE
}
fn default_char_budget() -> usize {
    12_000
}
fn default_true() -> bool {
    true
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.cerebras.ai/v1".into()
}
fn default_model() -> String {
    "qwen-3-235b-a22b-instruct-2507".into()
}
fn default_api_key_env() -> String {
    "CEREBRAS_API_KEY".into()
}
fn default_temperature() -> f32 {
    0.5
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// arXiv Atom API endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum candidates fetched per topic.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "http://export.arxiv.org/api/query".into()
}
fn default_max_results() -> u32 {
    10
}
fn default_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Output directory for the store, reports and `run.json`.
    pub output_dir: PathBuf,
    /// Store file name inside `output_dir`.
    pub store_file: String,
    /// Minimum relevance score for the synthesis view.
    pub min_score: u8,
    /// Character budget for the synthesis view.
    pub char_budget: usize,
    /// Whether to render reports for relevant papers.
    pub write_reports: bool,
    /// Stage-one collaborator failure policy.
    pub on_search_failure: SearchFailurePolicy,
}

impl PipelineConfig {
    /// Full path of the corpus store.
    pub fn store_path(&self) -> PathBuf {
        self.output_dir.join(&self.store_file)
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.defaults.output_dir),
            store_file: config.defaults.store_file.clone(),
            min_score: config.defaults.min_score,
            char_budget: config.defaults.char_budget,
            write_reports: config.defaults.write_reports,
            on_search_failure: config.defaults.on_search_failure,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperscout/paperscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperScoutError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PaperScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    if config.defaults.min_score > crate::types::MAX_RELEVANCE_SCORE {
        return Err(PaperScoutError::config(format!(
            "defaults.min_score {} exceeds the maximum relevance score",
            config.defaults.min_score
        )));
    }
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the model API key env var is set and non-empty, returning it.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PaperScoutError::config(format!(
            "model API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("CEREBRAS_API_KEY"));
        assert!(toml_str.contains("on_search_failure = \"continue\""));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
output_dir = "/tmp/research"
min_score = 7
on_search_failure = "abort"

[llm]
model = "llama3.1-8b"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.output_dir, "/tmp/research");
        assert_eq!(config.defaults.min_score, 7);
        assert_eq!(config.defaults.char_budget, 12_000);
        assert_eq!(config.defaults.on_search_failure, SearchFailurePolicy::Abort);
        assert_eq!(config.llm.model, "llama3.1-8b");
        assert_eq!(config.llm.api_key_env, "CEREBRAS_API_KEY");
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.min_score, DEFAULT_MIN_SCORE);
        assert_eq!(pipeline.store_path(), PathBuf::from("output").join("research.db"));
        assert!(pipeline.write_reports);
        assert_eq!(pipeline.on_search_failure, SearchFailurePolicy::Continue);
    }

    #[test]
    fn out_of_range_min_score_rejected() {
        let path = std::env::temp_dir().join(format!(
            "ps_cfg_{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::write(&path, "[defaults]\nmin_score = 42\n").unwrap();
        let result = load_config_from(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.unwrap_err().to_string().contains("min_score"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "PS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
