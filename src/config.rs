use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which wire format a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions (OpenAI, Monica, and friends)
    Openai,
    /// Google Gemini generateContent
    Gemini,
}

/// Configuration for one backend under test (or for the judge)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Identifier used in reports and rankings
    pub id: String,
    /// Wire format of the API
    pub kind: BackendKind,
    /// Base URL of the API
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Model identifier to request
    pub model: String,
    /// Whether the backend accepts image content
    #[serde(default)]
    pub vision: bool,
    /// Sampling temperature (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_output_dir() -> String {
    "results".to_string()
}

/// Root configuration for a benchmarking run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Backends under test
    pub backends: Vec<BackendConfig>,
    /// Judge backend used for scoring; just another adapter definition
    pub judge: BackendConfig,
    /// Directory for transcripts, evaluation results and CSV summaries
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Optional system message prepended to every conversation
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        if config.backends.is_empty() {
            anyhow::bail!("Config defines no backends: {}", path.display());
        }

        Ok(config)
    }

    /// Backends selected by the CLI: `all` or a single backend id.
    pub fn select_backends(&self, selector: &str) -> Result<Vec<BackendConfig>> {
        if selector == "all" {
            return Ok(self.backends.clone());
        }
        self.backends
            .iter()
            .find(|b| b.id == selector)
            .cloned()
            .map(|b| vec![b])
            .with_context(|| format!("No backend named {:?} in config", selector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_CONFIG: &str = r#"
output_dir = "bench-results"
system_prompt = "You are a helpful assistant."

[[backends]]
id = "openai"
kind = "openai"
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4.1"
vision = true
temperature = 0.5
max_tokens = 2000
timeout_secs = 45

[[backends]]
id = "gemini"
kind = "gemini"
api_endpoint = "https://generativelanguage.googleapis.com/v1beta"
env_var_api_key = "GEMINI_KEY"
model = "gemini-2.5-pro"

[judge]
id = "judge"
kind = "openai"
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4.1"
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_config_parsing() {
        let file = write_config(FULL_CONFIG);
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].id, "openai");
        assert_eq!(config.backends[0].kind, BackendKind::Openai);
        assert!(config.backends[0].vision);
        assert_eq!(config.backends[0].temperature, 0.5);
        assert_eq!(config.backends[0].max_tokens, 2000);
        assert_eq!(config.backends[0].timeout_secs, 45);
        assert_eq!(config.backends[1].kind, BackendKind::Gemini);
        assert_eq!(config.judge.model, "gpt-4.1");
        assert_eq!(config.output_dir, "bench-results");
    }

    #[test]
    fn test_config_defaults() {
        let file = write_config(FULL_CONFIG);
        let config = Config::from_file(file.path()).unwrap();

        // The gemini entry leaves the optional fields out.
        let gemini = &config.backends[1];
        assert!(!gemini.vision);
        assert_eq!(gemini.temperature, 0.7);
        assert_eq!(gemini.max_tokens, 1000);
        assert_eq!(gemini.timeout_secs, 30);
    }

    #[test]
    fn test_config_without_backends_rejected() {
        let file = write_config(
            r#"
[judge]
id = "judge"
kind = "openai"
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4.1"
"#,
        );
        let result = Config::from_file(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_select_backends() {
        let file = write_config(FULL_CONFIG);
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.select_backends("all").unwrap().len(), 2);
        let one = config.select_backends("gemini").unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, "gemini");
        assert!(config.select_backends("claude").is_err());
    }
}
