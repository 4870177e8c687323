//! Engine configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLAIMGATE_CONFIG, CLAIMGATE_MAX_USD)
//! 2. Config file (.claimgate/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - `CLAIMGATE_CONFIG` names a file directly
//! - Otherwise searches current directory and parents for .claimgate/config.yaml
//! - Falls back to ~/.claimgate/config.yaml
//!
//! There is no global cache: callers load an [`EngineConfig`] once and pass
//! it by reference.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::DEFAULT_MODEL;
use crate::canonical::CanonicalPolicy;
use crate::domain::BudgetCeilings;

/// Env var naming a config file explicitly
pub const CONFIG_ENV: &str = "CLAIMGATE_CONFIG";

/// Env var overriding `budget.max_usd`
pub const MAX_USD_ENV: &str = "CLAIMGATE_MAX_USD";

const CONFIG_DIR: &str = ".claimgate";
const CONFIG_FILE: &str = "config.yaml";

/// Full engine configuration (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub policy: CanonicalPolicy,
    #[serde(default)]
    pub budget: BudgetCeilings,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub run: RunDefaults,

    /// Path to config file (if one was loaded)
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum passed/total check ratio (default: 0.5)
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

fn default_pass_threshold() -> f64 {
    0.5
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
        }
    }
}

/// What verification compares spans against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSetting {
    /// Check offsets and span text against the run's canonical text
    #[default]
    AgainstCanonical,
    /// Check linkage and offsets only
    OffsetsOnly,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub mode: VerificationSetting,
}

/// How extraction proposes claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// One claim per canonical sentence
    #[default]
    Sentences,
    /// A metered provider proposes claim/quote pairs
    ModelQuotes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub strategy: ExtractionStrategy,

    /// Confidence given to sentence claims and their evidence (default: 0.7)
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,

    /// Model used by the `model_quotes` strategy
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds (default: 60)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_confidence() -> f64 {
    0.7
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.2
}
fn default_timeout_seconds() -> u64 {
    60
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::default(),
            default_confidence: default_confidence(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Identity defaults for new run contexts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefaults {
    #[serde(default = "default_project_id")]
    pub project_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_project_id() -> String {
    "default".to_string()
}
fn default_user_id() -> String {
    "researcher".to_string()
}
fn default_mode() -> String {
    "standard".to_string()
}
fn default_agent_id() -> String {
    "claimgate".to_string()
}
fn default_role() -> String {
    "pipeline".to_string()
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            user_id: default_user_id(),
            mode: default_mode(),
            agent_id: default_agent_id(),
            role: default_role(),
            permissions: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse engine config")
    }

    /// Load and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let max_usd = std::env::var(MAX_USD_ENV).ok();

        Self::load_with(explicit, &cwd, dirs::home_dir(), max_usd.as_deref())
    }

    /// Load with every environment input passed in explicitly
    pub fn load_with(
        explicit: Option<PathBuf>,
        start_dir: &Path,
        home_dir: Option<PathBuf>,
        max_usd_override: Option<&str>,
    ) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => Some(path),
            None => find_config_file(start_dir).or_else(|| {
                home_dir
                    .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
                    .filter(|path| path.exists())
            }),
        };

        let mut config = match config_path {
            Some(ref path) => {
                debug!(path = %path.display(), "Loading engine config");
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        if let Some(raw) = max_usd_override {
            config.apply_max_usd_override(raw)?;
        }

        Ok(config)
    }

    /// Override `budget.max_usd` from its string form
    pub fn apply_max_usd_override(&mut self, raw: &str) -> Result<()> {
        let max_usd: f64 = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {:?}", MAX_USD_ENV, raw))?;
        if !max_usd.is_finite() || max_usd < 0.0 {
            anyhow::bail!("{} must be a non-negative number, got {}", MAX_USD_ENV, raw);
        }
        self.budget.max_usd = max_usd;
        Ok(())
    }
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::UnicodeForm;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let config_dir = dir.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.gate.pass_threshold, 0.5);
        assert_eq!(config.verification.mode, VerificationSetting::AgainstCanonical);
        assert_eq!(config.extraction.strategy, ExtractionStrategy::Sentences);
        assert_eq!(config.extraction.default_confidence, 0.7);
        assert_eq!(config.run.user_id, "researcher");
        assert_eq!(config.policy, CanonicalPolicy::default());
    }

    #[test]
    fn test_config_file_parsing() {
        let config = EngineConfig::from_yaml_str(
            r#"
policy:
  version: "1.1.0"
  unicode_form: nfkc
  normalize_alef_maqsura: true
budget:
  max_usd: 0.25
gate:
  pass_threshold: 0.8
verification:
  mode: offsets_only
extraction:
  strategy: model_quotes
run:
  project_id: ibn-khaldun
"#,
        )
        .unwrap();

        assert_eq!(config.policy.version(), "1.1.0");
        assert_eq!(config.policy.unicode_form(), UnicodeForm::Nfkc);
        assert!(config.policy.normalize_alef_maqsura());
        assert!(config.policy.strip_diacritics());
        assert_eq!(config.budget.max_usd, 0.25);
        assert_eq!(config.budget.max_tokens, 50_000);
        assert_eq!(config.gate.pass_threshold, 0.8);
        assert_eq!(config.verification.mode, VerificationSetting::OffsetsOnly);
        assert_eq!(config.extraction.strategy, ExtractionStrategy::ModelQuotes);
        assert_eq!(config.run.project_id, "ibn-khaldun");
        assert_eq!(config.run.mode, "standard");
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "gate:\n  pass_threshold: 0.9");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path.clone()));

        let config = EngineConfig::load_with(None, &nested, None, None).unwrap();
        assert_eq!(config.gate.pass_threshold, 0.9);
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_home_fallback_and_defaults() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();

        let config =
            EngineConfig::load_with(None, project.path(), Some(home.path().to_path_buf()), None)
                .unwrap();
        assert!(config.config_file.is_none());

        write_config(home.path(), "run:\n  user_id: home-user");
        let config =
            EngineConfig::load_with(None, project.path(), Some(home.path().to_path_buf()), None)
                .unwrap();
        assert_eq!(config.run.user_id, "home-user");
    }

    #[test]
    fn test_explicit_path_wins() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "gate:\n  pass_threshold: 0.9");
        let explicit = temp.path().join("other.yaml");
        std::fs::write(&explicit, "gate:\n  pass_threshold: 0.3\n").unwrap();

        let config = EngineConfig::load_with(Some(explicit), temp.path(), None, None).unwrap();
        assert_eq!(config.gate.pass_threshold, 0.3);
    }

    #[test]
    fn test_max_usd_override() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::load_with(None, temp.path(), None, Some("2.5")).unwrap();
        assert_eq!(config.budget.max_usd, 2.5);

        assert!(EngineConfig::load_with(None, temp.path(), None, Some("lots")).is_err());
        assert!(EngineConfig::load_with(None, temp.path(), None, Some("-1")).is_err());
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yaml");
        let err = EngineConfig::load_with(Some(missing), temp.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
