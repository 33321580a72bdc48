use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    labeler::DEFAULT_VISION_ENDPOINT,
    semantic::{DEFAULT_MODEL, DEFAULT_THRESHOLD},
    storage::{self, StorageManager},
};

const CONFIG_FILE: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Labels requested per image from the labeler
const DEFAULT_MAX_LABELS: u32 = 10;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Env var that overrides `labeler.api_key`
pub const VISION_API_KEY_ENV: &str = "PICSIFT_VISION_API_KEY";

/// Configuration for query ranking
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Candidates must score strictly above this to be returned
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Keep label embeddings between queries
    #[serde(default)]
    pub cache_embeddings: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            threshold: DEFAULT_THRESHOLD,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            cache_embeddings: false,
        }
    }
}

/// Configuration for the image labeler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Leave unset to use the env var or to supply labels by hand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_max_labels")]
    pub max_labels: u32,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            max_labels: DEFAULT_MAX_LABELS,
        }
    }
}

impl LabelerConfig {
    /// API key from the environment, falling back to the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(VISION_API_KEY_ENV)
            .ok()
            .or_else(|| self.api_key.clone())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_endpoint() -> String {
    DEFAULT_VISION_ENDPOINT.to_string()
}

fn default_max_labels() -> u32 {
    DEFAULT_MAX_LABELS
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub labeler: LabelerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            ranking: RankingConfig::default(),
            labeler: LabelerConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let ranking = &self.ranking;
        if !(0.0..1.0).contains(&ranking.threshold) {
            bail!(
                "ranking.threshold must be in [0.0, 1.0), got {}",
                ranking.threshold
            );
        }

        if ranking.download_timeout_secs == 0 {
            bail!("ranking.download_timeout_secs must be greater than 0");
        }

        if self.labeler.max_labels == 0 {
            bail!("labeler.max_labels must be greater than 0");
        }

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if
    /// missing. Missing fields are filled in and written back.
    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("Failed to open {}", base_path.display()))?;

        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.ranking.model, DEFAULT_MODEL);
        assert_eq!(config.ranking.threshold, 0.3);
        assert!(!config.ranking.cache_embeddings);
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.base_path(), tmp.path());
    }

    #[test]
    fn test_partial_config_gets_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "ranking:\n  threshold: 0.5\n  cache_embeddings: true\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.ranking.threshold, 0.5);
        assert!(config.ranking.cache_embeddings);
        assert_eq!(config.ranking.download_timeout_secs, 300);
        assert_eq!(config.labeler.max_labels, 10);

        // missing fields were written back
        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("download_timeout_secs"));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "ranking:\n  threshold: 1.5\n").unwrap();

        let err = Config::load_with(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("ranking.threshold"));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "ranking: [not, a, map").unwrap();

        assert!(Config::load_with(tmp.path()).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(tmp.path()).unwrap();
        config.labeler.max_labels = 25;
        config.save().unwrap();

        let reloaded = Config::load_with(tmp.path()).unwrap();
        assert_eq!(reloaded, config);
    }
}
