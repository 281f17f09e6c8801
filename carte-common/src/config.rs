//! Configuration loading and data directory resolution
//!
//! Zero-config startup: every field has a workable default, so a bare
//! `carte-ingest run` works against an empty data directory. A TOML file
//! tightens pacing, enables the vision fallback, extends the quality
//! blacklist, and so on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::SourceId;
use crate::{Error, Result};

/// Top-level configuration for all Carte services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CarteConfig {
    pub data: DataConfig,
    pub scheduler: SchedulerConfig,
    pub sources: SourcesConfig,
    pub render: RenderConfig,
    pub vision: VisionConfig,
    pub quality: QualityConfig,
    pub propagation: PropagationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding carte.db; resolved against the OS default when unset
    pub dir: Option<PathBuf>,
}

/// Worker pool sizing, retry budget, and the mandatory per-call timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Adapter calls in flight across all sources
    pub max_in_flight: usize,
    /// Adapter calls in flight against any single source
    pub per_source_in_flight: usize,
    /// Attempts per (brand, source) pair before the pipeline stops retrying
    pub max_attempts: u32,
    /// Hard ceiling on one adapter call, render wait included
    pub call_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            per_source_in_flight: 2,
            max_attempts: 3,
            call_timeout_ms: 75_000,
        }
    }
}

/// Per-source adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    /// Overrides the adapter's built-in site root, e.g. to route through a
    /// proxy. Unset means the adapter picks its own host.
    pub base_url: Option<String>,
    /// Minimum spacing between requests to this source
    pub min_delay_ms: u64,
    /// Search hits fetched in full per brand before matching
    pub max_candidates: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            min_delay_ms: 1_500,
            max_candidates: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub grabfood: SourceConfig,
    pub foodpanda: SourceConfig,
    pub brand_site: SourceConfig,
    pub vision: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            grabfood: SourceConfig::default(),
            foodpanda: SourceConfig::default(),
            brand_site: SourceConfig {
                min_delay_ms: 1_000,
                max_candidates: 3,
                ..SourceConfig::default()
            },
            // Off by default: every call costs a full page screenshot plus a
            // transcription request, so operators enable it per deployment.
            vision: SourceConfig {
                enabled: false,
                min_delay_ms: 2_000,
                max_candidates: 1,
                ..SourceConfig::default()
            },
        }
    }
}

/// Headless rendering settings shared by all HTML-driven adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Render service endpoint; plain HTTP fetches are used when unset
    pub endpoint: Option<String>,
    /// How long the render service lets client-side scripts settle
    pub settle_ms: u64,
    /// HTTP timeout for one fetch or render request
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            settle_ms: 3_500,
            timeout_ms: 60_000,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Screenshot-transcription service settings for the vision adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Transcription service endpoint; required when sources.vision is enabled
    pub endpoint: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "menu-ocr-1".to_string(),
            timeout_ms: 90_000,
        }
    }
}

/// Quality gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Records below this price coverage are suspect when large
    pub min_price_coverage: f64,
    /// Item count above which low price coverage means quarantine
    pub bulk_item_threshold: u32,
    /// Extra boilerplate name patterns appended to the built-in set
    pub extra_blacklist: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_price_coverage: 0.05,
            bulk_item_threshold: 20,
            extra_blacklist: Vec::new(),
        }
    }
}

/// Donor propagation guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub enabled: bool,
    /// Core names shorter than this never form a group
    pub min_core_len: usize,
    /// Groups larger than this are flagged for review instead of propagated
    pub max_group_size: usize,
    /// Extra location/mall suffixes appended to the built-in strip list
    pub extra_suffixes: Vec<String>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_core_len: 4,
            max_group_size: 8,
            extra_suffixes: Vec::new(),
        }
    }
}

impl CarteConfig {
    /// Load configuration following the resolution priority order:
    /// 1. Explicit path (command-line argument or CARTE_CONFIG, via clap)
    /// 2. Platform config file (~/.config/carte/carte.toml) when present
    /// 3. Built-in defaults
    ///
    /// An explicit path that does not exist or does not parse is a hard
    /// error; a missing platform file silently falls back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
            let config: CarteConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
            config.validate()?;
            return Ok(config);
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
                let config: CarteConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
                config.validate()?;
                return Ok(config);
            }
        }

        let config = CarteConfig::default();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the data directory following the priority order:
    /// 1. Command-line argument or CARTE_DATA_DIR (via clap)
    /// 2. `[data] dir` from the config file
    /// 3. OS-dependent default (e.g. ~/.local/share/carte)
    pub fn resolve_data_dir(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(dir) = cli_arg {
            return dir.to_path_buf();
        }
        if let Some(dir) = &self.data.dir {
            return dir.clone();
        }
        default_data_dir()
    }

    /// Database file inside the resolved data directory.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("carte.db")
    }

    /// Settings for one source adapter.
    pub fn source(&self, id: SourceId) -> &SourceConfig {
        match id {
            SourceId::Grabfood => &self.sources.grabfood,
            SourceId::Foodpanda => &self.sources.foodpanda,
            SourceId::BrandSite => &self.sources.brand_site,
            SourceId::Vision => &self.sources.vision,
        }
    }

    /// Sources enabled for dispatch, in canonical order.
    pub fn enabled_sources(&self) -> Vec<SourceId> {
        SourceId::ALL
            .into_iter()
            .filter(|id| self.source(*id).enabled)
            .collect()
    }

    /// Reject configurations the pipeline cannot run with. This is the only
    /// error class that aborts a run before any brand is touched.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_in_flight == 0 {
            return Err(Error::Config("scheduler.max_in_flight must be at least 1".into()));
        }
        if self.scheduler.per_source_in_flight == 0 {
            return Err(Error::Config(
                "scheduler.per_source_in_flight must be at least 1".into(),
            ));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(Error::Config("scheduler.max_attempts must be at least 1".into()));
        }
        if self.scheduler.call_timeout_ms == 0 {
            return Err(Error::Config("scheduler.call_timeout_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.quality.min_price_coverage) {
            return Err(Error::Config(
                "quality.min_price_coverage must be within [0, 1]".into(),
            ));
        }
        if self.propagation.min_core_len == 0 {
            return Err(Error::Config("propagation.min_core_len must be at least 1".into()));
        }
        for id in SourceId::ALL {
            if let Some(url) = &self.source(id).base_url {
                if !url.starts_with("http") {
                    return Err(Error::Config(format!(
                        "sources.{}.base_url is not an HTTP URL: {}",
                        id, url
                    )));
                }
            }
        }
        if self.sources.vision.enabled {
            match &self.vision.endpoint {
                Some(url) if url.starts_with("http") => {}
                _ => {
                    return Err(Error::Config(
                        "sources.vision is enabled but vision.endpoint is not set".into(),
                    ))
                }
            }
        }
        if let Some(endpoint) = &self.render.endpoint {
            if !endpoint.starts_with("http") {
                return Err(Error::Config(format!(
                    "render.endpoint is not an HTTP URL: {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Platform config file path (~/.config/carte/carte.toml or equivalent).
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("carte").join("carte.toml"))
}

/// OS-dependent default data directory.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("carte"))
        .unwrap_or_else(|| PathBuf::from("./carte_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = CarteConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_in_flight, 8);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert!((config.quality.min_price_coverage - 0.05).abs() < f64::EPSILON);
        assert!(!config.sources.vision.enabled);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml_str = r#"
            [scheduler]
            max_in_flight = 2

            [sources.grabfood]
            min_delay_ms = 4000

            [propagation]
            extra_suffixes = ["jem", "vivocity"]
        "#;
        let config: CarteConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_in_flight, 2);
        // untouched fields keep their defaults
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.sources.grabfood.min_delay_ms, 4000);
        assert!(config.sources.grabfood.enabled);
        assert_eq!(config.sources.grabfood.base_url, None);
        assert_eq!(config.propagation.extra_suffixes, vec!["jem", "vivocity"]);
    }

    #[test]
    fn vision_enabled_without_endpoint_is_a_config_error() {
        let toml_str = r#"
            [sources.vision]
            enabled = true
        "#;
        let config: CarteConfig = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let toml_str = r#"
            [scheduler]
            max_in_flight = 0
        "#;
        let config: CarteConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_path_is_a_hard_error() {
        let err = CarteConfig::load(Some(Path::new("/nonexistent/carte.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn explicit_path_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carte.toml");
        std::fs::write(&path, "[scheduler]\nmax_attempts = 5\n").unwrap();
        let config = CarteConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.max_attempts, 5);
    }

    #[test]
    fn data_dir_priority_cli_then_config_then_default() {
        let mut config = CarteConfig::default();
        config.data.dir = Some(PathBuf::from("/srv/carte"));
        assert_eq!(
            config.resolve_data_dir(Some(Path::new("/tmp/override"))),
            PathBuf::from("/tmp/override")
        );
        assert_eq!(config.resolve_data_dir(None), PathBuf::from("/srv/carte"));

        let bare = CarteConfig::default();
        let fallback = bare.resolve_data_dir(None);
        assert!(fallback.ends_with("carte") || fallback.ends_with("carte_data"));
    }
}
