//! `grantlink.toml` configuration.
//!
//! Every field is optional. Files are layered, later layers winning:
//! the platform config (`<config_dir>/grantlink/config.toml`), then `./grantlink.toml`,
//! then a file named on the command line. [`ConfigFile::resolve`] fills the gaps with
//! the built-in defaults and validates the result.
//!
//! ```toml
//! [corpus]
//! root = "/data/pmc"
//! folders = ["articles.A-B", "articles.C-H"]
//!
//! [scoring]
//! threshold = 0.9
//! max_features = 100
//! ngram_min = 1
//! ngram_max = 3
//! centroid = "true-count"
//!
//! [scan]
//! workers = 8
//!
//! [scholar]
//! timeout_secs = 10
//! top_k = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::citations::ScholarConfig;
use crate::score::{CentroidMode, ScoringConfig};
use crate::tfidf::TfidfConfig;
use crate::{GrantError, Result};

pub const DEFAULT_FOLDERS: [&str; 4] = ["articles.A-B", "articles.C-H", "articles.I-N", "articles.O-Z"];

const LOCAL_CONFIG: &str = "grantlink.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub corpus: Option<CorpusSection>,
    pub scoring: Option<ScoringSection>,
    pub scan: Option<ScanSection>,
    pub scholar: Option<ScholarSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorpusSection {
    pub root: Option<PathBuf>,
    pub folders: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringSection {
    pub threshold: Option<f64>,
    pub max_features: Option<usize>,
    pub ngram_min: Option<usize>,
    pub ngram_max: Option<usize>,
    pub centroid: Option<CentroidMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScholarSection {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub top_k: Option<usize>,
    pub user_agent: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub corpus_root: Option<PathBuf>,
    pub folders: Vec<String>,
    pub scoring: ScoringConfig,
    /// `None` uses rayon's default thread count
    pub workers: Option<usize>,
    pub scholar: ScholarConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            corpus_root: None,
            folders: DEFAULT_FOLDERS.iter().map(|f| f.to_string()).collect(),
            scoring: ScoringConfig::default(),
            workers: None,
            scholar: ScholarConfig::default(),
        }
    }
}

/// Platform config path: `<config_dir>/grantlink/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("grantlink").join("config.toml"))
}

/// Loads and layers the platform config, `./grantlink.toml` and `explicit`.
///
/// # Errors
///
/// A file that exists but does not parse is a [`GrantError::Config`]. An `explicit`
/// path that does not exist is an error too; the implicit layers are optional.
pub fn load_config(explicit: Option<&Path>) -> Result<ConfigFile> {
    let mut config = ConfigFile::default();
    if let Some(platform) = config_path() {
        if let Some(layer) = load_optional(&platform)? {
            config = merge(config, layer);
        }
    }
    if let Some(layer) = load_optional(Path::new(LOCAL_CONFIG))? {
        config = merge(config, layer);
    }
    if let Some(path) = explicit {
        config = merge(config, load_from_path(path)?);
    }
    Ok(config)
}

fn load_optional(path: &Path) -> Result<Option<ConfigFile>> {
    if path.is_file() {
        load_from_path(path).map(Some)
    } else {
        Ok(None)
    }
}

pub fn load_from_path(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GrantError::Config(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "loading config");
    toml::from_str(&content).map_err(|e| GrantError::Config(format!("{}: {e}", path.display())))
}

/// `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        corpus: merge_section(base.corpus, overlay.corpus, |b, o| CorpusSection {
            root: o.root.or(b.root),
            folders: o.folders.or(b.folders),
        }),
        scoring: merge_section(base.scoring, overlay.scoring, |b, o| ScoringSection {
            threshold: o.threshold.or(b.threshold),
            max_features: o.max_features.or(b.max_features),
            ngram_min: o.ngram_min.or(b.ngram_min),
            ngram_max: o.ngram_max.or(b.ngram_max),
            centroid: o.centroid.or(b.centroid),
        }),
        scan: merge_section(base.scan, overlay.scan, |b, o| ScanSection {
            workers: o.workers.or(b.workers),
        }),
        scholar: merge_section(base.scholar, overlay.scholar, |b, o| ScholarSection {
            base_url: o.base_url.or(b.base_url),
            timeout_secs: o.timeout_secs.or(b.timeout_secs),
            top_k: o.top_k.or(b.top_k),
            user_agent: o.user_agent.or(b.user_agent),
        }),
    }
}

fn merge_section<T>(base: Option<T>, overlay: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (Some(b), Some(o)) => Some(f(b, o)),
    }
}

impl ConfigFile {
    /// Applies the file over the defaults and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Config`] for out-of-range values.
    pub fn resolve(&self) -> Result<Settings> {
        let mut settings = Settings::default();

        if let Some(corpus) = &self.corpus {
            settings.corpus_root = corpus.root.clone();
            if let Some(folders) = &corpus.folders {
                settings.folders = folders.clone();
            }
        }

        if let Some(scoring) = &self.scoring {
            let defaults = TfidfConfig::default();
            settings.scoring = ScoringConfig {
                threshold: scoring.threshold.unwrap_or(settings.scoring.threshold),
                tfidf: TfidfConfig {
                    ngram_range: (
                        scoring.ngram_min.unwrap_or(defaults.ngram_range.0),
                        scoring.ngram_max.unwrap_or(defaults.ngram_range.1),
                    ),
                    max_features: scoring.max_features.unwrap_or(defaults.max_features),
                },
                centroid: scoring.centroid.unwrap_or_default(),
            };
        }
        settings.scoring.validate()?;

        if let Some(scan) = &self.scan {
            if scan.workers == Some(0) {
                return Err(GrantError::Config("workers must be at least 1".to_string()));
            }
            settings.workers = scan.workers;
        }

        if let Some(scholar) = &self.scholar {
            let defaults = ScholarConfig::default();
            if scholar.top_k == Some(0) {
                return Err(GrantError::Config("top_k must be at least 1".to_string()));
            }
            if scholar.timeout_secs == Some(0) {
                return Err(GrantError::Config("timeout_secs must be at least 1".to_string()));
            }
            settings.scholar = ScholarConfig {
                base_url: scholar.base_url.clone().unwrap_or(defaults.base_url),
                timeout: scholar
                    .timeout_secs
                    .map_or(defaults.timeout, Duration::from_secs),
                top_k: scholar.top_k.unwrap_or(defaults.top_k),
                user_agent: scholar.user_agent.clone().unwrap_or(defaults.user_agent),
            };
        }

        Ok(settings)
    }
}
