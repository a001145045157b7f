//! Grant-publication association for full-text biomedical corpora.
//!
//! `grantlink` takes a small set of articles known to be funded by a grant (the *seeds*),
//! finds further articles in a large JATS/NXML corpus that share an author with those
//! seeds, and keeps only the candidates whose body text is topically close to the seeds.
//!
//! # Pipeline
//!
//! 1. **Seed discovery** ([`seeds::discover_seeds`]): scan acknowledgements and abstracts
//!    for a funder mention plus a grant number.
//! 2. **Seed loading** ([`GrantIndex::load_seeds`]): build the grant index and the
//!    per-grant authors pool.
//! 3. **Corpus scan** ([`scan::CorpusScanner`]): one pass over the corpus, matching every
//!    document's authors against every grant at once.
//! 4. **Scoring** ([`score::SimilarityScorer`]): a TF-IDF space local to each grant, a seed
//!    centroid, and a cosine-similarity threshold.
//! 5. **Enrichment** ([`citations`]): citation counts and journal impact factors.
//!
//! # Basic Usage
//!
//! ```rust
//! use grantlink::{GrantIndex, Location};
//! use grantlink::seeds::SeedRecord;
//!
//! let seeds = vec![SeedRecord {
//!     location: Location::new("articles.A-B", "Cancer_Res", "paper1.nxml"),
//!     title: "Tumor therapy".to_string(),
//!     grant_id: Some("RSG-03-098-08".to_string()),
//!     authors: vec!["Smith, John".to_string()],
//!     ..Default::default()
//! }];
//!
//! let mut index = GrantIndex::new();
//! index.load_seeds(seeds).unwrap();
//! assert_eq!(index.find_grants_by_author("Smith, John").len(), 1);
//! ```
//!
//! # Error Handling
//!
//! The library uses a custom [`Result`] type that wraps [`GrantError`]. Only structural
//! failures (malformed seed input, unreadable corpus root or checkpoint) are returned as
//! errors from a stage. Per-document and per-grant failures are logged and counted in the
//! stage report instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod checkpoint;
pub mod citations;
pub mod config;
pub mod corpus;
pub mod extract;
pub mod grant;
pub mod scan;
pub mod score;
pub mod seeds;
pub mod tfidf;
mod utils;

// Reexports
pub use extract::{ExtractedFields, FieldExtractor, JatsExtractor};
pub use grant::{Grant, GrantIndex};

/// A specialized Result type for grant linking operations.
pub type Result<T> = std::result::Result<T, GrantError>;

/// Errors raised by the pipeline stages.
///
/// `MalformedSeed`, `CorpusRoot`, `Interrupted`, `Io`, `Csv`, `Json` and `Config` abort a
/// stage.
/// `Extraction`, `Vectorization`, `DegenerateGrant` and `ExternalService` describe
/// isolated per-document or per-grant failures; stages log and count them.
#[derive(Error, Debug)]
pub enum GrantError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Checkpoint error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed seed record at line {line}: {message}")]
    MalformedSeed { line: usize, message: String },

    #[error("Extraction failed for {location}: {message}")]
    Extraction { location: String, message: String },

    #[error("Vectorization failed for {location}: {message}")]
    Vectorization { location: String, message: String },

    #[error("Grant {grant_id} has no scoreable seed vectors")]
    DegenerateGrant { grant_id: String },

    #[error("External service failure: {0}")]
    ExternalService(String),

    #[error("Corpus root {path} is unreadable: {message}")]
    CorpusRoot { path: String, message: String },

    #[error("Stage interrupted: {0}")]
    Interrupted(String),
}

impl From<csv::Error> for GrantError {
    fn from(err: csv::Error) -> Self {
        GrantError::Csv(err.to_string())
    }
}

impl From<quick_xml::Error> for GrantError {
    fn from(err: quick_xml::Error) -> Self {
        GrantError::Xml(err.to_string())
    }
}

impl From<serde_json::Error> for GrantError {
    fn from(err: serde_json::Error) -> Self {
        GrantError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for GrantError {
    fn from(err: toml::de::Error) -> Self {
        GrantError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for GrantError {
    fn from(err: reqwest::Error) -> Self {
        GrantError::ExternalService(err.to_string())
    }
}

/// Location of a source document, relative to the corpus root.
///
/// Stored as `folder/subfolder/filename` with forward slashes regardless of the
/// platform or the separator used in the seed table. This is the sole identity of a
/// [`Publication`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    /// Builds a location from the three corpus path components.
    #[must_use]
    pub fn new(folder: &str, subfolder: &str, filename: &str) -> Self {
        Self::from_relative(&format!("{folder}/{subfolder}/{filename}"))
    }

    /// Normalizes a relative path, accepting either `/` or `\` separators.
    #[must_use]
    pub fn from_relative(path: &str) -> Self {
        let normalized = path
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Location(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path component.
    pub fn filename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Splits into `(folder, subfolder, filename)` when the location has exactly that shape.
    pub fn components(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.0.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(folder), Some(subfolder), Some(filename)) if !filename.contains('/') => {
                Some((folder, subfolder, filename))
            }
            _ => None,
        }
    }

    /// Resolves this location against a corpus root.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A publication proposed for, or confirmed in, a grant's publication set.
///
/// Equality and hashing use [`Publication::location`] only. Two records for the same
/// document are the same publication even when their extracted titles differ.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Publication {
    /// Source document
    pub location: Location,
    /// Article title, empty when extraction failed
    pub title: String,
    /// Journal title, lowercased, empty when extraction failed
    pub journal: String,
    /// Author names as `Surname, Given names`, in document order
    pub authors: Vec<String>,
    /// Grant this publication is a seed of
    pub grant_id: Option<String>,
    /// Legacy citation annotation carried over from an earlier enrichment pass
    pub citation_text: Option<String>,
    /// PubMed ID
    pub pmid: Option<String>,
    /// Term-weight vector in the owning grant's space, set during scoring
    #[serde(skip)]
    pub vector: Option<tfidf::TermVector>,
}

impl Publication {
    /// Builds a candidate publication from extracted document fields.
    #[must_use]
    pub fn candidate(location: Location, fields: &ExtractedFields) -> Self {
        Publication {
            location,
            title: fields.title.as_deref().map(normalize_title).unwrap_or_default(),
            journal: fields
                .journal
                .as_deref()
                .map(str::to_lowercase)
                .unwrap_or_default(),
            authors: fields.authors.clone(),
            pmid: fields.pmid.clone(),
            ..Default::default()
        }
    }

    /// True iff this publication was declared funded by a grant in the seed table.
    pub fn is_seed(&self) -> bool {
        self.grant_id.is_some()
    }
}

impl PartialEq for Publication {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for Publication {}

impl Hash for Publication {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

/// Title form used in tables and scholar queries: hyphens become spaces.
pub(crate) fn normalize_title(title: &str) -> String {
    utils::collapse_whitespace(&title.replace('-', " "))
}
