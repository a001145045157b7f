//! Seed tables and seed discovery.
//!
//! A seed table lists articles confirmed as funded by a grant, one row per article:
//! `folder, subfolder, filename, title, journal, grant, citation`. Tables with a header
//! row are matched by column name (see [`SeedTableConfig`]); headerless tables are read
//! positionally, either in that order or in the legacy eight-column order which carries
//! a journal impact factor between `journal` and `grant`.
//!
//! # Example
//!
//! ```
//! use grantlink::seeds::SeedTableReader;
//!
//! let input = "folder,subfolder,filename,title,journal,grant,citation\n\
//!              articles.A-B,Blood,a.nxml,Tumor therapy,blood,RSG-03-098-08,\n";
//!
//! let rows = SeedTableReader::new().read(input).unwrap();
//! assert_eq!(rows[0].grant_number.as_deref(), Some("RSG-03-098-08"));
//! assert_eq!(rows[0].location().as_str(), "articles.A-B/Blood/a.nxml");
//! ```

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::corpus::{is_sentinel, Corpus};
use crate::extract::funding::funder_mention;
use crate::extract::FieldExtractor;
use crate::scan::map_documents;
use crate::{normalize_title, GrantError, Location, Publication, Result};

/// Default header mappings for seed table columns
const DEFAULT_HEADERS: &[(&str, &[&str])] = &[
    ("folder", &["folder", "collection"]),
    ("subfolder", &["subfolder", "journal folder", "directory", "dirname"]),
    ("filename", &["filename", "file", "file name"]),
    ("title", &["title", "article title"]),
    ("journal", &["journal", "journal title"]),
    (
        "grant",
        &["grant", "grant number", "grant_number", "grant id", "grant_id", "grantno"],
    ),
    ("citation", &["citation", "citations", "cited by"]),
];

const DEFAULT_POSITIONS: &[&str] = &[
    "folder",
    "subfolder",
    "filename",
    "title",
    "journal",
    "grant",
    "citation",
];

const LEGACY_POSITIONS: &[&str] = &[
    "folder",
    "subfolder",
    "filename",
    "title",
    "journal",
    "impact_factor",
    "grant",
    "citation",
];

/// Column mapping and dialect options for seed tables.
#[derive(Debug, Clone)]
pub struct SeedTableConfig {
    header_map: HashMap<String, Vec<String>>,
    /// Field per column when the table has no header row
    positions: Vec<String>,
    delimiter: u8,
    has_header: bool,
}

impl Default for SeedTableConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedTableConfig {
    /// Headered, comma-separated tables with the default column names.
    #[must_use]
    pub fn new() -> Self {
        let header_map = DEFAULT_HEADERS
            .iter()
            .map(|(field, aliases)| {
                (
                    field.to_string(),
                    aliases.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();
        Self {
            header_map,
            positions: DEFAULT_POSITIONS.iter().map(|s| s.to_string()).collect(),
            delimiter: b',',
            has_header: true,
        }
    }

    /// Headerless eight-column tables with the impact factor in column 6.
    #[must_use]
    pub fn legacy() -> Self {
        let mut config = Self::new();
        config.positions = LEGACY_POSITIONS.iter().map(|s| s.to_string()).collect();
        config.has_header = false;
        config
    }

    pub fn set_header_mapping(&mut self, field: &str, aliases: Vec<String>) -> &mut Self {
        self.header_map.insert(field.to_string(), aliases);
        self
    }

    pub fn set_delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    pub fn set_has_header(&mut self, has_header: bool) -> &mut Self {
        self.has_header = has_header;
        self
    }

    fn field_for_header(&self, header: &str) -> Option<&str> {
        let header = header.trim().to_lowercase();
        self.header_map
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|a| a.to_lowercase() == header))
            .map(|(field, _)| field.as_str())
    }
}

/// One row of a seed table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedRow {
    pub folder: String,
    pub subfolder: String,
    pub filename: String,
    pub title: String,
    pub journal: String,
    #[serde(rename = "grant")]
    pub grant_number: Option<String>,
    pub citation: Option<String>,
    /// 1-based line in the source table
    #[serde(skip)]
    pub line: usize,
}

impl SeedRow {
    pub fn location(&self) -> Location {
        Location::new(&self.folder, &self.subfolder, &self.filename)
    }
}

/// Reader for seed tables.
#[derive(Debug, Clone, Default)]
pub struct SeedTableReader {
    config: SeedTableConfig,
}

impl SeedTableReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: SeedTableConfig) -> Self {
        self.config = config;
        self
    }

    /// Reads a seed table from a file.
    pub fn read_path(&self, path: &Path) -> Result<Vec<SeedRow>> {
        let input = std::fs::read_to_string(path)?;
        self.read(&input)
    }

    /// Parses seed table text.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::MalformedSeed`] for a row that does not name a document,
    /// and [`GrantError::Csv`] when the table itself cannot be parsed. Rows with an
    /// empty grant column are kept; [`crate::GrantIndex::load_seeds`] rejects them.
    pub fn read(&self, input: &str) -> Result<Vec<SeedRow>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.config.delimiter)
            .has_headers(self.config.has_header)
            .flexible(true)
            .from_reader(input.as_bytes());

        let columns: Vec<Option<String>> = if self.config.has_header {
            reader
                .headers()?
                .iter()
                .map(|h| self.config.field_for_header(h).map(str::to_string))
                .collect()
        } else {
            self.config.positions.iter().cloned().map(Some).collect()
        };

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|value| value.trim().is_empty()) {
                continue;
            }
            rows.push(parse_row(&columns, &record)?);
        }
        Ok(rows)
    }
}

fn parse_row(columns: &[Option<String>], record: &StringRecord) -> Result<SeedRow> {
    let line = record.position().map_or(0, |p| p.line() as usize);
    let mut row = SeedRow {
        line,
        ..Default::default()
    };

    for (field, value) in columns.iter().zip(record.iter()) {
        let value = value.trim();
        match field.as_deref() {
            Some("folder") => row.folder = value.to_string(),
            Some("subfolder") => row.subfolder = value.to_string(),
            Some("filename") => row.filename = value.to_string(),
            Some("title") => row.title = value.to_string(),
            Some("journal") => row.journal = value.to_string(),
            Some("grant") if !value.is_empty() => row.grant_number = Some(value.to_string()),
            Some("citation") if !value.is_empty() => row.citation = Some(value.to_string()),
            _ => {}
        }
    }

    if row.folder.is_empty() || row.subfolder.is_empty() || row.filename.is_empty() {
        return Err(GrantError::MalformedSeed {
            line,
            message: "row does not name a document".to_string(),
        });
    }
    Ok(row)
}

/// Writes rows as a headered seed table.
pub fn write_seed_table<W: Write>(writer: W, rows: &[SeedRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// A seed row resolved against its source document.
#[derive(Debug, Clone, Default)]
pub struct SeedRecord {
    pub location: Location,
    pub title: String,
    pub journal: String,
    pub grant_id: Option<String>,
    pub citation_text: Option<String>,
    pub authors: Vec<String>,
    pub pmid: Option<String>,
    pub line: usize,
}

impl SeedRecord {
    /// The grant identifier, if present and not blank.
    pub fn grant_key(&self) -> Option<&str> {
        self.grant_id
            .as_deref()
            .map(str::trim)
            .filter(|grant| !grant.is_empty())
    }

    pub(crate) fn into_publication(self) -> Publication {
        let grant_id = self.grant_key().map(str::to_string);
        Publication {
            location: self.location,
            title: self.title,
            journal: self.journal,
            authors: self.authors,
            grant_id,
            citation_text: self.citation_text,
            pmid: self.pmid,
            vector: None,
        }
    }
}

impl From<SeedRow> for SeedRecord {
    fn from(row: SeedRow) -> Self {
        SeedRecord {
            location: row.location(),
            title: row.title,
            journal: row.journal,
            grant_id: row.grant_number,
            citation_text: row.citation,
            line: row.line,
            ..Default::default()
        }
    }
}

/// Reads each seed's source document for its authors and PMID.
///
/// A seed whose document cannot be read or parsed keeps an empty author list, so it
/// contributes nothing to its grant's authors pool.
pub fn resolve_seed_records(
    rows: Vec<SeedRow>,
    corpus: &Corpus,
    extractor: &dyn FieldExtractor,
) -> Vec<SeedRecord> {
    rows.into_iter()
        .map(|row| {
            let mut record = SeedRecord::from(row);
            let fields = corpus
                .read(&record.location)
                .and_then(|text| extractor.extract(&text));
            match fields {
                Ok(fields) => {
                    record.authors = fields.authors;
                    record.pmid = fields.pmid;
                }
                Err(e) => {
                    tracing::warn!(location = %record.location, error = %e, "seed document unavailable, no authors");
                }
            }
            record
        })
        .collect()
}

/// Counts from a discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub scanned: usize,
    pub skipped_sentinel: usize,
    pub failed: usize,
    pub without_funding_text: usize,
    pub seeds: usize,
    pub interrupted: bool,
}

enum Discovered {
    Sentinel,
    Failed,
    NoFundingText,
    NotSeed,
    Seed(SeedRow),
}

/// Finds documents that name the funder and carry a grant number.
///
/// # Errors
///
/// Fails only when the corpus root cannot be listed.
pub fn discover_seeds(
    corpus: &Corpus,
    extractor: &dyn FieldExtractor,
    workers: Option<usize>,
    cancel: &CancellationToken,
) -> Result<(Vec<SeedRow>, DiscoveryReport)> {
    let locations = corpus.documents()?;
    tracing::info!(documents = locations.len(), "discovering seeds");

    let (outcomes, interrupted) = map_documents(&locations, workers, cancel, |location| {
        discover_one(corpus, extractor, location)
    })?;

    let mut report = DiscoveryReport {
        interrupted,
        ..Default::default()
    };
    let mut rows = Vec::new();
    for outcome in outcomes {
        match outcome {
            Discovered::Sentinel => {
                report.skipped_sentinel += 1;
                continue;
            }
            Discovered::Failed => report.failed += 1,
            Discovered::NoFundingText => report.without_funding_text += 1,
            Discovered::NotSeed => {}
            Discovered::Seed(row) => rows.push(row),
        }
        report.scanned += 1;
    }
    report.seeds = rows.len();

    tracing::info!(
        scanned = report.scanned,
        seeds = report.seeds,
        failed = report.failed,
        interrupted = report.interrupted,
        "seed discovery finished"
    );
    Ok((rows, report))
}

fn discover_one(corpus: &Corpus, extractor: &dyn FieldExtractor, location: &Location) -> Discovered {
    if is_sentinel(location.filename()) {
        return Discovered::Sentinel;
    }

    let fields = match corpus.read(location).and_then(|text| extractor.extract(&text)) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!(location = %location, error = %e, "skipping unreadable document");
            return Discovered::Failed;
        }
    };

    let Some(funding_text) = fields.funding_text() else {
        tracing::debug!(location = %location, "no acknowledgement or abstract");
        return Discovered::NoFundingText;
    };

    let Some(grant_number) = fields.grant_number.clone() else {
        return Discovered::NotSeed;
    };
    if !funder_mention(&funding_text).is_present() {
        return Discovered::NotSeed;
    }

    let Some((folder, subfolder, filename)) = location.components() else {
        return Discovered::NotSeed;
    };
    tracing::debug!(location = %location, grant = %grant_number, "seed found");

    Discovered::Seed(SeedRow {
        folder: folder.to_string(),
        subfolder: subfolder.to_string(),
        filename: filename.to_string(),
        title: fields.title.as_deref().map(normalize_title).unwrap_or_default(),
        journal: fields
            .journal
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default(),
        grant_number: Some(grant_number),
        citation: None,
        line: 0,
    })
}
