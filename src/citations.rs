//! Citation counts and journal impact factors.
//!
//! Citation counts come from a scholarly search engine through the [`CitationLookup`]
//! trait. The lookup stage reads an article table (the seed table layout), appends one
//! citation row per article to its output and skips titles already present there, so an
//! interrupted run resumes where it stopped.
//!
//! Citation rows are headerless:
//!
//! `folder, subfolder, filename, title, journal, grant, citation, matched_title`
//!
//! `citation` holds the looked-up count, or the article's own annotation when no
//! result matched; `matched_title` is present only with a count. [`enrich`] inserts the
//! journal impact factor after `journal`, which gives the legacy layout read by
//! [`crate::seeds::SeedTableConfig::legacy`], the count landing in its `citation` column.

use csv::{ReaderBuilder, StringRecord};
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::seeds::SeedRow;
use crate::tfidf::title_similarity;
use crate::utils::{collapse_whitespace, replace_unprintable};
use crate::{GrantError, Result};

/// Best search result for a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMatch {
    pub citations: u32,
    pub matched_title: String,
}

/// Source of citation counts.
pub trait CitationLookup: Send + Sync {
    /// Looks up one title. `Ok(None)` means no result resembled it.
    fn lookup<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CitationMatch>>> + Send + 'a>>;
}

/// Scholar client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ScholarConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Number of leading results considered
    pub top_k: usize,
    pub user_agent: String,
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://scholar.google.com/scholar".to_string(),
            timeout: Duration::from_secs(10),
            top_k: 5,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
                .to_string(),
        }
    }
}

/// One parsed search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub citations: u32,
}

/// HTML scholar search client.
pub struct ScholarClient {
    client: reqwest::Client,
    config: ScholarConfig,
}

impl ScholarClient {
    pub fn new(config: ScholarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}?hl=en&q={}&as_sdt=1,5&num={}",
            self.config.base_url,
            urlencoding::encode(query),
            self.config.top_k
        )
    }
}

impl CitationLookup for ScholarClient {
    fn lookup<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CitationMatch>>> + Send + 'a>> {
        Box::pin(async move {
            let query = prepare_query(title);
            if query.is_empty() {
                return Ok(None);
            }

            let response = self
                .client
                .get(self.search_url(&query))
                .header("Accept", "text/html,application/xhtml+xml")
                .timeout(self.config.timeout)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(GrantError::ExternalService(format!(
                    "HTTP {}",
                    response.status()
                )));
            }
            let html = response.text().await?;

            // scraper's DOM is not Send
            let top_k = self.config.top_k;
            tokio::task::spawn_blocking(move || best_match(&query, &parse_results(&html), top_k))
                .await
                .map_err(|e| GrantError::ExternalService(e.to_string()))
        })
    }
}

/// Title in the form sent to the search engine.
pub fn prepare_query(title: &str) -> String {
    collapse_whitespace(&replace_unprintable(&title.replace('-', " "), ""))
}

static RESULT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.gs_ri").unwrap());
static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3.gs_rt").unwrap());
static TITLE_LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3.gs_rt a").unwrap());
static LINKS_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.gs_fl a").unwrap());

/// Parses a result page into titles and citation counts, in page order.
pub fn parse_results(html: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_SELECTOR)
        .filter_map(|result| {
            let heading = result
                .select(&TITLE_LINK_SELECTOR)
                .next()
                .or_else(|| result.select(&TITLE_SELECTOR).next())?;
            let title = collapse_whitespace(&heading.text().collect::<String>().replace(',', " "));
            let title = strip_markers(&title).to_string();

            let citations = result
                .select(&LINKS_SELECTOR)
                .filter_map(|link| {
                    let text = link.text().collect::<String>();
                    text.trim().strip_prefix("Cited by")?.trim().parse::<u32>().ok()
                })
                .next()
                .unwrap_or(0);

            Some(SearchResult { title, citations })
        })
        .collect()
}

/// Drops leading `[PDF]`-style type markers.
fn strip_markers(title: &str) -> &str {
    let mut title = title.trim_start();
    while title.starts_with('[') {
        match title.find(']') {
            Some(end) => title = title[end + 1..].trim_start(),
            None => break,
        }
    }
    title
}

/// Picks the result among the first `top_k` whose title is most similar to `query`.
///
/// A result only wins with similarity above zero; ties keep the earlier result.
pub fn best_match(query: &str, results: &[SearchResult], top_k: usize) -> Option<CitationMatch> {
    let mut best: Option<(&SearchResult, f64)> = None;
    for result in results.iter().take(top_k) {
        let similarity = title_similarity(&result.title, query);
        if similarity > best.map_or(0.0, |(_, s)| s) {
            best = Some((result, similarity));
        }
    }
    best.map(|(result, _)| CitationMatch {
        citations: result.citations,
        matched_title: result.title.clone(),
    })
}

/// An article with its citation lookup outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationRow {
    pub article: SeedRow,
    pub citations: Option<u32>,
    pub matched_title: Option<String>,
}

impl CitationRow {
    fn from_record(record: &StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or("").trim().to_string();
        let optional = |i: usize| Some(field(i)).filter(|v| !v.is_empty());
        CitationRow {
            article: SeedRow {
                folder: field(0),
                subfolder: field(1),
                filename: field(2),
                title: field(3),
                journal: field(4),
                grant_number: optional(5),
                citation: optional(6),
                line: record.position().map_or(0, |p| p.line() as usize),
            },
            citations: optional(6).and_then(|c| c.parse().ok()),
            matched_title: optional(7),
        }
    }

    fn to_record(&self, impact_factor: Option<Option<&str>>) -> Vec<String> {
        let a = &self.article;
        let mut record = vec![
            a.folder.clone(),
            a.subfolder.clone(),
            a.filename.clone(),
            a.title.clone(),
            a.journal.clone(),
        ];
        if let Some(impact_factor) = impact_factor {
            record.push(impact_factor.unwrap_or_default().to_string());
        }
        record.push(a.grant_number.clone().unwrap_or_default());
        match self.citations {
            Some(citations) => {
                record.push(citations.to_string());
                record.push(self.matched_title.clone().unwrap_or_default());
            }
            None => record.push(a.citation.clone().unwrap_or_default()),
        }
        record
    }
}

/// Reads headerless citation rows.
pub fn read_citation_rows(input: &str) -> Result<Vec<CitationRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        rows.push(CitationRow::from_record(&record));
    }
    Ok(rows)
}

/// Titles already present in an existing citation output. Missing file means none.
pub fn finished_titles(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let input = std::fs::read_to_string(path)?;
    Ok(read_citation_rows(&input)?
        .into_iter()
        .map(|row| row.article.title)
        .collect())
}

/// Counts from a lookup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupReport {
    pub skipped: usize,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// Looks up every article not in `finished` and appends its row to `writer`.
///
/// Each row is flushed as soon as it is written. Lookup failures keep the row
/// without citation fields.
pub async fn lookup_citations<W: Write>(
    lookup: &dyn CitationLookup,
    articles: &[SeedRow],
    finished: &HashSet<String>,
    writer: W,
    cancel: &CancellationToken,
) -> Result<LookupReport> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(writer);
    let mut report = LookupReport::default();

    for article in articles {
        if finished.contains(&article.title) {
            report.skipped += 1;
            continue;
        }
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }

        let mut row = CitationRow {
            article: article.clone(),
            ..Default::default()
        };
        match lookup.lookup(&article.title).await {
            Ok(Some(found)) => {
                tracing::debug!(title = %article.title, citations = found.citations, "citations found");
                row.citations = Some(found.citations);
                row.matched_title = Some(found.matched_title);
                report.found += 1;
            }
            Ok(None) => {
                tracing::debug!(title = %article.title, "no matching result");
                report.not_found += 1;
            }
            Err(e) => {
                tracing::warn!(title = %article.title, error = %e, "citation lookup failed");
                report.failed += 1;
            }
        }
        writer.write_record(row.to_record(None))?;
        writer.flush()?;
    }

    tracing::info!(
        found = report.found,
        not_found = report.not_found,
        failed = report.failed,
        skipped = report.skipped,
        "citation lookup finished"
    );
    Ok(report)
}

/// Journal impact factors keyed by lowercased journal title.
#[derive(Debug, Clone, Default)]
pub struct ImpactFactors {
    factors: HashMap<String, String>,
}

impl ImpactFactors {
    /// Reads `(journal, impact_factor)` rows. A journal without a factor is listed
    /// but unknown.
    pub fn read(input: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input.as_bytes());
        let mut factors = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let journal = record.get(0).unwrap_or("").trim().to_lowercase();
            if journal.is_empty() {
                continue;
            }
            let factor = record.get(1).unwrap_or("").trim().to_string();
            factors.insert(journal, factor);
        }
        Ok(Self { factors })
    }

    pub fn get(&self, journal: &str) -> Option<&str> {
        self.factors
            .get(&journal.to_lowercase())
            .map(String::as_str)
            .filter(|factor| !factor.is_empty())
    }

    pub fn contains(&self, journal: &str) -> bool {
        self.factors.contains_key(&journal.to_lowercase())
    }
}

/// A citation row with its journal impact factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedRow {
    pub row: CitationRow,
    pub impact_factor: Option<String>,
}

/// Attaches impact factors to citation rows.
pub fn enrich(rows: Vec<CitationRow>, factors: &ImpactFactors) -> Vec<EnrichedRow> {
    rows.into_iter()
        .map(|row| EnrichedRow {
            impact_factor: factors.get(&row.article.journal).map(str::to_string),
            row,
        })
        .collect()
}

/// Writes enriched rows in the legacy headerless layout.
pub fn write_enriched<W: Write>(writer: W, rows: &[EnrichedRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(writer);
    for enriched in rows {
        writer.write_record(enriched.row.to_record(Some(enriched.impact_factor.as_deref())))?;
    }
    writer.flush()?;
    Ok(())
}

/// Lowercased journals of `rows` absent from `factors`, sorted.
pub fn missing_journals(rows: &[CitationRow], factors: &ImpactFactors) -> Vec<String> {
    let mut missing: Vec<String> = rows
        .iter()
        .map(|row| row.article.journal.trim().to_lowercase())
        .filter(|journal| !journal.is_empty() && !factors.contains(journal))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    missing.sort();
    missing
}

/// Appends journals to an impact factor table, one per line, factor left blank.
pub fn append_journals(path: &Path, journals: &[String]) -> Result<()> {
    let needs_newline = std::fs::read(path)
        .map(|existing| existing.last().is_some_and(|&b| b != b'\n'))
        .unwrap_or(false);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_newline {
        writeln!(file)?;
    }
    for journal in journals {
        writeln!(file, "{journal}")?;
    }
    Ok(())
}

/// Per-grant citation and impact factor cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantSummary {
    pub grant_id: String,
    pub cells: Vec<String>,
}

/// Groups enriched rows by grant, ordered by grant identifier.
pub fn grant_summary(rows: &[EnrichedRow]) -> Vec<GrantSummary> {
    let mut grants: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for enriched in rows {
        let Some(grant) = enriched.row.article.grant_number.as_deref() else {
            continue;
        };
        let citations = enriched
            .row
            .citations
            .map(|c| c.to_string())
            .unwrap_or_default();
        let impact_factor = enriched.impact_factor.as_deref().unwrap_or_default();
        grants
            .entry(grant)
            .or_default()
            .push(format!("Cited by: {citations}  Impact Factor: {impact_factor}"));
    }
    grants
        .into_iter()
        .map(|(grant_id, cells)| GrantSummary {
            grant_id: grant_id.to_string(),
            cells,
        })
        .collect()
}

pub fn write_grant_summary<W: Write>(writer: W, summaries: &[GrantSummary]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(writer);
    for summary in summaries {
        let mut record = vec![summary.grant_id.as_str()];
        record.extend(summary.cells.iter().map(String::as_str));
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}
