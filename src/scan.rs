//! Corpus scan: one pass over every document, matching authors against all grants.
//!
//! Documents are extracted and matched in parallel against a read-only view of the
//! index. Matches are then merged by a single writer in corpus order, one whole
//! document at a time, so a cancelled scan leaves every grant consistent.
//!
//! # Example
//!
//! ```no_run
//! use grantlink::corpus::Corpus;
//! use grantlink::scan::CorpusScanner;
//! use grantlink::{GrantIndex, JatsExtractor};
//!
//! let corpus = Corpus::open("/data/pmc", &[]).unwrap();
//! let mut index = GrantIndex::new();
//! let report = CorpusScanner::new(JatsExtractor::new())
//!     .with_workers(Some(8))
//!     .scan(&corpus, &mut index)
//!     .unwrap();
//! println!("{} of {} documents matched", report.matched, report.scanned);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::corpus::{is_sentinel, Corpus};
use crate::extract::FieldExtractor;
use crate::{GrantError, GrantIndex, Location, Publication, Result};

const PROGRESS_EVERY: usize = 5000;

/// Counts from a scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Non-sentinel documents visited
    pub scanned: usize,
    /// Documents matching at least one grant
    pub matched: usize,
    /// Documents that could not be read or parsed
    pub failed: usize,
    pub skipped_sentinel: usize,
    pub without_authors: usize,
    /// New candidates appended per grant
    pub per_grant: BTreeMap<String, usize>,
    pub interrupted: bool,
}

enum Outcome {
    Sentinel,
    Failed,
    NoAuthors,
    Unmatched,
    Matched {
        publication: Publication,
        grants: BTreeSet<String>,
    },
}

/// Finds candidate publications for every grant in a single corpus pass.
#[derive(Debug, Clone)]
pub struct CorpusScanner<E> {
    extractor: E,
    workers: Option<usize>,
    cancel: CancellationToken,
}

impl<E: FieldExtractor> CorpusScanner<E> {
    #[must_use]
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            workers: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Worker thread count. `None` uses the global pool.
    #[must_use]
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// Token checked between documents. Cancelling it ends the scan early.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Appends every document sharing an author with a grant to that grant.
    ///
    /// Authors pools are not widened by candidates.
    ///
    /// # Errors
    ///
    /// Fails only when the corpus cannot be listed. Per-document failures are logged
    /// and counted in the report.
    pub fn scan(&self, corpus: &Corpus, index: &mut GrantIndex) -> Result<ScanReport> {
        let locations = corpus.documents()?;
        tracing::info!(documents = locations.len(), grants = index.len(), "scanning corpus");

        let shared: &GrantIndex = index;
        let (outcomes, interrupted) = map_documents(&locations, self.workers, &self.cancel, |location| {
            self.match_document(corpus, shared, location)
        })?;

        let mut report = ScanReport {
            interrupted,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Sentinel => {
                    report.skipped_sentinel += 1;
                    continue;
                }
                Outcome::Failed => report.failed += 1,
                Outcome::NoAuthors => report.without_authors += 1,
                Outcome::Unmatched => {}
                Outcome::Matched {
                    publication,
                    grants,
                } => {
                    report.matched += 1;
                    for grant_id in grants {
                        if index.add_candidate(&grant_id, publication.clone()) {
                            *report.per_grant.entry(grant_id).or_default() += 1;
                        }
                    }
                }
            }
            report.scanned += 1;
        }

        if report.interrupted {
            tracing::warn!(scanned = report.scanned, "scan interrupted");
        }
        tracing::info!(
            scanned = report.scanned,
            matched = report.matched,
            failed = report.failed,
            without_authors = report.without_authors,
            "scan finished"
        );
        Ok(report)
    }

    fn match_document(&self, corpus: &Corpus, index: &GrantIndex, location: &Location) -> Outcome {
        if is_sentinel(location.filename()) {
            return Outcome::Sentinel;
        }

        let fields = match corpus.read(location).and_then(|text| self.extractor.extract(&text)) {
            Ok(fields) => fields,
            Err(e) => {
                let failure = GrantError::Extraction {
                    location: location.to_string(),
                    message: e.to_string(),
                };
                tracing::warn!("{failure}");
                return Outcome::Failed;
            }
        };

        if fields.authors.is_empty() {
            return Outcome::NoAuthors;
        }

        let grants = index.matching_grant_ids(&fields.authors);
        if grants.is_empty() {
            return Outcome::Unmatched;
        }

        tracing::debug!(location = %location, grants = grants.len(), "candidate found");
        Outcome::Matched {
            publication: Publication::candidate(location.clone(), &fields),
            grants,
        }
    }
}

/// Applies `f` to every location, stopping early once `cancel` fires.
///
/// Results keep the order of `locations`. The flag is true when some locations were
/// left unvisited.
pub(crate) fn map_documents<T, F>(
    locations: &[Location],
    workers: Option<usize>,
    cancel: &CancellationToken,
    f: F,
) -> Result<(Vec<T>, bool)>
where
    T: Send,
    F: Fn(&Location) -> T + Sync,
{
    let visited = AtomicUsize::new(0);
    let total = locations.len();
    let visit = |location: &Location| -> Option<T> {
        if cancel.is_cancelled() {
            return None;
        }
        let result = f(location);
        let done = visited.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_EVERY == 0 {
            tracing::info!(done, total, "progress");
        }
        Some(result)
    };

    let results: Vec<Option<T>> = in_worker_pool(workers, || {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            locations.par_iter().map(visit).collect::<Vec<_>>()
        }
        #[cfg(not(feature = "parallel"))]
        {
            locations.iter().map(visit).collect::<Vec<_>>()
        }
    })?;

    let interrupted = results.iter().any(Option::is_none);
    Ok((results.into_iter().flatten().collect(), interrupted))
}

/// Runs `op` on a dedicated pool of `workers` threads, or on the global pool.
#[cfg(feature = "parallel")]
pub(crate) fn in_worker_pool<R, OP>(workers: Option<usize>, op: OP) -> Result<R>
where
    R: Send,
    OP: FnOnce() -> R + Send,
{
    match workers {
        Some(threads) => Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| GrantError::Config(format!("worker pool: {e}")))?
            .install(op)),
        None => Ok(op()),
    }
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn in_worker_pool<R, OP>(_workers: Option<usize>, op: OP) -> Result<R>
where
    R: Send,
    OP: FnOnce() -> R + Send,
{
    Ok(op())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeds::SeedRecord;
    use crate::JatsExtractor;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;

    fn article(authors: &[(&str, &str)], body: &str) -> String {
        let contribs: String = authors
            .iter()
            .map(|(surname, given)| {
                format!(
                    "<contrib><name><surname>{surname}</surname><given-names>{given}</given-names></name></contrib>"
                )
            })
            .collect();
        format!(
            "<article><front><article-meta><title-group><article-title>T</article-title></title-group>\
             <contrib-group>{contribs}</contrib-group></article-meta></front><body><p>{body}</p></body></article>"
        )
    }

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn seeded_index() -> GrantIndex {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![
                SeedRecord {
                    location: Location::new("f", "s", "seed1.nxml"),
                    grant_id: Some("G1".to_string()),
                    authors: vec!["Smith, John".to_string()],
                    ..Default::default()
                },
                SeedRecord {
                    location: Location::new("f", "s", "seed2.nxml"),
                    grant_id: Some("G2".to_string()),
                    authors: vec!["Doe, Jane".to_string()],
                    ..Default::default()
                },
            ])
            .unwrap();
        index
    }

    fn corpus_fixture(root: &Path) {
        write(root, "f/s/seed1.nxml", &article(&[("Smith", "John")], "seed one"));
        write(root, "f/s/seed2.nxml", &article(&[("Doe", "Jane")], "seed two"));
        write(root, "f/s/both.nxml", &article(&[("Smith", "John"), ("Doe", "Jane")], "shared"));
        write(root, "f/s/one.nxml", &article(&[("Smith", "John"), ("Other", "Olga")], "solo"));
        write(root, "f/s/stranger.nxml", &article(&[("Stranger", "Sam")], "seed one"));
        write(root, "f/s/anon.nxml", "<article><body><p>no authors</p></body></article>");
        write(root, "f/s/broken.nxml", "<<<>>>");
        write(root, "f/s/#toc#", "");
    }

    #[test]
    fn test_scan_matches_documents_to_every_grant() {
        let dir = tempfile::tempdir().unwrap();
        corpus_fixture(dir.path());
        let corpus = Corpus::open(dir.path(), &[]).unwrap();
        let mut index = seeded_index();

        let report = CorpusScanner::new(JatsExtractor::new())
            .with_workers(Some(2))
            .scan(&corpus, &mut index)
            .unwrap();

        assert_eq!(report.scanned, 7);
        assert_eq!(report.skipped_sentinel, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.without_authors, 1);
        // seed1, seed2, both, one
        assert_eq!(report.matched, 4);
        assert_eq!(report.per_grant.get("G1"), Some(&2));
        assert_eq!(report.per_grant.get("G2"), Some(&1));
        assert!(!report.interrupted);

        let g1: Vec<_> = index
            .get("G1")
            .unwrap()
            .publications()
            .iter()
            .map(|p| p.location.filename().to_string())
            .collect();
        assert_eq!(g1, vec!["seed1.nxml", "both.nxml", "one.nxml"]);
    }

    #[test]
    fn test_candidates_do_not_snowball() {
        let dir = tempfile::tempdir().unwrap();
        corpus_fixture(dir.path());
        let corpus = Corpus::open(dir.path(), &[]).unwrap();
        let mut index = seeded_index();

        CorpusScanner::new(JatsExtractor::new())
            .scan(&corpus, &mut index)
            .unwrap();

        assert!(!index.get("G1").unwrap().has_author("Other, Olga"));
        assert!(index.find_grants_by_author("Other, Olga").is_empty());
        assert!(index.grants().all(|grant| {
            grant
                .publications()
                .iter()
                .all(|p| p.location.filename() != "stranger.nxml")
        }));
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        corpus_fixture(dir.path());
        let corpus = Corpus::open(dir.path(), &[]).unwrap();
        let mut index = seeded_index();
        let scanner = CorpusScanner::new(JatsExtractor::new());

        scanner.scan(&corpus, &mut index).unwrap();
        let second = scanner.scan(&corpus, &mut index).unwrap();

        assert!(second.per_grant.is_empty());
        assert_eq!(index.get("G1").unwrap().publications().len(), 3);
    }

    #[test]
    fn test_cancelled_scan_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        corpus_fixture(dir.path());
        let corpus = Corpus::open(dir.path(), &[]).unwrap();
        let mut index = seeded_index();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = CorpusScanner::new(JatsExtractor::new())
            .with_cancellation(cancel)
            .scan(&corpus, &mut index)
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.scanned, 0);
        assert_eq!(index.get("G1").unwrap().publications().len(), 1);
    }

    #[test]
    fn test_map_documents_keeps_order() {
        let locations: Vec<_> = (0..50)
            .map(|i| Location::new("f", "s", &format!("{i:03}.nxml")))
            .collect();
        let (names, interrupted) = map_documents(&locations, Some(4), &CancellationToken::new(), |l| {
            l.filename().to_string()
        })
        .unwrap();

        assert!(!interrupted);
        assert_eq!(names.first().map(String::as_str), Some("000.nxml"));
        assert_eq!(names.last().map(String::as_str), Some("049.nxml"));
        assert_eq!(names.len(), 50);
    }
}
