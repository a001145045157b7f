//! Similarity scoring of candidate publications.
//!
//! Each grant is scored in its own term space: a [`TfidfModel`] is fitted over the
//! bodies of the grant's publications only, the seed vectors are averaged into a
//! centroid, and candidates are ranked by cosine similarity to it. The ranked list is
//! consumed from the top while the similarity stays at or above the threshold.
//!
//! Grants share no state, so [`SimilarityScorer::score_index`] scores them in parallel.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::corpus::Corpus;
use crate::extract::FieldExtractor;
use crate::scan::in_worker_pool;
use crate::tfidf::{cosine_similarity, TermVector, TfidfConfig, TfidfModel};
use crate::{Grant, GrantError, GrantIndex, Location, Result};

/// Denominator used when averaging seed vectors.
///
/// Dividing by a different positive count only scales the centroid, which leaves
/// every cosine similarity unchanged, so both modes accept the same candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CentroidMode {
    /// Number of seed vectors summed
    #[default]
    TrueCount,
    /// Number of seed vectors summed, plus one
    Legacy,
}

impl CentroidMode {
    fn denominator(self, summed: usize) -> f64 {
        match self {
            CentroidMode::TrueCount => summed as f64,
            CentroidMode::Legacy => (summed + 1) as f64,
        }
    }
}

/// Scoring parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Minimum cosine similarity for a candidate to be kept
    pub threshold: f64,
    pub tfidf: TfidfConfig,
    pub centroid: CentroidMode,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            tfidf: TfidfConfig::default(),
            centroid: CentroidMode::default(),
        }
    }
}

impl ScoringConfig {
    /// # Errors
    ///
    /// Returns [`GrantError::Config`] for a non-finite threshold, an empty vocabulary
    /// cap or an invalid n-gram range.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(GrantError::Config(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        if self.tfidf.max_features == 0 {
            return Err(GrantError::Config("max_features must be at least 1".to_string()));
        }
        let (min_n, max_n) = self.tfidf.ngram_range;
        if min_n == 0 || min_n > max_n {
            return Err(GrantError::Config(format!(
                "invalid n-gram range {min_n}..={max_n}"
            )));
        }
        Ok(())
    }
}

/// Supplies the body text of a publication.
pub trait BodySource: Sync {
    /// `None` when the body cannot be obtained.
    fn body(&self, location: &Location) -> Option<String>;
}

impl BodySource for HashMap<Location, String> {
    fn body(&self, location: &Location) -> Option<String> {
        self.get(location).cloned()
    }
}

/// Bodies read from corpus documents on demand.
pub struct CorpusBodies<'a, E> {
    corpus: &'a Corpus,
    extractor: E,
}

impl<'a, E: FieldExtractor> CorpusBodies<'a, E> {
    #[must_use]
    pub fn new(corpus: &'a Corpus, extractor: E) -> Self {
        Self { corpus, extractor }
    }
}

impl<E: FieldExtractor> BodySource for CorpusBodies<'_, E> {
    fn body(&self, location: &Location) -> Option<String> {
        let text = match self.corpus.read(location) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(location = %location, error = %e, "document unreadable");
                return None;
            }
        };
        match self.extractor.extract(&text) {
            Ok(fields) => fields.body_text,
            Err(e) => {
                tracing::debug!(location = %location, error = %e, "document unparseable");
                None
            }
        }
    }
}

/// Outcome of scoring one grant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantScore {
    pub grant_id: String,
    pub seeds: usize,
    pub candidates: usize,
    /// Publications without a usable body
    pub unvectorized: usize,
    pub accepted: usize,
    pub degenerate: bool,
    /// Candidate similarities, highest first
    pub similarities: Vec<(Location, f64)>,
}

/// Counts from a scoring pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreReport {
    pub grants_scored: usize,
    pub grants_degenerate: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub unvectorized: usize,
    pub grants: Vec<GrantScore>,
}

impl ScoreReport {
    fn add(&mut self, score: GrantScore) {
        if score.degenerate {
            self.grants_degenerate += 1;
        } else {
            self.grants_scored += 1;
            self.rejected += score.candidates - score.accepted;
        }
        self.accepted += score.accepted;
        self.unvectorized += score.unvectorized;
        self.grants.push(score);
    }
}

/// Keeps the candidates of each grant that are textually close to its seeds.
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    config: ScoringConfig,
    workers: Option<usize>,
}

impl SimilarityScorer {
    /// # Errors
    ///
    /// Fails when `config` does not validate.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            workers: None,
        })
    }

    #[must_use]
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Scores every grant and returns the refined index.
    ///
    /// # Errors
    ///
    /// Fails only when the worker pool cannot be built.
    pub fn score_index(
        &self,
        index: GrantIndex,
        bodies: &dyn BodySource,
    ) -> Result<(GrantIndex, ScoreReport)> {
        let grants = index.into_grants();
        tracing::info!(grants = grants.len(), threshold = self.config.threshold, "scoring grants");

        let scored: Vec<(Grant, GrantScore)> = in_worker_pool(self.workers, || {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;
                grants
                    .par_iter()
                    .map(|grant| self.score_grant(grant, bodies))
                    .collect::<Vec<_>>()
            }
            #[cfg(not(feature = "parallel"))]
            {
                grants
                    .iter()
                    .map(|grant| self.score_grant(grant, bodies))
                    .collect::<Vec<_>>()
            }
        })?;

        let mut report = ScoreReport::default();
        let mut refined = Vec::with_capacity(scored.len());
        for (grant, score) in scored {
            report.add(score);
            refined.push(grant);
        }

        tracing::info!(
            scored = report.grants_scored,
            degenerate = report.grants_degenerate,
            accepted = report.accepted,
            rejected = report.rejected,
            "scoring finished"
        );
        Ok((GrantIndex::from_grants(refined), report))
    }

    /// Scores one grant, returning its refined copy.
    ///
    /// Seeds are always kept. A grant without any usable seed vector keeps its seeds
    /// only and is flagged degenerate.
    pub fn score_grant(&self, grant: &Grant, bodies: &dyn BodySource) -> (Grant, GrantScore) {
        let publications = grant.publications();
        let mut score = GrantScore {
            grant_id: grant.grant_id().to_string(),
            seeds: grant.seeds().count(),
            candidates: grant.candidates().count(),
            ..Default::default()
        };

        let texts: Vec<Option<String>> = publications
            .iter()
            .map(|publication| {
                let body = bodies
                    .body(&publication.location)
                    .filter(|body| !body.trim().is_empty());
                if body.is_none() {
                    let failure = GrantError::Vectorization {
                        location: publication.location.to_string(),
                        message: "no body text".to_string(),
                    };
                    tracing::debug!(grant_id = %grant.grant_id(), "{failure}");
                }
                body
            })
            .collect();
        score.unvectorized = texts.iter().filter(|t| t.is_none()).count();

        let model = TfidfModel::fit(texts.iter().flatten().map(String::as_str), &self.config.tfidf);
        let vectors: Vec<Option<TermVector>> = texts
            .iter()
            .map(|text| text.as_deref().map(|body| model.transform(body)))
            .collect();

        let centroid = self.centroid(
            publications
                .iter()
                .zip(&vectors)
                .filter(|(publication, _)| publication.is_seed())
                .filter_map(|(_, vector)| vector.as_ref()),
            model.dimensions(),
        );

        let Some(centroid) = centroid else {
            let failure = GrantError::DegenerateGrant {
                grant_id: grant.grant_id().to_string(),
            };
            tracing::warn!("{failure}");
            score.degenerate = true;
            let seeds = grant.seeds().cloned().collect();
            return (grant.with_scored_publications(seeds, true), score);
        };

        let mut ranked: Vec<(usize, f64)> = publications
            .iter()
            .zip(&vectors)
            .enumerate()
            .filter(|(_, (publication, _))| !publication.is_seed())
            .filter_map(|(i, (_, vector))| {
                cosine_similarity(vector.as_ref()?, &centroid).map(|similarity| (i, similarity))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let accepted: HashSet<usize> = ranked
            .iter()
            .take_while(|(_, similarity)| *similarity >= self.config.threshold)
            .map(|(i, _)| *i)
            .collect();
        score.accepted = accepted.len();
        score.similarities = ranked
            .iter()
            .map(|&(i, similarity)| (publications[i].location.clone(), similarity))
            .collect();

        let kept = publications
            .iter()
            .zip(vectors)
            .enumerate()
            .filter(|(i, (publication, _))| publication.is_seed() || accepted.contains(i))
            .map(|(_, (publication, vector))| {
                let mut publication = publication.clone();
                publication.vector = vector;
                publication
            })
            .collect();

        tracing::debug!(
            grant_id = %grant.grant_id(),
            candidates = score.candidates,
            accepted = score.accepted,
            "grant scored"
        );
        (grant.with_scored_publications(kept, false), score)
    }

    /// Mean of the seed vectors, or `None` when there is nothing to average.
    fn centroid<'v>(
        &self,
        seed_vectors: impl Iterator<Item = &'v TermVector>,
        dimensions: usize,
    ) -> Option<TermVector> {
        let mut sum = TermVector::zeros(dimensions);
        let mut summed = 0;
        for vector in seed_vectors {
            sum.add_assign(vector);
            summed += 1;
        }
        if summed == 0 || sum.is_zero() {
            return None;
        }
        sum.scale(1.0 / self.config.centroid.denominator(summed));
        Some(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeds::SeedRecord;
    use crate::Publication;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn location(name: &str) -> Location {
        Location::new("f", "s", name)
    }

    /// G1 with two seeds and the given candidates, plus their bodies.
    fn fixture(candidates: &[(&str, Option<&str>)]) -> (GrantIndex, HashMap<Location, String>) {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![
                SeedRecord {
                    location: location("s1"),
                    grant_id: Some("G1".to_string()),
                    authors: vec!["Smith, John".to_string()],
                    ..Default::default()
                },
                SeedRecord {
                    location: location("s2"),
                    grant_id: Some("G1".to_string()),
                    authors: vec!["Doe, Jane".to_string()],
                    ..Default::default()
                },
            ])
            .unwrap();

        let mut bodies = HashMap::new();
        bodies.insert(location("s1"), "cancer treatment trial results".to_string());
        bodies.insert(location("s2"), "tumor therapy clinical trial".to_string());

        for (name, body) in candidates {
            index.add_candidate(
                "G1",
                Publication {
                    location: location(name),
                    authors: vec!["Smith, John".to_string()],
                    ..Default::default()
                },
            );
            if let Some(body) = body {
                bodies.insert(location(name), body.to_string());
            }
        }
        (index, bodies)
    }

    fn scorer(threshold: f64) -> SimilarityScorer {
        SimilarityScorer::new(ScoringConfig {
            threshold,
            ..Default::default()
        })
        .unwrap()
    }

    fn kept_names(grant: &Grant) -> Vec<String> {
        grant
            .publications()
            .iter()
            .map(|p| p.location.filename().to_string())
            .collect()
    }

    #[test]
    fn test_retained_count_is_monotonic_in_threshold() {
        let (index, bodies) = fixture(&[
            ("c1", Some("cancer treatment outcomes study")),
            ("c2", Some("tumor therapy trial in mice")),
            ("c3", Some("unrelated galaxy survey")),
        ]);
        let grant = index.get("G1").unwrap();

        let mut previous = 0;
        for step in (0..=10).rev() {
            let threshold = f64::from(step) / 10.0;
            let (_, score) = scorer(threshold).score_grant(grant, &bodies);
            assert!(score.accepted >= previous, "threshold {threshold}");
            previous = score.accepted;
        }
        assert_eq!(previous, 3);
    }

    #[test]
    fn test_candidate_close_to_seeds_ranks_above_unrelated() {
        let (index, bodies) = fixture(&[
            ("close", Some("cancer treatment outcomes study")),
            ("far", Some("unrelated galaxy survey")),
        ]);
        let (_, score) = scorer(0.9).score_grant(index.get("G1").unwrap(), &bodies);

        assert_eq!(score.similarities[0].0, location("close"));
        assert!(score.similarities[0].1 > score.similarities[1].1);
    }

    #[rstest]
    #[case(1.1, vec!["s1", "s2"])]
    #[case(-1.0, vec!["s1", "s2", "c1", "c2"])]
    fn test_threshold_extremes(#[case] threshold: f64, #[case] expected: Vec<&str>) {
        let (index, bodies) = fixture(&[
            ("c1", Some("cancer treatment outcomes study")),
            ("c2", Some("unrelated galaxy survey")),
            ("nobody", None),
        ]);
        let (grant, score) = scorer(threshold).score_grant(index.get("G1").unwrap(), &bodies);

        assert_eq!(kept_names(&grant), expected);
        assert_eq!(score.unvectorized, 1);
        assert!(!score.degenerate);
    }

    #[test]
    fn test_zero_vector_candidate_is_never_kept() {
        let (index, bodies) = fixture(&[("stopwords", Some("the of and with"))]);
        let (grant, score) = scorer(-1.0).score_grant(index.get("G1").unwrap(), &bodies);

        assert_eq!(kept_names(&grant), vec!["s1", "s2"]);
        assert!(score.similarities.is_empty());
    }

    #[test]
    fn test_grant_without_seed_bodies_is_degenerate() {
        let (index, mut bodies) = fixture(&[("c1", Some("cancer treatment outcomes study"))]);
        bodies.remove(&location("s1"));
        bodies.remove(&location("s2"));

        let (grant, score) = scorer(-1.0).score_grant(index.get("G1").unwrap(), &bodies);

        assert!(score.degenerate);
        assert!(grant.is_degenerate());
        assert_eq!(kept_names(&grant), vec!["s1", "s2"]);
    }

    #[test]
    fn test_centroid_modes_accept_the_same_candidates() {
        let (index, bodies) = fixture(&[
            ("c1", Some("cancer treatment outcomes study")),
            ("c2", Some("tumor therapy trial in mice")),
            ("c3", Some("unrelated galaxy survey")),
        ]);
        let grant = index.get("G1").unwrap();

        for threshold in [0.1, 0.3, 0.5, 0.7] {
            let true_count = scorer(threshold).score_grant(grant, &bodies).1;
            let legacy = SimilarityScorer::new(ScoringConfig {
                threshold,
                centroid: CentroidMode::Legacy,
                ..Default::default()
            })
            .unwrap()
            .score_grant(grant, &bodies)
            .1;
            assert_eq!(true_count.accepted, legacy.accepted);
        }
    }

    #[test]
    fn test_kept_publications_carry_vectors() {
        let (index, bodies) = fixture(&[("c1", Some("cancer treatment outcomes study"))]);
        let (grant, _) = scorer(-1.0).score_grant(index.get("G1").unwrap(), &bodies);
        assert!(grant.publications().iter().all(|p| p.vector.is_some()));
    }

    #[test]
    fn test_score_index_keeps_seeds_and_reports() {
        let (index, bodies) = fixture(&[
            ("c1", Some("cancer treatment outcomes study")),
            ("c2", Some("unrelated galaxy survey")),
        ]);
        let (refined, report) = scorer(1.1).score_index(index, &bodies).unwrap();

        assert_eq!(report.grants_scored, 1);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected, 2);
        let grant = refined.get("G1").unwrap();
        assert_eq!(grant.seeds().count(), 2);
        assert_eq!(grant.candidates().count(), 0);
        assert_eq!(refined.find_grants_by_author("Smith, John").len(), 1);
    }

    #[rstest]
    #[case(f64::NAN, 100, (1, 3))]
    #[case(0.9, 0, (1, 3))]
    #[case(0.9, 100, (0, 3))]
    #[case(0.9, 100, (3, 1))]
    fn test_invalid_config(
        #[case] threshold: f64,
        #[case] max_features: usize,
        #[case] ngram_range: (usize, usize),
    ) {
        let config = ScoringConfig {
            threshold,
            tfidf: TfidfConfig {
                ngram_range,
                max_features,
            },
            ..Default::default()
        };
        assert!(matches!(
            SimilarityScorer::new(config),
            Err(GrantError::Config(_))
        ));
    }
}
