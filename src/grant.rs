//! Grants and the grant index.
//!
//! The [`GrantIndex`] maps grant identifiers to [`Grant`]s and keeps an author-to-grant
//! lookup for the corpus scan. Authors pools are only widened by seed publications:
//! once seeding is done, the pool a grant is matched on is frozen, so candidates found
//! later never pull in further unrelated work of their co-authors.
//!
//! # Example
//!
//! ```
//! use grantlink::{GrantIndex, Location, Publication};
//! use grantlink::seeds::SeedRecord;
//!
//! let mut index = GrantIndex::new();
//! index
//!     .load_seeds(vec![SeedRecord {
//!         location: Location::new("f", "s", "seed.nxml"),
//!         grant_id: Some("G1".to_string()),
//!         authors: vec!["Smith, John".to_string()],
//!         ..Default::default()
//!     }])
//!     .unwrap();
//!
//! let candidate = Publication {
//!     location: Location::new("f", "s", "other.nxml"),
//!     authors: vec!["Smith, John".to_string()],
//!     ..Default::default()
//! };
//! let grants = index.matching_grant_ids(&candidate.authors);
//! for grant_id in &grants {
//!     index.add_candidate(grant_id, candidate.clone());
//! }
//! assert_eq!(index.get("G1").unwrap().publications().len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::seeds::SeedRecord;
use crate::{GrantError, Location, Publication, Result};

/// A funding grant with its authors pool and publication set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GrantRepr", into = "GrantRepr")]
pub struct Grant {
    grant_id: String,
    authors_pool: BTreeSet<String>,
    publications: Vec<Publication>,
    /// Set when scoring found no usable seed vector
    degenerate: bool,
    locations: HashSet<Location>,
}

/// On-disk shape of a [`Grant`]; the location set is rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GrantRepr {
    grant_id: String,
    authors_pool: BTreeSet<String>,
    publications: Vec<Publication>,
    #[serde(default)]
    degenerate: bool,
}

impl From<GrantRepr> for Grant {
    fn from(repr: GrantRepr) -> Self {
        let mut grant = Grant::new(&repr.grant_id);
        grant.authors_pool = repr.authors_pool;
        grant.degenerate = repr.degenerate;
        for publication in repr.publications {
            grant.add_publication(publication);
        }
        grant
    }
}

impl From<Grant> for GrantRepr {
    fn from(grant: Grant) -> Self {
        GrantRepr {
            grant_id: grant.grant_id,
            authors_pool: grant.authors_pool,
            publications: grant.publications,
            degenerate: grant.degenerate,
        }
    }
}

impl Grant {
    #[must_use]
    pub fn new(grant_id: &str) -> Self {
        Self {
            grant_id: grant_id.to_string(),
            authors_pool: BTreeSet::new(),
            publications: Vec::new(),
            degenerate: false,
            locations: HashSet::new(),
        }
    }

    /// Identifier as written in the seed table.
    pub fn grant_id(&self) -> &str {
        &self.grant_id
    }

    /// Every seed author, as `Surname, Given` names taken from the seed documents.
    pub fn authors_pool(&self) -> &BTreeSet<String> {
        &self.authors_pool
    }

    /// Publications in insertion order, unique by location.
    pub fn publications(&self) -> &[Publication] {
        &self.publications
    }

    /// Seed publications, in insertion order.
    pub fn seeds(&self) -> impl Iterator<Item = &Publication> {
        self.publications.iter().filter(|p| p.is_seed())
    }

    /// Publications found by the scan, in insertion order. Empty before a scan.
    pub fn candidates(&self) -> impl Iterator<Item = &Publication> {
        self.publications.iter().filter(|p| !p.is_seed())
    }

    /// Exact, case-sensitive match against the author pool.
    pub fn has_author(&self, author: &str) -> bool {
        self.authors_pool.contains(author)
    }

    /// Whether a publication at `location` is already attached.
    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    /// True when the last scoring pass could not build a seed centroid.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Appends a publication unless one with the same location is already present.
    ///
    /// Returns whether the publication was added.
    pub fn add_publication(&mut self, publication: Publication) -> bool {
        if !self.locations.insert(publication.location.clone()) {
            return false;
        }
        self.publications.push(publication);
        true
    }

    /// Replaces the publication set with the outcome of scoring.
    pub(crate) fn with_scored_publications(
        &self,
        publications: Vec<Publication>,
        degenerate: bool,
    ) -> Grant {
        let mut grant = Grant::new(&self.grant_id);
        grant.authors_pool = self.authors_pool.clone();
        grant.degenerate = degenerate;
        for publication in publications {
            grant.add_publication(publication);
        }
        grant
    }

    fn add_authors<'a>(&mut self, authors: impl IntoIterator<Item = &'a String>) {
        self.authors_pool.extend(authors.into_iter().cloned());
    }
}

/// Authoritative mapping from grant identifier to [`Grant`].
#[derive(Debug, Clone, Default)]
pub struct GrantIndex {
    grants: BTreeMap<String, Grant>,
    /// author name -> ids of grants whose pool contains it
    authors: HashMap<String, BTreeSet<String>>,
}

impl GrantIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an index from grants read back from a checkpoint.
    #[must_use]
    pub fn from_grants(grants: impl IntoIterator<Item = Grant>) -> Self {
        let mut index = GrantIndex::new();
        for grant in grants {
            for author in &grant.authors_pool {
                index
                    .authors
                    .entry(author.clone())
                    .or_default()
                    .insert(grant.grant_id.clone());
            }
            index.grants.insert(grant.grant_id.clone(), grant);
        }
        index
    }

    /// Loads confirmed seed records.
    ///
    /// Every record is validated before the index is touched, so a malformed record
    /// leaves the index exactly as it was. Duplicate rows with the same location are
    /// ignored for the publication set.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::MalformedSeed`] for a record without a grant identifier.
    pub fn load_seeds(&mut self, records: impl IntoIterator<Item = SeedRecord>) -> Result<usize> {
        let records: Vec<SeedRecord> = records.into_iter().collect();

        if let Some(bad) = records.iter().find(|r| r.grant_key().is_none()) {
            return Err(GrantError::MalformedSeed {
                line: bad.line,
                message: format!("{} has no grant identifier", bad.location),
            });
        }

        let mut added = 0;
        for record in records {
            let publication = record.into_publication();
            let Some(grant_id) = publication.grant_id.clone() else {
                continue;
            };

            if !self.grants.contains_key(&grant_id) {
                tracing::debug!(grant_id = %grant_id, "new grant");
            }
            let grant = self
                .grants
                .entry(grant_id.clone())
                .or_insert_with(|| Grant::new(&grant_id));

            grant.add_authors(&publication.authors);
            for author in &publication.authors {
                self.authors
                    .entry(author.clone())
                    .or_default()
                    .insert(grant_id.clone());
            }
            if grant.add_publication(publication) {
                added += 1;
            }
        }

        tracing::info!(grants = self.grants.len(), seeds = added, "seeds loaded");
        Ok(added)
    }

    /// Every grant whose authors pool contains exactly `author`.
    pub fn find_grants_by_author(&self, author: &str) -> Vec<&Grant> {
        self.authors
            .get(author)
            .into_iter()
            .flatten()
            .filter_map(|grant_id| self.grants.get(grant_id))
            .collect()
    }

    /// Union of grant ids matched by any of `authors`.
    pub fn matching_grant_ids(&self, authors: &[String]) -> BTreeSet<String> {
        authors
            .iter()
            .filter_map(|author| self.authors.get(author))
            .flatten()
            .cloned()
            .collect()
    }

    /// Appends a candidate to one grant. Returns whether it was new to that grant.
    pub fn add_candidate(&mut self, grant_id: &str, publication: Publication) -> bool {
        match self.grants.get_mut(grant_id) {
            Some(grant) => grant.add_publication(publication),
            None => false,
        }
    }

    /// Grant by identifier.
    pub fn get(&self, grant_id: &str) -> Option<&Grant> {
        self.grants.get(grant_id)
    }

    /// Grants ordered by identifier.
    pub fn grants(&self) -> impl Iterator<Item = &Grant> {
        self.grants.values()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Grants ordered by identifier, consuming the index.
    pub fn into_grants(self) -> Vec<Grant> {
        self.grants.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seed(file: &str, grant: Option<&str>, authors: &[&str], line: usize) -> SeedRecord {
        SeedRecord {
            location: Location::new("articles.A-B", "Cancer_Res", file),
            title: format!("Title of {file}"),
            grant_id: grant.map(String::from),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            line,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_seeds_groups_by_grant() {
        let mut index = GrantIndex::new();
        let added = index
            .load_seeds(vec![
                seed("a.nxml", Some("G1"), &["Smith, John"], 1),
                seed("b.nxml", Some("G1"), &["Doe, Jane"], 2),
                seed("c.nxml", Some("G2"), &["Roe, Richard"], 3),
            ])
            .unwrap();

        assert_eq!(added, 3);
        assert_eq!(index.len(), 2);
        let g1 = index.get("G1").unwrap();
        assert_eq!(g1.publications().len(), 2);
        assert!(g1.has_author("Smith, John"));
        assert!(g1.has_author("Doe, Jane"));
        assert!(!g1.has_author("Roe, Richard"));
        assert!(g1.publications().iter().all(Publication::is_seed));
    }

    #[test]
    fn test_load_seeds_is_idempotent_for_duplicate_rows() {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![
                seed("a.nxml", Some("G1"), &["Smith, John"], 1),
                seed("a.nxml", Some("G1"), &["Smith, John"], 2),
            ])
            .unwrap();
        index
            .load_seeds(vec![seed("a.nxml", Some("G1"), &["Smith, John"], 1)])
            .unwrap();

        assert_eq!(index.get("G1").unwrap().publications().len(), 1);
    }

    #[test]
    fn test_missing_grant_id_leaves_index_untouched() {
        let mut index = GrantIndex::new();
        let result = index.load_seeds(vec![
            seed("a.nxml", Some("G1"), &["Smith, John"], 1),
            seed("b.nxml", None, &["Doe, Jane"], 2),
        ]);

        assert!(matches!(
            result,
            Err(GrantError::MalformedSeed { line: 2, .. })
        ));
        assert!(index.is_empty());
        assert!(index.find_grants_by_author("Smith, John").is_empty());
    }

    #[test]
    fn test_find_grants_by_author_is_exact() {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![
                seed("a.nxml", Some("G1"), &["Smith, John"], 1),
                seed("b.nxml", Some("G2"), &["Smith, John", "Doe, Jane"], 2),
            ])
            .unwrap();

        let ids: Vec<_> = index
            .find_grants_by_author("Smith, John")
            .iter()
            .map(|g| g.grant_id())
            .collect();
        assert_eq!(ids, vec!["G1", "G2"]);
        assert!(index.find_grants_by_author("smith, john").is_empty());
        assert!(index.find_grants_by_author("Smith, J").is_empty());
    }

    #[test]
    fn test_candidates_do_not_widen_authors_pool() {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![seed("a.nxml", Some("G1"), &["Smith, John"], 1)])
            .unwrap();

        let candidate = Publication {
            location: Location::new("f", "s", "cand.nxml"),
            authors: vec!["Smith, John".to_string(), "Stranger, Sam".to_string()],
            ..Default::default()
        };
        assert!(index.add_candidate("G1", candidate.clone()));
        assert!(!index.add_candidate("G1", candidate));
        assert!(!index.add_candidate("missing", Publication::default()));

        let g1 = index.get("G1").unwrap();
        assert_eq!(g1.publications().len(), 2);
        assert!(!g1.has_author("Stranger, Sam"));
        assert!(index.find_grants_by_author("Stranger, Sam").is_empty());
    }

    #[test]
    fn test_matching_grant_ids_unions_over_authors() {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![
                seed("a.nxml", Some("G1"), &["Smith, John"], 1),
                seed("b.nxml", Some("G2"), &["Doe, Jane"], 2),
                seed("c.nxml", Some("G3"), &["Roe, Richard"], 3),
            ])
            .unwrap();

        let ids = index.matching_grant_ids(&[
            "Doe, Jane".to_string(),
            "Smith, John".to_string(),
            "Nobody, Known".to_string(),
        ]);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["G1", "G2"]);
    }

    #[test]
    fn test_grant_roundtrip_rebuilds_location_set() {
        let mut grant = Grant::new("G1");
        grant.add_publication(Publication {
            location: Location::new("f", "s", "a.nxml"),
            ..Default::default()
        });

        let json = serde_json::to_string(&grant).unwrap();
        let mut restored: Grant = serde_json::from_str(&json).unwrap();

        assert!(restored.contains(&Location::new("f", "s", "a.nxml")));
        assert!(!restored.add_publication(Publication {
            location: Location::new("f", "s", "a.nxml"),
            ..Default::default()
        }));
    }
}
