//! Stage checkpoints and the publication table.
//!
//! A checkpoint is the whole grant index as JSON, tagged with the stage that wrote it,
//! so a later stage can be rerun without repeating the earlier ones.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::scan::ScanReport;
use crate::{Grant, GrantError, GrantIndex, Result};

/// Pipeline stage that produced a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Seeded,
    Scanned,
    Scored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Seeded => "seeded",
            Stage::Scanned => "scanned",
            Stage::Scored => "scored",
        };
        f.write_str(name)
    }
}

/// Serialized grant index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: Stage,
    pub grants: Vec<Grant>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(stage: Stage, index: &GrantIndex) -> Self {
        Self {
            stage,
            grants: index.grants().cloned().collect(),
        }
    }

    /// Checkpoint of a completed scan.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Interrupted`] when the scan left documents unvisited. A
    /// partial scan is never checkpointed; it is rerun from the seeded checkpoint.
    pub fn scanned(index: &GrantIndex, report: &ScanReport) -> Result<Self> {
        if report.interrupted {
            return Err(GrantError::Interrupted(format!(
                "scan stopped after {} documents, rerun it from the seeded checkpoint",
                report.scanned
            )));
        }
        Ok(Self::new(Stage::Scanned, index))
    }

    /// Writes the checkpoint next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut name = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        let tmp = path.with_file_name(name);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        tracing::info!(path = %path.display(), stage = %self.stage, grants = self.grants.len(), "checkpoint written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        tracing::debug!(path = %path.display(), stage = %checkpoint.stage, "checkpoint loaded");
        Ok(checkpoint)
    }

    /// Fails unless the checkpoint was written by one of `allowed`.
    pub fn expect_stage(&self, allowed: &[Stage]) -> Result<()> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        let allowed = allowed.iter().map(Stage::to_string).collect::<Vec<_>>().join(" or ");
        Err(GrantError::Json(format!(
            "checkpoint stage is {}, expected {allowed}",
            self.stage
        )))
    }

    pub fn into_index(self) -> GrantIndex {
        GrantIndex::from_grants(self.grants)
    }
}

#[derive(Serialize)]
struct PublicationRow<'a> {
    grant: &'a str,
    location: &'a str,
    title: &'a str,
    journal: &'a str,
    authors: String,
    citation: Option<&'a str>,
    seed: bool,
}

/// Writes one row per (grant, publication) pair. Returns the row count.
pub fn write_publication_table<W: Write>(writer: W, index: &GrantIndex) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut rows = 0;
    for grant in index.grants() {
        for publication in grant.publications() {
            writer.serialize(PublicationRow {
                grant: grant.grant_id(),
                location: publication.location.as_str(),
                title: &publication.title,
                journal: &publication.journal,
                authors: publication.authors.join("; "),
                citation: publication.citation_text.as_deref(),
                seed: publication.is_seed(),
            })?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeds::SeedRecord;
    use crate::{Location, Publication};
    use pretty_assertions::assert_eq;

    fn index() -> GrantIndex {
        let mut index = GrantIndex::new();
        index
            .load_seeds(vec![SeedRecord {
                location: Location::new("f", "s", "seed.nxml"),
                title: "Seed title".to_string(),
                journal: "blood".to_string(),
                grant_id: Some("G1".to_string()),
                citation_text: Some("Cited by 4".to_string()),
                authors: vec!["Smith, John".to_string(), "Doe, Jane".to_string()],
                ..Default::default()
            }])
            .unwrap();
        index.add_candidate(
            "G1",
            Publication {
                location: Location::new("f", "s", "cand.nxml"),
                title: "Candidate, with comma".to_string(),
                authors: vec!["Smith, John".to_string()],
                ..Default::default()
            },
        );
        index
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanned.json");

        Checkpoint::new(Stage::Scanned, &index()).save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded.stage, Stage::Scanned);
        assert!(!dir.path().join("scanned.json.tmp").exists());
        let restored = loaded.into_index();
        let grant = restored.get("G1").unwrap();
        assert_eq!(grant.publications().len(), 2);
        assert_eq!(grant.seeds().count(), 1);
        assert_eq!(restored.find_grants_by_author("Doe, Jane").len(), 1);
    }

    #[test]
    fn test_save_keeps_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        let sibling = dir.path().join("run.tmp");
        fs::write(&sibling, "keep me").unwrap();

        Checkpoint::new(Stage::Seeded, &index()).save(&dir.path().join("run.json")).unwrap();
        Checkpoint::new(Stage::Scanned, &index()).save(&sibling).unwrap();

        assert_eq!(Checkpoint::load(&sibling).unwrap().stage, Stage::Scanned);
        assert_eq!(Checkpoint::load(&dir.path().join("run.json")).unwrap().stage, Stage::Seeded);
        assert!(!dir.path().join("run.tmp.tmp").exists());
    }

    #[test]
    fn test_interrupted_scan_is_not_checkpointed() {
        let report = ScanReport {
            scanned: 3,
            interrupted: true,
            ..Default::default()
        };
        let err = Checkpoint::scanned(&index(), &report).unwrap_err();
        assert!(matches!(err, GrantError::Interrupted(_)));

        let done = ScanReport::default();
        assert_eq!(Checkpoint::scanned(&index(), &done).unwrap().stage, Stage::Scanned);
    }

    #[test]
    fn test_stage_is_checked() {
        let checkpoint = Checkpoint::new(Stage::Seeded, &index());
        assert!(checkpoint.expect_stage(&[Stage::Seeded]).is_ok());

        let err = checkpoint.expect_stage(&[Stage::Scanned, Stage::Scored]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Checkpoint error: checkpoint stage is seeded, expected scanned or scored"
        );
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(GrantError::Json(_))));
    }

    #[test]
    fn test_publication_table() {
        let mut out = Vec::new();
        let rows = write_publication_table(&mut out, &index()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(rows, 2);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "grant,location,title,journal,authors,citation,seed");
        assert_eq!(
            lines[1],
            "G1,f/s/seed.nxml,Seed title,blood,\"Smith, John; Doe, Jane\",Cited by 4,true"
        );
        assert_eq!(
            lines[2],
            "G1,f/s/cand.nxml,\"Candidate, with comma\",,\"Smith, John\",,false"
        );
    }
}
