//! On-disk corpus layout.
//!
//! A corpus root holds top-level folders (`articles.A-B`, ...), each with one
//! subfolder per journal that holds the article files. Filenames that start and end
//! with `#` are sentinel entries, not articles.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{GrantError, Location, Result};

/// Read-only view of a corpus directory tree.
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    folders: Vec<String>,
}

impl Corpus {
    /// Opens a corpus root, restricted to `folders` when non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::CorpusRoot`] when the root is not a readable directory.
    pub fn open(root: impl Into<PathBuf>, folders: &[String]) -> Result<Self> {
        let root = root.into();
        let corpus_root_error = |message: String| GrantError::CorpusRoot {
            path: root.display().to_string(),
            message,
        };

        let metadata = fs::metadata(&root).map_err(|e| corpus_root_error(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(corpus_root_error("not a directory".to_string()));
        }
        fs::read_dir(&root).map_err(|e| corpus_root_error(e.to_string()))?;

        Ok(Self {
            folders: folders.to_vec(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file location under the configured folders, sorted.
    ///
    /// Sentinel entries are included; callers filter them with [`is_sentinel`] so they
    /// can be counted. Unreadable folders and subfolders are logged and skipped.
    ///
    /// # Errors
    ///
    /// Fails when the root can no longer be listed, or when none of the configured
    /// folders can be.
    pub fn documents(&self) -> Result<Vec<Location>> {
        let folders = if self.folders.is_empty() {
            sorted_entries(&self.root, EntryKind::Dir).map_err(|e| GrantError::CorpusRoot {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            self.folders.clone()
        };

        let mut locations = Vec::new();
        let mut readable = 0;
        for folder in &folders {
            let folder_path = self.root.join(folder);
            let subfolders = match sorted_entries(&folder_path, EntryKind::Dir) {
                Ok(subfolders) => subfolders,
                Err(e) => {
                    tracing::warn!(folder = %folder, error = %e, "skipping unreadable folder");
                    continue;
                }
            };
            readable += 1;
            tracing::debug!(folder = %folder, subfolders = subfolders.len(), "listing folder");

            for subfolder in &subfolders {
                match sorted_entries(&folder_path.join(subfolder), EntryKind::File) {
                    Ok(files) => locations.extend(
                        files
                            .iter()
                            .map(|filename| Location::new(folder, subfolder, filename)),
                    ),
                    Err(e) => {
                        tracing::warn!(folder = %folder, subfolder = %subfolder, error = %e, "skipping unreadable subfolder");
                    }
                }
            }
        }
        if readable == 0 && !folders.is_empty() {
            return Err(GrantError::CorpusRoot {
                path: self.root.display().to_string(),
                message: format!("none of the folders {} is readable", folders.join(", ")),
            });
        }
        Ok(locations)
    }

    /// Reads a document as text. Invalid UTF-8 is replaced rather than rejected.
    pub fn read(&self, location: &Location) -> Result<String> {
        let bytes = fs::read(location.to_path(&self.root))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Filenames of the form `#...#` mark non-article entries.
pub fn is_sentinel(filename: &str) -> bool {
    filename.starts_with('#') && filename.ends_with('#')
}

#[derive(Clone, Copy)]
enum EntryKind {
    Dir,
    File,
}

fn sorted_entries(path: &Path, kind: EntryKind) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let wanted = match kind {
            EntryKind::Dir => file_type.is_dir(),
            EntryKind::File => file_type.is_file(),
        };
        if wanted {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
