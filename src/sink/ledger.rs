//! Release ledger.
//!
//! Records which `(repository, tag)` pairs have already been announced so a
//! release is forwarded at most once. The ledger is an in-memory set keyed by
//! the exact pair, optionally backed by an append-only text file:
//!
//! ```text
//! TalonImageName: naas-core
//! TalonImageTag: 1.4.2
//!
//! B2EImageName: b2e-conftrans
//! B2EImageTag: 0.9.0
//!
//! ```
//!
//! Check-and-append runs under one async mutex, so two requests carrying the
//! same pair cannot both record it.
//!
//! On load, a record is a name-label line followed by its matching tag-label
//! line, for the label pairs configured. Values may be empty. Values holding
//! a line break are refused on append.

use crate::config::RepositoryLabels;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from reading or appending the ledger file.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to ledger {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("release {repository:?}:{tag:?} contains a line break and cannot be recorded")]
    LineBreak { repository: String, tag: String },
}

/// One announced release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerEntry {
    pub repository: String,
    pub tag: String,
}

impl LedgerEntry {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

/// Keyed store of announced releases.
pub struct Ledger {
    path: Option<PathBuf>,
    entries: Mutex<HashSet<LedgerEntry>>,
}

impl Ledger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashSet::new()),
        }
    }

    /// Open a file-backed ledger, loading any entries already on disk.
    ///
    /// Records are recognized by the given label pairs. A missing file is an
    /// empty ledger; it is created on first append.
    pub async fn open<'a>(
        path: impl AsRef<Path>,
        labels: impl IntoIterator<Item = &'a RepositoryLabels>,
    ) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_ledger(&content, labels),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Ledger file not found, starting empty");
                HashSet::new()
            }
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        info!(path = %path.display(), entries = entries.len(), "Ledger opened");

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn contains(&self, repository: &str, tag: &str) -> bool {
        self.entries
            .lock()
            .await
            .contains(&LedgerEntry::new(repository, tag))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Record a release unless it is already present.
    ///
    /// Returns `true` if this call recorded it. The file is appended before
    /// the in-memory set is updated, so a failed write leaves the pair
    /// unrecorded.
    pub async fn record_if_absent(
        &self,
        labels: &RepositoryLabels,
        repository: &str,
        tag: &str,
    ) -> Result<bool, LedgerError> {
        if has_line_break(repository) || has_line_break(tag) {
            return Err(LedgerError::LineBreak {
                repository: repository.to_string(),
                tag: tag.to_string(),
            });
        }

        let entry = LedgerEntry::new(repository, tag);
        let mut entries = self.entries.lock().await;

        if entries.contains(&entry) {
            debug!(repository = %repository, tag = %tag, "Release already in ledger");
            return Ok(false);
        }

        if let Some(path) = &self.path {
            let record = format!("{}\n", format_record(labels, repository, tag));
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|source| LedgerError::Append {
                    path: path.clone(),
                    source,
                })?;
            file.write_all(record.as_bytes())
                .await
                .map_err(|source| LedgerError::Append {
                    path: path.clone(),
                    source,
                })?;
        }

        entries.insert(entry);
        info!(repository = %repository, tag = %tag, "Release recorded in ledger");
        Ok(true)
    }
}

/// The two-line text block for one release.
pub fn format_record(labels: &RepositoryLabels, repository: &str, tag: &str) -> String {
    format!(
        "{}: {}\n{}: {}\n",
        labels.name_label, repository, labels.tag_label, tag
    )
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\n', '\r'])
}

/// Split `label: value`, keeping an empty value.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(':')?;
    Some((label.trim(), value.strip_prefix(' ').unwrap_or(value)))
}

/// Rebuild entries from the file, pairing each name line with the tag line
/// that follows it under the same label pair.
fn parse_ledger<'a>(
    content: &str,
    labels: impl IntoIterator<Item = &'a RepositoryLabels>,
) -> HashSet<LedgerEntry> {
    let mut tag_labels: HashMap<&str, HashSet<&str>> = HashMap::new();
    for pair in labels {
        tag_labels
            .entry(pair.name_label.as_str())
            .or_default()
            .insert(pair.tag_label.as_str());
    }

    let mut entries = HashSet::new();
    let mut pending: Option<(&str, &str)> = None;

    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let Some((label, value)) = split_line(line) else {
            warn!(line = %line, "Skipping unreadable ledger line");
            continue;
        };

        if let Some((name_label, repository)) = pending {
            if tag_labels
                .get(name_label)
                .is_some_and(|tags| tags.contains(label))
            {
                entries.insert(LedgerEntry::new(repository, value));
                pending = None;
                continue;
            }
            warn!(repository = %repository, "Ledger record has no tag line");
            pending = None;
        }

        if tag_labels.contains_key(label) {
            pending = Some((label, value));
        } else {
            warn!(line = %line, "Skipping ledger line with unknown label");
        }
    }

    if let Some((_, repository)) = pending {
        warn!(repository = %repository, "Ledger ends with an incomplete record");
    }

    entries
}
