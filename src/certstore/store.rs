//! Durable record storage: one JSON file per hostname.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::CertificateRecord;
use crate::{Error, Result};

const RECORD_EXTENSION: &str = "json";

/// Directory of `<sni>.json` certificate records.
///
/// Writes go through a hidden temp file in the same directory followed by a
/// rename, so readers (and the watcher) only ever see complete records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `sni`.
    ///
    /// Rejects hostnames that cannot be a single visible path component.
    pub fn path_for(&self, sni: &str) -> Result<PathBuf> {
        if sni.is_empty()
            || sni.starts_with('.')
            || sni.contains(['/', '\\', '\0'])
        {
            return Err(Error::validation_field(
                format!("'{}' cannot be used as a record name", sni.escape_debug()),
                "sni",
            ));
        }
        Ok(self.dir.join(format!("{}.{}", sni, RECORD_EXTENSION)))
    }

    /// Hostname a record path belongs to, or `None` for files the registry
    /// ignores (temp files, hidden files, other extensions).
    pub fn sni_for_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }
        Some(stem.to_string())
    }

    /// Whether a durable record exists for `sni`.
    pub async fn contains(&self, sni: &str) -> Result<bool> {
        let path = self.path_for(sni)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::io(format!("Failed to stat {}", path.display()), e))
    }

    /// Read and validate the record at `path`.
    ///
    /// The embedded hostname must match the file name.
    pub async fn read(&self, path: &Path) -> Result<CertificateRecord> {
        let expected = Self::sni_for_path(path).ok_or_else(|| {
            Error::validation(format!("{} is not a certificate record", path.display()))
        })?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io(format!("Failed to read {}", path.display()), e))?;

        let record = CertificateRecord::from_json(&bytes)?;
        if record.sni() != expected {
            return Err(Error::validation_field(
                format!(
                    "Record {} names hostname '{}' instead of '{}'",
                    path.display(),
                    record.sni(),
                    expected
                ),
                "sni",
            ));
        }

        Ok(record)
    }

    /// Atomically persist `record`, replacing any previous file.
    pub async fn write(&self, record: &CertificateRecord) -> Result<PathBuf> {
        let path = self.path_for(record.sni())?;
        let bytes = record.to_json()?;
        let dir = self.dir.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = tempfile::Builder::new()
                .prefix(".")
                .suffix(".tmp")
                .tempfile_in(&dir)
                .map_err(|e| Error::io(format!("Failed to create temp file in {}", dir.display()), e))?;

            temp.write_all(&bytes)
                .and_then(|_| temp.as_file().sync_all())
                .map_err(|e| Error::io("Failed to write certificate record", e))?;

            temp.persist(&target).map_err(|e| {
                Error::io(format!("Failed to move record into {}", target.display()), e.error)
            })?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(format!("Record writer task failed: {}", e)))??;

        debug!(sni = %record.sni(), path = %path.display(), "Persisted certificate record");
        Ok(path)
    }

    /// Delete the record for `sni`. Returns whether a file was removed.
    pub async fn remove(&self, sni: &str) -> Result<bool> {
        let path = self.path_for(sni)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("Failed to remove {}", path.display()), e)),
        }
    }

    /// Paths of every record file, sorted.
    ///
    /// An unreadable directory is an error: the registry cannot work without it.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::io(format!("Failed to read {}", self.dir.display()), e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(format!("Failed to read {}", self.dir.display()), e))?
        {
            let path = entry.path();
            if Self::sni_for_path(&path).is_some() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }
}
