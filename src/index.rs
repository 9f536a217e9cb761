//! On-disk recordings per streamer.
//!
//! A `FileIndex` belongs to a single streamer machine, which is its only
//! writer. It is refreshed on demand and after every finished session; files
//! deleted behind our back disappear on the next refresh.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedFile {
    pub path: PathBuf,
    pub size: u64,
    pub completed_at: DateTime<Utc>,
}

impl RecordedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct FileIndex {
    dir: PathBuf,
    extensions: Vec<String>,
    files: Vec<RecordedFile>,
    total_size: u64,
}

impl FileIndex {
    pub fn new(dir: PathBuf, extensions: &[String]) -> Self {
        Self {
            dir,
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            files: Vec::new(),
            total_size: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[RecordedFile] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Rescans the directory. `skip` excludes a file still being written.
    pub async fn refresh(&mut self, skip: Option<&Path>) -> io::Result<()> {
        let mut files = match scan(&self.dir, &self.extensions, skip).await {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        files.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.path.cmp(&b.path))
        });

        self.total_size = files.iter().map(|f| f.size).sum();
        self.files = files;
        Ok(())
    }
}

async fn scan(dir: &Path, extensions: &[String], skip: Option<&Path>) -> io::Result<Vec<RecordedFile>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if skip == Some(path.as_path()) {
            continue;
        }
        let known = path
            .extension()
            .map(|e| extensions.contains(&e.to_string_lossy().to_lowercase()))
            .unwrap_or(false);
        if !known {
            continue;
        }

        let meta = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!("Could not stat {}: {}", path.display(), e);
                continue;
            }
        };
        let completed_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        files.push(RecordedFile {
            path,
            size: meta.len(),
            completed_at,
        });
    }

    Ok(files)
}
