//! Streamer identity and the immutable status snapshots published for readers.

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::RecordedFile;

/// A monitored source, identified by the site slug and the username on that
/// site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamerId {
    pub site: String,
    pub username: String,
}

impl StreamerId {
    pub fn new(site: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            username: username.into(),
        }
    }

    /// Name of the per-streamer download directory.
    pub fn folder_name(&self) -> String {
        format!("{} [{}]", sanitize(&self.username), self.site)
    }
}

impl fmt::Display for StreamerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.username, self.site)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// User-facing status of a streamer. Exactly one value at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Unknown,
    Offline,
    OnlineNotRecording,
    Recording,
    Paused,
    Error,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Unknown => "Unknown",
            Status::Offline => "Offline",
            Status::OnlineNotRecording => "Online",
            Status::Recording => "Recording",
            Status::Paused => "Not Running",
            Status::Error => "Error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a streamer's state machine currently is. `Status` is the coarser,
/// user-facing view of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Paused by the user.
    Disabled,
    /// Enabled and polling.
    Idle,
    /// Live; waiting for a recording slot or for the source to open.
    LivePending,
    Recording,
    /// Waiting out a backoff after a failure.
    ErrorBackoff,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Disabled => "disabled",
            State::Idle => "idle",
            State::LivePending => "live-pending",
            State::Recording => "recording",
            State::ErrorBackoff => "error-backoff",
        };
        f.write_str(s)
    }
}

/// The session currently writing for a streamer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRecording {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub bytes: u64,
}

/// Everything a reader may know about one streamer, captured at one instant.
/// Only the owning state machine creates these; readers get clones.
#[derive(Debug, Clone, Serialize)]
pub struct StreamerSnapshot {
    pub id: StreamerId,
    pub display_name: String,
    pub url: String,
    pub status: Status,
    pub state: State,
    /// Desired run state. A paused streamer may still be finishing a
    /// recording, in which case this is `false` while `status` is `Recording`.
    pub running: bool,
    pub recording: Option<ActiveRecording>,
    pub files: Vec<RecordedFile>,
    pub total_size: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl StreamerSnapshot {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// One row of the status listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub id: StreamerId,
    pub display_name: String,
    pub url: String,
    pub status: Status,
    pub running: bool,
    pub total_size: u64,
    pub file_count: usize,
    pub recording_bytes: Option<u64>,
}

impl From<&StreamerSnapshot> for StatusEntry {
    fn from(s: &StreamerSnapshot) -> Self {
        Self {
            id: s.id.clone(),
            display_name: s.display_name.clone(),
            url: s.url.clone(),
            status: s.status,
            running: s.running,
            total_size: s.total_size,
            file_count: s.file_count(),
            recording_bytes: s.recording.as_ref().map(|r| r.bytes),
        }
    }
}
