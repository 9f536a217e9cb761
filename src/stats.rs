use serde::Serialize;

use crate::{
    streamer::{Status, StreamerSnapshot},
    util,
};

/// Aggregate recording statistics across all streamers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub streamers: usize,
    pub running: usize,
    pub recording: usize,
    pub files: usize,
    pub bytes: u64,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, snapshot: &StreamerSnapshot) {
        self.streamers += 1;
        if snapshot.running {
            self.running += 1;
        }
        if snapshot.status == Status::Recording {
            self.recording += 1;
        }
        self.files += snapshot.file_count();
        self.bytes += snapshot.total_size;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} streamers ({} running, {} recording), {} files ({})",
            self.streamers,
            self.running,
            self.recording,
            self.files,
            util::format_bytes(self.bytes)
        )
    }
}

impl<'a> FromIterator<&'a StreamerSnapshot> for Totals {
    fn from_iter<I: IntoIterator<Item = &'a StreamerSnapshot>>(iter: I) -> Self {
        let mut totals = Totals::new();
        for snapshot in iter {
            totals.add(snapshot);
        }
        totals
    }
}
