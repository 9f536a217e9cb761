//! Events broadcast to listeners such as the dashboard.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::streamer::{State, Status, StreamerId};

pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecordingEnd {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub enum StreamerEvent {
    /// The machine moved to a new state or its status changed.
    StatusChanged {
        id: StreamerId,
        state: State,
        status: Status,
        timestamp: DateTime<Utc>,
    },
    RecordingFinished {
        id: StreamerId,
        path: PathBuf,
        size: u64,
        end: RecordingEnd,
        timestamp: DateTime<Utc>,
    },
    Removed {
        id: StreamerId,
        timestamp: DateTime<Utc>,
    },
}

impl StreamerEvent {
    pub fn id(&self) -> &StreamerId {
        match self {
            StreamerEvent::StatusChanged { id, .. }
            | StreamerEvent::RecordingFinished { id, .. }
            | StreamerEvent::Removed { id, .. } => id,
        }
    }
}
