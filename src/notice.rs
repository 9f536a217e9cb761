//! The single outstanding user-facing error message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::streamer::StreamerId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotice {
    pub streamer: StreamerId,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Holds at most one notice. A newer failure replaces the older one; notices
/// never queue.
#[derive(Debug, Clone, Default)]
pub struct Notices {
    slot: Arc<Mutex<Option<ErrorNotice>>>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, streamer: &StreamerId, message: impl Into<String>) {
        *self.slot.lock() = Some(ErrorNotice {
            streamer: streamer.clone(),
            message: message.into(),
            raised_at: Utc::now(),
        });
    }

    pub fn current(&self) -> Option<ErrorNotice> {
        self.slot.lock().clone()
    }

    /// Clears the outstanding notice, if any.
    pub fn clear(&self) -> Option<ErrorNotice> {
        self.slot.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_notice_wins() {
        let notices = Notices::new();
        let a = StreamerId::new("DU", "a");
        let b = StreamerId::new("DU", "b");

        notices.raise(&a, "first");
        notices.raise(&b, "second");

        let current = notices.current().unwrap();
        assert_eq!(current.streamer, b);
        assert_eq!(current.message, "second");
    }

    #[test]
    fn clearing_twice_is_a_no_op() {
        let notices = Notices::new();
        notices.raise(&StreamerId::new("DU", "a"), "boom");

        assert!(notices.clear().is_some());
        assert!(notices.clear().is_none());
        assert!(notices.current().is_none());
    }
}
