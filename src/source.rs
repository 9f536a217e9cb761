use std::fmt;

use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt};

use crate::error::SessionError;

pub type ByteStream = BoxStream<'static, Result<Bytes, SessionError>>;

/// A readable live stream plus the file extension its bytes should be saved
/// under.
pub struct MediaSource {
    pub stream: ByteStream,
    pub extension: String,
}

impl MediaSource {
    pub fn new<S>(stream: S, extension: impl Into<String>) -> Self
    where
        S: Stream<Item = Result<Bytes, SessionError>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            extension: extension.into(),
        }
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}
