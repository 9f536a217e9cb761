//! One live broadcast written to one file.
//!
//! A session never deletes bytes it has written: whichever way it ends, the
//! file is flushed, synced and closed before the outcome is reported, and a
//! partial file stays on disk as a valid recording. Only a file that received
//! no bytes at all is removed.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{error::SessionError, source::MediaSource};

#[derive(Debug)]
pub enum Outcome {
    Success { size: u64, duration: Duration },
    Failure(SessionError),
    Cancelled { size: u64 },
}

/// A running recording. Owned by exactly one streamer machine.
#[derive(Debug)]
pub struct SessionHandle {
    path: PathBuf,
    started_at: DateTime<Utc>,
    bytes: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<Outcome>,
}

impl SessionHandle {
    /// Starts writing `source` to `path`. Must be called from within a Tokio
    /// runtime.
    pub fn start(source: MediaSource, path: PathBuf) -> Self {
        let bytes = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(write_stream(
            source,
            path.clone(),
            bytes.clone(),
            cancel.clone(),
        ));

        Self {
            path,
            started_at: Utc::now(),
            bytes,
            cancel,
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Asks the session to stop. The file is closed cleanly before
    /// `await_completion` returns `Outcome::Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the session to end. Cancel safe: dropping the returned
    /// future leaves the session running.
    pub async fn await_completion(&mut self) -> Outcome {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failure(SessionError::WriteFailure(io::Error::new(
                io::ErrorKind::Other,
                format!("recording task failed: {}", e),
            ))),
        }
    }
}

async fn write_stream(
    source: MediaSource,
    path: PathBuf,
    bytes: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> Outcome {
    let started = Instant::now();
    let mut stream = source.stream;

    let mut file = match File::create(&path).await {
        Ok(f) => BufWriter::new(f),
        Err(e) => return Outcome::Failure(SessionError::WriteFailure(e)),
    };

    let ended: Result<bool, SessionError> = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break Ok(false),

            chunk = stream.next() => match chunk {
                Some(Ok(data)) => {
                    if let Err(e) = file.write_all(&data).await {
                        break Err(SessionError::WriteFailure(e));
                    }
                    bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(true),
            },
        }
    };
    drop(stream);

    let closed = close(file).await;
    let size = bytes.load(Ordering::Relaxed);

    if size == 0 {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove empty recording {}: {}", path.display(), e);
        }
    }

    match (ended, closed) {
        (Err(e), _) => Outcome::Failure(e),
        (Ok(_), Err(e)) => Outcome::Failure(SessionError::WriteFailure(e)),
        (Ok(true), Ok(())) => Outcome::Success {
            size,
            duration: started.elapsed(),
        },
        (Ok(false), Ok(())) => Outcome::Cancelled { size },
    }
}

async fn close(mut file: BufWriter<File>) -> io::Result<()> {
    file.flush().await?;
    file.get_mut().sync_all().await?;
    Ok(())
}

/// Picks `<n>.<ext>` in `dir` with the smallest `n` not already holding a
/// non-empty file. Zero-byte leftovers are removed and their name reused.
pub async fn next_output_path(dir: &Path, extension: &str) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let extension = extension.trim_start_matches('.').to_lowercase();

    let mut n: u64 = 1;
    loop {
        let candidate = dir.join(format!("{}.{}", n, extension));
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.len() > 0 => n += 1,
            Ok(_) => {
                debug!("Removing zero-byte leftover {}", candidate.display());
                tokio::fs::remove_file(&candidate).await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    fn channel_source() -> (mpsc::Sender<Result<Bytes, SessionError>>, MediaSource) {
        let (tx, rx) = mpsc::channel(8);
        (tx, MediaSource::new(ReceiverStream::new(rx), "ts"))
    }

    #[tokio::test]
    async fn writes_until_source_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.ts");
        let (tx, source) = channel_source();

        let mut session = SessionHandle::start(source, path.clone());
        tx.send(Ok(Bytes::from_static(b"abc"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"defg"))).await.unwrap();
        drop(tx);

        match session.await_completion().await {
            Outcome::Success { size, .. } => assert_eq!(size, 7),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefg");
    }

    #[tokio::test]
    async fn source_error_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.ts");
        let (tx, source) = channel_source();

        let mut session = SessionHandle::start(source, path.clone());
        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        tx.send(Err(SessionError::SourceDropped("reset".into())))
            .await
            .unwrap();

        assert!(matches!(
            session.await_completion().await,
            Outcome::Failure(SessionError::SourceDropped(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"partial");
    }

    #[tokio::test]
    async fn cancel_flushes_written_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.ts");
        let (tx, source) = channel_source();

        let mut session = SessionHandle::start(source, path.clone());
        tx.send(Ok(Bytes::from(vec![7u8; 4096]))).await.unwrap();
        while session.bytes_written() < 4096 {
            tokio::task::yield_now().await;
        }
        session.cancel();

        match session.await_completion().await {
            Outcome::Cancelled { size } => assert_eq!(size, 4096),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn empty_recording_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.ts");
        let (tx, source) = channel_source();

        let mut session = SessionHandle::start(source, path.clone());
        drop(tx);

        assert!(matches!(
            session.await_completion().await,
            Outcome::Success { size: 0, .. }
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn output_names_skip_existing_recordings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.mkv"), b"data").unwrap();
        std::fs::write(dir.path().join("2.mkv"), b"").unwrap();

        let path = next_output_path(dir.path(), ".MKV").await.unwrap();
        assert_eq!(path, dir.path().join("2.mkv"));
        assert!(!path.exists());
    }
}
