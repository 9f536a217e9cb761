use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    error::{AdapterError, SessionError},
    source::MediaSource,
};

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:135.0) Gecko/20100101 Firefox/135.0";

pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new() -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::default());
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient { client, cookies })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, AdapterError> {
        let resp = self.client.get(url).send().await?;
        check_status(resp.status())?;
        Ok(resp.text().await?)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes, AdapterError> {
        let resp = self.client.get(url).send().await?;
        check_status(resp.status())?;
        Ok(resp.bytes().await?)
    }

    pub async fn head_status(&self, url: &str) -> Result<StatusCode, AdapterError> {
        Ok(self.client.head(url).send().await?.status())
    }

    /// Opens a progressive HTTP body (FLV, TS, ...) as a media source.
    pub async fn open_stream(&self, url: &str, extension: &str) -> Result<MediaSource, AdapterError> {
        let resp = self.client.get(url).send().await?;
        check_status(resp.status())?;

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SessionError::SourceDropped(e.to_string())));
        Ok(MediaSource::new(stream, extension))
    }
}

/// Maps an HTTP status to the adapter error taxonomy. A vanished stream is
/// `Unavailable`, which callers treat as a miss rather than a failure.
pub fn check_status(status: StatusCode) -> Result<(), AdapterError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(AdapterError::Unavailable),
        StatusCode::TOO_MANY_REQUESTS => Err(AdapterError::RateLimited),
        s => Err(AdapterError::Protocol(format!("unexpected status {}", s))),
    }
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// never see a half-written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");

    let mut file = File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "KiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "MiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "GiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "TiB";
    }

    format!("{:.2} {}", bytes, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(120 * 1024 * 1024), "120.00 MiB");
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND),
            Err(AdapterError::Unavailable)
        ));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(AdapterError::RateLimited)
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(AdapterError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamers.json");

        write_atomic(&path, b"[]").await.unwrap();
        write_atomic(&path, b"[1]").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"[1]");
        assert!(!dir.path().join("streamers.json.tmp").exists());
    }
}
