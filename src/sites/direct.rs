//! Streams addressed directly by URL. The "username" is the stream URL
//! itself: `.m3u8` URLs are recorded as live HLS, anything else as a
//! progressive HTTP body.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::{
    adapter::{LiveInfo, Probe, SiteAdapter, SourceKind},
    error::AdapterError,
    hls::{self, Playlist},
    source::MediaSource,
    streamer::StreamerId,
    util::HttpClient,
};

const PROGRESSIVE_EXTENSIONS: &[&str] = &["flv", "ts", "mp4", "mkv", "webm"];

pub struct DirectUrl {
    client: Arc<HttpClient>,
    stall: Duration,
}

impl DirectUrl {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            stall: Duration::from_secs(30),
        }
    }

    /// How long an HLS stream may go without new segments before it counts
    /// as ended.
    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }
}

fn path_extension(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let last = url.path_segments()?.last()?.to_string();
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

fn kind_of(url: &str) -> SourceKind {
    match path_extension(url).as_deref() {
        Some("m3u8") => SourceKind::Hls,
        _ => SourceKind::Progressive,
    }
}

/// Interprets the status of the stream URL. `None` means the stream is up.
fn classify(status: StatusCode) -> Result<Option<Probe>, AdapterError> {
    match status {
        s if s.is_success() => Ok(None),
        StatusCode::FORBIDDEN => Ok(Some(Probe::Private)),
        StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Some(Probe::Offline)),
        StatusCode::TOO_MANY_REQUESTS => Err(AdapterError::RateLimited),
        s => Err(AdapterError::Protocol(format!("unexpected status {}", s))),
    }
}

#[async_trait]
impl SiteAdapter for DirectUrl {
    fn site(&self) -> &str {
        "Direct URL"
    }

    fn slug(&self) -> &str {
        "DU"
    }

    fn aliases(&self) -> &[&str] {
        &["direct", "url"]
    }

    fn website_url(&self, username: &str) -> String {
        username.to_string()
    }

    async fn probe(&self, id: &StreamerId) -> Result<Probe, AdapterError> {
        let url = id.username.as_str();
        let kind = kind_of(url);

        match kind {
            SourceKind::Hls => {
                let resp = self.client.client.get(url).send().await?;
                if let Some(probe) = classify(resp.status())? {
                    return Ok(probe);
                }
                let text = resp.text().await?;
                if let Playlist::Media(p) = hls::parse_playlist(&text)? {
                    if p.ended {
                        // A finished VOD, not a live stream.
                        return Ok(Probe::Offline);
                    }
                }
            }
            SourceKind::Progressive => {
                if let Some(probe) = classify(self.client.head_status(url).await?)? {
                    return Ok(probe);
                }
            }
        }

        Ok(Probe::Live(LiveInfo {
            url: url.to_string(),
            kind,
            title: None,
        }))
    }

    async fn open_source(&self, info: &LiveInfo) -> Result<MediaSource, AdapterError> {
        match info.kind {
            SourceKind::Hls => hls::open(self.client.clone(), &info.url, self.stall).await,
            SourceKind::Progressive => {
                let ext = path_extension(&info.url)
                    .filter(|e| PROGRESSIVE_EXTENSIONS.contains(&e.as_str()))
                    .unwrap_or_else(|| "ts".to_string());
                self.client.open_stream(&info.url, &ext).await
            }
        }
    }
}
