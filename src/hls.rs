//! Live HLS as a media source: poll the media playlist, fetch each new segment
//! once, and hand the segment bytes out in media-sequence order.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use regex::Regex;
use reqwest::Url;
use tokio::{sync::mpsc, time::Instant};
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{AdapterError, SessionError},
    source::MediaSource,
    util::HttpClient,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub media_sequence: u64,
    pub target_duration: Duration,
    pub segments: Vec<String>,
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

pub fn parse_playlist(text: &str) -> Result<Playlist, AdapterError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err(AdapterError::Protocol("not an m3u8 playlist".to_string()));
    }

    let bandwidth_re = Regex::new(r"(?:^|,)BANDWIDTH=(\d+)").expect("valid regex");
    let mut variants = Vec::new();
    let mut pending_bandwidth = None;
    let mut media = MediaPlaylist {
        media_sequence: 0,
        target_duration: Duration::from_secs(2),
        segments: Vec::new(),
        ended: false,
    };

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_bandwidth = Some(
                bandwidth_re
                    .captures(attrs)
                    .and_then(|c| c[1].parse().ok())
                    .unwrap_or(0),
            );
        } else if let Some(seq) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media.media_sequence = seq
                .parse()
                .map_err(|_| AdapterError::Protocol(format!("bad media sequence {:?}", seq)))?;
        } else if let Some(dur) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            let secs: f64 = dur
                .parse()
                .map_err(|_| AdapterError::Protocol(format!("bad target duration {:?}", dur)))?;
            media.target_duration = Duration::from_secs_f64(secs.max(0.0));
        } else if line == "#EXT-X-ENDLIST" {
            media.ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some(bandwidth) = pending_bandwidth.take() {
            variants.push(Variant {
                bandwidth,
                uri: line.to_string(),
            });
        } else {
            media.segments.push(line.to_string());
        }
    }

    if variants.is_empty() {
        Ok(Playlist::Media(media))
    } else {
        Ok(Playlist::Master(variants))
    }
}

/// Resolves `uri` against `base`. Tokens carried in the playlist's query
/// string are inherited by children that have none of their own.
pub fn resolve_url(base: &str, uri: &str) -> Result<String, AdapterError> {
    let base = Url::parse(base).map_err(|e| AdapterError::Protocol(e.to_string()))?;
    let mut url = base
        .join(uri)
        .map_err(|e| AdapterError::Protocol(e.to_string()))?;
    if url.query().is_none() {
        url.set_query(base.query());
    }
    Ok(url.into())
}

/// Follows a master playlist to its highest bandwidth variant.
async fn select_media_url(client: &HttpClient, url: &str) -> Result<String, AdapterError> {
    let text = client.fetch_text(url).await?;
    match parse_playlist(&text)? {
        Playlist::Media(_) => Ok(url.to_string()),
        Playlist::Master(variants) => {
            let best = variants
                .iter()
                .max_by_key(|v| v.bandwidth)
                .ok_or_else(|| AdapterError::Protocol("empty master playlist".to_string()))?;
            debug!("Selected HLS variant {} ({} bps)", best.uri, best.bandwidth);
            resolve_url(url, &best.uri)
        }
    }
}

/// Opens a live HLS stream. The source ends on `#EXT-X-ENDLIST`, when the
/// playlist disappears, or after `stall` without any new segment.
pub async fn open(
    client: Arc<HttpClient>,
    url: &str,
    stall: Duration,
) -> Result<MediaSource, AdapterError> {
    let media_url = select_media_url(&client, url).await?;

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(thread_segments(client, media_url, stall, tx));

    Ok(MediaSource::new(ReceiverStream::new(rx), "ts"))
}

async fn thread_segments(
    client: Arc<HttpClient>,
    url: String,
    stall: Duration,
    tx: mpsc::Sender<Result<Bytes, SessionError>>,
) {
    let mut next_seq = None;
    let mut last_seq_time = Instant::now();

    loop {
        let playlist = match client.fetch_text(&url).await.and_then(|t| parse_playlist(&t)) {
            Ok(Playlist::Media(p)) => p,
            Ok(Playlist::Master(_)) => {
                let _ = tx
                    .send(Err(SessionError::SourceDropped(
                        "media playlist turned into a master playlist".to_string(),
                    )))
                    .await;
                return;
            }
            Err(AdapterError::Unavailable) => {
                debug!("Playlist {} is gone, stream ended", url);
                return;
            }
            Err(e) => {
                if last_seq_time.elapsed() > stall {
                    let _ = tx.send(Err(SessionError::SourceDropped(e.to_string()))).await;
                    return;
                }
                warn!("Could not refresh playlist {}: {}", url, e);
                if !wait_or_closed(&tx, Duration::from_secs(1)).await {
                    return;
                }
                continue;
            }
        };

        let start = next_seq.unwrap_or(playlist.media_sequence);
        for (i, uri) in playlist.segments.iter().enumerate() {
            let seq = playlist.media_sequence + i as u64;
            if seq < start {
                continue;
            }

            let segment_url = match resolve_url(&url, uri) {
                Ok(u) => u,
                Err(e) => {
                    warn!("Skipping segment {}: {}", seq, e);
                    continue;
                }
            };
            let strategy = ExponentialBackoff::from_millis(2).factor(100).take(3);
            let data = match Retry::spawn(strategy, || client.fetch_bytes(&segment_url)).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Could not download segment {}: {}", seq, e);
                    next_seq = Some(seq + 1);
                    continue;
                }
            };

            if tx.send(Ok(data)).await.is_err() {
                // Receiver dropped: the session was cancelled.
                return;
            }
            next_seq = Some(seq + 1);
            last_seq_time = Instant::now();
        }

        if playlist.ended {
            debug!("Playlist {} ended", url);
            return;
        }

        if last_seq_time.elapsed() > stall {
            info!("No new segments for {:?}, stopping", stall);
            return;
        }

        let wait = (playlist.target_duration / 2).max(Duration::from_millis(500));
        if !wait_or_closed(&tx, wait).await {
            debug!("Reader of {} went away", url);
            return;
        }
    }
}

/// Sleeps for `wait`. Returns false early if the receiving session is gone.
async fn wait_or_closed(tx: &mpsc::Sender<Result<Bytes, SessionError>>, wait: Duration) -> bool {
    tokio::select! {
        _ = tx.closed() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}
