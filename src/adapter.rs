//! The capability every hosting site implements, and the registry that maps
//! site names to implementations. Nothing outside `sites` knows which site it
//! is talking to.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{error::AdapterError, source::MediaSource, streamer::StreamerId};

/// How a live stream is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Hls,
    Progressive,
}

/// What a successful probe learned about a live stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveInfo {
    pub url: String,
    pub kind: SourceKind,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    Live(LiveInfo),
    Offline,
    /// Online, but the stream cannot be recorded (private or ticketed show).
    Private,
}

#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Human readable site name.
    fn site(&self) -> &str;

    /// Short code used in identities and folder names.
    fn slug(&self) -> &str;

    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn website_url(&self, username: &str) -> String;

    /// Checks whether the streamer is live. Callers bound this with the
    /// configured probe timeout.
    async fn probe(&self, id: &StreamerId) -> Result<Probe, AdapterError>;

    /// Opens the media stream found by `probe`. The stream may have ended in
    /// between, in which case this fails with `AdapterError::Unavailable`.
    async fn open_source(&self, info: &LiveInfo) -> Result<MediaSource, AdapterError>;
}

#[derive(Default, Clone)]
pub struct SiteRegistry {
    adapters: Vec<Arc<dyn SiteAdapter>>,
}

impl fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|a| a.slug()))
            .finish()
    }
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) {
        debug!("Registered site {} [{}]", adapter.site(), adapter.slug());
        self.adapters.push(adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SiteAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Looks a site up by name, slug or alias, ignoring case.
    pub fn resolve(&self, site: &str) -> Option<Arc<dyn SiteAdapter>> {
        let site = site.to_lowercase();
        self.adapters
            .iter()
            .find(|a| {
                a.site().to_lowercase() == site
                    || a.slug().to_lowercase() == site
                    || a.aliases().iter().any(|alias| alias.to_lowercase() == site)
            })
            .cloned()
    }

    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.adapters.iter().map(|a| a.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named;

    #[async_trait]
    impl SiteAdapter for Named {
        fn site(&self) -> &str {
            "StripChat"
        }
        fn slug(&self) -> &str {
            "SC"
        }
        fn aliases(&self) -> &[&str] {
            &["stripchat.com"]
        }
        fn website_url(&self, username: &str) -> String {
            format!("https://stripchat.com/{}", username)
        }
        async fn probe(&self, _id: &StreamerId) -> Result<Probe, AdapterError> {
            Ok(Probe::Offline)
        }
        async fn open_source(&self, _info: &LiveInfo) -> Result<MediaSource, AdapterError> {
            Err(AdapterError::Unavailable)
        }
    }

    #[test]
    fn resolves_by_name_slug_and_alias() {
        let registry = SiteRegistry::new().with(Arc::new(Named));

        for name in ["stripchat", "sc", "SC", "StripChat.com"] {
            let adapter = registry.resolve(name).expect(name);
            assert_eq!(adapter.slug(), "SC");
        }
        assert!(registry.resolve("cb").is_none());
    }
}
