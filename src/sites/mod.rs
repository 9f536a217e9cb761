//! Concrete site adapters.

use std::sync::Arc;

use crate::{adapter::SiteRegistry, util::HttpClient};

pub mod direct;

/// Registry holding every built-in adapter, sharing one HTTP client.
pub fn registry(client: Arc<HttpClient>) -> SiteRegistry {
    SiteRegistry::new().with(Arc::new(direct::DirectUrl::new(client)))
}
