use std::collections::BTreeMap;

use filmup_protocol::ContentKind;
use serde::{Deserialize, Serialize};

/// Default upload endpoint per content kind.
///
/// Each kind resolves to its route under `base_url` unless an explicit
/// override is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDefaults {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<ContentKind, String>,
}

impl EndpointDefaults {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, kind: ContentKind, url: impl Into<String>) -> Self {
        self.overrides.insert(kind, url.into());
        self
    }

    /// Returns the upload URL for `kind`, or `None` if neither an override
    /// nor a base URL is configured.
    pub fn resolve(&self, kind: ContentKind) -> Option<String> {
        if let Some(url) = self.overrides.get(&kind) {
            return Some(url.clone());
        }
        if self.base_url.trim().is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            kind.route().trim_start_matches('/')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_routes_under_base_url() {
        let endpoints = EndpointDefaults::new("https://api.filmup.test/v1/");
        assert_eq!(
            endpoints.resolve(ContentKind::Photo).as_deref(),
            Some("https://api.filmup.test/v1/photo/upload_photo")
        );
        assert_eq!(
            endpoints.resolve(ContentKind::FilmVideo).as_deref(),
            Some("https://api.filmup.test/v1/tus")
        );
    }

    #[test]
    fn override_wins() {
        let endpoints = EndpointDefaults::new("https://api.filmup.test")
            .with_override(ContentKind::Avatar, "https://media.filmup.test/avatar");
        assert_eq!(
            endpoints.resolve(ContentKind::Avatar).as_deref(),
            Some("https://media.filmup.test/avatar")
        );
        assert_eq!(
            endpoints.resolve(ContentKind::Cover).as_deref(),
            Some("https://api.filmup.test/account/upload_cover")
        );
    }

    #[test]
    fn unconfigured_resolves_to_none() {
        assert!(EndpointDefaults::default().resolve(ContentKind::Photo).is_none());
    }

    #[test]
    fn serde_uses_kind_names() {
        let endpoints = EndpointDefaults::new("https://api.test")
            .with_override(ContentKind::FilmPhoto, "https://x.test/fp");
        let json = serde_json::to_string(&endpoints).unwrap();
        assert!(json.contains("\"film_photo\":\"https://x.test/fp\""));
        let back: EndpointDefaults = serde_json::from_str(&json).unwrap();
        assert_eq!(back, endpoints);
    }
}
