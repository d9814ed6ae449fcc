use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transition::TransitionKind;

/// Unique identifier for an asset in the surrounding asset store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of media behind an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// Identifies one still image or video source. Immutable once created;
/// fields are only readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    id: AssetId,
    url: String,
    media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transition: Option<TransitionKind>,
}

impl AssetRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            id: AssetId::new(id),
            url: url.into(),
            media_type,
            transition: None,
        }
    }

    pub fn image(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, url, MediaType::Image)
    }

    pub fn video(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, url, MediaType::Video)
    }

    /// Attach an asset-specific transition that overrides the playback driver's choice.
    pub fn with_transition(mut self, kind: TransitionKind) -> Self {
        self.transition = Some(kind);
        self
    }

    pub fn id(&self) -> &AssetId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    pub fn transition(&self) -> Option<TransitionKind> {
        self.transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_ref_accessors() {
        let a = AssetRef::video("clip-1", "local://clip-1").with_transition(TransitionKind::Swirl);
        assert_eq!(a.id().to_string(), "clip-1");
        assert_eq!(a.url(), "local://clip-1");
        assert!(a.is_video());
        assert_eq!(a.transition(), Some(TransitionKind::Swirl));
    }

    #[test]
    fn test_asset_ref_deserializes_without_transition() {
        let a: AssetRef =
            serde_json::from_str(r#"{"id":"p1","url":"https://x/p1.png","media_type":"image"}"#)
                .unwrap();
        assert_eq!(a.media_type(), MediaType::Image);
        assert_eq!(a.transition(), None);
    }
}
