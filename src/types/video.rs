use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Opaque identifier of one substream offered by the source platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tracks a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamKind {
    Muxed,
    VideoOnly,
    AudioOnly,
}

impl StreamKind {
    pub fn has_video(self) -> bool {
        matches!(self, StreamKind::Muxed | StreamKind::VideoOnly)
    }

    pub fn has_audio(self) -> bool {
        matches!(self, StreamKind::Muxed | StreamKind::AudioOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QualityOption {
    pub key: StreamKey,
    pub quality: String,
    pub audio_quality: String,
    pub mime_type: String,
    pub kind: StreamKind,
}

impl QualityOption {
    /// The mime subtype, which is also the container name: `video/mp4; codecs=".."` gives `mp4`
    pub fn container(&self) -> &str {
        let essence = self.mime_type.split(';').next().unwrap_or_default();
        essence.split('/').nth(1).unwrap_or_default().trim()
    }

    /// The codecs listed in the mime type parameters
    pub fn codecs(&self) -> impl Iterator<Item = &str> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("codecs="))
            .flat_map(|codecs| codecs.trim_matches('"').split(','))
            .map(str::trim)
            .filter(|codec| !codec.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thumbnail {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Width")]
    pub width: u32,
    #[serde(rename = "Height")]
    pub height: u32,
}

/// Canonical metadata record of a resolved video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub author: String,
    pub title: String,
    pub duration: Duration,
    /// When the metadata snapshot was taken
    pub source_timestamp: Option<OffsetDateTime>,
    /// Never empty, in source order. The first option is the default one.
    pub quality_options: Vec<QualityOption>,
    pub thumbnails: Vec<Thumbnail>,
}

impl VideoInfo {
    pub fn option(&self, key: &StreamKey) -> Option<&QualityOption> {
        self.quality_options.iter().find(|o| &o.key == key)
    }
}

/// Where the bytes of a stream can be downloaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocation {
    pub url: Url,
    pub kind: StreamKind,
    pub content_length: Option<u64>,
    /// Sent with the request for the stream
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTable(HashMap<StreamKey, StreamLocation>);

impl StreamTable {
    pub fn insert(&mut self, key: StreamKey, location: StreamLocation) {
        self.0.insert(key, location);
    }

    pub fn get(&self, key: &StreamKey) -> Option<&StreamLocation> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Output of a successful resolution: the public record and the private stream locations
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVideo {
    pub info: VideoInfo,
    pub streams: StreamTable,
}
