//! Turn a source URL into a [`VideoInfo`] and the locations of its streams.

use std::{collections::BTreeMap, time::Duration};

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    cancel::CancelToken,
    result::ResolutionError,
    settings::{ExtractorSettings, NetworkSettings},
    types::{
        duration::RawDuration, QualityOption, ResolvedVideo, StreamKey, StreamKind,
        StreamLocation, StreamTable, Thumbnail, VideoInfo,
    },
    utils::backoff_delay,
};

/// Protocols only giving a manifest instead of the stream bytes
const MANIFEST_PROTOCOLS: [&str; 4] = ["m3u8", "m3u8_native", "http_dash_segments", "mhtml"];

/// Interface for asking the source platform about a video
pub trait MetadataSource: Send + Sync {
    /// Get the raw metadata record of the video at the given URL
    fn fetch(&self, url: &Url) -> Result<RawVideo, ResolutionError>;
}

/// Metadata record as given by the source, before normalization.
///
/// Every field is optional, sources routinely omit some of them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawVideo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<RawDuration>,
    /// Unix time at which the record was extracted
    pub epoch: Option<i64>,
    pub is_live: Option<bool>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
    #[serde(default)]
    pub thumbnails: Vec<RawThumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub protocol: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    /// Audio bitrate in kbit/s
    pub abr: Option<f64>,
    pub format_note: Option<String>,
    pub quality_label: Option<String>,
    pub audio_quality: Option<String>,
    pub mime_type: Option<String>,
    pub filesize: Option<u64>,
    /// Headers the extractor would send, some CDNs refuse requests without them
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub struct MetadataResolver {
    source: Box<dyn MetadataSource>,
    supported_hosts: Vec<String>,
    retries: u32,
    backoff_base: Duration,
}

impl MetadataResolver {
    pub fn new(
        source: Box<dyn MetadataSource>,
        extractor: &ExtractorSettings,
        network: &NetworkSettings,
    ) -> Self {
        Self {
            source,
            supported_hosts: extractor
                .supported_hosts
                .iter()
                .map(|h| h.trim().trim_start_matches('.').to_lowercase())
                .collect(),
            retries: network.retries,
            backoff_base: network.backoff_base(),
        }
    }

    /// Check that the URL targets one of the supported hosts (or one of their subdomains)
    pub fn check_supported(&self, url: &str) -> Result<Url, ResolutionError> {
        let unsupported = || ResolutionError::Unsupported {
            url: url.to_string(),
        };

        let parsed = Url::parse(url.trim()).map_err(|_| unsupported())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(unsupported());
        }

        let host = parsed.host_str().ok_or_else(unsupported)?.to_lowercase();
        let supported = self.supported_hosts.iter().any(|supported| {
            host == *supported
                || host
                    .strip_suffix(supported.as_str())
                    .is_some_and(|sub| sub.ends_with('.'))
        });

        if supported {
            Ok(parsed)
        } else {
            Err(unsupported())
        }
    }

    /// Resolve the video behind the URL.
    ///
    /// Network failures are retried with backoff. Cancellation stops the retries,
    /// the last error is then returned.
    pub fn resolve(&self, url: &str, cancel: &CancelToken) -> Result<ResolvedVideo, ResolutionError> {
        let url = self.check_supported(url)?;

        let mut attempt = 0;
        let raw = loop {
            match self.source.fetch(&url) {
                Ok(raw) => break raw,
                Err(err @ ResolutionError::NetworkFailure { .. }) if attempt < self.retries => {
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!("Resolving {url} failed ({err}), retrying in {delay:?}");
                    attempt += 1;
                    if cancel.sleep(delay) {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        };

        let resolved = normalize(raw)?;
        info!(
            "Resolved '{}' with {} stream(s)",
            resolved.info.title,
            resolved.info.quality_options.len()
        );
        Ok(resolved)
    }
}

/// Turn a raw record into the canonical one
pub fn normalize(raw: RawVideo) -> Result<ResolvedVideo, ResolutionError> {
    if raw.is_live == Some(true) {
        debug!("Live streams cannot be downloaded");
        return Err(ResolutionError::NoStreams);
    }

    let duration = match &raw.duration {
        Some(duration) => duration
            .normalize()
            .map_err(|reason| ResolutionError::ParseFailure { reason })?,
        None => Duration::ZERO,
    };

    let source_timestamp = match raw.epoch {
        Some(epoch) => OffsetDateTime::from_unix_timestamp(epoch).map_err(|err| {
            ResolutionError::ParseFailure {
                reason: format!("Invalid extraction time {epoch}: {err}"),
            }
        })?,
        None => OffsetDateTime::now_utc(),
    };

    let mut quality_options = Vec::with_capacity(raw.formats.len());
    let mut streams = StreamTable::default();
    for (index, format) in raw.formats.into_iter().enumerate() {
        if let Some((option, location)) = normalize_format(index, format) {
            streams.insert(option.key.clone(), location);
            quality_options.push(option);
        }
    }

    if quality_options.is_empty() {
        return Err(ResolutionError::NoStreams);
    }

    let thumbnails = raw
        .thumbnails
        .into_iter()
        .filter_map(|t| match (t.url, t.width, t.height) {
            (Some(url), Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(Thumbnail { url, width, height })
            }
            _ => None,
        })
        .collect();

    let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());

    Ok(ResolvedVideo {
        info: VideoInfo {
            author: non_empty(raw.uploader)
                .or(non_empty(raw.channel))
                .unwrap_or_default(),
            title: raw.title.unwrap_or_default(),
            duration,
            source_timestamp: Some(source_timestamp),
            quality_options,
            thumbnails,
        },
        streams,
    })
}

fn normalize_format(index: usize, format: RawFormat) -> Option<(QualityOption, StreamLocation)> {
    let key = match format.format_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => StreamKey::new(id),
        _ => StreamKey::new(format!("#{index}")),
    };

    if format
        .protocol
        .as_deref()
        .is_some_and(|p| MANIFEST_PROTOCOLS.iter().any(|m| p.starts_with(m)))
    {
        debug!("Skipping stream {key}: manifest only");
        return None;
    }

    let url = match format.url.as_deref().map(Url::parse) {
        Some(Ok(url)) => url,
        Some(Err(err)) => {
            debug!("Skipping stream {key}: invalid URL ({err})");
            return None;
        }
        None => {
            debug!("Skipping stream {key}: no URL");
            return None;
        }
    };

    let is_none = |codec: &Option<String>| codec.as_deref() == Some("none");
    let kind = match (is_none(&format.vcodec), is_none(&format.acodec)) {
        (true, true) => {
            debug!("Skipping stream {key}: neither video nor audio");
            return None;
        }
        (true, false) => StreamKind::AudioOnly,
        (false, true) => StreamKind::VideoOnly,
        (false, false) => StreamKind::Muxed,
    };

    let note = format.format_note.clone().filter(|n| !n.is_empty());

    let quality = if kind.has_video() {
        format
            .quality_label
            .clone()
            .or(note.clone())
            .or(format.height.map(|h| format!("{h}p")))
            .unwrap_or_default()
    } else {
        String::new()
    };

    let audio_quality = if kind.has_audio() {
        format
            .audio_quality
            .clone()
            .or(if kind == StreamKind::AudioOnly { note } else { None })
            .or(format.abr.map(|abr| format!("{abr:.0}k")))
            .unwrap_or_default()
    } else {
        String::new()
    };

    let mime_type = format
        .mime_type
        .clone()
        .unwrap_or_else(|| build_mime(kind, &format));

    let option = QualityOption {
        key,
        quality,
        audio_quality,
        mime_type,
        kind,
    };
    let location = StreamLocation {
        url,
        kind,
        content_length: format.filesize.filter(|size| *size > 0),
        headers: format.http_headers.clone(),
    };
    Some((option, location))
}

/// Build a mime type such as `video/mp4; codecs="avc1.4d401f, mp4a.40.2"`
fn build_mime(kind: StreamKind, format: &RawFormat) -> String {
    let top = if kind.has_video() { "video" } else { "audio" };
    let subtype = match format.ext.as_deref() {
        Some("m4a") | None => "mp4",
        Some(ext) => ext,
    };

    let codecs: Vec<&str> = [format.vcodec.as_deref(), format.acodec.as_deref()]
        .into_iter()
        .flatten()
        .filter(|c| !c.is_empty() && *c != "none")
        .collect();

    if codecs.is_empty() {
        format!("{top}/{subtype}")
    } else {
        format!("{top}/{subtype}; codecs=\"{}\"", codecs.join(", "))
    }
}
