//! JSON representation of a [`VideoInfo`] exchanged with the user interface.
//!
//! Two versions exist, differing by the representation of the duration:
//! numeric seconds for [`WireVersion::V1`], an ISO-8601 duration for [`WireVersion::V2`].
//! Decoding is strict: the document must follow exactly the requested version.

use std::{fmt::Display, str::FromStr, time::Duration};

use miette::Diagnostic;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::types::{duration, QualityOption, Thumbnail, VideoInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireVersion {
    /// Duration as a number of seconds
    V1,
    /// Duration as an ISO-8601 string such as `PT1H2M3S`
    #[default]
    V2,
}

impl FromStr for WireVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "v1" => Ok(WireVersion::V1),
            "2" | "v2" => Ok(WireVersion::V2),
            _ => Err(format!("Unknown wire version '{s}'")),
        }
    }
}

impl Display for WireVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireVersion::V1 => f.write_str("v1"),
            WireVersion::V2 => f.write_str("v2"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum DecodeError {
    #[error("Malformed {version} document: {source}")]
    #[diagnostic(code(mediagrab::wire::malformed))]
    Malformed {
        version: WireVersion,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid duration: {reason}")]
    #[diagnostic(code(mediagrab::wire::duration))]
    InvalidDuration { reason: String },

    #[error("Invalid video record: {reason}")]
    #[diagnostic(code(mediagrab::wire::record))]
    InvalidRecord { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VideoInfoDto<D> {
    author: String,
    title: String,
    duration: D,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    time: Option<OffsetDateTime>,
    quality_info: Vec<QualityOption>,
    thumbnails: Vec<Thumbnail>,
}

impl<D> VideoInfoDto<D> {
    fn from_info(info: &VideoInfo, duration: D) -> Self {
        Self {
            author: info.author.clone(),
            title: info.title.clone(),
            duration,
            time: info.source_timestamp,
            quality_info: info.quality_options.clone(),
            thumbnails: info.thumbnails.clone(),
        }
    }

    fn into_info(self, duration: Duration) -> Result<VideoInfo, DecodeError> {
        if self.quality_info.is_empty() {
            return Err(DecodeError::InvalidRecord {
                reason: "`qualityInfo` is empty".to_string(),
            });
        }
        if let Some(t) = self.thumbnails.iter().find(|t| t.width == 0 || t.height == 0) {
            return Err(DecodeError::InvalidRecord {
                reason: format!("Thumbnail '{}' has no size", t.url),
            });
        }

        Ok(VideoInfo {
            author: self.author,
            title: self.title,
            duration,
            source_timestamp: self.time,
            quality_options: self.quality_info,
            thumbnails: self.thumbnails,
        })
    }
}

pub fn encode(info: &VideoInfo, version: WireVersion) -> Result<String, serde_json::Error> {
    match version {
        WireVersion::V1 => {
            serde_json::to_string(&VideoInfoDto::from_info(info, info.duration.as_secs_f64()))
        }
        WireVersion::V2 => serde_json::to_string(&VideoInfoDto::from_info(
            info,
            duration::format_iso8601(info.duration),
        )),
    }
}

pub fn decode(json: &str, version: WireVersion) -> Result<VideoInfo, DecodeError> {
    match version {
        WireVersion::V1 => {
            let dto: VideoInfoDto<f64> = parse(json, version)?;
            let duration = Duration::try_from_secs_f64(dto.duration).map_err(|_| {
                DecodeError::InvalidDuration {
                    reason: format!("{} is not a number of seconds", dto.duration),
                }
            })?;
            dto.into_info(duration)
        }
        WireVersion::V2 => {
            let dto: VideoInfoDto<String> = parse(json, version)?;
            let duration = duration::parse_iso8601(&dto.duration)
                .map_err(|reason| DecodeError::InvalidDuration { reason })?;
            dto.into_info(duration)
        }
    }
}

fn parse<T: DeserializeOwned>(json: &str, version: WireVersion) -> Result<T, DecodeError> {
    serde_json::from_str(json).map_err(|source| DecodeError::Malformed { version, source })
}
