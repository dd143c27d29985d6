use std::{fmt::Display, str::FromStr};

use super::{QualityOption, StreamKey, StreamKind, VideoInfo};

/// What the caller picked among the [`QualityOption`]s of a video.
///
/// Written either with stream keys (`"137"` or `"137+140"`) or with labels,
/// as `"<quality>/<audio>/<container>"` (e.g. `"720p/aac/mp4"`).
/// With labels, an empty quality selects audio only and an empty audio selects video only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Keys {
        primary: StreamKey,
        audio: Option<StreamKey>,
    },
    Labels {
        quality: String,
        audio: String,
        container: String,
    },
}

/// The streams to download for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    Single(StreamKey),
    Pair { video: StreamKey, audio: StreamKey },
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty quality selection".to_string());
        }

        if s.contains('/') {
            let parts: Vec<&str> = s.split('/').map(str::trim).collect();
            let [quality, audio, container] = parts[..] else {
                return Err(format!(
                    "Quality selection '{s}' must be written <quality>/<audio>/<container>"
                ));
            };
            if quality.is_empty() && audio.is_empty() {
                return Err(format!(
                    "Quality selection '{s}' selects neither video nor audio"
                ));
            }

            return Ok(Selector::Labels {
                quality: quality.to_string(),
                audio: audio.to_string(),
                container: container.to_string(),
            });
        }

        match s.split('+').map(str::trim).collect::<Vec<_>>()[..] {
            [key] if !key.is_empty() => Ok(Selector::Keys {
                primary: StreamKey::new(key),
                audio: None,
            }),
            [video, audio] if !video.is_empty() && !audio.is_empty() => Ok(Selector::Keys {
                primary: StreamKey::new(video),
                audio: Some(StreamKey::new(audio)),
            }),
            _ => Err(format!("Invalid stream key selection '{s}'")),
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Keys {
                primary,
                audio: None,
            } => write!(f, "{primary}"),
            Selector::Keys {
                primary,
                audio: Some(audio),
            } => write!(f, "{primary}+{audio}"),
            Selector::Labels {
                quality,
                audio,
                container,
            } => write!(f, "{quality}/{audio}/{container}"),
        }
    }
}

impl Selector {
    /// Find the streams matching the selection, keeping the source order preference
    pub fn plan(&self, info: &VideoInfo) -> Result<FetchPlan, String> {
        match self {
            Selector::Keys { primary, audio } => Self::plan_keys(info, primary, audio.as_ref()),
            Selector::Labels {
                quality,
                audio,
                container,
            } => Self::plan_labels(info, quality, audio, container),
        }
    }

    fn plan_keys(
        info: &VideoInfo,
        primary: &StreamKey,
        audio: Option<&StreamKey>,
    ) -> Result<FetchPlan, String> {
        let first = info
            .option(primary)
            .ok_or_else(|| format!("No stream with key '{primary}'"))?;

        let Some(audio) = audio else {
            return Ok(FetchPlan::Single(primary.clone()));
        };

        let second = info
            .option(audio)
            .ok_or_else(|| format!("No stream with key '{audio}'"))?;

        if !first.kind.has_video() {
            return Err(format!("Stream '{primary}' has no video track"));
        }
        if !second.kind.has_audio() {
            return Err(format!("Stream '{audio}' has no audio track"));
        }

        Ok(FetchPlan::Pair {
            video: primary.clone(),
            audio: audio.clone(),
        })
    }

    fn plan_labels(
        info: &VideoInfo,
        quality: &str,
        audio: &str,
        container: &str,
    ) -> Result<FetchPlan, String> {
        let options = &info.quality_options;
        let in_container =
            |o: &QualityOption| container.is_empty() || o.container().eq_ignore_ascii_case(container);
        let video_matches = |o: &&QualityOption| {
            o.kind.has_video() && o.quality.eq_ignore_ascii_case(quality) && in_container(o)
        };
        let audio_only_matches = |o: &&QualityOption| {
            o.kind == StreamKind::AudioOnly && audio_matches(o, audio) && in_container(o)
        };

        let no_match = || format!("No stream matches '{quality}/{audio}/{container}'");

        if quality.is_empty() {
            let found = options.iter().find(audio_only_matches).ok_or_else(no_match)?;
            return Ok(FetchPlan::Single(found.key.clone()));
        }

        if audio.is_empty() {
            let found = options.iter().find(video_matches).ok_or_else(no_match)?;
            return Ok(FetchPlan::Single(found.key.clone()));
        }

        // Adaptive streams usually come in better qualities than muxed ones
        let adaptive_video = options
            .iter()
            .filter(|o| o.kind == StreamKind::VideoOnly)
            .find(video_matches);
        let audio_stream = options.iter().find(audio_only_matches);

        if let (Some(video), Some(audio)) = (adaptive_video, audio_stream) {
            return Ok(FetchPlan::Pair {
                video: video.key.clone(),
                audio: audio.key.clone(),
            });
        }

        let muxed = options
            .iter()
            .filter(|o| o.kind == StreamKind::Muxed)
            .find(video_matches);

        match (muxed, audio_stream) {
            (Some(m), _) if audio_matches(m, audio) => Ok(FetchPlan::Single(m.key.clone())),
            (Some(m), Some(a)) => Ok(FetchPlan::Pair {
                video: m.key.clone(),
                audio: a.key.clone(),
            }),
            _ => Err(no_match()),
        }
    }
}

/// Audio codecs by their common name, as prefixes of the RFC 6381 codec identifiers
fn codec_aliases(name: &str) -> &'static [&'static str] {
    match name {
        "aac" => &["mp4a", "aac"],
        "opus" => &["opus"],
        "vorbis" => &["vorbis"],
        "mp3" => &["mp3", "mp4a.40.34", "mp4a.6b"],
        "flac" => &["flac", "fLaC"],
        _ => &[],
    }
}

fn strip_label_prefix(label: &str) -> &str {
    const PREFIX: &str = "audio_quality_";
    match label.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => &label[PREFIX.len()..],
        _ => label,
    }
}

/// Whether an audio selection (quality label or codec name) matches the option
fn audio_matches(option: &QualityOption, audio: &str) -> bool {
    if !option.kind.has_audio() {
        return false;
    }

    let wanted = strip_label_prefix(audio);
    if strip_label_prefix(&option.audio_quality).eq_ignore_ascii_case(wanted) {
        return true;
    }

    let wanted = wanted.to_ascii_lowercase();
    let aliases = codec_aliases(&wanted);
    option.codecs().any(|codec| {
        let codec = codec.to_ascii_lowercase();
        codec == wanted
            || aliases
                .iter()
                .any(|alias| codec.starts_with(&alias.to_ascii_lowercase()))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn option(key: &str, quality: &str, audio: &str, mime: &str, kind: StreamKind) -> QualityOption {
        QualityOption {
            key: StreamKey::new(key),
            quality: quality.into(),
            audio_quality: audio.into(),
            mime_type: mime.into(),
            kind,
        }
    }

    fn info() -> VideoInfo {
        VideoInfo {
            author: "Someone".into(),
            title: "Something".into(),
            duration: Duration::from_secs(212),
            source_timestamp: None,
            quality_options: vec![
                option(
                    "18",
                    "360p",
                    "AUDIO_QUALITY_LOW",
                    r#"video/mp4; codecs="avc1.42001E, mp4a.40.2""#,
                    StreamKind::Muxed,
                ),
                option(
                    "136",
                    "720p",
                    "",
                    r#"video/mp4; codecs="avc1.4d401f""#,
                    StreamKind::VideoOnly,
                ),
                option(
                    "247",
                    "720p",
                    "",
                    r#"video/webm; codecs="vp9""#,
                    StreamKind::VideoOnly,
                ),
                option(
                    "140",
                    "",
                    "AUDIO_QUALITY_MEDIUM",
                    r#"audio/mp4; codecs="mp4a.40.2""#,
                    StreamKind::AudioOnly,
                ),
                option(
                    "251",
                    "",
                    "AUDIO_QUALITY_MEDIUM",
                    r#"audio/webm; codecs="opus""#,
                    StreamKind::AudioOnly,
                ),
            ],
            thumbnails: vec![],
        }
    }

    fn plan(selection: &str) -> Result<FetchPlan, String> {
        selection.parse::<Selector>()?.plan(&info())
    }

    fn pair(video: &str, audio: &str) -> FetchPlan {
        FetchPlan::Pair {
            video: StreamKey::new(video),
            audio: StreamKey::new(audio),
        }
    }

    #[test]
    fn parse_selectors() {
        assert_eq!(
            "137+140".parse(),
            Ok(Selector::Keys {
                primary: StreamKey::new("137"),
                audio: Some(StreamKey::new("140")),
            })
        );
        assert_eq!(
            "720p/aac/mp4".parse(),
            Ok(Selector::Labels {
                quality: "720p".into(),
                audio: "aac".into(),
                container: "mp4".into(),
            })
        );
        for bad in ["", "+140", "1+2+3", "720p/aac", "//mp4"] {
            assert!(bad.parse::<Selector>().is_err(), "{bad}");
        }
    }

    #[test]
    fn selectors_display_as_parsed() {
        for s in ["137", "137+140", "720p/aac/mp4", "/medium/webm"] {
            assert_eq!(s.parse::<Selector>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn labels_prefer_adaptive_pair() {
        assert_eq!(plan("720p/aac/mp4"), Ok(pair("136", "140")));
        assert_eq!(plan("720p/opus/webm"), Ok(pair("247", "251")));
        assert_eq!(plan("720p/medium/webm"), Ok(pair("247", "251")));
    }

    #[test]
    fn labels_fall_back_to_muxed() {
        assert_eq!(
            plan("360p/low/mp4"),
            Ok(FetchPlan::Single(StreamKey::new("18")))
        );
        assert_eq!(plan("360p/medium/mp4"), Ok(pair("18", "140")));
    }

    #[test]
    fn single_track_selections() {
        assert_eq!(
            plan("720p//webm"),
            Ok(FetchPlan::Single(StreamKey::new("247")))
        );
        assert_eq!(
            plan("/AUDIO_QUALITY_MEDIUM/mp4"),
            Ok(FetchPlan::Single(StreamKey::new("140")))
        );
    }

    #[test]
    fn key_selections() {
        assert_eq!(plan("136+251"), Ok(pair("136", "251")));
        assert_eq!(plan("18"), Ok(FetchPlan::Single(StreamKey::new("18"))));
        assert!(plan("999").is_err());
        assert!(plan("140+136").is_err());
    }

    #[test]
    fn unmatched_labels_fail() {
        assert!(plan("1080p/aac/mp4").is_err());
        assert!(plan("720p/flac/mp4").is_err());
    }
}
