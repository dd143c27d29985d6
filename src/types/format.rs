use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Container of the final deliverable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Mkv,
    Webm,
    M4a,
    Mp3,
    Opus,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Mp4,
        OutputFormat::Mkv,
        OutputFormat::Webm,
        OutputFormat::M4a,
        OutputFormat::Mp3,
        OutputFormat::Opus,
    ];

    /// Return the extension without the leading dot.
    /// e.g. "ext"
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Webm => "webm",
            OutputFormat::M4a => "m4a",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Opus => "opus",
        }
    }

    /// Return the extension with the leading dot.
    /// e.g. ".ext"
    pub fn with_dot(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => ".mp4",
            OutputFormat::Mkv => ".mkv",
            OutputFormat::Webm => ".webm",
            OutputFormat::M4a => ".m4a",
            OutputFormat::Mp3 => ".mp3",
            OutputFormat::Opus => ".opus",
        }
    }

    /// Whether the container only holds an audio track
    pub fn is_audio_only(self) -> bool {
        matches!(self, OutputFormat::M4a | OutputFormat::Mp3 | OutputFormat::Opus)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == s)
            .ok_or_else(|| format!("Unknown output format '{s}'"))
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_formats() {
        assert_eq!("mp4".parse(), Ok(OutputFormat::Mp4));
        assert_eq!(".MKV".parse(), Ok(OutputFormat::Mkv));
        assert!("avi".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn audio_only_formats() {
        let audio: Vec<_> = OutputFormat::ALL
            .into_iter()
            .filter(|f| f.is_audio_only())
            .collect();
        assert_eq!(
            audio,
            [OutputFormat::M4a, OutputFormat::Mp3, OutputFormat::Opus]
        );
    }
}
