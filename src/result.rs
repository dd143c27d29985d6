use std::{io, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{Phase, RunState};

/// Failure to turn a source URL into a [`VideoInfo`](crate::types::VideoInfo)
#[derive(Debug, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("Unsupported source URL '{url}'")]
    #[diagnostic(
        code(mediagrab::resolve::unsupported),
        help("Supported hosts are listed in `extractor.supported_hosts`")
    )]
    Unsupported { url: String },

    #[error("Extractor '{}' is not installed or not executable", program.display())]
    #[diagnostic(
        code(mediagrab::resolve::extractor_missing),
        help("Install yt-dlp or set `extractor.program` to its location")
    )]
    ExtractorMissing { program: PathBuf },

    #[error("Could not reach the source platform: {reason}")]
    #[diagnostic(code(mediagrab::resolve::network))]
    NetworkFailure { reason: String },

    #[error("Could not parse the source answer: {reason}")]
    #[diagnostic(code(mediagrab::resolve::parse))]
    ParseFailure { reason: String },

    #[error("The source does not offer any playable stream")]
    #[diagnostic(code(mediagrab::resolve::no_streams))]
    NoStreams,
}

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    /// `transient` errors (timeouts, connection resets, 5xx) may succeed on retry
    #[error("Network error: {reason}")]
    #[diagnostic(code(mediagrab::fetch::network))]
    Network { reason: String, transient: bool },

    #[error("Could not store the stream in '{}'", path.display())]
    #[diagnostic(code(mediagrab::fetch::storage))]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Stream not found: {what}")]
    #[diagnostic(code(mediagrab::fetch::not_found))]
    NotFound { what: String },

    #[error("Fetch cancelled")]
    #[diagnostic(code(mediagrab::fetch::cancelled))]
    Cancelled,
}

impl FetchError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FetchError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Network {
                transient: true,
                ..
            }
        )
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum TranscodeError {
    #[error("Encoder '{}' is not installed or not executable", program.display())]
    #[diagnostic(
        code(mediagrab::transcode::encoder_missing),
        help("Install ffmpeg or set `encoder.program` to its location")
    )]
    EncoderMissing { program: PathBuf },

    #[error("Encoder exited with {}", exit_code_str(.code))]
    #[diagnostic(code(mediagrab::transcode::encoder_crashed))]
    EncoderCrashed {
        code: Option<i32>,
        #[help]
        diagnostics: String,
    },

    #[error("Invalid transcoding input: {reason}")]
    #[diagnostic(code(mediagrab::transcode::invalid_input))]
    InvalidInput { reason: String },

    #[error("I/O failure while transcoding: {context}")]
    #[diagnostic(code(mediagrab::transcode::io))]
    IOFailure {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Transcoding cancelled")]
    #[diagnostic(code(mediagrab::transcode::cancelled))]
    Cancelled,
}

fn exit_code_str(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status code {code}"),
        None => "no status code (killed by a signal)".to_string(),
    }
}

/// Terminal error of a download run, tagged with the phase that failed
#[derive(Debug, Error, Diagnostic)]
pub enum DownloadError {
    #[error("Resolving the video failed")]
    #[diagnostic(code(mediagrab::phase::resolving))]
    Resolve(#[source] #[diagnostic_source] ResolutionError),

    #[error("Fetching the selected streams failed")]
    #[diagnostic(code(mediagrab::phase::fetching))]
    Fetch(#[source] #[diagnostic_source] FetchError),

    #[error("Transcoding the fetched streams failed")]
    #[diagnostic(code(mediagrab::phase::transcoding))]
    Transcode(#[source] #[diagnostic_source] TranscodeError),

    #[error("Download cancelled")]
    #[diagnostic(code(mediagrab::cancelled))]
    Cancelled,

    #[error("Cannot {operation} while {state:?}")]
    #[diagnostic(code(mediagrab::invalid_state))]
    InvalidState {
        state: RunState,
        operation: &'static str,
    },

    #[error("Working files error: {context}")]
    #[diagnostic(code(mediagrab::workspace))]
    Workspace {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("The download worker stopped without reporting an outcome")]
    #[diagnostic(code(mediagrab::worker_lost))]
    WorkerLost,
}

impl DownloadError {
    /// The phase the run was in when it failed, if the failure belongs to one
    pub fn phase(&self) -> Option<Phase> {
        match self {
            DownloadError::Resolve(_) => Some(Phase::Resolving),
            DownloadError::Fetch(_) => Some(Phase::Fetching),
            DownloadError::Transcode(_) => Some(Phase::Transcoding),
            _ => None,
        }
    }

    pub(crate) fn workspace(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| DownloadError::Workspace { context, source }
    }
}

impl From<ResolutionError> for DownloadError {
    fn from(err: ResolutionError) -> Self {
        DownloadError::Resolve(err)
    }
}

impl From<FetchError> for DownloadError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => DownloadError::Cancelled,
            err => DownloadError::Fetch(err),
        }
    }
}

impl From<TranscodeError> for DownloadError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Cancelled => DownloadError::Cancelled,
            err => DownloadError::Transcode(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_wrapped_in_a_phase() {
        let err: DownloadError = FetchError::Cancelled.into();
        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(err.phase(), None);

        let err: DownloadError = TranscodeError::Cancelled.into();
        assert!(matches!(err, DownloadError::Cancelled));
    }

    #[test]
    fn phase_context_is_kept() {
        let err: DownloadError = ResolutionError::NoStreams.into();
        assert_eq!(err.phase(), Some(Phase::Resolving));

        let err: DownloadError = FetchError::NotFound {
            what: "140".to_string(),
        }
        .into();
        assert_eq!(err.phase(), Some(Phase::Fetching));

        let err: DownloadError = TranscodeError::EncoderMissing {
            program: "ffmpeg".into(),
        }
        .into();
        assert_eq!(err.phase(), Some(Phase::Transcoding));
    }

    #[test]
    fn crash_message_mentions_exit_code() {
        let err = TranscodeError::EncoderCrashed {
            code: Some(1),
            diagnostics: "Invalid data found".to_string(),
        };
        assert_eq!(err.to_string(), "Encoder exited with status code 1");
    }
}
