//! Resolve web videos into their metadata and streams, download the selected
//! streams and mux/convert them with ffmpeg.
//!
//! [`Downloader`] is the entry point. Each download runs a
//! [`DownloadOrchestrator`](orchestrator::DownloadOrchestrator) on its own thread and
//! publishes its progress as [`DownloadEvent`](orchestrator::DownloadEvent)s.

pub mod cancel;
pub mod downloader;
pub mod encoder;
pub mod fetcher;
pub mod io;
pub mod orchestrator;
pub mod outside;
pub mod resolver;
pub mod result;
pub mod settings;
pub mod transcoder;
pub mod types;
mod utils;
pub mod wire;

pub use downloader::{DownloadHandle, Downloader};
pub use encoder::{EncoderAvailability, EncoderStatus};
pub use orchestrator::{DownloadEvent, DownloadOutcome, DownloadRequest, RequestId};
pub use result::{DownloadError, FetchError, ResolutionError, TranscodeError};
