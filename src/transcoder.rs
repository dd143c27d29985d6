//! Conversion of fetched streams into the final deliverable.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    cancel::CancelToken,
    result::TranscodeError,
    types::{OutputFormat, StreamKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeInput {
    pub path: PathBuf,
    pub kind: StreamKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    /// One muxed/single-track stream, or a video stream followed by an audio stream
    pub inputs: Vec<TranscodeInput>,
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Expected media duration, used to turn the encoder position into a fraction
    pub duration_hint: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub output: PathBuf,
}

/// Progress reported while transcoding.
/// `fraction` is `None` when the total duration is unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeProgress {
    pub position: Duration,
    pub fraction: Option<f64>,
    pub speed: Option<f64>,
}

impl TranscodeProgress {
    /// Seconds left given the encoder speed (media seconds per wall clock second)
    pub fn eta_seconds(&self, total: Option<Duration>) -> Option<f64> {
        let total = total?;
        let speed = self.speed.filter(|s| *s > 0.0)?;
        let left = total.saturating_sub(self.position).as_secs_f64();
        Some(left / speed)
    }
}

/// Something able to mux/convert fetched streams into the final deliverable
pub trait Transcode: Send + Sync {
    fn transcode(
        &self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(TranscodeProgress),
        cancel: &CancelToken,
    ) -> Result<TranscodeResult, TranscodeError>;
}

/// Check a job before handing it to an encoder
pub fn validate_job(job: &TranscodeJob) -> Result<(), TranscodeError> {
    let invalid = |reason: String| Err(TranscodeError::InvalidInput { reason });

    match job.inputs.as_slice() {
        [] => return invalid("No input stream".to_string()),
        [_] => {}
        [video, audio] => {
            if !video.kind.has_video() {
                return invalid(format!("'{}' has no video track", video.path.display()));
            }
            if !audio.kind.has_audio() {
                return invalid(format!("'{}' has no audio track", audio.path.display()));
            }
        }
        _ => return invalid(format!("Too many input streams ({})", job.inputs.len())),
    }

    for input in &job.inputs {
        match std::fs::metadata(&input.path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(_) => {
                return invalid(format!("'{}' is not a non-empty file", input.path.display()))
            }
            Err(err) => return invalid(format!("'{}': {err}", input.path.display())),
        }
    }

    let has_audio = job.inputs.iter().any(|i| i.kind.has_audio());
    let has_video = job.inputs.iter().any(|i| i.kind.has_video());
    if job.format.is_audio_only() && !has_audio {
        return invalid(format!("A {} output needs an audio stream", job.format));
    }
    if !job.format.is_audio_only() && !has_video && !has_audio {
        return invalid("Inputs carry neither video nor audio".to_string());
    }

    match job.output.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        _ => invalid(format!(
            "Output directory of '{}' does not exist",
            job.output.display()
        )),
    }
}

/// Parser of the `key=value` blocks written by `ffmpeg -progress`
#[derive(Debug, Default)]
pub struct ProgressParser {
    position: Option<Duration>,
    speed: Option<f64>,
}

impl ProgressParser {
    /// Feed one line. Return the progress when a block is complete.
    pub fn feed(&mut self, line: &str, total: Option<Duration>) -> Option<TranscodeProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            // Both are in microseconds, `out_time_ms` is misnamed by ffmpeg
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.position = Some(Duration::from_micros(us));
                }
            }
            "out_time" if self.position.is_none() => {
                self.position = parse_out_time(value);
            }
            "speed" => {
                self.speed = value.trim_end_matches('x').trim().parse().ok();
            }
            "progress" => {
                let finished = value == "end";
                let position = self.position.take().unwrap_or_default();
                let speed = self.speed.take();

                let fraction = if finished {
                    Some(1.0)
                } else {
                    total
                        .filter(|t| !t.is_zero())
                        .map(|t| (position.as_secs_f64() / t.as_secs_f64()).clamp(0.0, 1.0))
                };

                return Some(TranscodeProgress {
                    position,
                    fraction,
                    speed,
                });
            }
            _ => {}
        }

        None
    }
}

/// Parse `HH:MM:SS.micro`
fn parse_out_time(value: &str) -> Option<Duration> {
    let (clock, frac) = value.split_once('.').unwrap_or((value, "0"));
    let whole = crate::types::duration::parse_clock(clock).ok()?;
    let frac: f64 = format!("0.{frac}").parse().ok()?;
    Some(whole + Duration::from_secs_f64(frac))
}

/// Remove a partial output, if any
pub(crate) fn remove_partial(output: &Path) {
    if output.exists() {
        if let Err(err) = std::fs::remove_file(output) {
            tracing::warn!("Could not remove partial output '{}': {err}", output.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &Path, inputs: &[(&str, StreamKind, &[u8])], format: OutputFormat) -> TranscodeJob {
        let inputs = inputs
            .iter()
            .map(|(name, kind, content)| {
                let path = dir.join(name);
                std::fs::write(&path, content).unwrap();
                TranscodeInput { path, kind: *kind }
            })
            .collect();

        TranscodeJob {
            inputs,
            output: dir.join(format!("out.{format}")),
            format,
            duration_hint: Some(Duration::from_secs(10)),
        }
    }

    #[test]
    fn valid_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let pair = job(
            dir.path(),
            &[
                ("v", StreamKind::VideoOnly, b"video"),
                ("a", StreamKind::AudioOnly, b"audio"),
            ],
            OutputFormat::Mp4,
        );
        assert!(validate_job(&pair).is_ok());

        let audio = job(
            dir.path(),
            &[("a", StreamKind::AudioOnly, b"audio")],
            OutputFormat::Mp3,
        );
        assert!(validate_job(&audio).is_ok());
    }

    #[test]
    fn invalid_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let is_invalid = |job: &TranscodeJob| {
            matches!(validate_job(job), Err(TranscodeError::InvalidInput { .. }))
        };

        let swapped = job(
            dir.path(),
            &[
                ("a", StreamKind::AudioOnly, b"audio"),
                ("v", StreamKind::VideoOnly, b"video"),
            ],
            OutputFormat::Mp4,
        );
        assert!(is_invalid(&swapped));

        let empty = job(
            dir.path(),
            &[("e", StreamKind::Muxed, b"")],
            OutputFormat::Mkv,
        );
        assert!(is_invalid(&empty));

        let no_audio = job(
            dir.path(),
            &[("v", StreamKind::VideoOnly, b"video")],
            OutputFormat::Opus,
        );
        assert!(is_invalid(&no_audio));

        let mut missing = job(
            dir.path(),
            &[("m", StreamKind::Muxed, b"data")],
            OutputFormat::Mkv,
        );
        missing.inputs[0].path = dir.path().join("gone");
        assert!(is_invalid(&missing));

        let mut bad_output = job(
            dir.path(),
            &[("m", StreamKind::Muxed, b"data")],
            OutputFormat::Mkv,
        );
        bad_output.output = dir.path().join("no/such/dir/out.mkv");
        assert!(is_invalid(&bad_output));

        let mut nothing = bad_output.clone();
        nothing.inputs.clear();
        assert!(is_invalid(&nothing));
    }

    #[test]
    fn parse_progress_blocks() {
        let mut parser = ProgressParser::default();
        let total = Some(Duration::from_secs(10));

        assert_eq!(parser.feed("frame=120", total), None);
        assert_eq!(parser.feed("out_time_us=2500000", total), None);
        assert_eq!(parser.feed("out_time=00:00:02.500000", total), None);
        assert_eq!(parser.feed("speed=2.5x", total), None);

        let progress = parser.feed("progress=continue", total).unwrap();
        assert_eq!(progress.position, Duration::from_millis(2_500));
        assert_eq!(progress.fraction, Some(0.25));
        assert_eq!(progress.speed, Some(2.5));
        assert_eq!(progress.eta_seconds(total), Some(3.0));

        parser.feed("out_time_ms=10000000", total);
        let end = parser.feed("progress=end", total).unwrap();
        assert_eq!(end.fraction, Some(1.0));
    }

    #[test]
    fn progress_without_duration_has_no_fraction() {
        let mut parser = ProgressParser::default();
        parser.feed("out_time=01:00:00.000000", None);
        let progress = parser.feed("progress=continue", None).unwrap();
        assert_eq!(progress.position, Duration::from_secs(3_600));
        assert_eq!(progress.fraction, None);
        assert_eq!(progress.eta_seconds(None), None);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let mut parser = ProgressParser::default();
        assert_eq!(parser.feed("", None), None);
        assert_eq!(parser.feed("no separator", None), None);
        assert_eq!(parser.feed("out_time_us=N/A", None), None);
        let progress = parser.feed("progress=continue", None).unwrap();
        assert_eq!(progress.position, Duration::ZERO);
    }
}
