use std::{
    ffi::OsString,
    io::{self, BufRead, BufReader, Read},
    path::Path,
    process::{Child, ExitStatus},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::command::{spawn_command, tail_lines, Capture, FFXXX_DEFAULT_ARGS};
use crate::{
    cancel::CancelToken,
    encoder::EncoderAvailability,
    result::TranscodeError,
    transcoder::{
        remove_partial, validate_job, ProgressParser, Transcode, TranscodeJob, TranscodeProgress,
        TranscodeResult,
    },
    types::{Bitrate, OutputFormat},
};

/// Longest time the encoder is left running without checking for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of stderr lines attached to a crash report
const DIAGNOSTIC_LINES: usize = 10;

/// Interface for the [ffmpeg](https://ffmpeg.org) program
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    availability: Arc<EncoderAvailability>,
    audio_bitrate: Bitrate,
}

impl Ffmpeg {
    pub fn new(availability: Arc<EncoderAvailability>, audio_bitrate: Bitrate) -> Self {
        Self {
            availability,
            audio_bitrate,
        }
    }

    fn program(&self) -> &Path {
        self.availability.program()
    }

    /// Arguments of a job, one token per argument
    fn build_args(&self, job: &TranscodeJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = FFXXX_DEFAULT_ARGS
            .iter()
            .chain(&["-nostdin", "-y", "-progress", "pipe:1", "-nostats"])
            .map(OsString::from)
            .collect();

        for input in &job.inputs {
            args.push("-i".into());
            args.push(input.path.clone().into_os_string());
        }

        let maps: &[&str] = match job.inputs.len() {
            1 => &["-map", "0:v:0?", "-map", "0:a:0?"],
            _ => &["-map", "0:v:0", "-map", "1:a:0"],
        };
        args.extend(maps.iter().map(OsString::from));

        let bitrate = self.audio_bitrate.to_string();
        let bitrate = bitrate.as_str();
        let codecs: Vec<&str> = match job.format {
            OutputFormat::Mp4 => vec!["-c:v", "copy", "-c:a", "aac", "-b:a", bitrate],
            OutputFormat::Mkv => vec!["-c:v", "copy", "-c:a", "copy"],
            OutputFormat::Webm => vec!["-c:v", "copy", "-c:a", "libopus", "-b:a", bitrate],
            OutputFormat::M4a => vec!["-vn", "-c:a", "aac", "-b:a", bitrate],
            OutputFormat::Mp3 => vec!["-vn", "-c:a", "libmp3lame", "-b:a", bitrate],
            OutputFormat::Opus => vec!["-vn", "-c:a", "libopus", "-b:a", bitrate],
        };
        args.extend(codecs.into_iter().map(OsString::from));

        args.push(job.output.clone().into_os_string());
        args
    }

    /// Follow the encoder until it exits, forwarding its progress.
    ///
    /// The encoder is killed and reaped if the token gets cancelled.
    fn follow(
        &self,
        child: &mut Child,
        lines: &Receiver<String>,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(TranscodeProgress),
        cancel: &CancelToken,
    ) -> Result<ExitStatus, TranscodeError> {
        let mut parser = ProgressParser::default();
        let mut stdout_open = true;

        loop {
            if cancel.is_cancelled() {
                debug!("Cancelled, killing the encoder");
                abort(child);
                return Err(TranscodeError::Cancelled);
            }

            if stdout_open {
                match lines.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => {
                        if let Some(progress) = parser.feed(&line, job.duration_hint) {
                            on_progress(progress);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stdout_open = false,
                }
                continue;
            }

            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    cancel.sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    abort(child);
                    return Err(TranscodeError::IOFailure {
                        context: "waiting for the encoder",
                        source,
                    });
                }
            }
        }
    }
}

impl Transcode for Ffmpeg {
    fn transcode(
        &self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(TranscodeProgress),
        cancel: &CancelToken,
    ) -> Result<TranscodeResult, TranscodeError> {
        validate_job(job)?;

        let missing = || TranscodeError::EncoderMissing {
            program: self.program().to_path_buf(),
        };
        if !self.availability.check_installed() {
            return Err(missing());
        }
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        let args = self.build_args(job);
        let mut child = spawn_command(
            self.program().as_os_str(),
            |cmd| cmd.args(&args),
            Capture::STDOUT | Capture::STDERR,
        )
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => missing(),
            _ => TranscodeError::IOFailure {
                context: "starting the encoder",
                source,
            },
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            abort(&mut child);
            return Err(TranscodeError::IOFailure {
                context: "capturing the encoder output",
                source: io::Error::new(io::ErrorKind::BrokenPipe, "Output pipes are missing"),
            });
        };

        let (status, stderr) = std::thread::scope(|scope| {
            let (tx, rx) = crossbeam_channel::unbounded();
            scope.spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            let stderr_reader = scope.spawn(move || {
                let mut buf = Vec::new();
                let _ = BufReader::new(stderr).read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            });

            let status = self.follow(&mut child, &rx, job, on_progress, cancel);
            (status, stderr_reader.join().unwrap_or_default())
        });

        let status = match status {
            Ok(status) => status,
            Err(err) => {
                remove_partial(&job.output);
                return Err(err);
            }
        };

        if !status.success() {
            warn!("Encoder failed with {status}");
            remove_partial(&job.output);
            return Err(TranscodeError::EncoderCrashed {
                code: status.code(),
                diagnostics: tail_lines(&stderr, DIAGNOSTIC_LINES),
            });
        }

        if !job.output.is_file() {
            return Err(TranscodeError::IOFailure {
                context: "reading the encoder output",
                source: io::Error::new(io::ErrorKind::NotFound, "The encoder wrote no file"),
            });
        }

        info!("Transcoded into '{}'", job.output.display());
        Ok(TranscodeResult {
            output: job.output.clone(),
        })
    }
}

/// Kill the encoder and reap it
fn abort(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("Could not kill the encoder: {err}");
    }
    if let Err(err) = child.wait() {
        debug!("Could not reap the encoder: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{transcoder::TranscodeInput, types::StreamKind};

    fn job(dir: &Path, format: OutputFormat, pair: bool) -> TranscodeJob {
        let mut inputs = Vec::new();
        let video = dir.join("my video.mp4");
        std::fs::write(&video, b"video bytes").unwrap();
        if pair {
            let audio = dir.join("my audio.m4a");
            std::fs::write(&audio, b"audio bytes").unwrap();
            inputs.push(TranscodeInput {
                path: video,
                kind: StreamKind::VideoOnly,
            });
            inputs.push(TranscodeInput {
                path: audio,
                kind: StreamKind::AudioOnly,
            });
        } else {
            inputs.push(TranscodeInput {
                path: video,
                kind: StreamKind::Muxed,
            });
        }

        TranscodeJob {
            inputs,
            output: dir.join(format!("output.{format}")),
            format,
            duration_hint: Some(Duration::from_secs(2)),
        }
    }

    fn ffmpeg(program: impl Into<PathBuf>) -> Ffmpeg {
        Ffmpeg::new(
            Arc::new(EncoderAvailability::new(program)),
            Bitrate::kbps(160),
        )
    }

    fn args_of(ffmpeg: &Ffmpeg, job: &TranscodeJob) -> Vec<String> {
        ffmpeg
            .build_args(job)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn contains(args: &[String], window: &[&str]) -> bool {
        args.windows(window.len()).any(|w| w == window)
    }

    #[test]
    fn arguments_per_format() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = ffmpeg("ffmpeg");

        let mp4 = args_of(&ffmpeg, &job(dir.path(), OutputFormat::Mp4, true));
        assert!(contains(&mp4, &["-progress", "pipe:1", "-nostats"]));
        assert!(contains(&mp4, &["-map", "0:v:0", "-map", "1:a:0"]));
        assert!(contains(&mp4, &["-c:v", "copy", "-c:a", "aac", "-b:a", "160K"]));
        assert_eq!(
            mp4.last().map(String::as_str),
            dir.path().join("output.mp4").to_str()
        );
        // Paths are single tokens, spaces included
        assert!(mp4.iter().any(|a| a.ends_with("my video.mp4")));

        let mkv = args_of(&ffmpeg, &job(dir.path(), OutputFormat::Mkv, false));
        assert!(contains(&mkv, &["-c:v", "copy", "-c:a", "copy"]));
        assert!(contains(&mkv, &["-map", "0:v:0?", "-map", "0:a:0?"]));

        let mp3 = args_of(&ffmpeg, &job(dir.path(), OutputFormat::Mp3, false));
        assert!(contains(&mp3, &["-vn", "-c:a", "libmp3lame"]));

        let opus = args_of(&ffmpeg, &job(dir.path(), OutputFormat::Opus, false));
        assert!(contains(&opus, &["-vn", "-c:a", "libopus", "-b:a", "160K"]));
    }

    #[test]
    fn missing_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let res = ffmpeg("/nonexistent/dir/ffmpeg").transcode(
            &job(dir.path(), OutputFormat::Mp4, true),
            &mut |_| {},
            &CancelToken::new(),
        );
        assert!(matches!(res, Err(TranscodeError::EncoderMissing { .. })));
    }

    #[cfg(unix)]
    fn fake_program(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("fake-ffmpeg");
        let script = format!(
            "#!/bin/sh\n\
            if [ \"$1\" = \"-version\" ]; then exit 0; fi\n\
            input=\"\"\nprev=\"\"\n\
            for arg in \"$@\"; do\n\
            if [ \"$prev\" = \"-i\" ] && [ -z \"$input\" ]; then input=\"$arg\"; fi\n\
            prev=\"$arg\"\n\
            done\n\
            output=\"$prev\"\n\
            {body}\n"
        );
        std::fs::write(&program, script).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        program
    }

    #[cfg(unix)]
    #[test]
    fn successful_run_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(
            dir.path(),
            "echo out_time_us=1000000\necho speed=2x\necho progress=continue\n\
            cat \"$input\" > \"$output\"\n\
            echo out_time_us=2000000\necho progress=end",
        );
        let job = job(dir.path(), OutputFormat::Mp4, true);

        let mut fractions = Vec::new();
        let res = ffmpeg(program)
            .transcode(
                &job,
                &mut |p| fractions.push(p.fraction),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(res.output, job.output);
        assert_eq!(std::fs::read(&job.output).unwrap(), b"video bytes");
        assert_eq!(fractions, [Some(0.5), Some(1.0)]);
    }

    #[cfg(unix)]
    #[test]
    fn crash_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(
            dir.path(),
            "echo garbage > \"$output\"\necho 'Invalid data found when processing input' >&2\nexit 1",
        );
        let job = job(dir.path(), OutputFormat::Mkv, false);

        let res = ffmpeg(program).transcode(&job, &mut |_| {}, &CancelToken::new());
        match res {
            Err(TranscodeError::EncoderCrashed { code, diagnostics }) => {
                assert_eq!(code, Some(1));
                assert!(diagnostics.contains("Invalid data found"));
            }
            other => panic!("Unexpected result: {other:?}"),
        }
        assert!(!job.output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_kills_silent_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(dir.path(), "echo partial > \"$output\"\nexec sleep 30");
        let job = job(dir.path(), OutputFormat::Mp4, true);

        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            remote.cancel();
        });

        let start = std::time::Instant::now();
        let res = ffmpeg(program).transcode(&job, &mut |_| {}, &cancel);
        canceller.join().unwrap();

        assert!(matches!(res, Err(TranscodeError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!job.output.exists());
    }
}
