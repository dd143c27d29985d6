use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    process::Command,
};

use url::Url;

use super::command::{run_command, tail_lines, Capture};
use crate::{
    resolver::{MetadataSource, RawVideo},
    result::ResolutionError,
};

/// Error messages hinting that the platform could not be reached
const NETWORK_HINTS: [&str; 6] = [
    "unable to download",
    "timed out",
    "connection",
    "network is unreachable",
    "temporary failure in name resolution",
    "http error 5",
];

/// Interface for the [yt-dlp](https://github.com/yt-dlp/yt-dlp) program
#[derive(Debug, Clone)]
pub struct Ytdl {
    program: PathBuf,
}

impl Ytdl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run<F>(&self, f: F) -> Result<String, ResolutionError>
    where
        F: FnOnce(&mut Command) -> &mut Command,
    {
        let res = run_command(
            self.program.as_os_str(),
            f,
            Capture::STDOUT | Capture::STDERR,
        )
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ResolutionError::ExtractorMissing {
                    program: self.program.clone(),
                }
            }
            _ => ResolutionError::ParseFailure {
                reason: format!("Could not execute '{}': {err}", self.program.display()),
            },
        })?;

        if res.status.success() {
            Ok(String::from_utf8_lossy(&res.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&res.stderr)))
        }
    }
}

impl MetadataSource for Ytdl {
    fn fetch(&self, url: &Url) -> Result<RawVideo, ResolutionError> {
        let stdout = self.run(|cmd| {
            cmd.arg("-q")
                .arg("--no-warnings")
                .arg("--skip-download")
                .arg("--no-playlist")
                .arg("-j")
                .arg("--")
                .arg(OsStr::new(url.as_str()))
        })?;

        // Only the first record matters if the program printed several
        let line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ResolutionError::ParseFailure {
                reason: "Empty answer".to_string(),
            })?;

        serde_json::from_str(line).map_err(|err| ResolutionError::ParseFailure {
            reason: err.to_string(),
        })
    }
}

/// Map the error output of the program to the failure it describes
fn classify_failure(stderr: &str) -> ResolutionError {
    let errors: Vec<&str> = stderr
        .lines()
        .filter(|line| line.starts_with("ERROR:"))
        .collect();
    let lower = errors.join("\n").to_lowercase();

    if lower.contains("unsupported url") {
        ResolutionError::Unsupported {
            url: errors
                .iter()
                .find_map(|line| line.split("Unsupported URL:").nth(1))
                .map(|url| url.trim().to_string())
                .unwrap_or_default(),
        }
    } else if NETWORK_HINTS.iter().any(|hint| lower.contains(hint)) {
        ResolutionError::NetworkFailure {
            reason: tail_lines(stderr, 3),
        }
    } else if lower.contains("unavailable") || lower.contains("private video") {
        ResolutionError::NoStreams
    } else {
        ResolutionError::ParseFailure {
            reason: tail_lines(stderr, 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_stderr() {
        assert!(matches!(
            classify_failure("ERROR: Unsupported URL: https://unsupported.example/x"),
            ResolutionError::Unsupported { url } if url == "https://unsupported.example/x"
        ));
        assert!(matches!(
            classify_failure(
                "WARNING: retrying\nERROR: [youtube] abc: Unable to download API page: <urlopen error timed out>"
            ),
            ResolutionError::NetworkFailure { .. }
        ));
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            ResolutionError::NoStreams
        ));
        assert!(matches!(
            classify_failure("Traceback (most recent call last):\nKeyError: 'formats'"),
            ResolutionError::ParseFailure { .. }
        ));
    }

    #[test]
    fn missing_program_is_reported() {
        let ytdl = Ytdl::new("/nonexistent/dir/yt-dlp");
        let url = Url::parse("https://valid.example/video123").unwrap();
        assert!(matches!(
            ytdl.fetch(&url),
            Err(ResolutionError::ExtractorMissing { program }) if program == ytdl.program()
        ));
    }

    #[cfg(unix)]
    fn fake_program(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("yt-dlp");
        std::fs::write(&program, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        program
    }

    #[cfg(unix)]
    #[test]
    fn parse_program_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(
            dir.path(),
            r#"echo '{"title": "Clip", "uploader": "Me", "duration": 12, "formats": [{"format_id": "18", "url": "https://cdn.example/18"}]}'"#,
        );

        let url = Url::parse("https://valid.example/video123").unwrap();
        let raw = Ytdl::new(program).fetch(&url).unwrap();
        assert_eq!(raw.title.as_deref(), Some("Clip"));
        assert_eq!(raw.formats.len(), 1);
        assert_eq!(raw.formats[0].format_id.as_deref(), Some("18"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_program() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(
            dir.path(),
            "echo 'ERROR: [generic] x: Video unavailable' >&2\nexit 1",
        );

        let url = Url::parse("https://valid.example/video123").unwrap();
        assert!(matches!(
            Ytdl::new(program).fetch(&url),
            Err(ResolutionError::NoStreams)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn garbage_output_is_a_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(dir.path(), "echo 'definitely not json'");

        let url = Url::parse("https://valid.example/video123").unwrap();
        assert!(matches!(
            Ytdl::new(program).fetch(&url),
            Err(ResolutionError::ParseFailure { .. })
        ));
    }
}
