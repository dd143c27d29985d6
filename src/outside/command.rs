use std::{
    ffi::OsStr,
    io,
    process::{Child, Command, Output, Stdio},
};

use bitflags::bitflags;
use tracing::{debug, enabled, trace, Level};

pub const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDIN = 0b0000001;
        const STDOUT = 0b0000010;
        const STDERR = 0b0000100;
    }
}

fn prepare<F: FnOnce(&mut Command) -> &mut Command>(
    program: &OsStr,
    f: F,
    capture: Capture,
    is_debug: bool,
) -> Command {
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut cmd = Command::new(program);
    f(&mut cmd)
        .stdin(get_io(capture.contains(Capture::STDIN)))
        .stdout(get_io(is_debug || capture.contains(Capture::STDOUT)))
        .stderr(get_io(is_debug || capture.contains(Capture::STDERR)));
    cmd
}

/// Run a command to completion, returning its raw output handle.
///
/// IO handles will be captured only if the caller required it or if the log level is Debug.
/// In that last case, `stdout` and `stderr` will be logged.
///
/// The function returns an error only if the command failed to execute.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub fn run_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &OsStr,
    f: F,
    capture: Capture,
) -> io::Result<Output> {
    let is_debug = enabled!(Level::DEBUG);
    let mut cmd = prepare(program, f, capture, is_debug);

    debug!("Executing command: {cmd:?}");
    let res = cmd.output()?;

    if is_debug {
        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&res.stdout));
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&res.stderr));
    }

    Ok(res)
}

/// Start a command without waiting for it.
///
/// Only the requested IO handles are piped, the caller is responsible for draining them.
pub fn spawn_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &OsStr,
    f: F,
    capture: Capture,
) -> io::Result<Child> {
    let mut cmd = prepare(program, f, capture, false);

    debug!("Spawning command: {cmd:?}");
    cmd.spawn()
}

/// Keep only the last lines of a program output, for error reports
pub fn tail_lines(output: &str, count: usize) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_non_empty_lines() {
        let out = "a\n\nb\nc\n\nd\n";
        assert_eq!(tail_lines(out, 2), "c\nd");
        assert_eq!(tail_lines(out, 10), "a\nb\nc\nd");
        assert_eq!(tail_lines("", 3), "");
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let res = run_command(
            OsStr::new("mediagrab-this-program-does-not-exist"),
            |cmd| cmd.arg("--version"),
            Capture::empty(),
        );
        assert_eq!(res.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
