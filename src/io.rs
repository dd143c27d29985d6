use std::{
    ffi::OsString,
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use tempfile::TempDir;
use tracing::debug;

use crate::{types::OutputFormat, utils::MutexUtils};

/// Longest file name, in bytes, accepted by common file systems
const MAX_FILE_NAME: usize = 255;

/// Widest counter appended to a taken name
const MAX_COUNTER: &str = "(4294967295)";

const PLACEHOLDER_SUFFIX: &str = ".empty";

pub fn touch(path: &Path) -> io::Result<()> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

/// Turn a video title into something usable as a file name stem.
///
/// The stem leaves room for the `(n)` counter, the extension and the
/// placeholder suffix within [`MAX_FILE_NAME`] bytes.
pub fn sanitize_title(title: &str) -> String {
    let options = sanitize_filename::Options {
        windows: true,
        truncate: true,
        replacement: " ",
    };
    let title = sanitize_filename::sanitize_with_options(title, options);
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");

    let longest_ext = OutputFormat::ALL
        .iter()
        .map(|f| f.with_dot().len())
        .max()
        .unwrap_or_default();
    let budget = MAX_FILE_NAME - MAX_COUNTER.len() - longest_ext - PLACEHOLDER_SUFFIX.len();

    let title = truncate_on_char_boundary(&title, budget)
        .trim_matches(|c: char| c == '.' || c.is_whitespace());
    if title.is_empty() {
        "video".to_string()
    } else {
        title.to_string()
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Find a path in the output directory that is not already in use.
///
/// Format for 1st file: `<title>.<ext>`, then `<title>(<count>).<ext>` starting at 1.
/// A path is also considered in use if its `.empty` placeholder exists.
pub fn find_unused_path(out_dir: &Path, title: &str, format: OutputFormat) -> io::Result<PathBuf> {
    let dot_ext = format.with_dot();

    let is_free = |output: &Path| !(output.exists() || placeholder_for(output).exists());

    let mut output = out_dir.join(format!("{title}{dot_ext}"));
    if is_free(&output) {
        return Ok(output);
    }

    for n in 1u32.. {
        output.set_file_name(format!("{title}({n}){dot_ext}"));
        if is_free(&output) {
            return Ok(output);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "Every file name for this title is already taken",
    ))
}

fn placeholder_for(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(PLACEHOLDER_SUFFIX);
    PathBuf::from(name)
}

/// A placeholder file standing for a reserved output path.
///
/// The placeholder is removed on drop.
#[derive(Debug)]
pub struct ReservedPath {
    output: PathBuf,
    placeholder: PathBuf,
}

impl ReservedPath {
    pub fn path(&self) -> &Path {
        &self.output
    }
}

impl Drop for ReservedPath {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.placeholder) {
            debug!(
                "Could not remove placeholder '{}': {err}",
                self.placeholder.display()
            );
        }
    }
}

/// Reserve an unused output path by creating an empty placeholder next to it.
///
/// Uses internally a lock to avoid returning the same path in two concurrent calls.
/// This however assumes that the output directory is not changing outside
/// of this function during the call.
pub fn reserve_output_path(
    out_dir: &Path,
    title: &str,
    format: OutputFormat,
) -> io::Result<ReservedPath> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    LOCK.get_or_init(|| Mutex::new(())).with_lock(|_lock| {
        let output = find_unused_path(out_dir, &sanitize_title(title), format)?;
        let placeholder = placeholder_for(&output);
        touch(&placeholder)?;

        Ok(ReservedPath {
            output,
            placeholder,
        })
    })
}

/// Move a file, falling back to copying when a rename is impossible
/// (e.g. across file systems).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if std::fs::rename(from, to).is_err() {
        debug!("Moving file failed, falling back to copying");
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

/// The path a download is written to before it is complete
pub fn part_path_for(output: &Path) -> PathBuf {
    let mut part: OsString = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Create the private working directory of a request.
///
/// The directory and everything in it is removed when the handle is dropped.
pub fn request_workdir(root: Option<&Path>, request_id: u64) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    let prefix = format!("mediagrab-{request_id}-");
    builder.prefix(&prefix);

    match root {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
}
