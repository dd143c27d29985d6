mod command;
mod ffmpeg;
mod ytdl;

pub use command::{run_command, spawn_command, tail_lines, Capture, FFXXX_DEFAULT_ARGS};
pub use ffmpeg::Ffmpeg;
pub use ytdl::Ytdl;
