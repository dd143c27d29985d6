mod bitrate;
pub mod duration;
mod format;
mod progress;
mod selector;
mod video;

pub use bitrate::Bitrate;
pub use format::OutputFormat;
pub use progress::{DownloadProgress, Phase, RunState};
pub use selector::{FetchPlan, Selector};
pub use video::{
    QualityOption, ResolvedVideo, StreamKey, StreamKind, StreamLocation, StreamTable, Thumbnail,
    VideoInfo,
};
