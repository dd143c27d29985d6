use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File, FileFormat, FileSourceString};
use indoc::indoc;
use serde::Deserialize;

use crate::types::Bitrate;

/// Prefix of the environment variables overriding the settings,
/// e.g. `MEDIAGRAB__NETWORK__RETRIES=5`
pub const ENV_PREFIX: &str = "MEDIAGRAB";

/// Name of the configuration file looked up in the current directory
pub const DEFAULT_FILE: &str = "mediagrab.toml";

const DEFAULTS: &str = indoc! {r#"
    [encoder]
    program = "ffmpeg"
    audio_bitrate = "128K"

    [extractor]
    program = "yt-dlp"
    supported_hosts = [
        "youtube.com",
        "youtu.be",
        "youtube-nocookie.com",
        "music.youtube.com",
    ]

    [network]
    connect_timeout_secs = 30
    read_timeout_secs = 60
    retries = 3
    backoff_base_ms = 500
    user_agent = "mediagrab"

    [download]
    progress_interval_ms = 200
    corrupt_retries = 1
"#};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub encoder: EncoderSettings,
    pub extractor: ExtractorSettings,
    pub network: NetworkSettings,
    pub download: DownloadSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EncoderSettings {
    /// Name or path of the ffmpeg binary
    pub program: PathBuf,
    /// Bitrate used when audio has to be re-encoded
    pub audio_bitrate: Bitrate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractorSettings {
    /// Name or path of the yt-dlp binary
    pub program: PathBuf,
    /// Hosts accepted by the resolver. Subdomains of these hosts are accepted too.
    pub supported_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Extra attempts after a transient network failure
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DownloadSettings {
    /// Root of the per-request working directories. The system temporary
    /// directory is used when unset.
    pub work_dir: Option<PathBuf>,
    pub progress_interval_ms: u64,
    /// Number of times a download whose size does not match its declared size is restarted
    pub corrupt_retries: u32,
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl DownloadSettings {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for Settings {
    /// The built-in settings, ignoring any configuration file or environment variable
    fn default() -> Self {
        Config::builder()
            .add_source(Self::defaults())
            .build()
            .and_then(|config| config.try_deserialize())
            .expect("built-in default settings are valid")
    }
}

impl Settings {
    /// Load the settings from the defaults, then the configuration file, then the environment.
    ///
    /// Without an explicit path, `mediagrab.toml` is read from the current directory if it exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_in(path, Path::new("."))
    }

    /// Same as [`load`](Self::load), looking for the default file in `dir`
    fn load_in(path: Option<PathBuf>, dir: &Path) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml),
            None => File::from(dir.join(DEFAULT_FILE))
                .format(FileFormat::Toml)
                .required(false),
        };

        Config::builder()
            .add_source(Self::defaults())
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("extractor.supported_hosts"),
            )
            .build()?
            .try_deserialize()
    }

    fn defaults() -> File<FileSourceString, FileFormat> {
        File::from_str(DEFAULTS, FileFormat::Toml)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::writedoc;

    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert_eq!(settings.encoder.program, PathBuf::from("ffmpeg"));
        assert_eq!(settings.encoder.audio_bitrate, Bitrate::kbps(128));
        assert_eq!(settings.network.retries, 3);
        assert!(settings
            .extractor
            .supported_hosts
            .contains(&"youtu.be".to_string()));
        assert_eq!(settings.download.work_dir, None);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writedoc!(
            file,
            r#"
                [encoder]
                program = "/opt/ffmpeg/bin/ffmpeg"
                audio_bitrate = "192K"

                [download]
                work_dir = "/var/tmp/mediagrab"
            "#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(
            settings.encoder.program,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(settings.encoder.audio_bitrate, Bitrate::kbps(192));
        assert_eq!(
            settings.download.work_dir,
            Some(PathBuf::from("/var/tmp/mediagrab"))
        );
        // Untouched sections keep their defaults
        assert_eq!(settings.network, Settings::default().network);
    }

    #[test]
    fn defaults_ignore_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let stray = dir.path().join(DEFAULT_FILE);

        std::fs::write(&stray, "[network]\nretries = 9\n").unwrap();
        assert_eq!(Settings::load_in(None, dir.path()).unwrap().network.retries, 9);
        assert_eq!(Settings::default().network.retries, 3);

        std::fs::write(&stray, "[encoder]\naudio_bitrate = \"loud\"\n").unwrap();
        assert!(Settings::load_in(None, dir.path()).is_err());
        assert_eq!(Settings::default().encoder.audio_bitrate, Bitrate::kbps(128));
    }

    #[test]
    fn missing_default_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_in(None, dir.path()).unwrap();
        assert_eq!(settings.download, Settings::default().download);
    }

    #[test]
    fn invalid_bitrate_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[encoder]\naudio_bitrate = \"loud\"").unwrap();

        assert!(Settings::load(Some(file.path().to_path_buf())).is_err());
    }
}
