//! Download of a single stream to local storage.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use reqwest::{blocking::Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::{
    cancel::CancelToken,
    io::part_path_for,
    result::FetchError,
    settings::{DownloadSettings, NetworkSettings},
    types::StreamLocation,
    utils::backoff_delay,
};

const CHUNK_SIZE: usize = 64 * 1024;

/// Interface for opening the byte stream behind a URL
pub trait ByteSource: Send + Sync {
    /// Open the stream, returning its body and its size if it is known
    fn open(
        &self,
        location: &StreamLocation,
    ) -> Result<(Box<dyn Read + Send>, Option<u64>), FetchError>;
}

/// [`ByteSource`] over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(network: &NetworkSettings) -> Result<Self, FetchError> {
        // Proxies are taken from the environment by default
        let client = Client::builder()
            .connect_timeout(network.connect_timeout())
            .timeout(network.read_timeout())
            .user_agent(network.user_agent.clone())
            .build()
            .map_err(|err| FetchError::Network {
                reason: format!("Could not create the HTTP client: {err}"),
                transient: false,
            })?;

        Ok(Self { client })
    }
}

impl ByteSource for HttpSource {
    fn open(
        &self,
        location: &StreamLocation,
    ) -> Result<(Box<dyn Read + Send>, Option<u64>), FetchError> {
        let url = &location.url;
        debug!("GET {url}");

        let mut request = self.client.get(url.clone());
        for (name, value) in &location.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .map_err(|err| FetchError::Network {
                transient: err.is_timeout() || err.is_connect(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        let size = response.content_length();
        Ok((Box::new(response), size))
    }
}

/// Map an unsuccessful HTTP status to the matching error
fn status_error(status: StatusCode, url: &Url) -> FetchError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound {
            what: url.to_string(),
        },
        status => FetchError::Network {
            reason: format!("Server answered {status}"),
            transient: status.is_server_error()
                || status == StatusCode::REQUEST_TIMEOUT
                || status == StatusCode::TOO_MANY_REQUESTS,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct StreamFetcher {
    source: Box<dyn ByteSource>,
    retries: u32,
    backoff_base: Duration,
    progress_interval: Duration,
}

impl StreamFetcher {
    pub fn new(
        source: Box<dyn ByteSource>,
        network: &NetworkSettings,
        download: &DownloadSettings,
    ) -> Self {
        Self {
            source,
            retries: network.retries,
            backoff_base: network.backoff_base(),
            progress_interval: download.progress_interval(),
        }
    }

    /// Download the stream to `destination`.
    ///
    /// Bytes are first written to `<destination>.part`, renamed on success
    /// and removed on failure. `on_progress` receives the downloaded and total bytes.
    pub fn fetch(
        &self,
        location: &StreamLocation,
        destination: &Path,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
        cancel: &CancelToken,
    ) -> Result<FetchResult, FetchError> {
        let part = part_path_for(destination);

        let res = self
            .fetch_with_retries(location, &part, on_progress, cancel)
            .and_then(|bytes| {
                std::fs::rename(&part, destination)
                    .map_err(|err| FetchError::storage(destination, err))?;
                Ok(bytes)
            });

        match res {
            Ok(bytes) => {
                debug!("Fetched {bytes} bytes into '{}'", destination.display());
                Ok(FetchResult {
                    path: destination.to_path_buf(),
                    bytes,
                })
            }
            Err(err) => {
                remove_part(&part);
                Err(err)
            }
        }
    }

    fn fetch_with_retries(
        &self,
        location: &StreamLocation,
        part: &Path,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
        cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            match self.fetch_once(location, part, on_progress, cancel) {
                Err(err) if err.is_transient() && attempt < self.retries => {
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!("Fetching {} failed ({err}), retrying in {delay:?}", location.url);
                    attempt += 1;
                    if cancel.sleep(delay) {
                        return Err(FetchError::Cancelled);
                    }
                }
                res => return res,
            }
        }
    }

    fn fetch_once(
        &self,
        location: &StreamLocation,
        part: &Path,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
        cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        let (mut reader, declared) = self.source.open(location)?;
        let total = declared.or(location.content_length);

        let file = File::create(part).map_err(|err| FetchError::storage(part, err))?;
        let mut writer = BufWriter::new(file);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes = 0u64;
        let mut last_report: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(FetchError::Network {
                        reason: format!("Transfer interrupted after {bytes} bytes: {err}"),
                        transient: true,
                    })
                }
            };

            writer
                .write_all(&buf[..n])
                .map_err(|err| FetchError::storage(part, err))?;
            bytes += n as u64;

            if last_report.map_or(true, |at| at.elapsed() >= self.progress_interval) {
                on_progress(bytes, total);
                last_report = Some(Instant::now());
            }
        }

        writer
            .flush()
            .map_err(|err| FetchError::storage(part, err))?;

        if let Some(total) = total.filter(|total| *total != bytes) {
            return Err(FetchError::storage(
                part,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Expected {total} bytes but got {bytes}"),
                ),
            ));
        }

        on_progress(bytes, total);
        Ok(bytes)
    }
}

fn remove_part(part: &Path) {
    match std::fs::remove_file(part) {
        Ok(()) => debug!("Removed partial download '{}'", part.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not remove '{}': {err}", part.display()),
    }
}
