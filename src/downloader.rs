//! Entry point of the crate: the operations offered to a user interface.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, info};

use crate::{
    cancel::CancelToken,
    encoder::EncoderAvailability,
    fetcher::{HttpSource, StreamFetcher},
    orchestrator::{
        DownloadEvent, DownloadOrchestrator, DownloadOutcome, DownloadRequest, RequestId, Services,
    },
    outside::{Ffmpeg, Ytdl},
    resolver::MetadataResolver,
    result::{DownloadError, FetchError, ResolutionError},
    settings::Settings,
    types::VideoInfo,
    utils::MutexUtils,
};

type Registry = Arc<Mutex<HashMap<RequestId, CancelToken>>>;

pub struct Downloader {
    encoder: Arc<EncoderAvailability>,
    services: Arc<Services>,
    in_flight: Registry,
    next_id: AtomicU64,
}

impl Downloader {
    /// Create a downloader using `yt-dlp`, HTTP and `ffmpeg` as configured
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let encoder = Arc::new(EncoderAvailability::new(&settings.encoder.program));

        let services = Services {
            resolver: MetadataResolver::new(
                Box::new(Ytdl::new(&settings.extractor.program)),
                &settings.extractor,
                &settings.network,
            ),
            fetcher: StreamFetcher::new(
                Box::new(HttpSource::new(&settings.network)?),
                &settings.network,
                &settings.download,
            ),
            transcoder: Box::new(Ffmpeg::new(encoder.clone(), settings.encoder.audio_bitrate)),
            download: settings.download.clone(),
        };

        Ok(Self::with_services(encoder, services))
    }

    /// Create a downloader from already built components
    pub fn with_services(encoder: Arc<EncoderAvailability>, services: Services) -> Self {
        Self {
            encoder,
            services: Arc::new(services),
            in_flight: Arc::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether the encoder is installed. The answer is cached.
    pub fn check_ffmpeg(&self) -> bool {
        self.encoder.check_installed()
    }

    /// Probe the encoder again, e.g. after the user installed it
    pub fn recheck_ffmpeg(&self) -> bool {
        self.encoder.recheck()
    }

    pub fn get_info(&self, url: &str) -> Result<VideoInfo, ResolutionError> {
        let resolved = self.services.resolver.resolve(url, &CancelToken::new())?;
        Ok(resolved.info)
    }

    /// Start a download on its own thread.
    ///
    /// Progress and the outcome are published on the events of the returned handle.
    pub fn start_download(&self, request: DownloadRequest) -> Result<DownloadHandle, DownloadError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        let (tx, rx) = unbounded();

        self.in_flight
            .with_lock(|mut in_flight| in_flight.insert(id, cancel.clone()));

        let orchestrator = DownloadOrchestrator::new(id, self.services.clone(), tx, cancel);
        let guard = Deregister {
            registry: self.in_flight.clone(),
            id,
        };

        info!("Starting request {id} for {}", request.url);
        let spawned = std::thread::Builder::new()
            .name(format!("dl-{id}"))
            .spawn(move || {
                let _guard = guard;
                orchestrator.run(&request);
            });

        match spawned {
            Ok(_) => Ok(DownloadHandle { id, events: rx }),
            Err(source) => Err(DownloadError::Workspace {
                context: "starting the download thread",
                source,
            }),
        }
    }

    /// Cancel an in-flight download. Return `false` if it is unknown or already over.
    pub fn cancel_download(&self, id: RequestId) -> bool {
        self.in_flight.with_lock(|in_flight| match in_flight.get(&id) {
            Some(cancel) => {
                info!("Cancelling request {id}");
                cancel.cancel();
                true
            }
            None => false,
        })
    }

    /// Number of downloads still running
    pub fn in_flight(&self) -> usize {
        self.in_flight.with_lock(|in_flight| in_flight.len())
    }
}

/// Remove a request from the registry when its thread ends, even by panicking
struct Deregister {
    registry: Registry,
    id: RequestId,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        debug!("Request {} is over", self.id);
        self.registry
            .with_lock(|mut in_flight| in_flight.remove(&self.id));
    }
}

#[derive(Debug)]
pub struct DownloadHandle {
    pub id: RequestId,
    pub events: Receiver<DownloadEvent>,
}

impl DownloadHandle {
    /// Wait for the outcome, dropping every other event
    pub fn wait(self) -> DownloadOutcome {
        self.wait_with(|_| {})
    }

    /// Wait for the outcome, passing every other event to `f`.
    ///
    /// A run ending without publishing its outcome is reported as [`DownloadError::WorkerLost`].
    pub fn wait_with<F: FnMut(&DownloadEvent)>(self, mut f: F) -> DownloadOutcome {
        for event in self.events.iter() {
            match event {
                DownloadEvent::Finished(outcome) => return outcome,
                event => f(&event),
            }
        }
        DownloadOutcome::Failed(DownloadError::WorkerLost)
    }
}
