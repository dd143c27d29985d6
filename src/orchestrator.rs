//! State machine sequencing the resolution, fetch and transcoding of one request.

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    cancel::CancelToken,
    fetcher::{FetchResult, StreamFetcher},
    io::{move_file, request_workdir, reserve_output_path},
    resolver::MetadataResolver,
    result::{DownloadError, FetchError},
    settings::DownloadSettings,
    transcoder::{Transcode, TranscodeInput, TranscodeJob},
    types::{
        DownloadProgress, FetchPlan, OutputFormat, Phase, ResolvedVideo, RunState, Selector,
        StreamKey, StreamLocation, VideoInfo,
    },
    utils::MutexUtils,
};

pub type RequestId = u64;

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub selected_quality: Selector,
    pub output_format: OutputFormat,
    pub output_dir: PathBuf,
}

/// Which part of the plan a fetched stream is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    /// The only stream of the plan
    Single,
    Video,
    Audio,
}

impl Display for StreamRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamRole::Single => "stream",
            StreamRole::Video => "video",
            StreamRole::Audio => "audio",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Complete { output: PathBuf },
    Failed(DownloadError),
    Cancelled,
}

#[derive(Debug)]
pub enum DownloadEvent {
    State(RunState),
    Progress(DownloadProgress),
    StreamProgress {
        role: StreamRole,
        bytes: u64,
        total: Option<u64>,
    },
    /// Always the last event of a run
    Finished(DownloadOutcome),
}

/// The components a run is made of, shared by every run of a process
pub struct Services {
    pub resolver: MetadataResolver,
    pub fetcher: StreamFetcher,
    pub transcoder: Box<dyn Transcode>,
    pub download: DownloadSettings,
}

/// Drives one request through `Resolving → AwaitingSelection → Fetching → Transcoding`.
///
/// An orchestrator is consumed by its run: once in a terminal state, every
/// operation fails with [`DownloadError::InvalidState`].
pub struct DownloadOrchestrator {
    id: RequestId,
    services: Arc<Services>,
    state: RunState,
    cancel: CancelToken,
    events: Sender<DownloadEvent>,
    resolved: Option<ResolvedVideo>,
}

impl DownloadOrchestrator {
    pub fn new(
        id: RequestId,
        services: Arc<Services>,
        events: Sender<DownloadEvent>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id,
            services,
            state: RunState::Idle,
            cancel,
            events,
            resolved: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// `Idle → Resolving → AwaitingSelection`
    pub fn submit(&mut self, url: &str) -> Result<&VideoInfo, DownloadError> {
        self.expect_state(RunState::Idle, "submit a URL")?;
        self.transition(RunState::Resolving);

        let res = self.check_cancel().and_then(|()| {
            let resolved = self.services.resolver.resolve(url, &self.cancel)?;
            self.check_cancel()?;
            Ok(resolved)
        });
        let resolved = self.settle(res)?;

        self.emit(DownloadEvent::Progress(DownloadProgress::new(
            Phase::Resolving,
            1.0,
            None,
        )));
        self.transition(RunState::AwaitingSelection);
        Ok(&self.resolved.insert(resolved).info)
    }

    /// `AwaitingSelection → Fetching → Transcoding → Complete`.
    ///
    /// Return the path of the final file in `out_dir`.
    pub fn confirm(
        &mut self,
        selector: &Selector,
        format: OutputFormat,
        out_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        self.expect_state(RunState::AwaitingSelection, "confirm a selection")?;

        let res = match self.resolved.take() {
            Some(resolved) => self.fetch_and_transcode(&resolved, selector, format, out_dir),
            None => Err(DownloadError::InvalidState {
                state: self.state,
                operation: "confirm a selection without a resolved video",
            }),
        };
        let output = self.settle(res)?;

        info!("Request {} complete: '{}'", self.id, output.display());
        self.transition(RunState::Complete);
        Ok(output)
    }

    /// Cancel the run from the thread owning it.
    ///
    /// The active sub-operation sees the cancellation through the shared token.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.state.is_terminal() {
            self.resolved = None;
            self.transition(RunState::Cancelled);
        }
    }

    /// Run the whole request, then publish its outcome
    pub fn run(mut self, request: &DownloadRequest) {
        let res = self.submit(&request.url).map(|_| ()).and_then(|()| {
            self.confirm(
                &request.selected_quality,
                request.output_format,
                &request.output_dir,
            )
        });

        let outcome = match res {
            Ok(output) => DownloadOutcome::Complete { output },
            Err(DownloadError::Cancelled) => DownloadOutcome::Cancelled,
            Err(err) => DownloadOutcome::Failed(err),
        };
        self.emit(DownloadEvent::Finished(outcome));
    }

    fn fetch_and_transcode(
        &mut self,
        resolved: &ResolvedVideo,
        selector: &Selector,
        format: OutputFormat,
        out_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let plan = selector
            .plan(&resolved.info)
            .map_err(|what| FetchError::NotFound { what })?;
        debug!("Request {}: {selector} selects {plan:?}", self.id);

        self.transition(RunState::Fetching);
        let workdir = request_workdir(self.services.download.work_dir.as_deref(), self.id)
            .map_err(DownloadError::workspace("creating the working directory"))?;
        debug!("Working directory: '{}'", workdir.path().display());

        let inputs = self.fetch_plan(&plan, resolved, workdir.path())?;
        self.check_cancel()?;

        self.transition(RunState::Transcoding);
        let job = TranscodeJob {
            inputs,
            output: workdir.path().join(format!("output{}", format.with_dot())),
            format,
            duration_hint: Some(resolved.info.duration).filter(|d| !d.is_zero()),
        };
        let result = self.services.transcoder.transcode(
            &job,
            &mut |progress| {
                self.emit(DownloadEvent::Progress(DownloadProgress::new(
                    Phase::Transcoding,
                    progress.fraction.unwrap_or(0.0),
                    progress.eta_seconds(job.duration_hint),
                )))
            },
            &self.cancel,
        )?;
        self.check_cancel()?;

        let output = place_output(&result.output, out_dir, &resolved.info.title, format)?;
        if let Err(err) = workdir.close() {
            warn!("Could not remove the working directory: {err}");
        }
        Ok(output)
    }

    /// Fetch every stream of the plan concurrently into `dir`.
    ///
    /// The first failing stream cancels the others.
    fn fetch_plan(
        &self,
        plan: &FetchPlan,
        resolved: &ResolvedVideo,
        dir: &Path,
    ) -> Result<Vec<TranscodeInput>, DownloadError> {
        let roles: Vec<(StreamRole, &StreamKey)> = match plan {
            FetchPlan::Single(key) => vec![(StreamRole::Single, key)],
            FetchPlan::Pair { video, audio } => {
                vec![(StreamRole::Video, video), (StreamRole::Audio, audio)]
            }
        };

        let mut targets = Vec::with_capacity(roles.len());
        for (role, key) in roles {
            let location = resolved
                .streams
                .get(key)
                .ok_or_else(|| FetchError::NotFound {
                    what: format!("stream '{key}'"),
                })?;
            let ext = resolved
                .info
                .option(key)
                .map(|o| o.container())
                .filter(|c| !c.is_empty())
                .unwrap_or("bin");
            targets.push(FetchTarget {
                role,
                location,
                destination: dir.join(format!("{role}.{ext}")),
            });
        }

        let plan_cancel = self.cancel.child();
        let tally = Mutex::new(FetchTally::new(targets.len()));

        let results: Vec<Result<FetchResult, DownloadError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .enumerate()
                .map(|(slot, target)| {
                    let (plan_cancel, tally) = (&plan_cancel, &tally);
                    let res = std::thread::Builder::new()
                        .name(format!("dl-{}-{}", self.id, target.role))
                        .spawn_scoped(scope, move || {
                            self.fetch_target(target, slot, tally, plan_cancel)
                        });
                    if res.is_err() {
                        plan_cancel.cancel();
                    }
                    res
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join().unwrap_or(Err(DownloadError::WorkerLost)),
                    Err(err) => Err(DownloadError::Workspace {
                        context: "starting a fetch worker",
                        source: err,
                    }),
                })
                .collect()
        });

        self.check_cancel()?;

        let mut inputs = Vec::with_capacity(targets.len());
        let mut failure = None;
        for (target, res) in targets.iter().zip(results) {
            match res {
                Ok(fetched) => inputs.push(TranscodeInput {
                    path: fetched.path,
                    kind: target.location.kind,
                }),
                // Stopped because a sibling failed
                Err(DownloadError::Cancelled) => {}
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None if inputs.len() == targets.len() => Ok(inputs),
            None => Err(DownloadError::Cancelled),
        }
    }

    /// Worker body: fetch one stream, restarting it if it arrives corrupted
    fn fetch_target(
        &self,
        target: &FetchTarget<'_>,
        slot: usize,
        tally: &Mutex<FetchTally>,
        plan_cancel: &CancelToken,
    ) -> Result<FetchResult, DownloadError> {
        let mut on_progress = |bytes: u64, total: Option<u64>| {
            self.emit(DownloadEvent::StreamProgress {
                role: target.role,
                bytes,
                total,
            });
            let progress = tally.with_lock(|mut tally| tally.update(slot, bytes, total));
            self.emit(DownloadEvent::Progress(progress));
        };

        let mut attempt = 0;
        loop {
            let res = self.services.fetcher.fetch(
                target.location,
                &target.destination,
                &mut on_progress,
                plan_cancel,
            );

            match res {
                Err(err) if is_corrupt(&err) && attempt < self.services.download.corrupt_retries => {
                    attempt += 1;
                    warn!("The {} stream arrived corrupted ({err}), restarting it", target.role);
                }
                Err(err) => {
                    if !matches!(err, FetchError::Cancelled) {
                        error!("Fetching the {} stream failed: {err}", target.role);
                        plan_cancel.cancel();
                    }
                    return Err(err.into());
                }
                Ok(fetched) => return Ok(fetched),
            }
        }
    }

    fn expect_state(&self, expected: RunState, operation: &'static str) -> Result<(), DownloadError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DownloadError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    fn check_cancel(&self) -> Result<(), DownloadError> {
        if self.cancel.is_cancelled() {
            Err(DownloadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Move to `Failed` or `Cancelled` if the step failed
    fn settle<T>(&mut self, res: Result<T, DownloadError>) -> Result<T, DownloadError> {
        let err = match res {
            Ok(value) => return Ok(value),
            // Errors caused by a cancellation are not failures
            Err(_) if self.cancel.is_cancelled() => DownloadError::Cancelled,
            Err(err) => err,
        };

        if let DownloadError::Cancelled = err {
            info!("Request {} cancelled", self.id);
            self.transition(RunState::Cancelled);
        } else {
            error!("Request {} failed: {err}", self.id);
            self.transition(RunState::Failed);
        }
        Err(err)
    }

    fn transition(&mut self, state: RunState) {
        debug!("Request {}: {:?} -> {state:?}", self.id, self.state);
        self.state = state;
        self.emit(DownloadEvent::State(state));
    }

    fn emit(&self, event: DownloadEvent) {
        // Nobody listening is not an error
        let _ = self.events.send(event);
    }
}

struct FetchTarget<'a> {
    role: StreamRole,
    location: &'a StreamLocation,
    destination: PathBuf,
}

/// Aggregated progress of the streams of a plan
struct FetchTally {
    started: Instant,
    streams: Vec<(u64, Option<u64>)>,
}

impl FetchTally {
    fn new(count: usize) -> Self {
        Self {
            started: Instant::now(),
            streams: vec![(0, None); count],
        }
    }

    fn update(&mut self, slot: usize, bytes: u64, total: Option<u64>) -> DownloadProgress {
        self.streams[slot] = (bytes, total);

        let done: u64 = self.streams.iter().map(|(bytes, _)| bytes).sum();
        let total: Option<u64> = self.streams.iter().map(|(_, total)| *total).sum();
        let total = total.filter(|total| *total > 0);

        let fraction = total.map_or(0.0, |total| done as f64 / total as f64);
        let elapsed = self.started.elapsed().as_secs_f64();
        let eta = total.filter(|_| done > 0 && elapsed > 0.0).map(|total| {
            let rate = done as f64 / elapsed;
            total.saturating_sub(done) as f64 / rate
        });

        DownloadProgress::new(Phase::Fetching, fraction, eta)
    }
}

/// A stream whose size does not match its declared size
fn is_corrupt(err: &FetchError) -> bool {
    matches!(err, FetchError::Storage { source, .. } if source.kind() == io::ErrorKind::InvalidData)
}

/// Move the transcoded file to a free path of the output directory
fn place_output(
    output: &Path,
    out_dir: &Path,
    title: &str,
    format: OutputFormat,
) -> Result<PathBuf, DownloadError> {
    std::fs::create_dir_all(out_dir)
        .map_err(DownloadError::workspace("creating the output directory"))?;

    let reserved = reserve_output_path(out_dir, title, format)
        .map_err(DownloadError::workspace("reserving the output path"))?;
    move_file(output, reserved.path())
        .map_err(DownloadError::workspace("moving the output into place"))?;

    Ok(reserved.path().to_path_buf())
}
