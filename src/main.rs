mod cli;
mod logging;

use clap::Parser;
use miette::{bail, IntoDiagnostic, Result, WrapErr};
use tracing::{debug, info};

use mediagrab::{
    orchestrator::{DownloadEvent, DownloadOutcome, DownloadRequest},
    settings::Settings,
    types::{duration::format_clock, RunState},
    wire, Downloader,
};

use crate::{
    cli::{Args, Command},
    logging::init_logging,
};

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.level())?;

    let settings = Settings::load(args.config.clone())
        .into_diagnostic()
        .wrap_err("Could not load the settings")?;
    debug!("{settings:?}");

    let downloader = Downloader::new(&settings)?;

    match args.command {
        Command::CheckFfmpeg => {
            let installed = downloader.check_ffmpeg();
            println!("{}", serde_json::json!({ "installed": installed }));
            if !installed {
                bail!(
                    "'{}' could not be executed",
                    settings.encoder.program.display()
                );
            }
        }
        Command::Info { url, wire: version } => {
            let info = downloader.get_info(&url)?;
            info!(
                "'{}' by '{}' ({}), {} stream(s)",
                info.title,
                info.author,
                format_clock(info.duration),
                info.quality_options.len()
            );
            let json = wire::encode(&info, version)
                .into_diagnostic()
                .wrap_err("Could not serialize the video metadata")?;
            println!("{json}");
        }
        Command::Download {
            url,
            quality,
            format,
            out,
        } => {
            if !downloader.check_ffmpeg() {
                bail!(
                    help = "Install ffmpeg or set `encoder.program` in the configuration",
                    "'{}' could not be executed",
                    settings.encoder.program.display()
                );
            }

            let handle = downloader.start_download(DownloadRequest {
                url,
                selected_quality: quality,
                output_format: format,
                output_dir: out,
            })?;

            let mut last_percent = None;
            let outcome = handle.wait_with(|event| match event {
                DownloadEvent::State(RunState::AwaitingSelection) => {}
                DownloadEvent::State(state) => info!("{state:?}"),
                DownloadEvent::Progress(progress) => {
                    // Log once per percent and phase
                    let percent = (progress.fraction_complete * 100.0) as u8;
                    if last_percent != Some((progress.phase, percent)) {
                        last_percent = Some((progress.phase, percent));
                        match progress.eta_seconds {
                            Some(eta) => debug!("{} {percent}% ({eta:.0}s left)", progress.phase),
                            None => debug!("{} {percent}%", progress.phase),
                        }
                    }
                }
                _ => {}
            });

            match outcome {
                DownloadOutcome::Complete { output } => println!("{}", output.display()),
                DownloadOutcome::Failed(err) => return Err(err.into()),
                DownloadOutcome::Cancelled => bail!("Download cancelled"),
            }
        }
    }

    Ok(())
}
