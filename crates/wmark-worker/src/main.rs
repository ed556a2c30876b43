//! Watermark worker binary.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};
use wmark_media::{check_ffmpeg, MetadataProbe};
use wmark_worker::{
    AdmissionGate, DirectoryHost, InMemoryPreferences, JobOutcome, LocalTransport, SourceRef,
    Submission, WatermarkService, WorkerConfig,
};

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("wmark_worker={level}").parse()?)
        .add_directive(format!("wmark_media={level}").parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = WorkerConfig::from_env();
    if let Some(dir) = cli.download_dir {
        config = config.with_download_dir(dir);
    }

    match cli.command {
        Commands::Run {
            video,
            requester,
            watermark,
            position,
            size,
            outbox,
            large_file_dir,
        } => {
            info!("Starting wmark-worker");
            info!("Worker config: {:?}", config);

            let large_host_enabled = config.allow_large_file_host;
            let transport = Arc::new(LocalTransport::new(outbox));
            let mut service =
                WatermarkService::new(config, transport, Arc::new(InMemoryPreferences::new()));
            match (large_host_enabled, large_file_dir) {
                (true, Some(dir)) => {
                    service = service.with_large_host(Arc::new(DirectoryHost::new(dir)));
                }
                (true, None) => warn!("Large-file host enabled but no --large-file-dir given"),
                _ => {}
            }
            let service = Arc::new(service);

            if let Some(image) = watermark {
                service
                    .set_watermark(requester, SourceRef::new(image.display().to_string()))
                    .await
                    .context("failed to store watermark")?;
            }
            if let Some(position) = position {
                service.set_position(requester, position).await?;
            }
            if let Some(size) = size {
                service.set_size(requester, size).await?;
            }

            let canceller = {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received shutdown signal");
                        service.cancel(requester).await;
                    }
                })
            };

            let submission = service
                .submit_video(requester, SourceRef::new(video.display().to_string()))
                .await;
            canceller.abort();

            match submission? {
                Submission::Rejected(error) => bail!("request rejected: {error}"),
                Submission::Completed(report) => match report.outcome {
                    JobOutcome::Done { receipt, .. } => {
                        info!(location = %receipt.location, bytes = receipt.bytes, "Job finished");
                    }
                    JobOutcome::Failed { stage, error } => {
                        bail!("job failed during {stage}: {error}")
                    }
                },
            }
        }
        Commands::Probe { file, json } => {
            let info = MetadataProbe::new(&config.ffprobe_path)
                .probe_video(&file, None)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                let asset = info.into_asset(&file);
                println!("File:       {}", file.display());
                println!("Duration:   {}s", asset.duration_secs);
                println!("Dimensions: {}x{}", asset.width, asset.height);
            }
        }
        Commands::Status { requester } => {
            let gate = AdmissionGate::new(config.working_dir(), config.admission_scope);
            match gate.current(requester).await {
                Some(marker) => println!("{}", serde_json::to_string_pretty(&marker)?),
                None => println!("idle"),
            }
        }
        Commands::CheckTools => {
            let ffmpeg = check_ffmpeg(&config.ffmpeg_path)?;
            println!("ffmpeg:  {}", ffmpeg.display());
            let ffprobe = which::which(&config.ffprobe_path)
                .with_context(|| format!("{} not found", config.ffprobe_path.display()))?;
            println!("ffprobe: {}", ffprobe.display());
        }
    }

    Ok(())
}
