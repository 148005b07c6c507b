//! CLI command implementations

use std::path::PathBuf;

use bytes::Bytes;
use clap::Subcommand;
use saverforge_core::engine::{EngineEvents, FfmpegWorker};
use saverforge_core::{
    BuildEvent, BuildMode, BuildRequest, EngineError, Result, SaverBuilder, SaverConfig,
    SaverError, TemplateLoader, spawn_engine,
};
use tokio::fs;
use tokio::sync::mpsc;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build a screen-saver bundle from a video file
    Build {
        /// Path to the source video
        video: PathBuf,
        /// Screen-saver display name
        #[arg(short, long, default_value = "")]
        name: String,
        /// Bundle identifier (generated when omitted)
        #[arg(long, default_value = "")]
        bundle_id: String,
        /// Transcode decision mode: auto, force, or passthrough
        #[arg(short, long, default_value = "auto")]
        mode: BuildMode,
        /// Template bundle ZIP: a local path or an http(s) URL
        #[arg(short, long, default_value = "templates/VideoSaverTemplate.saver.zip")]
        template: String,
        /// Directory for the output archives
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Probe a video's codec compatibility without building
    Probe {
        /// Path to the source video
        video: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            video,
            name,
            bundle_id,
            mode,
            template,
            output,
        } => build_saver(video, name, bundle_id, mode, template, output).await,
        Commands::Probe { video } => probe_video(video).await,
    }
}

/// Build the bundle and installer archives for a video
///
/// # Errors
/// - `SaverError::Engine` - FFmpeg missing, crashed, or the job failed
/// - `SaverError::Template` - template could not be loaded
/// - `SaverError::Bundle` - template tree is not a usable bundle
/// - `SaverError::Io` - reading the video or writing the archives failed
pub async fn build_saver(
    video: PathBuf,
    name: String,
    bundle_id: String,
    mode: BuildMode,
    template: String,
    output: PathBuf,
) -> Result<()> {
    let config = SaverConfig::default();
    let worker = FfmpegWorker::new(config.engine.clone(), config.encode.clone());
    if !worker.is_available() {
        return Err(SaverError::Engine(EngineError::Job {
            message: format!("FFmpeg not found at '{}'", config.engine.ffmpeg_path.display()),
        }));
    }

    let (bridge, engine_events) = spawn_engine(worker);
    let (event_sender, mut event_receiver) = mpsc::unbounded_channel();
    let builder = SaverBuilder::new(config, TemplateLoader::new(&template), event_sender);

    pump_engine_events(engine_events, builder.progress().clone());
    let printer = tokio::spawn(async move {
        while let Some(event) = event_receiver.recv().await {
            match event {
                BuildEvent::Status(message) => println!("{message}"),
                BuildEvent::Log(message) => println!("  {message}"),
                BuildEvent::Progress(ratio) => tracing::debug!("progress {ratio:.2}"),
            }
        }
    });

    let source = Bytes::from(fs::read(&video).await?);
    let request = BuildRequest {
        source,
        saver_name: name,
        bundle_id,
        mode,
    };
    let result = builder.build(&bridge, request).await;

    // Closing the bridge unwinds the worker and event pumps so the printer
    // drains before we report.
    drop(builder);
    drop(bridge);
    let _ = printer.await;
    let artifacts = result?;

    fs::create_dir_all(&output).await?;
    let bundle_path = output.join(&artifacts.bundle_filename);
    let installer_path = output.join(&artifacts.installer_filename);
    fs::write(&bundle_path, &artifacts.bundle_zip).await?;
    fs::write(&installer_path, &artifacts.installer_zip).await?;

    println!("Bundle:    {}", bundle_path.display());
    println!("Installer: {}", installer_path.display());
    Ok(())
}

/// Probe a video and print its compatibility report
///
/// # Errors
/// - `SaverError::Engine` - FFmpeg missing, crashed, or the probe failed
/// - `SaverError::Io` - reading the video failed
pub async fn probe_video(video: PathBuf) -> Result<()> {
    let config = SaverConfig::default();
    let worker = FfmpegWorker::new(config.engine.clone(), config.encode.clone());
    if !worker.is_available() {
        return Err(SaverError::Engine(EngineError::Job {
            message: format!("FFmpeg not found at '{}'", config.engine.ffmpeg_path.display()),
        }));
    }

    let (bridge, engine_events) = spawn_engine(worker);
    drain_engine_events(engine_events);

    let buffer = Bytes::from(fs::read(&video).await?);
    let file_name = video
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "probe".to_string());
    let report = bridge.probe(buffer, file_name).await?;

    println!("format:     {}", report.format.as_deref().unwrap_or("unknown"));
    println!("container:  {}", report.container.as_deref().unwrap_or("unknown"));
    println!("video:      {}", report.video_codec.as_deref().unwrap_or("unknown"));
    println!("audio:      {}", report.audio_codec.as_deref().unwrap_or("none"));
    println!("copy-safe:  {}", report.copy_safe);
    println!("compatible: {}", report.is_compatible);
    Ok(())
}

/// Feed worker progress ratios into the build progress tracker and forward
/// FFmpeg log lines to tracing.
fn pump_engine_events(events: EngineEvents, progress: saverforge_core::progress::ProgressTracker) {
    let EngineEvents {
        progress: mut ratios,
        logs: mut lines,
    } = events;
    tokio::spawn(async move {
        while let Some(ratio) = ratios.recv().await {
            progress.update_from_worker(ratio);
        }
    });
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            tracing::debug!("ffmpeg: {line}");
        }
    });
}

/// Keep engine event channels drained when nothing consumes them.
fn drain_engine_events(events: EngineEvents) {
    let EngineEvents {
        progress: mut ratios,
        logs: mut lines,
    } = events;
    tokio::spawn(async move { while ratios.recv().await.is_some() {} });
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            tracing::debug!("ffmpeg: {line}");
        }
    });
}
