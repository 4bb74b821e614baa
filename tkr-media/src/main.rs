//! Session media tool (tkr-media) - Main entry point
//!
//! Headless front end over the media engine: inspect how a session would be
//! played, report attachment storage, or run a playback against the virtual
//! clock backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tkr_common::config::{default_config_file, resolve_root_folder};
use tkr_common::events::MediaEvent;
use tkr_common::human_time::{format_bytes, format_position};
use tkr_common::Session;
use tkr_media::chapters::ChapterIndex;
use tkr_media::playback::VirtualBackend;
use tkr_media::repository::{JsonSessionRepository, SessionRepository};
use tkr_media::timeline::TimelineLayout;
use tkr_media::{FsAttachmentStore, MediaConfig, MediaService};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attachment directory under the root folder
const ATTACHMENTS_DIR: &str = "attachments";

/// Command-line arguments for tkr-media
#[derive(Parser, Debug)]
#[command(name = "tkr-media")]
#[command(about = "Session media engine for Taskerino")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ", built ", env!("BUILD_TIMESTAMP"), ")"))]
struct Args {
    /// Root folder holding sessions.json and attachments/
    #[arg(short, long, env = "TKR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "TKR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored sessions
    List,

    /// Show strategy, audio timeline and chapter grouping for a session
    Inspect { session_id: String },

    /// Report attachment storage usage
    Storage,

    /// Play a session on the virtual clock and print time updates
    Play {
        session_id: String,

        /// Wall-clock seconds to run
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Start position in seconds
        #[arg(long)]
        from: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_file);
    let config = match &config_path {
        Some(path) => MediaConfig::load(path).context("Failed to load configuration")?,
        None => MediaConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tkr_media={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "tkr-media {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), config_path.as_deref());
    info!("Root folder: {}", root_folder.display());

    let repository = JsonSessionRepository::in_root(&root_folder);
    let store = Arc::new(FsAttachmentStore::new(root_folder.join(ATTACHMENTS_DIR)));

    match args.command {
        Command::List => list(&repository).await,
        Command::Inspect { session_id } => inspect(&repository, &config, &session_id).await,
        Command::Storage => storage(&store).await,
        Command::Play {
            session_id,
            seconds,
            from,
        } => {
            let session = repository
                .load_session(&session_id)
                .await
                .with_context(|| format!("Failed to load session {}", session_id))?;
            let service = MediaService::new(store, Arc::new(VirtualBackend::new()), config);
            play(&service, &session, Duration::from_secs(seconds), from).await
        }
    }
}

async fn list(repository: &JsonSessionRepository) -> Result<()> {
    let summaries = repository
        .load_summaries()
        .await
        .context("Failed to read sessions")?;

    if summaries.is_empty() {
        println!("No sessions in {}", repository.path().display());
    }
    for s in summaries {
        println!(
            "{}  {:<10} {}  audio={} shots={} chapters={}{}",
            s.id,
            s.status.to_string(),
            s.start_time.format("%Y-%m-%d %H:%M"),
            s.audio_segment_count,
            s.screenshot_count,
            s.chapter_count,
            if s.has_video { " video" } else { "" }
        );
    }
    Ok(())
}

async fn inspect(repository: &JsonSessionRepository, config: &MediaConfig, session_id: &str) -> Result<()> {
    let session = repository
        .load_session(session_id)
        .await
        .with_context(|| format!("Failed to load session {}", session_id))?;

    let strategy = tkr_media::resolver::resolve(&session);
    println!("Session {} ({})", session.id, session.name);
    println!("Strategy: {}", strategy);

    let layout = TimelineLayout::anchored(
        session.start_time,
        &session.audio_segments,
        config.timeline.silence_tolerance(),
    );
    if !layout.is_empty() {
        let total = layout.total_duration();
        println!(
            "Audio timeline: {} segments, {} total, {} silence, {} overlaps",
            layout.len(),
            format_position(total, total),
            format_position(layout.silence_total(), total),
            layout.overlap_count()
        );
        for (i, entry) in layout.entries().iter().enumerate() {
            println!(
                "  [{:>3}] {:<24} at {} for {:.2}s{}{}",
                i,
                entry.segment.id,
                format_position(entry.offset, total),
                entry.duration(),
                if entry.silence_before > 0.0 {
                    format!(" (after {:.2}s silence)", entry.silence_before)
                } else {
                    String::new()
                },
                if entry.overlaps_previous { " (overlaps)" } else { "" }
            );
        }
    }

    let index = ChapterIndex::new(session.chapters.clone());
    if !index.is_empty() {
        println!("Chapters:");
        for chapter in index.chapters() {
            println!(
                "  {:<12} [{:.1}, {:.1}) {}",
                chapter.id, chapter.start_time, chapter.end_time, chapter.title
            );
        }
        let groups = index.group(&session.screenshots, session.start_time);
        println!("Screenshots by chapter:");
        for (key, items) in groups {
            println!("  {:<12} {}", key.to_string(), items.len());
        }
    }
    Ok(())
}

async fn storage(store: &FsAttachmentStore) -> Result<()> {
    let total = store.total_size().await.context("Failed to measure storage")?;
    let counts = store.count_by_type().await.context("Failed to count attachments")?;

    println!("Attachments in {}", store.dir().display());
    println!("  total size: {}", format_bytes(total));
    println!(
        "  {} files: {} images, {} audio, {} video, {} other",
        counts.total, counts.images, counts.audio, counts.video, counts.other
    );
    Ok(())
}

async fn play(service: &MediaService, session: &Session, run_for: Duration, from: Option<f64>) -> Result<()> {
    let strategy = service.resolve_media_strategy(session);
    let handle = service
        .open_playback(session, strategy)
        .await
        .context("Failed to open playback")?;

    let mut events = handle.subscribe();
    let state = handle.state().await;
    if let Some(reason) = &state.error {
        handle.dispose().await;
        anyhow::bail!("Playback failed to load: {}", reason);
    }

    if let Some(position) = from {
        handle.seek(position).await?;
    }
    handle.play().await?;

    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(MediaEvent::TimeUpdate { current_time, duration, drift, .. }) => {
                    let chapter = handle
                        .chapter_at(current_time)
                        .map(|c| c.title)
                        .unwrap_or_default();
                    match drift {
                        Some(d) => println!(
                            "{} / {}  drift {:+.3}s  {}",
                            format_position(current_time, duration),
                            format_position(duration, duration),
                            d,
                            chapter
                        ),
                        None => println!(
                            "{} / {}  {}",
                            format_position(current_time, duration),
                            format_position(duration, duration),
                            chapter
                        ),
                    }
                }
                Ok(MediaEvent::PlaybackEnded { position, .. }) => {
                    println!("Ended at {:.2}s", position);
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Dropped {} media events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    handle.dispose().await;
    let totals = service.resource_totals();
    info!(
        "Released {}/{} media resources; cache {:?}",
        totals.released,
        totals.acquired,
        service.cache_stats()
    );
    Ok(())
}
