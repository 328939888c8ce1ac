use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tidesense_voice::voice::{ArtifactLocation, SpeakerOutput};
use tidesense_voice::{Config, GuidanceText, PlaybackState, Resolution, VoiceService};

/// TideSense voice guidance - speak beach safety messages
#[derive(Parser)]
#[command(name = "tidesense-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak guidance text, waiting until playback ends
    Speak {
        /// Summary or full text to speak
        text: String,
        /// Recommendation appended as its own sentence (repeatable)
        #[arg(short, long = "recommendation")]
        recommendations: Vec<String>,
    },
    /// Resolve guidance text to audio without playing it
    Resolve {
        /// Text to resolve
        text: String,
    },
    /// Show synthesis, fallback and cache status as JSON
    Health,
    /// Evict cached audio over the size cap
    Prune,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,tidesense_voice=info",
        1 => "info,tidesense_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let service = VoiceService::new(config)?;

    match cli.command {
        Command::Speak {
            text,
            recommendations,
        } => speak(&service, &text, &recommendations).await,
        Command::Resolve { text } => resolve(&service, &text).await,
        Command::Health => {
            let health = service.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
        Command::Prune => {
            let report = service.prune().await?;
            println!(
                "Removed {} artifact(s), freed {} bytes",
                report.removed, report.freed_bytes
            );
            Ok(())
        }
    }
}

/// Play guidance through the speakers and log progress
async fn speak(
    service: &VoiceService,
    text: &str,
    recommendations: &[String],
) -> anyhow::Result<()> {
    let guidance = GuidanceText::from_summary(text, recommendations)?;
    let controller = service.controller(Arc::new(SpeakerOutput));
    let mut updates = controller.subscribe();

    let snapshot = controller.request(guidance.as_str()).await?;
    if snapshot.state == PlaybackState::Failed {
        anyhow::bail!(
            "playback failed: {}",
            snapshot.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                match snapshot.state {
                    PlaybackState::Playing => tracing::debug!(
                        position_ms = snapshot.position_ms,
                        duration_ms = snapshot.duration_ms,
                        "playing"
                    ),
                    PlaybackState::Completed => {
                        println!("Done ({} ms)", snapshot.duration_ms);
                        break;
                    }
                    PlaybackState::Failed => anyhow::bail!(
                        "playback failed: {}",
                        snapshot.error.unwrap_or_default()
                    ),
                    PlaybackState::Idle => break,
                    PlaybackState::Loading | PlaybackState::Paused => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.stop().await;
                println!("Stopped");
                break;
            }
        }
    }

    Ok(())
}

/// Print which path a resolution took and where the audio lives
async fn resolve(service: &VoiceService, text: &str) -> anyhow::Result<()> {
    let resolution = service.orchestrator().resolve(text).await;
    let path = resolution.path();

    match resolution {
        Resolution::Cached(artifact) | Resolution::Synthesized { artifact, .. } => {
            let location = match &artifact.location {
                ArtifactLocation::File(file) => file.display().to_string(),
                ArtifactLocation::Memory(_) => "(memory, not cached)".to_string(),
            };
            println!("{path:?}: {} ({} bytes) {location}", artifact.key, artifact.size_bytes);
        }
        Resolution::Fallback { handle, cause } => {
            println!(
                "{path:?}: local speech via {} (~{} ms); remote: {cause}",
                handle.program.display(),
                handle.estimated_duration_ms
            );
        }
        Resolution::Failed(e) => anyhow::bail!("no playable audio: {e}"),
    }

    Ok(())
}
