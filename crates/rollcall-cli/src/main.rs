use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{parse_frame, Analyzer, FrameOutcome, ParsedFrame, Roster, StableResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{spawn_engine, EngineHandle};

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance from per-frame face detections")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stabilize identities across a stream of frames
    Consensus {
        /// Enrollment roster (JSON)
        #[arg(short, long)]
        roster: PathBuf,
        /// One JSON array of detections per line; "-" reads stdin
        #[arg(short, long)]
        frames: PathBuf,
        /// Frames to accumulate before finalizing
        #[arg(long)]
        budget: Option<usize>,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Label every face in a single image
    Annotate {
        /// Enrollment roster (JSON)
        #[arg(short, long)]
        roster: PathBuf,
        /// JSON array of detections
        #[arg(short, long)]
        detections: PathBuf,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// List enrolled identities
    Roster {
        #[arg(short, long)]
        roster: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct MatchArgs {
    /// Similarity threshold, in (0, 1]
    #[arg(long)]
    threshold: Option<f32>,
    /// Relax the threshold for masked faces
    #[arg(long)]
    mask_mode: bool,
    /// Skip detector-side score/size filtering and deduplication
    #[arg(long)]
    no_filter: bool,
}

impl MatchArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(threshold) = self.threshold {
            config.matching.similarity_threshold = threshold;
        }
        if self.mask_mode {
            config.matching.mask_mode = true;
        }
        if self.no_filter {
            config.filter_enabled = false;
        }
    }
}

#[derive(Serialize)]
struct ConsensusReport {
    generated_at: DateTime<Utc>,
    frames: usize,
    skipped: usize,
    results: Vec<StableResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Consensus {
            roster,
            frames,
            budget,
            matching,
        } => {
            matching.apply(&mut config);
            if let Some(budget) = budget {
                config.consensus.frame_budget = budget;
            }
            let engine = start_engine(&config, &roster).await?;
            if let Some(report) = run_consensus(&engine, &frames).await? {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Annotate {
            roster,
            detections,
            matching,
        } => {
            matching.apply(&mut config);
            let engine = start_engine(&config, &roster).await?;
            let text = tokio::fs::read_to_string(&detections)
                .await
                .with_context(|| format!("reading {}", detections.display()))?;
            let frame = parse_frame(&text).context("parsing detections")?;
            if frame.rejected > 0 {
                tracing::warn!(rejected = frame.rejected, "ignored malformed detections");
            }
            let annotations = engine.annotate(frame.detections).await?;
            println!("{}", serde_json::to_string_pretty(&annotations)?);
        }
        Commands::Roster { roster } => {
            let roster = load_roster(&roster)?;
            if roster.is_empty() {
                println!("No students enrolled");
            }
            for entry in roster.summary() {
                println!("{}\t{} descriptor(s)", entry.label, entry.descriptors);
            }
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn load_roster(path: &Path) -> Result<Roster> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening roster {}", path.display()))?;
    let roster = Roster::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("loading roster {}", path.display()))?;
    tracing::info!(students = roster.len(), "roster loaded");
    Ok(roster)
}

/// Validate configuration, spawn the engine and load the roster into it.
async fn start_engine(config: &Config, roster_path: &Path) -> Result<EngineHandle> {
    config.validate().context("invalid configuration")?;
    let roster = load_roster(roster_path)?;

    let analyzer = Analyzer::new(
        Vec::new(),
        config.matching,
        config.consensus,
        config.active_filter(),
    )?;
    let engine = spawn_engine(analyzer)?;
    engine
        .rebuild(roster.into_identities(), config.matching)
        .await?;
    Ok(engine)
}

async fn open_frames(path: &Path) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening frames {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Run a session over the frames at `frames_path`.
///
/// Returns `None` if interrupted; the partial session is discarded.
async fn run_consensus(
    engine: &EngineHandle,
    frames_path: &Path,
) -> Result<Option<ConsensusReport>> {
    let reader = open_frames(frames_path).await?;

    tokio::select! {
        report = feed_frames(engine, reader) => report.map(Some),
        _ = tokio::signal::ctrl_c() => {
            engine.abort().await?;
            tracing::warn!("interrupted; session discarded");
            Ok(None)
        }
    }
}

/// Feed one frame per line until the budget is exhausted or the stream ends.
///
/// Blank lines are ignored. A line that is not a JSON array still counts as
/// an elapsed frame, with no detections.
async fn feed_frames<R>(engine: &EngineHandle, reader: R) -> Result<ConsensusReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    engine.start().await?;

    let mut frames = 0usize;
    let mut skipped = 0usize;

    let results = loop {
        let Some(line) = lines.next_line().await? else {
            tracing::info!(frames, "frame stream ended before budget");
            break engine.finish().await?;
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = parse_frame(&line).unwrap_or_else(|e| {
            tracing::warn!(frame = frames, error = %e, "unparseable frame; treating as empty");
            ParsedFrame::default()
        });

        let outcome = engine.push_frame(frame.detections).await?;
        frames += 1;
        skipped += frame.rejected + outcome.report().skipped;
        if let FrameOutcome::Finalized { results, .. } = outcome {
            break results;
        }
    };

    Ok(ConsensusReport {
        generated_at: Utc::now(),
        frames,
        skipped,
        results,
    })
}
