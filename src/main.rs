use std::path::PathBuf;
use clap::{Parser, Subcommand};
use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidqa::{AppConfig, CappedLog, HistoryItem, HistoryPatch, VideoInfo};

#[derive(Parser)]
#[command(name = "vidqa")]
#[command(about = "Video Q&A question history", long_about = None)]
struct Cli {
    /// History database (overrides VIDQA_HISTORY_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the question history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List the most recent questions
    List {
        /// Number of items to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print items as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Record a question
    Save {
        #[arg(long)]
        video_id: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        question: String,

        #[arg(long)]
        caption: Option<String>,

        #[arg(long)]
        thumbnail: Option<String>,

        /// Milliseconds since the epoch (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Attach an answer link to the most recent unanswered question
    Answer {
        #[arg(long)]
        url: String,

        /// Only consider questions about this video
        #[arg(long)]
        video_id: Option<String>,
    },

    /// Remove one item by timestamp
    Remove {
        timestamp: i64,
    },

    /// Remove every item
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vidqa=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(db) = cli.db {
        config.history_db = db;
    }

    match cli.command {
        Commands::History { action } => {
            let log = CappedLog::open(&config.history_db, config.max_history_items)?;
            run_history(&log, action).await?;
        }
    }

    Ok(())
}

async fn run_history(log: &CappedLog, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit, json } => {
            let items = log.get_items(limit).await?;
            if items.is_empty() && !json {
                println!("No questions recorded yet.");
            }
            for item in &items {
                if json {
                    println!("{}", serde_json::to_string(item)?);
                } else {
                    print_item(item);
                }
            }
        }

        HistoryAction::Save { video_id, title, question, caption, thumbnail, timestamp } => {
            let mut video = VideoInfo::new(video_id, title);
            if let Some(caption) = caption {
                video = video.with_caption(caption);
            }
            if let Some(thumbnail) = thumbnail {
                video = video.with_thumbnail(thumbnail);
            }

            let item = match timestamp {
                Some(ts) => HistoryItem::new(video, question, ts),
                None => HistoryItem::now(video, question),
            };
            let ts = item.timestamp;
            let evicted = log.save_item(item).await?;

            println!("Saved question {}", ts);
            if !evicted.is_empty() {
                println!("Evicted {} older item(s) over the {} item limit", evicted.len(), log.max_items());
            }
        }

        HistoryAction::Answer { url, video_id } => {
            let item = log
                .update_last_item(
                    move |item| {
                        !item.is_answered()
                            && video_id.as_deref().map_or(true, |id| item.video_info.id == id)
                    },
                    HistoryPatch::answer_url(url),
                )
                .await;

            match item {
                Ok(item) => {
                    println!("Answer attached to:");
                    print_item(&item);
                }
                Err(e) if e.is_not_found() => bail!("No unanswered question to attach the answer to"),
                Err(e) => return Err(e.into()),
            }
        }

        HistoryAction::Remove { timestamp } => {
            if log.remove_item(timestamp).await? {
                println!("Removed {}", timestamp);
            } else {
                bail!("No history item with timestamp {}", timestamp);
            }
        }

        HistoryAction::Clear => {
            let removed = log.clear_history().await?;
            println!("Cleared {} item(s)", removed);
        }
    }

    Ok(())
}

fn print_item(item: &HistoryItem) {
    let when = item
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".to_string());

    println!("  [{}] {} ({})", item.timestamp, item.question, when);
    println!("      Video: {} ({})", item.video_info.title, item.video_info.id);
    if let Some(url) = &item.answer_url {
        println!("      Answer: {}", url);
    }
}
