//! Command-line surface.
//!
//! Commands:
//! - `capture` (default): run one capture batch
//! - `init-db`: create or migrate the metadata store
//! - `charts`: list stored captures as JSON
//! - `tags` / `tag add|remove`: inspect and edit tags
//! - `calendar`: show the trading-calendar decision for a date

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};

use crate::{
    browser::ChromeSessionManager,
    calendar::{NyseCalendar, TradingCalendarGate},
    config::CaptureConfig,
    db::{Database, ItemQuery, TagMatch},
    error::PipelineError,
    pipeline::{run_capture, RunStatus},
};

#[derive(Parser)]
#[command(name = "chartgrab", version, about = "Capture and catalogue chart snapshots")]
pub struct Cli {
    /// Data directory holding `charts.db` and `images/`. Overrides CHARTGRAB_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture every chart in the target list.
    Capture(CaptureArgs),
    /// Create the metadata store or bring it up to date.
    InitDb,
    /// List stored captures as JSON.
    Charts {
        #[arg(long)]
        ticker: Option<String>,

        #[arg(long)]
        period: Option<String>,

        /// Earliest capture date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest capture date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Only items carrying this tag. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Require every --tag instead of any.
        #[arg(long, default_value_t = false)]
        all_tags: bool,

        /// Keep only the newest capture per ticker and period.
        #[arg(long, default_value_t = false)]
        latest: bool,
    },
    /// Tag names with usage counts, as JSON.
    Tags,
    /// Add or remove a tag on a stored item.
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// Whether the market is open on a date.
    Calendar {
        /// Date to check (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Args, Default)]
struct CaptureArgs {
    /// Newline-delimited list of chart URLs. Defaults to urls.txt.
    #[arg(long)]
    urls: Option<PathBuf>,

    /// Run even when the market is closed.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Capture date (YYYY-MM-DD) used for the market check and item keys. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum TagAction {
    Add { item_id: i64, name: String },
    Remove { item_id: i64, name: String },
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn open_store(config: &CaptureConfig) -> Result<Database> {
    let path = config.db_path();
    Database::new(path.clone())
        .with_context(|| format!("failed to open metadata store at {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = CaptureConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command.unwrap_or_else(|| Commands::Capture(CaptureArgs::default())) {
        Commands::Capture(args) => capture(config, args).await,
        Commands::InitDb => {
            let db = open_store(&config)?;
            println!("Metadata store ready at {}", db.path().display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Charts {
            ticker,
            period,
            from,
            to,
            tags,
            all_tags,
            latest,
        } => {
            let db = open_store(&config)?;
            let query = ItemQuery {
                ticker,
                period,
                date_from: from,
                date_to: to,
                tags,
                tag_match: if all_tags { TagMatch::All } else { TagMatch::Any },
                latest_per_ticker: latest,
            };
            print_json(&db.query_items(query).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tags => {
            let db = open_store(&config)?;
            print_json(&db.tag_counts().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tag { action } => {
            let db = open_store(&config)?;
            match action {
                TagAction::Add { item_id, name } => {
                    if db.add_tag(item_id, &name).await? {
                        println!("Tagged item {item_id} with '{name}'");
                    } else {
                        println!("Item {item_id} already tagged '{name}'");
                    }
                }
                TagAction::Remove { item_id, name } => {
                    if db.remove_tag(item_id, &name).await? {
                        println!("Removed '{name}' from item {item_id}");
                    } else {
                        println!("Item {item_id} was not tagged '{name}'");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Calendar { date } => {
            let date = date.unwrap_or_else(today);
            let admission = TradingCalendarGate::<NyseCalendar>::default().should_run(date);
            print_json(&admission)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn capture(mut config: CaptureConfig, args: CaptureArgs) -> Result<ExitCode> {
    if let Some(urls) = args.urls {
        config.targets_file = urls;
    }
    config.force = args.force;
    let today = args.date.unwrap_or_else(today);

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(err) => return Ok(fatal(PipelineError::Store(err))),
    };
    let manager = ChromeSessionManager::new(
        config.browser.clone(),
        config.selectors.clone(),
        config.timings.clone(),
    );
    let gate = TradingCalendarGate::<NyseCalendar>::default();

    match run_capture(&manager, &store, &config, &gate, today).await {
        Ok(RunStatus::MarketClosed { reason }) => {
            println!("Market closed on {today}: {reason}. Use --force to capture anyway.");
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunStatus::Completed(summary)) => {
            println!("{summary}");
            for failure in &summary.failures {
                println!("  {failure}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(fatal(err)),
    }
}

fn fatal(err: PipelineError) -> ExitCode {
    log::error!("{:#}", anyhow::Error::from(err));
    ExitCode::FAILURE
}
