use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shiori_core::config::AppConfig;
use shiori_core::models::{PositionUpdate, ProgressParams, ProgressRecord};
use shiori_runtime::{AppContext, StorageLocation};

#[derive(Parser)]
#[command(name = "shiori")]
#[command(about = "Keep track of where you stopped reading", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite file holding the reading history
    #[arg(long, global = true, conflicts_with = "memory")]
    db: Option<PathBuf>,

    /// Keep the history in memory only
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the history, most recently read first
    List {
        /// Print the full state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record progress for a series
    Add(AddArgs),
    /// Move a series already in the history to a new position
    Update(PositionArgs),
    /// Drop one series from the history
    Remove { manga_id: String },
    /// Forget the whole history
    Clear,
    /// Check every series against the catalogue and prune the missing ones
    Refresh,
    /// Print where the config file is read from
    ConfigPath,
}

#[derive(Args)]
struct PositionArgs {
    #[arg(long = "id")]
    manga_id: String,
    #[arg(long)]
    chapter: u32,
    #[arg(long)]
    page: u32,
    /// Pages in the current chapter (kept as stored when omitted on update)
    #[arg(long)]
    pages: Option<u32>,
    /// Chapters in the series (kept as stored when omitted on update)
    #[arg(long)]
    chapters: Option<u32>,
    #[arg(long)]
    chapter_id: Option<String>,
    #[arg(long)]
    chapter_title: Option<String>,
}

#[derive(Args)]
struct AddArgs {
    #[command(flatten)]
    position: PositionArgs,
    #[arg(long)]
    title: String,
    #[arg(long)]
    slug: String,
    #[arg(long, default_value = "")]
    cover: String,
}

impl From<AddArgs> for ProgressParams {
    fn from(args: AddArgs) -> Self {
        let p = args.position;
        Self {
            manga_id: p.manga_id,
            manga_title: args.title,
            manga_slug: args.slug,
            cover_image: args.cover,
            current_chapter_number: p.chapter,
            current_chapter_title: p.chapter_title,
            current_chapter_id: p.chapter_id,
            current_page: p.page,
            total_pages_in_chapter: p.pages.unwrap_or(0),
            total_chapters: p.chapters.unwrap_or(0),
        }
    }
}

impl From<PositionArgs> for PositionUpdate {
    fn from(p: PositionArgs) -> Self {
        Self {
            manga_id: p.manga_id,
            current_chapter_number: p.chapter,
            current_page: p.page,
            total_pages_in_chapter: p.pages,
            total_chapters: p.chapters,
            current_chapter_title: p.chapter_title,
            current_chapter_id: p.chapter_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::ConfigPath = cli.command {
        println!("{}", AppConfig::config_path().display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => {
            let config = AppConfig::load_from(path)?;
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let location = match (cli.db, cli.memory) {
        (_, true) => StorageLocation::Memory,
        (Some(path), false) => StorageLocation::Path(path),
        (None, false) => StorageLocation::Default,
    };

    tracing::debug!(?location, "opening reading history");
    let ctx = AppContext::open(config, location)?;
    let result = run(&ctx, cli.command).await;
    ctx.shutdown().await;
    result
}

async fn run(ctx: &AppContext, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let history = ctx.continue_reading().await;
    if let Some(error) = history.snapshot().error {
        return Err(error.into());
    }

    match command {
        Command::List { json } => {
            let state = history.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.items.is_empty() {
                println!("Nothing in progress.");
            } else {
                for record in &state.items {
                    println!("{}", format_record(record));
                }
            }
        }
        Command::Add(args) => {
            let record = history.add_progress(args.into()).await?;
            println!("{}", format_record(&record));
        }
        Command::Update(args) => {
            let record = history.update_progress(args.into()).await?;
            println!("{}", format_record(&record));
        }
        Command::Remove { manga_id } => {
            if history.remove_item(&manga_id).await? {
                println!("Removed {manga_id}.");
            } else {
                println!("{manga_id} was not in the history.");
            }
        }
        Command::Clear => {
            history.clear_all().await?;
            println!("Reading history cleared.");
        }
        Command::Refresh => {
            let report = history.refresh_data().await?;
            for manga_id in &report.pruned {
                println!("Pruned {manga_id}.");
            }
            for record in &history.snapshot().items {
                println!("{}", format_record(record));
            }
        }
        Command::ConfigPath => {}
    }
    Ok(())
}

fn format_record(r: &ProgressRecord) -> String {
    let title = if r.manga_title.is_empty() {
        r.manga_id.as_str()
    } else {
        r.manga_title.as_str()
    };
    let chapters = match r.total_chapters {
        0 => String::new(),
        n => format!("/{n}"),
    };
    format!(
        "{title}  ch. {}{chapters}  p. {}/{}  {}%  {}  {}",
        r.current_chapter_number,
        r.current_page,
        r.total_pages_in_chapter,
        r.progress_percentage,
        r.last_read_at.format("%Y-%m-%d %H:%M"),
        r.resume_path(),
    )
}
