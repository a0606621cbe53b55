//! taskboard: command-line host for a workspace task board.
//!
//! Every invocation opens the board the way a browser tab does on load, so
//! several terminals (and `taskboard watch`) share one board through the
//! data directory.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use taskboard_cli::render;
use taskboard_cli::session::{Session, SessionOptions};
use taskboard_cli::simulated::SimulatedRemote;
use taskboard_cli::watcher::FileWatcher;
use taskboard_core::bus::{BroadcastHub, StorageEventBus};
use taskboard_core::export;
use taskboard_core::import::today_label;
use taskboard_core::remote;
use taskboard_core::storage::MemoryStorage;
use taskboard_core::{BoardConfig, Reconciler, Severity, StartupSource, Store, TaskFilter};

#[derive(Parser, Debug)]
#[command(name = "taskboard")]
#[command(about = "Workspace task board with shared-link and multi-process sync")]
struct Args {
    /// Directory holding board records
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Workspace id (overrides the one in --url)
    #[arg(short, long)]
    workspace: Option<String>,

    /// Board URL, as copied from a browser
    #[arg(long)]
    url: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name recorded on status changes
    #[arg(long)]
    actor: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the board with tasks from a CSV file
    Import { file: PathBuf },

    /// List tasks
    List {
        /// Case-insensitive text to look for
        #[arg(short, long, default_value = "")]
        search: String,

        /// Only tasks of this performer
        #[arg(short, long)]
        performer: Option<String>,
    },

    /// Show completion statistics
    Stats,

    /// Mark a task completed
    Complete {
        /// Task id or unique prefix
        id: String,
        #[arg(short, long, default_value = "")]
        observations: String,
    },

    /// Mark a task rescheduled
    Reschedule {
        id: String,
        #[arg(short, long, default_value = "")]
        observations: String,
    },

    /// Put a task back to pending
    Reset { id: String },

    /// Delete the board
    Clear,

    /// Print a link carrying the whole board
    Share,

    /// Load a board from a shared link
    Open { link: String },

    /// Write a spreadsheet report
    Export {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Follow changes made by other processes
    Watch {
        /// Poll a simulated remote API with this latency instead of
        /// watching files
        #[arg(long)]
        remote_latency_ms: Option<u64>,
    },
}

fn load_config(path: Option<&Path>) -> Result<BoardConfig> {
    let Some(path) = path else {
        return Ok(BoardConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = BoardConfig::from_json(&raw)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskboard")
}

/// Print and clear the board's notice. Errors go to stderr.
fn flush_notice(session: &mut Session) {
    if let Some(notice) = session.board.take_notice() {
        match notice.severity {
            Severity::Error => eprintln!("{}", render::notice(&notice)),
            Severity::Success => println!("{}", render::notice(&notice)),
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let url = match &args.command {
        Command::Open { link } => Some(link.clone()),
        _ => args.url.clone(),
    };

    let mut session = Session::open(SessionOptions {
        data_dir: args.data_dir.clone().unwrap_or_else(default_data_dir),
        workspace: args.workspace.clone(),
        url,
        config,
        actor: args.actor.clone(),
    })?;
    debug!("Startup: {:?}", session.report);
    flush_notice(&mut session);

    match args.command {
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = session.board.import_csv(&text, &today_label());
            flush_notice(&mut session);
            let report = report?;
            for line in &report.skipped {
                warn!("Skipped line {} (missing activity or performer)", line);
            }
        }

        Command::List { search, performer } => {
            let filter = TaskFilter { search, performer };
            print!("{}", render::task_table(session.board.filtered(&filter)));
        }

        Command::Stats => {
            print!("{}", render::stats_report(session.board.tasks()));
        }

        Command::Complete { id, observations } => {
            let id = session.resolve_task_id(&id)?;
            session.board.complete(&id, &observations)?;
            flush_notice(&mut session);
        }

        Command::Reschedule { id, observations } => {
            let id = session.resolve_task_id(&id)?;
            session.board.reschedule(&id, &observations)?;
            flush_notice(&mut session);
        }

        Command::Reset { id } => {
            let id = session.resolve_task_id(&id)?;
            session.board.reset(&id)?;
            flush_notice(&mut session);
        }

        Command::Clear => {
            session.board.clear()?;
            flush_notice(&mut session);
        }

        Command::Share => {
            let base = session.url();
            let link = session.board.share_link(&base);
            flush_notice(&mut session);
            println!("{}", link?);
        }

        Command::Open { .. } => match session.report.source {
            StartupSource::Link { tasks } => {
                println!("Board URL: {}", session.url());
                info!("Opened {} task(s) from link", tasks);
            }
            _ => bail!("The link did not contain a board"),
        },

        Command::Export { out } => {
            let Some(html) = export::export_html(session.board.tasks()) else {
                bail!("Nothing to export");
            };
            let path = out.join(export::export_file_name(&today_label()));
            std::fs::write(&path, html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{}", path.display());
        }

        Command::Watch { remote_latency_ms } => match remote_latency_ms {
            Some(ms) => watch_remote(session, Duration::from_millis(ms)).await?,
            None => watch_files(session).await?,
        },
    }

    Ok(())
}

/// Follow the record through file events, with polling as a backstop.
async fn watch_files(mut session: Session) -> Result<()> {
    let mut watcher = FileWatcher::new(session.storage.dir().to_path_buf())?;
    let mut ticks = tokio::time::interval(Duration::from_millis(session.config.poll_interval_ms));
    info!(
        "Watching workspace {} in {}. Press Ctrl+C to stop.",
        session.workspace.id(),
        watcher.dir().display()
    );
    print!("{}", render::task_table(session.board.tasks()));

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                debug!("Record event {:?}", event);
                session.storage.deliver_change(&event.file_name);
                if session.board.pump() {
                    println!("-- board changed --");
                    print!("{}", render::task_table(session.board.tasks()));
                }
            }

            _ = ticks.tick() => {
                session.storage.echoes().cleanup_expired();
                if session.board.poll() {
                    println!("-- board changed (poll) --");
                    print!("{}", render::task_table(session.board.tasks()));
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// Follow the record through a simulated remote API, polling only.
async fn watch_remote(session: Session, latency: Duration) -> Result<()> {
    let key = session.workspace.record_key(&session.config.storage_prefix);
    let remote_store = Store::new(
        session.storage.clone(),
        StorageEventBus::new(session.storage.clone(), key),
        &session.workspace,
        &session.config,
    );
    let remote = SimulatedRemote::new(remote_store, latency);

    // Local cache for this context only
    let hub = BroadcastHub::new();
    let mut reconciler = Reconciler::new(Store::with_key(
        MemoryStorage::new(),
        hub.open("local"),
        "cache",
    ));
    let mut ticks = tokio::time::interval(Duration::from_millis(session.config.poll_interval_ms));
    info!(
        "Polling workspace {} every {}ms with {}ms latency. Press Ctrl+C to stop.",
        session.workspace.id(),
        session.config.poll_interval_ms,
        latency.as_millis()
    );

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                match remote::poll_once(&remote, &mut reconciler).await {
                    Ok(true) => {
                        println!("-- board changed (remote) --");
                        print!("{}", render::task_table(reconciler.view()));
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Remote poll failed: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to warn (or debug with --verbose)
    let default_filter = if args.verbose {
        "info,taskboard_core=debug,taskboard_cli=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(args).await
}
