use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use annex_watch::config::{self, Config};
use annex_watch::core::{resolve_watch_list, EngineContext, EngineUpdate, StatusEngine, WatchSource};
use annex_watch::data::{
    CommandRequestStore, Database, SqliteStatusStore, StatusRequestStore, StatusStore,
    VisibleFolderStore, WatchedRepository, WatchedRepositoryStore,
};
use annex_watch::git::{AnnexAction, AnnexQueries, GitAction, ProcessRunner, UserCommand};
use annex_watch::util::{self, repo_path, Tool, ToolAvailability};

#[derive(Parser)]
#[command(name = "annex-watch", version, about = "Background status tracker for git-annex repositories")]
struct Cli {
    /// Data directory (defaults to ~/.annex-watch)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the status engine until interrupted
    Run,
    /// Manage the watched repositories
    #[command(subcommand)]
    Watch(WatchCommand),
    /// Print the stored status of a path as JSON; unknown paths are queued
    Status { path: PathBuf },
    /// Ask the engine to run a command on a path
    Request {
        #[arg(value_enum)]
        action: RequestAction,
        path: PathBuf,
    },
    /// Mark a folder as shown (or no longer shown) in a file browser
    #[command(subcommand)]
    Visible(VisibleCommand),
    /// Save the location of git or git-annex
    Tool {
        #[arg(value_enum)]
        tool: ToolArg,
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum WatchCommand {
    Add { path: PathBuf },
    Remove { path: PathBuf },
    List,
}

#[derive(Subcommand)]
enum VisibleCommand {
    Show { path: PathBuf },
    Hide { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum RequestAction {
    Get,
    Add,
    Drop,
    Unlock,
    Lock,
    GitAdd,
}

impl From<RequestAction> for UserCommand {
    fn from(action: RequestAction) -> Self {
        match action {
            RequestAction::Get => UserCommand::Annex(AnnexAction::Get),
            RequestAction::Add => UserCommand::Annex(AnnexAction::Add),
            RequestAction::Drop => UserCommand::Annex(AnnexAction::Drop),
            RequestAction::Unlock => UserCommand::Annex(AnnexAction::Unlock),
            RequestAction::Lock => UserCommand::Annex(AnnexAction::Lock),
            RequestAction::GitAdd => UserCommand::Git(GitAction::Add),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ToolArg {
    Git,
    GitAnnex,
}

impl From<ToolArg> for Tool {
    fn from(tool: ToolArg) -> Self {
        match tool {
            ToolArg::Git => Tool::Git,
            ToolArg::GitAnnex => Tool::GitAnnex,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir);

    // Log to file (~/.annex-watch/logs/annex-watch.log)
    fs::create_dir_all(util::logs_dir())?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::Watch(command) => watch(command),
        Commands::Status { path } => status(&path),
        Commands::Request { action, path } => request(action.into(), &path),
        Commands::Visible(command) => visible(command),
        Commands::Tool { tool, path } => {
            let tool = Tool::from(tool);
            config::save_tool_path(&util::config_path(), tool, &canonical(&path)?)?;
            println!("Saved {} path", tool.display_name());
            Ok(())
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::load();
    let tools = ToolAvailability::detect(&config.tool_paths);
    for tool in tools.missing_tools() {
        tracing::warn!(tool = tool.binary_name(), "Tool not found");
        eprintln!("warning: {} not found", tool.display_name());
    }

    let database = Database::open(util::database_path())?;
    let ctx = Arc::new(EngineContext::new(
        config.engine.clone(),
        WatchSource::ConfigFile(util::config_path()),
        Arc::new(ProcessRunner::from_tools(&tools)),
        &database,
    ));

    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let handle = StatusEngine::new(ctx, update_tx).spawn().await;
    tracing::info!("Status engine started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = update_rx.recv() => match update {
                Some(EngineUpdate::CommandFailed { path, title, message, .. }) => {
                    eprintln!("{title}: {path}");
                    if !message.is_empty() {
                        eprintln!("{message}");
                    }
                }
                Some(EngineUpdate::WatchListChanged { repositories }) => {
                    tracing::info!(count = repositories.len(), "Watch list changed");
                }
                None => break,
            },
        }
    }

    handle.shutdown().await;
    tracing::info!("Status engine stopped");
    Ok(())
}

fn watch(command: WatchCommand) -> Result<()> {
    let config_file = util::config_path();
    match command {
        WatchCommand::Add { path } => {
            let path = canonical(&path)?;
            if config::add_watched_repository(&config_file, &path)? {
                println!("Watching {}", path.display());
            } else {
                println!("Already watching {}", path.display());
            }
        }
        WatchCommand::Remove { path } => {
            let path = path.canonicalize().unwrap_or(path);
            if config::remove_watched_repository(&config_file, &path)? {
                println!("Stopped watching {}", path.display());
            } else {
                println!("Not watching {}", path.display());
            }
        }
        WatchCommand::List => {
            for path in Config::load_from(&config_file)?.watched_repositories {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn status(path: &Path) -> Result<()> {
    let database = Database::open(util::database_path())?;
    let (repo, relative) = locate(&database, path)?;
    let store = SqliteStatusStore::new(database.connection());
    match store.get(repo.uuid, &relative)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => {
            // the running engine picks this up at high priority
            StatusRequestStore::new(database.connection()).request(repo.uuid, &relative)?;
            println!("null");
        }
    }
    Ok(())
}

fn request(command: UserCommand, path: &Path) -> Result<()> {
    let database = Database::open(util::database_path())?;
    let (repo, relative) = locate(&database, path)?;
    let id = CommandRequestStore::new(database.connection()).enqueue(repo.uuid, &relative, command)?;
    println!("Queued {command} for {relative} (request {id})");
    Ok(())
}

fn visible(command: VisibleCommand) -> Result<()> {
    let database = Database::open(util::database_path())?;
    let store = VisibleFolderStore::new(database.connection());
    match command {
        VisibleCommand::Show { path } => {
            let (repo, relative) = locate(&database, &path)?;
            store.add(repo.uuid, &relative)?;
        }
        VisibleCommand::Hide { path } => {
            let (repo, relative) = locate(&database, &path)?;
            store.remove(repo.uuid, &relative)?;
        }
    }
    Ok(())
}

/// Map a filesystem path to its watched repository and relative path.
///
/// Uses the set last recorded by the engine, falling back to resolving the
/// configured list when the engine has not run yet.
fn locate(database: &Database, path: &Path) -> Result<(WatchedRepository, String)> {
    let path = canonical(path)?;
    let recorded = WatchedRepositoryStore::new(database.connection()).find_containing(&path)?;
    let repo = match recorded {
        Some(repo) => repo,
        None => {
            let config = Config::load_from(&util::config_path())?;
            let tools = ToolAvailability::detect(&config.tool_paths);
            let queries = AnnexQueries::new(Arc::new(ProcessRunner::from_tools(&tools)));
            resolve_watch_list(&config.watched_repositories, &queries)
                .iter()
                .filter(|repo| path.starts_with(&repo.path))
                .max_by_key(|repo| repo.path.components().count())
                .cloned()
                .ok_or_else(|| anyhow!("{} is not inside a watched repository", path.display()))?
        }
    };
    let relative = repo_path::relative_path(&repo.path, &path)
        .ok_or_else(|| anyhow!("{} is outside {}", path.display(), repo.path.display()))?;
    if repo_path::is_git_internal(&relative) {
        bail!("{} is inside the git directory", path.display());
    }
    Ok((repo, relative))
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("{} does not exist", path.display()))
}
