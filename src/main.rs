//! docshelf - Browse, copy and move documents across storage providers.
//!
//! Usage:
//!   dsh ls [FOLDER]              List a folder
//!   dsh cp ITEM... FOLDER        Copy items into a folder
//!   dsh mv ITEM... FOLDER        Move items into a folder
//!   dsh rm ITEM...               Move items to the trash
//!   dsh rename ITEM NAME         Rename an item
//!   dsh empty-trash              Purge the trash
//!   dsh --help                   Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tracing_subscriber::EnvFilter;

use docshelf_core::{
    BoxFuture, CancellationToken, EngineConfig, Entity, FilterSpec, ListingConfig, NoProgress,
    Provider, SortField, SortSpec, TransferMode,
};
use docshelf_listing::ListingSession;
use docshelf_ops::{
    ConflictPrompt, ConflictResolution, ConflictResolver, FixedResolver, TransferEvent,
    TransferExecutor, TransferOutcome, TransferRequest, delete_entities, empty_trash,
    plan_transfer, rename_entity,
};
use docshelf_providers::LocalProvider;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "DOCSHELF_LOG";

#[derive(Parser)]
#[command(
    name = "docshelf",
    version,
    about = "Browse, copy and move documents across storage providers",
    long_about = "docshelf lists folders page by page and moves or copies documents \
                  between storage roots.\n\n\
                  Items are addressed by their path inside the root, e.g. `/docs/A.docx`."
)]
struct Cli {
    /// Directory that serves as the storage root
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a folder
    Ls {
        /// Folder to list
        #[arg(default_value = "/")]
        folder: String,

        /// Sort field (name, date, size, type, author)
        #[arg(short, long, default_value = "date")]
        sort: SortField,

        /// Sort ascending instead of descending
        #[arg(short, long)]
        asc: bool,

        /// Search this folder and everything below it
        #[arg(short = 'q', long)]
        search: Option<String>,

        /// Filter as key=value (type, extension, author)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Entries per page
        #[arg(short = 'n', long)]
        page_size: Option<usize>,

        /// Load every page instead of just the first
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Copy items into a folder
    Cp(TransferArgs),

    /// Move items into a folder
    Mv(TransferArgs),

    /// Move items to the trash
    Rm {
        /// Items to delete
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Rename an item
    Rename {
        /// Item to rename
        item: String,

        /// New name
        name: String,
    },

    /// Permanently purge the trash
    EmptyTrash,
}

#[derive(Args)]
struct TransferArgs {
    /// Items to transfer
    #[arg(required = true)]
    items: Vec<String>,

    /// Destination folder
    destination: String,

    /// Root of the destination, when it is not --root
    #[arg(long)]
    to: Option<PathBuf>,

    /// What to do when names collide at the destination
    #[arg(long, default_value = "ask")]
    on_conflict: ConflictChoice,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictChoice {
    Ask,
    Overwrite,
    Skip,
    Cancel,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let provider = open_root(&cli.root, &config)?;

    match cli.command {
        Command::Ls {
            folder,
            sort,
            asc,
            search,
            filters,
            page_size,
            all,
            format,
        } => {
            let sort = if asc {
                SortSpec::ascending(sort)
            } else {
                SortSpec::descending(sort)
            };
            let mut listing = config.listing.clone();
            if let Some(page_size) = page_size {
                listing.page_size = page_size.max(1);
            }
            let filter = parse_filters(&filters)?;
            run_ls(provider, &folder, sort, filter, search, listing, all, format).await?;
        }
        Command::Cp(args) => run_transfer(provider, args, TransferMode::Copy, &config).await?,
        Command::Mv(args) => run_transfer(provider, args, TransferMode::Move, &config).await?,
        Command::Rm { items } => run_rm(provider, &items).await?,
        Command::Rename { item, name } => run_rename(provider, &item, &name).await?,
        Command::EmptyTrash => {
            empty_trash(provider.as_ref(), &CancellationToken::new())
                .await
                .context("Failed to empty trash")?;
            eprintln!("Trash emptied");
        }
    }

    Ok(())
}

/// Load the config file given on the command line, or the user's one if
/// present.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = path {
        return EngineConfig::load(path).context("Failed to load config");
    }
    match dirs::config_dir().map(|dir| dir.join("docshelf").join("config.toml")) {
        Some(path) if path.exists() => EngineConfig::load(&path).context("Failed to load config"),
        _ => Ok(EngineConfig::default()),
    }
}

fn open_root(root: &Path, config: &EngineConfig) -> Result<Arc<LocalProvider>> {
    let provider = LocalProvider::open(root)
        .with_context(|| format!("Cannot open {}", root.display()))?
        .with_chunk_size(config.transfer.chunk_size);
    Ok(Arc::new(provider))
}

/// List a folder.
#[allow(clippy::too_many_arguments)]
async fn run_ls(
    provider: Arc<LocalProvider>,
    folder: &str,
    sort: SortSpec,
    filter: FilterSpec,
    search: Option<String>,
    config: ListingConfig,
    all: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut session = ListingSession::new(provider, to_id(folder), config);

    // Only the last ticket counts; earlier ones are superseded.
    let mut ticket = session.apply_sort(sort);
    if !filter.is_empty() {
        ticket = session.apply_filter(filter);
    }
    if let Some(next) = search.as_deref().and_then(|term| session.apply_search(term)) {
        ticket = next;
    }
    let result = ticket.run().await;
    session.finish(ticket, result).context("Listing failed")?;

    while all && session.has_more() {
        session.load_next_page().await.context("Listing failed")?;
    }

    match format {
        OutputFormat::Text => {
            for entity in session.buffer() {
                print_entity(entity);
            }
            println!();
            println!(
                " {} of {} items in {}",
                session.buffer().len(),
                session.total(),
                session.folder_id()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(session.buffer())?);
        }
    }

    Ok(())
}

/// Copy or move items, possibly into another root.
async fn run_transfer(
    provider: Arc<LocalProvider>,
    args: TransferArgs,
    mode: TransferMode,
    config: &EngineConfig,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let destination_provider = match &args.to {
        Some(root) => open_root(root, config)?,
        None => Arc::clone(&provider),
    };

    let mut items = Vec::with_capacity(args.items.len());
    for item in &args.items {
        let entity = provider
            .entity(&to_id(item), &cancel)
            .await
            .with_context(|| format!("Cannot transfer {item}"))?;
        items.push(entity);
    }
    let destination = destination_provider
        .entity(&to_id(&args.destination), &cancel)
        .await
        .with_context(|| format!("Invalid destination {}", args.destination))?;

    let request = TransferRequest::new(items, provider, destination_provider, destination, mode)
        .with_config(&config.transfer);
    let resolver: Box<dyn ConflictResolver> = match args.on_conflict {
        ConflictChoice::Ask => Box::new(TerminalResolver),
        ConflictChoice::Overwrite => Box::new(FixedResolver(ConflictResolution::OverwriteAll)),
        ConflictChoice::Skip => Box::new(FixedResolver(ConflictResolution::SkipConflicting)),
        ConflictChoice::Cancel => Box::new(FixedResolver(ConflictResolution::Cancel)),
    };
    let plan = plan_transfer(request, resolver.as_ref(), &cancel).await?;

    let executor = TransferExecutor::new(config.transfer.clone());
    let mut rx = executor.start(plan, cancel);
    let outcome = loop {
        match rx.recv().await {
            Some(TransferEvent::Progress(progress)) => {
                if matches!(args.format, OutputFormat::Text) {
                    eprint!(
                        "\r {:>5.1}% {:<40}",
                        progress.percentage(),
                        truncate(progress.current.as_deref().unwrap_or(""), 40)
                    );
                }
            }
            Some(TransferEvent::Complete(result)) => break result?,
            None => bail!("Transfer task ended without a result"),
        }
    };
    if matches!(args.format, OutputFormat::Text) {
        eprintln!();
    }

    print_outcome(&outcome, args.format)?;
    outcome.into_result()?;
    Ok(())
}

/// Move items to the trash.
async fn run_rm(provider: Arc<LocalProvider>, items: &[String]) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        let entity = provider
            .entity(&to_id(item), &cancel)
            .await
            .with_context(|| format!("Cannot delete {item}"))?;
        entities.push(entity);
    }

    let report = delete_entities(provider.as_ref(), entities, &NoProgress, &cancel).await;
    for (entity, error) in &report.failed {
        eprintln!(" {}: {}", entity.title, error);
    }
    println!("{}", report.summary());

    if !report.is_success() {
        return Err(eyre!("{} item(s) could not be deleted", report.failed.len()));
    }
    Ok(())
}

/// Rename an item.
async fn run_rename(provider: Arc<LocalProvider>, item: &str, name: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let entity = provider
        .entity(&to_id(item), &cancel)
        .await
        .with_context(|| format!("Cannot rename {item}"))?;
    let renamed = rename_entity(provider.as_ref(), &entity, name, &cancel)
        .await
        .context("Rename failed")?;
    println!("{} -> {}", entity.id, renamed.id);
    Ok(())
}

/// Asks on the terminal how to resolve conflicts.
struct TerminalResolver;

impl ConflictResolver for TerminalResolver {
    fn resolve<'a>(&'a self, prompt: &'a ConflictPrompt) -> BoxFuture<'a, ConflictResolution> {
        let message = prompt.message();
        Box::pin(async move {
            let answer = tokio::task::spawn_blocking(move || {
                eprint!("{message} [o]verwrite / [s]kip / [c]ancel: ");
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| line)
            })
            .await;

            match answer {
                Ok(Ok(line)) => match line.trim().to_lowercase().as_str() {
                    "o" | "overwrite" | "y" | "yes" => ConflictResolution::OverwriteAll,
                    "s" | "skip" => ConflictResolution::SkipConflicting,
                    _ => ConflictResolution::Cancel,
                },
                _ => ConflictResolution::Cancel,
            }
        })
    }
}

fn print_outcome(outcome: &TransferOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for (source, created) in outcome.succeeded() {
                println!(" {} -> {}", source.id, created.id);
            }
            for (source, reason) in outcome.failed() {
                println!(" {} failed: {}", source.id, reason);
            }
            for (source, reason) in outcome.skipped() {
                println!(" {} skipped ({})", source.id, reason);
            }
            for source in outcome.not_started() {
                println!(" {} not started", source.id);
            }
            println!();
            println!(" {}", outcome.summary());
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "mode": outcome.mode(),
                "route": outcome.route(),
                "state": outcome.state(),
                "succeeded": outcome
                    .succeeded()
                    .map(|(source, created)| serde_json::json!({
                        "source": source.id,
                        "created": created,
                    }))
                    .collect::<Vec<_>>(),
                "failed": outcome
                    .failed()
                    .map(|(source, reason)| serde_json::json!({
                        "source": source.id,
                        "stage": reason.stage,
                        "error": reason.error.to_string(),
                    }))
                    .collect::<Vec<_>>(),
                "skipped": outcome
                    .skipped()
                    .map(|(source, reason)| serde_json::json!({
                        "source": source.id,
                        "reason": reason,
                    }))
                    .collect::<Vec<_>>(),
                "not_started": outcome
                    .not_started()
                    .iter()
                    .map(|source| source.id.as_str())
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

fn print_entity(entity: &Entity) {
    let marker = if entity.is_folder() { "▸ " } else { "  " };
    let name = if entity.is_folder() {
        format!("{}/", entity.title)
    } else {
        entity.title.to_string()
    };
    let size = entity.size().map(format_size).unwrap_or_default();
    let updated = entity
        .updated_at()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    println!("{}{:<40} {:>10}  {}", marker, truncate(&name, 40), size, updated);
}

/// Parse `key=value` filter arguments.
fn parse_filters(filters: &[String]) -> Result<FilterSpec> {
    filters
        .iter()
        .map(|filter| {
            filter
                .split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| eyre!("Invalid filter '{filter}', expected KEY=VALUE"))
        })
        .collect()
}

/// Turn a user-supplied path into an entity id inside the root.
fn to_id(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 1).collect();
        format!("{kept}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_id() {
        assert_eq!(to_id("."), "/");
        assert_eq!(to_id("/"), "/");
        assert_eq!(to_id("docs/A.docx"), "/docs/A.docx");
        assert_eq!(to_id("./docs/"), "/docs");
        assert_eq!(to_id("/archive"), "/archive");
    }

    #[test]
    fn test_parse_filters() {
        let filter = parse_filters(&["type=file".to_string(), "extension = docx".to_string()])
            .unwrap();
        assert_eq!(filter.get("type"), Some("file"));
        assert_eq!(filter.get("extension"), Some("docx"));
        assert!(parse_filters(&["nonsense".to_string()]).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-name.docx", 8), "a-very-…");
    }
}
