//! Converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use converge::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use converge::config::{ConfigParser, ConfigValidator, InfraConfig, ProviderBackend, StateBackend, find_config_file};
use converge::error::Result;
use converge::graph::{DependencyResolver, GraphBuilder};
use converge::provider::{Provider, SandboxProvider};
use converge::reconciler::Reconciler;
use converge::state::{ApplyOperation, LocalStateStore, MemoryStateStore, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for a run interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Directory for local state and the sandbox inventory.
const WORK_DIR: &str = ".converge";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag when set.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Graph => cmd_graph(config_path, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply { yes, parallelism } => {
            cmd_apply(config_path, yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, _) = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);

    emit(&formatter.format_validation(&result, show_warnings))?;
    if !result.is_valid() {
        return Ok(ExitCode::FAILURE);
    }

    // A valid document must also form an acyclic graph
    let graph = GraphBuilder::new().from_config(&config)?;
    info!("{} resources in {}", graph.len(), config.qualified_name());
    Ok(ExitCode::SUCCESS)
}

/// Show the resource graph.
fn cmd_graph(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, _) = load_valid_config(config_path)?;
    let graph = GraphBuilder::new().from_config(&config)?;
    let order = DependencyResolver::new().resolve(&graph)?;

    emit(&formatter.format_graph(&graph, &order))?;
    Ok(ExitCode::SUCCESS)
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let reconciler = build_reconciler(config_path)?;
    let plan = reconciler.plan().await?;

    emit(&formatter.format_plan(&plan, detailed))?;
    Ok(ExitCode::SUCCESS)
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let reconciler = build_reconciler(config_path)?.with_parallelism(parallelism);
    let plan = reconciler.plan().await?;

    if plan.is_empty() {
        emit(&formatter.format_message("No changes to apply."))?;
        return Ok(ExitCode::SUCCESS);
    }

    emit(&formatter.format_plan(&plan, false))?;

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = cancel_on_interrupt();
    let result = reconciler
        .execute(&plan, ApplyOperation::Apply, &cancel)
        .await?;

    emit(&formatter.format_result(&result))?;
    Ok(exit_code(result.is_success(), result.report.was_cancelled()))
}

/// Destroy every applied resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let reconciler = build_reconciler(config_path)?;
    let plan = reconciler.destroy_plan().await?;

    if plan.is_empty() {
        emit(&formatter.format_message("No resources to destroy."))?;
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("The following resources will be destroyed:");
    for action in plan.actions.iter().filter(|a| a.has_work()) {
        let id = action.prior.as_ref().map_or("", |p| p.provider_id.as_str());
        eprintln!("  - {}.{} ({id})", action.resource_type, action.name);
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = cancel_on_interrupt();
    let result = reconciler
        .execute(&plan, ApplyOperation::Destroy, &cancel)
        .await?;

    emit(&formatter.format_result(&result))?;
    Ok(exit_code(result.is_success(), result.report.was_cancelled()))
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let reconciler = build_reconciler(config_path)?;
    let report = reconciler.check_drift().await?;

    emit(&formatter.format_drift(&report))?;
    Ok(if report.has_drift() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_valid_config(config_path)?;
    let store = create_state_store(&config, &config_file);

    match command {
        StateCommands::Show => {
            if store.exists().await? {
                let state = store.load().await?;
                emit(&formatter.format_state(&state))?;
            } else {
                emit(&formatter.format_message("No state found."))?;
            }
        }
        StateCommands::List => {
            let state = store.load().await?;
            emit(&formatter.format_resources(&state))?;
        }
        StateCommands::Rm { name } => {
            let Some(record) = store.get(&name).await? else {
                eprintln!("No resource named '{name}' in state.");
                return Ok(ExitCode::FAILURE);
            };
            store.remove(&name, record.version).await?;
            warn!(
                "Removed {} from state; instance {} was not deleted",
                name, record.provider_id
            );
            emit(&formatter.format_message(&format!("Removed {name} from state.")))?;
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            emit(&formatter.format_message(&format!("State locked: {}", lock.lock_id)))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    emit(&formatter.format_message("State forcefully unlocked."))?;
                } else {
                    emit(&formatter.format_message("State is not locked."))?;
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&formatter.format_message("State unlocked."))?;
            } else {
                eprintln!("Please provide a lock id or use --force");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Returns a token cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for running actions to finish");
            token.cancel();
        }
    });
    cancel
}

fn exit_code(success: bool, cancelled: bool) -> ExitCode {
    if cancelled {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => find_config_file(std::env::current_dir()?),
    }
}

/// Loads the document with `.env` and environment overrides applied.
fn load_config(config_path: Option<&Path>) -> Result<(InfraConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    Ok((config, config_file))
}

/// Loads the document and rejects it if invalid.
fn load_valid_config(config_path: Option<&Path>) -> Result<(InfraConfig, PathBuf)> {
    let (config, config_file) = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    Ok((config, config_file))
}

/// Loads the document and wires up the provider and state store.
fn build_reconciler(config_path: Option<&Path>) -> Result<Reconciler> {
    let (config, config_file) = load_valid_config(config_path)?;
    let store = create_state_store(&config, &config_file);
    let provider = create_provider(&config, &config_file)?;
    Ok(Reconciler::new(config, provider, store))
}

/// Creates the state store named by the document.
fn create_state_store(config: &InfraConfig, config_file: &Path) -> Arc<dyn StateStore> {
    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let store = config.state.path.as_ref().map_or_else(
                || LocalStateStore::with_base_dir(base_dir(config_file).join(WORK_DIR)),
                |path| LocalStateStore::with_state_path(relative_to(config_file, path)),
            );
            Arc::new(store.with_project(&config.project.name, &config.project.environment))
        }
        StateBackend::Memory => {
            warn!("Using in-memory state; nothing will be persisted");
            Arc::new(MemoryStateStore::new())
        }
    };
    debug!("Using {} state backend", store.backend_type());
    store
}

/// Creates the provider named by the document.
fn create_provider(config: &InfraConfig, config_file: &Path) -> Result<Arc<dyn Provider>> {
    match config.provider.backend {
        ProviderBackend::Sandbox => {
            let path = config.provider.path.as_ref().map_or_else(
                || base_dir(config_file).join(WORK_DIR).join("sandbox.json"),
                |path| relative_to(config_file, path),
            );
            Ok(Arc::new(SandboxProvider::open(path)?))
        }
    }
}

fn base_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolves `path` against the directory of the configuration file.
fn relative_to(config_file: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir(config_file).join(path)
    }
}
