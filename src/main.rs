//! Provisio CLI entrypoint.
//!
//! This is the main entrypoint for the provisio command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use provisio::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use provisio::command::CommandExecutor;
use provisio::config::{ConfigParser, ConfigValidator, StackConfig, StackSettings, StateBackend, find_config_file};
use provisio::error::{ProvisioError, Result, StateError};
use provisio::orchestrator::Orchestrator;
use provisio::provider::ProviderRegistry;
use provisio::state::{
    LocalStateStore, LockInfo, MemoryStateStore, StateRecord, StateStore, acquire_with_retry, generate_holder_id,
};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Attempts at taking the stack lock before giving up.
const LOCK_ATTEMPTS: u32 = 3;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr so that `--output json` stays parseable on stdout.
fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, formatter).await,
        Commands::Apply { yes } => cmd_apply(config_path, yes, formatter).await,
        Commands::Destroy { yes, force } => cmd_destroy(config_path, yes, force, formatter).await,
        Commands::State { command } => cmd_state(config_path, command, formatter).await,
        Commands::Providers => cmd_providers(config_path, formatter),
    }
}

/// Validate the stack file.
fn cmd_validate(config_path: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config_file, config) = load_config(config_path)?;
    info!("Validating stack file: {}", config_file.display());

    let settings = config.settings(base_dir(&config_file));
    let registry = builtin_registry(&settings);
    let mut result = ConfigValidator::new()
        .with_resource_types(registry.type_names())
        .check(&config);

    print_out(&formatter.format_validation(&result, show_warnings));

    if result.is_valid() {
        if formatter.format() == OutputFormat::Text {
            eprintln!("\nStack summary:");
            eprintln!("  Stack: {}", config.qualified_name());
            eprintln!("  Resources: {}", config.resources.len());
            eprintln!("  State backend: {:?}", config.state.backend);
        }
        Ok(())
    } else {
        Err(ProvisioError::Config(result.errors.remove(0)))
    }
}

/// Show what an apply would change.
async fn cmd_plan(config_path: Option<&Path>, detailed: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let plan = workspace.orchestrator.plan(&workspace.config).await?;

    print_out(&formatter.format_plan(&plan, detailed));

    if plan.has_errors() {
        return Err(ProvisioError::internal("plan contains invalid resources"));
    }
    Ok(())
}

/// Reconcile every declared resource.
async fn cmd_apply(config_path: Option<&Path>, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let plan = workspace.orchestrator.plan(&workspace.config).await?;

    if !plan.has_changes() && !plan.has_errors() {
        print_out(&formatter.success("No changes to apply."));
        return Ok(());
    }

    if !auto_approve {
        print_out(&formatter.format_plan(&plan, false));
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let store = workspace.orchestrator.store();
    let lock = lock_stack(store.as_ref()).await?;

    let result = workspace.orchestrator.apply(&workspace.config).await;
    store.release_lock(&lock.lock_id).await?;
    let report = result?;

    print_out(&formatter.format_report(&report));

    if report.is_success() {
        Ok(())
    } else {
        Err(ProvisioError::internal(format!(
            "apply finished with {} failed and {} skipped resources",
            report.failed(),
            report.skipped()
        )))
    }
}

/// Delete every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    force: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let store = workspace.orchestrator.store();
    let records = store.list().await?;

    if records.is_empty() {
        print_out(&formatter.success("No resources to destroy."));
        return Ok(());
    }

    if !auto_approve {
        eprintln!("The following resources will be destroyed:");
        for record in &records {
            let protected = if record.protect { " (protected)" } else { "" };
            eprintln!("  - {} [{}]{protected}", record.identity, record.provider_id);
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(());
        }
    }

    let lock = lock_stack(store.as_ref()).await?;
    let result = workspace
        .orchestrator
        .destroy(&workspace.config.qualified_name(), force)
        .await;
    store.release_lock(&lock.lock_id).await?;
    let report = result?;

    print_out(&formatter.format_report(&report));

    if report.is_success() {
        Ok(())
    } else {
        Err(ProvisioError::internal(format!(
            "destroy left {} resources in place",
            report.failed() + report.skipped()
        )))
    }
}

/// State management commands.
async fn cmd_state(config_path: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let store = workspace.orchestrator.store();

    match command {
        StateCommands::List => {
            let records = store.list().await?;
            print_out(&formatter.format_records(&records));
        }
        StateCommands::Show { name, type_name } => {
            let record = find_record(store.as_ref(), &name, type_name.as_deref()).await?;
            print_out(&formatter.format_record(&record));
        }
        StateCommands::Rm { name, type_name } => {
            let record = find_record(store.as_ref(), &name, type_name.as_deref()).await?;
            store.delete(&record.identity).await?;
            warn!(
                "Forgot {}; external object '{}' was left in place",
                record.identity, record.provider_id
            );
            print_out(&formatter.success(&format!("Removed {} from state.", record.identity)));
        }
        StateCommands::Unlock { lock_id, force } => {
            let current = store.get_lock_info().await?;
            print_out(&formatter.format_lock(current.as_ref()));

            match (current, lock_id) {
                (None, _) => {}
                (Some(_), Some(id)) => {
                    store.release_lock(&id).await?;
                    print_out(&formatter.success("State unlocked."));
                }
                (Some(lock), None) if force => {
                    store.release_lock(&lock.lock_id).await?;
                    print_out(&formatter.success("State forcefully unlocked."));
                }
                (Some(_), None) => {
                    print_out(&formatter.warning("Please provide --lock-id or use --force"));
                }
            }
        }
    }

    Ok(())
}

/// List registered resource types.
fn cmd_providers(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let settings = match load_config(config_path) {
        Ok((config_file, config)) => config.settings(base_dir(&config_file)),
        Err(e) => {
            debug!("No usable stack file ({e}); using default provider settings");
            StackSettings::new("provisio", "dev")
        }
    };
    let registry = builtin_registry(&settings);
    print_out(&formatter.format_providers(&registry.describe()));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loaded stack file plus everything needed to act on it.
struct Workspace {
    config: StackConfig,
    orchestrator: Orchestrator,
}

impl Workspace {
    fn open(config_path: Option<&Path>) -> Result<Self> {
        let (config_file, config) = load_config(config_path)?;
        let base = base_dir(&config_file);
        let settings = config.settings(&base);

        let store: Arc<dyn StateStore> = match config.state.backend {
            StateBackend::Local => {
                let dir = config.state_dir(&base);
                debug!("Using local state in {}", dir.display());
                Arc::new(LocalStateStore::with_base_dir(dir))
            }
            StateBackend::Memory => {
                warn!("Using in-memory state; nothing will be persisted");
                Arc::new(MemoryStateStore::new())
            }
        };

        let orchestrator = Orchestrator::new(store, builtin_registry(&settings), &settings);
        Ok(Self { config, orchestrator })
    }
}

/// Resolves and parses the stack file.
fn load_config(config_path: Option<&Path>) -> Result<(PathBuf, StackConfig)> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))?;
    debug!("Loading stack file from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    let config = parser.load_with_env(&config_file)?;
    Ok((config_file, config))
}

fn base_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn builtin_registry(settings: &StackSettings) -> ProviderRegistry {
    ProviderRegistry::builtin(settings, Arc::new(CommandExecutor::new()))
}

/// Takes the stack lock for this process.
async fn lock_stack(store: &dyn StateStore) -> Result<LockInfo> {
    let lock = acquire_with_retry(store, &generate_holder_id(), LOCK_ATTEMPTS).await?;
    debug!("Acquired state lock {}", lock.lock_id);
    Ok(lock)
}

/// Finds a record by logical name, and by type when given.
async fn find_record(store: &dyn StateStore, name: &str, type_name: Option<&str>) -> Result<StateRecord> {
    let mut matches: Vec<StateRecord> = store
        .list()
        .await?
        .into_iter()
        .filter(|r| r.identity.name == name && type_name.is_none_or(|t| r.identity.type_name == t))
        .collect();

    match matches.len() {
        0 => Err(StateError::storage(format!("No recorded resource named '{name}'")).into()),
        1 => Ok(matches.remove(0)),
        _ => Err(ProvisioError::internal(format!(
            "'{name}' matches several resource types; pass --type"
        ))),
    }
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn print_out(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", text.trim_end());
}
