mod demo;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use drft::config::DrftConfig;
use drft::resource::ResourceNode;
use drft::serializer::TypeRegistry;
use drft::stack::Stack;
use drft::state::FileStateStore;
use drft::{output, planner};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "drft", about = "Declarative, dependency-ordered resource management")]
struct Cli {
    /// Path to the stack manifest (defaults to ./stack.json).
    #[arg(long, global = true, default_value = "stack.json")]
    manifest: PathBuf,

    /// Where state is persisted, relative to the manifest's directory
    /// unless absolute or `.drft/`-prefixed (§4.B).
    #[arg(long, global = true, default_value = ".drft/state.json")]
    state_path: String,

    /// Number of times to retry acquiring the state lock before failing.
    #[arg(long, global = true, default_value_t = drft::config::DEFAULT_LOCK_MAX_RETRIES)]
    lock_retries: u32,

    /// Milliseconds between state lock retry attempts.
    #[arg(long, global = true, default_value_t = drft::config::DEFAULT_LOCK_RETRY_INTERVAL_MS)]
    lock_retry_interval_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute and print the execution plan without applying it.
    Plan {
        #[arg(long)]
        json: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Compute the plan and, on confirmation, execute it.
    Apply {
        #[arg(long)]
        auto_approve: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Plan and execute the deletion of every managed resource.
    Destroy {
        #[arg(long)]
        auto_approve: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Re-read every resource in state from its provider.
    Refresh {
        #[arg(short, long)]
        verbose: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// Reset SIGPIPE to default behavior so piping (e.g. `drft plan | head`)
/// exits cleanly instead of panicking on broken pipe.
fn reset_sigpipe() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

#[tokio::main]
async fn main() {
    reset_sigpipe();
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Plan { verbose, .. }
        | Command::Apply { verbose, .. }
        | Command::Destroy { verbose, .. }
        | Command::Refresh { verbose } => *verbose,
    };
    init_logging(verbose);

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{e:?}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let verbose = match &cli.command {
        Command::Plan { verbose, .. }
        | Command::Apply { verbose, .. }
        | Command::Destroy { verbose, .. }
        | Command::Refresh { verbose } => *verbose,
    };

    let loaded = demo::load_manifest(&cli.manifest)
        .with_context(|| format!("loading manifest {}", cli.manifest.display()))?;

    let working_dir = cli
        .manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = DrftConfig {
        working_dir: working_dir.clone(),
        state_path: cli.state_path.clone(),
        lock_max_retries: cli.lock_retries,
        lock_retry_interval_ms: cli.lock_retry_interval_ms,
        verbose,
    };

    let mut registry = TypeRegistry::new();
    demo::register(&mut registry);

    let store = FileStateStore::with_lock_policy(
        &config.working_dir,
        &config.state_path,
        config.lock_max_retries,
        config.lock_retry_interval(),
    );
    let provider: Arc<dyn drft::provider::Provider> = Arc::new(demo::FileProvider::new(working_dir.clone()));

    let stack = Stack::new(loaded.stack_name, store).with_provider(provider);
    let stack = loaded
        .resources
        .into_iter()
        .fold(stack, |s, r| s.with_resource(r));

    match cli.command {
        Command::Plan { json, verbose } => cmd_plan(&stack, &registry, json, verbose),
        Command::Apply { auto_approve, verbose } => cmd_apply(&stack, &registry, auto_approve, verbose).await,
        Command::Destroy { auto_approve, verbose } => cmd_destroy(&stack, &registry, auto_approve, verbose).await,
        Command::Refresh { verbose } => cmd_refresh(&stack, &registry, verbose).await,
    }
}

fn cmd_plan(stack: &Stack, registry: &TypeRegistry, json: bool, verbose: bool) -> Result<()> {
    let plan = stack.plan(registry, None, verbose)?;
    if json {
        output::print_plan_json(&plan)?;
    } else {
        output::print_plan(&plan);
    }
    Ok(())
}

async fn cmd_apply(stack: &Stack, registry: &TypeRegistry, auto_approve: bool, verbose: bool) -> Result<()> {
    let plan = stack.plan(registry, None, verbose)?;
    output::print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }
    if !auto_approve && !confirm()? {
        bail!("apply cancelled");
    }

    let report = stack.apply(&plan, registry, None).await?;
    output::print_report(&report);
    if !report.committed {
        bail!("apply failed: {} operation(s) did not succeed", report.failed());
    }
    Ok(())
}

async fn cmd_destroy(stack: &Stack, registry: &TypeRegistry, auto_approve: bool, verbose: bool) -> Result<()> {
    let actual = stack.store.load(registry, None)?;
    let empty_desired: Vec<ResourceNode> = Vec::new();
    let plan = planner::build_plan(&empty_desired, &actual.resources, verbose)?;
    output::print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }
    if !auto_approve && !confirm()? {
        bail!("destroy cancelled");
    }

    let report = drft::executor::execute(
        &stack.name,
        &empty_desired,
        &plan,
        &stack.providers,
        &stack.store,
        registry,
        None,
    )
    .await?;
    output::print_report(&report);
    if !report.committed {
        bail!("destroy failed: {} operation(s) did not succeed", report.failed());
    }
    Ok(())
}

async fn cmd_refresh(stack: &Stack, registry: &TypeRegistry, _verbose: bool) -> Result<()> {
    let state = stack.refresh(registry, None).await?;
    for id in state.resources.keys() {
        println!("{} {}", "refreshed".cyan(), id);
    }
    Ok(())
}

fn confirm() -> Result<bool> {
    print!("\nDo you want to perform these actions?\n  Only 'yes' will be accepted to approve.\n\nEnter a value: ");
    io::stdout().flush().ok();
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "yes")
}
