//! `workflow-dispatch` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` : structural validation of a workflow JSON file.
//! - `plan`     : resolve a workflow against the service registry.
//! - `run`      : execute a workflow with in-process workers.
//! - `worker`   : run queue workers against the Postgres job store.
//! - `migrate`  : run pending database migrations.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use engine::{ExecutionMode, ExecutionState, GraphResolver, WorkflowDefinition, WorkflowRunner};
use invoker::HttpInvoker;
use queue::{DispatchQueue, JobStore, MemoryJobStore};

use crate::config::{QueueArgs, ResolverArgs, ServiceArgs};

#[derive(Parser)]
#[command(
    name = "workflow-dispatch",
    about = "Dependency-aware dispatch of workflow actions to remote services",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a workflow file and print its dependency layers.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Print the batches and skipped nodes a run would produce.
    Plan {
        path: PathBuf,
        #[arg(long, default_value = "dependency_aware")]
        mode: ExecutionMode,
        #[command(flatten)]
        services: ServiceArgs,
        #[command(flatten)]
        resolver: ResolverArgs,
    },
    /// Execute a workflow and print a JSON report once it has finished.
    Run {
        path: PathBuf,
        #[arg(long, default_value = "dependency_aware")]
        mode: ExecutionMode,
        /// Submit only the first batch.
        #[arg(long)]
        first_layer_only: bool,
        /// Use the Postgres job store instead of the in-memory one.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        #[command(flatten)]
        services: ServiceArgs,
        #[command(flatten)]
        resolver: ResolverArgs,
        #[command(flatten)]
        queue: QueueArgs,
    },
    /// Process jobs from the Postgres job store until interrupted.
    Worker {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        resolver: ResolverArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    config::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Plan { path, mode, services, resolver } => plan(&path, mode, &services, &resolver),
        Command::Run { path, mode, first_layer_only, database_url, services, resolver, queue } => {
            run(&path, mode, first_layer_only, database_url.as_deref(), &services, &resolver, &queue).await
        }
        Command::Worker { database_url, queue, resolver } => worker(&database_url, &queue, &resolver).await,
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
            Ok(())
        }
    }
}

fn load_workflow(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    WorkflowDefinition::from_json(&content)
        .with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let workflow = load_workflow(path)?;
    let layers = engine::validate_dag(&workflow).context("validation failed")?;
    println!("Workflow is valid: {} node(s) in {} layer(s)", workflow.nodes.len(), layers.len());
    for (index, layer) in layers.iter().enumerate() {
        println!("  layer {index}: {}", layer.join(", "));
    }
    Ok(())
}

fn plan(path: &Path, mode: ExecutionMode, services: &ServiceArgs, resolver: &ResolverArgs) -> Result<()> {
    let workflow = load_workflow(path)?;
    let resolver = GraphResolver::new(Arc::new(services.registry()?), resolver.config());
    let resolution = resolver.resolve(&workflow, mode).context("resolution failed")?;

    println!("mode: {}", resolution.mode);
    for batch in &resolution.batches {
        println!("batch {}:", batch.index);
        for node in &batch.nodes {
            println!("  {:<16} {} {}", node.node_id, node.request.method, node.request.url);
        }
    }
    for skipped in &resolution.skipped {
        println!("skipped {}: {}", skipped.node_id, skipped.reason);
    }
    Ok(())
}

async fn job_store(database_url: Option<&str>, workers: usize) -> Result<Arc<dyn JobStore>> {
    match database_url {
        Some(url) => {
            let store = db::pool::connect_store(url, workers)
                .await
                .context("failed to connect to database")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryJobStore::new())),
    }
}

fn http_invoker(resolver: &ResolverArgs) -> Result<Arc<HttpInvoker>> {
    let invoker = HttpInvoker::new(Duration::from_millis(resolver.timeout_ms))
        .context("failed to build HTTP client")?;
    Ok(Arc::new(invoker))
}

#[allow(clippy::too_many_arguments)]
async fn run(
    path: &Path,
    mode: ExecutionMode,
    first_layer_only: bool,
    database_url: Option<&str>,
    services: &ServiceArgs,
    resolver: &ResolverArgs,
    queue: &QueueArgs,
) -> Result<()> {
    let workflow = load_workflow(path)?;
    let registry = Arc::new(services.registry()?);
    info!(services = registry.len(), "service registry loaded");

    let queue_config = queue.config();
    let store = job_store(database_url, queue.workers).await?;
    let dispatch = DispatchQueue::new(store, queue_config.clone()).context("invalid queue settings")?;
    let pool = dispatch.spawn_workers(http_invoker(resolver)?, CancellationToken::new());

    let runner = WorkflowRunner::new(
        Arc::new(GraphResolver::new(registry, resolver.config())),
        dispatch,
        config::runner_config(first_layer_only, &queue_config),
    );
    let outcome = runner.run_to_completion(&workflow, mode).await;
    pool.shutdown().await;

    let report = outcome.context("execution failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.snapshot.state != ExecutionState::Completed {
        std::process::exit(2);
    }
    Ok(())
}

async fn worker(database_url: &str, queue: &QueueArgs, resolver: &ResolverArgs) -> Result<()> {
    let store = job_store(Some(database_url), queue.workers).await?;
    let dispatch = DispatchQueue::new(store, queue.config()).context("invalid queue settings")?;

    let pool = dispatch.spawn_workers(http_invoker(resolver)?, CancellationToken::new());
    info!(workers = queue.workers, "Worker pool started");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Shutting down workers");
    pool.shutdown().await;
    Ok(())
}
