use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trawl::config::Config;
use trawl::curl::task_from_curl;
use trawl::fetcher::Fetcher;
use trawl::model::{CrawlResult, Task};
use trawl::processor::Processor;
use trawl::project::{CallbackOutcome, Project, ProjectRegistry};
use trawl::queue::{put_json, Queue, QueueBackend, QueueSet};
use trawl::scheduler::Scheduler;
use trawl::server;
use trawl::worker::ResultWorker;

#[derive(Parser)]
#[command(
    name = "trawl",
    version,
    about = "Distributed web crawling pipeline over FIFO queues",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); TRAWL_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler stage
    Scheduler,

    /// Run the fetcher stage
    Fetcher,

    /// Run the processor stage
    Processor,

    /// Run the result worker stage
    ResultWorker,

    /// Run all four stages in one process
    All,

    /// Submit a task to the new-task queue
    Submit {
        /// URL to crawl
        #[arg(short, long, conflicts_with = "curl")]
        url: Option<String>,

        /// curl command line to derive the task from (quote the whole command)
        #[arg(long)]
        curl: Option<String>,

        /// Project owning the task
        #[arg(short, long, default_value = "default")]
        project: String,

        /// Callback handling the fetched response
        #[arg(long, default_value = "snapshot")]
        callback: String,
    },

    /// Show queue depths
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    // Initialize tracing/logging
    setup_tracing(&config, cli.log_format.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Scheduler => {
            tracing::info!(listen = %config.scheduler.listen, "Starting scheduler stage");
            run_scheduler(config).await?;
        }

        Commands::Fetcher => {
            tracing::info!(
                listen = %config.fetcher.listen,
                concurrency = %config.fetcher.concurrency,
                "Starting fetcher stage"
            );
            run_fetcher(config).await?;
        }

        Commands::Processor => {
            tracing::info!(listen = %config.processor.listen, "Starting processor stage");
            run_processor(config).await?;
        }

        Commands::ResultWorker => {
            tracing::info!("Starting result worker stage");
            run_result_worker(config).await?;
        }

        Commands::All => {
            tracing::info!("Starting all pipeline stages");
            run_all(config).await?;
        }

        Commands::Submit {
            url,
            curl,
            project,
            callback,
        } => {
            tracing::info!(
                url = ?url,
                project = %project,
                callback = %callback,
                "Starting submit command"
            );
            submit(config, url, curl, project, callback).await?;
        }

        Commands::Status => {
            status(config).await?;
        }
    }

    Ok(())
}

fn setup_tracing(config: &Config, format_override: Option<&str>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("trawl=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("trawl={},warn", config.logging.level))
    };

    match format_override.unwrap_or(&config.logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Projects compiled into this binary.
///
/// Deployments embed the library and register their own projects; the binary
/// ships a minimal `default` project whose `snapshot` callback turns any
/// fetched page into a result, so a fresh pipeline is usable end to end.
async fn built_in_registry() -> Result<Arc<ProjectRegistry>> {
    let project = Project::builder("default")
        .callback("snapshot", |_task, response| {
            Ok(CallbackOutcome::with_result(CrawlResult::from_response(
                response,
            )))
        })
        .build()?;

    let registry = Arc::new(ProjectRegistry::new());
    registry.register(project).await;
    Ok(registry)
}

/// Flip a shutdown signal when Ctrl+C arrives.
fn spawn_ctrl_c_watch() -> watch::Receiver<bool> {
    let (signal, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received, stopping"),
            Err(error) => tracing::error!(error = %error, "Failed to wait for Ctrl+C"),
        }
        let _ = signal.send(true);
    });
    shutdown
}

async fn run_scheduler(config: Config) -> Result<()> {
    let queues = QueueSet::open(&config.queue).await?;
    let registry = built_in_registry().await?;
    let scheduler = Scheduler::new(queues, registry);

    let shutdown = spawn_ctrl_c_watch();
    let server = tokio::spawn(server::serve(
        config.scheduler_addr()?,
        scheduler.router(),
        shutdown.clone(),
    ));

    scheduler.run(shutdown).await;
    server.await??;
    Ok(())
}

async fn run_fetcher(config: Config) -> Result<()> {
    let queues = QueueSet::open(&config.queue).await?;
    let registry = built_in_registry().await?;
    let fetcher = Fetcher::new(queues, registry).with_concurrency(config.fetcher.concurrency);

    let shutdown = spawn_ctrl_c_watch();
    let server = tokio::spawn(server::serve(
        config.fetcher_addr()?,
        fetcher.router(),
        shutdown.clone(),
    ));

    fetcher.run(shutdown).await;
    server.await??;
    Ok(())
}

async fn run_processor(config: Config) -> Result<()> {
    let queues = QueueSet::open(&config.queue).await?;
    let registry = built_in_registry().await?;
    let processor = Processor::new(queues, registry);

    let shutdown = spawn_ctrl_c_watch();
    let server = tokio::spawn(server::serve(
        config.processor_addr()?,
        processor.router(),
        shutdown.clone(),
    ));

    processor.run(shutdown).await;
    server.await??;
    Ok(())
}

async fn run_result_worker(config: Config) -> Result<()> {
    let queues = QueueSet::open(&config.queue).await?;
    let registry = built_in_registry().await?;
    let worker = ResultWorker::new(queues, registry);

    let shutdown = spawn_ctrl_c_watch();
    worker.run(shutdown).await;
    Ok(())
}

async fn run_all(config: Config) -> Result<()> {
    let queues = QueueSet::open(&config.queue).await?;
    let registry = built_in_registry().await?;

    let scheduler = Scheduler::new(queues.clone(), Arc::clone(&registry));
    let fetcher = Fetcher::new(queues.clone(), Arc::clone(&registry))
        .with_concurrency(config.fetcher.concurrency);
    let processor = Processor::new(queues.clone(), Arc::clone(&registry));
    let worker = ResultWorker::new(queues, registry);

    let shutdown = spawn_ctrl_c_watch();

    let servers = vec![
        tokio::spawn(server::serve(
            config.scheduler_addr()?,
            scheduler.router(),
            shutdown.clone(),
        )),
        tokio::spawn(server::serve(
            config.fetcher_addr()?,
            fetcher.router(),
            shutdown.clone(),
        )),
        tokio::spawn(server::serve(
            config.processor_addr()?,
            processor.router(),
            shutdown.clone(),
        )),
    ];

    let stages = vec![
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        }),
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { fetcher.run(shutdown).await }
        }),
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { processor.run(shutdown).await }
        }),
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        }),
    ];

    for stage in futures::future::join_all(stages).await {
        stage?;
    }
    for server in futures::future::join_all(servers).await {
        server??;
    }
    Ok(())
}

async fn submit(
    config: Config,
    url: Option<String>,
    curl: Option<String>,
    project: String,
    callback: String,
) -> Result<()> {
    let mut task = match (url, curl) {
        (Some(url), None) => Task::new(url),
        (None, Some(command)) => task_from_curl(&command)?,
        _ => anyhow::bail!("pass exactly one of --url or --curl"),
    };
    task.project = project;
    task.process.callback = callback;

    if config.queue.backend == QueueBackend::Memory {
        tracing::warn!(
            "memory queues live inside one process; this submission is invisible to other commands"
        );
    }

    let queues = QueueSet::open(&config.queue).await?;
    put_json(queues.new_task.as_ref(), &task).await?;

    println!("Submitted task {}", task.task_id);
    println!("  URL: {}", task.url);
    println!("  Project: {}", task.project);
    println!("  Callback: {}", task.process.callback);
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let queues = QueueSet::open(&config.queue).await?;

    let mut entries: Vec<&dyn Queue> = vec![
        queues.new_task.as_ref(),
        queues.fetch.as_ref(),
        queues.process.as_ref(),
        queues.result.as_ref(),
    ];
    if let Some(status) = &queues.status {
        entries.push(status.as_ref());
    }

    println!("Queue depths:");
    for queue in entries {
        let size = queue.size().await;
        match queue.capacity() {
            0 => println!("  {:<20} {:>8}", queue.name(), size),
            cap => println!("  {:<20} {:>8} / {}", queue.name(), size, cap),
        }
    }
    Ok(())
}
