//! # Kestrel Worker
//!
//! Runs queue workers against the configured driver and exposes the
//! administrative operations on queues and failed jobs.

mod cli;
mod jobs;
mod settings;

use clap::Parser;
use kestrel_config::ConfigLoader;
use kestrel_core::{init_telemetry, KestrelResult};
use kestrel_queue::{
    connect_driver, connect_failed_store, register_metrics, system_clock, Clock, Dispatcher, FailedJobRepository,
    FailedJobService, JobId, JobPriority, JobRegistry, PushOptions, QueueConfig, QueueDriver, QueueName, Worker,
    WorkerPool,
};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use crate::cli::{Cli, Command, DispatchArgs, FailedCommand, WorkArgs};
use crate::jobs::{LogMessage, Message};
use crate::settings::WorkerSettings;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if tracing::enabled!(tracing::Level::ERROR) {
            error!(code = e.error_code(), error = %e, "kestrel-worker terminated with error");
        } else {
            eprintln!("Error [{}]: {}", e.error_code(), e);
        }
        process::exit(e.exit_code());
    }
}

async fn run() -> KestrelResult<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new(&cli.config_dir);
    if let Some(environment) = &cli.environment {
        loader = loader.with_environment(environment.clone());
    }
    let settings: WorkerSettings = loader.load()?;

    init_telemetry(&settings.telemetry)?;
    register_metrics();

    info!(version = env!("CARGO_PKG_VERSION"), environment = loader.environment(), "Starting kestrel-worker");

    let registry = Arc::new(jobs::registry()?);
    let clock = system_clock();
    let driver = connect_driver(&settings.queue, registry.clone(), clock.clone()).await?;
    let failed = connect_failed_store(&settings.queue).await?;

    match cli.command {
        Command::Work(args) => work(args, settings.queue, driver, registry, failed, clock).await,
        Command::Dispatch(args) => dispatch(args, &settings.queue, driver).await,
        Command::Size { queues } => size(queues, driver.as_ref()).await,
        Command::Clear { queue } => {
            let cleared = driver.clear(&QueueName::new(queue.clone())?).await?;
            println!("Cleared {} job(s) from {}", cleared, queue);
            Ok(())
        }
        Command::Failed(command) => {
            failed_jobs(command, FailedJobService::new(failed, driver).with_clock(clock)).await
        }
    }
}

async fn work(
    args: WorkArgs,
    mut config: QueueConfig,
    driver: Arc<dyn QueueDriver>,
    registry: Arc<JobRegistry>,
    failed: Arc<dyn FailedJobRepository>,
    clock: Arc<dyn Clock>,
) -> KestrelResult<()> {
    if !args.queues.is_empty() {
        config.worker.queues = args.queues;
    }
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
    }
    config.check()?;

    info!(jobs = ?registry.names(), "Registered jobs");

    if args.once {
        let worker = Worker::new(driver, registry, failed, &config)?.with_clock(clock);
        let mut processed = 0u64;
        while worker.run_once().await?.is_some() {
            processed += 1;
        }
        info!(processed, "Queues drained");
        return Ok(());
    }

    let pool = Arc::new(WorkerPool::with_clock(driver, registry, failed, &config, clock)?);

    let stopper = pool.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.stop();
    });

    pool.run().await?;
    Ok(())
}

async fn dispatch(args: DispatchArgs, config: &QueueConfig, driver: Arc<dyn QueueDriver>) -> KestrelResult<()> {
    let dispatcher = Dispatcher::new(driver, config.default_queue_name()?);

    let mut options = PushOptions::new();
    if let Some(queue) = args.queue {
        options = options.on_queue(QueueName::new(queue)?);
    }
    if let Some(priority) = args.priority {
        options = options.priority(JobPriority::new(priority)?);
    }

    let message = Message {
        text: args.text,
        fail_times: args.fail_times,
    };
    let id = match args.delay_secs {
        Some(secs) => {
            dispatcher
                .later(&LogMessage, &message, Duration::from_secs(secs), options)
                .await?
        }
        None => dispatcher.push(&LogMessage, &message, options).await?,
    };

    println!("{}", id);
    Ok(())
}

async fn size(queues: Vec<String>, driver: &dyn QueueDriver) -> KestrelResult<()> {
    let queues = if queues.is_empty() {
        driver.queues().await?
    } else {
        queues.into_iter().map(QueueName::new).collect::<Result<Vec<_>, _>>()?
    };

    for queue in queues {
        println!("{}\t{}", queue, driver.size(&queue).await?);
    }
    Ok(())
}

async fn failed_jobs(command: FailedCommand, service: FailedJobService) -> KestrelResult<()> {
    match command {
        FailedCommand::List { json } => {
            for job in service.all().await? {
                if json {
                    println!("{}", serde_json::to_string(&job)?);
                } else {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        job.id,
                        job.queue,
                        job.name,
                        job.attempts,
                        job.failed_at.to_rfc3339(),
                        job.exception
                    );
                }
            }
        }
        FailedCommand::Retry { ids, all } => {
            if all {
                let retried = service.retry_all().await?;
                println!("Retried {} job(s)", retried);
            } else {
                for id in ids {
                    let id = JobId::parse(&id)?;
                    service.retry(&id).await?;
                    println!("Retried {}", id);
                }
            }
        }
        FailedCommand::Forget { id } => {
            service.delete(&JobId::parse(&id)?).await?;
            println!("Forgot {}", id);
        }
        FailedCommand::Flush => {
            println!("Flushed {} job(s)", service.flush().await?);
        }
        FailedCommand::Prune { hours } => {
            let pruned = service.prune(Duration::from_secs(hours.saturating_mul(3600))).await?;
            println!("Pruned {} job(s)", pruned);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
