// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `memhubd`: the composition root. Wires the TaskQueue Repository, Hub
//! Registry, Event Bus, Worker Hub, Federation Handler, Task Dispatcher and
//! Task Service together and drives the daemon's background loops
//! (dispatcher ticker, heartbeat sweep, health sweep, periodic compaction).
//!
//! Neither the Dispatcher nor the Hub/Federation Handler hold a concrete
//! reference to each other's type (spec §9 Design Notes); this binary is
//! the only place that does, and [`sink::LazySink`] breaks the resulting
//! construction-order cycle (the Hub needs a sink before the Dispatcher
//! that serves as one can be built, since the Dispatcher needs the Hub as a
//! transport first).

mod config;
mod error;
mod null_context;
mod sink;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use error::LifecycleError;
use fs2::FileExt;
use memhub_bus::EventBus;
use memhub_core::SystemClock;
use memhub_dispatcher::{Dispatcher, DispatcherConfig};
use memhub_hub::{FederationConfig, FederationHandler, HubConfig, WorkerHub};
use memhub_service::{ServiceConfig, TaskService};
use memhub_storage::{TaskRepository, WalHubRegistry, WalTaskRepository};
use sink::LazySink;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(err) = run().await {
        tracing::error!(%err, "memhubd: fatal startup error");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = config::state_dir().ok().map(|d| d.join("logs"));

    match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let file_appender = tracing_appender::rolling::daily(dir, "memhubd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Leaked deliberately: the guard must outlive the process and
            // this binary has no other owner to hold it across `main`.
            Box::leak(Box::new(guard));
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).with_ansi(false).init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run() -> Result<(), LifecycleError> {
    let state_dir = config::state_dir()?;
    std::fs::create_dir_all(&state_dir)?;

    let lock_path = state_dir.join("memhubd.lock");
    let _lock_file = acquire_lock(&lock_path)?;

    let clock = SystemClock;

    let tasks_repo = Arc::new(WalTaskRepository::open(&state_dir.join("tasks.wal"), &state_dir.join("tasks.snapshot.zst"), clock.clone())?);
    let hub_registry = Arc::new(WalHubRegistry::open(&state_dir.join("hubs.wal"), &state_dir.join("hubs.snapshot.zst"), clock.clone())?);
    info!(dir = %state_dir.display(), "memhubd: state recovered from WAL/snapshot");

    let bus = Arc::new(EventBus::new());

    let hub_sink = Arc::new(LazySink::new());
    let federation_sink = Arc::new(LazySink::new());

    let worker_hub = WorkerHub::new(
        HubConfig {
            auth_token: config::auth_token(),
            auth_timeout: config::auth_timeout(),
            heartbeat_interval: config::heartbeat_interval(),
            max_missed_heartbeats: config::max_missed_heartbeats(),
        },
        clock.clone(),
        hub_sink.clone(),
    );
    let federation_handler = FederationHandler::new(
        FederationConfig {
            auth_token: config::auth_token(),
            auth_timeout: config::auth_timeout(),
            health_interval: config::health_interval(),
            max_missed_reports: config::max_missed_reports(),
        },
        clock.clone(),
        hub_registry.clone(),
        federation_sink.clone(),
    );

    let dispatcher = Dispatcher::new(
        DispatcherConfig { tick_interval: config::dispatcher_tick_interval(), task_timeout_ms: config::task_timeout().as_millis() as u64 },
        clock,
        tasks_repo.clone(),
        worker_hub.clone(),
        Some(federation_handler.clone()),
        Some(bus.clone()),
    );
    hub_sink.install(dispatcher.clone());
    federation_sink.install(dispatcher.clone());

    let service_config = ServiceConfig { max_pending_tasks: config::max_pending_tasks(), ..ServiceConfig::default() };
    let task_service = Arc::new(TaskService::new(
        tasks_repo.clone(),
        bus.clone(),
        Some(dispatcher.clone()),
        service_config,
        Arc::new(null_context::NullObservationRepository),
        Arc::new(null_context::NullSessionPromptRepository),
        Arc::new(null_context::NullSummaryRepository),
    ));
    // Held alive for the in-process callers (the HTTP route layer and AI
    // provider adapters are out of scope here, spec §1) that would hand
    // `queueX` requests to this instance.
    let _task_service = task_service;

    let worker_listener = bind(&format!("0.0.0.0:{}", config::worker_port())).await?;
    let federation_listener = bind(&format!("0.0.0.0:{}", config::federation_port())).await?;
    info!(worker_port = config::worker_port(), federation_port = config::federation_port(), "memhubd: listening");

    let dispatcher_task = tokio::spawn(dispatcher.clone().run());
    let worker_hub_task = tokio::spawn(worker_hub.clone().serve(worker_listener));
    let federation_task = tokio::spawn(federation_handler.clone().serve(federation_listener));
    let heartbeat_task = spawn_heartbeat_sweep(worker_hub.clone());
    let health_task = spawn_health_sweep(federation_handler.clone());
    let hub_compaction_task = spawn_hub_compaction(hub_registry.clone());
    let task_compaction_task = spawn_task_compaction(tasks_repo.clone());

    wait_for_shutdown_signal().await;
    info!("memhubd: shutdown signal received, draining");

    dispatcher.request_shutdown();
    worker_hub.broadcast_shutdown();
    federation_handler.broadcast_shutdown();

    let drain = config::drain_timeout();
    let _ = tokio::time::timeout(drain, dispatcher_task).await;
    worker_hub_task.abort();
    federation_task.abort();
    heartbeat_task.abort();
    health_task.abort();
    hub_compaction_task.abort();
    task_compaction_task.abort();

    info!("memhubd: stopped");
    Ok(())
}

async fn bind(addr: &str) -> Result<TcpListener, LifecycleError> {
    TcpListener::bind(addr).await.map_err(|e| LifecycleError::BindFailed(addr.to_string(), e))
}

fn acquire_lock(lock_path: &std::path::Path) -> Result<std::fs::File, LifecycleError> {
    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    Ok(lock_file)
}

fn spawn_heartbeat_sweep<C: memhub_core::Clock>(hub: Arc<WorkerHub<C>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            hub.sweep_heartbeats();
        }
    })
}

fn spawn_health_sweep<C: memhub_core::Clock>(federation: Arc<FederationHandler<C>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            federation.sweep_health();
        }
    })
}

fn spawn_hub_compaction<C: memhub_core::Clock>(hub_registry: Arc<WalHubRegistry<C>>) -> tokio::task::JoinHandle<()> {
    let interval_duration = config::compaction_interval();
    let state_dir = config::state_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval_duration);
        loop {
            interval.tick().await;
            if let Err(err) = hub_registry.compact(&state_dir.join("hubs.snapshot.zst")) {
                tracing::error!(%err, "memhubd: hub registry compaction failed");
            }
        }
    })
}

fn spawn_task_compaction(tasks_repo: Arc<dyn TaskRepository>) -> tokio::task::JoinHandle<()> {
    let interval_duration = config::compaction_interval();
    let state_dir = config::state_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval_duration);
        loop {
            interval.tick().await;
            if let Err(err) = tasks_repo.compact(&state_dir.join("tasks.snapshot.zst")) {
                tracing::error!(%err, "memhubd: task repository compaction failed");
            }
        }
    })
}

async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
