use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tasksync_core::config;
use tasksync_sync::{
    pipeline::{self, SinkMode},
    CycleReport, SyncOrchestrator,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, tasksync_root};
use crate::protocol::{DaemonRequest, DaemonResponse};

const LIVENESS_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

/// How the daemon was launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonOptions {
    /// Log outbound creations instead of performing them.
    pub dry_run: bool,
}

struct SyncJob {
    trigger: &'static str,
    respond_to: oneshot::Sender<Result<CycleSummary, String>>,
}

/// One finished cycle, as reported over the control socket.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub trigger: String,
    #[serde(flatten)]
    pub report: CycleReport,
    pub duration_ms: u128,
}

// ---------------------------------------------------------------------------
// Polling service
// ---------------------------------------------------------------------------

/// Cloneable handle for talking to a running [`SyncService`].
#[derive(Clone)]
pub struct ServiceHandle {
    orchestrator: Arc<SyncOrchestrator>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    poll_interval: Duration,
    started_at_unix: u64,
}

impl ServiceHandle {
    /// Queue a cycle behind whatever is running and wait for its result.
    pub async fn sync_now(&self, trigger: &'static str) -> Result<CycleSummary, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.sync_tx
            .send(SyncJob {
                trigger,
                respond_to: tx,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

        let outcome = rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
        outcome.map_err(DaemonError::Protocol)
    }

    /// Ask every task to wind down. The loop exits after the current cycle.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn status(&self) -> Value {
        let stats = self.orchestrator.stats();
        let settings = self.orchestrator.settings();
        json!({
            "running": true,
            "started_at_unix": self.started_at_unix,
            "poll_interval_secs": self.poll_interval.as_secs(),
            "source_database": settings.source_database,
            "target_database": settings.target_database,
            "assignee": settings.assignee.identity(),
            "seeded": self.orchestrator.is_seeded(),
            "stats": stats,
        })
    }
}

/// The "fetch, diff, sleep, repeat" loop with an explicit lifecycle.
///
/// Only the loop task calls [`SyncOrchestrator::run_cycle`]; ad-hoc requests
/// are queued to it, so cycles never overlap.
pub struct SyncService {
    handle: ServiceHandle,
    task: JoinHandle<Result<(), DaemonError>>,
}

impl SyncService {
    /// Spawn the polling loop. The first cycle runs immediately.
    pub fn start(orchestrator: Arc<SyncOrchestrator>, poll_interval: Duration) -> Self {
        let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(16);
        let (shutdown_tx, _) = broadcast::channel::<()>(16);

        let handle = ServiceHandle {
            orchestrator: Arc::clone(&orchestrator),
            sync_tx,
            shutdown_tx: shutdown_tx.clone(),
            poll_interval,
            started_at_unix: unix_seconds_now(),
        };

        let shutdown_rx = shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let result = polling_task(orchestrator, poll_interval, sync_rx, shutdown_rx).await;
            let _ = shutdown_tx.send(());
            result
        });

        Self { handle, task }
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<(), DaemonError> {
        handle_join("sync_service", self.task.await)
    }
}

async fn polling_task(
    orchestrator: Arc<SyncOrchestrator>,
    poll_interval: Duration,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match run_cycle(&orchestrator, "interval").await {
                    Ok(summary) => log_cycle(&summary),
                    Err(err) => tracing::error!(error = %err, "sync cycle failed"),
                }
            }
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = run_cycle(&orchestrator, job.trigger).await;
                match &outcome {
                    Ok(summary) => log_cycle(summary),
                    Err(err) => tracing::error!(error = %err, trigger = job.trigger, "sync cycle failed"),
                }
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    tracing::info!("polling loop stopped");
    Ok(())
}

/// Run one cycle on the blocking pool. A cycle that fails, including one
/// whose worker panics, is reported as `Err` and never stops the loop.
async fn run_cycle(
    orchestrator: &Arc<SyncOrchestrator>,
    trigger: &'static str,
) -> Result<CycleSummary, String> {
    let started = Instant::now();
    let worker = Arc::clone(orchestrator);
    let result = match tokio::task::spawn_blocking(move || worker.run_cycle()).await {
        Ok(result) => result,
        Err(join_err) => {
            let message = format!("sync task join error: {join_err}");
            orchestrator.record_failed_cycle(message.clone());
            return Err(message);
        }
    };

    result
        .map(|report| CycleSummary {
            trigger: trigger.to_string(),
            report,
            duration_ms: started.elapsed().as_millis(),
        })
        .map_err(|err| err.to_string())
}

fn log_cycle(summary: &CycleSummary) {
    let report = &summary.report;
    if report.seeded {
        tracing::info!(fetched = report.fetched, "seeded snapshot");
    } else if !report.ingested.is_empty() || report.outbound_failed > 0 {
        tracing::info!(
            trigger = %summary.trigger,
            fetched = report.fetched,
            ingested = report.ingested.len(),
            created = report.created,
            outbound_failed = report.outbound_failed,
            duration_ms = summary.duration_ms,
            "sync cycle completed",
        );
    } else {
        tracing::debug!(
            trigger = %summary.trigger,
            fetched = report.fetched,
            changed_ignored = report.changed_ignored,
            "no new records",
        );
    }
}

// ---------------------------------------------------------------------------
// Daemon entrypoints
// ---------------------------------------------------------------------------

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, options: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), options))
}

/// Run the polling service, liveness listener, and control socket until
/// stopped by ctrl-c or a `stop` request.
pub async fn run(home: PathBuf, options: DaemonOptions) -> Result<(), DaemonError> {
    let settings = config::load_settings_at(&home)?;
    let mode = if options.dry_run {
        SinkMode::DryRun
    } else {
        SinkMode::Live
    };
    let orchestrator = Arc::new(pipeline::build(&settings, mode)?);
    tracing::info!(
        source = %settings.source_database,
        target = %settings.target_database,
        assignee = settings.assignee.identity(),
        interval_secs = settings.poll_interval.as_secs(),
        dry_run = options.dry_run,
        "starting tasksync daemon",
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.liveness_port));
    let liveness = TcpListener::bind(addr)
        .await
        .map_err(|e| io_err(format!("tcp://{addr}"), e))?;

    let service = SyncService::start(orchestrator, settings.poll_interval);
    let handle = service.handle();

    let liveness_handle = {
        let shutdown_rx = handle.subscribe_shutdown();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = liveness_task(liveness, shutdown_rx).await;
            handle.stop();
            result
        })
    };

    let socket_handle = {
        let home = home.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = socket_server_task(home, handle.clone()).await;
            handle.stop();
            result
        })
    };

    let signal_handle = {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = handle.subscribe_shutdown();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            handle.stop();
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (service_result, liveness_result, socket_result, signal_result) = tokio::join!(
        service.join(),
        liveness_handle,
        socket_handle,
        signal_handle
    );

    service_result?;
    handle_join("liveness", liveness_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Liveness listener
// ---------------------------------------------------------------------------

/// Answer every TCP connection with a fixed `200 OK`.
async fn liveness_task(
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "liveness listener ready");
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!(error = %err, "liveness accept failed");
                        continue;
                    }
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    if let Err(err) = stream.write_all(LIVENESS_RESPONSE).await {
                        tracing::debug!(%peer, error = %err, "liveness write failed");
                    }
                    let _ = stream.shutdown().await;
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(home: PathBuf, handle: ServiceHandle) -> Result<(), DaemonError> {
    let root = tasksync_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    let mut shutdown_rx = handle.subscribe_shutdown();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, handle).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, handle: ServiceHandle) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&handle, &request).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn dispatch(handle: &ServiceHandle, request: &DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(handle.status()),
        "sync" => match handle.sync_now("socket").await {
            Ok(summary) => match serde_json::to_value(&summary) {
                Ok(value) => DaemonResponse::ok(value),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "stop" => {
            handle.stop();
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filters (default `info`); `TASKSYNC_LOG_FORMAT=json` switches
/// to one JSON object per line.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TASKSYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
