//! Server orchestration -- assembly, reload loop, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `airscan-daemon`.
//! It owns everything that outlives a single scanner set: the device
//! backend, the mDNS responder, the access log and the control channel.
//!
//! # Server cycle
//!
//! ```text
//! ┌─▶ bind HTTP listener
//! │   enumerate scanners (+ announce)
//! │   spawn purge task, hotplug watcher, HTTP server
//! │   wait for TerminationReason
//! │   stop server, withdraw announcements, cancel jobs
//! └── ReloadRequested
//!     ShutdownRequested ──▶ Ok(())
//!     Fault ──▶ Err
//! ```
//!
//! Reload triggers: `POST /reset`, hotplug changes, `SIGHUP`.
//! Shutdown triggers: `SIGTERM`, `SIGINT`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use airscan_core::config::AirscanConfig;
use airscan_core::error::{AirscanError, ConfigError};
use airscan_core::metrics as m;
use airscan_escl::{
    ControlHandle, ControlReceiver, DeviceBackend, RegistryOptions, Router, ScannerRegistry,
    ServicePublisher, SimulatedBackend, TerminationReason, control_channel,
};
use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::access_log::AccessLog;
use crate::announce::MdnsPublisher;
use crate::{hotplug, metrics_server, transport};

/// How long a stopping HTTP server may take to drain connections.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Load configuration from `path` and apply environment overrides.
///
/// With `allow_missing`, a missing file yields the built-in defaults
/// (still subject to environment overrides).
pub async fn load_config(path: &Path, allow_missing: bool) -> Result<AirscanConfig> {
    match AirscanConfig::load(path).await {
        Ok(config) => Ok(config),
        Err(AirscanError::Config(ConfigError::FileNotFound { .. })) if allow_missing => {
            let mut config = AirscanConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to load config {}: {}",
            path.display(),
            e
        )),
    }
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: AirscanConfig,
    backend: Arc<dyn DeviceBackend>,
    publisher: Option<Arc<MdnsPublisher>>,
    access_log: Arc<AccessLog>,
    control: ControlHandle,
    control_rx: ControlReceiver,
    /// Signals process-lifetime background tasks.
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path, false).await?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration, serving the configured
    /// `[[devices]]` through the simulated backend.
    pub async fn build_from_config(config: AirscanConfig) -> Result<Self> {
        let backend: Arc<dyn DeviceBackend> =
            Arc::new(SimulatedBackend::new(config.devices.clone()));
        Self::build_with_backend(config, backend)
    }

    /// Build around an explicit device backend.
    pub fn build_with_backend(
        config: AirscanConfig,
        backend: Arc<dyn DeviceBackend>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_build_info();
        }

        if config.devices.is_empty() {
            tracing::warn!("no [[devices]] configured, no scanners will be shared");
        }

        let publisher = if config.server.mdns_announce {
            match MdnsPublisher::new(&config.server.interface, config.server.listen_port) {
                Ok(publisher) => Some(Arc::new(publisher)),
                Err(e) => {
                    tracing::warn!(error = %e, "mDNS unavailable, scanners will not be announced");
                    None
                }
            }
        } else {
            None
        };

        let access_log = Arc::new(AccessLog::open(&config.server.access_log)?);
        let (control, control_rx) = control_channel();
        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            devices = config.devices.len(),
            mdns = publisher.is_some(),
            hotplug = config.server.hotplug,
            access_log = access_log.is_enabled(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            backend,
            publisher,
            access_log,
            control,
            control_rx,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Handle for requesting reloads or shutdown from outside the loop.
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn config(&self) -> &AirscanConfig {
        &self.config
    }

    /// Serve until a shutdown is requested.
    ///
    /// Writes the PID file first and removes it on every exit path after it
    /// was written.
    pub async fn run(&mut self) -> Result<()> {
        let pid_path = (!self.config.general.pid_file.is_empty())
            .then(|| PathBuf::from(&self.config.general.pid_file));
        if let Some(path) = &pid_path {
            write_pid_file(path)?;
        }

        let result = self.run_cycles().await;

        if let Some(publisher) = &self.publisher {
            publisher.shutdown();
        }
        if let Some(path) = &pid_path {
            remove_pid_file(path);
        }
        result
    }

    async fn run_cycles(&mut self) -> Result<()> {
        let mut background = vec![spawn_signal_forwarder(
            self.control.clone(),
            self.shutdown_tx.subscribe(),
        )?];
        if self.config.metrics.enabled {
            background.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        let result = self.serve_until_shutdown().await;

        let _ = self.shutdown_tx.send(());
        for task in background {
            let _ = task.await;
        }
        result
    }

    async fn serve_until_shutdown(&mut self) -> Result<()> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.config.server.listen_addr, self.config.server.listen_port
        )
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;

        let mut generation: u64 = 0;
        loop {
            generation += 1;
            let reason = self.serve_cycle(addr, generation).await?;
            match reason {
                TerminationReason::ReloadRequested => {
                    // reload requests queued while this cycle wound down are satisfied
                    // by the reload about to happen
                    match self.control_rx.drain_reloads() {
                        Some(TerminationReason::ShutdownRequested) => return Ok(()),
                        Some(TerminationReason::Fault(reason)) => {
                            return Err(anyhow::anyhow!("server fault: {}", reason));
                        }
                        _ => tracing::info!(generation, "reloading scanners"),
                    }
                }
                TerminationReason::ShutdownRequested => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                TerminationReason::Fault(reason) => {
                    return Err(anyhow::anyhow!("server fault: {}", reason));
                }
            }
        }
    }

    /// One registry generation: enumerate, serve, tear down.
    async fn serve_cycle(&mut self, addr: SocketAddr, generation: u64) -> Result<TerminationReason> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

        let server_config = &self.config.server;
        let local_only = server_config.local_scanners_only;
        let options = RegistryOptions {
            local_only,
            transfer_chunk_size: server_config.transfer_chunk_size,
        };
        let backend = Arc::clone(&self.backend);
        let publisher = self.publisher.clone();
        let (registry, baseline) = tokio::task::spawn_blocking(move || {
            let baseline = hotplug::device_snapshot(backend.as_ref(), local_only);
            let publisher = publisher.as_deref().map(|p| p as &dyn ServicePublisher);
            let registry = ScannerRegistry::enumerate(backend, publisher, &options);
            (registry, baseline)
        })
        .await
        .map_err(|e| anyhow::anyhow!("scanner enumeration task failed: {}", e))?;
        let registry = Arc::new(registry);
        if registry.is_empty() {
            tracing::warn!(generation, "no scanners available");
        }

        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(purge_jobs_periodically(
            Arc::clone(&registry),
            Duration::from_secs(server_config.purge_interval_secs),
            Duration::from_secs(server_config.job_max_age_secs),
            cancel.clone(),
        ))];
        if server_config.hotplug {
            tasks.push(tokio::spawn(hotplug::watch(
                Arc::clone(&self.backend),
                local_only,
                baseline,
                Duration::from_secs(server_config.hotplug_poll_interval_secs),
                self.control.clone(),
                cancel.clone(),
            )));
        }

        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            self.control.clone(),
            server_config.cross_origin.clone(),
        ));
        let app = transport::app(router, Arc::clone(&self.access_log));
        let mut server = tokio::spawn(transport::serve(listener, app, cancel.clone()));

        tracing::info!(generation, scanners = registry.len(), "server cycle started");

        let (reason, server_done) = tokio::select! {
            reason = self.control_rx.recv() => (reason, false),
            result = &mut server => {
                let reason = match result {
                    Ok(Ok(())) => "HTTP server exited".to_owned(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => format!("HTTP server task failed: {}", e),
                };
                (TerminationReason::Fault(reason), true)
            }
        };
        tracing::info!(generation, reason = ?reason, "server cycle ending");

        // cancelling jobs first ends in-flight document streams
        cancel.cancel();
        registry.shutdown();
        if !server_done {
            match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "HTTP server stopped with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server task failed"),
                Err(_) => {
                    tracing::warn!("HTTP server did not drain in time, aborting");
                    server.abort();
                }
            }
        }
        for task in tasks {
            let _ = task.await;
        }

        Ok(reason)
    }
}

/// Removes expired terminal jobs until `cancel` fires.
async fn purge_jobs_periodically(
    registry: Arc<ScannerRegistry>,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = registry.purge_all(max_age);
                if purged > 0 {
                    tracing::debug!(purged, "expired jobs purged");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Translate OS signals into control requests.
///
/// `SIGHUP` requests a reload; `SIGTERM` and `SIGINT` request shutdown.
fn spawn_signal_forwarder(
    control: ControlHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("failed to install SIGHUP handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!(signal = "SIGHUP", "reload signal received");
                    metrics::counter!(m::DAEMON_RELOADS_TOTAL, m::LABEL_REASON => "signal")
                        .increment(1);
                    control.request_reload();
                }
                _ = sigterm.recv() => {
                    tracing::info!(signal = "SIGTERM", "shutdown signal received");
                    control.request_shutdown();
                }
                _ = sigint.recv() => {
                    tracing::info!(signal = "SIGINT", "shutdown signal received");
                    control.request_shutdown();
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("signal forwarder shutting down");
                    break;
                }
            }
        }
    }))
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file
/// - Verifies the created file is a regular file
/// - Creates the parent directory with permissions 0o700, the file with 0o600
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failures are logged, not returned.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Build info gauge (always 1, with version label).
fn record_build_info() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Periodically update the uptime gauge.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
