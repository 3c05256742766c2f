use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use replisync_api::{ApiState, build_router};
use replisync_core::ControllerConfig;
use replisync_core::config::SignalKind;
use replisync_membership::{HttpAdminClient, MembershipProtocol};
use replisync_orchestrator::KubeScaleClient;
use replisync_policy::{ManualSignal, NoSignal, OscillatingSignal, ScaleSignal};
use replisync_reconciler::{Reconciler, ReconcilerSettings};

fn load(path: &Path) -> anyhow::Result<ControllerConfig> {
    ControllerConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

pub fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn signal_from_config(config: &ControllerConfig) -> Arc<dyn ScaleSignal> {
    match config.signal.kind {
        SignalKind::None => Arc::new(NoSignal),
        SignalKind::Manual => Arc::new(ManualSignal::new()),
        SignalKind::Oscillate => Arc::new(OscillatingSignal::new(config.signal.period_ticks)),
    }
}

pub async fn run(path: &Path, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let config = load(path)?;
    let settings = ReconcilerSettings::from_config(&config)?;
    let interval = config.reconcile.tick_interval()?;
    let call_timeout = settings.retry.call_timeout;

    info!(
        workload = %config.workload.name,
        namespace = %config.workload.namespace,
        group = %config.group.id,
        floor = settings.floor,
        "replisyncd starting"
    );

    // ── Clients ────────────────────────────────────────────────

    let orchestrator = Arc::new(KubeScaleClient::from_config(&config, call_timeout)?);
    let admin = Arc::new(HttpAdminClient::new(
        &config.membership.admin_url,
        &config.group.id,
        call_timeout,
    )?);
    info!(admin_url = %config.membership.admin_url, "membership client configured");
    let membership = MembershipProtocol::new(admin, settings.retry.clone());
    let signal = signal_from_config(&config);

    // ── Reconciler ─────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(16);

    let mut reconciler = Reconciler::new(
        orchestrator,
        membership,
        signal,
        settings,
        shutdown_rx.clone(),
    );
    let api_state = ApiState {
        status: reconciler.subscribe(),
        commands: command_tx,
    };

    let reconciler_handle = tokio::spawn(async move {
        reconciler.run(interval, command_rx).await;
    });

    // ── Operator API ───────────────────────────────────────────

    let addr = match listen {
        Some(addr) => addr,
        None => config.api_listen()?,
    };
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind operator API on {addr}"))?;
    info!(%addr, "operator API listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, build_router(api_state)).with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });
    let server_handle = tokio::spawn(async move { server.await });

    // ── Shutdown ───────────────────────────────────────────────

    shutdown_signal().await?;
    let _ = shutdown_tx.send(true);

    if let Err(e) = reconciler_handle.await {
        warn!(error = %e, "reconciler task ended abnormally");
    }
    server_handle.await??;

    info!("replisyncd stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind as UnixSignal, signal};

        let mut terminate = signal(UnixSignal::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn signal_kind_selects_signal() {
        let mut config = ControllerConfig::from_toml("[workload]\nname = \"mongo\"\n").unwrap();

        config.signal.kind = SignalKind::None;
        assert!(!signal_from_config(&config).request(1));

        config.signal.kind = SignalKind::Manual;
        let signal = signal_from_config(&config);
        assert!(signal.request(1));
        assert_eq!(signal.next_step(), 1);

        config.signal.kind = SignalKind::Oscillate;
        config.signal.period_ticks = 1;
        let signal = signal_from_config(&config);
        assert_eq!((signal.next_step(), signal.next_step()), (1, -1));
    }

    #[test]
    fn load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[group]\nfloor = 0").unwrap();

        let err = load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains(&file.path().display().to_string()));
    }
}
