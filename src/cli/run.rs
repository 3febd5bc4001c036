//! Handler for the `run` command.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use crate::adapter::{WebSocketDialer, WebSocketTransport};
use crate::cli::{load_config, RunArgs};
use crate::domain::{ConnectionAttributes, ConnectionId, RecoveryPriority};
use crate::error::Result;
use crate::infrastructure::ConnectionManager;

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub async fn execute(args: &RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref level) = args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = "json".to_string();
    }
    config.validate()?;
    config.init_logging();

    info!(
        max_connections = config.registry.max_connections,
        recovery = config.recovery.enabled,
        diagnostics = config.diagnostics.enabled,
        "lifeline starting"
    );

    let manager = ConnectionManager::new(config)?;
    manager.start();

    for (index, url) in args.connect.iter().enumerate() {
        connect_upstream(&manager, index, url).await;
    }

    let period = Duration::from_secs(args.report_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => report(&manager),
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.close().await;
    info!("lifeline stopped");
    Ok(())
}

async fn connect_upstream(manager: &ConnectionManager, index: usize, url: &str) {
    let id = ConnectionId::new(format!("upstream-{index}"));
    let transport = match WebSocketTransport::connect(url, None).await {
        Ok(transport) => transport,
        Err(e) => {
            error!(connection_id = %id, url = %url, error = %e, "Initial connect failed");
            return;
        }
    };

    let admitted = manager.register_outbound(
        id.clone(),
        Arc::new(transport),
        ConnectionAttributes::new("1.0"),
        Arc::new(WebSocketDialer::new(url)),
        RecoveryPriority::Normal,
    );
    if !admitted {
        warn!(connection_id = %id, url = %url, "Upstream connection rejected");
    }
}

fn report(manager: &ConnectionManager) {
    let health = manager.aggregate_health();
    let metrics = manager.metrics_snapshot();
    let recovery = manager.recovery_metrics();

    info!(
        status = %health.status,
        connections = health.total_connections,
        healthy = health.healthy_connections,
        average_score = health.average_score,
        average_latency_ms = health.average_latency.as_millis() as u64,
        messages_sent = metrics.messages.sent,
        messages_received = metrics.messages.received,
        errors = metrics.errors.total,
        recoveries = recovery.total_recoveries,
        recovery_queue = recovery.queue_length,
        "Connection report"
    );
}
