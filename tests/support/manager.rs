use std::sync::Arc;

use lifeline::domain::{AlertKind, ConnectionId, RecoveryPriority};
use lifeline::testkit::{config, domain, transport::MockTransport, transport::ScriptedDialer};
use lifeline::ConnectionManager;

/// A started manager with fast test timings.
pub fn started(max_connections: usize) -> ConnectionManager {
    let manager = ConnectionManager::new(config::manager(max_connections)).expect("valid config");
    manager.start();
    manager
}

/// Register an inbound connection backed by `transport`.
pub fn admit(manager: &ConnectionManager, id: &str, transport: &Arc<MockTransport>) -> ConnectionId {
    let id = domain::connection_id(id);
    assert!(manager.register_connection(id.clone(), transport.clone(), domain::attributes()));
    id
}

/// Register an outbound connection that `dialer` can re-establish.
pub fn admit_outbound(
    manager: &ConnectionManager,
    id: &str,
    transport: &Arc<MockTransport>,
    dialer: &Arc<ScriptedDialer>,
) -> ConnectionId {
    let id = domain::connection_id(id);
    assert!(manager.register_outbound(
        id.clone(),
        transport.clone(),
        domain::attributes(),
        dialer.clone(),
        RecoveryPriority::Normal,
    ));
    id
}

pub fn alert_kinds(manager: &ConnectionManager) -> Vec<AlertKind> {
    manager.alerts().into_iter().map(|alert| alert.kind).collect()
}
