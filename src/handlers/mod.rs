//! Broker API handlers.
//!
//! Each handler takes the shared [`AppState`] plus already-extracted
//! request parts and returns `Result<Response, BrokerError>`; the axum
//! glue lives in [`crate::server`].

pub mod binding;
pub mod catalog;
pub mod instance;

use std::sync::Arc;

use tracing::debug;

use crate::AppState;

/// Publish the current instance and binding counts after a mutation.
///
/// Store errors leave the gauges stale.
pub(crate) async fn refresh_inventory(state: &Arc<AppState>) {
    let instances = state.store.list_instances().await;
    let bindings = state.store.list_bindings().await;
    match (instances, bindings) {
        (Ok(instances), Ok(bindings)) => {
            crate::metrics::update_inventory(instances.len(), bindings.len())
        }
        (Err(e), _) | (_, Err(e)) => debug!("Skipping inventory refresh: {}", e),
    }
}
