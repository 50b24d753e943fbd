//! The external HTTP gateway.
//!
//! A stateless router in front of the cluster: it keeps its own hash ring of
//! cache nodes, refreshed by polling the coordinator, and forwards each
//! request to the node owning the key.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use etcd_client::{Client, GetOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{ApiError, CacheError};
use crate::peer::PeerClient;
use crate::ring::HashRing;

/// Membership view shared between the router and the discovery loop.
pub struct GatewayState {
    ring: HashRing,
    clients: RwLock<std::collections::HashMap<String, Arc<PeerClient>>>,
}

impl GatewayState {
    fn new() -> Self {
        GatewayState {
            ring: HashRing::default(),
            clients: RwLock::default(),
        }
    }

    fn client_for(&self, key: &str) -> Result<Arc<PeerClient>, CacheError> {
        let node = self
            .ring
            .get(key)
            .ok_or_else(|| CacheError::PeerUnavailable("no cache nodes available".into()))?;
        self.clients
            .read()
            .get(&node)
            .cloned()
            .ok_or(CacheError::PeerUnavailable(node))
    }

    /// Brings the ring and client map in line with the listed membership:
    /// new members are added, departed members dropped.
    fn reconcile(&self, members: &HashSet<String>) {
        for addr in members {
            if !self.ring.contains(addr) {
                self.ring.add(addr);
                self.clients
                    .write()
                    .insert(addr.clone(), Arc::new(PeerClient::new(addr)));
                tracing::info!(addr, "discovered cache node");
            }
        }
        let known: Vec<String> = self.clients.read().keys().cloned().collect();
        for addr in known {
            if !members.contains(&addr) {
                self.ring.remove(&addr);
                self.clients.write().remove(&addr);
                tracing::info!(addr = %addr, "dropping departed cache node");
            }
        }
    }
}

/// `POST /{group}/{key}` request body.
#[derive(Debug, Deserialize)]
struct SetBody {
    value: Value,
}

/// Response body mirroring the routed request.
#[derive(Debug, Serialize)]
struct KeyResponse {
    group: String,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

async fn get_value(
    State(state): State<Arc<GatewayState>>,
    Path((group, key)): Path<(String, String)>,
) -> Result<Json<KeyResponse>, ApiError> {
    let client = state.client_for(&key)?;
    let bytes = client
        .get(&group, &key)
        .await?
        .ok_or(CacheError::MissingKey)?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|err| CacheError::Malformed(format!("undecodable group value: {err}")))?;
    Ok(Json(KeyResponse {
        group,
        key,
        value: Some(value),
    }))
}

async fn set_value(
    State(state): State<Arc<GatewayState>>,
    Path((group, key)): Path<(String, String)>,
    Json(body): Json<SetBody>,
) -> Result<Json<KeyResponse>, ApiError> {
    let client = state.client_for(&key)?;
    let bytes = serde_json::to_vec(&body.value)
        .map_err(|err| CacheError::Malformed(err.to_string()))?;
    client.set(&group, &key, bytes).await?;
    Ok(Json(KeyResponse {
        group,
        key,
        value: Some(body.value),
    }))
}

async fn delete_value(
    State(state): State<Arc<GatewayState>>,
    Path((group, key)): Path<(String, String)>,
) -> Result<Json<KeyResponse>, ApiError> {
    let client = state.client_for(&key)?;
    client.delete(&group, &key).await?;
    Ok(Json(KeyResponse {
        group,
        key,
        value: None,
    }))
}

async fn healthcheck() -> &'static str {
    "ok"
}

/// Builds the gateway router over the given membership view.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            "/{group}/{key}",
            get(get_value).post(set_value).delete(delete_value),
        )
        .with_state(state)
        .route("/healthcheck", get(healthcheck))
}

/// Runs the gateway: starts the membership poll and serves HTTP until
/// shutdown.
pub async fn run(config: &Config) -> Result<()> {
    let state = Arc::new(GatewayState::new());

    let client = Client::connect(&config.coordinator.endpoints, None)
        .await
        .context("connecting to coordinator")?;
    let prefix = format!("{}/", config.service_name);
    tokio::spawn(discovery_loop(
        client,
        Arc::clone(&state),
        prefix,
        config.coordinator.poll_interval,
    ));

    let listener = tokio::net::TcpListener::bind(&config.gateway.bind)
        .await
        .with_context(|| format!("binding gateway listener on {}", config.gateway.bind))?;
    let local_addr = listener.local_addr().context("reading local addr")?;
    tracing::info!("gateway listening on {local_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving gateway requests")?;
    tracing::info!("gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("received shutdown signal");
}

/// Polls the coordinator for the member list on a fixed cadence.
///
/// A failed poll keeps the previous membership; the gateway prefers serving
/// with a stale view over refusing traffic.
async fn discovery_loop(
    mut client: Client,
    state: Arc<GatewayState>,
    prefix: String,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match client
            .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await
        {
            Ok(response) => {
                let members: HashSet<String> = response
                    .kvs()
                    .iter()
                    .filter_map(|kv| kv.key_str().ok())
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .map(str::to_owned)
                    .collect();
                state.reconcile(&members);
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to list cache members, keeping last view");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn routing_without_members_is_an_internal_error() {
        let state = Arc::new(GatewayState::new());
        let request = Request::builder()
            .uri("/names/Tom")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn malformed_set_body_is_a_bad_request() {
        let state = Arc::new(GatewayState::new());
        state.reconcile(&HashSet::from(["127.0.0.1:1".to_owned()]));
        let request = Request::builder()
            .method("POST")
            .uri("/names/Tom")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn reconcile_adds_and_drops_members() {
        let state = GatewayState::new();
        state.reconcile(&HashSet::from(["a:1".to_owned(), "b:1".to_owned()]));
        assert_eq!(state.ring.node_count(), 2);
        assert!(state.clients.read().contains_key("a:1"));

        // A repeated identical poll is a no-op.
        state.reconcile(&HashSet::from(["a:1".to_owned(), "b:1".to_owned()]));
        assert_eq!(state.ring.node_count(), 2);

        // Node b departs.
        state.reconcile(&HashSet::from(["a:1".to_owned()]));
        assert_eq!(state.ring.node_count(), 1);
        assert!(!state.clients.read().contains_key("b:1"));
    }

    #[test]
    fn client_selection_follows_the_ring() {
        let state = GatewayState::new();
        state.reconcile(&HashSet::from(["a:1".to_owned(), "b:1".to_owned()]));
        let owner = state.ring.get("some-key").unwrap();
        let client = state.client_for("some-key").unwrap();
        assert_eq!(client.addr(), owner);
    }
}
