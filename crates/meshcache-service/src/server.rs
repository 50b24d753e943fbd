//! The node RPC surface.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::Config;
use crate::error::{ApiError, CacheError};
use crate::group;
use crate::registry;
use crate::wire::{DeleteResponse, GetResponse, RpcRequest, SetResponse};

async fn healthcheck() -> &'static str {
    crate::metric!(counter("healthcheck") += 1);
    "ok"
}

async fn rpc_get(Json(request): Json<RpcRequest>) -> Result<Json<GetResponse>, ApiError> {
    let group = group::lookup_group(&request.group)
        .ok_or_else(|| CacheError::MissingGroup(request.group.clone()))?;
    let value = group.get_bytes(&request.key).await?;
    Ok(Json(GetResponse { value }))
}

async fn rpc_set(Json(request): Json<RpcRequest>) -> Result<Json<SetResponse>, ApiError> {
    let group = group::lookup_group(&request.group)
        .ok_or_else(|| CacheError::MissingGroup(request.group.clone()))?;
    let value = request
        .value
        .ok_or_else(|| CacheError::Malformed("set request without a value".into()))?;
    group.set_bytes(&request.key, value, true).await?;
    Ok(Json(SetResponse { ok: true }))
}

async fn rpc_delete(Json(request): Json<RpcRequest>) -> Result<Json<DeleteResponse>, ApiError> {
    let group = group::lookup_group(&request.group)
        .ok_or_else(|| CacheError::MissingGroup(request.group.clone()))?;
    let ok = group.delete(&request.key, true).await?;
    Ok(Json(DeleteResponse { ok }))
}

/// Builds the RPC router served by a cache node.
pub fn rpc_router() -> Router {
    Router::new()
        .route("/rpc/get", post(rpc_get))
        .route("/rpc/set", post(rpc_set))
        .route("/rpc/delete", post(rpc_delete))
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

/// Registers with the coordinator and serves RPCs until shutdown.
///
/// The stop path mirrors the start path in reverse: the HTTP server drains
/// first, then the registration is revoked.
pub async fn serve(config: &Config) -> Result<()> {
    crate::metric!(counter("server.starting") += 1);

    let registration = registry::register(config)
        .await
        .context("registering with coordinator")?;

    let listener = tokio::net::TcpListener::bind(&config.node.addr)
        .await
        .with_context(|| format!("binding RPC listener on {}", config.node.addr))?;
    let local_addr = listener.local_addr().context("reading local addr")?;
    tracing::info!("cache node listening on {local_addr}");

    axum::serve(listener, rpc_router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving RPCs")?;

    registration.unregister().await;
    tracing::info!("node shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn rpc_request(method: &str, body: &RpcRequest) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/rpc/{method}"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_group_maps_to_not_found() {
        let app = rpc_router();
        let request = rpc_request(
            "get",
            &RpcRequest {
                group: "no-such-group".into(),
                key: "k".into(),
                value: None,
            },
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn set_without_value_is_rejected() {
        use crate::config::CacheSettings;
        use crate::group::LoaderFn;
        use crate::picker::PeerPicker;
        use futures::FutureExt;
        use std::sync::Arc;

        let loader: LoaderFn<String> = Arc::new(|_key| async { None }.boxed());
        let picker = PeerPicker::detached("meshcache-test", "127.0.0.1:0");
        group::create_group("t-rpc-set", &CacheSettings::default(), picker, loader).unwrap();

        let app = rpc_router();
        let request = rpc_request(
            "set",
            &RpcRequest {
                group: "t-rpc-set".into(),
                key: "k".into(),
                value: None,
            },
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rpc_round_trip_through_the_router() {
        use crate::config::CacheSettings;
        use crate::group::LoaderFn;
        use crate::picker::PeerPicker;
        use futures::FutureExt;
        use http_body_util::BodyExt;
        use std::sync::Arc;

        let loader: LoaderFn<String> = Arc::new(|_key| async { None }.boxed());
        let picker = PeerPicker::detached("meshcache-test", "127.0.0.1:0");
        group::create_group("t-rpc-roundtrip", &CacheSettings::default(), picker, loader).unwrap();

        let payload = serde_json::to_vec("value").unwrap();
        let set = rpc_request(
            "set",
            &RpcRequest {
                group: "t-rpc-roundtrip".into(),
                key: "k".into(),
                value: Some(payload.clone()),
            },
        );
        let response = rpc_router().oneshot(set).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let get = rpc_request(
            "get",
            &RpcRequest {
                group: "t-rpc-roundtrip".into(),
                key: "k".into(),
                value: None,
            },
        );
        let response = rpc_router().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: GetResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.value, payload);

        let delete = rpc_request(
            "delete",
            &RpcRequest {
                group: "t-rpc-roundtrip".into(),
                key: "k".into(),
                value: None,
            },
        );
        let response = rpc_router().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let miss = rpc_request(
            "get",
            &RpcRequest {
                group: "t-rpc-roundtrip".into(),
                key: "k".into(),
                value: None,
            },
        );
        let response = rpc_router().oneshot(miss).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
