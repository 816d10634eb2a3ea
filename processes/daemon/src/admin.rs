//! HTTP admin façade: the process-wide singleton spec §9 describes,
//! constructed once at program entry and handed the health registry and
//! every plugin's API routes rather than living as ambient global state.
//! Grounded on `caryatid_module_rest_server`'s route-registration shape,
//! reimplemented directly over `axum` since that module itself is dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use relay_pipeline::{ApiRoute, HealthRegistry};
use tracing::info;

async fn healthcheck(health: Arc<HealthRegistry>) -> impl IntoResponse {
    if health.all_running().await {
        (StatusCode::OK, Json(serde_json::json!({ "failed": false })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "failed": true,
                "reason": "one or more registered plugins are not running",
            })),
        )
    }
}

pub fn build_router(health: Arc<HealthRegistry>, plugin_routes: Vec<ApiRoute>) -> Router {
    let mut router = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/healthcheck", get(move || healthcheck(health.clone())));

    for route in plugin_routes {
        let path = format!("/v1{}", route.path);
        router = router.route(&path, route.method_router);
    }

    router
}

/// Binds and serves the admin façade until the process exits; spawned as
/// its own task so a slow or stuck HTTP client never holds up the pipeline.
pub async fn serve(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
    info!(%addr, "admin façade listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthcheck_reports_ok_with_no_tracked_plugins() {
        let health = Arc::new(HealthRegistry::new());
        let response = healthcheck(health).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
