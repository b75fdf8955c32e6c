//! API server: builds the router and starts the HTTP and metrics listeners.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post, put};
use axum::Router;
use sequence_core::config::AppConfig;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{run_rest, sequence_rest, step_rest};

/// Every route plus docs and middleware, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(rest::home))
        // Operational endpoints
        .route("/api/v1/health", get(rest::health_check))
        .route("/api/v1/info", get(rest::api_info))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Sequences
        .route("/api/v1/sequences", post(sequence_rest::create_sequence))
        .route(
            "/api/v1/sequences/:id",
            get(sequence_rest::get_sequence)
                .put(sequence_rest::update_tracking)
                .delete(sequence_rest::delete_sequence),
        )
        .route("/api/v1/sequences/:id/runs", post(sequence_rest::start_run))
        // Steps
        .route(
            "/api/v1/steps",
            post(step_rest::create_step).get(step_rest::list_steps),
        )
        .route(
            "/api/v1/steps/:id",
            put(step_rest::update_step).delete(step_rest::delete_step),
        )
        // Runs
        .route(
            "/api/v1/runs/:run_id",
            get(run_rest::get_run).delete(run_rest::cancel_run),
        )
        .merge(
            SwaggerUi::new("/api/v1/docs/swagger-ui")
                .url("/api/v1/docs/openapi.json", ApiDoc::openapi()),
        )
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP server; returns once `shutdown` resolves and in-flight
    /// requests have drained.
    pub async fn start_http<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the Prometheus exporter on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.metrics.port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{call, test_app};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let (app, _) = test_app();
        let (status, body) = call(&app, Method::GET, "/api/v1/docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/v1/sequences/{id}"].is_object());
        assert!(body["paths"]["/api/v1/steps"].is_object());
    }

    #[tokio::test]
    async fn test_home_page() {
        let (app, _) = test_app();
        let (status, _) = call(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
