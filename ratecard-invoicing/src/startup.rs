//! Application startup and lifecycle management.

use crate::config::InvoicingConfig;
use crate::models::Tenant;
use crate::services::{
    get_metrics, init_metrics, record_error, Database, HttpExtractor, InvoicingService, MemoryStore,
    SmtpMailer, Store, TextRenderer,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn Store>,
}

/// Liveness endpoint for Docker/K8s.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "ratecard-invoicing",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "ratecard-invoicing",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness endpoint for K8s.
async fn readiness_check(State(state): State<HealthState>) -> Result<StatusCode, AppError> {
    state.store.health_check().await?;
    Ok(StatusCode::OK)
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Run the recurrence tick forever on a fixed interval.
async fn run_recurrence(service: Arc<InvoicingService>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let today = Utc::now().date_naive();
        if let Err(e) = service.run_recurrence_tick(today).await {
            record_error(&e);
            tracing::error!(error = %e, "Recurrence tick failed");
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    tick_interval: Option<Duration>,
    tenant: Tenant,
    service: Arc<InvoicingService>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn Store> = if config.uses_database() {
            let db = Database::new(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                e
            })?;
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
            Arc::new(db)
        } else {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        };

        let extractor = HttpExtractor::new(
            &config.extraction.endpoint,
            Duration::from_secs(config.extraction.timeout_secs),
        )?;
        let mailer = SmtpMailer::new(config.smtp.clone())?;
        let service = Arc::new(InvoicingService::new(
            store,
            Arc::new(extractor),
            Arc::new(TextRenderer),
            Arc::new(mailer),
        ));

        let tenant = service
            .provision_tenant(&config.bootstrap.tenant_email, &config.bootstrap.business_name)
            .await?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let tick_interval = match config.recurrence.tick_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        tracing::info!(
            http_port = http_port,
            tenant_id = %tenant.tenant_id,
            recurrence_enabled = tick_interval.is_some(),
            "Invoicing listeners bound"
        );

        Ok(Self {
            http_port,
            http_listener,
            tick_interval,
            tenant,
            service,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Tenant provisioned at startup.
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn service(&self) -> Arc<InvoicingService> {
        self.service.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            store: self.service.store().clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        if let Some(every) = self.tick_interval {
            tokio::spawn(run_recurrence(self.service.clone(), every));
        }

        tracing::info!(
            service = "ratecard-invoicing",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, http_router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
