//! vmplace scheduler service.
//!
//! Runs one [`Scheduler`] against a Proxmox VE cluster and exposes its entry
//! points over HTTP.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - 200 while the scheduling worker runs, 503 otherwise
//!
//! ## Placement
//! - `POST /v1/qemu` - Place and create a virtual machine
//! - `POST /v1/select/node` - Choose a node without creating anything
//! - `POST /v1/select/vmid` - Choose a VMID without creating anything

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vmplace_backend::{ProxmoxClient, VmCreateSpec, VmId};
use vmplace_scheduler::framework::RawHints;
use vmplace_scheduler::{
    Manager, Scheduler, SchedulerError, SchedulerOptions, SchedulingHints, ServiceConfig,
    VmRequest,
};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    scheduler: Scheduler,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "vmplace-scheduler",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.scheduler.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "scheduler stopped")
    }
}

// ============================================================================
// Placement Endpoints
// ============================================================================

/// Request body shared by the placement endpoints.
#[derive(Debug, Deserialize)]
struct PlacementBody {
    /// The virtual machine to place.
    spec: VmCreateSpec,
    /// Optional placement hints.
    #[serde(default)]
    hints: RawHints,
}

impl PlacementBody {
    fn into_request(self) -> Result<VmRequest, SchedulerError> {
        Ok(VmRequest::new(self.spec).with_hints(SchedulingHints::try_from(self.hints)?))
    }
}

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

fn error_response(e: &SchedulerError) -> Response {
    let code = e.http_status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse {
            error: e.to_string(),
            code,
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct NodeResponse {
    node: String,
}

#[derive(Debug, Serialize)]
struct VmIdResponse {
    vmid: VmId,
}

/// Place and create a virtual machine.
///
/// POST /v1/qemu
async fn create_qemu_handler(
    State(state): State<AppState>,
    Json(body): Json<PlacementBody>,
) -> Response {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };
    let name = request.spec.name.clone();

    // Dropping the handler (client disconnect) cancels the request.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.scheduler.create_qemu(cancel, request).await {
        Ok(result) => {
            tracing::info!(
                vm = %name,
                node = %result.node(),
                vmid = %result.vmid(),
                "Created virtual machine via HTTP API"
            );
            (StatusCode::CREATED, Json(result)).into_response()
        }
        Err(e) => {
            tracing::error!(vm = %name, error = %e, "Failed to create virtual machine");
            error_response(&e)
        }
    }
}

/// Choose a node for a virtual machine.
///
/// POST /v1/select/node
async fn select_node_handler(
    State(state): State<AppState>,
    Json(body): Json<PlacementBody>,
) -> Response {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.scheduler.select_node(&cancel, &request).await {
        Ok(node) => Json(NodeResponse { node }).into_response(),
        Err(e) => {
            tracing::warn!(vm = %request.spec.name, error = %e, "Node selection failed");
            error_response(&e)
        }
    }
}

/// Choose a VMID for a virtual machine.
///
/// POST /v1/select/vmid
async fn select_vmid_handler(
    State(state): State<AppState>,
    Json(body): Json<PlacementBody>,
) -> Response {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.scheduler.select_vmid(&cancel, &request).await {
        Ok(vmid) => Json(VmIdResponse { vmid }).into_response(),
        Err(e) => {
            tracing::warn!(vm = %request.spec.name, error = %e, "VMID selection failed");
            error_response(&e)
        }
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Placement
        .route("/v1/qemu", post(create_qemu_handler))
        .route("/v1/select/node", post(select_node_handler))
        .route("/v1/select/vmid", post(select_vmid_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vmplace=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vmplace scheduler");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        proxmox_url = %config.proxmox.url,
        plugin_config = ?config.plugin_config,
        timeout = ?config.timeout,
        "Loaded service configuration"
    );

    let manager = Manager::from_path(config.plugin_config.as_deref())?
        .with_span(tracing::info_span!("vmplace_scheduler", cluster = %config.proxmox.url));
    let backend = Arc::new(ProxmoxClient::new(config.proxmox.clone())?);

    let mut options = SchedulerOptions::new();
    if let Some(timeout) = config.timeout {
        options = options.with_timeout(timeout);
    }

    let scheduler = manager.scheduler(backend, options);
    scheduler.run_async()?;
    tracing::info!("Started scheduling worker");

    let app = create_router(AppState {
        scheduler: scheduler.clone(),
    });

    // Start server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    tracing::info!("Scheduler stopped");

    Ok(())
}
