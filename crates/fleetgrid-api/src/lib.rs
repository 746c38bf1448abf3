//! fleetgrid-api — REST API for a running cluster.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/instances` | Durable instance set |
//! | GET | `/api/v1/capacity` | Live pool count and unreserved resources |
//! | GET | `/api/v1/status` | Grower status |
//! | POST | `/api/v1/allocations` | Allocate capacity, growing the cluster if needed |
//! | DELETE | `/api/v1/allocations/{id}` | Release an allocation |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use fleetgrid_cluster::Cluster;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub cluster: Arc<Cluster>,
}

/// Build the API router.
pub fn build_router(cluster: Arc<Cluster>) -> Router {
    let api_state = ApiState { cluster };

    let api_routes = Router::new()
        .route("/instances", get(handlers::list_instances))
        .route("/capacity", get(handlers::get_capacity))
        .route("/status", get(handlers::get_status))
        .route("/allocations", post(handlers::create_allocation))
        .route("/allocations/{id}", delete(handlers::delete_allocation))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
