//! REST API handlers.
//!
//! Each handler calls into the shared `Cluster` and returns JSON responses.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;

use fleet_core::{Labels, LiveInstance, Requirements, Resources};
use fleetgrid_cluster::ClusterError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn cluster_error_status(e: &ClusterError) -> StatusCode {
    match e {
        ClusterError::ResourcesExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
        ClusterError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ClusterError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::Pool(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/instances
pub async fn list_instances(State(state): State<ApiState>) -> impl IntoResponse {
    match state.cluster.instances().await {
        Ok(set) => {
            let instances: Vec<LiveInstance> = set.into_values().collect();
            ApiResponse::ok(instances).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Capacity ───────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CapacityResponse {
    /// Number of live pools.
    pub pools: usize,
    pub available: Resources,
}

/// GET /api/v1/capacity
pub async fn get_capacity(State(state): State<ApiState>) -> impl IntoResponse {
    match state.cluster.available().await {
        Ok(available) => ApiResponse::ok(CapacityResponse {
            pools: state.cluster.size(),
            available,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.cluster.status())
}

// ── Allocations ────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub min: Resources,
    /// Defaults to `min`.
    #[serde(default)]
    pub max: Option<Resources>,
    #[serde(default)]
    pub labels: Labels,
    /// Give up after this many seconds. Without it the request waits until
    /// capacity is found.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// POST /api/v1/allocations
pub async fn create_allocation(
    State(state): State<ApiState>,
    Json(body): Json<AllocationRequest>,
) -> impl IntoResponse {
    let max = body.max.unwrap_or_else(|| body.min.clone());
    let req = Requirements::new(body.min, max);

    let outcome = match body.timeout_secs {
        Some(secs) => {
            let deadline = tokio::time::sleep(Duration::from_secs(secs));
            state.cluster.allocate_until(&req, &body.labels, deadline).await
        }
        None => state.cluster.allocate(&req, &body.labels).await,
    };

    match outcome {
        Ok(alloc) => (StatusCode::CREATED, ApiResponse::ok(alloc)).into_response(),
        Err(e) => {
            if !matches!(e, ClusterError::Cancelled | ClusterError::ResourcesExhausted { .. }) {
                warn!(requirements = %req, error = %e, "allocation failed");
            }
            error_response(&e.to_string(), cluster_error_status(&e)).into_response()
        }
    }
}

/// DELETE /api/v1/allocations/:id
pub async fn delete_allocation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.cluster.free(&id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({"freed": id})).into_response(),
        Err(e) => error_response(&e.to_string(), cluster_error_status(&e)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use axum::body::to_bytes;
    use fleet_core::{CPU, ClusterConfig, FleetConfig, InstanceShape};
    use fleetgrid_cluster::Cluster;
    use fleetgrid_placement::Catalog;
    use fleetgrid_pool::LocalConnector;
    use fleetgrid_provider::SimProvider;
    use fleetgrid_state::StateStore;

    fn test_state() -> ApiState {
        let config = FleetConfig {
            cluster: ClusterConfig {
                max_instances: 2,
                region: "us-west-2".to_string(),
                security_group: "sg-test".to_string(),
                image: "ami-test".to_string(),
                disk_type: "gp3".to_string(),
                disk_space_gib: 50,
                ..ClusterConfig::default()
            },
            timing: Default::default(),
        };
        let catalog = Catalog::new(vec![InstanceShape {
            instance_type: "quad".to_string(),
            resources: Resources::new().with(CPU, 4.0),
            prices: BTreeMap::from([("us-west-2".to_string(), 0.2)]),
            spot_eligible: true,
        }]);
        let cluster = Cluster::start(
            &config,
            &catalog,
            Arc::new(SimProvider::new()),
            Arc::new(LocalConnector),
            StateStore::open_in_memory().unwrap(),
        )
        .unwrap();
        ApiState {
            cluster: Arc::new(cluster),
        }
    }

    fn request(min_cpu: f64, timeout_secs: Option<u64>) -> AllocationRequest {
        AllocationRequest {
            min: Resources::new().with(CPU, min_cpu),
            max: None,
            labels: Labels::new(),
            timeout_secs,
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_instances_empty() {
        let state = test_state();
        let resp = list_instances(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"], serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn allocate_grows_cluster() {
        let state = test_state();
        let resp = create_allocation(State(state.clone()), Json(request(1.0, Some(60))))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["resources"]["cpu"], 1.0);

        let resp = get_capacity(State(state.clone())).await.into_response();
        let json = body_json(resp).await;
        assert_eq!(json["data"]["pools"], 1);
        assert_eq!(json["data"]["available"]["cpu"], 3.0);

        let resp = get_status(State(state)).await.into_response();
        let json = body_json(resp).await;
        assert_eq!(json["data"]["launched"], 1);
    }

    #[tokio::test]
    async fn unsatisfiable_allocation_is_507() {
        let state = test_state();
        let resp = create_allocation(State(state), Json(request(64.0, None)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn allocation_timeout_is_504() {
        let state = test_state();
        // Fill both instances the ceiling allows.
        for _ in 0..2 {
            let resp = create_allocation(State(state.clone()), Json(request(4.0, Some(60))))
                .await
                .into_response();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }
        let resp = create_allocation(State(state), Json(request(1.0, Some(30))))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn free_releases_capacity() {
        let state = test_state();
        let resp = create_allocation(State(state.clone()), Json(request(2.0, Some(60))))
            .await
            .into_response();
        let json = body_json(resp).await;
        let id = json["data"]["id"].as_str().unwrap().to_string();

        let resp = delete_allocation(State(state.clone()), Path(id.clone()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = delete_allocation(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
