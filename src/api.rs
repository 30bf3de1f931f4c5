//! HTTP API handlers for firefuse.
//!
//! - **POST /pipeline**: Runs normalization, fusion, and aggregation over the
//!   posted batches and regions and returns the region rows.
//! - **GET /config**: Returns the configuration the server runs with.
//! - **GET /health**: Liveness check.
//!
//! The server holds no state besides its immutable configuration; every
//! request is an independent pipeline run.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fusion::FusionReport;
use crate::model::{FusedFireEvent, RegionRow};
use crate::normalize::{NormalizeReport, RawBatch};
use crate::pipeline::run_pipeline;
use crate::region::Region;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
}

/// Build the router with all routes and the tracing layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipeline", post(post_pipeline))
        .route("/config", get(get_config))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Request body for POST /pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRequest {
    /// One or more source tagged batches of raw rows.
    pub batches: Vec<RawBatch>,

    /// Region polygons; each feature needs a `name` property or an id.
    pub regions: geojson::FeatureCollection,

    /// Also return the fused events (default: false).
    #[serde(default)]
    pub include_events: bool,
}

/// Response for POST /pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub normalize: Vec<NormalizeReport>,
    pub fusion: FusionReport,
    pub regions: Vec<RegionRow>,
    pub unassigned_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Arc<FusedFireEvent>>>,
}

/// Error body returned by every failing handler.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// Wrapper that turns a [`PipelineError`] into an HTTP response.
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Integrity(_) | PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };

        if self.0.is_defect() {
            error!(error = %self.0, "Pipeline invariant violated");
        } else {
            warn!(error = %self.0, "Pipeline request rejected");
        }

        let body = ErrorResponse {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /pipeline - Fuse detections and profile regions.
///
/// # Request Body
///
/// ```json
/// {
///     "batches": [
///         { "sensor": "coarse", "rows": [{ "latitude": 30.0, "longitude": 120.0,
///           "acq_date": "2024-03-01", "acq_time": 1200, "confidence": 60, "frp": 50.0 }] },
///         { "sensor": "fine", "rows": [...] }
///     ],
///     "regions": { "type": "FeatureCollection", "features": [...] },
///     "include_events": false
/// }
/// ```
///
/// # Response
///
/// `200 OK` with per-sensor normalization counts, the fusion report, one row
/// per region, and the number of events outside every region.
#[instrument(skip_all, fields(batches = request.batches.len(), regions = request.regions.features.len()))]
pub async fn post_pipeline(
    State(state): State<AppState>,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<PipelineResponse>, ApiError> {
    let regions: Vec<Arc<Region>> = Region::from_feature_collection(&request.regions)?
        .into_iter()
        .map(Arc::new)
        .collect();

    let output = run_pipeline(&request.batches, &regions, &state.config)?;

    let response = PipelineResponse {
        normalize: output.normalize.clone(),
        fusion: output.fusion.report,
        regions: output.rows(),
        unassigned_count: output.aggregation.unassigned_count(),
        events: request.include_events.then(|| output.fusion.events.clone()),
    };

    info!(
        events = output.fusion.events.len(),
        regions = response.regions.len(),
        unassigned = response.unassigned_count,
        "Pipeline request served"
    );

    Ok(Json(response))
}

/// GET /config - The active pipeline configuration.
pub async fn get_config(State(state): State<AppState>) -> Json<PipelineConfig> {
    Json(state.config.as_ref().clone())
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
