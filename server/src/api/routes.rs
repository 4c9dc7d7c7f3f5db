//! The ingest endpoint and the dashboard query/maintenance surface over
//! the registries, interval-stats stores, and summaries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::{Settings, StatsToggles};
use crate::domain::dimensions::{Endpoint, Entity, Origin, Property};
use crate::domain::interaction::Interaction;
use crate::domain::interval::{Bucket, Interval};
use crate::domain::pipeline::{EngineContext, OrderingBuffer};
use crate::domain::storage::{Op, Resource};
use crate::domain::summary::Summary;

use super::types::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<EngineContext>,
    pub buffer: Arc<OrderingBuffer>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    fn apply<T>(&self, mut items: Vec<T>) -> (Vec<T>, usize) {
        let total = items.len();
        let offset = self.offset.unwrap_or(0).min(items.len());
        items.drain(..offset);
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        (items, total)
    }
}

fn total_count_header(total: usize) -> [(HeaderName, String); 1] {
    [(HeaderName::from_static("x-total-count"), total.to_string())]
}

/// The ingest endpoint, mounted separately from the dashboard routes so the
/// server can give it its own body-size limit and leave the api-key
/// middleware layered only over `dashboard_routes()`.
pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/api/interaction", post(ingest_interaction))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard/summaries", get(list_summaries))
        .route("/dashboard/summaries/{interval}", get(get_summary))
        .route("/dashboard/properties", get(list_properties))
        .route("/dashboard/properties/{name}", get(get_property))
        .route("/dashboard/endpoint", get(list_endpoints).post(create_endpoint))
        .route("/dashboard/endpoint/{id}", get(get_endpoint))
        .route("/dashboard/origin", get(list_origins))
        .route("/dashboard/origin/{id}", get(get_origin))
        .route("/dashboard/entity", get(list_entities))
        .route("/dashboard/entity/{id}", get(get_entity))
        .route("/dashboard/settings", get(get_settings).put(put_settings))
        .route("/dashboard/settings/{id}", get(get_settings).put(put_settings))
}

// ---------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------

async fn ingest_interaction(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> Result<StatusCode, ApiError> {
    interaction.validate()?;
    state.buffer.insert(interaction).await;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------

async fn list_summaries(State(state): State<AppState>) -> Json<Vec<Summary>> {
    let summaries = state
        .ctx
        .summaries
        .iter()
        .map(|(_, handle)| handle.lock().clone())
        .collect();
    Json(summaries)
}

async fn get_summary(
    State(state): State<AppState>,
    Path(interval): Path<String>,
) -> Result<Json<Summary>, ApiError> {
    let interval = Interval::from_str(&interval).ok_or(ApiError::NotFound("interval"))?;
    let handle = state.ctx.summaries.get(interval).ok_or(ApiError::NotFound("summary"))?;
    Ok(Json(handle.lock().clone()))
}

// ---------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let (items, total) = query.apply(state.ctx.properties.list());
    (total_count_header(total), Json(items))
}

async fn get_property(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Property>, ApiError> {
    state.ctx.properties.get(&name).map(Json).ok_or(ApiError::NotFound("property"))
}

// ---------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointWithStats {
    #[serde(flatten)]
    endpoint: Endpoint,
    interval_stats: Vec<IntervalStatsEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IntervalStatsEntry {
    interval: Interval,
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<Bucket<crate::domain::profile::EndpointProfile>>,
}

async fn list_endpoints(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let (items, total) = query.apply(state.ctx.endpoints.list());
    (total_count_header(total), Json(items))
}

async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EndpointWithStats>, ApiError> {
    let endpoint = state.ctx.endpoints.get(id).ok_or(ApiError::NotFound("endpoint"))?;
    let now = chrono::Utc::now().with_timezone(&state.ctx.timezone);
    let interval_stats = state
        .ctx
        .endpoint_stats
        .all_interval_stats(&id, now)
        .into_iter()
        .map(|(interval, bucket)| IntervalStatsEntry { interval, bucket })
        .collect();
    Ok(Json(EndpointWithStats { endpoint, interval_stats }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEndpointBody {
    action: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    origin_type: Option<String>,
    origin_id: Option<String>,
}

async fn create_endpoint(
    State(state): State<AppState>,
    Json(body): Json<CreateEndpointBody>,
) -> Result<(StatusCode, Json<Endpoint>), ApiError> {
    // A freshly created endpoint tuple returns 200 with its UUID; a duplicate is a 400 conflict.
    let probe = Interaction {
        action: body.action,
        entity_type: body.entity_type,
        entity_id: body.entity_id,
        origin_type: body.origin_type,
        origin_id: body.origin_id,
        user_type: None,
        user_id: None,
        device_type: None,
        device_id: None,
        session_type: None,
        session_id: None,
        timestamp: None,
        created_at: None,
        received_at: None,
        properties: Default::default(),
    };
    let id = state.ctx.endpoints.create_unique(&probe).ok_or(ApiError::Conflict("endpoint"))?;
    let endpoint = state.ctx.endpoints.get(id).expect("just inserted");
    if let Err(err) = state
        .ctx
        .storage
        .do_op(Op::upsert(Resource::Endpoints, serde_json::to_value(&endpoint)?))
        .await
    {
        tracing::warn!(error = %err, "failed to persist manually created endpoint");
    }
    Ok((StatusCode::OK, Json(endpoint)))
}

// ---------------------------------------------------------------------
// Origins
// ---------------------------------------------------------------------

async fn list_origins(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let (items, total) = query.apply(state.ctx.origins.list());
    (total_count_header(total), Json(items))
}

async fn get_origin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Origin>, ApiError> {
    state.ctx.origins.get(id).map(Json).ok_or(ApiError::NotFound("origin"))
}

// ---------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------

async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let (items, total) = query.apply(state.ctx.entities.list());
    (total_count_header(total), Json(items))
}

async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Entity>, ApiError> {
    state.ctx.entities.get(id).map(Json).ok_or(ApiError::NotFound("entity"))
}

// ---------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------

async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, ApiError> {
    match state.ctx.storage.do_op(Op::read(Resource::Settings, Settings::ID)).await {
        Ok(result) => {
            let item = result.item.ok_or(ApiError::NotFound("settings"))?;
            Ok(Json(serde_json::from_value(item)?))
        }
        Err(crate::domain::storage::StorageError::DoesNotExist) => {
            Err(ApiError::NotFound("settings"))
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutSettingsBody {
    stats_toggles: StatsToggles,
    interactions_storage: bool,
}

/// Persists the updated toggles; the running process's enabled-interval
/// set was fixed at startup (`EngineContext::new`), so a toggle flip here
/// takes effect on next restart — matching every other piece of `Settings`
/// the storage layer, rather than the live pipeline, owns.
async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<PutSettingsBody>,
) -> Result<Json<Settings>, ApiError> {
    let settings = Settings::new(body.stats_toggles, body.interactions_storage, None);
    state
        .ctx
        .storage
        .do_op(Op::upsert(Resource::Settings, serde_json::to_value(&settings)?))
        .await?;
    Ok(Json(settings))
}
