//! # Handlers
//!
//! Thin translation between HTTP and the services: extract, call, serialize.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use domains::{Ad, HealthReport, MonitorAd, Validation};
use serde::{Deserialize, Serialize};
use services::{AssignmentReport, DecisionOutcome, HealthSummary, RotationEntry};
use uuid::Uuid;

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub validation: Validation,
    pub justification: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub monitor_ids: Vec<Uuid>,
    pub block_quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachBody {
    pub monitor_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactBody {
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindBoxBody {
    pub box_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RotationBody {
    pub entries: Vec<RotationEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedRows {
    pub removed: Vec<MonitorAd>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxBinding {
    pub monitor_id: Uuid,
    pub previous_box_id: Option<Uuid>,
    pub box_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedAds {
    pub monitor_id: Uuid,
    pub file_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RotationVersion {
    pub version: u64,
}

pub async fn decide_ad(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(ad_id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<DecisionOutcome>> {
    let outcome = state
        .services
        .lifecycle
        .decide(&actor, ad_id, body.validation, body.justification)
        .await?;
    Ok(Json(outcome))
}

pub async fn assign_ad(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(ad_id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<AssignmentReport>> {
    let report = state
        .services
        .assignments
        .assign_as(&actor, ad_id, &body.monitor_ids, body.block_quantity)
        .await?;
    Ok(Json(report))
}

pub async fn detach_ad(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(ad_id): Path<Uuid>,
    Json(body): Json<DetachBody>,
) -> ApiResult<Json<RemovedRows>> {
    let removed = state.services.assignments.detach(&actor, ad_id, &body.monitor_ids).await?;
    Ok(Json(RemovedRows { removed }))
}

pub async fn replace_artifact(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(ad_id): Path<Uuid>,
    Json(body): Json<ArtifactBody>,
) -> ApiResult<Json<Ad>> {
    let ad = state.services.lifecycle.replace_artifact(&actor, ad_id, &body.file_name).await?;
    Ok(Json(ad))
}

pub async fn resubmit_ad(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(ad_id): Path<Uuid>,
    Json(body): Json<ArtifactBody>,
) -> ApiResult<Json<Ad>> {
    let ad = state.services.lifecycle.resubmit(&actor, ad_id, &body.file_name).await?;
    Ok(Json(ad))
}

pub async fn submit_ad(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ArtifactBody>,
) -> ApiResult<(StatusCode, Json<Ad>)> {
    let ad = state.services.lifecycle.submit(&actor, request_id, &body.file_name).await?;
    Ok((StatusCode::CREATED, Json(ad)))
}

pub async fn ingest_health(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(reports): Json<Vec<HealthReport>>,
) -> ApiResult<Json<HealthSummary>> {
    let summary = state.services.gateway.ingest_health(&actor, reports).await?;
    Ok(Json(summary))
}

pub async fn bind_box(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(monitor_id): Path<Uuid>,
    Json(body): Json<BindBoxBody>,
) -> ApiResult<Json<BoxBinding>> {
    let previous_box_id = state.services.fleet.bind_monitor(&actor, monitor_id, body.box_id).await?;
    Ok(Json(BoxBinding { monitor_id, previous_box_id, box_id: body.box_id }))
}

pub async fn displayed_ads(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(monitor_id): Path<Uuid>,
) -> ApiResult<Json<DisplayedAds>> {
    let file_names = state.services.fleet.displayed_ads(&actor, monitor_id).await?;
    Ok(Json(DisplayedAds { monitor_id, file_names }))
}

pub async fn reorder_rotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(monitor_id): Path<Uuid>,
    Json(body): Json<RotationBody>,
) -> ApiResult<Json<RotationVersion>> {
    let version = state.services.fleet.reorder_rotation(&actor, monitor_id, body.entries).await?;
    Ok(Json(RotationVersion { version }))
}

pub async fn expire_subscription(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<RemovedRows>> {
    let removed = state.services.fleet.expire_subscription(&actor, subscription_id).await?;
    Ok(Json(RemovedRows { removed }))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .render()
        .map_err(|e| domains::DomainError::Internal(format!("could not encode metrics: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")], body))
}

pub async fn healthz() -> &'static str {
    "ok"
}
