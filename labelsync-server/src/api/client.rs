//! Client API: version, mapping, order lookup, label files and daily bundles
//!
//! Every route here sits behind [`client_code_middleware`].

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use labelsync_common::time;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::auth::client_code_middleware;
use crate::services::delivery::{self, CONTENT_TYPE_PDF, CONTENT_TYPE_ZIP};
use crate::services::{ArchiveRecord, MappingSnapshot};
use crate::{ApiError, ApiResult, AppState};

/// GET /api/v1/version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    /// Same token as `version`; older clients read this key
    pub list_version: String,
    pub server_version: String,
    pub client_recommend: String,
}

/// GET /api/v1/pdf-zips/dates response
#[derive(Debug, Serialize)]
pub struct DatesResponse {
    pub dates: Vec<ArchiveRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DailyParams {
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyDayParams {
    pub d: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupParams {
    #[serde(default)]
    pub order_id: String,
}

/// GET /api/v1/lookup response
#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub order_id: String,
    pub tracking_no: String,
    /// Label download path; empty when the order has no tracking number
    pub pdf_url: String,
}

/// GET /api/v1/version
pub async fn get_version(State(state): State<AppState>) -> ApiResult<Json<VersionResponse>> {
    let version = state.store.current_version().await?;
    Ok(Json(VersionResponse {
        list_version: version.clone(),
        version,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        client_recommend: state.client_recommend.to_string(),
    }))
}

/// GET /api/v1/mapping
pub async fn get_mapping(State(state): State<AppState>) -> ApiResult<Json<MappingSnapshot>> {
    Ok(Json(state.store.snapshot().await?))
}

/// GET /api/v1/lookup?order_id=
pub async fn lookup_order(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> ApiResult<Json<LookupResponse>> {
    let entry = state
        .store
        .lookup(&params.order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("order not found".to_string()))?;

    let pdf_url = if entry.tracking_no.is_empty() {
        String::new()
    } else {
        format!("/api/v1/file/{}", entry.tracking_no)
    };
    Ok(Json(LookupResponse {
        order_id: entry.order_id,
        tracking_no: entry.tracking_no,
        pdf_url,
    }))
}

/// GET|HEAD /api/v1/file/:tracking_no
pub async fn get_label_file(
    State(state): State<AppState>,
    Path(tracking_no): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = delivery::locate_label(&state.db, &state.layout.labels_dir(), &tracking_no)
        .await?
        .ok_or_else(|| ApiError::NotFound("file not found".to_string()))?;

    Ok(delivery::serve_file(&path, CONTENT_TYPE_PDF, &method, &headers).await?)
}

/// GET /api/v1/pdf-zips/dates
pub async fn list_bundle_dates(State(state): State<AppState>) -> ApiResult<Json<DatesResponse>> {
    let dates = state.archives.list().await?;
    Ok(Json(DatesResponse { dates }))
}

/// GET|HEAD /api/v1/pdf-zips/daily?date=
pub async fn get_daily_bundle(
    State(state): State<AppState>,
    Query(params): Query<DailyParams>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_bundle(&state, params.date.as_deref(), &method, &headers).await
}

/// GET|HEAD /api/v1/packs/pdf/day?d=
pub async fn get_daily_bundle_legacy(
    State(state): State<AppState>,
    Query(params): Query<LegacyDayParams>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_bundle(&state, params.d.as_deref(), &method, &headers).await
}

fn requested_day(date: Option<&str>) -> ApiResult<NaiveDate> {
    match date.map(str::trim).filter(|d| !d.is_empty()) {
        None => Ok(time::today()),
        Some(d) => time::parse_day(d).map_err(|_| ApiError::BadRequest("invalid date".to_string())),
    }
}

async fn serve_bundle(
    state: &AppState,
    date: Option<&str>,
    method: &Method,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let day = requested_day(date)?;

    let path = match state.archives.ensure(day).await {
        Ok(Some(path)) => path,
        Ok(None) => return Err(ApiError::NotFound("zip not found".to_string())),
        Err(e) => {
            warn!(day = %day, error = %e, "On-demand bundle build failed");
            return Err(e.into());
        }
    };

    if headers.contains_key(axum::http::header::RANGE) {
        info!(day = %day, "Resuming bundle download");
    }
    Ok(delivery::serve_file(&path, CONTENT_TYPE_ZIP, method, headers).await?)
}

/// Client routes, all guarded by the access code check
pub fn client_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/version", get(get_version))
        .route("/api/v1/mapping", get(get_mapping))
        .route("/api/v1/lookup", get(lookup_order))
        .route("/api/v1/file/:tracking_no", get(get_label_file))
        .route("/api/v1/pdf-zips/dates", get(list_bundle_dates))
        .route("/api/v1/pdf-zips/daily", get(get_daily_bundle))
        .route("/api/v1/packs/pdf/dates", get(list_bundle_dates))
        .route("/api/v1/packs/pdf/day", get(get_daily_bundle_legacy))
        .layer(middleware::from_fn_with_state(state, client_code_middleware))
}
