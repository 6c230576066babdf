//! Admin API: imports, uploads, rebuilds, listings, credentials and retention
//!
//! Long operations answer 202 with a progress id and continue in a spawned
//! task; poll `/admin/progress/get` or stream `/admin/progress/stream`.

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use labelsync_common::time;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::api::auth::admin_token_middleware;
use crate::api::progress::progress_routes;
use crate::db::{files, mappings, ClientCredential, OrderMapping, TrackingFile};
use crate::services::delivery::FileMeta;
use crate::services::{ingest, AlignmentReport, ArchiveRecord, ImportRow, ProgressUpdate};
use crate::{ApiError, ApiResult, AppState};

/// Upper bound for a single label PUT
const MAX_LABEL_BYTES: usize = 64 * 1024 * 1024;

const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

/// POST /admin/orders/import request
#[derive(Debug, Deserialize)]
pub struct ImportOrdersRequest {
    pub rows: Vec<ImportRow>,
    #[serde(default)]
    pub progress_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    #[serde(default)]
    pub progress_id: Option<String>,
}

/// POST /admin/zips/rebuild request
#[derive(Debug, Deserialize)]
pub struct RebuildRequest {
    pub date: String,
    #[serde(default)]
    pub progress_id: Option<String>,
}

/// POST /admin/clients request
#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

/// POST /admin/{orders,files}/purge request
#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub q: String,
}

/// GET /admin/orders and /admin/files query
#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl ListParams {
    /// `(page, size)` clamped to usable values
    fn window(&self) -> (u32, u32) {
        (self.page.max(1), self.size.clamp(1, MAX_PAGE_SIZE))
    }
}

/// One page of a filtered listing
#[derive(Debug, Serialize)]
pub struct ListPage<T> {
    pub total: i64,
    pub page: u32,
    pub size: u32,
    pub pages: i64,
    pub rows: Vec<T>,
}

impl<T> ListPage<T> {
    fn new(total: i64, (page, size): (u32, u32), rows: Vec<T>) -> Self {
        let size_i = i64::from(size);
        Self {
            total,
            page,
            size,
            pages: ((total + size_i - 1) / size_i).max(1),
            rows,
        }
    }
}

/// Started background job
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub ok: bool,
    pub id: String,
}

/// One bundle in the admin listing
#[derive(Debug, Serialize)]
pub struct AdminArchive {
    #[serde(flatten)]
    pub record: ArchiveRecord,
    pub etag: Option<String>,
}

/// GET /admin/stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub orders: i64,
    pub files: i64,
    pub clients: usize,
    pub version: String,
}

fn accepted(id: String) -> (StatusCode, Json<JobAccepted>) {
    (StatusCode::ACCEPTED, Json(JobAccepted { ok: true, id }))
}

/// POST /admin/orders/import
pub async fn import_orders(
    State(state): State<AppState>,
    Json(request): Json<ImportOrdersRequest>,
) -> (StatusCode, Json<JobAccepted>) {
    let id = state
        .progress
        .attach(request.progress_id.as_deref(), "import_orders");

    info!(progress_id = %id, rows = request.rows.len(), "Order import accepted");
    tokio::spawn(ingest::run_order_import(
        state.store.clone(),
        state.progress.clone(),
        id.clone(),
        request.rows,
    ));

    accepted(id)
}

/// POST /admin/labels/upload?progress_id=
///
/// Body is a ZIP of label PDFs. The body is staged to disk during the
/// request; extraction and repackaging continue in the background.
pub async fn upload_labels(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let id = state
        .progress
        .attach(params.progress_id.as_deref(), "upload_pdfs");
    let expected_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let staging = state
        .layout
        .uploads_dir()
        .join(format!("pdfs-{}-{}.zip", time::now().timestamp(), id));

    let received = match ingest::receive_upload(body, &staging, expected_len, &state.progress, &id).await {
        Ok(received) => received,
        Err(e) => {
            error!(progress_id = %id, error = %e, "Label upload interrupted");
            state
                .progress
                .mutate(&id, ProgressUpdate::stage("error").failed().note(e.to_string()));
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
    };

    info!(progress_id = %id, bytes = received, "Label archive received");
    tokio::spawn(ingest::run_label_upload(
        state.store.clone(),
        state.archives.clone(),
        state.progress.clone(),
        id.clone(),
        staging,
        state.layout.labels_dir(),
    ));

    Ok(accepted(id))
}

/// PUT /admin/labels/:tracking_no?progress_id=
///
/// Stores one label, then rebuilds today's bundle in the background. The
/// rebuild reports through the returned progress id.
pub async fn put_label(
    State(state): State<AppState>,
    Path(tracking_no): Path<String>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty label body".to_string()));
    }

    let key = ingest::store_label(&state.store, &state.layout.labels_dir(), &tracking_no, &body)
        .await?
        .ok_or_else(|| ApiError::BadRequest("tracking number is empty after cleanup".to_string()))?;

    let id = state
        .progress
        .attach(params.progress_id.as_deref(), "rebuild_zip");
    info!(progress_id = %id, tracking_no = %key, "Label stored; rebuilding today's bundle");
    tokio::spawn(ingest::run_rebuild(
        state.archives.clone(),
        state.progress.clone(),
        id.clone(),
        time::today(),
    ));

    Ok(Json(json!({ "tracking_no": key, "bytes": body.len(), "progress_id": id })))
}

/// POST /admin/zips/rebuild
pub async fn rebuild_bundle(
    State(state): State<AppState>,
    Json(request): Json<RebuildRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let day = time::parse_day(&request.date)?;
    let id = state
        .progress
        .attach(request.progress_id.as_deref(), "rebuild_zip");

    info!(progress_id = %id, day = %day, "Bundle rebuild accepted");
    tokio::spawn(ingest::run_rebuild(
        state.archives.clone(),
        state.progress.clone(),
        id.clone(),
        day,
    ));

    Ok(accepted(id))
}

/// GET /admin/zips
pub async fn list_bundles(State(state): State<AppState>) -> ApiResult<Json<Vec<AdminArchive>>> {
    let records = state.archives.list().await?;
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let etag = if record.built {
            FileMeta::read(&state.archives.archive_dir().join(&record.name))
                .await
                .ok()
                .map(|meta| meta.etag)
        } else {
            None
        };
        out.push(AdminArchive { record, etag });
    }
    Ok(Json(out))
}

/// GET /admin/clients
pub async fn list_clients(State(state): State<AppState>) -> ApiResult<Json<Vec<ClientCredential>>> {
    Ok(Json(state.auth.list().await?))
}

/// POST /admin/clients
pub async fn create_client(
    State(state): State<AppState>,
    Json(request): Json<CreateClientRequest>,
) -> ApiResult<(StatusCode, Json<ClientCredential>)> {
    let credential = state.auth.create(&request.code, &request.description).await?;
    Ok((StatusCode::CREATED, Json(credential)))
}

/// POST /admin/clients/:id/toggle
pub async fn toggle_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ClientCredential>> {
    Ok(Json(state.auth.toggle(id).await?))
}

/// DELETE /admin/clients/:id
pub async fn delete_client(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.auth.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/retention/sweep
pub async fn sweep_retention(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let retention = state.retention;
    let stats = state
        .store
        .sweep_expired(retention.orders_days, retention.files_days)
        .await?;
    Ok(Json(json!({
        "orders_days": retention.orders_days,
        "files_days": retention.files_days,
        "orders_deleted": stats.orders_deleted,
        "files_deleted": stats.files_deleted,
    })))
}

/// POST /admin/orders/purge
pub async fn purge_orders(
    State(state): State<AppState>,
    Json(request): Json<PurgeRequest>,
) -> ApiResult<Json<Value>> {
    let deleted = state.store.purge_orders(&request.q).await?;
    info!(filter = %request.q, deleted, "Orders purged");
    Ok(Json(json!({ "deleted": deleted })))
}

/// POST /admin/files/purge
pub async fn purge_files(
    State(state): State<AppState>,
    Json(request): Json<PurgeRequest>,
) -> ApiResult<Json<Value>> {
    let deleted = state.store.purge_files(&request.q).await?;
    info!(filter = %request.q, deleted, "Label files purged");
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /admin/orders?q=&page=&size=
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<OrderMapping>>> {
    let (page, size) = params.window();
    let offset = i64::from(page - 1) * i64::from(size);
    let (total, rows) =
        mappings::search_mappings(&state.db, params.q.trim(), i64::from(size), offset).await?;
    Ok(Json(ListPage::new(total, (page, size), rows)))
}

/// GET /admin/files?q=&page=&size=
pub async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<TrackingFile>>> {
    let (page, size) = params.window();
    let offset = i64::from(page - 1) * i64::from(size);
    let (total, rows) =
        files::search_files(&state.db, params.q.trim(), i64::from(size), offset).await?;
    Ok(Json(ListPage::new(total, (page, size), rows)))
}

/// GET /admin/align
pub async fn scan_alignment(State(state): State<AppState>) -> ApiResult<Json<AlignmentReport>> {
    Ok(Json(state.store.alignment(&state.layout.labels_dir()).await?))
}

/// GET /admin/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        orders: mappings::count_mappings(&state.db).await?,
        files: files::count_files(&state.db).await?,
        clients: state.auth.list().await?.len(),
        version: state.store.current_version().await?,
    }))
}

/// Admin routes, guarded by the bearer token when one is configured
pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(get_stats))
        .route("/admin/orders", get(list_orders))
        .route("/admin/files", get(list_files))
        .route("/admin/align", get(scan_alignment))
        .route("/admin/orders/import", post(import_orders))
        .route("/admin/orders/purge", post(purge_orders))
        .route("/admin/labels/upload", post(upload_labels))
        .route(
            "/admin/labels/:tracking_no",
            put(put_label).layer(DefaultBodyLimit::max(MAX_LABEL_BYTES)),
        )
        .route("/admin/files/purge", post(purge_files))
        .route("/admin/zips", get(list_bundles))
        .route("/admin/zips/rebuild", post(rebuild_bundle))
        .route("/admin/clients", get(list_clients).post(create_client))
        .route("/admin/clients/:id/toggle", post(toggle_client))
        .route("/admin/clients/:id", delete(delete_client))
        .route("/admin/retention/sweep", post(sweep_retention))
        .merge(progress_routes())
        .layer(middleware::from_fn_with_state(state, admin_token_middleware))
}
