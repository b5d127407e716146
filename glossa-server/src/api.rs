//! HTTP API over the catalog store and change tracker.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use glossa_core::changes::{ChangeFilter, ChangeTracker, EditOutcome};
use glossa_core::model::{CatalogLocator, EditRecord, Identity, LanguageInfo, WorkingSession};
use glossa_core::publish::{PendingChangeBatch, PublicationOutcome, Publisher};
use glossa_core::store::{CatalogStore, Page, PageQuery};
use glossa_core::GlossaError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CatalogStore>,
    pub tracker: Arc<ChangeTracker>,
    pub publisher: Arc<dyn Publisher>,
}

/// `GlossaError` rendered as `{error}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(GlossaError);

impl From<GlossaError> for ApiError {
    fn from(e: GlossaError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GlossaError::Validation(_) | GlossaError::Parse { .. } => StatusCode::BAD_REQUEST,
            GlossaError::Authorization(_) => StatusCode::UNAUTHORIZED,
            GlossaError::NotFound(_) => StatusCode::NOT_FOUND,
            GlossaError::Conflict { .. } => StatusCode::CONFLICT,
            GlossaError::Retrieval { .. } | GlossaError::Publication(_) => StatusCode::BAD_GATEWAY,
            GlossaError::Journal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::debug!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub key: String,
    pub new_value: String,
    /// What the client last saw. Only compared and logged; the baseline
    /// always comes from the tracker or the catalog.
    #[serde(default)]
    pub previous_value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponse {
    pub recorded: bool,
    pub record: Option<EditRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub outcome: PublicationOutcome,
    pub changes: usize,
    pub submitted: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/catalogs/:catalog/languages", get(list_languages))
        .route("/catalogs/:catalog/:language/entries", get(list_entries))
        .route("/catalogs/:catalog/:language/sessions", post(open_session))
        .route("/sessions/:session_id/edits", post(record_edit))
        .route("/changes/pending", get(pending_changes))
        .route("/changes/publish", post(publish))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("HTTP API listening on {addr}");
    }
    axum::serve(listener, router(state)).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_languages(
    State(state): State<AppState>,
    Path(catalog): Path<String>,
) -> ApiResult<Vec<LanguageInfo>> {
    Ok(Json(state.store.language_directory(&catalog).await?))
}

async fn list_entries(
    State(state): State<AppState>,
    Path((catalog, language)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page> {
    let locator = CatalogLocator::new(catalog, language);
    let mut page = state.store.query(&locator, &query).await?;
    state.tracker.overlay(&locator, &mut page.entries);
    Ok(Json(page))
}

async fn open_session(
    State(state): State<AppState>,
    Path((catalog, language)): Path<(String, String)>,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<WorkingSession> {
    let display_name = request
        .display_name
        .unwrap_or_else(|| request.user_id.clone());
    let identity = Identity::new(request.user_id, display_name);
    let locator = CatalogLocator::new(catalog, language);
    Ok(Json(state.tracker.open_session(&identity, &locator)?))
}

async fn record_edit(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<EditRequest>,
) -> ApiResult<EditResponse> {
    let outcome = state
        .tracker
        .record_catalog_edit(&state.store, session_id, &request.key, &request.new_value)
        .await?;
    let response = match outcome {
        EditOutcome::Recorded(record) => {
            if let Some(claimed) = request
                .previous_value
                .as_deref()
                .filter(|claimed| *claimed != record.previous_value)
            {
                log::debug!(
                    "edit of '{}' assumed previous value {:?}, baseline was {:?}",
                    record.key,
                    claimed,
                    record.previous_value
                );
            }
            EditResponse {
                recorded: true,
                record: Some(record),
            }
        }
        EditOutcome::Unchanged => EditResponse {
            recorded: false,
            record: None,
        },
    };
    Ok(Json(response))
}

async fn pending_changes(
    State(state): State<AppState>,
    Query(filter): Query<ChangeFilter>,
) -> ApiResult<PendingChangeBatch> {
    Ok(Json(state.tracker.pending_changes(&filter)))
}

async fn publish(
    State(state): State<AppState>,
    Json(filter): Json<ChangeFilter>,
) -> ApiResult<PublishResponse> {
    let report = state
        .tracker
        .publish(&filter, state.publisher.as_ref())
        .await?;
    if report.outcome.handle().is_some() {
        for locator in report.batch.locators() {
            state.store.invalidate(&locator);
        }
    }
    Ok(Json(PublishResponse {
        outcome: report.outcome,
        changes: report.batch.len(),
        submitted: report.submitted,
    }))
}
