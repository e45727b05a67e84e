use crate::{
    access::{self, Credentials},
    auth,
    config::Config,
    eid::Eid,
    events::{Event, EventStore, StoreError},
    face::{FaceMatch, FaceSearchService, SearchError},
    ingest,
    storage::StorageManager,
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    fmt::Debug,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::signal;

pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub store: Arc<EventStore>,
    pub uploads: Arc<dyn StorageManager>,
    pub face: Arc<FaceSearchService>,
    pub uploads_dir: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest_service(
            "/api/file",
            tower_http::services::ServeDir::new(&state.uploads_dir),
        )
        .route("/api/events", post(create_event))
        .route("/api/events/:event_id", get(get_event))
        .route("/api/events/:event_id/photos", post(upload_photo))
        .route("/api/events/:event_id/face-search", post(face_search))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn start_app(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.read().unwrap().listen_addr.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {
            log::info!("shutting down");
        },
        _ = terminate => {},
    }
}

pub fn start_daemon(state: Arc<AppState>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(state).await })
}

// Wrapper so the whole error taxonomy maps to a status code in one place.
#[derive(Debug)]
struct HttpError(SearchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match &self.0 {
            SearchError::MissingImage
            | SearchError::InvalidInput(_)
            | SearchError::NoFaceDetected => (
                StatusCode::BAD_REQUEST,
                json!({"success": false, "error": self.0.to_string()}).to_string(),
            ),
            // the anti-enumeration outcome: one fixed body for every
            // flavor of "you can't see this event"
            SearchError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "event not found"}).to_string(),
            ),
            SearchError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "unauthorized"}).to_string(),
            ),
            SearchError::ModelUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"success": false, "error": self.0.to_string()}).to_string(),
            ),
            SearchError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({"success": false, "error": self.0.to_string()}).to_string(),
            ),
            SearchError::Internal(_) => {
                log::error!("{self:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "internal error"}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<SearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl From<access::NotFound> for SearchError {
    fn from(_: access::NotFound) -> Self {
        SearchError::NotFound
    }
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EventNotFound | StoreError::PhotoNotFound => SearchError::NotFound,
            other => SearchError::Internal(other.into()),
        }
    }
}

fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(auth::extract_bearer_token)
        .map(|token| token.to_string());

    let event_token = headers
        .get("x-event-token")
        .and_then(|value| value.to_str().ok())
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    Credentials {
        bearer,
        event_token,
    }
}

/// Event details as served over the API: no credential hashes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: Eid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub face_search_enabled: bool,
    pub photo_count: usize,
    pub searchable_photo_count: usize,
}

impl EventView {
    fn build(event: &Event, store: &EventStore) -> Self {
        Self {
            id: event.id.clone(),
            name: event.name.clone(),
            created_at: event.created_at,
            active: event.active,
            face_search_enabled: event.face_search_enabled,
            photo_count: store.photos_for_event(&event.id).len(),
            searchable_photo_count: store.searchable_faces(&event.id).len(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoView {
    pub id: Eid,
    pub url: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub face_count: usize,
    pub descriptor_count: usize,
}

impl From<crate::events::Photo> for PhotoView {
    fn from(photo: crate::events::Photo) -> Self {
        let (face_count, descriptor_count) = photo
            .face_data
            .as_ref()
            .map(|d| {
                (
                    d.face_count(),
                    d.entries.iter().filter(|e| e.descriptor.is_some()).count(),
                )
            })
            .unwrap_or((0, 0));

        Self {
            id: photo.id,
            url: photo.url,
            approved: photo.approved,
            created_at: photo.created_at,
            face_count,
            descriptor_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventCreateRequest {
    pub name: String,

    #[serde(default)]
    pub face_search_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCreateResponse {
    pub event: EventView,
    /// Returned once; only a hash is stored.
    pub host_token: String,
    pub access_token: String,
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EventCreateRequest>,
) -> Result<Json<EventCreateResponse>, HttpError> {
    let admin_token = state.config.read().unwrap().admin_token.clone();
    let creds = credentials_from_headers(&headers);
    if !creds.is_admin(&admin_token) {
        return Err(HttpError(SearchError::Unauthorized));
    }

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(HttpError(SearchError::InvalidInput(
            "event name must not be empty".to_string(),
        )));
    }

    let (event, tokens) = tokio::task::block_in_place(|| {
        state.store.create_event(crate::events::EventCreate {
            name,
            face_search_enabled: payload.face_search_enabled,
        })
    })?;

    log::info!("created event {} ({})", event.id, event.name);

    Ok(Json(EventCreateResponse {
        event: EventView::build(&event, &state.store),
        host_token: tokens.host_token,
        access_token: tokens.access_token,
    }))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<EventView>, HttpError> {
    let admin_token = state.config.read().unwrap().admin_token.clone();
    let creds = credentials_from_headers(&headers);

    let event = state.store.get_event(&Eid::from(event_id.as_str()));
    access::authorize_manage(event.as_ref(), &creds, &admin_token)?;

    let event = event.ok_or(HttpError(SearchError::NotFound))?;
    Ok(Json(EventView::build(&event, &state.store)))
}

#[derive(Deserialize)]
pub struct PhotoUploadRequest {
    pub image_b64: String,

    #[serde(default = "default_approved")]
    pub approved: bool,
}

fn default_approved() -> bool {
    true
}

impl Debug for PhotoUploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PhotoUploadRequest {{ image_b64: [REDACTED], approved: {:?} }}",
            self.approved
        )
    }
}

async fn upload_photo(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<PhotoUploadRequest>,
) -> Result<Json<PhotoView>, HttpError> {
    log::debug!("payload: {payload:?}");

    let admin_token = state.config.read().unwrap().admin_token.clone();
    let creds = credentials_from_headers(&headers);

    let event_id = Eid::from(event_id.as_str());
    let event = state.store.get_event(&event_id);
    access::authorize_manage(event.as_ref(), &creds, &admin_token)?;

    let bytes = STANDARD.decode(payload.image_b64).map_err(|err| {
        HttpError(SearchError::InvalidInput(format!("invalid base64: {err}")))
    })?;

    let photo = tokio::task::block_in_place(|| {
        ingest::ingest_photo(
            &state.store,
            state.uploads.as_ref(),
            &state.face,
            &event_id,
            &bytes,
            payload.approved,
        )
    })
    .map_err(classify_ingest_error)?;

    Ok(Json(photo.into()))
}

fn classify_ingest_error(err: anyhow::Error) -> HttpError {
    use crate::face::ExtractionError;

    if let Some(store_err) = err.downcast_ref::<StoreError>() {
        if matches!(
            store_err,
            StoreError::EventNotFound | StoreError::PhotoNotFound
        ) {
            return HttpError(SearchError::NotFound);
        }
        return HttpError(SearchError::Internal(err));
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return HttpError(SearchError::Internal(err));
    }
    if let Some(extract_err) = err.downcast_ref::<ExtractionError>() {
        if matches!(
            extract_err,
            ExtractionError::InvalidImage(_) | ExtractionError::TooLarge(_)
        ) {
            return HttpError(SearchError::InvalidInput(format!("{err:#}")));
        }
        return HttpError(SearchError::Internal(err));
    }
    // validation failures (sniffing, decoding) are the caller's problem
    HttpError(SearchError::InvalidInput(format!("{err:#}")))
}

#[derive(Debug, Serialize)]
pub struct FaceSearchResponse {
    pub success: bool,
    pub results: Vec<FaceMatch>,
    pub count: usize,
    pub message: String,
}

async fn face_search(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<FaceSearchResponse>, HttpError> {
    let (admin_token, feature_enabled, timeout_secs) = {
        let config = state.config.read().unwrap();
        (
            config.admin_token.clone(),
            config.face_search.enabled,
            config.face_search.request_timeout_secs,
        )
    };

    // Received: a reference image must be supplied
    let mut image: Option<Bytes> = None;
    let mut min_similarity: Option<f32> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        HttpError(SearchError::InvalidInput(format!(
            "malformed multipart body: {err}"
        )))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("image") => {
                image = Some(field.bytes().await.map_err(|err| {
                    HttpError(SearchError::InvalidInput(format!(
                        "failed to read image field: {err}"
                    )))
                })?);
            }
            Some("threshold") => {
                let text = field.text().await.unwrap_or_default();
                let value: f32 = text.trim().parse().map_err(|_| {
                    HttpError(SearchError::InvalidInput(format!(
                        "invalid threshold: {text:?}"
                    )))
                })?;
                min_similarity = Some(value);
            }
            _ => {}
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or(HttpError(SearchError::MissingImage))?;

    // AccessChecked: any denial, missing event or disabled feature is the
    // same opaque outcome
    let event_id = Eid::from(event_id.as_str());
    let creds = credentials_from_headers(&headers);
    if !feature_enabled {
        return Err(HttpError(SearchError::NotFound));
    }
    let event = state.store.get_event(&event_id);
    access::authorize_search(event.as_ref(), &creds, &admin_token)?;

    // Extracting + Searching run off the async runtime, bounded by the
    // request timeout
    let candidates = state.store.searchable_faces(&event_id);
    let face = state.face.clone();
    let task =
        tokio::task::spawn_blocking(move || face.search(image.as_ref(), &candidates, min_similarity));

    let results = match tokio::time::timeout(Duration::from_secs(timeout_secs), task).await {
        Err(_) => {
            log::warn!("face search timed out for event {event_id}");
            return Err(HttpError(SearchError::Timeout));
        }
        Ok(Err(join_err)) => {
            return Err(HttpError(SearchError::Internal(anyhow::anyhow!(
                "search task failed: {join_err}"
            ))))
        }
        Ok(Ok(outcome)) => outcome.map_err(|err| {
            if let SearchError::Internal(ref reason) = err {
                log::error!("face search failed for event {event_id}: {reason:?}");
            }
            HttpError(err)
        })?,
    };

    // Responded
    let count = results.len();
    log::debug!("face search event {event_id}: {count} matches");

    Ok(Json(FaceSearchResponse {
        success: true,
        count,
        message: match count {
            0 => "no matching photos found".to_string(),
            1 => "found 1 matching photo".to_string(),
            n => format!("found {n} matching photos"),
        },
        results,
    }))
}
