use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::dispatch::dispatch;
use crate::error::AppError;
use crate::media::UploadedFile;
use crate::normalize;
use crate::session::{MessageContent, Messenger, SessionState};
use crate::types::{HealthResponse, SendForm, SendRequest, SendResponse};

pub struct AppState {
    pub messenger: Arc<dyn Messenger>,
    pub country_code: String,
    pub upload_dir: PathBuf,
    pub session: watch::Receiver<SessionState>,
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<AppState>, public_dir: &Path, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/send", post(send_messages))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(public_dir))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn read_form(mut multipart: Multipart, upload_dir: &Path) -> Result<SendForm, AppError> {
    let mut form = SendForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("numbers") => form.numbers = Some(field.text().await?),
            Some("message") => form.message = Some(field.text().await?),
            Some("delayMs") => form.delay_ms = Some(field.text().await?),
            Some("media") if form.media.is_none() => {
                form.media = UploadedFile::receive(field, upload_dir).await?;
            }
            _ => {}
        }
    }
    Ok(form)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json")
                || (mime.starts_with("application/") && mime.ends_with("+json"))
        })
}

/// JSON bodies carry the text fields only, anything else is read as multipart.
async fn read_request(request: Request, upload_dir: &Path) -> Result<SendForm, AppError> {
    if is_json(request.headers()) {
        let Json(body) = Json::<SendRequest>::from_request(request, &()).await?;
        return Ok(body.into());
    }
    let multipart = Multipart::from_request(request, &()).await?;
    read_form(multipart, upload_dir).await
}

pub async fn send_messages(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<SendResponse>, AppError> {
    let form = read_request(request, &state.upload_dir).await?;
    run_batch(&state, form).await.map(Json)
}

async fn run_batch(state: &AppState, form: SendForm) -> Result<SendResponse, AppError> {
    // `form.media` owns the temp file; every early return below drops it.
    let batch = normalize::validate(&form)?;

    let media = match &form.media {
        Some(upload) => Some(Arc::new(upload.load().await?)),
        None => None,
    };

    let batch_id = uuid::Uuid::new_v4().to_string();
    info!(
        "Batch {}: sending to {} unique numbers with {:?} delay",
        batch_id,
        batch.recipients.len(),
        batch.delay
    );
    if let Some(upload) = &form.media {
        info!("Batch {}: attaching {} bytes of media", batch_id, upload.size());
    }

    let content = MessageContent::new(batch.message, media);
    let cancel = state.shutdown.child_token();
    let report = dispatch(
        state.messenger.as_ref(),
        &state.country_code,
        &batch.recipients,
        &content,
        batch.delay,
        &cancel,
    )
    .await;

    if let Some(upload) = form.media {
        upload.discard();
    }

    info!(
        "Batch {} finished: {} sent, {} failed, {} cancelled",
        batch_id,
        report.sent(),
        report.failed(),
        report.cancelled()
    );
    Ok(SendResponse::from_report(batch_id, report))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = *state.session.borrow();
    Json(HealthResponse { status })
}
