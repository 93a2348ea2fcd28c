use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::pages;
use crate::preview;
use crate::service::{AttendanceService, ServiceError};
use crate::session::{self, Session, SessionStore};
use crate::store::User;

/// Upper bound on uploaded photos and captures.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Camera settings used by the live preview.
#[derive(Clone, Debug)]
pub struct PreviewSettings {
    pub device: String,
    pub quality: u8,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: AttendanceService,
    pub sessions: SessionStore,
    /// One permit: at most one preview holds the camera.
    pub camera: Arc<Semaphore>,
    pub preview: PreviewSettings,
}

impl AppState {
    pub fn new(service: AttendanceService, config: &Config) -> Self {
        Self {
            service,
            sessions: SessionStore::default(),
            camera: Arc::new(Semaphore::new(1)),
            preview: PreviewSettings {
                device: config.camera_device.clone(),
                quality: config.preview_quality,
            },
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", get(register_form).post(register_submit))
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", get(logout))
        .route("/", get(dashboard))
        .route("/video_feed", get(preview::video_feed))
        .route("/mark_presence", post(mark_presence))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The logged-in user. Rejects with a redirect to `/login`.
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(session::token_from_cookie_header)
        .map(str::to_owned)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let login = || Redirect::to("/login").into_response();

        let token = session_token(&parts.headers).ok_or_else(login)?;
        let session = state.sessions.get(&token).ok_or_else(login)?;

        match state.service.store().find_user(session.user_id).await {
            Ok(Some(user)) => Ok(Self { user, session }),
            Ok(None) => {
                state.sessions.remove(&token);
                Err(login())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load session user");
                Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

fn error_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::UsernameTaken => StatusCode::CONFLICT,
        ServiceError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        e => {
            tracing::error!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Fields of a `multipart/form-data` submission, keyed by name.
struct UploadForm {
    fields: HashMap<String, Vec<u8>>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let data = field.bytes().await?;
            fields.insert(name, data.to_vec());
        }
        Ok(Self { fields })
    }

    fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// A file part; an empty part counts as absent.
    fn take_file(&mut self, name: &str) -> Option<Vec<u8>> {
        self.fields.remove(name).filter(|b| !b.is_empty())
    }

    fn coordinate(&self, name: &str) -> Option<f64> {
        self.text(name).trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

/// `GET /health`
async fn health() -> &'static str {
    "ok"
}

/// `GET /register`
async fn register_form() -> Html<String> {
    Html(pages::register_page(None))
}

/// `POST /register`
async fn register_submit(State(state): State<AppState>, multipart: Multipart) -> Response {
    let mut form = match UploadForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!(error = %e, "malformed registration form");
            let page = pages::register_page(Some("Invalid form submission."));
            return (StatusCode::BAD_REQUEST, Html(page)).into_response();
        }
    };
    let image = form.take_file("face_image");
    let username = form.text("username");
    let password = form.text("password");

    match state.service.register(&username, &password, image).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, username = %user.username, "user registered");
            Redirect::to("/login?registered=1").into_response()
        }
        Err(e) => {
            let page = pages::register_page(Some(e.user_message()));
            (error_status(&e), Html(page)).into_response()
        }
    }
}

#[derive(Deserialize)]
struct LoginQuery {
    registered: Option<String>,
}

/// `GET /login`
async fn login_form(Query(query): Query<LoginQuery>) -> Html<String> {
    let notice = query
        .registered
        .is_some()
        .then_some("Registration successful! Please login.");
    Html(pages::login_page(None, notice))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

/// `POST /login`
async fn login_submit(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    match state.service.authenticate(&form.username, &form.password).await {
        Ok(user) => {
            let token = state.sessions.create(user.id, &user.username);
            tracing::info!(user_id = user.id, "user logged in");
            (
                [(header::SET_COOKIE, session::session_cookie(&token))],
                Redirect::to("/"),
            )
                .into_response()
        }
        Err(e) => {
            let page = pages::login_page(Some(e.user_message()), None);
            (error_status(&e), Html(page)).into_response()
        }
    }
}

/// `GET /logout`: ends the session and releases the camera if its preview holds it.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = session_token(&headers).and_then(|token| state.sessions.remove(&token)) {
        tracing::info!(user_id = session.user_id, "user logged out");
    }
    (
        [(header::SET_COOKIE, session::expired_session_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    /// 1-based page number; anything unparsable means the first page.
    fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .max(1)
    }
}

/// `GET /`: presence history and capture controls.
async fn dashboard(
    current: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.service.history(current.user.id, query.page()).await {
        Ok(history) => {
            Html(pages::dashboard_page(&current.user.username, &history)).into_response()
        }
        Err(e) => (error_status(&e), e.user_message()).into_response(),
    }
}

/// Latitude/longitude in a reply: a number, or `"N/A"` when not supplied.
#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum Coordinate {
    Value(f64),
    Missing(&'static str),
}

impl From<Option<f64>> for Coordinate {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Missing("N/A"), Self::Value)
    }
}

#[derive(Serialize)]
struct RecordReply {
    timestamp: String,
    status: String,
    lat: Coordinate,
    long: Coordinate,
}

#[derive(Serialize)]
struct PresenceReply {
    status: &'static str,
    message: String,
    record: RecordReply,
}

#[derive(Serialize)]
struct ErrorReply<'a> {
    status: &'static str,
    message: &'a str,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let reply = ErrorReply {
        status: "error",
        message,
    };
    (status, Json(reply)).into_response()
}

/// `POST /mark_presence`
async fn mark_presence(
    current: CurrentUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Response {
    let mut form = match UploadForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!(error = %e, "malformed capture form");
            return json_error(StatusCode::BAD_REQUEST, "Capture data not received.");
        }
    };
    let Some(capture) = form.take_file("presence_capture") else {
        return json_error(StatusCode::BAD_REQUEST, "Capture data not received.");
    };
    let latitude = form.coordinate("latitude");
    let longitude = form.coordinate("longitude");

    match state
        .service
        .mark_presence(&current.user, Some(capture), latitude, longitude)
        .await
    {
        Ok(marked) => Json(PresenceReply {
            status: "success",
            message: format!("Presence marked as {}.", marked.outcome.label()),
            record: RecordReply {
                timestamp: pages::format_timestamp(&marked.record.timestamp),
                status: marked.record.status,
                lat: marked.record.latitude.into(),
                long: marked.record.longitude.into(),
            },
        })
        .into_response(),
        Err(e) => json_error(error_status(&e), e.user_message()),
    }
}
