use std::io::Cursor;
use std::path::PathBuf;

use attend_core::{BoundingBox, EmbedderError, Encoding, FaceEmbedder, ENCODING_DIM};
use attendd::config::Config;
use attendd::engine::spawn_engine;
use attendd::service::AttendanceService;
use attendd::store::Store;
use attendd::{build_router, AppState};
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

const ALICE: [u8; 3] = [220, 40, 40];
const BOB: [u8; 3] = [40, 40, 220];
const NOBODY: [u8; 3] = [0, 0, 0];
const CROWD: [u8; 3] = [40, 220, 40];
const BOUNDARY: &str = "attend-test-boundary";

/// Faces keyed on the colour of the top-left pixel.
struct ColourEmbedder;

impl FaceEmbedder for ColourEmbedder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedderError> {
        let face = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 2.0,
            height: 2.0,
            confidence: 0.99,
            landmarks: None,
        };
        Ok(match image.get_pixel(0, 0).0 {
            NOBODY => vec![],
            CROWD => vec![face.clone(), face],
            _ => vec![face],
        })
    }

    fn embed(&mut self, image: &RgbImage, _: &BoundingBox) -> Result<Encoding, EmbedderError> {
        let [r, _, b] = image.get_pixel(0, 0).0;
        let values = (0..ENCODING_DIM)
            .map(|i| if i % 2 == 0 { r } else { b } as f32 / 2550.0)
            .collect();
        Ok(Encoding::new(values))
    }
}

fn png(colour: [u8; 3]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    RgbImage::from_pixel(4, 4, Rgb(colour))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

struct TestApp {
    router: Router,
    state: AppState,
    _dir: TempDir,
}

async fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        model_dir: PathBuf::from("/nonexistent"),
        db_path: dir.path().join("data/attendance.db"),
        camera_device: "/dev/attend-test-missing".to_string(),
        page_size: 10,
        preview_quality: 80,
    };
    let store = Store::open(&config.db_path).await.unwrap();
    let engine = spawn_engine(ColourEmbedder).unwrap();
    let state = AppState::new(AttendanceService::new(store, engine, config.page_size), &config);
    TestApp {
        router: build_router(state.clone()),
        state,
        _dir: dir,
    }
}

enum Field<'a> {
    Text(&'a str, &'a str),
    File(&'a str, Vec<u8>),
}

fn multipart_body(fields: &[Field<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match field {
            Field::Text(name, value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                    )
                    .as_bytes(),
                );
            }
            Field::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; \
                         filename=\"{name}.png\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn location(response: &Response<Body>) -> &str {
    response.headers().get(header::LOCATION).unwrap().to_str().unwrap()
}

async fn post_multipart(
    router: &Router,
    uri: &str,
    cookie: Option<&str>,
    fields: &[Field<'_>],
) -> Response<Body> {
    let mut builder = Request::post(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(router, builder.body(Body::from(multipart_body(fields))).unwrap()).await
}

async fn register(router: &Router, username: &str, image: Vec<u8>) -> Response<Body> {
    post_multipart(
        router,
        "/register",
        None,
        &[
            Field::Text("username", username),
            Field::Text("password", "correct-horse"),
            Field::File("face_image", image),
        ],
    )
    .await
}

async fn login(router: &Router, username: &str, password: &str) -> Response<Body> {
    let request = Request::post("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("username={username}&password={password}")))
        .unwrap();
    send(router, request).await
}

/// Register and log in, returning the `Cookie` header value for the session.
async fn logged_in(router: &Router, username: &str, face: [u8; 3]) -> String {
    assert_eq!(register(router, username, png(face)).await.status(), StatusCode::SEE_OTHER);
    let response = login(router, username, "correct-horse").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(router, builder.body(Body::empty()).unwrap()).await
}

async fn mark(
    router: &Router,
    cookie: &str,
    capture: Vec<u8>,
    coords: Option<(&str, &str)>,
) -> (StatusCode, serde_json::Value) {
    let mut fields = vec![Field::File("presence_capture", capture)];
    if let Some((lat, long)) = coords {
        fields.push(Field::Text("latitude", lat));
        fields.push(Field::Text("longitude", long));
    }
    let response = post_multipart(router, "/mark_presence", Some(cookie), &fields).await;
    let status = response.status();
    (status, serde_json::from_str(&body_text(response).await).unwrap())
}

#[tokio::test]
async fn health_check() {
    let app = app().await;
    let response = get(&app.router, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn protected_routes_redirect_to_login() {
    let app = app().await;
    for uri in ["/", "/video_feed"] {
        let response = get(&app.router, uri, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(location(&response), "/login");
    }
    let response = get(&app.router, "/", Some("attend_session=forged")).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn register_redirects_to_login() {
    let app = app().await;
    let response = register(&app.router, "alice", png(ALICE)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?registered=1");

    let page = body_text(get(&app.router, "/login?registered=1", None).await).await;
    assert!(page.contains("Registration successful! Please login."));
}

#[tokio::test]
async fn register_rejections() {
    let app = app().await;
    register(&app.router, "alice", png(ALICE)).await;

    let response = register(&app.router, "alice", png(BOB)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(body_text(response).await.contains("Username already exists."));

    for image in [png(NOBODY), png(CROWD), b"not an image".to_vec()] {
        let response = register(&app.router, "carol", image).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response)
            .await
            .contains("No unique face detected. Please use a clear, front-facing photo."));
    }

    let response = post_multipart(
        &app.router,
        "/register",
        None,
        &[Field::Text("username", "dave"), Field::Text("password", "pw")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Face image is required."));

    assert_eq!(app.state.service.store().count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn login_with_wrong_password() {
    let app = app().await;
    register(&app.router, "alice", png(ALICE)).await;
    let response = login(&app.router, "alice", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(body_text(response)
        .await
        .contains("Please check your login details and try again."));
}

#[tokio::test]
async fn alice_marks_presence() {
    let app = app().await;
    let cookie = logged_in(&app.router, "alice", ALICE).await;

    let (status, body) = mark(&app.router, &cookie, png(ALICE), Some(("52.52", "13.405"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Presence marked as Verified.");
    assert_eq!(body["record"]["status"], "Verified (Distance: 0.00)");
    assert_eq!(body["record"]["lat"], 52.52);
    assert_eq!(body["record"]["long"], 13.405);
    assert_eq!(body["record"]["timestamp"].as_str().unwrap().len(), "2024-01-01 00:00:00".len());

    let (status, body) = mark(&app.router, &cookie, png(BOB), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Presence marked as Unverified.");
    assert!(body["record"]["status"].as_str().unwrap().starts_with("Unverified (Distance: "));
    assert_eq!(body["record"]["lat"], "N/A");
    assert_eq!(body["record"]["long"], "N/A");

    let (status, body) = mark(&app.router, &cookie, png(NOBODY), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "No face detected in the captured image.");

    let dashboard = get(&app.router, "/", Some(&cookie)).await;
    assert_eq!(dashboard.status(), StatusCode::OK);
    let html = body_text(dashboard).await;
    assert!(html.contains("Welcome, alice"));
    assert_eq!(html.matches("(Distance: ").count(), 2);
    assert!(html.contains("Page 1 of 1"));
}

#[tokio::test]
async fn malformed_page_shows_first_page() {
    let app = app().await;
    let cookie = logged_in(&app.router, "alice", ALICE).await;
    mark(&app.router, &cookie, png(ALICE), None).await;

    for uri in ["/?page=abc", "/?page=-1", "/?page=0", "/?page=", "/?page=2.5"] {
        let response = get(&app.router, uri, Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let html = body_text(response).await;
        assert!(html.contains("Page 1 of 1"), "{uri}");
        assert_eq!(html.matches("(Distance: ").count(), 1, "{uri}");
    }
}

#[tokio::test]
async fn mark_presence_without_capture() {
    let app = app().await;
    let cookie = logged_in(&app.router, "alice", ALICE).await;
    let response = post_multipart(
        &app.router,
        "/mark_presence",
        Some(&cookie),
        &[Field::Text("latitude", "1.0")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["message"], "Capture data not received.");
}

#[tokio::test]
async fn logout_ends_session() {
    let app = app().await;
    let cookie = logged_in(&app.router, "alice", ALICE).await;
    assert_eq!(get(&app.router, "/", Some(&cookie)).await.status(), StatusCode::OK);

    let response = get(&app.router, "/logout", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    let cleared = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));

    assert_eq!(location(&get(&app.router, "/", Some(&cookie)).await), "/login");
}

#[tokio::test]
async fn preview_refused_while_camera_held() {
    let app = app().await;
    let cookie = logged_in(&app.router, "alice", ALICE).await;

    let permit = app.state.camera.clone().try_acquire_owned().unwrap();
    let response = get(&app.router, "/video_feed", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    drop(permit);

    // The configured device does not exist, so opening it fails cleanly
    // and the permit comes back.
    let response = get(&app.router, "/video_feed", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.state.camera.available_permits(), 1);
}
