//! Live MJPEG camera preview with detected faces outlined.

use attend_hw::frame::{draw_outline, encode_jpeg};
use attend_hw::{Camera, CameraError, FrameError, FrameStream};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use image::{Rgb, RgbImage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::{EngineError, EngineHandle};
use crate::routes::{AppState, CurrentUser};
use crate::session::CameraRelease;

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const FACE_OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const FACE_OUTLINE_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
enum PreviewError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

type Part = Result<Vec<u8>, std::io::Error>;

/// Where preview frames come from.
trait FrameSource {
    fn grab(&mut self) -> Result<RgbImage, CameraError>;
}

impl FrameSource for FrameStream<'_> {
    fn grab(&mut self) -> Result<RgbImage, CameraError> {
        Ok(self.next_frame()?.image)
    }
}

/// Wrap one JPEG as a part of the `boundary=frame` multipart stream.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut part = Vec::with_capacity(HEAD.len() + jpeg.len() + 2);
    part.extend_from_slice(HEAD);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// `GET /video_feed`
///
/// Holds the camera permit for the lifetime of the stream. The device is
/// opened and read on a blocking task; the stream ends when the client goes
/// away or the owning session logs out.
pub async fn video_feed(current: CurrentUser, State(state): State<AppState>) -> Response {
    let Ok(permit) = state.camera.clone().try_acquire_owned() else {
        tracing::info!(user_id = current.user.id, "preview refused: camera busy");
        return (StatusCode::CONFLICT, "Camera is in use.").into_response();
    };

    let (tx, rx) = mpsc::channel::<Part>(2);
    let (opened_tx, opened_rx) = oneshot::channel::<Result<(), CameraError>>();
    let engine = state.service.engine().clone();
    let settings = state.preview.clone();
    let release = current.session.camera_release.clone();
    let user_id = current.user.id;

    tokio::task::spawn_blocking(move || {
        let camera = match Camera::open(&settings.device) {
            Ok(camera) => camera,
            Err(e) => {
                drop(permit);
                let _ = opened_tx.send(Err(e));
                return;
            }
        };
        // `permit` stays captured by the closure, so it is dropped after `camera`.
        let _ = opened_tx.send(Ok(()));
        tracing::info!(user_id, device = %settings.device, "preview started");
        let streamed = camera.stream().map_err(PreviewError::from).and_then(|mut frames| {
            stream_frames(&mut frames, settings.quality, &engine, &release, &tx)
        });
        match streamed {
            Ok(()) => tracing::info!(user_id, "preview ended"),
            Err(e) => tracing::warn!(user_id, error = %e, "preview stopped"),
        }
    });

    match opened_rx.await {
        Ok(Ok(())) => (
            [(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)],
            Body::from_stream(ReceiverStream::new(rx)),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "camera unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "Camera unavailable.").into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Annotate and send frames until the session releases the camera or the
/// client goes away.
fn stream_frames<S: FrameSource>(
    source: &mut S,
    quality: u8,
    engine: &EngineHandle,
    release: &CameraRelease,
    tx: &mpsc::Sender<Part>,
) -> Result<(), PreviewError> {
    loop {
        if release.is_tripped() || tx.is_closed() {
            return Ok(());
        }

        let mut image = source.grab()?;
        match engine.detect_blocking(image.clone()) {
            Ok(faces) => {
                for face in &faces {
                    draw_outline(
                        &mut image,
                        face.x,
                        face.y,
                        face.width,
                        face.height,
                        FACE_OUTLINE,
                        FACE_OUTLINE_THICKNESS,
                    );
                }
            }
            Err(EngineError::Detection(reason)) => {
                tracing::debug!(%reason, "preview detection failed");
            }
            Err(e) => return Err(e.into()),
        }

        let jpeg = encode_jpeg(&image, quality)?;
        if tx.blocking_send(Ok(multipart_part(&jpeg))).is_err() {
            return Ok(());
        }
    }
}
