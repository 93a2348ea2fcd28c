use attend_core::verifier;
use attend_core::{
    BoundingBox, Encoding, ExtractFailure, Extractor, FaceEmbedder, VerificationOutcome,
    VerifyError,
};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Enroll {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Encoding, ExtractFailure>>,
    },
    Verify {
        stored: Encoding,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<VerificationOutcome, VerifyError>>,
    },
    Detect {
        frame: RgbImage,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Encode the single face in an enrollment photo.
    pub async fn enroll(
        &self,
        image: Vec<u8>,
    ) -> Result<Result<Encoding, ExtractFailure>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll { image, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Encode a capture and compare it against a stored encoding.
    pub async fn verify(
        &self,
        stored: Encoding,
        image: Vec<u8>,
    ) -> Result<Result<VerificationOutcome, VerifyError>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Verify {
            stored,
            image,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Detect faces in a preview frame. Must not be called from an async context.
    pub fn detect_blocking(&self, frame: RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .blocking_send(EngineRequest::Detect { frame, reply })
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.blocking_recv().map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The embedder's inference sessions need exclusive access, so one thread
/// owns them and serves requests in order.
pub fn spawn_engine<E>(embedder: E) -> Result<EngineHandle, EngineError>
where
    E: FaceEmbedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
    let mut extractor = Extractor::new(embedder);

    std::thread::Builder::new()
        .name("attend-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Enroll { image, reply } => {
                        let result = extractor.extract(&image);
                        if let Err(reason) = &result {
                            tracing::info!(%reason, "enrollment photo rejected");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        stored,
                        image,
                        reply,
                    } => {
                        let _ = reply.send(verifier::verify(&mut extractor, &stored, &image));
                    }
                    EngineRequest::Detect { frame, reply } => {
                        let result = extractor
                            .detect(&frame)
                            .map_err(|e| EngineError::Detection(e.to_string()));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
