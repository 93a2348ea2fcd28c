//! Registration, login and presence marking on top of the engine and store.

use crate::engine::{EngineError, EngineHandle};
use crate::password;
use crate::store::{Page, PresenceRecord, Store, StoreError, User};
use attend_core::{ExtractFailure, VerificationOutcome, VerifyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("face image is required")]
    MissingImage,
    #[error("username already exists")]
    UsernameTaken,
    #[error("no unique face detected: {0}")]
    NoUniqueFace(ExtractFailure),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("user has no enrolled face encoding")]
    MissingEnrollment,
    #[error("no face in capture: {0}")]
    NoFaceInCapture(ExtractFailure),
    #[error("stored encoding incompatible with capture: {0}")]
    IncompatibleEncoding(VerifyError),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ServiceError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "Username and password are required.",
            Self::MissingImage => "Face image is required.",
            Self::UsernameTaken => "Username already exists.",
            Self::NoUniqueFace(_) => {
                "No unique face detected. Please use a clear, front-facing photo."
            }
            Self::InvalidCredentials => "Please check your login details and try again.",
            Self::MissingEnrollment => "Error: No face encoding found for this user.",
            Self::NoFaceInCapture(_) => "No face detected in the captured image.",
            Self::IncompatibleEncoding(_) => {
                "Stored face encoding is incompatible. Please contact an administrator."
            }
            Self::PasswordHash(_) | Self::Store(_) | Self::Engine(_) => "Internal server error.",
        }
    }

    /// Errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::PasswordHash(_) | Self::Store(_) | Self::Engine(_) | Self::IncompatibleEncoding(_)
        )
    }
}

/// A recorded presence together with the comparison that produced it.
#[derive(Debug, Clone)]
pub struct MarkedPresence {
    pub outcome: VerificationOutcome,
    pub record: PresenceRecord,
}

#[derive(Clone)]
pub struct AttendanceService {
    store: Store,
    engine: EngineHandle,
    page_size: u32,
}

impl AttendanceService {
    pub fn new(store: Store, engine: EngineHandle, page_size: u32) -> Self {
        Self {
            store,
            engine,
            page_size,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Enroll a new user from one photo.
    ///
    /// The username is checked before the photo is looked at, and nothing is
    /// written unless exactly one face was encoded.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        image: Option<Vec<u8>>,
    ) -> Result<User, ServiceError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ServiceError::MissingCredentials);
        }
        let image = image.filter(|bytes| !bytes.is_empty()).ok_or(ServiceError::MissingImage)?;

        if self.store.find_user_by_username(username).await?.is_some() {
            tracing::info!(username, "registration rejected: username taken");
            return Err(ServiceError::UsernameTaken);
        }

        let encoding = self
            .engine
            .enroll(image)
            .await?
            .map_err(ServiceError::NoUniqueFace)?;

        let hash = password::hash_password(password)
            .map_err(|e| ServiceError::PasswordHash(e.to_string()))?;

        match self.store.create_user(username, &hash, &encoding).await {
            Ok(user) => Ok(user),
            Err(StoreError::UsernameTaken) => Err(ServiceError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Check a username/password pair.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, ServiceError> {
        let Some(user) = self.store.find_user_by_username(username.trim()).await? else {
            return Err(ServiceError::InvalidCredentials);
        };
        let valid = password::verify_password(password, &user.password_hash).unwrap_or_else(|e| {
            tracing::warn!(user_id = user.id, error = %e, "stored password hash is malformed");
            false
        });
        if valid {
            Ok(user)
        } else {
            Err(ServiceError::InvalidCredentials)
        }
    }

    /// Verify a capture against the user's enrollment and record the outcome.
    ///
    /// Matched and unmatched captures are both recorded; a capture without a
    /// usable face is rejected and leaves no record.
    pub async fn mark_presence(
        &self,
        user: &User,
        capture: Option<Vec<u8>>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<MarkedPresence, ServiceError> {
        let capture = capture.filter(|bytes| !bytes.is_empty()).ok_or(ServiceError::MissingImage)?;
        let stored = user.face_encoding.clone().ok_or(ServiceError::MissingEnrollment)?;

        let outcome = self
            .engine
            .verify(stored, capture)
            .await?
            .map_err(|e| match e {
                VerifyError::NoFaceInCapture(reason) => ServiceError::NoFaceInCapture(reason),
                other => ServiceError::IncompatibleEncoding(other),
            })?;

        tracing::info!(
            user_id = user.id,
            matched = outcome.matched,
            distance = outcome.distance,
            "presence verified"
        );

        let record = self
            .store
            .insert_presence(outcome.into_presence(user.id, latitude, longitude))
            .await?;
        Ok(MarkedPresence { outcome, record })
    }

    pub async fn history(
        &self,
        user_id: i64,
        page: u32,
    ) -> Result<Page<PresenceRecord>, ServiceError> {
        Ok(self.store.presence_page(user_id, page, self.page_size).await?)
    }
}
