//! In-memory login sessions keyed by a cookie token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "attend_session";

/// Flag a preview stream polls to know it must give the camera back.
#[derive(Clone, Default)]
pub struct CameraRelease(Arc<AtomicBool>);

impl CameraRelease {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub camera_release: CameraRelease,
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        // A poisoned map only means another handler panicked mid-insert.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a session and return its token.
    pub fn create(&self, user_id: i64, username: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.lock().insert(
            token.clone(),
            Session {
                user_id,
                username: username.to_string(),
                camera_release: CameraRelease::default(),
            },
        );
        tracing::debug!(user_id, "session created");
        token
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        self.lock().get(token).cloned()
    }

    /// End a session, signalling any preview it owns to release the camera.
    pub fn remove(&self, token: &str) -> Option<Session> {
        let session = self.lock().remove(token)?;
        session.camera_release.trip();
        tracing::debug!(user_id = session.user_id, "session ended");
        Some(session)
    }
}

/// Extract the session token from a `Cookie` header value.
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
