//! attendd: face-verified attendance over HTTP.
//!
//! Users enroll with a single face photo, log in with a password and mark
//! presence from a webcam capture that is compared against the enrollment.

pub mod config;
pub mod engine;
pub mod pages;
pub mod password;
pub mod preview;
pub mod routes;
pub mod service;
pub mod session;
pub mod store;

pub use routes::{build_router, AppState};
