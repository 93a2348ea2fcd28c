use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Directory containing the detector and encoder model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// V4L2 device used for the live preview (default: /dev/video0).
    pub camera_device: String,
    /// Presence records per dashboard page.
    pub page_size: u32,
    /// JPEG quality of preview frames.
    pub preview_quality: u8,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ATTEND_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| attend_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("attend");

        let db_path = std::env::var("ATTEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let listen_addr = env_parse("ATTEND_LISTEN_ADDR").unwrap_or_else(|| {
            DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or(SocketAddr::from(([127, 0, 0, 1], 5000)))
        });

        Self {
            listen_addr,
            model_dir,
            db_path,
            camera_device: std::env::var("ATTEND_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            page_size: env_parse("ATTEND_PAGE_SIZE").filter(|&n| n > 0).unwrap_or(10),
            preview_quality: env_parse("ATTEND_PREVIEW_QUALITY").unwrap_or(80),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
