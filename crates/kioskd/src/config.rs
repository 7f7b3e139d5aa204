use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration: optional TOML file, then `KIOSK_*` environment
/// variables, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the class/session/user REST API.
    pub api_url: String,
    /// Base URL of the face verification service (default: `api_url`).
    pub verify_url: String,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub width: u32,
    pub height: u32,
    /// Timeout for directory requests.
    pub request_timeout: Duration,
    /// Timeout for a verification upload.
    pub verify_timeout: Duration,
    /// Interval between black-frame samples.
    pub health_interval: Duration,
    pub retry_delay: Duration,
    pub playing_timeout: Duration,
    pub max_retries: u32,
    pub late_grace_minutes: i64,
    /// How often the bound session's end time is re-checked.
    pub revalidate_interval: Duration,
    /// Hex SHA-256 of the kiosk exit credential. Without it the kiosk
    /// cannot be unlocked over D-Bus.
    pub exit_credential_sha256: Option<String>,
    /// Holds the kiosk-mode flag and auth token.
    pub state_dir: PathBuf,
}

/// Shape of the optional config file; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub verify_url: Option<String>,
    pub camera_device: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub verify_timeout_secs: Option<u64>,
    pub health_interval_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub playing_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub late_grace_minutes: Option<i64>,
    pub revalidate_interval_secs: Option<u64>,
    pub exit_credential_sha256: Option<String>,
    pub state_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

impl Config {
    /// Load configuration from `KIOSK_CONFIG` (if set) and `KIOSK_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let file = match std::env::var("KIOSK_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::layered(file, |key| std::env::var(key).ok()))
    }

    /// Environment (as seen through `env`) wins over the file.
    pub fn layered(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let env: &dyn Fn(&str) -> Option<String> = &env;
        let string = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_url = string("KIOSK_API_URL")
            .or(file.api_url)
            .unwrap_or_else(|| "http://localhost:8000".to_string());
        let verify_url = string("KIOSK_VERIFY_URL")
            .or(file.verify_url)
            .unwrap_or_else(|| api_url.clone());

        let state_dir = env("KIOSK_STATE_DIR")
            .map(PathBuf::from)
            .or(file.state_dir)
            .unwrap_or_else(|| {
                env("XDG_RUNTIME_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir)
                    .join("attendance-kiosk")
            });

        Self {
            api_url,
            verify_url,
            camera_device: string("KIOSK_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            width: env_parse(env, "KIOSK_CAMERA_WIDTH").or(file.width).unwrap_or(640),
            height: env_parse(env, "KIOSK_CAMERA_HEIGHT").or(file.height).unwrap_or(480),
            request_timeout: Duration::from_secs(
                env_parse(env, "KIOSK_REQUEST_TIMEOUT_SECS")
                    .or(file.request_timeout_secs)
                    .unwrap_or(15),
            ),
            verify_timeout: Duration::from_secs(
                env_parse(env, "KIOSK_VERIFY_TIMEOUT_SECS")
                    .or(file.verify_timeout_secs)
                    .unwrap_or(60),
            ),
            health_interval: Duration::from_millis(
                env_parse(env, "KIOSK_HEALTH_INTERVAL_MS")
                    .or(file.health_interval_ms)
                    .unwrap_or(2000),
            ),
            retry_delay: Duration::from_millis(
                env_parse(env, "KIOSK_RETRY_DELAY_MS")
                    .or(file.retry_delay_ms)
                    .unwrap_or(1000),
            ),
            playing_timeout: Duration::from_millis(
                env_parse(env, "KIOSK_PLAYING_TIMEOUT_MS")
                    .or(file.playing_timeout_ms)
                    .unwrap_or(5000),
            ),
            max_retries: env_parse(env, "KIOSK_MAX_RETRIES").or(file.max_retries).unwrap_or(2),
            late_grace_minutes: env_parse(env, "KIOSK_LATE_GRACE_MINUTES")
                .or(file.late_grace_minutes)
                .unwrap_or(10),
            revalidate_interval: Duration::from_secs(
                env_parse(env, "KIOSK_REVALIDATE_SECS")
                    .or(file.revalidate_interval_secs)
                    .unwrap_or(30),
            ),
            exit_credential_sha256: string("KIOSK_EXIT_CREDENTIAL_SHA256").or(file.exit_credential_sha256),
            state_dir,
        }
    }

    pub fn flags_path(&self) -> PathBuf {
        self.state_dir.join("flags.json")
    }
}

fn env_parse<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparsable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::layered(FileConfig::default(), env(&[("XDG_RUNTIME_DIR", "/run/user/1000")]));
        assert_eq!(cfg.api_url, "http://localhost:8000");
        assert_eq!(cfg.verify_url, cfg.api_url);
        assert_eq!(cfg.verify_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.late_grace_minutes, 10);
        assert_eq!(cfg.flags_path(), PathBuf::from("/run/user/1000/attendance-kiosk/flags.json"));
        assert!(cfg.exit_credential_sha256.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            api_url = "http://backend:9000"
            camera_device = "/dev/video4"
            late_grace_minutes = 5
            "#,
        )
        .unwrap();
        let cfg = Config::layered(
            file,
            env(&[
                ("KIOSK_CAMERA_DEVICE", "/dev/video2"),
                ("KIOSK_HEALTH_INTERVAL_MS", "500"),
                ("KIOSK_MAX_RETRIES", "lots"),
            ]),
        );
        assert_eq!(cfg.api_url, "http://backend:9000");
        assert_eq!(cfg.verify_url, "http://backend:9000");
        assert_eq!(cfg.camera_device, "/dev/video2");
        assert_eq!(cfg.late_grace_minutes, 5);
        assert_eq!(cfg.health_interval, Duration::from_millis(500));
        assert_eq!(cfg.max_retries, 2);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video0\"").is_err());
    }
}
