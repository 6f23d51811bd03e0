use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed process configuration.
///
/// Static wiring only — operator-tunable values (poll intervals, channel
/// credentials) live in [`crate::settings::Settings`] and can change at
/// runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the source site API.
    pub source_base_url: String,

    /// Optional account seed, registered into the store at startup when not
    /// already present. Further accounts arrive through the persisted state.
    pub source_login_id: Option<String>,
    pub source_secret: Option<String>,

    /// Operator settings persistence (read by the settings store).
    pub settings_file: PathBuf,
    /// Snapshot file for the persisted account/message store.
    pub state_file: PathBuf,

    /// Per-request timeout for source and channel HTTP calls.
    pub http_timeout: Duration,
    /// Bounded wait for a previous channel client to release its polling
    /// resource during reinitialization.
    pub channel_release_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let source_base_url = env_str("SOURCE_BASE_URL").unwrap_or_default();
        if source_base_url.trim().is_empty() {
            return Err(Error::Config(
                "SOURCE_BASE_URL environment variable is required".to_string(),
            ));
        }

        let settings_file =
            env_path("SETTINGS_FILE").unwrap_or_else(|| PathBuf::from("settings.json"));
        let state_file = env_path("STATE_FILE").unwrap_or_else(|| PathBuf::from("sync-state.json"));

        let http_timeout = Duration::from_millis(env_u64("HTTP_TIMEOUT_MS").unwrap_or(10_000));
        let channel_release_timeout =
            Duration::from_millis(env_u64("CHANNEL_RELEASE_TIMEOUT_MS").unwrap_or(5_000));

        Ok(Self {
            source_base_url: source_base_url.trim_end_matches('/').to_string(),
            source_login_id: env_str("SOURCE_LOGIN_ID"),
            source_secret: env_str("SOURCE_SECRET"),
            settings_file,
            state_file,
            http_timeout,
            channel_release_timeout,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}
