use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Operator-tunable runtime settings.
///
/// Loaded once at startup; every successful `put` must be followed by
/// `Supervisor::apply_settings` so the job table and the channel client pick
/// up the change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub intervals: RefreshIntervals,
    pub channel: ChannelSettings,
}

/// Poll intervals in seconds, one per job. The supervisor clamps these to
/// sane bounds before scheduling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshIntervals {
    pub ingest_secs: u64,
    pub dispatch_secs: u64,
    pub reconcile_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub bot_token: String,
    pub chat_id: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            intervals: RefreshIntervals {
                ingest_secs: 120,
                dispatch_secs: 10,
                reconcile_secs: 10,
            },
            channel: ChannelSettings {
                bot_token: String::new(),
                chat_id: 0,
            },
        }
    }
}

/// Settings persistence collaborator.
pub trait SettingsStore: Send + Sync {
    /// Current settings; defaults when nothing has been persisted yet.
    fn get(&self) -> Settings;
    fn put(&self, settings: &Settings) -> Result<()>;
}

/// JSON-file settings store.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self) -> Settings {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Settings::default();
        };
        match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("settings file unreadable, falling back to defaults: {e}");
                Settings::default()
            }
        }
    }

    fn put(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}.json", std::process::id()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = JsonSettingsStore::new(tmp_file("msb-settings-missing"));
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn put_then_get_round_trips() {
        let path = tmp_file("msb-settings-rt");
        let store = JsonSettingsStore::new(path.clone());

        let mut s = Settings::default();
        s.intervals.ingest_secs = 300;
        s.channel.bot_token = "123:abc".to_string();
        s.channel.chat_id = 42;

        store.put(&s).unwrap();
        assert_eq!(store.get(), s);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let path = tmp_file("msb-settings-corrupt");
        fs::write(&path, "{not json").unwrap();
        let store = JsonSettingsStore::new(path.clone());
        assert_eq!(store.get(), Settings::default());
        let _ = fs::remove_file(path);
    }
}
