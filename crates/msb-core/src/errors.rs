/// Core error type for the bridge.
///
/// Adapter crates map their specific failures into this type so the sync
/// engine can classify them consistently: everything except `Config` is
/// recoverable and degrades to "try again next tick".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Source credentials or session token rejected. Triggers a re-login on
    /// the next ingestion tick.
    #[error("auth failure: {0}")]
    AuthFailure(String),

    /// Source reachable but returned an unusable payload. Retried next tick
    /// with no state change.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Notification channel not ready or not responding. Dispatch/reconcile
    /// skip the tick; pending messages stay pending.
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
