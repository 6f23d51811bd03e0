//! Source-site adapter (reqwest).
//!
//! Implements the `msb-core` SourcePort against the marketplace's HTTP
//! surface: cookie-based login, unread-inbox polling and reply push-back.
//! The session token handed to callers is an opaque JSON map of the login
//! cookies; this adapter is the only thing that looks inside it.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::{sync::Mutex, time::sleep};

use msb_core::{
    domain::{PartyId, RoomId},
    errors::Error,
    ports::{MessagePayload, SourceInbox, SourcePort},
    Result,
};

const MAX_RETRIES: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

#[derive(Deserialize)]
struct ApiMeta {
    status: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    meta: ApiMeta,
}

#[derive(Deserialize)]
struct UnreadMessage {
    #[serde(default)]
    id: u64,
    room_id: i64,
    sender_id: i64,
    admin_id: i64,
    text: String,
}

#[derive(Deserialize)]
struct UnreadResponse {
    total: Option<i64>,
    latest: Option<UnreadMessage>,
}

pub struct HttpSource {
    client: Client,
    base_url: String,
    /// Reply push is slow on the source side and the site rejects
    /// concurrent posts from one session, so pushes are single-flight.
    push_gate: Mutex<()>,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            push_gate: Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Send with bounded retries on transient failures (connect errors,
    /// timeouts, 500/502/504), exponential backoff between attempts.
    async fn send_with_retry(&self, mut op: impl FnMut() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0usize;
        loop {
            let outcome = op().send().await;
            let retryable = match &outcome {
                Ok(resp) => matches!(
                    resp.status(),
                    StatusCode::INTERNAL_SERVER_ERROR
                        | StatusCode::BAD_GATEWAY
                        | StatusCode::GATEWAY_TIMEOUT
                ),
                Err(e) => e.is_connect() || e.is_timeout(),
            };
            if retryable && attempt < MAX_RETRIES {
                attempt += 1;
                sleep(RETRY_BACKOFF * 2u32.pow(attempt as u32 - 1)).await;
                continue;
            }
            return outcome.map_err(|e| {
                Error::SourceUnavailable(format!("request failed: {e}"))
            });
        }
    }
}

/// Serialize the session cookies captured at login into the opaque token.
fn cookies_to_token(response: &Response) -> Result<String> {
    let mut jar = BTreeMap::new();
    for value in response.headers().get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        // "name=value; Path=/; HttpOnly" -> first pair only
        let pair = raw.split(';').next().unwrap_or(raw);
        if let Some((name, val)) = pair.split_once('=') {
            jar.insert(name.trim().to_string(), val.trim().to_string());
        }
    }
    if jar.is_empty() {
        return Err(Error::AuthFailure(
            "login succeeded but no session cookies were set".to_string(),
        ));
    }
    Ok(serde_json::to_string(&jar)?)
}

/// Render the opaque token back into a Cookie header value.
fn token_to_cookie_header(token: &str) -> Result<String> {
    let jar: BTreeMap<String, String> = serde_json::from_str(token)
        .map_err(|_| Error::AuthFailure("malformed session token".to_string()))?;
    if jar.is_empty() {
        return Err(Error::AuthFailure("empty session token".to_string()));
    }
    Ok(jar
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; "))
}

fn check_session(status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::AuthFailure(format!("session rejected ({status})")));
    }
    Ok(())
}

#[async_trait]
impl SourcePort for HttpSource {
    async fn authenticate(&self, login_id: &str, secret: &str) -> Result<String> {
        let url = self.url("/api/v1/login");
        let body = serde_json::json!({ "email": login_id, "password": secret });
        let response = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(Error::AuthFailure(format!(
                "login rejected ({})",
                response.status()
            )));
        }
        let token = cookies_to_token(&response)?;
        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::External(format!("login response: {e}")))?;
        if parsed.meta.status != "ok" {
            return Err(Error::AuthFailure(format!(
                "login status '{}'",
                parsed.meta.status
            )));
        }
        tracing::info!("logged in to source as {login_id}");
        Ok(token)
    }

    async fn fetch_latest(&self, session_token: &str) -> Result<SourceInbox> {
        let cookie = token_to_cookie_header(session_token)?;
        let url = self.url("/api/v1/inbox/unread");
        let response = self
            .send_with_retry(|| self.client.get(&url).header(header::COOKIE, &cookie))
            .await?;

        check_session(response.status())?;
        if !response.status().is_success() {
            return Err(Error::SourceUnavailable(format!(
                "inbox poll failed ({})",
                response.status()
            )));
        }

        let parsed: UnreadResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                // Unreadable page; report the sentinel instead of failing
                // the whole tick.
                tracing::warn!("unread inbox unparsable: {e}");
                return Ok(SourceInbox {
                    total_unread: -1,
                    latest: None,
                });
            }
        };

        Ok(SourceInbox {
            total_unread: parsed.total.unwrap_or(-1),
            latest: parsed.latest.map(|m| MessagePayload {
                source_id: m.id,
                room_id: RoomId(m.room_id),
                sender: PartyId(m.sender_id),
                admin: PartyId(m.admin_id),
                text: m.text,
            }),
        })
    }

    async fn push_reply(
        &self,
        session_token: &str,
        room: RoomId,
        counterparty: PartyId,
        text: &str,
    ) -> Result<()> {
        let _gate = self.push_gate.lock().await;

        let cookie = token_to_cookie_header(session_token)?;
        let url = self.url(&format!("/api/v1/rooms/{room}/messages"));
        let body = serde_json::json!({ "to": counterparty.0, "text": text });
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .header(header::COOKIE, &cookie)
                    .json(&body)
            })
            .await?;

        check_session(response.status())?;
        if !response.status().is_success() {
            return Err(Error::External(format!(
                "reply push failed ({})",
                response.status()
            )));
        }
        tracing::info!("reply pushed to source room {room}");
        Ok(())
    }
}
