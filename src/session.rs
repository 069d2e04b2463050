//! WhatsApp Web bridge session.
//!
//! The bridge is a sidecar that owns the WhatsApp Web login and transport.
//! This module starts its session, renders the login QR code in the terminal,
//! tracks readiness and sends messages through it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::media::MediaPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Media {
        media: Arc<MediaPayload>,
        caption: String,
    },
}

impl MessageContent {
    /// Media is sent with the message as its caption, otherwise the message alone.
    pub fn new(message: String, media: Option<Arc<MediaPayload>>) -> Self {
        match media {
            Some(media) => Self::Media {
                media,
                caption: message,
            },
            None => Self::Text(message),
        }
    }
}

/// The send primitive of the messaging network.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, destination: &str, content: &MessageContent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    AwaitingScan,
    Ready,
    Disconnected,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BridgeState {
    Starting,
    Qr,
    Ready,
    Disconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct BridgeStatus {
    state: BridgeState,
    #[serde(default)]
    qr: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBody<'a> {
    chat_id: &'a str,
    content: WireContent<'a>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireContent<'a> {
    Text {
        body: &'a str,
    },
    Media {
        mimetype: &'a str,
        data: &'a str,
        filename: &'a str,
        caption: &'a str,
    },
}

impl<'a> From<&'a MessageContent> for WireContent<'a> {
    fn from(content: &'a MessageContent) -> Self {
        match content {
            MessageContent::Text(body) => WireContent::Text { body },
            MessageContent::Media { media, caption } => WireContent::Media {
                mimetype: &media.mime_type,
                data: &media.data,
                filename: &media.filename,
                caption,
            },
        }
    }
}

#[derive(Deserialize)]
struct BridgeError {
    error: String,
}

pub struct BridgeClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl BridgeClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("wa-bulk-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build bridge http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn start_session(&self) -> anyhow::Result<()> {
        let response = self
            .request(Method::POST, "/session/start")
            .send()
            .await
            .context("bridge unreachable")?;
        check(response).await?;
        Ok(())
    }

    pub async fn status(&self) -> anyhow::Result<BridgeStatus> {
        let response = self
            .request(Method::GET, "/session/status")
            .send()
            .await
            .context("bridge unreachable")?;
        let status = check(response)
            .await?
            .json::<BridgeStatus>()
            .await
            .context("malformed session status")?;
        Ok(status)
    }
}

#[async_trait]
impl Messenger for BridgeClient {
    async fn send_message(&self, destination: &str, content: &MessageContent) -> anyhow::Result<()> {
        let body = SendBody {
            chat_id: destination,
            content: content.into(),
        };
        let response = self
            .request(Method::POST, "/messages")
            .json(&body)
            .send()
            .await
            .context("bridge unreachable")?;
        check(response).await?;
        Ok(())
    }
}

/// Passes 2xx responses through, turns anything else into an error carrying
/// the bridge's own message when it sent one.
async fn check(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<BridgeError>(&text) {
        Ok(err) => bail!("{}", err.error),
        Err(_) if text.trim().is_empty() => bail!("bridge returned {}", status),
        Err(_) => bail!("bridge returned {}: {}", status, text.trim()),
    }
}

/// Starts the bridge session and follows it until shutdown, publishing every
/// state change on `state`.
pub async fn initialize(
    client: Arc<BridgeClient>,
    poll: Duration,
    state: watch::Sender<SessionState>,
    shutdown: CancellationToken,
) {
    info!("Starting WhatsApp session...");
    loop {
        match client.start_session().await {
            Ok(()) => break,
            Err(err) => warn!("Could not start WhatsApp session: {:#}", err),
        }
        if sleep_or_shutdown(poll, &shutdown).await {
            return;
        }
    }

    let mut last_qr: Option<String> = None;
    loop {
        match client.status().await {
            Ok(status) => {
                let next = match status.state {
                    BridgeState::Starting => SessionState::Starting,
                    BridgeState::Qr => {
                        if let Some(qr) = status.qr.filter(|qr| last_qr.as_ref() != Some(qr)) {
                            show_qr(&qr);
                            last_qr = Some(qr);
                        }
                        SessionState::AwaitingScan
                    }
                    BridgeState::Ready => SessionState::Ready,
                    BridgeState::Disconnected => SessionState::Disconnected,
                    BridgeState::Unknown => *state.borrow(),
                };
                let previous = state.send_replace(next);
                if previous != next {
                    match next {
                        SessionState::Ready => {
                            last_qr = None;
                            info!("WhatsApp client is ready!");
                        }
                        SessionState::Disconnected => warn!("WhatsApp client disconnected"),
                        other => debug!("Session state: {:?}", other),
                    }
                }
            }
            Err(err) => debug!("Session status unavailable: {:#}", err),
        }

        if sleep_or_shutdown(poll, &shutdown).await {
            break;
        }
    }
    debug!("Session watcher stopped");
}

async fn sleep_or_shutdown(period: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        _ = shutdown.cancelled() => true,
    }
}

fn show_qr(data: &str) {
    debug!("QR data: {}", data);
    match render_qr(data) {
        Ok(art) => info!("Scan this QR code to log in:\n{}", art),
        Err(err) => warn!("Scan this QR code to log in (render failed: {:#}): {}", err, data),
    }
}

/// Renders a QR code with Unicode half blocks, two module rows per line.
pub fn render_qr(data: &str) -> anyhow::Result<String> {
    use qrcode::{Color, EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)
        .context("QR generation failed")?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::new();
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn sends_text_message() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/messages").json_body(json!({
                    "chatId": "911234567890@c.us",
                    "content": { "type": "text", "body": "hello" }
                }));
                then.status(200).json_body(json!({ "ok": true }));
            })
            .await;

        let client = BridgeClient::new(&server.base_url(), None, TIMEOUT).unwrap();
        client
            .send_message("911234567890@c.us", &MessageContent::Text("hello".into()))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_media_with_caption_and_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/messages")
                    .header("authorization", "Bearer s3cret")
                    .json_body(json!({
                        "chatId": "911234567890@c.us",
                        "content": {
                            "type": "media",
                            "mimetype": "image/png",
                            "data": "aGk=",
                            "filename": "hi.png",
                            "caption": "look"
                        }
                    }));
                then.status(201);
            })
            .await;

        let media = Arc::new(MediaPayload::from_bytes("image/png", b"hi", "hi.png"));
        let client = BridgeClient::new(&server.base_url(), Some("s3cret".into()), TIMEOUT).unwrap();
        client
            .send_message("911234567890@c.us", &MessageContent::new("look".into(), Some(media)))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_bridge_error_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/messages");
                then.status(500)
                    .json_body(json!({ "error": "Evaluation failed: invalid wid" }));
            })
            .await;

        let client = BridgeClient::new(&server.base_url(), None, TIMEOUT).unwrap();
        let err = client
            .send_message("910000000000@c.us", &MessageContent::Text("x".into()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Evaluation failed: invalid wid");
    }

    #[tokio::test]
    async fn non_json_error_keeps_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/messages");
                then.status(502).body("upstream down");
            })
            .await;

        let client = BridgeClient::new(&server.base_url(), None, TIMEOUT).unwrap();
        let err = client
            .send_message("910000000000@c.us", &MessageContent::Text("x".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn slow_bridge_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/messages");
                then.status(200).delay(Duration::from_secs(5));
            })
            .await;

        let client = BridgeClient::new(&server.base_url(), None, Duration::from_millis(100)).unwrap();
        let err = client
            .send_message("910000000000@c.us", &MessageContent::Text("x".into()))
            .await
            .unwrap_err();
        assert!(err
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout));
    }

    #[tokio::test]
    async fn initialize_follows_session_until_ready() {
        let server = MockServer::start_async().await;
        let start = server
            .mock_async(|when, then| {
                when.method(POST).path("/session/start");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/status");
                then.status(200).json_body(json!({ "state": "ready" }));
            })
            .await;

        let client = Arc::new(BridgeClient::new(&server.base_url(), None, TIMEOUT).unwrap());
        let (tx, mut rx) = watch::channel(SessionState::Starting);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(initialize(
            client,
            Duration::from_millis(10),
            tx,
            shutdown.clone(),
        ));

        rx.wait_for(|state| *state == SessionState::Ready).await.unwrap();
        shutdown.cancel();
        task.await.unwrap();
        start.assert_async().await;
    }

    #[tokio::test]
    async fn status_maps_qr_state() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/status");
                then.status(200)
                    .json_body(json!({ "state": "qr", "qr": "2@abc,def" }));
            })
            .await;

        let client = BridgeClient::new(&server.base_url(), None, TIMEOUT).unwrap();
        let status = client.status().await.unwrap();
        assert!(matches!(status.state, BridgeState::Qr));
        assert_eq!(status.qr.as_deref(), Some("2@abc,def"));
    }

    #[test]
    fn renders_qr_as_half_blocks() {
        let art = render_qr("2@abc,def").unwrap();
        let lines: Vec<&str> = art.lines().collect();
        // version 1 code is 21 modules wide
        assert_eq!(lines.len(), 11);
        assert!(lines.iter().all(|line| line.chars().count() == 21));
    }

    #[test]
    fn content_without_media_is_text() {
        assert_eq!(
            MessageContent::new("hi".into(), None),
            MessageContent::Text("hi".into())
        );
    }
}
