//! HTTP client for the stream daemon: action endpoints plus the status push
//! channel.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use stream_proto::protocol::{ApiReply, CheckReply, StatusSnapshot, StreamKind, STATUS_EVENT};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::PanelError;
use crate::reconcile::StartPlan;
use crate::sse::{SseDecoder, SseFrame};

/// Reconnect delay until the server sends its own `retry:`.
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

/// What the status channel reports to the app loop.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Connected,
    Snapshot(StatusSnapshot),
    Disconnected(String),
}

#[derive(Clone)]
pub struct StreamClient {
    http: Client,
    base: String,
}

impl StreamClient {
    /// Every request carries `user_header: user_id`, standing in for the
    /// upstream auth layer.
    pub fn new(server_url: &str, user_header: &str, user_id: &str) -> Result<Self, PanelError> {
        let name = HeaderName::from_bytes(user_header.as_bytes())
            .map_err(|_| PanelError::Refused("invalid identity header name"))?;
        let value =
            HeaderValue::from_str(user_id).map_err(|_| PanelError::Refused("invalid user id"))?;
        let mut headers = HeaderMap::new();
        headers.insert(name, value);

        let http = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            base: server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn session(&self) -> Result<StatusSnapshot, PanelError> {
        let resp = self.http.get(self.url("/api/session")).send().await?;
        decode(resp).await
    }

    pub async fn start(&self, plan: &StartPlan) -> Result<ApiReply, PanelError> {
        let path = format!("/api/stream/{}/start", plan.kind.as_str());
        let resp = self
            .http
            .post(self.url(&path))
            .json(&plan.request)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn stop(&self, kind: StreamKind) -> Result<ApiReply, PanelError> {
        let path = format!("/api/stream/{}/stop", kind.as_str());
        let resp = self.http.post(self.url(&path)).send().await?;
        decode(resp).await
    }

    pub async fn check(&self) -> Result<CheckReply, PanelError> {
        let resp = self.http.get(self.url("/api/stream/check")).send().await?;
        decode(resp).await
    }

    /// Follow `/stream-status` until `tx` is dropped, reconnecting after the
    /// server-advertised retry delay whenever the stream ends.
    pub async fn follow_status(&self, tx: mpsc::Sender<StreamUpdate>) {
        let mut retry = DEFAULT_RETRY;
        loop {
            let reason = match self.read_status(&tx, &mut retry).await {
                Ok(()) => "stream closed".to_string(),
                Err(e) => e.to_string(),
            };
            if tx.is_closed() {
                return;
            }
            debug!("status channel down: {}, retrying in {:?}", reason, retry);
            if tx.send(StreamUpdate::Disconnected(reason)).await.is_err() {
                return;
            }
            tokio::time::sleep(retry).await;
        }
    }

    async fn read_status(
        &self,
        tx: &mpsc::Sender<StreamUpdate>,
        retry: &mut Duration,
    ) -> Result<(), PanelError> {
        let resp = self
            .http
            .get(self.url("/stream-status"))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        info!("status channel open");
        if tx.send(StreamUpdate::Connected).await.is_err() {
            return Ok(());
        }

        let mut decoder = SseDecoder::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                match frame {
                    SseFrame::Retry(ms) => *retry = Duration::from_millis(ms),
                    SseFrame::Event { name, data } if name == STATUS_EVENT => {
                        match serde_json::from_str::<StatusSnapshot>(&data) {
                            Ok(snap) => {
                                if tx.send(StreamUpdate::Snapshot(snap)).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!("malformed status event: {}", e),
                        }
                    }
                    SseFrame::Event { name, .. } => debug!("ignoring event {:?}", name),
                    SseFrame::Comment(_) => {}
                }
            }
        }
        Ok(())
    }
}

/// Map error statuses onto [`PanelError`], reading the `{ok:false,error}`
/// body when there is one.
async fn ensure_success(resp: Response) -> Result<Response, PanelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(PanelError::Unauthorized);
    }
    let body = resp.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<ApiReply>(&body)
        .ok()
        .and_then(|reply| reply.error)
        .unwrap_or_else(|| status.to_string());
    Err(PanelError::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, PanelError> {
    let resp = ensure_success(resp).await?;
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
