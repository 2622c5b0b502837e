use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::request::Parts,
    response::Json,
    routing::{get, post},
    Router,
};
use stream_proto::config::SseConfig;
use stream_proto::protocol::{
    ApiReply, CheckReply, RestreamRequest, StartRequest, StatusSnapshot, StreamKind, ToolCall,
};
use stream_proto::state::UserId;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::core::{Action, ActionReply, ActionResult, CoreHandle};
use crate::error::ControlError;
use crate::sse;

#[derive(Clone)]
pub struct AppState {
    pub core: CoreHandle,
    /// Header carrying the authenticated user id.
    pub user_header: Arc<str>,
    pub sse: SseConfig,
}

/// User id injected by the upstream auth layer.
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ControlError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(&*state.user_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AuthUser(UserId::from(v)))
            .ok_or(ControlError::Unauthorized)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream-status", get(sse::stream_status))
        .route("/api/session", get(get_session))
        .route("/api/stream/managed/start", post(start_managed))
        .route("/api/stream/managed/stop", post(stop_managed))
        .route("/api/stream/managed/restream/start", post(start_restream))
        .route("/api/stream/unmanaged/start", post(start_unmanaged))
        .route("/api/stream/unmanaged/stop", post(stop_unmanaged))
        .route("/api/stream/check", get(check_stream))
        .route("/tool", post(tool_call))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: AppState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// Start bodies are optional; a request without a JSON body uses the saved
/// configuration as-is.
fn start_body(
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<StartRequest, ControlError> {
    match payload {
        Ok(Json(req)) => Ok(req),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(StartRequest::default()),
        Err(e) => Err(ControlError::BadRequest(e.body_text())),
    }
}

fn acknowledge(result: ActionResult) -> Result<Json<ApiReply>, ControlError> {
    match result? {
        ActionReply::Done {
            message: Some(message),
        } => Ok(Json(ApiReply::ok_with_message(message))),
        ActionReply::Done { message: None } | ActionReply::Checked(_) => Ok(Json(ApiReply::ok())),
    }
}

async fn get_session(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<StatusSnapshot>, ControlError> {
    Ok(Json(app.core.snapshot(user).await?))
}

async fn start_managed(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<ApiReply>, ControlError> {
    let req = start_body(payload)?;
    info!("HTTP API: managed start for {}", user);
    acknowledge(app.core.action(user, Action::StartManaged(req)).await)
}

async fn start_restream(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<RestreamRequest>, JsonRejection>,
) -> Result<Json<ApiReply>, ControlError> {
    let Json(req) = payload.map_err(|e| ControlError::BadRequest(e.body_text()))?;
    info!(
        "HTTP API: managed restream start for {} ({} targets)",
        user,
        req.restream_urls.len()
    );
    acknowledge(
        app.core
            .action(user, Action::StartRestream(req.restream_urls))
            .await,
    )
}

async fn stop_managed(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ApiReply>, ControlError> {
    info!("HTTP API: managed stop for {}", user);
    acknowledge(app.core.action(user, Action::Stop(StreamKind::Managed)).await)
}

async fn start_unmanaged(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<ApiReply>, ControlError> {
    let req = start_body(payload)?;
    info!("HTTP API: unmanaged start for {}", user);
    acknowledge(app.core.action(user, Action::StartUnmanaged(req)).await)
}

async fn stop_unmanaged(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ApiReply>, ControlError> {
    info!("HTTP API: unmanaged stop for {}", user);
    acknowledge(
        app.core
            .action(user, Action::Stop(StreamKind::Unmanaged))
            .await,
    )
}

async fn check_stream(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<CheckReply>, ControlError> {
    match app.core.action(user, Action::Check).await? {
        ActionReply::Checked(check) => Ok(Json(CheckReply {
            ok: true,
            has_active_stream: check.has_active_stream,
            stream_info: check.stream_info,
        })),
        ActionReply::Done { .. } => Ok(Json(CheckReply {
            ok: true,
            has_active_stream: false,
            stream_info: None,
        })),
    }
}

/// Tool-call webhook from the device platform.  Identity comes from the
/// payload; the reply is plain text read back to the wearer.
async fn tool_call(
    State(app): State<AppState>,
    payload: Result<Json<ToolCall>, JsonRejection>,
) -> Result<String, ControlError> {
    let Json(call) = payload.map_err(|e| ControlError::BadRequest(e.body_text()))?;
    info!(
        "HTTP API: tool {} for {} (params: {:?})",
        call.tool_id,
        call.user_id,
        call.tool_parameters.keys().collect::<Vec<_>>()
    );
    let user = UserId::new(call.user_id.as_str());

    let reply = match call.tool_id.as_str() {
        "start_streaming" => match app.core.action(user, Action::Start(call.start_request())).await {
            Ok(_) => "Stream started successfully".to_string(),
            Err(e) => tool_error(e),
        },
        "stop_streaming" => match app.core.action(user, Action::StopActive).await {
            Ok(ActionReply::Done {
                message: Some(message),
            }) => message,
            Ok(_) => "Stream stopped successfully".to_string(),
            Err(e) => tool_error(e),
        },
        other => format!("Error: unknown tool {}", other),
    };
    Ok(reply)
}

fn tool_error(e: ControlError) -> String {
    match e {
        ControlError::Unauthorized => "Error: No active session".to_string(),
        other => format!("Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{spawn_core, FakeProvider};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use futures_util::StreamExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const USER: &str = "tester";

    async fn app() -> (Router, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider::new());
        let (core, _tx) = spawn_core(provider.clone(), &[USER]).await;
        let state = AppState {
            core,
            user_header: Arc::from("x-auth-user-id"),
            sse: SseConfig::default(),
        };
        (router(state), provider)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("x-auth-user-id", USER)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let (app, _) = app().await;
        let res = app
            .oneshot(Request::get("/api/stream/check").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(res).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn managed_start_acknowledges() {
        let (app, _) = app().await;
        let res = app
            .oneshot(post_json("/api/stream/managed/start", r#"{"platform":"here"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn unmanaged_start_requires_url() {
        let (app, _) = app().await;
        let res = app
            .oneshot(post_json("/api/stream/unmanaged/start", r#"{"platform":"other"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["error"], "Missing rtmpUrl");
    }

    #[tokio::test]
    async fn restream_requires_targets() {
        let (app, _) = app().await;
        let res = app
            .oneshot(post_json(
                "/api/stream/managed/restream/start",
                r#"{"restreamUrls":[]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn check_reports_running_stream() {
        let (app, provider) = app().await;
        provider.set_existing(StreamKind::Managed, Some("active"));
        let res = app
            .oneshot(
                Request::get("/api/stream/check")
                    .header("x-auth-user-id", USER)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["hasActiveStream"], true);
        assert_eq!(body["streamInfo"]["type"], "managed");
    }

    #[tokio::test]
    async fn stop_without_stream_reports_message() {
        let (app, _) = app().await;
        let res = app
            .oneshot(post_json("/api/stream/managed/stop", "{}"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["message"], "No stream to stop");
    }

    #[tokio::test]
    async fn tool_call_replies_with_text() {
        let (app, _) = app().await;
        let res = app
            .clone()
            .oneshot(post_json(
                "/tool",
                r#"{"toolId":"start_streaming","userId":"tester","toolParameters":{"platform":"here"}}"#,
            ))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Stream started successfully");

        let res = app
            .oneshot(post_json(
                "/tool",
                r#"{"toolId":"start_streaming","userId":"nobody"}"#,
            ))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Error: No active session");
    }

    type StatusBody = axum::body::BodyDataStream;

    async fn open_status(app: Router) -> StatusBody {
        let res = app
            .oneshot(
                Request::get("/stream-status")
                    .header("x-auth-user-id", USER)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/event-stream");
        res.into_body().into_data_stream()
    }

    /// Collect frames until `needle` shows up.  The timeout is generous so
    /// paused-clock tests can auto-advance past the liveness timers.
    async fn read_until(body: &mut StatusBody, needle: &str) -> String {
        let mut text = String::new();
        while !text.contains(needle) {
            let chunk = tokio::time::timeout(Duration::from_secs(60), body.next())
                .await
                .expect("stream produced a frame")
                .expect("stream still open")
                .unwrap();
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
        text
    }

    #[tokio::test]
    async fn status_stream_opens_with_retry_and_snapshot() {
        let (app, _) = app().await;
        let mut body = open_status(app).await;
        let text = read_until(&mut body, "event: status").await;
        assert!(text.starts_with("retry: 3000"));
        assert!(text.contains(r#""hasActiveSession":true"#));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_keeps_alive_and_resnapshots() {
        let (app, _) = app().await;
        let mut body = open_status(app).await;
        read_until(&mut body, "event: status").await;

        let opened = tokio::time::Instant::now();
        let quiet = read_until(&mut body, "event: status").await;
        let elapsed = opened.elapsed();

        assert!(quiet
            .lines()
            .any(|line| line.starts_with(':') && line.contains("keep-alive")));
        let resnapshot = Duration::from_secs(SseConfig::default().resnapshot_secs);
        assert!(elapsed >= resnapshot, "resnapshot after {:?}", elapsed);
        assert!(elapsed < resnapshot + Duration::from_secs(1), "resnapshot after {:?}", elapsed);
        assert!(quiet.contains(r#""hasActiveSession":true"#));
    }

    #[tokio::test]
    async fn two_observers_see_the_same_change() {
        let (app, _) = app().await;
        let mut first = open_status(app.clone()).await;
        let mut second = open_status(app.clone()).await;
        read_until(&mut first, "event: status").await;
        read_until(&mut second, "event: status").await;

        let res = app
            .oneshot(post_json("/api/stream/managed/start", r#"{"platform":"here"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        for body in [&mut first, &mut second] {
            let text = read_until(body, r#""streamType":"managed""#).await;
            assert!(text.contains("event: status"));
        }
    }
}
