//! `GET /stream-status`: server-sent status snapshots.
//!
//! Sequence per connection: a `retry:` hint, the current snapshot, then every
//! published snapshot plus a full resnapshot on a fixed period.  Keep-alive
//! comments come from axum's `KeepAlive`.  Dropping the stream (client gone)
//! unregisters the observer.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use stream_proto::protocol::{StatusSnapshot, STATUS_EVENT};
use tracing::{debug, warn};

use crate::core::CoreHandle;
use crate::error::ControlError;
use crate::hub::ObserverId;
use crate::http::{AppState, AuthUser};

/// Unregisters the observer when the response stream is dropped.
struct ObserverGuard {
    id: ObserverId,
    core: CoreHandle,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        debug!("sse: {} closed", self.id);
        self.core.unsubscribe(self.id);
    }
}

fn status_event(snapshot: &StatusSnapshot) -> Option<Event> {
    match serde_json::to_string(snapshot) {
        Ok(json) => Some(Event::default().event(STATUS_EVENT).data(json)),
        Err(e) => {
            warn!("sse: failed to encode snapshot: {}", e);
            None
        }
    }
}

pub async fn stream_status(
    State(app): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ControlError> {
    let sub = app.core.subscribe(user.clone()).await?;
    debug!("sse: {} opened for {}", sub.id, user);

    let guard = ObserverGuard {
        id: sub.id,
        core: app.core.clone(),
    };
    let core = app.core.clone();
    let retry = Duration::from_millis(app.sse.retry_ms);
    let resnapshot = Duration::from_secs(app.sse.resnapshot_secs.max(1));
    let mut rx = sub.rx;
    let initial = sub.initial;

    let events = stream! {
        let _guard = guard;
        yield Ok(Event::default().retry(retry));
        if let Some(evt) = status_event(&initial) {
            yield Ok(evt);
        }

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + resnapshot, resnapshot);
        loop {
            let next = tokio::select! {
                published = rx.recv() => published,
                _ = ticker.tick() => core.snapshot(user.clone()).await.ok(),
            };
            let Some(snapshot) = next else {
                break;
            };
            if let Some(evt) = status_event(&snapshot) {
                yield Ok(evt);
            }
        }
    };

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(app.sse.keepalive_secs.max(1)))
            .text("keep-alive"),
    ))
}
