//! Scriptable provider for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stream_proto::protocol::{ExistingStream, ExistingStreamCheck, StreamKind};
use stream_proto::state::UserId;

use crate::provider::{DeviceProvider, ManagedStreamOptions, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartManaged(ManagedStreamOptions),
    StopManaged,
    Start(String),
    Stop,
    Check,
}

#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<Call>>,
    start_error: Mutex<Option<String>>,
    stop_error: Mutex<Option<String>>,
    existing: Mutex<ExistingStreamCheck>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_start(&self, message: &str) {
        *self.start_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_stop(&self, message: &str) {
        *self.stop_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_existing(&self, kind: StreamKind, status: Option<&str>) {
        *self.existing.lock().unwrap() = ExistingStreamCheck {
            has_active_stream: true,
            stream_info: Some(ExistingStream {
                kind,
                status: status.map(str::to_string),
                stream_id: Some("existing-1".into()),
                hls_url: Some("https://cdn/existing.m3u8".into()),
                dash_url: None,
                preview_url: Some("https://preview/existing".into()),
                webrtc_url: None,
                rtmp_url: Some("rtmp://ingest/app/secret".into()),
                requesting_app_id: Some("other.app".into()),
                active_viewers: Some(2),
            }),
        };
    }

    /// Poll until `pred` holds on the recorded calls.
    pub async fn wait_for_call(&self, pred: impl Fn(&[Call]) -> bool) -> bool {
        for _ in 0..100 {
            if pred(&self.calls()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn start_result(&self) -> Result<(), ProviderError> {
        match self.start_error.lock().unwrap().clone() {
            Some(msg) => Err(ProviderError::Rejected(msg)),
            None => Ok(()),
        }
    }

    fn stop_result(&self) -> Result<(), ProviderError> {
        match self.stop_error.lock().unwrap().clone() {
            Some(msg) => Err(ProviderError::Rejected(msg)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceProvider for FakeProvider {
    async fn start_managed(
        &self,
        _user: &UserId,
        options: ManagedStreamOptions,
    ) -> Result<(), ProviderError> {
        self.record(Call::StartManaged(options));
        self.start_result()
    }

    async fn stop_managed(&self, _user: &UserId) -> Result<(), ProviderError> {
        self.record(Call::StopManaged);
        self.stop_result()
    }

    async fn start(&self, _user: &UserId, rtmp_url: &str) -> Result<(), ProviderError> {
        self.record(Call::Start(rtmp_url.to_string()));
        self.start_result()
    }

    async fn stop(&self, _user: &UserId) -> Result<(), ProviderError> {
        self.record(Call::Stop);
        self.stop_result()
    }

    async fn check_existing(&self, _user: &UserId) -> Result<ExistingStreamCheck, ProviderError> {
        self.record(Call::Check);
        Ok(self.existing.lock().unwrap().clone())
    }
}

/// Spawn a core over `provider` with `users` already connected.
pub async fn spawn_core(
    provider: std::sync::Arc<FakeProvider>,
    users: &[&str],
) -> (crate::core::CoreHandle, tokio::sync::mpsc::Sender<crate::core::CoreEvent>) {
    use crate::core::{CoreEvent, CoreHandle, SessionCore};
    use crate::provider::ProviderEvent;

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let core = SessionCore::new(provider, 8, tx.clone());
    tokio::spawn(core.run(rx));
    let handle = CoreHandle::new(tx.clone());
    for user in users {
        let user = UserId::from(*user);
        tx.send(CoreEvent::Provider(ProviderEvent::SessionStarted { user: user.clone() }))
            .await
            .unwrap();
        handle.snapshot(user).await.unwrap();
    }
    (handle, tx)
}
