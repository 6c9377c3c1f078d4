//! Call Session Controller
//!
//! Owns the lifecycle of one voice call: credential, microphone, level
//! monitor, peer transport, control channel, dispatcher and liveness
//! observer. Every resource acquired by an attempt is recorded in that
//! attempt's [`SessionResources`] the moment it exists, so `end_call` can
//! release whatever has been acquired so far, even while `start_call` is
//! still waiting on the network or on a permission prompt.

use crate::config::Config;
use crate::credential::{CredentialProvider, HttpCredentialProvider};
use crate::dispatcher::Dispatcher;
use crate::error::CallError;
use crate::level::LevelMonitor;
use crate::media::{AudioSource, AudioTrack, CaptureError};
use crate::transport::{
    ControlChannel, PeerTransport, TransportError, TransportFactory, TransportState,
};
use chrono::{DateTime, Utc};
use mentorcall_core::{DraftStore, FileStorage, Variant};
use openai_realtime::{EVENTS_CHANNEL_LABEL, SignalingClient};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Observable state of the call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallStatus {
    pub active: bool,
    pub variant: Option<Variant>,
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent failure reported while a call was running.
    pub last_error: Option<String>,
}

/// Everything an attempt has acquired so far.
#[derive(Default)]
pub struct SessionResources {
    monitor: Option<LevelMonitor>,
    track: Option<Arc<dyn AudioTrack>>,
    channel: Option<Arc<dyn ControlChannel>>,
    transport: Option<Arc<dyn PeerTransport>>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.monitor.is_none()
            && self.track.is_none()
            && self.channel.is_none()
            && self.transport.is_none()
    }

    fn absorb(&mut self, other: SessionResources) {
        if other.monitor.is_some() {
            self.monitor = other.monitor;
        }
        if other.track.is_some() {
            self.track = other.track;
        }
        if other.channel.is_some() {
            self.channel = other.channel;
        }
        if other.transport.is_some() {
            self.transport = other.transport;
        }
    }

    /// Releases in order: level monitor, microphone track, control channel,
    /// peer transport. Safe to call on a partially built or empty set.
    pub async fn teardown(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        if let Some(track) = self.track.take() {
            if track.is_stopped() {
                debug!(track = track.id(), "Microphone track already ended");
            } else {
                track.stop();
                debug!(track = track.id(), "Stopped microphone track");
            }
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

struct Attempt {
    id: u64,
    cancel: CancellationToken,
    resources: SessionResources,
}

/// The collaborators a controller drives.
pub struct CallDependencies {
    pub credentials: Arc<dyn CredentialProvider>,
    pub audio: Arc<dyn AudioSource>,
    pub transports: Arc<dyn TransportFactory>,
    pub signaling: SignalingClient,
    pub store: Arc<DraftStore>,
    pub level_poll_interval: Duration,
}

struct Inner {
    credentials: Arc<dyn CredentialProvider>,
    audio: Arc<dyn AudioSource>,
    transports: Arc<dyn TransportFactory>,
    signaling: SignalingClient,
    store: Arc<DraftStore>,
    level_poll_interval: Duration,
    status: Arc<watch::Sender<CallStatus>>,
    level: Arc<watch::Sender<f32>>,
    slot: Mutex<Option<Attempt>>,
    next_attempt: AtomicU64,
}

/// Starts and ends calls. Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

impl CallController {
    pub fn new(deps: CallDependencies) -> Self {
        let (status, _) = watch::channel(CallStatus::default());
        let (level, _) = watch::channel(0.0f32);
        Self {
            inner: Arc::new(Inner {
                credentials: deps.credentials,
                audio: deps.audio,
                transports: deps.transports,
                signaling: deps.signaling,
                store: deps.store,
                level_poll_interval: deps.level_poll_interval,
                status: Arc::new(status),
                level: Arc::new(level),
                slot: Mutex::new(None),
                next_attempt: AtomicU64::new(1),
            }),
        }
    }

    /// Wires the HTTP credential provider, the signaling client and a
    /// file-backed draft store from `config`.
    pub fn from_config(
        config: &Config,
        audio: Arc<dyn AudioSource>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let storage = Arc::new(FileStorage::new(&config.draft_store_dir));
        Self::new(CallDependencies {
            credentials: Arc::new(HttpCredentialProvider::new(
                config.credential_endpoint.clone(),
                config.access_token.clone(),
            )),
            audio,
            transports,
            signaling: SignalingClient::new(
                config.realtime_url.clone(),
                config.realtime_model.clone(),
            ),
            store: Arc::new(DraftStore::open(storage)),
            level_poll_interval: config.level_poll_interval,
        })
    }

    pub fn store(&self) -> &Arc<DraftStore> {
        &self.inner.store
    }

    pub fn status(&self) -> CallStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CallStatus> {
        self.inner.status.subscribe()
    }

    /// Normalized microphone level, 0 whenever no call is running.
    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.inner.level.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.status.borrow().active
    }

    /// Starts a call for `variant`.
    ///
    /// Returns once the answer has been applied and the call is live. On
    /// any failure everything acquired so far is released before the error
    /// is returned. If [`CallController::end_call`] runs while this is still
    /// pending, the attempt is abandoned and `Cancelled` is returned.
    #[instrument(skip(self), fields(attempt = tracing::field::Empty))]
    pub async fn start_call(&self, variant: Variant) -> Result<(), CallError> {
        let (id, cancel) = {
            let mut slot = self.inner.slot.lock().await;
            if slot.is_some() {
                warn!("Rejecting start while a call is in progress");
                return Err(CallError::AlreadyActive);
            }
            let id = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            *slot = Some(Attempt {
                id,
                cancel: cancel.clone(),
                resources: SessionResources::default(),
            });
            (id, cancel)
        };
        tracing::Span::current().record("attempt", id);
        self.inner
            .status
            .send_modify(|status| status.last_error = None);

        match self.negotiate(id, variant, &cancel).await {
            Ok(()) => {
                info!("Call is live");
                Ok(())
            }
            Err(e) => {
                let cancelled = cancel.is_cancelled();
                self.end_attempt(Some(id)).await;
                let e = if cancelled {
                    CallError::Cancelled
                } else {
                    e
                };
                warn!(error = %e, "Call start failed");
                Err(e)
            }
        }
    }

    /// Ends the current call or pending attempt. Idempotent; the draft and
    /// transcript are left untouched.
    #[instrument(skip(self))]
    pub async fn end_call(&self) {
        self.end_attempt(None).await;
    }

    async fn negotiate(
        &self,
        id: u64,
        variant: Variant,
        cancel: &CancellationToken,
    ) -> Result<(), CallError> {
        let inner = &self.inner;
        if let Err(e) = inner.store.set_variant(variant) {
            warn!(error = %e, "Failed to persist active variant");
        }

        let credential = cancellable(cancel, inner.credentials.fetch(variant)).await?;
        debug!("Credential acquired");

        let track = cancellable(cancel, async {
            inner.audio.capture().await.map_err(|e| match e {
                CaptureError::PermissionDenied => CallError::PermissionDenied,
                other => CallError::AudioCapture(other.to_string()),
            })
        })
        .await?;
        let monitor = LevelMonitor::start(
            track.analyser(),
            inner.level.clone(),
            inner.level_poll_interval,
        );
        self.adopt(
            id,
            SessionResources {
                track: Some(track.clone()),
                monitor: Some(monitor),
                ..Default::default()
            },
        )
        .await?;
        debug!(track = track.id(), "Microphone captured");

        let transport = cancellable(cancel, async {
            inner
                .transports
                .create(&*track)
                .await
                .map_err(setup_failed)
        })
        .await?;
        self.adopt(
            id,
            SessionResources {
                transport: Some(transport.clone()),
                ..Default::default()
            },
        )
        .await?;

        let link = cancellable(cancel, async {
            transport
                .create_control_channel(EVENTS_CHANNEL_LABEL)
                .await
                .map_err(setup_failed)
        })
        .await?;
        self.adopt(
            id,
            SessionResources {
                channel: Some(link.sender.clone()),
                ..Default::default()
            },
        )
        .await?;

        let offer = cancellable(cancel, async {
            transport
                .create_offer()
                .await
                .map_err(setup_failed)
        })
        .await?;
        let answer = cancellable(cancel, async {
            inner
                .signaling
                .exchange(&offer, &credential.secret)
                .await
                .map_err(CallError::from)
        })
        .await?;
        cancellable(cancel, async {
            transport
                .apply_answer(&answer)
                .await
                .map_err(setup_failed)
        })
        .await?;

        let slot = inner.slot.lock().await;
        match slot.as_ref() {
            Some(attempt) if attempt.id == id && !attempt.cancel.is_cancelled() => {
                let dispatcher = Dispatcher::new(
                    inner.store.clone(),
                    variant,
                    link.sender,
                    inner.status.clone(),
                );
                tokio::spawn(dispatcher.run(link.events, attempt.cancel.child_token()));
                tokio::spawn(observe_liveness(
                    self.clone(),
                    id,
                    transport.state(),
                    attempt.cancel.child_token(),
                ));
                inner.status.send_modify(|status| {
                    status.active = true;
                    status.variant = Some(variant);
                    status.started_at = Some(Utc::now());
                });
                Ok(())
            }
            _ => Err(CallError::Cancelled),
        }
    }

    /// Records `fragment` under attempt `id`, or releases it at once when that
    /// attempt has already been ended.
    async fn adopt(&self, id: u64, mut fragment: SessionResources) -> Result<(), CallError> {
        let mut slot = self.inner.slot.lock().await;
        if let Some(attempt) = slot
            .as_mut()
            .filter(|attempt| attempt.id == id && !attempt.cancel.is_cancelled())
        {
            attempt.resources.absorb(fragment);
            return Ok(());
        }
        drop(slot);
        debug!("Attempt ended while acquiring, releasing late resource");
        fragment.teardown().await;
        Err(CallError::Cancelled)
    }

    /// Ends the attempt in the slot; with `only`, just when it is that attempt.
    async fn end_attempt(&self, only: Option<u64>) {
        let attempt = {
            let mut slot = self.inner.slot.lock().await;
            let other_attempt = matches!(
                (slot.as_ref(), only),
                (Some(attempt), Some(id)) if attempt.id != id
            );
            if other_attempt { None } else { slot.take() }
        };
        let Some(mut attempt) = attempt else {
            debug!("No call to end");
            return;
        };

        attempt.cancel.cancel();
        attempt.resources.teardown().await;
        self.inner.status.send_modify(|status| {
            status.active = false;
            status.started_at = None;
        });
        self.inner.level.send_replace(0.0);
        info!(attempt = attempt.id, "Call ended");
    }

    fn record_error(&self, error: &CallError) {
        let message = error.to_string();
        self.inner
            .status
            .send_modify(|status| status.last_error = Some(message));
    }
}

// Transport failures before the call is live count as failed signaling.
fn setup_failed(e: TransportError) -> CallError {
    CallError::Signaling(e.to_string())
}

/// Races `fut` against the attempt's cancellation.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallError::Cancelled),
        result = fut => result,
    }
}

/// Ends the call when the transport reports a terminal state.
async fn observe_liveness(
    controller: CallController,
    id: u64,
    mut state: watch::Receiver<TransportState>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let current = *state.borrow_and_update();
        if current.is_terminal() {
            let error = CallError::Transport(format!("connection {:?}", current).to_lowercase());
            warn!(attempt = id, error = %error, "Transport lost, ending call");
            controller.record_error(&error);
            controller.end_attempt(Some(id)).await;
            return;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            changed = state.changed() => {
                if changed.is_err() {
                    let error = CallError::Transport("transport dropped".to_string());
                    warn!(attempt = id, error = %error, "Transport lost, ending call");
                    controller.record_error(&error);
                    controller.end_attempt(Some(id)).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MockCredentialProvider;
    use async_trait::async_trait;
    use mentorcall_core::MemoryStorage;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingAudio {
        captures: AtomicUsize,
    }

    #[async_trait]
    impl AudioSource for CountingAudio {
        async fn capture(&self) -> Result<Arc<dyn AudioTrack>, CaptureError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            Err(CaptureError::NoDevice)
        }
    }

    #[derive(Default)]
    struct CountingTransports {
        created: AtomicUsize,
    }

    #[async_trait]
    impl TransportFactory for CountingTransports {
        async fn create(
            &self,
            _track: &dyn AudioTrack,
        ) -> Result<Arc<dyn PeerTransport>, TransportError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Err(TransportError("unused".to_string()))
        }
    }

    fn controller(
        credentials: MockCredentialProvider,
        audio: Arc<CountingAudio>,
        transports: Arc<CountingTransports>,
    ) -> CallController {
        CallController::new(CallDependencies {
            credentials: Arc::new(credentials),
            audio,
            transports,
            signaling: SignalingClient::new("http://127.0.0.1:9/realtime", "test-model"),
            store: Arc::new(DraftStore::open(Arc::new(MemoryStorage::new()))),
            level_poll_interval: Duration::from_millis(16),
        })
    }

    #[tokio::test]
    async fn test_credential_failure_acquires_nothing() {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_fetch()
            .times(2)
            .returning(|_| Err(CallError::Credential("backend said 500".to_string())));
        let audio = Arc::new(CountingAudio::default());
        let transports = Arc::new(CountingTransports::default());
        let controller = controller(credentials, audio.clone(), transports.clone());

        let err = controller.start_call(Variant::SeekMentor).await.unwrap_err();
        assert!(matches!(err, CallError::Credential(_)));
        assert_eq!(err.user_message(), "Connection failed. Please try again.");
        assert_eq!(audio.captures.load(Ordering::SeqCst), 0);
        assert_eq!(transports.created.load(Ordering::SeqCst), 0);
        assert!(!controller.is_active());

        // The slot was released, so a new attempt reaches the provider again.
        let err = controller.start_call(Variant::SeekMentor).await;
        assert!(matches!(err, Err(CallError::Credential(_))));
    }

    #[tokio::test]
    async fn test_capture_failure_is_reported_and_transport_never_created() {
        let mut credentials = MockCredentialProvider::new();
        credentials.expect_fetch().returning(|_| {
            Ok(crate::credential::EphemeralCredential {
                secret: "ek_test".to_string().into(),
                session_id: None,
            })
        });
        let audio = Arc::new(CountingAudio::default());
        let transports = Arc::new(CountingTransports::default());
        let controller = controller(credentials, audio.clone(), transports.clone());

        let err = controller.start_call(Variant::SeekMentee).await.unwrap_err();
        assert!(matches!(err, CallError::AudioCapture(_)));
        assert_eq!(audio.captures.load(Ordering::SeqCst), 1);
        assert_eq!(transports.created.load(Ordering::SeqCst), 0);
        assert_eq!(controller.store().variant(), Some(Variant::SeekMentee));
    }

    #[tokio::test]
    async fn test_end_call_without_call_is_noop() {
        let controller = controller(
            MockCredentialProvider::new(),
            Arc::new(CountingAudio::default()),
            Arc::new(CountingTransports::default()),
        );
        controller.end_call().await;
        controller.end_call().await;
        assert_eq!(controller.status(), CallStatus::default());
        assert_eq!(*controller.subscribe_level().borrow(), 0.0);
    }

    struct EndedTrack {
        stops: AtomicUsize,
    }

    impl AudioTrack for EndedTrack {
        fn id(&self) -> &str {
            "ended"
        }

        fn analyser(&self) -> Option<Arc<dyn crate::media::Analyser>> {
            None
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_teardown_skips_track_that_already_ended() {
        let track = Arc::new(EndedTrack {
            stops: AtomicUsize::new(0),
        });
        let mut resources = SessionResources {
            track: Some(track.clone()),
            ..Default::default()
        };
        resources.teardown().await;
        assert!(resources.is_empty());
        assert_eq!(track.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_from_config_persists_into_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            credential_endpoint: "http://127.0.0.1:9/token".to_string(),
            access_token: None,
            realtime_url: "http://127.0.0.1:9/realtime".to_string(),
            realtime_model: "test-model".to_string(),
            draft_store_dir: dir.path().to_path_buf(),
            level_poll_interval: Duration::from_millis(16),
            log_level: tracing::Level::INFO,
        };
        let controller = CallController::from_config(
            &config,
            Arc::new(CountingAudio::default()),
            Arc::new(CountingTransports::default()),
        );

        let fields = serde_json::json!({"category": "운동"});
        controller
            .store()
            .merge_fields(fields.as_object().cloned().unwrap())
            .unwrap();
        assert!(dir.path().join("mentorcall-draft.json").exists());

        let reopened = DraftStore::open(Arc::new(FileStorage::new(dir.path())));
        assert_eq!(reopened.draft()["category"], "운동");
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_teardown_of_empty_resources_is_safe() {
        let mut resources = SessionResources::default();
        assert!(resources.is_empty());
        resources.teardown().await;
        resources.teardown().await;
        assert!(resources.is_empty());
    }
}
