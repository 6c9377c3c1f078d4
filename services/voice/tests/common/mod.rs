#![allow(dead_code)]

use async_trait::async_trait;
use mentorcall_core::{DraftStore, MemoryStorage};
use mentorcall_voice::{
    Analyser, AudioSource, AudioTrack, CallController, CallDependencies, CaptureError,
    ChannelEvent, ControlChannel, ControlLink, HttpCredentialProvider, PeerTransport,
    TransportError, TransportFactory, TransportState,
};
use openai_realtime::SignalingClient;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ANSWER_SDP: &str = "v=0\r\ns=answer\r\n";

struct HalfScaleAnalyser;

impl Analyser for HalfScaleAnalyser {
    fn bin_count(&self) -> usize {
        16
    }

    fn byte_frequency_data(&self, bins: &mut [u8]) {
        bins.fill(128);
    }
}

pub struct FakeTrack {
    id: String,
    live: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

impl AudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn analyser(&self) -> Option<Arc<dyn Analyser>> {
        Some(Arc::new(HalfScaleAnalyser))
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Microphone double. Counts capture requests and tracks still running.
#[derive(Default)]
pub struct FakeAudio {
    pub requests: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    deny: bool,
    // When set, capture waits here as if a permission prompt were open.
    prompt: Option<Arc<Notify>>,
}

impl FakeAudio {
    pub fn granting() -> Self {
        Self::default()
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn prompting(prompt: Arc<Notify>) -> Self {
        Self {
            prompt: Some(prompt),
            ..Self::default()
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSource for FakeAudio {
    async fn capture(&self) -> Result<Arc<dyn AudioTrack>, CaptureError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(prompt) = &self.prompt {
            prompt.notified().await;
        }
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeTrack {
            id: format!("mic-{}", n),
            live: self.live.clone(),
            stopped: AtomicBool::new(false),
        }))
    }
}

#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError("channel closed".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    state: watch::Sender<TransportState>,
    live: Arc<AtomicUsize>,
    closed: AtomicBool,
    offered: AtomicBool,
    pub track_id: String,
    inbound: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    answer: Mutex<Option<String>>,
}

impl FakeTransport {
    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().unwrap().clone().expect("no control channel")
    }

    pub async fn deliver(&self, event: ChannelEvent) {
        let inbound = self.inbound.lock().unwrap().clone().expect("no control channel");
        inbound.send(event).await.unwrap();
    }

    pub fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    pub fn answer(&self) -> Option<String> {
        self.answer.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn offered(&self) -> bool {
        self.offered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_control_channel(&self, label: &str) -> Result<ControlLink, TransportError> {
        assert_eq!(label, "oai-events");
        let (tx, rx) = mpsc::channel(32);
        let channel = Arc::new(FakeChannel::default());
        *self.inbound.lock().unwrap() = Some(tx);
        *self.channel.lock().unwrap() = Some(channel.clone());
        Ok(ControlLink {
            sender: channel,
            events: rx,
        })
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        self.state.send_replace(TransportState::Connecting);
        self.offered.store(true, Ordering::SeqCst);
        Ok("v=0\r\ns=offer\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), TransportError> {
        *self.answer.lock().unwrap() = Some(sdp.to_string());
        self.state.send_replace(TransportState::Connected);
        Ok(())
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.state.send_replace(TransportState::Closed);
        }
    }
}

#[derive(Default)]
pub struct FakeTransports {
    pub live: Arc<AtomicUsize>,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransports {
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }
}

#[async_trait]
impl TransportFactory for FakeTransports {
    async fn create(
        &self,
        track: &dyn AudioTrack,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let (state, _) = watch::channel(TransportState::New);
        let transport = Arc::new(FakeTransport {
            state,
            live: self.live.clone(),
            closed: AtomicBool::new(false),
            offered: AtomicBool::new(false),
            track_id: track.id().to_string(),
            inbound: Mutex::new(None),
            channel: Mutex::new(None),
            answer: Mutex::new(None),
        });
        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

/// Backend and realtime endpoints served by one mock server.
pub struct Endpoints {
    pub server: MockServer,
}

impl Endpoints {
    pub async fn start() -> Self {
        Self::start_with_credential(
            ResponseTemplate::new(200).set_body_json(json!({"ephemeralCredential": "ek_test"})),
        )
        .await
    }

    /// Serves `response` from the credential endpoint instead of an
    /// immediate grant.
    pub async fn start_with_credential(response: ResponseTemplate) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(response)
            .mount(&server)
            .await;
        Self { server }
    }

    pub async fn credential_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == "/token")
                    .count()
            })
            .unwrap_or(0)
    }

    pub async fn answer_with(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/realtime"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub async fn answer_normally(&self) {
        self.answer_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
            .await;
    }
}

pub struct Harness {
    pub controller: CallController,
    pub audio: Arc<FakeAudio>,
    pub transports: Arc<FakeTransports>,
}

pub fn harness(endpoints: &Endpoints, audio: FakeAudio) -> Harness {
    let audio = Arc::new(audio);
    let transports = Arc::new(FakeTransports::default());
    let uri = endpoints.server.uri();
    let controller = CallController::new(CallDependencies {
        credentials: Arc::new(HttpCredentialProvider::new(format!("{}/token", uri), None)),
        audio: audio.clone(),
        transports: transports.clone(),
        signaling: SignalingClient::new(format!("{}/v1/realtime", uri), "test-model"),
        store: Arc::new(DraftStore::open(Arc::new(MemoryStorage::new()))),
        level_poll_interval: Duration::from_millis(2),
    });
    Harness {
        controller,
        audio,
        transports,
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn tool_call(call_id: &str, name: &str, arguments: Value) -> ChannelEvent {
    ChannelEvent::Message(
        json!({
            "type": "response.function_call_arguments.done",
            "call_id": call_id,
            "name": name,
            "arguments": arguments.to_string(),
        })
        .to_string(),
    )
}
