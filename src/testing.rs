//! Deterministic test doubles for the capability and signaling seams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::NegotiationConfig;
use crate::error::Result;
use crate::negotiation::transport::{ExchangeOutcome, SignalingTransport};
use crate::webrtc::capability::{
    CapabilityEvents, CapabilityFactory, MediaCapability, RemoteTrack, TrackKind,
};
use crate::webrtc::signaling::{
    ConnectionState, IceGatheringState, ResourceLocation, SdpAnswer, SdpOffer, SessionDescription,
};

const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
const CANDIDATE_LINE: &str = "a=candidate:1 1 udp 2130706431 10.0.0.1 50000 typ relay\r\n";

pub(crate) fn created(answer: &str, location: Option<&str>) -> ExchangeOutcome {
    ExchangeOutcome::Success {
        answer: SessionDescription::answer(answer),
        location: location.map(ResourceLocation::new),
    }
}

pub(crate) struct FakeTrack {
    id: String,
    kind: TrackKind,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub(crate) fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            stopped: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl RemoteTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum Gathering {
    Immediate,
    After(Duration),
    Never,
}

/// Capability whose gathering timing and events are driven by the test
pub(crate) struct ScriptedCapability {
    gathering: Gathering,
    provide_local: bool,
    local: Arc<Mutex<Option<SessionDescription>>>,
    remote: Mutex<Option<SessionDescription>>,
    gathering_tx: Arc<watch::Sender<IceGatheringState>>,
    connection_tx: watch::Sender<ConnectionState>,
    events: Mutex<Option<Arc<dyn CapabilityEvents>>>,
    offers_created: AtomicUsize,
    close_calls: AtomicUsize,
}

impl ScriptedCapability {
    pub(crate) fn new() -> Self {
        let (gathering_tx, _) = watch::channel(IceGatheringState::New);
        let (connection_tx, _) = watch::channel(ConnectionState::New);
        Self {
            gathering: Gathering::Immediate,
            provide_local: true,
            local: Arc::new(Mutex::new(None)),
            remote: Mutex::new(None),
            gathering_tx: Arc::new(gathering_tx),
            connection_tx,
            events: Mutex::new(None),
            offers_created: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn gathering_completes_after(mut self, delay: Duration) -> Self {
        self.gathering = Gathering::After(delay);
        self
    }

    pub(crate) fn gathering_never_completes(mut self) -> Self {
        self.gathering = Gathering::Never;
        self
    }

    pub(crate) fn without_local_description(mut self) -> Self {
        self.provide_local = false;
        self
    }

    pub(crate) fn local_sdp(&self) -> Option<String> {
        self.local.lock().as_ref().map(|d| d.sdp.clone())
    }

    pub(crate) fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub(crate) fn offers_created(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Currently registered event receiver
    pub(crate) fn events(&self) -> Option<Arc<dyn CapabilityEvents>> {
        self.events.lock().clone()
    }

    fn handler(&self) -> Option<Arc<dyn CapabilityEvents>> {
        self.events()
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        self.connection_tx.send_replace(state);
        if let Some(handler) = self.handler() {
            handler.on_connection_state_change(state);
        }
    }

    pub(crate) fn deliver_track(&self, id: &str, kind: TrackKind) -> Arc<FakeTrack> {
        let track = FakeTrack::new(id, kind);
        if let Some(handler) = self.handler() {
            handler.on_track(track.clone());
        }
        track
    }

    pub(crate) fn request_negotiation(&self) {
        if let Some(handler) = self.handler() {
            handler.on_negotiation_needed();
        }
    }
}

#[async_trait]
impl MediaCapability for ScriptedCapability {
    async fn create_offer(&self) -> Result<SdpOffer> {
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(&self, offer: SdpOffer) -> Result<()> {
        if !self.provide_local {
            self.gathering_tx.send_replace(IceGatheringState::Complete);
            return Ok(());
        }

        *self.local.lock() = Some(offer);
        self.gathering_tx.send_replace(IceGatheringState::Gathering);

        match self.gathering {
            Gathering::Immediate => {
                if let Some(desc) = self.local.lock().as_mut() {
                    desc.sdp.push_str(CANDIDATE_LINE);
                }
                self.gathering_tx.send_replace(IceGatheringState::Complete);
            }
            Gathering::After(delay) => {
                let local = self.local.clone();
                let gathering_tx = self.gathering_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(desc) = local.lock().as_mut() {
                        desc.sdp.push_str(CANDIDATE_LINE);
                    }
                    gathering_tx.send_replace(IceGatheringState::Complete);
                });
            }
            Gathering::Never => {}
        }
        Ok(())
    }

    async fn set_remote_description(&self, answer: SdpAnswer) -> Result<()> {
        *self.remote.lock() = Some(answer);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    fn ice_gathering_state(&self) -> watch::Receiver<IceGatheringState> {
        self.gathering_tx.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }

    fn register_events(&self, events: Arc<dyn CapabilityEvents>) {
        *self.events.lock() = Some(events);
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = None;
        self.connection_tx.send_replace(ConnectionState::Closed);
        Ok(())
    }
}

/// Factory handing out scripted capabilities and keeping them for inspection
pub(crate) struct ScriptedFactory {
    make: Box<dyn Fn() -> ScriptedCapability + Send + Sync>,
    created: Mutex<Vec<Arc<ScriptedCapability>>>,
}

impl ScriptedFactory {
    pub(crate) fn new(make: impl Fn() -> ScriptedCapability + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            created: Mutex::new(vec![]),
        }
    }

    pub(crate) fn created(&self) -> Vec<Arc<ScriptedCapability>> {
        self.created.lock().clone()
    }

    pub(crate) fn latest(&self) -> Option<Arc<ScriptedCapability>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl CapabilityFactory for ScriptedFactory {
    async fn create(&self, _config: &NegotiationConfig) -> Result<Arc<dyn MediaCapability>> {
        let capability = Arc::new((self.make)());
        self.created.lock().push(capability.clone());
        Ok(capability)
    }
}

/// Signaling transport replaying a fixed list of outcomes
///
/// Once the script runs out every attempt answers 503.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<ExchangeOutcome>>,
    latency: Duration,
    attempts: Mutex<Vec<Instant>>,
    offers: Mutex<Vec<String>>,
    terminated: Mutex<Vec<ResourceLocation>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<ExchangeOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            latency: Duration::ZERO,
            attempts: Mutex::new(vec![]),
            offers: Mutex::new(vec![]),
            terminated: Mutex::new(vec![]),
        }
    }

    /// Every exchange takes `latency` before it answers
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub(crate) fn offers(&self) -> Vec<String> {
        self.offers.lock().clone()
    }

    pub(crate) fn terminated(&self) -> Vec<ResourceLocation> {
        self.terminated.lock().clone()
    }
}

#[async_trait]
impl SignalingTransport for ScriptedTransport {
    async fn exchange(
        &self,
        _endpoint: &str,
        offer_sdp: &str,
        token: &CancellationToken,
    ) -> ExchangeOutcome {
        if token.is_cancelled() {
            return ExchangeOutcome::Aborted;
        }
        self.attempts.lock().push(Instant::now());
        self.offers.lock().push(offer_sdp.to_string());

        if !self.latency.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return ExchangeOutcome::Aborted,
                _ = tokio::time::sleep(self.latency) => {}
            }
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or(ExchangeOutcome::Transient {
                status: Some(503),
                body: "stream not live".to_string(),
            })
    }

    async fn terminate(&self, _endpoint: &str, location: &ResourceLocation) -> Result<()> {
        self.terminated.lock().push(location.clone());
        Ok(())
    }
}
