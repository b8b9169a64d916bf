//! `MediaCapability` backed by a webrtc-rs peer connection

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use super::capability::{CapabilityEvents, CapabilityFactory, MediaCapability, RemoteTrack, TrackKind};
use super::mdns::{mdns_host_name, mdns_mode};
use super::signaling::{ConnectionState, IceGatheringState, SdpAnswer, SdpOffer, SessionDescription};
use crate::config::NegotiationConfig;
use crate::error::{Result, WhepError};

type EventsSlot = Arc<RwLock<Option<Arc<dyn CapabilityEvents>>>>;

/// Receive-only peer connection for WHEP playback
///
/// Offers one recvonly video and one recvonly audio transceiver, bundled on a
/// single transport.
pub struct WebRtcCapability {
    /// Session ID (log correlation only)
    pub session_id: String,
    pc: Arc<RTCPeerConnection>,
    events: EventsSlot,
    /// Set when negotiation was requested before anyone listened
    negotiation_pending: Arc<AtomicBool>,
    connection_tx: Arc<watch::Sender<ConnectionState>>,
    connection_rx: watch::Receiver<ConnectionState>,
    gathering_tx: Arc<watch::Sender<IceGatheringState>>,
    gathering_rx: watch::Receiver<IceGatheringState>,
    closed: AtomicBool,
}

impl WebRtcCapability {
    /// Create the peer connection and its recvonly transceivers
    pub async fn new(config: &NegotiationConfig) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| WhepError::Capability(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            WhepError::Capability(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode();
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(mdns_host_name(&session_id));
        }
        debug!("WebRTC mDNS mode: {:?} (session {})", mode, session_id);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .relay_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_transport_policy: if config.relay_only {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            bundle_policy: RTCBundlePolicy::MaxBundle,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            WhepError::Capability(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let (connection_tx, connection_rx) = watch::channel(ConnectionState::New);
        let (gathering_tx, gathering_rx) = watch::channel(IceGatheringState::New);

        let capability = Self {
            session_id,
            pc,
            events: Arc::new(RwLock::new(None)),
            negotiation_pending: Arc::new(AtomicBool::new(false)),
            connection_tx: Arc::new(connection_tx),
            connection_rx,
            gathering_tx: Arc::new(gathering_tx),
            gathering_rx,
            closed: AtomicBool::new(false),
        };

        capability.setup_event_handlers();

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            capability
                .pc
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    WhepError::Capability(format!("Failed to add {} transceiver: {}", kind, e))
                })?;
        }

        info!(
            "Peer {} created ({} relay servers, relay_only={})",
            capability.session_id,
            config.relay_servers.len(),
            config.relay_only
        );
        Ok(capability)
    }

    fn setup_event_handlers(&self) {
        // Connection state
        let connection_tx = self.connection_tx.clone();
        let events = self.events.clone();
        let session_id = self.session_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let connection_tx = connection_tx.clone();
                let events = events.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", session_id, new_state);
                    connection_tx.send_replace(new_state);

                    let handler = events.read().clone();
                    if let Some(handler) = handler {
                        handler.on_connection_state_change(new_state);
                    }
                })
            }));

        // ICE gathering
        let gathering_tx = self.gathering_tx.clone();
        let session_id = self.session_id.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                let gathering_tx = gathering_tx.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCIceGathererState::New => IceGatheringState::New,
                        RTCIceGathererState::Gathering => IceGatheringState::Gathering,
                        RTCIceGathererState::Complete => IceGatheringState::Complete,
                        _ => return,
                    };

                    debug!("[ICE] Peer {} gathering state: {}", session_id, new_state);
                    gathering_tx.send_replace(new_state);
                })
            }));

        // Inbound tracks
        let events = self.events.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();

            Box::pin(async move {
                let remote = WebRtcTrack::spawn(track);
                info!("Remote track {} ({}) received", remote.id(), remote.kind());

                let handler = events.read().clone();
                match handler {
                    Some(handler) => handler.on_track(remote),
                    None => remote.stop(),
                }
            })
        }));

        // Renegotiation requests
        let events = self.events.clone();
        let pending = self.negotiation_pending.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            let events = events.clone();
            let pending = pending.clone();

            Box::pin(async move {
                let handler = events.read().clone();
                match handler {
                    Some(handler) => handler.on_negotiation_needed(),
                    None => pending.store(true, Ordering::SeqCst),
                }
            })
        }));
    }
}

#[async_trait]
impl MediaCapability for WebRtcCapability {
    async fn create_offer(&self) -> Result<SdpOffer> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| WhepError::Capability(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, offer: SdpOffer) -> Result<()> {
        let desc = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| WhepError::Capability(format!("Invalid SDP offer: {}", e)))?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| WhepError::Capability(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, answer: SdpAnswer) -> Result<()> {
        let desc = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| WhepError::Capability(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| WhepError::Capability(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        Some(match desc.sdp_type {
            RTCSdpType::Answer => SessionDescription::answer(desc.sdp),
            _ => SessionDescription::offer(desc.sdp),
        })
    }

    fn ice_gathering_state(&self) -> watch::Receiver<IceGatheringState> {
        self.gathering_rx.clone()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_rx.clone()
    }

    fn register_events(&self, events: Arc<dyn CapabilityEvents>) {
        *self.events.write() = Some(events.clone());
        if self.negotiation_pending.swap(false, Ordering::SeqCst) {
            events.on_negotiation_needed();
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        *self.events.write() = None;
        let result = self
            .pc
            .close()
            .await
            .map_err(|e| WhepError::Capability(format!("Failed to close peer connection: {}", e)));
        self.connection_tx.send_replace(ConnectionState::Closed);
        info!("Peer {} closed", self.session_id);
        result
    }
}

/// Creates a [`WebRtcCapability`] per session generation
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcCapabilityFactory;

#[async_trait]
impl CapabilityFactory for WebRtcCapabilityFactory {
    async fn create(&self, config: &NegotiationConfig) -> Result<Arc<dyn MediaCapability>> {
        Ok(Arc::new(WebRtcCapability::new(config).await?))
    }
}

/// Remote track whose RTP is drained by a background reader
pub struct WebRtcTrack {
    id: String,
    kind: TrackKind,
    stop: CancellationToken,
    packets: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl WebRtcTrack {
    /// Start reading `track` until stopped or the track ends
    fn spawn(track: Arc<TrackRemote>) -> Arc<Self> {
        let kind = match track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Unknown,
        };

        let remote = Arc::new(Self {
            id: track.id(),
            kind,
            stop: CancellationToken::new(),
            packets: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
        });

        // The on_track callback holds a lock while its future runs; read elsewhere
        let stop = remote.stop.clone();
        let packets = remote.packets.clone();
        let bytes = remote.bytes.clone();
        let id = remote.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    result = track.read_rtp() => match result {
                        Ok((packet, _)) => {
                            packets.fetch_add(1, Ordering::Relaxed);
                            bytes.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!("Track {} read ended: {}", id, e);
                            break;
                        }
                    }
                }
            }
            debug!(
                "Track {} reader stopped after {} packets",
                id,
                packets.load(Ordering::Relaxed)
            );
        });

        remote
    }

    pub fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl RemoteTrack for WebRtcTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        info!(
            "Track {} ({}) stopped: {} packets, {} bytes",
            self.id,
            self.kind,
            self.packets_received(),
            self.bytes_received()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::webrtc::signaling::SdpType;

    #[derive(Default)]
    struct CountingEvents {
        negotiations: AtomicUsize,
    }

    impl CapabilityEvents for CountingEvents {
        fn on_track(&self, track: Arc<dyn RemoteTrack>) {
            track.stop();
        }

        fn on_connection_state_change(&self, _state: ConnectionState) {}

        fn on_negotiation_needed(&self) {
            self.negotiations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> NegotiationConfig {
        let mut config = NegotiationConfig::new("https://example/whep");
        config.relay_servers.push(crate::config::RelayServer::new(
            "turn:127.0.0.1:3478",
            "user",
            "secret",
        ));
        config
    }

    #[tokio::test]
    async fn test_offer_is_recvonly_video_and_audio() {
        let capability = WebRtcCapability::new(&config()).await.unwrap();
        let offer = capability.create_offer().await.unwrap();

        assert_eq!(offer.sdp_type, SdpType::Offer);
        let sections: Vec<&str> = offer.sdp.split("\r\nm=").skip(1).collect();
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("video "));
        assert!(sections[1].starts_with("audio "));
        for section in &sections {
            assert!(section.contains("a=recvonly"));
        }
        // MaxBundle: both sections on one transport
        assert!(offer.sdp.contains("a=group:BUNDLE 0 1"));

        capability.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_negotiation_is_replayed_on_register() {
        let capability = WebRtcCapability::new(&config()).await.unwrap();
        capability.negotiation_pending.store(true, Ordering::SeqCst);

        let events = Arc::new(CountingEvents::default());
        capability.register_events(events.clone());

        assert!(events.negotiations.load(Ordering::SeqCst) >= 1);
        assert!(!capability.negotiation_pending.load(Ordering::SeqCst));

        capability.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let capability = WebRtcCapability::new(&config()).await.unwrap();
        let states = capability.connection_state();

        capability.close().await.unwrap();
        capability.close().await.unwrap();

        assert_eq!(*states.borrow(), ConnectionState::Closed);
    }
}
