//! Contract between the negotiation engine and the media transport
//!
//! The negotiation engine never touches a peer connection directly. It drives
//! a [`MediaCapability`], and the capability reports asynchronous happenings
//! back through [`CapabilityEvents`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::signaling::{ConnectionState, IceGatheringState, SdpAnswer, SdpOffer, SessionDescription};
use crate::config::NegotiationConfig;
use crate::error::Result;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Unknown,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Inbound media track delivered by the capability
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Stop delivering media. Must be idempotent.
    fn stop(&self);
}

/// Notifications a capability delivers to its owner
///
/// Implementations must not block: they run on the capability's callback path.
pub trait CapabilityEvents: Send + Sync {
    /// A remote track arrived
    fn on_track(&self, track: Arc<dyn RemoteTrack>);

    /// The peer connection state changed
    fn on_connection_state_change(&self, state: ConnectionState);

    /// The capability wants a new offer/answer exchange
    fn on_negotiation_needed(&self);
}

/// Media negotiation capability (peer connection)
#[async_trait]
pub trait MediaCapability: Send + Sync {
    async fn create_offer(&self) -> Result<SdpOffer>;

    /// Commit an offer as the local description. Starts ICE gathering.
    async fn set_local_description(&self, offer: SdpOffer) -> Result<()>;

    async fn set_remote_description(&self, answer: SdpAnswer) -> Result<()>;

    /// Local description as it stands now, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    fn ice_gathering_state(&self) -> watch::Receiver<IceGatheringState>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Route notifications to `events`, replacing any previous receiver
    fn register_events(&self, events: Arc<dyn CapabilityEvents>);

    /// Release the underlying transport. Must be idempotent.
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh capability for each session generation
#[async_trait]
pub trait CapabilityFactory: Send + Sync {
    async fn create(&self, config: &NegotiationConfig) -> Result<Arc<dyn MediaCapability>>;
}
