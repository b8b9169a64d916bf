//! Media capability layer
//!
//! The negotiation engine talks to the media transport only through the
//! [`MediaCapability`] trait. [`WebRtcCapability`] is the production
//! implementation on top of webrtc-rs.
//!
//! ```text
//! Negotiator ---- create_offer / set_*_description ----> MediaCapability
//!     ^                                                        |
//!     |            watch: ice gathering / connection state     |
//!     +--------------------------------------------------------+
//!
//! WhepSession <--- CapabilityEvents (track, state, renegotiate) ---+
//! ```

pub mod capability;
pub mod mdns;
pub mod peer;
pub mod signaling;

pub use capability::{CapabilityEvents, CapabilityFactory, MediaCapability, RemoteTrack, TrackKind};
pub use peer::{WebRtcCapability, WebRtcCapabilityFactory, WebRtcTrack};
pub use signaling::{
    ConnectionState, IceGatheringState, ResourceLocation, SdpAnswer, SdpOffer, SdpType,
    SessionDescription,
};
