//! WHEP/WHIP negotiation engine
//!
//! ```text
//! create_offer -> set_local_description
//!        |
//!        v
//! IceGatheringWaiter (complete or timeout)
//!        |
//!        v
//! SignalingTransport::exchange --(non-201: wait poll_interval)--+
//!        |  ^                                                   |
//!        |  +---------------------------------------------------+
//!        v 201
//! set_remote_description -> Connected
//! ```

pub mod engine;
pub mod gathering;
pub mod transport;

pub use engine::{NegotiationOutcome, Negotiator};
pub use gathering::IceGatheringWaiter;
pub use transport::{ExchangeOutcome, HttpSignalingTransport, SignalingTransport, SDP_CONTENT_TYPE};
