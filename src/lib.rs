//! whep-client - WHEP/WHIP signaling client
//!
//! Negotiates a receive-only real-time media session with a WHEP endpoint:
//! builds an SDP offer, waits for ICE gathering, POSTs the offer until the
//! endpoint answers and tracks the resulting session until it is closed.

pub mod config;
pub mod error;
pub mod negotiation;
pub mod session;
pub mod utils;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use config::NegotiationConfig;
pub use error::{Result, WhepError};
pub use session::WhepSession;
