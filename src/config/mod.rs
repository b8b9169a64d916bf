//! Negotiation configuration

mod schema;

pub use schema::{NegotiationConfig, RelayServer, DEFAULT_TIME_REQUEST_MS};
