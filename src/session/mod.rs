//! Session lifecycle
//!
//! ```text
//!  Idle --setup--> Negotiating --201--> Connected
//!    ^                  |                   |
//!    |               close/abort          close
//!    |                  v                   v
//!    +---reconnect--- Closed <--------------+
//! ```

pub mod lifecycle;
pub mod state;
pub mod stream;

pub use lifecycle::WhepSession;
pub use state::{SessionState, SessionStateCell};
pub use stream::{LoggingSink, MediaSink, MediaStream};
