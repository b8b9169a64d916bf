//! Bounded wait for ICE candidate gathering
//!
//! Full gathering can stall (restrictive networks, unreachable TURN), so the
//! offer goes out with whatever candidates exist when the bound expires.

use std::time::Duration;

use tracing::{debug, warn};

use crate::webrtc::capability::MediaCapability;
use crate::webrtc::signaling::{IceGatheringState, SessionDescription};

/// Waits for gathering to complete, up to a fixed timeout
#[derive(Debug, Clone, Copy)]
pub struct IceGatheringWaiter {
    timeout: Duration,
}

impl IceGatheringWaiter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve with the capability's local description once gathering
    /// completes or the timeout elapses, whichever comes first.
    ///
    /// `None` means the capability has no local description at all.
    pub async fn wait(&self, capability: &dyn MediaCapability) -> Option<SessionDescription> {
        let mut gathering = capability.ice_gathering_state();

        let completed = tokio::time::timeout(
            self.timeout,
            gathering.wait_for(|state| *state == IceGatheringState::Complete),
        )
        .await
        .map(|changed| changed.is_ok());

        match completed {
            Ok(true) => debug!("ICE gathering complete"),
            // Sender gone: nothing more will be gathered
            Ok(false) => debug!("ICE gathering state no longer observable"),
            Err(_) => warn!(
                "ICE gathering not complete after {:?}, sending offer with partial candidates",
                self.timeout
            ),
        }

        let description = capability.local_description().await;
        if let Some(ref desc) = description {
            debug!("Local description has {} candidates", desc.candidate_count());
        }
        description
    }
}
