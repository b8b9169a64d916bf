//! Offer/answer negotiation with retry

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gathering::IceGatheringWaiter;
use super::transport::{ExchangeOutcome, SignalingTransport};
use crate::config::NegotiationConfig;
use crate::error::{Result, WhepError};
use crate::session::state::{SessionState, SessionStateCell};
use crate::utils::LogThrottler;
use crate::webrtc::capability::MediaCapability;
use crate::webrtc::signaling::{ConnectionState, ResourceLocation};

/// How a negotiation ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Answer applied. `location` is absent when the server sent no `Location`.
    Connected { location: Option<ResourceLocation> },
    /// Cancelled, or the capability closed before an answer arrived
    Aborted,
}

impl NegotiationOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, NegotiationOutcome::Connected { .. })
    }

    pub fn location(&self) -> Option<&ResourceLocation> {
        match self {
            NegotiationOutcome::Connected { location } => location.as_ref(),
            NegotiationOutcome::Aborted => None,
        }
    }
}

/// Drives a capability through offer -> gather -> POST -> answer
pub struct Negotiator {
    config: Arc<NegotiationConfig>,
    transport: Arc<dyn SignalingTransport>,
    waiter: IceGatheringWaiter,
    throttle: LogThrottler,
}

impl Negotiator {
    pub fn new(config: Arc<NegotiationConfig>, transport: Arc<dyn SignalingTransport>) -> Self {
        let waiter = IceGatheringWaiter::new(config.ice_gather_timeout());
        Self {
            config,
            transport,
            waiter,
            throttle: LogThrottler::default(),
        }
    }

    /// Run one negotiation to completion
    ///
    /// Retries every `poll_interval` until the endpoint answers 201, the
    /// token is cancelled, or the capability's connection closes. Only a
    /// missing local description or a capability failure is an error.
    pub async fn negotiate(
        &self,
        capability: &dyn MediaCapability,
        state: &SessionStateCell,
        token: &CancellationToken,
    ) -> Result<NegotiationOutcome> {
        let offer = capability.create_offer().await?;
        capability.set_local_description(offer).await?;

        let local = self
            .waiter
            .wait(capability)
            .await
            .filter(|desc| !desc.is_empty())
            .ok_or(WhepError::NoLocalDescription)?;

        let mut connection = capability.connection_state();
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                debug!("Negotiation cancelled after {} attempts", attempt);
                return Ok(NegotiationOutcome::Aborted);
            }
            let closed = *connection.borrow() == ConnectionState::Closed;
            if closed {
                debug!("Connection closed, stopping negotiation after {} attempts", attempt);
                return Ok(NegotiationOutcome::Aborted);
            }

            attempt += 1;
            let outcome = self
                .transport
                .exchange(&self.config.endpoint_url, &local.sdp, token)
                .await;

            match outcome {
                ExchangeOutcome::Success { answer, location } => {
                    capability.set_remote_description(answer).await?;
                    if token.is_cancelled() {
                        return Ok(NegotiationOutcome::Aborted);
                    }

                    self.throttle.clear_all();
                    state.transition(SessionState::Connected);
                    match location {
                        Some(ref location) => info!(
                            "Connected to {} after {} attempts, resource {}",
                            self.config.endpoint_url, attempt, location
                        ),
                        None => warn!(
                            "Connected to {} after {} attempts, but no Location header was returned",
                            self.config.endpoint_url, attempt
                        ),
                    }
                    return Ok(NegotiationOutcome::Connected { location });
                }
                ExchangeOutcome::Misconfigured => {
                    if let Some(suppressed) = self.throttle.check("status:405") {
                        warn!(
                            "Endpoint {} rejected POST (405); remember to update the URL passed to the WHEP/WHIP client ({} repeats suppressed)",
                            self.config.endpoint_url, suppressed
                        );
                    }
                }
                ExchangeOutcome::Transient { status, body } => {
                    let key = match status {
                        Some(code) => format!("status:{}", code),
                        None => "network".to_string(),
                    };
                    if let Some(suppressed) = self.throttle.check(&key) {
                        match status {
                            Some(code) => error!(
                                "Signaling attempt {} failed with HTTP {}: {} ({} repeats suppressed)",
                                attempt,
                                code,
                                body.trim(),
                                suppressed
                            ),
                            None => error!(
                                "Signaling attempt {} failed: {} ({} repeats suppressed)",
                                attempt, body, suppressed
                            ),
                        }
                    }
                }
                ExchangeOutcome::Aborted => {
                    debug!("Signaling request aborted on attempt {}", attempt);
                    return Ok(NegotiationOutcome::Aborted);
                }
            }

            // Relative delay, restarted each attempt
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Negotiation cancelled while waiting to retry");
                    return Ok(NegotiationOutcome::Aborted);
                }
                _ = wait_closed(&mut connection) => {
                    debug!("Connection closed while waiting to retry");
                    return Ok(NegotiationOutcome::Aborted);
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }
}

/// Resolves once the connection reports Closed; never if the sender goes away
async fn wait_closed(rx: &mut watch::Receiver<ConnectionState>) {
    let observed = rx
        .wait_for(|state| *state == ConnectionState::Closed)
        .await
        .is_ok();
    if !observed {
        std::future::pending::<()>().await;
    }
}
