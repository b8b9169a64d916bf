//! One signaling round-trip against a WHEP/WHIP endpoint

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::NegotiationConfig;
use crate::error::{Result, WhepError};
use crate::webrtc::signaling::{ResourceLocation, SdpAnswer, SessionDescription};

/// Content type of offer and answer bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Result of a single offer POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// 201 Created: answer body plus the session resource
    Success {
        answer: SdpAnswer,
        location: Option<ResourceLocation>,
    },
    /// 405 Method Not Allowed: the endpoint URL is most likely wrong
    Misconfigured,
    /// Any other status, or no response at all (`status: None`)
    Transient { status: Option<u16>, body: String },
    /// The cancellation token fired before a response arrived
    Aborted,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeOutcome::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeOutcome::Misconfigured | ExchangeOutcome::Transient { .. }
        )
    }
}

/// Signaling transport used by the negotiation engine
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// POST `offer_sdp` to `endpoint`. Never fails: every failure is an outcome.
    async fn exchange(
        &self,
        endpoint: &str,
        offer_sdp: &str,
        token: &CancellationToken,
    ) -> ExchangeOutcome;

    /// Release the server-side session resource. A relative `location` is
    /// resolved against `endpoint`.
    async fn terminate(&self, endpoint: &str, location: &ResourceLocation) -> Result<()>;
}

/// HTTP signaling transport
pub struct HttpSignalingTransport {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl HttpSignalingTransport {
    pub fn new(config: &NegotiationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| WhepError::Signaling(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bearer_token: config.bearer_token.clone(),
        })
    }

    async fn post_offer(&self, endpoint: &str, offer_sdp: &str) -> reqwest::Result<ExchangeOutcome> {
        let mut request = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string());
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("POST {} -> {}", endpoint, status);

        match status {
            StatusCode::CREATED => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(ResourceLocation::new);
                let answer = response.text().await?;
                Ok(ExchangeOutcome::Success {
                    answer: SessionDescription::answer(answer),
                    location,
                })
            }
            StatusCode::METHOD_NOT_ALLOWED => Ok(ExchangeOutcome::Misconfigured),
            other => {
                let body = response.text().await.unwrap_or_default();
                Ok(ExchangeOutcome::Transient {
                    status: Some(other.as_u16()),
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn exchange(
        &self,
        endpoint: &str,
        offer_sdp: &str,
        token: &CancellationToken,
    ) -> ExchangeOutcome {
        // Dropping the request future aborts the connection
        tokio::select! {
            biased;
            _ = token.cancelled() => ExchangeOutcome::Aborted,
            result = self.post_offer(endpoint, offer_sdp) => match result {
                Ok(outcome) => outcome,
                Err(e) => ExchangeOutcome::Transient {
                    status: None,
                    body: e.to_string(),
                },
            },
        }
    }

    async fn terminate(&self, endpoint: &str, location: &ResourceLocation) -> Result<()> {
        let url = location.resolve(endpoint);
        let mut request = self.client.delete(&url);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("DELETE {} -> {}", url, status);

        // Already gone is as good as deleted
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(WhepError::Signaling(format!(
                "Resource teardown failed: HTTP {}",
                status
            )))
        }
    }
}
