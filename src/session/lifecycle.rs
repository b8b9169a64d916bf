//! WHEP session lifecycle
//!
//! Every entry point (manual `setup`/`close`/`reconnect` and the capability's
//! own renegotiation requests) becomes a [`Command`] on one queue drained by a
//! single worker task. That worker is the only place a negotiation runs, so
//! two negotiations can never overlap for the same session.
//!
//! Cancellation does not wait for the queue: `close` and `reconnect` cancel
//! the current token first, so a negotiation in flight unwinds before the
//! queued command is processed.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{SessionState, SessionStateCell};
use super::stream::{MediaSink, MediaStream};
use crate::config::NegotiationConfig;
use crate::error::{Result, WhepError};
use crate::negotiation::engine::{NegotiationOutcome, Negotiator};
use crate::negotiation::transport::{HttpSignalingTransport, SignalingTransport};
use crate::webrtc::capability::{CapabilityEvents, CapabilityFactory, MediaCapability, RemoteTrack};
use crate::webrtc::peer::WebRtcCapabilityFactory;
use crate::webrtc::signaling::{ConnectionState, ResourceLocation};

enum Command {
    Setup {
        reply: oneshot::Sender<Result<NegotiationOutcome>>,
    },
    Renegotiate {
        generation: u64,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        /// Close requests seen when the reconnect was issued
        closes: u64,
        reply: oneshot::Sender<Result<NegotiationOutcome>>,
    },
}

/// Token of the current generation plus a count of close requests
///
/// Both change under one lock so a close can never miss the token a
/// reconnect is about to install.
struct Cancellation {
    token: CancellationToken,
    closes: u64,
}

/// State visible to both the handle and the worker
struct Shared {
    state: SessionStateCell,
    cancellation: Mutex<Cancellation>,
    location: Mutex<Option<ResourceLocation>>,
    stream: Mutex<Arc<MediaStream>>,
}

impl Shared {
    fn token(&self) -> CancellationToken {
        self.cancellation.lock().token.clone()
    }

    fn cancel(&self) {
        self.cancellation.lock().token.cancel();
    }

    fn request_close(&self) {
        let mut cancellation = self.cancellation.lock();
        cancellation.closes += 1;
        cancellation.token.cancel();
    }

    /// Cancel the current token and return the close count it belongs to
    fn cancel_for_reconnect(&self) -> u64 {
        let cancellation = self.cancellation.lock();
        cancellation.token.cancel();
        cancellation.closes
    }

    /// Install a fresh token unless a close was requested after `closes`
    fn renew_token(&self, closes: u64) -> bool {
        let mut cancellation = self.cancellation.lock();
        if cancellation.closes != closes {
            return false;
        }
        cancellation.token = CancellationToken::new();
        true
    }
}

/// Client-side WHEP session
///
/// Must be created inside a Tokio runtime. Dropping the handle cancels any
/// negotiation in flight and releases the capability.
pub struct WhepSession {
    config: Arc<NegotiationConfig>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WhepSession {
    pub fn new(
        config: NegotiationConfig,
        factory: Arc<dyn CapabilityFactory>,
        transport: Arc<dyn SignalingTransport>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let shared = Arc::new(Shared {
            state: SessionStateCell::new(),
            cancellation: Mutex::new(Cancellation {
                token: CancellationToken::new(),
                closes: 0,
            }),
            location: Mutex::new(None),
            stream: Mutex::new(Arc::new(MediaStream::new())),
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            config: config.clone(),
            shared: shared.clone(),
            factory,
            negotiator: Negotiator::new(config.clone(), transport.clone()),
            transport,
            sink,
            commands: commands.downgrade(),
            generation: None,
            next_generation: 1,
        };
        tokio::spawn(worker.run(rx));

        info!("WHEP session created for {}", config.endpoint_url);
        Ok(Self {
            config,
            shared,
            commands,
        })
    }

    /// Session over HTTP signaling and a webrtc-rs peer connection
    pub fn with_webrtc(config: NegotiationConfig, sink: Arc<dyn MediaSink>) -> Result<Self> {
        let transport = Arc::new(HttpSignalingTransport::new(&config)?);
        Self::new(config, Arc::new(WebRtcCapabilityFactory), transport, sink)
    }

    /// Negotiate the session. No-op when already connected.
    pub async fn setup(&self) -> Result<NegotiationOutcome> {
        self.request(|reply| Command::Setup { reply }).await
    }

    /// Cancel any negotiation, release media and move to Closed.
    ///
    /// Safe to call repeatedly and while `setup` is in flight.
    pub async fn close(&self) {
        self.shared.request_close();

        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Close, then negotiate again with a fresh capability and token
    ///
    /// A `close` issued while the reconnect is still pending wins: the
    /// reconnect then resolves to `Aborted` and the session stays Closed.
    pub async fn reconnect(&self) -> Result<NegotiationOutcome> {
        info!("Reconnecting to {}", self.config.endpoint_url);
        let closes = self.shared.cancel_for_reconnect();
        self.request(|reply| Command::Reconnect { closes, reply }).await
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Resource returned by the endpoint for the current connection
    pub fn resource_location(&self) -> Option<ResourceLocation> {
        self.shared.location.lock().clone()
    }

    /// Media stream of the current generation
    pub fn stream(&self) -> Arc<MediaStream> {
        self.shared.stream.lock().clone()
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<NegotiationOutcome>>) -> Command,
    ) -> Result<NegotiationOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| WhepError::SessionClosed)?;
        outcome.await.map_err(|_| WhepError::SessionClosed)?
    }
}

impl Drop for WhepSession {
    fn drop(&mut self) {
        self.shared.request_close();
    }
}

/// Capability, token and stream belonging to one negotiation lifecycle
#[derive(Clone)]
struct Generation {
    id: u64,
    capability: Arc<dyn MediaCapability>,
    token: CancellationToken,
    stream: Arc<MediaStream>,
}

struct Worker {
    config: Arc<NegotiationConfig>,
    shared: Arc<Shared>,
    factory: Arc<dyn CapabilityFactory>,
    negotiator: Negotiator,
    transport: Arc<dyn SignalingTransport>,
    sink: Arc<dyn MediaSink>,
    commands: mpsc::WeakUnboundedSender<Command>,
    generation: Option<Generation>,
    next_generation: u64,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Setup { reply } => {
                    let result = self.setup().await;
                    let _ = reply.send(result);
                }
                Command::Renegotiate { generation } => self.renegotiate(generation),
                Command::Close { reply } => {
                    self.close().await;
                    let _ = reply.send(());
                }
                Command::Reconnect { closes, reply } => {
                    self.close().await;
                    let result = if self.reset(closes) {
                        self.setup().await
                    } else {
                        info!("Close requested during reconnect, staying closed");
                        Ok(NegotiationOutcome::Aborted)
                    };
                    let _ = reply.send(result);
                }
            }
        }

        // Handle dropped
        self.close().await;
        debug!("Session worker stopped");
    }

    async fn setup(&mut self) -> Result<NegotiationOutcome> {
        match self.shared.state.get() {
            SessionState::Connected => {
                info!("Already connected");
                Ok(NegotiationOutcome::Connected {
                    location: self.shared.location.lock().clone(),
                })
            }
            SessionState::Closed => Err(WhepError::SessionClosed),
            SessionState::Negotiating => {
                // Unreachable while commands are serialized
                warn!("Setup requested while a negotiation is in flight");
                Ok(NegotiationOutcome::Aborted)
            }
            SessionState::Idle => self.negotiate().await,
        }
    }

    /// A generation exists only while Negotiating or Connected, and a WHEP
    /// resource is offered exactly once, so requests are only logged.
    fn renegotiate(&self, generation: u64) {
        if self.generation.as_ref().map(|g| g.id) != Some(generation) {
            debug!("Ignoring renegotiation request from stale generation {}", generation);
            return;
        }
        debug!(
            "Ignoring renegotiation request in state {}",
            self.shared.state.get()
        );
    }

    async fn negotiate(&mut self) -> Result<NegotiationOutcome> {
        let generation = self.ensure_generation().await?;
        self.shared.state.transition(SessionState::Negotiating);

        let result = self
            .negotiator
            .negotiate(
                generation.capability.as_ref(),
                &self.shared.state,
                &generation.token,
            )
            .await;

        match &result {
            Ok(NegotiationOutcome::Connected { location }) => {
                *self.shared.location.lock() = location.clone();
            }
            Ok(NegotiationOutcome::Aborted) => {
                info!("Negotiation aborted");
                self.close().await;
            }
            Err(e) => {
                error!("Negotiation failed: {}", e);
                self.close().await;
            }
        }
        result
    }

    async fn ensure_generation(&mut self) -> Result<Generation> {
        if let Some(ref generation) = self.generation {
            return Ok(generation.clone());
        }

        let capability = self.factory.create(&self.config).await?;
        let id = self.next_generation;
        self.next_generation += 1;

        let token = self.shared.token();
        let stream = Arc::new(MediaStream::new());
        *self.shared.stream.lock() = stream.clone();

        capability.register_events(Arc::new(SessionEvents {
            generation: id,
            stream: stream.clone(),
            sink: self.sink.clone(),
            commands: self.commands.clone(),
        }));

        debug!("Session generation {} started", id);
        let generation = Generation {
            id,
            capability,
            token,
            stream,
        };
        self.generation = Some(generation.clone());
        Ok(generation)
    }

    async fn close(&mut self) {
        let was_connected = self.shared.state.get() == SessionState::Connected;
        let location = self.shared.location.lock().take();
        self.shared.cancel();

        if let Some(generation) = self.generation.take() {
            generation.token.cancel();
            if let Err(e) = generation.capability.close().await {
                warn!("Failed to close media capability: {}", e);
            }
            self.sink.detach();
            generation.stream.stop_all();
            debug!("Session generation {} released", generation.id);
        }

        if let Some(location) = location {
            if was_connected && self.config.teardown_on_close {
                match self
                    .transport
                    .terminate(&self.config.endpoint_url, &location)
                    .await
                {
                    Ok(()) => info!("Released session resource {}", location),
                    Err(e) => warn!("Failed to release session resource {}: {}", location, e),
                }
            }
        }

        if self.shared.state.transition(SessionState::Closed) {
            info!("Session closed");
        }
    }

    /// Fresh token and Idle state for the next generation, unless a close
    /// arrived after the reconnect was requested
    fn reset(&mut self, closes: u64) -> bool {
        if !self.shared.renew_token(closes) {
            return false;
        }
        self.shared.state.reset();
        true
    }
}

/// Routes capability notifications of one generation into the session
struct SessionEvents {
    generation: u64,
    stream: Arc<MediaStream>,
    sink: Arc<dyn MediaSink>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl CapabilityEvents for SessionEvents {
    fn on_track(&self, track: Arc<dyn RemoteTrack>) {
        self.stream.add_track(track);
    }

    fn on_connection_state_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                if !self.sink.is_attached() {
                    self.sink.attach(self.stream.clone());
                }
            }
            ConnectionState::Failed | ConnectionState::Disconnected => {
                warn!("Media connection {}", state);
            }
            _ => {}
        }
    }

    fn on_negotiation_needed(&self) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Renegotiate {
                generation: self.generation,
            });
        }
    }
}
