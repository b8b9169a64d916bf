//! Inbound media collection and the sink it is rendered to

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::webrtc::capability::{RemoteTrack, TrackKind};

/// Tracks delivered by the capability, at most one per kind
#[derive(Default)]
pub struct MediaStream {
    tracks: Mutex<Vec<Arc<dyn RemoteTrack>>>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track unless one of the same kind is already present.
    ///
    /// Returns whether the track was added. Tracks of unknown kind are ignored.
    pub fn add_track(&self, track: Arc<dyn RemoteTrack>) -> bool {
        let kind = track.kind();
        if kind == TrackKind::Unknown {
            info!("Ignoring track {} of unknown kind", track.id());
            return false;
        }

        let mut tracks = self.tracks.lock();
        if tracks.iter().any(|t| t.kind() == kind) {
            debug!("Stream already has a {} track, ignoring {}", kind, track.id());
            return false;
        }

        debug!("Added {} track {}", kind, track.id());
        tracks.push(track);
        true
    }

    pub fn track(&self, kind: TrackKind) -> Option<Arc<dyn RemoteTrack>> {
        self.tracks.lock().iter().find(|t| t.kind() == kind).cloned()
    }

    pub fn tracks(&self) -> Vec<Arc<dyn RemoteTrack>> {
        self.tracks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    /// Stop and remove every track
    pub fn stop_all(&self) {
        let tracks: Vec<_> = self.tracks.lock().drain(..).collect();
        for track in &tracks {
            track.stop();
        }
        if !tracks.is_empty() {
            debug!("Stopped {} tracks", tracks.len());
        }
    }
}

/// Rendering target for a session's media stream
pub trait MediaSink: Send + Sync {
    fn is_attached(&self) -> bool;

    fn attach(&self, stream: Arc<MediaStream>);

    /// Drop the current stream, if any. Must be idempotent.
    fn detach(&self);
}

/// Sink that holds the stream and logs what it receives
#[derive(Default)]
pub struct LoggingSink {
    stream: Mutex<Option<Arc<MediaStream>>>,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&self) -> Option<Arc<MediaStream>> {
        self.stream.lock().clone()
    }
}

impl MediaSink for LoggingSink {
    fn is_attached(&self) -> bool {
        self.stream.lock().is_some()
    }

    fn attach(&self, stream: Arc<MediaStream>) {
        let kinds: Vec<String> = stream.tracks().iter().map(|t| t.kind().to_string()).collect();
        info!("Media attached to sink (tracks: [{}])", kinds.join(", "));
        *self.stream.lock() = Some(stream);
    }

    fn detach(&self) {
        if self.stream.lock().take().is_some() {
            info!("Media detached from sink");
        }
    }
}
