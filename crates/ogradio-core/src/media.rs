//! The media-playback handle the host environment registers with the session.
//!
//! Everything except `play()` is synchronous: setters take effect (or are
//! queued in order) immediately, and `play()` hands back a deferred outcome
//! that settles when the platform starts or refuses playback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registered media handle.  Graph bindings and event
/// routing are keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "media#{}", self.0)
    }
}

/// Why the platform refused a play request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("playback not allowed: {0}")]
    NotAllowed(String),
    #[error("could not decode media: {0}")]
    Decode(String),
    #[error("network error: {0}")]
    Network(String),
    /// A newer source or pause interrupted the request.
    #[error("play request aborted")]
    Aborted,
    #[error("media handle gone")]
    HandleGone,
}

/// Deferred outcome of `MediaHandle::play`.
pub type PlayFuture = BoxFuture<'static, Result<(), PlaybackError>>;

/// Notifications a handle pushes to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Playing,
    Paused,
    Ended,
    Error { message: String },
    TimeUpdate {
        position_secs: f64,
        duration_secs: Option<f64>,
    },
}

pub type MediaEvents = mpsc::UnboundedReceiver<MediaEvent>;

/// Chunked mono PCM (normalised -1..1) produced by whatever the handle is
/// currently playing.  The analysis graph's source node reads from it.
#[derive(Debug, Clone)]
pub struct PcmFeed {
    sample_rate: u32,
    tx: broadcast::Sender<Arc<Vec<f32>>>,
}

impl PcmFeed {
    pub fn new(sample_rate: u32) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { sample_rate, tx }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn push(&self, samples: Vec<f32>) {
        // no subscribers is fine: nothing is analysing right now
        let _ = self.tx.send(Arc::new(samples));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<f32>>> {
        self.tx.subscribe()
    }
}

pub trait MediaHandle: Send {
    fn id(&self) -> HandleId;

    /// The resource currently assigned, if any.
    fn source(&self) -> Option<String>;

    fn set_source(&mut self, uri: &str);

    fn load(&mut self);

    fn play(&mut self) -> PlayFuture;

    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    fn set_volume(&mut self, volume: f32);

    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, secs: f64);

    fn duration(&self) -> Option<f64>;

    /// Event stream for this handle.  Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<MediaEvents>;

    /// PCM of whatever is playing, for analysis.  `None` when the handle
    /// cannot expose samples.
    fn pcm_feed(&self) -> Option<PcmFeed> {
        None
    }
}
