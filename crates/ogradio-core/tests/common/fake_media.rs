//! Scriptable media handle.  Play requests stay pending until the test
//! resolves them, in whatever order it likes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use ogradio_core::media::{
    HandleId, MediaEvent, MediaEvents, MediaHandle, PcmFeed, PlayFuture, PlaybackError,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct FakeState {
    pub source: Option<String>,
    pub paused: bool,
    pub volume: f32,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub loads: usize,
    pub plays: usize,
    pub pauses: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            source: None,
            paused: true,
            volume: 1.0,
            current_time: 0.0,
            duration: None,
            loads: 0,
            plays: 0,
            pauses: 0,
        }
    }
}

type Waiter = (Option<String>, oneshot::Sender<Result<(), PlaybackError>>);

pub struct FakeMedia {
    id: HandleId,
    state: Arc<Mutex<FakeState>>,
    waiters: Arc<Mutex<VecDeque<Waiter>>>,
    events: Option<MediaEvents>,
    feed: Option<PcmFeed>,
}

/// Test-side view of a `FakeMedia` after it has been boxed and handed over.
#[derive(Clone)]
pub struct FakeProbe {
    pub id: HandleId,
    state: Arc<Mutex<FakeState>>,
    waiters: Arc<Mutex<VecDeque<Waiter>>>,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
    feed: Option<PcmFeed>,
}

pub fn fake_media() -> (Box<dyn MediaHandle>, FakeProbe) {
    build(None)
}

pub fn fake_media_with_pcm(sample_rate: u32) -> (Box<dyn MediaHandle>, FakeProbe) {
    build(Some(PcmFeed::new(sample_rate)))
}

fn build(feed: Option<PcmFeed>) -> (Box<dyn MediaHandle>, FakeProbe) {
    let id = HandleId::next();
    let state = Arc::new(Mutex::new(FakeState::default()));
    let waiters = Arc::new(Mutex::new(VecDeque::new()));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let media = FakeMedia {
        id,
        state: Arc::clone(&state),
        waiters: Arc::clone(&waiters),
        events: Some(events_rx),
        feed: feed.clone(),
    };
    let probe = FakeProbe {
        id,
        state,
        waiters,
        events_tx,
        feed,
    };
    (Box::new(media), probe)
}

impl FakeProbe {
    pub fn state(&self) -> FakeState {
        self.state.lock().unwrap().clone()
    }

    pub fn pending_plays(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    /// Settle the oldest outstanding play request issued while `source` was
    /// loaded.  Returns false when there is none.
    pub fn resolve(&self, source: &str, result: Result<(), PlaybackError>) -> bool {
        let waiter = {
            let mut waiters = self.waiters.lock().unwrap();
            let pos = waiters
                .iter()
                .position(|(s, _)| s.as_deref() == Some(source));
            pos.and_then(|p| waiters.remove(p))
        };
        match waiter {
            Some((_, tx)) => {
                if result.is_err() {
                    self.state.lock().unwrap().paused = true;
                }
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Pause from outside the session (OS media keys, headset button).
    pub fn pause_externally(&self) {
        self.state.lock().unwrap().paused = true;
        self.emit(MediaEvent::Paused);
    }

    pub fn resume_externally(&self) {
        self.state.lock().unwrap().paused = false;
        self.emit(MediaEvent::Playing);
    }

    pub fn set_duration(&self, secs: f64) {
        self.state.lock().unwrap().duration = Some(secs);
    }

    pub fn feed(&self) -> Option<PcmFeed> {
        self.feed.clone()
    }
}

impl MediaHandle for FakeMedia {
    fn id(&self) -> HandleId {
        self.id
    }

    fn source(&self) -> Option<String> {
        self.state.lock().unwrap().source.clone()
    }

    fn set_source(&mut self, uri: &str) {
        let mut state = self.state.lock().unwrap();
        state.source = Some(uri.to_string());
        state.current_time = 0.0;
    }

    fn load(&mut self) {
        self.state.lock().unwrap().loads += 1;
    }

    fn play(&mut self) -> PlayFuture {
        let source = {
            let mut state = self.state.lock().unwrap();
            state.paused = false;
            state.plays += 1;
            state.source.clone()
        };
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().push_back((source, tx));
        async move { rx.await.unwrap_or(Err(PlaybackError::Aborted)) }.boxed()
    }

    fn pause(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.paused = true;
        state.pauses += 1;
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().current_time
    }

    fn set_current_time(&mut self, secs: f64) {
        self.state.lock().unwrap().current_time = secs;
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().unwrap().duration
    }

    fn take_events(&mut self) -> Option<MediaEvents> {
        self.events.take()
    }

    fn pcm_feed(&self) -> Option<PcmFeed> {
        self.feed.clone()
    }
}
