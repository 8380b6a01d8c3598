//! `MediaHandle` backed by an mpv IPC connection.
//!
//! Setters record their effect locally and queue an op; a single task drains
//! the queue in order against mpv.  A second task translates mpv's events
//! into `MediaEvent`s and settles the outstanding play request:
//! `playback-restart` resolves it, an `end-file` error rejects it, and a
//! newer `play()`, `pause()` or source change aborts it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use ogradio_core::media::{
    HandleId, MediaEvent, MediaEvents, MediaHandle, PcmFeed, PlayFuture, PlaybackError,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mpv::{EndReason, MpvDriver, MpvEvent, MpvHandle, OBS_DURATION, OBS_PAUSE, OBS_TIME_POS};
use crate::pcm::PcmCapture;

type Waiter = oneshot::Sender<Result<(), PlaybackError>>;

#[derive(Default)]
struct Shared {
    source: Option<String>,
    paused: bool,
    position: f64,
    duration: Option<f64>,
    /// Source mpv currently has loaded, cleared when the file ends.
    loaded_uri: Option<String>,
    /// `playback-restart` seen since the last load.
    ready: bool,
    /// Ops queued but not yet acknowledged by mpv.
    in_flight: usize,
    waiter: Option<Waiter>,
}

impl Shared {
    fn settle(&mut self, result: Result<(), PlaybackError>) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(result);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum Op {
    Load,
    Play,
    Pause,
    Volume(f32),
    Seek(f64),
}

pub struct MpvMedia {
    id: HandleId,
    shared: Arc<Mutex<Shared>>,
    ops: mpsc::UnboundedSender<Op>,
    events: Option<MediaEvents>,
    feed: Option<PcmFeed>,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl MpvMedia {
    /// Spawn mpv and wrap the connection.  PCM for analysis is decoded at
    /// `sample_rate`.
    pub async fn connect(driver: &mut MpvDriver, sample_rate: u32) -> anyhow::Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let mpv = driver.spawn_and_connect(event_tx).await?;
        mpv.observe_all_properties().await;
        Ok(Self::with_handle(mpv, event_rx, Some(PcmFeed::new(sample_rate))))
    }

    pub fn with_handle(
        mpv: MpvHandle,
        mpv_events: mpsc::Receiver<MpvEvent>,
        feed: Option<PcmFeed>,
    ) -> Self {
        let id = HandleId::next();
        let shared = Arc::new(Mutex::new(Shared {
            paused: true,
            ..Shared::default()
        }));
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();

        let capture = feed.clone().map(PcmCapture::new);
        let worker = tokio::spawn(run_ops(mpv, Arc::clone(&shared), ops_rx, capture));
        let pump = tokio::spawn(pump_events(Arc::clone(&shared), mpv_events, media_tx));
        info!("{}: attached to mpv", id);

        Self {
            id,
            shared,
            ops: ops_tx,
            events: Some(media_rx),
            feed,
            pump,
            worker,
        }
    }

    fn enqueue(&self, op: Op) {
        lock(&self.shared).in_flight += 1;
        if self.ops.send(op).is_err() {
            let mut shared = lock(&self.shared);
            shared.in_flight = shared.in_flight.saturating_sub(1);
            warn!("{}: op queue closed", self.id);
        }
    }
}

impl Drop for MpvMedia {
    fn drop(&mut self) {
        self.pump.abort();
        self.worker.abort();
        lock(&self.shared).settle(Err(PlaybackError::HandleGone));
    }
}

impl MediaHandle for MpvMedia {
    fn id(&self) -> HandleId {
        self.id
    }

    fn source(&self) -> Option<String> {
        lock(&self.shared).source.clone()
    }

    fn set_source(&mut self, uri: &str) {
        let mut shared = lock(&self.shared);
        shared.settle(Err(PlaybackError::Aborted));
        shared.source = Some(uri.to_string());
        shared.position = 0.0;
        shared.duration = None;
    }

    fn load(&mut self) {
        self.enqueue(Op::Load);
    }

    fn play(&mut self) -> PlayFuture {
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = lock(&self.shared);
            shared.settle(Err(PlaybackError::Aborted));
            shared.paused = false;
            shared.waiter = Some(tx);
        }
        self.enqueue(Op::Play);
        async move { rx.await.unwrap_or(Err(PlaybackError::HandleGone)) }.boxed()
    }

    fn pause(&mut self) {
        {
            let mut shared = lock(&self.shared);
            shared.settle(Err(PlaybackError::Aborted));
            shared.paused = true;
        }
        self.enqueue(Op::Pause);
    }

    fn is_paused(&self) -> bool {
        lock(&self.shared).paused
    }

    fn set_volume(&mut self, volume: f32) {
        self.enqueue(Op::Volume(volume));
    }

    fn current_time(&self) -> f64 {
        lock(&self.shared).position
    }

    fn set_current_time(&mut self, secs: f64) {
        lock(&self.shared).position = secs;
        self.enqueue(Op::Seek(secs));
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.shared).duration
    }

    fn take_events(&mut self) -> Option<MediaEvents> {
        self.events.take()
    }

    fn pcm_feed(&self) -> Option<PcmFeed> {
        self.feed.clone()
    }
}

// ── op queue ──────────────────────────────────────────────────────────────────

async fn run_ops(
    mpv: MpvHandle,
    shared: Arc<Mutex<Shared>>,
    mut ops: mpsc::UnboundedReceiver<Op>,
    mut capture: Option<PcmCapture>,
) {
    while let Some(op) = ops.recv().await {
        debug!("mpv op {:?}", op);
        if let Err(e) = apply(&mpv, &shared, capture.as_mut(), op).await {
            warn!("mpv op failed: {}", e);
        }
        let mut s = lock(&shared);
        s.in_flight = s.in_flight.saturating_sub(1);
    }
    debug!("mpv op queue closed");
}

async fn load(mpv: &MpvHandle, shared: &Mutex<Shared>, src: &str) -> anyhow::Result<()> {
    {
        let mut s = lock(shared);
        s.ready = false;
        s.loaded_uri = Some(src.to_string());
    }
    mpv.load_paused(src).await
}

async fn apply(
    mpv: &MpvHandle,
    shared: &Mutex<Shared>,
    mut capture: Option<&mut PcmCapture>,
    op: Op,
) -> anyhow::Result<()> {
    match op {
        Op::Load => {
            if let Some(c) = capture {
                c.stop();
            }
            let src = lock(shared).source.clone();
            match src {
                Some(src) => load(mpv, shared, &src).await?,
                None => mpv.stop().await?,
            }
        }
        Op::Play => {
            let (src, loaded) = {
                let s = lock(shared);
                (s.source.clone(), s.loaded_uri.clone())
            };
            let Some(src) = src else {
                let mut s = lock(shared);
                s.paused = true;
                s.settle(Err(PlaybackError::NotAllowed("no source assigned".into())));
                return Ok(());
            };
            let started = async {
                if loaded.as_deref() != Some(src.as_str()) {
                    load(mpv, shared, &src).await?;
                }
                mpv.set_pause(false).await
            }
            .await;
            if let Err(e) = started {
                let mut s = lock(shared);
                s.paused = true;
                s.settle(Err(PlaybackError::NotAllowed(e.to_string())));
                return Err(e);
            }
            let position = {
                let mut s = lock(shared);
                if s.ready && !s.paused {
                    s.settle(Ok(()));
                }
                s.position
            };
            if let Some(c) = capture.as_deref_mut() {
                c.start(&src, position);
            }
        }
        Op::Pause => {
            if let Some(c) = capture {
                c.stop();
            }
            mpv.set_pause(true).await?;
        }
        Op::Volume(volume) => mpv.set_volume(volume).await?,
        Op::Seek(secs) => {
            mpv.seek_to(secs).await?;
            let (src, paused) = {
                let s = lock(shared);
                (s.source.clone(), s.paused)
            };
            if let (Some(c), Some(src), false) = (capture, src, paused) {
                c.start(&src, secs);
            }
        }
    }
    Ok(())
}

// ── event pump ────────────────────────────────────────────────────────────────

async fn pump_events(
    shared: Arc<Mutex<Shared>>,
    mut mpv_events: mpsc::Receiver<MpvEvent>,
    media_tx: mpsc::UnboundedSender<MediaEvent>,
) {
    while let Some(ev) = mpv_events.recv().await {
        if let Some(out) = translate(&shared, &ev) {
            if media_tx.send(out).is_err() {
                break;
            }
        }
    }
    debug!("mpv event pump exiting");
}

fn translate(shared: &Mutex<Shared>, ev: &MpvEvent) -> Option<MediaEvent> {
    let mut s = lock(shared);

    if let Some((id, data)) = ev.as_property_change() {
        return match id {
            OBS_PAUSE => {
                let paused = data.as_bool()?;
                // local intent wins while ops are still queued
                if s.in_flight == 0 {
                    s.paused = paused;
                }
                Some(if paused {
                    MediaEvent::Paused
                } else {
                    MediaEvent::Playing
                })
            }
            OBS_TIME_POS => {
                s.position = data.as_f64()?;
                Some(MediaEvent::TimeUpdate {
                    position_secs: s.position,
                    duration_secs: s.duration,
                })
            }
            OBS_DURATION => {
                s.duration = data.as_f64();
                Some(MediaEvent::TimeUpdate {
                    position_secs: s.position,
                    duration_secs: s.duration,
                })
            }
            _ => None,
        };
    }

    if ev.event_name() == Some("playback-restart") {
        s.ready = true;
        if !s.paused {
            s.settle(Ok(()));
        }
        return None;
    }

    match ev.end_reason()? {
        EndReason::Eof => {
            s.loaded_uri = None;
            s.ready = false;
            s.paused = true;
            Some(MediaEvent::Ended)
        }
        EndReason::Error(message) => {
            s.loaded_uri = None;
            s.ready = false;
            s.paused = true;
            s.settle(Err(PlaybackError::Decode(message.clone())));
            Some(MediaEvent::Error { message })
        }
        EndReason::Stop | EndReason::Other(_) => None,
    }
}
