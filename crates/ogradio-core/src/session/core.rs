/// SessionCore: single-owner event loop around the session store.
///
/// Every mutation of playback intent arrives as a `SessionEvent`: commands
/// from clients, handle registration, play-request settlements and events
/// forwarded from the registered handle.  Play outcomes are awaited on
/// spawned tasks and come back as `PlaySettled`, so the loop itself never
/// blocks on the platform.
///
/// The core also owns the graph registry (bound lazily on registration), the
/// equalizer spliced into the current graph, and the alarm clock, which a
/// one-second ticker drives.
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use ogradio_proto::descriptor::PlaybackDescriptor;
use ogradio_proto::protocol::{Command, Notice, SessionSnapshot};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{Attach, PlayRequest, PlayTag, SessionStore};
use crate::alarm::AlarmClock;
use crate::equalizer::{Equalizer, Gains};
use crate::graph::{AnalyserSettings, AnalysisGraph, ContextFactory, GraphRegistry};
use crate::media::{HandleId, MediaEvent, MediaEvents, MediaHandle, PlaybackError};
use crate::notify::Notifier;
use crate::visualizer::Visualizer;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
pub enum SessionEvent {
    Command(Command),
    /// Attach a media handle, or detach the current one with `None`.
    RegisterHandle(Option<Box<dyn MediaHandle>>),
    PlaySettled {
        tag: PlayTag,
        result: Result<(), PlaybackError>,
    },
    Media {
        handle: HandleId,
        event: MediaEvent,
    },
    AlarmTick(NaiveDateTime),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session core has shut down")]
pub struct SessionClosed;

#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub welcome: PlaybackDescriptor,
    pub default_volume: f32,
    pub analyser: AnalyserSettings,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            welcome: PlaybackDescriptor::welcome("/audio/welcome/Welcome.mp3"),
            default_volume: 1.0,
            analyser: AnalyserSettings::default(),
        }
    }
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    store: SessionStore,
    graphs: GraphRegistry,
    graph_tx: watch::Sender<Option<Arc<AnalysisGraph>>>,
    equalizer: Equalizer,
    eq_tx: watch::Sender<Gains>,
    alarm: AlarmClock,
    event_tx: mpsc::Sender<SessionEvent>,
    /// Task forwarding the registered handle's events into the loop.
    forwarder: Option<JoinHandle<()>>,
}

impl SessionCore {
    pub fn new(
        settings: CoreSettings,
        factory: Arc<dyn ContextFactory>,
        notifier: Notifier,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (graph_tx, _) = watch::channel(None);
        let equalizer = Equalizer::new();
        let (eq_tx, _) = watch::channel(equalizer.gains());
        Self {
            store: SessionStore::new(settings.welcome, settings.default_volume, notifier),
            graphs: GraphRegistry::new(factory, settings.analyser),
            graph_tx,
            equalizer,
            eq_tx,
            alarm: AlarmClock::new(),
            event_tx,
            forwarder: None,
        }
    }

    /// Build a core, spawn its loop, and return a client for it.
    pub fn spawn(
        settings: CoreSettings,
        factory: Arc<dyn ContextFactory>,
    ) -> (SessionClient, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let core = Self::new(settings, factory, Notifier::new(), event_tx);
        let client = core.client();
        let task = tokio::spawn(core.run(event_rx));
        (client, task)
    }

    pub fn client(&self) -> SessionClient {
        SessionClient {
            tx: self.event_tx.clone(),
            snapshot: self.store.subscribe(),
            graph: self.graph_tx.subscribe(),
            equalizer: self.eq_tx.subscribe(),
            notifier: self.store.notifier().clone(),
        }
    }

    /// Run the loop until `Shutdown`.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) {
        info!("SessionCore: starting event loop");

        let tick_tx = self.event_tx.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now = Local::now().naive_local();
                if tick_tx.send(SessionEvent::AlarmTick(now)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::Shutdown => {
                    info!("SessionCore: shutdown requested");
                    break;
                }
                SessionEvent::Command(cmd) => {
                    debug!("SessionCore: command {:?}", cmd);
                    self.handle_command(cmd);
                }
                SessionEvent::RegisterHandle(handle) => self.register(handle),
                SessionEvent::PlaySettled { tag, result } => self.store.settle(tag, result),
                SessionEvent::Media { handle, event } => {
                    debug!("SessionCore: {} {:?}", handle, event);
                    self.store.reconcile(handle, event);
                }
                SessionEvent::AlarmTick(now) => self.on_alarm_tick(now),
            }
        }

        ticker.abort();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.store.pause_all_audio();
        info!("SessionCore: stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        let request = match cmd {
            Command::Play { item } => self.store.play_item(item),
            Command::TogglePlayPause => self.store.toggle_play_pause(),
            Command::PauseAll => {
                self.store.pause_all_audio();
                None
            }
            Command::Stop => {
                self.store.stop_playback();
                None
            }
            Command::Volume { value } => {
                self.store.set_volume(value);
                None
            }
            Command::ToggleMute => {
                self.store.toggle_mute();
                None
            }
            Command::Seek { fraction } => {
                self.store.seek(fraction);
                None
            }
            Command::PlayWelcome => self.store.play_welcome(),
            Command::ResumeLast => self.store.resume_last(),
            Command::SetAlarm { time } => {
                self.set_alarm(&time);
                None
            }
            Command::CancelAlarm => {
                if self.alarm.cancel() {
                    self.store.notifier().info("Alarm Cancelled", "");
                }
                self.store.set_alarm_label(None);
                None
            }
            Command::EqGain { band, gain_db } => {
                if self.equalizer.set_gain(band, gain_db).is_none() {
                    warn!("equalizer: rejected band {} gain {}", band, gain_db);
                }
                self.eq_tx.send_replace(self.equalizer.gains());
                None
            }
            Command::EqReset => {
                self.equalizer.reset();
                self.eq_tx.send_replace(self.equalizer.gains());
                None
            }
        };
        if let Some(request) = request {
            self.spawn_play(request);
        }
    }

    fn spawn_play(&self, request: PlayRequest) {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let PlayRequest { tag, outcome } = request;
            let result = outcome.await;
            let _ = tx.send(SessionEvent::PlaySettled { tag, result }).await;
        });
    }

    fn register(&mut self, handle: Option<Box<dyn MediaHandle>>) {
        let id = handle.as_ref().map(|h| h.id());
        if id.is_none() {
            if let Some(previous) = self.store.handle().map(|h| h.id()) {
                self.release_graph(previous);
            }
        }
        if let Some(h) = handle.as_deref() {
            self.bind_graph(h);
        }

        let Attach { events, request } = self.store.register_handle(handle);
        match (id, events) {
            (Some(id), Some(events)) => self.forward_events(id, events),
            (None, _) => {
                if let Some(forwarder) = self.forwarder.take() {
                    forwarder.abort();
                }
            }
            _ => {}
        }
        if let Some(request) = request {
            self.spawn_play(request);
        }
    }

    /// Drop the graph of a handle that is being explicitly unregistered.
    fn release_graph(&mut self, id: HandleId) {
        self.graph_tx.send_replace(None);
        if self.equalizer.attached_to() == Some(id) {
            if let Err(e) = self.equalizer.detach() {
                debug!("equalizer detach from {}: {}", id, e);
            }
        }
        self.graphs.release(id);
    }

    fn bind_graph(&mut self, handle: &dyn MediaHandle) {
        match self.graphs.bind(handle) {
            Ok(graph) => {
                if let Err(e) = self.equalizer.attach(Arc::clone(&graph)) {
                    warn!("equalizer unavailable on {}: {}", handle.id(), e);
                }
                self.graph_tx.send_replace(Some(graph));
            }
            Err(e) => {
                warn!("visuals degraded for {}: {}", handle.id(), e);
                self.graph_tx.send_replace(None);
            }
        }
    }

    fn forward_events(&mut self, id: HandleId, mut events: MediaEvents) {
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(SessionEvent::Media { handle: id, event }).await.is_err() {
                    break;
                }
            }
            debug!("event stream of {} closed", id);
        });
        if let Some(old) = self.forwarder.replace(task) {
            old.abort();
        }
    }

    fn set_alarm(&mut self, time: &str) {
        if self.store.last_non_trivial().is_none() {
            self.store.notifier().warning(
                "Choose Your WakeupMusic!",
                "Pick a station or track before setting the alarm.",
            );
            return;
        }
        match self.alarm.set(time) {
            Ok(at) => {
                let label = at.format("%H:%M").to_string();
                self.store
                    .notifier()
                    .success("Alarm Set", format!("Alarm set for {label}"));
                self.store.set_alarm_label(Some(label));
            }
            Err(e) => self.store.notifier().error("Alarm Not Set", e.to_string()),
        }
    }

    fn on_alarm_tick(&mut self, now: NaiveDateTime) {
        if !self.alarm.check(now) {
            return;
        }
        self.store.set_alarm_label(None);
        match self.store.last_non_trivial().cloned() {
            Some(item) => {
                self.store
                    .notifier()
                    .success("Alarm Triggered!", format!("Resuming \"{}\"", item.title));
                if let Some(request) = self.store.play_item(item) {
                    self.spawn_play(request);
                }
            }
            None => self
                .store
                .notifier()
                .error("Alarm Trigger Failed", "No recent station or track found."),
        }
    }
}

// ── SessionClient ─────────────────────────────────────────────────────────────

/// Cloneable handle for talking to a running core.
#[derive(Clone)]
pub struct SessionClient {
    tx: mpsc::Sender<SessionEvent>,
    snapshot: watch::Receiver<Arc<SessionSnapshot>>,
    graph: watch::Receiver<Option<Arc<AnalysisGraph>>>,
    equalizer: watch::Receiver<Gains>,
    notifier: Notifier,
}

impl SessionClient {
    pub async fn send(&self, event: SessionEvent) -> Result<(), SessionClosed> {
        self.tx.send(event).await.map_err(|_| SessionClosed)
    }

    pub async fn command(&self, cmd: Command) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Command(cmd)).await
    }

    pub async fn register_handle(
        &self,
        handle: Option<Box<dyn MediaHandle>>,
    ) -> Result<(), SessionClosed> {
        self.send(SessionEvent::RegisterHandle(handle)).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Shutdown).await
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn graph(&self) -> Option<Arc<AnalysisGraph>> {
        self.graph.borrow().clone()
    }

    pub fn equalizer_gains(&self) -> Gains {
        *self.equalizer.borrow()
    }

    pub fn visualizer(&self, bands: usize) -> Visualizer {
        Visualizer::new(self.snapshot.clone(), self.graph.clone(), bands)
    }
}
