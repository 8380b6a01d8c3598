//! SessionStore: the single owner of playback intent and of the media handle.
//!
//! Every command is a synchronous `&mut self` call.  The only asynchronous
//! step is the handle's play request: `play_item` commits the new selection,
//! asks the handle to play and returns a `PlayRequest` whose outcome the
//! caller awaits and feeds back through `settle`.  Each request is tagged with
//! the descriptor it was issued for; a resolution whose tag is no longer the
//! pending one is dropped.
//!
//! Phases are derived, never stored:
//! ```text
//!   Idle     current.kind == none
//!   Loading  committed, request pending (or waiting for a handle)
//!   Playing  is_playing
//!   Paused   neither, current kept
//! ```

use std::sync::Arc;

use ogradio_proto::descriptor::PlaybackDescriptor;
use ogradio_proto::protocol::{PlaybackPhase, SessionSnapshot, Timeline};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::media::{HandleId, MediaEvent, MediaEvents, MediaHandle, PlayFuture, PlaybackError};
use crate::notify::Notifier;

const FALLBACK_RESTORE_VOLUME: f32 = 0.5;

/// Identity a play request was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayTag {
    seq: u64,
    descriptor_id: String,
    handle: HandleId,
}

impl PlayTag {
    pub fn descriptor_id(&self) -> &str {
        &self.descriptor_id
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }
}

/// A play request in flight.  Await `outcome`, then hand it back to
/// `SessionStore::settle` together with `tag`.
pub struct PlayRequest {
    pub tag: PlayTag,
    pub outcome: PlayFuture,
}

impl std::fmt::Debug for PlayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayRequest").field("tag", &self.tag).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    /// Intent recorded while no handle is registered.
    AwaitingHandle,
    InFlight(PlayTag),
}

/// Result of registering a handle: its event stream (to be forwarded into
/// `reconcile`) and any queued play request that registration released.
#[derive(Debug, Default)]
pub struct Attach {
    pub events: Option<MediaEvents>,
    pub request: Option<PlayRequest>,
}

pub struct SessionStore {
    current: PlaybackDescriptor,
    last_non_trivial: Option<PlaybackDescriptor>,
    is_playing: bool,
    volume: f32,
    /// Volume to come back to when unmuting.
    restore_volume: f32,
    active_theme_genre: Option<String>,
    welcome_played: bool,
    welcome: PlaybackDescriptor,
    timeline: Timeline,
    alarm_label: Option<String>,

    handle: Option<Box<dyn MediaHandle>>,
    pending: Option<Pending>,
    /// Request whose natural end should stop the session.
    armed_end: Option<PlayTag>,
    next_seq: u64,

    rev: u64,
    notifier: Notifier,
    snapshot_tx: watch::Sender<Arc<SessionSnapshot>>,
}

impl SessionStore {
    pub fn new(welcome: PlaybackDescriptor, default_volume: f32, notifier: Notifier) -> Self {
        let volume = if default_volume.is_finite() {
            default_volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let (snapshot_tx, _) = watch::channel(Arc::new(SessionSnapshot::default()));
        let mut store = Self {
            current: PlaybackDescriptor::empty(),
            last_non_trivial: None,
            is_playing: false,
            volume,
            restore_volume: if volume > 0.0 {
                volume
            } else {
                FALLBACK_RESTORE_VOLUME
            },
            active_theme_genre: None,
            welcome_played: false,
            welcome,
            timeline: Timeline::default(),
            alarm_label: None,
            handle: None,
            pending: None,
            armed_end: None,
            next_seq: 0,
            rev: 0,
            notifier,
            snapshot_tx,
        };
        store.publish();
        store
    }

    // ── reads ─────────────────────────────────────────────────────────────────

    pub fn current(&self) -> &PlaybackDescriptor {
        &self.current
    }

    pub fn last_non_trivial(&self) -> Option<&PlaybackDescriptor> {
        self.last_non_trivial.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn active_theme_genre(&self) -> Option<&str> {
        self.active_theme_genre.as_deref()
    }

    pub fn welcome_played(&self) -> bool {
        self.welcome_played
    }

    pub fn handle(&self) -> Option<&dyn MediaHandle> {
        self.handle.as_deref()
    }

    pub fn phase(&self) -> PlaybackPhase {
        if self.current.is_empty() {
            PlaybackPhase::Idle
        } else if self.is_playing {
            PlaybackPhase::Playing
        } else if self.pending.is_some() {
            PlaybackPhase::Loading
        } else {
            PlaybackPhase::Paused
        }
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // ── transport commands ────────────────────────────────────────────────────

    pub fn play_item(&mut self, item: PlaybackDescriptor) -> Option<PlayRequest> {
        if let Err(e) = item.validate() {
            self.notifier.error("Playback Error", e.to_string());
            if item.id == self.current.id && self.current.is_playable() {
                debug!("malformed re-request of {}, keeping current", item.id);
                return None;
            }
            self.reset_to_empty();
            self.publish();
            return None;
        }

        if item.is_empty() {
            self.stop_playback();
            return None;
        }

        info!("play {} ({:?}) {}", item.id, item.kind, item.source_uri);
        self.commit(item);
        self.request_play(true)
    }

    pub fn toggle_play_pause(&mut self) -> Option<PlayRequest> {
        if self.is_playing {
            self.pause_all_audio();
            return None;
        }

        if self.current.is_playable() {
            let loaded = self
                .handle
                .as_ref()
                .and_then(|h| h.source())
                .is_some_and(|src| src == self.current.source_uri);
            if loaded {
                debug!("resume {} in place", self.current.id);
                self.armed_end = None;
                return self.request_play(false);
            }
            let item = self.current.clone();
            return self.play_item(item);
        }

        if let Some(last) = self.last_non_trivial.clone() {
            return self.play_item(last);
        }

        debug!("toggle with nothing selected and no history");
        None
    }

    pub fn pause_all_audio(&mut self) {
        self.pause_media();
        self.is_playing = false;
        self.pending = None;
        self.publish();
    }

    pub fn stop_playback(&mut self) {
        info!("stop ({} was current)", self.current.id);
        self.reset_to_empty();
        self.publish();
    }

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            warn!("ignoring non-finite volume {}", volume);
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        if volume > 0.0 {
            self.restore_volume = volume;
        }
        self.volume = volume;
        if let Some(handle) = self.handle.as_mut() {
            handle.set_volume(volume);
        }
        self.publish();
    }

    pub fn toggle_mute(&mut self) {
        if self.volume > 0.0 {
            self.set_volume(0.0);
        } else {
            self.set_volume(self.restore_volume);
        }
    }

    /// Seek to `fraction` of the loaded item's duration.
    pub fn seek(&mut self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        match handle.duration() {
            Some(duration) if duration.is_finite() && duration > 0.0 => {
                let position = fraction.clamp(0.0, 1.0) * duration;
                handle.set_current_time(position);
                self.timeline = Timeline {
                    position_secs: position,
                    duration_secs: Some(duration),
                };
                self.publish();
            }
            _ => debug!("seek ignored: duration unknown"),
        }
    }

    /// One-shot welcome message.  The flag flips on invocation, so rapid
    /// repeated calls cannot double-play even before the first one settles.
    pub fn play_welcome(&mut self) -> Option<PlayRequest> {
        if self.welcome_played {
            self.notifier.info(
                "Welcome already played",
                "The welcome message plays once per session.",
            );
            return None;
        }
        self.welcome_played = true;
        let welcome = self.welcome.clone();
        let request = self.play_item(welcome);
        self.publish();
        request
    }

    /// Play the most recent station/track/playlist again.
    pub fn resume_last(&mut self) -> Option<PlayRequest> {
        match self.last_non_trivial.clone() {
            Some(last) => self.play_item(last),
            None => {
                self.notifier
                    .error("Nothing to resume", "No recent station or track found.");
                None
            }
        }
    }

    pub fn set_alarm_label(&mut self, label: Option<String>) {
        if self.alarm_label != label {
            self.alarm_label = label;
            self.publish();
        }
    }

    // ── async settlement & handle reconciliation ──────────────────────────────

    pub fn settle(&mut self, tag: PlayTag, result: Result<(), PlaybackError>) {
        let awaited = matches!(&self.pending, Some(Pending::InFlight(t)) if *t == tag)
            && self.current.id == tag.descriptor_id;

        if !awaited {
            debug!(
                "stale play resolution for {} (seq {}): {:?}",
                tag.descriptor_id, tag.seq, result
            );
            // Nobody wants this playback any more.  If a newer request owns
            // the handle, pausing would abort it, so leave it alone.
            if result.is_ok() && !self.intends_playback() {
                if let Some(handle) = self.handle.as_mut().filter(|h| h.id() == tag.handle) {
                    handle.pause();
                }
            }
            return;
        }

        self.pending = None;
        match result {
            Ok(()) => {
                info!("playing {}", tag.descriptor_id);
                self.is_playing = true;
                self.armed_end = Some(tag);
            }
            Err(e) => {
                warn!("play request for {} failed: {}", tag.descriptor_id, e);
                self.reset_to_empty();
                self.notifier
                    .error("Playback Error", "Could not play this track.");
            }
        }
        self.publish();
    }

    /// Register (or clear, with `None`) the media handle.  Queued intent is
    /// replayed on the new handle.
    pub fn register_handle(&mut self, handle: Option<Box<dyn MediaHandle>>) -> Attach {
        let Some(mut handle) = handle else {
            if let Some(old) = self.handle.take() {
                info!("media handle {} unregistered", old.id());
            }
            if self.intends_playback() && self.current.is_playable() {
                self.pending = Some(Pending::AwaitingHandle);
            }
            self.is_playing = false;
            self.armed_end = None;
            self.publish();
            return Attach::default();
        };

        if self.handle.as_ref().is_some_and(|h| h.id() == handle.id()) {
            debug!("media handle {} already registered", handle.id());
            return Attach::default();
        }

        info!("media handle {} registered", handle.id());
        handle.set_volume(self.volume);
        let events = handle.take_events();
        let resume = self.intends_playback() || self.pending == Some(Pending::AwaitingHandle);
        if let Some(old) = self.handle.replace(handle) {
            info!("media handle {} replaced", old.id());
        }
        self.armed_end = None;

        let request = if resume && self.current.is_playable() {
            info!("applying queued intent for {}", self.current.id);
            self.is_playing = false;
            self.request_play(true)
        } else {
            self.pending = None;
            self.publish();
            None
        };
        Attach { events, request }
    }

    /// Translate one handle event into a store transition.
    pub fn reconcile(&mut self, from: HandleId, event: MediaEvent) {
        let (paused, loaded) = match self.handle.as_ref() {
            Some(h) if h.id() == from => (h.is_paused(), h.source()),
            _ => {
                debug!("ignoring {:?} from detached {}", event, from);
                return;
            }
        };

        match event {
            MediaEvent::Ended => {
                let armed = self
                    .armed_end
                    .as_ref()
                    .is_some_and(|t| t.descriptor_id == self.current.id);
                if armed {
                    info!("{} ended", self.current.id);
                    self.stop_playback();
                }
            }
            MediaEvent::Error { message } => {
                if self.intends_playback() {
                    warn!("media error while playing {}: {}", self.current.id, message);
                    self.reset_to_empty();
                    self.notifier
                        .error("Playback Error", "Could not play this track.");
                    self.publish();
                } else {
                    debug!("media error while idle: {}", message);
                }
            }
            MediaEvent::Paused => {
                if self.is_playing && paused {
                    info!("{} paused outside the session", self.current.id);
                    self.is_playing = false;
                    self.publish();
                }
            }
            MediaEvent::Playing => {
                let same_source = loaded.as_deref() == Some(self.current.source_uri.as_str());
                if !self.is_playing
                    && self.pending.is_none()
                    && self.current.is_playable()
                    && !paused
                    && same_source
                {
                    info!("{} resumed outside the session", self.current.id);
                    self.next_seq += 1;
                    self.armed_end = Some(PlayTag {
                        seq: self.next_seq,
                        descriptor_id: self.current.id.clone(),
                        handle: from,
                    });
                    self.is_playing = true;
                    self.publish();
                }
            }
            MediaEvent::TimeUpdate {
                position_secs,
                duration_secs,
            } => {
                let timeline = Timeline {
                    position_secs,
                    duration_secs,
                };
                if timeline != self.timeline {
                    self.timeline = timeline;
                    self.publish();
                }
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn intends_playback(&self) -> bool {
        self.is_playing || matches!(self.pending, Some(Pending::InFlight(_)))
    }

    /// Replace the selection.  `current` and the theme change together and
    /// are published in one snapshot.
    fn commit(&mut self, item: PlaybackDescriptor) {
        self.pause_media();
        if item.kind.is_non_trivial() {
            self.last_non_trivial = Some(item.clone());
        }
        self.active_theme_genre = item.genre_tag.clone();
        self.current = item;
        self.is_playing = false;
        self.armed_end = None;
        self.timeline = Timeline::default();
    }

    fn request_play(&mut self, assign_source: bool) -> Option<PlayRequest> {
        let Some(handle) = self.handle.as_mut() else {
            info!("no media handle, queueing {}", self.current.id);
            self.pending = Some(Pending::AwaitingHandle);
            self.publish();
            return None;
        };

        if assign_source {
            handle.set_source(&self.current.source_uri);
            handle.load();
        }
        handle.set_volume(self.volume);

        self.next_seq += 1;
        let tag = PlayTag {
            seq: self.next_seq,
            descriptor_id: self.current.id.clone(),
            handle: handle.id(),
        };
        let outcome = handle.play();
        self.pending = Some(Pending::InFlight(tag.clone()));
        self.publish();
        Some(PlayRequest { tag, outcome })
    }

    fn pause_media(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if !handle.is_paused() {
                handle.pause();
            }
        }
    }

    fn reset_to_empty(&mut self) {
        self.pause_media();
        self.is_playing = false;
        self.pending = None;
        self.armed_end = None;
        self.current = PlaybackDescriptor::empty();
        self.active_theme_genre = None;
        self.timeline = Timeline::default();
    }

    fn publish(&mut self) {
        self.rev += 1;
        let snapshot = SessionSnapshot {
            rev: self.rev,
            current: self.current.clone(),
            last_non_trivial: self.last_non_trivial.clone(),
            is_playing: self.is_playing,
            phase: self.phase(),
            volume: self.volume,
            active_theme_genre: self.active_theme_genre.clone(),
            welcome_played: self.welcome_played,
            handle_attached: self.handle.is_some(),
            timeline: self.timeline,
            alarm: self.alarm_label.clone(),
        };
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}
