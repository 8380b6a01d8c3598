//! Frame source for spectrum displays.
//!
//! A `Visualizer` follows the session snapshot and the current analysis
//! graph.  While playback is active every poll yields band magnitudes; when
//! playback stops it yields one `Clear` and then nothing until playback
//! resumes.  Without a usable graph it falls back to a static frame so the
//! display still follows the theme.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use ogradio_proto::protocol::SessionSnapshot;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::graph::{AnalyserTap, AnalysisGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Default,
    Lofi,
    Electronic,
}

impl Preset {
    pub fn for_genre(genre: Option<&str>) -> Self {
        match genre {
            Some("lofi") => Preset::Lofi,
            Some("electronic") => Preset::Electronic,
            _ => Preset::Default,
        }
    }

    /// Bar colour as RGB.
    pub fn bar_rgb(self) -> (u8, u8, u8) {
        match self {
            Preset::Default => (139, 92, 246),
            Preset::Lofi => (255, 182, 193),
            Preset::Electronic => (0, 255, 255),
        }
    }

    pub fn glow(self) -> bool {
        matches!(self, Preset::Electronic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum VisualFrame {
    Clear,
    Static { preset: Preset },
    Spectrum { preset: Preset, bands: Vec<f32> },
}

pub struct Visualizer {
    session: watch::Receiver<Arc<SessionSnapshot>>,
    graph: watch::Receiver<Option<Arc<AnalysisGraph>>>,
    tap: Option<AnalyserTap>,
    bands: usize,
    bins: Vec<u8>,
    cleared: bool,
}

impl Visualizer {
    pub fn new(
        session: watch::Receiver<Arc<SessionSnapshot>>,
        graph: watch::Receiver<Option<Arc<AnalysisGraph>>>,
        bands: usize,
    ) -> Self {
        Self {
            session,
            graph,
            tap: None,
            bands: bands.max(1),
            bins: Vec::new(),
            cleared: false,
        }
    }

    pub fn frame(&mut self) -> Option<VisualFrame> {
        let snapshot = self.session.borrow().clone();
        if !snapshot.is_playing {
            if self.cleared {
                return None;
            }
            self.cleared = true;
            return Some(VisualFrame::Clear);
        }
        self.cleared = false;

        let preset = Preset::for_genre(snapshot.active_theme_genre.as_deref());
        self.refresh_tap();
        let Some(tap) = &self.tap else {
            return Some(VisualFrame::Static { preset });
        };

        self.bins.resize(tap.frequency_bin_count(), 0);
        match tap.read(&mut self.bins) {
            Ok(n) => Some(VisualFrame::Spectrum {
                preset,
                bands: aggregate(&self.bins[..n], self.bands),
            }),
            Err(e) => {
                warn!("analyser read failed, falling back to static visuals: {}", e);
                self.tap = None;
                Some(VisualFrame::Static { preset })
            }
        }
    }

    fn refresh_tap(&mut self) {
        if self.graph.has_changed().unwrap_or(false) {
            self.graph.borrow_and_update();
            self.tap = None;
        }
        if self.tap.is_some() {
            return;
        }
        let graph = self.graph.borrow().clone();
        if let Some(graph) = graph {
            match graph.get_analyser() {
                Ok(tap) => self.tap = Some(tap),
                Err(e) => debug!("no analyser on {}: {}", graph.handle(), e),
            }
        }
    }

    /// Frames paced at `fps`.  The stream never ends; polls that produce no
    /// frame are skipped.
    pub fn into_stream(self, fps: u32) -> impl Stream<Item = VisualFrame> {
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        stream::unfold(
            (self, None::<Interval>),
            move |(mut viz, interval)| async move {
                let mut interval = interval.unwrap_or_else(|| {
                    let mut i = tokio::time::interval(period);
                    i.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    i
                });
                loop {
                    interval.tick().await;
                    if let Some(frame) = viz.frame() {
                        return Some((frame, (viz, Some(interval))));
                    }
                }
            },
        )
    }
}

/// Collapse analyser bins into `bands` log-spaced bands in 0..=1.
pub fn aggregate(bins: &[u8], bands: usize) -> Vec<f32> {
    if bins.is_empty() {
        return vec![0.0; bands];
    }
    let n = bins.len();
    (0..bands)
        .map(|band| {
            let lo = (band as f32 / bands as f32).powf(2.0);
            let hi = ((band + 1) as f32 / bands as f32).powf(2.0);
            let start = ((lo * n as f32) as usize).min(n - 1);
            let end = ((hi * n as f32) as usize).max(start + 1).min(n);
            f32::from(bins[start..end].iter().copied().max().unwrap_or(0)) / 255.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(Preset::for_genre(Some("lofi")), Preset::Lofi);
        assert_eq!(Preset::for_genre(Some("electronic")), Preset::Electronic);
        assert_eq!(Preset::for_genre(Some("jazz")), Preset::Default);
        assert_eq!(Preset::for_genre(None), Preset::Default);
        assert!(Preset::Electronic.glow());
    }

    #[test]
    fn test_aggregate_shapes() {
        let bins: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let bands = aggregate(&bins, 32);
        assert_eq!(bands.len(), 32);
        assert!(bands.iter().all(|b| (0.0..=1.0).contains(b)));
        assert!(bands[31] > bands[0]);
        assert_eq!(aggregate(&[], 4), vec![0.0; 4]);
    }

    #[test]
    fn test_inactive_clears_once() {
        let (_session_tx, session_rx) = watch::channel(Arc::new(SessionSnapshot::default()));
        let (_graph_tx, graph_rx) = watch::channel(None);
        let mut viz = Visualizer::new(session_rx, graph_rx, 8);
        assert_eq!(viz.frame(), Some(VisualFrame::Clear));
        assert_eq!(viz.frame(), None);
        assert_eq!(viz.frame(), None);
    }

    #[test]
    fn test_playing_without_graph_is_static_themed() {
        let snapshot = SessionSnapshot {
            is_playing: true,
            active_theme_genre: Some("lofi".into()),
            ..SessionSnapshot::default()
        };
        let (session_tx, session_rx) = watch::channel(Arc::new(snapshot));
        let (_graph_tx, graph_rx) = watch::channel(None);
        let mut viz = Visualizer::new(session_rx, graph_rx, 8);
        assert_eq!(
            viz.frame(),
            Some(VisualFrame::Static {
                preset: Preset::Lofi
            })
        );

        session_tx.send_replace(Arc::new(SessionSnapshot::default()));
        assert_eq!(viz.frame(), Some(VisualFrame::Clear));
        assert_eq!(viz.frame(), None);
    }
}
