//! Ten-band graphic equalizer spliced into the analysis graph.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::graph::{AnalysisGraph, FilterSpec, GraphError, NodeId};
use crate::media::HandleId;

pub const BAND_FREQUENCIES_HZ: [f32; 10] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];
pub const BAND_Q: f32 = 1.1;
pub const MAX_GAIN_DB: f32 = 15.0;

pub type Gains = [f32; BAND_FREQUENCIES_HZ.len()];

#[derive(Default)]
pub struct Equalizer {
    gains: Gains,
    attached: Option<(Arc<AnalysisGraph>, Vec<NodeId>)>,
}

impl Equalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn specs(&self) -> Vec<FilterSpec> {
        BAND_FREQUENCIES_HZ
            .iter()
            .zip(self.gains)
            .map(|(&f, g)| FilterSpec::peaking(f, BAND_Q, g))
            .collect()
    }

    /// Splice the band filters into `graph`, replacing whatever segment it
    /// had.  Reattaching to the same graph is a no-op.
    pub fn attach(&mut self, graph: Arc<AnalysisGraph>) -> Result<(), GraphError> {
        if let Some((current, _)) = &self.attached {
            if Arc::ptr_eq(current, &graph) {
                return Ok(());
            }
        }
        let nodes = graph.insert_filter_chain(&self.specs())?;
        debug!("equalizer attached to {}", graph.handle());
        self.attached = Some((graph, nodes));
        Ok(())
    }

    /// Remove the band filters, restoring the direct path.
    pub fn detach(&mut self) -> Result<(), GraphError> {
        if let Some((graph, _)) = self.attached.take() {
            graph.insert_filter_chain(&[])?;
        }
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Handle of the graph the filters are spliced into.
    pub fn attached_to(&self) -> Option<HandleId> {
        self.attached.as_ref().map(|(graph, _)| graph.handle())
    }

    /// Set one band's gain (clamped to ±15 dB).  Returns the applied gain, or
    /// `None` for an unknown band.
    pub fn set_gain(&mut self, band: usize, gain_db: f32) -> Option<f32> {
        if !gain_db.is_finite() {
            warn!("ignoring non-finite gain for band {}", band);
            return None;
        }
        let slot = self.gains.get_mut(band)?;
        let gain = gain_db.clamp(-MAX_GAIN_DB, MAX_GAIN_DB);
        *slot = gain;
        if let Some((graph, nodes)) = &self.attached {
            if let Some(&node) = nodes.get(band) {
                if let Err(e) = graph.set_filter_gain(node, gain) {
                    warn!("equalizer band {} not applied: {}", band, e);
                }
            }
        }
        Some(gain)
    }

    pub fn reset(&mut self) {
        for band in 0..self.gains.len() {
            self.set_gain(band, 0.0);
        }
    }
}
