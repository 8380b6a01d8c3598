//! In-process audio context driven by a handle's PCM feed.
//!
//! Chunks are pulled from the source's feed whenever a node is read, then
//! pushed along the edges: filters run their biquad and forward the result,
//! analysers and the destination are sinks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::analyser::Analyser;
use super::{AnalyserSettings, AudioContext, ContextFactory, FilterKind, FilterSpec, GraphError, NodeId};
use crate::media::{HandleId, MediaHandle};

const SILENCE_DB: f32 = -100.0;

/// Creates `SoftwareContext`s.  Contexts from one factory share the set of
/// handles that already have a source node.
#[derive(Clone)]
pub struct SoftwareFactory {
    sample_rate: u32,
    bound: Arc<Mutex<HashSet<HandleId>>>,
}

impl SoftwareFactory {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            bound: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl ContextFactory for SoftwareFactory {
    fn create(&self) -> Result<Box<dyn AudioContext>, GraphError> {
        if self.sample_rate == 0 {
            return Err(GraphError::Unavailable("sample rate is zero".into()));
        }
        Ok(Box::new(SoftwareContext::new(
            self.sample_rate,
            Arc::clone(&self.bound),
        )))
    }
}

enum Node {
    Source {
        rx: broadcast::Receiver<Arc<Vec<f32>>>,
    },
    Analyser(Analyser),
    Filter {
        spec: FilterSpec,
        biquad: DirectForm1<f32>,
    },
    Destination,
}

pub struct SoftwareContext {
    sample_rate: u32,
    bound: Arc<Mutex<HashSet<HandleId>>>,
    sources: Vec<HandleId>,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<(NodeId, NodeId)>,
    next_id: u32,
    destination: NodeId,
    level_db: f32,
}

impl SoftwareContext {
    fn new(sample_rate: u32, bound: Arc<Mutex<HashSet<HandleId>>>) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, Node::Destination);
        Self {
            sample_rate,
            bound,
            sources: Vec::new(),
            nodes,
            edges: Vec::new(),
            next_id: 1,
            destination,
            level_db: SILENCE_DB,
        }
    }

    fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.edges.iter().filter(|e| e.0 == node).map(|e| e.1));
            }
        }
        false
    }

    /// Drain every source feed through the graph.
    fn pump(&mut self) {
        let mut chunks = Vec::new();
        for (&id, node) in self.nodes.iter_mut() {
            if let Node::Source { rx } = node {
                loop {
                    match rx.try_recv() {
                        Ok(chunk) => chunks.push((id, chunk)),
                        Err(TryRecvError::Lagged(n)) => debug!("source {:?} lagged {} chunks", id, n),
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }
            }
        }
        for (id, chunk) in chunks {
            self.route(id, &chunk);
        }
    }

    fn route(&mut self, from: NodeId, samples: &[f32]) {
        let targets: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.0 == from)
            .map(|e| e.1)
            .collect();
        for to in targets {
            let output = match self.nodes.get_mut(&to) {
                Some(Node::Filter { biquad, .. }) => {
                    Some(samples.iter().map(|&s| biquad.run(s)).collect::<Vec<f32>>())
                }
                Some(Node::Analyser(analyser)) => {
                    analyser.push(samples);
                    None
                }
                Some(Node::Destination) => {
                    self.level_db = rms_db(samples);
                    None
                }
                Some(Node::Source { .. }) | None => None,
            };
            if let Some(output) = output {
                self.route(to, &output);
            }
        }
    }
}

impl Drop for SoftwareContext {
    fn drop(&mut self) {
        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &self.sources {
            bound.remove(id);
        }
    }
}

fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }
    let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
    if rms <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * rms.log10()).max(SILENCE_DB)
    }
}

fn coefficients(spec: FilterSpec, sample_rate: u32) -> Result<Coefficients<f32>, GraphError> {
    if !spec.gain_db.is_finite() || !spec.q.is_finite() || !spec.frequency_hz.is_finite() {
        return Err(GraphError::InvalidFilter(format!("non-finite parameter in {spec:?}")));
    }
    let kind = match spec.kind {
        FilterKind::Peaking => Type::PeakingEQ(spec.gain_db),
        FilterKind::LowShelf => Type::LowShelf(spec.gain_db),
        FilterKind::HighShelf => Type::HighShelf(spec.gain_db),
        FilterKind::LowPass => Type::LowPass,
        FilterKind::HighPass => Type::HighPass,
    };
    Coefficients::<f32>::from_params(
        kind,
        (sample_rate as f32).hz(),
        spec.frequency_hz.hz(),
        spec.q,
    )
    .map_err(|e| {
        GraphError::InvalidFilter(format!(
            "{:?} at {} Hz: {:?}",
            spec.kind, spec.frequency_hz, e
        ))
    })
}

impl AudioContext for SoftwareContext {
    fn create_media_source(&mut self, handle: &dyn MediaHandle) -> Result<NodeId, GraphError> {
        let id = handle.id();
        let feed = handle.pcm_feed().ok_or(GraphError::NoAudio(id))?;
        {
            let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
            if !bound.insert(id) {
                return Err(GraphError::AlreadyBound(id));
            }
        }
        self.sources.push(id);
        if feed.sample_rate() != self.sample_rate {
            warn!(
                "{} feeds {} Hz into a {} Hz context",
                id,
                feed.sample_rate(),
                self.sample_rate
            );
        }
        Ok(self.add(Node::Source {
            rx: feed.subscribe(),
        }))
    }

    fn create_analyser(&mut self, settings: AnalyserSettings) -> Result<NodeId, GraphError> {
        let analyser = Analyser::new(settings.fft_size, settings.smoothing)?;
        Ok(self.add(Node::Analyser(analyser)))
    }

    fn create_filter(&mut self, spec: FilterSpec) -> Result<NodeId, GraphError> {
        let coeffs = coefficients(spec, self.sample_rate)?;
        Ok(self.add(Node::Filter {
            spec,
            biquad: DirectForm1::<f32>::new(coeffs),
        }))
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        for node in [from, to] {
            if !self.nodes.contains_key(&node) {
                return Err(GraphError::UnknownNode(node));
            }
        }
        if from == to || self.reaches(to, from) {
            return Err(GraphError::Cycle(from, to));
        }
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
        Ok(())
    }

    fn disconnect(&mut self, from: NodeId, to: NodeId) {
        self.edges.retain(|&e| e != (from, to));
    }

    fn remove_node(&mut self, node: NodeId) {
        if node == self.destination {
            return;
        }
        self.edges.retain(|&(a, b)| a != node && b != node);
        self.nodes.remove(&node);
    }

    fn frequency_data(&mut self, analyser: NodeId, out: &mut [u8]) -> Result<usize, GraphError> {
        self.pump();
        match self.nodes.get_mut(&analyser) {
            Some(Node::Analyser(a)) => Ok(a.byte_frequency_data(out)),
            Some(_) => Err(GraphError::WrongNode(analyser, "analyser")),
            None => Err(GraphError::UnknownNode(analyser)),
        }
    }

    fn frequency_bin_count(&self, analyser: NodeId) -> Result<usize, GraphError> {
        match self.nodes.get(&analyser) {
            Some(Node::Analyser(a)) => Ok(a.frequency_bin_count()),
            Some(_) => Err(GraphError::WrongNode(analyser, "analyser")),
            None => Err(GraphError::UnknownNode(analyser)),
        }
    }

    fn set_filter_gain(&mut self, filter: NodeId, gain_db: f32) -> Result<(), GraphError> {
        let sample_rate = self.sample_rate;
        match self.nodes.get_mut(&filter) {
            Some(Node::Filter { spec, biquad }) => {
                let updated = FilterSpec { gain_db, ..*spec };
                biquad.update_coefficients(coefficients(updated, sample_rate)?);
                *spec = updated;
                Ok(())
            }
            Some(_) => Err(GraphError::WrongNode(filter, "filter")),
            None => Err(GraphError::UnknownNode(filter)),
        }
    }

    fn output_level_db(&mut self) -> f32 {
        self.pump();
        self.level_db
    }
}
