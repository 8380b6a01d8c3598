//! Audio analysis graph.
//!
//! One graph per media handle:
//!
//! ```text
//!   source ──[filter segment]──▶ destination
//!     ├──▶ analyser tap
//!     └──▶ analyser tap
//! ```
//!
//! The source node is created exactly once per handle; the registry caches the
//! graph by handle identity and never rebuilds it while the handle stays
//! registered.  Filter segments are replaced by tearing down filter links
//! only, so taps survive.

pub mod analyser;
pub mod software;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::media::{HandleId, MediaHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("audio context unavailable: {0}")]
    Unavailable(String),
    #[error("{0} already has a source node")]
    AlreadyBound(HandleId),
    #[error("{0} exposes no audio")]
    NoAudio(HandleId),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("connecting {0:?} -> {1:?} would create a cycle")]
    Cycle(NodeId, NodeId),
    #[error("node {0:?} is not a {1}")]
    WrongNode(NodeId, &'static str),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid analyser: {0}")]
    InvalidAnalyser(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Peaking,
    LowShelf,
    HighShelf,
    LowPass,
    HighPass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub frequency_hz: f32,
    pub q: f32,
    pub gain_db: f32,
}

impl FilterSpec {
    pub fn peaking(frequency_hz: f32, q: f32, gain_db: f32) -> Self {
        Self {
            kind: FilterKind::Peaking,
            frequency_hz,
            q,
            gain_db,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserSettings {
    pub fft_size: usize,
    pub smoothing: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
        }
    }
}

/// Node-graph backend.  Node creation, wiring and reads are synchronous.
pub trait AudioContext: Send {
    /// Source node reading the handle's output.  At most once per handle.
    fn create_media_source(&mut self, handle: &dyn MediaHandle) -> Result<NodeId, GraphError>;

    fn create_analyser(&mut self, settings: AnalyserSettings) -> Result<NodeId, GraphError>;

    fn create_filter(&mut self, spec: FilterSpec) -> Result<NodeId, GraphError>;

    fn destination(&self) -> NodeId;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError>;

    /// Remove one edge.  Missing edges are ignored.
    fn disconnect(&mut self, from: NodeId, to: NodeId);

    /// Drop a node and every edge touching it.
    fn remove_node(&mut self, node: NodeId);

    /// Fill `out` with byte-scaled magnitudes; returns the bins written.
    fn frequency_data(&mut self, analyser: NodeId, out: &mut [u8]) -> Result<usize, GraphError>;

    fn frequency_bin_count(&self, analyser: NodeId) -> Result<usize, GraphError>;

    fn set_filter_gain(&mut self, filter: NodeId, gain_db: f32) -> Result<(), GraphError>;

    /// Level reaching the destination, in dBFS.
    fn output_level_db(&mut self) -> f32;
}

pub trait ContextFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioContext>, GraphError>;
}

struct GraphInner {
    ctx: Box<dyn AudioContext>,
    source: NodeId,
    destination: NodeId,
    chain: Vec<NodeId>,
}

impl GraphInner {
    fn unlink_chain(&mut self) {
        let chain = std::mem::take(&mut self.chain);
        match (chain.first(), chain.last()) {
            (Some(&first), Some(&last)) => {
                self.ctx.disconnect(self.source, first);
                for pair in chain.windows(2) {
                    self.ctx.disconnect(pair[0], pair[1]);
                }
                self.ctx.disconnect(last, self.destination);
            }
            _ => self.ctx.disconnect(self.source, self.destination),
        }
        for node in chain {
            self.ctx.remove_node(node);
        }
    }

    fn link_chain(&mut self, specs: &[FilterSpec]) -> Result<Vec<NodeId>, GraphError> {
        let mut nodes = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.ctx.create_filter(*spec) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    self.discard(&nodes);
                    return Err(e);
                }
            }
        }

        let mut path = Vec::with_capacity(nodes.len() + 2);
        path.push(self.source);
        path.extend(&nodes);
        path.push(self.destination);
        for pair in path.windows(2) {
            if let Err(e) = self.ctx.connect(pair[0], pair[1]) {
                self.discard(&nodes);
                return Err(e);
            }
        }
        Ok(nodes)
    }

    fn discard(&mut self, nodes: &[NodeId]) {
        for &node in nodes {
            self.ctx.remove_node(node);
        }
        self.ctx.disconnect(self.source, self.destination);
    }
}

/// The graph bound to one media handle.
pub struct AnalysisGraph {
    handle: HandleId,
    settings: AnalyserSettings,
    inner: Mutex<GraphInner>,
}

impl AnalysisGraph {
    fn build(
        factory: &dyn ContextFactory,
        handle: &dyn MediaHandle,
        settings: AnalyserSettings,
    ) -> Result<Self, GraphError> {
        let mut ctx = factory.create()?;
        let source = ctx.create_media_source(handle)?;
        let destination = ctx.destination();
        ctx.connect(source, destination)?;
        Ok(Self {
            handle: handle.id(),
            settings,
            inner: Mutex::new(GraphInner {
                ctx,
                source,
                destination,
                chain: Vec::new(),
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, GraphInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn source(&self) -> NodeId {
        self.inner().source
    }

    /// A new analyser connected in parallel off the source.  Dropping the
    /// tap disconnects it.
    pub fn get_analyser(self: &Arc<Self>) -> Result<AnalyserTap, GraphError> {
        let mut inner = self.inner();
        let node = inner.ctx.create_analyser(self.settings)?;
        let source = inner.source;
        if let Err(e) = inner.ctx.connect(source, node) {
            inner.ctx.remove_node(node);
            return Err(e);
        }
        let bins = inner.ctx.frequency_bin_count(node)?;
        debug!("{}: analyser tap {:?} ({} bins)", self.handle, node, bins);
        Ok(AnalyserTap {
            graph: Arc::clone(self),
            node,
            bins,
        })
    }

    /// Replace the spliced filter segment with `specs` (empty restores the
    /// direct `source → destination` link).  On failure the direct link is
    /// restored and no filters remain.
    pub fn insert_filter_chain(&self, specs: &[FilterSpec]) -> Result<Vec<NodeId>, GraphError> {
        let mut inner = self.inner();
        inner.unlink_chain();
        if specs.is_empty() {
            let (source, destination) = (inner.source, inner.destination);
            inner.ctx.connect(source, destination)?;
            return Ok(Vec::new());
        }
        match inner.link_chain(specs) {
            Ok(nodes) => {
                inner.chain = nodes.clone();
                Ok(nodes)
            }
            Err(e) => {
                warn!("{}: filter chain rejected: {}", self.handle, e);
                let (source, destination) = (inner.source, inner.destination);
                inner.ctx.connect(source, destination)?;
                Err(e)
            }
        }
    }

    pub fn filter_chain(&self) -> Vec<NodeId> {
        self.inner().chain.clone()
    }

    pub fn set_filter_gain(&self, filter: NodeId, gain_db: f32) -> Result<(), GraphError> {
        self.inner().ctx.set_filter_gain(filter, gain_db)
    }

    pub fn output_level_db(&self) -> f32 {
        self.inner().ctx.output_level_db()
    }
}

/// Frequency tap handed to one consumer.
pub struct AnalyserTap {
    graph: Arc<AnalysisGraph>,
    node: NodeId,
    bins: usize,
}

impl AnalyserTap {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    pub fn read(&self, out: &mut [u8]) -> Result<usize, GraphError> {
        self.graph.inner().ctx.frequency_data(self.node, out)
    }
}

impl Drop for AnalyserTap {
    fn drop(&mut self) {
        let mut inner = self.graph.inner();
        let source = inner.source;
        inner.ctx.disconnect(source, self.node);
        inner.ctx.remove_node(self.node);
    }
}

/// Graphs keyed by handle identity.  A handle whose bind failed is not
/// retried: its source node may already exist in a half-built context.
pub struct GraphRegistry {
    factory: Arc<dyn ContextFactory>,
    settings: AnalyserSettings,
    graphs: HashMap<HandleId, Arc<AnalysisGraph>>,
    failed: HashSet<HandleId>,
}

impl GraphRegistry {
    pub fn new(factory: Arc<dyn ContextFactory>, settings: AnalyserSettings) -> Self {
        Self {
            factory,
            settings,
            graphs: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    /// Graph for `handle`, building it on first use.
    pub fn bind(&mut self, handle: &dyn MediaHandle) -> Result<Arc<AnalysisGraph>, GraphError> {
        let id = handle.id();
        if let Some(graph) = self.graphs.get(&id) {
            return Ok(Arc::clone(graph));
        }
        if self.failed.contains(&id) {
            return Err(GraphError::Unavailable(format!("binding {id} failed earlier")));
        }

        match AnalysisGraph::build(self.factory.as_ref(), handle, self.settings) {
            Ok(graph) => {
                info!("analysis graph bound to {}", id);
                let graph = Arc::new(graph);
                self.graphs.insert(id, Arc::clone(&graph));
                Ok(graph)
            }
            Err(e) => {
                warn!("analysis graph for {} unavailable: {}", id, e);
                self.failed.insert(id);
                Err(e)
            }
        }
    }

    pub fn get(&self, id: HandleId) -> Option<Arc<AnalysisGraph>> {
        self.graphs.get(&id).cloned()
    }

    /// Forget the graph of a handle that has been unregistered.  The context
    /// goes away once the last tap on it is dropped.
    pub fn release(&mut self, id: HandleId) -> Option<Arc<AnalysisGraph>> {
        self.failed.remove(&id);
        let graph = self.graphs.remove(&id);
        if graph.is_some() {
            info!("analysis graph of {} released", id);
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
