mod common;

use std::sync::Arc;

use common::fake_media::{fake_media, fake_media_with_pcm};
use ogradio_core::graph::software::SoftwareFactory;
use ogradio_core::graph::{
    AnalyserSettings, AudioContext, ContextFactory, FilterSpec, GraphError, GraphRegistry,
};

const RATE: u32 = 44100;

fn registry() -> GraphRegistry {
    GraphRegistry::new(
        Arc::new(SoftwareFactory::new(RATE)),
        AnalyserSettings::default(),
    )
}

fn tone(freq: f32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.1 * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin())
        .collect()
}

struct NoContext;

impl ContextFactory for NoContext {
    fn create(&self) -> Result<Box<dyn AudioContext>, GraphError> {
        Err(GraphError::Unavailable("no audio device".into()))
    }
}

#[test]
fn bind_is_idempotent_per_handle() {
    let mut graphs = registry();
    let (media, _probe) = fake_media_with_pcm(RATE);
    let a = graphs.bind(&*media).unwrap();
    let b = graphs.bind(&*media).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(graphs.len(), 1);
    assert_eq!(a.handle(), media.id());
}

#[test]
fn new_handle_gets_its_own_graph_and_old_one_survives() {
    let mut graphs = registry();
    let (first, first_probe) = fake_media_with_pcm(RATE);
    let (second, _second_probe) = fake_media_with_pcm(RATE);

    let g1 = graphs.bind(&*first).unwrap();
    let g2 = graphs.bind(&*second).unwrap();
    assert!(!Arc::ptr_eq(&g1, &g2));
    assert_eq!(graphs.len(), 2);

    let tap = g1.get_analyser().unwrap();
    first_probe.feed().unwrap().push(tone(1000.0, 2048));
    let mut bins = vec![0u8; tap.frequency_bin_count()];
    tap.read(&mut bins).unwrap();
    assert!(bins.iter().any(|&b| b > 0));
    assert!(Arc::ptr_eq(&graphs.get(first.id()).unwrap(), &g1));
}

#[test]
fn released_graph_leaves_the_registry() {
    let mut graphs = registry();
    let (media, _probe) = fake_media_with_pcm(RATE);
    let (other, _other_probe) = fake_media_with_pcm(RATE);
    let graph = graphs.bind(&*media).unwrap();
    graphs.bind(&*other).unwrap();

    let released = graphs.release(media.id()).unwrap();
    assert!(Arc::ptr_eq(&released, &graph));
    assert_eq!(graphs.len(), 1);
    assert!(graphs.get(media.id()).is_none());
    assert!(graphs.get(other.id()).is_some());
    assert!(graphs.release(media.id()).is_none());
}

#[test]
fn failed_bind_is_not_retried() {
    let mut graphs = registry();
    let (media, _probe) = fake_media();
    assert!(matches!(graphs.bind(&*media), Err(GraphError::NoAudio(_))));
    assert!(matches!(
        graphs.bind(&*media),
        Err(GraphError::Unavailable(_))
    ));
    assert!(graphs.is_empty());
}

#[test]
fn missing_context_degrades_to_error() {
    let mut graphs = GraphRegistry::new(Arc::new(NoContext), AnalyserSettings::default());
    let (media, _probe) = fake_media_with_pcm(RATE);
    assert!(graphs.bind(&*media).is_err());
    assert!(graphs.get(media.id()).is_none());
}

#[test]
fn analyser_taps_run_in_parallel() {
    let mut graphs = registry();
    let (media, probe) = fake_media_with_pcm(RATE);
    let graph = graphs.bind(&*media).unwrap();
    let a = graph.get_analyser().unwrap();
    let b = graph.get_analyser().unwrap();
    assert_ne!(a.node(), b.node());
    assert_eq!(a.frequency_bin_count(), 128);

    probe.feed().unwrap().push(tone(2000.0, 1024));
    let mut bins_a = vec![0u8; 128];
    let mut bins_b = vec![0u8; 128];
    a.read(&mut bins_a).unwrap();
    b.read(&mut bins_b).unwrap();
    assert_eq!(bins_a, bins_b);
    assert!(bins_a.iter().any(|&v| v > 0));
}

#[test]
fn replacing_filter_chain_keeps_taps() {
    let mut graphs = registry();
    let (media, probe) = fake_media_with_pcm(RATE);
    let feed = probe.feed().unwrap();
    let graph = graphs.bind(&*media).unwrap();
    let tap = graph.get_analyser().unwrap();

    let three = graph
        .insert_filter_chain(&[
            FilterSpec::peaking(250.0, 1.1, 3.0),
            FilterSpec::peaking(1000.0, 1.1, 3.0),
            FilterSpec::peaking(4000.0, 1.1, 3.0),
        ])
        .unwrap();
    assert_eq!(three.len(), 3);

    let two = graph
        .insert_filter_chain(&[
            FilterSpec::peaking(500.0, 1.1, -3.0),
            FilterSpec::peaking(2000.0, 1.1, -3.0),
        ])
        .unwrap();
    assert_eq!(graph.filter_chain(), two);

    feed.push(tone(1000.0, 2048));
    let mut bins = vec![0u8; tap.frequency_bin_count()];
    tap.read(&mut bins).unwrap();
    assert!(bins.iter().any(|&v| v > 0));
    assert!(graph.output_level_db() > -100.0);

    assert!(graph.insert_filter_chain(&[]).unwrap().is_empty());
    feed.push(tone(1000.0, 2048));
    let flat = graph.output_level_db();
    assert!(flat > -25.0 && flat < -15.0, "flat level {flat}");
}

#[test]
fn rejected_chain_restores_direct_path() {
    let mut graphs = registry();
    let (media, probe) = fake_media_with_pcm(RATE);
    let feed = probe.feed().unwrap();
    let graph = graphs.bind(&*media).unwrap();

    let err = graph
        .insert_filter_chain(&[
            FilterSpec::peaking(1000.0, 1.1, 3.0),
            FilterSpec::peaking(30000.0, 1.1, 3.0),
        ])
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidFilter(_)));
    assert!(graph.filter_chain().is_empty());

    feed.push(tone(1000.0, 2048));
    let level = graph.output_level_db();
    assert!(level > -25.0 && level < -15.0, "level {level}");
}

#[test]
fn filter_gain_changes_output() {
    let mut graphs = registry();
    let (media, probe) = fake_media_with_pcm(RATE);
    let feed = probe.feed().unwrap();
    let graph = graphs.bind(&*media).unwrap();
    let nodes = graph
        .insert_filter_chain(&[FilterSpec::peaking(1000.0, 1.1, 0.0)])
        .unwrap();

    feed.push(tone(1000.0, 4096));
    let flat = graph.output_level_db();

    graph.set_filter_gain(nodes[0], 12.0).unwrap();
    feed.push(tone(1000.0, 4096));
    let boosted = graph.output_level_db();
    assert!(boosted > flat + 8.0, "boosted {boosted} vs flat {flat}");
}
