pub mod alarm;
pub mod equalizer;
pub mod graph;
pub mod media;
pub mod notify;
pub mod session;
pub mod visualizer;
