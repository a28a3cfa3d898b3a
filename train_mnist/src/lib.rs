pub mod backend;
pub mod experiment;
pub mod graph;
pub mod report;

pub use experiment::{ExperimentOptions, ExperimentReport, Manifest, Preset, TestReport};
