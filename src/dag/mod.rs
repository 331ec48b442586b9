// src/dag/mod.rs

//! Generic graph container shared by the artifact graph and the step graph.
//!
//! - [`graph`] holds the ordered DAG with explicit parent/child index sets,
//!   acyclicity validation and ancestor precomputation.

pub mod graph;

pub use graph::{Graph, Node};
