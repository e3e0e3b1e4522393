//! Degree-corrected Stochastic Block Model (SBM) inference for multi-type
//! networks.
//!
//! Fits a hierarchical block partition to an observed network via two
//! intertwined procedures: an **agglomerative collapse** that merges blocks
//! to discover the number of blocks B, and a Metropolis–Hastings **MCMC
//! sweep** that re-partitions nodes under an acceptance rule derived from
//! the microcanonical description length.
//!
//! # Model
//!
//! Degree-corrected microcanonical SBM (Karrer & Newman 2011; Peixoto 2014).
//! Multi-type (bipartite / k-partite) networks partition each type
//! independently.
//!
//! # Usage
//!
//! ```ignore
//! use dcsbm::{Network, Sbm, SbmOptions};
//!
//! let mut net = Network::new(&["node"]);
//! net.add_node("a", "node", 0)?;
//! net.add_node("b", "node", 0)?;
//! net.add_edge("a", "b")?;
//!
//! let mut sbm = Sbm::new(net, SbmOptions::default());
//! sbm.initialize_blocks(None)?;
//! let steps = sbm.collapse_blocks(0, 5, 2)?;
//! ```

/// Typed errors for structural misuse and inference preconditions
pub mod error;

/// Seeded pseudo-random source; the engine's sole entropy supply
pub mod sampler;

/// Nodes of the multi-level graph and the arena that owns them
pub mod node;

/// Multi-level network container: levels, types, state import/export
pub mod network;

/// Value-typed partition snapshot for checkpointing
pub mod state;

/// The inference engine: entropy, proposals, sweeps, merges, collapse
pub mod sbm;


pub use error::{Result, SbmError};
pub use network::Network;
pub use node::{Node, NodeId};
pub use sampler::Sampler;
pub use sbm::{CollapseStep, MergeResult, Proposal, Sbm, SbmOptions, SweepResult};
pub use state::StateDump;
