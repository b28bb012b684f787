//! mdpsim core library.
//!
//! Generic MDP simulation behind one runtime interface, plus the two
//! consumers built on it: a rollout-based sample generator for supervised
//! policy training (DCL) and a paired-sample policy comparer. The binary
//! (`src/main.rs`) is a thin harness around these components.
//!
//! A problem definition implements [`Model`]; [`GenericMdp`] turns it into an
//! `Arc<dyn Mdp>` that drives batches of [`Trajectory`] values. All
//! randomness flows from keyed streams ([`SeedKey`]), so results do not
//! depend on how work is split over threads or nodes.

pub mod category;
pub mod comparer;
pub mod config;
pub mod dcl;
pub mod demonstrator;
pub mod error;
pub mod io;
pub mod logging;
pub mod mdp;
pub mod metrics;
pub mod models;
pub mod node;
pub mod parallel;
pub mod policy;
pub mod registry;
pub mod rng;
pub mod trajectory;

// --- Re-exports for ergonomic external use ---------------------------------

pub use category::StateCategory;
pub use comparer::{PolicyAssessment, PolicyComparer};
pub use config::VarGroup;
pub use dcl::{Dcl, Sample, SampleData, SampleGenerator, Trainer};
pub use demonstrator::{Demonstrator, TraceElement};
pub use error::{EngineError, Result};
pub use mdp::{evolve, AdvanceMode, GenericMdp, HorizonType, Mdp, Model, Objective};
pub use node::{LocalNode, Node, Runtime, SingleNode};
pub use parallel::{get_chunks, get_splits, parallel_compute, ProgressSignal};
pub use policy::{Heuristic, Policy};
pub use registry::Registry;
pub use rng::{RngProvider, SeedDomain, SeedKey};
pub use trajectory::{ErasedState, Trajectory};
