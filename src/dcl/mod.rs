// src/dcl/mod.rs
//
// Deep controlled learning support: labeled sample collection by rollouts,
// sample persistence and the generation driver.

pub mod generator;
pub mod rollout;
pub mod sample;
pub mod sample_data;
pub mod selector;
pub mod sequential_halving;
pub mod trainer;
pub mod uniform;

pub use generator::{SampleGenerator, SamplerConfig, DEFAULT_SAMPLER_SEED};
pub use rollout::{Experiment, RolloutContext, ROLLOUT_CHUNK};
pub use sample::{check_strictly_increasing, Sample, SampleFile, SampleRecord};
pub use sample_data::SampleData;
pub use selector::{use_sequential_halving, ActionSelector, SelectorOutcome};
pub use sequential_halving::SequentialHalving;
pub use trainer::{Dcl, Trainer, DEFAULT_DCL_SEED};
pub use uniform::UniformActionSelector;
