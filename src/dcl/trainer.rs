// src/dcl/trainer.rs
//
// Multi-generation driver.
//
// Generation g samples with policy g, hands the sample file to a Trainer and
// loads policy g + 1 from it. Policy 0 is supplied by the caller (random by
// default). The trainer is a collaborator: this crate ships no learning
// backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::generator::SampleGenerator;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::Mdp;
use crate::node::Runtime;
use crate::policy::Policy;

pub const DEFAULT_DCL_SEED: u64 = 14_112_017;

pub trait Trainer: Send + Sync {
    /// Fit the policy of `generation` from the samples at `sample_path`.
    fn train_policy(
        &self,
        mdp: &Arc<dyn Mdp>,
        architecture: &VarGroup,
        generation: usize,
        sample_path: &Path,
    ) -> Result<()>;

    fn load_policy(
        &self,
        mdp: &Arc<dyn Mdp>,
        architecture: &VarGroup,
        generation: usize,
    ) -> Result<Arc<dyn Policy>>;
}

pub struct Dcl {
    mdp: Arc<dyn Mdp>,
    trainer: Arc<dyn Trainer>,
    generator: SampleGenerator,
    policy_0: Arc<dyn Policy>,
    num_gens: usize,
    retrain_lastgen_only: bool,
    silent: bool,
    nn_architecture: VarGroup,
}

impl Dcl {
    pub fn new(
        mdp: Arc<dyn Mdp>,
        config: &VarGroup,
        policy_0: Option<Arc<dyn Policy>>,
        trainer: Arc<dyn Trainer>,
    ) -> Result<Self> {
        let num_gens: i64 = config.get_or("num_gens", 1)?;
        if num_gens < 1 {
            return Err(EngineError::config(format!("num_gens must be >= 1, got {num_gens}")));
        }
        let nn_architecture = if config.contains("nn_architecture") {
            config.get_group("nn_architecture")?
        } else {
            VarGroup::new()
                .with("type", "mlp")?
                .with("hidden_layers", Vec::<i64>::new())?
        };
        let policy_0 = match policy_0 {
            Some(p) => p,
            None => mdp.get_policy("random")?,
        };
        let generator = SampleGenerator::with_default_seed(mdp.clone(), config, DEFAULT_DCL_SEED)?;

        Ok(Self {
            silent: generator.config().silent,
            mdp,
            trainer,
            generator,
            policy_0,
            num_gens: num_gens as usize,
            retrain_lastgen_only: config.get_or("retrain_lastgen_only", false)?,
            nn_architecture,
        })
    }

    pub fn num_gens(&self) -> usize {
        self.num_gens
    }

    /// `<work_dir>/dcl/<identifier>/samples_gen<generation>.json`
    pub fn sample_path(&self, runtime: &Runtime, generation: usize) -> PathBuf {
        runtime
            .work_dir()
            .join("dcl")
            .join(self.mdp.identifier())
            .join(format!("samples_gen{generation}.json"))
    }

    /// Run every generation. With `retrain_lastgen_only` no samples are
    /// generated; the last policy is refit from the existing sample file of
    /// generation `num_gens - 1`.
    pub fn train_policy(&mut self, runtime: &Runtime) -> Result<()> {
        let result = self.train_on_node(runtime);
        if result.is_err() {
            runtime.node().abort();
        }
        result
    }

    fn train_on_node(&mut self, runtime: &Runtime) -> Result<()> {
        let node = runtime.node();
        if self.retrain_lastgen_only {
            let path = self.sample_path(runtime, self.num_gens - 1);
            if node.is_root() {
                self.trainer
                    .train_policy(&self.mdp, &self.nn_architecture, self.num_gens, &path)?;
            }
            return node.barrier();
        }

        let mut policy = self.policy_0.clone();
        for generation in 0..self.num_gens {
            let path = self.sample_path(runtime, generation);
            self.generator
                .generate_samples(runtime, Some(policy.clone()), &path)?;
            if node.is_root() {
                self.trainer
                    .train_policy(&self.mdp, &self.nn_architecture, generation + 1, &path)?;
                if !self.silent {
                    info!(generation = generation + 1, "policy trained");
                }
            }
            node.barrier()?;
            policy = self
                .trainer
                .load_policy(&self.mdp, &self.nn_architecture, generation + 1)?;
        }
        Ok(())
    }

    /// Policy of `generation`; 0 is the initial policy.
    pub fn get_policy(&self, generation: usize) -> Result<Arc<dyn Policy>> {
        if generation > self.num_gens {
            return Err(EngineError::config(format!(
                "generation {generation} requested, only 0..={} exist",
                self.num_gens
            )));
        }
        if generation == 0 {
            return Ok(self.policy_0.clone());
        }
        self.trainer
            .load_policy(&self.mdp, &self.nn_architecture, generation)
    }

    /// Policies of generations 0..=num_gens.
    pub fn get_policies(&self) -> Result<Vec<Arc<dyn Policy>>> {
        (0..=self.num_gens).map(|g| self.get_policy(g)).collect()
    }
}
