// src/comparer.rs
//
// Policy comparer: estimates the expected return of policies on one mdp.
//
// Trajectory i uses the Evaluation(i) streams for every policy, so returns of
// different policies are paired and their differences have small variance.
//
// Infinite horizon, undiscounted: average cost per period over
//   `periods_per_trajectory` periods after `warmup_periods` periods.
// Infinite horizon, discounted: discounted return over the first
//   `periods_per_trajectory` periods (no warm-up).
// Finite horizon: return until Final; not reaching Final within
//   `max_periods_until_error` periods is an error.

use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::info;

use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::{evolve, AdvanceMode, Mdp};
use crate::metrics::PolicyComparison;
use crate::parallel::{available_threads, get_chunks, parallel_compute};
use crate::policy::Policy;
use crate::rng::{SeedDomain, SeedKey};
use crate::trajectory::Trajectory;

pub const DEFAULT_COMPARER_SEED: u64 = 13_021_984;

const BATCH: usize = 256;

#[derive(Debug, Clone)]
pub struct PolicyAssessment {
    pub policy: VarGroup,
    pub mean: f64,
    pub error: f64,
    pub benchmark: bool,
}

impl Serialize for PolicyAssessment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("policy", &self.policy)?;
        map.serialize_entry("mean", &self.mean)?;
        map.serialize_entry("error", &self.error)?;
        if self.benchmark {
            map.serialize_entry("benchmark", "yes")?;
        }
        map.end()
    }
}

pub struct PolicyComparer {
    mdp: Arc<dyn Mdp>,
    number_of_trajectories: usize,
    periods_per_trajectory: i64,
    warmup_periods: i64,
    max_periods_until_error: i64,
    rng_seed: u64,
    threads: usize,
}

impl PolicyComparer {
    pub fn new(mdp: Arc<dyn Mdp>, config: &VarGroup) -> Result<Self> {
        let infinite = mdp.is_infinite_horizon();
        let number_of_trajectories: i64 =
            config.get_or("number_of_trajectories", if infinite { 4096 } else { 16384 })?;
        let periods_per_trajectory: i64 = config.get_or("periods_per_trajectory", 1024)?;
        let undiscounted = mdp.discount_factor() == 1.0;
        let warmup_periods: i64 = if infinite && undiscounted {
            config.get_or("warmup_periods", 128)?
        } else {
            0
        };
        let max_periods_until_error: i64 = config.get_or("max_periods_until_error", 16384)?;
        let rng_seed: i64 = config.get_or("rng_seed", DEFAULT_COMPARER_SEED as i64)?;

        if number_of_trajectories < 1 {
            return Err(EngineError::config("number_of_trajectories must be >= 1"));
        }
        if infinite && periods_per_trajectory < 1 {
            return Err(EngineError::config("periods_per_trajectory must be >= 1"));
        }
        if warmup_periods < 0 {
            return Err(EngineError::config("warmup_periods must be >= 0"));
        }
        if !infinite && max_periods_until_error < 1 {
            return Err(EngineError::config("max_periods_until_error must be >= 1"));
        }
        if rng_seed < 0 {
            return Err(EngineError::config(format!("rng_seed must be >= 0, got {rng_seed}")));
        }

        Ok(Self {
            mdp,
            number_of_trajectories: number_of_trajectories as usize,
            periods_per_trajectory,
            warmup_periods,
            max_periods_until_error,
            rng_seed: rng_seed as u64,
            threads: available_threads(),
        })
    }

    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(EngineError::config("comparer: threads must be positive"));
        }
        self.threads = threads;
        Ok(self)
    }

    pub fn assess(&self, policy: &Arc<dyn Policy>) -> Result<PolicyAssessment> {
        let mut out = self.compare(std::slice::from_ref(policy), None)?;
        Ok(out.remove(0))
    }

    /// Assess every policy; with a benchmark, means and errors are relative to it.
    pub fn compare(
        &self,
        policies: &[Arc<dyn Policy>],
        benchmark: Option<usize>,
    ) -> Result<Vec<PolicyAssessment>> {
        if policies.is_empty() {
            return Err(EngineError::config("compare needs at least one policy"));
        }
        if let Some(b) = benchmark {
            if b >= policies.len() {
                return Err(EngineError::config(format!(
                    "benchmark index {b} out of range for {} policies",
                    policies.len()
                )));
            }
        }

        let returns = policies
            .iter()
            .map(|p| self.returns(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let cmp = PolicyComparison::new(&returns)?;

        Ok(policies
            .iter()
            .enumerate()
            .map(|(i, policy)| {
                let (mean, error) = match benchmark {
                    Some(b) => (cmp.mean_difference(i, b), cmp.paired_standard_error(i, b)),
                    None => (cmp.mean(i), cmp.standard_error(i)),
                };
                PolicyAssessment {
                    policy: policy.config(),
                    mean,
                    error,
                    benchmark: benchmark == Some(i),
                }
            })
            .collect())
    }

    /// Per-trajectory values for `policy`, indexed by trajectory number.
    pub fn returns(&self, policy: &dyn Policy) -> Result<Vec<f64>> {
        if policy.mdp_identifier() != self.mdp.identifier() {
            return Err(EngineError::logic(format!(
                "policy '{}' belongs to {}, not {}",
                policy.type_identifier(),
                policy.mdp_identifier(),
                self.mdp.identifier()
            )));
        }

        let mut out = vec![0.0; self.number_of_trajectories];
        parallel_compute(
            &mut out,
            |slots: &mut [f64], offset| {
                for (start, end) in get_chunks(slots.len(), BATCH)? {
                    self.evaluate_batch(policy, &mut slots[start..end], offset + start)?;
                }
                Ok(())
            },
            self.threads,
            None,
        )?;

        let mean = out.iter().sum::<f64>() / out.len() as f64;
        info!(
            mdp = self.mdp.identifier(),
            policy = policy.type_identifier(),
            trajectories = out.len(),
            mean,
            "policy assessed"
        );
        Ok(out)
    }

    fn evaluate_batch(&self, policy: &dyn Policy, out: &mut [f64], first: usize) -> Result<()> {
        let mdp = self.mdp.as_ref();
        let mut trajs: Vec<Trajectory> = (0..out.len())
            .map(|j| {
                let i = (first + j) as u64;
                Trajectory::new(i, SeedKey::new(self.rng_seed, SeedDomain::Evaluation).offset(i))
            })
            .collect();
        mdp.initiate_state(&mut trajs)?;

        if mdp.is_infinite_horizon() {
            let warmup = self.warmup_periods;
            let end = warmup + self.periods_per_trajectory;
            if warmup > 0 {
                evolve(mdp, policy, &mut trajs, Some(warmup), AdvanceMode::NonTrivialActions)?;
                self.check_infinite(&trajs, warmup)?;
            }
            let before: Vec<f64> = {
                let mut v = vec![0.0; trajs.len()];
                for t in &trajs {
                    v[t.external_index as usize - first] = t.cumulative_return;
                }
                v
            };
            evolve(mdp, policy, &mut trajs, Some(end), AdvanceMode::NonTrivialActions)?;
            self.check_infinite(&trajs, end)?;
            for t in &trajs {
                let j = t.external_index as usize - first;
                out[j] = if mdp.discount_factor() == 1.0 {
                    (t.cumulative_return - before[j]) / self.periods_per_trajectory as f64
                } else {
                    t.cumulative_return
                };
            }
        } else {
            evolve(
                mdp,
                policy,
                &mut trajs,
                Some(self.max_periods_until_error),
                AdvanceMode::NonTrivialActions,
            )?;
            for t in &trajs {
                if !t.category.is_final() {
                    return Err(EngineError::logic(format!(
                        "{}: trajectory {} did not reach a Final state within {} periods",
                        mdp.identifier(),
                        t.external_index,
                        self.max_periods_until_error
                    )));
                }
                out[t.external_index as usize - first] = t.cumulative_return;
            }
        }
        Ok(())
    }

    fn check_infinite(&self, trajs: &[Trajectory], target: i64) -> Result<()> {
        for t in trajs {
            if t.category.is_final() {
                return Err(EngineError::logic(format!(
                    "{}: infinite-horizon trajectory {} reached a Final state",
                    self.mdp.identifier(),
                    t.external_index
                )));
            }
            if t.period_count != target {
                return Err(EngineError::logic(format!(
                    "{}: trajectory {} stopped at period {} instead of {target}",
                    self.mdp.identifier(),
                    t.external_index,
                    t.period_count
                )));
            }
        }
        Ok(())
    }
}
