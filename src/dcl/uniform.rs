// src/dcl/uniform.rs
//
// Uniform action selector: M replications for every allowed action.

use super::rollout::{Experiment, RolloutContext};
use super::selector::{outcome_vectors, ActionSelector, SelectorOutcome};
use crate::error::{EngineError, Result};
use crate::metrics::{one_hot, PolicyComparison};

#[derive(Debug, Clone, Copy)]
pub struct UniformActionSelector {
    m: usize,
}

impl UniformActionSelector {
    pub fn new(m: usize) -> Result<Self> {
        if m == 0 {
            return Err(EngineError::config("uniform selector: M must be positive"));
        }
        Ok(Self { m })
    }
}

impl ActionSelector for UniformActionSelector {
    fn select(
        &self,
        ctx: &RolloutContext<'_>,
        allowed: &[usize],
        prescribed: Option<usize>,
    ) -> Result<SelectorOutcome> {
        let m = self.m;
        let experiments: Vec<Experiment> = allowed
            .iter()
            .flat_map(|&action| {
                (0..m as u64).map(move |replication| Experiment { action, replication })
            })
            .collect();
        let returns = ctx.run(&experiments)?;

        let sign = ctx.mdp.objective().sign();
        let per_action: Vec<Vec<f64>> = returns
            .chunks(m)
            .map(|chunk| chunk.iter().map(|r| r * sign).collect())
            .collect();
        let cmp = PolicyComparison::new(&per_action)?;
        let best = cmp.best();

        // Without an allowed prescribed action, compare against the worst one.
        let reference = prescribed.unwrap_or_else(|| {
            (0..cmp.len()).fold(0, |worst, i| if cmp.mean(i) < cmp.mean(worst) { i } else { worst })
        });
        let (q_hat_vec, cost_improvement) = outcome_vectors(&cmp, sign, reference);

        let (z_stat, probabilities) = if m > 1 {
            (cmp.min_z_statistic(best), cmp.probabilities(best))
        } else {
            (0.0, one_hot(cmp.len(), best))
        };

        Ok(SelectorOutcome {
            action_label: allowed[best],
            q_hat: cmp.mean(best) * sign,
            z_stat,
            q_hat_vec,
            cost_improvement,
            probabilities,
        })
    }
}
