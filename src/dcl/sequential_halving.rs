// src/dcl/sequential_halving.rs
//
// Sequential halving over the allowed actions.
//
// Total budget M * k replications spread over ceil(log2 k) rounds. In each
// round every surviving action receives floor(M * k / (|survivors| * rounds))
// fresh replications, the survivors are ranked by their running mean and the
// better half (rounded up) continues. Replication indices continue across
// rounds, so replication r of every action still shares random numbers.

use super::rollout::{Experiment, RolloutContext};
use super::selector::{ceil_log2, outcome_vectors, ActionSelector, SelectorOutcome};
use crate::error::{EngineError, Result};
use crate::metrics::{one_hot, PolicyComparison};

#[derive(Debug, Clone, Copy)]
pub struct SequentialHalving {
    m: usize,
}

impl SequentialHalving {
    pub fn new(m: usize) -> Result<Self> {
        if m == 0 {
            return Err(EngineError::config("sequential halving: M must be positive"));
        }
        Ok(Self { m })
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

impl ActionSelector for SequentialHalving {
    fn select(
        &self,
        ctx: &RolloutContext<'_>,
        allowed: &[usize],
        prescribed: Option<usize>,
    ) -> Result<SelectorOutcome> {
        let k = allowed.len();
        if k < 2 {
            return Err(EngineError::logic(
                "sequential halving needs at least two allowed actions",
            ));
        }
        let rounds = ceil_log2(k);
        let total_budget = self.m * k;
        let sign = ctx.mdp.objective().sign();

        let mut samples: Vec<Vec<f64>> = vec![Vec::new(); k];
        let mut survivors: Vec<usize> = (0..k).collect();
        let mut replications_used = 0_u64;
        let mut reference = prescribed;

        for round in 0..rounds {
            let action_budget = (total_budget / (survivors.len() * rounds)).max(1) as u64;
            let experiments: Vec<Experiment> = survivors
                .iter()
                .flat_map(|&i| {
                    (0..action_budget).map(move |rep| Experiment {
                        action: allowed[i],
                        replication: replications_used + rep,
                    })
                })
                .collect();
            let returns = ctx.run(&experiments)?;
            for (pos, chunk) in returns.chunks(action_budget as usize).enumerate() {
                samples[survivors[pos]].extend(chunk.iter().map(|r| r * sign));
            }
            replications_used += action_budget;

            // Stable: equal means keep the lower action first.
            survivors.sort_by(|&a, &b| mean(&samples[b]).total_cmp(&mean(&samples[a])));
            if round == 0 && reference.is_none() {
                reference = survivors.last().copied();
            }
            if survivors.len() == 1 {
                break;
            }
            survivors.truncate(survivors.len().div_ceil(2));
        }

        let best = survivors[0];
        let reference = reference.unwrap_or(best);
        let cmp = PolicyComparison::new(&samples)?;
        let (q_hat_vec, cost_improvement) = outcome_vectors(&cmp, sign, reference);

        let least_action_budget = total_budget / (k * rounds);
        let (z_stat, probabilities) = if least_action_budget > 1 {
            (cmp.min_z_statistic(best), cmp.probabilities(best))
        } else {
            (0.0, one_hot(k, best))
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
