// src/dcl/selector.rs
//
// Shared contract of the rollout-based action selectors.

use super::rollout::RolloutContext;
use crate::error::Result;
use crate::metrics::PolicyComparison;

/// Labels produced for one decision point. Vectors are indexed like the
/// `allowed` slice handed to the selector.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorOutcome {
    pub action_label: usize,
    pub q_hat: f64,
    pub z_stat: f64,
    pub q_hat_vec: Vec<f64>,
    pub cost_improvement: Vec<f64>,
    pub probabilities: Vec<f64>,
}

pub trait ActionSelector: Send + Sync {
    /// Pick the best of `allowed` (ascending, at least two entries).
    /// `prescribed` is the position in `allowed` of the rollout policy's own
    /// choice, if that choice is allowed.
    fn select(
        &self,
        ctx: &RolloutContext<'_>,
        allowed: &[usize],
        prescribed: Option<usize>,
    ) -> Result<SelectorOutcome>;
}

/// ceil(log2 k), 0 for k <= 1.
pub fn ceil_log2(k: usize) -> usize {
    if k <= 1 {
        0
    } else {
        (usize::BITS - (k - 1).leading_zeros()) as usize
    }
}

/// Sequential halving only pays off when every round gets at least one
/// replication per action on average.
pub fn use_sequential_halving(enable: bool, m: usize, k: usize) -> bool {
    enable && m > ceil_log2(k)
}

/// Fill the cost-scale vectors from objective-signed statistics.
pub(crate) fn outcome_vectors(
    cmp: &PolicyComparison,
    sign: f64,
    reference: usize,
) -> (Vec<f64>, Vec<f64>) {
    let q_hat_vec = (0..cmp.len()).map(|i| cmp.mean(i) * sign).collect();
    let cost_improvement = (0..cmp.len())
        .map(|i| cmp.mean_difference(i, reference) * sign)
        .collect();
    (q_hat_vec, cost_improvement)
}
