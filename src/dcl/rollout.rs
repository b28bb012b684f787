// src/dcl/rollout.rs
//
// Rollout experiments from a root state.
//
// An experiment is (candidate action, replication). Each one starts from a
// copy of the root, applies the candidate action and evolves under the
// rollout policy for at most `horizon` periods. The random streams of an
// experiment depend on (sample stream offset, replication) only, so every
// candidate action sees the same random numbers for a given replication.

use crate::error::{EngineError, Result};
use crate::mdp::{evolve, AdvanceMode, Mdp};
use crate::parallel::get_chunks;
use crate::policy::Policy;
use crate::rng::{SeedDomain, SeedKey};
use crate::trajectory::{ErasedState, Trajectory};

/// Trajectories simulated together in one batch.
pub const ROLLOUT_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Experiment {
    pub action: usize,
    pub replication: u64,
}

pub struct RolloutContext<'a> {
    pub mdp: &'a dyn Mdp,
    pub policy: &'a dyn Policy,
    pub root: &'a ErasedState,
    pub horizon: i64,
    pub base_seed: u64,
    /// Distinguishes the rollouts of one sample from those of every other.
    pub stream_offset: u64,
}

impl RolloutContext<'_> {
    fn key(&self, replication: u64) -> SeedKey {
        SeedKey::new(self.base_seed, SeedDomain::Rollout)
            .offset(self.stream_offset)
            .sub(replication)
    }

    /// Raw (undiscounted-by-objective) returns, one per experiment, in input order.
    pub fn run(&self, experiments: &[Experiment]) -> Result<Vec<f64>> {
        let mut returns = vec![0.0; experiments.len()];
        if experiments.is_empty() {
            return Ok(returns);
        }

        for (start, end) in get_chunks(experiments.len(), ROLLOUT_CHUNK)? {
            let mut trajs: Vec<Trajectory> = (start..end)
                .map(|i| Trajectory::new(i as u64, self.key(experiments[i].replication)))
                .collect();
            self.mdp.initiate_state_from(&mut trajs, self.root)?;
            for traj in trajs.iter_mut() {
                traj.next_action = Some(experiments[traj.external_index as usize].action);
            }
            self.mdp.incorporate_action(&mut trajs)?;
            evolve(
                self.mdp,
                self.policy,
                &mut trajs,
                Some(self.horizon),
                AdvanceMode::AllActions,
            )?;

            for traj in &trajs {
                self.check_completed(traj)?;
                returns[traj.external_index as usize] = traj.cumulative_return;
            }
        }
        Ok(returns)
    }

    fn check_completed(&self, traj: &Trajectory) -> Result<()> {
        let final_ = traj.category.is_final();
        let at_horizon = traj.period_count == self.horizon;
        let ok = if self.mdp.is_infinite_horizon() {
            !final_ && at_horizon
        } else {
            final_ || at_horizon
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::logic(format!(
                "rollout {} ended in category {} after {} periods (horizon {})",
                traj.external_index, traj.category, traj.period_count, self.horizon
            )))
        }
    }
}
