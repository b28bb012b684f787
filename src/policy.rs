// src/policy.rs
//
// Policies set the pending action of trajectories that await one.
//
// Design:
// - Policy: object-safe, batch-oriented runtime interface
// - Heuristic<M>: static rule written against a concrete model's state
// - RandomPolicy<M>: uniform over allowed actions, drawn from the policy stream
// - HeuristicPolicy<M>: wraps a Heuristic<M> behind the Policy interface
//
// A policy remembers the identifier of the mdp that created it; applying it to
// another mdp is a logic error.

use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::{typed_state, Model};
use crate::trajectory::Trajectory;

pub trait Policy: Send + Sync {
    fn type_identifier(&self) -> &str;
    fn config(&self) -> VarGroup;
    fn mdp_identifier(&self) -> &str;

    /// Set `next_action` on every trajectory. All must await an action.
    fn set_action(&self, trajs: &mut [Trajectory]) -> Result<()>;
}

/// A decision rule for a concrete model.
pub trait Heuristic<M: Model>: Send + Sync {
    fn action(&self, model: &M, state: &M::State, rng: &mut ChaCha8Rng) -> usize;
}

fn require_await_action(traj: &Trajectory, policy: &str) -> Result<()> {
    if traj.category.is_await_action() {
        Ok(())
    } else {
        Err(EngineError::logic(format!(
            "policy '{policy}' asked to act on trajectory {} in category {}",
            traj.external_index, traj.category
        )))
    }
}

pub struct RandomPolicy<M: Model> {
    model: Arc<M>,
    mdp_identifier: String,
    identity: u64,
    config: VarGroup,
}

impl<M: Model> RandomPolicy<M> {
    pub(crate) fn new(model: Arc<M>, mdp_identifier: String, identity: u64, config: VarGroup) -> Self {
        Self {
            model,
            mdp_identifier,
            identity,
            config,
        }
    }
}

impl<M: Model> Policy for RandomPolicy<M> {
    fn type_identifier(&self) -> &str {
        "random"
    }

    fn config(&self) -> VarGroup {
        self.config.clone()
    }

    fn mdp_identifier(&self) -> &str {
        &self.mdp_identifier
    }

    fn set_action(&self, trajs: &mut [Trajectory]) -> Result<()> {
        let mut allowed = Vec::with_capacity(self.model.num_valid_actions());
        for traj in trajs.iter_mut() {
            require_await_action(traj, "random")?;
            let (erased, rng) = traj.state_and_rng()?;
            let state = typed_state::<M>(self.identity, erased)?;

            allowed.clear();
            allowed.extend(
                (0..self.model.num_valid_actions()).filter(|a| self.model.is_allowed_action(state, *a)),
            );
            if allowed.is_empty() {
                return Err(EngineError::logic(format!(
                    "{}: random policy found no allowed action",
                    self.mdp_identifier
                )));
            }
            let pick = allowed[rng.policy().gen_range(0..allowed.len())];
            traj.next_action = Some(pick);
        }
        Ok(())
    }
}

pub struct HeuristicPolicy<M: Model> {
    model: Arc<M>,
    heuristic: Box<dyn Heuristic<M>>,
    id: String,
    mdp_identifier: String,
    identity: u64,
    config: VarGroup,
}

impl<M: Model> HeuristicPolicy<M> {
    pub(crate) fn new(
        model: Arc<M>,
        heuristic: Box<dyn Heuristic<M>>,
        id: String,
        mdp_identifier: String,
        identity: u64,
        config: VarGroup,
    ) -> Self {
        Self {
            model,
            heuristic,
            id,
            mdp_identifier,
            identity,
            config,
        }
    }
}

impl<M: Model> Policy for HeuristicPolicy<M> {
    fn type_identifier(&self) -> &str {
        &self.id
    }

    fn config(&self) -> VarGroup {
        self.config.clone()
    }

    fn mdp_identifier(&self) -> &str {
        &self.mdp_identifier
    }

    fn set_action(&self, trajs: &mut [Trajectory]) -> Result<()> {
        for traj in trajs.iter_mut() {
            require_await_action(traj, &self.id)?;
            let (erased, rng) = traj.state_and_rng()?;
            let state = typed_state::<M>(self.identity, erased)?;
            let action = self.heuristic.action(&self.model, state, rng.policy());
            traj.next_action = Some(action);
        }
        Ok(())
    }
}
