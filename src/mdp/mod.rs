// src/mdp/mod.rs
//
// Erasure layer.
//
// - Model:      the static plugin contract a problem definition implements
// - Mdp:        object-safe runtime interface, batch-oriented
// - GenericMdp: adapter turning any Model into an `Arc<dyn Mdp>`
// - evolve:     shared driver that advances a batch under a policy
//
// Dynamic dispatch happens once per batch call; the per-trajectory loops
// inside GenericMdp are monomorphised for the concrete model.

mod adapter;

use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::StateCategory;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::policy::{Heuristic, Policy};
use crate::trajectory::{partition_awaiting_action, ErasedState, Trajectory};

pub use adapter::GenericMdp;
pub(crate) use adapter::typed_state;

/// Upper bound on events / forced actions applied to one trajectory within a
/// single until-action call.
pub const MAX_STEPS_WITHOUT_DECISION: u64 = 1_000_000;

/// Upper bound on action rounds that leave some trajectory unfinished in `evolve`.
pub const MAX_EVOLVE_ROUNDS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizonType {
    Finite,
    Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Minimize,
    Maximize,
}

impl Objective {
    /// Multiplying a return by this sign turns "better" into "larger".
    pub fn sign(self) -> f64 {
        match self {
            Objective::Minimize => -1.0,
            Objective::Maximize => 1.0,
        }
    }
}

/// Static contract for a problem definition.
///
/// Actions are indices in `0..num_valid_actions()`. Costs returned by the
/// modify functions are undiscounted; the engine applies discounting.
pub trait Model: Send + Sync + Sized + 'static {
    type State: Clone + Send + Sync + Serialize + DeserializeOwned + 'static;
    type Event: Send;

    fn type_identifier(&self) -> &'static str;

    /// Full parameter set; its content hash becomes part of the identifier.
    fn config(&self) -> VarGroup;

    fn discount_factor(&self) -> f64;
    fn horizon(&self) -> HorizonType;

    fn objective(&self) -> Objective {
        Objective::Minimize
    }

    fn num_valid_actions(&self) -> usize;

    fn num_flat_features(&self) -> Option<usize> {
        None
    }

    fn initial_state(&self, rng: &mut ChaCha8Rng) -> Self::State;
    fn state_category(&self, state: &Self::State) -> StateCategory;
    fn is_allowed_action(&self, state: &Self::State, action: usize) -> bool;
    fn modify_state_with_action(&self, state: &mut Self::State, action: usize) -> f64;
    fn get_event(&self, state: &Self::State, rng: &mut ChaCha8Rng) -> Self::Event;
    fn modify_state_with_event(&self, state: &mut Self::State, event: &Self::Event) -> f64;

    fn write_flat_features(&self, _state: &Self::State, _out: &mut [f32]) -> Result<()> {
        Err(EngineError::config(format!(
            "{} does not provide flat features",
            self.type_identifier()
        )))
    }

    fn heuristic_ids(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Build a named heuristic; `Ok(None)` for unknown ids.
    fn heuristic(&self, _id: &str, _config: &VarGroup) -> Result<Option<Box<dyn Heuristic<Self>>>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    /// Stop at every decision point.
    AllActions,
    /// Apply single-option actions automatically; stop only at real choices.
    NonTrivialActions,
}

/// Runtime interface shared by all models.
pub trait Mdp: Send + Sync {
    fn identifier(&self) -> &str;
    /// Numeric identity stamped on every state this model creates.
    fn identity(&self) -> u64;
    fn type_identifier(&self) -> &str;
    fn config(&self) -> &VarGroup;
    fn discount_factor(&self) -> f64;
    fn horizon(&self) -> HorizonType;
    fn objective(&self) -> Objective;
    fn num_valid_actions(&self) -> usize;
    fn num_flat_features(&self) -> Option<usize>;
    fn policy_ids(&self) -> Vec<String>;

    fn is_infinite_horizon(&self) -> bool {
        self.horizon() == HorizonType::Infinite
    }

    fn initiate_state(&self, trajs: &mut [Trajectory]) -> Result<()>;
    fn initiate_state_from(&self, trajs: &mut [Trajectory], state: &ErasedState) -> Result<()>;

    /// Apply each trajectory's `next_action`.
    fn incorporate_action(&self, trajs: &mut [Trajectory]) -> Result<()>;

    fn incorporate_action_with(&self, trajs: &mut [Trajectory], policy: &dyn Policy) -> Result<()> {
        if policy.mdp_identifier() != self.identifier() {
            return Err(EngineError::logic(format!(
                "policy '{}' was built for {} but applied to {}",
                policy.type_identifier(),
                policy.mdp_identifier(),
                self.identifier()
            )));
        }
        policy.set_action(trajs)?;
        self.incorporate_action(trajs)
    }

    fn incorporate_event(&self, trajs: &mut [Trajectory]) -> Result<()>;

    /// Advance each trajectory until it awaits an action, is Final, or has
    /// reached `cap` periods (then EndOfHorizon). Returns true iff every
    /// trajectory of the batch ends awaiting an action.
    fn incorporate_until_action(&self, trajs: &mut [Trajectory], cap: Option<i64>) -> Result<bool>;

    /// As `incorporate_until_action`, applying single-option actions on the way.
    fn incorporate_until_nontrivial_action(
        &self,
        trajs: &mut [Trajectory],
        cap: Option<i64>,
    ) -> Result<bool>;

    fn state_category(&self, state: &ErasedState) -> Result<StateCategory>;
    /// Allowed actions in ascending order.
    fn allowed_actions(&self, state: &ErasedState) -> Result<Vec<usize>>;
    fn is_allowed_action(&self, state: &ErasedState, action: usize) -> Result<bool>;

    fn num_allowed_actions(&self, state: &ErasedState) -> Result<usize> {
        Ok(self.allowed_actions(state)?.len())
    }

    fn flat_features(&self, state: &ErasedState) -> Result<Vec<f32>>;
    fn action_mask(&self, state: &ErasedState) -> Result<Vec<bool>>;
    fn state_to_value(&self, state: &ErasedState) -> Result<Value>;
    fn state_from_value(&self, value: &Value) -> Result<ErasedState>;
    fn is_conformant(&self, state: &ErasedState) -> bool;

    /// `config["id"]` is "random" or one of `policy_ids()`.
    fn create_policy(&self, config: &VarGroup) -> Result<Arc<dyn Policy>>;

    fn get_policy(&self, id: &str) -> Result<Arc<dyn Policy>> {
        let config = VarGroup::new().with("id", id)?;
        self.create_policy(&config)
    }
}

/// Advance `trajs` under `policy` until every one is Final or has reached `cap`.
///
/// Trajectories that stop needing actions are moved behind the active ones,
/// so the slice order after return is unspecified; use `external_index` to
/// map results back.
pub fn evolve(
    mdp: &dyn Mdp,
    policy: &dyn Policy,
    trajs: &mut [Trajectory],
    cap: Option<i64>,
    mode: AdvanceMode,
) -> Result<()> {
    if cap.is_none() && mdp.is_infinite_horizon() {
        return Err(EngineError::logic(format!(
            "evolve without a period cap on infinite-horizon mdp {}",
            mdp.identifier()
        )));
    }

    let mut active: &mut [Trajectory] = trajs;
    let mut rounds = 0_u64;
    loop {
        let all_await = match mode {
            AdvanceMode::AllActions => mdp.incorporate_until_action(active, cap)?,
            AdvanceMode::NonTrivialActions => {
                mdp.incorporate_until_nontrivial_action(active, cap)?
            }
        };
        if !all_await {
            let n = partition_awaiting_action(active);
            active = &mut std::mem::take(&mut active)[..n];
            rounds += 1;
            if rounds > MAX_EVOLVE_ROUNDS {
                return Err(EngineError::logic(format!(
                    "evolve on {} did not complete after {MAX_EVOLVE_ROUNDS} rounds",
                    mdp.identifier()
                )));
            }
        }
        if active.is_empty() {
            return Ok(());
        }
        mdp.incorporate_action_with(active, policy)?;
    }
}
