// src/demonstrator.rs
//
// Single-trajectory trace for inspecting a policy step by step.

use serde::Serialize;
use serde_json::Value;

use crate::category::StateCategory;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::Mdp;
use crate::policy::Policy;
use crate::rng::{SeedDomain, SeedKey};
use crate::trajectory::Trajectory;

pub const DEFAULT_DEMONSTRATOR_SEED: u64 = 11_112_014;

/// Steps applied before giving up on reaching the next recorded point.
const MAX_TRACE_STEPS: usize = 1_000_000;

#[derive(Debug, Clone, Serialize)]
pub struct TraceElement {
    pub state: Value,
    pub period_count: i64,
    /// Return accrued since the previous element.
    pub incremental_return: f64,
    pub cumulative_return: f64,
    pub category: String,
    /// Action taken in this state, if it awaited one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<usize>,
}

pub struct Demonstrator {
    max_period_count: i64,
    rng_seed: u64,
}

impl Demonstrator {
    pub fn new(config: &VarGroup) -> Result<Self> {
        let max_period_count: i64 = config.get_or("max_period_count", 3)?;
        let rng_seed: i64 = config.get_or("rng_seed", DEFAULT_DEMONSTRATOR_SEED as i64)?;
        if max_period_count < 0 {
            return Err(EngineError::config("max_period_count must be >= 0"));
        }
        if rng_seed < 0 {
            return Err(EngineError::config("rng_seed must be >= 0"));
        }
        Ok(Self {
            max_period_count,
            rng_seed: rng_seed as u64,
        })
    }

    /// Run one trajectory under `policy` for at most `max_period_count`
    /// periods, recording every action and every event.
    pub fn trace(&self, mdp: &dyn Mdp, policy: &dyn Policy) -> Result<Vec<TraceElement>> {
        if policy.mdp_identifier() != mdp.identifier() {
            return Err(EngineError::logic(format!(
                "policy '{}' belongs to {}, not {}",
                policy.type_identifier(),
                policy.mdp_identifier(),
                mdp.identifier()
            )));
        }

        let key = SeedKey::new(self.rng_seed, SeedDomain::Demonstration);
        let mut traj = vec![Trajectory::new(0, key)];
        mdp.initiate_state(&mut traj)?;

        let mut trace = Vec::new();
        let mut last_return = 0.0;
        for _ in 0..MAX_TRACE_STEPS {
            let (category, period_count, cumulative_return) =
                (traj[0].category, traj[0].period_count, traj[0].cumulative_return);
            let mut element = TraceElement {
                state: mdp.state_to_value(traj[0].require_state()?)?,
                period_count,
                incremental_return: cumulative_return - last_return,
                cumulative_return,
                category: category.to_string(),
                action: None,
            };
            last_return = cumulative_return;

            if category.is_final() || period_count >= self.max_period_count {
                trace.push(element);
                return Ok(trace);
            }
            match category {
                StateCategory::AwaitAction(_) => {
                    policy.set_action(&mut traj)?;
                    element.action = traj[0].next_action;
                    mdp.incorporate_action(&mut traj)?;
                }
                StateCategory::AwaitEvent(_) => mdp.incorporate_event(&mut traj)?,
                StateCategory::Final | StateCategory::EndOfHorizon => {
                    return Err(EngineError::logic(format!(
                        "demonstrator trajectory in unexpected category {category}"
                    )))
                }
            }
            trace.push(element);
        }
        Err(EngineError::logic(format!(
            "{}: trace did not finish within {MAX_TRACE_STEPS} steps",
            mdp.identifier()
        )))
    }
}
