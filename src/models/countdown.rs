// src/models/countdown.rs
//
// Finite-horizon reference chain.
//
// The chain starts with `length` steps remaining. Each step is an action
// followed by an event:
// - action a (allowed iff a < num_actions and a <= remaining - 1) costs
//   action_penalty * |a - target|, with target = (remaining - 1) % num_actions
// - the event costs 1 + u, u uniform on 0..=noise_max, and decrements remaining
// The episode is Final at remaining == 0, so every episode lasts exactly
// `length` periods. With remaining == 1 only action 0 is allowed.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::category::StateCategory;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::{HorizonType, Model};
use crate::policy::Heuristic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownState {
    pub remaining: i64,
    pub awaiting_action: bool,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    length: i64,
    num_actions: usize,
    action_penalty: f64,
    noise_max: i64,
    discount_factor: f64,
    resolved: VarGroup,
}

impl Countdown {
    pub fn from_config(config: &VarGroup) -> Result<Self> {
        let length: i64 = config.get_or("length", 5)?;
        let num_actions: usize = config.get_or("num_actions", 4)?;
        let action_penalty: f64 = config.get_or("action_penalty", 1.0)?;
        let noise_max: i64 = config.get_or("noise_max", 0)?;
        let discount_factor: f64 = config.get_or("discount_factor", 1.0)?;

        if length < 1 {
            return Err(EngineError::config("countdown: length must be >= 1"));
        }
        if num_actions < 2 {
            return Err(EngineError::config("countdown: num_actions must be >= 2"));
        }
        if action_penalty < 0.0 || noise_max < 0 {
            return Err(EngineError::config(
                "countdown: action_penalty and noise_max must be non-negative",
            ));
        }
        let resolved = VarGroup::new()
            .with("id", "countdown")?
            .with("length", length)?
            .with("num_actions", num_actions)?
            .with("action_penalty", action_penalty)?
            .with("noise_max", noise_max)?
            .with("discount_factor", discount_factor)?;
        Ok(Self {
            length,
            num_actions,
            action_penalty,
            noise_max,
            discount_factor,
            resolved,
        })
    }

    pub fn target(&self, state: &CountdownState) -> usize {
        ((state.remaining - 1).max(0) as usize) % self.num_actions
    }

    /// Undiscounted expected return of the greedy heuristic.
    pub fn greedy_expected_return(&self) -> f64 {
        self.length as f64 * (1.0 + self.noise_max as f64 / 2.0)
    }
}

impl Model for Countdown {
    type State = CountdownState;
    type Event = i64;

    fn type_identifier(&self) -> &'static str {
        "countdown"
    }

    fn config(&self) -> VarGroup {
        self.resolved.clone()
    }

    fn discount_factor(&self) -> f64 {
        self.discount_factor
    }

    fn horizon(&self) -> HorizonType {
        HorizonType::Finite
    }

    fn num_valid_actions(&self) -> usize {
        self.num_actions
    }

    fn num_flat_features(&self) -> Option<usize> {
        Some(2)
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> CountdownState {
        CountdownState {
            remaining: self.length,
            awaiting_action: true,
        }
    }

    fn state_category(&self, state: &CountdownState) -> StateCategory {
        if state.remaining <= 0 {
            StateCategory::Final
        } else if state.awaiting_action {
            StateCategory::await_action()
        } else {
            StateCategory::await_event()
        }
    }

    fn is_allowed_action(&self, state: &CountdownState, action: usize) -> bool {
        action < self.num_actions && (action as i64) <= state.remaining - 1
    }

    fn modify_state_with_action(&self, state: &mut CountdownState, action: usize) -> f64 {
        let target = self.target(state);
        state.awaiting_action = false;
        self.action_penalty * (action as f64 - target as f64).abs()
    }

    fn get_event(&self, _state: &CountdownState, rng: &mut ChaCha8Rng) -> i64 {
        if self.noise_max == 0 {
            0
        } else {
            rng.gen_range(0..=self.noise_max)
        }
    }

    fn modify_state_with_event(&self, state: &mut CountdownState, noise: &i64) -> f64 {
        state.remaining -= 1;
        state.awaiting_action = true;
        1.0 + *noise as f64
    }

    fn write_flat_features(&self, state: &CountdownState, out: &mut [f32]) -> Result<()> {
        out[0] = state.remaining as f32;
        out[1] = self.target(state) as f32;
        Ok(())
    }

    fn heuristic_ids(&self) -> Vec<&'static str> {
        vec!["greedy", "first_action"]
    }

    fn heuristic(&self, id: &str, _config: &VarGroup) -> Result<Option<Box<dyn Heuristic<Self>>>> {
        let heuristic: Box<dyn Heuristic<Self>> = match id {
            "greedy" => Box::new(Greedy),
            "first_action" => Box::new(FirstAction),
            _ => return Ok(None),
        };
        Ok(Some(heuristic))
    }
}

struct Greedy;

impl Heuristic<Countdown> for Greedy {
    fn action(&self, model: &Countdown, state: &CountdownState, _rng: &mut ChaCha8Rng) -> usize {
        model.target(state)
    }
}

struct FirstAction;

impl Heuristic<Countdown> for FirstAction {
    fn action(&self, _model: &Countdown, _state: &CountdownState, _rng: &mut ChaCha8Rng) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdp::{GenericMdp, Mdp};
    use crate::rng::{SeedDomain, SeedKey};
    use crate::trajectory::Trajectory;

    #[test]
    fn greedy_target_is_always_allowed() {
        let m = Countdown::from_config(&VarGroup::new().with("length", 9).unwrap()).unwrap();
        for remaining in 1..=9 {
            let s = CountdownState {
                remaining,
                awaiting_action: true,
            };
            assert!(m.is_allowed_action(&s, m.target(&s)), "remaining={remaining}");
        }
    }

    #[test]
    fn episode_lasts_exactly_length_periods() {
        let mdp = GenericMdp::new(Countdown::from_config(&VarGroup::new()).unwrap()).unwrap();
        let policy = mdp.get_policy("greedy").unwrap();
        let mut t = vec![Trajectory::new(0, SeedKey::new(1, SeedDomain::Evaluation))];
        mdp.initiate_state(&mut t).unwrap();
        crate::mdp::evolve(
            &mdp,
            policy.as_ref(),
            &mut t,
            Some(100),
            crate::mdp::AdvanceMode::AllActions,
        )
        .unwrap();
        assert!(t[0].category.is_final());
        assert_eq!(t[0].period_count, 5);
        assert!((t[0].cumulative_return - 5.0).abs() < 1e-12);
    }

    #[test]
    fn bad_config_rejected() {
        assert!(Countdown::from_config(&VarGroup::new().with("length", 0).unwrap()).is_err());
        assert!(Countdown::from_config(&VarGroup::new().with("num_actions", 1).unwrap()).is_err());
    }
}
