// src/mdp/adapter.rs
//
// GenericMdp<M>: adapter from a static Model to the runtime Mdp trait.

use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{HorizonType, Mdp, Model, Objective, MAX_STEPS_WITHOUT_DECISION};
use crate::category::StateCategory;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::policy::{HeuristicPolicy, Policy, RandomPolicy};
use crate::trajectory::{ErasedState, Trajectory};

/// Downcast an erased state, checking that `identity` created it.
pub(crate) fn typed_state<M: Model>(identity: u64, state: &ErasedState) -> Result<&M::State> {
    if state.owner() != identity {
        return Err(EngineError::logic(format!(
            "state created by mdp {:016x} used with mdp {identity:016x}",
            state.owner()
        )));
    }
    state.downcast_ref::<M::State>().ok_or_else(|| {
        EngineError::logic("state has a different concrete type than the mdp expects")
    })
}

fn typed_state_mut<M: Model>(identity: u64, state: &mut ErasedState) -> Result<&mut M::State> {
    if state.owner() != identity {
        return Err(EngineError::logic(format!(
            "state created by mdp {:016x} used with mdp {identity:016x}",
            state.owner()
        )));
    }
    state.downcast_mut::<M::State>().ok_or_else(|| {
        EngineError::logic("state has a different concrete type than the mdp expects")
    })
}

pub struct GenericMdp<M: Model> {
    model: Arc<M>,
    identifier: String,
    identity: u64,
    config: VarGroup,
}

impl<M: Model> GenericMdp<M> {
    pub fn new(model: M) -> Result<Self> {
        let gamma = model.discount_factor();
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(EngineError::config(format!(
                "{}: discount_factor must be in (0, 1], got {gamma}",
                model.type_identifier()
            )));
        }
        if model.num_valid_actions() == 0 {
            return Err(EngineError::config(format!(
                "{}: num_valid_actions must be positive",
                model.type_identifier()
            )));
        }

        let mut config = model.config();
        if !config.contains("id") {
            config.set("id", model.type_identifier())?;
        }
        let hash = config.content_hash();
        let identifier = format!("{}_{}", model.type_identifier(), &hash[..16]);

        let digest = Sha256::digest(identifier.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let identity = u64::from_le_bytes(word);

        Ok(Self {
            model: Arc::new(model),
            identifier,
            identity,
            config,
        })
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    fn erase(&self, state: M::State) -> ErasedState {
        ErasedState::new(self.identity, state)
    }

    /// Category as reported by the model, rejecting values no model may report.
    fn checked_category(&self, state: &M::State) -> Result<StateCategory> {
        let cat = self.model.state_category(state);
        match cat {
            StateCategory::EndOfHorizon => Err(EngineError::logic(format!(
                "{}: model reported EndOfHorizon, which only the engine may set",
                self.identifier
            ))),
            StateCategory::Final if self.model.horizon() == HorizonType::Infinite => {
                Err(EngineError::logic(format!(
                    "{}: infinite-horizon model reported a Final state",
                    self.identifier
                )))
            }
            other => Ok(other),
        }
    }

    fn first_two_allowed(&self, state: &M::State) -> (Option<usize>, Option<usize>) {
        let mut allowed =
            (0..self.model.num_valid_actions()).filter(|a| self.model.is_allowed_action(state, *a));
        let first = allowed.next();
        let second = allowed.next();
        (first, second)
    }

    fn apply_action(&self, traj: &mut Trajectory) -> Result<()> {
        if !traj.category.is_await_action() {
            return Err(EngineError::logic(format!(
                "incorporate_action on trajectory {} in category {}",
                traj.external_index, traj.category
            )));
        }
        let action = traj.next_action.ok_or_else(|| {
            EngineError::logic(format!(
                "trajectory {} awaits an action but none was set",
                traj.external_index
            ))
        })?;

        let (cost, cat) = {
            let (erased, _) = traj.state_and_rng()?;
            let state = typed_state_mut::<M>(self.identity, erased)?;
            if action >= self.model.num_valid_actions()
                || !self.model.is_allowed_action(state, action)
            {
                return Err(EngineError::logic(format!(
                    "{}: action {action} is not allowed in this state",
                    self.identifier
                )));
            }
            let cost = self.model.modify_state_with_action(state, action);
            (cost, self.checked_category(state)?)
        };

        traj.cumulative_return += cost * traj.effective_discount_factor;
        traj.next_action = None;
        traj.category = cat;
        Ok(())
    }

    fn apply_event(&self, traj: &mut Trajectory) -> Result<()> {
        let channel = match traj.category {
            StateCategory::AwaitEvent(k) => k,
            other => {
                return Err(EngineError::logic(format!(
                    "incorporate_event on trajectory {} in category {other}",
                    traj.external_index
                )))
            }
        };

        let (cost, cat) = {
            let (erased, rng) = traj.state_and_rng()?;
            let state = typed_state_mut::<M>(self.identity, erased)?;
            let event = self.model.get_event(state, rng.event(channel));
            let cost = self.model.modify_state_with_event(state, &event);
            (cost, self.checked_category(state)?)
        };

        traj.cumulative_return += cost * traj.effective_discount_factor;
        traj.effective_discount_factor *= self.model.discount_factor();
        traj.period_count += 1;
        traj.category = cat;
        Ok(())
    }

    fn advance(&self, traj: &mut Trajectory, cap: Option<i64>, skip_trivial: bool) -> Result<()> {
        let mut steps = 0_u64;
        loop {
            if traj.category.is_end_of_horizon() {
                let state = typed_state::<M>(self.identity, traj.require_state()?)?;
                traj.category = self.checked_category(state)?;
            }
            if let Some(cap) = cap {
                if traj.period_count >= cap && !traj.category.is_final() {
                    traj.category = StateCategory::EndOfHorizon;
                    return Ok(());
                }
            }

            let category = traj.category;
            match category {
                StateCategory::Final | StateCategory::EndOfHorizon => return Ok(()),
                StateCategory::AwaitAction(_) => {
                    let state = typed_state::<M>(self.identity, traj.require_state()?)?;
                    match self.first_two_allowed(state) {
                        (None, _) => {
                            return Err(EngineError::logic(format!(
                                "{}: state awaits an action but no action is allowed",
                                self.identifier
                            )))
                        }
                        (Some(only), None) if skip_trivial => {
                            traj.next_action = Some(only);
                            self.apply_action(traj)?;
                        }
                        _ => return Ok(()),
                    }
                }
                StateCategory::AwaitEvent(_) => self.apply_event(traj)?,
            }

            steps += 1;
            if steps > MAX_STEPS_WITHOUT_DECISION {
                return Err(EngineError::logic(format!(
                    "{}: no decision point reached after {MAX_STEPS_WITHOUT_DECISION} steps",
                    self.identifier
                )));
            }
        }
    }
}

impl<M: Model> Mdp for GenericMdp<M> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn identity(&self) -> u64 {
        self.identity
    }

    fn type_identifier(&self) -> &str {
        self.model.type_identifier()
    }

    fn config(&self) -> &VarGroup {
        &self.config
    }

    fn discount_factor(&self) -> f64 {
        self.model.discount_factor()
    }

    fn horizon(&self) -> HorizonType {
        self.model.horizon()
    }

    fn objective(&self) -> Objective {
        self.model.objective()
    }

    fn num_valid_actions(&self) -> usize {
        self.model.num_valid_actions()
    }

    fn num_flat_features(&self) -> Option<usize> {
        self.model.num_flat_features()
    }

    fn policy_ids(&self) -> Vec<String> {
        let mut ids = vec!["random".to_string()];
        ids.extend(self.model.heuristic_ids().into_iter().map(String::from));
        ids
    }

    fn initiate_state(&self, trajs: &mut [Trajectory]) -> Result<()> {
        for traj in trajs.iter_mut() {
            let state = self.model.initial_state(traj.rng.initiation());
            let cat = self.checked_category(&state)?;
            traj.reset_with_state(self.erase(state), cat);
        }
        Ok(())
    }

    fn initiate_state_from(&self, trajs: &mut [Trajectory], state: &ErasedState) -> Result<()> {
        let typed = typed_state::<M>(self.identity, state)?;
        let cat = self.checked_category(typed)?;
        for traj in trajs.iter_mut() {
            traj.reset_with_state(state.clone(), cat);
        }
        Ok(())
    }

    fn incorporate_action(&self, trajs: &mut [Trajectory]) -> Result<()> {
        for traj in trajs.iter_mut() {
            self.apply_action(traj)?;
        }
        Ok(())
    }

    fn incorporate_event(&self, trajs: &mut [Trajectory]) -> Result<()> {
        for traj in trajs.iter_mut() {
            self.apply_event(traj)?;
        }
        Ok(())
    }

    fn incorporate_until_action(&self, trajs: &mut [Trajectory], cap: Option<i64>) -> Result<bool> {
        let mut all_await = true;
        for traj in trajs.iter_mut() {
            self.advance(traj, cap, false)?;
            all_await &= traj.category.is_await_action();
        }
        Ok(all_await)
    }

    fn incorporate_until_nontrivial_action(
        &self,
        trajs: &mut [Trajectory],
        cap: Option<i64>,
    ) -> Result<bool> {
        let mut all_await = true;
        for traj in trajs.iter_mut() {
            self.advance(traj, cap, true)?;
            all_await &= traj.category.is_await_action();
        }
        Ok(all_await)
    }

    fn state_category(&self, state: &ErasedState) -> Result<StateCategory> {
        self.checked_category(typed_state::<M>(self.identity, state)?)
    }

    fn allowed_actions(&self, state: &ErasedState) -> Result<Vec<usize>> {
        let typed = typed_state::<M>(self.identity, state)?;
        Ok((0..self.model.num_valid_actions())
            .filter(|a| self.model.is_allowed_action(typed, *a))
            .collect())
    }

    fn is_allowed_action(&self, state: &ErasedState, action: usize) -> Result<bool> {
        let typed = typed_state::<M>(self.identity, state)?;
        Ok(action < self.model.num_valid_actions() && self.model.is_allowed_action(typed, action))
    }

    fn flat_features(&self, state: &ErasedState) -> Result<Vec<f32>> {
        let typed = typed_state::<M>(self.identity, state)?;
        let n = self.model.num_flat_features().ok_or_else(|| {
            EngineError::config(format!("{} does not provide flat features", self.identifier))
        })?;
        let mut out = vec![0.0_f32; n];
        self.model.write_flat_features(typed, &mut out)?;
        Ok(out)
    }

    fn action_mask(&self, state: &ErasedState) -> Result<Vec<bool>> {
        let typed = typed_state::<M>(self.identity, state)?;
        Ok((0..self.model.num_valid_actions())
            .map(|a| self.model.is_allowed_action(typed, a))
            .collect())
    }

    fn state_to_value(&self, state: &ErasedState) -> Result<Value> {
        let typed = typed_state::<M>(self.identity, state)?;
        serde_json::to_value(typed).map_err(|e| EngineError::validation("state", e.to_string()))
    }

    fn state_from_value(&self, value: &Value) -> Result<ErasedState> {
        let typed: M::State = serde_json::from_value(value.clone())
            .map_err(|e| EngineError::validation("state", e.to_string()))?;
        Ok(self.erase(typed))
    }

    fn is_conformant(&self, state: &ErasedState) -> bool {
        typed_state::<M>(self.identity, state).is_ok()
    }

    fn create_policy(&self, config: &VarGroup) -> Result<Arc<dyn Policy>> {
        let id: String = config.get("id")?;
        if id == "random" {
            return Ok(Arc::new(RandomPolicy::new(
                self.model.clone(),
                self.identifier.clone(),
                self.identity,
                config.clone(),
            )));
        }
        match self.model.heuristic(&id, config)? {
            Some(heuristic) => Ok(Arc::new(HeuristicPolicy::new(
                self.model.clone(),
                heuristic,
                id,
                self.identifier.clone(),
                self.identity,
                config.clone(),
            ))),
            None => Err(EngineError::config(format!(
                "{}: unknown policy id '{id}', available: {}",
                self.identifier,
                self.policy_ids().join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdp::{evolve, AdvanceMode};
    use crate::models::Countdown;
    use crate::rng::{SeedDomain, SeedKey};
    use serde_json::json;

    fn countdown(length: i64) -> GenericMdp<Countdown> {
        let cfg = VarGroup::new().with("length", length).unwrap();
        GenericMdp::new(Countdown::from_config(&cfg).unwrap()).unwrap()
    }

    fn fresh(mdp: &GenericMdp<Countdown>, n: u64) -> Vec<Trajectory> {
        let mut trajs: Vec<Trajectory> = (0..n)
            .map(|i| Trajectory::new(i, SeedKey::new(3, SeedDomain::Evaluation).offset(i)))
            .collect();
        mdp.initiate_state(&mut trajs).unwrap();
        trajs
    }

    #[test]
    fn states_do_not_cross_mdps() {
        let (a, b) = (countdown(4), countdown(5));
        let t = fresh(&a, 1);
        let state = t[0].require_state().unwrap();
        assert!(a.is_conformant(state));
        assert!(!b.is_conformant(state));
        assert!(b.allowed_actions(state).unwrap_err().is_logic());
        let mut other = fresh(&b, 1);
        assert!(b.initiate_state_from(&mut other, state).unwrap_err().is_logic());
    }

    #[test]
    fn protocol_violations_are_logic_errors() {
        let mdp = countdown(5);
        let mut t = fresh(&mdp, 1);

        // No action set.
        assert!(mdp.incorporate_action(&mut t).unwrap_err().is_logic());
        // Event while awaiting an action.
        assert!(mdp.incorporate_event(&mut t).unwrap_err().is_logic());
        // Action 3 needs remaining >= 4; action 4 is out of range.
        t[0].next_action = Some(4);
        assert!(mdp.incorporate_action(&mut t).unwrap_err().is_logic());

        t[0].next_action = Some(3);
        mdp.incorporate_action(&mut t).unwrap();
        assert!(t[0].category.is_await_event());
        assert!(t[0].next_action.is_none());
        t[0].next_action = Some(0);
        assert!(mdp.incorporate_action(&mut t).unwrap_err().is_logic());
    }

    #[test]
    fn nontrivial_mode_applies_forced_actions() {
        let mdp = countdown(5);
        let last = mdp
            .state_from_value(&json!({"remaining": 1, "awaiting_action": true}))
            .unwrap();
        assert_eq!(mdp.allowed_actions(&last).unwrap(), vec![0]);

        let mut t = fresh(&mdp, 1);
        mdp.initiate_state_from(&mut t, &last).unwrap();
        assert!(mdp.incorporate_until_action(&mut t, None).unwrap());
        assert!(t[0].category.is_await_action());

        assert!(!mdp.incorporate_until_nontrivial_action(&mut t, None).unwrap());
        assert!(t[0].category.is_final());
        assert_eq!(t[0].period_count, 1);
        assert!((t[0].cumulative_return - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cap_marks_end_of_horizon_and_can_be_extended() {
        let mdp = countdown(5);
        let greedy = mdp.get_policy("greedy").unwrap();
        let mut t = fresh(&mdp, 1);

        evolve(&mdp, greedy.as_ref(), &mut t, Some(2), AdvanceMode::AllActions).unwrap();
        assert!(t[0].category.is_end_of_horizon());
        assert_eq!(t[0].period_count, 2);

        evolve(&mdp, greedy.as_ref(), &mut t, Some(10), AdvanceMode::AllActions).unwrap();
        assert!(t[0].category.is_final());
        assert_eq!(t[0].period_count, 5);
    }

    #[test]
    fn evolve_handles_batches_finishing_at_different_times() {
        let mdp = countdown(5);
        let greedy = mdp.get_policy("greedy").unwrap();
        let mut t = fresh(&mdp, 3);
        for (traj, remaining) in t.iter_mut().zip([5, 1, 3]) {
            let s = mdp
                .state_from_value(&json!({"remaining": remaining, "awaiting_action": true}))
                .unwrap();
            mdp.initiate_state_from(std::slice::from_mut(traj), &s).unwrap();
        }
        evolve(&mdp, greedy.as_ref(), &mut t, None, AdvanceMode::AllActions).unwrap();

        let mut by_index = vec![0.0; 3];
        for traj in &t {
            assert!(traj.category.is_final());
            by_index[traj.external_index as usize] = traj.cumulative_return;
        }
        assert_eq!(by_index, vec![5.0, 1.0, 3.0]);
    }

    #[test]
    fn state_values_round_trip() {
        let mdp = countdown(5);
        let t = fresh(&mdp, 1);
        let state = t[0].require_state().unwrap();
        let value = mdp.state_to_value(state).unwrap();
        assert_eq!(value, json!({"remaining": 5, "awaiting_action": true}));
        let back = mdp.state_from_value(&value).unwrap();
        assert_eq!(mdp.flat_features(&back).unwrap(), vec![5.0, 0.0]);
        assert_eq!(mdp.action_mask(&back).unwrap(), vec![true; 4]);
        assert!(mdp.state_from_value(&json!({"remaining": "x"})).is_err());
    }

    #[test]
    fn unknown_policy_id_is_config_error() {
        let mdp = countdown(5);
        assert!(matches!(
            mdp.get_policy("optimal").err(),
            Some(EngineError::Config(_))
        ));
        assert_eq!(mdp.policy_ids(), vec!["random", "greedy", "first_action"]);
    }

    #[test]
    fn zero_discount_factor_is_rejected() {
        let cfg = VarGroup::new().with("discount_factor", 0.0).unwrap();
        let model = Countdown::from_config(&cfg).unwrap();
        assert!(matches!(GenericMdp::new(model).err(), Some(EngineError::Config(_))));
    }

    #[test]
    fn identifier_embeds_type_and_hash() {
        let mdp = countdown(5);
        assert!(mdp.identifier().starts_with("countdown_"));
        assert_eq!(mdp.identifier().len(), "countdown_".len() + 16);
        assert_eq!(mdp.config().get::<String>("id").unwrap(), "countdown");
    }
}
