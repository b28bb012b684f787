// src/trajectory.rs
//
// Per-rollout mutable context.
//
// A Trajectory owns an erased model state plus the bookkeeping the engine
// needs to drive it: category, discounted return, discount accumulator,
// period counter, its random streams and the pending action. Only the
// erasure layer (mdp.rs) touches the state itself.

use std::any::Any;
use std::fmt;

use crate::category::StateCategory;
use crate::error::{EngineError, Result};
use crate::rng::{RngProvider, SeedKey};

/// Object-safe view of a model state.
pub trait AnyState: Any + Send + Sync {
    fn clone_box(&self) -> Box<dyn AnyState>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + Send + Sync> AnyState for T {
    fn clone_box(&self) -> Box<dyn AnyState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A model state with its concrete type erased.
///
/// `owner` is the numeric identity of the model that created the state; the
/// erasure layer refuses states created by any other model.
pub struct ErasedState {
    owner: u64,
    inner: Box<dyn AnyState>,
}

impl ErasedState {
    pub fn new<S: Any + Clone + Send + Sync>(owner: u64, state: S) -> Self {
        Self {
            owner,
            inner: Box::new(state),
        }
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn downcast_ref<S: Any>(&self) -> Option<&S> {
        (*self.inner).as_any().downcast_ref::<S>()
    }

    pub fn downcast_mut<S: Any>(&mut self) -> Option<&mut S> {
        (*self.inner).as_any_mut().downcast_mut::<S>()
    }
}

impl Clone for ErasedState {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            inner: (*self.inner).clone_box(),
        }
    }
}

impl fmt::Debug for ErasedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedState")
            .field("owner", &format_args!("{:016x}", self.owner))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    state: Option<ErasedState>,
    pub category: StateCategory,
    pub cumulative_return: f64,
    pub effective_discount_factor: f64,
    pub period_count: i64,
    pub external_index: u64,
    pub rng: RngProvider,
    pub next_action: Option<usize>,
}

impl Trajectory {
    /// Empty trajectory; call `Mdp::initiate_state` before advancing it.
    pub fn new(external_index: u64, key: SeedKey) -> Self {
        Self {
            state: None,
            category: StateCategory::default(),
            cumulative_return: 0.0,
            effective_discount_factor: 1.0,
            period_count: 0,
            external_index,
            rng: RngProvider::new(key),
            next_action: None,
        }
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&ErasedState> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut ErasedState> {
        self.state.as_mut()
    }

    pub fn require_state(&self) -> Result<&ErasedState> {
        self.state.as_ref().ok_or_else(|| {
            EngineError::logic(format!(
                "trajectory {} has no state; initiate it first",
                self.external_index
            ))
        })
    }

    /// Split borrow of the state and the random streams.
    pub(crate) fn state_and_rng(&mut self) -> Result<(&mut ErasedState, &mut RngProvider)> {
        match self.state.as_mut() {
            Some(state) => Ok((state, &mut self.rng)),
            None => Err(EngineError::logic(format!(
                "trajectory {} has no state; initiate it first",
                self.external_index
            ))),
        }
    }

    /// Install a fresh state and reset return, discount, periods and pending action.
    pub(crate) fn reset_with_state(&mut self, state: ErasedState, category: StateCategory) {
        self.state = Some(state);
        self.category = category;
        self.cumulative_return = 0.0;
        self.effective_discount_factor = 1.0;
        self.period_count = 0;
        self.next_action = None;
    }

    /// Release the state (e.g. after a rollout) while keeping the statistics.
    pub fn clear_state(&mut self) {
        self.state = None;
    }
}

/// Move trajectories awaiting an action to the front, keeping their relative
/// order. Returns how many there are. The order of the remainder is unspecified.
pub fn partition_awaiting_action(trajs: &mut [Trajectory]) -> usize {
    let mut front = 0;
    for i in 0..trajs.len() {
        if trajs[i].category.is_await_action() {
            trajs.swap(front, i);
            front += 1;
        }
    }
    front
}
