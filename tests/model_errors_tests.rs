use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use mdpsim::models::Countdown;
use mdpsim::{
    GenericMdp, HorizonType, Mdp, Model, PolicyComparer, Registry, Runtime, SampleGenerator,
    StateCategory, VarGroup,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Step {
    left: i64,
    acting: bool,
}

/// Finite chain whose decision states allow `choices` actions each.
struct Corridor {
    choices: usize,
}

impl Model for Corridor {
    type State = Step;
    type Event = ();

    fn type_identifier(&self) -> &'static str {
        "corridor"
    }

    fn config(&self) -> VarGroup {
        VarGroup::new()
            .with("id", "corridor")
            .unwrap_or_default()
            .with("choices", self.choices)
            .unwrap_or_default()
    }

    fn discount_factor(&self) -> f64 {
        1.0
    }

    fn horizon(&self) -> HorizonType {
        HorizonType::Finite
    }

    fn num_valid_actions(&self) -> usize {
        3
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> Step {
        Step { left: 3, acting: true }
    }

    fn state_category(&self, state: &Step) -> StateCategory {
        if state.left == 0 {
            StateCategory::Final
        } else if state.acting {
            StateCategory::await_action()
        } else {
            StateCategory::await_event()
        }
    }

    fn is_allowed_action(&self, _state: &Step, action: usize) -> bool {
        action < self.choices
    }

    fn modify_state_with_action(&self, state: &mut Step, _action: usize) -> f64 {
        state.acting = false;
        0.0
    }

    fn get_event(&self, _state: &Step, _rng: &mut ChaCha8Rng) {}

    fn modify_state_with_event(&self, state: &mut Step, _event: &()) -> f64 {
        state.left -= 1;
        state.acting = true;
        1.0
    }
}

/// Finite model that never asks for an action and never ends.
struct Treadmill;

impl Model for Treadmill {
    type State = i64;
    type Event = ();

    fn type_identifier(&self) -> &'static str {
        "treadmill"
    }

    fn config(&self) -> VarGroup {
        VarGroup::new().with("id", "treadmill").unwrap_or_default()
    }

    fn discount_factor(&self) -> f64 {
        1.0
    }

    fn horizon(&self) -> HorizonType {
        HorizonType::Finite
    }

    fn num_valid_actions(&self) -> usize {
        1
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> i64 {
        0
    }

    fn state_category(&self, _state: &i64) -> StateCategory {
        StateCategory::await_event()
    }

    fn is_allowed_action(&self, _state: &i64, _action: usize) -> bool {
        true
    }

    fn modify_state_with_action(&self, _state: &mut i64, _action: usize) -> f64 {
        0.0
    }

    fn get_event(&self, _state: &i64, _rng: &mut ChaCha8Rng) {}

    fn modify_state_with_event(&self, state: &mut i64, _event: &()) -> f64 {
        *state += 1;
        0.0
    }
}

/// Finite model with one forced action per period that never reaches Final.
struct Carousel;

impl Model for Carousel {
    type State = bool;
    type Event = ();

    fn type_identifier(&self) -> &'static str {
        "carousel"
    }

    fn config(&self) -> VarGroup {
        VarGroup::new().with("id", "carousel").unwrap_or_default()
    }

    fn discount_factor(&self) -> f64 {
        1.0
    }

    fn horizon(&self) -> HorizonType {
        HorizonType::Finite
    }

    fn num_valid_actions(&self) -> usize {
        1
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> bool {
        true
    }

    fn state_category(&self, acting: &bool) -> StateCategory {
        if *acting {
            StateCategory::await_action()
        } else {
            StateCategory::await_event()
        }
    }

    fn is_allowed_action(&self, _acting: &bool, action: usize) -> bool {
        action == 0
    }

    fn modify_state_with_action(&self, acting: &mut bool, _action: usize) -> f64 {
        *acting = false;
        0.0
    }

    fn get_event(&self, _acting: &bool, _rng: &mut ChaCha8Rng) {}

    fn modify_state_with_event(&self, acting: &mut bool, _event: &()) -> f64 {
        *acting = true;
        1.0
    }
}

fn corridor(choices: usize) -> Arc<dyn Mdp> {
    Arc::new(GenericMdp::new(Corridor { choices }).unwrap())
}

fn small_sampler() -> VarGroup {
    VarGroup::new()
        .with("N", 4)
        .unwrap()
        .with("M", 2)
        .unwrap()
        .with("silent", true)
        .unwrap()
}

#[test]
fn decision_state_without_allowed_actions_is_logic_error() {
    let mdp = corridor(0);
    let policy = mdp.get_policy("random").unwrap();

    let comparer = PolicyComparer::new(
        mdp.clone(),
        &VarGroup::new().with("number_of_trajectories", 4).unwrap(),
    )
    .unwrap();
    assert!(comparer.assess(&policy).unwrap_err().is_logic());

    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(dir.path()).with_threads(1).unwrap();
    let err = SampleGenerator::new(mdp, &small_sampler())
        .unwrap()
        .generate_samples(&runtime, None, &dir.path().join("s.json"))
        .unwrap_err();
    assert!(err.is_logic(), "{err}");
}

#[test]
fn single_choice_model_never_yields_samples() {
    let mdp = corridor(1);
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(dir.path()).with_threads(1).unwrap();
    let err = SampleGenerator::new(mdp, &small_sampler())
        .unwrap()
        .generate_samples(&runtime, None, &dir.path().join("s.json"))
        .unwrap_err();
    assert!(err.is_logic(), "{err}");
}

#[test]
fn two_choice_corridor_samples_fine() {
    let mdp = corridor(2);
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(dir.path()).with_threads(2).unwrap();
    let n = SampleGenerator::new(mdp, &small_sampler())
        .unwrap()
        .generate_samples(&runtime, None, &dir.path().join("s.json"))
        .unwrap();
    assert_eq!(n, 4);
}

#[test]
fn finite_model_that_never_ends_is_caught() {
    let mdp: Arc<dyn Mdp> = Arc::new(GenericMdp::new(Treadmill).unwrap());
    let policy = mdp.get_policy("random").unwrap();
    let cfg = VarGroup::new()
        .with("number_of_trajectories", 2)
        .unwrap()
        .with("max_periods_until_error", 50)
        .unwrap();
    let comparer = PolicyComparer::new(mdp.clone(), &cfg).unwrap();
    // Finite horizon, but no Final state within 50 periods.
    let err = comparer.assess(&policy).unwrap_err();
    assert!(err.is_logic(), "{err}");
}

#[test]
fn sampling_a_never_ending_episode_is_caught() {
    let mdp: Arc<dyn Mdp> = Arc::new(GenericMdp::new(Carousel).unwrap());
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(dir.path()).with_threads(1).unwrap();
    let cfg = small_sampler().with("max_periods_until_error", 50).unwrap();
    let err = SampleGenerator::new(mdp, &cfg)
        .unwrap()
        .generate_samples(&runtime, None, &dir.path().join("s.json"))
        .unwrap_err();
    assert!(err.is_logic(), "{err}");
    assert!(err.to_string().contains("50 periods"), "{err}");
}

#[test]
fn custom_models_register_like_reference_ones() {
    let mut registry = Registry::with_reference_models();
    registry.register("corridor", "three steps, two choices", |cfg: &VarGroup| {
        Ok(Corridor {
            choices: cfg.get_or("choices", 2)?,
        })
    });
    let mdp = registry
        .get_mdp(&VarGroup::new().with("id", "corridor").unwrap())
        .unwrap();
    assert_eq!(mdp.type_identifier(), "corridor");
    assert_eq!(mdp.policy_ids(), vec!["random".to_string()]);

    // Reference models are unaffected.
    let countdown = registry
        .get_mdp(&VarGroup::new().with("id", "countdown").unwrap())
        .unwrap();
    assert!(countdown.policy_ids().contains(&"greedy".to_string()));
    assert!(Countdown::from_config(&VarGroup::new()).is_ok());
}
