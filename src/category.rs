// src/category.rs
//
// StateCategory: what may legally happen to a state next.
//
//   AwaitAction(k) -> an action for channel k must be supplied
//   AwaitEvent(k)  -> an exogenous event of channel k must be drawn
//   Final          -> episode over (finite horizon only)
//   EndOfHorizon   -> truncated by a period cap; never reported by a model

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCategory {
    AwaitAction(usize),
    AwaitEvent(usize),
    Final,
    EndOfHorizon,
}

impl Default for StateCategory {
    fn default() -> Self {
        StateCategory::AwaitEvent(0)
    }
}

impl StateCategory {
    pub fn await_action() -> Self {
        StateCategory::AwaitAction(0)
    }

    pub fn await_event() -> Self {
        StateCategory::AwaitEvent(0)
    }

    pub fn is_await_action(&self) -> bool {
        matches!(self, StateCategory::AwaitAction(_))
    }

    pub fn is_await_event(&self) -> bool {
        matches!(self, StateCategory::AwaitEvent(_))
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StateCategory::Final)
    }

    pub fn is_end_of_horizon(&self) -> bool {
        matches!(self, StateCategory::EndOfHorizon)
    }

    /// Final or truncated.
    pub fn is_terminal(&self) -> bool {
        self.is_final() || self.is_end_of_horizon()
    }

    /// Channel index for AwaitAction / AwaitEvent.
    pub fn index(&self) -> Option<usize> {
        match *self {
            StateCategory::AwaitAction(k) | StateCategory::AwaitEvent(k) => Some(k),
            _ => None,
        }
    }
}

impl fmt::Display for StateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateCategory::AwaitAction(k) => write!(f, "AwaitAction({k})"),
            StateCategory::AwaitEvent(k) => write!(f, "AwaitEvent({k})"),
            StateCategory::Final => f.write_str("Final"),
            StateCategory::EndOfHorizon => f.write_str("EndOfHorizon"),
        }
    }
}
