// src/models/lost_sales.rs
//
// Infinite-horizon lost-sales inventory system.
//
// Period = order decision, then demand:
// - action q: order q units (0..=max_order); it arrives `leadtime` periods later
// - event d:  the oldest pipeline order arrives, demand d is served from stock,
//             unmet demand is lost. Cost h * on_hand_after + p * lost.
//
// Demand is Poisson(mean_demand) or the constant round(mean_demand). With
// constant demand and a base-stock level S >= (leadtime + 1) * d the long-run
// per-period cost is exactly h * (S - (leadtime + 1) * d).

use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use crate::category::StateCategory;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::{HorizonType, Model};
use crate::policy::Heuristic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostSalesState {
    pub on_hand: i64,
    /// Outstanding orders, oldest first; length == leadtime between periods.
    pub pipeline: Vec<i64>,
    pub awaiting_action: bool,
}

impl LostSalesState {
    pub fn inventory_position(&self) -> i64 {
        self.on_hand + self.pipeline.iter().sum::<i64>()
    }
}

#[derive(Debug, Clone)]
pub enum Demand {
    Poisson(Poisson<f64>),
    Constant(i64),
}

#[derive(Debug, Clone)]
pub struct LostSales {
    leadtime: usize,
    demand: Demand,
    mean_demand: f64,
    holding_cost: f64,
    penalty_cost: f64,
    max_order: usize,
    initial_on_hand: i64,
    discount_factor: f64,
    resolved: VarGroup,
}

impl LostSales {
    pub fn from_config(config: &VarGroup) -> Result<Self> {
        let mean_demand: f64 = config.get_or("mean_demand", 4.0)?;
        let distribution: String = config.get_or("demand_distribution", "poisson".to_string())?;
        let leadtime: usize = config.get_or("leadtime", 2)?;
        let holding_cost: f64 = config.get_or("h", 1.0)?;
        let penalty_cost: f64 = config.get_or("p", 9.0)?;
        let default_max_order = (3.0 * mean_demand.ceil()).max(1.0) as usize;
        let max_order: usize = config.get_or("max_order", default_max_order)?;
        let initial_on_hand: i64 = config.get_or("initial_on_hand", 0)?;
        let discount_factor: f64 = config.get_or("discount_factor", 1.0)?;

        if !(mean_demand.is_finite() && mean_demand > 0.0) {
            return Err(EngineError::config(format!(
                "lost_sales: mean_demand must be positive, got {mean_demand}"
            )));
        }
        if leadtime < 1 {
            return Err(EngineError::config("lost_sales: leadtime must be >= 1"));
        }
        if holding_cost < 0.0 || penalty_cost < 0.0 {
            return Err(EngineError::config("lost_sales: costs must be non-negative"));
        }
        if initial_on_hand < 0 {
            return Err(EngineError::config("lost_sales: initial_on_hand must be >= 0"));
        }
        let demand = match distribution.as_str() {
            "poisson" => Demand::Poisson(Poisson::new(mean_demand).map_err(|e| {
                EngineError::config(format!("lost_sales: mean_demand {mean_demand}: {e}"))
            })?),
            "constant" => Demand::Constant(mean_demand.round() as i64),
            other => {
                return Err(EngineError::config(format!(
                    "lost_sales: unknown demand_distribution '{other}' (poisson | constant)"
                )))
            }
        };

        let resolved = VarGroup::new()
            .with("id", "lost_sales")?
            .with("mean_demand", mean_demand)?
            .with("demand_distribution", distribution)?
            .with("leadtime", leadtime)?
            .with("h", holding_cost)?
            .with("p", penalty_cost)?
            .with("max_order", max_order)?
            .with("initial_on_hand", initial_on_hand)?
            .with("discount_factor", discount_factor)?;

        Ok(Self {
            leadtime,
            demand,
            mean_demand,
            holding_cost,
            penalty_cost,
            max_order,
            initial_on_hand,
            discount_factor,
            resolved,
        })
    }

    pub fn leadtime(&self) -> usize {
        self.leadtime
    }

    pub fn holding_cost(&self) -> f64 {
        self.holding_cost
    }

    fn default_base_stock_level(&self) -> i64 {
        // Covers lead-time demand plus one period, rounded up.
        ((self.leadtime as f64 + 1.0) * self.mean_demand).ceil() as i64
    }
}

impl Model for LostSales {
    type State = LostSalesState;
    type Event = i64;

    fn type_identifier(&self) -> &'static str {
        "lost_sales"
    }

    fn config(&self) -> VarGroup {
        self.resolved.clone()
    }

    fn discount_factor(&self) -> f64 {
        self.discount_factor
    }

    fn horizon(&self) -> HorizonType {
        HorizonType::Infinite
    }

    fn num_valid_actions(&self) -> usize {
        self.max_order + 1
    }

    fn num_flat_features(&self) -> Option<usize> {
        Some(1 + self.leadtime)
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> LostSalesState {
        LostSalesState {
            on_hand: self.initial_on_hand,
            pipeline: vec![0; self.leadtime],
            awaiting_action: true,
        }
    }

    fn state_category(&self, state: &LostSalesState) -> StateCategory {
        if state.awaiting_action {
            StateCategory::await_action()
        } else {
            StateCategory::await_event()
        }
    }

    fn is_allowed_action(&self, _state: &LostSalesState, action: usize) -> bool {
        action <= self.max_order
    }

    fn modify_state_with_action(&self, state: &mut LostSalesState, action: usize) -> f64 {
        state.pipeline.push(action as i64);
        state.awaiting_action = false;
        0.0
    }

    fn get_event(&self, _state: &LostSalesState, rng: &mut ChaCha8Rng) -> i64 {
        match &self.demand {
            Demand::Poisson(dist) => dist.sample(rng) as i64,
            Demand::Constant(d) => *d,
        }
    }

    fn modify_state_with_event(&self, state: &mut LostSalesState, demand: &i64) -> f64 {
        if !state.pipeline.is_empty() {
            state.on_hand += state.pipeline.remove(0);
        }
        let sales = state.on_hand.min(*demand);
        let lost = *demand - sales;
        state.on_hand -= sales;
        state.awaiting_action = true;
        self.holding_cost * state.on_hand as f64 + self.penalty_cost * lost as f64
    }

    fn write_flat_features(&self, state: &LostSalesState, out: &mut [f32]) -> Result<()> {
        out[0] = state.on_hand as f32;
        for (slot, q) in out[1..].iter_mut().zip(state.pipeline.iter()) {
            *slot = *q as f32;
        }
        Ok(())
    }

    fn heuristic_ids(&self) -> Vec<&'static str> {
        vec!["base_stock"]
    }

    fn heuristic(&self, id: &str, config: &VarGroup) -> Result<Option<Box<dyn Heuristic<Self>>>> {
        if id != "base_stock" {
            return Ok(None);
        }
        let level: i64 = config.get_or("base_stock_level", self.default_base_stock_level())?;
        if level < 0 {
            return Err(EngineError::config("base_stock: base_stock_level must be >= 0"));
        }
        Ok(Some(Box::new(BaseStock { level })))
    }
}

/// Order up to `level` in inventory position, capped by max_order.
struct BaseStock {
    level: i64,
}

impl Heuristic<LostSales> for BaseStock {
    fn action(&self, model: &LostSales, state: &LostSalesState, _rng: &mut ChaCha8Rng) -> usize {
        let gap = (self.level - state.inventory_position()).max(0) as usize;
        gap.min(model.max_order)
    }
}
