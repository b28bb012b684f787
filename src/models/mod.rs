// src/models/mod.rs
//
// Reference models used by the harness and the test-suite.

pub mod countdown;
pub mod lost_sales;

use crate::registry::Registry;

pub use countdown::{Countdown, CountdownState};
pub use lost_sales::{LostSales, LostSalesState};

/// Register every reference model under its type identifier.
pub fn register_all(registry: &mut Registry) {
    registry.register(
        "lost_sales",
        "lost-sales inventory with lead time (infinite horizon)",
        LostSales::from_config,
    );
    registry.register(
        "countdown",
        "fixed-length chain with action penalty and event noise (finite horizon)",
        Countdown::from_config,
    );
}
