//! Naming of the solver variables introduced by the causal model.

use sleuth_trace::window::EventIdx;

/// Integer order variable of an event.
pub fn order_var(event: EventIdx) -> String {
    format!("o{event}")
}

/// Boolean standing for the concrete feasibility of the block opened by `read`.
pub fn conc_var(read: EventIdx) -> String {
    format!("phi{read}")
}

/// Inverse of [`order_var`].
pub fn parse_order_var(name: &str) -> Option<EventIdx> {
    name.strip_prefix('o')?.parse().ok()
}
