//! Flow engine: the transition table and the pure planner.

pub mod flow;
pub mod table;

#[cfg(test)]
#[allow(clippy::panic)]
mod proptests;

pub use flow::{FlowPolicy, StatePatch, TransitionPlan, opening_message, plan};
pub use table::{EDGES, Edge, is_edge, legal_commands};
