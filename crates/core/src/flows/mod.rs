pub mod engine;
pub mod states;

pub use engine::{AgentToolsGraph, GraphDefinition, GraphRouter, GraphTransitionError};
pub use states::{GraphNode, RouteContext, TransitionOutcome, TransitionReason};
