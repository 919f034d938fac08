/// State-machine interface between consensus and the execution layer

pub mod state_machine;

// Re-export for convenience
pub use state_machine::{
    Query, QueryResponse, State, StateError, StateMachine, StateTransition,
};
