pub mod catalog;
pub mod introspector;
pub mod orchestrator;
pub mod pool_manager;
pub mod resolver;
pub mod safety_gate;
pub mod tokens;
pub mod vault;
