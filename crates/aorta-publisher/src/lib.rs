pub mod normalize;
pub mod orchestrator;
pub mod state_machine;

pub use normalize::{normalize, IdentityCleaner, PropertyCleaner};
pub use orchestrator::{flush, pick_random, spawn_beat, OrchestratorConfig, OutboundLink, ShutdownHandle};
pub use state_machine::PublisherStateMachine;
