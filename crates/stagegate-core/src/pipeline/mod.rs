//! Stage descriptors and the orchestrator that runs them.

pub mod orchestrator;
pub mod stage;

pub use orchestrator::{OrchestrationResult, Orchestrator, RunFailure, SUCCESS_MESSAGE};
pub use stage::{
    ItemFactory, SingleFactory, StageDescriptor, StageKind, StageReport, StageState,
    DEFAULT_ITEM_KEY,
};
