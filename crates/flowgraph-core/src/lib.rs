pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod plan;
pub mod traits;
pub mod types;

pub use config::FlowConfig;
pub use error::{FlowError, Result, StructuralError};
pub use event::{EventBus, WorkflowEvent};
pub use memory::{Entry, EntryKind, EntryMetadata, Memory};
pub use plan::{ExecutionPlan, Step};
pub use types::*;

/// Literal target name that terminates a run when routed to.
pub const END: &str = "end";
