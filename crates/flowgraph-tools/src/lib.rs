pub mod binding;
pub mod builtin;
pub mod function;
pub mod registry;
pub mod validation;

pub use binding::BoundTool;
pub use builtin::plan::{MarkStepDoneTool, PlanStatusTool};
pub use function::FunctionTool;
pub use registry::{invoke, ToolRegistry};
pub use validation::validate_arguments;
