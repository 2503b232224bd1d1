pub mod command;
mod registry;

pub use command::{format_outcome, CommandTool};
pub use registry::{json_schema_object, json_schema_parameter, Tool, ToolRegistry};
