//! Tool System - tool specifications and the schema registry

mod definition;
mod registry;

pub use definition::{ParamSpec, ParamType, ToolSpec};
pub use registry::{RegistryError, ToolRegistry, ValidationError};
