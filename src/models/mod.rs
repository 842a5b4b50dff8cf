// Core data models for procflow
// These structs represent the domain entities

pub mod ids;
pub mod template;
pub mod project;
pub mod stage;

pub use ids::*;
pub use template::*;
pub use project::*;
pub use stage::*;
