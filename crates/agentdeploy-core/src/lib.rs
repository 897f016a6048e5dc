//! agentdeploy core - types, descriptors, settings and error handling

pub mod config;
pub mod descriptor;
pub mod error;
pub mod state_machine;
pub mod types;

pub use config::Settings;
pub use descriptor::DescriptorSet;
pub use error::{Error, Result};
pub use state_machine::{allowed_transitions, validate_transition};
pub use types::*;
