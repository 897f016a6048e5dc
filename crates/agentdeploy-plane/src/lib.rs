//! Remote control plane abstraction for agentdeploy
//!
//! Provides the `ControlPlane` and `PolicyStore` traits, an HTTP backend and
//! a simulated in-memory backend.

pub mod http;
pub mod memory;
pub mod plane;
pub mod types;

pub use http::{HttpControlPlane, HttpPolicyStore};
pub use memory::{PlaneCall, SimAgent, SimulatedPlane, SimulatedPolicyStore};
pub use plane::{ControlPlane, PlaneError, PlaneResult, PolicyStore};
pub use types::*;
