//! stress-remote: cluster adapters for policy-stress.
//!
//! Each adapter implements one or more of the collaborator traits from
//! [`stress_core::cluster`] by shelling out to the same tools an operator
//! would use by hand: `kubectl`, `ssh`, and `helm`.

pub mod helm;
pub mod kubectl;
mod process;

pub use helm::HelmDeployer;
pub use kubectl::Kubectl;
