//! Shared test utilities for the policy-stress harnesses.
//!
//! Import everything you need via `mod common; use common::*;` at the top of
//! each harness file.

#![allow(dead_code)]

pub mod assertions;
pub mod builders;
pub mod fake_cluster;
pub mod fixtures;

pub use builders::*;
pub use fake_cluster::*;
pub use fixtures::*;
