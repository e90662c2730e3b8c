#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Dependency resolution for portforge
//!
//! Turns a set of constraint requests into a deterministic,
//! topologically ordered build plan, or a conflict with enough context
//! to diagnose it. Also answers reverse-dependency and orphan queries
//! against the state database.

pub mod graph;
pub mod plan;
pub mod queries;
pub mod resolver;

pub use graph::DependencyGraph;
pub use plan::{BuildPlan, PlanEntry};
pub use queries::{depclean, revdep};
pub use resolver::Resolver;
