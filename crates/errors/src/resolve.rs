//! Dependency resolution errors

use thiserror::Error;

/// Errors from the constraint resolver
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("no package named {name} in the recipe index")]
    UnknownPackage { name: String },

    #[error(
        "unsatisfiable constraint `{constraint}` (candidates considered: [{candidates}]; \
         partial assignment: {assignment})"
    )]
    Unsatisfiable {
        constraint: String,
        candidates: String,
        assignment: String,
    },

    #[error("dependency cycle: {path}")]
    DependencyCycle { path: String },

    #[error("package {name} is required by: {dependents}")]
    HasDependents { name: String, dependents: String },
}
