//! Recipe parsing and validation errors

use thiserror::Error;

/// Errors raised while parsing, validating, or expanding recipes
#[derive(Debug, Clone, Error)]
pub enum RecipeError {
    #[error("failed to parse recipe: {message}")]
    ParseError { message: String },

    #[error("recipe {path} is missing required field `{field}`")]
    MissingField { path: String, field: String },

    #[error("recipe {path} declares no sources and is not marked meta")]
    NoSources { path: String },

    #[error("duplicate recipe for {name}-{version} (variant {variant}): {first} and {second}")]
    DuplicateRecipe {
        name: String,
        version: String,
        variant: String,
        first: String,
        second: String,
    },

    #[error("recipe not found: {name}-{version}")]
    NotFound { name: String, version: String },

    #[error("invalid source entry in {path}: {message}")]
    InvalidSource { path: String, message: String },

    #[error("unknown hook stage `{stage}` in {path}")]
    UnknownHookStage { path: String, stage: String },
}
