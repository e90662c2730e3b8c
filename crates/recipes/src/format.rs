//! Raw serde model of the recipe file format
//!
//! This layer mirrors what recipe authors may write; it accepts every
//! shape the format allows and nothing else. Normalization into the
//! canonical [`crate::Recipe`] happens in `recipe.rs`.

use serde::Deserialize;
use std::collections::BTreeMap;

/// A value that may be written as one item or a list of items
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// `[package]` table
#[derive(Debug, Clone, Deserialize)]
pub struct RawPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub variant: Option<String>,
    /// Extra metadata (description, homepage, ...) kept verbatim
    #[serde(flatten)]
    pub rest: toml::Table,
}

/// A source: bare URL string or detailed table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSource {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default, alias = "checksum")]
        integrity: Option<String>,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        optional: Option<bool>,
    },
}

/// A patch: bare path string or detailed table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPatch {
    Path(String),
    Detailed {
        path: String,
        #[serde(default, alias = "strip_level")]
        strip: Option<u32>,
        #[serde(default)]
        stage: Option<String>,
    },
}

/// Dependencies: a bare list (all runtime) or categorized tables
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDependencies {
    Simple(Vec<String>),
    Categorized {
        #[serde(default)]
        build: Vec<String>,
        #[serde(default)]
        runtime: Vec<String>,
    },
}

/// The whole recipe document as written
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecipe {
    pub package: RawPackage,
    /// `source` and `sources` are synonyms
    #[serde(default, alias = "source")]
    pub sources: Option<OneOrMany<RawSource>>,
    #[serde(default)]
    pub patches: Option<OneOrMany<RawPatch>>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Stage name -> single command or list of commands
    #[serde(default)]
    pub hooks: BTreeMap<String, OneOrMany<String>>,
    #[serde(default)]
    pub build: Option<OneOrMany<String>>,
    #[serde(default)]
    pub install: Option<OneOrMany<String>>,
    #[serde(default)]
    pub dependencies: Option<RawDependencies>,
    #[serde(default)]
    pub options: toml::Table,
    /// Unknown top-level keys, preserved for round-tripping
    #[serde(flatten)]
    pub rest: toml::Table,
}
