//! Resolver output

use portforge_recipes::RecipeKey;
use std::fmt;

/// One entry of a build plan
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// The recipe chosen for this package
    pub key: RecipeKey,
    /// The accumulated constraints that pinned the choice
    pub constraints: Vec<String>,
}

/// Topologically ordered list of recipes to build
///
/// For every entry, all of its build and runtime dependencies either
/// appear earlier in the plan or were already installed and satisfied
/// their constraints at resolve time.
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub entries: Vec<PlanEntry>,
}

impl BuildPlan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in plan order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.name.as_str()).collect()
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", entry.key)?;
        }
        Ok(())
    }
}
