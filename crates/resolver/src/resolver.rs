//! Backtracking constraint resolution

use crate::graph::DependencyGraph;
use crate::plan::{BuildPlan, PlanEntry};
use portforge_errors::{Error, ResolveError};
use portforge_recipes::{RecipeKey, RecipeStore};
use portforge_types::{PackageSpec, Version, VersionSpec};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Resolves constraint requests against the recipe index
///
/// Candidates are tried in descending version order; constraints on
/// the same name are intersected. Packages already installed in a
/// satisfying version are pruned from the plan unless marked for
/// rebuild.
pub struct Resolver<'a> {
    store: &'a RecipeStore,
    installed: HashMap<String, Version>,
    rebuild: HashSet<String>,
    deps_cache: HashMap<RecipeKey, Vec<PackageSpec>>,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(store: &'a RecipeStore, installed: HashMap<String, Version>) -> Self {
        Self {
            store,
            installed,
            rebuild: HashSet::new(),
            deps_cache: HashMap::new(),
        }
    }

    /// Force these packages into the plan even when installed and
    /// satisfied
    #[must_use]
    pub fn with_rebuild(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.rebuild = names.into_iter().collect();
        self
    }

    /// Resolve a request set into an ordered build plan
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unsatisfiable`] with the dead-end
    /// constraint and partial assignment when no assignment exists,
    /// [`ResolveError::DependencyCycle`] on a cycle, and
    /// [`ResolveError::UnknownPackage`] for names absent from the
    /// index.
    pub fn resolve(&mut self, requests: &[PackageSpec]) -> Result<BuildPlan, Error> {
        let mut constraints: BTreeMap<String, VersionSpec> = BTreeMap::new();
        let mut pending: Vec<String> = Vec::new();
        for request in requests {
            merge_constraint(&mut constraints, &request.name, &request.spec);
            if !pending.contains(&request.name) {
                pending.push(request.name.clone());
            }
        }

        let (chosen, constraints) = self.solve(pending, BTreeMap::new(), constraints)?;
        debug!(packages = chosen.len(), "assignment found");

        // induced graph over the packages that actually need building
        let mut graph = DependencyGraph::new();
        for name in chosen.keys() {
            let key = self.key_for(name, &chosen[name]);
            let deps = self.deps_of(&key)?;
            let in_plan: Vec<String> = deps
                .iter()
                .map(|d| d.name.clone())
                .filter(|dep| chosen.contains_key(dep))
                .collect();
            graph.add_node(name.clone(), in_plan);
        }

        let order = graph.topological_order()?;
        let entries = order
            .into_iter()
            .map(|name| {
                let key = self.key_for(&name, &chosen[&name]);
                let constraints = constraints
                    .get(&name)
                    .map(|spec| {
                        spec.constraints()
                            .iter()
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                PlanEntry { key, constraints }
            })
            .collect();

        Ok(BuildPlan { entries })
    }

    fn solve(
        &mut self,
        mut pending: Vec<String>,
        chosen: BTreeMap<String, Version>,
        constraints: BTreeMap<String, VersionSpec>,
    ) -> Result<(BTreeMap<String, Version>, BTreeMap<String, VersionSpec>), Error> {
        let name = loop {
            let Some(name) = pending.first().cloned() else {
                return Ok((chosen, constraints));
            };
            pending.remove(0);

            let spec = constraints.get(&name).cloned().unwrap_or_else(VersionSpec::any);

            if let Some(version) = chosen.get(&name) {
                if spec.matches(version) {
                    continue;
                }
                return Err(self.dead_end(&name, &spec, &chosen));
            }
            if !self.rebuild.contains(&name) {
                if let Some(version) = self.installed.get(&name) {
                    if spec.matches(version) {
                        // satisfied by a prior installation; not planned
                        continue;
                    }
                }
            }
            break name;
        };

        let spec = constraints.get(&name).cloned().unwrap_or_else(VersionSpec::any);
        let candidates = self.candidates(&name, &spec)?;
        if candidates.is_empty() {
            return Err(self.dead_end(&name, &spec, &chosen));
        }

        let mut last_failure = None;
        for key in candidates {
            let mut next_chosen = chosen.clone();
            next_chosen.insert(name.clone(), key.version.clone());
            let mut next_constraints = constraints.clone();
            let mut next_pending = pending.clone();

            let deps = self.deps_of(&key)?;
            let mut conflict = None;
            for dep in deps {
                merge_constraint(&mut next_constraints, &dep.name, &dep.spec);
                if let Some(version) = next_chosen.get(&dep.name) {
                    if !next_constraints[&dep.name].matches(version) {
                        conflict = Some(dep.name.clone());
                        break;
                    }
                }
                next_pending.push(dep.name);
            }
            if let Some(dep_name) = conflict {
                let spec = next_constraints[&dep_name].clone();
                last_failure = Some(self.dead_end(&dep_name, &spec, &next_chosen));
                continue;
            }

            match self.solve(next_pending, next_chosen, next_constraints) {
                Ok(solution) => return Ok(solution),
                Err(err) if is_dead_end(&err) => last_failure = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(last_failure.unwrap_or_else(|| self.dead_end(&name, &spec, &chosen)))
    }

    /// Keys matching `spec`, descending by version, one per version
    fn candidates(&self, name: &str, spec: &VersionSpec) -> Result<Vec<RecipeKey>, Error> {
        let all = self.store.candidates(name);
        if all.is_empty() && !self.installed.contains_key(name) {
            return Err(ResolveError::UnknownPackage {
                name: name.to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        Ok(all
            .into_iter()
            .filter(|key| spec.matches(&key.version))
            .filter(|key| seen.insert(key.version.clone()))
            .collect())
    }

    fn key_for(&self, name: &str, version: &Version) -> RecipeKey {
        self.store
            .candidates(name)
            .into_iter()
            .find(|key| &key.version == version)
            .unwrap_or_else(|| RecipeKey {
                name: name.to_string(),
                version: version.clone(),
                variant: None,
            })
    }

    /// build ∪ runtime dependencies of one recipe, parsed and cached
    fn deps_of(&mut self, key: &RecipeKey) -> Result<Vec<PackageSpec>, Error> {
        if let Some(deps) = self.deps_cache.get(key) {
            return Ok(deps.clone());
        }

        let loaded = self.store.load(key, &BTreeMap::new())?;
        let deps = loaded
            .recipe
            .dependencies
            .all()
            .into_iter()
            .map(PackageSpec::parse)
            .collect::<Result<Vec<_>, _>>()?;

        self.deps_cache.insert(key.clone(), deps.clone());
        Ok(deps)
    }

    fn dead_end(
        &self,
        name: &str,
        spec: &VersionSpec,
        chosen: &BTreeMap<String, Version>,
    ) -> Error {
        let candidates = self
            .store
            .candidates(name)
            .iter()
            .map(|key| key.version.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let assignment = if chosen.is_empty() {
            "(empty)".to_string()
        } else {
            chosen
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let constraint = if spec.is_any() {
            name.to_string()
        } else {
            format!("{name}{spec}")
        };
        ResolveError::Unsatisfiable {
            constraint,
            candidates,
            assignment,
        }
        .into()
    }
}

fn merge_constraint(
    constraints: &mut BTreeMap<String, VersionSpec>,
    name: &str,
    spec: &VersionSpec,
) {
    match constraints.get_mut(name) {
        Some(existing) => *existing = existing.intersect(spec),
        None => {
            constraints.insert(name.to_string(), spec.clone());
        }
    }
}

fn is_dead_end(err: &Error) -> bool {
    matches!(
        err,
        Error::Resolve(ResolveError::Unsatisfiable { .. })
    )
}
