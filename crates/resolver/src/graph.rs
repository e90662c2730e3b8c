//! Dependency graph ordering

use portforge_errors::{Error, ResolveError};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Directed dependency graph over package names
///
/// Edges point from a package to the packages it depends on.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its in-graph dependencies
    pub fn add_node(&mut self, name: impl Into<String>, deps: Vec<String>) {
        self.nodes.insert(name.into(), deps);
    }

    /// Find a dependency cycle, if any, returning the path along it
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in self.nodes.keys() {
            if !visited.contains(name) {
                if let Some(cycle) = self.cycle_from(name, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_from(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(name.to_string());
        stack.push(name.to_string());

        for dep in self.nodes.get(name).map_or(&[][..], Vec::as_slice) {
            if let Some(pos) = stack.iter().position(|n| n == dep) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep) && self.nodes.contains_key(dep) {
                if let Some(cycle) = self.cycle_from(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }

    /// Deterministic topological order
    ///
    /// Nodes are ranked by dependency depth (leaves first); ties at the
    /// same depth are broken by name ascending.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::DependencyCycle`] when the graph is
    /// cyclic.
    pub fn topological_order(&self) -> Result<Vec<String>, Error> {
        if let Some(cycle) = self.find_cycle() {
            return Err(ResolveError::DependencyCycle {
                path: cycle.join(" -> "),
            }
            .into());
        }

        let mut depths: HashMap<String, usize> = HashMap::new();
        for name in self.nodes.keys() {
            self.depth_of(name, &mut depths);
        }

        let mut order: Vec<&String> = self.nodes.keys().collect();
        order.sort_by(|a, b| depths[*a].cmp(&depths[*b]).then_with(|| a.cmp(b)));
        Ok(order.into_iter().cloned().collect())
    }

    fn depth_of(&self, name: &str, depths: &mut HashMap<String, usize>) -> usize {
        if let Some(&depth) = depths.get(name) {
            return depth;
        }
        let depth = self
            .nodes
            .get(name)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .filter(|dep| self.nodes.contains_key(*dep))
            .map(|dep| self.depth_of(dep, depths) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(name.to_string(), depth);
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaves_first_name_tie_break() {
        let mut graph = DependencyGraph::new();
        graph.add_node("app", vec!["libb".to_string(), "liba".to_string()]);
        graph.add_node("liba", vec![]);
        graph.add_node("libb", vec![]);

        let order = graph.topological_order().unwrap();
        assert_eq!(order, ["liba", "libb", "app"]);
    }

    #[test]
    fn test_chain_depth() {
        let mut graph = DependencyGraph::new();
        graph.add_node("c", vec!["b".to_string()]);
        graph.add_node("b", vec!["a".to_string()]);
        graph.add_node("a", vec![]);

        assert_eq!(graph.topological_order().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", vec!["b".to_string()]);
        graph.add_node("b", vec!["a".to_string()]);

        let err = graph.topological_order().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cycle"));
        assert!(message.contains("a -> b") || message.contains("b -> a"));
    }

    #[test]
    fn test_edges_to_absent_nodes_ignored() {
        // deps already satisfied by installed packages are not graph nodes
        let mut graph = DependencyGraph::new();
        graph.add_node("app", vec!["installed-lib".to_string()]);

        assert_eq!(graph.topological_order().unwrap(), ["app"]);
    }
}
