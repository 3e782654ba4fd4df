//! Dependency graph between declared resources.
//!
//! Edges come from explicit `depends_on` entries and from `${name.output}`
//! references in inputs. Nodes are logical names, which are unique per stack.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{ConfigError, Result};

use super::interpolate::referenced_resources;
use super::spec::StackConfig;

/// Directed graph of `resource -> dependencies`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds the graph of a stack file.
    ///
    /// Edges to undeclared names are kept so the validator can report them.
    #[must_use]
    pub fn from_config(config: &StackConfig) -> Self {
        Self::from_edges(config.resources.iter().map(|resource| {
            let mut deps: BTreeSet<String> = resource.depends_on.iter().cloned().collect();
            deps.extend(referenced_resources(&resource.inputs));
            (resource.name.clone(), deps)
        }))
    }

    /// Builds a graph from explicit edges.
    #[must_use]
    pub fn from_edges<I, D>(edges: I) -> Self
    where
        I: IntoIterator<Item = (String, D)>,
        D: IntoIterator<Item = String>,
    {
        Self {
            edges: edges
                .into_iter()
                .map(|(name, deps)| (name, deps.into_iter().collect()))
                .collect(),
        }
    }

    /// Returns the node names.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Returns the direct dependencies of a node.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the nodes that directly depend on `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(name))
            .map(|(node, _)| node.as_str())
            .collect()
    }

    /// Returns every `(node, dependency)` pair whose dependency is not a node.
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<(&str, &str)> {
        self.edges
            .iter()
            .flat_map(|(node, deps)| {
                deps.iter()
                    .filter(|dep| !self.edges.contains_key(*dep))
                    .map(move |dep| (node.as_str(), dep.as_str()))
            })
            .collect()
    }

    /// Finds one cycle, returned as the path that closes it.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: &str,
            marks: &mut BTreeMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == node).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(node.to_string(), Mark::Visiting);
            path.push(node.to_string());

            for dep in graph.dependencies(node) {
                if !graph.edges.contains_key(dep) {
                    continue;
                }
                if let Some(cycle) = visit(graph, dep, marks, path) {
                    return Some(cycle);
                }
            }

            path.pop();
            marks.insert(node.to_string(), Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for node in self.edges.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, node, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Orders nodes so that every node comes after its dependencies.
    ///
    /// Ties are broken by name, so the order is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CircularDependency`] if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(ConfigError::CircularDependency {
                cycle: cycle.join(" -> "),
            }
            .into());
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| {
                let known = deps.iter().filter(|d| self.edges.contains_key(*d)).count();
                (node.as_str(), known)
            })
            .collect();

        let mut ready: VecDeque<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_front() {
            order.push(node.to_string());
            for dependent in self.dependents(node) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        Ok(order)
    }

    /// Returns every node that transitively depends on `name`.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = vec![name];
        while let Some(node) = queue.pop() {
            for dependent in self.dependents(node) {
                if seen.insert(dependent.to_string()) {
                    queue.push(dependent);
                }
            }
        }
        seen
    }
}
