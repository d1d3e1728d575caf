//! Bundle dependency resolution.
//!
//! Works over the direct dependency edges of one package's bundles. Used at
//! build time to derive the indirect dependency lists written into the
//! manifest, and at runtime to validate an incoming package before its
//! bundles are registered.

use std::collections::{BTreeSet, HashMap, VecDeque};

use petgraph::{algo, graph::NodeIndex, Graph};

use crate::{BundleInfo, Error, Result};

/// Resolves transitive bundle dependencies from direct edges.
pub struct DependencyResolver {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyResolver {
    /// Build a resolver from bundle descriptions, keeping only their direct
    /// dependency edges.
    pub fn new<'a>(bundles: impl IntoIterator<Item = &'a BundleInfo>) -> Self {
        let edges = bundles
            .into_iter()
            .map(|b| (b.name.clone(), b.dependencies.clone()))
            .collect();
        Self { edges }
    }

    /// Build a resolver directly from `(bundle, direct dependencies)` pairs.
    pub fn from_edges(edges: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            edges: edges.into_iter().collect(),
        }
    }

    /// Dependency closure of one bundle.
    ///
    /// Non-recursive: the direct dependency set. Recursive: the fixed point
    /// of expanding dependencies-of-dependencies, which terminates even on a
    /// cyclic graph since it is bounded by the bundle count. The bundle
    /// itself is not part of its own closure unless a cycle reaches back to
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBundle`] if `name` is not a known bundle.
    /// Dangling edge targets are tolerated and simply not expanded.
    pub fn closure(&self, name: &str, recursive: bool) -> Result<BTreeSet<String>> {
        let direct = self
            .edges
            .get(name)
            .ok_or_else(|| Error::UnknownBundle(name.to_owned()))?;

        if !recursive {
            return Ok(direct.iter().cloned().collect());
        }

        let mut result = BTreeSet::new();
        let mut queue: VecDeque<String> = direct.iter().cloned().collect();

        while let Some(bundle) = queue.pop_front() {
            if result.insert(bundle.clone()) {
                if let Some(deps) = self.edges.get(&bundle) {
                    queue.extend(deps.iter().cloned());
                }
            }
        }

        Ok(result)
    }

    /// Indirect dependencies: the recursive closure minus the direct set,
    /// computed in exactly that order since "indirect" is defined relative
    /// to "direct".
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBundle`] if `name` is not a known bundle.
    pub fn indirect(&self, name: &str) -> Result<BTreeSet<String>> {
        let recursive = self.closure(name, true)?;
        let direct = self.closure(name, false)?;
        Ok(recursive.difference(&direct).cloned().collect())
    }

    /// Reject cyclic dependency graphs with an explicit diagnostic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircularDependency`] naming a bundle on the cycle.
    pub fn detect_cycles(&self) -> Result<()> {
        let mut graph = Graph::<&str, ()>::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for (name, deps) in &self.edges {
            let from = *nodes
                .entry(name.as_str())
                .or_insert_with(|| graph.add_node(name.as_str()));
            for dep in deps {
                let to = *nodes
                    .entry(dep.as_str())
                    .or_insert_with(|| graph.add_node(dep.as_str()));
                graph.add_edge(from, to, ());
            }
        }

        algo::toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| Error::CircularDependency(graph[cycle.node_id()].to_owned()))
    }
}
