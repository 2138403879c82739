//! Project dependency graph.

use std::sync::Arc;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::ids::ProjectId;

/// Immutable graph of project references. An edge `a -> b` means project
/// `a` references project `b`.
///
/// References to projects that are not in the solution have no edge.
#[derive(Debug, Clone, Default)]
pub struct ProjectDependencyGraph {
    graph: Arc<DiGraphMap<ProjectId, ()>>,
}

impl ProjectDependencyGraph {
    /// Build the graph from each project's referenced project ids.
    pub fn from_projects<'a, I, R>(projects: I) -> Self
    where
        I: IntoIterator<Item = (ProjectId, R)> + Clone,
        R: IntoIterator<Item = &'a ProjectId>,
    {
        let mut graph = DiGraphMap::new();
        for (id, _) in projects.clone() {
            graph.add_node(id);
        }
        for (id, references) in projects {
            for referenced in references {
                if graph.contains_node(*referenced) {
                    graph.add_edge(id, *referenced, ());
                }
            }
        }
        Self {
            graph: Arc::new(graph),
        }
    }

    pub fn contains(&self, project: ProjectId) -> bool {
        self.graph.contains_node(project)
    }

    /// Whether a reference `from -> to` would close a cycle.
    pub fn would_create_cycle(&self, from: ProjectId, to: ProjectId) -> bool {
        from == to
            || (self.graph.contains_node(to)
                && self.graph.contains_node(from)
                && has_path_connecting(&*self.graph, to, from, None))
    }

    /// Replace the outgoing references of `project`.
    pub(crate) fn with_references(
        &self,
        project: ProjectId,
        references: &[ProjectId],
    ) -> Result<Self> {
        let mut graph = (*self.graph).clone();
        let existing: Vec<ProjectId> = graph
            .neighbors_directed(project, Direction::Outgoing)
            .collect();
        for referenced in existing {
            graph.remove_edge(project, referenced);
        }
        for referenced in references {
            if !graph.contains_node(*referenced) {
                continue;
            }
            if *referenced == project || has_path_connecting(&graph, *referenced, project, None) {
                return Err(Error::CyclicReference(format!(
                    "{} -> {} closes a cycle",
                    project, referenced
                )));
            }
            graph.add_edge(project, *referenced, ());
        }
        Ok(Self {
            graph: Arc::new(graph),
        })
    }

    pub fn direct_dependencies(&self, project: ProjectId) -> Vec<ProjectId> {
        if !self.graph.contains_node(project) {
            return Vec::new();
        }
        self.graph
            .neighbors_directed(project, Direction::Outgoing)
            .collect()
    }

    pub fn direct_dependents(&self, project: ProjectId) -> Vec<ProjectId> {
        if !self.graph.contains_node(project) {
            return Vec::new();
        }
        self.graph
            .neighbors_directed(project, Direction::Incoming)
            .collect()
    }

    /// Every project `project` depends on, directly or not. Excludes itself.
    pub fn transitive_dependencies(&self, project: ProjectId) -> Vec<ProjectId> {
        if !self.graph.contains_node(project) {
            return Vec::new();
        }
        let mut result = Vec::new();
        let mut dfs = Dfs::new(&*self.graph, project);
        while let Some(node) = dfs.next(&*self.graph) {
            if node != project {
                result.push(node);
            }
        }
        result
    }

    /// Every project that depends on `project`, directly or not. Excludes
    /// itself.
    pub fn transitive_dependents(&self, project: ProjectId) -> Vec<ProjectId> {
        if !self.graph.contains_node(project) {
            return Vec::new();
        }
        let reversed = Reversed(&*self.graph);
        let mut result = Vec::new();
        let mut dfs = Dfs::new(reversed, project);
        while let Some(node) = dfs.next(reversed) {
            if node != project {
                result.push(node);
            }
        }
        result
    }

    /// Projects ordered so that every project comes after its dependencies.
    pub fn topologically_sorted(&self) -> Result<Vec<ProjectId>> {
        let mut order = toposort(&*self.graph, None).map_err(|cycle| {
            Error::CyclicReference(format!("cycle through {}", cycle.node_id()))
        })?;
        order.reverse();
        Ok(order)
    }
}
