use std::collections::HashMap;
use std::fmt::Write as _;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use petgraph::Direction;

use crate::error::GraphError;
use crate::model::TaskId;

/// Type alias for our DAG graph.
/// - Node weight: the task id
/// - Edge weight: () ; an edge (from, to) means "from must finish before to"
pub type Graph = DiGraph<TaskId, ()>;

/// Validated dependency graph.
///
/// Node indices match registration order, so the scheduler can address tasks
/// by position.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: Graph,
    index_by_id: HashMap<TaskId, NodeIndex>,
    order: Vec<NodeIndex>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build the graph from `(task, dependencies)` pairs.
    ///
    /// Fails on duplicate ids, dependencies that name no registered task, and
    /// cycles.
    pub fn build<'a, I>(tasks: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (&'a TaskId, &'a [TaskId])>,
    {
        let tasks: Vec<(&TaskId, &[TaskId])> = tasks.into_iter().collect();
        let mut graph = Graph::with_capacity(tasks.len(), tasks.len());
        let mut index_by_id: HashMap<TaskId, NodeIndex> = HashMap::with_capacity(tasks.len());

        // 1. Add all tasks as nodes
        for (id, _) in &tasks {
            let idx = graph.add_node((*id).clone());
            if index_by_id.insert((*id).clone(), idx).is_some() {
                return Err(GraphError::DuplicateTask((*id).clone()));
            }
        }

        // 2. Resolve every dependency to a node before touching edges
        let mut adjacency: Vec<Vec<NodeIndex>> = Vec::with_capacity(tasks.len());
        for (id, dependencies) in &tasks {
            let mut resolved = Vec::with_capacity(dependencies.len());
            for dependency in dependencies.iter() {
                let dep_idx = index_by_id.get(dependency).ok_or_else(|| {
                    GraphError::UnknownDependency {
                        task: (*id).clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                resolved.push(*dep_idx);
            }
            adjacency.push(resolved);
        }

        // 3. Reject cycles, naming the members
        if let Some(cycle) = find_cycle(&adjacency) {
            return Err(GraphError::CyclicDependency {
                cycle: cycle.into_iter().map(|idx| graph[idx].clone()).collect(),
            });
        }

        // 4. Edges point from dependency to dependent
        for (task_pos, dependencies) in adjacency.iter().enumerate() {
            for dep_idx in dependencies {
                graph.add_edge(*dep_idx, NodeIndex::new(task_pos), ());
            }
        }

        let mut order = Vec::with_capacity(graph.node_count());
        let mut topo = Topo::new(&graph);
        while let Some(node_idx) = topo.next(&graph) {
            order.push(node_idx);
        }

        Ok(Self {
            graph,
            index_by_id,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_by_id.contains_key(id)
    }

    /// Tasks that list `id` as a dependency.
    pub fn dependents(&self, id: &str) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Tasks `id` depends on.
    pub fn dependencies(&self, id: &str) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&TaskId> {
        let Some(idx) = self.index_by_id.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<&TaskId> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| &self.graph[n])
            .collect();
        ids.sort();
        ids
    }

    /// One valid execution order (dependencies before dependents).
    pub fn topological_order(&self) -> impl Iterator<Item = &TaskId> {
        self.order.iter().map(|idx| &self.graph[*idx])
    }

    pub(crate) fn dependents_at(&self, pos: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(pos), Direction::Outgoing)
            .map(|n| n.index())
    }

    pub(crate) fn dependency_count_at(&self, pos: usize) -> usize {
        self.graph
            .neighbors_directed(NodeIndex::new(pos), Direction::Incoming)
            .count()
    }

    /// Human-readable plan: counts and a topological order.
    pub fn render_plan(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Task count      : {}", self.len());
        let _ = writeln!(out, "Dependency edges: {}", self.edge_count());
        let _ = writeln!(out);
        let _ = writeln!(out, "One possible topological order (respecting dependencies):");
        for id in self.topological_order() {
            let deps = self.dependencies(id.as_str());
            if deps.is_empty() {
                let _ = writeln!(out, "  - {id}");
            } else {
                let deps: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
                let _ = writeln!(out, "  - {id}  <- {}", deps.join(", "));
            }
        }
        out
    }
}

/// Depth-first search with three-color marking over `task -> dependencies`
/// adjacency. Returns the members of the first cycle found, in the order the
/// traversal entered them.
fn find_cycle(adjacency: &[Vec<NodeIndex>]) -> Option<Vec<NodeIndex>> {
    let mut marks = vec![Mark::Unvisited; adjacency.len()];
    // (node, next dependency to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..adjacency.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::InProgress;
        stack.push((start, 0));

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            let Some(dep) = adjacency[node].get(*next).map(|d| d.index()) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            *next += 1;

            match marks[dep] {
                Mark::Unvisited => {
                    marks[dep] = Mark::InProgress;
                    stack.push((dep, 0));
                }
                Mark::InProgress => {
                    let from = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    return Some(
                        stack[from..]
                            .iter()
                            .map(|(n, _)| NodeIndex::new(*n))
                            .collect(),
                    );
                }
                Mark::Done => {}
            }
        }
    }
    None
}
