//! Bidirectional dependency graph between cells.
//!
//! Terminology:
//! - dependencies: cells a formula reads (if A3 = A1 + A2, A3 depends on A1 and A2)
//! - dependents: the reverse lookup (A1's dependents contain A3)
//!
//! Edges are always stored in both directions. A node exists only while it has
//! at least one edge; edge-less nodes are pruned. The graph also owns the dirty
//! set and a memoized topological order that any edge mutation discards.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::trace;

use super::cell_ref::CellRef;
use super::cycle;

#[derive(Debug, Default, Clone)]
struct GraphNode {
    dependents: HashSet<CellRef>,
    dependencies: HashSet<CellRef>,
}

impl GraphNode {
    fn is_isolated(&self) -> bool {
        self.dependents.is_empty() && self.dependencies.is_empty()
    }
}

/// Summary numbers for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    /// Average number of dependencies per node.
    pub avg_fan_in: f64,
    /// Average number of dependents per node.
    pub avg_fan_out: f64,
    pub max_fan_in: usize,
    pub max_fan_out: usize,
    pub has_cycle: bool,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<CellRef, GraphNode>,
    dirty: HashSet<CellRef>,
    topo_order: OnceCell<Vec<CellRef>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `cell` depends on `depends_on`.
    pub fn add_dependency(&mut self, cell: CellRef, depends_on: CellRef) {
        let added = self
            .nodes
            .entry(cell)
            .or_default()
            .dependencies
            .insert(depends_on);
        self.nodes
            .entry(depends_on)
            .or_default()
            .dependents
            .insert(cell);
        if added {
            self.topo_order.take();
        }
    }

    pub fn remove_dependency(&mut self, cell: CellRef, depends_on: CellRef) {
        let mut removed = false;
        if let Some(node) = self.nodes.get_mut(&cell) {
            removed = node.dependencies.remove(&depends_on);
        }
        if let Some(node) = self.nodes.get_mut(&depends_on) {
            node.dependents.remove(&cell);
        }
        self.prune(&cell);
        self.prune(&depends_on);
        if removed {
            self.topo_order.take();
        }
    }

    /// Replace all of `cell`'s outgoing edges with `new_deps`.
    pub fn update_dependencies(
        &mut self,
        cell: CellRef,
        new_deps: impl IntoIterator<Item = CellRef>,
    ) {
        let new_deps: HashSet<CellRef> = new_deps.into_iter().collect();
        let old_deps: HashSet<CellRef> = self
            .nodes
            .get(&cell)
            .map(|node| node.dependencies.clone())
            .unwrap_or_default();
        if old_deps == new_deps {
            return;
        }

        for dep in old_deps.difference(&new_deps) {
            if let Some(node) = self.nodes.get_mut(dep) {
                node.dependents.remove(&cell);
            }
            self.prune(dep);
        }
        for dep in new_deps.difference(&old_deps) {
            self.nodes.entry(*dep).or_default().dependents.insert(cell);
        }
        if new_deps.is_empty() {
            if let Some(node) = self.nodes.get_mut(&cell) {
                node.dependencies.clear();
            }
            self.prune(&cell);
        } else {
            self.nodes.entry(cell).or_default().dependencies = new_deps;
        }
        self.topo_order.take();
        trace!(%cell, "dependencies updated");
    }

    /// Drop a cell's outgoing edges. Cells that still reference it keep their edges.
    pub fn remove_cell(&mut self, cell: CellRef) {
        self.update_dependencies(cell, std::iter::empty());
    }

    fn prune(&mut self, cell: &CellRef) {
        if self.nodes.get(cell).is_some_and(GraphNode::is_isolated) {
            self.nodes.remove(cell);
        }
    }

    /// Cells that directly reference `cell`.
    pub fn dependents(&self, cell: &CellRef) -> impl Iterator<Item = &CellRef> {
        self.nodes
            .get(cell)
            .into_iter()
            .flat_map(|node| node.dependents.iter())
    }

    /// Cells that `cell` directly references.
    pub fn direct_dependencies(&self, cell: &CellRef) -> impl Iterator<Item = &CellRef> {
        self.nodes
            .get(cell)
            .into_iter()
            .flat_map(|node| node.dependencies.iter())
    }

    /// Every cell that transitively depends on `cell`, excluding `cell` itself.
    pub fn all_dependents(&self, cell: &CellRef) -> HashSet<CellRef> {
        self.closure(cell, |node| &node.dependents)
    }

    /// `cells` plus every cell that transitively depends on any of them.
    /// One traversal, however many starting cells there are.
    pub fn downstream_of<'a>(
        &self,
        cells: impl IntoIterator<Item = &'a CellRef>,
    ) -> HashSet<CellRef> {
        let mut seen: HashSet<CellRef> = HashSet::new();
        let mut stack: Vec<CellRef> = cells.into_iter().copied().collect();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            stack.extend(
                self.dependents(&current)
                    .copied()
                    .filter(|d| !seen.contains(d)),
            );
        }
        seen
    }

    /// Every cell `cell` transitively depends on, excluding `cell` itself.
    pub fn all_dependencies(&self, cell: &CellRef) -> HashSet<CellRef> {
        self.closure(cell, |node| &node.dependencies)
    }

    fn closure(
        &self,
        start: &CellRef,
        next: impl Fn(&GraphNode) -> &HashSet<CellRef>,
    ) -> HashSet<CellRef> {
        let mut seen = HashSet::new();
        let mut stack = vec![*start];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for neighbour in next(node) {
                if *neighbour != *start && seen.insert(*neighbour) {
                    stack.push(*neighbour);
                }
            }
        }
        seen
    }

    /// True if a cycle is reachable from `start` by following dependencies.
    pub fn has_circular_dependency(&self, start: &CellRef) -> bool {
        cycle::find_cycle(self, start).is_some()
    }

    /// True if any cycle exists anywhere in the graph.
    pub fn has_cycle(&self) -> bool {
        !self.nodes.is_empty() && self.topological_order().is_empty()
    }

    /// Every node ordered so that each cell follows all cells it depends on.
    /// Empty when the graph contains a cycle. Memoized until the next edge change.
    pub fn topological_order(&self) -> &[CellRef] {
        self.topo_order
            .get_or_init(|| self.order_where(|_| true).unwrap_or_default())
    }

    /// Topological order of the nodes accepted by `include`, considering only
    /// edges between accepted nodes. None if those nodes contain a cycle.
    pub fn order_where(&self, include: impl Fn(&CellRef) -> bool) -> Option<Vec<CellRef>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut roots: Vec<CellRef> = self.nodes.keys().copied().filter(|c| include(c)).collect();
        roots.sort();

        let mut marks: HashMap<CellRef, Mark> = HashMap::with_capacity(roots.len());
        let mut order = Vec::with_capacity(roots.len());

        for root in roots {
            if marks.contains_key(&root) {
                continue;
            }
            // Explicit stack of (cell, sorted dependencies, next index) keeps deep
            // chains off the native stack.
            let mut stack: Vec<(CellRef, Vec<CellRef>, usize)> =
                vec![(root, self.sorted_dependencies(&root, &include), 0)];
            marks.insert(root, Mark::InProgress);

            while let Some((cell, deps, idx)) = stack.last_mut() {
                if let Some(dep) = deps.get(*idx).copied() {
                    *idx += 1;
                    match marks.get(&dep) {
                        Some(Mark::InProgress) => return None,
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep, Mark::InProgress);
                            let dep_deps = self.sorted_dependencies(&dep, &include);
                            stack.push((dep, dep_deps, 0));
                        }
                    }
                } else {
                    let cell = *cell;
                    marks.insert(cell, Mark::Done);
                    order.push(cell);
                    stack.pop();
                }
            }
        }
        Some(order)
    }

    fn sorted_dependencies(
        &self,
        cell: &CellRef,
        include: &impl Fn(&CellRef) -> bool,
    ) -> Vec<CellRef> {
        let mut deps: Vec<CellRef> = self
            .direct_dependencies(cell)
            .copied()
            .filter(|c| include(c))
            .collect();
        deps.sort();
        deps
    }

    pub fn is_dirty(&self, cell: &CellRef) -> bool {
        self.dirty.contains(cell)
    }

    pub fn dirty_cells(&self) -> &HashSet<CellRef> {
        &self.dirty
    }

    pub fn mark_dirty(&mut self, cell: CellRef) {
        self.dirty.insert(cell);
    }

    /// Mark `cell` and every transitive dependent dirty. Returns the marked cells.
    pub fn mark_subgraph_dirty(&mut self, cell: CellRef) -> HashSet<CellRef> {
        let mut marked = self.all_dependents(&cell);
        marked.insert(cell);
        self.dirty.extend(marked.iter().copied());
        marked
    }

    pub fn mark_clean<'a>(&mut self, cells: impl IntoIterator<Item = &'a CellRef>) {
        for cell in cells {
            self.dirty.remove(cell);
        }
    }

    pub fn clear_dirty_flags(&mut self) {
        self.dirty.clear();
    }

    /// Dirty cells in evaluation order. Dirty cells without any edges come
    /// first (row-major); the rest follow the topological order, so the result
    /// has no graph-backed cells at all when the graph contains a cycle.
    pub fn dirty_cells_in_order(&self) -> Vec<CellRef> {
        let mut isolated: Vec<CellRef> = self
            .dirty
            .iter()
            .copied()
            .filter(|c| !self.nodes.contains_key(c))
            .collect();
        isolated.sort();
        isolated.extend(
            self.topological_order()
                .iter()
                .copied()
                .filter(|c| self.dirty.contains(c)),
        );
        isolated
    }

    /// Level 0 for cells with no dependencies, otherwise one more than the
    /// deepest dependency. Cells on the same level can be evaluated
    /// independently. Empty when the graph contains a cycle.
    pub fn calculation_levels(&self) -> HashMap<CellRef, usize> {
        let mut levels = HashMap::with_capacity(self.nodes.len());
        for cell in self.topological_order() {
            let level = self
                .direct_dependencies(cell)
                .filter_map(|dep| levels.get(dep))
                .max()
                .map_or(0, |deepest| deepest + 1);
            levels.insert(*cell, level);
        }
        levels
    }

    pub fn stats(&self) -> GraphStats {
        let node_count = self.nodes.len();
        let edge_count: usize = self.nodes.values().map(|n| n.dependencies.len()).sum();
        let avg = |total: usize| {
            if node_count == 0 {
                0.0
            } else {
                total as f64 / node_count as f64
            }
        };
        let total_dependents: usize = self.nodes.values().map(|n| n.dependents.len()).sum();
        GraphStats {
            node_count,
            edge_count,
            avg_fan_in: avg(edge_count),
            avg_fan_out: avg(total_dependents),
            max_fan_in: self
                .nodes
                .values()
                .map(|n| n.dependencies.len())
                .max()
                .unwrap_or(0),
            max_fan_out: self
                .nodes
                .values()
                .map(|n| n.dependents.len())
                .max()
                .unwrap_or(0),
            has_cycle: self.has_cycle(),
        }
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        self.nodes.contains_key(cell)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn cells(&self) -> impl Iterator<Item = &CellRef> {
        self.nodes.keys()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.dirty.clear();
        self.topo_order.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(id: &str) -> CellRef {
        CellRef::from_str(id).unwrap()
    }

    fn set(ids: &[&str]) -> HashSet<CellRef> {
        ids.iter().map(|id| c(id)).collect()
    }

    fn position(order: &[CellRef], id: &str) -> usize {
        order.iter().position(|x| *x == c(id)).unwrap()
    }

    /// A1 <- B1 <- C1, A1 <- D1
    fn chain() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(c("B1"), c("A1"));
        graph.add_dependency(c("C1"), c("B1"));
        graph.add_dependency(c("D1"), c("A1"));
        graph
    }

    #[test]
    fn test_edges_are_bidirectional() {
        let graph = chain();
        let dependents: HashSet<CellRef> = graph.dependents(&c("A1")).copied().collect();
        assert_eq!(dependents, set(&["B1", "D1"]));
        let deps: HashSet<CellRef> = graph.direct_dependencies(&c("C1")).copied().collect();
        assert_eq!(deps, set(&["B1"]));
    }

    #[test]
    fn test_removing_edges_prunes_nodes() {
        let mut graph = chain();
        graph.remove_dependency(c("D1"), c("A1"));
        assert!(!graph.contains(&c("D1")));
        assert!(graph.contains(&c("A1")));
        graph.update_dependencies(c("B1"), []);
        graph.update_dependencies(c("C1"), []);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_update_dependencies_replaces_edges() {
        let mut graph = chain();
        graph.update_dependencies(c("C1"), [c("D1"), c("E1")]);
        let deps: HashSet<CellRef> = graph.direct_dependencies(&c("C1")).copied().collect();
        assert_eq!(deps, set(&["D1", "E1"]));
        assert_eq!(graph.dependents(&c("B1")).count(), 0);
        let e1_dependents: HashSet<CellRef> = graph.dependents(&c("E1")).copied().collect();
        assert_eq!(e1_dependents, set(&["C1"]));
    }

    #[test]
    fn test_transitive_closures_exclude_start() {
        let graph = chain();
        assert_eq!(graph.all_dependents(&c("A1")), set(&["B1", "C1", "D1"]));
        assert_eq!(graph.all_dependencies(&c("C1")), set(&["A1", "B1"]));
        assert!(graph.all_dependents(&c("Z9")).is_empty());
    }

    #[test]
    fn test_downstream_of_merges_starting_cells() {
        let graph = chain();
        assert_eq!(graph.downstream_of([&c("B1"), &c("D1")]), set(&["B1", "C1", "D1"]));
        assert_eq!(graph.downstream_of([&c("Z9")]), set(&["Z9"]));
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph = chain();
        let order = graph.topological_order();
        assert_eq!(order.len(), 4);
        assert!(position(order, "A1") < position(order, "B1"));
        assert!(position(order, "B1") < position(order, "C1"));
        assert!(position(order, "A1") < position(order, "D1"));
    }

    #[test]
    fn test_cycle_empties_topological_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(c("A1"), c("B1"));
        graph.add_dependency(c("B1"), c("A1"));
        assert!(graph.has_circular_dependency(&c("A1")));
        assert!(graph.has_cycle());
        assert!(graph.topological_order().is_empty());
        assert!(graph.calculation_levels().is_empty());

        graph.remove_dependency(c("B1"), c("A1"));
        assert!(!graph.has_circular_dependency(&c("A1")));
        assert_eq!(graph.topological_order(), &[c("B1"), c("A1")]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(c("A1"), c("A1"));
        assert!(graph.has_circular_dependency(&c("A1")));
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut graph = chain();
        let marked = graph.mark_subgraph_dirty(c("B1"));
        assert_eq!(marked, set(&["B1", "C1"]));
        graph.mark_dirty(c("K5"));
        assert_eq!(graph.dirty_cells_in_order(), vec![c("K5"), c("B1"), c("C1")]);

        graph.mark_clean([&c("B1")]);
        assert!(!graph.is_dirty(&c("B1")));
        assert!(graph.is_dirty(&c("C1")));
        graph.clear_dirty_flags();
        assert!(graph.dirty_cells().is_empty());
    }

    #[test]
    fn test_calculation_levels() {
        let graph = chain();
        let levels = graph.calculation_levels();
        assert_eq!(levels[&c("A1")], 0);
        assert_eq!(levels[&c("B1")], 1);
        assert_eq!(levels[&c("C1")], 2);
        assert_eq!(levels[&c("D1")], 1);
    }

    #[test]
    fn test_stats() {
        let stats = chain().stats();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.max_fan_out, 2);
        assert_eq!(stats.max_fan_in, 1);
        assert!((stats.avg_fan_in - 0.75).abs() < 1e-9);
        assert!(!stats.has_cycle);
    }

    #[test]
    fn test_memoized_order_is_invalidated_by_edge_changes() {
        let mut graph = chain();
        assert_eq!(graph.topological_order().len(), 4);
        graph.add_dependency(c("E1"), c("C1"));
        let order = graph.topological_order();
        assert_eq!(order.len(), 5);
        assert!(position(order, "C1") < position(order, "E1"));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let mut graph = DependencyGraph::new();
        for row in 1..50_000 {
            graph.add_dependency(CellRef::new(0, row), CellRef::new(0, row - 1));
        }
        let order = graph.topological_order();
        assert_eq!(order.len(), 50_000);
        assert_eq!(order[0], CellRef::new(0, 0));
        assert!(!graph.has_circular_dependency(&CellRef::new(0, 49_999)));
    }

    /// Edges always point from a later cell to an earlier one, so the
    /// generated graph is acyclic.
    fn acyclic_edges() -> impl Strategy<Value = Vec<(CellRef, CellRef)>> {
        proptest::collection::vec((1usize..40, 0usize..40), 1..80).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(a, b)| {
                    let (later, earlier) = if b < a { (a, b) } else { (a, a - 1) };
                    (CellRef::new(0, later), CellRef::new(0, earlier))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_topological_order_places_dependencies_first(edges in acyclic_edges()) {
            let mut graph = DependencyGraph::new();
            for (cell, depends_on) in &edges {
                graph.add_dependency(*cell, *depends_on);
            }
            prop_assert!(!graph.has_cycle());
            prop_assert!(cycle::cycle_members(&graph).is_empty());

            let order = graph.topological_order();
            prop_assert_eq!(order.len(), graph.node_count());
            let positions: HashMap<CellRef, usize> =
                order.iter().enumerate().map(|(i, cell)| (*cell, i)).collect();
            let levels = graph.calculation_levels();
            for (cell, depends_on) in &edges {
                prop_assert!(positions[depends_on] < positions[cell]);
                prop_assert!(levels[depends_on] < levels[cell]);
            }
        }

        #[test]
        fn prop_back_edge_closes_a_cycle(edges in acyclic_edges()) {
            let mut graph = DependencyGraph::new();
            for (cell, depends_on) in &edges {
                graph.add_dependency(*cell, *depends_on);
            }
            let (cell, depends_on) = edges[0];
            graph.add_dependency(depends_on, cell);
            prop_assert!(graph.has_cycle());
            prop_assert!(graph.topological_order().is_empty());
            let members = cycle::cycle_members(&graph);
            prop_assert!(members.contains(&cell));
            prop_assert!(members.contains(&depends_on));
        }
    }
}
