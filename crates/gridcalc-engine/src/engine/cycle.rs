//! Circular dependency detection.
//!
//! A formula that (transitively) reads itself can never be evaluated. These
//! searches follow dependency edges with an explicit stack so long reference
//! chains cannot overflow the native stack.

use std::collections::{HashMap, HashSet};

use super::cell_ref::CellRef;
use super::graph::DependencyGraph;

/// Depth-first search from `start` along dependency edges.
/// Returns Some(cycle_path) if a cycle is reachable, None otherwise. The
/// path starts and ends with the cell that closes the cycle.
pub fn find_cycle(graph: &DependencyGraph, start: &CellRef) -> Option<Vec<CellRef>> {
    let mut on_stack: HashSet<CellRef> = HashSet::new();
    let mut finished: HashSet<CellRef> = HashSet::new();
    let mut path: Vec<CellRef> = vec![*start];
    let mut pending: Vec<Vec<CellRef>> = vec![sorted_dependencies(graph, start)];
    on_stack.insert(*start);

    while let Some(next) = pending.last_mut() {
        match next.pop() {
            Some(dep) if on_stack.contains(&dep) => {
                let from = path.iter().position(|c| *c == dep).unwrap_or(0);
                let mut cycle = path[from..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            Some(dep) if finished.contains(&dep) => {}
            Some(dep) => {
                on_stack.insert(dep);
                path.push(dep);
                pending.push(sorted_dependencies(graph, &dep));
            }
            None => {
                pending.pop();
                if let Some(done) = path.pop() {
                    on_stack.remove(&done);
                    finished.insert(done);
                }
            }
        }
    }
    None
}

/// Every cell that lies on at least one cycle.
///
/// One pass of Tarjan's strongly connected components over the whole graph.
/// A cell is a member when its component has more than one cell or when it
/// reads itself directly.
pub fn cycle_members(graph: &DependencyGraph) -> HashSet<CellRef> {
    // (discovery index, lowest index reachable while on the stack)
    let mut visits: HashMap<CellRef, (usize, usize)> = HashMap::new();
    let mut on_stack: HashSet<CellRef> = HashSet::new();
    let mut component_stack: Vec<CellRef> = Vec::new();
    let mut members = HashSet::new();

    let mut roots: Vec<CellRef> = graph.cells().copied().collect();
    roots.sort_unstable();

    for root in roots {
        if visits.contains_key(&root) {
            continue;
        }
        let mut work: Vec<(CellRef, Vec<CellRef>)> = Vec::new();
        discover(graph, root, &mut visits, &mut on_stack, &mut component_stack, &mut work);

        while let Some((cell, pending)) = work.last_mut() {
            let cell = *cell;
            if let Some(dep) = pending.pop() {
                match visits.get(&dep).copied() {
                    None => discover(
                        graph,
                        dep,
                        &mut visits,
                        &mut on_stack,
                        &mut component_stack,
                        &mut work,
                    ),
                    Some((dep_index, _)) if on_stack.contains(&dep) => {
                        lower(&mut visits, cell, dep_index)
                    }
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            let Some(&(index, low)) = visits.get(&cell) else {
                continue;
            };
            if let Some((parent, _)) = work.last() {
                lower(&mut visits, *parent, low);
            }
            if low != index {
                continue;
            }
            let mut component = Vec::new();
            while let Some(member) = component_stack.pop() {
                on_stack.remove(&member);
                component.push(member);
                if member == cell {
                    break;
                }
            }
            if component.len() > 1 || graph.direct_dependencies(&cell).any(|d| *d == cell) {
                members.extend(component);
            }
        }
    }
    members
}

fn discover(
    graph: &DependencyGraph,
    cell: CellRef,
    visits: &mut HashMap<CellRef, (usize, usize)>,
    on_stack: &mut HashSet<CellRef>,
    component_stack: &mut Vec<CellRef>,
    work: &mut Vec<(CellRef, Vec<CellRef>)>,
) {
    let index = visits.len();
    visits.insert(cell, (index, index));
    on_stack.insert(cell);
    component_stack.push(cell);
    work.push((cell, graph.direct_dependencies(&cell).copied().collect()));
}

fn lower(visits: &mut HashMap<CellRef, (usize, usize)>, cell: CellRef, index: usize) {
    if let Some(entry) = visits.get_mut(&cell) {
        entry.1 = entry.1.min(index);
    }
}

// Reverse-sorted so popping visits dependencies in row-major order.
fn sorted_dependencies(graph: &DependencyGraph, cell: &CellRef) -> Vec<CellRef> {
    let mut deps: Vec<CellRef> = graph.direct_dependencies(cell).copied().collect();
    deps.sort_unstable_by(|a, b| b.cmp(a));
    deps
}
