//! Recalculation passes: full, incremental and batch.
//!
//! Only one pass runs at a time. A pass requested while another is running
//! (from inside a function being evaluated) returns the input grid unchanged
//! and is dropped, not queued.
//!
//! Within a pass every failure is confined to its own cell: parse and
//! evaluation errors become `#ERROR!` and the pass carries on. Cells on a
//! dependency cycle, and everything downstream of one, are set to `#ERROR!`
//! without being evaluated.

use std::cell::Cell as Flag;

use tracing::{debug, warn};

use gridcalc_engine::engine::{
    Cell, CellRef, DependencyGraph, ErrorValue, Grid, Value, cycle_members, extract_dependencies,
    find_cycle,
};

use super::FormulaEngine;

/// New raw input for one cell. A blank `raw` removes the cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub cell: CellRef,
    pub raw: String,
}

impl CellUpdate {
    pub fn new(cell: CellRef, raw: impl Into<String>) -> Self {
        CellUpdate {
            cell,
            raw: raw.into(),
        }
    }
}

/// Holds the in-progress flag for the lifetime of a pass.
struct PassGuard<'a> {
    flag: &'a Flag<bool>,
}

impl<'a> PassGuard<'a> {
    fn enter(flag: &'a Flag<bool>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(PassGuard { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// What a pass will do: evaluate `order`, poison `cyclic`.
struct PassPlan {
    order: Vec<CellRef>,
    cyclic: Vec<CellRef>,
}

impl FormulaEngine {
    /// Recompute every dirty formula cell in dependency order, then clear
    /// the dirty set.
    pub fn recalculate_all(&self, grid: &Grid) -> Grid {
        let Some(_guard) = PassGuard::enter(&self.calculating) else {
            debug!("recalculation already in progress; request dropped");
            return grid.clone();
        };
        let mut out = grid.clone();
        self.run_pass(&mut out);
        out
    }

    /// `changed` has a new value in `grid`: refresh its edges, mark it and
    /// its dependents dirty, drop their cached results and recompute them.
    pub fn recalculate_from_cell(&self, changed: CellRef, grid: &Grid) -> Grid {
        let Some(_guard) = PassGuard::enter(&self.calculating) else {
            debug!(cell = %changed, "recalculation already in progress; request dropped");
            return grid.clone();
        };
        let Ok(mut graph) = self.graph.try_borrow_mut() else {
            warn!(cell = %changed, "dependency graph busy; recalculation dropped");
            return grid.clone();
        };
        self.refresh_edges(&mut graph, changed, grid.get(&changed));
        let marked = graph.mark_subgraph_dirty(changed);
        self.cache.invalidate_all(&marked);
        drop(graph);

        let mut out = grid.clone();
        self.run_pass(&mut out);
        out
    }

    /// Apply every update, mark them all dirty, then run a single pass.
    /// The order of `updates` does not affect the result.
    pub fn batch_evaluate(&self, updates: &[CellUpdate], grid: &Grid) -> Grid {
        let Some(_guard) = PassGuard::enter(&self.calculating) else {
            debug!(updates = updates.len(), "recalculation already in progress; batch dropped");
            return grid.clone();
        };
        let Ok(mut graph) = self.graph.try_borrow_mut() else {
            warn!(updates = updates.len(), "dependency graph busy; batch dropped");
            return grid.clone();
        };

        let mut out = grid.clone();
        for update in updates {
            if update.raw.trim().is_empty() {
                out.remove(&update.cell);
            } else {
                out.insert(update.cell, Cell::from_input(update.cell, &update.raw));
            }
        }
        // Edges first, so dirty marking reaches dependents added in this batch.
        for update in updates {
            self.refresh_edges(&mut graph, update.cell, out.get(&update.cell));
        }
        for update in updates {
            let marked = graph.mark_subgraph_dirty(update.cell);
            self.cache.invalidate_all(&marked);
        }
        drop(graph);

        self.run_pass(&mut out);
        out
    }

    /// Set one cell from raw input and recalculate what depends on it.
    pub fn set_cell(&self, grid: &Grid, cell: CellRef, raw: &str) -> Grid {
        self.batch_evaluate(&[CellUpdate::new(cell, raw)], grid)
    }

    /// Replace `cell`'s outgoing edges with the references of its formula.
    /// Literal, unparseable and missing cells have none.
    fn refresh_edges(&self, graph: &mut DependencyGraph, cell: CellRef, contents: Option<&Cell>) {
        let deps = contents
            .and_then(|c| c.formula.as_deref())
            .and_then(|formula| self.parse(formula).ok())
            .map(|ast| extract_dependencies(&ast))
            .unwrap_or_default();
        graph.update_dependencies(cell, deps);
    }

    fn run_pass(&self, grid: &mut Grid) {
        let plan = {
            let Ok(graph) = self.graph.try_borrow() else {
                warn!("dependency graph busy; recalculation skipped");
                return;
            };
            plan_pass(&graph)
        };
        debug!(
            cells = plan.order.len(),
            cyclic = plan.cyclic.len(),
            "recalculation pass"
        );

        for cell in plan.order {
            let Some(formula) = grid.get(&cell).and_then(|c| c.formula.clone()) else {
                continue;
            };
            let value = self.evaluate(cell, &formula, grid);
            if let Some(target) = grid.get_mut(&cell) {
                target.set_result(value);
            }
        }

        for cell in plan.cyclic {
            self.cache.invalidate(&cell);
            if let Some(target) = grid.get_mut(&cell).filter(|c| c.is_formula()) {
                target.set_result(Value::Error(ErrorValue::Error));
            }
        }

        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            graph.clear_dirty_flags();
        }
    }
}

fn plan_pass(graph: &DependencyGraph) -> PassPlan {
    if !graph.has_cycle() {
        return PassPlan {
            order: graph.dirty_cells_in_order(),
            cyclic: Vec::new(),
        };
    }

    let members = cycle_members(graph);
    let affected = graph.downstream_of(&members);
    if let Some(path) = members.iter().min().and_then(|start| find_cycle(graph, start)) {
        let path: Vec<String> = path.iter().map(CellRef::to_string).collect();
        warn!(cycle = %path.join(" -> "), "circular reference");
    }

    let dirty = graph.dirty_cells();
    let mut order: Vec<CellRef> = dirty
        .iter()
        .copied()
        .filter(|c| !graph.contains(c))
        .collect();
    order.sort();
    order.extend(
        graph
            .order_where(|c| dirty.contains(c) && !affected.contains(c))
            .unwrap_or_default(),
    );

    let mut cyclic: Vec<CellRef> = affected.into_iter().filter(|c| dirty.contains(c)).collect();
    cyclic.sort();
    PassPlan { order, cyclic }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use gridcalc_engine::{FunctionMeta, FunctionRegistry};

    fn c(id: &str) -> CellRef {
        CellRef::from_str(id).unwrap()
    }

    fn engine() -> FormulaEngine {
        FormulaEngine::new(FunctionRegistry::with_builtins())
    }

    fn display(grid: &Grid, id: &str) -> String {
        grid.get(&c(id))
            .map(|cell| cell.display_value.clone())
            .unwrap_or_default()
    }

    fn load(engine: &FormulaEngine, entries: &[(&str, &str)]) -> Grid {
        let updates: Vec<CellUpdate> = entries
            .iter()
            .map(|(id, raw)| CellUpdate::new(c(id), *raw))
            .collect();
        engine.batch_evaluate(&updates, &Grid::new())
    }

    #[test]
    fn test_recalculate_from_cell_touches_only_dependents() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "5"), ("B1", "=A1+1"), ("C1", "=2*3")]);
        assert_eq!(display(&grid, "B1"), "6");
        assert_eq!(display(&grid, "C1"), "6");
        let c1_evaluations = engine.evaluation_count(&c("C1"));

        let mut edited = grid.clone();
        edited.insert(c("A1"), Cell::from_input(c("A1"), "10"));
        let result = engine.recalculate_from_cell(c("A1"), &edited);

        assert_eq!(display(&result, "B1"), "11");
        assert_eq!(engine.evaluation_count(&c("C1")), c1_evaluations);
        // The caller's snapshot is left alone.
        assert_eq!(display(&edited, "B1"), "6");
    }

    #[test]
    fn test_mutual_reference_is_a_cycle() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "=B1"), ("B1", "=A1"), ("C1", "=1+1")]);

        let graph = engine.graph().unwrap();
        assert!(graph.has_circular_dependency(&c("A1")));
        assert!(graph.topological_order().is_empty());
        drop(graph);

        assert_eq!(display(&grid, "A1"), "#ERROR!");
        assert_eq!(display(&grid, "B1"), "#ERROR!");
        assert_eq!(display(&grid, "C1"), "2");
        assert_eq!(engine.evaluation_count(&c("A1")), 0);
    }

    #[test]
    fn test_cycle_poisons_downstream_cells_only() {
        let engine = engine();
        let grid = load(
            &engine,
            &[
                ("A1", "=B1+1"),
                ("B1", "=A1+1"),
                ("C1", "=A1*2"),
                ("D1", "7"),
                ("E1", "=D1*2"),
            ],
        );
        assert_eq!(display(&grid, "C1"), "#ERROR!");
        assert_eq!(display(&grid, "E1"), "14");
        assert!(engine.graph().unwrap().dirty_cells().is_empty());
    }

    #[test]
    fn test_breaking_a_cycle_recovers() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "=B1"), ("B1", "=A1")]);
        let grid = engine.set_cell(&grid, c("B1"), "3");
        assert_eq!(display(&grid, "A1"), "3");
        assert!(!engine.graph().unwrap().has_cycle());
    }

    #[test]
    fn test_sum_over_range_with_missing_cell() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "1"), ("A3", "3"), ("B1", "=SUM(A1:A3)")]);
        assert_eq!(display(&grid, "B1"), "4");
    }

    #[test]
    fn test_batch_order_does_not_matter() {
        for entries in [
            [("A1", "=1+1"), ("B1", "=A1*2")],
            [("B1", "=A1*2"), ("A1", "=1+1")],
        ] {
            let engine = engine();
            let grid = load(&engine, &entries);
            assert_eq!(display(&grid, "A1"), "2");
            assert_eq!(display(&grid, "B1"), "4");
            assert_eq!(engine.evaluation_count(&c("B1")), 1);
        }
    }

    #[test]
    fn test_errors_stay_in_their_cells() {
        let engine = engine();
        let grid = load(
            &engine,
            &[("A1", "=1/0"), ("B1", "=A1+1"), ("C1", "=NOPE()"), ("D1", "=5")],
        );
        assert_eq!(display(&grid, "A1"), "#DIV/0!");
        assert_eq!(display(&grid, "B1"), "#ERROR!");
        assert_eq!(display(&grid, "C1"), "#ERROR!");
        assert_eq!(display(&grid, "D1"), "5");
        assert_eq!(
            grid[&c("A1")].computed_value,
            Value::Error(ErrorValue::DivZero)
        );
    }

    #[test]
    fn test_recalculating_unchanged_sheet_hits_cache() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "5"), ("B1", "=A1+1"), ("C1", "=B1*2")]);
        engine.reset_counters();

        let again = engine.recalculate_from_cell(c("A1"), &grid);
        assert_eq!(display(&again, "C1"), "12");
        assert_eq!(engine.total_evaluations(), 2);

        // Same formulas over the same inputs: served from the cache.
        for cell in [c("B1"), c("C1")] {
            let formula = again[&cell].formula.clone().unwrap();
            engine.evaluate(cell, &formula, &again);
        }
        assert_eq!(engine.total_evaluations(), 2);
        assert_eq!(engine.cache_hits(), 2);
    }

    #[test]
    fn test_recalculate_all_only_touches_dirty_cells() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "1"), ("B1", "=A1")]);
        let before = engine.total_evaluations();
        let again = engine.recalculate_all(&grid);
        assert_eq!(engine.total_evaluations(), before);
        assert_eq!(again, grid);
    }

    #[test]
    fn test_removing_a_cell_drops_its_edges() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "4"), ("B1", "=A1*2")]);
        assert!(engine.graph().unwrap().contains(&c("A1")));

        let grid = engine.set_cell(&grid, c("B1"), "");
        assert!(!grid.contains_key(&c("B1")));
        assert!(engine.graph().unwrap().is_empty());

        // Dependents of a removed cell read it as zero.
        let grid = engine.set_cell(&grid, c("C1"), "=A1+1");
        let grid = engine.set_cell(&grid, c("A1"), "");
        assert_eq!(display(&grid, "C1"), "1");
    }

    #[test]
    fn test_reentrant_recalculation_is_dropped() {
        let observed = Rc::new(Flag::new(false));
        let engine = Rc::new_cyclic(|weak: &std::rc::Weak<FormulaEngine>| {
            let mut registry = FunctionRegistry::with_builtins();
            let weak = weak.clone();
            let observed = Rc::clone(&observed);
            registry.register(
                FunctionMeta::new("REENTER", "Requests a recalculation mid-pass"),
                move |_args, _ctx| {
                    let Some(engine) = weak.upgrade() else {
                        return Value::Error(ErrorValue::Ref);
                    };
                    observed.set(engine.is_calculating());
                    let snapshot = Grid::from([(c("Z1"), Cell::from_input(c("Z1"), "=1+1"))]);
                    let result =
                        engine.batch_evaluate(&[CellUpdate::new(c("Z2"), "=Z1")], &snapshot);
                    Value::Bool(result == snapshot && !result.contains_key(&c("Z2")))
                },
            );
            FormulaEngine::new(registry)
        });

        let grid = load(&engine, &[("A1", "=REENTER()")]);
        assert!(observed.get());
        assert_eq!(display(&grid, "A1"), "TRUE");
        assert!(!engine.is_calculating());
        assert_eq!(engine.evaluation_count(&c("Z1")), 0);
    }

    #[test]
    fn test_graph_is_unavailable_mid_evaluation() {
        let engine = Rc::new_cyclic(|weak: &std::rc::Weak<FormulaEngine>| {
            let mut registry = FunctionRegistry::with_builtins();
            let weak = weak.clone();
            registry.register(
                FunctionMeta::new("GRAPHBUSY", "Reports whether the graph is borrowed"),
                move |_args, _ctx| match weak.upgrade() {
                    Some(engine) => Value::Bool(engine.graph().is_none()),
                    None => Value::Error(ErrorValue::Ref),
                },
            );
            FormulaEngine::new(registry)
        });

        let grid = load(&engine, &[("A1", "=GRAPHBUSY()")]);
        assert_eq!(display(&grid, "A1"), "TRUE");
        assert!(engine.graph().is_some());
    }

    #[test]
    fn test_unrelated_edit_stays_fast_with_a_cycle_present() {
        let engine = engine();
        let mut updates = vec![
            CellUpdate::new(c("A1"), "=B1"),
            CellUpdate::new(c("B1"), "=A1"),
            CellUpdate::new(CellRef::new(3, 0), "1"),
        ];
        for row in 1..4_000 {
            updates.push(CellUpdate::new(CellRef::new(3, row), format!("=D{}+1", row)));
        }
        let grid = engine.batch_evaluate(&updates, &Grid::new());
        assert_eq!(display(&grid, "D4000"), "4000");
        assert_eq!(display(&grid, "A1"), "#ERROR!");

        let tail_evaluations = engine.evaluation_count(&c("D4000"));
        let started = std::time::Instant::now();
        let grid = engine.set_cell(&grid, c("Z1"), "1");
        let elapsed = started.elapsed();

        assert_eq!(display(&grid, "Z1"), "1");
        assert_eq!(display(&grid, "B1"), "#ERROR!");
        assert_eq!(engine.evaluation_count(&c("D4000")), tail_evaluations);
        assert!(
            elapsed < std::time::Duration::from_secs(2),
            "edit took {:?}",
            elapsed
        );
    }

    #[test]
    fn test_set_cell_recalculates_chain() {
        let engine = engine();
        let grid = load(&engine, &[("A1", "1"), ("A2", "=A1+1"), ("A3", "=A2+1")]);
        let grid = engine.set_cell(&grid, c("A1"), "10");
        assert_eq!(display(&grid, "A3"), "12");

        let grid = engine.set_cell(&grid, c("A2"), "=A1*A1");
        assert_eq!(display(&grid, "A2"), "100");
        assert_eq!(display(&grid, "A3"), "101");
    }
}
