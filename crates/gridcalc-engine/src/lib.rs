//! gridcalc_engine - Formula parsing, evaluation and dependency tracking.
//!
//! This crate holds the pieces that do not own any state across edits:
//! the cell-id codec, the formula parser, the tree-walking evaluator, the
//! dependency graph and the function registry. The orchestration (caching,
//! recalculation passes) lives in `gridcalc-core`.

pub mod engine;
pub mod registry;

pub use registry::{FunctionContext, FunctionMeta, FunctionRegistry, RegistryError};

#[cfg(test)]
mod tests {
    use crate::engine::*;
    use crate::registry::FunctionRegistry;

    fn grid_from(entries: &[(&str, &str)]) -> Grid {
        entries
            .iter()
            .map(|(id, raw)| {
                let cell_ref = CellRef::from_str(id).unwrap();
                (cell_ref, Cell::from_input(cell_ref, raw))
            })
            .collect()
    }

    fn eval_text(formula: &str, grid: &Grid) -> Value {
        let registry = FunctionRegistry::with_builtins();
        let ast = Parser::new(&registry).parse(formula).unwrap();
        let mut graph = DependencyGraph::new();
        Evaluator::new(&registry, grid, &mut graph)
            .for_cell(CellRef::new(9, 9))
            .evaluate(&ast)
            .unwrap()
    }

    #[test]
    fn test_from_str_single_letter_columns() {
        let a1 = CellRef::from_str("A1").unwrap();
        assert_eq!(a1.row, 0);
        assert_eq!(a1.col, 0);

        let z1 = CellRef::from_str("Z1").unwrap();
        assert_eq!(z1.col, 25);
    }

    #[test]
    fn test_from_str_multi_letter_columns() {
        assert_eq!(CellRef::from_str("AA1").unwrap().col, 26);
        assert_eq!(CellRef::from_str("AZ1").unwrap().col, 51);
        assert_eq!(CellRef::from_str("BA1").unwrap().col, 52);
    }

    #[test]
    fn test_from_str_invalid_inputs() {
        assert!(CellRef::from_str("").is_none());
        assert!(CellRef::from_str("123").is_none());
        assert!(CellRef::from_str("ABC").is_none());
        assert!(CellRef::from_str("A0").is_none());
        assert!(CellRef::from_str("1A").is_none());
        assert!(CellRef::from_str("A 1").is_none());
    }

    #[test]
    fn test_display_round_trips() {
        for id in ["A1", "B12", "Z9", "AA100", "XFD1048576"] {
            assert_eq!(CellRef::from_str(id).unwrap().to_string(), id);
        }
    }

    #[test]
    fn test_formula_reads_other_cells() {
        let grid = grid_from(&[("A1", "5"), ("A2", "7")]);
        assert_eq!(eval_text("=A1*A2+1", &grid), Value::Number(36.0));
    }

    #[test]
    fn test_sum_over_range_with_gap() {
        let grid = grid_from(&[("A1", "1"), ("A3", "3")]);
        assert_eq!(eval_text("=SUM(A1:A3)", &grid), Value::Number(4.0));
    }

    #[test]
    fn test_text_concatenation_with_plus() {
        let grid = grid_from(&[("A1", "foo")]);
        assert_eq!(eval_text("=A1+\"bar\"", &grid), Value::Text("foobar".into()));
    }

    #[test]
    fn test_nested_functions() {
        let grid = grid_from(&[("A1", "-2.5"), ("B1", "4")]);
        assert_eq!(
            eval_text("=IF(ABS(A1)>B1, \"big\", ROUND(A1*B1, 0))", &grid),
            Value::Number(-10.0)
        );
    }
}
