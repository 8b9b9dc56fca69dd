//! Cell records and grid snapshots.
//!
//! - [`CellKind`] - What the user typed into a cell (text, number, formula, boolean)
//! - [`Cell`] - The raw input plus the last computed and displayed result
//! - [`Grid`] - A sparse snapshot of cells; engine passes take one and return a new one

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::cell_ref::CellRef;
use super::format::format_value;
use super::value::Value;

/// The type of content stored in a cell. There is deliberately no error kind:
/// errors only ever appear as values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    Text,
    Number,
    Formula,
    Boolean,
}

/// A cell in the spreadsheet grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellRef,
    /// Source text exactly as entered.
    pub raw_value: String,
    /// The raw value when it starts with '='.
    pub formula: Option<String>,
    /// Last evaluation result. Only meaningful for formula cells.
    pub computed_value: Value,
    pub display_value: String,
    pub kind: CellKind,
}

impl Cell {
    pub fn new_text(id: CellRef, text: &str) -> Cell {
        Cell {
            id,
            raw_value: text.to_string(),
            formula: None,
            computed_value: Value::Empty,
            display_value: text.to_string(),
            kind: CellKind::Text,
        }
    }

    pub fn new_number(id: CellRef, raw: &str) -> Cell {
        Cell {
            id,
            raw_value: raw.to_string(),
            formula: None,
            computed_value: Value::Empty,
            display_value: raw.trim().to_string(),
            kind: CellKind::Number,
        }
    }

    pub fn new_boolean(id: CellRef, b: bool) -> Cell {
        let text = if b { "TRUE" } else { "FALSE" };
        Cell {
            id,
            raw_value: text.to_string(),
            formula: None,
            computed_value: Value::Empty,
            display_value: text.to_string(),
            kind: CellKind::Boolean,
        }
    }

    /// Create a new formula cell. The formula keeps its leading '='.
    /// It displays nothing until it has been evaluated.
    pub fn new_formula(id: CellRef, formula: &str) -> Cell {
        Cell {
            id,
            raw_value: formula.to_string(),
            formula: Some(formula.to_string()),
            computed_value: Value::Empty,
            display_value: String::new(),
            kind: CellKind::Formula,
        }
    }

    /// Parse user input and create appropriate cell type.
    /// - Starts with '=' -> Formula
    /// - Quoted string -> Text (without quotes)
    /// - Valid number -> Number
    /// - TRUE / FALSE (any case) -> Boolean
    /// - Otherwise -> Text
    pub fn from_input(id: CellRef, input: &str) -> Cell {
        let trimmed = input.trim();

        if trimmed.starts_with('=') {
            return Cell::new_formula(id, trimmed);
        }

        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            let mut cell = Cell::new_text(id, &trimmed[1..trimmed.len() - 1]);
            cell.raw_value = input.to_string();
            return cell;
        }

        match Value::from_literal(trimmed) {
            Value::Number(_) => Cell::new_number(id, input),
            Value::Bool(b) => {
                let mut cell = Cell::new_boolean(id, b);
                cell.raw_value = input.to_string();
                cell
            }
            _ => Cell::new_text(id, input),
        }
    }

    pub fn is_formula(&self) -> bool {
        self.kind == CellKind::Formula
    }

    /// The value other formulas see when they reference this cell: the computed
    /// value for formulas, otherwise the literal value of the display string.
    pub fn value(&self) -> Value {
        if self.is_formula() {
            return self.computed_value.clone();
        }
        match self.kind {
            CellKind::Text => Value::Text(self.display_value.clone()),
            _ => Value::from_literal(&self.display_value),
        }
    }

    /// Store an evaluation result and refresh the display string.
    pub fn set_result(&mut self, value: Value) {
        self.display_value = format_value(&value);
        self.computed_value = value;
    }

    /// Get a string for editing the cell (the raw input).
    pub fn to_input_string(&self) -> String {
        self.raw_value.clone()
    }
}

/// Sparse grid snapshot keyed by cell position.
pub type Grid = HashMap<CellRef, Cell>;

/// Read a cell the way a single-cell reference does: missing cells read as 0.
pub fn read_cell(grid: &Grid, cell_ref: &CellRef) -> Value {
    grid.get(cell_ref)
        .map(Cell::value)
        .unwrap_or(Value::Number(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a1() -> CellRef {
        CellRef::new(0, 0)
    }

    #[test]
    fn test_from_input_kinds() {
        assert_eq!(Cell::from_input(a1(), "=A2+1").kind, CellKind::Formula);
        assert_eq!(Cell::from_input(a1(), "  42 ").kind, CellKind::Number);
        assert_eq!(Cell::from_input(a1(), "false").kind, CellKind::Boolean);
        assert_eq!(Cell::from_input(a1(), "hello").kind, CellKind::Text);
    }

    #[test]
    fn test_formula_keeps_source() {
        let cell = Cell::from_input(a1(), "=SUM(B1:B3)");
        assert_eq!(cell.formula.as_deref(), Some("=SUM(B1:B3)"));
        assert_eq!(cell.display_value, "");
        assert_eq!(cell.value(), Value::Empty);
    }

    #[test]
    fn test_quoted_number_stays_text() {
        let cell = Cell::from_input(a1(), "\"42\"");
        assert_eq!(cell.kind, CellKind::Text);
        assert_eq!(cell.value(), Value::Text("42".into()));
        assert_eq!(cell.to_input_string(), "\"42\"");
    }

    #[test]
    fn test_number_value_reads_display() {
        let cell = Cell::from_input(a1(), "2.5");
        assert_eq!(cell.value(), Value::Number(2.5));
    }

    #[test]
    fn test_set_result_formats_display() {
        let mut cell = Cell::from_input(a1(), "=1/3");
        cell.set_result(Value::Number(1.0 / 3.0));
        assert_eq!(cell.display_value, "0.3333333333");
    }

    #[test]
    fn test_read_cell_missing_is_zero() {
        let grid = Grid::new();
        assert_eq!(read_cell(&grid, &a1()), Value::Number(0.0));
    }
}
