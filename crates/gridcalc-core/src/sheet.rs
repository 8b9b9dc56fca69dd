//! Reader for .grd sheets: one `CELLREF: VALUE` entry per line.
//!
//! ```text
//! # comment
//! A1: 100
//! A2: "Total"
//! B1: =A1 * 2
//! ```
//!
//! A sheet is read as a list of updates so it can be fed straight into
//! [`FormulaEngine::batch_evaluate`](crate::FormulaEngine::batch_evaluate).

use std::fs;
use std::path::Path;

use gridcalc_engine::engine::{CellRef, Value};

use crate::engine::CellUpdate;
use crate::error::{GridcalcError, Result};

/// Read and parse a .grd file.
pub fn load_sheet(path: &Path) -> Result<Vec<CellUpdate>> {
    let content = fs::read_to_string(path)?;
    parse_sheet(&content)
}

/// Parse .grd content from a string.
pub fn parse_sheet(content: &str) -> Result<Vec<CellUpdate>> {
    let mut updates = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((cell_ref_str, value_str)) = line.split_once(':') else {
            return Err(GridcalcError::Parse {
                line: line_num + 1,
                message: "Expected 'CELLREF: VALUE' format".to_string(),
            });
        };

        let cell_ref_str = cell_ref_str.trim();
        let cell = CellRef::from_str(cell_ref_str).ok_or_else(|| GridcalcError::Parse {
            line: line_num + 1,
            message: format!("Invalid cell reference: {}", cell_ref_str),
        })?;

        if let Some(raw) = parse_cell_value(value_str.trim(), line_num + 1)? {
            updates.push(CellUpdate::new(cell, raw));
        }
    }

    Ok(updates)
}

/// Normalize a value to the raw input form cells are built from.
fn parse_cell_value(value: &str, line_num: usize) -> Result<Option<String>> {
    if value.is_empty() {
        return Ok(None);
    }

    if value.starts_with('=') {
        return Ok(Some(value.to_string()));
    }

    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let text = unescape_grd_text(&value[1..value.len() - 1]);
        return Ok(Some(format!("\"{}\"", text)));
    }

    match Value::from_literal(value) {
        Value::Number(_) | Value::Bool(_) => Ok(Some(value.to_string())),
        _ => Err(GridcalcError::Parse {
            line: line_num,
            message: format!("Invalid value: {}. Use quotes for text.", value),
        }),
    }
}

fn unescape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_engine::engine::{Cell, CellKind};

    fn single(content: &str) -> Cell {
        let updates = parse_sheet(content).unwrap();
        assert_eq!(updates.len(), 1);
        Cell::from_input(updates[0].cell, &updates[0].raw)
    }

    #[test]
    fn test_parse_number() {
        let cell = single("A1: 42");
        assert_eq!(cell.kind, CellKind::Number);
        assert_eq!(cell.value(), Value::Number(42.0));
    }

    #[test]
    fn test_parse_text_escaped_quotes() {
        let cell = single(r#"A1: "He said \"hi\"""#);
        assert_eq!(cell.kind, CellKind::Text);
        assert_eq!(cell.display_value, "He said \"hi\"");
    }

    #[test]
    fn test_parse_formula_keeps_colons_in_ranges() {
        let updates = parse_sheet("B3: =SUM(A1:A2)").unwrap();
        assert_eq!(updates[0].cell, CellRef::new(1, 2));
        assert_eq!(updates[0].raw, "=SUM(A1:A2)");
    }

    #[test]
    fn test_skip_comments_and_empty_lines() {
        let content = r#"
# This is a comment
A1: 42

# Another comment

B1: TRUE
C1:
"#;
        assert_eq!(parse_sheet(content).unwrap().len(), 2);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse_sheet("A1: 1\nnot a cell").unwrap_err();
        assert!(matches!(err, GridcalcError::Parse { line: 2, .. }));

        let err = parse_sheet("A1: hello").unwrap_err();
        assert!(matches!(err, GridcalcError::Parse { line: 1, .. }));

        let err = parse_sheet("1A: 5").unwrap_err();
        assert!(matches!(err, GridcalcError::Parse { line: 1, .. }));
    }
}
