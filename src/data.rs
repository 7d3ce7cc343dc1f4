//! Tabular test data and the placeholder-expansion pass
//!
//! `data "rows.csv"` before a test definition binds the definition's `@`
//! placeholders to the rows of a comma-separated table. The table's first
//! line is metadata; its cell count is the declared column count every data
//! row must match. Commas inside a `{...}` struct-initializer span do not
//! split cells, and each cell is re-parsed through the same argument grammar
//! as inline literals.
//!
//! Expansion rewrites the tree in place: a placeholder-bearing definition is
//! replaced by one concrete clone per row — arguments first, then the
//! expected constant — at its original position in the owning group.

use crate::parser::ast::{
    ExpectedConstant, FunctionArgument, GroupItem, TestDefinition, TestFile, TestGroup,
};
use crate::parser::parser::{ParseError, Parser};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum DataError {
    /// The definition has placeholders but no `data` source
    MissingSource { test: String },
    /// The definition has a `data` source but no placeholders for the rows
    UnusedSource { test: String, path: String },
    /// The table is empty (not even a metadata line)
    Empty { path: String },
    /// A row's cell count differs from the declared column count
    ColumnCount {
        path: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    /// Declared column count differs from the definition's placeholder count
    PlaceholderCount {
        test: String,
        placeholders: usize,
        columns: usize,
    },
    /// A cell did not parse as a function argument
    Cell {
        path: String,
        row: usize,
        error: ParseError,
    },
    /// `@` inside a data cell: rows supply values, they cannot defer again
    PlaceholderCell { path: String, row: usize },
    /// A cell bound to the expected result must be a constant
    ExpectedCell { path: String, row: usize },
    Io { path: String, error: io::Error },
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::MissingSource { test } => write!(
                f,
                "Test of {} contains placeholders but no data source",
                test
            ),
            DataError::UnusedSource { test, path } => write!(
                f,
                "Test of {} references data file {} but contains no placeholders",
                test, path
            ),
            DataError::Empty { path } => write!(f, "Data file {} is empty", path),
            DataError::ColumnCount {
                path,
                row,
                expected,
                found,
            } => write!(
                f,
                "{}: row {} has {} column(s), the file declares {}",
                path, row, found, expected
            ),
            DataError::PlaceholderCount {
                test,
                placeholders,
                columns,
            } => write!(
                f,
                "Test of {} has {} placeholder(s) but the data file declares {} column(s)",
                test, placeholders, columns
            ),
            DataError::Cell { path, row, error } => {
                write!(f, "{}: row {}: {}", path, row, error)
            }
            DataError::PlaceholderCell { path, row } => {
                write!(f, "{}: row {}: a data cell cannot be a placeholder", path, row)
            }
            DataError::ExpectedCell { path, row } => write!(
                f,
                "{}: row {}: the expected-result column must be a constant",
                path, row
            ),
            DataError::Io { path, error } => write!(f, "{}: {}", path, error),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Io { error, .. } => Some(error),
            DataError::Cell { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A loaded data table: declared column count plus the raw cell text per row
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    pub path: String,
    pub columns: usize,
    pub rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn load(path: &Path) -> Result<DataTable, DataError> {
        let shown = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|error| DataError::Io {
            path: shown.clone(),
            error,
        })?;
        Self::parse(&shown, &text)
    }

    /// Parse table text. The first non-blank line is consumed as metadata;
    /// blank lines elsewhere are skipped.
    pub fn parse(path: &str, text: &str) -> Result<DataTable, DataError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines.next().ok_or_else(|| DataError::Empty {
            path: path.to_string(),
        })?;
        let columns = split_row(header).len();

        let mut rows = Vec::new();
        for (index, line) in lines {
            let cells = split_row(line);
            if cells.len() != columns {
                return Err(DataError::ColumnCount {
                    path: path.to_string(),
                    row: index + 1,
                    expected: columns,
                    found: cells.len(),
                });
            }
            rows.push(cells);
        }

        Ok(DataTable {
            path: path.to_string(),
            columns,
            rows,
        })
    }
}

/// Split one row on commas, treating `{...}` spans as atomic.
fn split_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in line.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Expand every placeholder-bearing test definition of a parsed file.
/// Relative data paths resolve against `base` (the test file's directory).
pub fn expand(file: &mut TestFile, base: &Path) -> Result<(), DataError> {
    expand_group(&mut file.group, base)
}

fn expand_group(group: &mut TestGroup, base: &Path) -> Result<(), DataError> {
    let items = std::mem::take(&mut group.items);
    let mut expanded = Vec::with_capacity(items.len());

    for item in items {
        match item {
            GroupItem::Group(mut nested) => {
                expand_group(&mut nested, base)?;
                expanded.push(GroupItem::Group(nested));
            }
            GroupItem::Test(test) => {
                let placeholders = test.placeholder_count();
                match (&test.data, placeholders) {
                    (None, 0) => expanded.push(GroupItem::Test(test)),
                    (None, _) => {
                        return Err(DataError::MissingSource {
                            test: test.function.call.name.clone(),
                        });
                    }
                    (Some(data), 0) => {
                        return Err(DataError::UnusedSource {
                            test: test.function.call.name.clone(),
                            path: data.path.clone(),
                        });
                    }
                    (Some(data), placeholders) => {
                        let table = DataTable::load(&base.join(&data.path))?;
                        if table.columns != placeholders {
                            return Err(DataError::PlaceholderCount {
                                test: test.function.call.name.clone(),
                                placeholders,
                                columns: table.columns,
                            });
                        }
                        for (row_index, row) in table.rows.iter().enumerate() {
                            expanded.push(GroupItem::Test(instantiate(
                                &test,
                                &table.path,
                                row_index,
                                row,
                            )?));
                        }
                    }
                }
            }
        }
    }

    group.items = expanded;
    Ok(())
}

/// One concrete clone of a parameterized definition, bound to one data row.
/// Row width against placeholder count is the caller's invariant.
fn instantiate(
    template: &TestDefinition,
    path: &str,
    row_index: usize,
    row: &[String],
) -> Result<TestDefinition, DataError> {
    let mut test = template.clone();
    test.data = None;
    let mut next = 0usize;

    for arg in &mut test.function.call.args {
        if matches!(arg, FunctionArgument::Placeholder) {
            *arg = parse_cell(path, row_index, &row[next])?;
            next += 1;
        }
    }

    if let Some(expected) = &mut test.function.expected {
        if matches!(expected.value, ExpectedConstant::Placeholder) {
            match parse_cell(path, row_index, &row[next])? {
                FunctionArgument::Constant(constant) => {
                    expected.value = ExpectedConstant::Constant(constant);
                }
                _ => {
                    return Err(DataError::ExpectedCell {
                        path: path.to_string(),
                        row: row_index + 1,
                    });
                }
            }
        }
    }

    Ok(test)
}

fn parse_cell(path: &str, row_index: usize, cell: &str) -> Result<FunctionArgument, DataError> {
    let arg = Parser::parse_argument_str(cell).map_err(|error| DataError::Cell {
        path: path.to_string(),
        row: row_index + 1,
        error,
    })?;
    match arg {
        FunctionArgument::Placeholder => Err(DataError::PlaceholderCell {
            path: path.to_string(),
            row: row_index + 1,
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Constant;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse_file(source: &str) -> TestFile {
        Parser::new(source).parse_test_file().expect("parse failed")
    }

    #[test]
    fn test_split_row_brace_awareness() {
        assert_eq!(split_row("1, 2, 3"), vec!["1", "2", "3"]);
        assert_eq!(
            split_row("{1, 2}, {3, {4, 5}}, 6"),
            vec!["{1, 2}", "{3, {4, 5}}", "6"]
        );
    }

    #[test]
    fn test_table_parse_checks_column_counts() {
        let table = DataTable::parse("rows.csv", "a,b,out\n1,2,3\n\n4,5,9\n").unwrap();
        assert_eq!(table.columns, 3);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["4", "5", "9"]);

        assert!(matches!(
            DataTable::parse("rows.csv", "a,b\n1,2,3\n"),
            Err(DataError::ColumnCount {
                expected: 2,
                found: 3,
                ..
            })
        ));
        assert!(matches!(
            DataTable::parse("rows.csv", ""),
            Err(DataError::Empty { .. })
        ));
    }

    #[test]
    fn test_expansion_replaces_in_place() {
        let mut table = NamedTempFile::new().unwrap();
        writeln!(table, "a,b,out").unwrap();
        writeln!(table, "1,2,3").unwrap();
        writeln!(table, "10,20,30").unwrap();

        let source = format!(
            "sum(0, 0) == 0;\ndata \"{}\" sum(@, @) == @;\nsum(9, 9) == 18;",
            table.path().display()
        );
        let mut file = parse_file(&source);
        expand(&mut file, Path::new(".")).unwrap();

        // One clone per row, at the template's position in the group
        assert_eq!(file.group.items.len(), 4);
        let tests = file.group.tests();
        assert_eq!(
            tests[1].function.call.args[0],
            FunctionArgument::Constant(Constant::Int(1))
        );
        assert_eq!(
            tests[2].function.call.args[1],
            FunctionArgument::Constant(Constant::Int(20))
        );
        match &tests[2].function.expected.as_ref().unwrap().value {
            ExpectedConstant::Constant(Constant::Int(30)) => {}
            other => panic!("Expected the row constant, got {:?}", other),
        }
        assert_eq!(tests[3].function.call.args[0],
            FunctionArgument::Constant(Constant::Int(9)));
        // No placeholder survives expansion
        assert!(tests.iter().all(|t| t.placeholder_count() == 0));
    }

    #[test]
    fn test_placeholders_without_source_fail() {
        let mut file = parse_file("sum(@, 1) == 2;");
        assert!(matches!(
            expand(&mut file, Path::new(".")),
            Err(DataError::MissingSource { .. })
        ));
    }

    #[test]
    fn test_source_without_placeholders_fails() {
        let mut file = parse_file("data \"rows.csv\" sum(1, 1) == 2;");
        assert!(matches!(
            expand(&mut file, Path::new(".")),
            Err(DataError::UnusedSource { .. })
        ));
    }

    #[test]
    fn test_column_count_must_match_placeholders() {
        let mut table = NamedTempFile::new().unwrap();
        writeln!(table, "a,b,c,out").unwrap();
        writeln!(table, "1,2,3,4").unwrap();

        let source = format!(
            "data \"{}\" sum(@, @) == @;",
            table.path().display()
        );
        let mut file = parse_file(&source);
        assert!(matches!(
            expand(&mut file, Path::new(".")),
            Err(DataError::PlaceholderCount {
                placeholders: 3,
                columns: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_buffer_cells_parse_like_inline_arguments() {
        let mut table = NamedTempFile::new().unwrap();
        writeln!(table, "buf,out").unwrap();
        writeln!(table, "[4:7],28").unwrap();

        let source = format!(
            "data \"{}\" do_math(@) == @;",
            table.path().display()
        );
        let mut file = parse_file(&source);
        expand(&mut file, Path::new(".")).unwrap();

        let tests = file.group.tests();
        assert!(matches!(
            tests[0].function.call.args[0],
            FunctionArgument::Buffer(_)
        ));
    }

    #[test]
    fn test_placeholder_cell_is_rejected() {
        let mut table = NamedTempFile::new().unwrap();
        writeln!(table, "a,b").unwrap();
        writeln!(table, "@,2").unwrap();

        let source = format!("data \"{}\" sum(@, @);", table.path().display());
        let mut file = parse_file(&source);
        assert!(matches!(
            expand(&mut file, Path::new(".")),
            Err(DataError::PlaceholderCell { row: 1, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut file = parse_file("data \"no/such/table.csv\" sum(@, @) == @;");
        assert!(matches!(
            expand(&mut file, Path::new(".")),
            Err(DataError::Io { .. })
        ));
    }
}
