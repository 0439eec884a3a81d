// Reading uploaded CSV files into a plain string table.

use std::collections::HashSet;

use itertools::Itertools;

use crate::error::Error;

/// Prefixes that spreadsheet applications interpret as the start of a formula.
const FORMULA_PREFIXES: [char; 4] = ['=', '+', '-', '@'];

/// A CSV file as uploaded, with every cell kept as a string. Empty cells are
/// represented as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// A table without columns or without rows has nothing to plot.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Header line followed by the first row, used to show the model what the
    /// data looks like.
    pub fn preview(&self) -> String {
        let header = self.columns.iter().join(" ");
        match self.rows.first() {
            Some(row) => format!(
                "{header}\n{}",
                row.iter()
                    .map(|cell| cell.as_deref().unwrap_or("NaN"))
                    .join(" ")
            ),
            None => header,
        }
    }
}

/// Gives every column a usable, unique name. Blank names become
/// `Unnamed: <index>` and repeated names get a `.1`, `.2`, ... suffix.
fn normalize_headers<'a, I>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut columns: Vec<String> = vec![];
    for (i, h) in headers.into_iter().enumerate() {
        let h = h.trim();
        let base = if h.is_empty() {
            format!("Unnamed: {i}")
        } else {
            h.to_string()
        };
        let name = if seen.contains(&base) {
            (1..)
                .map(|n| format!("{base}.{n}"))
                .find(|candidate| !seen.contains(candidate))
                .unwrap_or_default()
        } else {
            base
        };
        seen.insert(name.clone());
        columns.push(name);
    }
    columns
}

/// Parses the raw bytes of a CSV file. The first record is the header. Rows
/// shorter than the header are padded with empty cells; rows longer than the
/// header are rejected.
pub fn parse_csv(contents: &[u8]) -> Result<Table, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let columns = normalize_headers(reader.headers()?.iter());

    let mut rows: Vec<Vec<Option<String>>> = vec![];
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() > columns.len() {
            return Error::err_string(format!(
                "Row {} has {} fields, but the header only has {}",
                i + 1,
                record.len(),
                columns.len()
            ));
        }
        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        row.resize(columns.len(), None);
        rows.push(row);
    }

    log::debug!(
        "Parsed CSV with {} columns and {} rows",
        columns.len(),
        rows.len()
    );
    Ok(Table { columns, rows })
}

fn sanitize_cell(cell: String) -> String {
    if cell.starts_with(FORMULA_PREFIXES) {
        format!("\t{cell}")
    } else {
        cell
    }
}

/// Neutralizes CSV formula injection by prefixing a tab to every cell that
/// starts with `=`, `+`, `-` or `@`.
pub fn sanitize_for_csv_injection(table: Table) -> Table {
    Table {
        columns: table.columns,
        rows: table
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| c.map(sanitize_cell)).collect())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asserting::prelude::*;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_parse_keeps_strings() {
        let t = parse_csv(b"year,sales\n2020,10\n2021,12.5\n").unwrap();
        assert_that!(t.columns.clone()).is_equal_to(vec!["year".to_string(), "sales".to_string()]);
        assert_that!(t.rows.clone()).is_equal_to(vec![
            vec![cell("2020"), cell("10")],
            vec![cell("2021"), cell("12.5")],
        ]);
    }

    #[test]
    fn test_parse_empty_and_short_rows() {
        let t = parse_csv(b"a,b,c\n1,,3\n4\n").unwrap();
        assert_that!(t.rows.clone()).is_equal_to(vec![
            vec![cell("1"), None, cell("3")],
            vec![cell("4"), None, None],
        ]);
    }

    #[test]
    fn test_parse_rejects_long_rows() {
        let ret = parse_csv(b"a,b\n1,2,3\n");
        assert_that!(&ret).is_err();
    }

    #[test]
    fn test_parse_renames_duplicate_columns() {
        let t = parse_csv(b"a,a,b,a\n1,2,3,4\n").unwrap();
        assert_that!(t.columns).is_equal_to(vec![
            "a".to_string(),
            "a.1".to_string(),
            "b".to_string(),
            "a.2".to_string(),
        ]);
    }

    #[test]
    fn test_parse_names_blank_columns() {
        let t = parse_csv(b"year,sales,\n2020,4,x\n2021,8,y\n").unwrap();
        assert_that!(t.columns).is_equal_to(vec![
            "year".to_string(),
            "sales".to_string(),
            "Unnamed: 2".to_string(),
        ]);
        assert_that!(t.rows[0].clone()).is_equal_to(vec![cell("2020"), cell("4"), cell("x")]);
    }

    #[test]
    fn test_header_only_is_empty() {
        let t = parse_csv(b"a,b\n").unwrap();
        assert_that!(t.is_empty()).is_equal_to(true);
        let t = parse_csv(b"").unwrap();
        assert_that!(t.is_empty()).is_equal_to(true);
    }

    #[test]
    fn test_sanitize() {
        let t = Table {
            columns: vec!["x".to_string()],
            rows: vec![
                vec![cell("=SUM(A1:A2)")],
                vec![cell("+1")],
                vec![cell("-5")],
                vec![cell("@cmd")],
                vec![cell("plain")],
                vec![cell("a=b")],
                vec![None],
            ],
        };
        let s = sanitize_for_csv_injection(t);
        assert_that!(s.rows).is_equal_to(vec![
            vec![cell("\t=SUM(A1:A2)")],
            vec![cell("\t+1")],
            vec![cell("\t-5")],
            vec![cell("\t@cmd")],
            vec![cell("plain")],
            vec![cell("a=b")],
            vec![None],
        ]);
    }

    #[test]
    fn test_preview() {
        let t = parse_csv(b"month,revenue\nJan,100\nFeb,200\n").unwrap();
        assert_that!(t.preview()).is_equal_to("month revenue\nJan 100");
    }
}
