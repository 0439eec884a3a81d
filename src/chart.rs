//! Turning a string table into data that Chart.js can plot.
//!
//! The pipeline is: convert columns to numbers where every cell allows it,
//! drop outliers in the selected columns, pick labels and values according to
//! the chart type, then sort and average the values per label.

use std::cmp::Ordering;

use itertools::Itertools;

use crate::{
    csv_table::Table,
    error::Error,
    models::{ChartDataOutput, ChartOptions, ChartRecord, ChartType, Datum},
};

/// Key used for the values when no value column was selected.
pub const DEFAULT_VALUES_KEY: &str = "Value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ColumnKind::Text)
    }
}

/// A table where each column has been given a type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    pub columns: Vec<String>,
    pub kinds: Vec<ColumnKind>,
    pub rows: Vec<Vec<Datum>>,
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Integral value of a cell. Plain integers are read exactly; a number such
/// as `8.0` counts when it has no fraction and fits in an `i64`.
fn parse_integer(cell: &str) -> Option<i64> {
    cell.trim().parse::<i64>().ok().or_else(|| {
        parse_number(cell)
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Decides the kind of a column. A single missing or non-numeric cell makes
/// the whole column text.
fn column_kind<'a, I: Iterator<Item = Option<&'a str>>>(cells: I) -> ColumnKind {
    let mut all_integral = true;
    for cell in cells {
        match cell {
            Some(c) if parse_integer(c).is_some() => {}
            Some(c) if parse_number(c).is_some() => all_integral = false,
            _ => return ColumnKind::Text,
        }
    }
    if all_integral {
        ColumnKind::Integer
    } else {
        ColumnKind::Float
    }
}

fn to_datum(cell: &Option<String>, kind: ColumnKind) -> Datum {
    match (cell.as_deref(), kind) {
        (None, _) => Datum::Null,
        (Some(s), ColumnKind::Integer) => parse_integer(s).map(Datum::Int).unwrap_or(Datum::Null),
        (Some(s), ColumnKind::Float) => parse_number(s).map(Datum::Float).unwrap_or(Datum::Null),
        (Some(s), ColumnKind::Text) => Datum::Text(s.to_string()),
    }
}

impl TypedTable {
    /// Converts every column that is entirely numeric.
    pub fn from_table(table: &Table) -> Self {
        let kinds: Vec<ColumnKind> = (0..table.columns.len())
            .map(|ci| {
                let kind = column_kind(
                    table
                        .rows
                        .iter()
                        .map(|row| row.get(ci).and_then(|c| c.as_deref())),
                );
                log::debug!("Column \"{}\" treated as {:?}", table.columns[ci], kind);
                kind
            })
            .collect();

        let rows = table
            .rows
            .iter()
            .map(|row| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(ci, kind)| to_datum(row.get(ci).unwrap_or(&None), *kind))
                    .collect()
            })
            .collect();

        TypedTable {
            columns: table.columns.clone(),
            kinds,
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn numeric_values(&self, ci: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r[ci].as_f64()).collect()
    }
}

/// Quantile with linear interpolation between the closest ranks, the same
/// definition pandas uses by default. `sorted` must be sorted and non-empty.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Bounds outside of which a value counts as an outlier:
/// `[Q1 - 1.5 * IQR, Q3 + 1.5 * IQR]`.
pub fn iqr_bounds(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    Some((q1 - 1.5 * iqr, q3 + 1.5 * iqr))
}

/// Removes rows whose value in `column` is an outlier. Text columns have no
/// notion of outliers and are left as they are.
pub fn remove_outliers_iqr(mut table: TypedTable, column: &str) -> TypedTable {
    let Some(ci) = table.column_index(column) else {
        return table;
    };
    if !table.kinds[ci].is_numeric() {
        return table;
    }
    if let Some((lower, upper)) = iqr_bounds(&table.numeric_values(ci)) {
        let before = table.rows.len();
        table.rows.retain(|row| {
            row[ci]
                .as_f64()
                .map_or(false, |v| lower <= v && v <= upper)
        });
        log::debug!(
            "Removed {} outliers from column \"{column}\", {} rows remaining",
            before - table.rows.len(),
            table.rows.len()
        );
    }
    table
}

/// Orders labels: numbers by value, then text lexicographically, then
/// missing values.
fn cmp_labels(a: &Datum, b: &Datum) -> Ordering {
    fn rank(d: &Datum) -> u8 {
        match d {
            Datum::Int(_) | Datum::Float(_) => 0,
            Datum::Text(_) => 1,
            Datum::Null => 2,
        }
    }
    match (a, b) {
        (Datum::Text(x), Datum::Text(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

/// Sorts `(label, values)` pairs by label and averages the values of equal
/// labels. Missing values do not count towards a mean.
fn group_mean(mut points: Vec<(Datum, Vec<Option<f64>>)>) -> Vec<(Datum, Vec<Option<f64>>)> {
    points.sort_by(|a, b| cmp_labels(&a.0, &b.0));
    let grouped = points
        .into_iter()
        .chunk_by(|(label, _)| label.clone())
        .into_iter()
        .map(|(label, group)| {
            let group: Vec<Vec<Option<f64>>> = group.map(|(_, values)| values).collect();
            let width = group.first().map_or(0, Vec::len);
            let means = (0..width)
                .map(|vi| {
                    let present: Vec<f64> = group.iter().filter_map(|v| v[vi]).collect();
                    if present.is_empty() {
                        None
                    } else {
                        Some(present.iter().sum::<f64>() / present.len() as f64)
                    }
                })
                .collect();
            (label, means)
        })
        .collect();
    grouped
}

/// Extracts the selected columns and formats them for Chart.js.
///
/// For pie and doughnut charts, `column_names` must be exactly
/// `[labels_column, values_column]`. For other charts, the first column holds
/// the labels and the first numeric column among the rest holds the values.
/// Records are sorted by label, and values sharing a label are averaged.
pub fn create_chartjs_data(
    table: &Table,
    column_names: &[String],
    chart_type: ChartType,
) -> Result<ChartDataOutput, Error> {
    if column_names.is_empty() {
        return Error::err_str("column_names cannot be empty.");
    }
    let missing: Vec<&String> = column_names
        .iter()
        .filter(|c| table.column_index(c).is_none())
        .collect();
    if !missing.is_empty() {
        return Error::err_string(format!(
            "Columns not found in DataFrame: {}",
            missing.iter().join(", ")
        ));
    }

    let mut typed = TypedTable::from_table(table);
    for col in column_names {
        typed = remove_outliers_iqr(typed, col);
    }

    let index = |name: &str| -> Result<usize, Error> {
        typed
            .column_index(name)
            .ok_or_else(|| Error::from(format!("Column \"{name}\" disappeared")))
    };

    let labels_key = column_names[0].clone();
    let labels_ci = index(labels_key.as_str())?;

    let values_key: Option<String> = if chart_type.is_radial() {
        if column_names.len() != 2 {
            return Error::err_string(format!(
                "For '{chart_type}' charts, 'column_names' must contain exactly two columns: [labels_column, values_column]."
            ));
        }
        let values_ci = index(column_names[1].as_str())?;
        if !typed.kinds[values_ci].is_numeric() {
            return Error::err_string(format!(
                "Column \"{}\" is not numeric and cannot hold the values of a {chart_type} chart.",
                column_names[1]
            ));
        }
        Some(column_names[1].clone())
    } else {
        match &column_names[1..] {
            [] => None,
            [single] => {
                if !typed.kinds[index(single.as_str())?].is_numeric() {
                    return Error::err_string(format!(
                        "Column \"{single}\" is not numeric and cannot hold the chart values."
                    ));
                }
                Some(single.clone())
            }
            several => {
                let found = several
                    .iter()
                    .find(|c| index(c.as_str()).map_or(false, |ci| typed.kinds[ci].is_numeric()));
                match found {
                    Some(c) => Some(c.clone()),
                    None => {
                        return Error::err_str(
                            "No numeric column found to represent 'value' in the selected columns.",
                        )
                    }
                }
            }
        }
    };

    let values_ci: Option<usize> = values_key.as_deref().map(index).transpose()?;

    let points: Vec<(Datum, Vec<Option<f64>>)> = typed
        .rows
        .iter()
        .map(|row| {
            (
                row[labels_ci].clone(),
                values_ci.iter().map(|ci| row[*ci].as_f64()).collect(),
            )
        })
        .collect();

    let data: Vec<ChartRecord> = group_mean(points)
        .into_iter()
        .map(|(label, means)| {
            let mut record = ChartRecord::new();
            record.insert(labels_key.clone(), label);
            if let (Some(vk), Some(mean)) = (&values_key, means.first()) {
                record.insert(vk.clone(), mean.map(Datum::Float).unwrap_or(Datum::Null));
            }
            record
        })
        .collect();

    let values_key = values_key.unwrap_or_else(|| DEFAULT_VALUES_KEY.to_string());
    let options = if chart_type.is_radial() {
        ChartOptions::default()
    } else {
        ChartOptions::with_axes(&labels_key, &values_key)
    };

    Ok(ChartDataOutput {
        chart_type,
        data,
        labels_key,
        values_key,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_table::parse_csv;
    use asserting::prelude::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn record(pairs: &[(&str, Datum)]) -> ChartRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_column_kinds() {
        let t = parse_csv(b"i,f,t,m,w\n1,1.5,a,1, 7\n8.0,2,b,,\t-3\n").unwrap();
        let typed = TypedTable::from_table(&t);
        assert_that!(typed.kinds).is_equal_to(vec![
            ColumnKind::Integer,
            ColumnKind::Float,
            ColumnKind::Text,
            ColumnKind::Text,
            ColumnKind::Integer,
        ]);
        assert_that!(typed.rows[1][0].clone()).is_equal_to(Datum::Int(8));
        assert_that!(typed.rows[1][4].clone()).is_equal_to(Datum::Int(-3));
        assert_that!(typed.rows[1][3].clone()).is_equal_to(Datum::Null);
    }

    #[test]
    fn test_large_integers_stay_exact() {
        let t = parse_csv(b"id,n\n9007199254740993,1\n-9007199254740995,2\n").unwrap();
        let typed = TypedTable::from_table(&t);
        assert_that!(typed.kinds[0]).is_equal_to(ColumnKind::Integer);
        assert_that!(typed.rows[0][0].clone()).is_equal_to(Datum::Int(9_007_199_254_740_993));
        assert_that!(typed.rows[1][0].clone()).is_equal_to(Datum::Int(-9_007_199_254_740_995));
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_that!(quantile(&v, 0.25)).is_equal_to(1.75);
        assert_that!(quantile(&v, 0.75)).is_equal_to(3.25);
        assert_that!(quantile(&[5.0], 0.25)).is_equal_to(5.0);
    }

    #[test]
    fn test_remove_outliers() {
        let t = parse_csv(b"k,v\na,10\nb,11\nc,12\nd,13\ne,1000\n").unwrap();
        let typed = remove_outliers_iqr(TypedTable::from_table(&t), "v");
        assert_that!(typed.rows.len()).is_equal_to(4);
        assert!(typed
            .rows
            .iter()
            .all(|r| r[1] != Datum::Int(1000)));
    }

    #[test]
    fn test_remove_outliers_ignores_text() {
        let t = parse_csv(b"k\na\nb\n").unwrap();
        let typed = remove_outliers_iqr(TypedTable::from_table(&t), "k");
        assert_that!(typed.rows.len()).is_equal_to(2);
    }

    #[test]
    fn test_bar_chart_groups_and_sorts() {
        let t = parse_csv(b"year,sales\n2021,10\n2020,4\n2021,20\n2020,6\n").unwrap();
        let out = create_chartjs_data(&t, &names(&["year", "sales"]), ChartType::Bar).unwrap();
        assert_that!(out.labels_key.clone()).is_equal_to("year");
        assert_that!(out.values_key.clone()).is_equal_to("sales");
        assert_that!(out.data).is_equal_to(vec![
            record(&[("year", Datum::Int(2020)), ("sales", Datum::Float(5.0))]),
            record(&[("year", Datum::Int(2021)), ("sales", Datum::Float(15.0))]),
        ]);
        assert_that!(out.options).is_equal_to(ChartOptions::with_axes("year", "sales"));
    }

    #[test]
    fn test_text_labels() {
        let t = parse_csv(b"city,temp\nOslo,3\nLima,20\nOslo,5\n").unwrap();
        let out = create_chartjs_data(&t, &names(&["city", "temp"]), ChartType::Line).unwrap();
        assert_that!(out.data).is_equal_to(vec![
            record(&[("city", Datum::Text("Lima".to_string())), ("temp", Datum::Float(20.0))]),
            record(&[("city", Datum::Text("Oslo".to_string())), ("temp", Datum::Float(4.0))]),
        ]);
    }

    #[test]
    fn test_multiple_value_columns_picks_first_numeric() {
        let t = parse_csv(b"year,note,sales,cost\n2020,x,1,9\n2021,y,2,8\n").unwrap();
        let out =
            create_chartjs_data(&t, &names(&["year", "note", "sales", "cost"]), ChartType::Bar)
                .unwrap();
        assert_that!(out.values_key).is_equal_to("sales");
    }

    #[test]
    fn test_multiple_value_columns_none_numeric() {
        let t = parse_csv(b"year,a,b\n2020,x,y\n").unwrap();
        let ret = create_chartjs_data(&t, &names(&["year", "a", "b"]), ChartType::Bar);
        assert_that!(ret.unwrap_err().to_string()).contains("No numeric column");
    }

    #[test]
    fn test_labels_only() {
        let t = parse_csv(b"year,sales\n2021,1\n2020,2\n2021,3\n").unwrap();
        let out = create_chartjs_data(&t, &names(&["year"]), ChartType::Bar).unwrap();
        assert_that!(out.values_key.clone()).is_equal_to(DEFAULT_VALUES_KEY);
        assert_that!(out.data).is_equal_to(vec![
            record(&[("year", Datum::Int(2020))]),
            record(&[("year", Datum::Int(2021))]),
        ]);
    }

    #[test]
    fn test_pie_chart() {
        let t = parse_csv(b"fruit,count\napple,3\npear,5\n").unwrap();
        let out = create_chartjs_data(&t, &names(&["fruit", "count"]), ChartType::Pie).unwrap();
        assert!(out.options.scales.is_none());
        assert_that!(out.data.len()).is_equal_to(2);
    }

    #[test]
    fn test_pie_chart_with_text_values() {
        let t = parse_csv(b"fruit,color\napple,red\npear,green\n").unwrap();
        let ret = create_chartjs_data(&t, &names(&["fruit", "color"]), ChartType::Pie);
        assert_that!(ret.unwrap_err().to_string()).contains("\"color\" is not numeric");
    }

    #[test]
    fn test_pie_chart_needs_two_columns() {
        let t = parse_csv(b"fruit,count,weight\napple,3,1\n").unwrap();
        let ret = create_chartjs_data(&t, &names(&["fruit", "count", "weight"]), ChartType::Pie);
        assert_that!(ret.unwrap_err().to_string()).contains("exactly two columns");
    }

    #[test]
    fn test_empty_and_missing_columns() {
        let t = parse_csv(b"a,b\n1,2\n").unwrap();
        let ret = create_chartjs_data(&t, &[], ChartType::Bar);
        assert_that!(ret.unwrap_err().to_string()).is_equal_to("column_names cannot be empty.");
        let ret = create_chartjs_data(&t, &names(&["a", "zz", "yy"]), ChartType::Bar);
        assert_that!(ret.unwrap_err().to_string()).contains("zz, yy");
    }
}
