//! File-level metadata: counts, column names, and a representative year and
//! department taken as the most frequent value of the detected column.

use records::extract::{truncate_chars, DEPARTMENT_MAX_CHARS};
use records::{FieldSynonyms, FileMetadata, Scalar};
use tracing::debug;

use crate::table::Table;

/// Columns whose trimmed, lower-cased name equals one of `candidates`, in
/// candidate priority order (first matching column per candidate).
fn candidate_columns(table: &Table, candidates: &[String]) -> Vec<usize> {
    candidates
        .iter()
        .filter_map(|candidate| {
            table
                .columns()
                .iter()
                .position(|name| name.trim().to_lowercase() == *candidate)
        })
        .collect()
}

/// Most frequent value of a sorted sequence; ties go to the earliest, i.e.
/// the smallest, value.
fn sorted_mode<T: PartialEq>(sorted: Vec<T>) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    let mut current: Option<(T, usize)> = None;
    for value in sorted {
        current = match current {
            Some((run, count)) if run == value => Some((run, count + 1)),
            other => {
                if let Some((run, count)) = other {
                    if best.as_ref().map_or(true, |(_, best_count)| count > *best_count) {
                        best = Some((run, count));
                    }
                }
                Some((value, 1))
            }
        };
    }
    if let Some((run, count)) = current {
        if best.as_ref().map_or(true, |(_, best_count)| count > *best_count) {
            best = Some((run, count));
        }
    }
    best.map(|(value, _)| value)
}

fn year_mode(table: &Table, column: usize) -> Option<i32> {
    let mut numbers: Vec<f64> = table.column_values(column).filter_map(Scalar::coerce_f64).collect();
    numbers.sort_by(f64::total_cmp);
    let mode = sorted_mode(numbers)?;
    let year = mode.trunc();
    if year < i32::MIN as f64 || year > i32::MAX as f64 {
        debug!(mode, "year mode does not fit an integer");
        return None;
    }
    Some(year as i32)
}

fn department_mode(table: &Table, column: usize) -> Option<String> {
    let mut values: Vec<String> = table.column_values(column).filter_map(Scalar::to_text).collect();
    values.sort();
    sorted_mode(values).map(|s| truncate_chars(&s, DEPARTMENT_MAX_CHARS))
}

pub fn extract_metadata(table: &Table, synonyms: &FieldSynonyms) -> FileMetadata {
    let columns = table.columns();

    let year = candidate_columns(table, &synonyms.year)
        .into_iter()
        .find_map(|index| {
            let year = year_mode(table, index);
            debug!(column = %columns[index], ?year, "year column candidate");
            year
        });

    let department = candidate_columns(table, &synonyms.department)
        .into_iter()
        .find_map(|index| {
            let department = department_mode(table, index);
            debug!(column = %columns[index], ?department, "department column candidate");
            department
        });

    FileMetadata {
        row_count: table.row_count() as i64,
        column_count: table.column_count() as i64,
        columns: columns.to_vec(),
        year,
        department,
    }
}
