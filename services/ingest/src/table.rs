//! Spreadsheet bytes -> ordered table of named columns and scalar cells.
//!
//! The first worksheet is read, its first row is the header. The modern
//! (xlsx) reader is tried first and the legacy (xls) reader second.

use std::fmt::Display;
use std::io::{Cursor, Read, Seek};

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xls, Xlsx};
use records::{Payload, Scalar};
use tracing::debug;

use crate::error::ParseError;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parsed sheet. Every row has exactly one cell per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl Table {
    /// Builds a table, padding short rows with nulls and dropping rows that
    /// are entirely null.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Scalar::Null);
                row
            })
            .filter(|row| row.iter().any(|cell| !cell.is_null()))
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Cells of one column, top to bottom.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Scalar> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// Row `index` as a column-name -> value payload.
    pub fn row_payload(&self, index: usize) -> Option<Payload> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
        )
    }
}

/// Parses spreadsheet bytes. `filename_hint` only labels errors.
pub fn parse(bytes: &[u8], filename_hint: &str) -> Result<Table, ParseError> {
    let modern = match open_workbook_from_rs::<Xlsx<_>, _>(Cursor::new(bytes)) {
        Ok(workbook) => match first_sheet(workbook) {
            Ok(range) => return Ok(range_to_table(&range)),
            Err(e) => e,
        },
        Err(e) => e.to_string(),
    };
    debug!(filename = filename_hint, error = %modern, "xlsx reader failed, trying xls");

    let legacy = match open_workbook_from_rs::<Xls<_>, _>(Cursor::new(bytes)) {
        Ok(workbook) => match first_sheet(workbook) {
            Ok(range) => return Ok(range_to_table(&range)),
            Err(e) => e,
        },
        Err(e) => e.to_string(),
    };

    Err(ParseError {
        filename: filename_hint.to_string(),
        modern,
        legacy,
    })
}

fn first_sheet<R, RS>(mut workbook: R) -> Result<Range<Data>, String>
where
    R: Reader<RS>,
    RS: Read + Seek,
    R::Error: Display,
{
    let sheet_names = workbook.sheet_names();
    let sheet_name = sheet_names
        .first()
        .ok_or_else(|| "workbook has no sheets".to_string())?;
    debug!(sheet = %sheet_name, sheets = sheet_names.len(), "reading first sheet");
    workbook.worksheet_range(sheet_name).map_err(|e| e.to_string())
}

fn range_to_table(range: &Range<Data>) -> Table {
    let mut rows = range.rows();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .enumerate()
            .map(|(i, cell)| header_name(i, cell))
            .collect(),
        None => Vec::new(),
    };
    let body = rows.map(|row| row.iter().map(cell_to_scalar).collect()).collect();
    Table::new(columns, body)
}

fn header_name(index: usize, cell: &Data) -> String {
    let name = cell_to_scalar(cell).to_string();
    let name = name.trim();
    if name.is_empty() {
        format!("Unnamed: {}", index)
    } else {
        name.to_string()
    }
}

/// Converts one cell. Blank strings, error cells and NaN become null.
pub fn cell_to_scalar(cell: &Data) -> Scalar {
    match cell {
        Data::Empty | Data::Error(_) => Scalar::Null,
        Data::Int(i) => Scalar::Int(*i),
        Data::Float(f) => Scalar::from_f64(*f),
        Data::String(s) if s.trim().is_empty() => Scalar::Null,
        Data::String(s) => Scalar::Text(s.clone()),
        Data::Bool(b) => Scalar::from(if *b { "True" } else { "False" }),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) => Scalar::Text(datetime.format(DATETIME_FORMAT).to_string()),
            None => Scalar::from_f64(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Scalar::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    fn workbook_bytes(build: impl FnOnce(&mut rust_xlsxwriter::Worksheet)) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        build(worksheet);
        workbook.save_to_buffer().unwrap()
    }

    // -------------------------------------------------------------------------
    // HEADERS
    // -------------------------------------------------------------------------

    #[test]
    fn test_header_names_are_trimmed_and_kept_in_order() {
        let bytes = workbook_bytes(|ws| {
            ws.write_string(0, 0, "  Año ").unwrap();
            ws.write_string(0, 1, "Dependencia").unwrap();
            ws.write_number(0, 2, 2024.0).unwrap();
            ws.write_string(1, 0, "x").unwrap();
        });
        let table = parse(&bytes, "h.xlsx").unwrap();
        assert_eq!(table.columns(), &["Año", "Dependencia", "2024"]);
    }

    #[test]
    fn test_blank_header_is_named_by_position() {
        let bytes = workbook_bytes(|ws| {
            ws.write_string(0, 0, "A").unwrap();
            ws.write_string(0, 2, "C").unwrap();
            ws.write_string(1, 1, "middle").unwrap();
        });
        let table = parse(&bytes, "h.xlsx").unwrap();
        assert_eq!(table.columns(), &["A", "Unnamed: 1", "C"]);
    }

    #[test]
    fn test_duplicate_headers_are_preserved() {
        let bytes = workbook_bytes(|ws| {
            ws.write_string(0, 0, "Valor").unwrap();
            ws.write_string(0, 1, "Valor ").unwrap();
            ws.write_number(1, 0, 1.0).unwrap();
            ws.write_number(1, 1, 2.0).unwrap();
        });
        let table = parse(&bytes, "d.xlsx").unwrap();
        assert_eq!(table.columns(), &["Valor", "Valor"]);
        let payload = table.row_payload(0).unwrap();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get("Valor"), Some(&Scalar::Int(2)));
    }

    // -------------------------------------------------------------------------
    // CELLS AND ROWS
    // -------------------------------------------------------------------------

    #[test]
    fn test_cell_conversion() {
        let bytes = workbook_bytes(|ws| {
            for (col, name) in ["n", "f", "s", "b", "d", "blank"].iter().enumerate() {
                ws.write_string(0, col as u16, *name).unwrap();
            }
            ws.write_number(1, 0, 2023.0).unwrap();
            ws.write_number(1, 1, 1234.56).unwrap();
            ws.write_string(1, 2, " Salud ").unwrap();
            ws.write_boolean(1, 3, true).unwrap();
            let date = ExcelDateTime::from_ymd(2023, 5, 17).unwrap();
            ws.write_datetime_with_format(1, 4, &date, &Format::new().set_num_format("yyyy-mm-dd"))
                .unwrap();
            ws.write_string(1, 5, "   ").unwrap();
        });
        let table = parse(&bytes, "c.xlsx").unwrap();
        let row = &table.rows()[0];
        assert_eq!(row[0], Scalar::Int(2023));
        assert_eq!(row[1], Scalar::Float(1234.56));
        assert_eq!(row[2], Scalar::from(" Salud "));
        assert_eq!(row[3], Scalar::from("True"));
        assert_eq!(row[4], Scalar::from("2023-05-17 00:00:00"));
        assert_eq!(row[5], Scalar::Null);
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let bytes = workbook_bytes(|ws| {
            ws.write_string(0, 0, "Dependencia").unwrap();
            ws.write_string(0, 1, "Valor").unwrap();
            ws.write_string(1, 0, "Salud").unwrap();
            ws.write_number(1, 1, 10.0).unwrap();
            ws.write_string(2, 0, "  ").unwrap();
            ws.write_string(3, 0, "Obras").unwrap();
        });
        let table = parse(&bytes, "b.xlsx").unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[1], vec![Scalar::from("Obras"), Scalar::Null]);
    }

    #[test]
    fn test_header_only_sheet_has_no_rows() {
        let bytes = workbook_bytes(|ws| {
            ws.write_string(0, 0, "Dependencia").unwrap();
        });
        let table = parse(&bytes, "e.xlsx").unwrap();
        assert_eq!(table.column_count(), 1);
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_table_new_pads_and_filters() {
        let table = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![Scalar::Int(1)], vec![Scalar::Null, Scalar::Null], vec![]],
        );
        assert_eq!(table.rows(), &[vec![Scalar::Int(1), Scalar::Null]]);
        assert_eq!(table.column_values(0).collect::<Vec<_>>(), vec![&Scalar::Int(1)]);
    }

    // -------------------------------------------------------------------------
    // LEGACY XLS
    // -------------------------------------------------------------------------

    const LEGACY_XLS: &[u8] = include_bytes!("../tests/fixtures/indicadores.xls");

    #[test]
    fn test_legacy_xls_is_read_by_fallback_reader() {
        let table = parse(LEGACY_XLS, "indicadores.xls").unwrap();
        assert_eq!(table.columns(), &["Año", "Dependencia", "Indicador", "Valor"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.rows()[0],
            vec![
                Scalar::Int(2023),
                Scalar::from("Salud"),
                Scalar::from("Vacunación"),
                Scalar::Int(10),
            ]
        );
        assert_eq!(table.rows()[1][1], Scalar::from("Educación"));
        assert_eq!(table.rows()[1][2], Scalar::from("Matrícula"));
    }

    #[test]
    fn test_legacy_xls_under_xlsx_name_still_parses() {
        let table = parse(LEGACY_XLS, "renombrado.xlsx").unwrap();
        assert_eq!(table.column_count(), 4);
    }

    // -------------------------------------------------------------------------
    // FAILURES
    // -------------------------------------------------------------------------

    #[test]
    fn test_garbage_fails_with_both_reader_errors() {
        let err = parse(b"definitely not a workbook", "roto.xlsx").unwrap_err();
        assert_eq!(err.filename, "roto.xlsx");
        assert!(!err.modern.is_empty());
        assert!(!err.legacy.is_empty());
    }
}
