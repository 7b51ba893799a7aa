//! Derivation of the indexed fields from a row payload.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::payload::{Payload, Scalar};
use crate::synonyms::FieldSynonyms;

pub const DEPARTMENT_MAX_CHARS: usize = 200;
pub const INDICATOR_MAX_CHARS: usize = 300;

/// The four fields cached on every record for indexed filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub year: Option<i32>,
    pub department: Option<String>,
    pub indicator: Option<String>,
    pub value: Option<f64>,
}

/// Extracts year, department, indicator and value. Each field is resolved
/// independently against its synonym list; failures leave the field unset.
pub fn extract_fields(payload: &Payload, synonyms: &FieldSynonyms) -> ExtractedFields {
    let folded = payload.lowercased();
    let lookup = |key: &String| folded.get(key.as_str()).copied();

    let year = synonyms.year.iter().find_map(|key| {
        let value = lookup(key)?;
        let year = value.coerce_i64().and_then(|y| i32::try_from(y).ok());
        if year.is_none() {
            debug!(key = %key, value = %value, "year candidate is not an integer");
        }
        year
    });

    let department = first_present(&synonyms.department, &lookup)
        .and_then(Scalar::to_text)
        .map(|s| truncate_chars(&s, DEPARTMENT_MAX_CHARS));

    let indicator = first_present(&synonyms.indicator, &lookup)
        .and_then(Scalar::to_text)
        .map(|s| truncate_chars(&s, INDICATOR_MAX_CHARS));

    let value = synonyms.value.iter().find_map(|key| {
        let value = lookup(key)?;
        let number = value.coerce_f64();
        if number.is_none() {
            debug!(key = %key, value = %value, "value candidate is not numeric");
        }
        number
    });

    ExtractedFields {
        year,
        department,
        indicator,
        value,
    }
}

fn first_present<'a, F>(keys: &[String], lookup: &F) -> Option<&'a Scalar>
where
    F: Fn(&String) -> Option<&'a Scalar>,
{
    keys.iter().find_map(lookup)
}

/// Truncates to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: Vec<(&str, Scalar)>) -> Payload {
        entries.into_iter().collect()
    }

    #[test]
    fn test_extracts_all_fields_case_insensitively() {
        let p = payload(vec![
            ("Año", Scalar::Int(2023)),
            ("DEPENDENCIA", Scalar::from("Salud")),
            ("Indicador", Scalar::from("Vacunación")),
            ("Valor", Scalar::Int(10)),
        ]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.year, Some(2023));
        assert_eq!(fields.department.as_deref(), Some("Salud"));
        assert_eq!(fields.indicator.as_deref(), Some("Vacunación"));
        assert_eq!(fields.value, Some(10.0));
    }

    #[test]
    fn test_year_falls_through_to_next_key_on_coercion_failure() {
        let p = payload(vec![
            ("Año", Scalar::from("sin dato")),
            ("Fecha", Scalar::from("2021")),
        ]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.year, Some(2021));
    }

    #[test]
    fn test_year_truncates_floats_and_rejects_decimal_strings() {
        let p = payload(vec![("year", Scalar::Float(2022.7))]);
        assert_eq!(extract_fields(&p, &FieldSynonyms::default()).year, Some(2022));

        let p = payload(vec![("year", Scalar::from("2022.0"))]);
        assert_eq!(extract_fields(&p, &FieldSynonyms::default()).year, None);
    }

    #[test]
    fn test_year_out_of_i32_range_is_unset() {
        let p = payload(vec![("anio", Scalar::Int(10_000_000_000))]);
        assert_eq!(extract_fields(&p, &FieldSynonyms::default()).year, None);
    }

    #[test]
    fn test_department_uses_first_present_key_only() {
        let p = payload(vec![
            ("Oficina", Scalar::from("Tesorería")),
            ("Area", Scalar::from("Finanzas")),
        ]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.department.as_deref(), Some("Finanzas"));
    }

    #[test]
    fn test_department_null_value_stays_null() {
        let p = payload(vec![("dependencia", Scalar::Null), ("area", Scalar::from("X"))]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.department, None);
    }

    #[test]
    fn test_numeric_department_is_stringified() {
        let p = payload(vec![("secretaria", Scalar::Int(7))]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.department.as_deref(), Some("7"));
    }

    #[test]
    fn test_truncation_limits() {
        let long_dep = "d".repeat(250);
        let long_ind = "ñ".repeat(400);
        let p = payload(vec![
            ("dependencia", Scalar::from(long_dep.as_str())),
            ("descripcion", Scalar::from(long_ind.as_str())),
        ]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.department.unwrap().chars().count(), DEPARTMENT_MAX_CHARS);
        assert_eq!(fields.indicator.unwrap().chars().count(), INDICATOR_MAX_CHARS);
    }

    #[test]
    fn test_value_falls_through_to_next_key() {
        let p = payload(vec![
            ("Valor", Scalar::from("n/a")),
            ("Cantidad", Scalar::from(" 42.5 ")),
        ]);
        let fields = extract_fields(&p, &FieldSynonyms::default());
        assert_eq!(fields.value, Some(42.5));
    }

    #[test]
    fn test_missing_fields_are_unset() {
        let p = payload(vec![("Region", Scalar::from("Norte"))]);
        assert_eq!(extract_fields(&p, &FieldSynonyms::default()), ExtractedFields::default());
    }

    #[test]
    fn test_custom_synonyms() {
        let synonyms = FieldSynonyms {
            department: vec!["unidad".to_string()],
            ..FieldSynonyms::default()
        };
        let p = payload(vec![("Unidad", Scalar::from("Obras")), ("Dependencia", Scalar::from("Salud"))]);
        let fields = extract_fields(&p, &synonyms);
        assert_eq!(fields.department.as_deref(), Some("Obras"));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let p = payload(vec![
            ("anio", Scalar::from("2020")),
            ("area", Scalar::from("Obras")),
            ("total", Scalar::Float(3.25)),
        ]);
        let baseline = extract_fields(&p, &FieldSynonyms::default());
        for _ in 0..10 {
            assert_eq!(extract_fields(&p, &FieldSynonyms::default()), baseline);
        }
    }
}
