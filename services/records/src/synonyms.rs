//! Ordered synonym lists used to recognise semantic columns.
//!
//! Matching is case-insensitive and priority-ordered: the first synonym that
//! names a present column wins. Lists are stored lower-cased.

/// Column-name synonyms for each extracted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSynonyms {
    pub year: Vec<String>,
    pub department: Vec<String>,
    pub indicator: Vec<String>,
    pub value: Vec<String>,
}

const DEFAULT_YEAR_KEYS: &[&str] = &["año", "anio", "year", "fecha"];
const DEFAULT_DEPARTMENT_KEYS: &[&str] = &["dependencia", "area", "secretaria", "oficina"];
const DEFAULT_INDICATOR_KEYS: &[&str] = &["indicador", "nombre_indicador", "descripcion"];
const DEFAULT_VALUE_KEYS: &[&str] = &["valor", "cantidad", "total", "resultado"];

impl Default for FieldSynonyms {
    fn default() -> Self {
        Self {
            year: owned(DEFAULT_YEAR_KEYS),
            department: owned(DEFAULT_DEPARTMENT_KEYS),
            indicator: owned(DEFAULT_INDICATOR_KEYS),
            value: owned(DEFAULT_VALUE_KEYS),
        }
    }
}

impl FieldSynonyms {
    /// Defaults overridden by `YEAR_KEYS`, `DEPARTMENT_KEYS`,
    /// `INDICATOR_KEYS` and `VALUE_KEYS` (comma-separated).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let pick = |var: &str, fallback: Vec<String>| {
            lookup(var)
                .map(|raw| parse_list(&raw))
                .filter(|list| !list.is_empty())
                .unwrap_or(fallback)
        };
        Self {
            year: pick("YEAR_KEYS", defaults.year),
            department: pick("DEPARTMENT_KEYS", defaults.department),
            indicator: pick("INDICATOR_KEYS", defaults.indicator),
            value: pick("VALUE_KEYS", defaults.value),
        }
    }
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}
