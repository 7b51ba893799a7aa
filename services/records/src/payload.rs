//! Schema-less row payloads.
//!
//! A payload keeps every column of the source row, in column order, mapped to
//! a [`Scalar`]. Numbers stay numbers and everything else becomes text, so the
//! same coercion rules apply whether a value is read back from memory or from
//! the JSONB column in PostgreSQL.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest float magnitude that still converts losslessly to `i64`.
const I64_SAFE_BOUND: f64 = 9_223_372_036_854_775_807.0;

/// One cell value: null, a number, or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Canonical numeric cell. NaN and infinities become null, integral
    /// values become `Int` so they print without a trailing `.0`.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            Scalar::Null
        } else if value.fract() == 0.0 && value.abs() < I64_SAFE_BOUND {
            Scalar::Int(value as i64)
        } else {
            Scalar::Float(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// String form used for contains-filters, distinct values and grouping.
    /// Null has no string form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Integer coercion: numbers truncate toward zero, strings must parse as
    /// an integer after trimming.
    pub fn coerce_i64(&self) -> Option<i64> {
        match self {
            Scalar::Null => None,
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.is_finite() && f.abs() < I64_SAFE_BOUND => Some(f.trunc() as i64),
            Scalar::Float(_) => None,
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Decimal coercion. Non-finite results are rejected.
    pub fn coerce_f64(&self) -> Option<f64> {
        let value = match self {
            Scalar::Null => return None,
            Scalar::Int(i) => *i as f64,
            Scalar::Float(f) => *f,
            Scalar::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::from_f64(value)
    }
}

/// Column name -> cell value, in source column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(IndexMap<String, Scalar>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a column. A repeated column name overwrites the earlier value
    /// and keeps the earlier position.
    pub fn insert(&mut self, key: impl Into<String>, value: Scalar) {
        self.0.insert(key.into(), value);
    }

    /// Exact key lookup.
    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Exact key first, then the first key that matches ignoring case.
    pub fn get_ignore_case(&self, key: &str) -> Option<&Scalar> {
        if let Some(value) = self.0.get(key) {
            return Some(value);
        }
        let wanted = key.to_lowercase();
        self.0
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .map(|(_, v)| v)
    }

    /// Lower-cased view of the payload. When two keys fold to the same
    /// lower-case key the later column wins.
    pub fn lowercased(&self) -> IndexMap<String, &Scalar> {
        let mut folded = IndexMap::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            folded.insert(key.to_lowercase(), value);
        }
        folded
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Scalar)> for Payload {
    fn from_iter<T: IntoIterator<Item = (K, Scalar)>>(iter: T) -> Self {
        let mut payload = Payload::new();
        for (key, value) in iter {
            payload.insert(key, value);
        }
        payload
    }
}
