//! Group-by-count over a filtered record set.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::QueryError;
use crate::filter::{FilterCriteria, FilterEngine, RecordSet};
use crate::model::{IndexedField, Record};

/// Groups kept after sorting by count.
pub const TOP_N: usize = 20;

/// Label/value series consumed by chart and report renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub labels: Vec<String>,
    pub values: Vec<i64>,
    pub title: String,
    pub total: i64,
}

/// Strips a chart-type prefix such as `por_dependencia` or `by_region`.
pub fn normalize_group_field(field: &str) -> &str {
    field
        .strip_prefix("por_")
        .or_else(|| field.strip_prefix("by_"))
        .unwrap_or(field)
}

/// `"Registros por <Field>"`, underscores read as spaces and each word
/// capitalized.
pub fn title_for(field: &str) -> String {
    let words: Vec<String> = field
        .replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("Registros por {}", words.join(" "))
}

fn group_key(record: &Record, field: &str, indexed: Option<IndexedField>) -> Option<String> {
    match indexed {
        Some(indexed) => record.indexed_text(indexed),
        None => record
            .payload
            .get_ignore_case(field)
            .and_then(|v| v.to_text())
            .filter(|text| !text.trim().is_empty()),
    }
}

/// Counts records per group. Indexed categorical fields group by the stored
/// column; any other name groups by payload key, exact match first, then
/// ignoring case. Records without a usable key are skipped.
pub fn aggregate_records<'a, I>(group_field: &str, records: I) -> Result<Aggregation, QueryError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let field = normalize_group_field(group_field.trim());
    if field.is_empty() {
        return Err(QueryError::EmptyField);
    }
    let indexed = IndexedField::from_name(field).filter(|f| f.is_categorical());

    let mut counts: IndexMap<String, i64> = IndexMap::new();
    let mut skipped = 0usize;
    for record in records {
        match group_key(record, field, indexed) {
            Some(key) => *counts.entry(key).or_insert(0) += 1,
            None => skipped += 1,
        }
    }

    let mut groups: Vec<(String, i64)> = counts.into_iter().collect();
    // Stable sort: equal counts stay in first-seen order.
    groups.sort_by(|a, b| b.1.cmp(&a.1));
    groups.truncate(TOP_N);

    debug!(
        field,
        indexed = indexed.is_some(),
        groups = groups.len(),
        skipped,
        "aggregated records"
    );

    let total = groups.iter().map(|(_, count)| count).sum();
    let (labels, values) = groups.into_iter().unzip();
    Ok(Aggregation {
        labels,
        values,
        title: title_for(field),
        total,
    })
}

#[derive(Clone)]
pub struct AggregationEngine {
    filter: FilterEngine,
}

impl AggregationEngine {
    pub fn new(filter: FilterEngine) -> Self {
        Self { filter }
    }

    /// Resolves `criteria` through the filter engine, then aggregates.
    pub async fn aggregate(
        &self,
        group_field: &str,
        criteria: &FilterCriteria,
        requester: Option<Uuid>,
    ) -> Result<Aggregation, QueryError> {
        if normalize_group_field(group_field.trim()).is_empty() {
            return Err(QueryError::EmptyField);
        }
        let set = self.filter.build_query(criteria, requester).await?;
        self.aggregate_set(group_field, &set)
    }

    pub fn aggregate_set(&self, group_field: &str, set: &RecordSet) -> Result<Aggregation, QueryError> {
        aggregate_records(group_field, set)
    }
}
