//! Filter engine: loosely-typed criteria in, file-scoped record sets out.
//!
//! Criteria combine three kinds of predicates, all AND-ed:
//! - indexed-field filters (`year` as a contains-match on the stored integer's
//!   string form, `department`/`indicator` as case-insensitive contains)
//! - a single `textSearch` on one payload key
//! - any number of `customFilters`, one payload key each
//!
//! Payload predicates require the exact key to be present and match when the
//! lower-cased string form of the value contains the lower-cased needle.
//!
//! Without a `fileId` the engine falls back to the most recent upload. By
//! default that is the most recent upload system-wide, regardless of who asks,
//! so callers can see other users' latest files. `strict_owner_scoping`
//! restricts the fallback to the requester's own uploads.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueryError;
use crate::model::{IndexedField, Record, UploadedFile};
use crate::store::RecordStore;

/// Filter request as received from callers. Values may be strings or
/// numbers; the Spanish keys of the original portal are accepted as aliases.
/// Unknown keys are rejected so a misspelled filter never widens the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterCriteria {
    #[serde(default, alias = "file_id", alias = "archivo_id")]
    pub file_id: Option<Value>,
    #[serde(default, alias = "anio")]
    pub year: Option<Value>,
    #[serde(default, alias = "dependencia")]
    pub department: Option<Value>,
    #[serde(default, alias = "indicador")]
    pub indicator: Option<Value>,
    #[serde(default, alias = "text_search", alias = "busqueda_texto")]
    pub text_search: Option<TextSearch>,
    #[serde(default, alias = "custom_filters", alias = "filtros_json")]
    pub custom_filters: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextSearch {
    #[serde(alias = "campo")]
    pub field: String,
    #[serde(alias = "valor")]
    pub value: Value,
}

impl FilterCriteria {
    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| QueryError::invalid(e.to_string()))
    }

    pub fn for_file(file_id: Uuid) -> Self {
        Self {
            file_id: Some(Value::String(file_id.to_string())),
            ..Self::default()
        }
    }

    /// Validates the loose values and lowers them into a [`RecordQuery`].
    /// The file id stays `None` when the criteria do not name one.
    pub fn resolve(&self) -> Result<RecordQuery, QueryError> {
        let file_id = match loose_text(self.file_id.as_ref(), "fileId")? {
            Some(raw) => Some(
                Uuid::parse_str(raw.trim())
                    .map_err(|_| QueryError::invalid(format!("fileId '{}' is not a valid id", raw)))?,
            ),
            None => None,
        };

        let mut payload_contains = Vec::new();
        if let Some(search) = &self.text_search {
            if search.field.is_empty() {
                return Err(QueryError::invalid("textSearch.field must not be empty"));
            }
            if let Some(needle) = loose_text(Some(&search.value), "textSearch.value")? {
                payload_contains.push(PayloadPredicate::new(&search.field, &needle));
            }
        }
        for (field, value) in &self.custom_filters {
            if field.is_empty() {
                return Err(QueryError::invalid("customFilters keys must not be empty"));
            }
            if let Some(needle) = loose_text(Some(value), field)? {
                payload_contains.push(PayloadPredicate::new(field, &needle));
            }
        }

        Ok(RecordQuery {
            file_id,
            year_contains: loose_text(self.year.as_ref(), "year")?,
            department_contains: loose_text(self.department.as_ref(), "department")?
                .map(|s| s.to_lowercase()),
            indicator_contains: loose_text(self.indicator.as_ref(), "indicator")?
                .map(|s| s.to_lowercase()),
            payload_contains,
        })
    }
}

/// Reads a loosely-typed scalar as text. Null and empty strings mean "no
/// filter"; arrays and objects are rejected.
fn loose_text(value: Option<&Value>, name: &str) -> Result<Option<String>, QueryError> {
    let text = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => {
            return Err(QueryError::invalid(format!(
                "'{}' must be a string or number, got {}",
                name, other
            )))
        }
    };
    Ok((!text.is_empty()).then_some(text))
}

/// A payload key that must be present and whose value must contain `needle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPredicate {
    pub key: String,
    /// Lower-cased.
    pub needle: String,
}

impl PayloadPredicate {
    pub fn new(key: &str, needle: &str) -> Self {
        Self {
            key: key.to_string(),
            needle: needle.to_lowercase(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record
            .payload
            .get(&self.key)
            .and_then(|v| v.to_text())
            .is_some_and(|text| text.to_lowercase().contains(&self.needle))
    }
}

/// Resolved, typed predicate set. Stores translate it to SQL or evaluate it
/// with [`RecordQuery::matches`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub file_id: Option<Uuid>,
    pub year_contains: Option<String>,
    /// Lower-cased.
    pub department_contains: Option<String>,
    /// Lower-cased.
    pub indicator_contains: Option<String>,
    pub payload_contains: Vec<PayloadPredicate>,
}

impl RecordQuery {
    pub fn for_file(file_id: Uuid) -> Self {
        Self {
            file_id: Some(file_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.file_id.is_some_and(|id| id != record.file_id) {
            return false;
        }
        if let Some(year) = &self.year_contains {
            if !record.year.is_some_and(|y| y.to_string().contains(year.as_str())) {
                return false;
            }
        }
        if !contains_lower(record.department.as_deref(), self.department_contains.as_deref()) {
            return false;
        }
        if !contains_lower(record.indicator.as_deref(), self.indicator_contains.as_deref()) {
            return false;
        }
        self.payload_contains.iter().all(|p| p.matches(record))
    }
}

fn contains_lower(haystack: Option<&str>, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.is_some_and(|h| h.to_lowercase().contains(needle)),
    }
}

/// Listing filter for uploaded files. `year` and `owner_id` match exactly,
/// `department` is a case-insensitive contains; unset or empty means no
/// filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileFilter {
    #[serde(default, alias = "anio")]
    pub year: Option<i32>,
    #[serde(default, alias = "dependencia")]
    pub department: Option<String>,
    #[serde(default, alias = "usuario", alias = "owner")]
    pub owner_id: Option<Uuid>,
}

impl FileFilter {
    /// Lower-cased department needle, if any.
    pub fn department_needle(&self) -> Option<String> {
        self.department
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, file: &UploadedFile) -> bool {
        if self.year.is_some_and(|year| file.year != Some(year)) {
            return false;
        }
        if self.owner_id.is_some_and(|owner| file.owner_id != owner) {
            return false;
        }
        contains_lower(file.department.as_deref(), self.department_needle().as_deref())
    }
}

/// Filtered records of one file, with the file joined. Iterating borrows,
/// so the set can be walked any number of times.
#[derive(Debug, Clone)]
pub struct RecordSet {
    file: Arc<UploadedFile>,
    records: Vec<Record>,
}

impl RecordSet {
    pub fn new(file: UploadedFile, records: Vec<Record>) -> Self {
        Self {
            file: Arc::new(file),
            records,
        }
    }

    pub fn file(&self) -> &UploadedFile {
        &self.file
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Restrict the latest-file fallback to the requester's own uploads.
    pub strict_owner_scoping: bool,
}

impl FilterOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `STRICT_OWNER_SCOPING` (`1`/`true`/`yes`/`on`, any case).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            strict_owner_scoping: lookup("STRICT_OWNER_SCOPING").is_some_and(|v| parse_flag(&v)),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Clone)]
pub struct FilterEngine {
    store: Arc<dyn RecordStore>,
    options: FilterOptions,
}

impl FilterEngine {
    pub fn new(store: Arc<dyn RecordStore>, options: FilterOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Resolves criteria into the matching records of one file.
    pub async fn build_query(
        &self,
        criteria: &FilterCriteria,
        requester: Option<Uuid>,
    ) -> Result<RecordSet, QueryError> {
        let mut query = criteria.resolve()?;

        let file = match query.file_id {
            Some(file_id) => self
                .store
                .get_file(file_id)
                .await?
                .ok_or(QueryError::FileNotFound(file_id))?,
            None => {
                let file = self.latest_file(requester).await?;
                debug!(file_id = %file.file_id, "no fileId given, using latest upload");
                query.file_id = Some(file.file_id);
                file
            }
        };

        let records = self.store.find_records(&query).await?;
        debug!(file_id = %file.file_id, matched = records.len(), "filtered records");
        Ok(RecordSet::new(file, records))
    }

    async fn latest_file(&self, requester: Option<Uuid>) -> Result<UploadedFile, QueryError> {
        let owner = if self.options.strict_owner_scoping {
            Some(requester.ok_or(QueryError::MissingRequester)?)
        } else {
            None
        };
        self.store
            .latest_file(owner)
            .await?
            .ok_or(QueryError::NoFilesAvailable)
    }

    /// Distinct values of a field. Indexed field names read the typed
    /// column; anything else is looked up as an exact payload key (no case
    /// folding, unlike aggregation) and returned sorted.
    pub async fn list_distinct_values(
        &self,
        field: &str,
        file_id: Option<Uuid>,
    ) -> Result<Vec<String>, QueryError> {
        if field.is_empty() {
            return Err(QueryError::EmptyField);
        }
        if let Some(indexed) = IndexedField::from_name(field) {
            return Ok(self.store.distinct_indexed(indexed, file_id).await?);
        }

        let payloads = self.store.payloads(file_id).await?;
        let mut values: Vec<String> = payloads
            .iter()
            .filter_map(|p| p.get(field))
            .filter_map(|v| v.to_text())
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }
}
