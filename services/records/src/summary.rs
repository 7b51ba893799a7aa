//! Read-side reports: per-file summary, portal-wide statistics and paged
//! record search.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueryError;
use crate::filter::{FileFilter, FilterCriteria, FilterEngine, RecordQuery};
use crate::model::{IndexedField, Record};
use crate::store::RecordStore;

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_id: Uuid,
    pub name: String,
    pub record_count: i64,
    pub uploaded_at: DateTime<Utc>,
    pub columns: Vec<String>,
    pub years: Vec<i32>,
    pub departments: Vec<String>,
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_files: usize,
    pub total_records: i64,
    pub processed_files: usize,
    pub distinct_departments: usize,
    pub years: Vec<i32>,
    pub departments: Vec<String>,
}

/// One page of search results, numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<Record>,
    pub total: usize,
    pub pages: usize,
    pub page: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

fn parse_years(values: Vec<String>) -> Vec<i32> {
    values.iter().filter_map(|v| v.parse().ok()).collect()
}

pub async fn file_summary(store: &dyn RecordStore, file_id: Uuid) -> Result<FileSummary, QueryError> {
    let file = store
        .get_file(file_id)
        .await?
        .ok_or(QueryError::FileNotFound(file_id))?;

    let scope = Some(file_id);
    Ok(FileSummary {
        record_count: store.count_records(scope).await?,
        years: parse_years(store.distinct_indexed(IndexedField::Year, scope).await?),
        departments: store.distinct_indexed(IndexedField::Department, scope).await?,
        indicators: store.distinct_indexed(IndexedField::Indicator, scope).await?,
        file_id: file.file_id,
        name: file.name,
        uploaded_at: file.uploaded_at,
        columns: file.columns,
    })
}

pub async fn statistics(store: &dyn RecordStore) -> Result<Statistics, QueryError> {
    let files = store.list_files(&FileFilter::default()).await?;
    let departments = store.distinct_indexed(IndexedField::Department, None).await?;
    Ok(Statistics {
        total_files: files.len(),
        total_records: store.count_records(None).await?,
        processed_files: files.iter().filter(|f| f.processed).count(),
        distinct_departments: departments.len(),
        years: parse_years(store.distinct_indexed(IndexedField::Year, None).await?),
        departments,
    })
}

/// Criteria filtering plus a case-insensitive `term` matched against the
/// record's indicator, department, or owning file name. Empty criteria search
/// every file; otherwise the filter engine's file resolution applies. A page
/// outside `1..=pages`, including page 0, resolves to the last page.
pub async fn search_records(
    filter: &FilterEngine,
    term: &str,
    criteria: &FilterCriteria,
    page: usize,
    page_size: usize,
    requester: Option<Uuid>,
) -> Result<SearchPage, QueryError> {
    if page_size == 0 {
        return Err(QueryError::invalid("page_size must be at least 1"));
    }
    let store = filter.store();

    let file_names: HashMap<Uuid, String> = store
        .list_files(&FileFilter::default())
        .await?
        .into_iter()
        .map(|f| (f.file_id, f.name))
        .collect();

    let records = if *criteria == FilterCriteria::default() {
        store.find_records(&RecordQuery::default()).await?
    } else {
        filter.build_query(criteria, requester).await?.into_records()
    };

    let term = term.trim().to_lowercase();
    let matched: Vec<Record> = if term.is_empty() {
        records
    } else {
        let contains = |text: Option<&str>| text.is_some_and(|t| t.to_lowercase().contains(&term));
        records
            .into_iter()
            .filter(|r| {
                contains(r.indicator.as_deref())
                    || contains(r.department.as_deref())
                    || contains(file_names.get(&r.file_id).map(String::as_str))
            })
            .collect()
    };

    let total = matched.len();
    let pages = total.div_ceil(page_size).max(1);
    let page = if (1..=pages).contains(&page) { page } else { pages };
    let results = matched
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(SearchPage {
        results,
        total,
        pages,
        page,
        has_next: page < pages,
        has_previous: page > 1,
    })
}
