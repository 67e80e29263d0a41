// logsight-store/src/query.rs
//! Filtered scans, pagination, and the query caches.
//!
//! Filters compose into SQL predicates; free-text search runs over a
//! rendered `device · signal · category · value` text. Totals are counted
//! once per distinct parameter tuple and cached; forward paging records
//! the last row id of each page so later pages continue with a keyset
//! predicate instead of an `OFFSET` scan.

use std::collections::HashMap;

use duckdb::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logsight_core::{Error, LogEntry, Result, SignalType};

use crate::store::{entry_from_row, AnalyticalStore};

/// Hard page-size ceiling; requests are clamped into `[1, MAX_PAGE_SIZE]`
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Rows between cancellation checks while draining result sets
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 1024;

/// The ten entry columns every query selects, in decode order
pub(crate) const ENTRY_COLUMNS: &str =
    "id, ts, device_id, signal, category, val_type, val_bool, val_int, val_float, val_str";

/// Text the free-text search matches against
pub(crate) const SEARCH_TEXT: &str = "concat_ws(' ', device_id, signal, coalesce(category, ''), \
     CASE val_type \
        WHEN 'bool' THEN CASE WHEN val_bool THEN 'true' ELSE 'false' END \
        WHEN 'int' THEN CAST(val_int AS VARCHAR) \
        WHEN 'float' THEN CAST(val_float AS VARCHAR) \
        ELSE coalesce(val_str, '') END)";

/// Canonical one-column rendering of a value, used by show-changed
pub(crate) const VALUE_REPR: &str = "val_type || ':' || \
     CASE val_type \
        WHEN 'bool' THEN CASE WHEN val_bool THEN 'true' ELSE 'false' END \
        WHEN 'int' THEN CAST(val_int AS VARCHAR) \
        WHEN 'float' THEN CAST(val_float AS VARCHAR) \
        ELSE coalesce(val_str, '') END";

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortColumn {
    #[default]
    Id,
    Timestamp,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Filter and sort configuration for entry scans; every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    /// Free-text needle (substring, or a pattern when `regex` is set)
    pub search: Option<String>,
    /// Treat `search` as a regular expression
    pub regex: bool,
    /// Match case-sensitively
    pub case_sensitive: bool,
    /// Keep only entries whose value differs from the same signal's
    /// immediately preceding entry
    pub show_changed_only: bool,
    /// Category IN-list
    pub categories: Vec<String>,
    /// `device::signal` IN-list
    pub signals: Vec<String>,
    /// Restrict to one signal type
    pub signal_type: Option<SignalType>,
    /// Sort column, insertion order by default
    pub sort_column: Option<SortColumn>,
    /// Sort direction
    pub sort_direction: SortDirection,
}

impl QueryParams {
    /// Whether any filter is active
    pub fn is_unfiltered(&self) -> bool {
        self.search.is_none()
            && !self.show_changed_only
            && self.categories.is_empty()
            && self.signals.is_empty()
            && self.signal_type.is_none()
    }

    /// Canonical cache key: IN-lists sorted, everything serialized
    pub fn canonical_key(&self) -> String {
        let mut normalized = self.clone();
        normalized.categories.sort();
        normalized.categories.dedup();
        normalized.signals.sort();
        normalized.signals.dedup();
        serde_json::to_string(&normalized).unwrap_or_default()
    }

    fn effective_sort(&self) -> (SortColumn, SortDirection) {
        (self.sort_column.unwrap_or_default(), self.sort_direction)
    }

    /// Whether keyset continuation on row id applies
    fn keyset_eligible(&self) -> bool {
        self.effective_sort() == (SortColumn::Id, SortDirection::Asc)
    }

    fn order_clause(&self) -> &'static str {
        match self.effective_sort() {
            (SortColumn::Id, SortDirection::Asc) => "ORDER BY id ASC",
            (SortColumn::Id, SortDirection::Desc) => "ORDER BY id DESC",
            (SortColumn::Timestamp, SortDirection::Asc) => "ORDER BY ts ASC, id ASC",
            (SortColumn::Timestamp, SortDirection::Desc) => "ORDER BY ts DESC, id DESC",
        }
    }
}

/// One page of a filtered scan
#[derive(Debug, Serialize)]
pub struct QueryPage {
    pub entries: Vec<LogEntry>,
    pub total: u64,
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
}

/// Count and keyset caches, keyed by the canonical parameter tuple
#[derive(Default)]
pub(crate) struct QueryCaches {
    counts: HashMap<String, u64>,
    /// (params key, page size) → page number → last row id on that page
    offsets: HashMap<(String, u32), HashMap<u32, i64>>,
}

impl QueryCaches {
    pub fn clear(&mut self) {
        self.counts.clear();
        self.offsets.clear();
    }
}

/// A composed WHERE clause plus its bind values
pub(crate) struct Predicate {
    pub from: String,
    pub clauses: Vec<String>,
    pub binds: Vec<SqlValue>,
}

impl Predicate {
    /// Compose the FROM source and filters for `params`
    pub fn build(params: &QueryParams) -> Self {
        let mut clauses = Vec::new();
        let mut binds: Vec<SqlValue> = Vec::new();

        // show-changed compares each row against its predecessor within
        // the same signal over the whole table, before other filters.
        let from = if params.show_changed_only {
            clauses.push("prev_repr IS DISTINCT FROM cur_repr".to_string());
            format!(
                "(SELECT {ENTRY_COLUMNS}, {VALUE_REPR} AS cur_repr, \
                 LAG({VALUE_REPR}) OVER (PARTITION BY device_id, signal ORDER BY id) AS prev_repr \
                 FROM entries)"
            )
        } else {
            "entries".to_string()
        };

        if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
            if params.regex {
                let pattern = if params.case_sensitive {
                    search.to_string()
                } else {
                    format!("(?i){search}")
                };
                clauses.push(format!("regexp_matches({SEARCH_TEXT}, ?)"));
                binds.push(SqlValue::Text(pattern));
            } else if params.case_sensitive {
                clauses.push(format!("strpos({SEARCH_TEXT}, ?) > 0"));
                binds.push(SqlValue::Text(search.to_string()));
            } else {
                clauses.push(format!("strpos(lower({SEARCH_TEXT}), ?) > 0"));
                binds.push(SqlValue::Text(search.to_lowercase()));
            }
        }

        if !params.categories.is_empty() {
            clauses.push(format!(
                "category IN ({})",
                placeholders(params.categories.len())
            ));
            binds.extend(
                params
                    .categories
                    .iter()
                    .map(|c| SqlValue::Text(c.clone())),
            );
        }

        if !params.signals.is_empty() {
            clauses.push(format!(
                "(device_id || '::' || signal) IN ({})",
                placeholders(params.signals.len())
            ));
            binds.extend(params.signals.iter().map(|s| SqlValue::Text(s.clone())));
        }

        if let Some(ty) = params.signal_type {
            match ty {
                SignalType::Boolean => clauses.push("val_type = 'bool'".to_string()),
                SignalType::Integer => {
                    clauses.push("val_type IN ('int', 'float')".to_string())
                }
                SignalType::String => clauses.push("val_type = 'str'".to_string()),
            }
        }

        Self { from, clauses, binds }
    }

    /// The WHERE fragment, empty string when unfiltered
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// The WHERE fragment with one extra clause appended
    pub fn where_clause_with(&self, extra: &str) -> String {
        if self.clauses.is_empty() {
            format!("WHERE {extra}")
        } else {
            format!("WHERE {} AND {extra}", self.clauses.join(" AND "))
        }
    }
}

pub(crate) fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

pub(crate) fn clamp_page_size(page_size: u32) -> u32 {
    page_size.clamp(1, MAX_PAGE_SIZE)
}

impl AnalyticalStore {
    /// Filtered, paginated scan
    ///
    /// Concatenating pages `1..=p` equals one scan of `p * page_size`
    /// rows; the total is counted once per parameter tuple and cached.
    pub fn query_entries(
        &self,
        cancel: &CancellationToken,
        params: &QueryParams,
        page: u32,
        page_size: u32,
    ) -> Result<QueryPage> {
        self.ensure_finalized()?;

        let page = page.max(1);
        let page_size = clamp_page_size(page_size);
        let key = params.canonical_key();
        let predicate = Predicate::build(params);

        let total = self.cached_total(cancel, &key, &predicate)?;

        // Keyset continuation: strictly-forward paging in insertion order
        // starts after the previous page's recorded last row id.
        let keyset_after = if params.keyset_eligible() && page > 1 {
            self.caches
                .lock()
                .offsets
                .get(&(key.clone(), page_size))
                .and_then(|pages| pages.get(&(page - 1)).copied())
        } else {
            None
        };

        let order = params.order_clause();
        let (sql, extra_binds): (String, Vec<SqlValue>) = match keyset_after {
            Some(after) => (
                format!(
                    "SELECT {ENTRY_COLUMNS} FROM {} {} {} LIMIT ?",
                    predicate.from,
                    predicate.where_clause_with("id > ?"),
                    order
                ),
                vec![SqlValue::BigInt(after), SqlValue::BigInt(i64::from(page_size))],
            ),
            None => (
                format!(
                    "SELECT {ENTRY_COLUMNS} FROM {} {} {} LIMIT ? OFFSET ?",
                    predicate.from,
                    predicate.where_clause(),
                    order
                ),
                vec![
                    SqlValue::BigInt(i64::from(page_size)),
                    SqlValue::BigInt(i64::from(page - 1) * i64::from(page_size)),
                ],
            ),
        };

        let mut binds = predicate.binds.clone();
        binds.extend(extra_binds);

        let rows = self.collect_entries(cancel, &sql, &binds)?;

        if params.keyset_eligible() {
            if let Some((last_id, _)) = rows.last() {
                self.caches
                    .lock()
                    .offsets
                    .entry((key, page_size))
                    .or_default()
                    .insert(page, *last_id);
            }
        }

        Ok(QueryPage {
            entries: rows.into_iter().map(|(_, e)| e).collect(),
            total,
            page,
            page_size,
        })
    }

    /// Unfiltered page in insertion order
    pub fn get_entries(
        &self,
        cancel: &CancellationToken,
        page: u32,
        page_size: u32,
    ) -> Result<QueryPage> {
        self.query_entries(cancel, &QueryParams::default(), page, page_size)
    }

    /// Single row by dense id
    pub fn get_entry(&self, id: i64) -> Result<Option<LogEntry>> {
        self.ensure_finalized()?;
        self.with_conn(|conn| {
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::store(e.to_string()))?;
            let mut rows = stmt
                .query(duckdb::params![id])
                .map_err(|e| Error::store(e.to_string()))?;
            match rows.next().map_err(|e| Error::store(e.to_string()))? {
                Some(row) => Ok(Some(entry_from_row(row)?.1)),
                None => Ok(None),
            }
        })
    }

    /// Distinct categories, sorted
    pub fn get_categories(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.ensure_finalized()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT category FROM entries \
                     WHERE category IS NOT NULL ORDER BY category",
                )
                .map_err(|e| Error::store(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| Error::store(e.to_string()))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::store(e.to_string()))
        })
    }

    fn cached_total(
        &self,
        cancel: &CancellationToken,
        key: &str,
        predicate: &Predicate,
    ) -> Result<u64> {
        if let Some(&total) = self.caches.lock().counts.get(key) {
            return Ok(total);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let sql = format!(
            "SELECT count(*) FROM {} {}",
            predicate.from,
            predicate.where_clause()
        );
        let total: i64 = self.with_conn(|conn| {
            conn.query_row(
                &sql,
                duckdb::params_from_iter(predicate.binds.iter()),
                |row| row.get(0),
            )
            .map_err(|e| Error::store(e.to_string()))
        })?;

        let total = total.max(0) as u64;
        self.caches.lock().counts.insert(key.to_string(), total);
        Ok(total)
    }

    /// Run `sql`, decoding `(id, entry)` rows and honoring cancellation
    /// between row batches
    pub(crate) fn collect_entries(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        binds: &[SqlValue],
    ) -> Result<Vec<(i64, LogEntry)>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| Error::store(e.to_string()))?;
            let mut rows = stmt
                .query(duckdb::params_from_iter(binds.iter()))
                .map_err(|e| Error::store(e.to_string()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| Error::store(e.to_string()))? {
                out.push(entry_from_row(row)?);
                if out.len() % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_order_independent() {
        let a = QueryParams {
            signals: vec!["B::y".into(), "A::x".into()],
            categories: vec!["motion".into(), "status".into()],
            ..Default::default()
        };
        let b = QueryParams {
            signals: vec!["A::x".into(), "B::y".into()],
            categories: vec!["status".into(), "motion".into()],
            ..Default::default()
        };
        assert_eq!(a.canonical_key(), b.canonical_key());

        let c = QueryParams {
            search: Some("motor".into()),
            ..Default::default()
        };
        assert_ne!(a.canonical_key(), c.canonical_key());
    }

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(500), 500);
        assert_eq!(clamp_page_size(100_000), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_predicate_unfiltered() {
        let p = Predicate::build(&QueryParams::default());
        assert_eq!(p.from, "entries");
        assert!(p.where_clause().is_empty());
        assert!(p.binds.is_empty());
    }

    #[test]
    fn test_predicate_signal_in_list() {
        let p = Predicate::build(&QueryParams {
            signals: vec!["CV01::MotorOn".into(), "CV01::Speed".into()],
            ..Default::default()
        });
        assert!(p.where_clause().contains("IN (?, ?)"));
        assert_eq!(p.binds.len(), 2);
    }

    #[test]
    fn test_predicate_show_changed_wraps_source() {
        let p = Predicate::build(&QueryParams {
            show_changed_only: true,
            ..Default::default()
        });
        assert!(p.from.contains("LAG"));
        assert!(p.where_clause().contains("IS DISTINCT FROM"));
    }
}
