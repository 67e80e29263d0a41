// logsight-store/src/history.rs
//! Time-oriented reads: range chunks, boundary values, point-in-time
//! snapshots, wall-clock row lookup, and the minute-bucket time tree.

use std::collections::HashMap;

use chrono::DateTime;
use duckdb::types::Value as SqlValue;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use logsight_core::{Error, LogEntry, Result};

use crate::query::{placeholders, Predicate, QueryParams, ENTRY_COLUMNS};
use crate::store::AnalyticalStore;

/// Per-signal entries just outside a time window
///
/// `before` holds each signal's last entry strictly before the window,
/// `after` its first entry strictly after. Waveform rendering uses these
/// to extend flat segments across the visible range.
#[derive(Debug, Default, Serialize)]
pub struct BoundaryValues {
    pub before: HashMap<String, LogEntry>,
    pub after: HashMap<String, LogEntry>,
}

/// One minute bucket of the navigation histogram
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeTreeNode {
    pub date: String,
    pub hour: u32,
    pub minute: u32,
    pub count: u64,
}

fn signal_filter(signals: &[String]) -> (String, Vec<SqlValue>) {
    if signals.is_empty() {
        (String::new(), Vec::new())
    } else {
        (
            format!(
                " AND (device_id || '::' || signal) IN ({})",
                placeholders(signals.len())
            ),
            signals.iter().map(|s| SqlValue::Text(s.clone())).collect(),
        )
    }
}

impl AnalyticalStore {
    /// Entries in the inclusive time range, timestamp ascending
    pub fn get_chunk(
        &self,
        cancel: &CancellationToken,
        start_ts: i64,
        end_ts: i64,
        signals: &[String],
    ) -> Result<Vec<LogEntry>> {
        self.ensure_finalized()?;

        let (filter, filter_binds) = signal_filter(signals);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE ts >= ? AND ts <= ?{filter} ORDER BY ts ASC, id ASC"
        );

        let mut binds = vec![SqlValue::BigInt(start_ts), SqlValue::BigInt(end_ts)];
        binds.extend(filter_binds);

        Ok(self
            .collect_entries(cancel, &sql, &binds)?
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }

    /// Per-signal last-before / first-after entries around a window
    ///
    /// `before[s].timestamp < start_ts` and `after[s].timestamp > end_ts`
    /// hold for every signal present in the maps.
    pub fn get_boundary_values(
        &self,
        cancel: &CancellationToken,
        start_ts: i64,
        end_ts: i64,
        signals: &[String],
    ) -> Result<BoundaryValues> {
        self.ensure_finalized()?;

        let mut result = BoundaryValues::default();
        if signals.is_empty() {
            return Ok(result);
        }

        let (filter, filter_binds) = signal_filter(signals);

        let before_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ( \
               SELECT {ENTRY_COLUMNS}, row_number() OVER ( \
                 PARTITION BY device_id, signal ORDER BY ts DESC, id DESC) AS rn \
               FROM entries WHERE ts < ?{filter}) \
             WHERE rn = 1"
        );
        let mut binds = vec![SqlValue::BigInt(start_ts)];
        binds.extend(filter_binds.iter().cloned());
        for (_, entry) in self.collect_entries(cancel, &before_sql, &binds)? {
            result.before.insert(entry.signal_key(), entry);
        }

        let after_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ( \
               SELECT {ENTRY_COLUMNS}, row_number() OVER ( \
                 PARTITION BY device_id, signal ORDER BY ts ASC, id ASC) AS rn \
               FROM entries WHERE ts > ?{filter}) \
             WHERE rn = 1"
        );
        let mut binds = vec![SqlValue::BigInt(end_ts)];
        binds.extend(filter_binds);
        for (_, entry) in self.collect_entries(cancel, &after_sql, &binds)? {
            result.after.insert(entry.signal_key(), entry);
        }

        Ok(result)
    }

    /// Most recent entry at or before `ts` for each named signal
    ///
    /// With an empty `signals` list, every signal in the store answers.
    /// Signals with no entry at or before `ts` are absent from the map.
    pub fn get_values_at(
        &self,
        cancel: &CancellationToken,
        ts: i64,
        signals: &[String],
    ) -> Result<HashMap<String, LogEntry>> {
        self.ensure_finalized()?;

        let (filter, filter_binds) = signal_filter(signals);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ( \
               SELECT {ENTRY_COLUMNS}, row_number() OVER ( \
                 PARTITION BY device_id, signal ORDER BY ts DESC, id DESC) AS rn \
               FROM entries WHERE ts <= ?{filter}) \
             WHERE rn = 1"
        );
        let mut binds = vec![SqlValue::BigInt(ts)];
        binds.extend(filter_binds);

        let mut out = HashMap::new();
        for (_, entry) in self.collect_entries(cancel, &sql, &binds)? {
            out.insert(entry.signal_key(), entry);
        }
        Ok(out)
    }

    /// Index of the first filtered row with `ts >= ts_millis`, or -1
    ///
    /// The index is the row's position within the filtered scan, which for
    /// an unfiltered store equals its dense id.
    pub fn get_index_by_time(
        &self,
        cancel: &CancellationToken,
        params: &QueryParams,
        ts_millis: i64,
    ) -> Result<i64> {
        self.ensure_finalized()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let predicate = Predicate::build(params);

        let first_sql = format!(
            "SELECT min(id) FROM {} {}",
            predicate.from,
            predicate.where_clause_with("ts >= ?")
        );
        let mut binds = predicate.binds.clone();
        binds.push(SqlValue::BigInt(ts_millis));

        let first_id: Option<i64> = self.with_conn(|conn| {
            conn.query_row(&first_sql, duckdb::params_from_iter(binds.iter()), |row| {
                row.get(0)
            })
            .map_err(|e| Error::store(e.to_string()))
        })?;

        let first_id = match first_id {
            Some(id) => id,
            None => return Ok(-1),
        };

        let index_sql = format!(
            "SELECT count(*) FROM {} {}",
            predicate.from,
            predicate.where_clause_with("id < ?")
        );
        let mut binds = predicate.binds.clone();
        binds.push(SqlValue::BigInt(first_id));

        self.with_conn(|conn| {
            conn.query_row(&index_sql, duckdb::params_from_iter(binds.iter()), |row| {
                row.get(0)
            })
            .map_err(|e| Error::store(e.to_string()))
        })
    }

    /// Minute-bucket histogram over the filtered rows
    pub fn get_time_tree(
        &self,
        cancel: &CancellationToken,
        params: &QueryParams,
    ) -> Result<Vec<TimeTreeNode>> {
        self.ensure_finalized()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let predicate = Predicate::build(params);
        let sql = format!(
            "SELECT ts / 60000 AS bucket, count(*) FROM {} {} GROUP BY bucket ORDER BY bucket",
            predicate.from,
            predicate.where_clause()
        );

        let buckets: Vec<(i64, i64)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::store(e.to_string()))?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(predicate.binds.iter()), |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| Error::store(e.to_string()))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::store(e.to_string()))
        })?;

        let mut nodes = Vec::with_capacity(buckets.len());
        for (bucket, count) in buckets {
            let Some(at) = DateTime::from_timestamp_millis(bucket * 60_000) else {
                continue;
            };
            let time = at.time();
            nodes.push(TimeTreeNode {
                date: at.date_naive().to_string(),
                hour: chrono::Timelike::hour(&time),
                minute: chrono::Timelike::minute(&time),
                count: count.max(0) as u64,
            });
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_tree_node_shape() {
        let at = DateTime::from_timestamp_millis(1_764_892_835_404).unwrap();
        assert_eq!(at.date_naive().to_string(), "2025-12-05");
    }
}
