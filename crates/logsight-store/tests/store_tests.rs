//! Analytical store integration tests against a real DuckDB file.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use logsight_core::{Error, LogEntry, SignalType, Value};
use logsight_store::{AnalyticalStore, QueryParams, SortColumn, SortDirection};

fn entry(device: &str, signal: &str, ts: i64, value: Value) -> LogEntry {
    let signal_type = value.signal_type();
    LogEntry {
        device_id: Arc::from(device),
        signal: Arc::from(signal),
        timestamp: ts,
        value,
        signal_type,
        category: None,
        source_id: None,
    }
}

fn categorized(device: &str, signal: &str, ts: i64, value: Value, category: &str) -> LogEntry {
    let mut e = entry(device, signal, ts, value);
    e.category = Some(Arc::from(category));
    e
}

/// 60 entries: CV01::MotorOn toggling, CV01::Speed counting, STK02::State text.
fn build_store(dir: &tempfile::TempDir) -> AnalyticalStore {
    let store = AnalyticalStore::create(dir.path().join("session.db")).unwrap();
    for i in 0..20i64 {
        store
            .add_entry(categorized(
                "CV01",
                "MotorOn",
                1_000 + i * 100,
                Value::Bool(i % 3 == 0),
                "motion",
            ))
            .unwrap();
        store
            .add_entry(categorized(
                "CV01",
                "Speed",
                1_010 + i * 100,
                Value::Int(i * 5),
                "motion",
            ))
            .unwrap();
        store
            .add_entry(categorized(
                "STK02",
                "State",
                1_020 + i * 100,
                Value::Str(Arc::from(if i < 10 { "IDLE" } else { "RUNNING" })),
                "status",
            ))
            .unwrap();
    }
    store.finalize().unwrap();
    store
}

#[test]
fn pagination_concatenation_property() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();
    let params = QueryParams::default();

    let all = store.query_entries(&cancel, &params, 1, 60).unwrap();
    assert_eq!(all.total, 60);
    assert_eq!(all.entries.len(), 60);

    // Pages 1..=6 of 10 concatenated equal one 60-row scan.
    let mut concatenated = Vec::new();
    for page in 1..=6 {
        let p = store.query_entries(&cancel, &params, page, 10).unwrap();
        assert_eq!(p.total, 60);
        assert_eq!(p.entries.len(), 10);
        concatenated.extend(p.entries);
    }
    assert_eq!(concatenated, all.entries);
}

#[test]
fn page_size_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    let p = store
        .query_entries(&cancel, &QueryParams::default(), 1, 50_000)
        .unwrap();
    assert_eq!(p.page_size, 1000);

    let p = store
        .query_entries(&cancel, &QueryParams::default(), 1, 0)
        .unwrap();
    assert_eq!(p.page_size, 1);
    assert_eq!(p.entries.len(), 1);
}

#[test]
fn signal_in_list_filter() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    let params = QueryParams {
        signals: vec!["CV01::Speed".into()],
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();
    assert_eq!(p.total, 20);
    assert!(p.entries.iter().all(|e| &*e.signal == "Speed"));
}

#[test]
fn category_and_type_filters() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    let params = QueryParams {
        categories: vec!["status".into()],
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();
    assert_eq!(p.total, 20);

    let params = QueryParams {
        signal_type: Some(SignalType::Boolean),
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();
    assert_eq!(p.total, 20);
    assert!(p.entries.iter().all(|e| matches!(e.value, Value::Bool(_))));
}

#[test]
fn substring_and_regex_search() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    // Case-insensitive substring over device/signal/category/value text.
    let params = QueryParams {
        search: Some("running".into()),
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();
    assert_eq!(p.total, 10);

    // Case-sensitive substring misses the lowercase needle.
    let params = QueryParams {
        search: Some("running".into()),
        case_sensitive: true,
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();
    assert_eq!(p.total, 0);

    // Regex matching either state word.
    let params = QueryParams {
        search: Some("^.*(IDLE|RUNNING).*$".into()),
        regex: true,
        case_sensitive: true,
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();
    assert_eq!(p.total, 20);
}

#[test]
fn show_changed_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = AnalyticalStore::create(dir.path().join("s.db")).unwrap();
    // B: 0,0,1,0,42,0 → changed at ids 0,2,3,4,5 (first row always counts).
    for (i, v) in [0i64, 0, 1, 0, 42, 0].into_iter().enumerate() {
        store
            .add_entry(entry("CV01", "B", 1_000 + i as i64, Value::Int(v)))
            .unwrap();
    }
    store.finalize().unwrap();

    let cancel = CancellationToken::new();
    let params = QueryParams {
        show_changed_only: true,
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 100).unwrap();

    let values: Vec<i64> = p
        .entries
        .iter()
        .map(|e| match e.value {
            Value::Int(i) => i,
            ref other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(values, vec![0, 1, 0, 42, 0]);
    assert_eq!(p.total, 5);
}

#[test]
fn timestamp_sort_reverses() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    let params = QueryParams {
        sort_column: Some(SortColumn::Timestamp),
        sort_direction: SortDirection::Desc,
        ..Default::default()
    };
    let p = store.query_entries(&cancel, &params, 1, 60).unwrap();
    let timestamps: Vec<i64> = p.entries.iter().map(|e| e.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(timestamps, sorted);
}

#[test]
fn get_entry_by_dense_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);

    let first = store.get_entry(0).unwrap().unwrap();
    assert_eq!(first.timestamp, 1_000);
    assert!(store.get_entry(59).unwrap().is_some());
    assert!(store.get_entry(60).unwrap().is_none());
}

#[test]
fn chunk_is_inclusive_and_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    let chunk = store.get_chunk(&cancel, 1_010, 1_120, &[]).unwrap();
    let timestamps: Vec<i64> = chunk.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![1_010, 1_020, 1_100, 1_110, 1_120]);

    let filtered = store
        .get_chunk(&cancel, 0, 10_000, &["STK02::State".to_string()])
        .unwrap();
    assert_eq!(filtered.len(), 20);
}

#[test]
fn boundary_values_are_strict() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();

    let signals = vec!["CV01::MotorOn".to_string(), "CV01::Speed".to_string()];
    let bounds = store
        .get_boundary_values(&cancel, 1_100, 2_000, &signals)
        .unwrap();

    for (key, e) in &bounds.before {
        assert!(e.timestamp < 1_100, "{key} before not strict");
    }
    for (key, e) in &bounds.after {
        assert!(e.timestamp > 2_000, "{key} after not strict");
    }
    // MotorOn at 1_000 is the last strictly before 1_100.
    assert_eq!(bounds.before["CV01::MotorOn"].timestamp, 1_000);
    // Speed at 2_010 is the first strictly after 2_000.
    assert_eq!(bounds.after["CV01::Speed"].timestamp, 2_010);
}

#[test]
fn values_at_time_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = AnalyticalStore::create(dir.path().join("s.db")).unwrap();
    // s1 straddles ts=1_500 with three updates; s2 only after; s3 never.
    store.add_entry(entry("D", "s1", 1_000, Value::Int(1))).unwrap();
    store.add_entry(entry("D", "s1", 1_400, Value::Int(2))).unwrap();
    store.add_entry(entry("D", "s1", 2_000, Value::Int(3))).unwrap();
    store.add_entry(entry("D", "s2", 1_800, Value::Int(9))).unwrap();
    store.finalize().unwrap();

    let cancel = CancellationToken::new();
    let signals = vec!["D::s1".to_string(), "D::s2".to_string(), "D::s3".to_string()];
    let at = store.get_values_at(&cancel, 1_500, &signals).unwrap();

    assert_eq!(at.len(), 1);
    assert_eq!(at["D::s1"].value, Value::Int(2));
    assert!(!at.contains_key("D::s2"));
    assert!(!at.contains_key("D::s3"));
}

#[test]
fn index_by_time_minimality() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();
    let params = QueryParams::default();

    for probe in [0i64, 1_000, 1_005, 1_020, 2_920, 2_921, 10_000] {
        let index = store.get_index_by_time(&cancel, &params, probe).unwrap();

        // Reference: smallest i such that entry(i).timestamp >= probe.
        let mut expected = -1i64;
        for i in 0..60 {
            let e = store.get_entry(i).unwrap().unwrap();
            if e.timestamp >= probe {
                expected = i;
                break;
            }
        }
        assert_eq!(index, expected, "probe {probe}");
    }
}

#[test]
fn time_tree_minute_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let store = AnalyticalStore::create(dir.path().join("s.db")).unwrap();
    // Two entries in minute 0, one in minute 2 of 2025-12-05 00:00 UTC.
    let base = 1_764_892_800_000i64;
    store.add_entry(entry("D", "s", base + 1_000, Value::Int(1))).unwrap();
    store.add_entry(entry("D", "s", base + 2_000, Value::Int(2))).unwrap();
    store.add_entry(entry("D", "s", base + 125_000, Value::Int(3))).unwrap();
    store.finalize().unwrap();

    let cancel = CancellationToken::new();
    let tree = store
        .get_time_tree(&cancel, &QueryParams::default())
        .unwrap();

    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].date, "2025-12-05");
    assert_eq!((tree[0].hour, tree[0].minute, tree[0].count), (0, 0, 2));
    assert_eq!((tree[1].hour, tree[1].minute, tree[1].count), (0, 2, 1));
}

#[test]
fn count_cache_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);
    let cancel = CancellationToken::new();
    let params = QueryParams {
        signals: vec!["CV01::Speed".into()],
        ..Default::default()
    };

    let first = store.query_entries(&cancel, &params, 1, 10).unwrap();
    let second = store.query_entries(&cancel, &params, 2, 10).unwrap();
    assert_eq!(first.total, second.total);

    store.clear_count_cache();
    let third = store.query_entries(&cancel, &params, 1, 10).unwrap();
    assert_eq!(third.total, first.total);
}

#[test]
fn query_before_finalize_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = AnalyticalStore::create(dir.path().join("s.db")).unwrap();
    store.add_entry(entry("D", "s", 1, Value::Int(1))).unwrap();

    let cancel = CancellationToken::new();
    let err = store
        .query_entries(&cancel, &QueryParams::default(), 1, 10)
        .unwrap_err();
    assert!(matches!(err, Error::StoreNotFinalized));
}

#[test]
fn cancelled_token_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let store = build_store(&dir);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = store
        .query_entries(&cancel, &QueryParams::default(), 1, 10)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
