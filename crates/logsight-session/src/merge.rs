// logsight-session/src/merge.rs
//! Multi-file merge for sessions built from several sources.
//!
//! Each source file is individually time-ordered; the merge interleaves
//! them into one globally timestamp-sorted stream, ties broken by
//! (source, insertion). Cross-source duplicates inside the dedup window
//! are dropped: transport systems often log the same observation to more
//! than one file within a second.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use logsight_core::{LogEntry, Result};
use logsight_parsers::CompactStore;

/// Merge `sources` into `emit`, tagging entries with their source index
///
/// An output entry is dropped when the same signal's previously emitted
/// entry carries an identical value from a different source within
/// `dedup_window_ms`. A zero window disables deduplication entirely.
/// Returns the number of emitted entries.
pub(crate) fn merge_sources<F>(
    sources: &[CompactStore],
    dedup_window_ms: i64,
    mut emit: F,
) -> Result<u64>
where
    F: FnMut(LogEntry) -> Result<()>,
{
    // Heap of (timestamp, source index, entry index): pop order is the
    // required global order.
    let mut heap: BinaryHeap<Reverse<(i64, u32, usize)>> = BinaryHeap::new();
    for (source_idx, source) in sources.iter().enumerate() {
        if let Some(first) = source.get_entry(0) {
            heap.push(Reverse((first.timestamp, source_idx as u32, 0)));
        }
    }

    // Last emitted entry per signal key: (value, timestamp, source).
    let mut last_by_signal: HashMap<String, (logsight_core::Value, i64, Option<u32>)> =
        HashMap::new();
    let mut emitted: u64 = 0;

    while let Some(Reverse((_, source_idx, entry_idx))) = heap.pop() {
        let source = &sources[source_idx as usize];
        let Some(mut entry) = source.get_entry(entry_idx) else {
            continue;
        };
        entry.source_id = Some(source_idx);

        if let Some(next) = source.get_entry(entry_idx + 1) {
            heap.push(Reverse((next.timestamp, source_idx, entry_idx + 1)));
        }

        let key = entry.signal_key();
        let duplicate = dedup_window_ms > 0
            && last_by_signal.get(&key).is_some_and(|(value, ts, src)| {
                *src != entry.source_id
                    && *value == entry.value
                    && (entry.timestamp - ts).abs() < dedup_window_ms
            });
        if duplicate {
            continue;
        }

        last_by_signal.insert(key, (entry.value.clone(), entry.timestamp, entry.source_id));
        emit(entry)?;
        emitted += 1;
    }

    Ok(emitted)
}
