//! logsight-store
//!
//! The per-session analytical store: a single-file DuckDB table holding
//! every parsed entry, written once during ingestion and read-only after
//! `finalize`. The query layer lives on top of the same handle and serves
//! the filtered scans, time-range reads, boundary lookups, point-in-time
//! snapshots, and the minute-bucket time tree that the HTTP surface
//! exposes.
//!
//! Writes are batched through the engine's appender; every query accepts a
//! cancellation token and checks it between row batches.

mod history;
mod query;
mod store;

pub use history::{BoundaryValues, TimeTreeNode};
pub use query::{QueryPage, QueryParams, SortColumn, SortDirection, MAX_PAGE_SIZE};
pub use store::{AnalyticalStore, ENTRY_BATCH_SIZE};
