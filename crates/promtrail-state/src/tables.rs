//! redb table definitions for the promtrail store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Query records keyed by `{micros:020}:{seq:020}` so key order is time order.
pub const QUERIES: TableDefinition<&str, &[u8]> = TableDefinition::new("queries");

/// Catalog rows keyed by metric name.
pub const METRICS_CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics_catalog");

/// Job index keyed by `{job}/{metric}`.
pub const METRICS_JOB_INDEX: TableDefinition<&str, &[u8]> =
    TableDefinition::new("metrics_job_index");

/// Usage summaries keyed by metric name.
pub const METRICS_USAGE_SUMMARY: TableDefinition<&str, &[u8]> =
    TableDefinition::new("metrics_usage_summary");

/// Rule usage keyed by `{metric}/{group}/{rule}`.
pub const RULE_USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("rule_usage");

/// Dashboard usage keyed by `{metric}/{dashboard_id}`.
pub const DASHBOARD_USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("dashboard_usage");
