//! Expansion of upstream metadata into metric catalog rows.
//!
//! Histograms and summaries are exposed as several series, so each one
//! contributes a row per queryable sub-series.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use promtrail_state::MetricCatalogItem;

use crate::source::MetadataInfo;

/// Catalog rows for every metric in `metadata`, stamped with `now`.
///
/// When a metric has several metadata entries the first one wins.
pub fn expand_metadata(
    metadata: &BTreeMap<String, Vec<MetadataInfo>>,
    now: DateTime<Utc>,
) -> Vec<MetricCatalogItem> {
    let mut rows = Vec::with_capacity(metadata.len());
    for (name, infos) in metadata {
        let Some(info) = infos.first() else {
            continue;
        };
        let row = |name: String, metric_type: &str| MetricCatalogItem {
            name,
            metric_type: metric_type.to_string(),
            help: info.help.clone(),
            unit: info.unit.clone(),
            first_seen_at: now,
            last_synced_at: now,
        };
        match info.metric_type.as_str() {
            "histogram" => {
                rows.push(row(format!("{name}_bucket"), "histogram_bucket"));
                rows.push(row(format!("{name}_count"), "histogram_count"));
                rows.push(row(format!("{name}_sum"), "histogram_sum"));
            }
            "summary" => {
                rows.push(row(name.clone(), "summary"));
                rows.push(row(format!("{name}_count"), "summary_count"));
                rows.push(row(format!("{name}_sum"), "summary_sum"));
            }
            other => rows.push(row(name.clone(), other)),
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(metric_type: &str) -> MetadataInfo {
        MetadataInfo {
            metric_type: metric_type.to_string(),
            help: format!("a {metric_type}"),
            unit: String::new(),
        }
    }

    fn expand(name: &str, metric_type: &str) -> Vec<(String, String)> {
        let metadata = BTreeMap::from([(name.to_string(), vec![info(metric_type)])]);
        expand_metadata(&metadata, Utc::now())
            .into_iter()
            .map(|r| (r.name, r.metric_type))
            .collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn histogram_expands_to_sub_series_only() {
        assert_eq!(
            expand("x", "histogram"),
            pairs(&[
                ("x_bucket", "histogram_bucket"),
                ("x_count", "histogram_count"),
                ("x_sum", "histogram_sum"),
            ])
        );
    }

    #[test]
    fn summary_keeps_base_row() {
        assert_eq!(
            expand("x", "summary"),
            pairs(&[
                ("x", "summary"),
                ("x_count", "summary_count"),
                ("x_sum", "summary_sum"),
            ])
        );
    }

    #[test]
    fn other_types_pass_through() {
        assert_eq!(expand("up", "gauge"), pairs(&[("up", "gauge")]));
        assert_eq!(expand("x", "unknown"), pairs(&[("x", "unknown")]));
    }

    #[test]
    fn rows_carry_help_and_timestamps() {
        let now = Utc::now();
        let metadata = BTreeMap::from([
            ("a".to_string(), vec![info("counter"), info("gauge")]),
            ("b".to_string(), Vec::new()),
        ]);
        let rows = expand_metadata(&metadata, now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric_type, "counter");
        assert_eq!(rows[0].help, "a counter");
        assert_eq!(rows[0].first_seen_at, now);
        assert_eq!(rows[0].last_synced_at, now);
    }
}
