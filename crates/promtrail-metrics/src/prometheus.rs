//! Prometheus text exposition format.

use std::fmt::Write;

use crate::registry::{Histogram, Metrics, RunStatus, SyncStep};

/// Render all metrics in the Prometheus text exposition format.
pub fn render_prometheus(m: &Metrics) -> String {
    let mut out = String::new();

    header(
        &mut out,
        "promtrail_inventory_sync_duration_seconds",
        "Duration of inventory sync steps.",
        "histogram",
    );
    for step in SyncStep::ALL {
        histogram(
            &mut out,
            "promtrail_inventory_sync_duration_seconds",
            ("step", step.as_str()),
            m.sync_duration(step),
        );
    }

    header(
        &mut out,
        "promtrail_inventory_sync_success_total",
        "Successful inventory sync steps.",
        "counter",
    );
    for step in SyncStep::ALL {
        sample(
            &mut out,
            "promtrail_inventory_sync_success_total",
            &[("step", step.as_str())],
            m.sync_successes(step),
        );
    }

    header(
        &mut out,
        "promtrail_inventory_sync_failure_total",
        "Failed inventory sync steps.",
        "counter",
    );
    for step in SyncStep::ALL {
        sample(
            &mut out,
            "promtrail_inventory_sync_failure_total",
            &[("step", step.as_str())],
            m.sync_failures(step),
        );
    }

    header(
        &mut out,
        "promtrail_inventory_job_index_jobs_total",
        "Per-job outcomes of job-index queries.",
        "counter",
    );
    for status in RunStatus::ALL {
        sample(
            &mut out,
            "promtrail_inventory_job_index_jobs_total",
            &[("status", status.as_str())],
            m.job_index_jobs(status),
        );
    }

    header(
        &mut out,
        "promtrail_retention_run_duration_seconds",
        "Duration of retention runs.",
        "histogram",
    );
    for status in RunStatus::ALL {
        histogram(
            &mut out,
            "promtrail_retention_run_duration_seconds",
            ("status", status.as_str()),
            m.retention_duration(status),
        );
    }

    header(
        &mut out,
        "promtrail_retention_deleted_queries_total",
        "Query records deleted by retention.",
        "counter",
    );
    sample(&mut out, "promtrail_retention_deleted_queries_total", &[], m.retention_deleted());

    for (name, help, value) in [
        (
            "promtrail_ingest_enqueued_total",
            "Query records accepted by the ingest queue.",
            m.ingest_enqueued(),
        ),
        (
            "promtrail_ingest_dropped_total",
            "Query records dropped because the ingest queue was full.",
            m.ingest_dropped(),
        ),
        (
            "promtrail_ingest_flushed_records_total",
            "Query records persisted by batch flushes.",
            m.ingest_flushed_records(),
        ),
        (
            "promtrail_ingest_flush_failures_total",
            "Batch flushes that failed and were discarded.",
            m.ingest_flush_failures(),
        ),
    ] {
        header(&mut out, name, help, "counter");
        sample(&mut out, name, &[], value);
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn labels(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let inner: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{{{}}}", inner.join(","))
}

fn sample(out: &mut String, name: &str, pairs: &[(&str, &str)], value: u64) {
    let _ = writeln!(out, "{name}{} {value}", labels(pairs));
}

fn histogram(out: &mut String, name: &str, label: (&str, &str), h: &Histogram) {
    for (le, count) in h.cumulative() {
        let le = le.to_string();
        let _ = writeln!(
            out,
            "{name}_bucket{} {count}",
            labels(&[label, ("le", &le)])
        );
    }
    let _ = writeln!(
        out,
        "{name}_bucket{} {}",
        labels(&[label, ("le", "+Inf")]),
        h.count()
    );
    let _ = writeln!(out, "{name}_sum{} {}", labels(&[label]), h.sum_seconds());
    let _ = writeln!(out, "{name}_count{} {}", labels(&[label]), h.count());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn render_empty_has_declarations() {
        let output = render_prometheus(&Metrics::new());
        assert!(output.contains("# TYPE promtrail_inventory_sync_duration_seconds histogram"));
        assert!(output.contains("# TYPE promtrail_ingest_dropped_total counter"));
        assert!(output.contains("promtrail_ingest_dropped_total 0"));
    }

    #[test]
    fn render_histogram_series() {
        let m = Metrics::new();
        m.observe_retention(Duration::from_millis(20), RunStatus::Success, 7);
        let output = render_prometheus(&m);

        assert!(output.contains(
            "promtrail_retention_run_duration_seconds_bucket{status=\"success\",le=\"0.025\"} 1"
        ));
        assert!(output.contains(
            "promtrail_retention_run_duration_seconds_bucket{status=\"success\",le=\"+Inf\"} 1"
        ));
        assert!(output.contains("promtrail_retention_run_duration_seconds_count{status=\"failure\"} 0"));
        assert!(output.contains("promtrail_retention_deleted_queries_total 7"));
    }

    #[test]
    fn render_step_labels() {
        let m = Metrics::new();
        m.observe_sync(SyncStep::JobIndex, Duration::from_secs(1), false);
        let output = render_prometheus(&m);
        assert!(output.contains("promtrail_inventory_sync_failure_total{step=\"job_index\"} 1"));
        assert!(output.contains("promtrail_inventory_sync_success_total{step=\"run\"} 0"));
    }

    #[test]
    fn every_sample_line_has_a_value() {
        let output = render_prometheus(&Metrics::new());
        for line in output.lines().filter(|l| !l.starts_with('#')) {
            let value = line.rsplit(' ').next().unwrap_or_default();
            assert!(value.parse::<f64>().is_ok(), "bad sample line: {line}");
        }
    }
}
