//! promtrail-fingerprint — structural identity for PromQL queries.
//!
//! Two queries share a fingerprint when they are identical after label
//! matchers are sorted and their values masked, grouping and matching label
//! lists are sorted, and (optionally) matrix ranges are zeroed. The hash is
//! xxh64 over the canonical rendering, as 16 lowercase hex characters.

pub mod ast;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod normalize;
pub mod parser;

use std::collections::BTreeMap;

use xxhash_rust::xxh64::xxh64;

pub use error::{ParseError, ParseResult};
pub use normalize::MASK;
pub use parser::parse;

/// Hash and canonical form of a query. Both are empty when the query
/// could not be parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub hash: String,
    pub canonical: String,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.hash.is_empty()
    }
}

/// Fingerprint a query. Unparseable input yields an empty fingerprint.
pub fn fingerprint(query: &str, ignore_ranges: bool) -> Fingerprint {
    let Ok(mut expr) = parse(query) else {
        return Fingerprint::default();
    };
    normalize::normalize(&mut expr, ignore_ranges);
    let canonical = expr.to_string();
    Fingerprint {
        hash: hash_canonical(&canonical),
        canonical,
    }
}

/// xxh64 (seed 0) of `canonical`, big-endian lowercase hex.
pub fn hash_canonical(canonical: &str) -> String {
    hex::encode(xxh64(canonical.as_bytes(), 0).to_be_bytes())
}

/// Equality label matchers of every selector in `query`, with the metric
/// name under `__name__`. Empty when the query does not parse.
pub fn label_matchers(query: &str) -> Vec<BTreeMap<String, String>> {
    let mut out = Vec::new();
    if let Ok(expr) = parse(query) {
        normalize::collect_label_matchers(&expr, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_order_and_values_do_not_matter() {
        let a = fingerprint(r#"up{job="api", instance="a:9090"}"#, false);
        let b = fingerprint(r#"up{instance="b:9090", job="worker"}"#, false);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn different_metric_names_differ() {
        assert_ne!(
            fingerprint("up", false).hash,
            fingerprint("down", false).hash
        );
    }

    #[test]
    fn ignore_ranges_controls_range_identity() {
        assert_eq!(
            fingerprint("rate(foo[5m])", true),
            fingerprint("rate(foo[1h])", true)
        );
        let five = fingerprint("rate(foo[5m])", false);
        let hour = fingerprint("rate(foo[1h])", false);
        assert_ne!(five.canonical, hour.canonical);
        assert_ne!(five.hash, hour.hash);
    }

    #[test]
    fn grouping_label_order_does_not_matter() {
        assert_eq!(
            fingerprint("sum by (b,a) (foo)", false),
            fingerprint("sum by (a,b) (foo)", false)
        );
        assert_eq!(
            fingerprint("sum(foo) by (b, a)", false),
            fingerprint("sum by (a,b) (foo)", false)
        );
    }

    #[test]
    fn vector_matching_label_order_does_not_matter() {
        assert_eq!(
            fingerprint("a / on (y, x) group_left (q, p) b", false),
            fingerprint("a / on (x, y) group_left (p, q) b", false)
        );
    }

    #[test]
    fn unparseable_queries_are_empty() {
        for q in ["", "up{", "rate("] {
            assert_eq!(fingerprint(q, false), Fingerprint::default());
            assert_eq!(fingerprint(q, true), Fingerprint::default());
        }
    }

    #[test]
    fn hash_matches_recomputation() {
        for q in [
            "up",
            r#"sum by (job) (rate(http_requests_total{code=~"5.."}[5m]))"#,
            "histogram_quantile(0.99, sum by (le) (rate(x_bucket[1m])))",
            "a + on (x) group_left b offset 5m",
        ] {
            let fp = fingerprint(q, false);
            assert_eq!(fp.hash.len(), 16, "{q}");
            assert_eq!(fp.hash, hash_canonical(&fp.canonical));
            let external = format!("{:016x}", xxh64(fp.canonical.as_bytes(), 0));
            assert_eq!(fp.hash, external);
        }
    }

    #[test]
    fn canonical_is_stable() {
        let fp = fingerprint(
            r#"sum by (job, env) (rate(http_requests_total{status="500",job="api"}[5m]))"#,
            false,
        );
        assert_eq!(
            fp.canonical,
            r#"sum by (env, job) (rate(http_requests_total{job="...", status="..."}[5m]))"#
        );
        assert_eq!(fingerprint(&fp.canonical, false), fp);
    }

    #[test]
    fn label_matchers_feed_records() {
        let maps = label_matchers(r#"up{job="api"} or down"#);
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[1].get("__name__").map(String::as_str), Some("down"));
        assert!(label_matchers("up{").is_empty());
    }
}
