//! Normalization passes that erase cardinality-sensitive detail from a
//! parsed query before it is rendered and hashed.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::ast::*;

/// Replacement for every label value except the metric name.
pub const MASK: &str = "...";

pub(crate) const METRIC_NAME: &str = "__name__";

/// Normalize `expr` in place.
///
/// Matchers are sorted by label name and their values masked; grouping,
/// matching and include label lists are sorted; matrix ranges are zeroed
/// when `ignore_ranges` is set. Subquery ranges are left alone.
pub fn normalize(expr: &mut Expr, ignore_ranges: bool) {
    match expr {
        Expr::Number(_) | Expr::String(_) => {}
        Expr::VectorSelector(vs) => normalize_selector(vs),
        Expr::MatrixSelector(ms) => {
            normalize_selector(&mut ms.selector);
            if ignore_ranges {
                ms.range = Duration::ZERO;
            }
        }
        Expr::Subquery(sq) => normalize(&mut sq.expr, ignore_ranges),
        Expr::Call(call) => {
            for arg in &mut call.args {
                normalize(arg, ignore_ranges);
            }
        }
        Expr::Aggregate(agg) => {
            normalize(&mut agg.expr, ignore_ranges);
            if let Some(param) = &mut agg.param {
                normalize(param, ignore_ranges);
            }
            if let Some(grouping) = &mut agg.grouping {
                grouping.labels.sort();
            }
        }
        Expr::Binary(b) => {
            normalize(&mut b.lhs, ignore_ranges);
            normalize(&mut b.rhs, ignore_ranges);
            if let Some(matching) = &mut b.matching {
                matching.labels.sort();
            }
            if let Some(group) = &mut b.group {
                group.include.sort();
            }
        }
        Expr::Neg(inner) | Expr::Paren(inner) => normalize(inner, ignore_ranges),
    }
}

fn normalize_selector(vs: &mut VectorSelector) {
    vs.matchers.sort_by(|a, b| a.name.cmp(&b.name));
    for m in &mut vs.matchers {
        if m.name != METRIC_NAME {
            m.value = MASK.to_string();
        }
    }
}

/// Equality matchers of every selector in `expr`, one map per selector,
/// with the metric name under `__name__`.
pub fn collect_label_matchers(expr: &Expr, out: &mut Vec<BTreeMap<String, String>>) {
    match expr {
        Expr::Number(_) | Expr::String(_) => {}
        Expr::VectorSelector(vs) => out.push(equality_matchers(vs)),
        Expr::MatrixSelector(ms) => out.push(equality_matchers(&ms.selector)),
        Expr::Subquery(sq) => collect_label_matchers(&sq.expr, out),
        Expr::Call(call) => {
            for arg in &call.args {
                collect_label_matchers(arg, out);
            }
        }
        Expr::Aggregate(agg) => {
            if let Some(param) = &agg.param {
                collect_label_matchers(param, out);
            }
            collect_label_matchers(&agg.expr, out);
        }
        Expr::Binary(b) => {
            collect_label_matchers(&b.lhs, out);
            collect_label_matchers(&b.rhs, out);
        }
        Expr::Neg(inner) | Expr::Paren(inner) => collect_label_matchers(inner, out),
    }
}

fn equality_matchers(vs: &VectorSelector) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = vs
        .matchers
        .iter()
        .filter(|m| m.op == MatchOp::Equal)
        .map(|m| (m.name.clone(), m.value.clone()))
        .collect();
    if let Some(name) = &vs.name {
        map.insert(METRIC_NAME.to_string(), name.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn normalized(q: &str, ignore_ranges: bool) -> String {
        let mut expr = parse(q).unwrap();
        normalize(&mut expr, ignore_ranges);
        expr.to_string()
    }

    #[test]
    fn masks_values_and_sorts_matchers() {
        assert_eq!(
            normalized(r#"http_requests_total{status="500", job="api"}"#, false),
            r#"http_requests_total{job="...", status="..."}"#
        );
    }

    #[test]
    fn keeps_explicit_name_matcher_value() {
        assert_eq!(
            normalized(r#"{job=~"a.*", __name__="up"}"#, false),
            r#"{__name__="up", job=~"..."}"#
        );
    }

    #[test]
    fn zeroes_matrix_ranges_only_when_asked() {
        assert_eq!(normalized("rate(x[5m])", true), "rate(x[0s])");
        assert_eq!(normalized("rate(x[5m])", false), "rate(x[5m])");
        assert_eq!(
            normalized("max_over_time(rate(x[1m])[1h:5m])", true),
            "max_over_time(rate(x[0s])[1h:5m])"
        );
    }

    #[test]
    fn sorts_label_lists() {
        assert_eq!(
            normalized("sum without (b, a) (x)", false),
            "sum without (a, b) (x)"
        );
        assert_eq!(
            normalized("a * on (z, y) group_right (d, c) b", false),
            "a * on (y, z) group_right (c, d) b"
        );
    }

    #[test]
    fn collects_equality_matchers_per_selector() {
        let expr = parse(r#"rate(up{job="api", env=~"p.*"}[5m]) / on() {__name__="x"}"#).unwrap();
        let mut out = Vec::new();
        collect_label_matchers(&expr, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("__name__").map(String::as_str), Some("up"));
        assert_eq!(out[0].get("job").map(String::as_str), Some("api"));
        assert!(!out[0].contains_key("env"));
        assert_eq!(out[1].get("__name__").map(String::as_str), Some("x"));
    }
}
