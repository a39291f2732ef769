//! Signatures of the PromQL built-in functions.

use crate::ast::ValueType;

/// A built-in function signature.
#[derive(Debug, PartialEq, Eq)]
pub struct Function {
    pub name: &'static str,
    pub args: &'static [ValueType],
    /// How many trailing entries of `args` may be omitted.
    pub optional: usize,
    /// The last argument type may repeat any number of times.
    pub variadic: bool,
    pub returns: ValueType,
}

impl Function {
    pub fn min_args(&self) -> usize {
        self.args.len() - self.optional
    }

    pub fn max_args(&self) -> Option<usize> {
        if self.variadic {
            None
        } else {
            Some(self.args.len())
        }
    }

    /// Expected type of the `i`-th argument.
    pub fn arg_type(&self, i: usize) -> Option<ValueType> {
        match self.args.get(i) {
            Some(t) => Some(*t),
            None if self.variadic => self.args.last().copied(),
            None => None,
        }
    }
}

use ValueType::{Matrix as M, Scalar as S, String as T, Vector as V};

const fn f(
    name: &'static str,
    args: &'static [ValueType],
    optional: usize,
    variadic: bool,
    returns: ValueType,
) -> Function {
    Function {
        name,
        args,
        optional,
        variadic,
        returns,
    }
}

static FUNCTIONS: &[Function] = &[
    f("abs", &[V], 0, false, V),
    f("absent", &[V], 0, false, V),
    f("absent_over_time", &[M], 0, false, V),
    f("acos", &[V], 0, false, V),
    f("acosh", &[V], 0, false, V),
    f("asin", &[V], 0, false, V),
    f("asinh", &[V], 0, false, V),
    f("atan", &[V], 0, false, V),
    f("atanh", &[V], 0, false, V),
    f("avg_over_time", &[M], 0, false, V),
    f("ceil", &[V], 0, false, V),
    f("changes", &[M], 0, false, V),
    f("clamp", &[V, S, S], 0, false, V),
    f("clamp_max", &[V, S], 0, false, V),
    f("clamp_min", &[V, S], 0, false, V),
    f("cos", &[V], 0, false, V),
    f("cosh", &[V], 0, false, V),
    f("count_over_time", &[M], 0, false, V),
    f("day_of_month", &[V], 1, false, V),
    f("day_of_week", &[V], 1, false, V),
    f("day_of_year", &[V], 1, false, V),
    f("days_in_month", &[V], 1, false, V),
    f("deg", &[V], 0, false, V),
    f("delta", &[M], 0, false, V),
    f("deriv", &[M], 0, false, V),
    f("exp", &[V], 0, false, V),
    f("floor", &[V], 0, false, V),
    f("histogram_avg", &[V], 0, false, V),
    f("histogram_count", &[V], 0, false, V),
    f("histogram_fraction", &[S, S, V], 0, false, V),
    f("histogram_quantile", &[S, V], 0, false, V),
    f("histogram_stddev", &[V], 0, false, V),
    f("histogram_stdvar", &[V], 0, false, V),
    f("histogram_sum", &[V], 0, false, V),
    f("holt_winters", &[M, S, S], 0, false, V),
    f("double_exponential_smoothing", &[M, S, S], 0, false, V),
    f("hour", &[V], 1, false, V),
    f("idelta", &[M], 0, false, V),
    f("increase", &[M], 0, false, V),
    f("irate", &[M], 0, false, V),
    f("label_join", &[V, T, T, T], 0, true, V),
    f("label_replace", &[V, T, T, T, T], 0, false, V),
    f("last_over_time", &[M], 0, false, V),
    f("ln", &[V], 0, false, V),
    f("log10", &[V], 0, false, V),
    f("log2", &[V], 0, false, V),
    f("mad_over_time", &[M], 0, false, V),
    f("max_over_time", &[M], 0, false, V),
    f("min_over_time", &[M], 0, false, V),
    f("minute", &[V], 1, false, V),
    f("month", &[V], 1, false, V),
    f("pi", &[], 0, false, S),
    f("predict_linear", &[M, S], 0, false, V),
    f("present_over_time", &[M], 0, false, V),
    f("quantile_over_time", &[S, M], 0, false, V),
    f("rad", &[V], 0, false, V),
    f("rate", &[M], 0, false, V),
    f("resets", &[M], 0, false, V),
    f("round", &[V, S], 1, false, V),
    f("scalar", &[V], 0, false, S),
    f("sgn", &[V], 0, false, V),
    f("sin", &[V], 0, false, V),
    f("sinh", &[V], 0, false, V),
    f("sort", &[V], 0, false, V),
    f("sort_by_label", &[V, T], 0, true, V),
    f("sort_by_label_desc", &[V, T], 0, true, V),
    f("sort_desc", &[V], 0, false, V),
    f("sqrt", &[V], 0, false, V),
    f("stddev_over_time", &[M], 0, false, V),
    f("stdvar_over_time", &[M], 0, false, V),
    f("sum_over_time", &[M], 0, false, V),
    f("tan", &[V], 0, false, V),
    f("tanh", &[V], 0, false, V),
    f("time", &[], 0, false, S),
    f("timestamp", &[V], 0, false, V),
    f("vector", &[S], 0, false, V),
    f("year", &[V], 1, false, V),
];

/// Look up a function by its exact (case-sensitive) name.
pub fn lookup(name: &str) -> Option<&'static Function> {
    FUNCTIONS.iter().find(|func| func.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_and_variadic_arity() {
        let round = lookup("round").unwrap();
        assert_eq!(round.min_args(), 1);
        assert_eq!(round.max_args(), Some(2));

        let join = lookup("label_join").unwrap();
        assert_eq!(join.min_args(), 4);
        assert_eq!(join.max_args(), None);
        assert_eq!(join.arg_type(7), Some(ValueType::String));
    }

    #[test]
    fn unknown_function() {
        assert!(lookup("rate_over_nothing").is_none());
        assert!(lookup("RATE").is_none());
    }
}
