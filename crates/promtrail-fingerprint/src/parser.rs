//! Recursive-descent PromQL parser with static type checking.
//!
//! Binary operators are parsed by precedence climbing. Keywords are
//! recognized case-insensitively from identifier tokens, so label names
//! such as `on` or `by` keep working inside braces and grouping lists.

use std::time::Duration;

use regex::Regex;

use crate::ast::*;
use crate::error::{ParseError, ParseResult};
use crate::functions;
use crate::lexer::{Token, TokenKind, tokenize};
use crate::normalize::METRIC_NAME;

const KEYWORDS: &[&str] = &[
    "and",
    "or",
    "unless",
    "atan2",
    "bool",
    "on",
    "ignoring",
    "group_left",
    "group_right",
    "offset",
    "by",
    "without",
];

/// Parse and type-check a PromQL expression.
pub fn parse(input: &str) -> ParseResult<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Modifiers collected between a binary operator and its right operand.
#[derive(Default)]
struct BinaryModifiers {
    return_bool: bool,
    matching: Option<LabelMatching>,
    group: Option<GroupModifier>,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        let tok = self.advance();
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err(unexpected(&tok, what))
        }
    }

    fn expect_eof(&mut self) -> ParseResult<()> {
        let tok = self.peek();
        if tok.kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(unexpected(tok, "end of input"))
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match &self.peek().kind {
            TokenKind::Add => BinaryOp::Add,
            TokenKind::Sub => BinaryOp::Sub,
            TokenKind::Mul => BinaryOp::Mul,
            TokenKind::Div => BinaryOp::Div,
            TokenKind::Mod => BinaryOp::Mod,
            TokenKind::Pow => BinaryOp::Pow,
            TokenKind::Eql => BinaryOp::Eql,
            TokenKind::Neq => BinaryOp::Neq,
            TokenKind::Lss => BinaryOp::Lss,
            TokenKind::Gtr => BinaryOp::Gtr,
            TokenKind::Lte => BinaryOp::Lte,
            TokenKind::Gte => BinaryOp::Gte,
            TokenKind::Ident(word) => match word.to_ascii_lowercase().as_str() {
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "unless" => BinaryOp::Unless,
                "atan2" => BinaryOp::Atan2,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn expr(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            let op_tok = self.advance();
            let modifiers = self.binary_modifiers(op, &op_tok)?;
            let next_min = if op.is_right_associative() { prec } else { prec + 1 };
            let rhs = self.expr(next_min)?;
            lhs = build_binary(op, lhs, rhs, modifiers, op_tok.pos)?;
        }
        Ok(lhs)
    }

    /// Unary signs bind tighter than every binary operator except `^`.
    fn unary(&mut self) -> ParseResult<Expr> {
        let negate = match self.peek().kind {
            TokenKind::Sub => true,
            TokenKind::Add => false,
            _ => return self.postfix(),
        };
        let sign = self.advance();
        let operand = self.expr(BinaryOp::Pow.precedence())?;
        match operand.value_type() {
            ValueType::Scalar | ValueType::Vector => {}
            other => {
                return Err(ParseError::new(
                    sign.pos,
                    format!("unary expression only allowed on scalar or instant vector, got {other}"),
                ));
            }
        }
        Ok(match (negate, operand) {
            (false, operand) => operand,
            (true, Expr::Number(v)) => Expr::Number(-v),
            (true, operand) => Expr::Neg(Box::new(operand)),
        })
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.peek().kind == TokenKind::LeftBracket {
                expr = self.range_or_subquery(expr)?;
            } else if self.peek_keyword("offset") {
                expr = self.offset(expr)?;
            } else if self.peek().kind == TokenKind::At {
                expr = self.at(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Number(v) => Ok(Expr::Number(v)),
            TokenKind::Str(s) => Ok(Expr::String(s)),
            TokenKind::LeftParen => {
                let inner = self.expr(0)?;
                self.expect(TokenKind::RightParen, "\")\"")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::LeftBrace => self.selector(None, tok.pos),
            TokenKind::Ident(ref word) => {
                let next = self.peek_nth(0).clone();
                if let Some(op) = AggregateOp::from_name(word) {
                    let grouping_follows = matches!(&next, TokenKind::Ident(w)
                        if w.eq_ignore_ascii_case("by") || w.eq_ignore_ascii_case("without"));
                    if next == TokenKind::LeftParen || grouping_follows {
                        return self.aggregate(op, tok.pos);
                    }
                }
                if next == TokenKind::LeftParen {
                    return self.call(word, tok.pos);
                }
                let lower = word.to_ascii_lowercase();
                if KEYWORDS.contains(&lower.as_str()) || AggregateOp::from_name(word).is_some()
                {
                    return Err(ParseError::new(tok.pos, format!("unexpected keyword {word:?}")));
                }
                let name = word.clone();
                if next == TokenKind::LeftBrace {
                    self.advance();
                    self.selector(Some(name), tok.pos)
                } else {
                    self.finish_selector(Some(name), Vec::new(), tok.pos)
                }
            }
            _ => Err(unexpected(&tok, "expression")),
        }
    }

    /// Parse label matchers after an opening brace.
    fn selector(&mut self, name: Option<String>, start: usize) -> ParseResult<Expr> {
        let mut matchers = Vec::new();
        loop {
            let tok = self.advance();
            let label = match tok.kind {
                TokenKind::RightBrace => break,
                TokenKind::Ident(ref label) => {
                    if label.contains(':') {
                        return Err(ParseError::new(
                            tok.pos,
                            format!("invalid label name {label:?}"),
                        ));
                    }
                    label.clone()
                }
                TokenKind::Str(ref quoted)
                    if matches!(self.peek().kind, TokenKind::Comma | TokenKind::RightBrace) =>
                {
                    // A bare quoted string names the metric.
                    matchers.push(Matcher {
                        name: METRIC_NAME.to_string(),
                        op: MatchOp::Equal,
                        value: quoted.clone(),
                    });
                    if self.peek().kind == TokenKind::Comma {
                        self.advance();
                    }
                    continue;
                }
                TokenKind::Str(ref label) => label.clone(),
                _ => return Err(unexpected(&tok, "label matcher")),
            };

            let op_tok = self.advance();
            let op = match op_tok.kind {
                TokenKind::Assign => MatchOp::Equal,
                TokenKind::Neq => MatchOp::NotEqual,
                TokenKind::EqlRegex => MatchOp::RegexMatch,
                TokenKind::NeqRegex => MatchOp::RegexNoMatch,
                _ => return Err(unexpected(&op_tok, "label match operator")),
            };
            let value_tok = self.advance();
            let value = match value_tok.kind {
                TokenKind::Str(value) => value,
                _ => return Err(unexpected(&value_tok, "label value string")),
            };
            matchers.push(Matcher {
                name: label,
                op,
                value,
            });

            let sep = self.advance();
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::RightBrace => break,
                _ => return Err(unexpected(&sep, "\",\" or \"}\"")),
            }
        }
        self.finish_selector(name, matchers, start)
    }

    fn finish_selector(
        &mut self,
        name: Option<String>,
        matchers: Vec<Matcher>,
        start: usize,
    ) -> ParseResult<Expr> {
        let has_name_matcher = matchers.iter().any(|m| m.name == METRIC_NAME);
        if name.is_some() && has_name_matcher {
            return Err(ParseError::new(start, "metric name must not be set twice"));
        }

        let mut any_non_empty = name.is_some();
        for m in &matchers {
            let matches_empty = match m.op {
                MatchOp::Equal => m.value.is_empty(),
                MatchOp::NotEqual => !m.value.is_empty(),
                MatchOp::RegexMatch | MatchOp::RegexNoMatch => {
                    let re = Regex::new(&format!("^(?:{})$", m.value)).map_err(|e| {
                        ParseError::new(start, format!("invalid regular expression {:?}: {e}", m.value))
                    })?;
                    re.is_match("") == (m.op == MatchOp::RegexMatch)
                }
            };
            any_non_empty |= !matches_empty;
        }
        if !any_non_empty {
            return Err(ParseError::new(
                start,
                "vector selector must contain at least one non-empty matcher",
            ));
        }

        Ok(Expr::VectorSelector(VectorSelector {
            name,
            matchers,
            modifiers: Modifiers::default(),
        }))
    }

    fn range_or_subquery(&mut self, expr: Expr) -> ParseResult<Expr> {
        let open = self.advance();
        let range = self.duration("range duration")?;

        if self.peek().kind == TokenKind::Colon {
            self.advance();
            let step = if self.peek().kind == TokenKind::RightBracket {
                None
            } else {
                Some(self.duration("subquery step")?)
            };
            self.expect(TokenKind::RightBracket, "\"]\"")?;
            if expr.value_type() != ValueType::Vector {
                return Err(ParseError::new(
                    open.pos,
                    format!("subquery is only allowed on instant vector, got {}", expr.value_type()),
                ));
            }
            return Ok(Expr::Subquery(SubqueryExpr {
                expr: Box::new(expr),
                range,
                step,
                modifiers: Modifiers::default(),
            }));
        }

        self.expect(TokenKind::RightBracket, "\"]\" or \":\"")?;
        match expr {
            Expr::VectorSelector(selector) if selector.modifiers.is_empty() => {
                Ok(Expr::MatrixSelector(MatrixSelector { selector, range }))
            }
            Expr::VectorSelector(_) => Err(ParseError::new(
                open.pos,
                "no offset or @ modifiers allowed before range",
            )),
            _ => Err(ParseError::new(
                open.pos,
                "ranges only allowed for vector selectors",
            )),
        }
    }

    fn duration(&mut self, what: &str) -> ParseResult<Duration> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Duration(d) => Ok(d),
            _ => Err(unexpected(&tok, what)),
        }
    }

    fn offset(&mut self, mut expr: Expr) -> ParseResult<Expr> {
        let kw = self.advance();
        let negative = match self.peek().kind {
            TokenKind::Sub => {
                self.advance();
                true
            }
            TokenKind::Add => {
                self.advance();
                false
            }
            _ => false,
        };
        let duration = self.duration("offset duration")?;
        let modifiers = modifiers_mut(&mut expr).ok_or_else(|| {
            ParseError::new(
                kw.pos,
                "offset modifier must be preceded by a selector or a subquery",
            )
        })?;
        if modifiers.offset.is_some() {
            return Err(ParseError::new(kw.pos, "offset may not be set multiple times"));
        }
        modifiers.offset = Some(Offset { negative, duration });
        Ok(expr)
    }

    fn at(&mut self, mut expr: Expr) -> ParseResult<Expr> {
        let at_tok = self.advance();
        let tok = self.advance();
        let at = match tok.kind {
            TokenKind::Number(v) => AtModifier::Timestamp(v),
            TokenKind::Sub | TokenKind::Add => {
                let num = self.advance();
                let TokenKind::Number(v) = num.kind else {
                    return Err(unexpected(&num, "timestamp"));
                };
                AtModifier::Timestamp(if tok.kind == TokenKind::Sub { -v } else { v })
            }
            TokenKind::Ident(ref word)
                if word.eq_ignore_ascii_case("start") || word.eq_ignore_ascii_case("end") =>
            {
                self.expect(TokenKind::LeftParen, "\"(\"")?;
                self.expect(TokenKind::RightParen, "\")\"")?;
                if word.eq_ignore_ascii_case("start") {
                    AtModifier::Start
                } else {
                    AtModifier::End
                }
            }
            _ => return Err(unexpected(&tok, "timestamp, start() or end()")),
        };
        if let AtModifier::Timestamp(ts) = at {
            if !ts.is_finite() {
                return Err(ParseError::new(tok.pos, "timestamp out of bounds for @ modifier"));
            }
        }
        let modifiers = modifiers_mut(&mut expr).ok_or_else(|| {
            ParseError::new(
                at_tok.pos,
                "@ modifier must be preceded by a selector or a subquery",
            )
        })?;
        if modifiers.at.is_some() {
            return Err(ParseError::new(at_tok.pos, "@ may not be set multiple times"));
        }
        modifiers.at = Some(at);
        Ok(expr)
    }

    fn call(&mut self, name: &str, start: usize) -> ParseResult<Expr> {
        let func = functions::lookup(name)
            .ok_or_else(|| ParseError::new(start, format!("unknown function {name:?}")))?;
        let args = self.arguments()?;

        if args.len() < func.min_args() || func.max_args().is_some_and(|max| args.len() > max) {
            return Err(ParseError::new(
                start,
                format!("wrong number of arguments for {}(): got {}", func.name, args.len()),
            ));
        }
        for (i, arg) in args.iter().enumerate() {
            let expected = func.arg_type(i).unwrap_or(ValueType::Vector);
            let got = arg.value_type();
            if got != expected {
                return Err(ParseError::new(
                    start,
                    format!(
                        "expected type {expected} in call to {}(), got {got}",
                        func.name
                    ),
                ));
            }
        }
        Ok(Expr::Call(Call { func, args }))
    }

    /// `( [expr (, expr)*] )`
    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(TokenKind::LeftParen, "\"(\"")?;
        let mut args = Vec::new();
        if self.peek().kind == TokenKind::RightParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expr(0)?);
            let sep = self.advance();
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::RightParen => return Ok(args),
                _ => return Err(unexpected(&sep, "\",\" or \")\"")),
            }
        }
    }

    fn aggregate(&mut self, op: AggregateOp, start: usize) -> ParseResult<Expr> {
        let mut grouping = self.grouping()?;
        let mut args = self.arguments()?;
        if let Some(after) = self.grouping()? {
            if grouping.is_some() {
                return Err(ParseError::new(start, "aggregation grouping set twice"));
            }
            grouping = Some(after);
        }

        let expected_args = if op.param_type().is_some() { 2 } else { 1 };
        if args.len() != expected_args {
            return Err(ParseError::new(
                start,
                format!(
                    "wrong number of arguments for aggregate expression {}: expected {expected_args}, got {}",
                    op.name(),
                    args.len()
                ),
            ));
        }
        let expr = args.pop().unwrap_or(Expr::Number(0.0));
        let param = args.pop();

        if expr.value_type() != ValueType::Vector {
            return Err(ParseError::new(
                start,
                format!(
                    "expected type instant vector in aggregation expression, got {}",
                    expr.value_type()
                ),
            ));
        }
        if let (Some(param), Some(expected)) = (&param, op.param_type()) {
            if param.value_type() != expected {
                return Err(ParseError::new(
                    start,
                    format!(
                        "expected type {expected} in aggregation parameter, got {}",
                        param.value_type()
                    ),
                ));
            }
        }

        Ok(Expr::Aggregate(AggregateExpr {
            op,
            expr: Box::new(expr),
            param: param.map(Box::new),
            grouping,
        }))
    }

    fn grouping(&mut self) -> ParseResult<Option<Grouping>> {
        let without = if self.peek_keyword("by") {
            false
        } else if self.peek_keyword("without") {
            true
        } else {
            return Ok(None);
        };
        self.advance();
        let labels = self.label_list()?;
        Ok(Some(Grouping { without, labels }))
    }

    /// `( [label (, label)*] )`, trailing comma allowed.
    fn label_list(&mut self) -> ParseResult<Vec<String>> {
        self.expect(TokenKind::LeftParen, "\"(\"")?;
        let mut labels = Vec::new();
        loop {
            let tok = self.advance();
            match tok.kind {
                TokenKind::RightParen => return Ok(labels),
                TokenKind::Ident(label) | TokenKind::Str(label) => labels.push(label),
                _ => return Err(unexpected(&tok, "label")),
            }
            let sep = self.advance();
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::RightParen => return Ok(labels),
                _ => return Err(unexpected(&sep, "\",\" or \")\"")),
            }
        }
    }

    fn binary_modifiers(&mut self, op: BinaryOp, op_tok: &Token) -> ParseResult<BinaryModifiers> {
        let mut mods = BinaryModifiers::default();

        if self.peek_keyword("bool") {
            if !op.is_comparison() {
                return Err(ParseError::new(
                    op_tok.pos,
                    "bool modifier can only be used on comparison operators",
                ));
            }
            self.advance();
            mods.return_bool = true;
        }

        let on = if self.peek_keyword("on") {
            Some(true)
        } else if self.peek_keyword("ignoring") {
            Some(false)
        } else {
            None
        };
        if let Some(on) = on {
            self.advance();
            let labels = self.label_list()?;
            mods.matching = Some(LabelMatching { on, labels });

            let side = if self.peek_keyword("group_left") {
                Some(GroupSide::Left)
            } else if self.peek_keyword("group_right") {
                Some(GroupSide::Right)
            } else {
                None
            };
            if let Some(side) = side {
                let kw = self.advance();
                if op.is_set_operator() {
                    return Err(ParseError::new(
                        kw.pos,
                        format!("no grouping allowed for \"{op}\" operation"),
                    ));
                }
                let include = if self.peek().kind == TokenKind::LeftParen {
                    self.label_list()?
                } else {
                    Vec::new()
                };
                mods.group = Some(GroupModifier { side, include });
            }
        }
        Ok(mods)
    }
}

fn build_binary(
    op: BinaryOp,
    lhs: Expr,
    rhs: Expr,
    mods: BinaryModifiers,
    pos: usize,
) -> ParseResult<Expr> {
    let (lt, rt) = (lhs.value_type(), rhs.value_type());
    for t in [lt, rt] {
        if !matches!(t, ValueType::Scalar | ValueType::Vector) {
            return Err(ParseError::new(
                pos,
                format!("binary expression must contain only scalar and instant vector types, got {t}"),
            ));
        }
    }
    let both_vectors = lt == ValueType::Vector && rt == ValueType::Vector;

    if op.is_comparison() && lt == ValueType::Scalar && rt == ValueType::Scalar && !mods.return_bool {
        return Err(ParseError::new(
            pos,
            "comparisons between scalars must use bool modifier",
        ));
    }
    if op.is_set_operator() && !both_vectors {
        return Err(ParseError::new(
            pos,
            format!("set operator \"{op}\" not allowed in binary scalar expression"),
        ));
    }
    if (mods.matching.is_some() || mods.group.is_some()) && !both_vectors {
        return Err(ParseError::new(
            pos,
            "vector matching only allowed between instant vectors",
        ));
    }

    Ok(Expr::Binary(BinaryExpr {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        return_bool: mods.return_bool,
        matching: mods.matching,
        group: mods.group,
    }))
}

/// Evaluation modifiers of the node `offset`/`@` attach to, if it takes any.
fn modifiers_mut(expr: &mut Expr) -> Option<&mut Modifiers> {
    match expr {
        Expr::VectorSelector(vs) => Some(&mut vs.modifiers),
        Expr::MatrixSelector(ms) => Some(&mut ms.selector.modifiers),
        Expr::Subquery(sq) => Some(&mut sq.modifiers),
        _ => None,
    }
}

fn unexpected(tok: &Token, expected: &str) -> ParseError {
    let found = match &tok.kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Ident(word) => format!("identifier {word:?}"),
        TokenKind::Str(s) => format!("string {s:?}"),
        TokenKind::Number(v) => format!("number {}", format_number(*v)),
        TokenKind::Duration(d) => format!("duration {}", format_duration(*d)),
        other => format!("{other:?}"),
    };
    ParseError::new(tok.pos, format!("unexpected {found}, expected {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(q: &str) -> String {
        parse(q).unwrap().to_string()
    }

    #[test]
    fn prints_canonical_spacing() {
        assert_eq!(roundtrip("up{job='api'}"), r#"up{job="api"}"#);
        assert_eq!(roundtrip("a+b*c"), "a + b * c");
        assert_eq!(roundtrip("sum(rate(x[5m]))by(job)"), "sum by (job) (rate(x[5m]))");
        assert_eq!(roundtrip("topk(5,x) "), "topk(5, x)");
    }

    #[test]
    fn precedence_and_associativity() {
        let Expr::Binary(b) = parse("a + b * c").unwrap() else {
            panic!("expected binary");
        };
        assert_eq!(b.op, BinaryOp::Add);
        assert!(matches!(*b.rhs, Expr::Binary(ref r) if r.op == BinaryOp::Mul));

        let Expr::Binary(b) = parse("2 ^ 3 ^ 2").unwrap() else {
            panic!("expected binary");
        };
        assert!(matches!(*b.rhs, Expr::Binary(ref r) if r.op == BinaryOp::Pow));

        let Expr::Binary(b) = parse("a or b and c").unwrap() else {
            panic!("expected binary");
        };
        assert_eq!(b.op, BinaryOp::Or);
    }

    #[test]
    fn unary_minus_binds_below_pow() {
        assert!(matches!(parse("-2 ^ 2").unwrap(), Expr::Neg(_)));
        assert_eq!(parse("-5").unwrap(), Expr::Number(-5.0));
        assert_eq!(roundtrip("-foo * 2"), "-foo * 2");
    }

    #[test]
    fn modifiers_and_subqueries() {
        assert_eq!(
            roundtrip("rate(http_requests_total[5m] offset 1h)"),
            "rate(http_requests_total[5m] offset 1h)"
        );
        assert_eq!(roundtrip("foo @ 1609746000 offset -5m"), "foo @ 1609746000 offset -5m");
        assert_eq!(roundtrip("foo offset 5m @ end()"), "foo @ end() offset 5m");
        assert_eq!(
            roundtrip("max_over_time(rate(x[1m])[1h:5m])"),
            "max_over_time(rate(x[1m])[1h:5m])"
        );
        assert_eq!(roundtrip("avg_over_time(x[10m:])"), "avg_over_time(x[10m:])");
    }

    #[test]
    fn vector_matching_modifiers() {
        assert_eq!(
            roundtrip("a / ON(instance) GROUP_LEFT(version) b"),
            "a / on (instance) group_left (version) b"
        );
        assert_eq!(roundtrip("a > bool 3"), "a > bool 3");
        assert_eq!(roundtrip("a and ignoring(x) b"), "a and ignoring (x) b");
    }

    #[test]
    fn keywords_are_valid_label_names() {
        assert_eq!(
            roundtrip(r#"sum by (on, by) (x{offset="1", bool="2"})"#),
            r#"sum by (on, by) (x{offset="1", bool="2"})"#
        );
    }

    #[test]
    fn aggregations_with_params() {
        assert_eq!(roundtrip(r#"count_values("v", x)"#), r#"count_values("v", x)"#);
        assert_eq!(roundtrip("quantile without (a) (0.9, x)"), "quantile without (a) (0.9, x)");
        assert!(parse("topk(x)").is_err());
        assert!(parse(r#"count_values(5, x)"#).is_err());
    }

    #[test]
    fn rejects_invalid_queries() {
        for q in [
            "",
            "up{",
            "rate(",
            "rate(foo)",
            "foo[5m] + 1",
            "{}",
            r#"{job=""}"#,
            r#"foo{__name__="bar"}"#,
            r#"foo{a=~"("}"#,
            "1 > 2",
            "1 and 2",
            "foo offset 5m offset 1m",
            "(foo)[5m]",
            "foo offset 1m [5m]",
            "a + on(x) 1",
            "a and on(x) group_left b",
            "a + bool b",
            "unknown_fn(x)",
            "sum",
            "foo bar",
            "abs(1)",
        ] {
            assert!(parse(q).is_err(), "expected error for {q:?}");
        }
    }

    #[test]
    fn quoted_metric_name_in_braces() {
        let Expr::VectorSelector(vs) = parse(r#"{"my.metric", a="b"}"#).unwrap() else {
            panic!("expected selector");
        };
        assert_eq!(vs.matchers[0].name, "__name__");
        assert_eq!(vs.matchers[0].value, "my.metric");
    }

    #[test]
    fn error_reports_position() {
        let err = parse("sum(rate(x[5m]) foo").unwrap_err();
        assert_eq!(err.position, 16);
    }
}
