//! Tokenization of PromQL text.
//!
//! Keywords are not distinguished here: they come out as identifiers and
//! the parser decides from context (PromQL keywords are case-insensitive
//! and several of them are also valid label names).

use std::time::Duration;

use crate::error::{ParseError, ParseResult};

/// Token categories produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Duration(Duration),
    Str(String),

    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    At,

    /// `=` (label matcher)
    Assign,
    /// `==`
    Eql,
    /// `!=`
    Neq,
    /// `=~`
    EqlRegex,
    /// `!~`
    NeqRegex,
    Lss,
    Gtr,
    Lte,
    Gte,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    Eof,
}

/// A token and the char offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

/// Tokenize a whole query.
pub fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    Lexer::new(input).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(mut self) -> ParseResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let start = self.pos;
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos: start,
                });
                return Ok(tokens);
            };

            let kind = match c {
                '(' => self.single(TokenKind::LeftParen),
                ')' => self.single(TokenKind::RightParen),
                '{' => self.single(TokenKind::LeftBrace),
                '}' => self.single(TokenKind::RightBrace),
                '[' => self.single(TokenKind::LeftBracket),
                ']' => self.single(TokenKind::RightBracket),
                ',' => self.single(TokenKind::Comma),
                ':' => self.single(TokenKind::Colon),
                '@' => self.single(TokenKind::At),
                '+' => self.single(TokenKind::Add),
                '-' => self.single(TokenKind::Sub),
                '*' => self.single(TokenKind::Mul),
                '/' => self.single(TokenKind::Div),
                '%' => self.single(TokenKind::Mod),
                '^' => self.single(TokenKind::Pow),
                '=' => match self.peek_at(1) {
                    Some('=') => self.double(TokenKind::Eql),
                    Some('~') => self.double(TokenKind::EqlRegex),
                    _ => self.single(TokenKind::Assign),
                },
                '!' => match self.peek_at(1) {
                    Some('=') => self.double(TokenKind::Neq),
                    Some('~') => self.double(TokenKind::NeqRegex),
                    _ => return Err(ParseError::new(start, "unexpected character after '!'")),
                },
                '<' => match self.peek_at(1) {
                    Some('=') => self.double(TokenKind::Lte),
                    _ => self.single(TokenKind::Lss),
                },
                '>' => match self.peek_at(1) {
                    Some('=') => self.double(TokenKind::Gte),
                    _ => self.single(TokenKind::Gtr),
                },
                '"' | '\'' => TokenKind::Str(self.quoted_string(c)?),
                '`' => TokenKind::Str(self.raw_string()?),
                c if c.is_ascii_digit() => self.number_or_duration()?,
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    self.number_or_duration()?
                }
                c if is_ident_start(c) => self.identifier(),
                other => {
                    return Err(ParseError::new(
                        start,
                        format!("unexpected character {other:?}"),
                    ));
                }
            };
            tokens.push(Token { kind, pos: start });
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 2;
        kind
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn identifier(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.to_ascii_lowercase().as_str() {
            "inf" => TokenKind::Number(f64::INFINITY),
            "nan" => TokenKind::Number(f64::NAN),
            _ => TokenKind::Ident(word),
        }
    }

    fn number_or_duration(&mut self) -> ParseResult<TokenKind> {
        if let Some(duration) = self.try_duration() {
            return Ok(TokenKind::Duration(duration));
        }

        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.pos += 2;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[start + 2..self.pos].iter().collect();
            return u64::from_str_radix(&digits, 16)
                .map(|v| TokenKind::Number(v as f64))
                .map_err(|_| ParseError::new(start, "bad hexadecimal number"));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        if self.peek().is_some_and(is_word_char) {
            return Err(ParseError::new(start, "bad number or duration syntax"));
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ParseError::new(start, format!("bad number {text:?}")))
    }

    /// Scan `(<digits><unit>)+` at the cursor. Leaves the cursor untouched
    /// when the text is not a duration.
    fn try_duration(&mut self) -> Option<Duration> {
        let mut cursor = self.pos;
        let mut total_ms: u64 = 0;
        let mut parts = 0;

        loop {
            let digits_start = cursor;
            while self.chars.get(cursor).is_some_and(|c| c.is_ascii_digit()) {
                cursor += 1;
            }
            if cursor == digits_start {
                break;
            }
            let value: u64 = self.chars[digits_start..cursor]
                .iter()
                .collect::<String>()
                .parse()
                .ok()?;

            let (unit_ms, unit_len) = match (self.chars.get(cursor), self.chars.get(cursor + 1)) {
                (Some('m'), Some('s')) => (1, 2),
                (Some('s'), _) => (1_000, 1),
                (Some('m'), _) => (60_000, 1),
                (Some('h'), _) => (3_600_000, 1),
                (Some('d'), _) => (86_400_000, 1),
                (Some('w'), _) => (604_800_000, 1),
                (Some('y'), _) => (31_536_000_000, 1),
                _ => {
                    // Digits without a unit end the duration.
                    cursor = digits_start;
                    break;
                }
            };
            cursor += unit_len;
            total_ms = total_ms.checked_add(value.checked_mul(unit_ms)?)?;
            parts += 1;
        }

        if parts == 0 || self.chars.get(cursor).is_some_and(|&c| is_word_char(c) || c == '.') {
            return None;
        }
        self.pos = cursor;
        Some(Duration::from_millis(total_ms))
    }

    fn quoted_string(&mut self, quote: char) -> ParseResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::new(start, "unterminated quoted string"));
            };
            self.pos += 1;
            match c {
                c if c == quote => return Ok(out),
                '\n' => return Err(ParseError::new(start, "unterminated quoted string")),
                '\\' => out.push(self.escape(quote)?),
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, quote: char) -> ParseResult<char> {
        let at = self.pos;
        let Some(c) = self.peek() else {
            return Err(ParseError::new(at, "unterminated escape sequence"));
        };
        self.pos += 1;
        let decoded = match c {
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{0b}',
            '\\' => '\\',
            c if c == quote => c,
            'x' => self.hex_escape(2, at)?,
            'u' => self.hex_escape(4, at)?,
            'U' => self.hex_escape(8, at)?,
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    let digit = self
                        .peek()
                        .and_then(|d| d.to_digit(8))
                        .ok_or_else(|| ParseError::new(at, "bad octal escape"))?;
                    value = value * 8 + digit;
                    self.pos += 1;
                }
                char::from_u32(value).ok_or_else(|| ParseError::new(at, "bad octal escape"))?
            }
            other => {
                return Err(ParseError::new(
                    at,
                    format!("unknown escape sequence \\{other}"),
                ));
            }
        };
        Ok(decoded)
    }

    fn hex_escape(&mut self, len: usize, at: usize) -> ParseResult<char> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(ParseError::new(at, "truncated escape sequence"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ParseError::new(at, format!("bad escape sequence {digits:?}")))
    }

    fn raw_string(&mut self) -> ParseResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('`') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err(ParseError::new(start, "unterminated raw string")),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_ident_char(c: char) -> bool {
    is_word_char(c) || c == ':'
}

/// Characters that may not directly follow a number or duration.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn selector_tokens() {
        assert_eq!(
            kinds(r#"up{job="api",env!~"dev.*"}"#),
            vec![
                TokenKind::Ident("up".to_string()),
                TokenKind::LeftBrace,
                TokenKind::Ident("job".to_string()),
                TokenKind::Assign,
                TokenKind::Str("api".to_string()),
                TokenKind::Comma,
                TokenKind::Ident("env".to_string()),
                TokenKind::NeqRegex,
                TokenKind::Str("dev.*".to_string()),
                TokenKind::RightBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn durations_and_numbers() {
        assert_eq!(
            kinds("[1h30m:500ms] 1.5e3 0x1f 7"),
            vec![
                TokenKind::LeftBracket,
                TokenKind::Duration(Duration::from_secs(5400)),
                TokenKind::Colon,
                TokenKind::Duration(Duration::from_millis(500)),
                TokenKind::RightBracket,
                TokenKind::Number(1500.0),
                TokenKind::Number(31.0),
                TokenKind::Number(7.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn inf_and_nan_are_numbers() {
        let toks = kinds("Inf nan");
        assert_eq!(toks[0], TokenKind::Number(f64::INFINITY));
        assert!(matches!(toks[1], TokenKind::Number(v) if v.is_nan()));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n" 'it\'s' `raw\n`"#),
            vec![
                TokenKind::Str("a\"b\n".to_string()),
                TokenKind::Str("it's".to_string()),
                TokenKind::Str("raw\\n".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("up # the up metric\n"),
            vec![TokenKind::Ident("up".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_fails() {
        let err = tokenize(r#"up{job="api}"#).unwrap_err();
        assert_eq!(err.position, 7);
    }

    #[test]
    fn garbage_after_number_fails() {
        assert!(tokenize("5mx").is_err());
        assert!(tokenize("12abc").is_err());
    }
}
