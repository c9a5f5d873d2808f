use justerror::Error;

use crate::diagnostics::{self, OnFatal, Underline};
use crate::span::Loc;
use crate::token::{Token, TokenKind, Value};

#[derive(Debug, thiserror::Error)]
enum LexError {
    #[error("More than one decimal point in number.")]
    DoubleDecimalPoint,
    #[error("Invalid {base} literal: expected '0' before '{marker}'.")]
    BadBaseMarker { base: &'static str, marker: char },
    #[error("Invalid character '{0}' in {1} literal.")]
    BadBaseDigit(char, &'static str),
    #[error("Unable to convert literal '{0}' to an integer.")]
    IntConversion(String),
    #[error("Unable to convert literal '{0}' to a float.")]
    FloatConversion(String),
    #[error("Unterminated string literal.")]
    UnterminatedString,
    #[error("Unable to parse string literal: {0}.")]
    BadString(EscapeError),
    #[error("Unexpected character '{0}'.")]
    UnexpectedCharacter(char),
}

#[Error]
pub enum EscapeError {
    InvalidEscape(char),
    TrailingBackslash,
}

pub struct Tokenizer {
    content: Vec<u8>,
    file: String,
    lines: Vec<String>,
    pos: usize,
    line: usize,
    col: usize,
    on_fatal: OnFatal,
}

impl Tokenizer {
    pub fn new(content: &str, file: &str, on_fatal: OnFatal) -> Self {
        Self {
            content: content.as_bytes().to_vec(),
            file: file.to_string(),
            lines: content.split('\n').map(str::to_string).collect(),
            pos: 0,
            line: 1,
            col: 1,
            on_fatal,
        }
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            let ch = self.peek();

            if is_whitespace(ch) {
                self.consume();
            } else if ch.is_ascii_digit() || self.is_signed_number() {
                tokens.push(self.number());
            } else if ch == b'.' && self.next() == Some(b'.') {
                let loc = self.loc();
                self.consume();
                self.consume();
                tokens.push(Token::new(
                    TokenKind::Concat,
                    Value::Word("..".to_string()),
                    loc,
                ));
            } else if ch == b'.' && self.next().is_some_and(|c| c.is_ascii_digit()) {
                tokens.push(self.number());
            } else if ch == b'#' {
                self.comment();
            } else if ch == b'\'' || ch == b'"' {
                tokens.push(self.string());
            } else if ch.is_ascii_alphabetic() || ch == b'_' {
                tokens.push(self.identifier());
            } else if let Some(token) = self.operator() {
                tokens.push(token);
            } else {
                let loc = self.loc();
                self.consume();
                diagnostics::lexer_error(
                    &self.lines,
                    &loc,
                    LexError::UnexpectedCharacter(ch as char),
                    Underline::Caret,
                );
                (self.on_fatal)();
            }
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            Value::Word("EOF".to_string()),
            self.loc(),
        ));
        tokens
    }

    // A sign starts a numeric literal only when a digit follows immediately;
    // otherwise '+'/'-' lex as operators.
    fn is_signed_number(&self) -> bool {
        matches!(self.peek(), b'+' | b'-') && self.next().is_some_and(|c| c.is_ascii_digit())
    }

    fn number(&mut self) -> Token {
        let loc = self.loc();
        let mut literal = String::new();
        let mut is_int = true;
        let mut is_negative = false;
        let mut is_hex = false;
        let mut is_octal = false;
        let mut is_binary = false;

        match self.peek() {
            b'+' => {
                self.consume();
            }
            b'-' => {
                is_negative = true;
                self.consume();
            }
            b'.' => {
                is_int = false;
                literal.push_str("0.");
                self.consume();
            }
            // A bare 0 followed by a digit is an implicit octal literal
            b'0' if self.next().is_some_and(|c| c.is_ascii_digit()) => is_octal = true,
            _ => {}
        }

        while !self.is_at_end() {
            let ch = self.peek();

            if is_whitespace(ch) {
                break;
            }
            if ch == b'_' {
                self.consume();
                continue;
            }

            match ch {
                b'.' if !is_hex && !is_octal && !is_binary => {
                    if is_int {
                        is_int = false;
                    } else {
                        self.report_before_cursor(LexError::DoubleDecimalPoint);
                        break;
                    }
                }
                b'x' | b'X' => {
                    if is_hex || literal != "0" {
                        self.report_before_cursor(LexError::BadBaseMarker {
                            base: "hexadecimal",
                            marker: ch as char,
                        });
                        break;
                    }
                    is_hex = true;
                }
                b'o' | b'O' => {
                    if is_octal || literal != "0" {
                        self.report_before_cursor(LexError::BadBaseMarker {
                            base: "octal",
                            marker: ch as char,
                        });
                        break;
                    }
                    is_octal = true;
                }
                // 'b' stays an ordinary digit while hex is latched (0xb is valid)
                b'b' | b'B' if !is_hex => {
                    if is_binary || literal != "0" {
                        self.report_before_cursor(LexError::BadBaseMarker {
                            base: "binary",
                            marker: ch as char,
                        });
                        break;
                    }
                    is_binary = true;
                }
                _ if is_hex && !ch.is_ascii_hexdigit() && ch.is_ascii_alphabetic() => {
                    self.report_before_cursor(LexError::BadBaseDigit(ch as char, "hexadecimal"));
                    break;
                }
                _ if is_octal && !(b'0'..=b'7').contains(&ch) && ch.is_ascii_alphabetic() => {
                    self.report_before_cursor(LexError::BadBaseDigit(ch as char, "octal"));
                    break;
                }
                _ if is_binary && !matches!(ch, b'0' | b'1') && ch.is_ascii_alphabetic() => {
                    self.report_before_cursor(LexError::BadBaseDigit(ch as char, "binary"));
                    break;
                }
                _ if !ch.is_ascii_digit() && !is_hex && !is_octal => break,
                _ => {}
            }

            literal.push(self.consume().to_ascii_lowercase() as char);
        }

        if is_int {
            let mut digits = literal.as_str();
            let mut base = 10;
            if is_hex {
                digits = &literal[2..];
                base = 16;
            } else if is_octal {
                if literal.as_bytes().get(1) == Some(&b'o') {
                    digits = &literal[2..];
                }
                base = 8;
            } else if is_binary {
                digits = &literal[2..];
                base = 2;
            }

            let signed = if is_negative {
                format!("-{}", digits)
            } else {
                digits.to_string()
            };
            let n = match i64::from_str_radix(&signed, base) {
                Ok(n) => n,
                Err(_) => {
                    diagnostics::error(LexError::IntConversion(signed));
                    (self.on_fatal)();
                    0
                }
            };
            Token::new(TokenKind::Int, Value::Int(n), loc)
        } else {
            let n = match literal.parse::<f64>() {
                Ok(n) => n,
                Err(_) => {
                    diagnostics::error(LexError::FloatConversion(literal));
                    (self.on_fatal)();
                    0.0
                }
            };
            let n = if is_negative { -n } else { n };
            Token::new(TokenKind::Float, Value::Float(n), loc)
        }
    }

    fn string(&mut self) -> Token {
        let quote = self.consume();
        let line = self.line;
        let col = self.col;
        let start = self.pos;
        let mut terminated = false;

        while !self.is_at_end() {
            let ch = self.peek();

            // Strings do not span lines
            if ch == b'\n' {
                break;
            }

            // The closing quote only counts when the previous character
            // is not a backslash
            if ch == quote && self.prev() != Some(b'\\') {
                self.consume();
                terminated = true;
                break;
            }

            self.consume();
        }

        if !terminated {
            let open = Loc::new(self.file.clone(), line, col.saturating_sub(1));
            diagnostics::lexer_error(
                &self.lines,
                &open,
                LexError::UnterminatedString,
                Underline::Span(self.col.saturating_sub(col)),
            );
            (self.on_fatal)();
        }

        let end = if terminated { self.pos - 1 } else { self.pos };
        let raw = String::from_utf8_lossy(&self.content[start..end]).into_owned();
        let literal = match decode_escapes(&raw) {
            Ok(s) => s,
            Err(e) => {
                let open = Loc::new(self.file.clone(), line, col.saturating_sub(1));
                diagnostics::lexer_error(
                    &self.lines,
                    &open,
                    LexError::BadString(e),
                    Underline::Span(self.col.saturating_sub(col)),
                );
                (self.on_fatal)();
                String::new()
            }
        };

        Token::new(
            TokenKind::Str,
            Value::Str(literal),
            Loc::new(self.file.clone(), line, col),
        )
    }

    fn identifier(&mut self) -> Token {
        let loc = self.loc();
        let start = self.pos;
        while !self.is_at_end() && is_identifier_byte(self.peek()) {
            self.consume();
        }
        let spelling = String::from_utf8_lossy(&self.content[start..self.pos]).into_owned();

        match spelling.as_str() {
            "true" => Token::new(TokenKind::Bool, Value::Bool(true), loc),
            "false" => Token::new(TokenKind::Bool, Value::Bool(false), loc),
            "nil" => Token::new(TokenKind::Nil, Value::Nil, loc),
            _ => match TokenKind::keyword(&spelling) {
                Some(kind) => Token::new(kind, Value::Word(spelling), loc),
                None => Token::new(TokenKind::Identifier, Value::Word(spelling), loc),
            },
        }
    }

    fn operator(&mut self) -> Option<Token> {
        let loc = self.loc();
        let (kind, len) = match (self.peek(), self.next()) {
            (b'*', Some(b'*')) => (TokenKind::Pow, 2),
            (b'<', Some(b'=')) => (TokenKind::LessEqual, 2),
            (b'>', Some(b'=')) => (TokenKind::GreaterEqual, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'<', _) => (TokenKind::Less, 1),
            (b'>', _) => (TokenKind::Greater, 1),
            _ => return None,
        };

        let mut spelling = String::new();
        for _ in 0..len {
            spelling.push(self.consume() as char);
        }
        Some(Token::new(kind, Value::Word(spelling), loc))
    }

    fn comment(&mut self) {
        self.consume();

        let multiline = !self.is_at_end() && self.peek() == b'[';
        while !self.is_at_end() {
            let ch = self.peek();
            if ch == b'\n' && !multiline {
                break;
            }
            if ch == b'#' && multiline {
                self.consume();
                break;
            }
            self.consume();
        }
    }

    fn report_before_cursor(&self, error: LexError) {
        let loc = Loc::new(self.file.clone(), self.line, self.col.saturating_sub(1).max(1));
        diagnostics::lexer_error(&self.lines, &loc, error, Underline::Caret);
        (self.on_fatal)();
    }

    fn loc(&self) -> Loc {
        Loc::new(self.file.clone(), self.line, self.col)
    }

    fn peek(&self) -> u8 {
        self.content[self.pos]
    }

    fn next(&self) -> Option<u8> {
        self.content.get(self.pos + 1).copied()
    }

    fn prev(&self) -> Option<u8> {
        if self.pos == 0 {
            None
        } else {
            Some(self.content[self.pos - 1])
        }
    }

    fn consume(&mut self) -> u8 {
        let ch = self.content[self.pos];
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.content.len()
    }
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\x0b')
}

fn is_identifier_byte(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn decode_escapes(raw: &str) -> Result<String, EscapeError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some(other) => return Err(EscapeError::InvalidEscape(other)),
            None => return Err(EscapeError::TrailingBackslash),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn tokens(source: &str) -> Vec<(TokenKind, Value)> {
        let mut tokenizer = Tokenizer::new(source, "test", Rc::new(|| {}));
        tokenizer
            .tokenize()
            .into_iter()
            .map(|t| (t.kind, t.literal))
            .collect()
    }

    fn word(w: &str) -> Value {
        Value::Word(w.to_string())
    }

    #[test]
    fn test_tokens() {
        let source = "1 2 + writeln";
        let expected = vec![
            (TokenKind::Int, Value::Int(1)),
            (TokenKind::Int, Value::Int(2)),
            (TokenKind::Plus, word("+")),
            (TokenKind::Writeln, word("writeln")),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens(source), expected);
    }

    #[test]
    fn test_number_bases() {
        let expected = vec![
            (TokenKind::Int, Value::Int(255)),
            (TokenKind::Int, Value::Int(15)),
            (TokenKind::Int, Value::Int(15)),
            (TokenKind::Int, Value::Int(5)),
            (TokenKind::Int, Value::Int(1000)),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("0xff 0o17 017 0b101 1_000"), expected);
    }

    #[test]
    fn test_signed_numbers() {
        let expected = vec![
            (TokenKind::Int, Value::Int(-5)),
            (TokenKind::Int, Value::Int(7)),
            (TokenKind::Float, Value::Float(-2.5)),
            (TokenKind::Int, Value::Int(-16)),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("-5 +7 -2.5 -0x10"), expected);
    }

    #[test]
    fn test_minus_before_space_is_an_operator() {
        let expected = vec![
            (TokenKind::Int, Value::Int(1)),
            (TokenKind::Int, Value::Int(2)),
            (TokenKind::Minus, word("-")),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("1 2 -"), expected);
    }

    #[test]
    fn test_floats() {
        let expected = vec![
            (TokenKind::Float, Value::Float(3.14)),
            (TokenKind::Float, Value::Float(0.5)),
            (TokenKind::Float, Value::Float(1.0)),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("3.14 .5 1.0"), expected);
    }

    #[test]
    fn test_two_char_operators() {
        let expected = vec![
            (TokenKind::Pow, word("**")),
            (TokenKind::LessEqual, word("<=")),
            (TokenKind::GreaterEqual, word(">=")),
            (TokenKind::Concat, word("..")),
            (TokenKind::Star, word("*")),
            (TokenKind::Less, word("<")),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("** <= >= .. * <"), expected);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let expected = vec![
            (TokenKind::Bool, Value::Bool(true)),
            (TokenKind::Bool, Value::Bool(false)),
            (TokenKind::Nil, Value::Nil),
            (TokenKind::Dup, word("dup")),
            (TokenKind::Identifier, word("counter")),
            (TokenKind::Identifier, word("_x1")),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("true false nil dup counter _x1"), expected);
    }

    #[test]
    fn test_strings() {
        let expected = vec![
            (TokenKind::Str, Value::Str("hello".to_string())),
            (TokenKind::Str, Value::Str("a 'b'".to_string())),
            (TokenKind::Str, Value::Str("tab\tnewline\n".to_string())),
            (TokenKind::Str, Value::Str("quote\"".to_string())),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(
            tokens(r#"'hello' "a 'b'" "tab\tnewline\n" "quote\"""#),
            expected
        );
    }

    #[test]
    fn test_comments() {
        let expected = vec![
            (TokenKind::Int, Value::Int(1)),
            (TokenKind::Int, Value::Int(2)),
            (TokenKind::Int, Value::Int(3)),
            (TokenKind::Eof, word("EOF")),
        ];
        assert_eq!(tokens("1 # one\n2 #[ spanning\nlines # 3"), expected);
    }

    #[test]
    fn test_locations() {
        let mut tokenizer = Tokenizer::new("1 2\n 'x'", "test", Rc::new(|| {}));
        let tokens = tokenizer.tokenize();
        let spans: Vec<(usize, usize)> = tokens.iter().map(|t| (t.loc.line, t.loc.col)).collect();
        // The string's span starts at its first content character
        assert_eq!(spans, vec![(1, 1), (1, 3), (2, 3), (2, 5)]);
    }

    #[test]
    fn test_unterminated_string_reports_once() {
        let fatals = Rc::new(Cell::new(0));
        let counter = fatals.clone();
        let mut tokenizer = Tokenizer::new("'oops", "test", Rc::new(move || {
            counter.set(counter.get() + 1);
        }));
        tokenizer.tokenize();
        assert_eq!(fatals.get(), 1);
    }

    #[test]
    fn test_double_decimal_point_recovers_with_zero() {
        let fatals = Rc::new(Cell::new(0));
        let counter = fatals.clone();
        let mut tokenizer = Tokenizer::new("1.2.3", "test", Rc::new(move || {
            counter.set(counter.get() + 1);
        }));
        let tokens = tokenizer.tokenize();
        assert_eq!(fatals.get(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Float);
    }

    #[test]
    fn test_escape_decoding() {
        assert_eq!(decode_escapes(r"a\nb").unwrap(), "a\nb");
        assert_eq!(decode_escapes(r"\'\\").unwrap(), "'\\");
        assert!(decode_escapes(r"\q").is_err());
        assert!(decode_escapes("\\").is_err());
    }
}
