use std::fmt::Display;
use std::rc::Rc;

use crate::span::Loc;
use crate::token::Token;

pub type OnFatal = Rc<dyn Fn()>;

pub fn exit_on_fatal() -> OnFatal {
    Rc::new(|| std::process::exit(1))
}

pub fn continue_on_fatal() -> OnFatal {
    Rc::new(|| {})
}

pub enum Underline {
    Caret,
    Span(usize),
}

pub fn error(message: impl Display) {
    eprintln!("Error: {}", message);
}

pub fn lexer_error(lines: &[String], loc: &Loc, message: impl Display, underline: Underline) {
    eprintln!("LexerError: {}", message);
    eprintln!();
    point_at(lines, loc, underline);
}

pub fn syntax_error(token: &Token, message: impl Display, lines: &[String]) {
    eprintln!("SyntaxError: {}", message);
    eprintln!();
    let tail = token.literal.to_string().len().saturating_sub(1);
    point_at(lines, &token.loc, Underline::Span(tail));
}

fn point_at(lines: &[String], loc: &Loc, underline: Underline) {
    let Some(line) = lines.get(loc.line.saturating_sub(1)) else {
        return;
    };

    let prefix = format!("{}: ", loc);
    eprintln!("{}{}", prefix, line);

    let tail = match underline {
        Underline::Caret => 0,
        Underline::Span(n) => n,
    };
    let pad = " ".repeat(prefix.len() + loc.col.saturating_sub(1));
    eprintln!("{}^{}", pad, "~".repeat(tail));
}
