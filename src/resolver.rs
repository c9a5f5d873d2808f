use rustc_hash::FxHashMap;

use crate::diagnostics::{self, OnFatal};
use crate::token::{Token, TokenKind, Value};

#[derive(Debug, thiserror::Error)]
enum ResolveError {
    #[error("'{0}' must follow an 'if ... do' or 'elif ... do' block.")]
    BranchOutsideIf(String),
    #[error("Invalid '{0}' usage. Expected 'if ... do' or 'elif ... do'.")]
    BranchWithoutDo(String),
    #[error("Expected identifier after 'define' keyword, but got '{0}'.")]
    DefineWithoutName(String),
    #[error("Invalid 'end' usage. No matching block found.")]
    StrayEnd,
    #[error("Invalid 'end' usage. No matching 'for .. do' block found.")]
    EndWithoutForDo,
    #[error("Invalid 'end' usage. No matching 'define' block found.")]
    EndWithoutDefine,
    #[error("Mismatched 'end' block. Expected to close 'define', but found '{0}'.")]
    MismatchedDefineEnd(String),
    #[error("Unbalanced 'end'. No matching 'if' block found.")]
    UnbalancedEnd,
    #[error("Unclosed '{0}' block.")]
    UnclosedBlock(String),
    #[error("Unmatched '{0}'. No enclosing block.")]
    UnmatchedBranch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    For,
    Define,
}

#[derive(Debug, Clone, Copy)]
struct FlowAddr {
    idx: usize,
    kind: TokenKind,
}

pub struct Resolver<'a> {
    tokens: &'a mut Vec<Token>,
    lines: &'a [String],
    on_fatal: OnFatal,
    had_error: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(tokens: &'a mut Vec<Token>, lines: &'a [String], on_fatal: OnFatal) -> Self {
        Self {
            tokens,
            lines,
            on_fatal,
            had_error: false,
        }
    }

    pub fn had_error(&self) -> bool {
        self.had_error
    }

    // Pairs every block keyword with its closer, patching jump slots in
    // place, and collects `define` bodies on the side. The evaluator never
    // has to scan for a matching `end` at runtime.
    pub fn resolve(&mut self) -> FxHashMap<String, Vec<Token>> {
        let mut addrs: Vec<FlowAddr> = Vec::new();
        let mut blocks: Vec<BlockKind> = Vec::new();
        let mut defs: FxHashMap<String, Vec<Token>> = FxHashMap::default();
        let mut open_defs: Vec<String> = Vec::new();

        let mut idx = 0;
        while idx < self.tokens.len() && self.tokens[idx].kind != TokenKind::Eof {
            let kind = self.tokens[idx].kind;

            match kind {
                TokenKind::If => {
                    blocks.push(BlockKind::If);
                    addrs.push(FlowAddr { idx, kind });
                }
                TokenKind::For => {
                    blocks.push(BlockKind::For);
                    addrs.push(FlowAddr { idx, kind });
                }
                TokenKind::Do => {
                    addrs.push(FlowAddr { idx, kind });
                }
                TokenKind::Elif | TokenKind::Else => {
                    if blocks.last() != Some(&BlockKind::If) {
                        self.report(idx, ResolveError::BranchOutsideIf(self.spelling(idx)));
                        idx += 1;
                        continue;
                    }

                    match addrs.pop() {
                        Some(top) if top.kind == TokenKind::Do => {
                            // The previous branch's condition falls through here
                            self.tokens[top.idx].jump_to = idx + 1;
                            addrs.push(FlowAddr { idx, kind });
                        }
                        _ => {
                            self.report(idx, ResolveError::BranchWithoutDo(self.spelling(idx)));
                            idx += 1;
                            continue;
                        }
                    }
                }
                TokenKind::Define => {
                    blocks.push(BlockKind::Define);
                    addrs.push(FlowAddr { idx, kind });

                    let name = match self.tokens.get(idx + 1) {
                        Some(t) if t.kind == TokenKind::Identifier => match &t.literal {
                            Value::Word(w) => w.clone(),
                            other => other.to_string(),
                        },
                        other => {
                            let found = other
                                .map(|t| t.kind.name().to_lowercase())
                                .unwrap_or_else(|| "eof".to_string());
                            self.report(idx, ResolveError::DefineWithoutName(found));
                            idx += 1;
                            continue;
                        }
                    };

                    defs.insert(name.clone(), Vec::new());
                    open_defs.push(name);
                    idx += 2;
                    continue;
                }
                TokenKind::End => {
                    let Some(current) = blocks.pop() else {
                        self.report(idx, ResolveError::StrayEnd);
                        idx += 1;
                        continue;
                    };

                    match current {
                        BlockKind::For => {
                            let do_flow = addrs.last().copied();
                            let for_flow = addrs.len().checked_sub(2).map(|i| addrs[i]);
                            match (for_flow, do_flow) {
                                (Some(for_flow), Some(do_flow))
                                    if for_flow.kind == TokenKind::For
                                        && do_flow.kind == TokenKind::Do =>
                                {
                                    // The loop jumps back, the condition jumps out
                                    self.tokens[idx].jump_to = for_flow.idx;
                                    self.tokens[do_flow.idx].jump_to = idx + 1;
                                    addrs.truncate(addrs.len() - 2);
                                }
                                _ => {
                                    self.report(idx, ResolveError::EndWithoutForDo);
                                    idx += 1;
                                    continue;
                                }
                            }
                        }
                        BlockKind::Define => match addrs.pop() {
                            Some(flow) if flow.kind == TokenKind::Define => {
                                self.tokens[flow.idx].jump_to = idx + 1;
                                open_defs.pop();
                            }
                            Some(flow) => {
                                self.report(
                                    idx,
                                    ResolveError::MismatchedDefineEnd(self.spelling(flow.idx)),
                                );
                                idx += 1;
                                continue;
                            }
                            None => {
                                self.report(idx, ResolveError::EndWithoutDefine);
                                idx += 1;
                                continue;
                            }
                        },
                        BlockKind::If => loop {
                            let Some(top) = addrs.pop() else {
                                self.report(idx, ResolveError::UnbalancedEnd);
                                break;
                            };
                            if top.kind == TokenKind::If {
                                break;
                            }
                            self.tokens[top.idx].jump_to = idx + 1;
                        },
                    }
                }
                _ => {
                    // Inside an open definition the body is collected on the
                    // side; the tokens also stay in the stream and the
                    // evaluator jumps over them
                    if blocks.last() == Some(&BlockKind::Define) {
                        match open_defs.last() {
                            Some(name) => {
                                let token = self.tokens[idx].clone();
                                if let Some(body) = defs.get_mut(name) {
                                    body.push(token);
                                }
                            }
                            None => {
                                let found = self.tokens[idx].kind.name().to_lowercase();
                                self.report(idx, ResolveError::DefineWithoutName(found));
                            }
                        }
                    }
                }
            }

            idx += 1;
        }

        let has_open_block = addrs
            .iter()
            .any(|f| matches!(f.kind, TokenKind::If | TokenKind::For | TokenKind::Define));
        for flow in addrs {
            match flow.kind {
                TokenKind::If | TokenKind::For | TokenKind::Define => {
                    self.report(flow.idx, ResolveError::UnclosedBlock(self.spelling(flow.idx)));
                }
                _ if !has_open_block => {
                    self.report(flow.idx, ResolveError::UnmatchedBranch(self.spelling(flow.idx)));
                }
                _ => {}
            }
        }

        defs
    }

    fn spelling(&self, idx: usize) -> String {
        self.tokens[idx].literal.to_string()
    }

    fn report(&mut self, idx: usize, error: ResolveError) {
        self.had_error = true;
        diagnostics::syntax_error(&self.tokens[idx], &error, self.lines);
        (self.on_fatal)();
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::tokenizer::Tokenizer;

    fn resolve(source: &str) -> (Vec<Token>, FxHashMap<String, Vec<Token>>, usize) {
        let fatals = Rc::new(Cell::new(0));
        let counter = fatals.clone();
        let on_fatal: OnFatal = Rc::new(move || counter.set(counter.get() + 1));

        let mut tokenizer = Tokenizer::new(source, "test", on_fatal.clone());
        let mut tokens = tokenizer.tokenize();
        let lines = tokenizer.into_lines();

        let mut resolver = Resolver::new(&mut tokens, &lines, on_fatal);
        let defs = resolver.resolve();
        (tokens, defs, fatals.get())
    }

    fn jumps(tokens: &[Token]) -> Vec<(usize, TokenKind, usize)> {
        tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.jump_to != 0)
            .map(|(i, t)| (i, t.kind, t.jump_to))
            .collect()
    }

    #[test]
    fn test_if_else_jumps() {
        // if(0) 1(1) 2(2) <(3) do(4) "y"(5) writeln(6) else(7) "n"(8) writeln(9) end(10)
        let (tokens, _, fatals) = resolve(r#"if 1 2 < do "y" writeln else "n" writeln end"#);
        assert_eq!(fatals, 0);
        assert_eq!(
            jumps(&tokens),
            vec![(4, TokenKind::Do, 8), (7, TokenKind::Else, 11)]
        );
    }

    #[test]
    fn test_elif_chain_jumps() {
        // if(0) 1(1) do(2) 2(3) elif(4) 3(5) do(6) 4(7) else(8) 5(9) end(10)
        let (tokens, _, fatals) = resolve("if 1 do 2 elif 3 do 4 else 5 end");
        assert_eq!(fatals, 0);
        assert_eq!(
            jumps(&tokens),
            vec![
                (2, TokenKind::Do, 5),
                (4, TokenKind::Elif, 11),
                (6, TokenKind::Do, 9),
                (8, TokenKind::Else, 11),
            ]
        );
    }

    #[test]
    fn test_for_loop_jumps_backwards() {
        // 0(0) for(1) dup(2) 3(3) <(4) do(5) 1(6) +(7) end(8)
        let (tokens, _, fatals) = resolve("0 for dup 3 < do 1 + end");
        assert_eq!(fatals, 0);
        assert_eq!(
            jumps(&tokens),
            vec![(5, TokenKind::Do, 9), (8, TokenKind::End, 1)]
        );
        // Forward jumps everywhere except the loop's end
        for (idx, kind, target) in jumps(&tokens) {
            if kind == TokenKind::End {
                assert!(target < idx);
            } else {
                assert!(target > idx);
            }
        }
    }

    #[test]
    fn test_define_collects_body_and_skips_it() {
        // define(0) sq(1) dup(2) *(3) end(4) 5(5) sq(6)
        let (tokens, defs, fatals) = resolve("define sq dup * end 5 sq");
        assert_eq!(fatals, 0);
        assert_eq!(jumps(&tokens), vec![(0, TokenKind::Define, 5)]);

        let body = &defs["sq"];
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].kind, TokenKind::Dup);
        assert_eq!(body[1].kind, TokenKind::Star);
    }

    #[test]
    fn test_nested_if_inside_for() {
        // 0(0) for(1) dup(2) do(3) if(4) 1(5) do(6) 2(7) pop(8) end(9) 1(10) +(11) end(12)
        let (tokens, _, fatals) = resolve("0 for dup do if 1 do 2 pop end 1 + end");
        assert_eq!(fatals, 0);
        assert_eq!(
            jumps(&tokens),
            vec![
                (3, TokenKind::Do, 13),
                (6, TokenKind::Do, 10),
                (12, TokenKind::End, 1),
            ]
        );
    }

    #[test]
    fn test_stray_else_is_an_error() {
        let (_, _, fatals) = resolve("1 else 2");
        assert_eq!(fatals, 1);
    }

    #[test]
    fn test_stray_end_is_an_error() {
        let (_, _, fatals) = resolve("end");
        assert_eq!(fatals, 1);
    }

    #[test]
    fn test_define_without_identifier_is_an_error() {
        let (_, _, fatals) = resolve("define 5 end");
        assert!(fatals >= 1);
    }

    #[test]
    fn test_one_diagnostic_per_open_construct() {
        let (_, _, fatals) = resolve("if 1 do for 2 do");
        assert_eq!(fatals, 2);
    }

    #[test]
    fn test_unmatched_do_is_an_error() {
        let (_, _, fatals) = resolve("1 do");
        assert_eq!(fatals, 1);
    }

    #[test]
    fn test_mismatched_end_kind_is_an_error() {
        let (_, _, fatals) = resolve("define f end if 1 do end");
        assert_eq!(fatals, 0);

        // `end` closes the define block but the address stack's top entry
        // is the stray do inside the body
        let (_, _, fatals) = resolve("define f 1 do end");
        assert!(fatals >= 1);
    }
}
