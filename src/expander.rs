use rustc_hash::FxHashMap;

use crate::token::{Token, TokenKind, Value};

// Mutually recursive definitions never settle; the pass count bounds them.
const MAX_PASSES: usize = 20;

pub fn expand_definitions(defs: &mut FxHashMap<String, Vec<Token>>) {
    for _ in 0..MAX_PASSES {
        let mut changed = false;

        let keys: Vec<String> = defs.keys().cloned().collect();
        for key in keys {
            let body = defs[&key].clone();
            let mut expanded = Vec::with_capacity(body.len());

            for token in body {
                if token.kind == TokenKind::Identifier {
                    if let Value::Word(name) = &token.literal {
                        if let Some(inner) = defs.get(name) {
                            expanded.extend(inner.iter().cloned());
                            changed = true;
                            continue;
                        }
                    }
                }
                expanded.push(token);
            }

            defs.insert(key, expanded);
        }

        if !changed {
            break;
        }
    }
}

pub fn expand_program(tokens: Vec<Token>, defs: &FxHashMap<String, Vec<Token>>) -> Vec<Token> {
    let mut expanded = Vec::with_capacity(tokens.len());

    let mut idx = 0;
    while idx < tokens.len() {
        let token = &tokens[idx];

        // A define region is carried over verbatim; call sites get the
        // collected body instead, so definition order does not matter
        if token.kind == TokenKind::Define {
            let mut end = token.jump_to;
            if end == 0 || end > tokens.len() {
                let mut depth = 1;
                let mut j = idx + 1;
                while j < tokens.len() && depth > 0 {
                    match tokens[j].kind {
                        TokenKind::Define => depth += 1,
                        TokenKind::End => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                end = j;
            }
            expanded.extend(tokens[idx..end].iter().cloned());
            idx = end;
            continue;
        }

        if token.kind == TokenKind::Identifier {
            if let Value::Word(name) = &token.literal {
                if let Some(body) = defs.get(name) {
                    for t in body {
                        let mut clone = t.clone();
                        if clone.loc.file.is_empty() {
                            // Diagnostics point at the call site
                            clone.loc = token.loc.clone();
                        }
                        expanded.push(clone);
                    }
                    idx += 1;
                    continue;
                }
            }
        }

        expanded.push(token.clone());
        idx += 1;
    }

    expanded
}
