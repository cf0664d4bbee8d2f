//! Reading linear contributions back out of driver text written without a ledger.

use thiserror::Error;

use crate::ast::{in_exponent, split_wrapper};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoverError {
    #[error("cannot read coefficient '{coefficient}' in term '{term}'")]
    Coefficient { term: String, coefficient: String },
    #[error("term '{0}' is not of the form factor*var")]
    Shape(String),
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split on `+`/`-` at parenthesis depth zero, keeping each term's sign.
/// Signs inside exponent literals (`1e-05`) stay with their number.
fn split_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut prev: Option<char> = None;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '+' | '-' if depth == 0 && !in_exponent(&current) => {
                let binary = matches!(prev, Some(p) if p != '*' && p != '/');
                if binary && !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
                if c == '+' {
                    prev = Some(c);
                    continue;
                }
            }
            _ => {}
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

fn parse_term(term: &str) -> Result<(String, f64), RecoverError> {
    let (sign, body) = match term.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, term),
    };
    match body.split_once('*') {
        Some((coefficient, var)) => {
            if !is_identifier(var) {
                return Err(RecoverError::Shape(term.to_string()));
            }
            let factor: f64 = coefficient
                .parse()
                .map_err(|_| RecoverError::Coefficient {
                    term: term.to_string(),
                    coefficient: coefficient.to_string(),
                })?;
            Ok((var.to_string(), sign * factor))
        }
        None if is_identifier(body) => Ok((body.to_string(), sign)),
        None => Err(RecoverError::Shape(term.to_string())),
    }
}

/// Parse `factor*var ± factor*var ...`, optionally inside one multiplier
/// wrapper `M*(...)`. Each term parses independently so one unreadable term
/// does not lose the others.
pub fn parse_linear(text: &str) -> Vec<Result<(String, f64), RecoverError>> {
    let text = text.trim();
    let body = split_wrapper(text).map(|(_, inner)| inner).unwrap_or(text);
    split_terms(body).iter().map(|t| parse_term(t)).collect()
}
