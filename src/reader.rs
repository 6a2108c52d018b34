//! The s-expression reader: a nom-based parser from source text to
//! [`Value`] trees. Symbols are interned through the shared table while
//! parsing, so two occurrences of a name in one source read as the same
//! symbol cell.
//!
//! Surface syntax: integers (with sign), strings with escape sequences,
//! symbols, lists with dotted tails, `;` line comments, and the reader
//! shorthands `'x` → `(quote x)`, `` `x `` → `(backquote x)`, `,x` →
//! `(unquote x)`, `,@x` → `(unquote-splicing x)`, `#x` and `#'x` →
//! `(function x)`.

use nom::{
    character::complete::char,
    error::ErrorKind,
    IResult, Parser,
};

use crate::ast::{NumberType, Value};
use crate::symbols::{Symbol, SymbolTable};
use crate::{Error, MAX_PARSE_DEPTH};

/// Characters allowed in symbols besides alphanumerics. `.` is excluded;
/// it marks dotted tails.
const SYMBOL_SPECIAL_CHARS: &str = "+-*/%<>=!?&_$^~";

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Read one expression from `input`; trailing whitespace and comments are
/// allowed, anything else is an error.
pub fn read_str(input: &str, symbols: &SymbolTable) -> Result<Value, Error> {
    match parse_expr(input, symbols, 0) {
        Ok((rest, value)) => {
            let rest = skip_ws(rest);
            if rest.is_empty() {
                Ok(value)
            } else {
                Err(Error::Parse(format!(
                    "unexpected remaining input: '{rest}'"
                )))
            }
        }
        Err(e) => Err(Error::Parse(parse_error_to_message(input, e))),
    }
}

/// Read every top-level form from `input`.
pub fn read_many(input: &str, symbols: &SymbolTable) -> Result<Vec<Value>, Error> {
    let mut forms = Vec::new();
    let mut rest = skip_ws(input);
    while !rest.is_empty() {
        match parse_expr(rest, symbols, 0) {
            Ok((next, form)) => {
                forms.push(form);
                rest = skip_ws(next);
            }
            Err(e) => return Err(Error::Parse(parse_error_to_message(input, e))),
        }
    }
    Ok(forms)
}

/// Convert nom parsing errors to user-friendly messages with positions.
fn parse_error_to_message(input: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::Char => format!("expected character at position {position}"),
                ErrorKind::TooLarge => {
                    format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})")
                }
                _ => {
                    if position < input.len() {
                        let near: String = input.chars().skip(position).take(10).collect();
                        format!("invalid syntax near '{near}'")
                    } else {
                        "unexpected end of input".to_string()
                    }
                }
            }
        }
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
    }
}

/// Skip whitespace and `;` comments.
fn skip_ws(input: &str) -> &str {
    let mut rest = input;
    loop {
        let trimmed = rest.trim_start();
        match trimmed.strip_prefix(';') {
            Some(comment) => match comment.find('\n') {
                Some(idx) => rest = &comment[idx + 1..],
                None => return "",
            },
            None => return trimmed,
        }
    }
}

fn shorthand(marker: Symbol, expr: Value, symbols: &SymbolTable) -> Value {
    Value::pair(Value::Symbol(marker), Value::pair(expr, symbols.nil()))
}

fn parse_expr<'a>(
    input: &'a str,
    symbols: &SymbolTable,
    depth: usize,
) -> IResult<&'a str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    let input = skip_ws(input);
    if let Some(rest) = input.strip_prefix(",@") {
        let (rest, expr) = parse_expr(rest, symbols, depth + 1)?;
        return Ok((rest, shorthand(symbols.unquote_splicing(), expr, symbols)));
    }
    match input.chars().next() {
        Some('\'') => {
            let (rest, expr) = parse_expr(&input[1..], symbols, depth + 1)?;
            Ok((rest, shorthand(symbols.quote(), expr, symbols)))
        }
        Some('`') => {
            let (rest, expr) = parse_expr(&input[1..], symbols, depth + 1)?;
            Ok((rest, shorthand(symbols.backquote(), expr, symbols)))
        }
        Some(',') => {
            let (rest, expr) = parse_expr(&input[1..], symbols, depth + 1)?;
            Ok((rest, shorthand(symbols.unquote(), expr, symbols)))
        }
        Some('#') => {
            // #f and #'f both read as (function f).
            let after = input[1..].strip_prefix('\'').unwrap_or(&input[1..]);
            let (rest, expr) = parse_expr(after, symbols, depth + 1)?;
            Ok((rest, shorthand(symbols.function_symbol(), expr, symbols)))
        }
        Some('(') => parse_list(input, symbols, depth),
        Some('"') => parse_string(input),
        _ => parse_atom(input, symbols),
    }
}

/// True when the input starts a dotted-tail marker: a lone `.` followed by
/// a delimiter.
fn at_dot(input: &str) -> bool {
    let mut chars = input.chars();
    chars.next() == Some('.')
        && chars
            .next()
            .map_or(true, |c| c.is_whitespace() || "()\"';".contains(c))
}

fn parse_list<'a>(
    input: &'a str,
    symbols: &SymbolTable,
    depth: usize,
) -> IResult<&'a str, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut items: Vec<Value> = Vec::new();
    let mut tail = symbols.nil();
    loop {
        input = skip_ws(input);
        if let Some(rest) = input.strip_prefix(')') {
            input = rest;
            break;
        }
        if at_dot(input) && !items.is_empty() {
            let (rest, t) = parse_expr(&input[1..], symbols, depth + 1)?;
            let rest = skip_ws(rest);
            let (rest, _) = char(')').parse(rest)?;
            tail = t;
            input = rest;
            break;
        }
        let (rest, item) = parse_expr(input, symbols, depth + 1)?;
        items.push(item);
        input = rest;
    }
    let mut out = tail;
    for item in items.into_iter().rev() {
        out = Value::pair(item, out);
    }
    Ok((input, out))
}

fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();
    loop {
        let mut iter = remaining.chars();
        match iter.next() {
            Some('"') => {
                return Ok((iter.as_str(), Value::Str(chars.into())));
            }
            Some('\\') => {
                match iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    _ => {
                        // Unknown or incomplete escape sequence
                        return Err(nom::Err::Error(nom::error::Error::new(
                            remaining,
                            ErrorKind::Char,
                        )));
                    }
                }
                remaining = iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = iter.as_str();
            }
            None => {
                // Unterminated string
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

/// Parse a number or a symbol. A token that starts like a number must be a
/// valid number: `123abc` is a parse error, not a symbol.
fn parse_atom<'a>(input: &'a str, symbols: &SymbolTable) -> IResult<&'a str, Value> {
    let end = input
        .char_indices()
        .find(|(_, c)| !is_symbol_char(*c))
        .map_or(input.len(), |(i, _)| i);
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Alpha,
        )));
    }
    let token = &input[..end];
    let rest = &input[end..];

    let mut chars = token.chars();
    let first = chars.next().unwrap_or(' ');
    let looks_numeric = first.is_ascii_digit()
        || (first == '-' && chars.next().is_some_and(|c| c.is_ascii_digit()));
    if looks_numeric {
        match token.parse::<NumberType>() {
            Ok(n) => Ok((rest, Value::Number(n))),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                input,
                ErrorKind::Digit,
            ))),
        }
    } else {
        Ok((rest, Value::Symbol(symbols.intern(token))))
    }
}
