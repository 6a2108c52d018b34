//! Lispet - a small dynamically-typed Lisp runtime
//!
//! This crate reads s-expressions, evaluates them against a lexically-scoped
//! environment, and supports closures, macros, self tail recursion and
//! user-level exception handling (catch/throw).
//!
//! ```scheme
//! (defun fact (n) (if (eq n 0) 1 (* n (fact (- n 1)))))
//! (fact 10)                    ; 3628800
//! (defmacro twice (x) (list '+ x x))
//! (twice 21)                   ; 42
//! (catch 'tag (throw 'tag 99)) ; 99
//! ```
//!
//! ## Value model
//!
//! Every runtime value is one of five variants: number, interned symbol,
//! string, mutable pair cell, or function. The symbol `NIL` doubles as the
//! empty list and as false; anything non-NIL is truthy. Symbols carry two
//! separate global slots, one for values and one for functions, so a name
//! can simultaneously be a variable and name a function.
//!
//! ## Modules
//!
//! - `ast`: the value model (numbers, symbols, strings, pairs, functions)
//! - `symbols`: global symbol interning and per-symbol global slots
//! - `env`: lexical binding frames with closure capture
//! - `evaluator`: the call protocol, special forms, tail-call loop
//! - `builtinops`: built-in operation registry and registration API
//! - `reader`: nom-based s-expression parser
//! - `interp`: top-level interpreter state and prelude loading

use std::fmt;

/// Maximum nesting depth accepted by the reader.
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum evaluation depth. Deep non-tail recursion hits this limit and is
/// reported as an error instead of overflowing the host stack; the self
/// tail-call loop in the evaluator does not consume depth, so tail-recursive
/// loops of arbitrary length stay under it. One depth unit costs several
/// host stack frames, so the limit must be small enough that the worst case
/// still fits a default test-thread stack (2 MiB).
pub const MAX_EVAL_DEPTH: usize = 400;

/// Error types for the interpreter
#[derive(Debug, Clone)]
pub enum Error {
    /// Reader failure, with position context where available
    Parse(String),
    /// Symbol has no lexical binding and no global value slot
    Unbound(String),
    /// Symbol has no local function binding and no global function slot
    UnboundFunction(String),
    /// Operation applied to a value of the wrong variant
    Type(String),
    /// Argument count outside the callee's arity spec
    Param(String),
    /// Malformed special-form operand shape
    Syntax(String),
    /// General evaluation failure (depth exceeded, user `error` calls, ...)
    Eval(String),
    /// User-level signal raised by `throw`; intercepted by a matching
    /// `catch`, otherwise reported at top level like any other error
    Throw {
        tag: crate::symbols::Symbol,
        value: crate::ast::Value,
    },
}

impl Error {
    /// Arity failure naming the function and its declared range
    pub fn param(name: &str, expected: &str, got: usize) -> Self {
        Error::Param(format!("{name} expecting {expected} args, got {got}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "Parse error: {msg}"),
            Error::Unbound(name) => write!(f, "Unbound variable: {name}"),
            Error::UnboundFunction(name) => write!(f, "Unbound function: {name}"),
            Error::Type(msg) => write!(f, "Type error: {msg}"),
            Error::Param(msg) => write!(f, "Parameter error: {msg}"),
            Error::Syntax(msg) => write!(f, "Syntax error: {msg}"),
            Error::Eval(msg) => write!(f, "Evaluation error: {msg}"),
            Error::Throw { tag, value } => {
                write!(f, "Uncaught throw: tag {} value {}", tag.name(), value)
            }
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod env;
pub mod evaluator;
pub mod interp;
pub mod prelude;
pub mod reader;
pub mod symbols;

pub use ast::Value;
pub use env::Environment;
pub use evaluator::eval;
pub use interp::Lisp;
pub use reader::{read_many, read_str};
pub use symbols::{CaseFold, Symbol, SymbolTable};
