//! Top-level interpreter state: the [`Lisp`] struct owns the symbol table
//! handle and the root environment, installs the builtins, and loads the
//! bundled prelude. This is the embedding surface: hosts construct a
//! `Lisp`, feed it source text, and optionally register native functions.

use std::rc::Rc;

use crate::ast::{Arity, NativeFn, Value};
use crate::builtinops;
use crate::env::Environment;
use crate::evaluator;
use crate::prelude::PRELUDE;
use crate::reader;
use crate::symbols::{CaseFold, SymbolTable};
use crate::Error;

pub struct Lisp {
    symbols: Rc<SymbolTable>,
    env: Environment,
}

impl Lisp {
    /// A fully set-up interpreter: builtins installed, prelude loaded.
    pub fn new() -> Lisp {
        Lisp::with_case(CaseFold::Upper)
    }

    pub fn with_case(case: CaseFold) -> Lisp {
        let mut lisp = Lisp::bare_with_case(case);
        // The prelude is embedded and known-good; a failure here is a
        // packaging bug, reported but not fatal.
        if let Err(e) = lisp.load(PRELUDE) {
            eprintln!("prelude: {e}");
        }
        lisp
    }

    /// Builtins only, no prelude. Used by tests that pin down core
    /// semantics without the library layer.
    pub fn bare() -> Lisp {
        Lisp::bare_with_case(CaseFold::Upper)
    }

    fn bare_with_case(case: CaseFold) -> Lisp {
        let symbols = SymbolTable::new(case);
        builtinops::install(&symbols);
        let env = Environment::new(symbols.clone());
        Lisp { symbols, env }
    }

    pub fn symbols(&self) -> &Rc<SymbolTable> {
        &self.symbols
    }

    pub fn env(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Read one expression from `source` and evaluate it.
    pub fn eval_str(&mut self, source: &str) -> Result<Value, Error> {
        let expr = reader::read_str(source, &self.symbols)?;
        evaluator::eval(&expr, &mut self.env)
    }

    pub fn eval_expr(&mut self, expr: &Value) -> Result<Value, Error> {
        evaluator::eval(expr, &mut self.env)
    }

    /// Evaluate every top-level form in `source`, stopping at the first
    /// error. Forms already evaluated keep their effects; the environment
    /// stays usable after a failure. Returns the last form's value.
    pub fn load(&mut self, source: &str) -> Result<Value, Error> {
        let forms = reader::read_many(source, &self.symbols)?;
        let mut last = self.symbols.nil();
        for form in &forms {
            last = evaluator::eval(form, &mut self.env)?;
        }
        Ok(last)
    }

    /// Register a host function in the global function namespace.
    pub fn define(&self, name: &str, arity: Arity, special: bool, fun: NativeFn) {
        builtinops::define(&self.symbols, name, arity, special, fun);
    }
}

impl Default for Lisp {
    fn default() -> Self {
        Lisp::new()
    }
}
