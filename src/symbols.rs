//! Global symbol interning.
//!
//! Every symbol name maps to exactly one [`Symbol`] for the lifetime of the
//! table; symbols are never removed. A symbol owns two independent global
//! slots, one for its value and one for its function, so the same name can
//! be a variable and name a function at the same time. Identity comparison
//! is pointer comparison on the shared cell, which is what makes
//! `(eq 'foo 'foo)` true for two separately-read occurrences of a name.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::Value;

/// Case-normalization policy applied to every interned name, chosen once at
/// table construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFold {
    Upper,
    Lower,
}

impl CaseFold {
    fn apply(self, name: &str) -> String {
        match self {
            CaseFold::Upper => name.to_uppercase(),
            CaseFold::Lower => name.to_lowercase(),
        }
    }
}

/// The unique interned cell behind a symbol: its normalized name plus the
/// two global namespace slots.
pub struct SymbolCell {
    name: Box<str>,
    nil: bool,
    value: RefCell<Option<Value>>,
    function: RefCell<Option<Value>>,
}

/// Cheap clonable handle to an interned symbol cell.
#[derive(Clone)]
pub struct Symbol(Rc<SymbolCell>);

impl Symbol {
    fn fresh(name: String, nil: bool) -> Symbol {
        Symbol(Rc::new(SymbolCell {
            name: name.into_boxed_str(),
            nil,
            value: RefCell::new(None),
            function: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// True only for the distinguished `NIL` symbol.
    pub fn is_nil(&self) -> bool {
        self.0.nil
    }

    pub fn global_value(&self) -> Option<Value> {
        self.0.value.borrow().clone()
    }

    pub fn set_global_value(&self, value: Value) {
        *self.0.value.borrow_mut() = Some(value);
    }

    pub fn global_function(&self) -> Option<Value> {
        self.0.function.borrow().clone()
    }

    pub fn set_global_function(&self, value: Value) {
        *self.0.function.borrow_mut() = Some(value);
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

// Debug prints the name only: the slot contents may cycle back through
// environments and must not be walked here.
impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

/// Process-wide interning of names to symbol cells. Held behind an `Rc`
/// handle shared by the reader, the evaluator and every environment; no
/// hidden global state.
pub struct SymbolTable {
    map: RefCell<FxHashMap<Box<str>, Symbol>>,
    case: CaseFold,
    gensym_counter: Cell<u64>,
    nil: Symbol,
    t: Symbol,
    quote: Symbol,
    backquote: Symbol,
    unquote: Symbol,
    unquote_splicing: Symbol,
    function: Symbol,
    optional: Symbol,
    rest: Symbol,
}

impl SymbolTable {
    pub fn new(case: CaseFold) -> Rc<SymbolTable> {
        let mut map = FxHashMap::default();
        let mut premade = |name: &str, nil: bool| {
            let name = case.apply(name);
            let sym = Symbol::fresh(name.clone(), nil);
            map.insert(name.into_boxed_str(), sym.clone());
            sym
        };

        let nil = premade("nil", true);
        let t = premade("t", false);
        let quote = premade("quote", false);
        let backquote = premade("backquote", false);
        let unquote = premade("unquote", false);
        let unquote_splicing = premade("unquote-splicing", false);
        let function = premade("function", false);
        let optional = premade("&optional", false);
        let rest = premade("&rest", false);
        drop(premade);

        let table = SymbolTable {
            map: RefCell::new(map),
            case,
            gensym_counter: Cell::new(0),
            nil,
            t,
            quote,
            backquote,
            unquote,
            unquote_splicing,
            function,
            optional,
            rest,
        };

        // NIL and T evaluate to themselves through their global value slots.
        table.nil.set_global_value(Value::Symbol(table.nil.clone()));
        table.t.set_global_value(Value::Symbol(table.t.clone()));
        Rc::new(table)
    }

    /// Case-normalize `name` and return its unique symbol, creating the
    /// cell on first reference.
    pub fn intern(&self, name: &str) -> Symbol {
        let normalized = self.case.apply(name);
        if let Some(sym) = self.map.borrow().get(normalized.as_str()) {
            return sym.clone();
        }
        let sym = Symbol::fresh(normalized.clone(), false);
        self.map
            .borrow_mut()
            .insert(normalized.into_boxed_str(), sym.clone());
        sym
    }

    /// Mint a fresh symbol that is distinct from every interned symbol and
    /// from every previous gensym. The name is informational only; identity
    /// is the cell itself.
    pub fn gensym(&self) -> Symbol {
        let n = self.gensym_counter.get() + 1;
        self.gensym_counter.set(n);
        Symbol::fresh(format!("#:G{n}"), false)
    }

    pub fn case(&self) -> CaseFold {
        self.case
    }

    pub fn nil_symbol(&self) -> Symbol {
        self.nil.clone()
    }

    pub fn nil(&self) -> Value {
        Value::Symbol(self.nil.clone())
    }

    pub fn t(&self) -> Value {
        Value::Symbol(self.t.clone())
    }

    /// Map a host boolean to the canonical truth values.
    pub fn bool(&self, b: bool) -> Value {
        if b {
            self.t()
        } else {
            self.nil()
        }
    }

    pub fn quote(&self) -> Symbol {
        self.quote.clone()
    }

    pub fn backquote(&self) -> Symbol {
        self.backquote.clone()
    }

    pub fn unquote(&self) -> Symbol {
        self.unquote.clone()
    }

    pub fn unquote_splicing(&self) -> Symbol {
        self.unquote_splicing.clone()
    }

    pub fn function_symbol(&self) -> Symbol {
        self.function.clone()
    }

    pub fn optional_marker(&self) -> Symbol {
        self.optional.clone()
    }

    pub fn rest_marker(&self) -> Symbol {
        self.rest.clone()
    }

    /// All interned symbols, sorted by name. Used by the REPL's
    /// introspection helpers.
    pub fn all(&self) -> Vec<Symbol> {
        let mut syms: Vec<Symbol> = self.map.borrow().values().cloned().collect();
        syms.sort_by(|a, b| a.name().cmp(b.name()));
        syms
    }
}
