//! Lexical environments as persistent linked frames.
//!
//! An [`Environment`] is a pair of frame chains, one for variable bindings
//! and a mirrored one for local function bindings (`flet`), plus a shared
//! root context. Frames are `Rc`-linked, so [`Environment::copy`] is O(1)
//! and a captured copy keeps every frame below it alive after the evaluator
//! pops them. This is the closure capture mechanism: a closure sees later
//! `setq` mutations of captured bindings because the frames themselves are
//! shared, not snapshotted.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{Pair, Value};
use crate::symbols::{Symbol, SymbolTable};

/// One binding frame. `bindings` is interior-mutable so `setq` can update
/// a captured frame through shared handles.
struct Frame {
    bindings: RefCell<FxHashMap<Symbol, Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    fn new(parent: Option<Rc<Frame>>) -> Rc<Frame> {
        Rc::new(Frame {
            bindings: RefCell::new(FxHashMap::default()),
            parent,
        })
    }
}

/// Macro-expansion cache key: the identity of the call-site pair cell. The
/// key retains the cell, so its address cannot be reused while the entry
/// exists.
struct ExpansionKey(Pair);

impl PartialEq for ExpansionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Eq for ExpansionKey {}

impl Hash for ExpansionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.addr().hash(state);
    }
}

/// State shared by every environment copy derived from the same root: the
/// symbol table handle and the macro-expansion cache.
struct RootCtx {
    symbols: Rc<SymbolTable>,
    expansions: RefCell<FxHashMap<ExpansionKey, Value>>,
}

/// A lexical scope: the innermost frames of the value and function chains
/// plus the shared root context. Cloning shares everything.
#[derive(Clone)]
pub struct Environment {
    vars: Option<Rc<Frame>>,
    funs: Option<Rc<Frame>>,
    shared: Rc<RootCtx>,
}

impl Environment {
    /// A fresh root environment over `symbols`. Lookups that miss the
    /// (empty) frame chains fall through to the symbols' global slots.
    pub fn new(symbols: Rc<SymbolTable>) -> Environment {
        Environment {
            vars: None,
            funs: None,
            shared: Rc::new(RootCtx {
                symbols,
                expansions: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Cheap capture of the current scope. The returned copy shares every
    /// frame, so mutations through either handle are visible to both.
    pub fn copy(&self) -> Environment {
        self.clone()
    }

    pub fn symbols(&self) -> &Rc<SymbolTable> {
        &self.shared.symbols
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.shared.symbols.intern(name)
    }

    pub fn nil(&self) -> Value {
        self.shared.symbols.nil()
    }

    pub fn t(&self) -> Value {
        self.shared.symbols.t()
    }

    pub fn bool(&self, b: bool) -> Value {
        self.shared.symbols.bool(b)
    }

    /// Open a new innermost variable frame.
    pub fn push(&mut self) {
        self.vars = Some(Frame::new(self.vars.take()));
    }

    /// Close the innermost variable frame. Frames captured by a closure
    /// stay alive through the capture's handle.
    pub fn pop(&mut self) {
        if let Some(frame) = self.vars.take() {
            self.vars = frame.parent.clone();
        }
    }

    /// Bind `sym` in the innermost variable frame, shadowing outer
    /// bindings. Must be preceded by a `push`.
    pub fn bind(&mut self, sym: Symbol, value: Value) {
        if let Some(frame) = &self.vars {
            frame.bindings.borrow_mut().insert(sym, value);
        }
    }

    /// Innermost-out lexical lookup; does not consult the global slot.
    pub fn lookup(&self, sym: &Symbol) -> Option<Value> {
        let mut cur = self.vars.as_ref();
        while let Some(frame) = cur {
            if let Some(v) = frame.bindings.borrow().get(sym) {
                return Some(v.clone());
            }
            cur = frame.parent.as_ref();
        }
        None
    }

    /// Lexical lookup with fallback to the symbol's global value slot.
    pub fn lookup_value(&self, sym: &Symbol) -> Option<Value> {
        self.lookup(sym).or_else(|| sym.global_value())
    }

    /// Assign to the innermost existing lexical binding, or to the
    /// symbol's global value slot if no frame binds it.
    pub fn set(&mut self, sym: &Symbol, value: Value) {
        let mut cur = self.vars.as_ref();
        while let Some(frame) = cur {
            let mut bindings = frame.bindings.borrow_mut();
            if let Some(slot) = bindings.get_mut(sym) {
                *slot = value;
                return;
            }
            drop(bindings);
            cur = frame.parent.as_ref();
        }
        sym.set_global_value(value);
    }

    /// Open a new innermost local-function frame (`flet`).
    pub fn push_fns(&mut self) {
        self.funs = Some(Frame::new(self.funs.take()));
    }

    pub fn pop_fns(&mut self) {
        if let Some(frame) = self.funs.take() {
            self.funs = frame.parent.clone();
        }
    }

    pub fn bind_fn(&mut self, sym: Symbol, value: Value) {
        if let Some(frame) = &self.funs {
            frame.bindings.borrow_mut().insert(sym, value);
        }
    }

    /// Local-function lookup; call resolution consults this before the
    /// global function slot.
    pub fn lookup_fn(&self, sym: &Symbol) -> Option<Value> {
        let mut cur = self.funs.as_ref();
        while let Some(frame) = cur {
            if let Some(v) = frame.bindings.borrow().get(sym) {
                return Some(v.clone());
            }
            cur = frame.parent.as_ref();
        }
        None
    }

    /// Local-function lookup with fallback to the global function slot.
    pub fn lookup_function(&self, sym: &Symbol) -> Option<Value> {
        self.lookup_fn(sym).or_else(|| sym.global_function())
    }

    /// Memoized macro expansion for a call-site cell, if one was cached.
    pub fn cached_expansion(&self, site: &Pair) -> Option<Value> {
        self.shared
            .expansions
            .borrow()
            .get(&ExpansionKey(site.clone()))
            .cloned()
    }

    /// Cache the expansion of a macro call site. Write-once per cell;
    /// expansion is deterministic so a race between copies is harmless.
    pub fn cache_expansion(&self, site: &Pair, expansion: Value) {
        self.shared
            .expansions
            .borrow_mut()
            .insert(ExpansionKey(site.clone()), expansion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::CaseFold;

    fn env() -> Environment {
        Environment::new(SymbolTable::new(CaseFold::Upper))
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let mut env = env();
        let x = env.intern("x");
        env.push();
        env.bind(x.clone(), Value::Number(1));
        env.push();
        env.bind(x.clone(), Value::Number(2));
        assert_eq!(env.lookup(&x), Some(Value::Number(2)));
        env.pop();
        assert_eq!(env.lookup(&x), Some(Value::Number(1)));
        env.pop();
        assert_eq!(env.lookup(&x), None);
    }

    #[test]
    fn lookup_value_falls_back_to_global_slot() {
        let mut env = env();
        let x = env.intern("x");
        x.set_global_value(Value::Number(7));
        assert_eq!(env.lookup(&x), None);
        assert_eq!(env.lookup_value(&x), Some(Value::Number(7)));
        env.push();
        env.bind(x.clone(), Value::Number(8));
        assert_eq!(env.lookup_value(&x), Some(Value::Number(8)));
    }

    #[test]
    fn set_updates_innermost_binding_or_global() {
        let mut env = env();
        let x = env.intern("x");
        let y = env.intern("y");
        env.push();
        env.bind(x.clone(), Value::Number(1));
        env.set(&x, Value::Number(2));
        assert_eq!(env.lookup(&x), Some(Value::Number(2)));
        // No frame binds y, so set writes its global slot.
        env.set(&y, Value::Number(3));
        assert_eq!(env.lookup(&y), None);
        assert_eq!(y.global_value(), Some(Value::Number(3)));
    }

    #[test]
    fn copy_shares_frames_with_original() {
        let mut env = env();
        let x = env.intern("x");
        env.push();
        env.bind(x.clone(), Value::Number(1));
        let captured = env.copy();
        // Mutation through the original is visible through the capture.
        env.set(&x, Value::Number(2));
        assert_eq!(captured.lookup(&x), Some(Value::Number(2)));
        // The capture keeps the frame alive after the original pops it.
        env.pop();
        assert_eq!(env.lookup(&x), None);
        assert_eq!(captured.lookup(&x), Some(Value::Number(2)));
    }

    #[test]
    fn function_chain_is_independent_of_value_chain() {
        let mut env = env();
        let f = env.intern("f");
        env.push();
        env.bind(f.clone(), Value::Number(1));
        assert_eq!(env.lookup_fn(&f), None);
        env.push_fns();
        env.bind_fn(f.clone(), Value::Number(2));
        assert_eq!(env.lookup(&f), Some(Value::Number(1)));
        assert_eq!(env.lookup_fn(&f), Some(Value::Number(2)));
        env.pop_fns();
        assert_eq!(env.lookup_fn(&f), None);
    }

    #[test]
    fn expansion_cache_is_keyed_by_cell_identity() {
        let env = env();
        let site_a = Pair::new(Value::Number(1), env.nil());
        let site_b = Pair::new(Value::Number(1), env.nil());
        env.cache_expansion(&site_a, Value::Number(42));
        assert_eq!(env.cached_expansion(&site_a), Some(Value::Number(42)));
        assert_eq!(env.cached_expansion(&site_b), None);
        // Copies see the shared cache.
        assert_eq!(env.copy().cached_expansion(&site_a), Some(Value::Number(42)));
    }
}
