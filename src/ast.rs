//! The core value types of the runtime. The main enum, [`Value`], covers
//! every value a program can produce: numbers, interned symbols, strings,
//! mutable pair cells and functions. Pairs are freely aliasable two-slot
//! cells with identity equality, which is what makes destructive list
//! surgery (`rplaca`/`rplacd`) and shared structure possible. Functions are
//! either native (a host function pointer) or derived (built by the
//! `lambda` family, carrying a parameter spec, body forms and an optional
//! captured environment).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::env::Environment;
use crate::evaluator::{Flow, Tail};
use crate::symbols::Symbol;
use crate::Error;

/// The numeric boundary type. Arbitrary precision is a property of this
/// alias's target, not of the evaluator; the core only needs checked
/// add/sub/mul/div/rem and ordering.
pub type NumberType = i64;

/// Core runtime value
#[derive(Clone)]
pub enum Value {
    /// Numbers; equality is by numeric value
    Number(NumberType),
    /// Interned symbol; identity equality, `NIL` doubles as empty list
    Symbol(Symbol),
    /// Immutable text; equality by content
    Str(Rc<str>),
    /// Mutable two-slot cell; identity equality by cell, not content
    Pair(Pair),
    /// Native or derived function
    Function(Rc<Function>),
}

/// The heap cell behind a pair. Slots are interior-mutable to support
/// destructive list operations; callers are responsible for avoiding
/// unwanted cycles.
pub struct PairCell {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

/// Reference-counted handle to a pair cell.
#[derive(Clone)]
pub struct Pair(Rc<PairCell>);

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Pair {
        Pair(Rc::new(PairCell {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    pub fn car(&self) -> Value {
        self.0.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.0.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.0.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.0.cdr.borrow_mut() = value;
    }

    pub fn ptr_eq(&self, other: &Pair) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable cell address, used as the macro-expansion cache key. Only
    /// meaningful while a handle to the cell is retained.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

/// Declared contract on the number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// Between min and max arguments inclusive; `&optional` parameters
    Range(usize, usize),
    /// min or more arguments; `&rest` parameters
    AtLeast(usize),
}

impl Arity {
    pub fn matches(&self, n: usize) -> bool {
        match self {
            Arity::Exact(expected) => n == *expected,
            Arity::Range(min, max) => n >= *min && n <= *max,
            Arity::AtLeast(min) => n >= *min,
        }
    }

    /// Check an argument count, producing a `Param` error naming the
    /// function and the declared range.
    pub fn validate(&self, name: &str, n: usize) -> Result<(), Error> {
        if self.matches(n) {
            return Ok(());
        }
        let expected = match self {
            Arity::Exact(k) => k.to_string(),
            Arity::Range(min, max) => format!("{min}-{max}"),
            Arity::AtLeast(min) => format!("at least {min}"),
        };
        Err(Error::param(name, &expected, n))
    }
}

/// What kind of function a [`Function`] is. Macros are derived functions
/// whose raw result is evaluated once more and cached per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Builtin,
    Defined,
    Macro,
}

/// Native function over evaluated arguments.
pub type NativeFn = fn(&[Value], &mut Environment, usize) -> Result<Value, Error>;

/// Native special form: receives its operands unevaluated, the current
/// evaluation depth and the in-flight tail-call target, and may answer
/// with a tail bounce instead of a value.
pub type FormFn = fn(&[Value], &mut Environment, usize, Tail<'_>) -> Result<Flow, Error>;

/// Implementation behind a function object.
pub enum FnImpl {
    /// Host function over evaluated arguments
    Native(NativeFn),
    /// Host special form over raw operands
    Form(FormFn),
    /// Function built by the `lambda` family
    Derived(DerivedFn),
}

/// Parameter specification of a derived function: required parameters,
/// then optionals (each with an optional default expression evaluated in
/// the call-time environment when the argument is omitted), then an
/// optional rest parameter collecting the remainder as a list.
#[derive(Clone)]
pub struct ParamSpec {
    pub required: Vec<Symbol>,
    pub optional: Vec<(Symbol, Option<Value>)>,
    pub rest: Option<Symbol>,
}

impl ParamSpec {
    pub fn arity(&self) -> Arity {
        let req = self.required.len();
        if self.rest.is_some() {
            Arity::AtLeast(req)
        } else if self.optional.is_empty() {
            Arity::Exact(req)
        } else {
            Arity::Range(req, req + self.optional.len())
        }
    }
}

/// Body and binding context of a derived function.
#[derive(Clone)]
pub struct DerivedFn {
    pub params: ParamSpec,
    /// Body forms, evaluated in order; the last is in tail position
    pub body: Vec<Value>,
    /// Captured defining environment; `None` for the non-closure variants
    /// (`fn`, `unclosure`), which bind into the caller's live chain instead
    pub env: Option<Environment>,
}

/// A callable value: name for diagnostics, arity contract, argument
/// evaluation policy, kind, and the implementation.
pub struct Function {
    pub name: String,
    pub kind: FnKind,
    /// Special functions receive their operand expressions unevaluated
    pub special: bool,
    pub arity: Arity,
    pub imp: FnImpl,
}

impl Function {
    pub fn native(name: &str, arity: Arity, fun: NativeFn) -> Rc<Function> {
        Rc::new(Function {
            name: name.to_string(),
            kind: FnKind::Builtin,
            special: false,
            arity,
            imp: FnImpl::Native(fun),
        })
    }

    pub fn form(name: &str, arity: Arity, fun: FormFn) -> Rc<Function> {
        Rc::new(Function {
            name: name.to_string(),
            kind: FnKind::Builtin,
            special: true,
            arity,
            imp: FnImpl::Form(fun),
        })
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.imp, FnImpl::Derived(_))
    }
}

impl Value {
    pub fn pair(car: Value, cdr: Value) -> Value {
        Value::Pair(Pair::new(car, cdr))
    }

    /// True only for the `NIL` symbol (empty list / false).
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Symbol(s) if s.is_nil())
    }

    /// Anything non-NIL is truthy.
    pub fn is_truthy(&self) -> bool {
        !self.is_nil()
    }

    /// `atom` classification: everything that is not a pair. Numbers,
    /// symbols, strings and functions are all atoms.
    pub fn is_atom(&self) -> bool {
        !matches!(self, Value::Pair(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::Str(_) => "string",
            Value::Pair(_) => "pair",
            Value::Function(_) => "function",
        }
    }

    pub fn as_number(&self) -> Result<NumberType, Error> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(Error::Type(format!("'{other}' is not a number"))),
        }
    }

    pub fn as_symbol(&self) -> Result<&Symbol, Error> {
        match self {
            Value::Symbol(s) => Ok(s),
            other => Err(Error::Type(format!("'{other}' is not a symbol"))),
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::Type(format!("'{other}' is not a string"))),
        }
    }

    pub fn as_pair(&self) -> Result<&Pair, Error> {
        match self {
            Value::Pair(p) => Ok(p),
            other => Err(Error::Type(format!("'{other}' is not a pair"))),
        }
    }

    pub fn as_function(&self) -> Result<&Rc<Function>, Error> {
        match self {
            Value::Function(f) => Ok(f),
            other => Err(Error::Type(format!("'{other}' is not a function"))),
        }
    }

    /// Iterate the pair spine of a list. Stops at the first non-pair cdr;
    /// an improper tail is not yielded (callers that care about dotted
    /// tails walk the pairs themselves).
    pub fn list_iter(&self) -> ListIter {
        ListIter { cur: self.clone() }
    }

    /// `eq` semantics: identity for pairs and functions, interning
    /// identity for symbols, value equality for numbers and strings.
    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `equal` semantics: `eq`, extended structurally through pairs.
    pub fn equal_value(&self, other: &Value) -> bool {
        if self.eq_value(other) {
            return true;
        }
        match (self, other) {
            (Value::Pair(a), Value::Pair(b)) => {
                a.car().equal_value(&b.car()) && a.cdr().equal_value(&b.cdr())
            }
            _ => false,
        }
    }
}

/// Build a proper list from a slice, terminated by `nil`.
pub fn list_from_slice(items: &[Value], nil: Value) -> Value {
    let mut tail = nil;
    for item in items.iter().rev() {
        tail = Value::pair(item.clone(), tail);
    }
    tail
}

pub struct ListIter {
    cur: Value,
}

impl Iterator for ListIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.cur.clone() {
            Value::Pair(p) => {
                self.cur = p.cdr();
                Some(p.car())
            }
            _ => None,
        }
    }
}

// Structural equality for tests and host callers; `eq` identity is exposed
// separately via `eq_value`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal_value(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{}", s.name()),
            Value::Str(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Pair(pair) => {
                // An improper tail prints dotted; lists are never silently
                // reclassified on output.
                write!(f, "(")?;
                let mut cur = pair.clone();
                let mut first = true;
                loop {
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "{}", cur.car())?;
                    match cur.cdr() {
                        Value::Pair(next) => cur = next,
                        tail if tail.is_nil() => break,
                        tail => {
                            write!(f, " . {tail}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Function(fun) => {
                let kind = match fun.kind {
                    FnKind::Builtin => "builtin",
                    FnKind::Defined => "fun",
                    FnKind::Macro => "macro",
                };
                write!(f, "<{kind}:{}>", fun.name)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Symbol(s) => write!(f, "Symbol({})", s.name()),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Pair(_) => write!(f, "Pair({self})"),
            Value::Function(fun) => write!(f, "Function({})", fun.name),
        }
    }
}
