//! The evaluator: depth-tracked expression evaluation, the call protocol,
//! the special forms, macro expansion with call-site memoization, and the
//! self-tail-call loop.
//!
//! Internally everything flows through [`eval_flow`], which returns a
//! [`Flow`]: either a finished value or a tail bounce. A bounce is produced
//! when a call in tail position resolves to the very function currently
//! being applied; the invocation loop in [`apply`] catches it, rebinds the
//! parameters in a fresh frame and continues without recursing, so
//! self-tail-recursive loops run in constant stack and constant depth.
//! The public [`eval`] entry point can never observe a bounce.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::ast::{
    list_from_slice, DerivedFn, FnImpl, FnKind, Function, Pair, ParamSpec, Value,
};
use crate::env::Environment;
use crate::symbols::Symbol;
use crate::{Error, MAX_EVAL_DEPTH};

/// Result of evaluating one expression: a value, or a tail call to the
/// function currently being applied, carrying its already-evaluated
/// arguments.
pub enum Flow {
    Value(Value),
    TailCall(SmallVec<[Value; 8]>),
}

/// The tail-call target threaded through tail positions: the derived
/// function currently being applied, if any.
pub type Tail<'a> = Option<&'a Rc<Function>>;

fn depth_error() -> Error {
    Error::Eval(format!("maximum evaluation depth {MAX_EVAL_DEPTH} exceeded"))
}

/// Evaluate an expression to a value. This is the host-facing entry point;
/// depth starts at zero and tail bounces cannot escape to it.
pub fn eval(expr: &Value, env: &mut Environment) -> Result<Value, Error> {
    eval_value(expr, env, 0)
}

/// Evaluate in non-tail position: any bounce would be a bug in a special
/// form, reported as an error rather than a panic.
pub(crate) fn eval_value(expr: &Value, env: &mut Environment, depth: usize) -> Result<Value, Error> {
    match eval_flow(expr, env, depth, None)? {
        Flow::Value(v) => Ok(v),
        Flow::TailCall(_) => Err(Error::Eval(
            "tail call escaped its function body".to_string(),
        )),
    }
}

pub(crate) fn eval_flow(
    expr: &Value,
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    if depth > MAX_EVAL_DEPTH {
        return Err(depth_error());
    }
    match expr {
        Value::Number(_) | Value::Str(_) | Value::Function(_) => Ok(Flow::Value(expr.clone())),
        Value::Symbol(sym) => match env.lookup_value(sym) {
            Some(v) => Ok(Flow::Value(v)),
            None => Err(Error::Unbound(sym.name().to_string())),
        },
        Value::Pair(site) => eval_call(site, env, depth, tail),
    }
}

fn eval_call(
    site: &Pair,
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    // Memoized macro expansion for this call site, if present.
    if let Some(expansion) = env.cached_expansion(site) {
        return eval_flow(&expansion, env, depth + 1, tail);
    }

    let f = resolve_operator(&site.car(), env, depth)?;

    let mut args: SmallVec<[Value; 8]> = SmallVec::new();
    let mut rest = site.cdr();
    loop {
        match rest {
            Value::Pair(p) => {
                args.push(p.car());
                rest = p.cdr();
            }
            v if v.is_nil() => break,
            v => {
                return Err(Error::Syntax(format!(
                    "improper argument list in call to {}: ends in '{v}'",
                    f.name
                )))
            }
        }
    }

    // Special functions receive raw operand expressions; ordinary ones get
    // them evaluated left to right.
    if !f.special {
        for slot in args.iter_mut() {
            let v = eval_value(slot, env, depth + 1)?;
            *slot = v;
        }
    }
    f.arity.validate(&f.name, args.len())?;

    if f.kind == FnKind::Macro {
        let expansion = apply(&f, &args, env, depth)?;
        env.cache_expansion(site, expansion.clone());
        return eval_flow(&expansion, env, depth + 1, tail);
    }

    match &f.imp {
        FnImpl::Native(nf) => nf(&args, env, depth).map(Flow::Value),
        FnImpl::Form(ff) => ff(&args, env, depth, tail),
        FnImpl::Derived(_) => {
            if let Some(target) = tail {
                if !f.special && Rc::ptr_eq(&f, target) {
                    return Ok(Flow::TailCall(args));
                }
            }
            apply(&f, &args, env, depth).map(Flow::Value)
        }
    }
}

/// Resolve a call's operator position to a function object. Symbols go
/// through the local function chain, then the global function slot; any
/// other operator expression is evaluated and must yield a function.
fn resolve_operator(op: &Value, env: &mut Environment, depth: usize) -> Result<Rc<Function>, Error> {
    match op {
        Value::Symbol(sym) => match env.lookup_function(sym) {
            Some(Value::Function(f)) => Ok(f),
            Some(other) => Err(Error::Type(format!(
                "'{}' names the non-function value '{other}'",
                sym.name()
            ))),
            None => Err(Error::UnboundFunction(sym.name().to_string())),
        },
        Value::Function(f) => Ok(f.clone()),
        Value::Pair(_) => {
            let v = eval_value(op, env, depth + 1)?;
            Ok(v.as_function()?.clone())
        }
        other => Err(Error::Type(format!("'{other}' is not a function"))),
    }
}

/// Apply a function to already-processed arguments. For a derived function
/// this runs the invocation loop: bind parameters in a fresh frame, run the
/// body with the function itself as the tail target, and on a bounce rebind
/// and go again at the same depth.
pub fn apply(
    f: &Rc<Function>,
    args: &[Value],
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth > MAX_EVAL_DEPTH {
        return Err(depth_error());
    }
    f.arity.validate(&f.name, args.len())?;
    match &f.imp {
        FnImpl::Native(nf) => nf(args, env, depth),
        FnImpl::Form(ff) => match ff(args, env, depth, None)? {
            Flow::Value(v) => Ok(v),
            Flow::TailCall(_) => Err(Error::Eval(
                "tail call escaped its function body".to_string(),
            )),
        },
        FnImpl::Derived(d) => match &d.env {
            // Closures run in their captured scope; the non-closure
            // variants run in the caller's live chain.
            Some(captured) => {
                let mut local = captured.copy();
                run_derived(f, d, args, &mut local, depth)
            }
            None => run_derived(f, d, args, env, depth),
        },
    }
}

fn run_derived(
    f: &Rc<Function>,
    d: &DerivedFn,
    args: &[Value],
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let mut current: SmallVec<[Value; 8]> = args.iter().cloned().collect();
    loop {
        env.push();
        let flow = bind_and_run(f, d, &current, env, depth);
        env.pop();
        match flow? {
            Flow::Value(v) => return Ok(v),
            // Same function, fresh frame, same depth.
            Flow::TailCall(next) => current = next,
        }
    }
}

fn bind_and_run(
    f: &Rc<Function>,
    d: &DerivedFn,
    args: &[Value],
    env: &mut Environment,
    depth: usize,
) -> Result<Flow, Error> {
    let spec = &d.params;
    let nreq = spec.required.len();
    for (sym, value) in spec.required.iter().zip(args) {
        env.bind(sym.clone(), value.clone());
    }
    for (i, (sym, default)) in spec.optional.iter().enumerate() {
        let value = match args.get(nreq + i) {
            Some(v) => v.clone(),
            // Omitted optionals evaluate their default in the call-time
            // frame, where earlier parameters are already bound.
            None => match default {
                Some(expr) => eval_value(expr, env, depth + 1)?,
                None => env.nil(),
            },
        };
        env.bind(sym.clone(), value);
    }
    if let Some(rest) = &spec.rest {
        let fixed = nreq + spec.optional.len();
        let value = if args.len() > fixed {
            list_from_slice(&args[fixed..], env.nil())
        } else {
            env.nil()
        };
        env.bind(rest.clone(), value);
    }
    eval_body(&d.body, env, depth, Some(f))
}

/// Evaluate a body sequence: all but the last form in non-tail position,
/// the last with the given tail target. An empty body yields NIL.
fn eval_body(body: &[Value], env: &mut Environment, depth: usize, tail: Tail<'_>) -> Result<Flow, Error> {
    match body.split_last() {
        Some((last, init)) => {
            for form in init {
                eval_value(form, env, depth + 1)?;
            }
            eval_flow(last, env, depth + 1, tail)
        }
        None => Ok(Flow::Value(env.nil())),
    }
}

// ---------------------------------------------------------------------------
// Special forms. Registered in builtinops; arity is validated by the call
// protocol before these run.
// ---------------------------------------------------------------------------

pub(crate) fn form_quote(
    args: &[Value],
    _env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    Ok(Flow::Value(args[0].clone()))
}

pub(crate) fn form_if(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    let test = eval_value(&args[0], env, depth + 1)?;
    if test.is_truthy() {
        eval_flow(&args[1], env, depth + 1, tail)
    } else if args.len() > 2 {
        eval_flow(&args[2], env, depth + 1, tail)
    } else {
        Ok(Flow::Value(env.nil()))
    }
}

pub(crate) fn form_cond(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    for clause in args {
        let p = match clause {
            Value::Pair(p) => p,
            other => {
                return Err(Error::Syntax(format!(
                    "cond clause must be a list, got '{other}'"
                )))
            }
        };
        let test = eval_value(&p.car(), env, depth + 1)?;
        if test.is_truthy() {
            let body: SmallVec<[Value; 8]> = p.cdr().list_iter().collect();
            if body.is_empty() {
                return Ok(Flow::Value(test));
            }
            return eval_body(&body, env, depth, tail);
        }
    }
    Ok(Flow::Value(env.nil()))
}

pub(crate) fn form_while(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    loop {
        if !eval_value(&args[0], env, depth + 1)?.is_truthy() {
            return Ok(Flow::Value(env.nil()));
        }
        for form in &args[1..] {
            eval_value(form, env, depth + 1)?;
        }
    }
}

pub(crate) fn form_and(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    match args.split_last() {
        Some((last, init)) => {
            for form in init {
                let v = eval_value(form, env, depth + 1)?;
                if !v.is_truthy() {
                    return Ok(Flow::Value(v));
                }
            }
            eval_flow(last, env, depth + 1, tail)
        }
        None => Ok(Flow::Value(env.t())),
    }
}

pub(crate) fn form_or(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    match args.split_last() {
        Some((last, init)) => {
            for form in init {
                let v = eval_value(form, env, depth + 1)?;
                if v.is_truthy() {
                    return Ok(Flow::Value(v));
                }
            }
            eval_flow(last, env, depth + 1, tail)
        }
        None => Ok(Flow::Value(env.nil())),
    }
}

pub(crate) fn form_progn(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    eval_body(args, env, depth, tail)
}

pub(crate) fn form_setq(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::Syntax(
            "setq expects variable/value pairs".to_string(),
        ));
    }
    let mut result = env.nil();
    for pair in args.chunks(2) {
        let sym = match &pair[0] {
            Value::Symbol(s) => s.clone(),
            other => {
                return Err(Error::Syntax(format!(
                    "setq target must be a symbol, got '{other}'"
                )))
            }
        };
        result = eval_value(&pair[1], env, depth + 1)?;
        env.set(&sym, result.clone());
    }
    Ok(Flow::Value(result))
}

fn binding_name(form: &Value) -> Result<Symbol, Error> {
    match form {
        Value::Symbol(s) => Ok(s.clone()),
        other => Err(Error::Syntax(format!(
            "binding name must be a symbol, got '{other}'"
        ))),
    }
}

/// Collect a bindings operand as a proper list of binding forms. A bare
/// `list_iter` would silently accept a non-list operand or drop an
/// improper tail, so the spine is walked explicitly.
fn binding_forms(list: &Value, what: &str) -> Result<Vec<Value>, Error> {
    let mut out = Vec::new();
    let mut rest = list.clone();
    loop {
        match rest {
            Value::Pair(p) => {
                out.push(p.car());
                rest = p.cdr();
            }
            v if v.is_nil() => return Ok(out),
            v => {
                return Err(Error::Syntax(format!(
                    "{what} bindings must be a list, got '{v}'"
                )))
            }
        }
    }
}

/// A `let` binding is either a bare symbol (bound to NIL) or
/// `(name init-expr)`.
fn split_binding(form: &Value) -> Result<(Symbol, Option<Value>), Error> {
    match form {
        Value::Symbol(_) => Ok((binding_name(form)?, None)),
        Value::Pair(p) => {
            let name = binding_name(&p.car())?;
            match p.cdr() {
                v if v.is_nil() => Ok((name, None)),
                Value::Pair(rest) => Ok((name, Some(rest.car()))),
                other => Err(Error::Syntax(format!(
                    "malformed binding for {}: '{other}'",
                    name.name()
                ))),
            }
        }
        other => Err(Error::Syntax(format!("malformed binding '{other}'"))),
    }
}

pub(crate) fn form_let(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    // Init expressions are evaluated in the outer scope before any binding
    // takes effect.
    let mut bound: Vec<(Symbol, Value)> = Vec::new();
    for form in binding_forms(&args[0], "let")? {
        let (name, init) = split_binding(&form)?;
        let value = match init {
            Some(expr) => eval_value(&expr, env, depth + 1)?,
            None => env.nil(),
        };
        bound.push((name, value));
    }
    env.push();
    for (name, value) in bound {
        env.bind(name, value);
    }
    let flow = eval_body(&args[1..], env, depth, tail);
    env.pop();
    flow
}

pub(crate) fn form_let_star(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    env.push();
    let flow = let_star_body(args, env, depth, tail);
    env.pop();
    flow
}

fn let_star_body(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    // Each init expression sees the bindings before it.
    for form in binding_forms(&args[0], "let*")? {
        let (name, init) = split_binding(&form)?;
        let value = match init {
            Some(expr) => eval_value(&expr, env, depth + 1)?,
            None => env.nil(),
        };
        env.bind(name, value);
    }
    eval_body(&args[1..], env, depth, tail)
}

pub(crate) fn form_flet(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    env.push_fns();
    let flow = flet_body(args, env, depth, tail);
    env.pop_fns();
    flow
}

fn flet_body(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    tail: Tail<'_>,
) -> Result<Flow, Error> {
    for spec in binding_forms(&args[0], "flet")? {
        let p = spec.as_pair().map_err(|_| {
            Error::Syntax(format!("flet binding must be (name params body...), got '{spec}'"))
        })?;
        let name = binding_name(&p.car())?;
        let rest = match p.cdr() {
            Value::Pair(rest) => rest,
            other => {
                return Err(Error::Syntax(format!(
                    "flet binding for {} lacks a parameter list: '{other}'",
                    name.name()
                )))
            }
        };
        let params = parse_params(&rest.car(), env)?;
        let body: Vec<Value> = rest.cdr().list_iter().collect();
        // The capture includes the function frame just pushed, so the
        // bindings can call themselves and each other.
        let f = Rc::new(Function {
            name: name.name().to_string(),
            kind: FnKind::Defined,
            special: false,
            arity: params.arity(),
            imp: FnImpl::Derived(DerivedFn {
                params,
                body,
                env: Some(env.copy()),
            }),
        });
        env.bind_fn(name, Value::Function(f));
    }
    eval_body(&args[1..], env, depth, tail)
}

fn make_derived(
    name: &str,
    args: &[Value],
    env: &Environment,
    kind: FnKind,
    special: bool,
    capture: bool,
) -> Result<Value, Error> {
    let params = parse_params(&args[0], env)?;
    let body = args[1..].to_vec();
    Ok(Value::Function(Rc::new(Function {
        name: name.to_string(),
        kind,
        special,
        arity: params.arity(),
        imp: FnImpl::Derived(DerivedFn {
            params,
            body,
            env: capture.then(|| env.copy()),
        }),
    })))
}

pub(crate) fn form_lambda(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    make_derived("LAMBDA", args, env, FnKind::Defined, false, true).map(Flow::Value)
}

/// `fn` builds a non-closure lambda: the body runs in the caller's live
/// binding chain instead of a captured one.
pub(crate) fn form_fn(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    make_derived("FN", args, env, FnKind::Defined, false, false).map(Flow::Value)
}

/// `nlambda` builds a special function: it receives its operand
/// expressions unevaluated.
pub(crate) fn form_nlambda(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    make_derived("NLAMBDA", args, env, FnKind::Defined, true, true).map(Flow::Value)
}

pub(crate) fn form_macro(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    make_derived("MACRO", args, env, FnKind::Macro, true, true).map(Flow::Value)
}

pub(crate) fn form_defun(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    let name = binding_name(&args[0])?;
    let f = make_derived(name.name(), &args[1..], env, FnKind::Defined, false, true)?;
    name.set_global_function(f);
    Ok(Flow::Value(Value::Symbol(name)))
}

pub(crate) fn form_defmacro(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    let name = binding_name(&args[0])?;
    let f = make_derived(name.name(), &args[1..], env, FnKind::Macro, true, true)?;
    name.set_global_function(f);
    Ok(Flow::Value(Value::Symbol(name)))
}

/// `(function f)` resolves a name in the function namespace to its
/// function object; a lambda expression is evaluated in place.
pub(crate) fn form_function(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    match &args[0] {
        Value::Symbol(sym) => match env.lookup_function(sym) {
            Some(f) => Ok(Flow::Value(f)),
            None => Err(Error::UnboundFunction(sym.name().to_string())),
        },
        Value::Function(_) => Ok(Flow::Value(args[0].clone())),
        Value::Pair(_) => eval_value(&args[0], env, depth + 1).map(Flow::Value),
        other => Err(Error::Type(format!("'{other}' does not name a function"))),
    }
}

pub(crate) fn form_catch(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    let tag = eval_value(&args[0], env, depth + 1)?.as_symbol()?.clone();
    // No tail target inside the body: a bounce must not cross the handler.
    match eval_body(&args[1..], env, depth, None) {
        Err(Error::Throw { tag: thrown, value }) if thrown == tag => Ok(Flow::Value(value)),
        other => other,
    }
}

/// `(unclosure name)` strips the captured environment from the named
/// derived function, so future calls run in the caller's scope.
pub(crate) fn form_unclosure(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    let name = binding_name(&args[0])?;
    let fv = env
        .lookup_function(&name)
        .ok_or_else(|| Error::UnboundFunction(name.name().to_string()))?;
    let f = fv.as_function()?;
    let d = match &f.imp {
        FnImpl::Derived(d) => d,
        _ => {
            return Err(Error::Type(format!(
                "'{}' is not a derived function",
                f.name
            )))
        }
    };
    let stripped = Rc::new(Function {
        name: f.name.clone(),
        kind: f.kind,
        special: f.special,
        arity: f.arity,
        imp: FnImpl::Derived(DerivedFn {
            params: d.params.clone(),
            body: d.body.clone(),
            env: None,
        }),
    });
    name.set_global_function(Value::Function(stripped));
    Ok(Flow::Value(Value::Symbol(name)))
}

pub(crate) fn form_backquote(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
    _tail: Tail<'_>,
) -> Result<Flow, Error> {
    expand_template(&args[0], env, depth).map(Flow::Value)
}

fn unquote_arg(p: &Pair, what: &str) -> Result<Value, Error> {
    match p.cdr() {
        Value::Pair(rest) if rest.cdr().is_nil() => Ok(rest.car()),
        other => Err(Error::Syntax(format!("{what} expects one form, got '{other}'"))),
    }
}

fn expand_template(template: &Value, env: &mut Environment, depth: usize) -> Result<Value, Error> {
    let p = match template {
        Value::Pair(p) => p,
        _ => return Ok(template.clone()),
    };
    let symbols = env.symbols().clone();
    if let Value::Symbol(head) = p.car() {
        if head == symbols.unquote() {
            let arg = unquote_arg(p, "unquote")?;
            return eval_value(&arg, env, depth + 1);
        }
        if head == symbols.unquote_splicing() {
            return Err(Error::Syntax(
                "unquote-splicing outside a list template".to_string(),
            ));
        }
    }
    // Element-wise: a (unquote-splicing x) element splices the list value
    // of x into the surrounding template.
    if let Value::Pair(elem) = p.car() {
        if let Value::Symbol(head) = elem.car() {
            if head == symbols.unquote_splicing() {
                let arg = unquote_arg(&elem, "unquote-splicing")?;
                let spliced = eval_value(&arg, env, depth + 1)?;
                if !matches!(spliced, Value::Pair(_)) && !spliced.is_nil() {
                    return Err(Error::Type(format!("cannot splice non-list '{spliced}'")));
                }
                let rest = expand_template(&p.cdr(), env, depth)?;
                let items: Vec<Value> = spliced.list_iter().collect();
                let mut out = rest;
                for item in items.into_iter().rev() {
                    out = Value::pair(item, out);
                }
                return Ok(out);
            }
        }
    }
    let car = expand_template(&p.car(), env, depth)?;
    let cdr = expand_template(&p.cdr(), env, depth)?;
    Ok(Value::pair(car, cdr))
}

/// Parse a parameter list: required names, then `&optional` entries (bare
/// name or `(name default-expr)`), then one `&rest` name.
pub(crate) fn parse_params(spec: &Value, env: &Environment) -> Result<ParamSpec, Error> {
    enum Mode {
        Required,
        Optional,
        Rest,
    }
    let symbols = env.symbols();
    let optional_marker = symbols.optional_marker();
    let rest_marker = symbols.rest_marker();

    let mut params = ParamSpec {
        required: Vec::new(),
        optional: Vec::new(),
        rest: None,
    };
    if spec.is_nil() {
        return Ok(params);
    }
    if !matches!(spec, Value::Pair(_)) {
        return Err(Error::Syntax(format!("bad parameter list '{spec}'")));
    }
    let mut mode = Mode::Required;
    for entry in spec.list_iter() {
        if let Value::Symbol(sym) = &entry {
            if *sym == optional_marker {
                if !matches!(mode, Mode::Required) {
                    return Err(Error::Syntax("misplaced &optional".to_string()));
                }
                mode = Mode::Optional;
                continue;
            }
            if *sym == rest_marker {
                if matches!(mode, Mode::Rest) {
                    return Err(Error::Syntax("misplaced &rest".to_string()));
                }
                mode = Mode::Rest;
                continue;
            }
        }
        match mode {
            Mode::Required => params.required.push(binding_name(&entry)?),
            Mode::Optional => match &entry {
                Value::Symbol(_) => params.optional.push((binding_name(&entry)?, None)),
                Value::Pair(p) => {
                    let name = binding_name(&p.car())?;
                    let default = match p.cdr() {
                        v if v.is_nil() => None,
                        Value::Pair(rest) => Some(rest.car()),
                        other => {
                            return Err(Error::Syntax(format!(
                                "bad &optional default for {}: '{other}'",
                                name.name()
                            )))
                        }
                    };
                    params.optional.push((name, default));
                }
                other => {
                    return Err(Error::Syntax(format!("bad &optional entry '{other}'")))
                }
            },
            Mode::Rest => {
                if params.rest.is_some() {
                    return Err(Error::Syntax("&rest takes a single name".to_string()));
                }
                params.rest = Some(binding_name(&entry)?);
            }
        }
    }
    if matches!(mode, Mode::Rest) && params.rest.is_none() {
        return Err(Error::Syntax("&rest expects a name".to_string()));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use crate::interp::Lisp;
    use crate::Error;

    /// Expected outcome of evaluating one input, compared against the
    /// printed form of the result or the rendered error.
    enum Expect {
        Ok(&'static str),
        Err(&'static str),
    }
    use Expect::{Err as Fails, Ok as Yields};

    fn run_table(lisp: &mut Lisp, cases: &[(&str, Expect)]) {
        for (input, expected) in cases {
            let result = lisp.eval_str(input);
            match (expected, result) {
                (Yields(rendered), Ok(v)) => {
                    assert_eq!(&v.to_string(), rendered, "input: {input}")
                }
                (Yields(rendered), Err(e)) => {
                    panic!("input: {input} expected {rendered}, failed with: {e}")
                }
                (Fails(fragment), Ok(v)) => {
                    panic!("input: {input} expected error '{fragment}', got {v}")
                }
                (Fails(fragment), Err(e)) => assert!(
                    e.to_string().contains(fragment),
                    "input: {input}, error: {e}, expected fragment: {fragment}"
                ),
            }
        }
    }

    #[test]
    fn literals_and_quote() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("42", Yields("42")),
                ("-7", Yields("-7")),
                ("\"hi\"", Yields("\"hi\"")),
                ("nil", Yields("NIL")),
                ("t", Yields("T")),
                ("'foo", Yields("FOO")),
                ("'(1 2 3)", Yields("(1 2 3)")),
                ("'(1 . 2)", Yields("(1 . 2)")),
                ("(quote (a b))", Yields("(A B)")),
                ("no-such-variable", Fails("Unbound variable: NO-SUCH-VARIABLE")),
            ],
        );
    }

    #[test]
    fn conditionals_and_sequencing() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(if t 1 2)", Yields("1")),
                ("(if nil 1 2)", Yields("2")),
                ("(if nil 1)", Yields("NIL")),
                ("(if 0 'yes 'no)", Yields("YES")), // only NIL is false
                ("(cond (nil 1) (t 2) (t 3))", Yields("2")),
                ("(cond (nil 1))", Yields("NIL")),
                ("(cond (42))", Yields("42")),
                ("(and 1 2 3)", Yields("3")),
                ("(and 1 nil 3)", Yields("NIL")),
                ("(and)", Yields("T")),
                ("(or nil 2 3)", Yields("2")),
                ("(or nil nil)", Yields("NIL")),
                ("(or)", Yields("NIL")),
                ("(progn 1 2 3)", Yields("3")),
                ("(progn)", Yields("NIL")),
            ],
        );
    }

    #[test]
    fn setq_and_lexical_scope() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(setq x 10)", Yields("10")),
                ("x", Yields("10")),
                ("(setq a 1 b 2)", Yields("2")),
                ("(+ a b)", Yields("3")),
                ("(let ((x 1)) x)", Yields("1")),
                ("x", Yields("10")), // let does not leak
                ("(let ((x 1) (y x)) y)", Yields("10")), // let inits see outer scope
                ("(let* ((x 1) (y x)) y)", Yields("1")), // let* inits see earlier bindings
                ("(let (u) u)", Yields("NIL")),
                ("(let ((x 5)) (setq x 6) x)", Yields("6")),
                ("x", Yields("10")), // setq targeted the local
                ("(setq x 1 2 3)", Fails("setq target must be a symbol")),
                ("(setq x)", Fails("setq expects variable/value pairs")),
                // The bindings operand must be a proper list.
                ("(let 5 1)", Fails("let bindings must be a list")),
                ("(let ((a 1) . 2) a)", Fails("let bindings must be a list")),
                ("(let* x 1)", Fails("let* bindings must be a list")),
                ("(flet 5 1)", Fails("flet bindings must be a list")),
            ],
        );
    }

    #[test]
    fn lambdas_and_closures() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("((lambda (x) (+ x 1)) 41)", Yields("42")),
                ("((lambda () ) )", Yields("NIL")),
                ("(setq add (lambda (x y) (+ x y)))", Yields("<fun:LAMBDA>")),
                ("(funcall add 1 2)", Yields("3")),
                // Closures capture frames by reference: the inner setq is
                // visible through the captured binding.
                (
                    "(let ((n 0)) (setq tick (lambda () (setq n (+ n 1)) n)) (funcall tick) (funcall tick))",
                    Yields("2"),
                ),
                ("(funcall tick)", Yields("3")),
                ("((lambda (x) x) 1 2)", Fails("LAMBDA expecting 1 args, got 2")),
            ],
        );
    }

    #[test]
    fn defun_and_recursion() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(defun fact (n) (if (eq n 0) 1 (* n (fact (- n 1)))))", Yields("FACT")),
                ("(fact 10)", Yields("3628800")),
                // Value and function namespaces are separate.
                ("(setq fact 99)", Yields("99")),
                ("(fact 3)", Yields("6")),
                ("fact", Yields("99")),
                ("(defun f2 (a &optional b (c 10) &rest r) (list a b c r))", Yields("F2")),
                ("(f2 1)", Yields("(1 NIL 10 NIL)")),
                ("(f2 1 2)", Yields("(1 2 10 NIL)")),
                ("(f2 1 2 3 4 5)", Yields("(1 2 3 (4 5))")),
                ("(f2)", Fails("F2 expecting at least 1")),
                // Optional defaults are evaluated at call time and see
                // earlier parameters.
                ("(defun dup (x &optional (y x)) (list x y))", Yields("DUP")),
                ("(dup 7)", Yields("(7 7)")),
                ("(dup 7 8)", Yields("(7 8)")),
            ],
        );
    }

    #[test]
    fn flet_and_non_closure_functions() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                // flet bindings are local to the form and can recurse.
                (
                    "(flet ((factt (x acc) (if (eq x 0) acc (factt (- x 1) (* x acc))))) (factt 5 1))",
                    Yields("120"),
                ),
                ("(factt 5 1)", Fails("Unbound function: FACTT")),
                // A defun inside flet captures the local function.
                (
                    "(flet ((helper (x) (* x 2))) (defun twice-of (x) (helper x)))",
                    Yields("TWICE-OF"),
                ),
                ("(twice-of 21)", Yields("42")),
                // fn runs its body in the caller's live chain, so a let*
                // binding can name it recursively.
                (
                    "(let* ((down (fn (n) (if (eq n 0) 'done (funcall down (- n 1)))))) (funcall down 5))",
                    Yields("DONE"),
                ),
                // nlambda receives raw operand expressions.
                ("(funset 'q (nlambda (x) x))", Yields("Q")),
                ("(q (+ 1 2))", Yields("(+ 1 2)")),
            ],
        );
    }

    #[test]
    fn function_form_and_unclosure() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(defun inc (x) (+ x 1))", Yields("INC")),
                ("(function inc)", Yields("<fun:INC>")),
                ("(funcall (function inc) 41)", Yields("42")),
                ("(function (lambda (x) x))", Yields("<fun:LAMBDA>")),
                ("(function no-such-fn)", Fails("Unbound function: NO-SUCH-FN")),
                // unclosure strips the capture: the body now sees the
                // caller's bindings instead of the defining scope's.
                ("(setq k 1)", Yields("1")),
                ("(let ((k 10)) (defun getk () k))", Yields("GETK")),
                ("(getk)", Yields("10")),
                ("(unclosure getk)", Yields("GETK")),
                ("(getk)", Yields("1")),
                ("(let ((k 5)) (getk))", Yields("5")),
            ],
        );
    }

    #[test]
    fn macros_expand_and_memoize() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(defmacro twice (x) (list '+ x x))", Yields("TWICE")),
                ("(twice 21)", Yields("42")),
                ("(setq n 0)", Yields("0")),
                // The same textual call site is evaluated repeatedly; the
                // memoized expansion must be semantically invisible.
                (
                    "(defun spin (k) (while (< n k) (setq n (twice (+ (/ n 2) 1)))) n)",
                    Yields("SPIN"),
                ),
                ("(spin 10)", Yields("10")),
                ("(defmacro unless2 (c b) (list 'if c nil b))", Yields("UNLESS2")),
                ("(unless2 nil 'ran)", Yields("RAN")),
                ("(unless2 t 'ran)", Yields("NIL")),
                // Raw macro objects installed with funset behave like
                // defmacro definitions.
                ("(funset 'requote (macro (x) (list 'quote x)))", Yields("REQUOTE")),
                ("(requote foo)", Yields("FOO")),
            ],
        );
    }

    #[test]
    fn backquote_templates() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("`(a b c)", Yields("(A B C)")),
                ("(setq x 42)", Yields("42")),
                ("`(a ,x)", Yields("(A 42)")),
                ("`(1 ,(+ 1 1) 3)", Yields("(1 2 3)")),
                ("(setq xs '(2 3))", Yields("(2 3)")),
                ("`(1 ,@xs 4)", Yields("(1 2 3 4)")),
                ("`(1 ,@xs)", Yields("(1 2 3)")),
                ("`(,@xs)", Yields("(2 3)")),
                ("`,x", Yields("42")),
                ("`(a . ,x)", Yields("(A . 42)")),
                ("`(1 ,@5)", Fails("cannot splice non-list")),
                // defmacro + backquote, the usual combination.
                ("(defmacro swap-args (f a b) `(,f ,b ,a))", Yields("SWAP-ARGS")),
                ("(swap-args - 1 10)", Yields("9")),
            ],
        );
    }

    #[test]
    fn catch_and_throw() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(catch 'tag 1 2 3)", Yields("3")),
                ("(catch 'tag (throw 'tag 99) 'unreached)", Yields("99")),
                // Non-matching tags pass through to an outer catch.
                (
                    "(catch 'outer (catch 'inner (throw 'outer 7)) 'unreached)",
                    Yields("7"),
                ),
                ("(throw 'nobody 1)", Fails("Uncaught throw: tag NOBODY")),
                // Throws cross function boundaries.
                ("(defun deep (n) (if (eq n 0) (throw 'done 'hit) (deep (- n 1))))", Yields("DEEP")),
                ("(catch 'done (deep 100))", Yields("HIT")),
                ("(catch (list 1) 2)", Fails("not a symbol")),
            ],
        );
    }

    #[test]
    fn self_tail_calls_run_in_constant_depth() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                (
                    "(defun count-down (n) (if (eq n 0) 'done (count-down (- n 1))))",
                    Yields("COUNT-DOWN"),
                ),
                ("(count-down 1000000)", Yields("DONE")),
                // Tail positions through if/progn/let bounce as well.
                (
                    "(defun count2 (n) (progn (if (eq n 0) 'done (let ((m (- n 1))) (count2 m)))))",
                    Yields("COUNT2"),
                ),
                ("(count2 100000)", Yields("DONE")),
                // Non-tail recursion of the same magnitude hits the depth
                // limit and reports an error instead of aborting.
                (
                    "(defun sum-to (n) (if (eq n 0) 0 (+ n (sum-to (- n 1)))))",
                    Yields("SUM-TO"),
                ),
                ("(sum-to 1000000)", Fails("maximum evaluation depth")),
                ("(sum-to 100)", Yields("5050")),
            ],
        );
    }

    #[test]
    fn while_loops() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(setq i 0 total 0)", Yields("0")),
                (
                    "(while (< i 5) (setq total (+ total i)) (setq i (+ i 1)))",
                    Yields("NIL"),
                ),
                ("total", Yields("10")),
                ("(while nil (error \"unreached\"))", Yields("NIL")),
            ],
        );
    }

    #[test]
    fn call_protocol_errors() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(no-such-op 1)", Fails("Unbound function: NO-SUCH-OP")),
                ("(setq v 5)", Yields("5")),
                ("(v 1)", Fails("Unbound function: V")),
                ("(1 2 3)", Fails("is not a function")),
                ("(cons 1 2 3)", Fails("CONS expecting 2 args, got 3")),
                ("(cons 1 . 2)", Fails("improper argument list")),
                ("(cond 5)", Fails("cond clause must be a list")),
            ],
        );
    }

    #[test]
    fn evaluation_order_is_left_to_right() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(setq log nil)", Yields("NIL")),
                ("(defun note (x) (setq log (cons x log)) x)", Yields("NOTE")),
                ("(+ (note 1) (note 2))", Yields("3")),
                ("log", Yields("(2 1)")),
            ],
        );
    }

    #[test]
    fn parse_params_rejects_malformed_lists() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(lambda (&rest) 1)", Fails("&rest expects a name")),
                ("(lambda (a &rest b c) 1)", Fails("&rest takes a single name")),
                ("(lambda (a &optional b &optional c) 1)", Fails("misplaced &optional")),
                ("(lambda (1) 1)", Fails("binding name must be a symbol")),
                ("(lambda 5 1)", Fails("bad parameter list")),
            ],
        );
    }

    #[test]
    fn throw_outside_catch_is_reported_not_panicked() {
        let mut lisp = Lisp::bare();
        let err = lisp.eval_str("(throw 'x 1)").unwrap_err();
        match err {
            Error::Throw { tag, value } => {
                assert_eq!(tag.name(), "X");
                assert_eq!(value.to_string(), "1");
            }
            other => panic!("expected a throw, got {other}"),
        }
    }
}
