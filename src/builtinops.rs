//! Built-in operations registry.
//!
//! Operations are defined once in [`BUILTIN_OPS`] and installed into the
//! global function slots at startup. Two shapes exist, mirroring the
//! evaluator's argument policy:
//!
//! - **Plain**: arguments are evaluated before the call (e.g. `+`, `cons`,
//!   `eq`). Signature `fn(&[Value], &mut Environment, usize)`.
//! - **Form**: the operands arrive unevaluated and the implementation may
//!   answer with a tail bounce (e.g. `if`, `let`, `defun`). These live in
//!   the evaluator and are only registered here.
//!
//! ## Error handling
//!
//! - Arithmetic is checked: overflow, division by zero and modulo by zero
//!   are reported as errors, never wrapped or propagated as panics.
//! - Type mismatches carry the offending value's printed form.
//! - Arity is validated by the call protocol before any operation runs.

use std::rc::Rc;

use crate::ast::{list_from_slice, Arity, FormFn, Function, NativeFn, Value};
use crate::env::Environment;
use crate::evaluator::{self, eval_value};
use crate::symbols::SymbolTable;
use crate::Error;

/// The two native implementation shapes.
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Ordinary function over evaluated arguments
    Plain(NativeFn),
    /// Special form over raw operands
    Form(FormFn),
}

/// One registry row: surface name, arity contract, implementation.
pub struct BuiltinOp {
    pub name: &'static str,
    pub arity: Arity,
    pub kind: OpKind,
}

/// The complete builtin set, installed by [`install`].
pub static BUILTIN_OPS: &[BuiltinOp] = &[
    // arithmetic
    BuiltinOp { name: "+", arity: Arity::Exact(2), kind: OpKind::Plain(op_add) },
    BuiltinOp { name: "-", arity: Arity::Exact(2), kind: OpKind::Plain(op_sub) },
    BuiltinOp { name: "*", arity: Arity::Exact(2), kind: OpKind::Plain(op_mul) },
    BuiltinOp { name: "/", arity: Arity::Exact(2), kind: OpKind::Plain(op_div) },
    BuiltinOp { name: "%", arity: Arity::Exact(2), kind: OpKind::Plain(op_rem) },
    // comparisons
    BuiltinOp { name: "<", arity: Arity::Exact(2), kind: OpKind::Plain(op_lt) },
    BuiltinOp { name: ">", arity: Arity::Exact(2), kind: OpKind::Plain(op_gt) },
    BuiltinOp { name: "<=", arity: Arity::Exact(2), kind: OpKind::Plain(op_le) },
    BuiltinOp { name: ">=", arity: Arity::Exact(2), kind: OpKind::Plain(op_ge) },
    // equality
    BuiltinOp { name: "eq", arity: Arity::Exact(2), kind: OpKind::Plain(op_eq) },
    BuiltinOp { name: "equal", arity: Arity::Exact(2), kind: OpKind::Plain(op_equal) },
    // pairs and lists
    BuiltinOp { name: "cons", arity: Arity::Exact(2), kind: OpKind::Plain(op_cons) },
    BuiltinOp { name: "car", arity: Arity::Exact(1), kind: OpKind::Plain(op_car) },
    BuiltinOp { name: "cdr", arity: Arity::Exact(1), kind: OpKind::Plain(op_cdr) },
    BuiltinOp { name: "rplaca", arity: Arity::Exact(2), kind: OpKind::Plain(op_rplaca) },
    BuiltinOp { name: "rplacd", arity: Arity::Exact(2), kind: OpKind::Plain(op_rplacd) },
    BuiltinOp { name: "list", arity: Arity::AtLeast(0), kind: OpKind::Plain(op_list) },
    // predicates
    BuiltinOp { name: "consp", arity: Arity::Exact(1), kind: OpKind::Plain(op_consp) },
    BuiltinOp { name: "numberp", arity: Arity::Exact(1), kind: OpKind::Plain(op_numberp) },
    BuiltinOp { name: "stringp", arity: Arity::Exact(1), kind: OpKind::Plain(op_stringp) },
    BuiltinOp { name: "symbolp", arity: Arity::Exact(1), kind: OpKind::Plain(op_symbolp) },
    BuiltinOp { name: "functionp", arity: Arity::Exact(1), kind: OpKind::Plain(op_functionp) },
    BuiltinOp { name: "atom", arity: Arity::Exact(1), kind: OpKind::Plain(op_atom) },
    BuiltinOp { name: "null", arity: Arity::Exact(1), kind: OpKind::Plain(op_null) },
    BuiltinOp { name: "not", arity: Arity::Exact(1), kind: OpKind::Plain(op_null) },
    // application and evaluation
    BuiltinOp { name: "eval", arity: Arity::Exact(1), kind: OpKind::Plain(op_eval) },
    BuiltinOp { name: "apply", arity: Arity::Exact(2), kind: OpKind::Plain(op_apply) },
    BuiltinOp { name: "funcall", arity: Arity::AtLeast(1), kind: OpKind::Plain(op_funcall) },
    // signals
    BuiltinOp { name: "throw", arity: Arity::Exact(2), kind: OpKind::Plain(op_throw) },
    BuiltinOp { name: "error", arity: Arity::AtLeast(1), kind: OpKind::Plain(op_error) },
    // misc
    BuiltinOp { name: "print", arity: Arity::Exact(1), kind: OpKind::Plain(op_print) },
    BuiltinOp { name: "funset", arity: Arity::Exact(2), kind: OpKind::Plain(op_funset) },
    BuiltinOp { name: "gensym", arity: Arity::Exact(0), kind: OpKind::Plain(op_gensym) },
    // special forms (implementations in the evaluator)
    BuiltinOp { name: "quote", arity: Arity::Exact(1), kind: OpKind::Form(evaluator::form_quote) },
    BuiltinOp { name: "if", arity: Arity::Range(2, 3), kind: OpKind::Form(evaluator::form_if) },
    BuiltinOp { name: "cond", arity: Arity::AtLeast(0), kind: OpKind::Form(evaluator::form_cond) },
    BuiltinOp { name: "while", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_while) },
    BuiltinOp { name: "and", arity: Arity::AtLeast(0), kind: OpKind::Form(evaluator::form_and) },
    BuiltinOp { name: "or", arity: Arity::AtLeast(0), kind: OpKind::Form(evaluator::form_or) },
    BuiltinOp { name: "progn", arity: Arity::AtLeast(0), kind: OpKind::Form(evaluator::form_progn) },
    BuiltinOp { name: "setq", arity: Arity::AtLeast(0), kind: OpKind::Form(evaluator::form_setq) },
    BuiltinOp { name: "let", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_let) },
    BuiltinOp { name: "let*", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_let_star) },
    BuiltinOp { name: "flet", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_flet) },
    BuiltinOp { name: "lambda", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_lambda) },
    BuiltinOp { name: "fn", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_fn) },
    BuiltinOp { name: "nlambda", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_nlambda) },
    BuiltinOp { name: "macro", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_macro) },
    BuiltinOp { name: "defun", arity: Arity::AtLeast(2), kind: OpKind::Form(evaluator::form_defun) },
    BuiltinOp { name: "defmacro", arity: Arity::AtLeast(2), kind: OpKind::Form(evaluator::form_defmacro) },
    BuiltinOp { name: "function", arity: Arity::Exact(1), kind: OpKind::Form(evaluator::form_function) },
    BuiltinOp { name: "catch", arity: Arity::AtLeast(1), kind: OpKind::Form(evaluator::form_catch) },
    BuiltinOp { name: "unclosure", arity: Arity::Exact(1), kind: OpKind::Form(evaluator::form_unclosure) },
    BuiltinOp { name: "backquote", arity: Arity::Exact(1), kind: OpKind::Form(evaluator::form_backquote) },
];

/// Install every builtin into the global function slots of `symbols`.
pub fn install(symbols: &SymbolTable) {
    for op in BUILTIN_OPS {
        let f = match op.kind {
            OpKind::Plain(fun) => Function::native(&op.name.to_uppercase(), op.arity, fun),
            OpKind::Form(fun) => Function::form(&op.name.to_uppercase(), op.arity, fun),
        };
        symbols.intern(op.name).set_global_function(Value::Function(f));
    }
}

/// Register a host function under `name`. This is the embedding API: the
/// host supplies the canonical native signature and an arity contract.
pub fn define(symbols: &SymbolTable, name: &str, arity: Arity, special: bool, fun: NativeFn) {
    let f = Rc::new(Function {
        name: symbols.intern(name).name().to_string(),
        kind: crate::ast::FnKind::Builtin,
        special,
        arity,
        imp: crate::ast::FnImpl::Native(fun),
    });
    symbols.intern(name).set_global_function(Value::Function(f));
}

fn op_add(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let (a, b) = (args[0].as_number()?, args[1].as_number()?);
    a.checked_add(b)
        .map(Value::Number)
        .ok_or_else(|| Error::Eval(format!("integer overflow in ({a} + {b})")))
}

fn op_sub(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let (a, b) = (args[0].as_number()?, args[1].as_number()?);
    a.checked_sub(b)
        .map(Value::Number)
        .ok_or_else(|| Error::Eval(format!("integer overflow in ({a} - {b})")))
}

fn op_mul(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let (a, b) = (args[0].as_number()?, args[1].as_number()?);
    a.checked_mul(b)
        .map(Value::Number)
        .ok_or_else(|| Error::Eval(format!("integer overflow in ({a} * {b})")))
}

fn op_div(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let (a, b) = (args[0].as_number()?, args[1].as_number()?);
    if b == 0 {
        return Err(Error::Eval(format!("division by zero in ({a} / 0)")));
    }
    a.checked_div(b)
        .map(Value::Number)
        .ok_or_else(|| Error::Eval(format!("integer overflow in ({a} / {b})")))
}

fn op_rem(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let (a, b) = (args[0].as_number()?, args[1].as_number()?);
    if b == 0 {
        return Err(Error::Eval(format!("modulo by zero in ({a} % 0)")));
    }
    a.checked_rem(b)
        .map(Value::Number)
        .ok_or_else(|| Error::Eval(format!("integer overflow in ({a} % {b})")))
}

fn op_lt(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].as_number()? < args[1].as_number()?))
}

fn op_gt(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].as_number()? > args[1].as_number()?))
}

fn op_le(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].as_number()? <= args[1].as_number()?))
}

fn op_ge(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].as_number()? >= args[1].as_number()?))
}

fn op_eq(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].eq_value(&args[1])))
}

fn op_equal(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].equal_value(&args[1])))
}

fn op_cons(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(Value::pair(args[0].clone(), args[1].clone()))
}

fn op_car(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(args[0].as_pair()?.car())
}

fn op_cdr(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(args[0].as_pair()?.cdr())
}

// rplaca/rplacd return the stored value, matching the classic contract.
fn op_rplaca(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    args[0].as_pair()?.set_car(args[1].clone());
    Ok(args[1].clone())
}

fn op_rplacd(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    args[0].as_pair()?.set_cdr(args[1].clone());
    Ok(args[1].clone())
}

fn op_list(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(list_from_slice(args, env.nil()))
}

fn op_consp(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(matches!(args[0], Value::Pair(_))))
}

fn op_numberp(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(matches!(args[0], Value::Number(_))))
}

fn op_stringp(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(matches!(args[0], Value::Str(_))))
}

fn op_symbolp(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(matches!(args[0], Value::Symbol(_))))
}

fn op_functionp(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(matches!(args[0], Value::Function(_))))
}

fn op_atom(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].is_atom()))
}

fn op_null(args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(env.bool(args[0].is_nil()))
}

fn op_eval(args: &[Value], env: &mut Environment, depth: usize) -> Result<Value, Error> {
    eval_value(&args[0], env, depth + 1)
}

/// Resolve a callable argument: a function object, or a symbol looked up
/// through the function namespace.
fn as_callable(v: &Value, env: &Environment) -> Result<Rc<Function>, Error> {
    match v {
        Value::Function(f) => Ok(f.clone()),
        Value::Symbol(sym) => match env.lookup_function(sym) {
            Some(Value::Function(f)) => Ok(f),
            Some(other) => Err(Error::Type(format!(
                "'{}' names the non-function value '{other}'",
                sym.name()
            ))),
            None => Err(Error::UnboundFunction(sym.name().to_string())),
        },
        other => Err(Error::Type(format!("'{other}' is not a function"))),
    }
}

fn op_apply(args: &[Value], env: &mut Environment, depth: usize) -> Result<Value, Error> {
    let f = as_callable(&args[0], env)?;
    let call_args: Vec<Value> = args[1].list_iter().collect();
    evaluator::apply(&f, &call_args, env, depth + 1)
}

fn op_funcall(args: &[Value], env: &mut Environment, depth: usize) -> Result<Value, Error> {
    let f = as_callable(&args[0], env)?;
    evaluator::apply(&f, &args[1..], env, depth + 1)
}

fn op_throw(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let tag = args[0].as_symbol()?.clone();
    Err(Error::Throw {
        tag,
        value: args[1].clone(),
    })
}

fn op_error(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let msg = args
        .iter()
        .map(|v| match v {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    Err(Error::Eval(msg))
}

fn op_print(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    println!("{}", args[0]);
    Ok(args[0].clone())
}

fn op_funset(args: &[Value], _env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    let name = args[0].as_symbol()?.clone();
    args[1].as_function()?;
    name.set_global_function(args[1].clone());
    Ok(Value::Symbol(name))
}

fn op_gensym(_args: &[Value], env: &mut Environment, _depth: usize) -> Result<Value, Error> {
    Ok(Value::Symbol(env.symbols().gensym()))
}

#[cfg(test)]
mod tests {
    use crate::interp::Lisp;

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
    fn arithmetic_is_checked() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(+ 1 2)", Yields("3")),
                ("(- 1 2)", Yields("-1")),
                ("(* 6 7)", Yields("42")),
                ("(/ 7 2)", Yields("3")),
                ("(% 7 2)", Yields("1")),
                ("(/ 1 0)", Fails("division by zero")),
                ("(% 1 0)", Fails("modulo by zero")),
                ("(+ 9223372036854775807 1)", Fails("integer overflow")),
                ("(* 9223372036854775807 2)", Fails("integer overflow")),
                ("(+ 1 'a)", Fails("'A' is not a number")),
                ("(+ 1 \"2\")", Fails("is not a number")),
            ],
        );
    }

    #[test]
    fn comparisons_return_canonical_truth() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(< 1 2)", Yields("T")),
                ("(< 2 1)", Yields("NIL")),
                ("(> 2 1)", Yields("T")),
                ("(<= 2 2)", Yields("T")),
                ("(>= 1 2)", Yields("NIL")),
                ("(< 'a 1)", Fails("is not a number")),
            ],
        );
    }

    #[test]
    fn eq_vs_equal() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(eq 'a 'a)", Yields("T")),
                ("(eq 'a 'b)", Yields("NIL")),
                ("(eq 1 1)", Yields("T")),
                ("(eq \"s\" \"s\")", Yields("T")),
                ("(eq '(1) '(1))", Yields("NIL")),
                ("(equal '(1 (2 3)) '(1 (2 3)))", Yields("T")),
                ("(equal '(1 2) '(1 3))", Yields("NIL")),
                ("(setq p '(1 2))", Yields("(1 2)")),
                ("(eq p p)", Yields("T")),
            ],
        );
    }

    #[test]
    fn pair_primitives_and_mutation() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(cons 1 2)", Yields("(1 . 2)")),
                ("(car (cons 1 2))", Yields("1")),
                ("(cdr (cons 1 2))", Yields("2")),
                ("(car '(1 2 3))", Yields("1")),
                ("(cdr '(1 2 3))", Yields("(2 3)")),
                ("(car nil)", Fails("'NIL' is not a pair")),
                ("(cdr 5)", Fails("'5' is not a pair")),
                ("(list 1 2 3)", Yields("(1 2 3)")),
                ("(list)", Yields("NIL")),
                // Destructive update through a shared cell.
                ("(setq xs '(1 2 3))", Yields("(1 2 3)")),
                ("(setq ys xs)", Yields("(1 2 3)")),
                ("(rplaca xs 9)", Yields("9")),
                ("ys", Yields("(9 2 3)")),
                ("(rplacd (cdr xs) nil)", Yields("NIL")),
                ("ys", Yields("(9 2)")),
                ("(rplaca 5 1)", Fails("'5' is not a pair")),
            ],
        );
    }

    #[test]
    fn predicates() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(consp '(1))", Yields("T")),
                ("(consp nil)", Yields("NIL")),
                ("(numberp 1)", Yields("T")),
                ("(numberp 'a)", Yields("NIL")),
                ("(stringp \"s\")", Yields("T")),
                ("(symbolp 'a)", Yields("T")),
                ("(symbolp nil)", Yields("T")),
                ("(symbolp 1)", Yields("NIL")),
                ("(functionp (lambda (x) x))", Yields("T")),
                ("(functionp 'car)", Yields("NIL")),
                ("(atom 1)", Yields("T")),
                ("(atom '(1))", Yields("NIL")),
                ("(atom nil)", Yields("T")),
                ("(null nil)", Yields("T")),
                ("(null '(1))", Yields("NIL")),
                ("(not nil)", Yields("T")),
                ("(not 5)", Yields("NIL")),
            ],
        );
    }

    #[test]
    fn eval_apply_funcall() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(eval '(+ 1 2))", Yields("3")),
                ("(eval ''x)", Yields("X")),
                ("(apply (function +) '(1 2))", Yields("3")),
                ("(apply '+ '(20 22))", Yields("42")),
                ("(funcall (lambda (x y) (* x y)) 6 7)", Yields("42")),
                ("(funcall 'cons 1 nil)", Yields("(1)")),
                ("(apply 'cons '(1))", Fails("CONS expecting 2 args, got 1")),
                ("(funcall 'nosuch)", Fails("Unbound function: NOSUCH")),
                ("(funcall 5)", Fails("'5' is not a function")),
            ],
        );
    }

    #[test]
    fn error_and_funset_and_gensym() {
        let mut lisp = Lisp::bare();
        run_table(
            &mut lisp,
            &[
                ("(error \"boom\")", Fails("boom")),
                ("(error \"bad value:\" 42)", Fails("bad value: 42")),
                ("(funset 'double (lambda (x) (* 2 x)))", Yields("DOUBLE")),
                ("(double 21)", Yields("42")),
                ("(funset 'double 5)", Fails("'5' is not a function")),
                ("(eq (gensym) (gensym))", Yields("NIL")),
                ("(symbolp (gensym))", Yields("T")),
            ],
        );
    }
}
