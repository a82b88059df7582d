//! Procedures implemented in Rust.

use std::fmt;
use std::rc::Rc;

use crate::apply::Arity;
use crate::arith;
use crate::fault::VmError;
use crate::value::Value;
use crate::vm::Vm;

/// What a builtin hands back to the calling convention.
#[derive(Debug)]
pub enum Outcome {
    /// Place the value in the accumulator and return to the caller.
    Return(Value),
    /// Apply the callee to the arguments in place of the builtin's return,
    /// without growing the host stack.
    TailCall(Value, Vec<Value>),
}

impl From<Value> for Outcome {
    fn from(v: Value) -> Self {
        Outcome::Return(v)
    }
}

/// Builtins read their arguments from the frame built for them:
/// `vm.arg(i)` is slot `i`.
pub type NativeFn = fn(&mut Vm) -> Result<Outcome, VmError>;

pub struct Builtin {
    pub name: String,
    pub arity: Arity,
    pub func: NativeFn,
}

impl Builtin {
    pub fn new(name: &str, arity: Arity, func: NativeFn) -> Value {
        Value::Builtin(Rc::new(Builtin {
            name: name.to_string(),
            arity,
            func,
        }))
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Vm {
    /// Argument `i` of the running builtin.
    pub fn arg(&self, i: usize) -> Result<Value, VmError> {
        self.getenv(0, i)
    }

    /// Bind the standard builtins as globals.
    pub fn install_builtins(&mut self) {
        let table: [(&str, Arity, NativeFn); 12] = [
            ("ccc", Arity::fixed(1), ccc),
            ("+", Arity::variadic(0), plus),
            ("-", Arity::variadic(1), minus),
            ("*", Arity::variadic(0), times),
            ("/", Arity::variadic(1), divide),
            ("list", Arity::variadic(0), list),
            ("car", Arity::fixed(1), car),
            ("cdr", Arity::fixed(1), cdr),
            ("cons", Arity::fixed(2), cons),
            ("is", Arity::fixed(2), is),
            ("apply", Arity::variadic(1), apply),
            ("map", Arity::fixed(2), map),
        ];
        for (name, arity, func) in table {
            self.define(name, Builtin::new(name, arity, func));
        }
    }
}

// ============================================================================
// Control
// ============================================================================

/// Call with current continuation.
fn ccc(vm: &mut Vm) -> Result<Outcome, VmError> {
    let proc = vm.arg(0)?;
    let k = vm.capture_continuation()?;
    Ok(Outcome::TailCall(proc, vec![Value::Continuation(k)]))
}

fn apply(vm: &mut Vm) -> Result<Outcome, VmError> {
    let f = vm.arg(0)?;
    let mut rest = vm.arg(1)?.list_to_vec()?;
    let spread = match rest.pop() {
        Some(last) => last.list_to_vec()?,
        None => Vec::new(),
    };
    rest.extend(spread);
    Ok(Outcome::TailCall(f, rest))
}

fn map(vm: &mut Vm) -> Result<Outcome, VmError> {
    let f = vm.arg(0)?;
    let items = vm.arg(1)?.list_to_vec()?;
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(vm.call(f.clone(), &[item])?);
    }
    Ok(Value::list(results).into())
}

// ============================================================================
// Arithmetic
// ============================================================================

fn fold(
    vm: &Vm,
    init: Value,
    op: fn(&Value, &Value) -> Result<Value, VmError>,
) -> Result<Value, VmError> {
    vm.arg(0)?
        .list_to_vec()?
        .iter()
        .try_fold(init, |acc, v| op(&acc, v))
}

fn plus(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(fold(vm, Value::Fixnum(0), arith::add)?.into())
}

fn times(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(fold(vm, Value::Fixnum(1), arith::mul)?.into())
}

fn minus(vm: &mut Vm) -> Result<Outcome, VmError> {
    let first = vm.arg(0)?;
    let rest = vm.arg(1)?.list_to_vec()?;
    if rest.is_empty() {
        return Ok(arith::negate(&first)?.into());
    }
    let r = rest.iter().try_fold(first, |acc, v| arith::sub(&acc, v))?;
    Ok(r.into())
}

fn divide(vm: &mut Vm) -> Result<Outcome, VmError> {
    let first = vm.arg(0)?;
    let rest = vm.arg(1)?.list_to_vec()?;
    if rest.is_empty() {
        return Ok(arith::div(&Value::Fixnum(1), &first)?.into());
    }
    let r = rest.iter().try_fold(first, |acc, v| arith::div(&acc, v))?;
    Ok(r.into())
}

// ============================================================================
// Lists
// ============================================================================

fn list(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(vm.arg(0)?.into())
}

fn car(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(vm.arg(0)?.car()?.into())
}

fn cdr(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(vm.arg(0)?.cdr()?.into())
}

fn cons(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(Value::cons(vm.arg(0)?, vm.arg(1)?).into())
}

fn is(vm: &mut Vm) -> Result<Outcome, VmError> {
    Ok(Value::truth(vm.arg(0)?.is(&vm.arg(1)?)).into())
}
