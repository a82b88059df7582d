//! Numeric tower: Fixnum and Flonum.
//!
//! Two fixnums stay exact and wrap on overflow. Any flonum operand makes the
//! whole operation inexact.

use crate::fault::VmError;
use crate::value::Value;

enum Pair {
    Exact(i64, i64),
    Inexact(f64, f64),
}

fn coerce(op: &'static str, a: &Value, b: &Value) -> Result<Pair, VmError> {
    match (a, b) {
        (Value::Fixnum(x), Value::Fixnum(y)) => Ok(Pair::Exact(*x, *y)),
        (Value::Fixnum(x), Value::Flonum(y)) => Ok(Pair::Inexact(*x as f64, *y)),
        (Value::Flonum(x), Value::Fixnum(y)) => Ok(Pair::Inexact(*x, *y as f64)),
        (Value::Flonum(x), Value::Flonum(y)) => Ok(Pair::Inexact(*x, *y)),
        (Value::Fixnum(_) | Value::Flonum(_), other) | (other, _) => {
            Err(VmError::type_error(op, other.type_name()))
        }
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value, VmError> {
    Ok(match coerce("add", a, b)? {
        Pair::Exact(x, y) => Value::Fixnum(x.wrapping_add(y)),
        Pair::Inexact(x, y) => Value::Flonum(x + y),
    })
}

pub fn negate(a: &Value) -> Result<Value, VmError> {
    match a {
        Value::Fixnum(x) => Ok(Value::Fixnum(x.wrapping_neg())),
        Value::Flonum(x) => Ok(Value::Flonum(-x)),
        other => Err(VmError::type_error("negate", other.type_name())),
    }
}

/// `a - b`, defined as `a + (-b)`.
pub fn sub(a: &Value, b: &Value) -> Result<Value, VmError> {
    add(a, &negate(b)?)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, VmError> {
    Ok(match coerce("multiply", a, b)? {
        Pair::Exact(x, y) => Value::Fixnum(x.wrapping_mul(y)),
        Pair::Inexact(x, y) => Value::Flonum(x * y),
    })
}

/// Fixnum division truncates toward zero; a zero fixnum divisor faults.
pub fn div(a: &Value, b: &Value) -> Result<Value, VmError> {
    Ok(match coerce("divide", a, b)? {
        Pair::Exact(_, 0) => return Err(VmError::DivisionByZero),
        Pair::Exact(x, y) => Value::Fixnum(x.wrapping_div(y)),
        Pair::Inexact(x, y) => Value::Flonum(x / y),
    })
}
