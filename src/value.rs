//! Runtime values.
//!
//! A single closed sum type covers everything the machine manipulates: the
//! numeric tower, symbols and the three distinguished constants, list
//! structure, callables, and the heap halves of the environment and
//! continuation subsystems. Two further variants, `StackEnv` and `StackCont`,
//! are bookkeeping cells the machine writes into its own stack to link
//! frames together; user code never sees them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::builtins::Builtin;
use crate::cont::HeapContinuation;
use crate::env::{EnvRef, HeapEnv};
use crate::fault::VmError;

// ============================================================================
// Symbols
// ============================================================================

/// An interned name. Equality and hashing go by name, so two symbols built
/// from the same string are the same symbol even across interners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Heap objects
// ============================================================================

/// A mutable pair.
#[derive(Debug)]
pub struct ConsCell {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl ConsCell {
    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }
}

impl Drop for ConsCell {
    // Release the spine one cell at a time so long lists don't recurse.
    fn drop(&mut self) {
        let mut next = self.cdr.replace(Value::Nil);
        while let Value::Cons(cell) = next {
            next = match Rc::try_unwrap(cell) {
                Ok(cell) => cell.cdr.replace(Value::Nil),
                Err(_) => break,
            };
        }
    }
}

/// A procedure: an entry point into the code buffer plus the environment it
/// closes over. The environment is always heap-resident or Nil.
#[derive(Debug)]
pub struct Closure {
    pub env: EnvRef,
    pub ip: usize,
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    True,
    /// Marks a slot that was never initialised; distinct from nil.
    Unbound,
    Fixnum(i64),
    Flonum(f64),
    Symbol(Symbol),
    String(Rc<str>),
    Vector(Rc<RefCell<Vec<Value>>>),
    Cons(Rc<ConsCell>),
    Closure(Rc<Closure>),
    Builtin(Rc<Builtin>),
    Continuation(Rc<HeapContinuation>),
    Environment(Rc<HeapEnv>),
    /// Frame pointer of a stack-resident environment.
    StackEnv(usize),
    /// Frame pointer of a stack-resident continuation.
    StackCont(usize),
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Cons(Rc::new(ConsCell {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    /// Build a proper list from the items, in order.
    pub fn list<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Value::Nil, |tail, item| Value::cons(item, tail))
    }

    pub fn closure(env: EnvRef, ip: usize) -> Value {
        Value::Closure(Rc::new(Closure { env, ip }))
    }

    /// Symbol constructor that folds `t` and `nil` into their constants.
    pub fn symbol(name: &str) -> Value {
        match name {
            "t" => Value::True,
            "nil" => Value::Nil,
            _ => Value::Symbol(Symbol::new(name)),
        }
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(RefCell::new(items)))
    }

    pub fn truth(b: bool) -> Value {
        if b {
            Value::True
        } else {
            Value::Nil
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self, Value::Unbound)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil | Value::True | Value::Symbol(_) => "sym",
            Value::Unbound => "unbound",
            Value::Fixnum(_) => "fixnum",
            Value::Flonum(_) => "flonum",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Cons(_) => "cons",
            Value::Closure(_) => "closure",
            Value::Builtin(_) => "fn",
            Value::Continuation(_) => "continuation",
            Value::Environment(_) => "environment",
            Value::StackEnv(_) | Value::StackCont(_) => "frame",
        }
    }

    /// The `is` predicate.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::True, Value::True) => true,
            (Value::Unbound, Value::Unbound) => true,
            (Value::Fixnum(a), Value::Fixnum(b)) => a == b,
            (Value::Flonum(a), Value::Flonum(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => Rc::ptr_eq(a, b),
            (Value::Cons(a), Value::Cons(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            (Value::Environment(a), Value::Environment(b)) => Rc::ptr_eq(a, b),
            (Value::StackEnv(a), Value::StackEnv(b)) => a == b,
            (Value::StackCont(a), Value::StackCont(b)) => a == b,
            _ => false,
        }
    }

    pub fn car(&self) -> Result<Value, VmError> {
        match self {
            Value::Cons(c) => Ok(c.car()),
            Value::Nil => Ok(Value::Nil),
            other => Err(VmError::type_error("take car of", other.type_name())),
        }
    }

    pub fn cdr(&self) -> Result<Value, VmError> {
        match self {
            Value::Cons(c) => Ok(c.cdr()),
            Value::Nil => Ok(Value::Nil),
            other => Err(VmError::type_error("take cdr of", other.type_name())),
        }
    }

    pub fn scar(&self, v: Value) -> Result<(), VmError> {
        match self {
            Value::Cons(c) => {
                *c.car.borrow_mut() = v;
                Ok(())
            }
            other => Err(VmError::type_error("set car of", other.type_name())),
        }
    }

    pub fn scdr(&self, v: Value) -> Result<(), VmError> {
        match self {
            Value::Cons(c) => {
                *c.cdr.borrow_mut() = v;
                Ok(())
            }
            other => Err(VmError::type_error("set cdr of", other.type_name())),
        }
    }

    /// Collect a proper list into a vector.
    pub fn list_to_vec(&self) -> Result<Vec<Value>, VmError> {
        let mut items = Vec::new();
        let mut cur = self.clone();
        loop {
            match cur {
                Value::Nil => return Ok(items),
                Value::Cons(c) => {
                    items.push(c.car());
                    cur = c.cdr();
                }
                other => return Err(VmError::type_error("traverse improper list ending in", other.type_name())),
            }
        }
    }

    /// Element `index` of a list; the behaviour of a cons applied as a
    /// procedure.
    pub fn nth(&self, index: i64) -> Result<Value, VmError> {
        if index < 0 {
            return Err(VmError::IndexOutOfRange { index });
        }
        let mut cur = self.clone();
        for _ in 0..index {
            cur = match cur {
                Value::Cons(c) => c.cdr(),
                _ => return Err(VmError::IndexOutOfRange { index }),
            };
        }
        match cur {
            Value::Cons(c) => Ok(c.car()),
            _ => Err(VmError::IndexOutOfRange { index }),
        }
    }

    /// Fresh copy of this list's spine with `tail` as the final cdr.
    pub fn splice(&self, tail: Value) -> Result<Value, VmError> {
        let items = self.list_to_vec()?;
        Ok(items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc)))
    }
}

// ============================================================================
// Printing
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::True => write!(f, "t"),
            Value::Unbound => write!(f, "#<unbound>"),
            Value::Fixnum(n) => write!(f, "{}", n),
            Value::Flonum(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Value::Flonum(x) => write!(f, "{}", x),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Vector(items) => {
                write!(f, "#(")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Cons(cell) => {
                write!(f, "({}", cell.car())?;
                let mut rest = cell.cdr();
                loop {
                    match rest {
                        Value::Nil => break,
                        Value::Cons(next) => {
                            write!(f, " {}", next.car())?;
                            rest = next.cdr();
                        }
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Closure(c) => write!(f, "#<closure @{}>", c.ip),
            Value::Builtin(b) => write!(f, "#<builtin {}>", b.name),
            Value::Continuation(_) => write!(f, "#<continuation>"),
            Value::Environment(_) => write!(f, "#<environment>"),
            Value::StackEnv(e) => write!(f, "#<stack-env {}>", e),
            Value::StackCont(c) => write!(f, "#<stack-cont {}>", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_and_nil_symbols_are_constants() {
        assert!(matches!(Value::symbol("t"), Value::True));
        assert!(matches!(Value::symbol("nil"), Value::Nil));
        assert!(matches!(Value::symbol("foo"), Value::Symbol(_)));
    }

    #[test]
    fn dropping_a_long_list() {
        let list = Value::list((0..1_000_000).map(Value::Fixnum).collect::<Vec<_>>());
        drop(list);
    }

    #[test]
    fn dropping_a_shared_tail_keeps_it_alive() {
        let tail = Value::list(vec![Value::Fixnum(2), Value::Fixnum(3)]);
        let head = Value::cons(Value::Fixnum(1), tail.clone());
        drop(head);
        assert_eq!(tail.to_string(), "(2 3)");
    }

    #[test]
    fn is_compares_numbers_by_value() {
        assert!(Value::Fixnum(3).is(&Value::Fixnum(3)));
        assert!(Value::Flonum(2.5).is(&Value::Flonum(2.5)));
        assert!(!Value::Fixnum(2).is(&Value::Flonum(2.0)));
        assert!(!Value::Unbound.is(&Value::Nil));
    }

    #[test]
    fn is_compares_conses_by_identity() {
        let a = Value::cons(Value::Fixnum(1), Value::Nil);
        let b = Value::cons(Value::Fixnum(1), Value::Nil);
        assert!(a.is(&a.clone()));
        assert!(!a.is(&b));
    }

    #[test]
    fn car_of_fixnum_is_a_type_error() {
        let err = Value::Fixnum(1).car().unwrap_err();
        assert_eq!(err.to_string(), "Can't take car of fixnum");
    }

    #[test]
    fn nth_walks_the_list() {
        let l = Value::list(vec![Value::Fixnum(10), Value::Fixnum(20), Value::Fixnum(30)]);
        assert!(matches!(l.nth(2).unwrap(), Value::Fixnum(30)));
        assert_eq!(
            l.nth(3).unwrap_err().to_string(),
            "index 3 too large for list"
        );
    }

    #[test]
    fn splice_copies_the_spine() {
        let head = Value::list(vec![Value::Fixnum(1), Value::Fixnum(2)]);
        let joined = head.splice(Value::list(vec![Value::Fixnum(3)])).unwrap();
        assert_eq!(joined.to_string(), "(1 2 3)");
        assert_eq!(head.to_string(), "(1 2)");
    }

    #[test]
    fn display_dotted_and_floats() {
        let v = Value::cons(Value::Fixnum(1), Value::Fixnum(2));
        assert_eq!(v.to_string(), "(1 . 2)");
        assert_eq!(Value::Flonum(3.0).to_string(), "3.0");
        assert_eq!(Value::string("hi").to_string(), "\"hi\"");
    }
}
