//! Calling convention.
//!
//! The caller pushes `argc` arguments and leaves the callee in the
//! accumulator. Applying a closure only transfers control: the callee's own
//! `env`/`envr` instruction builds its frame. Builtins, lists and
//! continuations have their frames built here.
//!
//! Host code re-enters the machine through [`Vm::call`], which runs the same
//! dispatch loop recursively until the callee returns to a marker
//! continuation.

use std::rc::Rc;

use tracing::debug;

use crate::builtins::Outcome;
use crate::cont::{ContRef, HeapContinuation};
use crate::fault::VmError;
use crate::value::Value;
use crate::vm::Vm;

/// Parameter shape of a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub required: usize,
    pub optional: usize,
    /// Extra slots the callee uses for destructured or local bindings.
    pub extra: usize,
    /// Collect arguments past `required + optional` into a list.
    pub variadic: bool,
}

impl Arity {
    pub const fn fixed(required: usize) -> Self {
        Arity {
            required,
            optional: 0,
            extra: 0,
            variadic: false,
        }
    }

    pub const fn variadic(required: usize) -> Self {
        Arity {
            required,
            optional: 0,
            extra: 0,
            variadic: true,
        }
    }

    pub const fn with_optional(mut self, optional: usize) -> Self {
        self.optional = optional;
        self
    }

    pub const fn with_extra(mut self, extra: usize) -> Self {
        self.extra = extra;
        self
    }

    /// Number of frame slots a call with this arity ends up with.
    pub fn slots(&self) -> usize {
        self.required + self.optional + self.extra + usize::from(self.variadic)
    }
}

/// A dispatch loop on the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Loop {
    /// The loop driven by [`Vm::run`].
    Run,
    /// The nested loop of the host call with this id.
    Call(u64),
}

/// Host calls currently waiting on a nested dispatch loop.
#[derive(Debug, Default)]
pub(crate) struct NativeCalls {
    active: Vec<u64>,
    next: u64,
    /// Set when a native-return continuation is restored.
    returned: Option<u64>,
    /// Set when a continuation escapes past the innermost host call; names
    /// the loop that owns the continuation.
    pub(crate) escape: Option<Loop>,
    /// True while [`Vm::run`] owns the dispatch loop.
    pub(crate) dispatching: bool,
}

impl NativeCalls {
    fn enter(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        self.active.push(id);
        id
    }

    fn leave(&mut self, id: u64) {
        if self.active.last() == Some(&id) {
            self.active.pop();
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.active.len()
    }

    /// Note a jump into `k`. When `k` does not return through the innermost
    /// host call, the loop it belongs to has to take over; without such a
    /// loop the current one keeps running.
    fn enter_continuation(&mut self, k: &HeapContinuation) {
        let innermost = self.active.last().copied();
        if k.host_call() == innermost {
            return;
        }
        self.escape = match k.host_call() {
            None if self.dispatching => Some(Loop::Run),
            Some(id) if self.active.contains(&id) => Some(Loop::Call(id)),
            _ => return,
        };
        debug!(target_loop = ?self.escape, "escaping nested dispatch");
    }
}

impl Vm {
    pub(crate) fn argcheck(&self, min: usize, max: usize) -> Result<(), VmError> {
        if self.argc < min {
            return Err(VmError::TooFewArguments {
                required: min,
                passed: self.argc,
            });
        }
        if self.argc > max {
            return Err(VmError::TooManyArguments {
                allowed: max,
                passed: self.argc,
            });
        }
        Ok(())
    }

    /// Check `argc` against the arity and build the callee frame. Slots are
    /// laid out as required, optional, extra and, for variadic callees, the
    /// rest list last.
    pub fn build_frame(&mut self, arity: Arity) -> Result<(), VmError> {
        let argc = self.argc;
        let fixed = arity.required + arity.optional;
        if !arity.variadic {
            self.argcheck(arity.required, fixed)?;
            return self.mkenv(argc, fixed - argc + arity.extra);
        }

        if argc < arity.required {
            return Err(VmError::TooFewArguments {
                required: arity.required,
                passed: argc,
            });
        }
        let mut rest = Value::Nil;
        for _ in fixed..argc {
            rest = Value::cons(self.pop()?, rest);
        }
        let supplied = argc.min(fixed);
        self.mkenv(supplied, fixed - supplied + arity.extra + 1)?;
        self.setenv(0, fixed + arity.extra, rest)
    }

    /// Apply the accumulator to the `argc` values on top of the stack.
    pub fn apply(&mut self) -> Result<(), VmError> {
        let mut callee = self.acc.clone();
        loop {
            match &callee {
                Value::Closure(c) => {
                    self.ip = c.ip;
                    self.env = c.env.clone();
                    return Ok(());
                }
                Value::Builtin(b) => {
                    let b = Rc::clone(b);
                    self.build_frame(b.arity)?;
                    match (b.func)(self)? {
                        Outcome::Return(v) => {
                            self.acc = v;
                            return self.restorecont();
                        }
                        Outcome::TailCall(next, args) => {
                            self.argc = args.len();
                            for arg in args {
                                self.push(arg)?;
                            }
                            self.acc = next.clone();
                            callee = next;
                        }
                    }
                }
                Value::Continuation(k) => {
                    let k = Rc::clone(k);
                    self.argcheck(1, 1)?;
                    self.acc = self.pop()?;
                    self.native.enter_continuation(&k);
                    self.cont = ContRef::Heap(k);
                    return self.restorecont();
                }
                Value::Cons(_) => {
                    self.build_frame(Arity::fixed(1))?;
                    let index = match self.getenv(0, 0)? {
                        Value::Fixnum(i) => i,
                        other => {
                            return Err(VmError::WrongArgumentType {
                                op: "list index",
                                expected: "fixnum",
                                type_name: other.type_name(),
                            })
                        }
                    };
                    self.acc = callee.nth(index)?;
                    return self.restorecont();
                }
                other => return Err(VmError::type_error("apply", other.type_name())),
            }
        }
    }

    /// Call `callee` with `args` from host code and wait for its result.
    ///
    /// Everything the host frame depends on is promoted to the heap first,
    /// then a marker continuation is installed and the dispatch loop runs
    /// until the callee returns through it.
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Result<Value, VmError> {
        let outermost = self.native.depth() == 0 && !self.native.dispatching;
        if outermost {
            self.runnable = true;
        }
        let saved_ip = self.ip;
        let saved_argc = self.argc;
        self.heapenv()?;
        let cont = self.cont.clone();
        self.cont = self.promote_cont(&cont)?;

        let id = self.native.enter();
        debug!(id, depth = self.native.depth(), "entering nested dispatch");
        let marker = HeapContinuation::native(id, self.cont.clone(), self.env.clone());
        self.cont = ContRef::Heap(Rc::new(marker));
        let entry_sp = self.sp;

        let outcome = self.enter_nested(id, callee, args);
        self.native.leave(id);
        match outcome {
            Ok(()) => {}
            Err(VmError::Unwound) if outermost && !self.runnable => {
                self.native.returned = None;
                return Ok(self.acc.clone());
            }
            Err(e) if outermost => return Err(self.fault(e)),
            Err(e) => return Err(e),
        }

        self.ip = saved_ip;
        self.argc = saved_argc;
        self.sp = entry_sp.min(self.sp);
        self.bp = self.sp;
        Ok(self.acc.clone())
    }

    fn enter_nested(&mut self, id: u64, callee: Value, args: &[Value]) -> Result<(), VmError> {
        self.argc = args.len();
        for arg in args {
            self.push(arg.clone())?;
        }
        self.acc = callee;
        match self.apply() {
            Ok(()) | Err(VmError::Unwound) => {}
            Err(e) => return Err(e),
        }
        self.run_nested(id)
    }

    fn run_nested(&mut self, id: u64) -> Result<(), VmError> {
        loop {
            match self.native.escape {
                Some(Loop::Call(owner)) if owner == id => self.native.escape = None,
                Some(_) => return Err(VmError::Unwound),
                None => {}
            }
            if self.native.returned == Some(id) {
                self.native.returned = None;
                return Ok(());
            }
            if self.native.returned.is_some() || !self.runnable {
                return Err(VmError::Unwound);
            }
            match self.step() {
                Ok(()) | Err(VmError::Unwound) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Restore of a native-return continuation.
    pub(crate) fn return_to_native(
        &mut self,
        id: u64,
        k: &Rc<HeapContinuation>,
    ) -> Result<(), VmError> {
        if !self.native.active.contains(&id) {
            return Err(VmError::InvalidContinuation);
        }
        self.env = k.env().clone();
        self.cont = k.prev().clone();
        self.native.returned = Some(id);
        Ok(())
    }
}
