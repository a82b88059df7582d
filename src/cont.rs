//! Continuations.
//!
//! A stack continuation is just a frame pointer `c` with four cells below it:
//!
//! ```text
//! stack[saved_bp .. c-4]   caller values that must survive the call
//! stack[c - 4]             resumption ip
//! stack[c - 3]             saved bp
//! stack[c - 2]             saved env
//! stack[c - 1]             previous continuation
//! ```
//!
//! A [`HeapContinuation`] is the owned snapshot of the same thing. Returning
//! to one copies the saved values back onto the stack and resumes as if the
//! continuation had been on the stack all along.

use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::env::EnvRef;
use crate::fault::VmError;
use crate::value::Value;
use crate::vm::Vm;

/// Where a continuation lives.
#[derive(Debug, Clone)]
pub enum ContRef {
    /// No caller: returning halts the machine.
    Nil,
    Stack(usize),
    Heap(Rc<HeapContinuation>),
}

impl ContRef {
    pub fn is_nil(&self) -> bool {
        matches!(self, ContRef::Nil)
    }

    pub fn to_value(&self) -> Value {
        match self {
            ContRef::Nil => Value::Nil,
            ContRef::Stack(c) => Value::StackCont(*c),
            ContRef::Heap(k) => Value::Continuation(k.clone()),
        }
    }

    pub fn from_value(v: &Value) -> Result<ContRef, VmError> {
        match v {
            Value::Nil => Ok(ContRef::Nil),
            Value::StackCont(c) => Ok(ContRef::Stack(*c)),
            Value::Continuation(k) => Ok(ContRef::Heap(k.clone())),
            _ => Err(VmError::InvalidContinuation),
        }
    }
}

/// What restoring a heap continuation does once its values are back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Continue executing bytecode at this ip.
    Code(usize),
    /// Hand the accumulator back to the host call with this id.
    Native(u64),
    /// Stop the machine; captured when there was no caller.
    Halt,
}

#[derive(Debug)]
pub struct HeapContinuation {
    saved: Vec<Value>,
    prev: ContRef,
    env: EnvRef,
    resume: Resume,
    /// Innermost host call whose marker lies on this chain.
    host_call: Option<u64>,
}

fn host_call_of(prev: &ContRef) -> Option<u64> {
    match prev {
        ContRef::Heap(k) => k.host_call,
        _ => None,
    }
}

impl Drop for HeapContinuation {
    fn drop(&mut self) {
        let mut next = mem::replace(&mut self.prev, ContRef::Nil);
        while let ContRef::Heap(k) = next {
            next = match Rc::try_unwrap(k) {
                Ok(mut k) => mem::replace(&mut k.prev, ContRef::Nil),
                Err(_) => break,
            };
        }
    }
}

impl HeapContinuation {
    /// `prev` and `env` must already be heap-resident (or Nil).
    pub fn new(saved: Vec<Value>, prev: ContRef, env: EnvRef, ip: usize) -> Self {
        HeapContinuation {
            saved,
            host_call: host_call_of(&prev),
            prev,
            env,
            resume: Resume::Code(ip),
        }
    }

    pub(crate) fn native(id: u64, prev: ContRef, env: EnvRef) -> Self {
        HeapContinuation {
            saved: Vec::new(),
            prev,
            env,
            resume: Resume::Native(id),
            host_call: Some(id),
        }
    }

    pub(crate) fn halting() -> Self {
        HeapContinuation {
            saved: Vec::new(),
            prev: ContRef::Nil,
            env: EnvRef::Nil,
            resume: Resume::Halt,
            host_call: None,
        }
    }

    pub fn saved(&self) -> &[Value] {
        &self.saved
    }

    pub fn prev(&self) -> &ContRef {
        &self.prev
    }

    pub fn env(&self) -> &EnvRef {
        &self.env
    }

    pub fn resume(&self) -> Resume {
        self.resume
    }

    pub(crate) fn host_call(&self) -> Option<u64> {
        self.host_call
    }
}

struct StackCont {
    ip: usize,
    bp: usize,
    env: EnvRef,
    prev: ContRef,
}

impl Vm {
    fn cont_cell(&self, at: usize) -> Result<usize, VmError> {
        match self.stack.get(at) {
            Some(Value::Fixnum(n)) if *n >= 0 => Ok(*n as usize),
            _ => Err(VmError::InvalidContinuation),
        }
    }

    fn stack_cont(&self, c: usize) -> Result<StackCont, VmError> {
        if c < 4 || c > self.sp {
            return Err(VmError::InvalidContinuation);
        }
        let ip = self.cont_cell(c - 4)?;
        let bp = self.cont_cell(c - 3)?;
        let env = EnvRef::from_value(&self.stack[c - 2]).map_err(|_| VmError::InvalidContinuation)?;
        let prev = ContRef::from_value(&self.stack[c - 1])?;
        if bp + 4 > c {
            return Err(VmError::InvalidContinuation);
        }
        Ok(StackCont { ip, bp, env, prev })
    }

    /// Push a return point at `ip + offset` and make it the current
    /// continuation.
    pub fn makecont(&mut self, offset: i32) -> Result<(), VmError> {
        let target = self.relative(offset)?;
        if self.sp + 4 > self.stack.len() {
            self.stack_gc()?;
            if self.sp + 4 > self.stack.len() {
                return Err(VmError::ContinuationOverflow);
            }
        }
        self.push(Value::Fixnum(target as i64))?;
        self.push(Value::Fixnum(self.bp as i64))?;
        self.push(self.env.to_value())?;
        self.push(self.cont.to_value())?;
        self.cont = ContRef::Stack(self.sp);
        trace!(cont = self.sp, target, "stack continuation");
        Ok(())
    }

    /// Return through the current continuation.
    pub fn restorecont(&mut self) -> Result<(), VmError> {
        match self.cont.clone() {
            ContRef::Nil => {
                self.halt();
                Ok(())
            }
            ContRef::Stack(c) => {
                let frame = self.stack_cont(c)?;
                self.env = self.resolve_env(&frame.env)?;
                self.ip = frame.ip;
                self.bp = frame.bp;
                self.cont = frame.prev;
                let old_sp = self.sp;
                self.sp = c - 4;
                for cell in &mut self.stack[c - 4..old_sp] {
                    *cell = Value::Nil;
                }
                Ok(())
            }
            ContRef::Heap(k) => self.restore_heap_cont(&k),
        }
    }

    fn restore_heap_cont(&mut self, k: &Rc<HeapContinuation>) -> Result<(), VmError> {
        match k.resume {
            Resume::Halt => {
                self.halt();
                Ok(())
            }
            Resume::Native(id) => self.return_to_native(id, k),
            Resume::Code(ip) => {
                self.ensure_capacity(k.saved.len())?;
                self.bp = self.sp;
                for v in &k.saved {
                    self.push(v.clone())?;
                }
                self.ip = ip;
                self.env = k.env.clone();
                self.cont = k.prev.clone();
                trace!(ip, saved = k.saved.len(), "restored heap continuation");
                Ok(())
            }
        }
    }

    /// Copy a stack continuation chain to the heap, promoting the
    /// environments it saved along the way.
    pub(crate) fn promote_cont(&mut self, cont: &ContRef) -> Result<ContRef, VmError> {
        let mut pending = Vec::new();
        let mut cur = cont.clone();
        while let ContRef::Stack(c) = cur {
            let frame = self.stack_cont(c)?;
            cur = frame.prev.clone();
            pending.push((c, frame));
        }
        if pending.is_empty() {
            return Ok(cur);
        }
        debug!(frames = pending.len(), "promoting continuation chain");
        let mut promoted = cur;
        for (c, frame) in pending.into_iter().rev() {
            let env = self.promote_env(&frame.env)?;
            let saved = self.stack[frame.bp..c - 4].to_vec();
            promoted = ContRef::Heap(Rc::new(HeapContinuation {
                saved,
                host_call: host_call_of(&promoted),
                prev: promoted,
                env,
                resume: Resume::Code(frame.ip),
            }));
        }
        Ok(promoted)
    }

    /// Make the current continuation first-class. Used by `ccc`.
    pub fn capture_continuation(&mut self) -> Result<Rc<HeapContinuation>, VmError> {
        let cont = self.cont.clone();
        let k = match self.promote_cont(&cont)? {
            ContRef::Heap(k) => k,
            ContRef::Nil => Rc::new(HeapContinuation::halting()),
            ContRef::Stack(_) => return Err(VmError::InvalidContinuation),
        };
        self.cont = ContRef::Heap(k.clone());
        Ok(k)
    }
}
