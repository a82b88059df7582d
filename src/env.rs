//! Lexical environments.
//!
//! An environment lives either on the value stack, as a slot region followed
//! by a three-cell descriptor, or on the heap as a [`HeapEnv`]. The stack
//! form is what ordinary calls build. It is promoted to the heap when a
//! closure captures it, when a continuation holding it escapes, or when the
//! stack fills up.
//!
//! Descriptor layout at frame pointer `e`:
//!
//! ```text
//! stack[start .. start+count]   slots
//! stack[e]                      start
//! stack[e + 1]                  count
//! stack[e + 2]                  parent env
//! ```
//!
//! Promotion overwrites `stack[e]` with the new heap environment. Every access
//! to a stack environment goes through [`Vm::stack_frame`], which follows that
//! forwarding cell, so stale `EnvRef::Stack` handles held in continuation
//! cells or child descriptors keep seeing the same storage.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::fault::VmError;
use crate::value::Value;
use crate::vm::Vm;

// ============================================================================
// Environment handles
// ============================================================================

/// Where an environment lives.
#[derive(Debug, Clone)]
pub enum EnvRef {
    Nil,
    Stack(usize),
    Heap(Rc<HeapEnv>),
}

impl EnvRef {
    pub fn is_nil(&self) -> bool {
        matches!(self, EnvRef::Nil)
    }

    /// Encoding used when the handle is stored in a stack cell.
    pub fn to_value(&self) -> Value {
        match self {
            EnvRef::Nil => Value::Nil,
            EnvRef::Stack(e) => Value::StackEnv(*e),
            EnvRef::Heap(h) => Value::Environment(h.clone()),
        }
    }

    pub fn from_value(v: &Value) -> Result<EnvRef, VmError> {
        match v {
            Value::Nil => Ok(EnvRef::Nil),
            Value::StackEnv(e) => Ok(EnvRef::Stack(*e)),
            Value::Environment(h) => Ok(EnvRef::Heap(h.clone())),
            _ => Err(VmError::InvalidEnvironment),
        }
    }
}

/// A heap-resident frame. Its parent is never stack-resident.
#[derive(Debug)]
pub struct HeapEnv {
    slots: RefCell<Vec<Value>>,
    parent: EnvRef,
}

impl Drop for HeapEnv {
    fn drop(&mut self) {
        let mut next = mem::replace(&mut self.parent, EnvRef::Nil);
        while let EnvRef::Heap(env) = next {
            next = match Rc::try_unwrap(env) {
                Ok(mut env) => mem::replace(&mut env.parent, EnvRef::Nil),
                Err(_) => break,
            };
        }
    }
}

impl HeapEnv {
    pub fn new(slots: Vec<Value>, parent: EnvRef) -> Self {
        HeapEnv {
            slots: RefCell::new(slots),
            parent,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self) -> &EnvRef {
        &self.parent
    }

    pub fn get(&self, index: usize) -> Result<Value, VmError> {
        let slots = self.slots.borrow();
        slots.get(index).cloned().ok_or(VmError::HeapEnvIndex {
            index,
            count: slots.len(),
        })
    }

    pub fn set(&self, index: usize, v: Value) -> Result<(), VmError> {
        let mut slots = self.slots.borrow_mut();
        let count = slots.len();
        match slots.get_mut(index) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(VmError::HeapEnvIndex { index, count }),
        }
    }

    pub fn slots(&self) -> Vec<Value> {
        self.slots.borrow().clone()
    }
}

/// A stack descriptor as found on the stack.
pub(crate) enum StackFrame {
    Forwarded(Rc<HeapEnv>),
    Live {
        start: usize,
        count: usize,
        parent: EnvRef,
    },
}

/// A frame found by walking the chain.
enum Located {
    Stack { start: usize, count: usize },
    Heap(Rc<HeapEnv>),
}

// ============================================================================
// Frame construction and addressing
// ============================================================================

impl Vm {
    fn frame_cell(&self, at: usize) -> Result<usize, VmError> {
        match self.stack.get(at) {
            Some(Value::Fixnum(n)) if *n >= 0 => Ok(*n as usize),
            _ => Err(VmError::InvalidEnvironment),
        }
    }

    pub(crate) fn stack_frame(&self, e: usize) -> Result<StackFrame, VmError> {
        if let Some(Value::Environment(h)) = self.stack.get(e) {
            return Ok(StackFrame::Forwarded(h.clone()));
        }
        let start = self.frame_cell(e)?;
        let count = self.frame_cell(e + 1)?;
        let parent = self
            .stack
            .get(e + 2)
            .ok_or(VmError::InvalidEnvironment)
            .and_then(EnvRef::from_value)?;
        if start + count > e {
            return Err(VmError::InvalidEnvironment);
        }
        Ok(StackFrame::Live {
            start,
            count,
            parent,
        })
    }

    /// Replace a stack handle whose frame was already promoted by its heap
    /// copy.
    pub(crate) fn resolve_env(&self, env: &EnvRef) -> Result<EnvRef, VmError> {
        match env {
            EnvRef::Stack(e) => match self.stack_frame(*e)? {
                StackFrame::Forwarded(h) => Ok(EnvRef::Heap(h)),
                StackFrame::Live { .. } => Ok(env.clone()),
            },
            _ => Ok(env.clone()),
        }
    }

    /// Build a frame from the `prevsize` values on top of the stack plus
    /// `extrasize` unbound slots.
    pub fn mkenv(&mut self, prevsize: usize, extrasize: usize) -> Result<(), VmError> {
        if prevsize > self.sp {
            return Err(VmError::StackUnderflow);
        }
        if self.sp + extrasize + 3 > self.stack.len() {
            return self.mkheapenv(prevsize, extrasize);
        }
        for _ in 0..extrasize {
            self.push(Value::Unbound)?;
        }
        let count = prevsize + extrasize;
        let start = self.sp - count;
        let e = self.sp;
        let parent = self.env.to_value();
        self.push(Value::Fixnum(start as i64))?;
        self.push(Value::Fixnum(count as i64))?;
        self.push(parent)?;
        self.env = EnvRef::Stack(e);
        self.bp = self.sp;
        trace!(frame = e, start, count, "stack env");
        Ok(())
    }

    fn mkheapenv(&mut self, prevsize: usize, extrasize: usize) -> Result<(), VmError> {
        let parent = self.heapenv()?;
        let start = self.sp - prevsize;
        let mut slots: Vec<Value> = self.stack[start..self.sp]
            .iter_mut()
            .map(|cell| mem::replace(cell, Value::Nil))
            .collect();
        slots.resize(prevsize + extrasize, Value::Unbound);
        self.sp = start;
        self.bp = start;
        trace!(slots = slots.len(), "heap env");
        self.env = EnvRef::Heap(Rc::new(HeapEnv::new(slots, parent)));
        Ok(())
    }

    /// Make the current environment heap-resident and return it.
    pub fn heapenv(&mut self) -> Result<EnvRef, VmError> {
        let env = self.env.clone();
        self.env = self.promote_env(&env)?;
        Ok(self.env.clone())
    }

    /// Copy a stack environment and its stack-resident ancestors to the heap,
    /// leaving forwarding cells behind. Heap and Nil handles come back as-is.
    pub(crate) fn promote_env(&mut self, env: &EnvRef) -> Result<EnvRef, VmError> {
        let mut pending = Vec::new();
        let mut cur = env.clone();
        let mut promoted = loop {
            match cur {
                EnvRef::Stack(e) => match self.stack_frame(e)? {
                    StackFrame::Forwarded(h) => break EnvRef::Heap(h),
                    StackFrame::Live {
                        start,
                        count,
                        parent,
                    } => {
                        pending.push((e, start, count));
                        cur = parent;
                    }
                },
                other => break other,
            }
        };
        if pending.is_empty() {
            return Ok(promoted);
        }
        debug!(frames = pending.len(), "promoting environment chain");
        for (e, start, count) in pending.into_iter().rev() {
            let slots = self.stack[start..start + count].to_vec();
            let heap = Rc::new(HeapEnv::new(slots, promoted));
            self.stack[e] = Value::Environment(heap.clone());
            promoted = EnvRef::Heap(heap);
        }
        Ok(promoted)
    }

    fn find_env(&self, depth: usize) -> Result<Located, VmError> {
        let mut cur = self.env.clone();
        let mut depth = depth;
        loop {
            let (located, parent) = match &cur {
                EnvRef::Nil => return Err(VmError::EnvDepthExceeded),
                EnvRef::Heap(h) => (Located::Heap(h.clone()), h.parent().clone()),
                EnvRef::Stack(e) => match self.stack_frame(*e)? {
                    StackFrame::Forwarded(h) => {
                        let parent = h.parent().clone();
                        (Located::Heap(h), parent)
                    }
                    StackFrame::Live {
                        start,
                        count,
                        parent,
                    } => (Located::Stack { start, count }, parent),
                },
            };
            if depth == 0 {
                return Ok(located);
            }
            depth -= 1;
            cur = parent;
        }
    }

    /// Read slot `index` of the frame `depth` links out from the current one.
    pub fn getenv(&self, depth: usize, index: usize) -> Result<Value, VmError> {
        match self.find_env(depth)? {
            Located::Stack { start, count } if index < count => Ok(self.stack[start + index].clone()),
            Located::Stack { count, .. } => Err(VmError::StackEnvIndex { index, count }),
            Located::Heap(h) => h.get(index),
        }
    }

    pub fn setenv(&mut self, depth: usize, index: usize, v: Value) -> Result<(), VmError> {
        match self.find_env(depth)? {
            Located::Stack { start, count } if index < count => {
                self.stack[start + index] = v;
                Ok(())
            }
            Located::Stack { count, .. } => Err(VmError::StackEnvIndex { index, count }),
            Located::Heap(h) => h.set(index, v),
        }
    }

    /// Tail-call frame reuse: move the `n` values on top of the stack over
    /// the current stack frame's slots and drop to the parent environment.
    pub fn menv(&mut self, n: usize) -> Result<(), VmError> {
        let (parent, dest) = match self.env.clone() {
            EnvRef::Nil => return Ok(()),
            EnvRef::Heap(h) => (h.parent().clone(), None),
            EnvRef::Stack(e) => match self.stack_frame(e)? {
                StackFrame::Forwarded(h) => (h.parent().clone(), None),
                StackFrame::Live { start, parent, .. } => (parent, Some(start)),
            },
        };
        if let Some(dest) = dest {
            if n > self.sp || self.sp - n < dest {
                return Err(VmError::StackUnderflow);
            }
            let src = self.sp - n;
            for i in 0..n {
                let v = mem::replace(&mut self.stack[src + i], Value::Nil);
                self.stack[dest + i] = v;
            }
            for cell in &mut self.stack[dest + n..src + n] {
                *cell = Value::Nil;
            }
            self.sp = dest + n;
            trace!(dest, n, "reused frame for tail call");
        }
        self.env = parent;
        Ok(())
    }
}
