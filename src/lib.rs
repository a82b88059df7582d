//! Basalt - an accumulator bytecode machine for an Arc-style Lisp
//!
//! Environments and continuations start out on the value stack and are
//! promoted to the heap when something captures them or the stack fills up.

pub mod apply;
pub mod arith;
pub mod asm;
pub mod builtins;
pub mod config;
pub mod cont;
pub mod disasm;
pub mod env;
pub mod errors;
pub mod fault;
pub mod gc;
pub mod opcode;
pub mod test_support;
pub mod value;
pub mod vm;

pub use apply::Arity;
pub use asm::{AsmError, Assembler, Assembly};
pub use builtins::{Builtin, NativeFn, Outcome};
pub use config::VmConfig;
pub use cont::{ContRef, HeapContinuation, Resume};
pub use env::{EnvRef, HeapEnv};
pub use errors::{format_fault, Colors, ErrorConfig};
pub use fault::VmError;
pub use opcode::Op;
pub use value::{Symbol, Value};
pub use vm::{Program, Vm};
