//! Faults raised by the virtual machine.

use thiserror::Error;

/// Everything that can stop the machine. A fault is unrecoverable within the
/// current `run()`; the machine is marked not runnable afterwards.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("invalid instruction 0x{opcode:02x} at IP={ip:08x}")]
    InvalidInstruction { opcode: u8, ip: usize },
    #[error("code overrun at IP={ip:08x}")]
    CodeOverrun { ip: usize },
    #[error("invalid jump from IP={ip:08x} by {offset}")]
    InvalidJump { ip: usize, offset: i32 },
    #[error("too few arguments, at least {required} required, {passed} passed")]
    TooFewArguments { required: usize, passed: usize },
    #[error("too many arguments, at most {allowed} allowed, {passed} passed")]
    TooManyArguments { allowed: usize, passed: usize },
    #[error("environment depth exceeded")]
    EnvDepthExceeded,
    #[error("stack environment index exceeded")]
    StackEnvIndex { index: usize, count: usize },
    #[error("heap environment index exceeded")]
    HeapEnvIndex { index: usize, count: usize },
    #[error("invalid environment")]
    InvalidEnvironment,
    #[error("invalid continuation")]
    InvalidContinuation,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack overflow while creating continuation")]
    ContinuationOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("Can't {op} {type_name}")]
    TypeError { op: &'static str, type_name: &'static str },
    #[error("Wrong argument type, {op} expected a {expected}, got {type_name}")]
    WrongArgumentType {
        op: &'static str,
        expected: &'static str,
        type_name: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} too large for list")]
    IndexOutOfRange { index: i64 },
    #[error("literal index {0} out of range")]
    BadLiteral(i32),
    #[error("Unbound symbol {0}")]
    UnboundSymbol(String),
    #[error("machine is not runnable")]
    NotRunnable,
    /// Non-local exit across nested dispatch loops. Consumed inside the
    /// machine and never returned from `Vm::run`.
    #[error("unwound to an outer dispatch loop")]
    Unwound,
}

impl VmError {
    pub fn type_error(op: &'static str, type_name: &'static str) -> Self {
        VmError::TypeError { op, type_name }
    }
}
