//! Test support: machine setup and a few canned programs.
//!
//! The programs are written with the [`Assembler`] and each start at ip 0
//! with a frame-building instruction, so a test pushes the arguments, sets
//! `argc` and runs. The caller's continuation is Nil, so returning from the
//! entry point halts the machine with the result in the accumulator.

use crate::asm::{AsmError, Assembler};
use crate::config::VmConfig;
use crate::env::EnvRef;
use crate::fault::VmError;
use crate::value::Value;
use crate::vm::{Program, Vm};

// ============================================================================
// Machine Setup
// ============================================================================

/// A machine with the standard builtins and `program` loaded, with `args`
/// already pushed the way a caller would push them.
pub fn machine(program: Program, stack_size: usize, args: &[Value]) -> Result<Vm, VmError> {
    let mut vm = Vm::with_config(&VmConfig::new().with_stack_size(stack_size));
    vm.load(program);
    for a in args {
        vm.push(a.clone())?;
    }
    vm.set_argc(args.len());
    Ok(vm)
}

/// Run `program` to completion and hand back the stopped machine.
pub fn run_program(program: Program, stack_size: usize, args: &[Value]) -> Result<Vm, VmError> {
    let mut vm = machine(program, stack_size, args)?;
    vm.run()?;
    Ok(vm)
}

/// Run `program` and return the accumulator.
pub fn run_to_value(program: Program, stack_size: usize, args: &[Value]) -> Result<Value, VmError> {
    run_program(program, stack_size, args).map(|vm| vm.acc().clone())
}

pub fn fixnums(ns: &[i64]) -> Vec<Value> {
    ns.iter().map(|n| Value::Fixnum(*n)).collect()
}

/// Unwrap a fixnum, describing anything else.
pub fn as_fixnum(v: &Value) -> Result<i64, String> {
    match v {
        Value::Fixnum(n) => Ok(*n),
        other => Err(format!("expected fixnum, got {} {}", other.type_name(), other)),
    }
}

/// A closure over the empty environment entering at `ip`; literal 0 of the
/// self-recursive programs below.
pub fn entry_closure(ip: usize) -> Value {
    Value::closure(EnvRef::Nil, ip)
}

// ============================================================================
// Canned Programs
// ============================================================================

/// `(afn (x y t) (if (is x (+ y 1)) t (self (+ x 1) y (+ t 1))))`
///
/// Every iteration is a tail call through `menv`, so the stack stays flat.
pub fn counting_loop() -> Result<Program, AsmError> {
    let mut a = Assembler::new();
    a.env(3, 0, 0);
    a.lde0(0).push().lde0(1).push().ldi(1).add().is().jf("loop");
    a.lde0(2).ret();
    a.label("loop");
    a.lde0(0).push().ldi(1).add().push();
    a.lde0(1).push();
    a.lde0(2).push().ldi(1).add().push();
    a.ldl(0).menv(3).apply(3);
    let asm = a.finish()?;
    Ok(Program::new(asm.code, vec![entry_closure(0)]))
}

/// `(afn (n) (if (is n 0) 1 (is n 1) 1 (+ (self (- n 1)) (self (- n 2)))))`
pub fn fib() -> Result<Program, AsmError> {
    let mut a = Assembler::new();
    a.env(1, 0, 0);
    a.lde0(0).push().ldi(0).is().jt("one");
    a.lde0(0).push().ldi(1).is().jt("one");
    a.cont("first");
    a.lde0(0).push().ldi(1).sub().push().ldl(0).apply(1);
    a.label("first").push();
    a.cont("second");
    a.lde0(0).push().ldi(2).sub().push().ldl(0).apply(1);
    a.label("second").add().ret();
    a.label("one").ldi(1).ret();
    let asm = a.finish()?;
    Ok(Program::new(asm.code, vec![entry_closure(0)]))
}

/// `(fn (x) ((fn (y) (+ x y)) 2))`
///
/// The inner call is a tail call; the inner closure reads `x` one frame out.
pub fn nested_adder() -> Result<Program, AsmError> {
    let mut a = Assembler::new();
    a.env(1, 0, 0);
    a.ldi(2).push();
    a.cls("inner").menv(1).apply(1);
    a.label("inner").env(1, 0, 0);
    a.lde(1, 0).push().lde0(0).add().ret();
    let asm = a.finish()?;
    Ok(Program::new(asm.code, Vec::new()))
}
