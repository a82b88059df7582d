//! Builtins calling back into bytecode
//!
//! A builtin that calls a procedure runs a nested dispatch loop until the
//! callee returns through a marker continuation. These tests cover the
//! plain round trip, nesting, escapes out of a nested loop and the stale
//! marker left behind once the host call has finished.

use basalt::test_support::{entry_closure, fixnums, run_program};
use basalt::{Arity, Assembler, Builtin, Outcome, Program, Value, Vm, VmConfig, VmError};

fn fixnum(v: &Value) -> i64 {
    match v {
        Value::Fixnum(n) => *n,
        other => panic!("expected fixnum, got {}", other),
    }
}

/// Calls its argument with 1.
fn call_with_one(vm: &mut Vm) -> Result<Outcome, VmError> {
    let f = vm.arg(0)?;
    Ok(vm.call(f, &[Value::Fixnum(1)])?.into())
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn builtin_calls_a_closure() {
    // env 0 0 0; ldl 0; push; ldl 1; apply 1; ret;
    // env 1 0 0; lde0 0; push; ldi 1; add; ret
    let code = vec![
        0xca, 0x00, 0x00, 0x00, 0x43, 0x00, 0x00, 0x00, 0x00, 0x01, 0x43, 0x01, 0x00, 0x00,
        0x00, 0x4c, 0x01, 0x0d, 0xca, 0x01, 0x00, 0x00, 0x69, 0x00, 0x01, 0x44, 0x01, 0x00,
        0x00, 0x00, 0x15, 0x0d,
    ];
    let literals = vec![
        entry_closure(18),
        Builtin::new("test", Arity::fixed(1), call_with_one),
    ];
    let mut vm = Vm::new(1024);
    vm.load(Program::new(code, literals));
    vm.run().unwrap();
    assert!(!vm.is_runnable());
    assert_eq!(fixnum(vm.acc()), 2);
}

#[test]
fn host_calls_a_closure_directly() {
    let mut a = Assembler::new();
    a.env(1, 0, 0).lde0(0).push().ldi(1).add().ret();
    let mut vm = Vm::with_config(&VmConfig::new().with_stack_size(32));
    vm.load(Program::new(a.finish().unwrap().code, vec![]));

    let r = vm.call(entry_closure(0), &[Value::Fixnum(41)]).unwrap();
    assert_eq!(fixnum(&r), 42);
    let r = vm.call(entry_closure(0), &[Value::Fixnum(-1)]).unwrap();
    assert_eq!(fixnum(&r), 0);
}

#[test]
fn host_calls_a_builtin_directly() {
    let mut vm = Vm::with_config(&VmConfig::new());
    let plus = vm.global("+").cloned().unwrap();
    let r = vm
        .call(plus, &[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)])
        .unwrap();
    assert_eq!(fixnum(&r), 6);
}

#[test]
fn host_call_fault_stops_the_machine() {
    let mut a = Assembler::new();
    a.env(1, 0, 0).lde0(0).car().ret();
    let mut vm = Vm::new(32);
    vm.load(Program::new(a.finish().unwrap().code, vec![]));
    let err = vm.call(entry_closure(0), &[Value::Fixnum(3)]).unwrap_err();
    assert_eq!(err.to_string(), "Can't take car of fixnum");
    assert!(!vm.is_runnable());
}

// ============================================================================
// Map
// ============================================================================

/// `(map (fn (x) (* x x)) '(1 2 3))`
#[test]
fn map_applies_a_closure() {
    let mut a = Assembler::new();
    a.cls("sq").push();
    a.ldi(1).push().ldi(2).push().ldi(3).push().nil().cons().cons().cons().push();
    a.ldg(0).apply(2);
    a.label("sq").env(1, 0, 0).lde0(0).push().lde0(0).mul().ret();
    let program = Program::new(a.finish().unwrap().code, vec![Value::symbol("map")]);
    let vm = run_program(program, 64, &[]).unwrap();
    assert_eq!(vm.acc().to_string(), "(1 4 9)");
}

/// `(map (fn (x) (car (map (fn (y) (+ x y)) '(10)))) '(1 2))`
#[test]
fn nested_maps() {
    let mut a = Assembler::new();
    a.cls("outer").push();
    a.ldi(1).push().ldi(2).push().nil().cons().cons().push();
    a.ldg(0).apply(2);
    a.label("outer").env(1, 0, 0);
    a.cont("k1");
    a.cls("inner").push().ldi(10).push().nil().cons().push();
    a.ldg(0).apply(2);
    a.label("k1").car().ret();
    a.label("inner").env(1, 0, 0).lde(1, 0).push().lde0(0).add().ret();
    let program = Program::new(a.finish().unwrap().code, vec![Value::symbol("map")]);
    let vm = run_program(program, 64, &[]).unwrap();
    assert_eq!(vm.acc().to_string(), "(11 12)");
}

#[test]
fn map_on_a_small_stack() {
    let mut a = Assembler::new();
    a.cls("sq").push();
    a.ldi(1).push().ldi(2).push().ldi(3).push().nil().cons().cons().cons().push();
    a.ldg(0).apply(2);
    a.label("sq").env(1, 0, 0).lde0(0).push().lde0(0).mul().ret();
    let program = Program::new(a.finish().unwrap().code, vec![Value::symbol("map")]);
    let vm = run_program(program, 10, &[]).unwrap();
    assert_eq!(vm.acc().to_string(), "(1 4 9)");
}

// ============================================================================
// Escapes
// ============================================================================

/// `(+ 100 (ccc (fn (k) (map (fn (x) (k x)) '(7 8)))))`
///
/// The first element escapes out of the nested loop; `map` never sees the
/// second one.
#[test]
fn escape_out_of_a_nested_call() {
    let mut a = Assembler::new();
    a.env(0, 0, 0);
    a.ldi(100).push();
    a.cont("after");
    a.cls("f").push().ldg(0).apply(1);
    a.label("after").add().ret();
    a.label("f").env(1, 0, 0);
    a.cls("g").push();
    a.ldi(7).push().ldi(8).push().nil().cons().cons().push();
    a.ldg(1).apply(2);
    a.label("g").env(1, 0, 0);
    a.lde0(0).push().lde(1, 0).apply(1);
    let literals = vec![Value::symbol("ccc"), Value::symbol("map")];
    let program = Program::new(a.finish().unwrap().code, literals);

    let vm = run_program(program, 64, &[]).unwrap();
    assert!(!vm.is_runnable());
    assert_eq!(fixnum(vm.acc()), 107);
}

/// ```text
/// (let total 0
///   (repeat n (++ total (ccc (fn (k) (map (fn (x) (k x)) '(1)))))))
/// ```
/// Each escape leaves its nested loop; the run loop picks the program up
/// again, so the host stack does not grow with the iteration count.
#[test]
fn repeated_escapes_resume_the_outer_loop() {
    let mut a = Assembler::new();
    a.env(1, 2, 0);
    a.ldi(0).ste0(2);
    a.label("top").lde0(0).push().ldi(0).is().jt("done");
    a.cont("after");
    a.cls("f").push().ldg(0).apply(1);
    a.label("after").ste0(1);
    a.lde0(2).push().lde0(1).add().ste0(2);
    a.lde0(0).push().ldi(1).sub().ste0(0);
    a.jmp("top");
    a.label("done").lde0(2).ret();
    a.label("f").env(1, 0, 0);
    a.cls("g").push().ldi(1).push().nil().cons().push();
    a.ldg(1).apply(2);
    a.label("g").env(1, 0, 0);
    a.lde0(0).push().lde(1, 0).apply(1);
    let literals = vec![Value::symbol("ccc"), Value::symbol("map")];
    let program = Program::new(a.finish().unwrap().code, literals);

    let vm = run_program(program, 64, &fixnums(&[50_000])).unwrap();
    assert!(!vm.is_runnable());
    assert_eq!(fixnum(vm.acc()), 50_000);
}

/// An escape into a host call further out resumes that call's loop.
///
/// ```text
/// (map (fn (x) (ccc (fn (k) (map (fn (y) (k (+ x y))) '(10))))) '(1 2))
/// ```
#[test]
fn escape_into_an_outer_host_call() {
    let mut a = Assembler::new();
    a.cls("outer").push();
    a.ldi(1).push().ldi(2).push().nil().cons().cons().push();
    a.ldg(0).apply(2);
    a.label("outer").env(1, 0, 0);
    a.cls("f").push().ldg(1).apply(1);
    a.label("f").env(1, 0, 0);
    a.cls("inner").push().ldi(10).push().nil().cons().push();
    a.ldg(0).apply(2);
    a.label("inner").env(1, 0, 0);
    a.lde(2, 0).push().lde0(0).add().push().lde(1, 0).apply(1);
    let literals = vec![Value::symbol("map"), Value::symbol("ccc")];
    let program = Program::new(a.finish().unwrap().code, literals);

    let vm = run_program(program, 64, &[]).unwrap();
    assert_eq!(vm.acc().to_string(), "(11 12)");
}

/// ```text
/// (do (map (fn (x) (ccc (fn (k) (= saved k) x))) '(1))
///     (saved 5))
/// ```
#[test]
fn continuation_into_a_finished_host_call_is_invalid() {
    let mut a = Assembler::new();
    a.env(0, 0, 0);
    a.cont("after");
    a.cls("f").push();
    a.ldi(1).push().nil().cons().push();
    a.ldg(0).apply(2);
    a.label("after").ldi(5).push().ldg(1).apply(1);
    a.label("f").env(1, 0, 0);
    a.cls("g").push().ldg(2).apply(1);
    a.label("g").env(1, 0, 0);
    a.lde0(0).stg(1).lde(1, 0).ret();
    let literals = vec![
        Value::symbol("map"),
        Value::symbol("saved"),
        Value::symbol("ccc"),
    ];
    let program = Program::new(a.finish().unwrap().code, literals);

    let err = run_program(program, 64, &[]).unwrap_err();
    assert_eq!(err, VmError::InvalidContinuation);
}
