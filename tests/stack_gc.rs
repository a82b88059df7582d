//! Stack reclamation under pressure
//!
//! Doubly recursive programs on stacks too small to hold their call depth,
//! and the consistency of stack handles once their frames have moved.

use basalt::test_support::{entry_closure, fib, fixnums, run_program, run_to_value};
use basalt::{Assembler, EnvRef, Program, Value, Vm, VmError};

fn fixnum(v: &Value) -> i64 {
    match v {
        Value::Fixnum(n) => *n,
        other => panic!("expected fixnum, got {}", other),
    }
}

// ============================================================================
// Recursion Under Pressure
// ============================================================================

#[test]
fn fib_8_on_twelve_cells() {
    let v = run_to_value(fib().unwrap(), 12, &fixnums(&[8])).unwrap();
    assert_eq!(fixnum(&v), 34);
}

#[test]
fn fib_15_on_twelve_cells() {
    let v = run_to_value(fib().unwrap(), 12, &fixnums(&[15])).unwrap();
    assert_eq!(fixnum(&v), 987);
}

#[test]
fn small_and_large_stacks_agree() {
    for n in 0..12 {
        let small = run_to_value(fib().unwrap(), 12, &fixnums(&[n])).unwrap();
        let large = run_to_value(fib().unwrap(), 1024, &fixnums(&[n])).unwrap();
        assert_eq!(fixnum(&small), fixnum(&large), "fib({})", n);
    }
}

#[test]
fn base_cases() {
    for n in [0, 1] {
        let v = run_to_value(fib().unwrap(), 12, &fixnums(&[n])).unwrap();
        assert_eq!(fixnum(&v), 1);
    }
}

// ============================================================================
// Handle Consistency
// ============================================================================

/// ```text
/// (let x 1
///   (let f (fn () x)
///     (= x 5)
///     (f)))
/// ```
/// The closure is built inside a continuation body, which promotes the
/// frame; the restored continuation still names the frame by its stack
/// position and must see the heap copy.
#[test]
fn restored_continuation_follows_a_promoted_frame() {
    let mut a = Assembler::new();
    a.env(1, 0, 0);
    a.cont("after");
    a.cls("g").ret();
    a.label("after").stg(0);
    a.ldi(5).ste0(0);
    a.ldg(0).apply(0);
    a.label("g").env(0, 0, 0).lde(1, 0).ret();
    let program = Program::new(a.finish().unwrap().code, vec![Value::symbol("f")]);

    let vm = run_program(program, 64, &fixnums(&[1])).unwrap();
    assert_eq!(fixnum(vm.acc()), 5);
}

#[test]
fn collection_promotes_both_registers() {
    let mut vm = Vm::new(16);
    vm.push(Value::Fixnum(1)).unwrap();
    vm.set_argc(1);
    vm.mkenv(1, 1).unwrap();
    vm.push(Value::Fixnum(2)).unwrap();
    vm.makecont(0).unwrap();
    vm.push(Value::Fixnum(3)).unwrap();

    vm.stack_gc().unwrap();
    assert!(matches!(vm.env(), EnvRef::Heap(_)));
    assert!(matches!(vm.cont(), basalt::ContRef::Heap(_)));
    assert_eq!(vm.sp(), 1);
    assert!(matches!(vm.stack_value(0), Some(Value::Fixnum(3))));
    assert_eq!(fixnum(&vm.getenv(0, 0).unwrap()), 1);
    assert!(vm.getenv(0, 1).unwrap().is_unbound());
}

#[test]
fn overflow_without_frames_to_reclaim() {
    let mut a = Assembler::new();
    a.ldi(1);
    for _ in 0..5 {
        a.push();
    }
    a.hlt();
    let mut vm = Vm::new(4);
    vm.load(Program::new(a.finish().unwrap().code, vec![]));
    assert_eq!(vm.run().unwrap_err(), VmError::StackOverflow);
    assert!(!vm.is_runnable());
}

// ============================================================================
// Releasing Long Chains
// ============================================================================

/// `(let acc nil (repeat n (push n acc)) acc)`
#[test]
fn machine_holding_a_long_list_drops_cleanly() {
    let mut a = Assembler::new();
    a.env(1, 1, 0);
    a.nil().ste0(1);
    a.label("top").lde0(0).push().ldi(0).is().jt("done");
    a.lde0(0).push().lde0(1).cons().ste0(1);
    a.lde0(0).push().ldi(1).sub().ste0(0);
    a.jmp("top");
    a.label("done").lde0(1).ret();
    let program = Program::new(a.finish().unwrap().code, vec![]);

    let vm = run_program(program, 16, &fixnums(&[1_000_000])).unwrap();
    assert_eq!(fixnum(&vm.acc().car().unwrap()), 1);
    drop(vm);
}

/// ```text
/// (ccc (fn (k) ((afn (k n) (if (is n 0) (k 7) (+ 1 (self k (- n 1))))) k 300000)))
/// ```
/// The recursion is not a tail call, so by the time `k` is invoked every
/// pending frame has been promoted into one long continuation chain.
#[test]
fn escape_from_a_deep_recursion_releases_the_chain() {
    let mut a = Assembler::new();
    a.env(0, 0, 0);
    a.cont("after");
    a.cls("f").push().ldg(1).apply(1);
    a.label("after").ret();
    a.label("f").env(1, 0, 0);
    a.lde0(0).push().ldi(300_000).push().ldl(0).apply(2);
    a.label("rec").env(2, 0, 0);
    a.lde0(1).push().ldi(0).is().jf("deeper");
    a.ldi(7).push().lde0(0).apply(1);
    a.label("deeper").cont("back");
    a.lde0(0).push().lde0(1).push().ldi(1).sub().push().ldl(0).apply(2);
    a.label("back").push().ldi(1).add().ret();
    let asm = a.finish().unwrap();
    let rec = asm.label("rec").unwrap();
    let program = Program::new(asm.code, vec![entry_closure(rec), Value::symbol("ccc")]);

    let vm = run_program(program, 32, &[]).unwrap();
    assert!(!vm.is_runnable());
    assert_eq!(fixnum(vm.acc()), 7);
    drop(vm);
}
