//! Stack reclamation.
//!
//! When a push would run off the end of the stack, every frame reachable
//! from the env and cont registers is promoted to the heap. Once both chains
//! are heap-resident the only stack data still in use is the region the
//! current instruction sequence is building on top: the values above `bp`,
//! or above the topmost stack continuation when that lies higher (its saved
//! values now live in the heap copy). That region is slid down to index 0.

use std::mem;

use tracing::debug;

use crate::cont::ContRef;
use crate::env::EnvRef;
use crate::fault::VmError;
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    /// Promote live frames and compact the stack. Recovering nothing is not
    /// an error here; callers retry their allocation and fault themselves.
    pub fn stack_gc(&mut self) -> Result<(), VmError> {
        let sp_before = self.sp;
        let cont_top = match self.cont {
            ContRef::Stack(c) => c,
            _ => 0,
        };

        let env = self.env.clone();
        self.env = self.promote_env(&env)?;
        let cont = self.cont.clone();
        self.cont = self.promote_cont(&cont)?;

        // Nothing below the compaction base may still be addressed through a
        // stack handle once the registers are heap-resident.
        if matches!(self.env, EnvRef::Stack(_)) || matches!(self.cont, ContRef::Stack(_)) {
            return Err(VmError::InvalidContinuation);
        }

        let base = self.bp.max(cont_top).min(self.sp);
        if base == 0 {
            debug!(sp = self.sp, "stack gc recovered nothing");
            return Ok(());
        }

        let live = self.sp - base;
        for i in 0..live {
            let v = mem::replace(&mut self.stack[base + i], Value::Nil);
            self.stack[i] = v;
        }
        for cell in &mut self.stack[live..sp_before] {
            *cell = Value::Nil;
        }
        self.sp = live;
        self.bp = self.bp.saturating_sub(base).min(self.sp);
        debug!(recovered = base, sp_before, sp_after = self.sp, "stack gc");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_keeps_the_frame_under_construction() {
        let mut vm = Vm::new(16);
        vm.push(Value::Fixnum(1)).unwrap();
        vm.mkenv(1, 0).unwrap();
        assert_eq!(vm.bp(), 4);
        vm.push(Value::Fixnum(7)).unwrap();
        vm.push(Value::Fixnum(8)).unwrap();

        vm.stack_gc().unwrap();
        assert_eq!(vm.sp(), 2);
        assert_eq!(vm.bp(), 0);
        assert!(matches!(vm.env(), EnvRef::Heap(_)));
        assert!(matches!(vm.stack_value(0), Some(Value::Fixnum(7))));
        assert!(matches!(vm.getenv(0, 0).unwrap(), Value::Fixnum(1)));
    }

    #[test]
    fn continuation_saved_values_move_to_the_heap() {
        let mut vm = Vm::new(16);
        vm.push(Value::Fixnum(5)).unwrap();
        vm.makecont(0).unwrap();
        vm.push(Value::Fixnum(6)).unwrap();

        vm.stack_gc().unwrap();
        assert_eq!(vm.sp(), 1);
        match vm.cont() {
            ContRef::Heap(k) => {
                assert_eq!(k.saved().len(), 1);
                assert!(matches!(k.saved()[0], Value::Fixnum(5)));
            }
            other => panic!("expected heap continuation, got {:?}", other),
        }
    }

    #[test]
    fn full_stack_with_nothing_to_reclaim_overflows() {
        let mut vm = Vm::new(2);
        vm.push(Value::Nil).unwrap();
        vm.push(Value::Nil).unwrap();
        assert_eq!(vm.push(Value::Nil).unwrap_err(), VmError::StackOverflow);
    }
}
