//! The machine: registers, the value stack and the dispatch loop.

use std::collections::HashMap;
use std::mem;

use tracing::{debug, trace, warn};

use crate::apply::{Arity, Loop, NativeCalls};
use crate::arith;
use crate::config::VmConfig;
use crate::cont::ContRef;
use crate::env::EnvRef;
use crate::fault::VmError;
use crate::opcode::{decode_word, Op};
use crate::value::{Symbol, Value};

/// A loadable unit: code, its literal pool and where to start.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<u8>,
    pub literals: Vec<Value>,
    pub entry: usize,
}

impl Program {
    pub fn new(code: Vec<u8>, literals: Vec<Value>) -> Self {
        Program {
            code,
            literals,
            entry: 0,
        }
    }

    pub fn with_entry(mut self, entry: usize) -> Self {
        self.entry = entry;
        self
    }
}

#[derive(Debug)]
pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) sp: usize,
    pub(crate) bp: usize,
    pub(crate) ip: usize,
    pub(crate) env: EnvRef,
    pub(crate) cont: ContRef,
    pub(crate) acc: Value,
    pub(crate) argc: usize,
    pub(crate) runnable: bool,
    pub(crate) native: NativeCalls,
    /// ip of the instruction currently executing; reported on faults.
    current: usize,
    code: Vec<u8>,
    literals: Vec<Value>,
    globals: HashMap<Symbol, Value>,
    symbols: HashMap<String, Symbol>,
}

impl Vm {
    /// A bare machine with `stack_size` cells and no globals.
    pub fn new(stack_size: usize) -> Self {
        Vm {
            stack: vec![Value::Nil; stack_size],
            sp: 0,
            bp: 0,
            ip: 0,
            env: EnvRef::Nil,
            cont: ContRef::Nil,
            acc: Value::Nil,
            argc: 0,
            runnable: true,
            native: NativeCalls::default(),
            current: 0,
            code: Vec::new(),
            literals: Vec::new(),
            globals: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    pub fn with_config(config: &VmConfig) -> Self {
        let mut vm = Vm::new(config.stack_size);
        if config.builtins {
            vm.install_builtins();
        }
        vm
    }

    /// Install a program and reset every register. Globals survive.
    pub fn load(&mut self, program: Program) {
        self.code = program.code;
        self.literals = program.literals;
        self.ip = program.entry;
        self.current = program.entry;
        self.sp = 0;
        self.bp = 0;
        self.env = EnvRef::Nil;
        self.cont = ContRef::Nil;
        self.acc = Value::Nil;
        self.argc = 0;
        self.runnable = true;
        self.native = NativeCalls::default();
        for cell in self.stack.iter_mut() {
            *cell = Value::Nil;
        }
    }

    // ------------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------------

    pub fn acc(&self) -> &Value {
        &self.acc
    }

    pub fn set_acc(&mut self, v: Value) {
        self.acc = v;
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn set_argc(&mut self, argc: usize) {
        self.argc = argc;
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }

    /// ip of the most recently dispatched instruction.
    pub fn instruction_ip(&self) -> usize {
        self.current
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn bp(&self) -> usize {
        self.bp
    }

    pub fn env(&self) -> &EnvRef {
        &self.env
    }

    pub fn cont(&self) -> &ContRef {
        &self.cont
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_value(&self, index: usize) -> Option<&Value> {
        if index < self.sp {
            self.stack.get(index)
        } else {
            None
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn is_runnable(&self) -> bool {
        self.runnable
    }

    pub(crate) fn halt(&mut self) {
        debug!(ip = self.ip, "halt");
        self.runnable = false;
    }

    // ------------------------------------------------------------------------
    // Symbols and globals
    // ------------------------------------------------------------------------

    /// Intern a name. `t` and `nil` come back as their constants.
    pub fn intern(&mut self, name: &str) -> Value {
        match name {
            "t" => Value::True,
            "nil" => Value::Nil,
            _ => {
                let sym = self
                    .symbols
                    .entry(name.to_string())
                    .or_insert_with(|| Symbol::new(name))
                    .clone();
                Value::Symbol(sym)
            }
        }
    }

    pub fn define(&mut self, name: &str, v: Value) {
        if let Value::Symbol(sym) = self.intern(name) {
            self.globals.insert(sym, v);
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(&Symbol::new(name))
    }

    pub fn global_names(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(|s| s.name())
    }

    // ------------------------------------------------------------------------
    // Stack
    // ------------------------------------------------------------------------

    pub fn push(&mut self, v: Value) -> Result<(), VmError> {
        if self.sp >= self.stack.len() {
            self.stack_gc()?;
            if self.sp >= self.stack.len() {
                return Err(VmError::StackOverflow);
            }
        }
        self.stack[self.sp] = v;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(mem::replace(&mut self.stack[self.sp], Value::Nil))
    }

    fn top(&self) -> Result<Value, VmError> {
        match self.sp {
            0 => Err(VmError::StackUnderflow),
            sp => Ok(self.stack[sp - 1].clone()),
        }
    }

    /// Make room for `n` more cells, collecting the stack if needed.
    pub(crate) fn ensure_capacity(&mut self, n: usize) -> Result<(), VmError> {
        if self.sp + n > self.stack.len() {
            self.stack_gc()?;
            if self.sp + n > self.stack.len() {
                return Err(VmError::StackOverflow);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Operand fetch
    // ------------------------------------------------------------------------

    fn byte(&mut self) -> Result<u8, VmError> {
        let b = *self
            .code
            .get(self.ip)
            .ok_or(VmError::CodeOverrun { ip: self.ip })?;
        self.ip += 1;
        Ok(b)
    }

    fn word(&mut self) -> Result<i32, VmError> {
        let bytes = self
            .code
            .get(self.ip..self.ip + 4)
            .ok_or(VmError::CodeOverrun { ip: self.ip })?;
        let word = decode_word([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.ip += 4;
        Ok(word)
    }

    /// Target of a relative offset, measured from the current ip.
    pub(crate) fn relative(&self, offset: i32) -> Result<usize, VmError> {
        let target = self.ip as i64 + offset as i64;
        if target < 0 {
            return Err(VmError::InvalidJump {
                ip: self.ip,
                offset,
            });
        }
        Ok(target as usize)
    }

    fn literal(&self, index: i32) -> Result<Value, VmError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.literals.get(i))
            .cloned()
            .ok_or(VmError::BadLiteral(index))
    }

    fn global_name(&self, index: i32) -> Result<Symbol, VmError> {
        match self.literal(index)? {
            Value::Symbol(sym) => Ok(sym),
            other => Err(VmError::type_error("use as a global name", other.type_name())),
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Run until the machine halts or faults.
    pub fn run(&mut self) -> Result<(), VmError> {
        if !self.runnable {
            return Err(VmError::NotRunnable);
        }
        self.native.dispatching = true;
        let result = self.dispatch();
        self.native.dispatching = false;
        result
    }

    fn dispatch(&mut self) -> Result<(), VmError> {
        while self.runnable {
            match self.step() {
                Ok(()) => {}
                Err(VmError::Unwound)
                    if !self.runnable || self.native.escape == Some(Loop::Run) =>
                {
                    self.native.escape = None;
                }
                Err(e) => return Err(self.fault(e)),
            }
        }
        Ok(())
    }

    pub(crate) fn fault(&mut self, e: VmError) -> VmError {
        warn!(ip = self.current, error = %e, "fault");
        self.runnable = false;
        self.native.escape = None;
        e
    }

    /// Execute a single instruction.
    pub fn step(&mut self) -> Result<(), VmError> {
        self.current = self.ip;
        let opcode = self.byte()?;
        let op = Op::from_byte(opcode).ok_or(VmError::InvalidInstruction {
            opcode,
            ip: self.current,
        })?;
        trace!(ip = self.current, %op, sp = self.sp, "dispatch");

        match op {
            Op::Nop => {}
            Op::Push => self.push(self.acc.clone())?,
            Op::Pop => self.acc = self.pop()?,
            Op::Ret => self.restorecont()?,
            Op::No => self.acc = Value::truth(self.acc.is_nil()),
            Op::True => self.acc = Value::True,
            Op::Nil => self.acc = Value::Nil,
            Op::Hlt => self.halt(),
            Op::Add => {
                let lhs = self.pop()?;
                self.acc = arith::add(&lhs, &self.acc)?;
            }
            Op::Sub => {
                let lhs = self.pop()?;
                self.acc = arith::sub(&lhs, &self.acc)?;
            }
            Op::Mul => {
                let lhs = self.pop()?;
                self.acc = arith::mul(&lhs, &self.acc)?;
            }
            Op::Div => {
                let lhs = self.pop()?;
                self.acc = arith::div(&lhs, &self.acc)?;
            }
            Op::Cons => {
                let car = self.pop()?;
                self.acc = Value::cons(car, mem::replace(&mut self.acc, Value::Nil));
            }
            Op::Consr => {
                let cdr = self.pop()?;
                self.acc = Value::cons(mem::replace(&mut self.acc, Value::Nil), cdr);
            }
            Op::Car => self.acc = self.acc.car()?,
            Op::Cdr => self.acc = self.acc.cdr()?,
            Op::Scar => {
                let cell = self.pop()?;
                cell.scar(self.acc.clone())?;
                self.acc = cell;
            }
            Op::Scdr => {
                let cell = self.pop()?;
                cell.scdr(self.acc.clone())?;
                self.acc = cell;
            }
            Op::Is => {
                let lhs = self.pop()?;
                self.acc = Value::truth(lhs.is(&self.acc));
            }
            Op::Dup => self.acc = self.top()?,
            Op::Dcar => {
                self.acc = match self.acc {
                    Value::Nil | Value::Unbound => Value::Unbound,
                    ref v => v.car()?,
                }
            }
            Op::Dcdr => {
                self.acc = match self.acc {
                    Value::Nil | Value::Unbound => Value::Unbound,
                    ref v => v.cdr()?,
                }
            }
            Op::Spl => {
                let tail = self.pop()?;
                self.acc = self.acc.splice(tail)?;
            }
            Op::Ldl => {
                let index = self.word()?;
                self.acc = self.literal(index)?;
            }
            Op::Ldi => self.acc = Value::Fixnum(self.word()? as i64),
            Op::Ldg => {
                let index = self.word()?;
                let sym = self.global_name(index)?;
                self.acc = self
                    .globals
                    .get(&sym)
                    .cloned()
                    .ok_or_else(|| VmError::UnboundSymbol(sym.name().to_string()))?;
            }
            Op::Stg => {
                let index = self.word()?;
                let sym = self.global_name(index)?;
                self.globals.insert(sym, self.acc.clone());
            }
            Op::Apply => {
                self.argc = self.byte()? as usize;
                self.apply()?;
            }
            Op::Cls => {
                let offset = self.word()?;
                let target = self.relative(offset)?;
                let env = self.heapenv()?;
                self.acc = Value::closure(env, target);
            }
            Op::Jmp => {
                let offset = self.word()?;
                self.ip = self.relative(offset)?;
            }
            Op::Jt => {
                let offset = self.word()?;
                if !self.acc.is_nil() {
                    self.ip = self.relative(offset)?;
                }
            }
            Op::Jf => {
                let offset = self.word()?;
                if self.acc.is_nil() {
                    self.ip = self.relative(offset)?;
                }
            }
            Op::Jbnd => {
                let offset = self.word()?;
                if !self.acc.is_unbound() {
                    self.ip = self.relative(offset)?;
                }
            }
            Op::Menv => {
                let n = self.byte()? as usize;
                self.menv(n)?;
            }
            Op::Lde0 => {
                let index = self.byte()? as usize;
                self.acc = self.getenv(0, index)?;
            }
            Op::Ste0 => {
                let index = self.byte()? as usize;
                self.setenv(0, index, self.acc.clone())?;
            }
            Op::Lde => {
                let depth = self.byte()? as usize;
                let index = self.byte()? as usize;
                self.acc = self.getenv(depth, index)?;
            }
            Op::Ste => {
                let depth = self.byte()? as usize;
                let index = self.byte()? as usize;
                self.setenv(depth, index, self.acc.clone())?;
            }
            Op::Cont => {
                let offset = self.word()?;
                self.makecont(offset)?;
            }
            Op::Env | Op::Envr => {
                let required = self.byte()? as usize;
                let extra = self.byte()? as usize;
                let optional = self.byte()? as usize;
                self.build_frame(Arity {
                    required,
                    optional,
                    extra,
                    variadic: op == Op::Envr,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: Vec<u8>) -> Result<Vm, VmError> {
        let mut vm = Vm::new(64);
        vm.load(Program::new(code, vec![]));
        vm.run()?;
        Ok(vm)
    }

    #[test]
    fn ldi_and_halt() {
        let vm = run(vec![0x44, 0x2a, 0, 0, 0, 0x14]).unwrap();
        assert!(matches!(vm.acc(), Value::Fixnum(42)));
        assert_eq!(vm.ip(), 6);
        assert!(!vm.is_runnable());
    }

    #[test]
    fn invalid_opcode_reports_its_ip() {
        let err = run(vec![0x00, 0x00, 0xff]).unwrap_err();
        assert_eq!(err, VmError::InvalidInstruction { opcode: 0xff, ip: 2 });
    }

    #[test]
    fn truncated_operand_is_an_overrun() {
        let err = run(vec![0x44, 0x01]).unwrap_err();
        assert_eq!(err, VmError::CodeOverrun { ip: 1 });
    }

    #[test]
    fn stopped_machine_refuses_to_run() {
        let mut vm = run(vec![0x14]).unwrap();
        assert_eq!(vm.run().unwrap_err(), VmError::NotRunnable);
    }

    #[test]
    fn sub_is_pop_minus_acc() {
        // ldi 10; push; ldi 3; sub; hlt
        let vm = run(vec![0x44, 10, 0, 0, 0, 0x01, 0x44, 3, 0, 0, 0, 0x16, 0x14]).unwrap();
        assert!(matches!(vm.acc(), Value::Fixnum(7)));
    }

    #[test]
    fn unbound_global_faults() {
        let mut vm = Vm::new(16);
        let sym = vm.intern("missing");
        vm.load(Program::new(vec![0x45, 0, 0, 0, 0, 0x14], vec![sym]));
        assert_eq!(
            vm.run().unwrap_err(),
            VmError::UnboundSymbol("missing".to_string())
        );
        assert!(!vm.is_runnable());
    }
}
