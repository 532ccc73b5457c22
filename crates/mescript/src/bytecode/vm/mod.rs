//! The stack virtual machine.
//!
//! One operand stack is shared by all frames; each [`CallFrame`] records the
//! stack floor it may not pop below, so a buggy code object cannot eat a
//! caller's values. The innermost frame's bytecode and instruction pointer
//! are kept in a [`CachedFrame`] local to the dispatch loop and written back
//! only around calls and returns.
//!
//! Values are moved, never cloned implicitly: loads go through
//! `clone_with_heap`, overwritten slots and popped temporaries through
//! `drop_with_heap`, which keeps heap reference counts balanced. After
//! [`Vm::teardown`] a leak shows up as a nonzero `Heap::live_count`.

mod binary;
mod call;

use crate::builtins::Builtin;
use crate::bytecode::code::{CodeObject, Const, Function};
use crate::bytecode::op::{BinOp, Opcode, UnOp};
use crate::error::{RunError, RunResult};
use crate::heap::Heap;
use crate::io::Console;
use crate::value::{MeTrait, Value};

pub use call::MAX_FRAMES;

/// One activation record. The module runs in the bottom frame.
struct CallFrame<'a> {
    code: &'a CodeObject,
    /// Saved instruction pointer; stale for the innermost frame while the
    /// dispatch loop runs on its cache.
    ip: usize,
    /// Operand stack floor for this frame.
    stack_base: usize,
    locals: Vec<Value>,
}

/// Hot copy of the innermost frame.
struct CachedFrame<'a> {
    code: &'a [u8],
    ip: usize,
    /// Offset of the opcode currently being executed, for line lookup.
    last_op: usize,
}

macro_rules! fetch_u8 {
    ($cache:expr) => {{
        let v = $cache.code[$cache.ip];
        $cache.ip += 1;
        v
    }};
}

macro_rules! fetch_u16 {
    ($cache:expr) => {{
        let v = u16::from_le_bytes([$cache.code[$cache.ip], $cache.code[$cache.ip + 1]]);
        $cache.ip += 2;
        v
    }};
}

macro_rules! fetch_i16 {
    ($cache:expr) => {{
        let v = i16::from_le_bytes([$cache.code[$cache.ip], $cache.code[$cache.ip + 1]]);
        $cache.ip += 2;
        v
    }};
}

macro_rules! reload_cache {
    ($vm:expr, $cache:expr) => {{
        let frame = $vm.frames.last().expect("frame stack is never empty");
        $cache = CachedFrame {
            code: frame.code.bytecode(),
            ip: frame.ip,
            last_op: frame.ip,
        };
    }};
}

pub struct Vm<'a, C: Console> {
    functions: &'a [Function],
    global_names: &'a [String],
    console: &'a mut C,
    heap: Heap,
    stack: Vec<Value>,
    globals: Vec<Value>,
    frames: Vec<CallFrame<'a>>,
}

impl<'a, C: Console> Vm<'a, C> {
    pub fn new(functions: &'a [Function], global_names: &'a [String], console: &'a mut C) -> Self {
        // Slots whose name is a builtin start populated; everything else
        // starts undefined until a store hits it.
        let globals = global_names
            .iter()
            .map(|name| match name.parse::<Builtin>() {
                Ok(builtin) => Value::Builtin(builtin),
                Err(_) => Value::Undefined,
            })
            .collect();
        Self {
            functions,
            global_names,
            console,
            heap: Heap::new(),
            stack: Vec::new(),
            globals,
            frames: Vec::new(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn functions(&self) -> &'a [Function] {
        self.functions
    }

    /// Executes `module` to completion.
    ///
    /// `Ok(Some(..))` is the value of a module-level `tebliğ`; running off
    /// the end of the module yields `Ok(None)`. Runtime errors are prefixed
    /// with the source line of the failing instruction.
    pub fn run(&mut self, module: &'a CodeObject) -> RunResult<Option<Value>> {
        self.frames.push(CallFrame {
            code: module,
            ip: 0,
            stack_base: self.stack.len(),
            locals: Vec::new(),
        });
        let mut cache = CachedFrame {
            code: module.bytecode(),
            ip: 0,
            last_op: 0,
        };
        match self.execute(&mut cache) {
            Err(RunError::Runtime { kind, message }) => {
                let line = self
                    .frames
                    .last()
                    .map_or(0, |f| f.code.line_for_offset(cache.last_op));
                Err(RunError::Runtime {
                    kind,
                    message: format!("line {line}: {message}"),
                })
            }
            other => other,
        }
    }

    fn execute(&mut self, cache: &mut CachedFrame<'a>) -> RunResult<Option<Value>> {
        loop {
            if cache.ip >= cache.code.len() {
                // Only the module frame may run off the end; function
                // bodies always end in Return.
                return Ok(None);
            }
            cache.last_op = cache.ip;
            let byte = fetch_u8!(cache);
            let op = Opcode::try_from(byte).map_err(|e| RunError::InvalidOpcode(e.0))?;
            match op {
                Opcode::Nop => {}
                Opcode::Pop => {
                    let value = self.pop()?;
                    value.drop_with_heap(&mut self.heap);
                }
                Opcode::LoadConst => {
                    let idx = fetch_u16!(cache);
                    self.load_const(idx)?;
                }
                Opcode::LoadGlobal => {
                    let slot = usize::from(fetch_u16!(cache));
                    self.load_global(slot)?;
                }
                Opcode::StoreGlobal => {
                    let slot = usize::from(fetch_u16!(cache));
                    self.store_global(slot)?;
                }
                Opcode::LoadLocal => {
                    let slot = usize::from(fetch_u16!(cache));
                    let frame = self.frames.last().expect("frame stack is never empty");
                    let value = match frame.locals.get(slot) {
                        Some(v) => v.clone_with_heap(&mut self.heap),
                        None => return Err(RunError::generic("local slot out of range")),
                    };
                    self.stack.push(value);
                }
                Opcode::StoreLocal => {
                    let slot = usize::from(fetch_u16!(cache));
                    let value = self.pop()?;
                    let frame = self.frames.last_mut().expect("frame stack is never empty");
                    let Some(target) = frame.locals.get_mut(slot) else {
                        value.drop_with_heap(&mut self.heap);
                        return Err(RunError::generic("local slot out of range"));
                    };
                    let old = std::mem::replace(target, value);
                    old.drop_with_heap(&mut self.heap);
                }
                Opcode::BinaryOp => {
                    let operand = fetch_u8!(cache);
                    let Some(op) = BinOp::from_repr(operand) else {
                        return Err(RunError::InvalidOpcode(byte));
                    };
                    self.binary_op(op)?;
                }
                Opcode::UnaryOp => {
                    let operand = fetch_u8!(cache);
                    let Some(op) = UnOp::from_repr(operand) else {
                        return Err(RunError::InvalidOpcode(byte));
                    };
                    self.unary_op(op)?;
                }
                Opcode::Jump => {
                    let rel = fetch_i16!(cache);
                    cache.ip = apply_jump(cache.ip, rel);
                }
                Opcode::JumpIfFalse => {
                    let rel = fetch_i16!(cache);
                    let cond = self.pop()?;
                    let truthy = cond.me_bool(&self.heap);
                    cond.drop_with_heap(&mut self.heap);
                    if !truthy {
                        cache.ip = apply_jump(cache.ip, rel);
                    }
                }
                Opcode::JumpIfFalseOrPop => {
                    let rel = fetch_i16!(cache);
                    if self.peek()?.me_bool(&self.heap) {
                        let value = self.pop()?;
                        value.drop_with_heap(&mut self.heap);
                    } else {
                        cache.ip = apply_jump(cache.ip, rel);
                    }
                }
                Opcode::JumpIfTrueOrPop => {
                    let rel = fetch_i16!(cache);
                    if self.peek()?.me_bool(&self.heap) {
                        cache.ip = apply_jump(cache.ip, rel);
                    } else {
                        let value = self.pop()?;
                        value.drop_with_heap(&mut self.heap);
                    }
                }
                Opcode::CallFunction => {
                    let argc = fetch_u8!(cache);
                    // Write the ip back so the frame resumes past the call.
                    self.frames
                        .last_mut()
                        .expect("frame stack is never empty")
                        .ip = cache.ip;
                    if self.call_function(argc)? {
                        reload_cache!(self, *cache);
                    }
                }
                Opcode::Return => {
                    let value = self.pop()?;
                    let frame = self.frames.pop().expect("frame stack is never empty");
                    while self.stack.len() > frame.stack_base {
                        let leftover = self.stack.pop().expect("length checked above");
                        leftover.drop_with_heap(&mut self.heap);
                    }
                    for local in frame.locals {
                        local.drop_with_heap(&mut self.heap);
                    }
                    if self.frames.is_empty() {
                        return Ok(Some(value));
                    }
                    self.stack.push(value);
                    reload_cache!(self, *cache);
                }
            }
        }
    }

    fn load_const(&mut self, idx: u16) -> RunResult<()> {
        let code = self.frames.last().expect("frame stack is never empty").code;
        let value = match code.const_at(idx) {
            Some(Const::None) => Value::None,
            Some(Const::Long(n)) => Value::Long(*n),
            Some(Const::Float(f)) => Value::Float(*f),
            Some(Const::Str(s)) => {
                let s = s.clone();
                Value::new_str(&mut self.heap, s)
            }
            Some(Const::Function(id)) => Value::Function(*id),
            None => {
                return Err(RunError::generic(format!(
                    "constant index {idx} out of range"
                )))
            }
        };
        self.stack.push(value);
        Ok(())
    }

    fn load_global(&mut self, slot: usize) -> RunResult<()> {
        let value = match self.globals.get(slot) {
            Some(Value::Undefined) | None => {
                let name = self
                    .global_names
                    .get(slot)
                    .map_or("?", String::as_str);
                return Err(RunError::generic(format!("name '{name}' is not defined")));
            }
            Some(v) => v.clone_with_heap(&mut self.heap),
        };
        self.stack.push(value);
        Ok(())
    }

    fn store_global(&mut self, slot: usize) -> RunResult<()> {
        let value = self.pop()?;
        let Some(target) = self.globals.get_mut(slot) else {
            value.drop_with_heap(&mut self.heap);
            return Err(RunError::generic("global slot out of range"));
        };
        let old = std::mem::replace(target, value);
        old.drop_with_heap(&mut self.heap);
        Ok(())
    }

    /// Pops the top of the stack, honoring the current frame's floor.
    fn pop(&mut self) -> RunResult<Value> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= floor {
            return Err(RunError::StackUnderflow);
        }
        Ok(self.stack.pop().expect("length checked above"))
    }

    fn peek(&self) -> RunResult<&Value> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= floor {
            return Err(RunError::StackUnderflow);
        }
        Ok(self.stack.last().expect("length checked above"))
    }

    /// Releases everything still held: frames, stack residue, globals.
    pub fn teardown(&mut self) {
        while let Some(frame) = self.frames.pop() {
            for local in frame.locals {
                local.drop_with_heap(&mut self.heap);
            }
        }
        while let Some(value) = self.stack.pop() {
            value.drop_with_heap(&mut self.heap);
        }
        for slot in std::mem::take(&mut self.globals) {
            slot.drop_with_heap(&mut self.heap);
        }
    }
}

fn apply_jump(ip: usize, rel: i16) -> usize {
    (ip as i64 + i64::from(rel)) as usize
}
