//! Call and frame management.

use super::{CallFrame, Vm};
use crate::error::{RunError, RunResult};
use crate::io::Console;
use crate::value::{MeTrait, Value};

/// Frame depth limit; exceeding it is a runtime error, not a crash.
pub const MAX_FRAMES: usize = 1000;

impl<C: Console> Vm<'_, C> {
    /// Calls the value sitting below `argc` arguments on the stack.
    ///
    /// Builtins complete in place and leave their result on the stack;
    /// script functions push a frame instead, in which case this returns
    /// `true` and the caller must reload its instruction cache.
    pub(super) fn call_function(&mut self, argc: u8) -> RunResult<bool> {
        let argc = usize::from(argc);
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() < floor + argc + 1 {
            return Err(RunError::StackUnderflow);
        }
        let args: Vec<Value> = self.stack.split_off(self.stack.len() - argc);
        let callee = self.stack.pop().expect("length checked above");
        match callee {
            Value::Builtin(builtin) => {
                let result = builtin.call(args, &mut self.heap, self.functions, self.console)?;
                self.stack.push(result);
                Ok(false)
            }
            Value::Function(id) => {
                let Some(function) = self.functions.get(id) else {
                    self.release(args);
                    return Err(RunError::generic(format!("unknown function #{id}")));
                };
                if args.len() != function.arity {
                    let plural = if function.arity == 1 { "" } else { "s" };
                    let message = format!(
                        "{}() expects {} argument{plural}, got {}",
                        function.name,
                        function.arity,
                        args.len()
                    );
                    self.release(args);
                    return Err(RunError::type_mismatch(message));
                }
                if self.frames.len() >= MAX_FRAMES {
                    self.release(args);
                    return Err(RunError::generic("maximum recursion depth exceeded"));
                }
                // Arguments become the first locals, remaining slots start
                // undefined.
                let mut locals = args;
                locals.resize_with(function.code.num_locals, Value::default);
                self.frames.push(CallFrame {
                    code: &function.code,
                    ip: 0,
                    stack_base: self.stack.len(),
                    locals,
                });
                Ok(true)
            }
            other => {
                let found = other.me_type(&self.heap);
                other.drop_with_heap(&mut self.heap);
                self.release(args);
                Err(RunError::type_mismatch(format!("{found} is not callable")))
            }
        }
    }

    fn release(&mut self, values: Vec<Value>) {
        for value in values {
            value.drop_with_heap(&mut self.heap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::code::{CodeBuilder, Const, Function};
    use crate::bytecode::op::Opcode;
    use crate::error::ErrorKind;
    use crate::io::CollectConsole;

    /// A function body that returns its single parameter.
    fn identity_function() -> Function {
        let mut b = CodeBuilder::new("kimlik");
        b.emit_u16(Opcode::LoadLocal, 0);
        b.emit(Opcode::Return);
        Function {
            name: "kimlik".to_string(),
            arity: 1,
            code: b.finish(1, vec!["x".to_string()]),
        }
    }

    fn run_module(
        functions: &[Function],
        build: impl FnOnce(&mut CodeBuilder),
    ) -> RunResult<Option<String>> {
        let mut b = CodeBuilder::new("<module>");
        build(&mut b);
        let module = b.finish(0, Vec::new());
        let mut console = CollectConsole::new();
        let mut vm = Vm::new(functions, &[], &mut console);
        let result = vm.run(&module).map(|opt| {
            opt.map(|value| {
                let text = value.me_str(vm.heap(), functions);
                value.drop_with_heap(vm.heap_mut());
                text
            })
        });
        vm.teardown();
        assert_eq!(vm.heap().live_count(), 0, "leaked heap entries");
        result
    }

    #[test]
    fn test_call_returns_to_caller() {
        let functions = [identity_function()];
        let result = run_module(&functions, |b| {
            let f = b.add_const(Const::Function(0)).unwrap();
            let arg = b.add_const(Const::Long(5)).unwrap();
            b.emit_u16(Opcode::LoadConst, f);
            b.emit_u16(Opcode::LoadConst, arg);
            b.emit_u8(Opcode::CallFunction, 1);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Some("5".to_string())));
    }

    #[test]
    fn test_wrong_arity_is_a_runtime_error() {
        let functions = [identity_function()];
        let err = run_module(&functions, |b| {
            let f = b.add_const(Const::Function(0)).unwrap();
            b.emit_u16(Opcode::LoadConst, f);
            b.emit_u8(Opcode::CallFunction, 0);
            b.emit(Opcode::Return);
        })
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::TypeMismatch));
        assert!(
            err.to_string().contains("kimlik() expects 1 argument, got 0"),
            "{err}"
        );
    }

    #[test]
    fn test_calling_a_long_fails() {
        let err = run_module(&[], |b| {
            let n = b.add_const(Const::Long(3)).unwrap();
            b.emit_u16(Opcode::LoadConst, n);
            b.emit_u8(Opcode::CallFunction, 0);
            b.emit(Opcode::Return);
        })
        .unwrap_err();
        assert!(err.to_string().contains("Long is not callable"), "{err}");
    }

    #[test]
    fn test_recursion_limit() {
        // A function whose body calls itself through its own constant pool.
        let mut b = CodeBuilder::new("sonsuz");
        let f = b.add_const(Const::Function(0)).unwrap();
        b.emit_u16(Opcode::LoadConst, f);
        b.emit_u8(Opcode::CallFunction, 0);
        b.emit(Opcode::Return);
        let functions = [Function {
            name: "sonsuz".to_string(),
            arity: 0,
            code: b.finish(0, Vec::new()),
        }];
        let err = run_module(&functions, |b| {
            let f = b.add_const(Const::Function(0)).unwrap();
            b.emit_u16(Opcode::LoadConst, f);
            b.emit_u8(Opcode::CallFunction, 0);
            b.emit(Opcode::Return);
        })
        .unwrap_err();
        assert!(
            err.to_string().contains("maximum recursion depth"),
            "{err}"
        );
    }

    #[test]
    fn test_builtin_call_through_vm() {
        // The print builtin reached through its pre-seeded global slot.
        let mut b = CodeBuilder::new("<module>");
        let msg = b.add_const(Const::Str("selam".to_string())).unwrap();
        b.emit_u16(Opcode::LoadGlobal, 0);
        b.emit_u16(Opcode::LoadConst, msg);
        b.emit_u8(Opcode::CallFunction, 1);
        b.emit(Opcode::Pop);
        let module = b.finish(0, Vec::new());
        let names = vec!["print".to_string()];
        let mut console = CollectConsole::new();
        let mut vm = Vm::new(&[], &names, &mut console);
        let result = vm.run(&module);
        assert!(result.is_ok(), "{result:?}");
        vm.teardown();
        assert_eq!(vm.heap().live_count(), 0);
        drop(vm);
        assert_eq!(console.output(), "selam\n");
    }
}
