//! High-level embedding API: compile once, run against any console.

use thiserror::Error;

use crate::analyser::analyse;
use crate::bytecode::code::{CodeObject, Function};
use crate::bytecode::compiler::compile_module;
use crate::bytecode::vm::Vm;
use crate::diagnostics::Diagnostics;
use crate::error::{CompileError, RunResult};
use crate::io::Console;
use crate::lexer::lex;
use crate::parser::parse;
use crate::value::MeTrait;

/// Why a source text could not be turned into a [`Program`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The front end rejected the source; the diagnostics carry positions.
    #[error("{0}")]
    Diagnostics(Diagnostics),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A compiled program, ready to run.
#[derive(Debug)]
pub struct Program {
    module: CodeObject,
    functions: Vec<Function>,
    global_names: Vec<String>,
}

impl Program {
    /// Compiles `source`. `file` is only used in diagnostic messages.
    ///
    /// The front end collects as many diagnostics as it can before giving
    /// up; bytecode lowering only runs on a clean pass.
    pub fn compile(file: &str, source: &str) -> Result<Program, BuildError> {
        let mut diags = Diagnostics::new(file);
        let tokens = lex(source, &mut diags);
        let stmts = parse(tokens, &mut diags);
        analyse(&stmts, &mut diags);
        if diags.has_errors() {
            return Err(BuildError::Diagnostics(diags));
        }
        let compiled = compile_module(&stmts)?;
        Ok(Program {
            module: compiled.module,
            functions: compiled.functions,
            global_names: compiled.global_names,
        })
    }

    /// Runs the program. A module-level `tebliğ` value comes back
    /// stringified; a program that runs off the end yields `None`.
    pub fn run<C: Console>(&self, console: &mut C) -> RunResult<Option<String>> {
        let mut vm = Vm::new(&self.functions, &self.global_names, console);
        let result = vm.run(&self.module).map(|opt| {
            opt.map(|value| {
                let text = value.me_str(vm.heap(), &self.functions);
                value.drop_with_heap(vm.heap_mut());
                text
            })
        });
        vm.teardown();
        debug_assert_eq!(vm.heap().live_count(), 0, "heap not drained after run");
        result
    }

    /// Instruction listing of the module and every function.
    pub fn disassemble(&self) -> String {
        let mut out = self.module.disassemble();
        for function in &self.functions {
            out.push('\n');
            out.push_str(&function.code.disassemble());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectConsole;

    #[test]
    fn test_compile_collects_multiple_diagnostics() {
        let err = Program::compile("test.me", "a = 1\nb = 2").unwrap_err();
        let BuildError::Diagnostics(diags) = err else {
            panic!("expected diagnostics");
        };
        assert_eq!(diags.error_count(), 2);
    }

    #[test]
    fn test_program_is_reusable() {
        let program = Program::compile("test.me", "print(7)").unwrap();
        for _ in 0..2 {
            let mut console = CollectConsole::new();
            assert_eq!(program.run(&mut console), Ok(None));
            assert_eq!(console.output(), "7\n");
        }
    }

    #[test]
    fn test_disassemble_lists_functions() {
        let program =
            Program::compile("test.me", "marifet sel() {\n tebliğ 1\n}\nsel()").unwrap();
        let listing = program.disassemble();
        assert!(listing.contains("<module>:"), "{listing}");
        assert!(listing.contains("sel:"), "{listing}");
        assert!(listing.contains("CallFunction"), "{listing}");
    }
}
