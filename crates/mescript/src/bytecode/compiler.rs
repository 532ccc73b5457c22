//! AST to bytecode lowering.
//!
//! The compiler owns the module-wide global name table; slots are handed out
//! in first-use order, with the builtin registry pre-seeded so the VM can
//! mirror the layout. Function bodies compile through a nested compiler that
//! temporarily takes the global table and the collected function list, with
//! a fresh local table whose first slots are the parameters.
//!
//! A function's global name is bound before its body is compiled, so literal
//! self-calls resolve. The function value itself is stored after the body
//! (load of the function constant, store to the bound slot).

use indexmap::IndexMap;

use crate::ast::{Expr, Pos, Stmt};
use crate::builtins::Builtin;
use crate::bytecode::code::{CodeBuilder, CodeObject, Const, Function, JumpLabel};
use crate::bytecode::op::Opcode;
use crate::error::CompileError;

/// Output of module compilation.
#[derive(Debug)]
pub struct CompileResult {
    pub module: CodeObject,
    pub functions: Vec<Function>,
    /// Global names in slot order; the VM sizes its slot array from this.
    pub global_names: Vec<String>,
}

/// Compiles an analysed statement list into a module code object.
pub fn compile_module(stmts: &[Stmt]) -> Result<CompileResult, CompileError> {
    let mut globals = IndexMap::new();
    for builtin in Builtin::ALL {
        let slot = globals.len() as u16;
        globals.insert(builtin.to_string(), slot);
    }
    let mut compiler = Compiler {
        code: CodeBuilder::new("<module>"),
        globals,
        locals: None,
        functions: Vec::new(),
        loop_stack: Vec::new(),
    };
    for stmt in stmts {
        compiler.compile_stmt(stmt)?;
    }
    Ok(CompileResult {
        module: compiler.code.finish(0, Vec::new()),
        functions: compiler.functions,
        global_names: compiler.globals.into_keys().collect(),
    })
}

/// Patch state for the innermost loop.
struct LoopInfo {
    start: usize,
    break_jumps: Vec<JumpLabel>,
}

struct Compiler {
    code: CodeBuilder,
    globals: IndexMap<String, u16>,
    /// `Some` inside a function body.
    locals: Option<IndexMap<String, u16>>,
    functions: Vec<Function>,
    loop_stack: Vec<LoopInfo>,
}

impl Compiler {
    /// Slot of `name` in `table`, registering it at the next free index.
    fn slot(table: &mut IndexMap<String, u16>, name: &str) -> Result<u16, CompileError> {
        if let Some(slot) = table.get(name) {
            return Ok(*slot);
        }
        let slot = u16::try_from(table.len()).map_err(|_| CompileError::TooManyNames)?;
        table.insert(name.to_string(), slot);
        Ok(slot)
    }

    fn emit_load(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(locals) = &self.locals {
            if let Some(slot) = locals.get(name).copied() {
                self.code.emit_u16(Opcode::LoadLocal, slot);
                return Ok(());
            }
        }
        let slot = Self::slot(&mut self.globals, name)?;
        self.code.emit_u16(Opcode::LoadGlobal, slot);
        Ok(())
    }

    /// Pops the value on top of the stack into `name`.
    ///
    /// Declarations always bind in the current scope. Plain assignments
    /// inside a function fall through to an existing global before creating
    /// a new local.
    fn emit_store(&mut self, name: &str, declare: bool) -> Result<(), CompileError> {
        if let Some(locals) = &mut self.locals {
            if let Some(slot) = locals.get(name).copied() {
                self.code.emit_u16(Opcode::StoreLocal, slot);
                return Ok(());
            }
            if declare || !self.globals.contains_key(name) {
                let slot = Self::slot(locals, name)?;
                self.code.emit_u16(Opcode::StoreLocal, slot);
                return Ok(());
            }
        }
        let slot = Self::slot(&mut self.globals, name)?;
        self.code.emit_u16(Opcode::StoreGlobal, slot);
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.compile_stmt(s)?;
                }
            }
            Stmt::Decl {
                name, init, pos, ..
            } => {
                self.code.set_line(pos.line);
                match init {
                    Some(init) => self.compile_expr(init)?,
                    None => self.code.emit_u16(Opcode::LoadConst, 0),
                }
                self.emit_store(name, true)?;
            }
            Stmt::Expr(expr) => {
                self.code.set_line(expr.pos().line);
                // Assignment in statement position stores directly and
                // leaves nothing behind; other expressions pop their value.
                if let Expr::Assign { name, value, .. } = expr {
                    self.compile_expr(value)?;
                    self.emit_store(name, false)?;
                } else {
                    self.compile_expr(expr)?;
                    self.code.emit(Opcode::Pop);
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.code.set_line(cond.pos().line);
                self.compile_expr(cond)?;
                let else_jump = self.code.emit_jump(Opcode::JumpIfFalse);
                self.compile_stmt(then)?;
                match otherwise {
                    Some(otherwise) => {
                        let end_jump = self.code.emit_jump(Opcode::Jump);
                        self.code.patch_jump(else_jump)?;
                        self.compile_stmt(otherwise)?;
                        self.code.patch_jump(end_jump)?;
                    }
                    None => self.code.patch_jump(else_jump)?,
                }
            }
            Stmt::While { cond, body } => {
                let start = self.code.offset();
                self.code.set_line(cond.pos().line);
                self.compile_expr(cond)?;
                let exit_jump = self.code.emit_jump(Opcode::JumpIfFalse);
                self.loop_stack.push(LoopInfo {
                    start,
                    break_jumps: Vec::new(),
                });
                self.compile_stmt(body)?;
                self.code.emit_jump_back(Opcode::Jump, start)?;
                let info = self.loop_stack.pop().expect("loop stack pushed above");
                // Condition failure and break both land just past the loop.
                self.code.patch_jump(exit_jump)?;
                for label in info.break_jumps {
                    self.code.patch_jump(label)?;
                }
            }
            Stmt::Break(pos) => {
                if self.loop_stack.is_empty() {
                    return Err(CompileError::BreakOutsideLoop);
                }
                self.code.set_line(pos.line);
                let label = self.code.emit_jump(Opcode::Jump);
                if let Some(info) = self.loop_stack.last_mut() {
                    info.break_jumps.push(label);
                }
            }
            Stmt::Continue(pos) => {
                let start = self
                    .loop_stack
                    .last()
                    .ok_or(CompileError::ContinueOutsideLoop)?
                    .start;
                self.code.set_line(pos.line);
                self.code.emit_jump_back(Opcode::Jump, start)?;
            }
            Stmt::Return { value, pos } => {
                self.code.set_line(pos.line);
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.code.emit_u16(Opcode::LoadConst, 0),
                }
                self.code.emit(Opcode::Return);
            }
            Stmt::Function {
                name,
                params,
                body,
                pos,
            } => self.compile_function(name, params, body, *pos)?,
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: &str,
        params: &[String],
        body: &[Stmt],
        pos: Pos,
    ) -> Result<(), CompileError> {
        if params.len() > 255 {
            return Err(CompileError::TooManyArguments(params.len()));
        }
        self.code.set_line(pos.line);
        // Bind the global slot before the body so the function can call
        // itself.
        let global_slot = Self::slot(&mut self.globals, name)?;

        let mut locals = IndexMap::new();
        for param in params {
            let slot = locals.len() as u16;
            locals.insert(param.clone(), slot);
        }
        let mut inner = Compiler {
            code: CodeBuilder::new(name),
            globals: std::mem::take(&mut self.globals),
            locals: Some(locals),
            functions: std::mem::take(&mut self.functions),
            loop_stack: Vec::new(),
        };
        inner.code.set_line(pos.line);
        for stmt in body {
            inner.compile_stmt(stmt)?;
        }
        if !inner.code.ends_with_return() {
            inner.code.emit_u16(Opcode::LoadConst, 0);
            inner.code.emit(Opcode::Return);
        }
        let Compiler {
            code,
            globals,
            locals,
            functions,
            ..
        } = inner;
        self.globals = globals;
        self.functions = functions;
        let locals = locals.unwrap_or_default();
        let num_locals = locals.len();
        let local_names = locals.into_keys().collect();

        let function_id = self.functions.len();
        self.functions.push(Function {
            name: name.to_string(),
            arity: params.len(),
            code: code.finish(num_locals, local_names),
        });
        let const_id = self.code.add_const(Const::Function(function_id))?;
        self.code.emit_u16(Opcode::LoadConst, const_id);
        self.code.emit_u16(Opcode::StoreGlobal, global_slot);
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::None(_) => self.code.emit_u16(Opcode::LoadConst, 0),
            Expr::Long(n, _) => {
                let idx = self.code.add_const(Const::Long(*n))?;
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::Float(f, _) => {
                let idx = self.code.add_const(Const::Float(*f))?;
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::Str(s, _) => {
                let idx = self.code.add_const(Const::Str(s.clone()))?;
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::Variable(name, _) => self.emit_load(name)?,
            Expr::Unary { op, operand, .. } => {
                self.compile_expr(operand)?;
                self.code.emit_u8(Opcode::UnaryOp, *op as u8);
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.code.emit_u8(Opcode::BinaryOp, *op as u8);
            }
            Expr::And { lhs, rhs, .. } => {
                self.compile_expr(lhs)?;
                let end = self.code.emit_jump(Opcode::JumpIfFalseOrPop);
                self.compile_expr(rhs)?;
                self.code.patch_jump(end)?;
            }
            Expr::Or { lhs, rhs, .. } => {
                self.compile_expr(lhs)?;
                let end = self.code.emit_jump(Opcode::JumpIfTrueOrPop);
                self.compile_expr(rhs)?;
                self.code.patch_jump(end)?;
            }
            Expr::Assign { name, value, .. } => {
                // In value position: store, then reload the slot so the
                // assignment yields its value.
                self.compile_expr(value)?;
                self.emit_store(name, false)?;
                self.emit_load(name)?;
            }
            Expr::Call { callee, args, .. } => {
                if args.len() > 255 {
                    return Err(CompileError::TooManyArguments(args.len()));
                }
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.code.emit_u8(Opcode::CallFunction, args.len() as u8);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::lexer::lex;
    use crate::parser::parse;

    const NUM_BUILTINS: u16 = Builtin::ALL.len() as u16;

    fn compile_src(source: &str) -> CompileResult {
        let mut diags = Diagnostics::new("test.me");
        let tokens = lex(source, &mut diags);
        let stmts = parse(tokens, &mut diags);
        assert!(!diags.has_errors(), "front end failed: {diags}");
        compile_module(&stmts).expect("compilation failed")
    }

    #[test]
    fn test_expression_statement_is_stack_neutral() {
        let result = compile_src("1");
        assert_eq!(
            result.module.bytecode(),
            &[Opcode::LoadConst as u8, 1, 0, Opcode::Pop as u8]
        );
    }

    #[test]
    fn test_addition_lowering() {
        use crate::bytecode::op::BinOp;
        let result = compile_src("1 + 2");
        assert_eq!(
            result.module.bytecode(),
            &[
                Opcode::LoadConst as u8,
                1,
                0,
                Opcode::LoadConst as u8,
                2,
                0,
                Opcode::BinaryOp as u8,
                BinOp::Add as u8,
                Opcode::Pop as u8,
            ]
        );
    }

    /// Decodes a byte stream into its opcodes, skipping operand bytes. A
    /// raw byte scan would misread operand bytes as opcodes.
    fn opcodes(bytes: &[u8]) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let mut ip = 0;
        while ip < bytes.len() {
            let op = Opcode::try_from(bytes[ip]).unwrap();
            ip += 1 + op.operand_width();
            ops.push(op);
        }
        ops
    }

    #[test]
    fn test_assignment_statement_has_no_pop() {
        let result = compile_src("değişken a = 1\na = 2");
        let bytes = result.module.bytecode();
        // Ends with the store, no residue on the stack.
        assert_eq!(bytes[bytes.len() - 3], Opcode::StoreGlobal as u8);
        assert!(!opcodes(bytes).contains(&Opcode::Pop));
    }

    #[test]
    fn test_builtins_seed_global_slots() {
        let result = compile_src("print(1)");
        assert_eq!(result.global_names[0], "print");
        assert_eq!(result.global_names.len(), usize::from(NUM_BUILTINS));
        // print resolves to slot 0.
        assert_eq!(
            result.module.bytecode()[..3],
            [Opcode::LoadGlobal as u8, 0, 0]
        );
    }

    #[test]
    fn test_while_loop_jump_targets() {
        let result = compile_src("madem (1) { yeter }");
        let bytes = result.module.bytecode();
        // Layout: LoadConst(0..3) JumpIfFalse(3..6) Jump/break(6..9)
        //         Jump/back(9..12), end = 12.
        assert_eq!(bytes.len(), 12);
        let exit = i16::from_le_bytes([bytes[4], bytes[5]]);
        assert_eq!(6 + i64::from(exit), 12);
        let brk = i16::from_le_bytes([bytes[7], bytes[8]]);
        assert_eq!(9 + i64::from(brk), 12);
        let back = i16::from_le_bytes([bytes[10], bytes[11]]);
        assert_eq!(12 + i64::from(back), 0);
    }

    #[test]
    fn test_continue_targets_condition() {
        let result = compile_src("madem (1) { devam }");
        let bytes = result.module.bytecode();
        let cont = i16::from_le_bytes([bytes[7], bytes[8]]);
        assert_eq!(9 + i64::from(cont), 0);
    }

    #[test]
    fn test_if_else_layout() {
        let result = compile_src("şayet (1) { 2 } değilse { 3 }");
        let listing = result.module.disassemble();
        assert!(listing.contains("JumpIfFalse"), "{listing}");
        assert!(listing.contains("Jump"), "{listing}");
    }

    #[test]
    fn test_function_body_and_registration() {
        let result = compile_src("marifet ikiyle(x) {\n tebliğ x * 2\n}");
        assert_eq!(result.functions.len(), 1);
        let func = &result.functions[0];
        assert_eq!(func.name, "ikiyle");
        assert_eq!(func.arity, 1);
        assert_eq!(func.code.num_locals, 1);
        assert_eq!(func.code.local_names, ["x"]);
        // Body loads the parameter from local slot 0 and returns.
        assert_eq!(func.code.bytecode()[..3], [Opcode::LoadLocal as u8, 0, 0]);
        assert_eq!(
            *func.code.bytecode().last().unwrap(),
            Opcode::Return as u8
        );
        // The module stores the function constant into its global slot,
        // which is the first slot after the builtins.
        let bytes = result.module.bytecode();
        assert_eq!(bytes[bytes.len() - 3], Opcode::StoreGlobal as u8);
        let slot = u16::from_le_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        assert_eq!(slot, NUM_BUILTINS);
    }

    #[test]
    fn test_implicit_return_appended() {
        let result = compile_src("marifet bos() {\n}");
        assert_eq!(
            result.functions[0].code.bytecode(),
            &[
                Opcode::LoadConst as u8,
                0,
                0,
                Opcode::Return as u8,
            ]
        );
    }

    #[test]
    fn test_explicit_return_not_doubled() {
        let result = compile_src("marifet bir() {\n tebliğ 1\n}");
        let bytes = result.functions[0].code.bytecode();
        let returns = bytes.iter().filter(|&&b| b == Opcode::Return as u8).count();
        assert_eq!(returns, 1);
    }

    #[test]
    fn test_recursive_call_resolves_before_store() {
        let result = compile_src("marifet tekrar() {\n tekrar()\n}");
        let body = result.functions[0].code.bytecode();
        // The body loads the function's own global slot.
        assert_eq!(body[0], Opcode::LoadGlobal as u8);
        let slot = u16::from_le_bytes([body[1], body[2]]);
        assert_eq!(slot, NUM_BUILTINS);
    }

    #[test]
    fn test_globals_shared_with_function_scope() {
        let result = compile_src(
            "değişken sayaç = 0\nmarifet artır() {\n sayaç = sayaç + 1\n}\nartır()",
        );
        let body = result.functions[0].code.bytecode();
        // The assignment inside the function targets the module global.
        assert!(body.contains(&(Opcode::StoreGlobal as u8)));
        assert!(!body.contains(&(Opcode::StoreLocal as u8)));
    }

    #[test]
    fn test_function_locals_fresh_per_function() {
        let result =
            compile_src("marifet f() {\n değişken yerel = 1\n tebliğ yerel\n}\nmarifet g() {\n değişken başka = 2\n tebliğ başka\n}");
        assert_eq!(result.functions[0].code.local_names, ["yerel"]);
        assert_eq!(result.functions[1].code.local_names, ["başka"]);
    }

    #[test]
    fn test_short_circuit_lowering() {
        let result = compile_src("1 ve 2");
        let bytes = result.module.bytecode();
        assert!(bytes.contains(&(Opcode::JumpIfFalseOrPop as u8)));
        let result = compile_src("1 veya 2");
        assert!(result
            .module
            .bytecode()
            .contains(&(Opcode::JumpIfTrueOrPop as u8)));
    }

    #[test]
    fn test_assignment_in_value_position_reloads() {
        let result = compile_src("değişken a = 0\ndeğişken b = (a = 5)");
        let listing = result.module.disassemble();
        // store a, load a back, store b
        let stores = result
            .module
            .bytecode()
            .iter()
            .filter(|&&b| b == Opcode::StoreGlobal as u8)
            .count();
        assert_eq!(stores, 3, "{listing}");
    }

    #[test]
    fn test_const_pool_reuse_across_statements() {
        let result = compile_src("1\n1\n1");
        // One pool entry for none, one for the shared literal.
        assert_eq!(result.module.const_at(1), Some(&Const::Long(1)));
        assert_eq!(result.module.const_at(2), None);
    }

    #[test]
    fn test_line_numbers_recorded() {
        let result = compile_src("1\n2\n3");
        let code = &result.module;
        assert_eq!(code.line_for_offset(0), 1);
        // Statements are 4 bytes each (LoadConst + Pop).
        assert_eq!(code.line_for_offset(4), 2);
        assert_eq!(code.line_for_offset(8), 3);
    }
}
