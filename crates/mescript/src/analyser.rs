//! Semantic checks over the AST.
//!
//! Runs after parsing and before bytecode lowering. Everything found here is
//! a diagnostic, so one pass can report multiple problems; the compiler
//! assumes an AST that passed this stage.
//!
//! Checks: use of undeclared names, re-declaration within a scope,
//! assignment to constants, `yeter`/`devam` outside loops, nested function
//! declarations, and argument counts for calls whose target is a known
//! function declaration.

use ahash::AHashMap;

use crate::ast::{Expr, Pos, Stmt};
use crate::builtins::Builtin;
use crate::diagnostics::{Diagnostics, Stage};

#[derive(Debug, Clone, Copy)]
struct Symbol {
    constant: bool,
    kind: SymKind,
}

#[derive(Debug, Clone, Copy)]
enum SymKind {
    Var,
    Function { arity: usize },
    Builtin,
}

/// Checks `stmts`, recording problems in `diags`.
pub fn analyse(stmts: &[Stmt], diags: &mut Diagnostics) {
    let mut globals = AHashMap::new();
    for builtin in Builtin::ALL {
        globals.insert(
            builtin.to_string(),
            Symbol {
                constant: false,
                kind: SymKind::Builtin,
            },
        );
    }
    let mut analyser = Analyser {
        diags,
        scopes: vec![globals],
        loop_depth: 0,
        in_function: false,
    };
    for stmt in stmts {
        analyser.check_stmt(stmt);
    }
}

struct Analyser<'a> {
    diags: &'a mut Diagnostics,
    scopes: Vec<AHashMap<String, Symbol>>,
    loop_depth: usize,
    in_function: bool,
}

impl Analyser<'_> {
    fn error(&mut self, pos: Pos, message: String) {
        self.diags.error(Stage::Analyser, pos.line, pos.col, message);
    }

    fn declare(&mut self, name: &str, symbol: Symbol, pos: Pos) {
        let taken = self
            .scopes
            .last()
            .expect("scope stack is never empty")
            .contains_key(name);
        if taken {
            self.error(pos, format!("name '{name}' is already declared in this scope"));
        } else {
            self.scopes
                .last_mut()
                .expect("scope stack is never empty")
                .insert(name.to_string(), symbol);
        }
    }

    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .copied()
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(stmts) => {
                self.scopes.push(AHashMap::new());
                for s in stmts {
                    self.check_stmt(s);
                }
                self.scopes.pop();
            }
            Stmt::Decl {
                name,
                constant,
                init,
                pos,
            } => {
                // The initializer sees the outer binding, not the new one.
                if let Some(init) = init {
                    self.check_expr(init);
                }
                self.declare(
                    name,
                    Symbol {
                        constant: *constant,
                        kind: SymKind::Var,
                    },
                    *pos,
                );
            }
            Stmt::Expr(expr) => self.check_expr(expr),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.check_expr(cond);
                self.check_stmt(then);
                if let Some(otherwise) = otherwise {
                    self.check_stmt(otherwise);
                }
            }
            Stmt::While { cond, body } => {
                self.check_expr(cond);
                self.loop_depth += 1;
                self.check_stmt(body);
                self.loop_depth -= 1;
            }
            Stmt::Function {
                name,
                params,
                body,
                pos,
            } => {
                if self.in_function {
                    self.error(*pos, "nested function declarations are not supported".to_string());
                    return;
                }
                // Declared before the body so the function can call itself.
                self.declare(
                    name,
                    Symbol {
                        constant: false,
                        kind: SymKind::Function {
                            arity: params.len(),
                        },
                    },
                    *pos,
                );
                let mut scope = AHashMap::new();
                for param in params {
                    if scope
                        .insert(
                            param.clone(),
                            Symbol {
                                constant: false,
                                kind: SymKind::Var,
                            },
                        )
                        .is_some()
                    {
                        self.error(*pos, format!("duplicate parameter '{param}'"));
                    }
                }
                self.scopes.push(scope);
                let saved_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
                self.in_function = true;
                for s in body {
                    self.check_stmt(s);
                }
                self.in_function = false;
                self.loop_depth = saved_loop_depth;
                self.scopes.pop();
            }
            Stmt::Return { value, .. } => {
                // Module-level return ends the program, so it is allowed.
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Break(pos) => {
                if self.loop_depth == 0 {
                    self.error(*pos, "'yeter' outside of a loop".to_string());
                }
            }
            Stmt::Continue(pos) => {
                if self.loop_depth == 0 {
                    self.error(*pos, "'devam' outside of a loop".to_string());
                }
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::None(_) | Expr::Long(..) | Expr::Float(..) | Expr::Str(..) => {}
            Expr::Variable(name, pos) => {
                if self.lookup(name).is_none() {
                    self.error(*pos, format!("undeclared name '{name}'"));
                }
            }
            Expr::Unary { operand, .. } => self.check_expr(operand),
            Expr::Binary { lhs, rhs, .. }
            | Expr::And { lhs, rhs, .. }
            | Expr::Or { lhs, rhs, .. } => {
                self.check_expr(lhs);
                self.check_expr(rhs);
            }
            Expr::Assign { name, value, pos } => {
                match self.lookup(name) {
                    None => self.error(*pos, format!("undeclared name '{name}'")),
                    Some(symbol) if symbol.constant => {
                        self.error(*pos, format!("cannot assign to constant '{name}'"));
                    }
                    Some(_) => {}
                }
                self.check_expr(value);
            }
            Expr::Call { callee, args, pos } => {
                self.check_expr(callee);
                if let Expr::Variable(name, _) = callee.as_ref() {
                    if let Some(Symbol {
                        kind: SymKind::Function { arity },
                        ..
                    }) = self.lookup(name)
                    {
                        if args.len() != arity {
                            let plural = if arity == 1 { "" } else { "s" };
                            self.error(
                                *pos,
                                format!(
                                    "'{name}' expects {arity} argument{plural}, got {}",
                                    args.len()
                                ),
                            );
                        }
                    }
                }
                for arg in args {
                    self.check_expr(arg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn analyse_src(source: &str) -> Diagnostics {
        let mut diags = Diagnostics::new("test.me");
        let tokens = lex(source, &mut diags);
        let stmts = parse(tokens, &mut diags);
        assert!(!diags.has_errors(), "front end failed: {diags}");
        analyse(&stmts, &mut diags);
        diags
    }

    fn assert_clean(source: &str) {
        let diags = analyse_src(source);
        assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");
    }

    fn assert_errors(source: &str, needle: &str) {
        let diags = analyse_src(source);
        assert!(diags.has_errors(), "expected diagnostics for {source:?}");
        assert!(
            diags.iter().any(|d| d.message.contains(needle)),
            "no diagnostic containing {needle:?} in: {diags}"
        );
    }

    #[test]
    fn test_undeclared_name() {
        assert_errors("a = 1", "undeclared name 'a'");
        assert_errors("print(b)", "undeclared name 'b'");
    }

    #[test]
    fn test_declared_names_resolve() {
        assert_clean("değişken a = 1\na = a + 1\nprint(a)");
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        assert_errors("değişken a = 1\ndeğişken a = 2", "already declared");
        // A nested block is a fresh scope.
        assert_clean("değişken a = 1\n{\n değişken a = 2\n}");
    }

    #[test]
    fn test_const_assignment() {
        assert_errors("sabit a = 1\na = 2", "cannot assign to constant 'a'");
        assert_errors("sabit a = 1\na += 1", "cannot assign to constant 'a'");
    }

    #[test]
    fn test_break_continue_outside_loop() {
        assert_errors("yeter", "'yeter' outside of a loop");
        assert_errors("devam", "'devam' outside of a loop");
        assert_clean("madem (1) { yeter }");
        // The loop does not leak into a function body.
        assert_errors("madem (1) { marifet f() { yeter } }", "'yeter' outside");
    }

    #[test]
    fn test_nested_functions_rejected() {
        assert_errors(
            "marifet dış() {\n marifet iç() {\n tebliğ 1\n }\n}",
            "nested function declarations",
        );
    }

    #[test]
    fn test_known_arity_checked() {
        assert_errors(
            "marifet topla(a, b) {\n tebliğ a + b\n}\ntopla(1)",
            "'topla' expects 2 arguments, got 1",
        );
        assert_clean("marifet topla(a, b) {\n tebliğ a + b\n}\ntopla(1, 2)");
    }

    #[test]
    fn test_recursion_resolves() {
        assert_clean(
            "marifet fakt(n) {\n şayet (n <= 1) { tebliğ 1 }\n tebliğ n * fakt(n - 1)\n}",
        );
    }

    #[test]
    fn test_builtins_are_predeclared() {
        assert_clean("print(int(\"3\"))");
    }

    #[test]
    fn test_duplicate_parameter() {
        assert_errors("marifet f(a, a) { tebliğ a }", "duplicate parameter");
    }
}
