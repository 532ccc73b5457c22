//! Abstract syntax tree produced by the parser.
//!
//! Compound assignment and increment/decrement never reach this level; the
//! parser desugars them into plain assignments of binary expressions.

use crate::bytecode::op::{BinOp, UnOp};

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// `değişken x = e` / `sabit x = e`
    Decl {
        name: String,
        constant: bool,
        init: Option<Expr>,
        pos: Pos,
    },
    /// An expression in statement position.
    Expr(Expr),
    /// `şayet (cond) then değilse otherwise`
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    /// `madem (cond) body`
    While { cond: Expr, body: Box<Stmt> },
    /// `marifet name(params) { body }`
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        pos: Pos,
    },
    /// `tebliğ e`
    Return { value: Option<Expr>, pos: Pos },
    /// `yeter`
    Break(Pos),
    /// `devam`
    Continue(Pos),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    None(Pos),
    Long(i64, Pos),
    Float(f64, Pos),
    Str(String, Pos),
    Variable(String, Pos),
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    /// `a ve b`, short-circuiting.
    And {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    /// `a veya b`, short-circuiting.
    Or {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Assign {
        name: String,
        value: Box<Expr>,
        pos: Pos,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        pos: Pos,
    },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::None(pos)
            | Expr::Long(_, pos)
            | Expr::Float(_, pos)
            | Expr::Str(_, pos)
            | Expr::Variable(_, pos) => *pos,
            Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::And { pos, .. }
            | Expr::Or { pos, .. }
            | Expr::Assign { pos, .. }
            | Expr::Call { pos, .. } => *pos,
        }
    }
}
