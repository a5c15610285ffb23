//! The abstract syntax tree for the restricted C subset this compiler
//! accepts: a single `int main() { ... }` function body made of
//! declarations, expression statements, and `return`.

use crate::common::Id;

#[derive(Debug)]
pub struct Program {
    pub main: FuncDef,
}

#[derive(Debug)]
pub struct FuncDef {
    pub name: Id,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    /// `int name;` or `int name = init;`
    Decl { name: Id, init: Option<Expr> },
    /// `return expr;`
    Return(Expr),
    /// An expression evaluated for its side effect, e.g. a bare assignment.
    Expr(Expr),
}

/// `Debug` is hand-written in [`super::parse`] to print as a readable
/// s-expression rather than the derived field-by-field form.
pub enum Expr {
    Const(i64),
    Id(Id),
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lvalue = rvalue` when `op` is `None`, `lvalue op= rvalue` otherwise.
    /// The lvalue is currently restricted to a bare identifier.
    Assign {
        op: Option<BinOp>,
        lvalue: Box<Expr>,
        rvalue: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}
