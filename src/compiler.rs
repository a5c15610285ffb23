//! Lowers the restricted C abstract syntax tree ([`crate::front::ast`]) into
//! mnemonic assembly text ready for [`crate::asm::assemble`].
//!
//! Two invariants hold throughout expression lowering (`right_gen`):
//! after evaluating any expression the result sits in `R1`, and an
//! intermediate value that a nested evaluation might clobber is preserved by
//! `PUSH`ing it rather than trusting a register to survive the recursion.

use derive_more::{Display, Error};

use crate::asm::{self, AssembleError};
use crate::common::{Id, Map};
use crate::front::ast::*;
use crate::front::parse::{parse, ParseError};
use crate::isa::{ArithOp, Register};
use crate::os;
use crate::vm::VmError;

/// The registers the compiler always saves across a call, in save/restore
/// order. Fixed for this single-function subset; a multi-function compiler
/// would compute this per call site instead.
const SAVED_REGISTERS: [Register; 2] = [Register::R1, Register::R2];

#[derive(Debug, Display, Error)]
pub enum CompileError {
    #[display("{_0}")]
    Parse(#[error(source)] ParseError),
    #[display("undeclared variable {_0}")]
    UndeclaredVariable(#[error(not(source))] Id),
    #[display("variable {_0} declared twice")]
    DuplicateVariable(#[error(not(source))] Id),
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

/// Everything that can go wrong compiling and then immediately running a
/// source string, i.e. the failure type of [`run_source`].
#[derive(Debug, Display, Error)]
pub enum RunError {
    #[display("{_0}")]
    Compile(#[error(source)] CompileError),
    #[display("{_0}")]
    Assemble(#[error(source)] AssembleError),
    #[display("{_0}")]
    Vm(#[error(source)] VmError),
}

impl From<CompileError> for RunError {
    fn from(e: CompileError) -> Self {
        RunError::Compile(e)
    }
}

impl From<AssembleError> for RunError {
    fn from(e: AssembleError) -> Self {
        RunError::Assemble(e)
    }
}

impl From<VmError> for RunError {
    fn from(e: VmError) -> Self {
        RunError::Vm(e)
    }
}

/// Per-function record: where each local variable lives relative to `BP`.
/// Built by a pre-pass over the function body before any code is emitted,
/// so a forward reference to a later declaration is rejected up front
/// rather than surfacing as a VM fault at run time.
struct Scope {
    /// Declaration index of each local, 0-based in source order.
    vars: Map<Id, i64>,
}

impl Scope {
    fn collect(body: &[Stmt]) -> Result<Scope, CompileError> {
        let mut vars = Map::new();
        let mut next = 0i64;
        for stmt in body {
            if let Stmt::Decl { name, .. } = stmt {
                if vars.insert(*name, next).is_some() {
                    return Err(CompileError::DuplicateVariable(*name));
                }
                next += 1;
            }
        }
        Ok(Scope { vars })
    }

    /// Offset from `BP` of the variable's single storage word: the frame
    /// holds, from `BP` downward, the saved registers in `SAVED_REGISTERS`
    /// order and then the locals in declaration order, so variable `i`
    /// lives at `BP - (1 + SAVED_REGISTERS.len() + i)`.
    fn offset_of(&self, name: &Id) -> Result<i64, CompileError> {
        let i = *self
            .vars
            .get(name)
            .ok_or(CompileError::UndeclaredVariable(*name))?;
        Ok(-(1 + SAVED_REGISTERS.len() as i64 + i))
    }
}

/// Accumulates mnemonic lines for one function. Reset per [`compile`] call,
/// never reused across functions or across compilations.
struct CompileContext {
    code: Vec<String>,
    scope: Scope,
}

impl CompileContext {
    fn emit(&mut self, line: impl Into<String>) {
        self.code.push(line.into());
    }

    /// Leaves the address of `name` in `R1`.
    fn load_addr_of(&mut self, name: &Id) -> Result<(), CompileError> {
        let offset = self.scope.offset_of(name)?;
        self.emit(format!("ADD R1 BP {offset}"));
        Ok(())
    }

    /// Lvalue lowering: leaves the evaluated address in `R1`. The parser
    /// restricts lvalues to bare identifiers, so this never sees anything
    /// else.
    fn left_gen(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Id(name) => self.load_addr_of(name),
            _ => unreachable!("parser only admits identifier lvalues"),
        }
    }

    /// Rvalue lowering: leaves the evaluated value in `R1`, net-zero effect
    /// on the operand stack.
    fn right_gen(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Const(v) => {
                self.emit(format!("MOV R1 {v}"));
                Ok(())
            }
            Expr::Id(name) => {
                self.load_addr_of(name)?;
                self.emit("LOAD R1 R1");
                Ok(())
            }
            Expr::Unary { op, expr } => {
                self.right_gen(expr)?;
                match op {
                    UnOp::Neg => self.emit("NEG R1"),
                    UnOp::Not => {
                        self.emit("TSTE R1 0");
                        self.emit("MOV R1 ZR");
                    }
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => {
                self.right_gen(lhs)?;
                self.emit("PUSH R1");
                self.right_gen(rhs)?;
                self.emit("POP R2");
                // R2 = left, R1 = right.
                self.binary_op(*op);
                Ok(())
            }
            Expr::Assign { op, lvalue, rvalue } => {
                self.left_gen(lvalue)?;
                self.emit("PUSH R1");
                self.right_gen(rvalue)?;
                self.emit("POP R2");
                // R2 = address, R1 = rvalue.
                if let Some(arith) = op {
                    self.emit("PUSH R2");
                    self.emit("LOAD R2 R2");
                    self.emit(format!("{} R1 R2 R1", arith_mnemonic(*arith)));
                    self.emit("POP R2");
                }
                self.emit("STR R2 R1");
                Ok(())
            }
        }
    }

    /// Emits the operator half of a binary expression, given `R2=left`,
    /// `R1=right`. Comparisons and the logical operators are synthesized
    /// from the test opcodes and `ZR`; `&&`/`||` are not short-circuiting —
    /// both operands are always evaluated above, and this only combines
    /// their already-computed 0/1 truth values.
    fn binary_op(&mut self, op: BinOp) {
        use BinOp::*;
        match op {
            Add | Sub | Mul | Div | Mod | And | Or | Xor | Shl | Shr => {
                self.emit(format!("{} R1 R2 R1", arith_mnemonic(op)));
            }
            Eq => {
                self.emit("TSTE R1 R2");
                self.emit("MOV R1 ZR");
            }
            Ne => {
                self.emit("TSTN R1 R2");
                self.emit("MOV R1 ZR");
            }
            Lt => {
                self.emit("TSTL R2 R1");
                self.emit("MOV R1 ZR");
            }
            Gt => {
                self.emit("TSTG R2 R1");
                self.emit("MOV R1 ZR");
            }
            Le => {
                self.emit("TSTG R2 R1");
                self.emit("TSTN ZR 1");
                self.emit("MOV R1 ZR");
            }
            Ge => {
                self.emit("TSTL R2 R1");
                self.emit("TSTN ZR 1");
                self.emit("MOV R1 ZR");
            }
            LogAnd => {
                self.emit("TSTN R1 0");
                self.emit("MOV R1 ZR");
                self.emit("TSTN R2 0");
                self.emit("AND R1 R1 ZR");
            }
            LogOr => {
                self.emit("TSTN R1 0");
                self.emit("MOV R1 ZR");
                self.emit("TSTN R2 0");
                self.emit("OR R1 R1 ZR");
            }
        }
    }

    fn stmt_gen(&mut self, stmt: &Stmt, end_label: &str) -> Result<(), CompileError> {
        match stmt {
            Stmt::Decl { name, init } => {
                if let Some(init) = init {
                    self.load_addr_of(name)?;
                    self.emit("PUSH R1");
                    self.right_gen(init)?;
                    self.emit("POP R2");
                    self.emit("STR R2 R1");
                }
                // No initialiser: the prologue's zero-fill already holds.
                Ok(())
            }
            Stmt::Return(expr) => {
                self.right_gen(expr)?;
                self.emit("ADD R2 BP 2");
                self.emit("STR R2 R1");
                self.emit(format!("JUMP {end_label}"));
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.right_gen(expr)?;
                Ok(())
            }
        }
    }
}

fn arith_mnemonic(op: BinOp) -> ArithOp {
    use BinOp::*;
    match op {
        Add => ArithOp::Add,
        Sub => ArithOp::Sub,
        Mul => ArithOp::Mul,
        Div => ArithOp::Div,
        Mod => ArithOp::Mod,
        And => ArithOp::And,
        Or => ArithOp::Or,
        Xor => ArithOp::Xor,
        Shl => ArithOp::Shl,
        Shr => ArithOp::Shr,
        Eq | Ne | Lt | Le | Gt | Ge | LogAnd | LogOr => {
            unreachable!("comparison/logical operators have their own lowering")
        }
    }
}

fn compile_func(func: &FuncDef) -> Result<Vec<String>, CompileError> {
    let scope = Scope::collect(&func.body)?;
    let mut ctx = CompileContext {
        code: Vec::new(),
        scope,
    };

    for reg in SAVED_REGISTERS {
        ctx.emit(format!("PUSH {reg}"));
    }
    for _ in 0..ctx.scope.vars.len() {
        ctx.emit("PUSH 0");
    }

    let end_label = format!("_{}_END", func.name);
    for stmt in &func.body {
        ctx.stmt_gen(stmt, &end_label)?;
    }

    ctx.emit(format!("{end_label}:"));
    for reg in SAVED_REGISTERS.iter().rev() {
        ctx.emit(format!("POP {reg}"));
    }
    ctx.emit("RET");

    Ok(ctx.code)
}

/// Compile C source into mnemonic assembly text, one instruction or label
/// per line. Pure function of `source`: the same input always produces
/// byte-identical output.
pub fn compile(source: &str) -> Result<String, CompileError> {
    let program = parse(source)?;
    let lines = compile_func(&program.main)?;
    Ok(lines.join("\n"))
}

/// Compile `source`, assemble the result, and run it to completion,
/// returning the program's exit value. The single most useful entry point
/// for an embedder that only cares about "run this C source and give me
/// back what it returned".
pub fn run_source(source: &str) -> Result<i64, RunError> {
    let asm_text = compile(source)?;
    let (instrs, _symbols) = asm::assemble(&asm_text)?;
    Ok(os::run_program(&instrs)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_value(source: &str) -> i64 {
        run_source(source).unwrap()
    }

    #[test]
    fn constant_arithmetic_respects_precedence() {
        assert_eq!(exit_value("int main(){ return 2+3*4; }"), 14);
    }

    #[test]
    fn short_circuit_operators_combine_comparisons() {
        assert_eq!(exit_value("int main(){ return (5>3) && (2<=2); }"), 1);
    }

    #[test]
    fn compound_assignment_updates_a_local() {
        assert_eq!(
            exit_value("int main(){ int a=3; int b=4; a+=b; return a*b; }"),
            28
        );
    }

    #[test]
    fn unary_negation_and_not_compose() {
        assert_eq!(exit_value("int main(){ return -(!0); }"), -1);
    }

    #[test]
    fn div_and_mod_are_floor_semantics_end_to_end() {
        assert_eq!(
            exit_value("int main(){ int x=10; int y=3; return x%y + x/y; }"),
            4
        );
    }

    #[test]
    fn compiling_is_deterministic() {
        let src = "int main(){ int a=1; return a+2*3-4/2; }";
        assert_eq!(compile(src).unwrap(), compile(src).unwrap());
    }

    #[test]
    fn undeclared_variable_is_a_compile_error() {
        let err = compile("int main(){ return x; }").unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredVariable(_)));
    }

    #[test]
    fn duplicate_declaration_is_a_compile_error() {
        let err = compile("int main(){ int a=1; int a=2; return a; }").unwrap_err();
        assert!(matches!(err, CompileError::DuplicateVariable(_)));
    }
}
