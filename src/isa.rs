//! The instruction model shared by the assembler and the virtual machine.
//!
//! This mirrors the shape of a real ISA definition: registers and opcodes are
//! closed enumerations rather than string tables, so an unknown mnemonic is
//! rejected by `FromStr` instead of falling through a lookup. Operands that
//! may be "a register or an immediate" are modelled as [`Operand`].
//!
//! # Register file
//!
//! Eight general purpose registers `R1..R8`, plus four special registers:
//! `IP` (instruction pointer), `SP` (stack pointer, grows downward), `BP`
//! (base pointer), and `ZR` (the one-bit result of the last test
//! instruction).
//!
//! # Opcode classes
//!
//! - Arithmetic (`ADD SUB MUL DIV MOD AND OR XOR SHL SHR`): `OP dst arg1 arg2`.
//! - Unary arithmetic (`NEG`): `NEG dst`, in place.
//! - Data (`MOV STR LOAD PUSH POP`): see [`crate::vm`] for execution semantics.
//! - Test (`TSTE TSTG TSTL TSTN`): `OP arg1 arg2`, writes 0/1 to `ZR`.
//! - Control (`JUMP TJMP FJMP CALL`): `OP offset`, PC-relative.
//! - Special (`HALT RET`): no operands.

use derive_more::{Display, Error};
use std::fmt;
use std::str::FromStr;

pub const NUM_REGISTERS: usize = 8;

/// Registers in the machine's register file.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Register {
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    #[display("IP")]
    Ip,
    #[display("SP")]
    Sp,
    #[display("BP")]
    Bp,
    #[display("ZR")]
    Zr,
}

impl Register {
    pub const GENERAL: [Register; NUM_REGISTERS] = [
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
        Register::R8,
    ];
}

#[derive(Debug, Display, Error)]
#[display("unknown register {_0:?}")]
pub struct UnknownRegister(#[error(not(source))] String);

impl FromStr for Register {
    type Err = UnknownRegister;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Register::*;
        Ok(match s {
            "R1" => R1,
            "R2" => R2,
            "R3" => R3,
            "R4" => R4,
            "R5" => R5,
            "R6" => R6,
            "R7" => R7,
            "R8" => R8,
            "IP" => Ip,
            "SP" => Sp,
            "BP" => Bp,
            "ZR" => Zr,
            other => return Err(UnknownRegister(other.to_string())),
        })
    }
}

/// An operand in "source" position: either a register or an immediate value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operand {
    Reg(Register),
    Imm(i64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(i) => write!(f, "{i}"),
        }
    }
}

/// Arithmetic opcodes. `dst` and `arg1` are registers; `arg2` is an [`Operand`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ArithOp {
    #[display("ADD")]
    Add,
    #[display("SUB")]
    Sub,
    #[display("MUL")]
    Mul,
    #[display("DIV")]
    Div,
    #[display("MOD")]
    Mod,
    #[display("AND")]
    And,
    #[display("OR")]
    Or,
    #[display("XOR")]
    Xor,
    #[display("SHL")]
    Shl,
    #[display("SHR")]
    Shr,
}

impl ArithOp {
    /// Apply the operation to two materialised words.
    ///
    /// `DIV`/`MOD` use floor semantics (matching Python's `//`/`%`), not
    /// Rust's truncate-toward-zero default. Division and modulo by zero are
    /// reported as `None` so the VM can turn them into an arithmetic fault.
    pub fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        use ArithOp::*;
        Some(match self {
            Add => lhs.wrapping_add(rhs),
            Sub => lhs.wrapping_sub(rhs),
            Mul => lhs.wrapping_mul(rhs),
            Div => {
                if rhs == 0 {
                    return None;
                }
                lhs.div_euclid(rhs)
            }
            Mod => {
                if rhs == 0 {
                    return None;
                }
                lhs.rem_euclid(rhs)
            }
            And => lhs & rhs,
            Or => lhs | rhs,
            Xor => lhs ^ rhs,
            Shl => lhs.wrapping_shl(rhs as u32),
            Shr => lhs.wrapping_shr(rhs as u32),
        })
    }
}

impl FromStr for ArithOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ArithOp::*;
        Ok(match s {
            "ADD" => Add,
            "SUB" => Sub,
            "MUL" => Mul,
            "DIV" => Div,
            "MOD" => Mod,
            "AND" => And,
            "OR" => Or,
            "XOR" => Xor,
            "SHL" => Shl,
            "SHR" => Shr,
            _ => return Err(()),
        })
    }
}

/// Test (comparison) opcodes. Write 0/1 to `ZR`.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum TestOp {
    #[display("TSTE")]
    Eq,
    #[display("TSTG")]
    Gt,
    #[display("TSTL")]
    Lt,
    #[display("TSTN")]
    Ne,
}

impl TestOp {
    pub fn apply(self, lhs: i64, rhs: i64) -> bool {
        match self {
            TestOp::Eq => lhs == rhs,
            TestOp::Gt => lhs > rhs,
            TestOp::Lt => lhs < rhs,
            TestOp::Ne => lhs != rhs,
        }
    }
}

impl FromStr for TestOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use TestOp::*;
        Ok(match s {
            "TSTE" => Eq,
            "TSTG" => Gt,
            "TSTL" => Lt,
            "TSTN" => Ne,
            _ => return Err(()),
        })
    }
}

/// Control-transfer opcodes. All carry a PC-relative `offset`.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ControlOp {
    #[display("JUMP")]
    Jump,
    #[display("TJMP")]
    TrueJump,
    #[display("FJMP")]
    FalseJump,
    #[display("CALL")]
    Call,
}

impl ControlOp {
    /// Whether the branch is taken given the current value of `ZR`.
    pub fn taken(self, zr: i64) -> bool {
        match self {
            ControlOp::Jump | ControlOp::Call => true,
            ControlOp::TrueJump => zr != 0,
            ControlOp::FalseJump => zr == 0,
        }
    }
}

impl FromStr for ControlOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ControlOp::*;
        Ok(match s {
            "JUMP" => Jump,
            "TJMP" => TrueJump,
            "FJMP" => FalseJump,
            "CALL" => Call,
            _ => return Err(()),
        })
    }
}

/// A decoded instruction. One variant per opcode, carrying exactly the
/// fields that opcode's class needs (see module docs for the per-class
/// textual shape).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    Arith {
        op: ArithOp,
        dst: Register,
        arg1: Register,
        arg2: Operand,
    },
    Neg {
        dst: Register,
    },
    Mov {
        dst: Register,
        src: Operand,
    },
    Str {
        dst: Register,
        src: Operand,
    },
    Load {
        dst: Register,
        src: Operand,
    },
    Push {
        src: Operand,
    },
    Pop {
        dst: Register,
    },
    Test {
        op: TestOp,
        arg1: Register,
        arg2: Operand,
    },
    Control {
        op: ControlOp,
        offset: i64,
    },
    Halt,
    Ret,
}

/// A parse/decode error for the textual instruction form.
#[derive(Debug, Display, Error)]
pub enum InstructionError {
    #[display("empty instruction")]
    Empty,
    #[display("unknown opcode {_0:?}")]
    UnknownOpcode(#[error(not(source))] String),
    #[display("{opcode} expects {expected} operand(s), got {got}")]
    WrongArity {
        opcode: String,
        expected: usize,
        got: usize,
    },
    #[display("{_0}")]
    BadRegister(UnknownRegister),
    #[display("control instruction operand {_0:?} is neither an integer offset nor a label")]
    BadControlOperand(#[error(not(source))] String),
}

impl From<UnknownRegister> for InstructionError {
    fn from(e: UnknownRegister) -> Self {
        InstructionError::BadRegister(e)
    }
}

fn reg(tok: &str) -> Result<Register, InstructionError> {
    Ok(Register::from_str(tok)?)
}

/// Parse an operand in "source" position: an integer is an immediate,
/// anything else must be a valid register name.
fn operand(tok: &str) -> Result<Operand, InstructionError> {
    if let Ok(i) = tok.parse::<i64>() {
        Ok(Operand::Imm(i))
    } else {
        Ok(Operand::Reg(reg(tok)?))
    }
}

fn arity(opcode: &str, tokens: &[&str], expected: usize) -> Result<(), InstructionError> {
    if tokens.len() != expected {
        return Err(InstructionError::WrongArity {
            opcode: opcode.to_string(),
            expected,
            got: tokens.len(),
        });
    }
    Ok(())
}

impl Instruction {
    /// Parse a single mnemonic line's tokens (the opcode plus its operands,
    /// already whitespace-split) into an instruction.
    ///
    /// Control operands must already have been resolved to a signed integer
    /// offset by the time this is called (the assembler's second pass does
    /// label resolution before calling this).
    pub fn parse(tokens: &[&str]) -> Result<Instruction, InstructionError> {
        let (opcode, rest) = tokens.split_first().ok_or(InstructionError::Empty)?;

        if let Ok(op) = ArithOp::from_str(opcode) {
            arity(opcode, rest, 3)?;
            return Ok(Instruction::Arith {
                op,
                dst: reg(rest[0])?,
                arg1: reg(rest[1])?,
                arg2: operand(rest[2])?,
            });
        }
        if *opcode == "NEG" {
            arity(opcode, rest, 1)?;
            return Ok(Instruction::Neg { dst: reg(rest[0])? });
        }
        if *opcode == "MOV" || *opcode == "STR" || *opcode == "LOAD" {
            arity(opcode, rest, 2)?;
            let dst = reg(rest[0])?;
            let src = operand(rest[1])?;
            return Ok(match *opcode {
                "MOV" => Instruction::Mov { dst, src },
                "STR" => Instruction::Str { dst, src },
                _ => Instruction::Load { dst, src },
            });
        }
        if *opcode == "PUSH" {
            arity(opcode, rest, 1)?;
            return Ok(Instruction::Push {
                src: operand(rest[0])?,
            });
        }
        if *opcode == "POP" {
            arity(opcode, rest, 1)?;
            return Ok(Instruction::Pop { dst: reg(rest[0])? });
        }
        if let Ok(op) = TestOp::from_str(opcode) {
            arity(opcode, rest, 2)?;
            return Ok(Instruction::Test {
                op,
                arg1: reg(rest[0])?,
                arg2: operand(rest[1])?,
            });
        }
        if let Ok(op) = ControlOp::from_str(opcode) {
            arity(opcode, rest, 1)?;
            let offset = rest[0]
                .parse::<i64>()
                .map_err(|_| InstructionError::BadControlOperand(rest[0].to_string()))?;
            return Ok(Instruction::Control { op, offset });
        }
        if *opcode == "HALT" {
            arity(opcode, rest, 0)?;
            return Ok(Instruction::Halt);
        }
        if *opcode == "RET" {
            arity(opcode, rest, 0)?;
            return Ok(Instruction::Ret);
        }

        Err(InstructionError::UnknownOpcode((*opcode).to_string()))
    }

    /// True if this instruction is a control-flow opcode taking a label at
    /// the assembler's first pass (i.e. everything but `HALT`/`RET`).
    pub fn is_control(tokens: &[&str]) -> bool {
        tokens
            .first()
            .map(|op| ControlOp::from_str(op).is_ok())
            .unwrap_or(false)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Arith {
                op,
                dst,
                arg1,
                arg2,
            } => write!(f, "{op} {dst} {arg1} {arg2}"),
            Instruction::Neg { dst } => write!(f, "NEG {dst}"),
            Instruction::Mov { dst, src } => write!(f, "MOV {dst} {src}"),
            Instruction::Str { dst, src } => write!(f, "STR {dst} {src}"),
            Instruction::Load { dst, src } => write!(f, "LOAD {dst} {src}"),
            Instruction::Push { src } => write!(f, "PUSH {src}"),
            Instruction::Pop { dst } => write!(f, "POP {dst}"),
            Instruction::Test { op, arg1, arg2 } => write!(f, "{op} {arg1} {arg2}"),
            Instruction::Control { op, offset } => write!(f, "{op} {offset}"),
            Instruction::Halt => write!(f, "HALT"),
            Instruction::Ret => write!(f, "RET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(src: &str) {
        let tokens: Vec<&str> = src.split_whitespace().collect();
        let instr = Instruction::parse(&tokens).expect("should parse");
        assert_eq!(instr.to_string(), src);
    }

    #[test]
    fn arithmetic_roundtrips() {
        roundtrip("ADD R1 R2 R3");
        roundtrip("SHL R1 R1 3");
    }

    #[test]
    fn data_roundtrips() {
        roundtrip("MOV R1 6");
        roundtrip("STR R1 R2");
        roundtrip("LOAD R2 8000");
        roundtrip("PUSH R1");
        roundtrip("POP R2");
    }

    #[test]
    fn test_and_control_roundtrip() {
        roundtrip("TSTE R1 R2");
        roundtrip("TSTN R1 0");
        roundtrip("JUMP -5");
        roundtrip("CALL 12");
    }

    #[test]
    fn special_roundtrips() {
        roundtrip("HALT");
        roundtrip("RET");
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let tokens: Vec<&str> = "NOPE R1".split_whitespace().collect();
        assert!(matches!(
            Instruction::parse(&tokens),
            Err(InstructionError::UnknownOpcode(_))
        ));
    }

    #[test]
    fn unknown_register_is_rejected() {
        let tokens: Vec<&str> = "MOV R9 1".split_whitespace().collect();
        assert!(Instruction::parse(&tokens).is_err());
    }

    #[test]
    fn shl_shr_map_to_left_right_shift() {
        assert_eq!(ArithOp::Shl.apply(6, 3), Some(48));
        assert_eq!(ArithOp::Shr.apply(48, 3), Some(6));
    }

    #[test]
    fn div_mod_are_floor_not_truncating() {
        assert_eq!(ArithOp::Div.apply(-7, 2), Some(-4));
        assert_eq!(ArithOp::Mod.apply(-7, 2), Some(1));
    }

    #[test]
    fn division_by_zero_is_none() {
        assert_eq!(ArithOp::Div.apply(1, 0), None);
        assert_eq!(ArithOp::Mod.apply(1, 0), None);
    }
}
