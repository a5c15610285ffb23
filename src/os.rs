//! The OS/loader: owns the memory image, lays out the fixed memory map, and
//! sets up the initial stack frame before handing control to the [`Vm`].
//!
//! # Memory layout
//!
//! ```text
//! 0-499     reserved / OS
//! 500-999   data
//! 1000-3999 code
//! 4000-5999 heap
//! 6000-9999 stack
//! ```
//!
//! The VM itself does not enforce this partition; it is purely a convention
//! this loader (and the compiler, implicitly, through the constants it
//! shares) follows.
//!
//! # Stack frame (callee's view, high to low address)
//!
//! ```text
//! BP+k..   outgoing args (pushed by caller, in reverse order)
//! BP+2     return value slot (one word)
//! BP+1     return address (pushed by CALL)
//! BP       saved caller BP (pushed by CALL)
//! BP-1..   callee-saved registers
//! BP-1-r.. local variables (r = count of saved registers)
//! SP       next free slot (grows toward 0)
//! ```

use crate::isa::{Instruction, Register};
use crate::vm::{Vm, VmError};

/// Where the first instruction of a loaded program is placed.
pub const PROGRAM_INIT_ADDR: usize = 1000;

/// The initial stack pointer: the highest address in the stack region.
pub const INIT_SP_ADDR: i64 = 9999;

/// Load `program` into a fresh [`Vm`], set up the initial (caller-less)
/// stack frame, run to `HALT` or a fault, and return the program's exit
/// value — the contract `return expr;` in the compiled source relies on.
///
/// `main` always ends in `RET`, which restores `BP` from its own
/// self-loop (there is no real caller), so `BP` at halt is exactly the
/// value [`setup_stackframe`] installed. The exit value is therefore
/// read from `BP+2`, the return-value slot `ADD R2 BP 2 / STR R2 R1`
/// wrote into — not `BP+1`, which holds the sentinel return address and
/// is never touched by compiled code.
pub fn run_program(program: &[Instruction]) -> Result<i64, VmError> {
    let mut vm = Vm::new();
    vm.load_program(PROGRAM_INIT_ADDR, program)?;
    vm.set_reg(Register::Ip, PROGRAM_INIT_ADDR as i64);
    setup_stackframe(&mut vm)?;
    vm.run()?;
    vm.mem_get_word(vm.reg(Register::Bp) + 2)
}

/// Set up the frame a top-level program runs in, as if it had been called
/// by an implicit caller with no arguments:
///
/// - The return-address slot at `SP-1` is the sentinel 0 (the backstop
///   `HALT` address), so a stray `RET` out of `main` halts cleanly rather
///   than jumping into garbage.
/// - `BP` points at the saved-BP slot, which is self-referential (there is
///   no real caller frame to point to).
/// - The return-value slot is pre-seeded with -1.
pub fn setup_stackframe(vm: &mut Vm) -> Result<(), VmError> {
    vm.set_reg(Register::Sp, INIT_SP_ADDR);
    vm.mem_set_word(INIT_SP_ADDR - 1, 0)?; // sentinel return address -> backstop HALT
    vm.set_reg(Register::Sp, INIT_SP_ADDR - 3);
    let bp = vm.reg(Register::Sp) + 1;
    vm.set_reg(Register::Bp, bp);
    vm.mem_set_word(bp, bp)?; // no caller: saved BP points to itself
    vm.mem_set_word(bp + 2, -1)?; // default return value
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{ArithOp, Operand};

    #[test]
    fn stackframe_has_expected_shape() {
        let mut vm = Vm::new();
        setup_stackframe(&mut vm).unwrap();
        let bp = vm.reg(Register::Bp);
        assert_eq!(bp, vm.mem_get_word(bp).unwrap(), "BP slot self-loops");
        assert_eq!(vm.mem_get_word(bp + 1).unwrap(), 0, "sentinel return address");
        assert_eq!(vm.mem_get_word(bp + 2).unwrap(), -1, "default return value");
        assert!(vm.reg(Register::Sp) <= bp);
    }

    #[test]
    fn program_that_returns_a_constant() {
        // return 14;
        let program = vec![
            Instruction::Mov {
                dst: Register::R1,
                src: Operand::Imm(14),
            },
            Instruction::Arith {
                op: ArithOp::Add,
                dst: Register::R2,
                arg1: Register::Bp,
                arg2: Operand::Imm(2),
            },
            Instruction::Str {
                dst: Register::R2,
                src: Operand::Reg(Register::R1),
            },
            Instruction::Halt,
        ];
        assert_eq!(run_program(&program).unwrap(), 14);
    }

    #[test]
    fn unhalted_program_defaults_to_minus_one() {
        let program = vec![Instruction::Halt];
        assert_eq!(run_program(&program).unwrap(), -1);
    }
}
