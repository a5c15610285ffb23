//! The virtual machine: a deterministic fetch/decode/execute loop over a
//! flat, word-addressed memory with a fixed register file.
//!
//! Memory cells are heterogeneous: an address holds either a data [`Word`]
//! or an [`Instruction`]. This is modelled as [`Cell`] rather than the
//! untyped dict-or-int the machine's reference implementation uses.
//! `LOAD`/`STR` require a `Word` cell; fetching at `IP` requires an `Instr`
//! cell. A mismatch is a fault, surfaced through [`VmError`].

use derive_more::{Display, Error};
use std::collections::HashMap;

use crate::isa::{ArithOp, ControlOp, Instruction, Operand, Register};

pub type Word = i64;

/// The size of the address space. Addresses must satisfy `0 <= a < MEM_SIZE`.
pub const MEM_SIZE: usize = 10000;

/// A single memory cell: either a data word or a decoded instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Cell {
    Word(Word),
    Instr(Instruction),
}

/// Everything that can go fatally wrong while running a program. All of
/// these halt the VM; there is no local recovery.
#[derive(Debug, Display, Error)]
pub enum VmError {
    #[display("address {_0} is out of range (0..{MEM_SIZE})")]
    OutOfRange(#[error(not(source))] i64),
    #[display("read of uninitialised memory at address {_0}")]
    Uninitialised(#[error(not(source))] usize),
    #[display("expected a data word at address {_0}, found an instruction")]
    ExpectedWord(#[error(not(source))] usize),
    #[display("expected an instruction at address {_0}, found a data word")]
    ExpectedInstruction(#[error(not(source))] usize),
    #[display("division by zero")]
    DivisionByZero,
}

/// The machine's register file, memory image, and running flag, encapsulated
/// behind an explicit `new -> load -> run -> inspect` lifecycle. Exactly one
/// [`Vm`] owns its state; it is not re-entrant, and running a second program
/// requires a fresh instance (or [`Vm::reset`]).
pub struct Vm {
    mem: HashMap<usize, Cell>,
    regs: HashMap<Register, Word>,
    running: bool,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// A freshly reset machine: empty memory except for a sentinel `HALT` at
    /// address 0, and all registers zeroed.
    pub fn new() -> Self {
        let mut vm = Vm {
            mem: HashMap::new(),
            regs: HashMap::new(),
            running: false,
        };
        vm.reset();
        vm
    }

    /// Clear memory and registers, and re-place the sentinel `HALT` at
    /// address 0. An unexpected transfer to address 0 (e.g. a stray `RET`
    /// with no caller) lands here and cleanly stops the machine.
    pub fn reset(&mut self) {
        self.mem.clear();
        self.mem.insert(0, Cell::Instr(Instruction::Halt));
        self.regs.clear();
        for r in Register::GENERAL {
            self.regs.insert(r, 0);
        }
        self.regs.insert(Register::Ip, 0);
        self.regs.insert(Register::Sp, 0);
        self.regs.insert(Register::Bp, 0);
        self.regs.insert(Register::Zr, 0);
        self.running = false;
    }

    pub fn reg(&self, r: Register) -> Word {
        *self.regs.get(&r).unwrap_or(&0)
    }

    pub fn set_reg(&mut self, r: Register, val: Word) {
        self.regs.insert(r, val);
    }

    fn check_addr(addr: i64) -> Result<usize, VmError> {
        if addr < 0 || addr as usize >= MEM_SIZE {
            return Err(VmError::OutOfRange(addr));
        }
        Ok(addr as usize)
    }

    /// Write a data word to an address. Used by the loader to set up the
    /// initial stack frame, and by `STR`/`PUSH` during execution.
    pub fn mem_set_word(&mut self, addr: i64, val: Word) -> Result<(), VmError> {
        let addr = Self::check_addr(addr)?;
        self.mem.insert(addr, Cell::Word(val));
        Ok(())
    }

    /// Load a contiguous block of instructions starting at `base`.
    pub fn load_program(&mut self, base: usize, program: &[Instruction]) -> Result<(), VmError> {
        for (i, instr) in program.iter().enumerate() {
            let addr = Self::check_addr(base as i64 + i as i64)?;
            self.mem.insert(addr, Cell::Instr(instr.clone()));
        }
        Ok(())
    }

    pub fn mem_get_word(&self, addr: i64) -> Result<Word, VmError> {
        let addr = Self::check_addr(addr)?;
        match self.mem.get(&addr) {
            None => Err(VmError::Uninitialised(addr)),
            Some(Cell::Word(w)) => Ok(*w),
            Some(Cell::Instr(_)) => Err(VmError::ExpectedWord(addr)),
        }
    }

    fn fetch(&self) -> Result<Instruction, VmError> {
        let ip = self.reg(Register::Ip);
        let addr = Self::check_addr(ip)?;
        match self.mem.get(&addr) {
            None => Err(VmError::Uninitialised(addr)),
            Some(Cell::Instr(i)) => Ok(i.clone()),
            Some(Cell::Word(_)) => Err(VmError::ExpectedInstruction(addr)),
        }
    }

    fn value(&self, operand: Operand) -> Word {
        match operand {
            Operand::Reg(r) => self.reg(r),
            Operand::Imm(i) => i,
        }
    }

    /// Run the fetch/decode/execute loop until `HALT` is executed or a fault
    /// occurs.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.running = true;
        while self.running {
            let instr = self.fetch()?;
            self.execute(&instr)?;
            if self.running {
                let ip = self.reg(Register::Ip);
                self.set_reg(Register::Ip, ip + 1);
            }
        }
        Ok(())
    }

    fn execute(&mut self, instr: &Instruction) -> Result<(), VmError> {
        match instr {
            Instruction::Arith {
                op,
                dst,
                arg1,
                arg2,
            } => self.execute_arith(*op, *dst, *arg1, *arg2),
            Instruction::Neg { dst } => {
                let v = self.reg(*dst);
                self.set_reg(*dst, v.wrapping_neg());
                Ok(())
            }
            Instruction::Mov { dst, src } => {
                let v = self.value(*src);
                self.set_reg(*dst, v);
                Ok(())
            }
            Instruction::Str { dst, src } => {
                let addr = self.reg(*dst);
                let v = self.value(*src);
                self.mem_set_word(addr, v)
            }
            Instruction::Load { dst, src } => {
                let addr = self.value(*src);
                let v = self.mem_get_word(addr)?;
                self.set_reg(*dst, v);
                Ok(())
            }
            Instruction::Push { src } => {
                let v = self.value(*src);
                let sp = self.reg(Register::Sp);
                self.mem_set_word(sp, v)?;
                self.set_reg(Register::Sp, sp - 1);
                Ok(())
            }
            Instruction::Pop { dst } => {
                let sp = self.reg(Register::Sp) + 1;
                self.set_reg(Register::Sp, sp);
                let v = self.mem_get_word(sp)?;
                self.set_reg(*dst, v);
                Ok(())
            }
            Instruction::Test { op, arg1, arg2 } => {
                let lhs = self.reg(*arg1);
                let rhs = self.value(*arg2);
                self.set_reg(Register::Zr, op.apply(lhs, rhs) as Word);
                Ok(())
            }
            Instruction::Control { op, offset } => self.execute_control(*op, *offset),
            Instruction::Halt => {
                self.running = false;
                Ok(())
            }
            Instruction::Ret => self.execute_ret(),
        }
    }

    fn execute_arith(
        &mut self,
        op: ArithOp,
        dst: Register,
        arg1: Register,
        arg2: Operand,
    ) -> Result<(), VmError> {
        let lhs = self.reg(arg1);
        let rhs = self.value(arg2);
        let v = op.apply(lhs, rhs).ok_or(VmError::DivisionByZero)?;
        self.set_reg(dst, v);
        Ok(())
    }

    /// `CALL`'s prologue is performed atomically before the offset is
    /// applied: push the return address, push the caller's `BP`, rebase `BP`
    /// onto the new frame, and reserve the return-value slot.
    fn execute_control(&mut self, op: ControlOp, offset: i64) -> Result<(), VmError> {
        if !op.taken(self.reg(Register::Zr)) {
            return Ok(());
        }
        if op == ControlOp::Call {
            let sp = self.reg(Register::Sp);
            let ip = self.reg(Register::Ip);
            let bp = self.reg(Register::Bp);
            self.mem_set_word(sp, ip + 1)?;
            self.mem_set_word(sp - 1, bp)?;
            self.set_reg(Register::Bp, sp - 1);
            self.set_reg(Register::Sp, sp - 2);
        }
        // -1 because IP is incremented at the end of the cycle in any case.
        let ip = self.reg(Register::Ip);
        self.set_reg(Register::Ip, ip + offset - 1);
        Ok(())
    }

    fn execute_ret(&mut self) -> Result<(), VmError> {
        let bp = self.reg(Register::Bp);
        self.set_reg(Register::Sp, bp + 1);
        let ret_addr = self.mem_get_word(bp + 1)?;
        let saved_bp = self.mem_get_word(bp)?;
        self.set_reg(Register::Bp, saved_bp);
        self.set_reg(Register::Ip, ret_addr - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Instruction as I;
    use crate::isa::{ArithOp::*, ControlOp::*, Register::*, TestOp::*};

    fn run(program: Vec<Instruction>) -> Vm {
        let mut vm = Vm::new();
        vm.load_program(1000, &program).unwrap();
        vm.set_reg(Ip, 1000);
        vm.run().unwrap();
        vm
    }

    #[test]
    fn shl_computes_left_shift() {
        let vm = run(vec![
            I::Mov {
                dst: R1,
                src: Operand::Imm(6),
            },
            I::Mov {
                dst: R2,
                src: Operand::Imm(3),
            },
            I::Arith {
                op: Shl,
                dst: R1,
                arg1: R1,
                arg2: Operand::Reg(R2),
            },
            I::Halt,
        ]);
        assert_eq!(vm.reg(R1), 48);
    }

    #[test]
    fn str_then_load_round_trips_through_memory() {
        let vm = run(vec![
            I::Mov {
                dst: R1,
                src: Operand::Imm(8000),
            },
            I::Str {
                dst: R1,
                src: Operand::Imm(7),
            },
            I::Load {
                dst: R2,
                src: Operand::Imm(8000),
            },
            I::Halt,
        ]);
        assert_eq!(vm.mem_get_word(8000).unwrap(), 7);
        assert_eq!(vm.reg(R2), 7);
    }

    #[test]
    fn push_pop_round_trips() {
        let mut vm = Vm::new();
        vm.set_reg(Sp, 9999);
        vm.load_program(
            1000,
            &[
                I::Mov {
                    dst: R1,
                    src: Operand::Imm(42),
                },
                I::Push {
                    src: Operand::Reg(R1),
                },
                I::Pop { dst: R2 },
                I::Halt,
            ],
        )
        .unwrap();
        vm.set_reg(Ip, 1000);
        vm.run().unwrap();
        assert_eq!(vm.reg(R2), 42);
        assert_eq!(vm.reg(Sp), 9999);
    }

    #[test]
    fn division_by_zero_is_a_fault() {
        let mut vm = Vm::new();
        vm.load_program(
            1000,
            &[
                I::Mov {
                    dst: R1,
                    src: Operand::Imm(1),
                },
                I::Arith {
                    op: Div,
                    dst: R1,
                    arg1: R1,
                    arg2: Operand::Imm(0),
                },
                I::Halt,
            ],
        )
        .unwrap();
        vm.set_reg(Ip, 1000);
        assert!(matches!(vm.run(), Err(VmError::DivisionByZero)));
    }

    #[test]
    fn reading_uninitialised_memory_is_a_fault() {
        let mut vm = Vm::new();
        vm.load_program(
            1000,
            &[
                I::Load {
                    dst: R1,
                    src: Operand::Imm(9000),
                },
                I::Halt,
            ],
        )
        .unwrap();
        vm.set_reg(Ip, 1000);
        assert!(matches!(vm.run(), Err(VmError::Uninitialised(9000))));
    }

    #[test]
    fn recursive_fibonacci_via_call_return() {
        // Hand-assembled, since the single-function compiler can't emit a
        // recursive call: fib(n) reads its argument from BP+3 (the slot the
        // caller pushed above the return-value slot), recurses twice through
        // CALL/RET, and stores its result at BP+2 before RET, exactly as
        // `compiler.rs`'s own `Return` lowering does.
        let text = "
            MOV R1 6
            PUSH R1
            PUSH -1
            CALL fib
            HALT
        fib:
            ADD R3 BP 3
            LOAD R3 R3
            TSTL R3 2
            FJMP fib_recurse
            MOV R1 R3
            JUMP fib_end
        fib_recurse:
            PUSH R3
            SUB R4 R3 1
            PUSH R4
            PUSH -1
            CALL fib
            POP R1
            ADD SP SP 1
            POP R3
            PUSH R1
            SUB R4 R3 2
            PUSH R4
            PUSH -1
            CALL fib
            POP R2
            ADD SP SP 1
            POP R3
            ADD R1 R3 R2
        fib_end:
            ADD R2 BP 2
            STR R2 R1
            RET
        ";
        let (instrs, _symbols) = crate::asm::assemble(text).unwrap();
        let mut vm = Vm::new();
        vm.set_reg(Sp, 9999);
        vm.load_program(1000, &instrs).unwrap();
        vm.set_reg(Ip, 1000);
        vm.run().unwrap();
        // The CALL/RET pair leaves SP exactly where it was before the
        // outer call's two pushes; the computed result sits one word above
        // it, in the slot the entry code's "PUSH -1" reserved.
        assert_eq!(vm.mem_get_word(vm.reg(Sp) + 1).unwrap(), 8);
    }

    #[test]
    fn call_return_preserves_frame() {
        // A minimal CALL/RET round trip: call a function that loads a
        // constant into R1 via ADD BP 2 / STR, then returns; verify BP/SP
        // are restored to their pre-CALL values.
        let mut vm = Vm::new();
        vm.set_reg(Sp, 9999);
        let program = vec![
            // 0: reserve ret val slot
            I::Push {
                src: Operand::Imm(-1),
            },
            // 1: CALL callee (callee at index 3, current index 1 -> offset 2)
            I::Control { op: Call, offset: 2 },
            // 2: HALT (return lands here)
            I::Halt,
            // 3: callee: ADD R1 BP 2 ; STR R1 99 ; RET
            I::Arith {
                op: Add,
                dst: R1,
                arg1: Bp,
                arg2: Operand::Imm(2),
            },
            I::Str {
                dst: R1,
                src: Operand::Imm(99),
            },
            I::Ret,
        ];
        vm.load_program(1000, &program).unwrap();
        vm.set_reg(Ip, 1000);
        let sp_before = vm.reg(Sp);
        let bp_before = vm.reg(Bp);
        vm.run().unwrap();
        assert_eq!(vm.reg(Sp), sp_before - 1); // the ret-val-slot push remains
        assert_eq!(vm.reg(Bp), bp_before);
        assert_eq!(vm.mem_get_word(sp_before).unwrap(), 99);
    }
}
