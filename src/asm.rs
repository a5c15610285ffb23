//! The assembler: a two-pass translator from mnemonic text to a list of
//! [`Instruction`]s, resolving symbolic labels into PC-relative offsets.
//!
//! # Grammar
//!
//! A program is a sequence of lines. Each non-empty, non-comment line is
//! either a label (`NAME:`) or an instruction mnemonic. Whitespace is
//! insignificant. A line whose first non-whitespace characters are `#` or
//! `//` is a comment and is ignored.
//!
//! # Passes
//!
//! Pass 1 walks the lines, recording `symbol[label] = instruction_index` for
//! every label and incrementing the index for every instruction. Pass 2 walks
//! the lines again, decoding each instruction; for control-flow opcodes the
//! label operand is replaced by the PC-relative offset
//! `symbol[label] - current_index`.

use derive_more::{Display, Error};

use crate::common::Map;
use crate::isa::{Instruction, InstructionError};

pub type SymbolTable = Map<String, i64>;

#[derive(Debug, Display, Error)]
pub enum AssembleError {
    #[display("duplicate label {_0:?}")]
    DuplicateLabel(#[error(not(source))] String),
    #[display("undefined label {_0:?}")]
    UndefinedLabel(#[error(not(source))] String),
    #[display("line {line}: {source}")]
    Instruction {
        line: usize,
        #[error(source)]
        source: InstructionError,
    },
}

fn strip_comment(line: &str) -> &str {
    if let Some(i) = line.find("//") {
        &line[..i]
    } else if let Some(i) = line.find('#') {
        &line[..i]
    } else {
        line
    }
}

fn is_label(line: &str) -> bool {
    line.ends_with(':')
}

fn label_name(line: &str) -> &str {
    line.trim_end_matches(':').trim()
}

/// Assemble mnemonic `text` into an ordered instruction list. Returns the
/// symbol table alongside it for debugging purposes.
pub fn assemble(text: &str) -> Result<(Vec<Instruction>, SymbolTable), AssembleError> {
    // Keep each surviving line paired with its 0-based index in the original
    // text, so an error reported after comments/blank lines have been
    // dropped still points at the line the user wrote.
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i, strip_comment(l).trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    // Pass 1: build the symbol table.
    let mut symbols = SymbolTable::new();
    let mut index: i64 = 0;
    for (_, line) in &lines {
        if is_label(line) {
            let name = label_name(line).to_string();
            if symbols.insert(name.clone(), index).is_some() {
                return Err(AssembleError::DuplicateLabel(name));
            }
        } else {
            index += 1;
        }
    }

    // Pass 2: decode instructions and resolve control-flow label operands.
    let mut instructions = Vec::with_capacity(index as usize);
    let mut index: i64 = 0;
    for (orig_line_no, line) in &lines {
        if is_label(line) {
            continue;
        }
        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        let mut owned_offset = String::new();
        if Instruction::is_control(&tokens) && tokens.len() == 2 {
            let label = tokens[1];
            if label.parse::<i64>().is_err() {
                let target = *symbols
                    .get(label)
                    .ok_or_else(|| AssembleError::UndefinedLabel(label.to_string()))?;
                owned_offset = (target - index).to_string();
                tokens[1] = &owned_offset;
            }
        }
        let instr = Instruction::parse(&tokens).map_err(|source| AssembleError::Instruction {
            line: orig_line_no + 1,
            source,
        })?;
        instructions.push(instr);
        index += 1;
    }

    Ok((instructions, symbols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{ControlOp, Operand, Register};

    #[test]
    fn resolves_forward_label_to_pc_relative_offset() {
        let text = "
            JUMP skip
            HALT
            skip:
            HALT
        ";
        let (instrs, symbols) = assemble(text).unwrap();
        assert_eq!(symbols["skip"], 2);
        match &instrs[0] {
            Instruction::Control { op: ControlOp::Jump, offset } => assert_eq!(*offset, 2),
            other => panic!("expected a jump, got {other:?}"),
        }
    }

    #[test]
    fn resolves_backward_label() {
        let text = "
            loop:
            MOV R1 1
            JUMP loop
        ";
        let (instrs, symbols) = assemble(text).unwrap();
        assert_eq!(symbols["loop"], 0);
        match &instrs[1] {
            Instruction::Control { op: ControlOp::Jump, offset } => assert_eq!(*offset, -1),
            other => panic!("expected a jump, got {other:?}"),
        }
    }

    #[test]
    fn undefined_label_is_an_error() {
        let text = "JUMP nowhere";
        assert!(matches!(
            assemble(text),
            Err(AssembleError::UndefinedLabel(_))
        ));
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let text = "
            here:
            here:
            HALT
        ";
        assert!(matches!(
            assemble(text),
            Err(AssembleError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "
            // a comment
            MOV R1 6 # trailing comment
            HALT
        ";
        let (instrs, _) = assemble(text).unwrap();
        assert_eq!(instrs.len(), 2);
        assert_eq!(
            instrs[0],
            Instruction::Mov {
                dst: Register::R1,
                src: Operand::Imm(6)
            }
        );
    }

    #[test]
    fn parse_pretty_print_round_trip_through_assembler() {
        let text = "ADD R1 R2 R3\nHALT";
        let (instrs, _) = assemble(text).unwrap();
        let printed: Vec<String> = instrs.iter().map(|i| i.to_string()).collect();
        assert_eq!(printed, vec!["ADD R1 R2 R3", "HALT"]);
    }

    #[test]
    fn reported_line_number_survives_leading_comments_and_blanks() {
        let text = "// leading comment\nMOV R1 6\nBADOP R1";
        match assemble(text) {
            Err(AssembleError::Instruction { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a line-3 instruction error, got {other:?}"),
        }
    }
}
