//! Code Emission
//!
//! Compiler pass that serializes legalized machine intermediate
//! representation (MIR) into textual x86-64 assembly (AT&T syntax).

use std::fmt::Write;

use crate::compiler::Options;
use crate::compiler::diag::{Diagnostic, Result};
use crate::compiler::mir::{self, MIR};

/// x86-64 function epilogue: restores the caller's stack frame, then moves
/// the return address into `rip`.
const EPILOGUE: &str = "movq\t%rbp, %rsp\n\tpopq\t%rbp\n\tret";

/// Emits textual x86-64 assembly for a legalized MIR program.
///
/// The emitted function carries a `.globl` directive, the standard prologue
/// (`pushq %rbp; movq %rsp, %rbp`), and an epilogue on every return path.
/// Register widths in text are 32-bit except for the frame pointer pair and
/// stack pointer arithmetic.
///
/// # Errors
///
/// Returns a [`Diagnostic::Internal`] if an instruction with a
/// pseudoregister operand reaches the emitter.
pub fn emit_x86_64(mir: &MIR, opts: &Options) -> Result<String> {
    let MIR::Program(func) = mir;

    let mut out = String::new();

    // On Mach-O targets symbols are decorated with a leading underscore.
    let symbol = if opts.symbol_underscore_prefix {
        format!("_{}", func.label)
    } else {
        func.label.clone()
    };

    // `.L` is the local label prefix for ELF, `L` for Mach-O.
    let local_prefix = if opts.symbol_underscore_prefix {
        "L"
    } else {
        ".L"
    };

    writeln!(out, "\t.globl\t{symbol}")?;
    writeln!(out, "{symbol}:")?;

    // Function prologue: save the caller's frame base and establish the
    // callee's.
    writeln!(out, "\tpushq\t%rbp")?;
    writeln!(out, "\tmovq\t%rsp, %rbp")?;

    let mut last_was_ret = false;

    for inst in &func.instructions {
        last_was_ret = matches!(inst, mir::Instruction::Ret);

        // Labels are de-indented; instructions are indented.
        if let mir::Instruction::Label(label) = inst {
            writeln!(out, "{local_prefix}{label}:")?;
            continue;
        }

        writeln!(out, "\t{}", emit_instruction(inst, local_prefix)?)?;
    }

    // The lowerer guarantees a final return, but the emitter still closes
    // any fall-through path: return 0 through the epilogue.
    if !last_was_ret {
        writeln!(out, "\tmovl\t$0, %eax")?;
        writeln!(out, "\t{EPILOGUE}")?;
    }

    if !opts.symbol_underscore_prefix {
        // Marks the stack non-executable on ELF targets.
        writeln!(out, "\t.section\t.note.GNU-stack,\"\",@progbits")?;
    }

    Ok(out)
}

/// Returns the textual assembly for a single MIR instruction.
fn emit_instruction(inst: &mir::Instruction, local_prefix: &str) -> Result<String> {
    let text = match inst {
        mir::Instruction::Mov(src, dst) => {
            format!("movl\t{}, {}", emit_operand(src, 4)?, emit_operand(dst, 4)?)
        }
        mir::Instruction::Unary(op, dst) => {
            let inst = match op {
                mir::UnaryOperator::Not => "notl",
                mir::UnaryOperator::Neg => "negl",
            };

            format!("{inst}\t{}", emit_operand(dst, 4)?)
        }
        mir::Instruction::Binary(op, src, dst) => {
            let inst = match op {
                mir::BinaryOperator::Add => "addl",
                mir::BinaryOperator::Sub => "subl",
                mir::BinaryOperator::Imul => "imull",
            };

            format!(
                "{inst}\t{}, {}",
                emit_operand(src, 4)?,
                emit_operand(dst, 4)?
            )
        }
        mir::Instruction::Cmp(lhs, rhs) => {
            format!("cmpl\t{}, {}", emit_operand(lhs, 4)?, emit_operand(rhs, 4)?)
        }
        mir::Instruction::Idiv(div) => format!("idivl\t{}", emit_operand(div, 4)?),
        mir::Instruction::Cdq => "cdq".into(),
        mir::Instruction::Jmp(target) => format!("jmp\t{local_prefix}{target}"),
        mir::Instruction::JmpCC(code, target) => format!("j{code}\t{local_prefix}{target}"),
        // `set` writes a single byte, so its destination is 8-bit.
        mir::Instruction::SetCC(code, dst) => format!("set{code}\t{}", emit_operand(dst, 1)?),
        mir::Instruction::AllocateStack(bytes) => format!("subq\t${bytes}, %rsp"),
        mir::Instruction::Ret => EPILOGUE.into(),
        mir::Instruction::Label(_) => {
            return Err(Diagnostic::Internal(
                "label emission should not be handled here".into(),
            ));
        }
    };

    Ok(text)
}

/// Returns the textual assembly for a MIR operand. `size` selects the
/// register width in bytes.
fn emit_operand(operand: &mir::Operand, size: u8) -> Result<String> {
    let text = match operand {
        mir::Operand::Imm32(v) => format!("${v}"),
        mir::Operand::Register(r) => match (r, size) {
            (mir::Reg::AX, 1) => "%al".into(),
            (mir::Reg::AX, _) => "%eax".into(),
            (mir::Reg::DX, 1) => "%dl".into(),
            (mir::Reg::DX, _) => "%edx".into(),
            (mir::Reg::R10, 1) => "%r10b".into(),
            (mir::Reg::R10, _) => "%r10d".into(),
            (mir::Reg::R11, 1) => "%r11b".into(),
            (mir::Reg::R11, _) => "%r11d".into(),
        },
        mir::Operand::Stack(offset) => format!("{offset}(%rbp)"),
        mir::Operand::Pseudo(ident) => {
            return Err(Diagnostic::Internal(format!(
                "pseudoregister '{ident}' reached the emitter"
            )));
        }
    };

    Ok(text)
}
