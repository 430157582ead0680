//! Machine Intermediate Representation
//!
//! Compiler pass that lowers three-address code (TAC) intermediate
//! representation into a structured x86-64 assembly representation. The
//! lowering runs in passes: instruction selection with pseudoregisters,
//! pseudoregister replacement with stack slots, legalization of operand
//! forms against x86-64 encoding constraints, and stack-frame allocation.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use crate::compiler::ir::{self, IR};

type Ident = String;

/// Machine IR: structured x86-64 assembly representation.
#[derive(Debug)]
pub enum MIR {
    /// Function that represents the structure of the assembly program.
    Program(Function),
}

impl MIR {
    /// Replaces each pseudoregister with a stack offset from the frame base,
    /// assigned in first-seen order at `-4`, `-8`, and so on. Returns the
    /// total frame bytes needed, rounded up to a multiple of 16 so the
    /// prologue keeps the stack ABI-aligned.
    fn replace_pseudo_registers(&mut self) -> i32 {
        let mut offsets: HashMap<Ident, i32> = HashMap::new();
        let mut stack_offset = 0;

        // Either allocate the next slot, or reuse the stored offset if the
        // identifier has already been seen.
        let mut replace = |operand: &mut Operand| {
            if let Operand::Pseudo(ident) = operand {
                let offset = match offsets.entry(ident.clone()) {
                    Entry::Occupied(entry) => *entry.get(),
                    Entry::Vacant(entry) => {
                        stack_offset -= 4;
                        entry.insert(stack_offset);
                        stack_offset
                    }
                };

                *operand = Operand::Stack(offset);
            }
        };

        match self {
            MIR::Program(func) => {
                for inst in &mut func.instructions {
                    match inst {
                        Instruction::Mov(src, dst)
                        | Instruction::Binary(_, src, dst)
                        | Instruction::Cmp(src, dst) => {
                            replace(src);
                            replace(dst);
                        }
                        Instruction::Unary(_, dst)
                        | Instruction::Idiv(dst)
                        | Instruction::SetCC(_, dst) => {
                            replace(dst);
                        }
                        Instruction::Cdq
                        | Instruction::Jmp(_)
                        | Instruction::JmpCC(_, _)
                        | Instruction::Label(_)
                        | Instruction::AllocateStack(_)
                        | Instruction::Ret => {}
                    }
                }
            }
        }

        // Round up to the ABI alignment for any future call support.
        (-stack_offset + 15) & !15
    }

    /// Prepends an `AllocateStack` instruction when the frame needs space.
    fn emit_stack_allocation(&mut self, bytes: i32) {
        if bytes == 0 {
            return;
        }

        match self {
            MIR::Program(func) => {
                func.instructions.insert(0, Instruction::AllocateStack(bytes));
            }
        }
    }

    /// Rewrites instructions with invalid operand forms into valid
    /// sequences. `R10` stages memory operands and `R11` stages comparison
    /// immediates and multiply destinations.
    fn rewrite_invalid_instructions(&mut self) {
        match self {
            MIR::Program(func) => {
                let mut i = 0;

                while i < func.instructions.len() {
                    let inst = &mut func.instructions[i];

                    match inst {
                        // `mov` cannot use a memory address for both operands.
                        Instruction::Mov(src, dst)
                            if matches!(src, Operand::Stack(_))
                                && matches!(dst, Operand::Stack(_)) =>
                        {
                            let src = src.clone();
                            let dst = dst.clone();

                            func.instructions.splice(
                                i..=i,
                                [
                                    Instruction::Mov(src, Operand::Register(Reg::R10)),
                                    Instruction::Mov(Operand::Register(Reg::R10), dst),
                                ],
                            );

                            // Skip the two instructions just inserted.
                            i += 1;
                        }
                        // `idivl` cannot take an immediate divisor.
                        Instruction::Idiv(div) if matches!(div, Operand::Imm32(_)) => {
                            let div = div.clone();

                            func.instructions.splice(
                                i..=i,
                                [
                                    Instruction::Mov(div, Operand::Register(Reg::R10)),
                                    Instruction::Idiv(Operand::Register(Reg::R10)),
                                ],
                            );

                            // Skip the two instructions just inserted.
                            i += 1;
                        }
                        // `addl`/`subl` cannot use a memory address for both
                        // operands.
                        Instruction::Binary(op, src, dst)
                            if matches!(op, BinaryOperator::Add | BinaryOperator::Sub)
                                && matches!(src, Operand::Stack(_))
                                && matches!(dst, Operand::Stack(_)) =>
                        {
                            let binop = *op;
                            let src = src.clone();
                            let dst = dst.clone();

                            func.instructions.splice(
                                i..=i,
                                [
                                    Instruction::Mov(src, Operand::Register(Reg::R10)),
                                    Instruction::Binary(binop, Operand::Register(Reg::R10), dst),
                                ],
                            );

                            // Skip the two instructions just inserted.
                            i += 1;
                        }
                        // `imull` cannot target a memory address.
                        Instruction::Binary(BinaryOperator::Imul, src, dst)
                            if matches!(dst, Operand::Stack(_)) =>
                        {
                            let src = src.clone();
                            let dst = dst.clone();

                            func.instructions.splice(
                                i..=i,
                                [
                                    Instruction::Mov(dst.clone(), Operand::Register(Reg::R11)),
                                    Instruction::Binary(
                                        BinaryOperator::Imul,
                                        src,
                                        Operand::Register(Reg::R11),
                                    ),
                                    Instruction::Mov(Operand::Register(Reg::R11), dst),
                                ],
                            );

                            // Skip the three instructions just inserted.
                            i += 2;
                        }
                        // The second operand of `cmpl` cannot be an immediate.
                        Instruction::Cmp(lhs, rhs) if matches!(rhs, Operand::Imm32(_)) => {
                            let lhs = lhs.clone();
                            let rhs = rhs.clone();

                            func.instructions.splice(
                                i..=i,
                                [
                                    Instruction::Mov(rhs, Operand::Register(Reg::R11)),
                                    Instruction::Cmp(lhs, Operand::Register(Reg::R11)),
                                ],
                            );

                            // Skip the two instructions just inserted.
                            i += 1;
                        }
                        // `cmpl` cannot use a memory address for both operands.
                        Instruction::Cmp(lhs, rhs)
                            if matches!(lhs, Operand::Stack(_))
                                && matches!(rhs, Operand::Stack(_)) =>
                        {
                            let lhs = lhs.clone();
                            let rhs = rhs.clone();

                            func.instructions.splice(
                                i..=i,
                                [
                                    Instruction::Mov(lhs, Operand::Register(Reg::R10)),
                                    Instruction::Cmp(Operand::Register(Reg::R10), rhs),
                                ],
                            );

                            // Skip the two instructions just inserted.
                            i += 1;
                        }
                        _ => {}
                    }

                    i += 1;
                }
            }
        }
    }
}

impl fmt::Display for MIR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MIR::Program(func) => write!(f, "MIR Program\n{func}"),
        }
    }
}

/// MIR function definition.
#[derive(Debug)]
#[allow(missing_docs)]
pub struct Function {
    pub label: Ident,
    pub instructions: Vec<Instruction>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:4}Label {:?}:", "", self.label)?;

        for inst in &self.instructions {
            writeln!(f, "{:8}{inst}", "")?;
        }

        Ok(())
    }
}

/// MIR instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Copies `src` to `dst`.
    Mov(Operand, Operand),
    /// Applies the given unary operator to the operand in place.
    Unary(UnaryOperator, Operand),
    /// Applies the given binary operator: `dst = dst op src`.
    Binary(BinaryOperator, Operand, Operand),
    /// Compares two operands, setting condition flags from `rhs - lhs`.
    Cmp(Operand, Operand),
    /// Performs a signed division of `edx:eax` by the operand.
    Idiv(Operand),
    /// Sign-extends the 32-bit value in `eax` across `edx:eax`.
    Cdq,
    /// Unconditionally jumps to the named label.
    Jmp(Ident),
    /// Jumps to the named label if the condition code holds.
    JmpCC(CondCode, Ident),
    /// Sets the byte destination to 1 if the condition code holds, else 0.
    SetCC(CondCode, Operand),
    /// Associates a label with a location in the instruction list.
    Label(Ident),
    /// Subtracts the given number of bytes from `rsp`.
    AllocateStack(i32),
    /// Yields control back to the caller.
    Ret,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Mov(src, dst) => write!(f, "Mov({src}, {dst})"),
            Instruction::Unary(op, dst) => write!(f, "Unary({op:?}, {dst})"),
            Instruction::Binary(op, src, dst) => write!(f, "Binary({op:?}, {src}, {dst})"),
            Instruction::Cmp(lhs, rhs) => write!(f, "Cmp({lhs}, {rhs})"),
            Instruction::Idiv(div) => write!(f, "Idiv({div})"),
            Instruction::Cdq => write!(f, "Cdq"),
            Instruction::Jmp(target) => write!(f, "Jmp({target:?})"),
            Instruction::JmpCC(code, target) => write!(f, "JmpCC({code}, {target:?})"),
            Instruction::SetCC(code, dst) => write!(f, "SetCC({code}, {dst})"),
            Instruction::Label(label) => write!(f, "Label({label:?})"),
            Instruction::AllocateStack(bytes) => write!(f, "AllocateStack({bytes})"),
            Instruction::Ret => write!(f, "Ret"),
        }
    }
}

/// MIR operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Immediate value (32-bit).
    Imm32(i32),
    /// Hardware register.
    Register(Reg),
    /// Pseudoregister standing in for a temporary variable until stack slots
    /// are assigned.
    Pseudo(Ident),
    /// Stack address at the given offset from the `rbp` register.
    Stack(i32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm32(v) => write!(f, "Imm({v})"),
            Operand::Register(r) => write!(f, "%{r:?}"),
            Operand::Pseudo(ident) => write!(f, "Pseudo({ident:?})"),
            Operand::Stack(offset) => write!(f, "Stack({offset})"),
        }
    }
}

/// MIR x86-64 registers (size agnostic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// `eax` (32-bit), `al` (8-bit low). Holds return values and division
    /// dividends/quotients.
    AX,
    /// `edx` (32-bit), `dl` (8-bit low). Holds division remainders.
    DX,
    /// `r10d` (32-bit), `r10b` (8-bit low). Staging register for memory
    /// operands during legalization.
    R10,
    /// `r11d` (32-bit), `r11b` (8-bit low). Staging register for multiply
    /// destinations and comparison immediates during legalization.
    R11,
}

/// MIR unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// One's complement negation (`notl`).
    Not,
    /// Two's complement negation (`negl`).
    Neg,
}

/// MIR binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// Addition (`addl`).
    Add,
    /// Subtraction (`subl`).
    Sub,
    /// Signed multiplication (`imull`).
    Imul,
}

/// x86-64 condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CondCode {
    E,
    NE,
    L,
    LE,
    G,
    GE,
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CondCode::E => "e",
            CondCode::NE => "ne",
            CondCode::L => "l",
            CondCode::LE => "le",
            CondCode::G => "g",
            CondCode::GE => "ge",
        };
        write!(f, "{code}")
    }
}

/// Returns the condition code for a relational IR operator, or `None` for
/// arithmetic operators.
fn cond_code(op: ir::BinaryOperator) -> Option<CondCode> {
    match op {
        ir::BinaryOperator::Eq => Some(CondCode::E),
        ir::BinaryOperator::NotEq => Some(CondCode::NE),
        ir::BinaryOperator::OrdLess => Some(CondCode::L),
        ir::BinaryOperator::OrdLessEq => Some(CondCode::LE),
        ir::BinaryOperator::OrdGreater => Some(CondCode::G),
        ir::BinaryOperator::OrdGreaterEq => Some(CondCode::GE),
        ir::BinaryOperator::Add
        | ir::BinaryOperator::Subtract
        | ir::BinaryOperator::Multiply
        | ir::BinaryOperator::Divide
        | ir::BinaryOperator::Modulo => None,
    }
}

/// Generates machine intermediate representation (MIR) from the provided
/// intermediate representation (IR).
#[must_use]
pub fn generate_mir(ir: IR) -> MIR {
    match ir {
        IR::Program(func) => {
            // Pass 1 - instruction selection over pseudoregisters.
            let mir_func = generate_mir_function(func);
            let mut mir = MIR::Program(mir_func);

            // Pass 2 - pseudoregisters replaced with stack offsets.
            let stack_bytes = mir.replace_pseudo_registers();

            // Pass 3 - invalid operand forms rewritten.
            mir.rewrite_invalid_instructions();

            // Pass 4 - stack-frame allocation prepended.
            mir.emit_stack_allocation(stack_bytes);

            mir
        }
    }
}

/// Generates a MIR function definition from the provided IR function.
fn generate_mir_function(func: ir::Function) -> Function {
    let mut instructions = vec![];

    for inst in &func.instructions {
        match inst {
            ir::Instruction::Return(v) => {
                instructions.push(Instruction::Mov(
                    generate_mir_operand(v),
                    Operand::Register(Reg::AX),
                ));
                instructions.push(Instruction::Ret);
            }
            // Logical not has no single-instruction equivalent; it compares
            // the operand against zero and materializes the flag.
            ir::Instruction::Unary {
                op: ir::UnaryOperator::Not,
                src,
                dst,
            } => {
                let dst = generate_mir_operand(dst);

                instructions.push(Instruction::Cmp(
                    Operand::Imm32(0),
                    generate_mir_operand(src),
                ));
                instructions.push(Instruction::Mov(Operand::Imm32(0), dst.clone()));
                instructions.push(Instruction::SetCC(CondCode::E, dst));
            }
            ir::Instruction::Unary { op, src, dst } => {
                let unop = match op {
                    ir::UnaryOperator::Complement => UnaryOperator::Not,
                    ir::UnaryOperator::Negate => UnaryOperator::Neg,
                    ir::UnaryOperator::Not => unreachable!("handled above"),
                };
                let dst = generate_mir_operand(dst);

                instructions.push(Instruction::Mov(generate_mir_operand(src), dst.clone()));
                instructions.push(Instruction::Unary(unop, dst));
            }
            ir::Instruction::Binary { op, lhs, rhs, dst } => {
                let dst = generate_mir_operand(dst);

                match op {
                    ir::BinaryOperator::Divide | ir::BinaryOperator::Modulo => {
                        instructions.push(Instruction::Mov(
                            generate_mir_operand(lhs),
                            Operand::Register(Reg::AX),
                        ));
                        instructions.push(Instruction::Cdq);
                        instructions.push(Instruction::Idiv(generate_mir_operand(rhs)));

                        let src = if let ir::BinaryOperator::Divide = op {
                            // Quotient is in the `eax` register.
                            Operand::Register(Reg::AX)
                        } else {
                            // Remainder is in the `edx` register.
                            Operand::Register(Reg::DX)
                        };

                        instructions.push(Instruction::Mov(src, dst));
                    }
                    _ => match cond_code(*op) {
                        Some(code) => {
                            // Flags are set from lhs - rhs, so the operands
                            // swap in the AT&T cmp form.
                            instructions.push(Instruction::Cmp(
                                generate_mir_operand(rhs),
                                generate_mir_operand(lhs),
                            ));
                            instructions.push(Instruction::Mov(Operand::Imm32(0), dst.clone()));
                            instructions.push(Instruction::SetCC(code, dst));
                        }
                        None => {
                            let binop = match op {
                                ir::BinaryOperator::Add => BinaryOperator::Add,
                                ir::BinaryOperator::Subtract => BinaryOperator::Sub,
                                ir::BinaryOperator::Multiply => BinaryOperator::Imul,
                                _ => unreachable!("divide/modulo/relational handled above"),
                            };

                            instructions
                                .push(Instruction::Mov(generate_mir_operand(lhs), dst.clone()));
                            instructions.push(Instruction::Binary(
                                binop,
                                generate_mir_operand(rhs),
                                dst,
                            ));
                        }
                    },
                }
            }
            ir::Instruction::Copy { src, dst } => {
                instructions.push(Instruction::Mov(
                    generate_mir_operand(src),
                    generate_mir_operand(dst),
                ));
            }
            ir::Instruction::Jump(target) => {
                instructions.push(Instruction::Jmp(target.clone()));
            }
            ir::Instruction::JumpIfZero { cond, target } => {
                instructions.push(Instruction::Cmp(
                    Operand::Imm32(0),
                    generate_mir_operand(cond),
                ));
                instructions.push(Instruction::JmpCC(CondCode::E, target.clone()));
            }
            ir::Instruction::JumpIfNotZero { cond, target } => {
                instructions.push(Instruction::Cmp(
                    Operand::Imm32(0),
                    generate_mir_operand(cond),
                ));
                instructions.push(Instruction::JmpCC(CondCode::NE, target.clone()));
            }
            ir::Instruction::Label(label) => {
                instructions.push(Instruction::Label(label.clone()));
            }
        }
    }

    Function {
        label: func.ident,
        instructions,
    }
}

/// Generates a MIR operand from the provided IR value.
fn generate_mir_operand(val: &ir::Value) -> Operand {
    match val {
        ir::Value::Constant(v) => Operand::Imm32(*v),
        ir::Value::Var(ident) => Operand::Pseudo(ident.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Context;
    use crate::compiler::ir::generate_ir;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::parse_program;
    use crate::compiler::resolve::resolve_program;

    fn codegen(src: &str) -> Vec<Instruction> {
        let tokens = Lexer::new(src).tokenize().expect("source should lex");
        let mut ast = parse_program(tokens).expect("source should parse");

        let mut ctx = Context::new();
        resolve_program(&mut ast, &mut ctx).expect("source should resolve");
        let ir = generate_ir(ast, &mut ctx).expect("source should lower");

        let MIR::Program(func) = generate_mir(ir);
        func.instructions
    }

    fn is_mem(operand: &Operand) -> bool {
        matches!(operand, Operand::Stack(_))
    }

    /// Asserts the post-legalization operand invariants.
    fn assert_legal(instructions: &[Instruction]) {
        for inst in instructions {
            match inst {
                Instruction::Mov(src, dst) => {
                    assert!(!(is_mem(src) && is_mem(dst)), "mov mem, mem: {inst}");
                }
                Instruction::Binary(BinaryOperator::Imul, _, dst) => {
                    assert!(!is_mem(dst), "imul into memory: {inst}");
                }
                Instruction::Binary(_, src, dst) => {
                    assert!(!(is_mem(src) && is_mem(dst)), "binary mem, mem: {inst}");
                }
                Instruction::Idiv(div) => {
                    assert!(
                        !matches!(div, Operand::Imm32(_)),
                        "idiv with immediate: {inst}"
                    );
                }
                Instruction::Cmp(lhs, rhs) => {
                    assert!(!(is_mem(lhs) && is_mem(rhs)), "cmp mem, mem: {inst}");
                    assert!(
                        !matches!(rhs, Operand::Imm32(_)),
                        "cmp with immediate second operand: {inst}"
                    );
                }
                _ => {}
            }

            // No pseudoregister survives the stack pass.
            let operands = match inst {
                Instruction::Mov(a, b) | Instruction::Binary(_, a, b) | Instruction::Cmp(a, b) => {
                    vec![a, b]
                }
                Instruction::Unary(_, a) | Instruction::Idiv(a) | Instruction::SetCC(_, a) => {
                    vec![a]
                }
                _ => vec![],
            };

            for operand in operands {
                assert!(
                    !matches!(operand, Operand::Pseudo(_)),
                    "pseudo operand after stack pass: {inst}"
                );
            }
        }
    }

    #[test]
    fn mir_valid_return_constant() {
        let instructions = codegen("int main(void) { return 2; }");

        assert_eq!(
            instructions,
            vec![
                Instruction::Mov(Operand::Imm32(2), Operand::Register(Reg::AX)),
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn mir_valid_legal_after_rewrite() {
        let instructions = codegen(
            "int main(void) {
                int a = 5;
                int b = a + a;
                int c = b * b;
                int d = c / (a % 3);
                if (a < b) d = d + 1; else d = 7 % 2;
                while (d > 0) d = d - 1;
                return !d && (a == 5) || b != c;
            }",
        );

        assert_legal(&instructions);
    }

    #[test]
    fn mir_valid_stack_slots_distinct_and_aligned() {
        let instructions = codegen(
            "int main(void) {
                int a = 1;
                int b = 2;
                int c = 3;
                return a + b + c;
            }",
        );

        let Some(Instruction::AllocateStack(bytes)) = instructions.first() else {
            panic!("first instruction should allocate the stack frame");
        };

        assert!(bytes % 16 == 0, "frame must be 16-byte aligned");
        assert!(*bytes > 0);

        // Offsets are negative, 4-byte spaced, and each variable keeps one
        // slot across all its uses.
        let mut offsets = vec![];
        for inst in &instructions {
            let operands = match inst {
                Instruction::Mov(a, b) | Instruction::Binary(_, a, b) | Instruction::Cmp(a, b) => {
                    vec![a, b]
                }
                Instruction::Unary(_, a) | Instruction::Idiv(a) | Instruction::SetCC(_, a) => {
                    vec![a]
                }
                _ => vec![],
            };

            for operand in operands {
                if let Operand::Stack(offset) = operand {
                    assert!(*offset < 0);
                    assert_eq!(offset % 4, 0);
                    offsets.push(*offset);
                }
            }
        }

        offsets.sort_unstable();
        offsets.dedup();
        assert!(offsets.len() >= 3, "three variables need three slots");
    }

    #[test]
    fn mir_valid_division_uses_ax_dx() {
        let instructions = codegen("int main(void) { int a = 7; return a / 2 + a % 2; }");

        assert!(
            instructions
                .iter()
                .any(|inst| matches!(inst, Instruction::Cdq))
        );
        assert!(
            instructions
                .iter()
                .any(|inst| matches!(inst, Instruction::Idiv(_)))
        );
        assert!(
            instructions
                .iter()
                .any(|inst| matches!(
                    inst,
                    Instruction::Mov(Operand::Register(Reg::DX), _)
                ))
        );
        assert_legal(&instructions);
    }

    #[test]
    fn mir_valid_relational_sets_flags() {
        let instructions = codegen("int main(void) { int a = 1; return a < 2; }");

        assert!(
            instructions
                .iter()
                .any(|inst| matches!(inst, Instruction::SetCC(CondCode::L, _)))
        );
        assert_legal(&instructions);
    }

    #[test]
    fn mir_valid_no_allocation_without_locals() {
        let instructions = codegen("int main(void) { return 3; }");

        assert!(
            !instructions
                .iter()
                .any(|inst| matches!(inst, Instruction::AllocateStack(_)))
        );
    }

    #[test]
    fn mir_valid_jumps_lower_to_conditional_jumps() {
        let instructions = codegen("int main(void) { return 1 && 0; }");

        assert!(
            instructions
                .iter()
                .any(|inst| matches!(inst, Instruction::JmpCC(CondCode::E, _)))
        );
        assert!(
            instructions
                .iter()
                .any(|inst| matches!(inst, Instruction::Jmp(_)))
        );
        assert_legal(&instructions);
    }
}
