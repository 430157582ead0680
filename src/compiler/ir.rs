//! Intermediate Representation
//!
//! Compiler pass that lowers a resolved abstract syntax tree (AST) into a
//! flat three-address code (TAC) program. Short-circuit operators,
//! ternaries, and structured control flow are expanded into explicit labels
//! and conditional jumps.

use std::collections::HashMap;
use std::fmt;

use crate::compiler::Context;
use crate::compiler::diag::{Diagnostic, Result};
use crate::compiler::parser::{self, AST, Block, BlockItem, Declaration, ForInit, Statement};

type Ident = String;

/// Intermediate representation (IR).
#[derive(Debug)]
pub enum IR {
    /// Function that represents the structure of the program.
    Program(Function),
}

impl fmt::Display for IR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IR::Program(func) => write!(f, "IR Program\n{func}"),
        }
    }
}

/// IR function definition.
#[derive(Debug)]
#[allow(missing_docs)]
pub struct Function {
    pub ident: Ident,
    pub instructions: Vec<Instruction>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:4}Fn({:?})", "", self.ident)?;

        for inst in &self.instructions {
            writeln!(f, "{:8}{inst}", "")?;
        }

        Ok(())
    }
}

/// IR instructions.
///
/// The `dst` of any instruction is always [`Value::Var`], never a constant.
#[derive(Debug, PartialEq)]
pub enum Instruction {
    /// Returns a value to the caller.
    Return(Value),
    /// Performs a unary operation on `src`, storing the result in `dst`.
    #[allow(missing_docs)]
    Unary {
        op: UnaryOperator,
        src: Value,
        dst: Value,
    },
    /// Performs a binary operation on `lhs` and `rhs`, storing the result in
    /// `dst`.
    #[allow(missing_docs)]
    Binary {
        op: BinaryOperator,
        lhs: Value,
        rhs: Value,
        dst: Value,
    },
    /// Copies the value from `src` into `dst`.
    #[allow(missing_docs)]
    Copy { src: Value, dst: Value },
    /// Unconditionally jumps to the named label.
    Jump(Ident),
    /// Jumps to the named label if the condition evaluates to zero.
    #[allow(missing_docs)]
    JumpIfZero { cond: Value, target: Ident },
    /// Jumps to the named label if the condition does not evaluate to zero.
    #[allow(missing_docs)]
    JumpIfNotZero { cond: Value, target: Ident },
    /// Associates a label with a location in the instruction list.
    Label(Ident),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Return(v) => write!(f, "Return({v})"),
            Instruction::Unary { op, src, dst } => {
                write!(f, "Unary({op:?}, {src}, {dst})")
            }
            Instruction::Binary { op, lhs, rhs, dst } => {
                write!(f, "Binary({op:?}, {lhs}, {rhs}, {dst})")
            }
            Instruction::Copy { src, dst } => write!(f, "Copy({src}, {dst})"),
            Instruction::Jump(target) => write!(f, "Jump({target:?})"),
            Instruction::JumpIfZero { cond, target } => {
                write!(f, "JumpIfZero({cond}, {target:?})")
            }
            Instruction::JumpIfNotZero { cond, target } => {
                write!(f, "JumpIfNotZero({cond}, {target:?})")
            }
            Instruction::Label(label) => write!(f, "Label({label:?})"),
        }
    }
}

/// IR values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Constant `int` value (32-bit).
    Constant(i32),
    /// Named temporary or resolved user variable.
    Var(Ident),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(v) => write!(f, "Constant({v})"),
            Value::Var(ident) => write!(f, "Var({ident:?})"),
        }
    }
}

/// IR unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Bitwise complement (`~`).
    Complement,
    /// Arithmetic negation (`-`).
    Negate,
    /// Logical not (`!`).
    Not,
}

impl From<parser::UnaryOperator> for UnaryOperator {
    fn from(op: parser::UnaryOperator) -> UnaryOperator {
        match op {
            parser::UnaryOperator::Complement => UnaryOperator::Complement,
            parser::UnaryOperator::Negate => UnaryOperator::Negate,
            parser::UnaryOperator::Not => UnaryOperator::Not,
        }
    }
}

/// IR binary operators.
///
/// `&&` and `||` have no IR counterpart; they are expanded into conditional
/// jumps during lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    OrdLess,
    OrdLessEq,
    OrdGreater,
    OrdGreaterEq,
}

impl BinaryOperator {
    /// Returns the IR counterpart of an AST binary operator, or `None` for
    /// the operators that lower structurally instead (`&&`, `||`, `=`, `?`).
    fn from_ast(op: parser::BinaryOperator) -> Option<BinaryOperator> {
        match op {
            parser::BinaryOperator::Add => Some(BinaryOperator::Add),
            parser::BinaryOperator::Subtract => Some(BinaryOperator::Subtract),
            parser::BinaryOperator::Multiply => Some(BinaryOperator::Multiply),
            parser::BinaryOperator::Divide => Some(BinaryOperator::Divide),
            parser::BinaryOperator::Modulo => Some(BinaryOperator::Modulo),
            parser::BinaryOperator::Eq => Some(BinaryOperator::Eq),
            parser::BinaryOperator::NotEq => Some(BinaryOperator::NotEq),
            parser::BinaryOperator::OrdLess => Some(BinaryOperator::OrdLess),
            parser::BinaryOperator::OrdLessEq => Some(BinaryOperator::OrdLessEq),
            parser::BinaryOperator::OrdGreater => Some(BinaryOperator::OrdGreater),
            parser::BinaryOperator::OrdGreaterEq => Some(BinaryOperator::OrdGreaterEq),
            parser::BinaryOperator::LogAnd
            | parser::BinaryOperator::LogOr
            | parser::BinaryOperator::Assign
            | parser::BinaryOperator::Conditional => None,
        }
    }
}

/// Jump targets of an enclosing loop, keyed by the loop's resolver label.
#[derive(Debug)]
struct LoopTargets {
    break_target: Ident,
    continue_target: Ident,
}

/// Helper for lowering nested AST constructs into flat three-address code
/// (TAC) instructions.
#[derive(Debug)]
struct TACBuilder<'a> {
    instructions: Vec<Instruction>,
    ctx: &'a mut Context,
    loop_targets: HashMap<Ident, LoopTargets>,
}

impl TACBuilder<'_> {
    /// Allocates a fresh temporary variable.
    fn new_tmp(&mut self) -> Value {
        Value::Var(self.ctx.temp())
    }

    #[inline]
    fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }
}

/// Generates intermediate representation (IR) from the provided resolved
/// abstract syntax tree (AST).
///
/// # Errors
///
/// Returns a [`Diagnostic::Internal`] if the AST violates a resolution
/// invariant (these indicate compiler bugs, not user errors).
pub fn generate_ir(ast: AST, ctx: &mut Context) -> Result<IR> {
    match ast {
        AST::Program(func) => {
            let ir_function = generate_ir_function(func, ctx)?;
            Ok(IR::Program(ir_function))
        }
    }
}

/// Generates an IR function definition from the provided AST function.
fn generate_ir_function(func: parser::Function, ctx: &mut Context) -> Result<Function> {
    let mut builder = TACBuilder {
        instructions: vec![],
        ctx,
        loop_targets: HashMap::new(),
    };

    generate_ir_block(&func.body, &mut builder)?;

    // A function body that falls off the end implicitly returns 0.
    if !matches!(builder.instructions.last(), Some(Instruction::Return(_))) {
        builder.emit(Instruction::Return(Value::Constant(0)));
    }

    Ok(Function {
        ident: func.ident,
        instructions: builder.instructions,
    })
}

fn generate_ir_block(block: &Block, builder: &mut TACBuilder<'_>) -> Result<()> {
    for item in &block.0 {
        match item {
            BlockItem::Decl(decl) => generate_ir_declaration(decl, builder)?,
            BlockItem::Stmt(stmt) => generate_ir_statement(stmt, builder)?,
        }
    }

    Ok(())
}

/// Lowers a declaration. A declaration with an initializer copies the
/// lowered initializer into the declared name; without one it emits nothing,
/// since the name only exists once assigned.
fn generate_ir_declaration(decl: &Declaration, builder: &mut TACBuilder<'_>) -> Result<()> {
    if let Some(init) = &decl.init {
        let value = generate_ir_value(init, builder)?;

        builder.emit(Instruction::Copy {
            src: value,
            dst: Value::Var(decl.ident.clone()),
        });
    }

    Ok(())
}

fn generate_ir_statement(stmt: &Statement, builder: &mut TACBuilder<'_>) -> Result<()> {
    match stmt {
        Statement::Return(expr) => {
            let value = generate_ir_value(expr, builder)?;
            builder.emit(Instruction::Return(value));

            Ok(())
        }
        Statement::Expression(expr) => {
            // Lower for side effects, discarding the result.
            let _ = generate_ir_value(expr, builder)?;

            Ok(())
        }
        Statement::Empty => Ok(()),
        Statement::If {
            cond,
            then,
            opt_else,
        } => {
            let cond_value = generate_ir_value(cond, builder)?;

            match opt_else {
                None => {
                    let end_label = builder.ctx.label("if_end");

                    builder.emit(Instruction::JumpIfZero {
                        cond: cond_value,
                        target: end_label.clone(),
                    });

                    generate_ir_statement(then, builder)?;
                    builder.emit(Instruction::Label(end_label));
                }
                Some(else_stmt) => {
                    let else_label = builder.ctx.label("if_else");
                    let end_label = builder.ctx.label("if_end");

                    builder.emit(Instruction::JumpIfZero {
                        cond: cond_value,
                        target: else_label.clone(),
                    });

                    generate_ir_statement(then, builder)?;
                    builder.emit(Instruction::Jump(end_label.clone()));

                    builder.emit(Instruction::Label(else_label));
                    generate_ir_statement(else_stmt, builder)?;
                    builder.emit(Instruction::Label(end_label));
                }
            }

            Ok(())
        }
        Statement::Compound(block) => generate_ir_block(block, builder),
        Statement::Break { label, .. } => {
            let target = builder
                .loop_targets
                .get(label)
                .map(|targets| targets.break_target.clone())
                .ok_or_else(|| {
                    Diagnostic::Internal(format!("break bound to unknown loop '{label}'"))
                })?;

            builder.emit(Instruction::Jump(target));

            Ok(())
        }
        Statement::Continue { label, .. } => {
            let target = builder
                .loop_targets
                .get(label)
                .map(|targets| targets.continue_target.clone())
                .ok_or_else(|| {
                    Diagnostic::Internal(format!("continue bound to unknown loop '{label}'"))
                })?;

            builder.emit(Instruction::Jump(target));

            Ok(())
        }
        Statement::While { cond, body, label } => {
            let start_label = format!("start_{label}");
            let break_label = format!("break_{label}");

            // A while loop has no separate continue label; continue re-tests
            // the condition at the start label.
            builder.loop_targets.insert(
                label.clone(),
                LoopTargets {
                    break_target: break_label.clone(),
                    continue_target: start_label.clone(),
                },
            );

            builder.emit(Instruction::Label(start_label.clone()));

            let cond_value = generate_ir_value(cond, builder)?;
            builder.emit(Instruction::JumpIfZero {
                cond: cond_value,
                target: break_label.clone(),
            });

            generate_ir_statement(body, builder)?;

            builder.emit(Instruction::Jump(start_label));
            builder.emit(Instruction::Label(break_label));

            Ok(())
        }
        Statement::Do { body, cond, label } => {
            let start_label = format!("start_{label}");
            let continue_label = format!("continue_{label}");
            let break_label = format!("break_{label}");

            builder.loop_targets.insert(
                label.clone(),
                LoopTargets {
                    break_target: break_label.clone(),
                    continue_target: continue_label.clone(),
                },
            );

            builder.emit(Instruction::Label(start_label.clone()));

            generate_ir_statement(body, builder)?;

            builder.emit(Instruction::Label(continue_label));

            let cond_value = generate_ir_value(cond, builder)?;
            builder.emit(Instruction::JumpIfNotZero {
                cond: cond_value,
                target: start_label,
            });

            builder.emit(Instruction::Label(break_label));

            Ok(())
        }
        Statement::For {
            init,
            opt_cond,
            opt_post,
            body,
            label,
        } => {
            let start_label = format!("start_{label}");
            let continue_label = format!("continue_{label}");
            let break_label = format!("break_{label}");

            builder.loop_targets.insert(
                label.clone(),
                LoopTargets {
                    break_target: break_label.clone(),
                    continue_target: continue_label.clone(),
                },
            );

            match &**init {
                ForInit::Decl(decl) => generate_ir_declaration(decl, builder)?,
                ForInit::Expr(Some(expr)) => {
                    let _ = generate_ir_value(expr, builder)?;
                }
                ForInit::Expr(None) => {}
            }

            builder.emit(Instruction::Label(start_label.clone()));

            if let Some(cond) = opt_cond {
                let cond_value = generate_ir_value(cond, builder)?;
                builder.emit(Instruction::JumpIfZero {
                    cond: cond_value,
                    target: break_label.clone(),
                });
            }

            generate_ir_statement(body, builder)?;

            builder.emit(Instruction::Label(continue_label));

            if let Some(post) = opt_post {
                let _ = generate_ir_value(post, builder)?;
            }

            builder.emit(Instruction::Jump(start_label));
            builder.emit(Instruction::Label(break_label));

            Ok(())
        }
    }
}

/// Lowers an AST expression, appending the instructions that compute it and
/// returning the value holding the result.
fn generate_ir_value(expr: &parser::Expression, builder: &mut TACBuilder<'_>) -> Result<Value> {
    match expr {
        parser::Expression::Constant(v) => Ok(Value::Constant(*v)),
        // Resolution already renamed the variable to its unique name.
        parser::Expression::Var { ident, .. } => Ok(Value::Var(ident.clone())),
        parser::Expression::Unary { op, expr } => {
            let src = generate_ir_value(expr, builder)?;
            let dst = builder.new_tmp();

            builder.emit(Instruction::Unary {
                op: (*op).into(),
                src,
                dst: dst.clone(),
            });

            Ok(dst)
        }
        parser::Expression::Binary {
            op: parser::BinaryOperator::LogAnd,
            lhs,
            rhs,
        } => {
            let result = builder.new_tmp();
            let false_label = builder.ctx.label("and_false");
            let end_label = builder.ctx.label("and_end");

            // Short-circuit: the right operand is not evaluated when the
            // left is zero.
            let lhs_value = generate_ir_value(lhs, builder)?;
            builder.emit(Instruction::JumpIfZero {
                cond: lhs_value,
                target: false_label.clone(),
            });

            let rhs_value = generate_ir_value(rhs, builder)?;
            builder.emit(Instruction::JumpIfZero {
                cond: rhs_value,
                target: false_label.clone(),
            });

            builder.emit(Instruction::Copy {
                src: Value::Constant(1),
                dst: result.clone(),
            });
            builder.emit(Instruction::Jump(end_label.clone()));
            builder.emit(Instruction::Label(false_label));
            builder.emit(Instruction::Copy {
                src: Value::Constant(0),
                dst: result.clone(),
            });
            builder.emit(Instruction::Label(end_label));

            Ok(result)
        }
        parser::Expression::Binary {
            op: parser::BinaryOperator::LogOr,
            lhs,
            rhs,
        } => {
            let result = builder.new_tmp();
            let true_label = builder.ctx.label("or_true");
            let end_label = builder.ctx.label("or_end");

            // Short-circuit: the right operand is not evaluated when the
            // left is non-zero.
            let lhs_value = generate_ir_value(lhs, builder)?;
            builder.emit(Instruction::JumpIfNotZero {
                cond: lhs_value,
                target: true_label.clone(),
            });

            let rhs_value = generate_ir_value(rhs, builder)?;
            builder.emit(Instruction::JumpIfNotZero {
                cond: rhs_value,
                target: true_label.clone(),
            });

            builder.emit(Instruction::Copy {
                src: Value::Constant(0),
                dst: result.clone(),
            });
            builder.emit(Instruction::Jump(end_label.clone()));
            builder.emit(Instruction::Label(true_label));
            builder.emit(Instruction::Copy {
                src: Value::Constant(1),
                dst: result.clone(),
            });
            builder.emit(Instruction::Label(end_label));

            Ok(result)
        }
        parser::Expression::Binary { op, lhs, rhs } => {
            let ir_op = BinaryOperator::from_ast(*op).ok_or_else(|| {
                Diagnostic::Internal(format!("operator '{op}' should lower structurally"))
            })?;

            // The left operand is lowered first; order is observable through
            // assignments embedded in subexpressions.
            let lhs_value = generate_ir_value(lhs, builder)?;
            let rhs_value = generate_ir_value(rhs, builder)?;
            let dst = builder.new_tmp();

            builder.emit(Instruction::Binary {
                op: ir_op,
                lhs: lhs_value,
                rhs: rhs_value,
                dst: dst.clone(),
            });

            Ok(dst)
        }
        parser::Expression::Assignment { lvalue, rvalue, .. } => {
            let dst = match &**lvalue {
                parser::Expression::Var { ident, .. } => Value::Var(ident.clone()),
                _ => {
                    return Err(Diagnostic::Internal(
                        "assignment target should be a variable after resolution".into(),
                    ));
                }
            };

            let result = generate_ir_value(rvalue, builder)?;

            builder.emit(Instruction::Copy {
                src: result,
                dst: dst.clone(),
            });

            Ok(dst)
        }
        parser::Expression::Conditional(cond, then, other) => {
            let dst = builder.new_tmp();
            let else_label = builder.ctx.label("cond_else");
            let end_label = builder.ctx.label("cond_end");

            let cond_value = generate_ir_value(cond, builder)?;
            builder.emit(Instruction::JumpIfZero {
                cond: cond_value,
                target: else_label.clone(),
            });

            let then_value = generate_ir_value(then, builder)?;
            builder.emit(Instruction::Copy {
                src: then_value,
                dst: dst.clone(),
            });
            builder.emit(Instruction::Jump(end_label.clone()));

            builder.emit(Instruction::Label(else_label));

            let other_value = generate_ir_value(other, builder)?;
            builder.emit(Instruction::Copy {
                src: other_value,
                dst: dst.clone(),
            });

            builder.emit(Instruction::Label(end_label));

            Ok(dst)
        }
    }
}
