//! Semantic Resolution
//!
//! Compiler pass that rewrites the AST into a resolution-equivalent AST:
//! every variable is renamed to a globally unique identifier, block scoping
//! is enforced, assignment targets are validated, and each `break` and
//! `continue` is bound to the label of its enclosing loop.

use std::collections::HashMap;

use crate::compiler::Context;
use crate::compiler::diag::{Diagnostic, Result};
use crate::compiler::parser::{
    AST, Block, BlockItem, Declaration, Expression, ForInit, Statement,
};

type Ident = String;

/// Stack of per-block name maps, innermost scope last.
///
/// Entering a block (or the header of a `for` loop) pushes a fresh empty
/// map; leaving pops it. Lookups walk the stack innermost-first, so an inner
/// declaration shadows an outer one.
#[derive(Debug, Default)]
struct ScopeStack {
    scopes: Vec<HashMap<Ident, Ident>>,
}

impl ScopeStack {
    #[inline]
    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    #[inline]
    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    /// Records a declaration in the innermost scope, returning the unique
    /// name minted for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier was already declared in the
    /// innermost scope. Shadowing an outer scope is allowed.
    fn declare(&mut self, ident: &str, line: usize, ctx: &mut Context) -> Result<Ident> {
        let scope = self
            .scopes
            .last_mut()
            .expect("a scope should be active while resolving a declaration");

        if scope.contains_key(ident) {
            return Err(Diagnostic::Resolution {
                line,
                message: format!("redeclaration of '{ident}'"),
            });
        }

        let unique = ctx.unique_name(ident);
        scope.insert(ident.to_string(), unique.clone());

        Ok(unique)
    }

    /// Returns the unique name for the given identifier, searching the
    /// innermost scope first, or `None` if no declaration is in scope.
    fn resolve(&self, ident: &str) -> Option<&Ident> {
        self.scopes.iter().rev().find_map(|scope| scope.get(ident))
    }
}

/// Resolves the AST in place.
///
/// # Errors
///
/// Returns a [`Diagnostic::Resolution`] on an undeclared variable, a
/// duplicate declaration within one scope, an invalid assignment target, or
/// a `break`/`continue` outside any loop.
pub fn resolve_program(ast: &mut AST, ctx: &mut Context) -> Result<()> {
    let AST::Program(func) = ast;

    // Pass 1 - variable resolution.
    let mut scopes = ScopeStack::default();
    resolve_block(&mut func.body, &mut scopes, ctx)?;

    // Pass 2 - loop labeling.
    label_block(&mut func.body, None, ctx)?;

    Ok(())
}

fn resolve_block(block: &mut Block, scopes: &mut ScopeStack, ctx: &mut Context) -> Result<()> {
    scopes.enter_scope();

    for item in &mut block.0 {
        match item {
            BlockItem::Decl(decl) => resolve_declaration(decl, scopes, ctx)?,
            BlockItem::Stmt(stmt) => resolve_statement(stmt, scopes, ctx)?,
        }
    }

    scopes.exit_scope();

    Ok(())
}

fn resolve_declaration(
    decl: &mut Declaration,
    scopes: &mut ScopeStack,
    ctx: &mut Context,
) -> Result<()> {
    decl.ident = scopes.declare(&decl.ident, decl.line, ctx)?;

    if let Some(init) = &mut decl.init {
        resolve_expression(init, scopes)?;
    }

    Ok(())
}

fn resolve_statement(
    stmt: &mut Statement,
    scopes: &mut ScopeStack,
    ctx: &mut Context,
) -> Result<()> {
    match stmt {
        Statement::Return(expr) | Statement::Expression(expr) => {
            resolve_expression(expr, scopes)
        }
        Statement::Empty | Statement::Break { .. } | Statement::Continue { .. } => Ok(()),
        Statement::If {
            cond,
            then,
            opt_else,
        } => {
            resolve_expression(cond, scopes)?;
            resolve_statement(then, scopes, ctx)?;

            if let Some(else_stmt) = opt_else {
                resolve_statement(else_stmt, scopes, ctx)?;
            }

            Ok(())
        }
        Statement::Compound(block) => resolve_block(block, scopes, ctx),
        Statement::While { cond, body, .. } => {
            resolve_expression(cond, scopes)?;
            resolve_statement(body, scopes, ctx)
        }
        Statement::Do { body, cond, .. } => {
            resolve_statement(body, scopes, ctx)?;
            resolve_expression(cond, scopes)
        }
        Statement::For {
            init,
            opt_cond,
            opt_post,
            body,
            ..
        } => {
            // A for loop always introduces a fresh scope enclosing the
            // header and the body, also when the init is an expression. A
            // compound body pushes its own scope on top.
            scopes.enter_scope();

            match &mut **init {
                ForInit::Decl(decl) => resolve_declaration(decl, scopes, ctx)?,
                ForInit::Expr(opt_init) => {
                    if let Some(init) = opt_init {
                        resolve_expression(init, scopes)?;
                    }
                }
            }

            if let Some(cond) = opt_cond {
                resolve_expression(cond, scopes)?;
            }

            if let Some(post) = opt_post {
                resolve_expression(post, scopes)?;
            }

            resolve_statement(body, scopes, ctx)?;

            scopes.exit_scope();

            Ok(())
        }
    }
}

fn resolve_expression(expr: &mut Expression, scopes: &ScopeStack) -> Result<()> {
    match expr {
        Expression::Constant(_) => Ok(()),
        Expression::Var { ident, line } => match scopes.resolve(ident) {
            Some(unique) => {
                *ident = unique.clone();
                Ok(())
            }
            None => Err(Diagnostic::Resolution {
                line: *line,
                message: format!("use of undeclared variable '{ident}'"),
            }),
        },
        Expression::Unary { expr, .. } => resolve_expression(expr, scopes),
        Expression::Binary { lhs, rhs, .. } => {
            resolve_expression(lhs, scopes)?;
            resolve_expression(rhs, scopes)
        }
        Expression::Assignment {
            lvalue,
            rvalue,
            line,
        } => {
            resolve_expression(lvalue, scopes)?;

            if !matches!(**lvalue, Expression::Var { .. }) {
                return Err(Diagnostic::Resolution {
                    line: *line,
                    message: "lvalue required as left operand of assignment".into(),
                });
            }

            resolve_expression(rvalue, scopes)
        }
        Expression::Conditional(cond, then, other) => {
            resolve_expression(cond, scopes)?;
            resolve_expression(then, scopes)?;
            resolve_expression(other, scopes)
        }
    }
}

fn label_block(block: &mut Block, current: Option<&str>, ctx: &mut Context) -> Result<()> {
    for item in &mut block.0 {
        if let BlockItem::Stmt(stmt) = item {
            label_statement(stmt, current, ctx)?;
        }
    }

    Ok(())
}

/// Assigns a fresh unique label to each loop and binds `break`/`continue`
/// statements to the label of their innermost enclosing loop. `current`
/// carries the enclosing loop's label and is propagated unchanged into
/// nested non-loop statements.
fn label_statement(stmt: &mut Statement, current: Option<&str>, ctx: &mut Context) -> Result<()> {
    match stmt {
        Statement::Break { label, line } => match current {
            Some(current) => {
                *label = current.to_string();
                Ok(())
            }
            None => Err(Diagnostic::Resolution {
                line: *line,
                message: "break statement not within a loop".into(),
            }),
        },
        Statement::Continue { label, line } => match current {
            Some(current) => {
                *label = current.to_string();
                Ok(())
            }
            None => Err(Diagnostic::Resolution {
                line: *line,
                message: "continue statement not within a loop".into(),
            }),
        },
        Statement::While { body, label, .. }
        | Statement::Do { body, label, .. }
        | Statement::For { body, label, .. } => {
            *label = ctx.label("loop");

            let loop_label = label.clone();
            label_statement(body, Some(&loop_label), ctx)
        }
        Statement::If { then, opt_else, .. } => {
            label_statement(then, current, ctx)?;

            if let Some(else_stmt) = opt_else {
                label_statement(else_stmt, current, ctx)?;
            }

            Ok(())
        }
        Statement::Compound(block) => label_block(block, current, ctx),
        Statement::Return(_) | Statement::Expression(_) | Statement::Empty => Ok(()),
    }
}
