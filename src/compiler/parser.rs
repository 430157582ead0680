//! Syntax Analysis
//!
//! Compiler pass that parses a stream of tokens into an abstract syntax tree
//! (AST). Statements are parsed by recursive descent; expressions by
//! precedence climbing.

use std::fmt;
use std::iter::Peekable;
use std::vec::IntoIter;

use crate::compiler::diag::{Diagnostic, Result};
use crate::compiler::lexer::{Keyword, OperatorKind, Token, TokenKind};

type Ident = String;
type TokenIter = Peekable<IntoIter<Token>>;

/// Abstract Syntax Tree (AST).
#[derive(Debug)]
pub enum AST {
    /// Function that represents the structure of the program.
    Program(Function),
}

impl fmt::Display for AST {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AST::Program(func) => {
                writeln!(f, "AST Program")?;
                func.fmt_with_indent(f, 1)
            }
        }
    }
}

/// AST function definition.
#[derive(Debug)]
pub struct Function {
    /// Function identifier.
    pub ident: Ident,
    /// Compound statement forming the function body.
    pub body: Block,
}

impl Function {
    fn fmt_with_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);

        writeln!(f, "{pad}Fn({:?})", self.ident)?;
        self.body.fmt_with_indent(f, indent + 1)
    }
}

/// AST block: a brace-delimited sequence of block items.
#[derive(Debug)]
pub struct Block(pub Vec<BlockItem>);

impl Block {
    fn fmt_with_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);

        writeln!(f, "{pad}{{")?;

        for item in &self.0 {
            item.fmt_with_indent(f, indent + 1)?;
        }

        writeln!(f, "{pad}}}")
    }
}

/// AST block item.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum BlockItem {
    Decl(Declaration),
    Stmt(Statement),
}

impl BlockItem {
    fn fmt_with_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            BlockItem::Decl(decl) => {
                let pad = "  ".repeat(indent);
                writeln!(f, "{pad}Decl {decl}")
            }
            BlockItem::Stmt(stmt) => stmt.fmt_with_indent(f, indent),
        }
    }
}

/// AST declaration of an `int` variable.
#[derive(Debug)]
pub struct Declaration {
    /// Identifier of the declared variable.
    pub ident: Ident,
    /// Source line of the identifier, for diagnostics.
    pub line: usize,
    /// Optional initializer expression.
    pub init: Option<Expression>,
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.init {
            Some(init) => write!(f, "{:?} = {init}", self.ident),
            None => write!(f, "{:?} = <uninit>", self.ident),
        }
    }
}

/// AST `for` statement initial clause.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum ForInit {
    Decl(Declaration),
    Expr(Option<Expression>),
}

/// AST statement.
#[derive(Debug)]
pub enum Statement {
    /// Return the result of an expression to the caller.
    Return(Expression),
    /// Expression evaluated for its side effects.
    Expression(Expression),
    /// Expression statement without an expression (`;`).
    Empty,
    /// Conditional statement.
    If {
        /// Controlling expression.
        cond: Expression,
        /// Executes when the result of `cond` is non-zero.
        then: Box<Statement>,
        /// Optional statement to execute when the result of `cond` is zero.
        opt_else: Option<Box<Statement>>,
    },
    /// Compound statement.
    Compound(Block),
    /// Jump past the end of the enclosing loop.
    Break {
        /// Enclosing loop label, filled during semantic resolution.
        label: Ident,
        /// Source line, for diagnostics.
        line: usize,
    },
    /// Jump to the next iteration of the enclosing loop.
    Continue {
        /// Enclosing loop label, filled during semantic resolution.
        label: Ident,
        /// Source line, for diagnostics.
        line: usize,
    },
    /// Top-tested loop.
    While {
        /// Controlling expression.
        cond: Expression,
        /// Loop body.
        body: Box<Statement>,
        /// Unique loop label, filled during semantic resolution.
        label: Ident,
    },
    /// Bottom-tested loop.
    Do {
        /// Loop body.
        body: Box<Statement>,
        /// Controlling expression.
        cond: Expression,
        /// Unique loop label, filled during semantic resolution.
        label: Ident,
    },
    /// Counted loop.
    For {
        /// Initial clause, executed once before the first iteration.
        init: Box<ForInit>,
        /// Optional controlling expression.
        opt_cond: Option<Expression>,
        /// Optional expression executed after each iteration.
        opt_post: Option<Expression>,
        /// Loop body.
        body: Box<Statement>,
        /// Unique loop label, filled during semantic resolution.
        label: Ident,
    },
}

impl Statement {
    fn fmt_with_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);

        match self {
            Statement::Return(expr) => writeln!(f, "{pad}Return {expr}"),
            Statement::Expression(expr) => writeln!(f, "{pad}Expr {expr}"),
            Statement::Empty => writeln!(f, "{pad}Empty \";\""),
            Statement::If {
                cond,
                then,
                opt_else,
            } => {
                writeln!(f, "{pad}If ({cond})")?;
                then.fmt_with_indent(f, indent + 1)?;

                if let Some(else_stmt) = opt_else {
                    writeln!(f, "{pad}Else:")?;
                    else_stmt.fmt_with_indent(f, indent + 1)?;
                }

                Ok(())
            }
            Statement::Compound(block) => block.fmt_with_indent(f, indent),
            Statement::Break { label, .. } => writeln!(f, "{pad}Break <label {label:?}>"),
            Statement::Continue { label, .. } => writeln!(f, "{pad}Continue <label {label:?}>"),
            Statement::While { cond, body, label } => {
                writeln!(f, "{pad}While <label {label:?}> ({cond})")?;
                body.fmt_with_indent(f, indent + 1)
            }
            Statement::Do { body, cond, label } => {
                writeln!(f, "{pad}Do <label {label:?}>")?;
                body.fmt_with_indent(f, indent + 1)?;
                writeln!(f, "{pad}While ({cond})")
            }
            Statement::For {
                init,
                opt_cond,
                opt_post,
                body,
                label,
            } => {
                let init_fmt = match &**init {
                    ForInit::Decl(decl) => format!("Decl {decl}"),
                    ForInit::Expr(Some(expr)) => format!("{expr}"),
                    ForInit::Expr(None) => String::new(),
                };

                let cond_fmt = opt_cond.as_ref().map(Expression::to_string).unwrap_or_default();
                let post_fmt = opt_post.as_ref().map(Expression::to_string).unwrap_or_default();

                writeln!(f, "{pad}For <label {label:?}> ({init_fmt}; {cond_fmt}; {post_fmt})")?;
                body.fmt_with_indent(f, indent + 1)
            }
        }
    }
}

/// AST expression.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Constant `int` value (32-bit).
    Constant(i32),
    /// Variable reference.
    Var {
        /// Identifier, rewritten to its unique name during resolution.
        ident: Ident,
        /// Source line, for diagnostics.
        line: usize,
    },
    /// Unary operator applied to an expression.
    Unary {
        /// The unary operator.
        op: UnaryOperator,
        /// Operand expression.
        expr: Box<Expression>,
    },
    /// Binary operator applied to two expressions.
    Binary {
        /// The binary operator.
        op: BinaryOperator,
        /// Left operand.
        lhs: Box<Expression>,
        /// Right operand.
        rhs: Box<Expression>,
    },
    /// Assigns an rvalue to an lvalue. The lvalue is validated during
    /// semantic resolution, not at parse time.
    Assignment {
        /// Assignment target.
        lvalue: Box<Expression>,
        /// Assigned expression.
        rvalue: Box<Expression>,
        /// Source line, for diagnostics.
        line: usize,
    },
    /// Ternary conditional: evaluates the first expression and yields the
    /// second if it is non-zero, otherwise the third.
    Conditional(Box<Expression>, Box<Expression>, Box<Expression>),
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(v) => write!(f, "Constant({v})"),
            Expression::Var { ident, .. } => write!(f, "Var({ident:?})"),
            Expression::Unary { op, expr } => write!(f, "{op}({expr})"),
            Expression::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expression::Assignment { lvalue, rvalue, .. } => write!(f, "({lvalue} = {rvalue})"),
            Expression::Conditional(cond, then, other) => {
                write!(f, "({cond} ? {then} : {other})")
            }
        }
    }
}

/// AST unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `~` - bitwise complement.
    Complement,
    /// `-` - arithmetic negation.
    Negate,
    /// `!` - logical not.
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            UnaryOperator::Complement => "~",
            UnaryOperator::Negate => "-",
            UnaryOperator::Not => "!",
        };
        write!(f, "{op}")
    }
}

/// AST binary operators.
///
/// `=` and `?` are parsed through the same precedence-climbing loop as the
/// arithmetic operators but produce [`Expression::Assignment`] and
/// [`Expression::Conditional`] nodes rather than `Expression::Binary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+` - binary operator.
    Add,
    /// `-` - binary operator.
    Subtract,
    /// `*` - binary operator.
    Multiply,
    /// `/` - binary operator.
    Divide,
    /// `%` - binary operator.
    Modulo,
    /// `&&` - binary operator.
    LogAnd,
    /// `||` - binary operator.
    LogOr,
    /// `==` - binary operator.
    Eq,
    /// `!=` - binary operator.
    NotEq,
    /// `<` - binary operator.
    OrdLess,
    /// `<=` - binary operator.
    OrdLessEq,
    /// `>` - binary operator.
    OrdGreater,
    /// `>=` - binary operator.
    OrdGreaterEq,
    /// `=` - assignment, right-associative.
    Assign,
    /// `?` - ternary operator (climbed as a binary operator but **not**
    /// evaluated as one).
    Conditional,
}

impl BinaryOperator {
    /// Returns the precedence level of the binary operator (higher number
    /// indicates tighter binding).
    #[must_use]
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulo => 50,
            BinaryOperator::Add | BinaryOperator::Subtract => 45,
            BinaryOperator::OrdLess
            | BinaryOperator::OrdLessEq
            | BinaryOperator::OrdGreater
            | BinaryOperator::OrdGreaterEq => 35,
            BinaryOperator::Eq | BinaryOperator::NotEq => 30,
            BinaryOperator::LogAnd => 10,
            BinaryOperator::LogOr => 5,
            BinaryOperator::Conditional => 3,
            BinaryOperator::Assign => 1,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::LogAnd => "&&",
            BinaryOperator::LogOr => "||",
            BinaryOperator::Eq => "==",
            BinaryOperator::NotEq => "!=",
            BinaryOperator::OrdLess => "<",
            BinaryOperator::OrdLessEq => "<=",
            BinaryOperator::OrdGreater => ">",
            BinaryOperator::OrdGreaterEq => ">=",
            BinaryOperator::Assign => "=",
            BinaryOperator::Conditional => "?",
        };
        write!(f, "{op}")
    }
}

/// Parses an abstract syntax tree (AST) from the provided token sequence.
///
/// # Errors
///
/// Returns a [`Diagnostic::Parse`] on a token mismatch or an illegal
/// construct, and a [`Diagnostic::UnexpectedEof`] if the token sequence ends
/// where more input is required.
pub fn parse_program(tokens: Vec<Token>) -> Result<AST> {
    let mut iter = tokens.into_iter().peekable();

    let func = parse_function(&mut iter)?;

    if let Some(token) = iter.peek() {
        return Err(Diagnostic::Parse {
            line: token.line,
            message: format!(
                "unexpected token '{}' after function definition",
                token.lexeme
            ),
        });
    }

    Ok(AST::Program(func))
}

/// Parses an AST function definition: `"int" IDENT "(" "void" ")" block`.
fn parse_function(iter: &mut TokenIter) -> Result<Function> {
    expect_token(iter, &TokenKind::Keyword(Keyword::Int))?;

    let (ident, _) = parse_ident(iter)?;

    expect_token(iter, &TokenKind::LParen)?;
    expect_token(iter, &TokenKind::Keyword(Keyword::Void))?;
    expect_token(iter, &TokenKind::RParen)?;

    let body = parse_block(iter)?;

    Ok(Function { ident, body })
}

/// Parses an AST block: `"{" block-item* "}"`.
fn parse_block(iter: &mut TokenIter) -> Result<Block> {
    expect_token(iter, &TokenKind::LBrace)?;

    let mut items = vec![];

    while let Some(token) = iter.peek() {
        if token.kind == TokenKind::RBrace {
            break;
        }

        items.push(parse_block_item(iter)?);
    }

    expect_token(iter, &TokenKind::RBrace)?;

    Ok(Block(items))
}

/// Parses an AST block item: a declaration or a statement.
fn parse_block_item(iter: &mut TokenIter) -> Result<BlockItem> {
    match iter.peek() {
        // A leading type keyword starts a declaration.
        Some(token) if token.kind == TokenKind::Keyword(Keyword::Int) => {
            Ok(BlockItem::Decl(parse_declaration(iter)?))
        }
        Some(_) => Ok(BlockItem::Stmt(parse_statement(iter)?)),
        None => Err(Diagnostic::UnexpectedEof {
            expected: "'<block-item>'".into(),
        }),
    }
}

/// Parses an AST declaration: `"int" IDENT ( "=" expression )? ";"`.
fn parse_declaration(iter: &mut TokenIter) -> Result<Declaration> {
    expect_token(iter, &TokenKind::Keyword(Keyword::Int))?;

    let (ident, line) = parse_ident(iter)?;

    let mut init = None;

    if let Some(token) = iter.peek() {
        if token.kind == TokenKind::Operator(OperatorKind::Assign) {
            // Consume the "=" token.
            let _ = iter.next();
            init = Some(parse_expression(iter, 0)?);
        }
    }

    expect_token(iter, &TokenKind::Semicolon)?;

    Ok(Declaration { ident, line, init })
}

/// Parses an AST `for` initial clause: a declaration or an optional
/// expression terminated by `";"`.
fn parse_for_init(iter: &mut TokenIter) -> Result<ForInit> {
    match iter.peek() {
        Some(token) if token.kind == TokenKind::Keyword(Keyword::Int) => {
            // The declaration consumes its own ";".
            Ok(ForInit::Decl(parse_declaration(iter)?))
        }
        Some(_) => {
            let opt_expr = parse_opt_expression(iter, &TokenKind::Semicolon)?;
            expect_token(iter, &TokenKind::Semicolon)?;

            Ok(ForInit::Expr(opt_expr))
        }
        None => Err(Diagnostic::UnexpectedEof {
            expected: "'<for-init>'".into(),
        }),
    }
}

/// Parses an AST statement.
fn parse_statement(iter: &mut TokenIter) -> Result<Statement> {
    let Some(token) = iter.peek() else {
        return Err(Diagnostic::UnexpectedEof {
            expected: "'<statement>'".into(),
        });
    };

    match token.kind {
        TokenKind::Keyword(Keyword::Return) => {
            // Consume the "return" token.
            let _ = iter.next();

            let expr = parse_expression(iter, 0)?;
            expect_token(iter, &TokenKind::Semicolon)?;

            Ok(Statement::Return(expr))
        }
        TokenKind::Keyword(Keyword::If) => {
            // Consume the "if" token.
            let _ = iter.next();

            expect_token(iter, &TokenKind::LParen)?;
            let cond = parse_expression(iter, 0)?;
            expect_token(iter, &TokenKind::RParen)?;

            let then = parse_statement(iter)?;

            let mut opt_else = None;

            if let Some(token) = iter.peek() {
                if token.kind == TokenKind::Keyword(Keyword::Else) {
                    // Consume the "else" token.
                    let _ = iter.next();
                    opt_else = Some(Box::new(parse_statement(iter)?));
                }
            }

            Ok(Statement::If {
                cond,
                then: Box::new(then),
                opt_else,
            })
        }
        TokenKind::Keyword(Keyword::While) => {
            // Consume the "while" token.
            let _ = iter.next();

            expect_token(iter, &TokenKind::LParen)?;
            let cond = parse_expression(iter, 0)?;
            expect_token(iter, &TokenKind::RParen)?;

            let body = parse_statement(iter)?;

            Ok(Statement::While {
                cond,
                body: Box::new(body),
                // Placeholder, backpatched during semantic resolution.
                label: Ident::new(),
            })
        }
        TokenKind::Keyword(Keyword::Do) => {
            // Consume the "do" token.
            let _ = iter.next();

            let body = parse_statement(iter)?;

            expect_token(iter, &TokenKind::Keyword(Keyword::While))?;
            expect_token(iter, &TokenKind::LParen)?;

            let cond = parse_expression(iter, 0)?;

            expect_token(iter, &TokenKind::RParen)?;
            expect_token(iter, &TokenKind::Semicolon)?;

            Ok(Statement::Do {
                body: Box::new(body),
                cond,
                // Placeholder, backpatched during semantic resolution.
                label: Ident::new(),
            })
        }
        TokenKind::Keyword(Keyword::For) => {
            // Consume the "for" token.
            let _ = iter.next();

            expect_token(iter, &TokenKind::LParen)?;

            let init = parse_for_init(iter)?;

            let opt_cond = parse_opt_expression(iter, &TokenKind::Semicolon)?;
            expect_token(iter, &TokenKind::Semicolon)?;

            let opt_post = parse_opt_expression(iter, &TokenKind::RParen)?;
            expect_token(iter, &TokenKind::RParen)?;

            let body = parse_statement(iter)?;

            Ok(Statement::For {
                init: Box::new(init),
                opt_cond,
                opt_post,
                body: Box::new(body),
                // Placeholder, backpatched during semantic resolution.
                label: Ident::new(),
            })
        }
        TokenKind::Keyword(Keyword::Break) => {
            // Consume the "break" token.
            let token = iter.next().expect("peeked token should be present");

            expect_token(iter, &TokenKind::Semicolon)?;

            Ok(Statement::Break {
                // Placeholder, backpatched during semantic resolution.
                label: Ident::new(),
                line: token.line,
            })
        }
        TokenKind::Keyword(Keyword::Continue) => {
            // Consume the "continue" token.
            let token = iter.next().expect("peeked token should be present");

            expect_token(iter, &TokenKind::Semicolon)?;

            Ok(Statement::Continue {
                // Placeholder, backpatched during semantic resolution.
                label: Ident::new(),
                line: token.line,
            })
        }
        TokenKind::Semicolon => {
            // Consume the ";" token.
            let _ = iter.next();
            Ok(Statement::Empty)
        }
        TokenKind::LBrace => Ok(Statement::Compound(parse_block(iter)?)),
        _ => {
            let expr = parse_expression(iter, 0)?;
            expect_token(iter, &TokenKind::Semicolon)?;

            Ok(Statement::Expression(expr))
        }
    }
}

/// Parses an identifier token, returning its name and source line.
fn parse_ident(iter: &mut TokenIter) -> Result<(Ident, usize)> {
    match iter.next() {
        Some(token) => match token.kind {
            TokenKind::Ident(ref ident) => Ok((ident.clone(), token.line)),
            _ => Err(Diagnostic::Parse {
                line: token.line,
                message: format!("expected identifier, but found '{}'", token.lexeme),
            }),
        },
        None => Err(Diagnostic::UnexpectedEof {
            expected: "'<identifier>'".into(),
        }),
    }
}

/// Parses an AST expression from the token sequence using precedence
/// climbing. Only operators whose precedence is at least `min_precedence`
/// are consumed.
fn parse_expression(iter: &mut TokenIter, min_precedence: u8) -> Result<Expression> {
    let mut lhs = parse_factor(iter)?;

    while let Some(token) = iter.peek() {
        let Some(binop) = kind_to_binop(&token.kind) else {
            break;
        };

        if binop.precedence() < min_precedence {
            break;
        }

        // Consume the peeked operator token.
        let token = iter.next().expect("peeked token should be present");

        match binop {
            BinaryOperator::Assign => {
                // Recursing at the operator's own precedence makes `=`
                // right-associative. The lvalue is validated during semantic
                // resolution, so any expression is accepted here.
                let rhs = parse_expression(iter, binop.precedence())?;

                lhs = Expression::Assignment {
                    lvalue: Box::new(lhs),
                    rvalue: Box::new(rhs),
                    line: token.line,
                };
            }
            BinaryOperator::Conditional => {
                // The middle expression is delimited by "?" and ":", so it is
                // parsed as a full expression.
                let middle = parse_expression(iter, 0)?;

                expect_token(iter, &TokenKind::Colon)?;

                // Recursing at the operator's own precedence makes `?:`
                // right-associative.
                let other = parse_expression(iter, binop.precedence())?;

                lhs = Expression::Conditional(
                    Box::new(lhs),
                    Box::new(middle),
                    Box::new(other),
                );
            }
            binop => {
                // Left-associative operators recurse one level tighter so
                // operators of the same precedence group to the left.
                let rhs = parse_expression(iter, binop.precedence() + 1)?;

                lhs = Expression::Binary {
                    op: binop,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
            }
        }
    }

    Ok(lhs)
}

/// Parses an AST expression or sub-expression (factor): an integer literal,
/// a variable, a unary-prefixed factor, or a parenthesized expression.
fn parse_factor(iter: &mut TokenIter) -> Result<Expression> {
    let Some(token) = iter.next() else {
        return Err(Diagnostic::UnexpectedEof {
            expected: "'<factor>'".into(),
        });
    };

    match token.kind {
        TokenKind::Constant(v) => Ok(Expression::Constant(v)),
        TokenKind::Ident(ref ident) => Ok(Expression::Var {
            ident: ident.clone(),
            line: token.line,
        }),
        TokenKind::Operator(
            OperatorKind::BitNot | OperatorKind::Minus | OperatorKind::LogNot,
        ) => {
            let op = match token.kind {
                TokenKind::Operator(OperatorKind::BitNot) => UnaryOperator::Complement,
                TokenKind::Operator(OperatorKind::Minus) => UnaryOperator::Negate,
                _ => UnaryOperator::Not,
            };

            // Unary operators bind tighter than any binary operator, so only
            // a factor is parsed as the operand.
            let expr = parse_factor(iter)?;

            Ok(Expression::Unary {
                op,
                expr: Box::new(expr),
            })
        }
        TokenKind::LParen => {
            let inner = parse_expression(iter, 0)?;
            expect_token(iter, &TokenKind::RParen)?;

            Ok(inner)
        }
        _ => {
            let message = if token.kind == TokenKind::RParen {
                format!("expected expression before '{}' token", token.lexeme)
            } else {
                format!("unexpected token '{}' in expression", token.lexeme)
            };

            Err(Diagnostic::Parse {
                line: token.line,
                message,
            })
        }
    }
}

/// Parses an AST expression, or `None` if the `end_token` is encountered
/// first. The `end_token` is not consumed.
fn parse_opt_expression(
    iter: &mut TokenIter,
    end_token: &TokenKind,
) -> Result<Option<Expression>> {
    match iter.peek() {
        Some(token) if token.kind == *end_token => Ok(None),
        Some(_) => Ok(Some(parse_expression(iter, 0)?)),
        None => Err(Diagnostic::UnexpectedEof {
            expected: format!("'{}'", kind_lexeme(end_token)),
        }),
    }
}

/// Advances the token sequence if the next token matches the expected kind.
fn expect_token(iter: &mut TokenIter, expected: &TokenKind) -> Result<()> {
    match iter.peek() {
        Some(token) if token.kind == *expected => {
            // Consume the peeked token.
            let _ = iter.next();
            Ok(())
        }
        Some(token) => Err(Diagnostic::Parse {
            line: token.line,
            message: format!(
                "expected '{}', but found '{}'",
                kind_lexeme(expected),
                token.lexeme
            ),
        }),
        None => Err(Diagnostic::UnexpectedEof {
            expected: format!("'{}'", kind_lexeme(expected)),
        }),
    }
}

/// Returns the source spelling of a token kind, for diagnostics.
fn kind_lexeme(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Keyword(Keyword::Int) => "int",
        TokenKind::Keyword(Keyword::Void) => "void",
        TokenKind::Keyword(Keyword::Return) => "return",
        TokenKind::Keyword(Keyword::If) => "if",
        TokenKind::Keyword(Keyword::Else) => "else",
        TokenKind::Keyword(Keyword::Do) => "do",
        TokenKind::Keyword(Keyword::While) => "while",
        TokenKind::Keyword(Keyword::For) => "for",
        TokenKind::Keyword(Keyword::Break) => "break",
        TokenKind::Keyword(Keyword::Continue) => "continue",
        TokenKind::Ident(_) => "<identifier>",
        TokenKind::Constant(_) => "<constant>",
        TokenKind::Operator(OperatorKind::Plus) => "+",
        TokenKind::Operator(OperatorKind::Minus) => "-",
        TokenKind::Operator(OperatorKind::Asterisk) => "*",
        TokenKind::Operator(OperatorKind::Division) => "/",
        TokenKind::Operator(OperatorKind::Remainder) => "%",
        TokenKind::Operator(OperatorKind::BitNot) => "~",
        TokenKind::Operator(OperatorKind::LogNot) => "!",
        TokenKind::Operator(OperatorKind::LogAnd) => "&&",
        TokenKind::Operator(OperatorKind::LogOr) => "||",
        TokenKind::Operator(OperatorKind::Eq) => "==",
        TokenKind::Operator(OperatorKind::NotEq) => "!=",
        TokenKind::Operator(OperatorKind::LessThan) => "<",
        TokenKind::Operator(OperatorKind::LessThanEq) => "<=",
        TokenKind::Operator(OperatorKind::GreaterThan) => ">",
        TokenKind::Operator(OperatorKind::GreaterThanEq) => ">=",
        TokenKind::Operator(OperatorKind::Assign) => "=",
        TokenKind::Operator(OperatorKind::Decrement) => "--",
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        TokenKind::Semicolon => ";",
        TokenKind::Comma => ",",
        TokenKind::Colon => ":",
        TokenKind::Question => "?",
    }
}

/// Returns the conversion of `TokenKind` to `BinaryOperator`, or `None` if
/// the token kind is not a binary operator.
fn kind_to_binop(kind: &TokenKind) -> Option<BinaryOperator> {
    match kind {
        TokenKind::Operator(OperatorKind::Plus) => Some(BinaryOperator::Add),
        TokenKind::Operator(OperatorKind::Minus) => Some(BinaryOperator::Subtract),
        TokenKind::Operator(OperatorKind::Asterisk) => Some(BinaryOperator::Multiply),
        TokenKind::Operator(OperatorKind::Division) => Some(BinaryOperator::Divide),
        TokenKind::Operator(OperatorKind::Remainder) => Some(BinaryOperator::Modulo),
        TokenKind::Operator(OperatorKind::LogAnd) => Some(BinaryOperator::LogAnd),
        TokenKind::Operator(OperatorKind::LogOr) => Some(BinaryOperator::LogOr),
        TokenKind::Operator(OperatorKind::Eq) => Some(BinaryOperator::Eq),
        TokenKind::Operator(OperatorKind::NotEq) => Some(BinaryOperator::NotEq),
        TokenKind::Operator(OperatorKind::LessThan) => Some(BinaryOperator::OrdLess),
        TokenKind::Operator(OperatorKind::LessThanEq) => Some(BinaryOperator::OrdLessEq),
        TokenKind::Operator(OperatorKind::GreaterThan) => Some(BinaryOperator::OrdGreater),
        TokenKind::Operator(OperatorKind::GreaterThanEq) => Some(BinaryOperator::OrdGreaterEq),
        TokenKind::Operator(OperatorKind::Assign) => Some(BinaryOperator::Assign),
        TokenKind::Question => Some(BinaryOperator::Conditional),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;

    fn parse(src: &str) -> Result<AST> {
        let tokens = Lexer::new(src).tokenize().expect("source should lex");
        parse_program(tokens)
    }

    /// Returns the statements of the parsed program's function body.
    fn body(src: &str) -> Vec<BlockItem> {
        match parse(src).expect("source should parse") {
            AST::Program(func) => func.body.0,
        }
    }

    #[test]
    fn parser_valid_return_constant() {
        let items = body("int main(void) { return 2; }");

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            BlockItem::Stmt(Statement::Return(Expression::Constant(2)))
        ));
    }

    #[test]
    fn parser_valid_nested_unary_ops() {
        let items = body("int main(void) { return ~(-3); }");

        let BlockItem::Stmt(Statement::Return(Expression::Unary { op, expr })) = &items[0] else {
            panic!("expected return of a unary expression");
        };

        assert_eq!(*op, UnaryOperator::Complement);
        assert!(matches!(
            **expr,
            Expression::Unary {
                op: UnaryOperator::Negate,
                ..
            }
        ));
    }

    #[test]
    fn parser_valid_precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4).
        let items = body("int main(void) { return 2 + 3 * 4; }");

        let BlockItem::Stmt(Statement::Return(Expression::Binary { op, rhs, .. })) = &items[0]
        else {
            panic!("expected return of a binary expression");
        };

        assert_eq!(*op, BinaryOperator::Add);
        assert!(matches!(
            **rhs,
            Expression::Binary {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn parser_valid_left_associativity() {
        // 10 - 3 - 2 parses as (10 - 3) - 2.
        let items = body("int main(void) { return 10 - 3 - 2; }");

        let BlockItem::Stmt(Statement::Return(Expression::Binary { op, lhs, rhs })) = &items[0]
        else {
            panic!("expected return of a binary expression");
        };

        assert_eq!(*op, BinaryOperator::Subtract);
        assert!(matches!(**lhs, Expression::Binary { .. }));
        assert!(matches!(**rhs, Expression::Constant(2)));
    }

    #[test]
    fn parser_valid_assignment_right_associativity() {
        // a = b = 1 parses as a = (b = 1).
        let items = body("int main(void) { a = b = 1; return a; }");

        let BlockItem::Stmt(Statement::Expression(Expression::Assignment { rvalue, .. })) =
            &items[0]
        else {
            panic!("expected an assignment expression statement");
        };

        assert!(matches!(**rvalue, Expression::Assignment { .. }));
    }

    #[test]
    fn parser_valid_relational_precedence() {
        // a < b == c > d parses as (a < b) == (c > d).
        let items = body("int main(void) { return a < b == c > d; }");

        let BlockItem::Stmt(Statement::Return(Expression::Binary { op, lhs, rhs })) = &items[0]
        else {
            panic!("expected return of a binary expression");
        };

        assert_eq!(*op, BinaryOperator::Eq);
        assert!(matches!(
            **lhs,
            Expression::Binary {
                op: BinaryOperator::OrdLess,
                ..
            }
        ));
        assert!(matches!(
            **rhs,
            Expression::Binary {
                op: BinaryOperator::OrdGreater,
                ..
            }
        ));
    }

    #[test]
    fn parser_valid_ternary_right_associativity() {
        // a ? 1 : b ? 2 : 3 parses as a ? 1 : (b ? 2 : 3).
        let items = body("int main(void) { return a ? 1 : b ? 2 : 3; }");

        let BlockItem::Stmt(Statement::Return(Expression::Conditional(_, _, other))) = &items[0]
        else {
            panic!("expected return of a conditional expression");
        };

        assert!(matches!(**other, Expression::Conditional(..)));
    }

    #[test]
    fn parser_valid_ternary_middle_assignment() {
        // The middle expression is delimited, so assignment is allowed there.
        assert!(parse("int main(void) { return a ? b = 1 : 2; }").is_ok());
    }

    #[test]
    fn parser_valid_declaration_with_initializer() {
        let items = body("int main(void) { int a = 5; return a; }");

        let BlockItem::Decl(decl) = &items[0] else {
            panic!("expected a declaration");
        };

        assert_eq!(decl.ident, "a");
        assert!(matches!(decl.init, Some(Expression::Constant(5))));
    }

    #[test]
    fn parser_valid_if_else() {
        let items = body("int main(void) { if (1) return 2; else return 3; }");

        assert!(matches!(
            items[0],
            BlockItem::Stmt(Statement::If {
                opt_else: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn parser_valid_dangling_else() {
        // The else binds to the nearest if.
        let items = body("int main(void) { if (1) if (0) return 2; else return 3; }");

        let BlockItem::Stmt(Statement::If { then, opt_else, .. }) = &items[0] else {
            panic!("expected an if statement");
        };

        assert!(opt_else.is_none());
        assert!(matches!(
            **then,
            Statement::If {
                opt_else: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parser_valid_loops() {
        let items = body(
            "int main(void) {
                while (1) break;
                do continue; while (0);
                for (int i = 0; i < 10; i = i + 1) ;
                for (;;) break;
                return 0;
            }",
        );

        assert!(matches!(items[0], BlockItem::Stmt(Statement::While { .. })));
        assert!(matches!(items[1], BlockItem::Stmt(Statement::Do { .. })));

        let BlockItem::Stmt(Statement::For { init, .. }) = &items[2] else {
            panic!("expected a for statement");
        };
        assert!(matches!(**init, ForInit::Decl(_)));

        let BlockItem::Stmt(Statement::For {
            init,
            opt_cond,
            opt_post,
            ..
        }) = &items[3]
        else {
            panic!("expected a for statement");
        };
        assert!(matches!(**init, ForInit::Expr(None)));
        assert!(opt_cond.is_none());
        assert!(opt_post.is_none());
    }

    #[test]
    fn parser_valid_compound_and_empty_statements() {
        let items = body("int main(void) { ; { int a = 1; } return 0; }");

        assert!(matches!(items[0], BlockItem::Stmt(Statement::Empty)));
        assert!(matches!(
            items[1],
            BlockItem::Stmt(Statement::Compound(_))
        ));
    }

    #[test]
    fn parser_invalid_missing_semicolon() {
        let err = parse("int main(void) {\n    return 0\n}").unwrap_err();

        assert_eq!(
            err,
            Diagnostic::Parse {
                line: 3,
                message: "expected ';', but found '}'".into()
            }
        );
    }

    #[test]
    fn parser_invalid_unexpected_eof() {
        let err = parse("int main(void) { return").unwrap_err();

        assert!(matches!(err, Diagnostic::UnexpectedEof { .. }));
    }

    #[test]
    fn parser_invalid_extra_tokens() {
        assert!(parse("int main(void) { return 2; } foo").is_err());
    }

    #[test]
    fn parser_invalid_missing_function_type() {
        assert!(parse("main(void) { return 0; }").is_err());
    }

    #[test]
    fn parser_invalid_case_sensitive_keyword() {
        assert!(parse("int main(void) { RETURN 0; }").is_err());
    }

    #[test]
    fn parser_invalid_missing_operand() {
        assert!(parse("int main(void) { return 1 + ; }").is_err());
    }

    #[test]
    fn parser_invalid_double_operator() {
        assert!(parse("int main(void) { return 2 * / 2; }").is_err());
    }

    #[test]
    fn parser_invalid_unclosed_paren() {
        assert!(parse("int main(void) { return (1; }").is_err());
    }

    #[test]
    fn parser_invalid_unclosed_brace() {
        assert!(parse("int main(void) { return 0;").is_err());
    }

    #[test]
    fn parser_invalid_decrement_operator() {
        // "--" is lexed but the grammar has no decrement expression.
        assert!(parse("int main(void) { int a = 1; --a; return a; }").is_err());
    }

    #[test]
    fn parser_invalid_ternary_missing_colon() {
        assert!(parse("int main(void) { return 1 ? 2 ; }").is_err());
    }

    #[test]
    fn parser_invalid_do_missing_while() {
        assert!(parse("int main(void) { do ; (0); return 0; }").is_err());
    }
}
