//! Multi-stage pipeline for compiling C source code into textual assembly.
//!
//! The stages run as a sequential pure-function chain; each consumes the
//! output of its predecessor:
//! - `lexer` performs lexical analysis and produces a flat token sequence.
//! - `parser` owns all syntactic knowledge and produces an AST.
//! - `resolve` rewrites the AST with unique names and bound loop labels.
//! - `ir` lowers the resolved AST into three-address code.
//! - `mir` selects x86-64 instructions, assigns stack slots, and legalizes
//!   operand forms.
//! - `emit` serializes the result as AT&T assembly text.
//!
//! The only mutable state is the fresh-name counter in [`Context`], created
//! per compile and passed explicitly, so concurrent compiles never share
//! state.

pub mod diag;
pub mod emit;
pub mod ir;
pub mod lexer;
pub mod mir;
pub mod parser;
pub mod resolve;

pub use diag::{Diagnostic, Stage};

/// Code-emission options supplied by the driver.
#[derive(Debug, Clone)]
pub struct Options {
    /// Decorate the global symbol with a leading underscore, as Mach-O
    /// targets require.
    pub symbol_underscore_prefix: bool,
}

impl Default for Options {
    /// Detects the decoration convention of the host platform.
    fn default() -> Self {
        Options {
            symbol_underscore_prefix: cfg!(target_os = "macos"),
        }
    }
}

/// Per-compile state: the monotonic counter behind every fresh name minted
/// by the resolver and the TAC lowerer.
///
/// Sharing one counter across the stages makes every minted name globally
/// unique within a compile. The `.` separator cannot appear in C
/// identifiers, so minted names never collide with user names either.
#[derive(Debug, Default)]
pub struct Context {
    counter: usize,
}

impl Context {
    /// Returns a fresh per-compile context.
    #[must_use]
    pub fn new() -> Self {
        Context::default()
    }

    #[inline]
    fn next(&mut self) -> usize {
        let n = self.counter;
        self.counter += 1;
        n
    }

    /// Mints a unique name for a user identifier.
    pub(crate) fn unique_name(&mut self, base: &str) -> String {
        format!("{base}.{}", self.next())
    }

    /// Mints a fresh temporary variable name.
    pub(crate) fn temp(&mut self) -> String {
        format!("tmp.{}", self.next())
    }

    /// Mints a fresh label from a hint describing its purpose.
    pub(crate) fn label(&mut self, hint: &str) -> String {
        format!("{hint}.{}", self.next())
    }
}

/// Compiles C source text into x86-64 assembly text.
///
/// This is the single entry point the driver sees; reading the source and
/// writing the output belong to the driver.
///
/// # Errors
///
/// Returns the first [`Diagnostic`] raised by any stage. Stages after the
/// failing one are not executed.
pub fn compile(source: &str, opts: &Options) -> diag::Result<String> {
    let mut ctx = Context::new();

    let tokens = lexer::Lexer::new(source).tokenize()?;
    let mut ast = parser::parse_program(tokens)?;
    resolve::resolve_program(&mut ast, &mut ctx)?;

    let ir = ir::generate_ir(ast, &mut ctx)?;
    let mir = mir::generate_mir(ir);

    emit::emit_x86_64(&mir, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_elf(src: &str) -> diag::Result<String> {
        compile(
            src,
            &Options {
                symbol_underscore_prefix: false,
            },
        )
    }

    #[test]
    fn pipeline_valid_return_constant() {
        let asm = compile_elf("int main(void) { return 2; }").unwrap();

        assert!(asm.contains("\t.globl\tmain\n"));
        assert!(asm.contains("\tmovl\t$2, %eax\n"));
        assert!(asm.contains("\tret\n"));
    }

    #[test]
    fn pipeline_valid_nested_unary() {
        let asm = compile_elf("int main(void) { return ~(-3); }").unwrap();

        assert!(asm.contains("\tnegl\t"));
        assert!(asm.contains("\tnotl\t"));
    }

    #[test]
    fn pipeline_valid_precedence_arithmetic() {
        let asm = compile_elf("int main(void) { return 2 + 3 * 4; }").unwrap();

        assert!(asm.contains("\timull\t"));
        assert!(asm.contains("\taddl\t"));
    }

    #[test]
    fn pipeline_valid_variables() {
        let asm =
            compile_elf("int main(void) { int a = 5; int b = a + 1; return a * b; }").unwrap();

        // Two locals plus temporaries need a 16-byte aligned frame.
        assert!(asm.contains("\tsubq\t$16, %rsp\n") || asm.contains("\tsubq\t$32, %rsp\n"));
    }

    #[test]
    fn pipeline_valid_if_else() {
        let asm = compile_elf(
            "int main(void) { int a = 0; if (a == 0) a = 7; else a = 9; return a; }",
        )
        .unwrap();

        assert!(asm.contains("\tje\t.L"));
        assert!(asm.contains("\tmovl\t$7, "));
        assert!(asm.contains("\tmovl\t$9, "));
    }

    #[test]
    fn pipeline_valid_for_loop() {
        let asm = compile_elf(
            "int main(void) {
                int i = 0;
                int s = 0;
                for (i = 1; i <= 5; i = i + 1) s = s + i;
                return s;
            }",
        )
        .unwrap();

        assert!(asm.contains(".Lstart_loop."));
        assert!(asm.contains(".Lbreak_loop."));
        assert!(asm.contains(".Lcontinue_loop."));
    }

    #[test]
    fn pipeline_valid_shadowing() {
        assert!(compile_elf("int main(void) { int x = 1; { int x = 2; } return x; }").is_ok());
    }

    #[test]
    fn pipeline_valid_short_circuit() {
        let asm = compile_elf("int main(void) { return 1 && 0; }").unwrap();

        // Short-circuit lowering produces conditional jumps, not a
        // single arithmetic instruction.
        assert!(asm.contains("\tje\t.Land_false."));
    }

    #[test]
    fn pipeline_valid_assignment_value() {
        assert!(compile_elf("int main(void) { int x = 5; return x = x + 2; }").is_ok());
    }

    #[test]
    fn pipeline_invalid_break_outside_loop() {
        let err = compile_elf("int main(void) { break; }").unwrap_err();

        assert_eq!(err.stage(), Stage::Resolution);
        assert!(err.to_string().contains("break"));
    }

    #[test]
    fn pipeline_invalid_lex_stops_pipeline() {
        let err = compile_elf("int main(void) { return 123abc; }").unwrap_err();

        assert_eq!(err.stage(), Stage::Lex);
    }

    #[test]
    fn pipeline_deterministic_across_compiles() {
        // Fresh-name counters are per compile, so repeated compiles in one
        // process produce identical output.
        let src = "int main(void) { int a = 1; while (a) a = a - 1; return a || 2; }";

        let first = compile_elf(src).unwrap();
        let second = compile_elf(src).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn pipeline_ends_with_ret_on_every_path() {
        let sources = [
            "int main(void) { return 2; }",
            "int main(void) { int a = 1; }",
            "int main(void) { if (1) return 2; else return 3; }",
        ];

        for src in sources {
            let asm = compile_elf(src).unwrap();
            let last_inst = asm
                .lines()
                .filter(|line| !line.trim().is_empty() && !line.contains(".note.GNU-stack"))
                .last()
                .unwrap();

            assert_eq!(last_inst.trim(), "ret", "source: {src}");
        }
    }
}
