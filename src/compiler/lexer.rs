//! Lexical Analysis
//!
//! Compiler pass that tokenizes C source text, producing the flat sequence
//! of tokens consumed by the parser.

use std::fmt;

use crate::compiler::diag::{Diagnostic, Result};

/// Reserved keywords of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Keyword {
    Int,
    Void,
    Return,
    If,
    Else,
    Do,
    While,
    For,
    Break,
    Continue,
}

impl Keyword {
    /// Reclassifies an identifier lexeme as a keyword, or `None` if the
    /// lexeme is an ordinary identifier.
    fn from_ident(ident: &str) -> Option<Keyword> {
        match ident {
            "int" => Some(Keyword::Int),
            "void" => Some(Keyword::Void),
            "return" => Some(Keyword::Return),
            "if" => Some(Keyword::If),
            "else" => Some(Keyword::Else),
            "do" => Some(Keyword::Do),
            "while" => Some(Keyword::While),
            "for" => Some(Keyword::For),
            "break" => Some(Keyword::Break),
            "continue" => Some(Keyword::Continue),
            _ => None,
        }
    }
}

/// Operators of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// `+` operator.
    Plus,
    /// `-` operator (negation or subtraction).
    Minus,
    /// `*` operator.
    Asterisk,
    /// `/` operator.
    Division,
    /// `%` operator.
    Remainder,
    /// `~` operator.
    BitNot,
    /// `!` operator.
    LogNot,
    /// `&&` operator.
    LogAnd,
    /// `||` operator.
    LogOr,
    /// `==` operator.
    Eq,
    /// `!=` operator.
    NotEq,
    /// `<` operator.
    LessThan,
    /// `<=` operator.
    LessThanEq,
    /// `>` operator.
    GreaterThan,
    /// `>=` operator.
    GreaterThanEq,
    /// `=` operator.
    Assign,
    /// `--` operator.
    Decrement,
}

/// Types of lexical elements.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    Constant(i32),
    Operator(OperatorKind),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semicolon,
    Comma,
    Colon,
    Question,
}

/// Minimal lexical element of the source language.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Classification of the token.
    pub kind: TokenKind,
    /// Original source text of the token.
    pub lexeme: String,
    /// 1-indexed line of the token's first character.
    pub line: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<28} lexeme: {:?}, line: {}",
            format!("{:?}", self.kind),
            self.lexeme,
            self.line
        )
    }
}

/// Scans C source text into an ordered sequence of tokens.
#[derive(Debug)]
pub struct Lexer<'a> {
    src: &'a [u8],
    cur: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    /// Returns a new `Lexer` over the given source text.
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            cur: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    /// Consumes the source text, producing the token sequence.
    ///
    /// Whitespace, preprocessor lines beginning with `#`, and comments are
    /// consumed without emitting tokens. Carriage returns are treated as
    /// whitespace, so both `\n` and `\r\n` line endings advance the line
    /// counter exactly once.
    ///
    /// # Errors
    ///
    /// Returns a [`Diagnostic::Lex`] on any character that matches no token
    /// pattern, on an integer constant running into identifier characters
    /// (`123abc`), or on an unterminated block comment.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        while self.has_next() {
            match self.first() {
                b'\n' => {
                    self.line += 1;
                    self.cur += 1;
                }
                b if b.is_ascii_whitespace() => {
                    self.cur += 1;
                }
                // Preprocessor lines are consumed, not emitted. The newline is
                // left for the outer loop to count.
                b'#' => {
                    while self.has_next() && self.first() != b'\n' {
                        self.cur += 1;
                    }
                }
                b'/' if self.second() == Some(b'/') => {
                    while self.has_next() && self.first() != b'\n' {
                        self.cur += 1;
                    }
                }
                b'/' if self.second() == Some(b'*') => {
                    self.block_comment()?;
                }
                b'0'..=b'9' => {
                    self.constant()?;
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    self.ident_or_keyword();
                }
                b'-' if self.second() == Some(b'-') => {
                    self.push_operator(OperatorKind::Decrement, "--");
                }
                b'&' if self.second() == Some(b'&') => {
                    self.push_operator(OperatorKind::LogAnd, "&&");
                }
                b'|' if self.second() == Some(b'|') => {
                    self.push_operator(OperatorKind::LogOr, "||");
                }
                b'=' if self.second() == Some(b'=') => {
                    self.push_operator(OperatorKind::Eq, "==");
                }
                b'!' if self.second() == Some(b'=') => {
                    self.push_operator(OperatorKind::NotEq, "!=");
                }
                b'<' if self.second() == Some(b'=') => {
                    self.push_operator(OperatorKind::LessThanEq, "<=");
                }
                b'>' if self.second() == Some(b'=') => {
                    self.push_operator(OperatorKind::GreaterThanEq, ">=");
                }
                b'-' => self.push_operator(OperatorKind::Minus, "-"),
                b'=' => self.push_operator(OperatorKind::Assign, "="),
                b'!' => self.push_operator(OperatorKind::LogNot, "!"),
                b'<' => self.push_operator(OperatorKind::LessThan, "<"),
                b'>' => self.push_operator(OperatorKind::GreaterThan, ">"),
                b'+' => self.push_operator(OperatorKind::Plus, "+"),
                b'*' => self.push_operator(OperatorKind::Asterisk, "*"),
                b'/' => self.push_operator(OperatorKind::Division, "/"),
                b'%' => self.push_operator(OperatorKind::Remainder, "%"),
                b'~' => self.push_operator(OperatorKind::BitNot, "~"),
                b'(' => self.push_punct(TokenKind::LParen, "("),
                b')' => self.push_punct(TokenKind::RParen, ")"),
                b'{' => self.push_punct(TokenKind::LBrace, "{"),
                b'}' => self.push_punct(TokenKind::RBrace, "}"),
                b';' => self.push_punct(TokenKind::Semicolon, ";"),
                b',' => self.push_punct(TokenKind::Comma, ","),
                b':' => self.push_punct(TokenKind::Colon, ":"),
                b'?' => self.push_punct(TokenKind::Question, "?"),
                b => {
                    return Err(Diagnostic::Lex {
                        line: self.line,
                        message: format!("invalid character: '{}'", b as char),
                    });
                }
            }
        }

        Ok(self.tokens)
    }

    /// Consumes a `/* ... */` comment, counting the newlines inside it.
    fn block_comment(&mut self) -> Result<()> {
        let start_line = self.line;

        // Skip the opening "/*".
        self.cur += 2;

        while self.has_next() {
            match self.first() {
                b'*' if self.second() == Some(b'/') => {
                    self.cur += 2;
                    return Ok(());
                }
                b'\n' => {
                    self.line += 1;
                    self.cur += 1;
                }
                _ => self.cur += 1,
            }
        }

        Err(Diagnostic::Lex {
            line: start_line,
            message: "unterminated block comment".into(),
        })
    }

    /// Consumes an integer constant.
    fn constant(&mut self) -> Result<()> {
        let start = self.cur;

        while self.has_next() && self.first().is_ascii_digit() {
            self.cur += 1;
        }

        // An integer constant running into identifier characters is a single
        // malformed token, not a constant followed by an identifier.
        if self.has_next() && Self::is_ident_char(self.first()) {
            while self.has_next() && Self::is_ident_char(self.first()) {
                self.cur += 1;
            }

            let lexeme = self.src_slice(start);

            return Err(Diagnostic::Lex {
                line: self.line,
                message: format!("invalid suffix on integer constant: '{lexeme}'"),
            });
        }

        let lexeme = self.src_slice(start);

        let value = lexeme.parse::<i32>().map_err(|_| Diagnostic::Lex {
            line: self.line,
            message: format!("integer constant out of range: '{lexeme}'"),
        })?;

        self.tokens.push(Token {
            kind: TokenKind::Constant(value),
            lexeme,
            line: self.line,
        });

        Ok(())
    }

    /// Consumes an identifier, reclassifying it as a keyword where the lexeme
    /// matches one.
    fn ident_or_keyword(&mut self) {
        let start = self.cur;

        while self.has_next() && Self::is_ident_char(self.first()) {
            self.cur += 1;
        }

        let lexeme = self.src_slice(start);

        let kind = match Keyword::from_ident(&lexeme) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(lexeme.clone()),
        };

        self.tokens.push(Token {
            kind,
            lexeme,
            line: self.line,
        });
    }

    fn push_operator(&mut self, op: OperatorKind, lexeme: &str) {
        self.push_punct(TokenKind::Operator(op), lexeme);
    }

    fn push_punct(&mut self, kind: TokenKind, lexeme: &str) {
        self.tokens.push(Token {
            kind,
            lexeme: lexeme.into(),
            line: self.line,
        });
        self.cur += lexeme.len();
    }

    /// Returns the UTF-8 representation of the source from `start` to the
    /// current cursor position.
    fn src_slice(&self, start: usize) -> String {
        std::str::from_utf8(&self.src[start..self.cur])
            .expect("token bytes should be valid ASCII")
            .to_string()
    }

    #[inline]
    fn is_ident_char(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_'
    }

    /// Returns the byte at the current cursor position without consuming it.
    #[inline]
    fn first(&self) -> u8 {
        self.src[self.cur]
    }

    /// Returns the byte after the current cursor position, or `None` at the
    /// end of the source.
    #[inline]
    fn second(&self) -> Option<u8> {
        self.src.get(self.cur + 1).copied()
    }

    #[inline]
    fn has_next(&self) -> bool {
        self.cur < self.src.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Result<Vec<Token>> {
        Lexer::new(src).tokenize()
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src)
            .expect("source should lex")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexer_valid_return_constant() {
        let tokens = lex("int main(void) { return 2; }").unwrap();

        assert_eq!(tokens.len(), 10);
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Int));
        assert_eq!(tokens[1].kind, TokenKind::Ident("main".into()));
        assert_eq!(tokens[7].kind, TokenKind::Constant(2));
    }

    #[test]
    fn lexer_valid_multi_char_operators_win() {
        assert_eq!(
            kinds("- -- <= < >= > == = != ! && ||"),
            vec![
                TokenKind::Operator(OperatorKind::Minus),
                TokenKind::Operator(OperatorKind::Decrement),
                TokenKind::Operator(OperatorKind::LessThanEq),
                TokenKind::Operator(OperatorKind::LessThan),
                TokenKind::Operator(OperatorKind::GreaterThanEq),
                TokenKind::Operator(OperatorKind::GreaterThan),
                TokenKind::Operator(OperatorKind::Eq),
                TokenKind::Operator(OperatorKind::Assign),
                TokenKind::Operator(OperatorKind::NotEq),
                TokenKind::Operator(OperatorKind::LogNot),
                TokenKind::Operator(OperatorKind::LogAnd),
                TokenKind::Operator(OperatorKind::LogOr),
            ]
        );
    }

    #[test]
    fn lexer_valid_adjacent_multi_char_operators() {
        // "---" scans longest-match first: "--" then "-".
        assert_eq!(
            kinds("---"),
            vec![
                TokenKind::Operator(OperatorKind::Decrement),
                TokenKind::Operator(OperatorKind::Minus),
            ]
        );
    }

    #[test]
    fn lexer_valid_line_numbers() {
        let tokens = lex("int\nmain(void)\n{\nreturn 0;\n}").unwrap();

        assert_eq!(tokens[0].line, 1); // int
        assert_eq!(tokens[1].line, 2); // main
        assert_eq!(tokens[5].line, 3); // {
        assert_eq!(tokens[6].line, 4); // return
        assert_eq!(tokens[9].line, 5); // }
    }

    #[test]
    fn lexer_valid_crlf_line_endings() {
        let tokens = lex("int a;\r\nint b;").unwrap();

        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[3].line, 2);
    }

    #[test]
    fn lexer_valid_comments_and_preprocessor_lines() {
        let tokens =
            lex("#include <stdio.h>\n// line comment\nint /* inline */ x;\n/* multi\nline */ int y;")
                .unwrap();

        let idents: Vec<_> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Ident(s) => Some((s.as_str(), t.line)),
                _ => None,
            })
            .collect();

        assert_eq!(idents, vec![("x", 3), ("y", 5)]);
    }

    #[test]
    fn lexer_valid_keyword_reclassification() {
        assert_eq!(
            kinds("if else do while for break continue returned"),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::Else),
                TokenKind::Keyword(Keyword::Do),
                TokenKind::Keyword(Keyword::While),
                TokenKind::Keyword(Keyword::For),
                TokenKind::Keyword(Keyword::Break),
                TokenKind::Keyword(Keyword::Continue),
                TokenKind::Ident("returned".into()),
            ]
        );
    }

    #[test]
    fn lexer_valid_round_trip() {
        // Re-lexing the lexemes joined with single spaces yields the same
        // token sequence.
        let source = "int main(void) { int a = 5; for (a = 0; a < 10; a = a - -1) a = a ? 1 : 2; return a && 1; }";
        let tokens = lex(source).unwrap();

        let joined = tokens
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let relexed = lex(&joined).unwrap();

        assert_eq!(
            tokens.iter().map(|t| &t.kind).collect::<Vec<_>>(),
            relexed.iter().map(|t| &t.kind).collect::<Vec<_>>()
        );
    }

    #[test]
    fn lexer_invalid_character() {
        // The '@' symbol doesn't appear in any token.
        let err = lex("int main(void) { return 0@1; }").unwrap_err();

        assert_eq!(
            err,
            Diagnostic::Lex {
                line: 1,
                message: "invalid character: '@'".into()
            }
        );
    }

    #[test]
    fn lexer_invalid_single_ampersand() {
        // A lone '&' is not in the token set; only "&&" is.
        assert!(lex("1 & 2").is_err());
    }

    #[test]
    fn lexer_invalid_constant_suffix() {
        let err = lex("int main(void) {\n    return 123abc;\n}").unwrap_err();

        assert_eq!(
            err,
            Diagnostic::Lex {
                line: 2,
                message: "invalid suffix on integer constant: '123abc'".into()
            }
        );
    }

    #[test]
    fn lexer_invalid_constant_out_of_range() {
        assert!(lex("int main(void) { return 99999999999999; }").is_err());
    }

    #[test]
    fn lexer_invalid_unterminated_block_comment() {
        let err = lex("int x;\n/* never closed\nint y;").unwrap_err();

        assert_eq!(
            err,
            Diagnostic::Lex {
                line: 2,
                message: "unterminated block comment".into()
            }
        );
    }
}
