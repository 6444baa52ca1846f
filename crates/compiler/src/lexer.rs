//! Lexer for preprocessed C source
//!
//! Single-pass scanner over a byte buffer. Produces a finite token vector
//! terminated by exactly one `Eof` token. The scanner is whitespace- and
//! comment-insensitive apart from line/column bookkeeping, tolerates `#`
//! preprocessor remnants (GCC line markers adjust the line counter), and
//! matches operators greedily: three characters, then two, then one.

use std::fmt;

/// Token kinds. Keywords are their own variants so the parser can match
/// on them directly; all operators and punctuators are spelled out up to
/// the three-character compound assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Type and storage keywords
    KwInt,
    KwChar,
    KwVoid,
    KwLong,
    KwShort,
    KwUnsigned,
    KwSigned,
    KwFloat,
    KwDouble,
    KwStruct,
    KwEnum,
    KwUnion,
    KwStatic,
    KwExtern,
    KwConst,
    KwVolatile,
    KwInline,
    KwTypedef,
    // Statement keywords
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwReturn,
    KwSwitch,
    KwCase,
    KwDefault,
    KwBreak,
    KwContinue,
    KwSizeof,
    KwAsm,
    // Literals and names
    Identifier,
    Number,
    StringLit,
    CharLit,
    // One-character operators and punctuators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Lt,
    Gt,
    Not,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Question,
    Colon,
    Semicolon,
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    // Two-character operators
    EqEq,
    NotEq,
    LtEq,
    GtEq,
    AmpAmp,
    PipePipe,
    Shl,
    Shr,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    Arrow,
    PlusPlus,
    MinusMinus,
    // Three-character operators
    ShlAssign,
    ShrAssign,
    Ellipsis,
    /// Raw `#...` line, kept verbatim (tail after `#`)
    Preprocessor,
    Eof,
}

/// A lexical unit with its spelling and source position (1-indexed).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }
}

/// Unexpected byte in the input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub ch: char,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unexpected character '{}' at line {}, column {}",
            self.ch, self.line, self.column
        )
    }
}

impl std::error::Error for LexError {}

fn keyword_kind(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "int" => TokenKind::KwInt,
        "char" => TokenKind::KwChar,
        "void" => TokenKind::KwVoid,
        "long" => TokenKind::KwLong,
        "short" => TokenKind::KwShort,
        "unsigned" => TokenKind::KwUnsigned,
        "signed" => TokenKind::KwSigned,
        "float" => TokenKind::KwFloat,
        "double" => TokenKind::KwDouble,
        "struct" => TokenKind::KwStruct,
        "enum" => TokenKind::KwEnum,
        "union" => TokenKind::KwUnion,
        "static" => TokenKind::KwStatic,
        "extern" => TokenKind::KwExtern,
        "const" => TokenKind::KwConst,
        "volatile" => TokenKind::KwVolatile,
        "inline" => TokenKind::KwInline,
        "typedef" => TokenKind::KwTypedef,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "return" => TokenKind::KwReturn,
        "switch" => TokenKind::KwSwitch,
        "case" => TokenKind::KwCase,
        "default" => TokenKind::KwDefault,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "sizeof" => TokenKind::KwSizeof,
        "asm" => TokenKind::KwAsm,
        _ => return None,
    };
    Some(kind)
}

/// Three-, two-, and one-character operator tables, in match order.
const OPERATORS3: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlAssign),
    (">>=", TokenKind::ShrAssign),
    ("...", TokenKind::Ellipsis),
];

const OPERATORS2: &[(&str, TokenKind)] = &[
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("<=", TokenKind::LtEq),
    (">=", TokenKind::GtEq),
    ("&&", TokenKind::AmpAmp),
    ("||", TokenKind::PipePipe),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("&=", TokenKind::AmpAssign),
    ("|=", TokenKind::PipeAssign),
    ("^=", TokenKind::CaretAssign),
    ("->", TokenKind::Arrow),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
];

const OPERATORS1: &[(char, TokenKind)] = &[
    ('+', TokenKind::Plus),
    ('-', TokenKind::Minus),
    ('*', TokenKind::Star),
    ('/', TokenKind::Slash),
    ('%', TokenKind::Percent),
    ('=', TokenKind::Assign),
    ('<', TokenKind::Lt),
    ('>', TokenKind::Gt),
    ('!', TokenKind::Not),
    ('&', TokenKind::Amp),
    ('|', TokenKind::Pipe),
    ('^', TokenKind::Caret),
    ('~', TokenKind::Tilde),
    ('?', TokenKind::Question),
    (':', TokenKind::Colon),
    (';', TokenKind::Semicolon),
    (',', TokenKind::Comma),
    ('.', TokenKind::Dot),
    ('(', TokenKind::LParen),
    (')', TokenKind::RParen),
    ('[', TokenKind::LBracket),
    (']', TokenKind::RBracket),
    ('{', TokenKind::LBrace),
    ('}', TokenKind::RBrace),
];

/// Render a token list back to source-shaped text: tokens separated by
/// single spaces, with newlines re-inserted at line boundaries. Relexing
/// the result reproduces the same kinds and lexemes; only the
/// whitespace-driven column positions differ.
pub fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut line = 1;
    for token in tokens {
        if token.kind == TokenKind::Eof {
            break;
        }
        while line < token.line {
            out.push('\n');
            line += 1;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push(' ');
        }
        out.push_str(&token.lexeme);
        // A directive owns the rest of its line; keep followers off it
        if token.kind == TokenKind::Preprocessor {
            out.push('\n');
            line += 1;
        }
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

pub struct Lexer {
    src: Vec<u8>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            src: source.as_bytes().to_vec(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Scan the whole input. The result always ends with exactly one
    /// `Eof` token; the first unrecognized byte aborts the scan.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.is_at_end() {
                break;
            }
            let token = self.next_token()?;
            tokens.push(token);
        }
        tokens.push(Token::new(TokenKind::Eof, "", self.line, self.column));
        Ok(tokens)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => break,
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let line = self.line;
        let column = self.column;
        let b = self.peek().expect("next_token called at end of input");

        if b == b'#' {
            return Ok(self.scan_preprocessor(line, column));
        }
        if b.is_ascii_digit() {
            return Ok(self.scan_number(line, column));
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            return Ok(self.scan_identifier(line, column));
        }
        if b == b'"' {
            return self.scan_quoted(b'"', TokenKind::StringLit, line, column);
        }
        if b == b'\'' {
            return self.scan_quoted(b'\'', TokenKind::CharLit, line, column);
        }
        self.scan_operator(line, column)
    }

    /// Consume a `#...` directive to end of line as one token. A GCC line
    /// marker (`# 42 "file.c"`) rewrites the line counter so subsequent
    /// tokens report positions in the original source.
    fn scan_preprocessor(&mut self, line: usize, column: usize) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.advance();
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let tail = lexeme[1..].trim_start();
        if let Some(first) = tail.split_whitespace().next() {
            if let Ok(marker) = first.parse::<usize>() {
                // The newline that terminates the directive will bump the
                // counter back to the marker value.
                self.line = marker.saturating_sub(1);
            }
        }
        Token::new(TokenKind::Preprocessor, lexeme, line, column)
    }

    fn scan_number(&mut self, line: usize, column: usize) -> Token {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.advance();
            self.advance();
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.advance();
            }
            // Fractional part
            if self.peek() == Some(b'.')
                && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit())
            {
                self.advance();
                while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    self.advance();
                }
            }
            // Exponent
            if matches!(self.peek(), Some(b'e' | b'E')) {
                let mut lookahead = 1;
                if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                    lookahead = 2;
                }
                if matches!(self.peek_at(lookahead), Some(b) if b.is_ascii_digit()) {
                    for _ in 0..=lookahead {
                        self.advance();
                    }
                    while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                        self.advance();
                    }
                }
            }
        }
        // Suffixes: [uU]?[lL]{0,2} or [fF]
        if matches!(self.peek(), Some(b'f' | b'F')) {
            self.advance();
        } else {
            if matches!(self.peek(), Some(b'u' | b'U')) {
                self.advance();
            }
            let mut longs = 0;
            while longs < 2 && matches!(self.peek(), Some(b'l' | b'L')) {
                self.advance();
                longs += 1;
            }
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Token::new(TokenKind::Number, lexeme, line, column)
    }

    fn scan_identifier(&mut self, line: usize, column: usize) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let kind = keyword_kind(&lexeme).unwrap_or(TokenKind::Identifier);
        Token::new(kind, lexeme, line, column)
    }

    /// String and character literals keep their quotes in the lexeme.
    /// A backslash consumes the following byte unconditionally.
    fn scan_quoted(
        &mut self,
        quote: u8,
        kind: TokenKind,
        line: usize,
        column: usize,
    ) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError {
                        ch: quote as char,
                        line,
                        column,
                    });
                }
                Some(b'\\') => {
                    self.advance();
                    self.advance();
                }
                Some(b) if b == quote => {
                    self.advance();
                    break;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Ok(Token::new(kind, lexeme, line, column))
    }

    fn scan_operator(&mut self, line: usize, column: usize) -> Result<Token, LexError> {
        let remaining = &self.src[self.pos..];
        for (spelling, kind) in OPERATORS3 {
            if remaining.starts_with(spelling.as_bytes()) {
                for _ in 0..3 {
                    self.advance();
                }
                return Ok(Token::new(*kind, *spelling, line, column));
            }
        }
        for (spelling, kind) in OPERATORS2 {
            if remaining.starts_with(spelling.as_bytes()) {
                for _ in 0..2 {
                    self.advance();
                }
                return Ok(Token::new(*kind, *spelling, line, column));
            }
        }
        let first = remaining[0] as char;
        for (ch, kind) in OPERATORS1 {
            if *ch == first {
                self.advance();
                return Ok(Token::new(*kind, ch.to_string(), line, column));
            }
        }
        Err(LexError {
            ch: first,
            line,
            column,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize().unwrap()
    }

    #[test]
    fn test_single_eof_at_end() {
        let tokens = lex("int x = 1;");
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
        let eofs = tokens.iter().filter(|t| t.kind == TokenKind::Eof).count();
        assert_eq!(eofs, 1);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = lex("int foo; return bar;");
        assert_eq!(tokens[0].kind, TokenKind::KwInt);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "foo");
        assert_eq!(tokens[3].kind, TokenKind::KwReturn);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = lex("int\n  x;");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_comments_update_lines() {
        let tokens = lex("/* a\n b */ x // tail\ny");
        assert_eq!(tokens[0].lexeme, "x");
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[1].lexeme, "y");
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_greedy_operator_match() {
        let tokens = lex("a <<= b >> c ... d->e");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::ShlAssign));
        assert!(kinds.contains(&TokenKind::Shr));
        assert!(kinds.contains(&TokenKind::Ellipsis));
        assert!(kinds.contains(&TokenKind::Arrow));
    }

    #[test]
    fn test_number_forms() {
        let tokens = lex("0x1F 017 42u 42ul 1.5e-3 2.0f 10ll");
        for t in &tokens[..7] {
            assert_eq!(t.kind, TokenKind::Number, "lexeme {}", t.lexeme);
        }
        assert_eq!(tokens[0].lexeme, "0x1F");
        assert_eq!(tokens[4].lexeme, "1.5e-3");
        assert_eq!(tokens[5].lexeme, "2.0f");
        assert_eq!(tokens[6].lexeme, "10ll");
    }

    #[test]
    fn test_string_keeps_quotes_and_escapes() {
        let tokens = lex(r#"char *s = "a\"b";"#);
        let s = tokens.iter().find(|t| t.kind == TokenKind::StringLit).unwrap();
        assert_eq!(s.lexeme, r#""a\"b""#);
    }

    #[test]
    fn test_char_literal() {
        let tokens = lex(r"'x' '\n'");
        assert_eq!(tokens[0].kind, TokenKind::CharLit);
        assert_eq!(tokens[0].lexeme, "'x'");
        assert_eq!(tokens[1].lexeme, r"'\n'");
    }

    #[test]
    fn test_preprocessor_line_marker() {
        let tokens = lex("# 42 \"file.c\"\nint x;");
        assert_eq!(tokens[0].kind, TokenKind::Preprocessor);
        assert_eq!(tokens[1].kind, TokenKind::KwInt);
        assert_eq!(tokens[1].line, 42);
    }

    #[test]
    fn test_unknown_directive_skipped_as_token() {
        let tokens = lex("#pragma once\nint x;");
        assert_eq!(tokens[0].kind, TokenKind::Preprocessor);
        assert_eq!(tokens[0].lexeme, "#pragma once");
        assert_eq!(tokens[1].kind, TokenKind::KwInt);
    }

    #[test]
    fn test_render_and_relex_round_trip() {
        let source = "int main() {\n  int x = 5;\n  return x * 2;\n}\n";
        let tokens = lex(source);
        let rendered = render_tokens(&tokens);
        let relexed = lex(&rendered);
        assert_eq!(tokens.len(), relexed.len());
        for (a, b) in tokens.iter().zip(&relexed) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.lexeme, b.lexeme);
            assert_eq!(a.line, b.line);
        }
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("int x = `;").tokenize().unwrap_err();
        assert_eq!(err.ch, '`');
        assert_eq!(err.line, 1);
        assert!(err.to_string().contains("Unexpected character"));
    }
}
