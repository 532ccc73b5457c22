//! Token definitions for the Me language.

/// A lexical token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

/// Token kind, carrying the literal payload where one exists.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and names
    Ident(String),
    Long(i64),
    Float(f64),
    Str(String),

    // Keywords
    KwVar,      // değişken
    KwConst,    // sabit
    KwIf,       // şayet
    KwElse,     // değilse
    KwWhile,    // madem
    KwFunction, // marifet
    KwReturn,   // tebliğ
    KwBreak,    // yeter
    KwContinue, // devam
    KwAnd,      // ve
    KwOr,       // veya
    KwNone,     // none

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Lt,
    Gt,
    LtLt,
    GtGt,
    LtEq,
    GtEq,
    EqEq,
    BangEq,
    AmpAmp,
    PipePipe,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    PlusPlus,
    MinusMinus,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    /// Statement terminator: `;` or a newline outside parentheses.
    Terminator,
    Eof,
}

impl TokenKind {
    /// Resolves an identifier to its keyword kind, if it is one.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident {
            "değişken" => TokenKind::KwVar,
            "sabit" => TokenKind::KwConst,
            "şayet" => TokenKind::KwIf,
            "değilse" => TokenKind::KwElse,
            "madem" => TokenKind::KwWhile,
            "marifet" => TokenKind::KwFunction,
            "tebliğ" => TokenKind::KwReturn,
            "yeter" => TokenKind::KwBreak,
            "devam" => TokenKind::KwContinue,
            "ve" => TokenKind::KwAnd,
            "veya" => TokenKind::KwOr,
            "none" => TokenKind::KwNone,
            _ => return None,
        };
        Some(kind)
    }

    /// Short human-readable description used in parser diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Long(n) => format!("number {n}"),
            TokenKind::Float(f) => format!("number {f}"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Terminator => "end of statement".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("{other:?}"),
        }
    }
}
