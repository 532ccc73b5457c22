//! Hand-written scanner for Me source text.
//!
//! Positions are 1-based and counted in characters, not bytes, so they stay
//! meaningful for non-ASCII identifiers. Newlines terminate statements except
//! inside parentheses, where they are plain whitespace.

use std::iter::Peekable;
use std::str::Chars;

use crate::diagnostics::{Diagnostics, Stage};
use crate::token::{Token, TokenKind};

/// Scans `source` into a token vector, always ending with `Eof`.
///
/// Problems are recorded in `diags`; scanning continues past them so later
/// stages can report everything in one pass.
pub fn lex(source: &str, diags: &mut Diagnostics) -> Vec<Token> {
    let mut lexer = Lexer {
        chars: source.chars().peekable(),
        line: 1,
        col: 1,
        paren_depth: 0,
        tokens: Vec::new(),
    };
    lexer.run(diags);
    lexer.tokens
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    col: u32,
    paren_depth: u32,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn run(&mut self, diags: &mut Diagnostics) {
        while let Some(c) = self.advance() {
            let (line, col) = (self.line, self.col - 1);
            match c {
                ' ' | '\t' | '\r' => {}
                '\n' => {
                    self.line += 1;
                    self.col = 1;
                    if self.paren_depth == 0 {
                        self.push_terminator(line, col);
                    }
                }
                '#' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                ';' => self.push_terminator(line, col),
                '(' => {
                    self.paren_depth += 1;
                    self.push(TokenKind::LParen, line, col);
                }
                ')' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.push(TokenKind::RParen, line, col);
                }
                '{' => self.push(TokenKind::LBrace, line, col),
                '}' => self.push(TokenKind::RBrace, line, col),
                ',' => self.push(TokenKind::Comma, line, col),
                '~' => self.push(TokenKind::Tilde, line, col),
                '+' => {
                    let kind = if self.eat('+') {
                        TokenKind::PlusPlus
                    } else if self.eat('=') {
                        TokenKind::PlusEq
                    } else {
                        TokenKind::Plus
                    };
                    self.push(kind, line, col);
                }
                '-' => {
                    let kind = if self.eat('-') {
                        TokenKind::MinusMinus
                    } else if self.eat('=') {
                        TokenKind::MinusEq
                    } else {
                        TokenKind::Minus
                    };
                    self.push(kind, line, col);
                }
                '*' => {
                    let kind = if self.eat('=') { TokenKind::StarEq } else { TokenKind::Star };
                    self.push(kind, line, col);
                }
                '/' => {
                    let kind = if self.eat('=') { TokenKind::SlashEq } else { TokenKind::Slash };
                    self.push(kind, line, col);
                }
                '%' => {
                    let kind = if self.eat('=') {
                        TokenKind::PercentEq
                    } else {
                        TokenKind::Percent
                    };
                    self.push(kind, line, col);
                }
                '&' => {
                    let kind = if self.eat('&') {
                        TokenKind::AmpAmp
                    } else if self.eat('=') {
                        TokenKind::AmpEq
                    } else {
                        TokenKind::Amp
                    };
                    self.push(kind, line, col);
                }
                '|' => {
                    let kind = if self.eat('|') {
                        TokenKind::PipePipe
                    } else if self.eat('=') {
                        TokenKind::PipeEq
                    } else {
                        TokenKind::Pipe
                    };
                    self.push(kind, line, col);
                }
                '^' => {
                    let kind = if self.eat('=') { TokenKind::CaretEq } else { TokenKind::Caret };
                    self.push(kind, line, col);
                }
                '!' => {
                    let kind = if self.eat('=') { TokenKind::BangEq } else { TokenKind::Bang };
                    self.push(kind, line, col);
                }
                '=' => {
                    let kind = if self.eat('=') { TokenKind::EqEq } else { TokenKind::Eq };
                    self.push(kind, line, col);
                }
                '<' => {
                    let kind = if self.eat('<') {
                        TokenKind::LtLt
                    } else if self.eat('=') {
                        TokenKind::LtEq
                    } else {
                        TokenKind::Lt
                    };
                    self.push(kind, line, col);
                }
                '>' => {
                    let kind = if self.eat('>') {
                        TokenKind::GtGt
                    } else if self.eat('=') {
                        TokenKind::GtEq
                    } else {
                        TokenKind::Gt
                    };
                    self.push(kind, line, col);
                }
                '"' => self.string(line, col, diags),
                c if c.is_ascii_digit() => self.number(c, line, col, diags),
                c if is_ident_start(c) => self.identifier(c, line, col),
                c => {
                    diags.error(Stage::Lexer, line, col, format!("unexpected character '{c}'"));
                }
            }
        }
        let (line, col) = (self.line, self.col);
        self.push(TokenKind::Eof, line, col);
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.col += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, line: u32, col: u32) {
        self.tokens.push(Token { kind, line, col });
    }

    /// Collapses runs of terminators so the parser sees at most one.
    fn push_terminator(&mut self, line: u32, col: u32) {
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            Some(TokenKind::Terminator) | None
        ) {
            self.push(TokenKind::Terminator, line, col);
        }
    }

    fn string(&mut self, line: u32, col: u32, diags: &mut Diagnostics) {
        let mut text = String::new();
        loop {
            match self.chars.peek() {
                Some('"') => {
                    self.advance();
                    self.push(TokenKind::Str(text), line, col);
                    return;
                }
                Some('\n') | None => {
                    diags.error(Stage::Lexer, line, col, "unterminated string literal");
                    return;
                }
                Some(_) => {
                    // No escape sequences; the quote is the only delimiter.
                    if let Some(c) = self.advance() {
                        text.push(c);
                    }
                }
            }
        }
    }

    fn number(&mut self, first: char, line: u32, col: u32, diags: &mut Diagnostics) {
        let mut text = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // A float needs a digit on both sides of the dot.
        let mut chars = self.chars.clone();
        if chars.next() == Some('.') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(&c) = self.chars.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            match text.parse::<f64>() {
                Ok(f) => self.push(TokenKind::Float(f), line, col),
                Err(_) => diags.error(Stage::Lexer, line, col, format!("invalid number '{text}'")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => self.push(TokenKind::Long(n), line, col),
                Err(_) => diags.error(
                    Stage::Lexer,
                    line,
                    col,
                    format!("integer literal '{text}' does not fit in 64 bits"),
                ),
            }
        }
    }

    fn identifier(&mut self, first: char, line: u32, col: u32) {
        let mut text = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if is_ident_continue(c) {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Ident(text));
        self.push(kind, line, col);
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<TokenKind> {
        let mut diags = Diagnostics::new("test.me");
        let tokens = lex(source, &mut diags);
        assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        let kinds = lex_ok("değişken sayı = 3");
        assert_eq!(
            kinds,
            vec![
                TokenKind::KwVar,
                TokenKind::Ident("sayı".to_string()),
                TokenKind::Eq,
                TokenKind::Long(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_digits_never_start_identifiers() {
        let kinds = lex_ok("3a");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Long(3),
                TokenKind::Ident("a".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let kinds = lex_ok("1 2.5 10.125");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Long(1),
                TokenKind::Float(2.5),
                TokenKind::Float(10.125),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_overflow_is_diagnosed() {
        let mut diags = Diagnostics::new("test.me");
        lex("99999999999999999999", &mut diags);
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_compound_operators() {
        let kinds = lex_ok("a += 1 << 2");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::PlusEq,
                TokenKind::Long(1),
                TokenKind::LtLt,
                TokenKind::Long(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_literal() {
        let kinds = lex_ok("\"merhaba dünya\"");
        assert_eq!(
            kinds,
            vec![TokenKind::Str("merhaba dünya".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let mut diags = Diagnostics::new("test.me");
        lex("\"açık", &mut diags);
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_newline_terminates_outside_parens() {
        let kinds = lex_ok("a\nb");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Terminator,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof,
            ]
        );
        // Inside parentheses a newline is whitespace.
        let kinds = lex_ok("(a\nve b)");
        assert!(!kinds.contains(&TokenKind::Terminator));
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        let kinds = lex_ok("1 # yorum + daha fazlası\n2");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Long(1),
                TokenKind::Terminator,
                TokenKind::Long(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_terminator_runs_collapse() {
        let kinds = lex_ok("a;;\n\n;b");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Terminator,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }
}
