//! Front-end diagnostics sink.
//!
//! The lexer, parser and analyser report through a shared [`Diagnostics`]
//! accumulator instead of failing on the first problem. Compilation to
//! bytecode only proceeds when no error-level entry was recorded.

use std::fmt;

use strum::Display;

/// Pipeline stage a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Lexer,
    Parser,
    Analyser,
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

/// A single recorded problem, with its 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub stage: Stage,
    pub level: Level,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

/// Accumulator for diagnostics of one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    file: String,
    entries: Vec<Diagnostic>,
    errors: usize,
}

impl Diagnostics {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            entries: Vec::new(),
            errors: 0,
        }
    }

    /// The file name diagnostics are reported against.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn error(&mut self, stage: Stage, line: u32, col: u32, message: impl Into<String>) {
        self.record(stage, Level::Error, line, col, message.into());
    }

    pub fn warning(&mut self, stage: Stage, line: u32, col: u32, message: impl Into<String>) {
        self.record(stage, Level::Warning, line, col, message.into());
    }

    fn record(&mut self, stage: Stage, level: Level, line: u32, col: u32, message: String) {
        if level == Level::Error {
            self.errors += 1;
        }
        self.entries.push(Diagnostic {
            stage,
            level,
            line,
            col,
            message,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.entries {
            writeln!(
                f,
                "{}:{}:{}: {}: [{}] {}",
                self.file, d.line, d.col, d.level, d.stage, d.message
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_count_ignores_warnings() {
        let mut diags = Diagnostics::new("test.me");
        diags.warning(Stage::Lexer, 1, 1, "suspicious");
        assert!(!diags.has_errors());
        diags.error(Stage::Parser, 2, 5, "unexpected token");
        assert_eq!(diags.error_count(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_display_format() {
        let mut diags = Diagnostics::new("test.me");
        diags.error(Stage::Analyser, 3, 7, "undeclared name 'x'");
        assert_eq!(
            diags.to_string(),
            "test.me:3:7: error: [analyser] undeclared name 'x'\n"
        );
    }
}
