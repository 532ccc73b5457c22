use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

/// Trait for wiring the interpreter to the outside world.
///
/// `print()` and `input()` go through this trait, so embedders can capture or
/// redirect script I/O. The default implementation `StdConsole` uses the
/// process stdio streams.
pub trait Console {
    /// Writes a piece of output, without adding separators or newlines.
    fn stdout_write(&mut self, output: &str);

    /// Writes a single character, generally a newline terminator.
    fn stdout_push(&mut self, end: char);

    /// Reads one line of input, without the trailing newline.
    fn stdin_read_line(&mut self) -> io::Result<String>;
}

/// Default `Console` wired to the process stdin/stdout.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn stdout_write(&mut self, output: &str) {
        print!("{output}");
    }

    fn stdout_push(&mut self, end: char) {
        print!("{end}");
    }

    fn stdin_read_line(&mut self) -> io::Result<String> {
        // input() shows its prompt through stdout_write; flush so the prompt
        // is visible before we block on the read.
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }
}

/// A `Console` that collects output into a string and serves queued input
/// lines. Useful for testing or running scripts programmatically.
#[derive(Debug, Default)]
pub struct CollectConsole {
    output: String,
    input: VecDeque<String>,
}

impl CollectConsole {
    /// Creates a new console with no queued input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a console whose `input()` calls are served from `lines`.
    #[must_use]
    pub fn with_input(lines: &[&str]) -> Self {
        Self {
            output: String::new(),
            input: lines.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.output.as_str()
    }

    /// Consumes the console and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.output
    }
}

impl Console for CollectConsole {
    fn stdout_write(&mut self, output: &str) {
        self.output.push_str(output);
    }

    fn stdout_push(&mut self, end: char) {
        self.output.push(end);
    }

    fn stdin_read_line(&mut self) -> io::Result<String> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no queued input"))
    }
}
