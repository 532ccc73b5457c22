//! Bytecode interpreter for the Me scripting language.
//!
//! The pipeline is the classic one: [`lexer`] turns source text into tokens,
//! [`parser`] builds the AST, [`analyser`] runs semantic checks, and
//! [`bytecode::compiler`] lowers the result to stack-machine code executed
//! by [`bytecode::vm`]. [`Program`] bundles the whole pipeline for
//! embedders; script I/O is abstracted behind the [`Console`] trait.
//!
//! ```
//! use mescript::{CollectConsole, Program};
//!
//! let program = Program::compile("selam.me", "print(\"selam\" + \" dünya\")").unwrap();
//! let mut console = CollectConsole::new();
//! program.run(&mut console).unwrap();
//! assert_eq!(console.output(), "selam dünya\n");
//! ```

pub mod analyser;
pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod diagnostics;
pub mod error;
pub mod heap;
pub mod io;
pub mod lexer;
pub mod parser;
mod run;
pub mod token;
pub mod value;

pub use error::{ErrorKind, ExitCode, RunError, RunResult};
pub use io::{CollectConsole, Console, StdConsole};
pub use run::{BuildError, Program};
