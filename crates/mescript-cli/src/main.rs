//! Command-line runner for Me scripts.

use std::process;

use mescript::{BuildError, ExitCode, Program, StdConsole};

fn main() -> process::ExitCode {
    run().into()
}

fn run() -> ExitCode {
    let mut path = None;
    let mut disassemble = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--disassemble" | "-d" => disassemble = true,
            _ if path.is_none() => path = Some(arg),
            _ => {
                eprintln!("usage: mescript [--disassemble] <script.me>");
                return ExitCode::Error;
            }
        }
    }
    let Some(path) = path else {
        eprintln!("usage: mescript [--disassemble] <script.me>");
        return ExitCode::Error;
    };

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("mescript: cannot read '{path}': {err}");
            return ExitCode::Error;
        }
    };
    let source = match String::from_utf8(bytes) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("mescript: '{path}' is not valid UTF-8");
            return ExitCode::Error;
        }
    };
    let source = source.strip_prefix('\u{feff}').unwrap_or(&source);

    let program = match Program::compile(&path, source) {
        Ok(program) => program,
        Err(BuildError::Diagnostics(diags)) => {
            eprint!("{diags}");
            return ExitCode::Error;
        }
        Err(err) => {
            eprintln!("mescript: {err}");
            return ExitCode::Error;
        }
    };

    if disassemble {
        print!("{}", program.disassemble());
        return ExitCode::Ok;
    }

    match program.run(&mut StdConsole) {
        // A module-level `tebliğ` value is not printed; scripts produce
        // output through print().
        Ok(_) => ExitCode::Ok,
        Err(err) => {
            eprintln!("mescript: {err}");
            err.exit_code()
        }
    }
}
