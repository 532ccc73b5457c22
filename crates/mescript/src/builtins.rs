//! Builtin functions.
//!
//! The registry order of [`Builtin::ALL`] seeds both the compiler's global
//! name table and the VM's global slot array, so a builtin's slot index is
//! identical on both sides. Builtins receive already-popped arguments and
//! own them for the duration of the call; `call` releases them afterwards.

use std::fs::OpenOptions;
use std::io::{Read, Write};

use strum::{Display, EnumString};

use crate::bytecode::code::Function;
use crate::error::{ErrorKind, RunError, RunResult};
use crate::heap::{Heap, HeapData, MeFile};
use crate::io::Console;
use crate::value::{MeTrait, Value};

/// The builtin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Print,
    Input,
    Open,
    Close,
    Read,
    Write,
    Flush,
    Int,
    Float,
    Str,
    Bool,
}

impl Builtin {
    /// Registration order; defines the global slot of each builtin.
    pub const ALL: [Builtin; 11] = [
        Builtin::Print,
        Builtin::Input,
        Builtin::Open,
        Builtin::Close,
        Builtin::Read,
        Builtin::Write,
        Builtin::Flush,
        Builtin::Int,
        Builtin::Float,
        Builtin::Str,
        Builtin::Bool,
    ];

    /// Invokes the builtin and releases the argument values.
    pub(crate) fn call<C: Console>(
        self,
        args: Vec<Value>,
        heap: &mut Heap,
        functions: &[Function],
        console: &mut C,
    ) -> RunResult<Value> {
        let result = self.invoke(&args, heap, functions, console);
        for arg in args {
            arg.drop_with_heap(heap);
        }
        result
    }

    fn invoke<C: Console>(
        self,
        args: &[Value],
        heap: &mut Heap,
        functions: &[Function],
        console: &mut C,
    ) -> RunResult<Value> {
        match self {
            Builtin::Print => {
                self.want(args, 1)?;
                let text = args[0].me_str(heap, functions);
                console.stdout_write(&text);
                console.stdout_push('\n');
                Ok(Value::None)
            }
            Builtin::Input => {
                if args.len() > 1 {
                    return Err(RunError::type_mismatch(format!(
                        "input() expects at most 1 argument, got {}",
                        args.len()
                    )));
                }
                if let Some(prompt) = args.first() {
                    let Some(text) = prompt.str_of(heap) else {
                        return Err(RunError::type_mismatch(format!(
                            "input() prompt must be Str, got {}",
                            prompt.me_type(heap)
                        )));
                    };
                    let text = text.to_string();
                    console.stdout_write(&text);
                }
                let line = console
                    .stdin_read_line()
                    .map_err(|e| RunError::generic(format!("input(): {e}")))?;
                Ok(Value::new_str(heap, line))
            }
            Builtin::Open => {
                self.want(args, 2)?;
                let path = self.str_arg(&args[0], heap, "a file path")?.to_string();
                let mode = self.str_arg(&args[1], heap, "a mode")?.to_string();
                let Some(options) = open_options(&mode) else {
                    return Err(RunError::generic(format!("invalid file mode '{mode}'")));
                };
                let handle = options
                    .open(&path)
                    .map_err(|e| RunError::generic(format!("cannot open '{path}': {e}")))?;
                let id = heap.allocate(HeapData::File(MeFile {
                    name: path,
                    handle: Some(handle),
                }));
                Ok(Value::Ref(id))
            }
            Builtin::Close => {
                self.want(args, 1)?;
                let file = self.file_arg(&args[0], heap)?;
                file.handle = None;
                Ok(Value::None)
            }
            Builtin::Read => {
                self.want(args, 2)?;
                let Some(count) = args[1].as_long() else {
                    return Err(RunError::type_mismatch(format!(
                        "read() size must be Long, got {}",
                        args[1].me_type(heap)
                    )));
                };
                let buf = {
                    let file = self.open_file_arg(&args[0], heap)?;
                    let mut buf = Vec::new();
                    // A negative size reads to end of file.
                    let result = if count < 0 {
                        file.read_to_end(&mut buf)
                    } else {
                        file.take(count as u64).read_to_end(&mut buf)
                    };
                    result.map_err(|e| RunError::generic(format!("read(): {e}")))?;
                    buf
                };
                let text = String::from_utf8_lossy(&buf).into_owned();
                Ok(Value::new_str(heap, text))
            }
            Builtin::Write => {
                self.want(args, 2)?;
                let data = self.str_arg(&args[1], heap, "a Str to write")?.to_string();
                let file = self.open_file_arg(&args[0], heap)?;
                file.write_all(data.as_bytes())
                    .map_err(|e| RunError::generic(format!("write(): {e}")))?;
                Ok(Value::Long(data.len() as i64))
            }
            Builtin::Flush => {
                self.want(args, 1)?;
                let file = self.open_file_arg(&args[0], heap)?;
                file.flush()
                    .map_err(|e| RunError::generic(format!("flush(): {e}")))?;
                Ok(Value::None)
            }
            Builtin::Int => {
                self.want(args, 1)?;
                let v = match &args[0] {
                    Value::Long(n) => Value::Long(*n),
                    Value::Bool(b) => Value::Long(i64::from(*b)),
                    Value::Float(f) => Value::Long(*f as i64),
                    other => match other.str_of(heap) {
                        Some(s) => match s.trim().parse::<i64>() {
                            Ok(n) => Value::Long(n),
                            Err(_) => {
                                return Err(RunError::generic(format!(
                                    "int(): invalid literal '{s}'"
                                )))
                            }
                        },
                        None => {
                            return Err(RunError::type_mismatch(format!(
                                "int() cannot convert {}",
                                other.me_type(heap)
                            )))
                        }
                    },
                };
                Ok(v)
            }
            Builtin::Float => {
                self.want(args, 1)?;
                let v = match &args[0] {
                    Value::Float(f) => Value::Float(*f),
                    Value::Long(n) => Value::Float(*n as f64),
                    Value::Bool(b) => Value::Float(f64::from(i32::from(*b))),
                    other => match other.str_of(heap) {
                        Some(s) => match s.trim().parse::<f64>() {
                            Ok(f) => Value::Float(f),
                            Err(_) => {
                                return Err(RunError::generic(format!(
                                    "float(): invalid literal '{s}'"
                                )))
                            }
                        },
                        None => {
                            return Err(RunError::type_mismatch(format!(
                                "float() cannot convert {}",
                                other.me_type(heap)
                            )))
                        }
                    },
                };
                Ok(v)
            }
            Builtin::Str => {
                self.want(args, 1)?;
                let text = args[0].me_str(heap, functions);
                Ok(Value::new_str(heap, text))
            }
            Builtin::Bool => {
                self.want(args, 1)?;
                Ok(Value::Bool(args[0].me_bool(heap)))
            }
        }
    }

    fn want(self, args: &[Value], n: usize) -> RunResult<()> {
        if args.len() == n {
            Ok(())
        } else {
            let plural = if n == 1 { "" } else { "s" };
            Err(RunError::type_mismatch(format!(
                "{self}() expects {n} argument{plural}, got {}",
                args.len()
            )))
        }
    }

    fn str_arg<'h>(self, arg: &Value, heap: &'h Heap, what: &str) -> RunResult<&'h str> {
        arg.str_of(heap).ok_or_else(|| {
            RunError::type_mismatch(format!(
                "{self}() expects {what}, got {}",
                arg.me_type(heap)
            ))
        })
    }

    fn file_arg<'h>(self, arg: &Value, heap: &'h mut Heap) -> RunResult<&'h mut MeFile> {
        // Capture the type before the mutable borrow; the error path must
        // not touch the heap again.
        let found = arg.me_type(heap);
        if let Value::Ref(id) = arg {
            if let HeapData::File(file) = heap.get_mut(*id) {
                return Ok(file);
            }
        }
        Err(RunError::type_mismatch(format!(
            "{self}() expects File, got {found}"
        )))
    }

    /// Like `file_arg`, but also rejects closed files.
    fn open_file_arg<'h>(self, arg: &Value, heap: &'h mut Heap) -> RunResult<&'h mut std::fs::File> {
        let file = self.file_arg(arg, heap)?;
        file.handle
            .as_mut()
            .ok_or_else(|| RunError::runtime(ErrorKind::Generic, "I/O operation on closed file"))
    }
}

fn open_options(mode: &str) -> Option<OpenOptions> {
    let mut opts = OpenOptions::new();
    match mode {
        "r" => opts.read(true),
        "r+" => opts.read(true).write(true),
        "w" => opts.write(true).create(true).truncate(true),
        "w+" => opts.read(true).write(true).create(true).truncate(true),
        "a" => opts.append(true).create(true),
        "a+" => opts.read(true).append(true).create(true),
        _ => return None,
    };
    Some(opts)
}
