//! Runtime values and operator dispatch.
//!
//! `Value` is a tagged enum: small values are stored inline, strings and
//! files live on the [`Heap`] behind `Value::Ref`. There is deliberately no
//! `Clone` impl; copying a value goes through `clone_with_heap` and
//! discarding one goes through `drop_with_heap`, so reference counts stay
//! balanced.
//!
//! Binary dispatch returns `Ok(None)` when an operator is not supported for
//! an operand pair; the VM turns that into a runtime error naming both
//! types. Cross-type cases that genuinely exist (numeric promotion, string
//! replication with the number on either side) are matched explicitly, so
//! non-commutative operators never see swapped operands.

use std::cmp::Ordering;

use strum::Display;

use crate::bytecode::code::Function;
use crate::bytecode::op::{BinOp, UnOp};
use crate::error::{ErrorKind, RunError, RunResult};
use crate::heap::{Heap, HeapData, HeapId};

use crate::builtins::Builtin;

/// Index into the compiled function table.
pub type FunctionId = usize;

/// Runtime type of a value, used in error messages and casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Type {
    Undefined,
    None,
    Bool,
    Long,
    Float,
    Str,
    Function,
    BuiltinFunction,
    File,
}

/// A runtime value.
#[derive(Debug, Default, PartialEq)]
pub enum Value {
    /// Slot that was never assigned. Never produced by evaluation.
    #[default]
    Undefined,
    None,
    Bool(bool),
    Long(i64),
    Float(f64),
    Builtin(Builtin),
    Function(FunctionId),
    Ref(HeapId),
}

/// Type, truthiness and stringification, shared by everything that holds
/// values.
pub trait MeTrait {
    fn me_type(&self, heap: &Heap) -> Type;
    fn me_bool(&self, heap: &Heap) -> bool;
    fn me_str(&self, heap: &Heap, functions: &[Function]) -> String;
}

impl MeTrait for Value {
    fn me_type(&self, heap: &Heap) -> Type {
        match self {
            Value::Undefined => Type::Undefined,
            Value::None => Type::None,
            Value::Bool(_) => Type::Bool,
            Value::Long(_) => Type::Long,
            Value::Float(_) => Type::Float,
            Value::Builtin(_) => Type::BuiltinFunction,
            Value::Function(_) => Type::Function,
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => Type::Str,
                HeapData::File(_) => Type::File,
            },
        }
    }

    fn me_bool(&self, heap: &Heap) -> bool {
        match self {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Builtin(_) | Value::Function(_) => true,
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::File(_) => true,
            },
        }
    }

    fn me_str(&self, heap: &Heap, functions: &[Function]) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::None => "none".to_string(),
            // Bools stringify as their numeric value, floats with two
            // decimals; both follow the language's original behavior.
            Value::Bool(b) => i64::from(*b).to_string(),
            Value::Long(n) => n.to_string(),
            Value::Float(f) => format!("{f:.2}"),
            Value::Builtin(b) => format!("<builtin '{b}'>"),
            Value::Function(id) => match functions.get(*id) {
                Some(f) => format!("<marifet '{}'>", f.name),
                None => "<marifet>".to_string(),
            },
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => s.clone(),
                HeapData::File(f) => format!("<file '{}'>", f.name),
            },
        }
    }
}

/// Outcome of a comparison attempt.
enum CmpResult {
    Ordered(Ordering),
    /// Comparable kinds but no ordering (NaN).
    Unordered,
    NotSupported,
}

impl Value {
    /// Allocates a string on the heap and returns the owning reference.
    pub fn new_str(heap: &mut Heap, s: String) -> Value {
        Value::Ref(heap.allocate(HeapData::Str(s)))
    }

    /// Copies this value, bumping the refcount for heap references.
    pub fn clone_with_heap(&self, heap: &mut Heap) -> Value {
        match self {
            Value::Undefined => Value::Undefined,
            Value::None => Value::None,
            Value::Bool(b) => Value::Bool(*b),
            Value::Long(n) => Value::Long(*n),
            Value::Float(f) => Value::Float(*f),
            Value::Builtin(b) => Value::Builtin(*b),
            Value::Function(id) => Value::Function(*id),
            Value::Ref(id) => {
                heap.inc_ref(*id);
                Value::Ref(*id)
            }
        }
    }

    /// Releases this value's heap reference, if it holds one.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Value::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(i32::from(*b))),
            Value::Long(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view; Bool delegates to Long as 0/1.
    pub(crate) fn as_long(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub(crate) fn str_of<'h>(&self, heap: &'h Heap) -> Option<&'h str> {
        if let Value::Ref(id) = self {
            if let HeapData::Str(s) = heap.get(*id) {
                return Some(s.as_str());
            }
        }
        None
    }

    /// Applies a binary operator. `Ok(None)` means the pair is unsupported.
    pub fn me_binary(&self, op: BinOp, other: &Value, heap: &mut Heap) -> RunResult<Option<Value>> {
        match op {
            BinOp::Add => self.me_add(other, heap),
            BinOp::Sub => Ok(self.numeric_op(other, |a, b| a.wrapping_sub(b), |a, b| a - b)),
            BinOp::Mul => self.me_mul(other, heap),
            BinOp::Div | BinOp::Mod => self.me_divmod(op, other),
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                self.me_bitwise(op, other)
            }
            BinOp::Eq => Ok(Some(Value::Bool(self.me_eq(other, heap)))),
            BinOp::Ne => Ok(Some(Value::Bool(!self.me_eq(other, heap)))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let keep = match self.me_cmp(other, heap) {
                    CmpResult::Ordered(ord) => match op {
                        BinOp::Lt => ord == Ordering::Less,
                        BinOp::Le => ord != Ordering::Greater,
                        BinOp::Gt => ord == Ordering::Greater,
                        BinOp::Ge => ord != Ordering::Less,
                        _ => false,
                    },
                    CmpResult::Unordered => false,
                    CmpResult::NotSupported => return Ok(None),
                };
                Ok(Some(Value::Bool(keep)))
            }
        }
    }

    fn me_add(&self, other: &Value, heap: &mut Heap) -> RunResult<Option<Value>> {
        if let Some(v) = self.numeric_op(other, |a, b| a.wrapping_add(b), |a, b| a + b) {
            return Ok(Some(v));
        }
        if let (Some(a), Some(b)) = (self.str_of(heap), other.str_of(heap)) {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            return Ok(Some(Value::new_str(heap, s)));
        }
        Ok(None)
    }

    fn me_mul(&self, other: &Value, heap: &mut Heap) -> RunResult<Option<Value>> {
        if let Some(v) = self.numeric_op(other, |a, b| a.wrapping_mul(b), |a, b| a * b) {
            return Ok(Some(v));
        }
        // String replication works with the count on either side.
        let pair = match (self.str_of(heap), other.str_of(heap)) {
            (Some(s), None) => other.as_long().map(|n| (s, n)),
            (None, Some(s)) => self.as_long().map(|n| (s, n)),
            _ => None,
        };
        let Some((s, count)) = pair else {
            return Ok(None);
        };
        if count <= 0 {
            return Ok(Some(Value::new_str(heap, String::new())));
        }
        let count = count as usize;
        if s.len().checked_mul(count).is_none() {
            return Err(RunError::runtime(
                ErrorKind::OutOfMemory,
                "string replication result too large",
            ));
        }
        let repeated = s.repeat(count);
        Ok(Some(Value::new_str(heap, repeated)))
    }

    fn me_divmod(&self, op: BinOp, other: &Value) -> RunResult<Option<Value>> {
        match (self.as_long(), other.as_long()) {
            (Some(a), Some(b)) => {
                if b == 0 {
                    return Err(division_by_zero(op));
                }
                // Wrapping keeps i64::MIN / -1 defined.
                let v = match op {
                    BinOp::Div => a.wrapping_div(b),
                    _ => a.wrapping_rem(b),
                };
                Ok(Some(Value::Long(v)))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => {
                    if b == 0.0 {
                        return Err(division_by_zero(op));
                    }
                    let v = match op {
                        BinOp::Div => a / b,
                        _ => a % b,
                    };
                    Ok(Some(Value::Float(v)))
                }
                _ => Ok(None),
            },
        }
    }

    fn me_bitwise(&self, op: BinOp, other: &Value) -> RunResult<Option<Value>> {
        let (Some(a), Some(b)) = (self.as_long(), other.as_long()) else {
            return Ok(None);
        };
        let v = match op {
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::Shl | BinOp::Shr => {
                if b < 0 {
                    return Err(RunError::generic("negative shift count"));
                }
                if b >= 64 {
                    // Saturate: shifts drain to 0, arithmetic right shifts
                    // keep the sign.
                    match op {
                        BinOp::Shr if a < 0 => -1,
                        _ => 0,
                    }
                } else {
                    match op {
                        BinOp::Shl => a.wrapping_shl(b as u32),
                        _ => a >> b,
                    }
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::Long(v)))
    }

    /// Equality across values. Mismatched kinds compare unequal.
    pub fn me_eq(&self, other: &Value, heap: &Heap) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => match (heap.get(*a), heap.get(*b)) {
                (HeapData::Str(x), HeapData::Str(y)) => x == y,
                // Files are equal only to themselves.
                _ => a == b,
            },
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn me_cmp(&self, other: &Value, heap: &Heap) -> CmpResult {
        if let (Some(a), Some(b)) = (self.str_of(heap), other.str_of(heap)) {
            return CmpResult::Ordered(a.cmp(b));
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ord) => CmpResult::Ordered(ord),
                None => CmpResult::Unordered,
            },
            _ => CmpResult::NotSupported,
        }
    }

    /// Applies a unary operator. `Ok(None)` means the type is unsupported.
    pub fn me_unary(&self, op: UnOp, heap: &Heap) -> RunResult<Option<Value>> {
        let v = match op {
            UnOp::Neg => match self {
                Value::Float(f) => Some(Value::Float(-f)),
                _ => self.as_long().map(|n| Value::Long(n.wrapping_neg())),
            },
            UnOp::Pos => match self {
                Value::Float(f) => Some(Value::Float(*f)),
                _ => self.as_long().map(Value::Long),
            },
            UnOp::Not => Some(Value::Bool(!self.me_bool(heap))),
            UnOp::Invert => self.as_long().map(|n| Value::Long(!n)),
        };
        Ok(v)
    }

    /// Numeric binary op with Long↔Float promotion and Bool-as-Long
    /// delegation. `None` when either side is not numeric.
    fn numeric_op(
        &self,
        other: &Value,
        long_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> Option<Value> {
        match (self.as_long(), other.as_long()) {
            (Some(a), Some(b)) => Some(Value::Long(long_op(a, b))),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Some(Value::Float(float_op(a, b))),
                _ => None,
            },
        }
    }
}

fn division_by_zero(op: BinOp) -> RunError {
    let what = if op == BinOp::Div { "division" } else { "modulo" };
    RunError::runtime(ErrorKind::DivisionByZero, format!("{what} by zero"))
}
