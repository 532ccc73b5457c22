//! Operator dispatch glue between the stack and [`Value`].
//!
//! Both operands are released on every path, including errors; a result
//! value carries its own heap reference, so dropping the operands after
//! dispatch is always correct.

use super::Vm;
use crate::bytecode::op::{BinOp, UnOp};
use crate::error::{ErrorKind, RunError, RunResult};
use crate::io::Console;
use crate::value::MeTrait;

impl<C: Console> Vm<'_, C> {
    pub(super) fn binary_op(&mut self, op: BinOp) -> RunResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = lhs.me_binary(op, &rhs, &mut self.heap);
        // Operand types are only needed for the unsupported-pair error, and
        // must be read before the operands are released.
        let types = match result {
            Ok(None) => Some((lhs.me_type(&self.heap), rhs.me_type(&self.heap))),
            _ => None,
        };
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        match result? {
            Some(value) => {
                self.stack.push(value);
                Ok(())
            }
            None => {
                let (lhs_type, rhs_type) = types.expect("captured for unsupported pairs");
                Err(RunError::runtime(
                    ErrorKind::NotImplemented,
                    format!("'{op}' is not supported between {lhs_type} and {rhs_type}"),
                ))
            }
        }
    }

    pub(super) fn unary_op(&mut self, op: UnOp) -> RunResult<()> {
        let operand = self.pop()?;
        let result = operand.me_unary(op, &self.heap);
        let found = match result {
            Ok(None) => Some(operand.me_type(&self.heap)),
            _ => None,
        };
        operand.drop_with_heap(&mut self.heap);
        match result? {
            Some(value) => {
                self.stack.push(value);
                Ok(())
            }
            None => {
                let found = found.expect("captured for unsupported types");
                Err(RunError::runtime(
                    ErrorKind::NotImplemented,
                    format!("unary '{op}' is not supported for {found}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectConsole;
    use crate::value::Value;

    fn fresh<'a>(console: &'a mut CollectConsole) -> Vm<'a, CollectConsole> {
        Vm::new(&[], &[], console)
    }

    #[test]
    fn test_binary_pushes_result() {
        let mut console = CollectConsole::new();
        let mut vm = fresh(&mut console);
        vm.stack.push(Value::Long(6));
        vm.stack.push(Value::Long(7));
        vm.binary_op(BinOp::Mul).unwrap();
        assert_eq!(vm.stack.pop(), Some(Value::Long(42)));
    }

    #[test]
    fn test_unsupported_pair_names_both_types() {
        let mut console = CollectConsole::new();
        let mut vm = fresh(&mut console);
        let s = Value::new_str(&mut vm.heap, "a".to_string());
        vm.stack.push(Value::Long(1));
        vm.stack.push(s);
        let err = vm.binary_op(BinOp::Add).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotImplemented));
        assert!(
            err.to_string().contains("between Long and Str"),
            "unexpected message: {err}"
        );
        // Both operands are released even on the error path.
        assert_eq!(vm.heap.live_count(), 0);
    }

    #[test]
    fn test_operand_order_is_lhs_then_rhs() {
        let mut console = CollectConsole::new();
        let mut vm = fresh(&mut console);
        vm.stack.push(Value::Long(10));
        vm.stack.push(Value::Long(4));
        vm.binary_op(BinOp::Sub).unwrap();
        assert_eq!(vm.stack.pop(), Some(Value::Long(6)));
    }

    #[test]
    fn test_error_from_dispatch_propagates() {
        let mut console = CollectConsole::new();
        let mut vm = fresh(&mut console);
        vm.stack.push(Value::Long(1));
        vm.stack.push(Value::Long(0));
        let err = vm.binary_op(BinOp::Div).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::DivisionByZero));
    }

    #[test]
    fn test_unary_not_and_unsupported() {
        let mut console = CollectConsole::new();
        let mut vm = fresh(&mut console);
        vm.stack.push(Value::Long(0));
        vm.unary_op(UnOp::Not).unwrap();
        assert_eq!(vm.stack.pop(), Some(Value::Bool(true)));
        vm.stack.push(Value::None);
        let err = vm.unary_op(UnOp::Neg).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotImplemented));
        assert!(err.to_string().contains("None"), "{err}");
    }

    #[test]
    fn test_missing_operand_underflows() {
        let mut console = CollectConsole::new();
        let mut vm = fresh(&mut console);
        vm.stack.push(Value::Long(1));
        assert_eq!(vm.binary_op(BinOp::Add), Err(RunError::StackUnderflow));
    }
}
