//! Default loader: a small stack interpreter over verified bodies.
//!
//! Labels are resolved to pcs once at load time. Integer arithmetic wraps;
//! float → integer conversions saturate.

use std::sync::Arc;

use tracing::{debug, trace};

use ilforge_core::{Op, ValueType};
use ilforge_emit::{EmitResult, Error, MethodDescriptor};

use crate::{
    loader::{EntryPoint, Loader, Trap},
    value::Value,
};

/// Interpreter backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    /// New interpreter loader.
    pub const fn new() -> Self { Self }
}

impl Loader for Interpreter {
    fn load(&self, method: &Arc<MethodDescriptor>) -> EmitResult<Arc<dyn EntryPoint>> {
        let name = method.qualified_name();
        if !method.attributes().is_static() {
            return Err(Error::LoadFailed { method: name, reason: "only static methods can be executed".into() });
        }

        let body = method.body();
        let mut targets = vec![usize::MAX; body.len()];
        for (pc, op) in body.ops().iter().enumerate() {
            if let Some(label) = op.branch_target() {
                targets[pc] = body
                    .label_target(label)
                    .map(|t| t as usize)
                    .filter(|&t| t < body.len())
                    .ok_or_else(|| Error::LoadFailed { method: name.clone(), reason: format!("unresolved label {label}") })?;
            }
        }

        debug!(method = %name, ops = body.len(), "loaded into interpreter");
        Ok(Arc::new(Compiled { method: Arc::clone(method), name, targets }))
    }
}

/// A method with its branch targets resolved.
#[derive(Debug)]
struct Compiled {
    method: Arc<MethodDescriptor>,
    name: String,
    targets: Vec<usize>,
}

impl Compiled {
    fn trap(&self, pc: usize, reason: impl Into<String>) -> Trap {
        Trap { method: self.name.clone(), pc, reason: reason.into() }
    }

    fn pop(&self, stack: &mut Vec<Value>, pc: usize) -> Result<Value, Trap> {
        stack.pop().ok_or_else(|| self.trap(pc, "stack underflow"))
    }

    fn pop2(&self, stack: &mut Vec<Value>, pc: usize) -> Result<(Value, Value), Trap> {
        let b = self.pop(stack, pc)?;
        let a = self.pop(stack, pc)?;
        Ok((a, b))
    }

    fn truthy(&self, v: &Value, pc: usize) -> Result<bool, Trap> {
        match v {
            Value::Bool(b) => Ok(*b),
            Value::I32(i) => Ok(*i != 0),
            Value::I64(i) => Ok(*i != 0),
            other => Err(self.trap(pc, format!("branch on {other:?}"))),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::float_cmp)]
fn arith(op: &Op, a: Value, b: Value) -> Option<Value> {
    Some(match (op, a, b) {
        (Op::Add, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_add(b)),
        (Op::Sub, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_sub(b)),
        (Op::Mul, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_mul(b)),
        (Op::Add, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_add(b)),
        (Op::Sub, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_sub(b)),
        (Op::Mul, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_mul(b)),
        (Op::Add, Value::F64(a), Value::F64(b)) => Value::F64(a + b),
        (Op::Sub, Value::F64(a), Value::F64(b)) => Value::F64(a - b),
        (Op::Mul, Value::F64(a), Value::F64(b)) => Value::F64(a * b),
        (Op::Ceq, a, b) if a.value_type() == b.value_type() => Value::Bool(a == b),
        (Op::Cgt | Op::Clt, Value::I32(a), Value::I32(b)) => Value::Bool(if *op == Op::Cgt { a > b } else { a < b }),
        (Op::Cgt | Op::Clt, Value::I64(a), Value::I64(b)) => Value::Bool(if *op == Op::Cgt { a > b } else { a < b }),
        (Op::Cgt | Op::Clt, Value::F64(a), Value::F64(b)) => Value::Bool(if *op == Op::Cgt { a > b } else { a < b }),
        (Op::Concat, Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Value::Str(a)
        }
        _ => return None,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn convert(op: &Op, v: Value) -> Option<Value> {
    Some(match (op, v) {
        (Op::ConvI4, Value::I32(x)) => Value::I32(x),
        (Op::ConvI4, Value::I64(x)) => Value::I32(x as i32),
        (Op::ConvI4, Value::F64(x)) => Value::I32(x as i32),
        (Op::ConvI8, Value::I32(x)) => Value::I64(i64::from(x)),
        (Op::ConvI8, Value::I64(x)) => Value::I64(x),
        (Op::ConvI8, Value::F64(x)) => Value::I64(x as i64),
        (Op::ConvR8, Value::I32(x)) => Value::F64(f64::from(x)),
        (Op::ConvR8, Value::I64(x)) => Value::F64(x as f64),
        (Op::ConvR8, Value::F64(x)) => Value::F64(x),
        (Op::Neg, Value::I32(x)) => Value::I32(x.wrapping_neg()),
        (Op::Neg, Value::I64(x)) => Value::I64(x.wrapping_neg()),
        (Op::Neg, Value::F64(x)) => Value::F64(-x),
        _ => return None,
    })
}

impl EntryPoint for Compiled {
    fn call(&self, args: Vec<Value>) -> Result<Value, Trap> {
        let params = self.method.params();
        if args.len() != params.len() || args.iter().zip(params).any(|(a, p)| a.value_type() != *p) {
            let got: Vec<ValueType> = args.iter().map(Value::value_type).collect();
            return Err(self.trap(0, format!("arguments {got:?} do not match parameters {params:?}")));
        }

        let ops = self.method.body().ops();
        let mut stack: Vec<Value> = Vec::with_capacity(usize::from(self.method.max_stack()));
        let mut pc = 0usize;

        loop {
            let Some(op) = ops.get(pc) else { return Err(self.trap(pc, "fell off the end")) };
            trace!(method = %self.name, pc, %op, depth = stack.len(), "step");
            let mut next = pc + 1;
            match op {
                Op::Nop => {}
                Op::Ldarg(n) => {
                    let v = args.get(usize::from(*n)).cloned().ok_or_else(|| self.trap(pc, "argument out of range"))?;
                    stack.push(v);
                }
                Op::LdcI4(v) => stack.push(Value::I32(*v)),
                Op::LdcI8(v) => stack.push(Value::I64(*v)),
                Op::LdcR8(v) => stack.push(Value::F64(*v)),
                Op::LdBool(v) => stack.push(Value::Bool(*v)),
                Op::LdStr(s) => stack.push(Value::Str(s.clone())),
                Op::Dup => {
                    let v = self.pop(&mut stack, pc)?;
                    stack.push(v.clone());
                    stack.push(v);
                }
                Op::Pop => {
                    self.pop(&mut stack, pc)?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Ceq | Op::Cgt | Op::Clt | Op::Concat => {
                    let (a, b) = self.pop2(&mut stack, pc)?;
                    let v = arith(op, a, b).ok_or_else(|| self.trap(pc, format!("`{}` on mismatched operands", op.mnemonic())))?;
                    stack.push(v);
                }
                Op::Neg | Op::ConvI4 | Op::ConvI8 | Op::ConvR8 => {
                    let a = self.pop(&mut stack, pc)?;
                    let v = convert(op, a).ok_or_else(|| self.trap(pc, format!("`{}` on a non-numeric operand", op.mnemonic())))?;
                    stack.push(v);
                }
                Op::Br(_) => next = self.targets[pc],
                Op::BrTrue(_) | Op::BrFalse(_) => {
                    let cond = self.pop(&mut stack, pc)?;
                    if self.truthy(&cond, pc)? == matches!(op, Op::BrTrue(_)) {
                        next = self.targets[pc];
                    }
                }
                Op::Ret => {
                    return match self.method.ret() {
                        ValueType::Void => Ok(Value::Void),
                        _ => self.pop(&mut stack, pc),
                    };
                }
            }
            pc = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilforge_core::asm::assemble;
    use ilforge_emit::{MethodAttributes, Session, SessionOptions, TypeAttributes};
    use pretty_assertions::assert_eq;

    fn load(src: &str, params: &[ValueType], ret: ValueType, attrs: MethodAttributes) -> EmitResult<Arc<dyn EntryPoint>> {
        let s = Session::new("Interp", SessionOptions::default());
        let ty = s.define_type(s.default_module(), "T", TypeAttributes::PUBLIC)?;
        let m = s.define_method(ty, "M", attrs, ret, params)?;
        s.with_il(m, |il| il.assemble(src)).map(|r| r.unwrap())?;
        s.close(m)?;
        let desc = s.finalize_type(ty)?;
        Interpreter::new().load(&desc.methods()[0])
    }

    fn run(src: &str, params: &[ValueType], ret: ValueType, args: Vec<Value>) -> Value {
        let entry = load(src, params, ret, MethodAttributes::PUBLIC | MethodAttributes::STATIC).unwrap();
        entry.call(args).unwrap()
    }

    #[test]
    fn hello() {
        let v = run("ldstr \"Hello IL coder!\"\nret", &[ValueType::I32], ValueType::Str, vec![Value::I32(123)]);
        assert_eq!(v, Value::Str("Hello IL coder!".into()));
    }

    #[test]
    fn arithmetic_wraps() {
        let v = run("ldarg 0\nldc.i4 1\nadd\nret", &[ValueType::I32], ValueType::I32, vec![Value::I32(i32::MAX)]);
        assert_eq!(v, Value::I32(i32::MIN));
    }

    #[test]
    fn loop_counts_down() {
        let src = "
            ldarg 0
        top:
            dup
            ldc.i8 0
            cgt
            brfalse done
            ldc.i8 1
            sub
            br top
        done:
            ret
        ";
        assert_eq!(run(src, &[ValueType::I64], ValueType::I64, vec![Value::I64(5)]), Value::I64(0));
        assert_eq!(run(src, &[ValueType::I64], ValueType::I64, vec![Value::I64(-3)]), Value::I64(-3));
    }

    #[test]
    fn strings_and_conversions() {
        let v = run("ldarg 0\nldarg 1\nconcat\nret", &[ValueType::Str, ValueType::Str], ValueType::Str, vec![
            "Hello ".into(),
            "IL".into(),
        ]);
        assert_eq!(v, Value::Str("Hello IL".into()));
        let v = run("ldarg 0\nconv.i4\nret", &[ValueType::F64], ValueType::I32, vec![Value::F64(1e20)]);
        assert_eq!(v, Value::I32(i32::MAX));
    }

    #[test]
    fn void_methods_return_void() {
        assert_eq!(run("ret", &[], ValueType::Void, vec![]), Value::Void);
    }

    #[test]
    fn instance_methods_are_not_loadable() {
        let err = load("ret", &[], ValueType::Void, MethodAttributes::PUBLIC).err().unwrap();
        assert!(matches!(err, Error::LoadFailed { .. }));
    }

    #[test]
    fn bad_arguments_trap() {
        let entry = load("ldarg 0\nret", &[ValueType::I32], ValueType::I32, MethodAttributes::STATIC).unwrap();
        let trap = entry.call(vec![Value::Str("x".into())]).unwrap_err();
        assert_eq!(trap.pc, 0);
        assert!(trap.reason.contains("do not match"));
    }
}
