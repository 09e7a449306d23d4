//! Stack verifier run when a method is finalized.
//!
//! Abstract interpretation over stack *types*: every reachable pc gets
//! exactly one stack shape, every path ends in `ret`, and `ret` leaves
//! exactly the declared return value. A body that passes cannot trap in
//! the interpreter.

use thiserror::Error;
use tracing::{debug, trace};

use crate::bytecode::{InstructionStream, Label, Op, ValueType};

/// Default bound on evaluation stack depth.
pub const DEFAULT_MAX_STACK: u16 = 64;

/// Why a body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyErrorKind {
    /// No instructions at all.
    #[error("empty method body")]
    EmptyBody,
    /// Some path runs past the last instruction.
    #[error("control falls off the end of the method")]
    FallsOffEnd,
    /// Not enough operands.
    #[error("stack underflow: `{op}` needs {needed} operand(s), found {found}")]
    StackUnderflow {
        /// Mnemonic.
        op: &'static str,
        /// Operands required.
        needed: usize,
        /// Operands available.
        found: usize,
    },
    /// Depth exceeds the configured bound.
    #[error("stack depth {depth} exceeds max_stack {max}")]
    StackOverflow {
        /// Depth reached.
        depth: usize,
        /// Configured bound.
        max: u16,
    },
    /// Operand types do not fit the opcode.
    #[error("`{op}` cannot operate on [{found}]")]
    TypeMismatch {
        /// Mnemonic.
        op: &'static str,
        /// Operand types found.
        found: String,
    },
    /// `ldarg` beyond the declared parameters.
    #[error("ldarg {index} out of range (arity {arity})")]
    BadArgument {
        /// Requested index.
        index: u16,
        /// Declared parameter count.
        arity: usize,
    },
    /// A parameter was declared `void`.
    #[error("parameter {index} is declared void")]
    VoidParameter {
        /// Parameter position.
        index: usize,
    },
    /// Branch to a label never marked.
    #[error("label {label} is never marked")]
    UnmarkedLabel {
        /// The label.
        label: Label,
    },
    /// Label bound twice.
    #[error("label {label} is marked more than once")]
    RemarkedLabel {
        /// The label.
        label: Label,
    },
    /// Label marked on a stream that never defined it.
    #[error("label {label} is marked but was never defined")]
    UndefinedLabel {
        /// The label.
        label: Label,
    },
    /// Branch to a label marked after the last instruction.
    #[error("label {label} points past the end of the body")]
    LabelOutOfRange {
        /// The label.
        label: Label,
    },
    /// Two paths reach the same pc with different stacks.
    #[error("stack shape mismatch at join: [{expected}] vs [{found}]")]
    JoinMismatch {
        /// Shape recorded first.
        expected: String,
        /// Shape arriving later.
        found: String,
    },
    /// `ret` with the wrong stack.
    #[error("ret with [{found}] but the method returns {expected}")]
    BadReturn {
        /// Declared return type.
        expected: ValueType,
        /// Stack at `ret`.
        found: String,
    },
}

/// Verification failure, located at a pc when one applies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}{}", .pc.map(|p| format!(" (pc {p})")).unwrap_or_default())]
pub struct VerifyError {
    /// Offending instruction, if any.
    pub pc: Option<u32>,
    /// What went wrong.
    pub kind: VerifyErrorKind,
}

impl VerifyError {
    const fn at(pc: u32, kind: VerifyErrorKind) -> Self { Self { pc: Some(pc), kind } }
    const fn body(kind: VerifyErrorKind) -> Self { Self { pc: None, kind } }
}

/// Facts gathered on a body that verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedBody {
    /// Deepest stack reached on any path.
    pub max_depth: u16,
    /// Number of reachable instructions.
    pub reachable: usize,
}

enum Flow {
    Next,
    Jump(Label),
    Cond(Label),
    Return,
}

/// Verify `stream` against the signature `(params) -> ret`.
pub fn verify(
    stream: &InstructionStream,
    params: &[ValueType],
    ret: ValueType,
    max_stack: u16,
) -> Result<VerifiedBody, VerifyError> {
    let outcome = check_body(stream, params, ret, max_stack);
    match &outcome {
        Ok(body) => trace!(ops = stream.len(), max_depth = body.max_depth, "body verified"),
        Err(e) => debug!(ops = stream.len(), error = %e, "body rejected"),
    }
    outcome
}

#[allow(clippy::cast_possible_truncation)]
fn check_body(
    stream: &InstructionStream,
    params: &[ValueType],
    ret: ValueType,
    max_stack: u16,
) -> Result<VerifiedBody, VerifyError> {
    if let Some(index) = params.iter().position(|p| *p == ValueType::Void) {
        return Err(VerifyError::body(VerifyErrorKind::VoidParameter { index }));
    }
    if let Some(label) = stream.remarked_labels().first() {
        return Err(VerifyError::body(VerifyErrorKind::RemarkedLabel { label: *label }));
    }
    if let Some(label) = stream.undefined_labels().first() {
        return Err(VerifyError::body(VerifyErrorKind::UndefinedLabel { label: *label }));
    }

    let ops = stream.ops();
    if ops.is_empty() {
        return Err(VerifyError::body(VerifyErrorKind::EmptyBody));
    }

    // resolve every branch up front: pc → target pc
    let mut targets: Vec<Option<u32>> = vec![None; ops.len()];
    for (pc, op) in ops.iter().enumerate() {
        if let Some(label) = op.branch_target() {
            let target = stream
                .label_target(label)
                .ok_or(VerifyError::at(pc as u32, VerifyErrorKind::UnmarkedLabel { label }))?;
            if target as usize >= ops.len() {
                return Err(VerifyError::at(pc as u32, VerifyErrorKind::LabelOutOfRange { label }));
            }
            targets[pc] = Some(target);
        }
    }

    let mut states: Vec<Option<Vec<ValueType>>> = vec![None; ops.len()];
    states[0] = Some(Vec::new());
    let mut work = vec![0usize];
    let mut max_depth = 0usize;

    while let Some(pc) = work.pop() {
        let mut stack = states[pc].clone().unwrap_or_default();
        let flow = step(&ops[pc], &mut stack, params, ret).map_err(|k| VerifyError::at(pc as u32, k))?;

        max_depth = max_depth.max(stack.len());
        if stack.len() > usize::from(max_stack) {
            return Err(VerifyError::at(
                pc as u32,
                VerifyErrorKind::StackOverflow { depth: stack.len(), max: max_stack },
            ));
        }

        let mut succ: [Option<usize>; 2] = [None, None];
        match flow {
            Flow::Return => {}
            Flow::Next => succ[0] = Some(pc + 1),
            Flow::Jump(_) => succ[0] = targets[pc].map(|t| t as usize),
            Flow::Cond(_) => {
                succ[0] = targets[pc].map(|t| t as usize);
                succ[1] = Some(pc + 1);
            }
        }

        for next in succ.into_iter().flatten() {
            if next >= ops.len() {
                return Err(VerifyError::at(pc as u32, VerifyErrorKind::FallsOffEnd));
            }
            match &states[next] {
                None => {
                    states[next] = Some(stack.clone());
                    work.push(next);
                }
                Some(seen) if *seen == stack => {}
                Some(seen) => {
                    return Err(VerifyError::at(
                        next as u32,
                        VerifyErrorKind::JoinMismatch { expected: shape(seen), found: shape(&stack) },
                    ));
                }
            }
        }
    }

    Ok(VerifiedBody {
        max_depth: max_depth as u16,
        reachable: states.iter().filter(|s| s.is_some()).count(),
    })
}

fn step(op: &Op, stack: &mut Vec<ValueType>, params: &[ValueType], ret: ValueType) -> Result<Flow, VerifyErrorKind> {
    let m = op.mnemonic();
    match op {
        Op::Nop => {}
        Op::Ldarg(index) => {
            let ty = params
                .get(usize::from(*index))
                .ok_or(VerifyErrorKind::BadArgument { index: *index, arity: params.len() })?;
            stack.push(*ty);
        }
        Op::LdcI4(_) => stack.push(ValueType::I32),
        Op::LdcI8(_) => stack.push(ValueType::I64),
        Op::LdcR8(_) => stack.push(ValueType::F64),
        Op::LdBool(_) => stack.push(ValueType::Bool),
        Op::LdStr(_) => stack.push(ValueType::Str),
        Op::Dup => {
            let [t] = pop::<1>(stack, m)?;
            stack.extend([t, t]);
        }
        Op::Pop => {
            pop::<1>(stack, m)?;
        }
        Op::Add | Op::Sub | Op::Mul => {
            let [a, b] = pop::<2>(stack, m)?;
            if a != b || !a.is_numeric() {
                return Err(mismatch(m, &[a, b]));
            }
            stack.push(a);
        }
        Op::Neg => {
            let [a] = pop::<1>(stack, m)?;
            if !a.is_numeric() {
                return Err(mismatch(m, &[a]));
            }
            stack.push(a);
        }
        Op::Ceq => {
            let [a, b] = pop::<2>(stack, m)?;
            if a != b {
                return Err(mismatch(m, &[a, b]));
            }
            stack.push(ValueType::Bool);
        }
        Op::Cgt | Op::Clt => {
            let [a, b] = pop::<2>(stack, m)?;
            if a != b || !a.is_numeric() {
                return Err(mismatch(m, &[a, b]));
            }
            stack.push(ValueType::Bool);
        }
        Op::ConvI4 | Op::ConvI8 | Op::ConvR8 => {
            let [a] = pop::<1>(stack, m)?;
            if !a.is_numeric() {
                return Err(mismatch(m, &[a]));
            }
            stack.push(match op {
                Op::ConvI4 => ValueType::I32,
                Op::ConvI8 => ValueType::I64,
                _ => ValueType::F64,
            });
        }
        Op::Concat => {
            let [a, b] = pop::<2>(stack, m)?;
            if a != ValueType::Str || b != ValueType::Str {
                return Err(mismatch(m, &[a, b]));
            }
            stack.push(ValueType::Str);
        }
        Op::Br(l) => return Ok(Flow::Jump(*l)),
        Op::BrTrue(l) | Op::BrFalse(l) => {
            let [c] = pop::<1>(stack, m)?;
            if !matches!(c, ValueType::Bool | ValueType::I32 | ValueType::I64) {
                return Err(mismatch(m, &[c]));
            }
            return Ok(Flow::Cond(*l));
        }
        Op::Ret => {
            let ok = match ret {
                ValueType::Void => stack.is_empty(),
                ty => stack.as_slice() == [ty],
            };
            if !ok {
                return Err(VerifyErrorKind::BadReturn { expected: ret, found: shape(stack) });
            }
            return Ok(Flow::Return);
        }
    }
    Ok(Flow::Next)
}

fn pop<const N: usize>(stack: &mut Vec<ValueType>, op: &'static str) -> Result<[ValueType; N], VerifyErrorKind> {
    if stack.len() < N {
        return Err(VerifyErrorKind::StackUnderflow { op, needed: N, found: stack.len() });
    }
    let mut out = [ValueType::Void; N];
    out.copy_from_slice(&stack[stack.len() - N..]);
    stack.truncate(stack.len() - N);
    Ok(out)
}

fn mismatch(op: &'static str, found: &[ValueType]) -> VerifyErrorKind {
    VerifyErrorKind::TypeMismatch { op, found: shape(found) }
}

fn shape(stack: &[ValueType]) -> String {
    stack.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    fn check(src: &str, params: &[ValueType], ret: ValueType) -> Result<VerifiedBody, VerifyError> {
        verify(&assemble(src).unwrap(), params, ret, DEFAULT_MAX_STACK)
    }

    #[test]
    fn hello_verifies_against_int_to_string() {
        let body = check("ldstr \"Hello IL coder!\"\nret", &[ValueType::I32], ValueType::Str).unwrap();
        assert_eq!(body.max_depth, 1);
        assert_eq!(body.reachable, 2);
    }

    #[test]
    fn return_type_must_match() {
        let err = check("ldstr \"x\"\nret", &[ValueType::I32], ValueType::I32).unwrap_err();
        assert_eq!(err.pc, Some(1));
        assert!(matches!(err.kind, VerifyErrorKind::BadReturn { expected: ValueType::I32, .. }));
    }

    #[test]
    fn void_return_needs_empty_stack() {
        assert!(check("ret", &[], ValueType::Void).is_ok());
        let err = check("ldc.i4 1\nret", &[], ValueType::Void).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::BadReturn { .. }));
    }

    #[test]
    fn rejections_are_logged() {
        use std::{
            io,
            sync::{Arc, Mutex},
        };

        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);
        impl io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> { Ok(()) }
        }

        let sink = Sink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(check("ldc.i4 1", &[], ValueType::I32).is_err());
        });
        let logged = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("body rejected"), "{logged}");
        assert!(logged.contains("control falls off the end"), "{logged}");
    }

    #[test]
    fn undefined_labels_are_rejected() {
        let mut s = InstructionStream::new();
        s.mark_label(Label::from_index(u32::MAX));
        s.push(Op::Ret);
        let err = verify(&s, &[], ValueType::Void, DEFAULT_MAX_STACK).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::UndefinedLabel { label: Label::from_index(u32::MAX) });
    }

    #[test]
    fn falling_off_the_end_is_rejected() {
        let err = check("ldc.i4 1", &[], ValueType::I32).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::FallsOffEnd);
        let err = check("", &[], ValueType::Void).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::EmptyBody);
    }

    #[test]
    fn operand_types_are_checked() {
        let err = check("ldc.i4 1\nldc.i8 2\nadd\nret", &[], ValueType::I64).unwrap_err();
        assert_eq!(err.pc, Some(2));
        assert!(matches!(err.kind, VerifyErrorKind::TypeMismatch { op: "add", .. }));
        let err = check("ldarg 1\nret", &[ValueType::I32], ValueType::I32).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::BadArgument { index: 1, arity: 1 });
        let err = check("pop\nret", &[], ValueType::Void).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::StackUnderflow { needed: 1, found: 0, .. }));
    }

    #[test]
    fn branches_need_marked_labels_and_matching_joins() {
        let err = check("br nowhere\nret", &[], ValueType::Void).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::UnmarkedLabel { .. }));

        let src = "ldarg 0\nbrtrue one\nldc.i4 0\nbr done\none:\nldc.i4 1\nldc.i4 1\ndone:\nret";
        let err = check(src, &[ValueType::Bool], ValueType::I32).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::JoinMismatch { .. }));

        let src = "ldarg 0\nbrtrue one\nldc.i4 0\nbr done\none:\nldc.i4 1\ndone:\nret";
        assert!(check(src, &[ValueType::Bool], ValueType::I32).is_ok());
    }

    #[test]
    fn label_at_end_of_body_is_out_of_range() {
        let err = check("br end\nend:", &[], ValueType::Void).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::LabelOutOfRange { .. }));
    }

    #[test]
    fn loops_verify_and_max_stack_is_enforced() {
        let src = "top:\nldarg 0\nbrtrue top\nldc.i4 7\nret";
        assert!(check(src, &[ValueType::Bool], ValueType::I32).is_ok());

        let s = assemble("ldc.i4 1\nldc.i4 2\nldc.i4 3\npop\npop\nret").unwrap();
        let err = verify(&s, &[], ValueType::I32, 2).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::StackOverflow { depth: 3, max: 2 }));
    }

    #[test]
    fn void_parameters_are_rejected() {
        let err = check("ret", &[ValueType::Void], ValueType::Void).unwrap_err();
        assert_eq!(err, VerifyError { pc: None, kind: VerifyErrorKind::VoidParameter { index: 0 } });
    }
}
