//! Small text assembler for method bodies.
//!
//! One instruction per line, mnemonics as printed by [`crate::disasm`]:
//!
//! ```text
//! ; comments start with `;`
//! ldstr "Hello IL coder!"
//! ret
//! ```
//!
//! `name:` on its own line marks a label; `br name`, `brtrue name` and
//! `brfalse name` reference it (forward references are fine). A label that
//! is referenced but never marked is left unmarked: the assembler records,
//! the verifier judges.

use std::collections::HashMap;

use thiserror::Error;

use crate::bytecode::{InstructionStream, Label, Op};

/// Anything that can record assembled instructions.
pub trait OpSink {
    /// Append one op.
    fn push_op(&mut self, op: Op);
    /// Allocate a fresh label.
    fn new_label(&mut self) -> Label;
    /// Bind a label to the next op.
    fn place_label(&mut self, label: Label);
}

impl OpSink for InstructionStream {
    fn push_op(&mut self, op: Op) { self.push(op); }
    fn new_label(&mut self) -> Label { self.define_label() }
    fn place_label(&mut self, label: Label) { self.mark_label(label); }
}

/// Syntax error with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct AsmError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl AsmError {
    fn new(line: usize, message: impl Into<String>) -> Self { Self { line, message: message.into() } }
}

/// Assemble a snippet into a fresh [`InstructionStream`].
pub fn assemble(source: &str) -> Result<InstructionStream, AsmError> {
    let mut stream = InstructionStream::new();
    assemble_into(source, &mut stream)?;
    Ok(stream)
}

/// Assemble a snippet into any [`OpSink`] (e.g. a method's IL generator).
pub fn assemble_into(source: &str, sink: &mut dyn OpSink) -> Result<(), AsmError> {
    let mut labels: HashMap<String, Label> = HashMap::new();

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_suffix(':') {
            let name = name.trim();
            if !is_label_name(name) {
                return Err(AsmError::new(line_no, format!("invalid label name `{name}`")));
            }
            let label = label_for(&mut labels, name, sink);
            sink.place_label(label);
            continue;
        }

        let (mnemonic, operand) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (line, ""),
        };
        let mnemonic = mnemonic.to_ascii_lowercase();

        let op = match mnemonic.as_str() {
            "nop" => Op::Nop,
            "ldarg" => Op::Ldarg(parse_num(operand, line_no)?),
            "ldc.i4" => Op::LdcI4(parse_num(operand, line_no)?),
            "ldc.i8" => Op::LdcI8(parse_num(operand, line_no)?),
            "ldc.r8" => Op::LdcR8(parse_num(operand, line_no)?),
            "ldbool" => match operand {
                "true" => Op::LdBool(true),
                "false" => Op::LdBool(false),
                other => return Err(AsmError::new(line_no, format!("expected true/false, got `{other}`"))),
            },
            "ldstr" => Op::LdStr(parse_string_literal(operand).map_err(|m| AsmError::new(line_no, m))?),
            "dup" => Op::Dup,
            "pop" => Op::Pop,
            "add" => Op::Add,
            "sub" => Op::Sub,
            "mul" => Op::Mul,
            "neg" => Op::Neg,
            "ceq" => Op::Ceq,
            "cgt" => Op::Cgt,
            "clt" => Op::Clt,
            "conv.i4" => Op::ConvI4,
            "conv.i8" => Op::ConvI8,
            "conv.r8" => Op::ConvR8,
            "concat" => Op::Concat,
            "br" | "brtrue" | "brfalse" => {
                if !is_label_name(operand) {
                    return Err(AsmError::new(line_no, format!("`{mnemonic}` expects a label, got `{operand}`")));
                }
                let label = label_for(&mut labels, operand, sink);
                match mnemonic.as_str() {
                    "br" => Op::Br(label),
                    "brtrue" => Op::BrTrue(label),
                    _ => Op::BrFalse(label),
                }
            }
            "ret" => Op::Ret,
            other => return Err(AsmError::new(line_no, format!("unsupported instruction `{other}`"))),
        };

        if !operand.is_empty() && takes_no_operand(&op) {
            return Err(AsmError::new(line_no, format!("`{mnemonic}` takes no operand")));
        }
        sink.push_op(op);
    }

    Ok(())
}

fn label_for(labels: &mut HashMap<String, Label>, name: &str, sink: &mut dyn OpSink) -> Label {
    *labels.entry(name.to_owned()).or_insert_with(|| sink.new_label())
}

fn takes_no_operand(op: &Op) -> bool {
    !matches!(
        op,
        Op::Ldarg(_) | Op::LdcI4(_) | Op::LdcI8(_) | Op::LdcR8(_) | Op::LdBool(_) | Op::LdStr(_)
            | Op::Br(_) | Op::BrTrue(_) | Op::BrFalse(_)
    )
}

/// `;` starts a comment, except inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut escaping = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaping => escaping = false,
            '\\' if in_str => escaping = true,
            '"' => in_str = !in_str,
            ';' if !in_str => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_label_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn parse_num<T: core::str::FromStr>(operand: &str, line: usize) -> Result<T, AsmError> {
    operand
        .parse::<T>()
        .map_err(|_| AsmError::new(line, format!("invalid numeric operand `{operand}`")))
}

fn parse_string_literal(input: &str) -> Result<String, String> {
    let inner = input
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| String::from("string literal expected"))?;

    let mut out = String::with_capacity(inner.len());
    let mut escaping = false;
    for c in inner.chars() {
        if escaping {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
            escaping = false;
        } else if c == '\\' {
            escaping = true;
        } else {
            out.push(c);
        }
    }

    if escaping {
        return Err("incomplete escape sequence".into());
    }
    Ok(out)
}
