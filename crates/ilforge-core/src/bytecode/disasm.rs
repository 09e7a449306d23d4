//! Textual disassembly of instruction streams.
//!
//! [`disassemble`] output is valid input for [`crate::asm::assemble`].

use core::fmt::Write;

use crate::bytecode::{InstructionStream, Label};

/// Re-assemblable listing: one op per line, labels as `Ln:`.
#[allow(clippy::cast_possible_truncation)]
pub fn disassemble(stream: &InstructionStream) -> String {
    let mut out = String::new();
    let marks = marks_by_pc(stream);
    for (pc, op) in stream.ops().iter().enumerate() {
        for label in marks.iter().filter(|(at, _)| *at == pc as u32).map(|(_, l)| l) {
            let _ = writeln!(out, "{label}:");
        }
        let _ = writeln!(out, "    {op}");
    }
    // labels marked past the last op
    for (_, label) in marks.iter().filter(|(at, _)| *at as usize >= stream.len()) {
        let _ = writeln!(out, "{label}:");
    }
    out
}

/// Human listing with pcs and a header, used by `ilforge disasm`.
#[allow(clippy::cast_possible_truncation)]
pub fn disassemble_full(stream: &InstructionStream, title: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {title} == (ops={}, labels={})",
        stream.len(),
        stream.label_count()
    );
    let marks = marks_by_pc(stream);
    for (pc, op) in stream.ops().iter().enumerate() {
        let here: Vec<String> = marks
            .iter()
            .filter(|(at, _)| *at == pc as u32)
            .map(|(_, l)| l.to_string())
            .collect();
        if here.is_empty() {
            let _ = writeln!(out, "{pc:04} |        | {op}");
        } else {
            let _ = writeln!(out, "{pc:04} | {:>6} | {op}", here.join(","));
        }
    }
    let unmarked = (0..stream.label_count() as u32)
        .map(Label::from_index)
        .filter(|l| stream.label_target(*l).is_none())
        .count();
    if unmarked > 0 {
        let _ = writeln!(out, ";; {unmarked} unmarked label(s)");
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn marks_by_pc(stream: &InstructionStream) -> Vec<(u32, Label)> {
    let mut marks: Vec<(u32, Label)> = (0..stream.label_count() as u32)
        .map(Label::from_index)
        .filter_map(|l| stream.label_target(l).map(|pc| (pc, l)))
        .collect();
    marks.sort_unstable();
    marks
}
