//! Emission scope handed to `Session::with_il` callbacks.

use tracing::trace;

use ilforge_core::{
    asm::{assemble_into, AsmError, OpSink},
    InstructionStream, Label, Op,
};

/// Mechanical recorder over one open method's stream.
///
/// Nothing is checked here; the body is verified when its type finalizes.
#[derive(Debug)]
pub struct IlGenerator<'a> {
    method: &'a str,
    stream: &'a mut InstructionStream,
}

impl<'a> IlGenerator<'a> {
    pub(crate) fn new(method: &'a str, stream: &'a mut InstructionStream) -> Self { Self { method, stream } }

    /// Appends `op`.
    pub fn emit(&mut self, op: Op) -> &mut Self {
        trace!(method = self.method, pc = self.stream.len(), %op, "emit");
        self.stream.push(op);
        self
    }

    /// Allocates a fresh label.
    pub fn define_label(&mut self) -> Label { self.stream.define_label() }

    /// Binds `label` to the next emitted op.
    pub fn mark_label(&mut self, label: Label) -> &mut Self {
        self.stream.mark_label(label);
        self
    }

    /// Pc of the next emitted op.
    pub fn position(&self) -> usize { self.stream.len() }

    /// Appends assembler text (see [`ilforge_core::asm`]).
    pub fn assemble(&mut self, source: &str) -> Result<(), AsmError> { assemble_into(source, self) }
}

impl OpSink for IlGenerator<'_> {
    fn push_op(&mut self, op: Op) { self.emit(op); }
    fn new_label(&mut self) -> Label { self.define_label() }
    fn place_label(&mut self, label: Label) { self.mark_label(label); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn records_without_checking() {
        let mut stream = InstructionStream::new();
        let mut il = IlGenerator::new("M", &mut stream);
        let end = il.define_label();
        il.emit(Op::Add).emit(Op::Br(end));
        il.assemble("ldstr \"x\"").unwrap();
        assert_eq!(il.position(), 3);
        assert_eq!(stream.ops()[0], Op::Add);
        assert_eq!(stream.label_target(end), None);
    }
}
