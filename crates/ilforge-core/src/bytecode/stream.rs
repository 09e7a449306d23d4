//! Append-only instruction stream plus a compact binary roundtrip.
//!
//! The stream is a mechanical recorder: nothing is checked when an op is
//! pushed or a label is marked. All checking happens in [`crate::verify`].

use crate::bytecode::op::{
    Label, Op, OP_ADD, OP_BR, OP_BRFALSE, OP_BRTRUE, OP_CEQ, OP_CGT, OP_CLT, OP_CONCAT,
    OP_CONV_I4, OP_CONV_I8, OP_CONV_R8, OP_DUP, OP_LDARG, OP_LDBOOL, OP_LDC_I4, OP_LDC_I8,
    OP_LDC_R8, OP_LDSTR, OP_MUL, OP_NEG, OP_NOP, OP_POP, OP_RET, OP_SUB,
};
use crate::{crc32_ieee, ByteReader, ByteWriter, CoreError, CoreResult};

const MAGIC: &[u8; 4] = b"ILST";
const STREAM_VERSION: u16 = 1;
const UNMARKED: u32 = u32::MAX;

/// Ordered `(opcode, operand)` sequence with its label table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionStream {
    ops: Vec<Op>,
    /// label index → pc it was marked at.
    labels: Vec<Option<u32>>,
    /// labels that were marked more than once.
    remarked: Vec<Label>,
    /// labels marked here but never allocated by `define_label`.
    undefined: Vec<Label>,
}

impl InstructionStream {
    /// Create an empty stream.
    pub const fn new() -> Self { Self { ops: Vec::new(), labels: Vec::new(), remarked: Vec::new(), undefined: Vec::new() } }

    /// Number of recorded ops.
    pub fn len(&self) -> usize { self.ops.len() }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    /// Recorded ops, in order.
    pub fn ops(&self) -> &[Op] { &self.ops }

    /// Appends an op and returns its pc.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, op: Op) -> u32 {
        let pc = self.ops.len() as u32;
        self.ops.push(op);
        pc
    }

    /// Allocates a fresh, unmarked label.
    #[allow(clippy::cast_possible_truncation)]
    pub fn define_label(&mut self) -> Label {
        let ix = self.labels.len() as u32;
        self.labels.push(None);
        Label::from_index(ix)
    }

    /// Binds `label` to the pc of the next pushed op.
    ///
    /// A label this stream never allocated is remembered, not bound, so the
    /// table only grows through [`InstructionStream::define_label`]. A second
    /// mark wins but is remembered too. The verifier rejects both.
    #[allow(clippy::cast_possible_truncation)]
    pub fn mark_label(&mut self, label: Label) {
        let ix = label.index() as usize;
        if ix >= self.labels.len() {
            self.undefined.push(label);
            return;
        }
        if self.labels[ix].is_some() {
            self.remarked.push(label);
        }
        self.labels[ix] = Some(self.ops.len() as u32);
    }

    /// Pc a label was marked at, if any.
    pub fn label_target(&self, label: Label) -> Option<u32> {
        self.labels.get(label.index() as usize).copied().flatten()
    }

    /// Number of allocated labels.
    pub fn label_count(&self) -> usize { self.labels.len() }

    /// Labels marked more than once.
    pub fn remarked_labels(&self) -> &[Label] { &self.remarked }

    /// Labels marked without having been defined on this stream.
    pub fn undefined_labels(&self) -> &[Label] { &self.undefined }

    /// Encode the stream to a compact binary payload (CRC32 trailer).
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_bytes(MAGIC);
        w.write_u16_le(STREAM_VERSION);

        w.write_u32_le(self.ops.len() as u32);
        for op in &self.ops {
            w.write_u8(op.opcode());
            match op {
                Op::Ldarg(n) => w.write_u16_le(*n),
                Op::LdcI4(v) => w.write_i32_le(*v),
                Op::LdcI8(v) => w.write_i64_le(*v),
                Op::LdcR8(v) => w.write_f64_le(*v),
                Op::LdBool(b) => w.write_u8(u8::from(*b)),
                Op::LdStr(s) => w.write_str(s),
                Op::Br(l) | Op::BrTrue(l) | Op::BrFalse(l) => w.write_u32_le(l.index()),
                _ => {}
            }
        }

        w.write_u32_le(self.labels.len() as u32);
        for target in &self.labels {
            w.write_u32_le(target.unwrap_or(UNMARKED));
        }

        w.write_u32_le(self.remarked.len() as u32);
        for label in &self.remarked {
            w.write_u32_le(label.index());
        }

        w.write_u32_le(self.undefined.len() as u32);
        for label in &self.undefined {
            w.write_u32_le(label.index());
        }

        let mut out = w.into_vec();
        let crc = crc32_ieee(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode a stream from [`InstructionStream::to_bytes`] output.
    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        if data.len() < MAGIC.len() + 2 + 4 {
            return Err(CoreError::corrupted("stream too short"));
        }

        let (payload, crc_bytes) = data.split_at(data.len() - 4);
        let found = ByteReader::new(crc_bytes).read_u32_le()?;
        let expected = crc32_ieee(payload);
        if expected != found {
            return Err(CoreError::CrcMismatch { expected, found });
        }

        let mut r = ByteReader::new(payload);
        if r.read_bytes(MAGIC.len())? != MAGIC {
            return Err(CoreError::InvalidMagic);
        }
        let version = r.read_u16_le()?;
        if version != STREAM_VERSION {
            return Err(CoreError::corrupted(format!("unsupported stream version {version}")));
        }

        let mut stream = Self::new();
        let op_count = r.read_u32_le()? as usize;
        for _ in 0..op_count {
            let at = r.offset() as u64;
            let byte = r.read_u8()?;
            let op = match byte {
                OP_NOP => Op::Nop,
                OP_LDARG => Op::Ldarg(r.read_u16_le()?),
                OP_LDC_I4 => Op::LdcI4(r.read_i32_le()?),
                OP_LDC_I8 => Op::LdcI8(r.read_i64_le()?),
                OP_LDC_R8 => Op::LdcR8(r.read_f64_le()?),
                OP_LDBOOL => match r.read_u8()? {
                    0 => Op::LdBool(false),
                    1 => Op::LdBool(true),
                    _ => return Err(CoreError::corrupted("invalid bool operand")),
                },
                OP_LDSTR => Op::LdStr(r.read_str()?),
                OP_DUP => Op::Dup,
                OP_POP => Op::Pop,
                OP_ADD => Op::Add,
                OP_SUB => Op::Sub,
                OP_MUL => Op::Mul,
                OP_NEG => Op::Neg,
                OP_CEQ => Op::Ceq,
                OP_CGT => Op::Cgt,
                OP_CLT => Op::Clt,
                OP_CONV_I4 => Op::ConvI4,
                OP_CONV_I8 => Op::ConvI8,
                OP_CONV_R8 => Op::ConvR8,
                OP_CONCAT => Op::Concat,
                OP_BR => Op::Br(Label::from_index(r.read_u32_le()?)),
                OP_BRTRUE => Op::BrTrue(Label::from_index(r.read_u32_le()?)),
                OP_BRFALSE => Op::BrFalse(Label::from_index(r.read_u32_le()?)),
                OP_RET => Op::Ret,
                _ => return Err(CoreError::UnknownOpcode { byte, at }),
            };
            stream.ops.push(op);
        }

        let label_count = r.read_u32_le()? as usize;
        for _ in 0..label_count {
            let target = r.read_u32_le()?;
            stream.labels.push((target != UNMARKED).then_some(target));
        }

        let remarked = r.read_u32_le()? as usize;
        for _ in 0..remarked {
            stream.remarked.push(Label::from_index(r.read_u32_le()?));
        }

        let undefined = r.read_u32_le()? as usize;
        for _ in 0..undefined {
            stream.undefined.push(Label::from_index(r.read_u32_le()?));
        }

        if r.remaining() != 0 {
            return Err(CoreError::corrupted("trailing bytes"));
        }

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn looping_stream() -> InstructionStream {
        let mut s = InstructionStream::new();
        let top = s.define_label();
        let done = s.define_label();
        s.mark_label(top);
        s.push(Op::Ldarg(0));
        s.push(Op::LdcI4(0));
        s.push(Op::Cgt);
        s.push(Op::BrFalse(done));
        s.push(Op::Br(top));
        s.mark_label(done);
        s.push(Op::LdStr("Hello IL coder!".into()));
        s.push(Op::LdcR8(0.5));
        s.push(Op::Pop);
        s.push(Op::Ret);
        s
    }

    #[test]
    fn labels_bind_to_next_op() {
        let s = looping_stream();
        assert_eq!(s.label_target(Label::from_index(0)), Some(0));
        assert_eq!(s.label_target(Label::from_index(1)), Some(5));
        assert_eq!(s.label_target(Label::from_index(9)), None);
        assert!(s.remarked_labels().is_empty());
    }

    #[test]
    fn remarking_is_recorded_not_rejected() {
        let mut s = InstructionStream::new();
        let l = s.define_label();
        s.mark_label(l);
        s.push(Op::Nop);
        s.mark_label(l);
        assert_eq!(s.label_target(l), Some(1));
        assert_eq!(s.remarked_labels(), &[l]);
    }

    #[test]
    fn foreign_labels_do_not_grow_the_table() -> CoreResult<()> {
        let mut s = InstructionStream::new();
        let own = s.define_label();
        let stray = Label::from_index(u32::MAX - 1);
        s.mark_label(stray);
        s.push(Op::Ret);
        assert_eq!(s.label_count(), 1);
        assert_eq!(s.label_target(stray), None);
        assert_eq!(s.label_target(own), None);
        assert_eq!(s.undefined_labels(), &[stray]);

        let back = InstructionStream::from_bytes(&s.to_bytes())?;
        assert_eq!(back.undefined_labels(), &[stray]);
        Ok(())
    }

    #[test]
    fn binary_roundtrip_keeps_everything() -> CoreResult<()> {
        let s = looping_stream();
        let back = InstructionStream::from_bytes(&s.to_bytes())?;
        assert_eq!(back, s);
        Ok(())
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let mut bytes = looping_stream().to_bytes();
        bytes[8] ^= 0xFF;
        assert!(matches!(
            InstructionStream::from_bytes(&bytes),
            Err(CoreError::CrcMismatch { .. })
        ));
    }
}
