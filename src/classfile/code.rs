//! Editable method bodies.
//!
//! A `Code` attribute is decoded into an instruction arena. Everything that
//! refers to a code position (branch targets, exception ranges, stack map
//! frames, line numbers, local variable scopes) holds a [`Label`], the index of
//! an instruction, so inserting code never requires patching offsets. On
//! [`CodeBody::encode`] one layout pass assigns offsets and one emission pass
//! writes the bytes and every derived table.

use std::collections::{BTreeMap, BTreeSet};

use super::bytes::{put_i32, put_u16, put_u32, put_u8, Reader};
use super::constant_pool::ConstantPool;
use super::frames::{self, Frame};
use super::opcodes::{self, Shape};
use super::{count, parse_attributes, stack, ParseError, SerializeError};

const MAX_CODE_LEN: usize = 65535;

/// Index of an instruction in [`CodeBody::insns`]. The label equal to the
/// instruction count denotes the end of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Instruction without code references; operands are copied verbatim.
    /// For `wide` the operands start with the modified opcode.
    Plain { opcode: u8, operands: Vec<u8> },
    Branch { opcode: u8, target: Label },
    TableSwitch {
        default: Label,
        low: i32,
        high: i32,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
}

impl Insn {
    pub fn plain(opcode: u8, operands: &[u8]) -> Self {
        Insn::Plain {
            opcode,
            operands: operands.to_vec(),
        }
    }

    /// Load a constant pool entry, using the short form when the index fits.
    pub fn ldc(index: u16) -> Self {
        match u8::try_from(index) {
            Ok(short) => Insn::plain(opcodes::LDC, &[short]),
            Err(_) => Insn::plain(opcodes::LDC_W, &index.to_be_bytes()),
        }
    }

    pub fn invokestatic(method_ref: u16) -> Self {
        Insn::plain(opcodes::INVOKESTATIC, &method_ref.to_be_bytes())
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Insn::Plain { opcode, .. } | Insn::Branch { opcode, .. } => *opcode,
            Insn::TableSwitch { .. } => opcodes::TABLESWITCH,
            Insn::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
        }
    }

    /// The opcode that determines behaviour; for `wide` the modified opcode.
    pub fn effective_opcode(&self) -> u8 {
        match self {
            Insn::Plain { opcode, operands } if *opcode == opcodes::WIDE => {
                operands.first().copied().unwrap_or(opcodes::WIDE)
            }
            other => other.opcode(),
        }
    }

    /// Constant pool index loaded by `ldc`/`ldc_w`.
    pub fn ldc_index(&self) -> Option<u16> {
        match self {
            Insn::Plain { opcode, operands } if *opcode == opcodes::LDC => {
                operands.first().map(|b| *b as u16)
            }
            Insn::Plain { opcode, operands } if *opcode == opcodes::LDC_W && operands.len() == 2 => {
                Some(u16::from_be_bytes([operands[0], operands[1]]))
            }
            _ => None,
        }
    }

    /// Constant pool index of the callee of `invokestatic`.
    pub fn invokestatic_index(&self) -> Option<u16> {
        match self {
            Insn::Plain { opcode, operands }
                if *opcode == opcodes::INVOKESTATIC && operands.len() == 2 =>
            {
                Some(u16::from_be_bytes([operands[0], operands[1]]))
            }
            _ => None,
        }
    }

    /// Every label this instruction can transfer control to.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::Plain { .. } => Vec::new(),
            Insn::Branch { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Insn::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, l)| *l))
                .collect(),
        }
    }

    fn labels_mut(&mut self) -> Vec<&mut Label> {
        match self {
            Insn::Plain { .. } => Vec::new(),
            Insn::Branch { target, .. } => vec![target],
            Insn::TableSwitch {
                default, targets, ..
            } => {
                let mut labels = vec![default];
                labels.extend(targets.iter_mut());
                labels
            }
            Insn::LookupSwitch { default, pairs } => {
                let mut labels = vec![default];
                labels.extend(pairs.iter_mut().map(|(_, l)| l));
                labels
            }
        }
    }

    /// Encoded length when placed at `pc`.
    fn len_at(&self, pc: usize) -> usize {
        match self {
            Insn::Plain { operands, .. } => 1 + operands.len(),
            Insn::Branch { opcode, .. } => match opcodes::shape(*opcode) {
                Some(Shape::Branch32) => 5,
                _ => 3,
            },
            Insn::TableSwitch { targets, .. } => 1 + switch_padding(pc) + 12 + 4 * targets.len(),
            Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(pc) + 8 + 8 * pairs.len(),
        }
    }
}

fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: Label,
    /// Exclusive; may be the end label.
    pub end: Label,
    pub handler: Label,
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start: Label,
    pub line: u16,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: Label,
    pub end: Label,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

/// `Code` sub-attributes that survive rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CodeAttribute {
    LineNumbers {
        name_index: u16,
        entries: Vec<LineNumber>,
    },
    LocalVariables {
        name_index: u16,
        entries: Vec<LocalVariable>,
    },
    StackMap {
        name_index: u16,
        frames: Vec<Frame>,
    },
}

/// Offsets assigned by the layout pass.
struct Layout {
    /// Where a jump to each label lands (start of its prologue).
    label_off: Vec<usize>,
    /// Where each instruction itself starts.
    insn_off: Vec<usize>,
    code_len: usize,
}

impl Layout {
    fn label(&self, label: Label) -> Result<usize, SerializeError> {
        self.label_off
            .get(label.0)
            .copied()
            .ok_or(SerializeError::UnknownLabel(label.0))
    }
}

/// Decoded `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBody {
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: Vec<Insn>,
    pub handlers: Vec<ExceptionHandler>,
    attributes: Vec<CodeAttribute>,
    dropped_attributes: usize,
    preamble: Vec<Insn>,
    prologues: BTreeMap<usize, Vec<Insn>>,
}

impl CodeBody {
    /// Decode the payload of a `Code` attribute.
    pub fn decode(info: &[u8], pool: &ConstantPool) -> Result<Self, ParseError> {
        let mut r = Reader::new(info);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        if code_len == 0 || code_len > MAX_CODE_LEN {
            return Err(ParseError::Malformed(format!("code length {}", code_len)));
        }
        let code = r.bytes(code_len)?;
        let (mut insns, starts) = decode_insns(code)?;

        let mut index_at = vec![usize::MAX; code_len + 1];
        for (i, start) in starts.iter().enumerate() {
            index_at[*start] = i;
        }
        index_at[code_len] = insns.len();
        let at_insn = |off: usize| -> Option<Label> {
            match index_at.get(off) {
                Some(&i) if i != usize::MAX && off < code_len => Some(Label(i)),
                _ => None,
            }
        };
        let at_insn_or_end = |off: usize| -> Option<Label> {
            match index_at.get(off) {
                Some(&i) if i != usize::MAX => Some(Label(i)),
                _ => None,
            }
        };

        for (insn, start) in insns.iter_mut().zip(&starts) {
            for label in insn.labels_mut() {
                let off = label.0;
                *label = at_insn(off).ok_or(ParseError::InvalidBranchTarget {
                    offset: *start,
                    target: off as i64,
                })?;
            }
        }

        let n = r.u16()? as usize;
        let mut handlers = Vec::with_capacity(n);
        for _ in 0..n {
            let start = r.u16()? as usize;
            let end = r.u16()? as usize;
            let handler = r.u16()? as usize;
            let catch_type = r.u16()?;
            let start_label = at_insn(start).ok_or(ParseError::InvalidFrameOffset(start))?;
            let end_label = at_insn_or_end(end).ok_or(ParseError::InvalidFrameOffset(end))?;
            if end_label <= start_label {
                return Err(ParseError::Malformed(format!(
                    "empty exception range {}..{}",
                    start, end
                )));
            }
            handlers.push(ExceptionHandler {
                start: start_label,
                end: end_label,
                handler: at_insn(handler).ok_or(ParseError::InvalidFrameOffset(handler))?,
                catch_type,
            });
        }

        let mut attributes = Vec::new();
        let mut dropped_attributes = 0;
        for attr in parse_attributes(&mut r)? {
            let name = pool.utf8(attr.name_index)?;
            let decoded = match name.as_ref() {
                "LineNumberTable" => Some(CodeAttribute::LineNumbers {
                    name_index: attr.name_index,
                    entries: decode_line_numbers(&attr.info, &at_insn)?,
                }),
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    Some(CodeAttribute::LocalVariables {
                        name_index: attr.name_index,
                        entries: decode_local_variables(&attr.info, &at_insn_or_end)?,
                    })
                }
                "StackMapTable" => Some(CodeAttribute::StackMap {
                    name_index: attr.name_index,
                    frames: frames::decode(&attr.info, &at_insn)?,
                }),
                _ => None,
            };
            match decoded {
                Some(a) => attributes.push(a),
                None => dropped_attributes += 1,
            }
        }

        if r.remaining() > 0 {
            return Err(ParseError::Malformed("trailing bytes in Code attribute".into()));
        }

        Ok(Self {
            max_stack,
            max_locals,
            insns,
            handlers,
            attributes,
            dropped_attributes,
            preamble: Vec::new(),
            prologues: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Sub-attributes of the original `Code` attribute that are not kept.
    pub fn dropped_attributes(&self) -> usize {
        self.dropped_attributes
    }

    pub fn frames(&self) -> Option<&[Frame]> {
        self.attributes.iter().find_map(|a| match a {
            CodeAttribute::StackMap { frames, .. } => Some(frames.as_slice()),
            _ => None,
        })
    }

    pub fn line_numbers(&self) -> impl Iterator<Item = &LineNumber> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                CodeAttribute::LineNumbers { entries, .. } => Some(entries.iter()),
                _ => None,
            })
            .flatten()
    }

    /// Indices of instructions control can reach other than by falling
    /// through: jump and switch targets, subroutine entries and exception
    /// handler entries.
    pub fn branch_targets(&self) -> BTreeSet<usize> {
        let mut set: BTreeSet<usize> = self
            .insns
            .iter()
            .flat_map(|i| i.targets())
            .map(|l| l.0)
            .collect();
        set.extend(self.handlers.iter().map(|h| h.handler.0));
        set.retain(|i| *i < self.insns.len());
        set
    }

    /// Code executed once on method entry, before the first instruction.
    /// Jumps back to the first instruction do not run it again.
    pub fn insert_entry(&mut self, code: Vec<Insn>) {
        self.preamble.extend(code);
    }

    /// Code executed every time control reaches instruction `index`, whether
    /// by falling through or by a jump. Indices past the last instruction are
    /// ignored.
    pub fn insert_before(&mut self, index: usize, code: Vec<Insn>) {
        if index < self.insns.len() {
            self.prologues.entry(index).or_default().extend(code);
        }
    }

    fn layout(&self) -> Layout {
        let n = self.insns.len();
        let mut label_off = Vec::with_capacity(n + 1);
        let mut insn_off = Vec::with_capacity(n + 1);
        let mut pc = 0;
        for insn in &self.preamble {
            pc += insn.len_at(pc);
        }
        for (i, insn) in self.insns.iter().enumerate() {
            label_off.push(pc);
            if let Some(prologue) = self.prologues.get(&i) {
                for p in prologue {
                    pc += p.len_at(pc);
                }
            }
            insn_off.push(pc);
            pc += insn.len_at(pc);
        }
        label_off.push(pc);
        insn_off.push(pc);
        Layout {
            label_off,
            insn_off,
            code_len: pc,
        }
    }

    /// Instructions in final order, and the flat position of each label.
    fn flatten(&self) -> (Vec<&Insn>, Vec<usize>) {
        let extra: usize = self.preamble.len() + self.prologues.values().map(Vec::len).sum::<usize>();
        let mut flat = Vec::with_capacity(self.insns.len() + extra);
        let mut label_flat = Vec::with_capacity(self.insns.len() + 1);
        flat.extend(self.preamble.iter());
        for (i, insn) in self.insns.iter().enumerate() {
            label_flat.push(flat.len());
            if let Some(prologue) = self.prologues.get(&i) {
                flat.extend(prologue.iter());
            }
            flat.push(insn);
        }
        label_flat.push(flat.len());
        (flat, label_flat)
    }

    /// Encode into a `Code` attribute payload, recomputing offsets, derived
    /// tables and `max_stack`. `max_locals` is kept.
    pub fn encode(&self, pool: &ConstantPool) -> Result<Vec<u8>, SerializeError> {
        let layout = self.layout();
        if layout.code_len > MAX_CODE_LEN {
            return Err(SerializeError::CodeTooLarge(layout.code_len));
        }

        let mut code = Vec::with_capacity(layout.code_len);
        for insn in &self.preamble {
            emit(&mut code, insn, &layout)?;
        }
        for (i, insn) in self.insns.iter().enumerate() {
            if let Some(prologue) = self.prologues.get(&i) {
                for p in prologue {
                    emit(&mut code, p, &layout)?;
                }
            }
            emit(&mut code, insn, &layout)?;
        }

        let (flat, label_flat) = self.flatten();
        let handler_entries: Vec<usize> = self
            .handlers
            .iter()
            .map(|h| label_flat.get(h.handler.0).copied().ok_or(SerializeError::UnknownLabel(h.handler.0)))
            .collect::<Result<_, _>>()?;
        let computed = stack::max_stack(&flat, &label_flat, &handler_entries, pool)?;
        let computed = u16::try_from(computed).map_err(|_| SerializeError::StackTooDeep(computed))?;

        let mut buf = Vec::with_capacity(code.len() + 64);
        put_u16(&mut buf, self.max_stack.max(computed));
        put_u16(&mut buf, self.max_locals);
        put_u32(&mut buf, code.len() as u32);
        buf.extend_from_slice(&code);

        put_u16(&mut buf, count(self.handlers.len(), "exception handlers")?);
        for h in &self.handlers {
            put_u16(&mut buf, layout.label(h.start)? as u16);
            put_u16(&mut buf, layout.label(h.end)? as u16);
            put_u16(&mut buf, layout.label(h.handler)? as u16);
            put_u16(&mut buf, h.catch_type);
        }

        put_u16(&mut buf, count(self.attributes.len(), "code attributes")?);
        for attr in &self.attributes {
            let (name_index, payload) = match attr {
                CodeAttribute::LineNumbers { name_index, entries } => {
                    let mut p = Vec::with_capacity(2 + entries.len() * 4);
                    put_u16(&mut p, count(entries.len(), "line numbers")?);
                    for e in entries {
                        put_u16(&mut p, layout.label(e.start)? as u16);
                        put_u16(&mut p, e.line);
                    }
                    (*name_index, p)
                }
                CodeAttribute::LocalVariables { name_index, entries } => {
                    let mut p = Vec::with_capacity(2 + entries.len() * 10);
                    put_u16(&mut p, count(entries.len(), "local variables")?);
                    for e in entries {
                        let start = layout.label(e.start)?;
                        let end = layout.label(e.end)?;
                        put_u16(&mut p, start as u16);
                        put_u16(&mut p, (end - start) as u16);
                        put_u16(&mut p, e.name_index);
                        put_u16(&mut p, e.descriptor_index);
                        put_u16(&mut p, e.index);
                    }
                    (*name_index, p)
                }
                CodeAttribute::StackMap { name_index, frames } => {
                    let label_off = &layout.label_off;
                    let insn_off = &layout.insn_off;
                    let p = frames::encode(
                        frames,
                        |l| label_off.get(l.0).copied().unwrap_or(layout.code_len),
                        |l| insn_off.get(l.0).copied().unwrap_or(layout.code_len),
                    )?;
                    (*name_index, p)
                }
            };
            put_u16(&mut buf, name_index);
            put_u32(&mut buf, payload.len() as u32);
            buf.extend_from_slice(&payload);
        }
        Ok(buf)
    }
}

fn emit(buf: &mut Vec<u8>, insn: &Insn, layout: &Layout) -> Result<(), SerializeError> {
    let pc = buf.len();
    let rel = |label: Label| -> Result<i64, SerializeError> {
        Ok(layout.label(label)? as i64 - pc as i64)
    };
    match insn {
        Insn::Plain { opcode, operands } => {
            put_u8(buf, *opcode);
            buf.extend_from_slice(operands);
        }
        Insn::Branch { opcode, target } => {
            let delta = rel(*target)?;
            put_u8(buf, *opcode);
            match opcodes::shape(*opcode) {
                Some(Shape::Branch32) => put_i32(buf, delta as i32),
                Some(Shape::Branch16) => {
                    let short = i16::try_from(delta)
                        .map_err(|_| SerializeError::BranchOutOfRange { offset: pc, delta })?;
                    put_u16(buf, short as u16);
                }
                _ => {
                    return Err(SerializeError::MalformedInsn(format!(
                        "opcode {:#04x} is not a branch",
                        opcode
                    )))
                }
            }
        }
        Insn::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            put_u8(buf, opcodes::TABLESWITCH);
            buf.resize(buf.len() + switch_padding(pc), 0);
            put_i32(buf, rel(*default)? as i32);
            put_i32(buf, *low);
            put_i32(buf, *high);
            for t in targets {
                put_i32(buf, rel(*t)? as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            put_u8(buf, opcodes::LOOKUPSWITCH);
            buf.resize(buf.len() + switch_padding(pc), 0);
            put_i32(buf, rel(*default)? as i32);
            put_i32(buf, pairs.len() as i32);
            for (key, t) in pairs {
                put_i32(buf, *key);
                put_i32(buf, rel(*t)? as i32);
            }
        }
    }
    Ok(())
}

/// Decode raw bytecode. Branch labels hold absolute byte offsets until the
/// caller maps them to instruction indices.
fn decode_insns(code: &[u8]) -> Result<(Vec<Insn>, Vec<usize>), ParseError> {
    let mut insns = Vec::with_capacity(code.len() / 2);
    let mut starts = Vec::with_capacity(code.len() / 2);
    let mut pc = 0;
    while pc < code.len() {
        let (insn, len) = decode_one(code, pc).map_err(|e| match e {
            ParseError::Truncated { offset, needed } => ParseError::Truncated {
                offset: pc + 1 + offset,
                needed,
            },
            other => other,
        })?;
        starts.push(pc);
        insns.push(insn);
        pc += len;
    }
    Ok((insns, starts))
}

fn decode_one(code: &[u8], pc: usize) -> Result<(Insn, usize), ParseError> {
    let opcode = code[pc];
    let shape = opcodes::shape(opcode).ok_or(ParseError::InvalidOpcode { opcode, offset: pc })?;
    let mut r = Reader::new(&code[pc + 1..]);
    let absolute = |delta: i64| -> Result<Label, ParseError> {
        let target = pc as i64 + delta;
        if target < 0 || target >= code.len() as i64 {
            return Err(ParseError::InvalidBranchTarget { offset: pc, target });
        }
        Ok(Label(target as usize))
    };

    let insn = match shape {
        Shape::Fixed(n) => Insn::Plain {
            opcode,
            operands: r.bytes(n)?.to_vec(),
        },
        Shape::Branch16 => Insn::Branch {
            opcode,
            target: absolute(r.i16()? as i64)?,
        },
        Shape::Branch32 => Insn::Branch {
            opcode,
            target: absolute(r.i32()? as i64)?,
        },
        Shape::Wide => {
            let inner = r.u8()?;
            let n = opcodes::wide_operand_len(inner).ok_or(ParseError::InvalidOpcode {
                opcode: inner,
                offset: pc + 1,
            })?;
            let mut operands = Vec::with_capacity(n);
            operands.push(inner);
            operands.extend_from_slice(r.bytes(n - 1)?);
            Insn::Plain { opcode, operands }
        }
        Shape::TableSwitch => {
            r.skip(switch_padding(pc))?;
            let default = absolute(r.i32()? as i64)?;
            let low = r.i32()?;
            let high = r.i32()?;
            if high < low {
                return Err(ParseError::Malformed(format!(
                    "tableswitch at {} has high {} below low {}",
                    pc, high, low
                )));
            }
            let n = (high as i64 - low as i64 + 1) as usize;
            let mut targets = Vec::with_capacity(n.min(code.len()));
            for _ in 0..n {
                targets.push(absolute(r.i32()? as i64)?);
            }
            Insn::TableSwitch {
                default,
                low,
                high,
                targets,
            }
        }
        Shape::LookupSwitch => {
            r.skip(switch_padding(pc))?;
            let default = absolute(r.i32()? as i64)?;
            let npairs = r.i32()?;
            if npairs < 0 {
                return Err(ParseError::Malformed(format!(
                    "lookupswitch at {} has {} pairs",
                    pc, npairs
                )));
            }
            let n = npairs as usize;
            let mut pairs = Vec::with_capacity(n.min(code.len()));
            for _ in 0..n {
                let key = r.i32()?;
                pairs.push((key, absolute(r.i32()? as i64)?));
            }
            Insn::LookupSwitch { default, pairs }
        }
    };
    Ok((insn, 1 + r.position()))
}

// Debug tables: entries that do not line up with an instruction are dropped
// rather than failing the whole method.

fn decode_line_numbers<F>(info: &[u8], at_insn: &F) -> Result<Vec<LineNumber>, ParseError>
where
    F: Fn(usize) -> Option<Label>,
{
    let mut r = Reader::new(info);
    let n = r.u16()? as usize;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let start = r.u16()? as usize;
        let line = r.u16()?;
        if let Some(start) = at_insn(start) {
            entries.push(LineNumber { start, line });
        }
    }
    Ok(entries)
}

fn decode_local_variables<F>(info: &[u8], at: &F) -> Result<Vec<LocalVariable>, ParseError>
where
    F: Fn(usize) -> Option<Label>,
{
    let mut r = Reader::new(info);
    let n = r.u16()? as usize;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let start = r.u16()? as usize;
        let length = r.u16()? as usize;
        let name_index = r.u16()?;
        let descriptor_index = r.u16()?;
        let index = r.u16()?;
        if let (Some(s), Some(e)) = (at(start), at(start + length)) {
            entries.push(LocalVariable {
                start: s,
                end: e,
                name_index,
                descriptor_index,
                index,
            });
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::opcodes::*;

    /// Build a `Code` payload with an optional StackMapTable.
    fn code_attr(pool: &mut ConstantPool, max_stack: u16, code: &[u8], frames: Option<&[u8]>) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u16(&mut buf, max_stack);
        put_u16(&mut buf, 1);
        put_u32(&mut buf, code.len() as u32);
        buf.extend_from_slice(code);
        put_u16(&mut buf, 0);
        match frames {
            Some(f) => {
                let name = pool.add_utf8("StackMapTable").unwrap();
                put_u16(&mut buf, 1);
                put_u16(&mut buf, name);
                put_u32(&mut buf, f.len() as u32);
                buf.extend_from_slice(f);
            }
            None => put_u16(&mut buf, 0),
        }
        buf
    }

    // 0: iload_0  1: ifle 6  4: iconst_1  5: ireturn  6: iconst_0  7: ireturn
    const SIGN: [u8; 8] = [ILOAD_0, IFLE, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN];

    #[test]
    fn test_decode_encode_unmodified_is_identical() {
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 1, &SIGN, Some(&[0x00, 0x01, 0x06]));
        let body = CodeBody::decode(&info, &pool).unwrap();
        assert_eq!(body.len(), 6);
        assert_eq!(body.insns[1], Insn::Branch { opcode: IFLE, target: Label(4) });
        assert_eq!(body.encode(&pool).unwrap(), info);
    }

    #[test]
    fn test_branch_targets() {
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 1, &SIGN, None);
        let body = CodeBody::decode(&info, &pool).unwrap();
        assert_eq!(body.branch_targets().into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_insertion_shifts_branches_and_frames() {
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 1, &SIGN, Some(&[0x00, 0x01, 0x06]));
        let mut body = CodeBody::decode(&info, &pool).unwrap();
        body.insert_entry(vec![Insn::plain(NOP, &[])]);
        body.insert_before(4, vec![Insn::plain(NOP, &[]), Insn::plain(NOP, &[])]);

        let out = body.encode(&pool).unwrap();
        let expected_code = [
            NOP, ILOAD_0, IFLE, 0x00, 0x05, ICONST_1, IRETURN, NOP, NOP, ICONST_0, IRETURN,
        ];
        assert_eq!(&out[4..8], &(expected_code.len() as u32).to_be_bytes());
        assert_eq!(&out[8..8 + expected_code.len()], &expected_code);
        // The frame moves to the start of the prologue.
        assert_eq!(&out[out.len() - 3..], &[0x00, 0x01, 0x07]);
    }

    #[test]
    fn test_back_edge_to_entry_skips_preamble() {
        // 0: iinc 0 1   3: goto 0
        let code = [IINC, 0x00, 0x01, GOTO, 0xff, 0xfd];
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 0, &code, None);
        let mut body = CodeBody::decode(&info, &pool).unwrap();
        body.insert_entry(vec![Insn::plain(NOP, &[])]);
        let out = body.encode(&pool).unwrap();
        // goto now at 4 jumps back to iinc at 1.
        assert_eq!(&out[8..15], &[NOP, IINC, 0x00, 0x01, GOTO, 0xff, 0xfd]);
    }

    #[test]
    fn test_tableswitch_padding_recomputed() {
        // 0: iload_0  1: tableswitch (pad 2) default 24, low 0, high 1 -> 26, 28
        let mut code = vec![ILOAD_0, TABLESWITCH, 0, 0];
        for v in [23i32, 0, 1, 25, 27] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.extend_from_slice(&[ICONST_0, IRETURN, ICONST_1, IRETURN, 0x05, IRETURN]);
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 1, &code, None);
        let original = CodeBody::decode(&info, &pool).unwrap();

        let mut body = original.clone();
        body.insert_entry(vec![Insn::plain(NOP, &[])]);
        let out = body.encode(&pool).unwrap();
        // One byte of preamble, one byte less padding: the switch still ends at 24.
        assert_eq!(&out[8..12], &[NOP, ILOAD_0, TABLESWITCH, 0]);
        assert_eq!(&out[12..16], &22i32.to_be_bytes());

        let again = CodeBody::decode(&out, &pool).unwrap();
        assert_eq!(again.len(), original.len() + 1);
        assert_eq!(
            again.insns[2],
            Insn::TableSwitch {
                default: Label(3),
                low: 0,
                high: 1,
                targets: vec![Label(5), Label(7)],
            }
        );
    }

    #[test]
    fn test_branch_out_of_range() {
        // 0: goto 4   3: nop   4: return
        let code = [GOTO, 0x00, 0x04, NOP, RETURN];
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 0, &code, None);
        let mut body = CodeBody::decode(&info, &pool).unwrap();
        body.insert_before(1, vec![Insn::plain(NOP, &[]); 40_000]);
        assert!(matches!(
            body.encode(&pool),
            Err(SerializeError::BranchOutOfRange { offset: 0, delta: 40_004 })
        ));
    }

    #[test]
    fn test_code_too_large() {
        let code = [RETURN];
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 0, &code, None);
        let mut body = CodeBody::decode(&info, &pool).unwrap();
        body.insert_entry(vec![Insn::plain(NOP, &[]); 70_000]);
        assert_eq!(body.encode(&pool), Err(SerializeError::CodeTooLarge(70_001)));
    }

    #[test]
    fn test_branch_into_instruction_rejected() {
        let code = [GOTO, 0x00, 0x02, RETURN];
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 0, &code, None);
        assert_eq!(
            CodeBody::decode(&info, &pool),
            Err(ParseError::InvalidBranchTarget { offset: 0, target: 2 })
        );
    }

    #[test]
    fn test_invalid_opcode_rejected() {
        let code = [0xca, RETURN];
        let mut pool = ConstantPool::new();
        let info = code_attr(&mut pool, 0, &code, None);
        assert_eq!(
            CodeBody::decode(&info, &pool),
            Err(ParseError::InvalidOpcode { opcode: 0xca, offset: 0 })
        );
    }

    #[test]
    fn test_ldc_form_depends_on_index() {
        assert_eq!(Insn::ldc(7), Insn::plain(LDC, &[7]));
        assert_eq!(Insn::ldc(300), Insn::plain(LDC_W, &[0x01, 0x2c]));
        assert_eq!(Insn::ldc(300).ldc_index(), Some(300));
    }
}
