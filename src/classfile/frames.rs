//! `StackMapTable` decoding and re-encoding.
//!
//! Frames are held against instruction labels. Offsets and deltas are derived
//! again from the final layout when the table is written.

use super::bytes::{put_u16, put_u8, Reader};
use super::code::Label;
use super::{count, ParseError, SerializeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Object created by the `new` instruction at this label.
    Uninitialized(Label),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub label: Label,
    pub kind: FrameKind,
}

/// Decode a `StackMapTable` payload. `label_at` maps a bytecode offset to the
/// label of the instruction starting there.
pub fn decode<F>(info: &[u8], label_at: F) -> Result<Vec<Frame>, ParseError>
where
    F: Fn(usize) -> Option<Label>,
{
    let mut r = Reader::new(info);
    let n = r.u16()? as usize;
    let mut frames = Vec::with_capacity(n);
    let mut offset: Option<usize> = None;

    for _ in 0..n {
        let frame_type = r.u8()?;
        let (delta, kind) = match frame_type {
            0..=63 => (frame_type as usize, FrameKind::Same),
            64..=127 => (
                (frame_type - 64) as usize,
                FrameKind::SameLocals1(read_type(&mut r, &label_at)?),
            ),
            247 => {
                let delta = r.u16()? as usize;
                (delta, FrameKind::SameLocals1(read_type(&mut r, &label_at)?))
            }
            248..=250 => (r.u16()? as usize, FrameKind::Chop(251 - frame_type)),
            251 => (r.u16()? as usize, FrameKind::Same),
            252..=254 => {
                let delta = r.u16()? as usize;
                let locals = read_types(&mut r, (frame_type - 251) as usize, &label_at)?;
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = r.u16()? as usize;
                let nl = r.u16()? as usize;
                let locals = read_types(&mut r, nl, &label_at)?;
                let ns = r.u16()? as usize;
                let stack = read_types(&mut r, ns, &label_at)?;
                (delta, FrameKind::Full { locals, stack })
            }
            other => return Err(ParseError::InvalidFrameType(other)),
        };

        let at = match offset {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        let label = label_at(at).ok_or(ParseError::InvalidFrameOffset(at))?;
        offset = Some(at);
        frames.push(Frame { label, kind });
    }

    if r.remaining() > 0 {
        return Err(ParseError::Malformed("trailing bytes in StackMapTable".into()));
    }
    Ok(frames)
}

fn read_types<F>(r: &mut Reader<'_>, n: usize, label_at: &F) -> Result<Vec<VerificationType>, ParseError>
where
    F: Fn(usize) -> Option<Label>,
{
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_type(r, label_at)?);
    }
    Ok(out)
}

fn read_type<F>(r: &mut Reader<'_>, label_at: &F) -> Result<VerificationType, ParseError>
where
    F: Fn(usize) -> Option<Label>,
{
    let tag = r.u8()?;
    let t = match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(r.u16()?),
        8 => {
            let at = r.u16()? as usize;
            VerificationType::Uninitialized(label_at(at).ok_or(ParseError::InvalidFrameOffset(at))?)
        }
        other => return Err(ParseError::InvalidVerificationType(other)),
    };
    Ok(t)
}

/// Encode frames against a final layout. `frame_offset` gives the offset a
/// jump to the label lands on; `insn_offset` gives the offset of the
/// instruction itself (used for `Uninitialized`).
pub fn encode<F, G>(frames: &[Frame], frame_offset: F, insn_offset: G) -> Result<Vec<u8>, SerializeError>
where
    F: Fn(Label) -> usize,
    G: Fn(Label) -> usize,
{
    let mut buf = Vec::with_capacity(2 + frames.len() * 4);
    put_u16(&mut buf, count(frames.len(), "stack map frames")?);
    let mut prev: Option<usize> = None;

    for frame in frames {
        let at = frame_offset(frame.label);
        let delta = match prev {
            None => at,
            Some(p) => at
                .checked_sub(p + 1)
                .ok_or(SerializeError::TooMany("overlapping stack map frames"))?,
        };
        prev = Some(at);
        let delta16 = u16::try_from(delta).map_err(|_| SerializeError::CodeTooLarge(at))?;

        match &frame.kind {
            FrameKind::Same if delta <= 63 => put_u8(&mut buf, delta as u8),
            FrameKind::Same => {
                put_u8(&mut buf, 251);
                put_u16(&mut buf, delta16);
            }
            FrameKind::SameLocals1(t) if delta <= 63 => {
                put_u8(&mut buf, 64 + delta as u8);
                write_type(&mut buf, t, &insn_offset)?;
            }
            FrameKind::SameLocals1(t) => {
                put_u8(&mut buf, 247);
                put_u16(&mut buf, delta16);
                write_type(&mut buf, t, &insn_offset)?;
            }
            FrameKind::Chop(k) => {
                put_u8(&mut buf, 251 - k);
                put_u16(&mut buf, delta16);
            }
            FrameKind::Append(locals) => {
                put_u8(&mut buf, 251 + locals.len() as u8);
                put_u16(&mut buf, delta16);
                for t in locals {
                    write_type(&mut buf, t, &insn_offset)?;
                }
            }
            FrameKind::Full { locals, stack } => {
                put_u8(&mut buf, 255);
                put_u16(&mut buf, delta16);
                put_u16(&mut buf, count(locals.len(), "frame locals")?);
                for t in locals {
                    write_type(&mut buf, t, &insn_offset)?;
                }
                put_u16(&mut buf, count(stack.len(), "frame stack entries")?);
                for t in stack {
                    write_type(&mut buf, t, &insn_offset)?;
                }
            }
        }
    }
    Ok(buf)
}

fn write_type<G>(buf: &mut Vec<u8>, t: &VerificationType, insn_offset: &G) -> Result<(), SerializeError>
where
    G: Fn(Label) -> usize,
{
    match t {
        VerificationType::Top => put_u8(buf, 0),
        VerificationType::Integer => put_u8(buf, 1),
        VerificationType::Float => put_u8(buf, 2),
        VerificationType::Double => put_u8(buf, 3),
        VerificationType::Long => put_u8(buf, 4),
        VerificationType::Null => put_u8(buf, 5),
        VerificationType::UninitializedThis => put_u8(buf, 6),
        VerificationType::Object(index) => {
            put_u8(buf, 7);
            put_u16(buf, *index);
        }
        VerificationType::Uninitialized(label) => {
            let at = insn_offset(*label);
            put_u8(buf, 8);
            put_u16(buf, u16::try_from(at).map_err(|_| SerializeError::CodeTooLarge(at))?);
        }
    }
    Ok(())
}
