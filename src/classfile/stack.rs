//! Operand stack depth analysis.
//!
//! A worklist pass over the final instruction sequence. Each reachable
//! instruction is visited once with the depth it is entered with; exception
//! handlers are entered with the thrown exception on the stack.

use super::code::Insn;
use super::constant_pool::ConstantPool;
use super::opcodes::{self, fixed_stack_delta, is_jsr, is_terminal};
use super::{ParseError, SerializeError};

/// Slots taken by a value of this field descriptor.
pub fn field_slots(descriptor: &str) -> u32 {
    match descriptor.as_bytes().first() {
        Some(b'J') | Some(b'D') => 2,
        _ => 1,
    }
}

/// Argument and return slots of a method descriptor such as `(IJ[Ljava/lang/String;)D`.
pub fn method_slots(descriptor: &str) -> Option<(u32, u32)> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return None;
    }
    let mut i = 1;
    let mut args = 0;
    loop {
        match *bytes.get(i)? {
            b')' => break,
            b'J' | b'D' => {
                args += 2;
                i += 1;
            }
            b'B' | b'C' | b'F' | b'I' | b'S' | b'Z' => {
                args += 1;
                i += 1;
            }
            b'L' => {
                i += bytes[i..].iter().position(|b| *b == b';')? + 1;
                args += 1;
            }
            b'[' => {
                while bytes.get(i) == Some(&b'[') {
                    i += 1;
                }
                match *bytes.get(i)? {
                    b'L' => i += bytes[i..].iter().position(|b| *b == b';')? + 1,
                    _ => i += 1,
                }
                args += 1;
            }
            _ => return None,
        }
    }
    let ret = match *bytes.get(i + 1)? {
        b'V' => 0,
        b'J' | b'D' => 2,
        _ => 1,
    };
    Some((args, ret))
}

fn bad_descriptor(descriptor: &str) -> SerializeError {
    SerializeError::Constant(ParseError::Malformed(format!(
        "bad descriptor {}",
        descriptor
    )))
}

fn pool_index(operands: &[u8]) -> Result<u16, SerializeError> {
    match operands {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(SerializeError::MalformedInsn("missing constant pool index".into())),
    }
}

/// Net stack change of one instruction, in slots.
fn effect(insn: &Insn, pool: &ConstantPool) -> Result<i32, SerializeError> {
    let opcode = insn.effective_opcode();
    if let Some(delta) = fixed_stack_delta(opcode) {
        return Ok(delta);
    }
    let operands = match insn {
        Insn::Plain { operands, .. } => operands.as_slice(),
        // jsr: the return address only exists on the path into the subroutine.
        _ => return Ok(0),
    };

    let delta = match opcode {
        opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
            let field = pool.member_ref(pool_index(operands)?)?;
            let size = field_slots(&field.descriptor) as i32;
            match opcode {
                opcodes::GETSTATIC => size,
                opcodes::PUTSTATIC => -size,
                opcodes::GETFIELD => size - 1,
                _ => -size - 1,
            }
        }
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let method = pool.member_ref(pool_index(operands)?)?;
            let (args, ret) =
                method_slots(&method.descriptor).ok_or_else(|| bad_descriptor(&method.descriptor))?;
            let receiver = if opcode == opcodes::INVOKESTATIC { 0 } else { 1 };
            ret as i32 - args as i32 - receiver
        }
        opcodes::INVOKEDYNAMIC => {
            let descriptor = pool.invoke_dynamic_descriptor(pool_index(operands)?)?;
            let (args, ret) =
                method_slots(&descriptor).ok_or_else(|| bad_descriptor(&descriptor))?;
            ret as i32 - args as i32
        }
        opcodes::MULTIANEWARRAY => {
            let dims = operands.get(2).copied().unwrap_or(1) as i32;
            1 - dims
        }
        other => {
            return Err(SerializeError::MalformedInsn(format!(
                "no stack effect for opcode {:#04x}",
                other
            )))
        }
    };
    Ok(delta)
}

/// Maximum operand stack depth over all reachable instructions.
///
/// `label_flat` maps each label to its position in `flat`; `handlers` are
/// positions of exception handler entries.
pub(crate) fn max_stack(
    flat: &[&Insn],
    label_flat: &[usize],
    handlers: &[usize],
    pool: &ConstantPool,
) -> Result<u32, SerializeError> {
    let mut visited = vec![false; flat.len()];
    let mut work: Vec<(usize, i32)> = Vec::with_capacity(16);
    work.push((0, 0));
    work.extend(handlers.iter().map(|h| (*h, 1)));

    let target = |label: usize| -> Result<usize, SerializeError> {
        label_flat
            .get(label)
            .copied()
            .ok_or(SerializeError::UnknownLabel(label))
    };

    let mut max = 0i32;
    while let Some((i, depth)) = work.pop() {
        let Some(insn) = flat.get(i) else { continue };
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let after = (depth + effect(insn, pool)?).max(0);
        max = max.max(depth).max(after);

        match insn {
            Insn::Branch { opcode, target: t } => {
                if is_jsr(*opcode) {
                    max = max.max(depth + 1);
                    work.push((target(t.0)?, depth + 1));
                } else {
                    work.push((target(t.0)?, after));
                }
            }
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                for t in insn.targets() {
                    work.push((target(t.0)?, after));
                }
            }
            Insn::Plain { .. } => {}
        }

        if !is_terminal(insn.effective_opcode()) {
            work.push((i + 1, after));
        }
    }
    Ok(max as u32)
}
