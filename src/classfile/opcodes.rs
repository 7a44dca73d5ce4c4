//! Opcode constants and static per-opcode properties.

pub const NOP: u8 = 0x00;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_1: u8 = 0x04;
pub const BIPUSH: u8 = 0x10;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const ALOAD: u8 = 0x19;
pub const ILOAD_0: u8 = 0x1a;
pub const ILOAD_1: u8 = 0x1b;
pub const ILOAD_2: u8 = 0x1c;
pub const ALOAD_0: u8 = 0x2a;
pub const ISTORE: u8 = 0x36;
pub const ASTORE: u8 = 0x3a;
pub const ISTORE_2: u8 = 0x3d;
pub const ASTORE_2: u8 = 0x4d;
pub const IADD: u8 = 0x60;
pub const IDIV: u8 = 0x6c;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPLE: u8 = 0xa4;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const ATHROW: u8 = 0xbf;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// How an opcode's operands are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Fixed number of operand bytes copied verbatim.
    Fixed(usize),
    /// Signed 16-bit branch displacement.
    Branch16,
    /// Signed 32-bit branch displacement.
    Branch32,
    TableSwitch,
    LookupSwitch,
    /// `wide` prefix; operand length depends on the modified opcode.
    Wide,
}

/// Operand shape, or `None` for opcodes that may not appear in a class file.
pub fn shape(opcode: u8) -> Option<Shape> {
    let s = match opcode {
        0x00..=0x0f => Shape::Fixed(0),
        BIPUSH | LDC => Shape::Fixed(1),
        0x11 | LDC_W | LDC2_W => Shape::Fixed(2),
        ILOAD..=ALOAD => Shape::Fixed(1),
        0x1a..=0x35 => Shape::Fixed(0),
        ISTORE..=ASTORE => Shape::Fixed(1),
        0x3b..=0x83 => Shape::Fixed(0),
        IINC => Shape::Fixed(2),
        0x85..=0x98 => Shape::Fixed(0),
        IFEQ..=JSR => Shape::Branch16,
        RET => Shape::Fixed(1),
        TABLESWITCH => Shape::TableSwitch,
        LOOKUPSWITCH => Shape::LookupSwitch,
        IRETURN..=RETURN => Shape::Fixed(0),
        GETSTATIC..=INVOKESTATIC => Shape::Fixed(2),
        INVOKEINTERFACE | INVOKEDYNAMIC => Shape::Fixed(4),
        NEW => Shape::Fixed(2),
        0xbc => Shape::Fixed(1),
        0xbd => Shape::Fixed(2),
        0xbe | ATHROW => Shape::Fixed(0),
        0xc0 | 0xc1 => Shape::Fixed(2),
        0xc2 | 0xc3 => Shape::Fixed(0),
        WIDE => Shape::Wide,
        MULTIANEWARRAY => Shape::Fixed(3),
        IFNULL | IFNONNULL => Shape::Branch16,
        GOTO_W | JSR_W => Shape::Branch32,
        _ => return None,
    };
    Some(s)
}

/// Operand bytes following `wide`, including the modified opcode.
pub fn wide_operand_len(inner: u8) -> Option<usize> {
    match inner {
        IINC => Some(5),
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Some(3),
        _ => None,
    }
}

/// Control does not fall through to the next instruction.
pub fn is_terminal(opcode: u8) -> bool {
    matches!(
        opcode,
        GOTO | GOTO_W | RET | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN | ATHROW
    )
}

pub fn is_jsr(opcode: u8) -> bool {
    matches!(opcode, JSR | JSR_W)
}

/// Net operand stack change in slots for opcodes whose effect does not depend
/// on the constant pool. `None` for field access, invocations,
/// `multianewarray`, `wide` and the subroutine and switch opcodes handled
/// separately by the stack analysis.
pub fn fixed_stack_delta(opcode: u8) -> Option<i32> {
    let d = match opcode {
        0x00 => 0,
        0x01..=0x08 => 1,
        0x09 | 0x0a => 2,
        0x0b..=0x0d => 1,
        0x0e | 0x0f => 2,
        0x10..=0x13 => 1,
        0x14 => 2,
        0x15 | 0x17 | 0x19 => 1,
        0x16 | 0x18 => 2,
        0x1a..=0x1d => 1,
        0x1e..=0x21 => 2,
        0x22..=0x25 => 1,
        0x26..=0x29 => 2,
        0x2a..=0x2d => 1,
        0x2e | 0x30 | 0x32..=0x35 => -1,
        0x2f | 0x31 => 0,
        0x36 | 0x38 | 0x3a => -1,
        0x37 | 0x39 => -2,
        0x3b..=0x3e => -1,
        0x3f..=0x42 => -2,
        0x43..=0x46 => -1,
        0x47..=0x4a => -2,
        0x4b..=0x4e => -1,
        0x4f | 0x51 | 0x53..=0x56 => -3,
        0x50 | 0x52 => -4,
        0x57 => -1,
        0x58 => -2,
        0x59..=0x5b => 1,
        0x5c..=0x5e => 2,
        0x5f => 0,
        // Arithmetic: int and float forms pop one slot, long and double two.
        0x60..=0x73 => match (opcode - 0x60) % 4 {
            0 | 2 => -1,
            _ => -2,
        },
        0x74..=0x77 => 0,
        0x78..=0x7d => -1,
        0x7e | 0x80 | 0x82 => -1,
        0x7f | 0x81 | 0x83 => -2,
        0x84 => 0,
        0x85 | 0x87 | 0x8c | 0x8d => 1,
        0x86 | 0x8a | 0x8b | 0x8f | 0x91..=0x93 => 0,
        0x88 | 0x89 | 0x8e | 0x90 => -1,
        0x94 | 0x97 | 0x98 => -3,
        0x95 | 0x96 => -1,
        0x99..=0x9e => -1,
        0x9f..=0xa6 => -2,
        GOTO | GOTO_W => 0,
        RET => 0,
        TABLESWITCH | LOOKUPSWITCH => -1,
        IRETURN..=RETURN => 0,
        NEW => 1,
        0xbc..=0xbe => 0,
        ATHROW => 0,
        0xc0 | 0xc1 => 0,
        0xc2 | 0xc3 => -1,
        IFNULL | IFNONNULL => -1,
        _ => return None,
    };
    Some(d)
}
