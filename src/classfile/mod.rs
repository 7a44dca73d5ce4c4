//! Class-file reader and writer.
//!
//! Parsing keeps everything the rewriter does not touch in its on-disk form:
//! `Utf8` constants as raw bytes, attributes as opaque payloads. A class that
//! is parsed and written back without modification is byte-identical to the
//! input. Method bodies are decoded into an editable form on demand (see
//! [`code::CodeBody`]).

mod bytes;
pub mod code;
pub mod constant_pool;
pub mod frames;
pub mod opcodes;
pub mod stack;

use std::borrow::Cow;

use thiserror::Error;

use bytes::{put_u16, put_u32, Reader};
pub use code::{CodeBody, ExceptionHandler, Insn, Label};
pub use constant_pool::{Constant, ConstantPool, MemberRef};

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// Errors raised while reading a class file or a method body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("truncated input at offset {offset}, needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("constant pool index {0} is out of range or unusable")]
    BadConstantIndex(u16),

    #[error("unknown constant tag {tag} at index {index}")]
    BadConstantTag { index: usize, tag: u8 },

    #[error("constant {index} is not a {expected}")]
    UnexpectedConstant { index: u16, expected: &'static str },

    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    #[error("branch at offset {offset} targets {target}, not an instruction boundary")]
    InvalidBranchTarget { offset: usize, target: i64 },

    #[error("offset {0} in method metadata is not an instruction boundary")]
    InvalidFrameOffset(usize),

    #[error("unknown stack map frame type {0}")]
    InvalidFrameType(u8),

    #[error("unknown verification type tag {0}")]
    InvalidVerificationType(u8),

    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),

    #[error("malformed class file: {0}")]
    Malformed(String),
}

/// Errors raised while regenerating binary form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,

    #[error("string of {0} bytes exceeds the Utf8 constant limit")]
    StringTooLong(usize),

    #[error("method body of {0} bytes exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    #[error("branch at offset {offset} needs displacement {delta}, outside 16-bit range")]
    BranchOutOfRange { offset: usize, delta: i64 },

    #[error("operand stack depth {0} exceeds 65535")]
    StackTooDeep(u32),

    #[error("too many {0}")]
    TooMany(&'static str),

    #[error("attribute of {0} bytes is too large")]
    AttributeTooLarge(usize),

    #[error("label {0} does not name an instruction")]
    UnknownLabel(usize),

    #[error("malformed instruction: {0}")]
    MalformedInsn(String),

    #[error("cannot resolve constant: {0}")]
    Constant(#[from] ParseError),
}

/// Named attribute with an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl Attribute {
    fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let name_index = r.u16()?;
        let len = r.u32()? as usize;
        let info = r.bytes(len)?.to_vec();
        Ok(Self { name_index, info })
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<(), SerializeError> {
        let len = u32::try_from(self.info.len())
            .map_err(|_| SerializeError::AttributeTooLarge(self.info.len()))?;
        put_u16(buf, self.name_index);
        put_u32(buf, len);
        buf.extend_from_slice(&self.info);
        Ok(())
    }

    pub fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        matches!(pool.utf8(self.name_index), Ok(n) if n == name)
    }
}

/// A field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Member {
    fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let access_flags = r.u16()?;
        let name_index = r.u16()?;
        let descriptor_index = r.u16()?;
        let attributes = parse_attributes(r)?;
        Ok(Self {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<(), SerializeError> {
        put_u16(buf, self.access_flags);
        put_u16(buf, self.name_index);
        put_u16(buf, self.descriptor_index);
        write_attributes(buf, &self.attributes)
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>, ParseError> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>, ParseError> {
        pool.utf8(self.descriptor_index)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.access_flags & flag != 0
    }

    /// Position of the first attribute with this name.
    pub fn attribute_position(&self, pool: &ConstantPool, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.is_named(pool, name))
    }
}

/// A parsed class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(data);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ParseError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let constant_pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;

        let count = r.u16()? as usize;
        let mut interfaces = Vec::with_capacity(count);
        for _ in 0..count {
            interfaces.push(r.u16()?);
        }

        let fields = parse_members(&mut r)?;
        let methods = parse_members(&mut r)?;
        let attributes = parse_attributes(&mut r)?;

        if r.remaining() > 0 {
            return Err(ParseError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        let mut buf = Vec::with_capacity(1024);
        put_u32(&mut buf, MAGIC);
        put_u16(&mut buf, self.minor_version);
        put_u16(&mut buf, self.major_version);
        self.constant_pool.write(&mut buf)?;
        put_u16(&mut buf, self.access_flags);
        put_u16(&mut buf, self.this_class);
        put_u16(&mut buf, self.super_class);

        put_u16(&mut buf, count(self.interfaces.len(), "interfaces")?);
        for i in &self.interfaces {
            put_u16(&mut buf, *i);
        }

        put_u16(&mut buf, count(self.fields.len(), "fields")?);
        for f in &self.fields {
            f.write(&mut buf)?;
        }
        put_u16(&mut buf, count(self.methods.len(), "methods")?);
        for m in &self.methods {
            m.write(&mut buf)?;
        }
        write_attributes(&mut buf, &self.attributes)?;
        Ok(buf)
    }

    /// Internal (slash-separated) name of this class.
    pub fn name(&self) -> Result<Cow<'_, str>, ParseError> {
        self.constant_pool.class_name(self.this_class)
    }
}

fn parse_members(r: &mut Reader<'_>) -> Result<Vec<Member>, ParseError> {
    let n = r.u16()? as usize;
    let mut members = Vec::with_capacity(n);
    for _ in 0..n {
        members.push(Member::parse(r)?);
    }
    Ok(members)
}

pub(crate) fn parse_attributes(r: &mut Reader<'_>) -> Result<Vec<Attribute>, ParseError> {
    let n = r.u16()? as usize;
    let mut attributes = Vec::with_capacity(n);
    for _ in 0..n {
        attributes.push(Attribute::parse(r)?);
    }
    Ok(attributes)
}

pub(crate) fn write_attributes(
    buf: &mut Vec<u8>,
    attributes: &[Attribute],
) -> Result<(), SerializeError> {
    put_u16(buf, count(attributes.len(), "attributes")?);
    for a in attributes {
        a.write(buf)?;
    }
    Ok(())
}

pub(crate) fn count(len: usize, what: &'static str) -> Result<u16, SerializeError> {
    u16::try_from(len).map_err(|_| SerializeError::TooMany(what))
}
