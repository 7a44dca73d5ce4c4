//! Constant pool arena.
//!
//! Entries keep their on-disk index for the lifetime of the parsed class. New
//! constants are only ever appended, so indices referenced by existing code
//! stay valid after rewriting.

use std::borrow::Cow;

use super::bytes::{put_u16, put_u32, put_u64, put_u8, Reader};
use super::{ParseError, SerializeError};

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// One constant pool entry. `Utf8` keeps the raw modified UTF-8 bytes so that
/// unmodified pools re-serialize byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Slot 0 and the second slot of `Long`/`Double`.
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl Constant {
    fn slots(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: Cow<'a, str>,
    pub name: Cow<'a, str>,
    pub descriptor: Cow<'a, str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let count = r.u16()? as usize;
        if count == 0 {
            return Err(ParseError::Malformed("constant pool count is zero".into()));
        }
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let index = entries.len();
            let tag = r.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(r.bytes(len)?.to_vec())
                }
                TAG_INTEGER => Constant::Integer(r.i32()?),
                TAG_FLOAT => Constant::Float(r.u32()?),
                TAG_LONG => Constant::Long(r.u64()?),
                TAG_DOUBLE => Constant::Double(r.u64()?),
                TAG_CLASS => Constant::Class(r.u16()?),
                TAG_STRING => Constant::String(r.u16()?),
                TAG_FIELDREF => Constant::FieldRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_METHODREF => Constant::MethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name: r.u16()?,
                    descriptor: r.u16()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    kind: r.u8()?,
                    reference: r.u16()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType(r.u16()?),
                TAG_DYNAMIC => Constant::Dynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_MODULE => Constant::Module(r.u16()?),
                TAG_PACKAGE => Constant::Package(r.u16()?),
                other => return Err(ParseError::BadConstantTag { index, tag: other }),
            };
            let wide = constant.slots() == 2;
            entries.push(constant);
            if wide {
                if entries.len() >= count {
                    return Err(ParseError::Malformed(format!(
                        "8-byte constant at index {} overruns the pool",
                        index
                    )));
                }
                entries.push(Constant::Unusable);
            }
        }

        Ok(Self { entries })
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<(), SerializeError> {
        let count = u16::try_from(self.entries.len())
            .map_err(|_| SerializeError::ConstantPoolOverflow)?;
        put_u16(buf, count);
        for constant in self.entries.iter().skip(1) {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    let len = u16::try_from(bytes.len())
                        .map_err(|_| SerializeError::StringTooLong(bytes.len()))?;
                    put_u8(buf, TAG_UTF8);
                    put_u16(buf, len);
                    buf.extend_from_slice(bytes);
                }
                Constant::Integer(v) => {
                    put_u8(buf, TAG_INTEGER);
                    put_u32(buf, *v as u32);
                }
                Constant::Float(bits) => {
                    put_u8(buf, TAG_FLOAT);
                    put_u32(buf, *bits);
                }
                Constant::Long(bits) => {
                    put_u8(buf, TAG_LONG);
                    put_u64(buf, *bits);
                }
                Constant::Double(bits) => {
                    put_u8(buf, TAG_DOUBLE);
                    put_u64(buf, *bits);
                }
                Constant::Class(i) => {
                    put_u8(buf, TAG_CLASS);
                    put_u16(buf, *i);
                }
                Constant::String(i) => {
                    put_u8(buf, TAG_STRING);
                    put_u16(buf, *i);
                }
                Constant::FieldRef { class, name_and_type } => {
                    put_u8(buf, TAG_FIELDREF);
                    put_u16(buf, *class);
                    put_u16(buf, *name_and_type);
                }
                Constant::MethodRef { class, name_and_type } => {
                    put_u8(buf, TAG_METHODREF);
                    put_u16(buf, *class);
                    put_u16(buf, *name_and_type);
                }
                Constant::InterfaceMethodRef { class, name_and_type } => {
                    put_u8(buf, TAG_INTERFACE_METHODREF);
                    put_u16(buf, *class);
                    put_u16(buf, *name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    put_u8(buf, TAG_NAME_AND_TYPE);
                    put_u16(buf, *name);
                    put_u16(buf, *descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    put_u8(buf, TAG_METHOD_HANDLE);
                    put_u8(buf, *kind);
                    put_u16(buf, *reference);
                }
                Constant::MethodType(i) => {
                    put_u8(buf, TAG_METHOD_TYPE);
                    put_u16(buf, *i);
                }
                Constant::Dynamic { bootstrap, name_and_type } => {
                    put_u8(buf, TAG_DYNAMIC);
                    put_u16(buf, *bootstrap);
                    put_u16(buf, *name_and_type);
                }
                Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    put_u8(buf, TAG_INVOKE_DYNAMIC);
                    put_u16(buf, *bootstrap);
                    put_u16(buf, *name_and_type);
                }
                Constant::Module(i) => {
                    put_u8(buf, TAG_MODULE);
                    put_u16(buf, *i);
                }
                Constant::Package(i) => {
                    put_u8(buf, TAG_PACKAGE);
                    put_u16(buf, *i);
                }
            }
        }
        Ok(())
    }

    /// Number of slots including the unusable slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ParseError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ParseError::BadConstantIndex(index)),
            Some(c) => Ok(c),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<Cow<'_, str>, ParseError> {
        match self.get(index)? {
            Constant::Utf8(bytes) => Ok(decode_modified_utf8(bytes)),
            _ => Err(ParseError::UnexpectedConstant { index, expected: "Utf8" }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>, ParseError> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ParseError::UnexpectedConstant { index, expected: "Class" }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(Cow<'_, str>, Cow<'_, str>), ParseError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ParseError::UnexpectedConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a field, method or interface method reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ParseError> {
        let (class, nat) = match self.get(index)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => (*class, *name_and_type),
            _ => {
                return Err(ParseError::UnexpectedConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(nat)?;
        Ok(MemberRef {
            class: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    /// Descriptor of an `InvokeDynamic` call site.
    pub fn invoke_dynamic_descriptor(&self, index: u16) -> Result<Cow<'_, str>, ParseError> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. } => {
                Ok(self.name_and_type(*name_and_type)?.1)
            }
            _ => Err(ParseError::UnexpectedConstant {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    fn find(&self, constant: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| c == constant)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// Append a constant, reusing an identical existing entry.
    pub fn add(&mut self, constant: Constant) -> Result<u16, SerializeError> {
        if let Some(index) = self.find(&constant) {
            return Ok(index);
        }
        let index = self.entries.len();
        if index + constant.slots() > u16::MAX as usize {
            return Err(SerializeError::ConstantPoolOverflow);
        }
        let wide = constant.slots() == 2;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16, SerializeError> {
        let bytes = encode_modified_utf8(value);
        if bytes.len() > u16::MAX as usize {
            return Err(SerializeError::StringTooLong(bytes.len()));
        }
        self.add(Constant::Utf8(bytes))
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, SerializeError> {
        let name = self.add_utf8(internal_name)?;
        self.add(Constant::Class(name))
    }

    pub fn add_string(&mut self, value: &str) -> Result<u16, SerializeError> {
        let utf8 = self.add_utf8(value)?;
        self.add(Constant::String(utf8))
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, SerializeError> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    pub fn add_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, SerializeError> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::MethodRef { class, name_and_type })
    }
}

/// Encode to the JVM's modified UTF-8 (NUL as two bytes, supplementary
/// characters as surrogate pairs).
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8. Plain ASCII borrows; malformed sequences are replaced.
pub fn decode_modified_utf8(bytes: &[u8]) -> Cow<'_, str> {
    if bytes.iter().all(|b| *b != 0 && *b < 0x80) {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return Cow::Borrowed(s);
        }
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b < 0x80 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xe0 == 0xc0 && i + 1 < bytes.len() {
            units.push((((b & 0x1f) as u16) << 6) | (bytes[i + 1] & 0x3f) as u16);
            i += 2;
        } else if b & 0xf0 == 0xe0 && i + 2 < bytes.len() {
            units.push(
                (((b & 0x0f) as u16) << 12)
                    | (((bytes[i + 1] & 0x3f) as u16) << 6)
                    | (bytes[i + 2] & 0x3f) as u16,
            );
            i += 3;
        } else {
            units.push(0xfffd);
            i += 1;
        }
    }
    Cow::Owned(String::from_utf16_lossy(&units))
}
