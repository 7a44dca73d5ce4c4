//! Class-file fixtures shared by the integration tests.
//!
//! `sample_class` assembles `com.acme.Sample` (class file version 52) by hand:
//!
//! ```java
//! public class Sample {
//!     public Sample() {}
//!     static int max(int a, int b) { if (a > b) return a; return b; }
//!     static int sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }
//!     static int safeDiv(int a, int b) {
//!         try { return a / b; } catch (ArithmeticException e) { return 0; }
//!     }
//!     static int classify(int k) {
//!         switch (k) { case 0: return 1; case 1: return 2; default: return 0; }
//!     }
//!     static native void nativeCall();
//! }
//! ```

#![allow(dead_code)]

use coverage_agent::classfile::{Attribute, ClassFile, CodeBody, ConstantPool, Member};

pub const SAMPLE: &str = "com/acme/Sample";

/// Probes the injector places in `sample_class`, per method.
pub const EXPECTED_PROBES: &[(&str, usize)] = &[
    ("<init>()V", 1),
    ("max(II)I", 2),
    ("sum(I)I", 3),
    ("safeDiv(II)I", 2),
    ("classify(I)I", 4),
];

pub fn expected_probe_total() -> usize {
    EXPECTED_PROBES.iter().map(|(_, n)| n).sum()
}

const ACC_PUBLIC: u16 = 0x0001;
const ACC_STATIC: u16 = 0x0008;
const ACC_SUPER: u16 = 0x0020;
const ACC_NATIVE: u16 = 0x0100;

fn u16be(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn u32be(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn attribute(pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> Attribute {
    Attribute {
        name_index: pool.add_utf8(name).unwrap(),
        info,
    }
}

/// Payload of a `Code` attribute.
fn code(
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
    handlers: &[(u16, u16, u16, u16)],
    attributes: &[Attribute],
) -> Vec<u8> {
    let mut buf = Vec::new();
    u16be(&mut buf, max_stack);
    u16be(&mut buf, max_locals);
    u32be(&mut buf, bytecode.len() as u32);
    buf.extend_from_slice(bytecode);
    u16be(&mut buf, handlers.len() as u16);
    for (start, end, handler, catch_type) in handlers {
        u16be(&mut buf, *start);
        u16be(&mut buf, *end);
        u16be(&mut buf, *handler);
        u16be(&mut buf, *catch_type);
    }
    u16be(&mut buf, attributes.len() as u16);
    for a in attributes {
        u16be(&mut buf, a.name_index);
        u32be(&mut buf, a.info.len() as u32);
        buf.extend_from_slice(&a.info);
    }
    buf
}

fn method(pool: &mut ConstantPool, flags: u16, name: &str, descriptor: &str, code_info: Option<Vec<u8>>) -> Member {
    let attributes = match code_info {
        Some(info) => vec![attribute(pool, "Code", info)],
        None => Vec::new(),
    };
    Member {
        access_flags: flags,
        name_index: pool.add_utf8(name).unwrap(),
        descriptor_index: pool.add_utf8(descriptor).unwrap(),
        attributes,
    }
}

fn stack_map(pool: &mut ConstantPool, frames: &[&[u8]]) -> Attribute {
    let mut info = Vec::new();
    u16be(&mut info, frames.len() as u16);
    for f in frames {
        info.extend_from_slice(f);
    }
    attribute(pool, "StackMapTable", info)
}

/// `com.acme.Sample` under the given internal name.
pub fn sample_class_named(internal_name: &str) -> Vec<u8> {
    let mut pool = ConstantPool::new();
    let this_class = pool.add_class(internal_name).unwrap();
    let super_class = pool.add_class("java/lang/Object").unwrap();
    let object_init = pool.add_method_ref("java/lang/Object", "<init>", "()V").unwrap();
    let arithmetic = pool.add_class("java/lang/ArithmeticException").unwrap();

    let mut methods = Vec::new();

    // aload_0; invokespecial Object.<init>; return
    let [hi, lo] = object_init.to_be_bytes();
    let init = code(1, 1, &[0x2a, 0xb7, hi, lo, 0xb1], &[], &[]);
    methods.push(method(&mut pool, ACC_PUBLIC, "<init>", "()V", Some(init)));

    //  0: iload_0  1: iload_1  2: if_icmple 7  5: iload_0  6: ireturn
    //  7: iload_1  8: ireturn
    let mut lines = Vec::new();
    u16be(&mut lines, 3);
    for (pc, line) in [(0u16, 3u16), (5, 3), (7, 3)] {
        u16be(&mut lines, pc);
        u16be(&mut lines, line);
    }
    let line_table = attribute(&mut pool, "LineNumberTable", lines);
    let frames = stack_map(&mut pool, &[&[7]]);
    let max = code(
        2,
        2,
        &[0x1a, 0x1b, 0xa4, 0x00, 0x05, 0x1a, 0xac, 0x1b, 0xac],
        &[],
        &[line_table, frames],
    );
    methods.push(method(&mut pool, ACC_STATIC, "max", "(II)I", Some(max)));

    //  0: iconst_0  1: istore_1  2: iconst_0  3: istore_2
    //  4: iload_2  5: iload_0  6: if_icmpge 19
    //  9: iload_1 10: iload_2 11: iadd 12: istore_1 13: iinc 2 1 16: goto 4
    // 19: iload_1 20: ireturn
    let frames = stack_map(
        &mut pool,
        &[&[253, 0x00, 0x04, 0x01, 0x01], &[250, 0x00, 0x0e]],
    );
    let sum = code(
        2,
        3,
        &[
            0x03, 0x3c, 0x03, 0x3d, 0x1c, 0x1a, 0xa2, 0x00, 0x0d, 0x1b, 0x1c, 0x60, 0x3c, 0x84,
            0x02, 0x01, 0xa7, 0xff, 0xf4, 0x1b, 0xac,
        ],
        &[],
        &[frames],
    );
    methods.push(method(&mut pool, ACC_STATIC, "sum", "(I)I", Some(sum)));

    //  0: iload_0  1: iload_1  2: idiv  3: ireturn
    //  4: astore_2  5: iconst_0  6: ireturn      [0, 4) -> 4 ArithmeticException
    let [ahi, alo] = arithmetic.to_be_bytes();
    let frames = stack_map(&mut pool, &[&[68, 0x07, ahi, alo]]);
    let safe_div = code(
        2,
        3,
        &[0x1a, 0x1b, 0x6c, 0xac, 0x4d, 0x03, 0xac],
        &[(0, 4, 4, arithmetic)],
        &[frames],
    );
    methods.push(method(&mut pool, ACC_STATIC, "safeDiv", "(II)I", Some(safe_div)));

    //  0: iload_0  1: tableswitch (pad 2) default 28, [0, 1] -> 24, 26
    // 24: iconst_1 25: ireturn 26: iconst_2 27: ireturn 28: iconst_0 29: ireturn
    let mut switch = vec![0x1a, 0xaa, 0x00, 0x00];
    for v in [27i32, 0, 1, 23, 25] {
        switch.extend_from_slice(&v.to_be_bytes());
    }
    switch.extend_from_slice(&[0x04, 0xac, 0x05, 0xac, 0x03, 0xac]);
    let frames = stack_map(&mut pool, &[&[24], &[1], &[1]]);
    let classify = code(1, 1, &switch, &[], &[frames]);
    methods.push(method(&mut pool, ACC_STATIC, "classify", "(I)I", Some(classify)));

    methods.push(method(&mut pool, ACC_STATIC | ACC_NATIVE, "nativeCall", "()V", None));

    let source = pool.add_utf8("Sample.java").unwrap();
    let mut source_info = Vec::new();
    u16be(&mut source_info, source);
    let source_file = attribute(&mut pool, "SourceFile", source_info);

    ClassFile {
        minor_version: 0,
        major_version: 52,
        constant_pool: pool,
        access_flags: ACC_PUBLIC | ACC_SUPER,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
        attributes: vec![source_file],
    }
    .to_bytes()
    .unwrap()
}

pub fn sample_class() -> Vec<u8> {
    sample_class_named(SAMPLE)
}

/// Decoded body of the named method (name without descriptor).
pub fn method_body(bytes: &[u8], name: &str) -> CodeBody {
    let class = ClassFile::parse(bytes).unwrap();
    let pool = &class.constant_pool;
    let method = class
        .methods
        .iter()
        .find(|m| m.name(pool).unwrap() == name)
        .unwrap_or_else(|| panic!("no method {name}"));
    let at = method.attribute_position(pool, "Code").unwrap();
    CodeBody::decode(&method.attributes[at].info, pool).unwrap()
}
