//! `inspect`: list a class file's methods and the probes it carries.

use std::path::Path;

use serde::Serialize;

use super::{report, CliError};
use crate::classfile::{ClassFile, CodeBody};
use crate::instrument::{find_probes, ProbeId};

#[derive(Debug, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
    /// Instruction count, `None` for methods without a body.
    pub instructions: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ClassReport {
    pub name: String,
    pub version: String,
    pub methods: Vec<MethodInfo>,
    pub probes: Vec<ProbeId>,
}

pub fn run_inspect(path: &Path, json: bool) -> i32 {
    report(inspect(path).and_then(|r| {
        if json {
            println!("{}", serde_json::to_string_pretty(&r)?);
        } else {
            print_report(&r);
        }
        Ok(())
    }))
}

pub fn inspect(path: &Path) -> Result<ClassReport, CliError> {
    let bytes = std::fs::read(path)?;
    let class = ClassFile::parse(&bytes)?;
    let pool = &class.constant_pool;

    let mut methods = Vec::with_capacity(class.methods.len());
    for method in &class.methods {
        let instructions = match method.attribute_position(pool, "Code") {
            Some(at) => Some(CodeBody::decode(&method.attributes[at].info, pool)?.len()),
            None => None,
        };
        methods.push(MethodInfo {
            name: method.name(pool)?.into_owned(),
            descriptor: method.descriptor(pool)?.into_owned(),
            access_flags: method.access_flags,
            instructions,
        });
    }

    Ok(ClassReport {
        name: class.name()?.replace('/', "."),
        version: format!("{}.{}", class.major_version, class.minor_version),
        probes: find_probes(&class)?,
        methods,
    })
}

fn print_report(r: &ClassReport) {
    println!("class {} (version {})", r.name, r.version);
    for m in &r.methods {
        match m.instructions {
            Some(n) => println!("  {}{} [{:#06x}] {} instructions", m.name, m.descriptor, m.access_flags, n),
            None => println!("  {}{} [{:#06x}] no code", m.name, m.descriptor, m.access_flags),
        }
    }
    println!("probes: {}", r.probes.len());
    for p in &r.probes {
        println!("  {}", p);
    }
}
