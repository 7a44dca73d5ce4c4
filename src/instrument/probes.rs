//! Coverage probe injection.
//!
//! A probe is two instructions, `ldc "<probe id>"` followed by
//! `invokestatic ProbeRecorder.hit(String)`. The pair leaves the operand stack
//! as it found it and touches no locals, so existing stack map frames stay
//! valid wherever a probe is placed.
//!
//! Sites are numbered per method: 0 is the method entry, then every branch
//! target in code order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classfile::{
    ClassFile, CodeBody, Constant, ConstantPool, Insn, ParseError, SerializeError, ACC_ABSTRACT,
    ACC_BRIDGE, ACC_NATIVE,
};

use super::EngineError;

/// Runtime support class receiving probe hits.
pub const RECORDER_CLASS: &str = "coverage/agent/runtime/ProbeRecorder";
pub const RECORDER_METHOD: &str = "hit";
pub const RECORDER_DESCRIPTOR: &str = "(Ljava/lang/String;)V";

/// Stable identity of one probe site: `unit#method#site`, where `method` is
/// the method name immediately followed by its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeId {
    pub unit: String,
    pub method: String,
    pub site: u32,
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}", self.unit, self.method, self.site)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed probe id: {0}")]
pub struct ProbeIdError(String);

impl FromStr for ProbeId {
    type Err = ProbeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProbeIdError(s.to_string());
        let (unit, rest) = s.split_once('#').ok_or_else(malformed)?;
        let (method, site) = rest.rsplit_once('#').ok_or_else(malformed)?;
        if unit.is_empty() || method.is_empty() {
            return Err(malformed());
        }
        Ok(ProbeId {
            unit: unit.to_string(),
            method: method.to_string(),
            site: site.parse().map_err(|_| malformed())?,
        })
    }
}

/// Result of injecting one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionReport {
    pub methods: usize,
    pub probes: usize,
}

/// Methods that never receive probes.
const SKIPPED: u16 = ACC_ABSTRACT | ACC_NATIVE | ACC_BRIDGE;

/// Inserts probes into every eligible method body of a class.
#[derive(Debug, Clone)]
pub struct ProbeInjector<'a> {
    unit: &'a str,
}

impl<'a> ProbeInjector<'a> {
    /// `unit` is the name embedded in every probe id.
    pub fn new(unit: &'a str) -> Self {
        Self { unit }
    }

    pub fn inject(&self, class: &mut ClassFile) -> Result<InjectionReport, EngineError> {
        let mut report = InjectionReport::default();
        let mut recorder: Option<u16> = None;

        for i in 0..class.methods.len() {
            let pool = &class.constant_pool;
            let method = &class.methods[i];
            if method.access_flags & SKIPPED != 0 {
                continue;
            }
            let Some(code_at) = method.attribute_position(pool, "Code") else {
                continue;
            };
            let key = format!("{}{}", method.name(pool)?, method.descriptor(pool)?);
            let mut body = CodeBody::decode(&method.attributes[code_at].info, pool)?;
            let targets = body.branch_targets();

            let pool = &mut class.constant_pool;
            let hit = match recorder {
                Some(index) => index,
                None => {
                    let index =
                        pool.add_method_ref(RECORDER_CLASS, RECORDER_METHOD, RECORDER_DESCRIPTOR)?;
                    recorder = Some(index);
                    index
                }
            };

            body.insert_entry(self.probe(pool, &key, 0, hit)?);
            let mut site = 1;
            for target in targets {
                body.insert_before(target, self.probe(pool, &key, site, hit)?);
                site += 1;
            }

            class.methods[i].attributes[code_at].info = body.encode(&class.constant_pool)?;
            report.methods += 1;
            report.probes += site as usize;
            tracing::trace!(unit = self.unit, method = %key, probes = site, "method instrumented");
        }
        Ok(report)
    }

    fn probe(
        &self,
        pool: &mut ConstantPool,
        method: &str,
        site: u32,
        recorder: u16,
    ) -> Result<Vec<Insn>, SerializeError> {
        let id = ProbeId {
            unit: self.unit.to_string(),
            method: method.to_string(),
            site,
        };
        let text = pool.add_string(&id.to_string())?;
        Ok(vec![Insn::ldc(text), Insn::invokestatic(recorder)])
    }
}

fn is_recorder_call(pool: &ConstantPool, insn: &Insn) -> bool {
    let Some(index) = insn.invokestatic_index() else {
        return false;
    };
    matches!(
        pool.member_ref(index),
        Ok(m) if m.class == RECORDER_CLASS && m.name == RECORDER_METHOD && m.descriptor == RECORDER_DESCRIPTOR
    )
}

fn probe_text(pool: &ConstantPool, insn: &Insn) -> Option<String> {
    match pool.get(insn.ldc_index()?) {
        Ok(Constant::String(utf8)) => pool.utf8(*utf8).ok().map(|s| s.into_owned()),
        _ => None,
    }
}

/// Probe ids present in a class, in method and code order.
pub fn find_probes(class: &ClassFile) -> Result<Vec<ProbeId>, ParseError> {
    let pool = &class.constant_pool;
    let mut found = Vec::new();
    for method in &class.methods {
        let Some(code_at) = method.attribute_position(pool, "Code") else {
            continue;
        };
        let body = CodeBody::decode(&method.attributes[code_at].info, pool)?;
        for pair in body.insns.windows(2) {
            if !is_recorder_call(pool, &pair[1]) {
                continue;
            }
            if let Some(id) = probe_text(pool, &pair[0]).and_then(|t| t.parse().ok()) {
                found.push(id);
            }
        }
    }
    Ok(found)
}
