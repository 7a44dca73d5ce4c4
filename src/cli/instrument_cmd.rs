//! `instrument`: strict transform of one class file.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::{report, CliError};
use crate::classfile::ClassFile;
use crate::filter::TargetFilter;
use crate::instrument::{Decision, InstrumentationEngine};
use crate::policy::ExclusionPolicy;

#[derive(Debug, Serialize)]
struct Summary<'a> {
    unit: &'a str,
    #[serde(flatten)]
    decision: Decision,
    rewritten: bool,
    bytes_in: usize,
    bytes_out: usize,
}

/// Options for [`run_instrument`].
#[derive(Debug, Clone)]
pub struct InstrumentArgs<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub prefixes: &'a str,
    /// Unit name; read from the class file when `None`.
    pub name: Option<&'a str>,
    pub exclusions: &'a [String],
}

pub fn run_instrument(args: &InstrumentArgs<'_>) -> i32 {
    report(instrument(args).map(|summary| println!("{}", summary)))
}

/// Transform `input` and write the result to `output`; returns a JSON summary.
pub fn instrument(args: &InstrumentArgs<'_>) -> Result<String, CliError> {
    let bytes = std::fs::read(args.input)?;
    let name = match args.name {
        Some(name) => name.to_string(),
        None => ClassFile::parse(&bytes)?.name()?.into_owned(),
    };

    let filter = Arc::new(TargetFilter::new(args.prefixes)?);
    let engine = InstrumentationEngine::new(filter, ExclusionPolicy::with_extra(args.exclusions));
    let outcome = engine.transform(&name, &bytes)?;
    let out = outcome.bytes(&bytes);
    std::fs::write(args.output, out)?;

    let summary = Summary {
        unit: outcome.name.dotted(),
        decision: outcome.decision,
        rewritten: outcome.is_rewritten(),
        bytes_in: bytes.len(),
        bytes_out: out.len(),
    };
    Ok(serde_json::to_string(&summary)?)
}
