use super::{invoke_module, Tool, ToolCtx};
use crate::builder::step::{BuildStep, BuildStepResult, Error};
use crate::diag::{CaptureIndices, DiagnosticMatcher};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// cpp-style diagnostics: `main.c:12:5: error: unknown type name 'u8'`.
/// Warnings deliberately do not match; only errors abort the pipeline.
static CPP_DIAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?):(\d+):(?:\d+:)?\s*(?:fatal\s+)?error:\s*(.+)").unwrap());

const CPP_GROUPS: CaptureIndices = CaptureIndices {
    line: 2,
    msg: 3,
    path: Some(1),
};

/// Preprocess one C source (`x.c` -> `x.i`) and chain to the compiler.
/// When the cached `.i` is newer than every input, the tool run is
/// skipped but the chain result is still returned: staleness elides
/// recomputation, not the pipeline topology.
pub fn execute(step: &mut BuildStep, ctx: &mut ToolCtx<'_>) -> Result<BuildStepResult, Error> {
    step.gather_files(ctx.store)?;
    let product = format!("{}.i", step.prefix);

    if step.stale_files(ctx.store, &[product.clone()])?.is_empty() {
        debug!("{} up to date, skipping preprocess", product);
    } else {
        let mut args: Vec<String> = vec![
            "-nostdinc".into(),
            "-D__SDCC".into(),
            "-D__SDCC_z80".into(),
        ];
        args.extend(step.args.iter().cloned());
        args.push(step.path.clone());
        args.push(product.clone());

        let mut matcher = DiagnosticMatcher::new(&CPP_DIAG, CPP_GROUPS);
        let fs = invoke_module(Tool::Sdcpp, step, ctx, &args, &mut |line| {
            matcher.feed(line)
        })?;
        if matcher.has_errors() {
            return Ok(BuildStepResult::Errors(matcher.into_errors()));
        }

        let text = fs
            .get_file_as_string(&product)
            .ok_or_else(|| Error::MissingOutput(Tool::Sdcpp, product.clone()))?;
        ctx.store.put_file(&product, text);
    }

    Ok(BuildStepResult::Chain {
        nexttool: Tool::Sdcc,
        path: product.clone(),
        files: vec![product],
        args: step.args.clone(),
    })
}
