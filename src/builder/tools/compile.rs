use super::{invoke_module, Tool, ToolCtx};
use crate::builder::step::{BuildStep, BuildStepResult, Error};
use crate::diag::{CaptureIndices, DiagnosticMatcher};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

/// sdcc diagnostics: `main.c:12: error 101: too many parameters`, also
/// the parenthesized form `main.c(12) : error 101: ...`.
static SDCC_DIAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)[:(](\d+)[:)]\s*(?:error|syntax error)\s*\d*\s*:\s*(.+)").unwrap()
});

const SDCC_GROUPS: CaptureIndices = CaptureIndices {
    line: 2,
    msg: 3,
    path: Some(1),
};

/// Escape hatch: sources carrying their own `#pragma opt_code` directive
/// opt out of the aggressive allocator settings, which are known to
/// miscompile under that pragma.
static PRAGMA_OPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*#pragma\s+opt_code").unwrap());

/// Compile one preprocessed unit (`x.i` -> `x.asm`) and chain to the
/// assembler.
pub fn execute(step: &mut BuildStep, ctx: &mut ToolCtx<'_>) -> Result<BuildStepResult, Error> {
    step.gather_files(ctx.store)?;
    let product = format!("{}.asm", step.prefix);

    if step.stale_files(ctx.store, &[product.clone()])?.is_empty() {
        debug!("{} up to date, skipping compile", product);
    } else {
        let source = ctx.store.get_file_as_string(&step.path)?;

        let mut args: Vec<String> = vec![
            "-mz80".into(),
            "--c1mode".into(),
            "--std-sdcc99".into(),
            "--less-pedantic".into(),
            "--fomit-frame-pointer".into(),
            "--debug".into(),
        ];
        if PRAGMA_OPT.is_match(source) {
            info!("{}: opt_code pragma present, aggressive allocator disabled", step.path);
        } else {
            args.push("--max-allocs-per-node".into());
            args.push("25000".into());
        }
        args.extend(step.args.iter().cloned());
        args.push("-o".into());
        args.push(product.clone());
        args.push(step.path.clone());

        let mut matcher = DiagnosticMatcher::new(&SDCC_DIAG, SDCC_GROUPS);
        let fs = invoke_module(Tool::Sdcc, step, ctx, &args, &mut |line| {
            matcher.feed(line)
        })?;
        if matcher.has_errors() {
            return Ok(BuildStepResult::Errors(matcher.into_errors()));
        }

        let text = fs
            .get_file_as_string(&product)
            .ok_or_else(|| Error::MissingOutput(Tool::Sdcc, product.clone()))?;
        ctx.store.put_file(&product, text);
    }

    Ok(BuildStepResult::Chain {
        nexttool: Tool::Sdasz80,
        path: product.clone(),
        files: vec![product],
        args: Vec::new(),
    })
}
