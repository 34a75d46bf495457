use super::{invoke_module, Tool, ToolCtx};
use crate::builder::step::{BuildStep, BuildStepResult, Error};
use crate::diag::{CaptureIndices, DiagnosticMatcher};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// asxxxx error header: `?ASxxxx-Error-<o> in line 12 of game.asm`. The
/// description follows on the next, indented line and is folded into the
/// message.
static ASM_DIAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\?ASxxxx-Error-<(.)> in line (\d+) of (\S+)").unwrap());

const ASM_GROUPS: CaptureIndices = CaptureIndices {
    line: 2,
    msg: 1,
    path: Some(3),
};

/// Assemble one unit (`x.asm` -> `x.rel` + `x.lst`); both products are
/// memoized. Contributes the object/listing pair to the merged link step.
pub fn execute(step: &mut BuildStep, ctx: &mut ToolCtx<'_>) -> Result<BuildStepResult, Error> {
    step.gather_files(ctx.store)?;
    let rel = format!("{}.rel", step.prefix);
    let lst = format!("{}.lst", step.prefix);

    if step
        .stale_files(ctx.store, &[rel.clone(), lst.clone()])?
        .is_empty()
    {
        debug!("{} and {} up to date, skipping assemble", rel, lst);
    } else {
        let args: Vec<String> = vec![
            "-plosgffw".into(),
            rel.clone(),
            step.path.clone(),
        ];

        let mut matcher = DiagnosticMatcher::new(&ASM_DIAG, ASM_GROUPS);
        let mut detail_pending = false;
        let fs = invoke_module(Tool::Sdasz80, step, ctx, &args, &mut |line| {
            if ASM_DIAG.is_match(line) {
                matcher.feed(line);
                detail_pending = true;
            } else if detail_pending && line.starts_with(char::is_whitespace) {
                matcher.amend_last(line.trim());
                detail_pending = false;
            } else {
                matcher.feed(line);
                detail_pending = false;
            }
        })?;
        if matcher.has_errors() {
            return Ok(BuildStepResult::Errors(matcher.into_errors()));
        }

        let relout = fs
            .get_file_as_string(&rel)
            .ok_or_else(|| Error::MissingOutput(Tool::Sdasz80, rel.clone()))?;
        let lstout = fs
            .get_file_as_string(&lst)
            .ok_or_else(|| Error::MissingOutput(Tool::Sdasz80, lst.clone()))?;
        ctx.store.put_file(&rel, relout);
        ctx.store.put_file(&lst, lstout);
    }

    Ok(BuildStepResult::Link {
        linktool: Tool::Sdldz80,
        files: vec![rel.clone(), lst],
        args: vec![rel],
    })
}
