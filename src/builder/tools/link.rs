use super::{invoke_module, Tool, ToolCtx};
use crate::builder::step::{BuildOutput, BuildStep, BuildStepResult, Error};
use crate::common::strip_extension;
use crate::diag::{CaptureIndices, DiagnosticMatcher};
use crate::hexrec;
use crate::listing::symbols::{derive_segments, parse_noice_symbols, Segment, SegmentKind};
use crate::listing::{parse_listing, parse_source_lines, CodeListing, ASXXXX};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// aslink reports problems without line numbers; undefined globals arrive
/// as "warnings" but leave holes in the image, so both severities abort.
static LINK_DIAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\?ASlink-(?:Warning|Error)-(.+)").unwrap());

const LINK_GROUPS: CaptureIndices = CaptureIndices {
    line: 0,
    msg: 1,
    path: None,
};

/// The startup/runtime object resolved implicitly at the front of the
/// link order when the host has provided one.
const CRT0: &str = "crt0.rel";

/// Merge every assembled object into one image: run the linker once over
/// the accumulated object list, decode the hex output into the ROM
/// window, read the symbol table, derive the segment map, and re-decode
/// each module's relocated listing into line-level records.
pub fn execute(step: &mut BuildStep, ctx: &mut ToolCtx<'_>) -> Result<BuildStepResult, Error> {
    if ctx.store.contains(CRT0) && !step.files.iter().any(|f| f == CRT0) {
        step.files.insert(0, CRT0.to_owned());
    }
    step.gather_files(ctx.store)?;

    let ihx = format!("{}.ihx", step.prefix);
    let noi = format!("{}.noi", step.prefix);

    if step
        .stale_files(ctx.store, &[ihx.clone(), noi.clone()])?
        .is_empty()
    {
        debug!("{} up to date, link skipped", ihx);
        return Ok(BuildStepResult::Unchanged);
    }

    let mut objs: Vec<String> = Vec::new();
    if step.files.iter().any(|f| f == CRT0) {
        objs.push(CRT0.to_owned());
    }
    objs.extend(step.args.iter().filter(|a| *a != CRT0).cloned());

    let mut args: Vec<String> = vec![
        "-mjwx".into(),
        "-i".into(),
        ihx.clone(),
        "-b".into(),
        format!("_CODE=0x{:04x}", ctx.params.code_start),
        "-b".into(),
        format!("_DATA=0x{:04x}", ctx.params.data_start),
    ];
    args.extend(objs);

    let mut matcher = DiagnosticMatcher::new(&LINK_DIAG, LINK_GROUPS);
    let fs = invoke_module(Tool::Sdldz80, step, ctx, &args, &mut |line| {
        matcher.feed(line)
    })?;
    if matcher.has_errors() {
        return Ok(BuildStepResult::Errors(matcher.into_errors()));
    }

    let ihx_text = fs
        .get_file_as_string(&ihx)
        .ok_or_else(|| Error::MissingOutput(Tool::Sdldz80, ihx.clone()))?;
    let noi_text = fs
        .get_file_as_string(&noi)
        .ok_or_else(|| Error::MissingOutput(Tool::Sdldz80, noi.clone()))?;

    let output = hexrec::decode(
        &ihx_text,
        ctx.params.code_start,
        ctx.params.rom_size as usize,
    );
    let symbolmap = parse_noice_symbols(&noi_text);
    let mut segments = derive_segments(&symbolmap);
    mark_used_extent(&mut segments, &output, ctx.params.code_start);

    let mut listings = BTreeMap::new();
    for lst in step.files.iter().filter(|f| f.ends_with(".lst")) {
        let prefix = strip_extension(lst);
        // Prefer the relocated listing the linker just produced; fall
        // back to the assembler's own when the linker left none.
        let text = fs
            .get_file_as_string(&format!("{}.rst", prefix))
            .map(Ok)
            .unwrap_or_else(|| ctx.store.get_file_as_string(lst).map(str::to_owned))?;

        let asmlines = parse_listing(&text, &ASXXXX);
        let srclines = parse_source_lines(&text, &ASXXXX);
        let listing = if srclines.is_empty() {
            CodeListing {
                lines: asmlines,
                asmlines: None,
                text,
            }
        } else {
            CodeListing {
                lines: srclines,
                asmlines: Some(asmlines),
                text,
            }
        };
        listings.insert(prefix.to_owned(), listing);
    }

    ctx.store.put_file(&ihx, ihx_text);
    ctx.store.put_file(&noi, noi_text);

    Ok(BuildStepResult::Output(BuildOutput {
        output,
        listings,
        symbolmap,
        segments,
    }))
}

/// Record, per ROM segment, the first address past the last byte actually
/// written, so the host can show occupancy.
fn mark_used_extent(segments: &mut [Segment], image: &[u8], base: u32) {
    for seg in segments.iter_mut().filter(|s| s.kind == SegmentKind::Rom) {
        let lo = seg.start.saturating_sub(base) as usize;
        let hi = (lo + seg.size as usize).min(image.len());
        if lo >= hi {
            continue;
        }
        seg.last = image[lo..hi]
            .iter()
            .rposition(|b| *b != 0)
            .map(|idx| seg.start + idx as u32 + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_extent_covers_last_nonzero_byte() {
        let mut segments = vec![
            Segment {
                name: "CODE".into(),
                start: 0,
                size: 8,
                kind: SegmentKind::Rom,
                last: None,
            },
            Segment {
                name: "DATA".into(),
                start: 0x8000,
                size: 8,
                kind: SegmentKind::Ram,
                last: None,
            },
        ];
        let image = [0xC3, 0x10, 0x00, 0x00, 0xAA, 0, 0, 0];
        mark_used_extent(&mut segments, &image, 0);
        assert_eq!(segments[0].last, Some(5));
        assert_eq!(segments[1].last, None);
    }
}
