use crate::common::parse_hex_u32;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Flat symbol table: name to absolute address. Duplicate definitions are
/// resolved last-writer-wins, matching how the linker emits re-exported
/// symbols.
pub type SymbolMap = BTreeMap<String, u32>;

/// NoICE debug output: one `DEF <name> <hexaddr>` line per symbol.
static NOICE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DEF\s+(\S+)\s+([0-9A-Fa-f]+)").unwrap());

pub fn parse_noice_symbols(text: &str) -> SymbolMap {
    let mut map = SymbolMap::new();
    for line in text.lines() {
        if let Some(caps) = NOICE_DEF.captures(line) {
            if let (Some(name), Some(addr)) = (
                caps.get(1),
                caps.get(2).and_then(|m| parse_hex_u32(m.as_str())),
            ) {
                map.insert(name.as_str().to_owned(), addr);
            }
        }
    }
    map
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Rom,
    Ram,
    Io,
}

/// A named, typed, contiguous address range in the final memory map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub name: String,
    pub start: u32,
    pub size: u32,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<u32>,
}

const ROM_SEGMENTS: &[&str] = &["CODE", "INITIALIZER", "GSINIT", "GSFINAL", "HOME"];
const RAM_SEGMENTS: &[&str] = &["DATA", "INITIALIZED"];

fn classify(name: &str) -> Option<SegmentKind> {
    if ROM_SEGMENTS.contains(&name) {
        Some(SegmentKind::Rom)
    } else if RAM_SEGMENTS.contains(&name) {
        Some(SegmentKind::Ram)
    } else {
        None
    }
}

/// Derive the segment table from the linker-defined `s__NAME` (start) and
/// `l__NAME` (length) symbol pairs. Unclassified segments are kept only
/// when they start above address zero, which drops the linker's
/// zero-length bookkeeping areas.
pub fn derive_segments(symbols: &SymbolMap) -> Vec<Segment> {
    symbols
        .iter()
        .filter_map(|(sym, start)| {
            let name = sym.strip_prefix("s__")?;
            let size = symbols.get(&format!("l__{}", name)).copied().unwrap_or(0);
            let kind = classify(name);
            if kind.is_none() && *start == 0 {
                return None;
            }
            Some(Segment {
                name: name.to_owned(),
                start: *start,
                size,
                kind: kind.unwrap_or(SegmentKind::Ram),
                last: None,
            })
        })
        .sorted_by_key(|seg| seg.start)
        .collect()
}
