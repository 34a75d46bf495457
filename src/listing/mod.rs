pub mod symbols;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// One decoded listing line: a source line number together with the
/// machine code emitted for it. `offset` is relative to the start of the
/// enclosing function (the function label's address is subtracted), so
/// snippets stay valid across relocation of the whole function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnippet {
    pub line: u32,
    pub offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u32>,
    pub iscode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
}

/// A fully decoded listing for one translation unit: the line records the
/// debugger navigates by, optionally the raw assembly-level records when
/// the unit was compiled from C, and the listing text itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeListing {
    pub lines: Vec<SourceSnippet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asmlines: Option<Vec<SourceSnippet>>,
    pub text: String,
}

/// The shape of one listing format: the instruction-line pattern with its
/// capture-group indices, plus the optional marker patterns for function
/// labels, segment directives, and line re-basing.
///
/// Offsets and function addresses are hexadecimal; line numbers and cycle
/// counts are decimal.
pub struct ListingDialect {
    pub insn: Regex,
    pub line_group: usize,
    pub offset_group: usize,
    pub insn_group: usize,
    pub cycles_group: Option<usize>,
    /// Group 1: address (hex), group 2: function name.
    pub func: Option<Regex>,
    /// Group 1: segment name.
    pub seg: Option<Regex>,
    /// Group 1: listing line N, group 2: original source line M. Declares
    /// that line N of the merged compilation unit is line M of the
    /// original file; needed because the preprocessor concatenates
    /// several sources into one unit.
    pub rebase: Option<Regex>,
    /// Secondary (debug-line) format: a marker naming a source line,
    /// followed at some later line by an address marker. Group 1 of
    /// `src_line` is decimal; group 1 of `src_addr` is hex.
    pub src_line: Option<Regex>,
    pub src_addr: Option<Regex>,
}

/// The asxxxx assembler/linker listing format (`.lst` and relocated
/// `.rst` files):
///
/// ```text
///    8000 21 00 00      [10]   42 _main::
/// ```
pub static ASXXXX: Lazy<ListingDialect> = Lazy::new(|| ListingDialect {
    insn: Regex::new(r"^\s*([0-9A-F]{4})\s+((?:[0-9A-F]{2} )+)\s*\[ *(\d+)\]\s+(\d+)").unwrap(),
    line_group: 4,
    offset_group: 1,
    insn_group: 2,
    cycles_group: Some(3),
    func: Some(Regex::new(r"^\s*([0-9A-F]{4})\s+(?:\d+\s+)?(\w+)::").unwrap()),
    seg: Some(Regex::new(r"\.area\s+_?(\w+)").unwrap()),
    rebase: Some(Regex::new(r"^\s*(\d+)\s+;#line\s+(\d+)").unwrap()),
    src_line: Some(Regex::new(r";<stdin>:(\d+):").unwrap()),
    src_addr: Some(Regex::new(r"^\s*([0-9A-F]{4})\s").unwrap()),
});

/// Carried scanner state, threaded through the fold over listing lines.
#[derive(Debug, Default)]
struct Scan {
    segment: Option<String>,
    func: Option<String>,
    funcbase: u32,
    lineofs: i64,
}

/// Decode an assembler listing into ordered source snippets.
///
/// Scans lines in order with three pieces of carried state: the current
/// segment (updated on segment markers), the current function and its
/// address (updated on function labels, becoming the relocation base of
/// subsequent offsets), and the accumulated line-offset correction from
/// re-basing markers.
pub fn parse_listing(text: &str, dialect: &ListingDialect) -> Vec<SourceSnippet> {
    let mut scan = Scan::default();
    let mut snippets = Vec::new();

    for line in text.lines() {
        if let Some(seg) = &dialect.seg {
            if let Some(caps) = seg.captures(line) {
                scan.segment = caps.get(1).map(|m| m.as_str().to_owned());
            }
        }
        if let Some(func) = &dialect.func {
            if let Some(caps) = func.captures(line) {
                if let Some(base) = caps.get(1).and_then(|m| crate::common::parse_hex_u32(m.as_str())) {
                    scan.funcbase = base;
                    scan.func = caps.get(2).map(|m| m.as_str().to_owned());
                }
            }
        }
        if let Some(rebase) = &dialect.rebase {
            if let Some(caps) = rebase.captures(line) {
                let n = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok());
                let m = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
                if let (Some(n), Some(m)) = (n, m) {
                    scan.lineofs = n - m;
                    continue;
                }
            }
        }

        let caps = match dialect.insn.captures(line) {
            Some(caps) => caps,
            None => continue,
        };
        let lineno = caps
            .get(dialect.line_group)
            .and_then(|m| m.as_str().parse::<i64>().ok());
        let offset = caps
            .get(dialect.offset_group)
            .and_then(|m| crate::common::parse_hex_u32(m.as_str()));
        let (lineno, offset) = match (lineno, offset) {
            (Some(l), Some(o)) => (l, o),
            _ => continue,
        };
        let insns = caps
            .get(dialect.insn_group)
            .map(|m| m.as_str().trim().to_owned())
            .filter(|s| !s.is_empty());
        if insns.is_none() {
            continue;
        }
        let cycles = dialect
            .cycles_group
            .and_then(|idx| caps.get(idx))
            .and_then(|m| m.as_str().parse::<u32>().ok());

        snippets.push(SourceSnippet {
            line: (lineno - scan.lineofs).max(0) as u32,
            offset: offset.wrapping_sub(scan.funcbase),
            insns,
            iscode: cycles.map_or(false, |c| c > 0),
            cycles,
            segment: scan.segment.clone(),
            func: scan.func.clone(),
        });
    }

    snippets
}

/// Decode the debug-line dialect: a line marker names a source line, and
/// the next address marker pins it to an offset. Produces a bare
/// `line <-> offset` index with no instruction bytes; used for units
/// compiled from C, whose listings annotate lines differently from
/// hand-written assembly.
pub fn parse_source_lines(text: &str, dialect: &ListingDialect) -> Vec<SourceSnippet> {
    let (line_re, addr_re) = match (&dialect.src_line, &dialect.src_addr) {
        (Some(l), Some(a)) => (l, a),
        _ => return Vec::new(),
    };

    let mut pending: Option<u32> = None;
    let mut snippets = Vec::new();
    for line in text.lines() {
        if let Some(caps) = line_re.captures(line) {
            pending = caps.get(1).and_then(|m| m.as_str().parse().ok());
            continue;
        }
        if let Some(lineno) = pending {
            if let Some(offset) = addr_re
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| crate::common::parse_hex_u32(m.as_str()))
            {
                snippets.push(SourceSnippet {
                    line: lineno,
                    offset,
                    insns: None,
                    cycles: None,
                    iscode: true,
                    segment: None,
                    func: None,
                });
                pending = None;
            }
        }
    }
    snippets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_rebased_to_function() {
        let text = "\
             .area _CODE\n\
   8000        40 _start::\n\
   8003 CD 00 00      [17]   42     call _init\n";
        let snippets = parse_listing(text, &ASXXXX);
        assert_eq!(snippets.len(), 1);
        let s = &snippets[0];
        assert_eq!(s.offset, 3);
        assert_eq!(s.line, 42);
        assert_eq!(s.insns.as_deref(), Some("CD 00 00"));
        assert_eq!(s.cycles, Some(17));
        assert!(s.iscode);
        assert_eq!(s.segment.as_deref(), Some("CODE"));
        assert_eq!(s.func.as_deref(), Some("_start"));
    }

    #[test]
    fn zero_cycles_is_not_code() {
        let text = "   0000 41 42         [ 0]    7     .ascii \"AB\"\n";
        let snippets = parse_listing(text, &ASXXXX);
        assert_eq!(snippets.len(), 1);
        assert!(!snippets[0].iscode);
    }

    #[test]
    fn rebase_marker_shifts_subsequent_lines() {
        // Listing line 50 declares it is line 10 of the original file, so
        // the emitted record at listing line 53 maps to source line 13.
        let text = "\
     50 ;#line 10\n\
   0010 3E 01         [ 7]   53     ld a, #1\n";
        let snippets = parse_listing(text, &ASXXXX);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].line, 13);
    }

    #[test]
    fn nonmatching_lines_are_ignored()  {
        let text = "ASxxxx Assembler V02.00\nHexadecimal [16-Bits]\n";
        assert!(parse_listing(text, &ASXXXX).is_empty());
    }

    #[test]
    fn source_line_markers_pair_with_next_address() {
        let text = "\
                          ;<stdin>:12: void main(void)\n\
   01A0 C5            [11]  310     push bc\n\
                          ;<stdin>:99: no address follows but text\n";
        let snippets = parse_source_lines(text, &ASXXXX);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].line, 12);
        assert_eq!(snippets[0].offset, 0x01A0);
        assert!(snippets[0].insns.is_none());
    }
}
