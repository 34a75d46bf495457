use log::debug;
use regex::Regex;
use serde::Serialize;

/// One structured diagnostic extracted from a tool's text output.
/// `line` is 1-based; line 0 is reserved for synthetic internal errors.
/// `path` is filled from the matched filename group when the tool names
/// one, and defaulted to the failing step's source path by the executor
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerError {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub msg: String,
}

impl WorkerError {
    pub fn new(line: u32, path: Option<String>, msg: impl Into<String>) -> Self {
        Self {
            line,
            path,
            msg: msg.into(),
        }
    }
}

/// Which capture groups of a diagnostic pattern carry the line number,
/// the message text, and (optionally) the filename.
#[derive(Debug, Clone, Copy)]
pub struct CaptureIndices {
    pub line: usize,
    pub msg: usize,
    pub path: Option<usize>,
}

/// Stateless-per-line diagnostic extraction: feed every line of a tool's
/// stdout/stderr, collect the `WorkerError`s that matched. Tool output is
/// noisy by nature (banners, progress chatter), so non-matching lines are
/// logged and dropped rather than treated as failures. A line number that
/// fails to parse defaults to 1: a best-effort pointer into the source
/// beats aborting the extraction.
pub struct DiagnosticMatcher<'a> {
    pattern: &'a Regex,
    groups: CaptureIndices,
    errors: Vec<WorkerError>,
}

impl<'a> DiagnosticMatcher<'a> {
    pub fn new(pattern: &'a Regex, groups: CaptureIndices) -> Self {
        Self {
            pattern,
            groups,
            errors: Vec::new(),
        }
    }

    pub fn feed(&mut self, line: &str) {
        match self.pattern.captures(line) {
            Some(caps) => {
                let lineno = caps
                    .get(self.groups.line)
                    .and_then(|m| m.as_str().trim().parse().ok())
                    .unwrap_or(1);
                let msg = caps
                    .get(self.groups.msg)
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default();
                let path = self
                    .groups
                    .path
                    .and_then(|idx| caps.get(idx))
                    .map(|m| m.as_str().to_owned());
                self.errors.push(WorkerError::new(lineno, path, msg));
            }
            None => debug!("tool output: {}", line),
        }
    }

    /// Fold a detail line into the most recent diagnostic. Some tools
    /// print the error header and its description on separate lines.
    pub fn amend_last(&mut self, detail: &str) {
        if let Some(last) = self.errors.last_mut() {
            if last.msg.is_empty() {
                last.msg = detail.to_owned();
            } else {
                last.msg = format!("{}: {}", last.msg, detail);
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<WorkerError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static GCC_STYLE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(.+?):(\d+): (.+)").unwrap());

    #[test]
    fn extracts_exact_fields() {
        let mut matcher = DiagnosticMatcher::new(
            &GCC_STYLE,
            CaptureIndices {
                line: 2,
                msg: 3,
                path: Some(1),
            },
        );
        matcher.feed("foo.c:12: error: bad thing");
        assert_eq!(
            matcher.into_errors(),
            vec![WorkerError::new(
                12,
                Some("foo.c".to_owned()),
                "error: bad thing"
            )]
        );
    }

    #[test]
    fn nonmatching_lines_append_nothing() {
        let mut matcher = DiagnosticMatcher::new(
            &GCC_STYLE,
            CaptureIndices {
                line: 2,
                msg: 3,
                path: Some(1),
            },
        );
        matcher.feed("SDCC : mcs51/z80 3.9.0");
        matcher.feed("");
        assert!(!matcher.has_errors());
    }

    #[test]
    fn bad_line_number_defaults_to_one() {
        static LOOSE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^err \(line (\S+)\): (.+)").unwrap());
        let mut matcher = DiagnosticMatcher::new(
            &LOOSE,
            CaptureIndices {
                line: 1,
                msg: 2,
                path: None,
            },
        );
        matcher.feed("err (line xx): broken");
        assert_eq!(matcher.into_errors(), vec![WorkerError::new(1, None, "broken")]);
    }

    #[test]
    fn amend_appends_detail() {
        let mut matcher = DiagnosticMatcher::new(
            &GCC_STYLE,
            CaptureIndices {
                line: 2,
                msg: 3,
                path: Some(1),
            },
        );
        matcher.feed("foo.asm:3: syntax error");
        matcher.amend_last("missing operand");
        assert_eq!(matcher.into_errors()[0].msg, "syntax error: missing operand");
    }
}
