use super::tools::Tool;
use crate::common::strip_extension;
use crate::diag::WorkerError;
use crate::listing::symbols::{Segment, SymbolMap};
use crate::listing::CodeListing;
use crate::module;
use crate::store::{self, FileStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Errors fatal to the current build but never to the worker process:
/// protocol violations, missing inputs, module failures. The executor
/// catches them at the top of step execution and folds them into one
/// synthetic line-0 diagnostic.
#[derive(Debug)]
pub enum Error {
    NotGathered(Tool),
    MissingInput(String),
    MissingOutput(Tool, String),
    Store(store::Error),
    Module(module::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotGathered(tool) => write!(
                f,
                "internal: staleness check for '{}' before gather_files",
                tool
            ),
            Error::MissingInput(path) => write!(f, "missing input file '{}'", path),
            Error::MissingOutput(tool, path) => {
                write!(f, "'{}' exited cleanly but produced no '{}'", tool, path)
            }
            Error::Store(err) => write!(f, "{}", err),
            Error::Module(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<module::Error> for Error {
    fn from(err: module::Error) -> Self {
        Error::Module(err)
    }
}

/// One unit of pipeline work bound to a single tool invocation. Transient:
/// lives for the duration of one queue entry in the executor.
#[derive(Debug, Clone)]
pub struct BuildStep {
    pub path: String,
    pub files: Vec<String>,
    pub tool: Tool,
    pub args: Vec<String>,
    /// `path` with its extension stripped; per-stage output names are
    /// derived from it (`game.asm` yields `game.rel`, `game.lst`).
    pub prefix: String,
    pub mainfile: bool,
    /// Maximum timestamp among the declared input files; the staleness
    /// reference point. Valid only after `gather_files`.
    pub maxts: u64,
    gathered: bool,
}

impl BuildStep {
    pub fn new(path: impl Into<String>, tool: Tool) -> Self {
        let path = path.into();
        Self {
            path,
            files: Vec::new(),
            tool,
            args: Vec::new(),
            prefix: String::new(),
            mainfile: false,
            maxts: 0,
            gathered: false,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_mainfile(mut self, mainfile: bool) -> Self {
        self.mainfile = mainfile;
        self
    }

    /// Default the declared inputs, derive the output prefix, and compute
    /// `maxts`. Must run before any staleness check or module-namespace
    /// population; adapters that get this wrong fail fast with
    /// `Error::NotGathered`.
    pub fn gather_files(&mut self, store: &FileStore) -> Result<(), Error> {
        if self.files.is_empty() {
            self.files = vec![self.path.clone()];
        }
        self.prefix = strip_extension(&self.path).to_owned();

        let mut maxts = 0;
        for file in &self.files {
            let ts = store
                .timestamp_of(file)
                .ok_or_else(|| Error::MissingInput(file.clone()))?;
            maxts = maxts.max(ts);
        }
        self.maxts = maxts;
        self.gathered = true;
        Ok(())
    }

    /// The subset of `targets` that is missing from the store or older
    /// than the newest input. Empty means the stage's cached outputs are
    /// still good and recomputation is skipped.
    pub fn stale_files(&self, store: &FileStore, targets: &[String]) -> Result<Vec<String>, Error> {
        if !self.gathered {
            return Err(Error::NotGathered(self.tool));
        }
        Ok(targets
            .iter()
            .filter(|target| {
                store
                    .timestamp_of(target)
                    .map_or(true, |ts| ts < self.maxts)
            })
            .cloned()
            .collect())
    }
}

/// The terminal artifact of a successful build: the ROM image plus the
/// debugging metadata the host's debugger navigates by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutput {
    pub output: Vec<u8>,
    pub listings: BTreeMap<String, CodeListing>,
    pub symbolmap: SymbolMap,
    pub segments: Vec<Segment>,
}

/// What one stage hands back to the executor. Exactly one variant per
/// invocation; the executor is the only consumer and matches
/// exhaustively.
#[derive(Debug)]
pub enum BuildStepResult {
    /// Tool-reported diagnostics; aborts the whole pipeline.
    Errors(Vec<WorkerError>),
    /// Terminal output; only the link stage produces this.
    Output(BuildOutput),
    /// Hand off to the next tool in the chain.
    Chain {
        nexttool: Tool,
        path: String,
        files: Vec<String>,
        args: Vec<String>,
    },
    /// Contribute inputs to the single merged link step.
    Link {
        linktool: Tool,
        files: Vec<String>,
        args: Vec<String>,
    },
    /// Staleness check was negative; nothing to do.
    Unchanged,
}
