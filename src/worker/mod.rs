use crate::builder::{BuildOutcome, BuildStep, Builder, Tool};
use crate::diag::WorkerError;
use crate::listing::symbols::{Segment, SymbolMap};
use crate::listing::CodeListing;
use crate::module::{ModuleCache, ModuleLoader};
use crate::platform::PlatformParams;
use crate::store::FileStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct FileUpdate {
    pub path: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct Item {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub path: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub tool: String,
    #[serde(default)]
    pub mainfile: bool,
}

/// Host-to-worker messages. The wire shape distinguishes requests by
/// which top-level key is present, so deserialization is untagged.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WorkerRequest {
    Preload {
        preload: String,
    },
    Reset {
        reset: bool,
    },
    Build {
        #[serde(default)]
        updates: Vec<FileUpdate>,
        #[serde(default)]
        setitems: Vec<Item>,
        buildsteps: Vec<StepRequest>,
    },
}

/// Worker-to-host terminal message: exactly one per build request, always
/// carrying the platform layout constants.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WorkerResponse {
    Errors {
        errors: Vec<WorkerError>,
        params: PlatformParams,
    },
    Output {
        output: Vec<u8>,
        listings: BTreeMap<String, CodeListing>,
        symbolmap: SymbolMap,
        segments: Vec<Segment>,
        params: PlatformParams,
    },
    Unchanged {
        unchanged: bool,
        params: PlatformParams,
    },
}

/// The process-boundary adapter: owns the store and module cache, applies
/// file updates, runs builds through the executor, and answers each build
/// request with exactly one terminal message. Requests are processed
/// strictly in arrival order; a request arriving mid-build simply waits
/// its turn. Nothing here panics across requests; every failure is
/// folded into the response.
pub struct Worker {
    store: FileStore,
    modules: ModuleCache,
    params: PlatformParams,
}

impl Worker {
    pub fn new(loader: Box<dyn ModuleLoader>, params: PlatformParams) -> Self {
        Self {
            store: FileStore::new(),
            modules: ModuleCache::new(loader),
            params,
        }
    }

    pub fn handle(&mut self, request: WorkerRequest) -> Option<WorkerResponse> {
        match request {
            WorkerRequest::Preload { preload } => {
                match Tool::from_str(&preload) {
                    Ok(tool) => {
                        if let Err(err) = self.modules.preload(tool) {
                            warn!("preload of '{}' failed: {}", preload, err);
                        }
                    }
                    Err(_) => warn!("preload of unknown tool '{}' ignored", preload),
                }
                None
            }
            WorkerRequest::Reset { .. } => {
                self.store.reset();
                None
            }
            WorkerRequest::Build {
                updates,
                setitems,
                buildsteps,
            } => Some(self.build(updates, setitems, buildsteps)),
        }
    }

    fn build(
        &mut self,
        updates: Vec<FileUpdate>,
        setitems: Vec<Item>,
        buildsteps: Vec<StepRequest>,
    ) -> WorkerResponse {
        for update in updates {
            self.store.put_file(&update.path, update.data);
        }
        for item in setitems {
            self.store.put_item(&item.key, &item.value);
        }

        let mut steps = Vec::with_capacity(buildsteps.len());
        for request in buildsteps {
            let tool = match Tool::from_str(&request.tool) {
                Ok(tool) => tool,
                Err(_) => {
                    return WorkerResponse::Errors {
                        errors: vec![WorkerError::new(
                            0,
                            Some(request.path),
                            format!("unknown tool '{}'", request.tool),
                        )],
                        params: self.params,
                    };
                }
            };
            steps.push(
                BuildStep::new(request.path, tool)
                    .with_files(request.files)
                    .with_mainfile(request.mainfile),
            );
        }
        // Main-file steps are dispatched first. Object order at the
        // link is merge-arrival order, so steps with shorter chains
        // still contribute their objects earlier.
        steps.sort_by_key(|step| !step.mainfile);

        info!("build: {} steps", steps.len());
        let outcome = Builder::new(&mut self.store, &mut self.modules, &self.params).run(steps);

        match outcome {
            BuildOutcome::Errors(errors) => WorkerResponse::Errors {
                errors,
                params: self.params,
            },
            BuildOutcome::Output(output) => WorkerResponse::Output {
                output: output.output,
                listings: output.listings,
                symbolmap: output.symbolmap,
                segments: output.segments,
                params: self.params,
            },
            BuildOutcome::Unchanged => WorkerResponse::Unchanged {
                unchanged: true,
                params: self.params,
            },
        }
    }

    /// JSON-Lines request/response loop: one request per line in, one
    /// response line out for every build request. Malformed lines are
    /// logged and skipped so a confused host cannot wedge the worker.
    pub fn serve(
        &mut self,
        reader: impl BufRead,
        mut writer: impl Write,
    ) -> Result<(), std::io::Error> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let request: WorkerRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    warn!("malformed request skipped: {}", err);
                    continue;
                }
            };
            if let Some(response) = self.handle(request) {
                serde_json::to_writer(&mut writer, &response)?;
                writeln!(writer)?;
                writer.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{self, ToolModule};

    struct FailingLoader;

    impl ModuleLoader for FailingLoader {
        fn load(&mut self, tool: Tool) -> Result<Box<dyn ToolModule>, module::Error> {
            Err(module::Error::Load(tool, "unavailable".to_owned()))
        }
    }

    fn worker() -> Worker {
        Worker::new(Box::new(FailingLoader), PlatformParams::default())
    }

    #[test]
    fn unknown_tool_is_rejected_in_the_response() {
        let mut worker = worker();
        let response = worker.handle(WorkerRequest::Build {
            updates: vec![FileUpdate {
                path: "a.c".into(),
                data: "int x;".into(),
            }],
            setitems: vec![],
            buildsteps: vec![StepRequest {
                path: "a.c".into(),
                files: vec![],
                tool: "z80asm".into(),
                mainfile: false,
            }],
        });
        match response {
            Some(WorkerResponse::Errors { errors, .. }) => {
                assert_eq!(errors[0].line, 0);
                assert_eq!(errors[0].path.as_deref(), Some("a.c"));
                assert!(errors[0].msg.contains("z80asm"));
            }
            other => panic!("expected errors, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn module_load_failure_becomes_a_diagnostic() {
        let mut worker = worker();
        let response = worker.handle(WorkerRequest::Build {
            updates: vec![FileUpdate {
                path: "a.c".into(),
                data: "int x;".into(),
            }],
            setitems: vec![],
            buildsteps: vec![StepRequest {
                path: "a.c".into(),
                files: vec![],
                tool: "sdcpp".into(),
                mainfile: true,
            }],
        });
        match response {
            Some(WorkerResponse::Errors { errors, .. }) => {
                assert_eq!(errors[0].line, 0);
                assert!(errors[0].msg.contains("sdcpp"));
            }
            _ => panic!("expected errors"),
        }
    }

    #[test]
    fn preload_and_reset_produce_no_response() {
        let mut worker = worker();
        assert!(worker
            .handle(WorkerRequest::Preload {
                preload: "sdcc".into()
            })
            .is_none());
        assert!(worker.handle(WorkerRequest::Reset { reset: true }).is_none());
    }

    #[test]
    fn requests_deserialize_by_key_presence() {
        let preload: WorkerRequest = serde_json::from_str(r#"{"preload":"sdcc"}"#).unwrap();
        assert!(matches!(preload, WorkerRequest::Preload { .. }));

        let reset: WorkerRequest = serde_json::from_str(r#"{"reset":true}"#).unwrap();
        assert!(matches!(reset, WorkerRequest::Reset { .. }));

        let build: WorkerRequest = serde_json::from_str(
            r#"{"updates":[{"path":"a.c","data":"x"}],"buildsteps":[{"path":"a.c","tool":"sdcpp"}]}"#,
        )
        .unwrap();
        assert!(matches!(build, WorkerRequest::Build { .. }));
    }
}
