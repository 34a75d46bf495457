pub mod step;
pub mod tools;

pub use step::{BuildOutput, BuildStep, BuildStepResult, Error};
pub use tools::Tool;

use crate::diag::WorkerError;
use crate::module::ModuleCache;
use crate::platform::PlatformParams;
use crate::store::FileStore;
use derive_more::Constructor;
use log::{debug, info};
use std::collections::VecDeque;
use tools::ToolCtx;

/// Name bound to the merged link step; its products are `output.ihx` and
/// `output.noi`.
const LINK_STEP_PATH: &str = "output.rom";

/// The pipeline's terminal result: the first error or the first concrete
/// output wins, and a queue that drains with neither means every stage
/// was a cache hit.
#[derive(Debug)]
pub enum BuildOutcome {
    Errors(Vec<WorkerError>),
    Output(BuildOutput),
    Unchanged,
}

/// The pipeline executor: owns the step queue, resolves chaining and
/// link fan-in, and surfaces the first terminal result. All state it
/// touches is borrowed in, so independent builders never share anything
/// implicitly.
#[derive(Constructor)]
pub struct Builder<'a> {
    store: &'a mut FileStore,
    modules: &'a mut ModuleCache,
    params: &'a PlatformParams,
}

impl<'a> Builder<'a> {
    pub fn run(&mut self, steps: Vec<BuildStep>) -> BuildOutcome {
        let mut queue: VecDeque<BuildStep> = steps.into();
        // Link contributions accumulate here and the merged step enters
        // the queue only once everything else has drained, so every
        // compile/assemble branch completes before linking begins.
        let mut pending_link: Option<BuildStep> = None;

        loop {
            let mut step = match queue.pop_front() {
                Some(step) => step,
                None => match pending_link.take() {
                    Some(link) => {
                        queue.push_back(link);
                        continue;
                    }
                    None => {
                        info!("build unchanged");
                        return BuildOutcome::Unchanged;
                    }
                },
            };

            debug!("executing step '{}' ({})", step.path, step.tool);
            let result = {
                let mut ctx = ToolCtx {
                    store: &mut *self.store,
                    modules: &mut *self.modules,
                    params: self.params,
                };
                step.tool.execute(&mut step, &mut ctx)
            };

            match result {
                Err(err) => {
                    // Protocol and resource failures never crash the
                    // worker; they become one synthetic diagnostic.
                    return BuildOutcome::Errors(vec![WorkerError::new(
                        0,
                        Some(step.path),
                        err.to_string(),
                    )]);
                }
                Ok(BuildStepResult::Errors(errors)) => {
                    return BuildOutcome::Errors(default_paths(errors, &step.path));
                }
                Ok(BuildStepResult::Output(output)) => {
                    return BuildOutcome::Output(output);
                }
                Ok(BuildStepResult::Chain {
                    nexttool,
                    path,
                    files,
                    args,
                }) => {
                    queue.push_back(
                        BuildStep::new(path, nexttool)
                            .with_files(files)
                            .with_args(args)
                            .with_mainfile(step.mainfile),
                    );
                }
                Ok(BuildStepResult::Link {
                    linktool,
                    files,
                    args,
                }) => match pending_link.as_mut() {
                    Some(link) => {
                        // Concatenation, not dedup: link order is
                        // meaningful to the linker.
                        link.files.extend(files);
                        link.args.extend(args);
                    }
                    None => {
                        pending_link = Some(
                            BuildStep::new(LINK_STEP_PATH, linktool)
                                .with_files(files)
                                .with_args(args),
                        );
                    }
                },
                Ok(BuildStepResult::Unchanged) => continue,
            }
        }
    }
}

fn default_paths(mut errors: Vec<WorkerError>, step_path: &str) -> Vec<WorkerError> {
    for error in &mut errors {
        if error.path.is_none() {
            error.path = Some(step_path.to_owned());
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_fills_only_missing() {
        let errors = vec![
            WorkerError::new(1, None, "a"),
            WorkerError::new(2, Some("other.c".to_owned()), "b"),
        ];
        let errors = default_paths(errors, "main.c");
        assert_eq!(errors[0].path.as_deref(), Some("main.c"));
        assert_eq!(errors[1].path.as_deref(), Some("other.c"));
    }
}
