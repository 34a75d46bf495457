pub mod assemble;
pub mod compile;
pub mod link;
pub mod preprocess;

use super::step::{BuildStep, BuildStepResult, Error};
use crate::module::{ModuleCache, ModuleFs};
use crate::platform::PlatformParams;
use crate::store::FileStore;
use itertools::Itertools;
use log::info;
use strum_macros::{Display, EnumIter, EnumString};

/// The closed set of tools the pipeline can drive. Unknown tool names are
/// rejected when a step is constructed (`Tool::from_str`), never at
/// dispatch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter,
)]
pub enum Tool {
    #[strum(serialize = "sdcpp")]
    Sdcpp,
    #[strum(serialize = "sdcc")]
    Sdcc,
    #[strum(serialize = "sdasz80")]
    Sdasz80,
    #[strum(serialize = "sdldz80")]
    Sdldz80,
}

impl Tool {
    pub fn execute(self, step: &mut BuildStep, ctx: &mut ToolCtx<'_>) -> Result<BuildStepResult, Error> {
        match self {
            Tool::Sdcpp => preprocess::execute(step, ctx),
            Tool::Sdcc => compile::execute(step, ctx),
            Tool::Sdasz80 => assemble::execute(step, ctx),
            Tool::Sdldz80 => link::execute(step, ctx),
        }
    }
}

/// Everything an adapter needs for one invocation: the shared file store,
/// the module cache, and the platform layout constants.
pub struct ToolCtx<'a> {
    pub store: &'a mut FileStore,
    pub modules: &'a mut ModuleCache,
    pub params: &'a PlatformParams,
}

/// The shared trunk of every adapter: populate the module's private
/// namespace from the store, ensure the module is loaded, and invoke it
/// with each output line routed to `output`. Returns the namespace so the
/// caller can harvest produced files.
pub(super) fn invoke_module(
    tool: Tool,
    step: &BuildStep,
    ctx: &mut ToolCtx<'_>,
    args: &[String],
    output: &mut dyn FnMut(&str),
) -> Result<ModuleFs, Error> {
    let mut fs = ModuleFs::new();
    for file in &step.files {
        let data = ctx
            .store
            .get_file_data(file)
            .ok_or_else(|| Error::MissingInput(file.clone()))?;
        fs.put_file(file, data.as_bytes().to_vec());
    }

    let module = ctx.modules.ensure(tool)?;
    info!("{} {}", tool, args.iter().join(" "));
    module.invoke(&mut fs, args, output)?;
    Ok(fs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn tool_names_round_trip() {
        for tool in Tool::iter() {
            assert_eq!(Tool::from_str(&tool.to_string()), Ok(tool));
        }
    }

    #[test]
    fn unknown_tool_names_are_rejected() {
        assert!(Tool::from_str("z80asm").is_err());
        assert!(Tool::from_str("").is_err());
    }
}
