pub mod process;

use crate::builder::tools::Tool;
use log::{debug, info};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    Load(Tool, String),
    Invoke(Tool, String),
    Io(std::io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Load(tool, msg) => write!(f, "failed to load module '{}': {}", tool, msg),
            Error::Invoke(tool, msg) => write!(f, "module '{}' failed: {}", tool, msg),
            Error::Io(err) => write!(f, "module io error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// The private file namespace of one tool invocation. Populated from the
/// virtual file store before the call; every file the tool produced (or
/// left behind) is readable afterwards.
#[derive(Debug, Default)]
pub struct ModuleFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl ModuleFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        self.files.insert(path.to_owned(), data.into());
    }

    pub fn get_file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn get_file_as_string(&self, path: &str) -> Option<String> {
        self.files
            .get(path)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// One opaque compiler/assembler/linker tool. The pipeline never looks
/// inside: it hands over a file namespace and an argv vector, and gets
/// back output lines plus whatever files the tool wrote.
pub trait ToolModule {
    fn invoke(
        &mut self,
        fs: &mut ModuleFs,
        args: &[String],
        output: &mut dyn FnMut(&str),
    ) -> Result<(), Error>;
}

/// Resolves a tool kind to a loaded module. Loading may hit the disk or
/// the network and is allowed to fail; a failure is fatal to the current
/// build only.
pub trait ModuleLoader {
    fn load(&mut self, tool: Tool) -> Result<Box<dyn ToolModule>, Error>;
}

/// Lazily loads each module once per process lifetime and reuses it
/// across builds. Modules are treated as read-only after load. The cache
/// is constructor-injected wherever it is used, so independent pipelines
/// in tests never share state.
pub struct ModuleCache {
    loader: Box<dyn ModuleLoader>,
    modules: BTreeMap<Tool, Box<dyn ToolModule>>,
}

impl ModuleCache {
    pub fn new(loader: Box<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            modules: BTreeMap::new(),
        }
    }

    pub fn ensure(&mut self, tool: Tool) -> Result<&mut dyn ToolModule, Error> {
        let slot = match self.modules.entry(tool) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => {
                info!("loading module '{}'", tool);
                slot.insert(self.loader.load(tool)?)
            }
        };
        Ok(slot.as_mut())
    }

    pub fn preload(&mut self, tool: Tool) -> Result<(), Error> {
        self.ensure(tool).map(|_| ())
    }

    pub fn is_loaded(&self, tool: Tool) -> bool {
        self.modules.contains_key(&tool)
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("loaded", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Debug aid used by the process loader when a module leaves files behind.
pub(crate) fn log_namespace(fs: &ModuleFs) {
    for path in fs.paths() {
        debug!("module fs: {}", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingLoader {
        loads: std::rc::Rc<std::cell::Cell<usize>>,
    }

    struct NopModule;

    impl ToolModule for NopModule {
        fn invoke(
            &mut self,
            _fs: &mut ModuleFs,
            _args: &[String],
            _output: &mut dyn FnMut(&str),
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    impl ModuleLoader for CountingLoader {
        fn load(&mut self, _tool: Tool) -> Result<Box<dyn ToolModule>, Error> {
            self.loads.set(self.loads.get() + 1);
            Ok(Box::new(NopModule))
        }
    }

    #[test]
    fn cache_loads_each_module_once() {
        let loads = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut cache = ModuleCache::new(Box::new(CountingLoader {
            loads: loads.clone(),
        }));

        assert!(!cache.is_loaded(Tool::Sdcc));
        cache.ensure(Tool::Sdcc).unwrap();
        cache.ensure(Tool::Sdcc).unwrap();
        cache.preload(Tool::Sdcc).unwrap();
        assert_eq!(loads.get(), 1);
        assert!(cache.is_loaded(Tool::Sdcc));

        cache.ensure(Tool::Sdasz80).unwrap();
        assert_eq!(loads.get(), 2);
    }
}
