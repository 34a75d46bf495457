use super::{Error, ModuleFs, ModuleLoader, ToolModule};
use crate::builder::tools::Tool;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Locates the SDCC toolchain executables, preferring `$SDCC_HOME/bin`
/// and falling back to `$PATH`. Resolution happens once per tool; the
/// resolved path is the "loaded module".
pub struct ProcessLoader {
    bin_dir: Option<PathBuf>,
}

impl ProcessLoader {
    pub fn from_env() -> Self {
        Self {
            bin_dir: std::env::var_os("SDCC_HOME").map(|home| PathBuf::from(home).join("bin")),
        }
    }

    pub fn with_bin_dir(bin_dir: PathBuf) -> Self {
        Self {
            bin_dir: Some(bin_dir),
        }
    }

    fn resolve(&self, tool: Tool) -> Result<PathBuf, Error> {
        let exe = tool.to_string();

        if let Some(dir) = &self.bin_dir {
            let candidate = dir.join(&exe);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                let candidate = dir.join(&exe);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        Err(Error::Load(
            tool,
            format!("executable '{}' not found in SDCC_HOME or PATH", exe),
        ))
    }
}

impl ModuleLoader for ProcessLoader {
    fn load(&mut self, tool: Tool) -> Result<Box<dyn ToolModule>, Error> {
        let exe = self.resolve(tool)?;
        debug!("resolved '{}' to {}", tool, exe.display());
        Ok(Box::new(ProcessModule { tool, exe }))
    }
}

/// A tool realized as a subprocess. The module namespace is materialized
/// into a scratch directory, the process runs with that directory as its
/// working directory, and every regular file found there afterwards is
/// read back into the namespace.
pub struct ProcessModule {
    tool: Tool,
    exe: PathBuf,
}

impl ProcessModule {
    fn scratch_dir(&self) -> PathBuf {
        std::env::temp_dir().join(format!(
            "romforge-{}-{}-{}",
            std::process::id(),
            self.tool,
            SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn materialize(fs: &ModuleFs, dir: &Path) -> Result<(), Error> {
        for path in fs.paths() {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Some(data) = fs.get_file(path) {
                std::fs::write(&target, data)?;
            }
        }
        Ok(())
    }

    fn collect(fs: &mut ModuleFs, dir: &Path) -> Result<(), Error> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            fs.put_file(&name, std::fs::read(entry.path())?);
        }
        Ok(())
    }
}

impl ToolModule for ProcessModule {
    fn invoke(
        &mut self,
        fs: &mut ModuleFs,
        args: &[String],
        output: &mut dyn FnMut(&str),
    ) -> Result<(), Error> {
        let dir = self.scratch_dir();
        std::fs::create_dir_all(&dir)?;
        Self::materialize(fs, &dir)?;

        let result = Command::new(&self.exe)
            .args(args)
            .current_dir(&dir)
            .output()
            .map_err(|err| Error::Invoke(self.tool, err.to_string()));

        let collected = result.and_then(|out| {
            for line in String::from_utf8_lossy(&out.stdout).lines() {
                output(line);
            }
            for line in String::from_utf8_lossy(&out.stderr).lines() {
                output(line);
            }
            Self::collect(fs, &dir)
        });

        super::log_namespace(fs);
        if let Err(err) = std::fs::remove_dir_all(&dir) {
            warn!("could not remove scratch dir {}: {}", dir.display(), err);
        }

        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_bin_dir() {
        let dir = std::env::temp_dir().join(format!("romforge-bin-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sdcc"), b"").unwrap();

        let loader = ProcessLoader::with_bin_dir(dir.clone());
        assert_eq!(loader.resolve(Tool::Sdcc).unwrap(), dir.join("sdcc"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
