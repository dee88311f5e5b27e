use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::lifecycle::RunIdStore;

/// Default location of the run identifier, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = ".multispace/run-id";

/// Run identifier persisted in a file, so a later invocation can reattach.
///
/// The file holds the bare identifier followed by a newline and is removed
/// when the identifier is cleared.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    id: Option<String>,
}

impl StateFile {
    /// Open the state file, reading any identifier already recorded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let id = match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|id| !id.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read state file: {}", path.display())
                });
            }
        };
        Ok(Self { path, id })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", id))
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove state file: {}", self.path.display())),
        }
    }
}

impl RunIdStore for StateFile {
    fn current(&self) -> Option<String> {
        self.id.clone()
    }

    fn store(&mut self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.write(id)?,
            None => self.remove()?,
        }
        self.id = id.map(str::to_string);
        Ok(())
    }
}
