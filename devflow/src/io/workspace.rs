//! Local file writes inside the cloned repository.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub trait LocalFiles: Send + Sync {
    /// Write `content` to `relative_path`, creating parent directories and
    /// overwriting any existing file. Returns a short confirmation.
    fn write(&self, relative_path: &str, content: &str) -> Result<String>;
}

/// Writes rooted at a directory; paths may not escape it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        let rel = Path::new(relative_path);
        if relative_path.trim().is_empty() {
            bail!("file path must be non-empty");
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    bail!("file path '{relative_path}' must stay inside the repository");
                }
            }
        }
        Ok(self.root.join(rel))
    }
}

impl LocalFiles for Workspace {
    fn write(&self, relative_path: &str, content: &str) -> Result<String> {
        let full = self.resolve(relative_path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&full, content).with_context(|| format!("write {}", full.display()))?;
        debug!(path = relative_path, bytes = content.len(), "wrote local file");
        Ok(format!(
            "Successfully wrote to {relative_path} ({} bytes)",
            content.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_parents_and_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("src/components/toggle.js", "v1").expect("write");
        let msg = ws.write("src/components/toggle.js", "v2").expect("write");

        assert!(msg.contains("src/components/toggle.js"));
        let on_disk =
            fs::read_to_string(temp.path().join("src/components/toggle.js")).expect("read");
        assert_eq!(on_disk, "v2");
    }

    #[test]
    fn rejects_escaping_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        assert!(ws.write("../outside.txt", "x").is_err());
        assert!(ws.write("/etc/passwd", "x").is_err());
        assert!(ws.write("", "x").is_err());
    }
}
