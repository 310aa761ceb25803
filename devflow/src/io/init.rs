//! Initialization helpers for `.devflow/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DevflowConfig, write_config};

/// Canonical paths within `.devflow/` for a project root.
#[derive(Debug, Clone)]
pub struct DevflowPaths {
    pub root: PathBuf,
    pub devflow_dir: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl DevflowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let devflow_dir = root.join(".devflow");
        Self {
            root: root.clone(),
            config_path: devflow_dir.join("config.toml"),
            logs_dir: devflow_dir.join("logs"),
            gitignore_path: devflow_dir.join(".gitignore"),
            devflow_dir,
        }
    }
}

/// Options for `init_devflow`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
}

/// Create `.devflow/` with a default config and an empty log directory.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_devflow(root: &Path, options: &InitOptions) -> Result<DevflowPaths> {
    let paths = DevflowPaths::new(root);
    if paths.devflow_dir.exists() && !paths.devflow_dir.is_dir() {
        return Err(anyhow!("devflow init: .devflow exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "devflow init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create directory {}", paths.logs_dir.display()))?;
    fs::write(&paths.gitignore_path, DEVFLOW_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &DevflowConfig::default())?;
    Ok(paths)
}

const DEVFLOW_GITIGNORE: &str = "logs/\n";
