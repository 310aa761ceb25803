//! Deployment capability.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    Vercel,
    Docker,
}

impl DeployTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployTarget::Vercel => "vercel",
            DeployTarget::Docker => "docker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub deploy_url: String,
    pub status: String,
}

pub trait Deployer: Send + Sync {
    fn deploy(&self, target: DeployTarget, project_path: &Path) -> Result<Deployment>;
}

/// Simulated deployment that always reports the local preview URL.
#[derive(Debug, Clone)]
pub struct PreviewDeployer {
    preview_url: String,
}

impl PreviewDeployer {
    pub fn new(preview_url: impl Into<String>) -> Self {
        Self {
            preview_url: preview_url.into(),
        }
    }
}

impl Deployer for PreviewDeployer {
    fn deploy(&self, target: DeployTarget, project_path: &Path) -> Result<Deployment> {
        info!(
            target = target.as_str(),
            project = %project_path.display(),
            "simulating deployment"
        );
        Ok(Deployment {
            deploy_url: self.preview_url.clone(),
            status: "success".to_string(),
        })
    }
}
