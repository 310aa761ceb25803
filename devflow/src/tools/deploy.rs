use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

use super::{DEPLOY_DOCKER, DEPLOY_VERCEL, Tool, optional_str};
use crate::io::deploy::{DeployTarget, Deployer};

/// Deploys to one fixed target.
pub struct DeployTool {
    deployer: Arc<dyn Deployer>,
    target: DeployTarget,
    default_project_path: PathBuf,
}

impl DeployTool {
    pub fn new(
        deployer: Arc<dyn Deployer>,
        target: DeployTarget,
        default_project_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            deployer,
            target,
            default_project_path: default_project_path.into(),
        }
    }

    pub fn tool_name(target: DeployTarget) -> &'static str {
        match target {
            DeployTarget::Vercel => DEPLOY_VERCEL,
            DeployTarget::Docker => DEPLOY_DOCKER,
        }
    }
}

impl Tool for DeployTool {
    fn name(&self) -> &str {
        Self::tool_name(self.target)
    }

    fn describe(&self) -> &str {
        match self.target {
            DeployTarget::Vercel => "Deploys the project to a Vercel preview. Input: project_path.",
            DeployTarget::Docker => "Deploys the project in a Docker container. Input: project_path.",
        }
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let project_path = optional_str(params, "project_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_project_path.clone());
        Ok(serde_json::to_value(
            self.deployer.deploy(self.target, &project_path)?,
        )?)
    }
}
