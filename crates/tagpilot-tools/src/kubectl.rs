//! Cluster client backed by `kubectl`

use regex::Regex;
use std::path::PathBuf;
use tagpilot_core::{tag, Result, TagpilotError};
use tracing::{debug, info, instrument};

use crate::command::{CommandRunner, CommandSpec};

const STATUS_JSONPATH: &str = "jsonpath={.spec.replicas}{\"|\"}{.status.readyReplicas}{\"|\"}{.spec.template.spec.containers[*].image}";

/// Replica counts and container images of one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub desired: u32,
    pub ready: u32,
    pub images: Vec<String>,
}

impl DeploymentStatus {
    /// Parse the `desired|ready|image image ...` jsonpath output
    pub fn parse(raw: &str) -> Result<Self> {
        let mut fields = raw.trim().splitn(3, '|');
        let (Some(desired), Some(ready), Some(images)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(TagpilotError::Deploy(format!(
                "unexpected deployment status output: '{}'",
                raw.trim()
            )));
        };

        let count = |value: &str, what: &str| -> Result<u32> {
            let value = value.trim();
            if value.is_empty() {
                return Ok(0);
            }
            value.parse().map_err(|_| {
                TagpilotError::Deploy(format!("invalid {} replica count '{}'", what, value))
            })
        };

        Ok(Self {
            desired: count(desired, "desired")?,
            ready: count(ready, "ready")?,
            images: images.split_whitespace().map(str::to_string).collect(),
        })
    }

    /// Desired and ready replica counts match
    pub fn is_ready(&self) -> bool {
        self.desired == self.ready
    }

    /// Tag `image` is running with, or `<prefix>0.0.0` when none matches
    pub fn image_tag(&self, image: &str, prefix: &str) -> String {
        let pattern = format!(
            r"{}:({}?\d{{1,2}}\.\d{{1,2}}\.\d{{1,2}})",
            regex::escape(image),
            regex::escape(prefix)
        );
        let Ok(re) = Regex::new(&pattern) else {
            return tag::zero_tag(prefix);
        };

        self.images
            .iter()
            .find_map(|i| re.captures(i).map(|c| c[1].to_string()))
            .unwrap_or_else(|| tag::zero_tag(prefix))
    }
}

/// `kubectl` wrapper with an optional per-command kubeconfig
pub struct Kubectl<R: CommandRunner> {
    runner: R,
    kubeconfig: Option<PathBuf>,
}

impl<R: CommandRunner> Kubectl<R> {
    pub fn new(runner: R, kubeconfig: Option<PathBuf>) -> Self {
        Self { runner, kubeconfig }
    }

    fn kubectl(&self) -> CommandSpec {
        let cmd = CommandSpec::new("kubectl");
        match &self.kubeconfig {
            Some(path) => cmd.env("KUBECONFIG", path.to_string_lossy()),
            None => cmd,
        }
    }

    /// Executes: `kubectl config use-context {context}`
    #[instrument(skip(self))]
    pub async fn use_context(&self, context: &str) -> Result<()> {
        debug!("Switching cluster context");
        self.runner
            .run(&self.kubectl().args(["config", "use-context", context]))
            .await?
            .check("kubectl config use-context", TagpilotError::Deploy)?;
        Ok(())
    }

    /// Executes: `kubectl apply -f -` with the manifest on stdin
    #[instrument(skip(self, manifest))]
    pub async fn apply(&self, manifest: &str) -> Result<()> {
        let output = self
            .runner
            .run(&self.kubectl().args(["apply", "-f", "-"]).stdin(manifest))
            .await?
            .check("kubectl apply", TagpilotError::Deploy)?;
        info!("Applied manifest: {}", output.stdout.trim());
        Ok(())
    }

    /// Executes: `kubectl get deployment {name} -n {namespace} -o jsonpath=...`
    #[instrument(skip(self))]
    pub async fn deployment_status(&self, name: &str, namespace: &str) -> Result<DeploymentStatus> {
        let output = self
            .runner
            .run(&self.kubectl().args([
                "get",
                "deployment",
                name,
                "-n",
                namespace,
                "-o",
                STATUS_JSONPATH,
            ]))
            .await?
            .check("kubectl get deployment", TagpilotError::Deploy)?;
        DeploymentStatus::parse(&output.stdout)
    }
}
